const REPLACEMENT: char = '\u{FFFD}';

/// Incremental UTF-8 decoder.
///
/// The network layer hands us arbitrarily sized chunks, so a multi-byte
/// character can straddle a read boundary. Up to three bytes of a valid
/// prefix are held back between calls; malformed sequences become U+FFFD
/// rather than an error, because a garbled character must never stall the
/// session.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes as much of `input` (preceded by any held-back prefix) as forms
    /// complete characters, retaining an incomplete trailing sequence.
    pub fn decode(&mut self, input: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(input);

        let mut out = String::with_capacity(bytes.len());
        let mut pos = 0;
        while pos < bytes.len() {
            match std::str::from_utf8(&bytes[pos..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    pos = bytes.len();
                }
                Err(err) => {
                    let good = err.valid_up_to();
                    if good > 0 {
                        if let Ok(valid) = std::str::from_utf8(&bytes[pos..pos + good]) {
                            out.push_str(valid);
                        }
                        pos += good;
                    }
                    match err.error_len() {
                        // Malformed sequence of a known width: substitute it.
                        Some(bad) => {
                            out.push(REPLACEMENT);
                            pos += bad;
                        }
                        // Truncated character at the end of the chunk: wait
                        // for the rest. Always fewer than four bytes.
                        None => {
                            self.pending = bytes[pos..].to_vec();
                            return out;
                        }
                    }
                }
            }
        }
        out
    }

    /// Forces out any held-back prefix at end of stream. A prefix with no
    /// continuation is emitted as a single replacement character.
    pub fn flush(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            REPLACEMENT.to_string()
        }
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_ascii_directly() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"hello"), "hello");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn reassembles_character_split_across_chunks() {
        // U+4E16 (世) is three bytes: E4 B8 96, split one byte / two bytes.
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[0xE4]), "");
        assert_eq!(decoder.pending_len(), 1);
        assert_eq!(decoder.decode(&[0xB8, 0x96]), "世");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn reassembles_split_after_two_bytes() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[0xE4, 0xB8]), "");
        assert_eq!(decoder.decode(&[0x96, b'!']), "世!");
    }

    #[test]
    fn substitutes_malformed_sequences() {
        let mut decoder = Utf8Decoder::new();
        // 0xC3 followed by a non-continuation byte is invalid.
        assert_eq!(decoder.decode(&[b'a', 0xC3, b'b']), "a\u{FFFD}b");
    }

    #[test]
    fn substitutes_stray_continuation_byte() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[0x80, b'x']), "\u{FFFD}x");
    }

    #[test]
    fn flush_emits_replacement_for_dangling_prefix() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[0xE4, 0xB8]), "");
        assert_eq!(decoder.flush(), "\u{FFFD}");
        assert_eq!(decoder.flush(), "");
    }

    #[test]
    fn pending_never_reaches_full_width() {
        // Feed a four byte character one byte at a time; the prefix must stay
        // under four bytes because the last byte completes it.
        let mut decoder = Utf8Decoder::new();
        let grin = "😀".as_bytes(); // F0 9F 98 80
        for &byte in &grin[..3] {
            assert_eq!(decoder.decode(&[byte]), "");
            assert!(decoder.pending_len() < 4);
        }
        assert_eq!(decoder.decode(&grin[3..]), "😀");
    }
}
