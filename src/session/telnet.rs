/// Interpret As Command: marks the start of a telnet negotiation sequence.
pub const IAC: u8 = 0xFF;

/// Strips telnet negotiation sequences from a raw byte stream.
///
/// MUD servers interleave `IAC <command> <option>` triples with displayable
/// text. The filter drops each triple wholesale; it does not track option
/// state, so subnegotiations longer than three bytes are only partially
/// removed. That matches how these servers are spoken to in practice, where
/// the client never answers negotiation anyway.
///
/// A triple can be cut by a read boundary, so the unconsumed tail is carried
/// into the next call rather than emitted.
#[derive(Debug, Default)]
pub struct TelnetFilter {
    carry: Vec<u8>,
}

impl TelnetFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes negotiation triples from `chunk`, prepending any tail carried
    /// over from the previous call. Returns the displayable bytes.
    pub fn filter(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut input = std::mem::take(&mut self.carry);
        input.extend_from_slice(chunk);

        let mut clean = Vec::with_capacity(input.len());
        let mut idx = 0;
        while idx < input.len() {
            if input[idx] == IAC {
                if idx + 3 <= input.len() {
                    // IAC + command + option
                    idx += 3;
                } else {
                    // Truncated sequence: hold it until more bytes arrive.
                    self.carry = input[idx..].to_vec();
                    break;
                }
            } else {
                clean.push(input[idx]);
                idx += 1;
            }
        }
        clean
    }

    /// Bytes held back waiting for the rest of a negotiation sequence.
    pub fn pending(&self) -> &[u8] {
        &self.carry
    }
}
