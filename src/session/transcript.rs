/// Append-only session log with a single read cursor.
///
/// Output accumulates for the lifetime of one connection; the cursor marks
/// the boundary between text already handed to a caller and text still
/// unread. Successive drains partition the log: no gap, no overlap.
#[derive(Debug, Default)]
pub struct Transcript {
    log: String,
    cursor: usize,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, text: &str) {
        self.log.push_str(text);
    }

    pub fn has_unread(&self) -> bool {
        self.cursor < self.log.len()
    }

    /// Returns everything after the cursor and advances it to the end.
    pub fn drain(&mut self) -> String {
        let text = self.log[self.cursor..].to_string();
        self.cursor = self.log.len();
        text
    }

    /// Clears the log and cursor together. Only called when a connection is
    /// established or torn down.
    pub fn reset(&mut self) {
        self.log.clear();
        self.cursor = 0;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}
