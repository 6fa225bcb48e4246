//! Display cleanup applied to decoded text before it reaches the transcript.

const ESC: char = '\x1b';

/// Removes ANSI CSI sequences of the shape `ESC '[' [0-9;]* letter`.
///
/// This covers the color and cursor codes MUD servers emit; it is not a
/// terminal emulator. A sequence missing its final letter does not match and
/// is left in place.
pub fn strip_ansi(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut idx = 0;
    while idx < chars.len() {
        if chars[idx] == ESC && chars.get(idx + 1) == Some(&'[') {
            let mut end = idx + 2;
            while end < chars.len() && (chars[end].is_ascii_digit() || chars[end] == ';') {
                end += 1;
            }
            if end < chars.len() && chars[end].is_ascii_alphabetic() {
                idx = end + 1;
                continue;
            }
        }
        out.push(chars[idx]);
        idx += 1;
    }
    out
}

/// Collapses CRLF pairs and lone CRs to a single LF.
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}
