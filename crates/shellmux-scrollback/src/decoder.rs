//! Line decoder: turns raw PTY bytes into appended text lines.
//!
//! The VTE state machine is used as a tokenizer only. It reassembles UTF-8
//! sequences that straddle two reads and swallows CSI/OSC/DCS sequences so
//! they never land in the scrollback as garbage.

use std::collections::VecDeque;

use vte::{Params, Parser, Perform};

/// Stateful decoder owned by one buffer.
pub(crate) struct LineDecoder {
    parser: Parser,
}

impl LineDecoder {
    pub(crate) fn new() -> Self {
        Self {
            parser: Parser::new(),
        }
    }

    /// Decode `bytes` and apply the result to `lines`.
    ///
    /// `line_open` tracks whether the last line still accepts text. A
    /// newline closes it; the next printable character opens a new one.
    pub(crate) fn feed(&mut self, lines: &mut VecDeque<String>, line_open: &mut bool, bytes: &[u8]) {
        let mut sink = LineSink { lines, line_open };
        self.parser.advance(&mut sink, bytes);
    }
}

struct LineSink<'a> {
    lines: &'a mut VecDeque<String>,
    line_open: &'a mut bool,
}

impl LineSink<'_> {
    fn open_line(&mut self) -> &mut String {
        if !*self.line_open || self.lines.is_empty() {
            self.lines.push_back(String::new());
            *self.line_open = true;
        }
        // Non-empty after the push above.
        let last = self.lines.len() - 1;
        &mut self.lines[last]
    }

    fn newline(&mut self) {
        if !*self.line_open {
            self.lines.push_back(String::new());
        }
        *self.line_open = false;
    }
}

impl Perform for LineSink<'_> {
    fn print(&mut self, c: char) {
        self.open_line().push(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' => self.newline(),
            b'\t' => self.open_line().push('\t'),
            // Backspace: shells echo "\b \b" to erase.
            0x08 => {
                if *self.line_open {
                    if let Some(line) = self.lines.back_mut() {
                        line.pop();
                    }
                }
            }
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _action: char) {}

    fn osc_dispatch(&mut self, _params: &[&[u8]], _bell_terminated: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(chunks: &[&[u8]]) -> Vec<String> {
        let mut decoder = LineDecoder::new();
        let mut lines = VecDeque::new();
        let mut open = false;
        for chunk in chunks {
            decoder.feed(&mut lines, &mut open, chunk);
        }
        lines.into_iter().collect()
    }

    #[test]
    fn test_plain_lines() {
        assert_eq!(decode(&[b"one\ntwo\n"]), vec!["one", "two"]);
    }

    #[test]
    fn test_blank_lines_are_kept() {
        assert_eq!(decode(&[b"a\n\nb"]), vec!["a", "", "b"]);
    }

    #[test]
    fn test_crlf_is_one_break() {
        assert_eq!(decode(&[b"first\r\nsecond\r\n"]), vec!["first", "second"]);
    }

    #[test]
    fn test_escape_sequences_are_stripped() {
        let lines = decode(&[b"\x1b[1;32mgreen\x1b[0m text\n\x1b]0;title\x07prompt$ "]);
        assert_eq!(lines, vec!["green text", "prompt$ "]);
    }

    #[test]
    fn test_utf8_split_across_reads() {
        let bytes = "héllo\n".as_bytes();
        // 'é' is two bytes starting at index 1.
        let lines = decode(&[&bytes[..2], &bytes[2..]]);
        assert_eq!(lines, vec!["héllo"]);
    }

    #[test]
    fn test_backspace_erases() {
        assert_eq!(decode(&[b"lsx\x08 \x08\n"]), vec!["ls"]);
    }
}
