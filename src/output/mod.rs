//! ANSI stripping for streamed shell output.
//!
//! Full-screen programs emit composite sequences (OSC window titles, DCS
//! payloads, multi-byte CSI) that a regex cannot be trusted to consume, so
//! the stripper walks every byte through a VTE state machine and keeps only
//! printable text plus newline and tab.

use vte::{Params, Parser, Perform};

/// Strip ANSI escape sequences and control characters from raw bytes.
pub fn strip_ansi(input: &[u8]) -> String {
    let mut extractor = PlainTextExtractor::default();
    let mut parser = Parser::new();
    parser.advance(&mut extractor, input);
    extractor.into_string()
}

/// Strip ANSI escape sequences from a string.
pub fn strip_ansi_str(input: &str) -> String {
    strip_ansi(input.as_bytes())
}

#[derive(Default)]
struct PlainTextExtractor {
    output: String,
}

impl PlainTextExtractor {
    fn into_string(self) -> String {
        self.output
    }
}

impl Perform for PlainTextExtractor {
    fn print(&mut self, c: char) {
        if c >= ' ' {
            self.output.push(c);
        }
    }

    fn execute(&mut self, byte: u8) {
        // Keep line and column structure, drop CR and everything else.
        match byte {
            0x0A => self.output.push('\n'),
            0x09 => self.output.push('\t'),
            _ => {}
        }
    }

    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _action: char) {}

    fn put(&mut self, _byte: u8) {}

    fn unhook(&mut self) {}

    fn osc_dispatch(&mut self, _params: &[&[u8]], _bell_terminated: bool) {}

    fn csi_dispatch(
        &mut self,
        _params: &Params,
        _intermediates: &[u8],
        _ignore: bool,
        _action: char,
    ) {
    }

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, _byte: u8) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_plain_text() {
        assert_eq!(strip_ansi(b"hello world"), "hello world");
    }

    #[test]
    fn strips_sgr_sequences() {
        assert_eq!(strip_ansi(b"\x1b[31mred\x1b[0m"), "red");
        assert_eq!(strip_ansi(b"\x1b[1mbold\x1b[0m"), "bold");
    }

    #[test]
    fn strips_cursor_movement() {
        assert_eq!(strip_ansi(b"\x1b[2J\x1b[Hcontent"), "content");
        assert_eq!(strip_ansi(b"\x1b[s\x1b[u"), "");
    }

    #[test]
    fn strips_osc_window_title() {
        assert_eq!(
            strip_ansi(b"\x1b]0;Window Title\x07actual content"),
            "actual content"
        );
    }

    #[test]
    fn preserves_newlines_and_tabs() {
        assert_eq!(strip_ansi(b"line1\nline2"), "line1\nline2");
        assert_eq!(strip_ansi(b"col1\tcol2"), "col1\tcol2");
    }

    #[test]
    fn drops_carriage_returns_and_nul() {
        assert_eq!(strip_ansi(b"progress\r\ndone\x00"), "progress\ndone");
    }

    #[test]
    fn mixed_composite_sequences() {
        let input = b"\x1b[32m\x1b[1mGreen Bold\x1b[0m Normal \x1b[34mBlue\x1b[0m";
        assert_eq!(strip_ansi(input), "Green Bold Normal Blue");
    }

    #[test]
    fn only_escape_codes_yields_empty() {
        assert_eq!(strip_ansi(b"\x1b[31m\x1b[0m\x1b[2J"), "");
    }

    #[test]
    fn strip_ansi_str_round_trips() {
        assert_eq!(strip_ansi_str("\x1b[31mcolored\x1b[0m"), "colored");
    }
}
