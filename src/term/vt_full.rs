//! Full-fidelity terminal back-end built on the `vt100` crate.

use super::{CellColor, CellStyle, TerminalEmulator};
use vt100::Parser;

pub struct VtFullEmulator {
    parser: Parser,
}

impl VtFullEmulator {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            parser: Parser::new(rows, cols, 0),
        }
    }
}

fn map_color(color: vt100::Color) -> CellColor {
    match color {
        vt100::Color::Default => CellColor::Default,
        vt100::Color::Idx(idx) => CellColor::Indexed(idx),
        vt100::Color::Rgb(r, g, b) => CellColor::Rgb(r, g, b),
    }
}

impl TerminalEmulator for VtFullEmulator {
    fn feed(&mut self, data: &[u8]) {
        self.parser.process(data);
    }

    fn screen_contents(&self) -> Vec<Vec<char>> {
        let screen = self.parser.screen();
        let (rows, cols) = screen.size();
        let mut grid = Vec::with_capacity(rows as usize);
        for row in 0..rows {
            let mut line = Vec::with_capacity(cols as usize);
            for col in 0..cols {
                let ch = screen
                    .cell(row, col)
                    .and_then(|cell| cell.contents().chars().next())
                    .unwrap_or(' ');
                line.push(ch);
            }
            grid.push(line);
        }
        grid
    }

    fn screen_format(&self) -> (Vec<Vec<char>>, Vec<Vec<CellStyle>>) {
        let screen = self.parser.screen();
        let (rows, cols) = screen.size();
        let mut chars = Vec::with_capacity(rows as usize);
        let mut styles = Vec::with_capacity(rows as usize);
        for row in 0..rows {
            let mut char_line = Vec::with_capacity(cols as usize);
            let mut style_line = Vec::with_capacity(cols as usize);
            for col in 0..cols {
                match screen.cell(row, col) {
                    Some(cell) => {
                        char_line.push(cell.contents().chars().next().unwrap_or(' '));
                        style_line.push(CellStyle {
                            fg: map_color(cell.fgcolor()),
                            bg: map_color(cell.bgcolor()),
                            bold: cell.bold(),
                            italic: cell.italic(),
                            underline: cell.underline(),
                            // vt100 does not track blink separately.
                            blink: false,
                            reverse: cell.inverse(),
                        });
                    }
                    None => {
                        char_line.push(' ');
                        style_line.push(CellStyle::default());
                    }
                }
            }
            chars.push(char_line);
            styles.push(style_line);
        }
        (chars, styles)
    }

    fn cursor_position(&self) -> (u16, u16) {
        let (row, col) = self.parser.screen().cursor_position();
        (col, row)
    }

    fn size(&self) -> (u16, u16) {
        let (rows, cols) = self.parser.screen().size();
        (cols, rows)
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        self.parser.set_size(rows, cols);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_plain_text() {
        let mut emu = VtFullEmulator::new(80, 24);
        emu.feed(b"Hello, World!");
        let grid = emu.screen_contents();
        let first: String = grid[0].iter().collect();
        assert!(first.starts_with("Hello, World!"));
    }

    #[test]
    fn handles_clear_and_home() {
        let mut emu = VtFullEmulator::new(80, 24);
        emu.feed(b"Initial content");
        emu.feed(b"\x1b[2J\x1b[HCleared");
        let first: String = emu.screen_contents()[0].iter().collect();
        assert!(first.starts_with("Cleared"));
    }

    #[test]
    fn tolerates_split_escape_sequences() {
        let mut emu = VtFullEmulator::new(80, 24);
        emu.feed(b"\x1b[3");
        emu.feed(b"1mred\x1b[0m");
        let first: String = emu.screen_contents()[0].iter().collect();
        assert!(first.starts_with("red"));
        let (_, styles) = emu.screen_format();
        assert_eq!(styles[0][0].fg, CellColor::Indexed(1));
    }

    #[test]
    fn tracks_cursor_and_size() {
        let mut emu = VtFullEmulator::new(80, 24);
        emu.feed(b"test");
        assert_eq!(emu.cursor_position(), (4, 0));
        assert_eq!(emu.size(), (80, 24));
        emu.resize(120, 40);
        assert_eq!(emu.size(), (120, 40));
    }
}
