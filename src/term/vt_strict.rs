//! Strict minimal terminal back-end.
//!
//! Implements the classic VT subset directly over a character grid: cursor
//! motion, erase, and SGR attributes. Lower fidelity than the full back-end
//! on modern curses output; selectable via `SSH_MCP_TERMINAL_EMULATOR=vt100`.

use super::{CellColor, CellStyle, TerminalEmulator};
use vte::{Params, Parser, Perform};

pub struct VtStrictEmulator {
    parser: Parser,
    grid: Grid,
}

struct Grid {
    cols: usize,
    rows: usize,
    cells: Vec<Vec<char>>,
    styles: Vec<Vec<CellStyle>>,
    cursor_x: usize,
    cursor_y: usize,
    current: CellStyle,
}

impl VtStrictEmulator {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            parser: Parser::new(),
            grid: Grid::new(cols as usize, rows as usize),
        }
    }
}

impl TerminalEmulator for VtStrictEmulator {
    fn feed(&mut self, data: &[u8]) {
        self.parser.advance(&mut self.grid, data);
    }

    fn screen_contents(&self) -> Vec<Vec<char>> {
        self.grid.cells.clone()
    }

    fn screen_format(&self) -> (Vec<Vec<char>>, Vec<Vec<CellStyle>>) {
        (self.grid.cells.clone(), self.grid.styles.clone())
    }

    fn cursor_position(&self) -> (u16, u16) {
        (self.grid.cursor_x as u16, self.grid.cursor_y as u16)
    }

    fn size(&self) -> (u16, u16) {
        (self.grid.cols as u16, self.grid.rows as u16)
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        self.grid.resize(cols as usize, rows as usize);
    }
}

impl Grid {
    fn new(cols: usize, rows: usize) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            cols,
            rows,
            cells: vec![vec![' '; cols]; rows],
            styles: vec![vec![CellStyle::default(); cols]; rows],
            cursor_x: 0,
            cursor_y: 0,
            current: CellStyle::default(),
        }
    }

    fn resize(&mut self, cols: usize, rows: usize) {
        let cols = cols.max(1);
        let rows = rows.max(1);
        for row in &mut self.cells {
            row.resize(cols, ' ');
        }
        for row in &mut self.styles {
            row.resize(cols, CellStyle::default());
        }
        self.cells.resize(rows, vec![' '; cols]);
        self.styles.resize(rows, vec![CellStyle::default(); cols]);
        self.cols = cols;
        self.rows = rows;
        self.cursor_x = self.cursor_x.min(cols - 1);
        self.cursor_y = self.cursor_y.min(rows - 1);
    }

    fn put_char(&mut self, c: char) {
        if self.cursor_x >= self.cols {
            self.cursor_x = 0;
            self.line_feed();
        }
        self.cells[self.cursor_y][self.cursor_x] = c;
        self.styles[self.cursor_y][self.cursor_x] = self.current;
        self.cursor_x += 1;
    }

    fn line_feed(&mut self) {
        if self.cursor_y + 1 >= self.rows {
            self.cells.remove(0);
            self.styles.remove(0);
            self.cells.push(vec![' '; self.cols]);
            self.styles.push(vec![CellStyle::default(); self.cols]);
        } else {
            self.cursor_y += 1;
        }
    }

    fn clear_row(&mut self, row: usize, from: usize, to: usize) {
        if row >= self.rows {
            return;
        }
        let to = to.min(self.cols);
        for x in from..to {
            self.cells[row][x] = ' ';
            self.styles[row][x] = CellStyle::default();
        }
    }

    fn erase_display(&mut self, mode: u16) {
        match mode {
            // Cursor to end of screen.
            0 => {
                self.clear_row(self.cursor_y, self.cursor_x, self.cols);
                for row in self.cursor_y + 1..self.rows {
                    self.clear_row(row, 0, self.cols);
                }
            }
            // Start of screen to cursor.
            1 => {
                for row in 0..self.cursor_y {
                    self.clear_row(row, 0, self.cols);
                }
                self.clear_row(self.cursor_y, 0, self.cursor_x + 1);
            }
            _ => {
                for row in 0..self.rows {
                    self.clear_row(row, 0, self.cols);
                }
            }
        }
    }

    fn erase_line(&mut self, mode: u16) {
        match mode {
            0 => self.clear_row(self.cursor_y, self.cursor_x, self.cols),
            1 => self.clear_row(self.cursor_y, 0, self.cursor_x + 1),
            _ => self.clear_row(self.cursor_y, 0, self.cols),
        }
    }

    fn apply_sgr(&mut self, params: &Params) {
        let flat: Vec<u16> = params.iter().flat_map(|p| p.iter().copied()).collect();
        if flat.is_empty() {
            self.current = CellStyle::default();
            return;
        }
        let mut i = 0;
        while i < flat.len() {
            match flat[i] {
                0 => self.current = CellStyle::default(),
                1 => self.current.bold = true,
                3 => self.current.italic = true,
                4 => self.current.underline = true,
                5 => self.current.blink = true,
                7 => self.current.reverse = true,
                22 => self.current.bold = false,
                23 => self.current.italic = false,
                24 => self.current.underline = false,
                25 => self.current.blink = false,
                27 => self.current.reverse = false,
                30..=37 => self.current.fg = CellColor::Indexed((flat[i] - 30) as u8),
                39 => self.current.fg = CellColor::Default,
                40..=47 => self.current.bg = CellColor::Indexed((flat[i] - 40) as u8),
                49 => self.current.bg = CellColor::Default,
                90..=97 => self.current.fg = CellColor::Indexed((flat[i] - 90 + 8) as u8),
                100..=107 => self.current.bg = CellColor::Indexed((flat[i] - 100 + 8) as u8),
                38 | 48 => {
                    let is_fg = flat[i] == 38;
                    let color = if flat.get(i + 1) == Some(&5) {
                        let idx = flat.get(i + 2).copied().unwrap_or(0);
                        i += 2;
                        Some(CellColor::Indexed(idx as u8))
                    } else if flat.get(i + 1) == Some(&2) {
                        let r = flat.get(i + 2).copied().unwrap_or(0) as u8;
                        let g = flat.get(i + 3).copied().unwrap_or(0) as u8;
                        let b = flat.get(i + 4).copied().unwrap_or(0) as u8;
                        i += 4;
                        Some(CellColor::Rgb(r, g, b))
                    } else {
                        None
                    };
                    if let Some(color) = color {
                        if is_fg {
                            self.current.fg = color;
                        } else {
                            self.current.bg = color;
                        }
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }
}

fn param(params: &Params, index: usize, default: u16) -> u16 {
    params
        .iter()
        .nth(index)
        .and_then(|p| p.first().copied())
        .filter(|v| *v != 0)
        .unwrap_or(default)
}

impl Perform for Grid {
    fn print(&mut self, c: char) {
        self.put_char(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            0x0A => self.line_feed(),
            0x0D => self.cursor_x = 0,
            0x08 => self.cursor_x = self.cursor_x.saturating_sub(1),
            0x09 => {
                let next = (self.cursor_x / 8 + 1) * 8;
                self.cursor_x = next.min(self.cols - 1);
            }
            _ => {}
        }
    }

    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _action: char) {}

    fn put(&mut self, _byte: u8) {}

    fn unhook(&mut self) {}

    fn osc_dispatch(&mut self, _params: &[&[u8]], _bell_terminated: bool) {}

    fn csi_dispatch(&mut self, params: &Params, _intermediates: &[u8], _ignore: bool, action: char) {
        match action {
            'A' => {
                let n = param(params, 0, 1) as usize;
                self.cursor_y = self.cursor_y.saturating_sub(n);
            }
            'B' => {
                let n = param(params, 0, 1) as usize;
                self.cursor_y = (self.cursor_y + n).min(self.rows - 1);
            }
            'C' => {
                let n = param(params, 0, 1) as usize;
                self.cursor_x = (self.cursor_x + n).min(self.cols - 1);
            }
            'D' => {
                let n = param(params, 0, 1) as usize;
                self.cursor_x = self.cursor_x.saturating_sub(n);
            }
            'G' => {
                self.cursor_x = (param(params, 0, 1) as usize - 1).min(self.cols - 1);
            }
            'd' => {
                self.cursor_y = (param(params, 0, 1) as usize - 1).min(self.rows - 1);
            }
            'H' | 'f' => {
                self.cursor_y = (param(params, 0, 1) as usize - 1).min(self.rows - 1);
                self.cursor_x = (param(params, 1, 1) as usize - 1).min(self.cols - 1);
            }
            'J' => {
                let mode = params
                    .iter()
                    .next()
                    .and_then(|p| p.first().copied())
                    .unwrap_or(0);
                self.erase_display(mode);
            }
            'K' => {
                let mode = params
                    .iter()
                    .next()
                    .and_then(|p| p.first().copied())
                    .unwrap_or(0);
                self.erase_line(mode);
            }
            'm' => self.apply_sgr(params),
            _ => {}
        }
    }

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, _byte: u8) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_text(emu: &VtStrictEmulator, row: usize) -> String {
        emu.screen_contents()[row].iter().collect::<String>()
    }

    #[test]
    fn prints_and_advances_cursor() {
        let mut emu = VtStrictEmulator::new(20, 5);
        emu.feed(b"abc");
        assert!(row_text(&emu, 0).starts_with("abc"));
        assert_eq!(emu.cursor_position(), (3, 0));
    }

    #[test]
    fn newline_and_carriage_return() {
        let mut emu = VtStrictEmulator::new(20, 5);
        emu.feed(b"one\r\ntwo");
        assert!(row_text(&emu, 0).starts_with("one"));
        assert!(row_text(&emu, 1).starts_with("two"));
    }

    #[test]
    fn cursor_addressing() {
        let mut emu = VtStrictEmulator::new(20, 5);
        emu.feed(b"\x1b[3;5HX");
        assert_eq!(emu.screen_contents()[2][4], 'X');
    }

    #[test]
    fn erase_display_clears_grid() {
        let mut emu = VtStrictEmulator::new(20, 5);
        emu.feed(b"garbage\x1b[2J\x1b[Hfresh");
        assert!(row_text(&emu, 0).starts_with("fresh"));
        assert_eq!(row_text(&emu, 0).chars().nth(5), Some(' '));
    }

    #[test]
    fn sgr_attributes_stick_to_cells() {
        let mut emu = VtStrictEmulator::new(20, 5);
        emu.feed(b"\x1b[1;31mR\x1b[0mN");
        let (_, styles) = emu.screen_format();
        assert!(styles[0][0].bold);
        assert_eq!(styles[0][0].fg, CellColor::Indexed(1));
        assert_eq!(styles[0][1], CellStyle::default());
    }

    #[test]
    fn extended_color_sequences() {
        let mut emu = VtStrictEmulator::new(20, 5);
        emu.feed(b"\x1b[38;5;196mA\x1b[48;2;10;20;30mB");
        let (_, styles) = emu.screen_format();
        assert_eq!(styles[0][0].fg, CellColor::Indexed(196));
        assert_eq!(styles[0][1].bg, CellColor::Rgb(10, 20, 30));
    }

    #[test]
    fn scrolls_when_bottom_reached() {
        let mut emu = VtStrictEmulator::new(10, 2);
        emu.feed(b"a\r\nb\r\nc");
        assert!(row_text(&emu, 0).starts_with("b"));
        assert!(row_text(&emu, 1).starts_with("c"));
    }

    #[test]
    fn split_sequence_across_feeds() {
        let mut emu = VtStrictEmulator::new(20, 5);
        emu.feed(b"\x1b[3");
        emu.feed(b"1mred");
        let (_, styles) = emu.screen_format();
        assert_eq!(styles[0][0].fg, CellColor::Indexed(1));
        assert!(row_text(&emu, 0).starts_with("red"));
    }
}
