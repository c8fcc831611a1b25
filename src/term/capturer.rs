//! Screen capture on top of a terminal emulator.
//!
//! The shell's stdout pump feeds raw bytes in; snapshot calls render the
//! emulator's virtual screen out. One mutex serializes emulator access so
//! snapshots observe a consistent screen.

use super::{new_emulator_from_env, CellColor, TerminalEmulator};
use std::sync::Mutex;

pub struct TerminalCapturer {
    emulator: Mutex<Box<dyn TerminalEmulator>>,
}

impl TerminalCapturer {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            emulator: Mutex::new(new_emulator_from_env(cols, rows)),
        }
    }

    pub fn with_emulator(emulator: Box<dyn TerminalEmulator>) -> Self {
        Self {
            emulator: Mutex::new(emulator),
        }
    }

    /// Feed a chunk of the raw PTY byte stream into the emulator.
    pub fn feed(&self, data: &[u8]) {
        let mut emulator = self.lock();
        emulator.feed(data);
    }

    /// Plain-text snapshot of the screen. Empty cells render as spaces and
    /// rows are joined with '\n'; trailing spaces are preserved.
    pub fn screen_snapshot(&self) -> String {
        let emulator = self.lock();
        let grid = emulator.screen_contents();
        let mut out = String::new();
        for (y, row) in grid.iter().enumerate() {
            if y > 0 {
                out.push('\n');
            }
            out.extend(row.iter());
        }
        out
    }

    /// Snapshot with minimal ANSI SGR colour sequences: a colour run is
    /// emitted only when fg or bg changes from the previous cell, and every
    /// row ends with an SGR reset.
    pub fn screen_snapshot_with_color(&self) -> String {
        let emulator = self.lock();
        let (grid, styles) = emulator.screen_format();
        let mut out = String::new();
        for (y, row) in grid.iter().enumerate() {
            if y > 0 {
                out.push('\n');
            }
            let mut last_fg = CellColor::Default;
            let mut last_bg = CellColor::Default;
            for (x, ch) in row.iter().enumerate() {
                let style = styles
                    .get(y)
                    .and_then(|line| line.get(x))
                    .copied()
                    .unwrap_or_default();
                if style.fg != last_fg {
                    push_sgr(&mut out, style.fg, false);
                    last_fg = style.fg;
                }
                if style.bg != last_bg {
                    push_sgr(&mut out, style.bg, true);
                    last_bg = style.bg;
                }
                out.push(*ch);
            }
            out.push_str("\x1b[0m");
        }
        out
    }

    /// Cursor position as (col, row).
    pub fn cursor_position(&self) -> (u16, u16) {
        self.lock().cursor_position()
    }

    /// Terminal size as (cols, rows).
    pub fn size(&self) -> (u16, u16) {
        self.lock().size()
    }

    pub fn resize(&self, cols: u16, rows: u16) {
        self.lock().resize(cols, rows);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Box<dyn TerminalEmulator>> {
        self.emulator.lock().unwrap_or_else(|err| err.into_inner())
    }
}

fn push_sgr(out: &mut String, color: CellColor, background: bool) {
    match color {
        CellColor::Default => {
            out.push_str(if background { "\x1b[49m" } else { "\x1b[39m" });
        }
        CellColor::Indexed(idx) if idx < 8 => {
            let base = if background { 40 } else { 30 };
            out.push_str(&format!("\x1b[{}m", base + idx as u16));
        }
        CellColor::Indexed(idx) if idx < 16 => {
            let base = if background { 100 } else { 90 };
            out.push_str(&format!("\x1b[{}m", base + (idx - 8) as u16));
        }
        CellColor::Indexed(idx) => {
            let selector = if background { 48 } else { 38 };
            out.push_str(&format!("\x1b[{};5;{}m", selector, idx));
        }
        CellColor::Rgb(r, g, b) => {
            let selector = if background { 48 } else { 38 };
            out.push_str(&format!("\x1b[{};2;{};{};{}m", selector, r, g, b));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::VtFullEmulator;

    fn capturer(cols: u16, rows: u16) -> TerminalCapturer {
        TerminalCapturer::with_emulator(Box::new(VtFullEmulator::new(cols, rows)))
    }

    #[test]
    fn snapshot_preserves_grid_shape() {
        let cap = capturer(10, 3);
        cap.feed(b"hi");
        let snapshot = cap.screen_snapshot();
        let lines: Vec<&str> = snapshot.split('\n').collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].len(), 10);
        assert!(lines[0].starts_with("hi        "));
    }

    #[test]
    fn snapshot_does_not_consume_state() {
        let cap = capturer(10, 3);
        cap.feed(b"stable");
        assert_eq!(cap.screen_snapshot(), cap.screen_snapshot());
    }

    #[test]
    fn color_snapshot_emits_runs_and_resets() {
        let cap = capturer(8, 2);
        cap.feed(b"\x1b[31mab\x1b[0mcd");
        let colored = cap.screen_snapshot_with_color();
        assert!(colored.contains("\x1b[31m"));
        // One colour change for the red run, one back to default; a reset per row.
        assert_eq!(colored.matches("\x1b[31m").count(), 1);
        assert_eq!(colored.matches("\x1b[0m").count(), 2);
    }

    #[test]
    fn resize_propagates_to_emulator() {
        let cap = capturer(10, 3);
        cap.resize(20, 6);
        assert_eq!(cap.size(), (20, 6));
    }

    #[test]
    fn cursor_tracks_output() {
        let cap = capturer(10, 3);
        cap.feed(b"abc");
        assert_eq!(cap.cursor_position(), (3, 0));
    }
}
