//! Bounded line buffer for background shell output.
//!
//! A fixed-capacity ring with a separate unread cursor: `read_latest_lines`
//! peeks without consuming, `read_all_unread` drains the unread window.
//! Heartbeat noise and lines that are empty once ANSI-stripped never enter
//! the buffer.

use crate::output::strip_ansi_str;
use std::sync::Mutex;

pub const DEFAULT_BUFFER_LINES: usize = 10_000;

/// Heartbeat tokens the application-level keepalive echoes back.
const HEARTBEAT_TOKENS: [&str; 4] = ["\x1b[s\x1b[u", "\x00", "\x1b[s", "\x1b[u"];

pub struct CircularBuffer {
    inner: Mutex<Ring>,
}

struct Ring {
    lines: Vec<String>,
    size: usize,
    head: usize,
    tail: usize,
    count: usize,
}

impl CircularBuffer {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            inner: Mutex::new(Ring {
                lines: vec![String::new(); size],
                size,
                head: 0,
                tail: 0,
                count: 0,
            }),
        }
    }

    /// Append one logical line, dropping heartbeat noise and lines that are
    /// whitespace-only after ANSI stripping. On overflow the oldest entry is
    /// evicted, silently consuming unread history past the capacity.
    pub fn write(&self, line: &str) {
        if HEARTBEAT_TOKENS.contains(&line) {
            return;
        }
        let cleaned = strip_ansi_str(line);
        if cleaned.trim().is_empty() {
            return;
        }

        let mut ring = self.lock();
        if ring.count >= ring.size {
            let head = ring.head;
            ring.lines[head] = cleaned;
            ring.head = (ring.head + 1) % ring.size;
            ring.tail = (ring.tail + 1) % ring.size;
        } else {
            let head = ring.head;
            ring.lines[head] = cleaned;
            ring.head = (ring.head + 1) % ring.size;
            ring.count += 1;
        }
    }

    /// The most recent `n` lines in chronological order, without consuming.
    pub fn read_latest_lines(&self, n: usize) -> Vec<String> {
        let ring = self.lock();
        let n = n.min(ring.count);
        let mut out = Vec::with_capacity(n);
        for i in (0..n).rev() {
            let pos = (ring.head + ring.size - 1 - i) % ring.size;
            out.push(ring.lines[pos].clone());
        }
        out
    }

    /// Everything between the unread cursor and the write cursor, in order;
    /// the unread window is then empty until the next write.
    pub fn read_all_unread(&self) -> Vec<String> {
        let mut ring = self.lock();
        let mut out = Vec::with_capacity(ring.count);
        for i in 0..ring.count {
            let pos = (ring.tail + i) % ring.size;
            out.push(ring.lines[pos].clone());
        }
        ring.tail = ring.head;
        ring.count = 0;
        out
    }

    /// Up to `n` bytes taken from the end of the most recent lines, joined
    /// with newlines; the oldest included line is truncated if needed.
    pub fn read_latest_bytes(&self, n: usize) -> String {
        let lines = {
            let ring = self.lock();
            let count = ring.count;
            drop(ring);
            self.read_latest_lines(count)
        };
        let mut out = String::new();
        let mut used = 0;
        for line in lines.iter().rev() {
            if used + line.len() > n {
                let remaining = n.saturating_sub(used);
                if remaining > 0 {
                    let mut start = line.len() - remaining;
                    while start < line.len() && !line.is_char_boundary(start) {
                        start += 1;
                    }
                    out = format!("{}{}", &line[start..], out);
                }
                break;
            }
            out = format!("{}\n{}", line, out);
            used += line.len() + 1;
        }
        out
    }

    pub fn len(&self) -> usize {
        self.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().size
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Ring> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_never_exceeds_capacity() {
        let buf = CircularBuffer::new(100);
        for i in 0..150 {
            buf.write(&format!("line-{}", i));
        }
        assert_eq!(buf.len(), 100);
        assert_eq!(buf.capacity(), 100);
    }

    #[test]
    fn overflow_drops_oldest_lines() {
        let buf = CircularBuffer::new(100);
        for i in 0..150 {
            buf.write(&format!("line-{}", i));
        }
        let latest = buf.read_latest_lines(20);
        assert_eq!(latest.len(), 20);
        assert_eq!(latest[0], "line-130");
        assert_eq!(latest[19], "line-149");
    }

    #[test]
    fn latest_n_equal_to_capacity_returns_exactly_last_capacity() {
        let buf = CircularBuffer::new(10);
        for i in 0..25 {
            buf.write(&format!("l{}", i));
        }
        let all = buf.read_latest_lines(10);
        assert_eq!(all[0], "l15");
        assert_eq!(all[9], "l24");
    }

    #[test]
    fn heartbeat_tokens_are_filtered() {
        let buf = CircularBuffer::new(10);
        for line in ["A", "\x1b[s\x1b[u", "\x00", "B", "\x1b[s", "\x1b[u", "C"] {
            buf.write(line);
        }
        assert_eq!(buf.read_latest_lines(10), vec!["A", "B", "C"]);
    }

    #[test]
    fn ansi_only_lines_are_filtered() {
        let buf = CircularBuffer::new(10);
        buf.write("\x1b[31m\x1b[0m");
        buf.write("\x1b[2J");
        buf.write("   ");
        buf.write("\x1b[32mgreen\x1b[0m");
        assert_eq!(buf.read_latest_lines(10), vec!["green"]);
    }

    #[test]
    fn read_all_unread_consumes_window() {
        let buf = CircularBuffer::new(10);
        buf.write("one");
        buf.write("two");
        assert_eq!(buf.read_all_unread(), vec!["one", "two"]);
        assert!(buf.read_all_unread().is_empty());
        buf.write("three");
        assert_eq!(buf.read_all_unread(), vec!["three"]);
    }

    #[test]
    fn read_latest_lines_does_not_mutate() {
        let buf = CircularBuffer::new(10);
        buf.write("a");
        buf.write("b");
        assert_eq!(buf.read_latest_lines(5), buf.read_latest_lines(5));
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn latest_bytes_truncates_oldest_included_line() {
        let buf = CircularBuffer::new(10);
        buf.write("aaaa");
        buf.write("bb");
        // "aaaa\nbb\n" is 8 bytes; ask for 5.
        let out = buf.read_latest_bytes(5);
        assert!(out.ends_with("bb\n"));
        assert!(out.len() <= 6);
        assert!(out.contains("aa"));
    }

    #[test]
    fn latest_bytes_with_large_limit_returns_everything() {
        let buf = CircularBuffer::new(10);
        buf.write("x");
        buf.write("y");
        assert_eq!(buf.read_latest_bytes(1024), "x\ny\n");
    }
}
