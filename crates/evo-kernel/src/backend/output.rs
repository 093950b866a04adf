use parking_lot::Mutex;
use std::collections::VecDeque;

/// Bounded line buffer; the oldest lines fall off once `capacity` is reached.
#[derive(Debug)]
pub struct OutputBuffer {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl OutputBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    /// Last `n` lines joined with newlines
    #[must_use]
    pub fn tail(&self, n: usize) -> String {
        let lines = self.lines.lock();
        let skip = lines.len().saturating_sub(n);
        lines
            .iter()
            .skip(skip)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_newest_lines() {
        let buf = OutputBuffer::new(3);
        for i in 0..5 {
            buf.push(format!("line {i}"));
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.tail(10), "line 2\nline 3\nline 4");
        assert_eq!(buf.tail(1), "line 4");
        assert_eq!(buf.tail(0), "");
    }
}
