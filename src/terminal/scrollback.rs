use std::collections::VecDeque;

use parking_lot::Mutex;

/// Capped byte ring holding the most recent PTY output for a terminal
/// session. Single producer (the PTY pump task), occasional consumer (a
/// reattaching client asking for a snapshot). When writing would exceed
/// capacity, the oldest bytes are dropped, never the newest.
pub struct ScrollbackBuffer {
    capacity: usize,
    bytes: Mutex<VecDeque<u8>>,
}

impl ScrollbackBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            bytes: Mutex::new(VecDeque::with_capacity(capacity.min(64 * 1024))),
        }
    }

    pub fn append(&self, data: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        let mut buf = self.bytes.lock();

        if data.len() >= self.capacity {
            buf.clear();
            buf.extend(&data[data.len() - self.capacity..]);
            return;
        }

        let overflow = (buf.len() + data.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            buf.drain(..overflow.min(buf.len()));
        }
        buf.extend(data.iter().copied());
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retains_exactly_the_last_capacity_bytes() {
        let buf = ScrollbackBuffer::new(8);
        buf.append(b"0123456789");
        assert_eq!(buf.snapshot(), b"23456789");
    }

    #[test]
    fn accumulates_across_multiple_writes_until_capacity() {
        let buf = ScrollbackBuffer::new(5);
        buf.append(b"ab");
        buf.append(b"cd");
        buf.append(b"ef");
        assert_eq!(buf.snapshot(), b"bcdef");
    }

    #[test]
    fn zero_capacity_discards_everything() {
        let buf = ScrollbackBuffer::new(0);
        buf.append(b"hello");
        assert!(buf.snapshot().is_empty());
    }
}
