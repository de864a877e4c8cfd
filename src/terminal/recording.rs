use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

/// Cap on buffered recording entries. Recording is best-effort: once full,
/// new entries are dropped rather than blocking I/O or growing unbounded.
const MAX_ENTRIES: usize = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingEventKind {
    Input,
    Output,
    Resize,
}

impl RecordingEventKind {
    fn as_str(&self) -> &'static str {
        match self {
            RecordingEventKind::Input => "i",
            RecordingEventKind::Output => "o",
            RecordingEventKind::Resize => "r",
        }
    }
}

/// One asciinema-compatible event: elapsed seconds since recording start,
/// a kind tag, and the payload (lossily decoded to UTF-8 for output/input
/// bytes; the resize payload is already text).
#[derive(Debug, Clone, Serialize)]
pub struct RecordingEntry {
    pub t: f64,
    pub kind: &'static str,
    pub data: String,
}

pub struct Recorder {
    started_at: Instant,
    entries: Mutex<VecDeque<RecordingEntry>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record_bytes(&self, kind: RecordingEventKind, data: &[u8]) {
        self.push(kind, String::from_utf8_lossy(data).into_owned());
    }

    pub fn record_resize(&self, cols: u16, rows: u16) {
        self.push(RecordingEventKind::Resize, format!("{}x{}", cols, rows));
    }

    fn push(&self, kind: RecordingEventKind, data: String) {
        let mut entries = self.entries.lock();
        if entries.len() >= MAX_ENTRIES {
            return;
        }
        entries.push_back(RecordingEntry {
            t: self.started_at.elapsed().as_secs_f64(),
            kind: kind.as_str(),
            data,
        });
    }

    pub fn entries(&self) -> Vec<RecordingEntry> {
        self.entries.lock().iter().cloned().collect()
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_entries_once_full_instead_of_growing() {
        let recorder = Recorder::new();
        for _ in 0..MAX_ENTRIES + 10 {
            recorder.record_bytes(RecordingEventKind::Output, b"x");
        }
        assert_eq!(recorder.entries().len(), MAX_ENTRIES);
    }

    #[test]
    fn resize_entries_carry_the_r_kind() {
        let recorder = Recorder::new();
        recorder.record_resize(80, 24);
        let entries = recorder.entries();
        assert_eq!(entries[0].kind, "r");
        assert_eq!(entries[0].data, "80x24");
    }
}
