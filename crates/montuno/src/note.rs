use serde::{Deserialize, Serialize};

/// A rendered note, times in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub velocity: u8,
    pub pitch: u8,
    pub start: f64,
    pub end: f64,
}

impl NoteEvent {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Pitch-0 placeholder that only marks the piece's extent.
    pub fn is_anchor(&self) -> bool {
        self.pitch == 0
    }

    /// Copy moved `seconds` later.
    pub fn shifted(&self, seconds: f64) -> Self {
        Self {
            start: self.start + seconds,
            end: self.end + seconds,
            ..*self
        }
    }
}

/// Instrument metadata handed to the note-event sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    /// General MIDI program, 0-127.
    pub program: u8,
    pub is_drum: bool,
    pub name: String,
}

impl Default for Instrument {
    fn default() -> Self {
        Self {
            program: 0,
            is_drum: false,
            name: "Piano".to_string(),
        }
    }
}
