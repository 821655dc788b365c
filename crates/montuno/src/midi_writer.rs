//! Standard MIDI File output for rendered notes.

use std::path::PathBuf;
use tracing::info;

use crate::note::{Instrument, NoteEvent};
use crate::{Error, Result};

/// Ticks per quarter note in written files.
pub const PPQ: u16 = 480;

const DRUM_CHANNEL: u8 = 9;

/// Consumer of a finished render.
pub trait NoteSink {
    fn write(&mut self, notes: &[NoteEvent], instrument: &Instrument) -> Result<()>;
}

/// Writes a format 1 `.mid` file.
#[derive(Debug, Clone)]
pub struct MidiFileSink {
    pub path: PathBuf,
    pub bpm: f64,
}

impl MidiFileSink {
    pub fn new(path: impl Into<PathBuf>, bpm: f64) -> Self {
        Self {
            path: path.into(),
            bpm,
        }
    }
}

impl NoteSink for MidiFileSink {
    fn write(&mut self, notes: &[NoteEvent], instrument: &Instrument) -> Result<()> {
        let bytes = notes_to_midi(notes, instrument, self.bpm);
        std::fs::write(&self.path, &bytes).map_err(|source| Error::Io {
            path: self.path.clone(),
            source,
        })?;
        info!(path = %self.path.display(), notes = notes.len(), bytes = bytes.len(), "wrote MIDI file");
        Ok(())
    }
}

/// Notes collected in memory.
impl NoteSink for Vec<NoteEvent> {
    fn write(&mut self, notes: &[NoteEvent], _instrument: &Instrument) -> Result<()> {
        self.extend_from_slice(notes);
        Ok(())
    }
}

/// Encode notes as Standard MIDI File format 1 bytes.
///
/// Track 0 holds the tempo; track 1 holds the track name, program change and
/// notes, on channel 9 for drum instruments and channel 0 otherwise.
pub fn notes_to_midi(notes: &[NoteEvent], instrument: &Instrument, bpm: f64) -> Vec<u8> {
    let micros = micros_per_beat(bpm);
    let tracks = vec![
        build_tempo_track(micros),
        build_note_track(notes, instrument, micros),
    ];
    build_midi_file(PPQ, &tracks)
}

fn micros_per_beat(bpm: f64) -> u32 {
    if bpm > 0.0 {
        (60_000_000.0 / bpm).round() as u32
    } else {
        500_000
    }
}

fn seconds_to_ticks(seconds: f64, micros: u32) -> u64 {
    (seconds.max(0.0) * 1e6 / micros as f64 * PPQ as f64).round() as u64
}

fn build_tempo_track(micros: u32) -> Vec<u8> {
    let mut track_data = Vec::new();
    write_vlq(&mut track_data, 0);
    track_data.extend_from_slice(&[
        0xFF,
        0x51,
        0x03,
        (micros >> 16) as u8,
        (micros >> 8) as u8,
        micros as u8,
    ]);
    end_track(&mut track_data);
    track_data
}

fn build_note_track(notes: &[NoteEvent], instrument: &Instrument, micros: u32) -> Vec<u8> {
    let channel = if instrument.is_drum { DRUM_CHANNEL } else { 0 };
    let mut events: Vec<(u64, Vec<u8>)> = Vec::new();

    let name = instrument.name.as_bytes();
    let mut name_event = vec![0xFF, 0x03];
    write_vlq(&mut name_event, name.len() as u32);
    name_event.extend_from_slice(name);
    events.push((0, name_event));
    events.push((0, vec![0xC0 | channel, instrument.program & 0x7F]));

    for note in notes {
        let pitch = note.pitch & 0x7F;
        let onset = seconds_to_ticks(note.start, micros);
        let offset = seconds_to_ticks(note.end, micros).max(onset);
        events.push((onset, vec![0x90 | channel, pitch, note.velocity.clamp(1, 127)]));
        events.push((offset, vec![0x80 | channel, pitch, 0]));
    }

    // Note-offs before note-ons at the same tick.
    events.sort_by(|a, b| {
        a.0.cmp(&b.0).then_with(|| {
            let a_is_off = a.1.first().is_some_and(|b| b & 0xF0 == 0x80);
            let b_is_off = b.1.first().is_some_and(|b| b & 0xF0 == 0x80);
            b_is_off.cmp(&a_is_off)
        })
    });

    let mut track_data = Vec::new();
    let mut last_tick = 0u64;
    for (tick, data) in events {
        write_vlq(&mut track_data, tick.saturating_sub(last_tick) as u32);
        track_data.extend_from_slice(&data);
        last_tick = tick;
    }
    end_track(&mut track_data);
    track_data
}

fn end_track(track_data: &mut Vec<u8>) {
    write_vlq(track_data, 0);
    track_data.extend_from_slice(&[0xFF, 0x2F, 0x00]);
}

fn build_midi_file(ppq: u16, tracks: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = Vec::new();

    buf.extend_from_slice(b"MThd");
    buf.extend_from_slice(&6u32.to_be_bytes());
    buf.extend_from_slice(&1u16.to_be_bytes());
    buf.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
    buf.extend_from_slice(&ppq.to_be_bytes());

    for track_data in tracks {
        buf.extend_from_slice(b"MTrk");
        buf.extend_from_slice(&(track_data.len() as u32).to_be_bytes());
        buf.extend_from_slice(track_data);
    }

    buf
}

/// Append a MIDI variable-length quantity.
fn write_vlq(buf: &mut Vec<u8>, mut value: u32) {
    let mut bytes = vec![(value & 0x7F) as u8];
    value >>= 7;
    while value > 0 {
        bytes.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
    bytes.reverse();
    buf.extend_from_slice(&bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use midly::{MetaMessage, MidiMessage, Smf, TrackEventKind};
    use pretty_assertions::assert_eq;

    fn note(pitch: u8, start: f64, end: f64) -> NoteEvent {
        NoteEvent {
            velocity: 100,
            pitch,
            start,
            end,
        }
    }

    #[test]
    fn two_tracks_with_tempo() {
        let bytes = notes_to_midi(&[note(60, 0.0, 0.5)], &Instrument::default(), 100.0);
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.header.format, midly::Format::Parallel);
        assert_eq!(smf.tracks.len(), 2);

        let tempo = smf.tracks[0].iter().find_map(|e| match e.kind {
            TrackEventKind::Meta(MetaMessage::Tempo(t)) => Some(t.as_int()),
            _ => None,
        });
        assert_eq!(tempo, Some(600_000));
    }

    #[test]
    fn note_ticks_follow_tempo() {
        // At 120 bpm a quarter note is 0.5 s.
        let bytes = notes_to_midi(
            &[note(60, 0.0, 0.5), note(64, 0.5, 1.0)],
            &Instrument::default(),
            120.0,
        );
        let smf = Smf::parse(&bytes).unwrap();

        let mut tick = 0u32;
        let mut onsets = Vec::new();
        for event in &smf.tracks[1] {
            tick += event.delta.as_int();
            if let TrackEventKind::Midi {
                message: MidiMessage::NoteOn { key, vel },
                ..
            } = event.kind
            {
                if vel.as_int() > 0 {
                    onsets.push((tick, key.as_int()));
                }
            }
        }
        assert_eq!(onsets, vec![(0, 60), (480, 64)]);
    }

    #[test]
    fn drums_use_channel_nine() {
        let drums = Instrument {
            program: 0,
            is_drum: true,
            name: "Congas".to_string(),
        };
        let bytes = notes_to_midi(&[note(62, 0.0, 0.25)], &drums, 120.0);
        let smf = Smf::parse(&bytes).unwrap();

        let channels: Vec<u8> = smf.tracks[1]
            .iter()
            .filter_map(|e| match e.kind {
                TrackEventKind::Midi { channel, .. } => Some(channel.as_int()),
                _ => None,
            })
            .collect();
        assert!(!channels.is_empty());
        assert!(channels.iter().all(|c| *c == 9));

        let name = smf.tracks[1].iter().find_map(|e| match e.kind {
            TrackEventKind::Meta(MetaMessage::TrackName(raw)) => Some(raw.to_vec()),
            _ => None,
        });
        assert_eq!(name, Some(b"Congas".to_vec()));
    }

    #[test]
    fn anchors_are_written() {
        let anchor = NoteEvent {
            velocity: 1,
            pitch: 0,
            start: 1.5,
            end: 1.75,
        };
        let bytes = notes_to_midi(&[anchor], &Instrument::default(), 120.0);
        let smf = Smf::parse(&bytes).unwrap();
        let keys: Vec<u8> = smf.tracks[1]
            .iter()
            .filter_map(|e| match e.kind {
                TrackEventKind::Midi {
                    message: MidiMessage::NoteOn { key, .. },
                    ..
                } => Some(key.as_int()),
                _ => None,
            })
            .collect();
        assert_eq!(keys, vec![0]);
    }

    #[test]
    fn file_sink_writes_parseable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mid");
        let mut sink = MidiFileSink::new(&path, 90.0);
        sink.write(&[note(67, 0.0, 1.0)], &Instrument::default()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(Smf::parse(&bytes).is_ok());
    }

    #[test]
    fn vec_sink_collects() {
        let mut collected: Vec<NoteEvent> = Vec::new();
        collected.write(&[note(60, 0.0, 1.0)], &Instrument::default()).unwrap();
        assert_eq!(collected.len(), 1);
    }

    #[test]
    fn vlq_encoding() {
        let mut buf = Vec::new();
        write_vlq(&mut buf, 0);
        assert_eq!(buf, vec![0x00]);

        buf.clear();
        write_vlq(&mut buf, 127);
        assert_eq!(buf, vec![0x7F]);

        buf.clear();
        write_vlq(&mut buf, 480);
        assert_eq!(buf, vec![0x83, 0x60]);

        buf.clear();
        write_vlq(&mut buf, 0x0FFF_FFFF);
        assert_eq!(buf, vec![0xFF, 0xFF, 0xFF, 0x7F]);
    }
}
