//! Salsa montuno rendering.
//!
//! Turns a notated chord progression into a voiced, clave-aligned piano
//! part by replaying short reference loops (one per bass inversion) over the
//! progression and re-harmonizing every template note against the chord that
//! owns its eighth-note slot.
//!
//! Pipeline, leaf-first:
//!
//! - [`theory`]: chord suffix table, note names, chord-symbol parsing
//! - [`clave`]: repeating eighth-note group lengths of a clave pattern
//! - [`progression`]: progression text to slot [`Assignment`]s
//! - [`voicing`]: inversion choice and bass voice-leading
//! - [`approach`]: approach-note profiles and template-note resolution
//! - [`template`]: reference loops, their per-eighth groups, and stores
//! - [`render`]: template replay into [`NoteEvent`]s
//! - [`generate`]: full request orchestration across segments
//! - [`midi_writer`]: note-event sink producing Standard MIDI Files

pub mod approach;
pub mod clave;
pub mod cleanup;
pub mod generate;
pub mod midi_writer;
pub mod note;
pub mod progression;
pub mod render;
pub mod template;
pub mod theory;
pub mod voicing;

pub use approach::{ApproachOptions, ApproachProfile, ApproachRole, Resolved};
pub use clave::ClaveGrid;
pub use cleanup::{normalise_bars, ChordReplacements, ReplacementRule};
pub use generate::{generate, MontunoRequest, MontunoResult};
pub use midi_writer::{notes_to_midi, MidiFileSink, NoteSink};
pub use note::{Instrument, NoteEvent};
pub use progression::{segment, Assignment, Harmonization, Segmentation};
pub use render::{render, RenderOptions};
pub use template::{
    CachedTemplateStore, DirectoryTemplateStore, MemoryTemplateStore, Template, TemplateKey,
    TemplateNote, TemplateSet, TemplateStore, Variant, VariantChoice,
};
pub use theory::{parse_chord, ChordSymbol, NoteName};
pub use voicing::{plan_bass_line, select_inversion, BassPlan, Inversion, Registration};

use std::path::PathBuf;

/// Errors from progression parsing and montuno rendering.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("progression contains no chords")]
    EmptyProgression,

    #[error("unrecognized chord symbol: {symbol}")]
    UnrecognizedChord { symbol: String },

    #[error("measure {measure} holds {chords} chords, expected one or two")]
    InvalidMeasure { measure: usize, chords: usize },

    #[error("repeat marker '%' cannot open a progression")]
    EmptyRepeat,

    #[error("unknown inversion: {value}")]
    UnknownInversion { value: String },

    #[error("no reference template for clave {clave}, inversion {inversion}, variant {variant}")]
    MissingTemplate {
        clave: String,
        inversion: String,
        variant: String,
    },

    #[error("unknown clave pattern: {name}")]
    UnknownClave { name: String },

    #[error("unknown template variant: {value}")]
    UnknownVariant { value: String },

    #[error("invalid note name: {value}")]
    InvalidNoteName { value: String },

    #[error("invalid replacement rule {pattern}: {message}")]
    InvalidReplacementRule { pattern: String, message: String },

    #[error("MIDI parse error: {0}")]
    MidiParse(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
