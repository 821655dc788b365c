//! Progression segmentation.
//!
//! Progression text is a `|`-separated list of measures, each holding one or
//! two chord tokens. A token may carry leading markers and a trailing
//! inversion suffix:
//!
//! ```text
//! [SALSA](10)G7/5
//!  ^^^^^  ^^  ^^ ^^
//!  style  |   |  forced inversion (fifth)
//!         |   chord symbol
//!         harmonization code (tenths)
//! ```
//!
//! A measure with one chord spans two clave groups; with two chords each
//! chord gets one group. `%` repeats the previous measure.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use tracing::debug;
use winnow::combinator::{alt, delimited};
use winnow::prelude::*;
use winnow::token::take_while;

use crate::clave::ClaveGrid;
use crate::theory::{parse_chord, split_inversion_suffix, ChordSymbol};
use crate::voicing::Inversion;
use crate::{Error, Result};

type PResult<T> = winnow::ModalResult<T>;

/// Voicing label carried alongside each chord. Not interpreted by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Harmonization {
    Octaves,
    DoubleOctave,
    Tenths,
    Thirteenths,
}

impl Harmonization {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Octaves => "octaves",
            Self::DoubleOctave => "double octave",
            Self::Tenths => "tenths",
            Self::Thirteenths => "thirteenths",
        }
    }
}

impl fmt::Display for Harmonization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Harmonization {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "8" | "octaves" | "octavas" => Ok(Self::Octaves),
            "15" | "double octave" | "double_octave" | "doble octava" => Ok(Self::DoubleOctave),
            "10" | "tenths" | "décimas" | "decimas" => Ok(Self::Tenths),
            "13" | "thirteenths" | "treceavas" => Ok(Self::Thirteenths),
            other => Err(format!("unknown harmonization: {other}")),
        }
    }
}

/// One chord placed on a contiguous run of eighth-note slots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    /// Chord token as written, markers and inversion suffix removed.
    pub symbol: String,
    pub chord: ChordSymbol,
    pub slots: Range<usize>,
    pub harmonization: Option<Harmonization>,
    pub forced_inversion: Option<Inversion>,
    /// Last `[LABEL]` style marker seen before this chord.
    pub style: Option<String>,
}

impl Assignment {
    pub fn first_slot(&self) -> usize {
        self.slots.start
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Copy with slots moved `offset` eighths earlier.
    pub fn shifted(&self, offset: usize) -> Self {
        Self {
            slots: self.slots.start - offset..self.slots.end - offset,
            ..self.clone()
        }
    }
}

/// Segmenter output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segmentation {
    pub assignments: Vec<Assignment>,
    /// Measures after `%` expansion, including measures with no chords.
    pub measure_count: usize,
}

impl Segmentation {
    /// One past the last occupied slot.
    pub fn total_slots(&self) -> usize {
        total_slots(&self.assignments)
    }
}

pub fn total_slots(assignments: &[Assignment]) -> usize {
    assignments.iter().map(|a| a.slots.end).max().unwrap_or(0)
}

/// Move a run of assignments so its first slot is 0.
///
/// Returns the original first slot, which the renderer needs to stay
/// phase-aligned with the full piece.
pub fn rebase_segment(assignments: &[Assignment]) -> (usize, Vec<Assignment>) {
    let start = assignments.first().map_or(0, Assignment::first_slot);
    let rebased = assignments.iter().map(|a| a.shifted(start)).collect();
    (start, rebased)
}

/// Split assignments into runs sharing the same style label.
pub fn split_by_style(assignments: &[Assignment]) -> Vec<&[Assignment]> {
    assignments
        .chunk_by(|a, b| a.style == b.style)
        .collect()
}

enum Marker<'s> {
    Style(&'s str),
    Harmonization(Harmonization),
}

fn style_marker<'s>(input: &mut &'s str) -> PResult<&'s str> {
    delimited('[', take_while(1.., |c: char| c.is_ascii_uppercase()), ']').parse_next(input)
}

fn harmonization_marker(input: &mut &str) -> PResult<Harmonization> {
    delimited(
        '(',
        alt((
            "15".value(Harmonization::DoubleOctave),
            "10".value(Harmonization::Tenths),
            "13".value(Harmonization::Thirteenths),
            "8".value(Harmonization::Octaves),
        )),
        ')',
    )
    .parse_next(input)
}

fn leading_marker<'s>(input: &mut &'s str) -> PResult<Marker<'s>> {
    alt((
        style_marker.map(Marker::Style),
        harmonization_marker.map(Marker::Harmonization),
    ))
    .parse_next(input)
}

/// Running marker state while scanning tokens.
struct Scanner {
    harmonization: Option<Harmonization>,
    style: Option<String>,
    pending_inversion: Option<Inversion>,
}

struct ScannedChord {
    symbol: String,
    chord: ChordSymbol,
    harmonization: Option<Harmonization>,
    forced_inversion: Option<Inversion>,
    style: Option<String>,
}

impl Scanner {
    /// Consume one whitespace-free token. Returns a chord when the token holds one.
    fn token(&mut self, token: &str) -> Result<Option<ScannedChord>> {
        let mut rest = token;
        loop {
            let mut probe = rest;
            match leading_marker.parse_next(&mut probe) {
                Ok(Marker::Style(label)) => {
                    self.style = Some(label.to_string());
                    rest = probe;
                    if rest.is_empty() {
                        return Ok(None);
                    }
                }
                Ok(Marker::Harmonization(h)) => {
                    self.harmonization = Some(h);
                    rest = probe;
                }
                Err(_) => break,
            }
        }

        let (name, digit) = split_inversion_suffix(rest);
        let local = digit.map(Inversion::from_digit).transpose()?;

        if name.is_empty() {
            if local.is_some() {
                self.pending_inversion = local;
            }
            return Ok(None);
        }

        let chord = parse_chord(name)?;
        let forced_inversion = local.or(self.pending_inversion.take());
        self.pending_inversion = None;
        Ok(Some(ScannedChord {
            symbol: name.to_string(),
            chord,
            harmonization: self.harmonization,
            forced_inversion,
            style: self.style.clone(),
        }))
    }
}

/// Expand `%` repeats into the raw measure texts.
fn expand_measures(text: &str) -> Result<Vec<&str>> {
    let mut measures: Vec<&str> = Vec::new();
    for raw in text.split(['|', '\n']).map(str::trim).filter(|m| !m.is_empty()) {
        if raw == "%" {
            let previous = *measures.last().ok_or(Error::EmptyRepeat)?;
            measures.push(previous);
        } else {
            measures.push(raw);
        }
    }
    Ok(measures)
}

/// Split progression text into slot assignments laid over `grid`.
///
/// Slots continue from `start_slot`, and the first chord starts at the clave
/// group that `start_slot` falls on.
pub fn segment(
    text: &str,
    default_harmonization: Option<Harmonization>,
    start_slot: usize,
    grid: &ClaveGrid,
) -> Result<Segmentation> {
    let measures = expand_measures(text)?;

    let mut scanner = Scanner {
        harmonization: default_harmonization,
        style: None,
        pending_inversion: None,
    };
    let mut group = grid.slot_to_group_index(start_slot);
    let mut position = start_slot;
    let mut assignments = Vec::new();

    for (index, measure) in measures.iter().enumerate() {
        let mut chords = Vec::new();
        for token in measure.split_whitespace() {
            if let Some(chord) = scanner.token(token)? {
                chords.push(chord);
            }
        }

        let spans: Vec<usize> = match chords.len() {
            0 => continue,
            1 => {
                let span = grid.group_duration(group) + grid.group_duration(group + 1);
                group += 2;
                vec![span as usize]
            }
            2 => {
                let spans = vec![
                    grid.group_duration(group) as usize,
                    grid.group_duration(group + 1) as usize,
                ];
                group += 2;
                spans
            }
            n => {
                return Err(Error::InvalidMeasure {
                    measure: index + 1,
                    chords: n,
                })
            }
        };

        for (chord, span) in chords.into_iter().zip(spans) {
            let slots = position..position + span;
            position += span;
            debug!(
                symbol = %chord.symbol,
                start = slots.start,
                end = slots.end,
                inversion = ?chord.forced_inversion,
                "assigned chord"
            );
            assignments.push(Assignment {
                symbol: chord.symbol,
                chord: chord.chord,
                slots,
                harmonization: chord.harmonization,
                forced_inversion: chord.forced_inversion,
                style: chord.style,
            });
        }
    }

    Ok(Segmentation {
        assignments,
        measure_count: measures.len(),
    })
}
