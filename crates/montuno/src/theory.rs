//! Chord-symbol theory: the suffix interval table, note spellings, and the
//! chord-symbol parser.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use winnow::combinator::opt;
use winnow::prelude::*;
use winnow::token::{one_of, take_while};

use crate::{Error, Result};

type PResult<T> = winnow::ModalResult<T>;

/// A chord-symbol suffix and its intervals above the root, in semitones.
pub struct ChordSuffix {
    pub suffix: &'static str,
    pub intervals: &'static [u8],
}

impl ChordSuffix {
    const fn new(suffix: &'static str, intervals: &'static [u8]) -> Self {
        Self { suffix, intervals }
    }
}

/// Canonical major-seventh glyph. A bare root (`C`) reads as `C∆`.
pub const MAJOR_SEVENTH: &str = "∆";

/// All recognized suffixes. Intervals are ascending and start at 0.
pub static SUFFIXES: &[ChordSuffix] = &[
    ChordSuffix::new("6", &[0, 4, 7, 9]),
    ChordSuffix::new("7", &[0, 4, 7, 10]),
    ChordSuffix::new("∆", &[0, 4, 7, 11]),
    ChordSuffix::new("m", &[0, 3, 7]),
    ChordSuffix::new("m6", &[0, 3, 7, 9]),
    ChordSuffix::new("m7", &[0, 3, 7, 10]),
    ChordSuffix::new("m∆", &[0, 3, 7, 11]),
    ChordSuffix::new("+7", &[0, 4, 8, 10]),
    // Suspended
    ChordSuffix::new("∆sus4", &[0, 5, 7, 11]),
    ChordSuffix::new("∆sus2", &[0, 2, 7, 11]),
    ChordSuffix::new("7sus4", &[0, 5, 7, 10]),
    ChordSuffix::new("7sus2", &[0, 2, 7, 10]),
    // Diminished and altered fifths
    ChordSuffix::new("º7", &[0, 3, 6, 9]),
    ChordSuffix::new("º∆", &[0, 3, 6, 11]),
    ChordSuffix::new("m7(b5)", &[0, 3, 6, 10]),
    ChordSuffix::new("7(b5)", &[0, 4, 6, 10]),
    ChordSuffix::new("∆(b5)", &[0, 4, 6, 11]),
    // Altered ninths
    ChordSuffix::new("7(b9)", &[0, 4, 7, 10, 13]),
    ChordSuffix::new("7(#9)", &[0, 4, 7, 10, 15]),
    ChordSuffix::new("+7(b9)", &[0, 4, 8, 10, 13]),
    ChordSuffix::new("7(b5)b9", &[0, 4, 6, 10, 13]),
    ChordSuffix::new("7sus4(b9)", &[0, 5, 7, 10, 13]),
    // Extensions
    ChordSuffix::new("9", &[0, 4, 7, 10, 14]),
    ChordSuffix::new("11", &[0, 4, 7, 10, 17]),
    ChordSuffix::new("13", &[0, 4, 7, 10, 21]),
    ChordSuffix::new("∆9", &[0, 4, 7, 11, 14]),
    ChordSuffix::new("∆11", &[0, 4, 7, 11, 17]),
    ChordSuffix::new("∆13", &[0, 4, 7, 11, 21]),
    ChordSuffix::new("m9", &[0, 3, 7, 10, 14]),
    ChordSuffix::new("m11", &[0, 3, 7, 10, 17]),
    ChordSuffix::new("m13", &[0, 3, 7, 10, 21]),
    ChordSuffix::new("7(9)", &[0, 4, 7, 10, 14]),
    ChordSuffix::new("7(13)", &[0, 4, 7, 10, 21]),
    ChordSuffix::new("m7(9)", &[0, 3, 7, 10, 14]),
    ChordSuffix::new("m7(11)", &[0, 3, 7, 10, 17]),
    ChordSuffix::new("m7(13)", &[0, 3, 7, 10, 21]),
];

/// Trailing color markers accepted after any suffix.
const COLOR_MARKERS: [&str; 2] = ["(b6)", "(b13)"];

/// Look up the intervals of a suffix key.
pub fn suffix_intervals(suffix: &str) -> Option<&'static [u8]> {
    SUFFIXES
        .iter()
        .find(|entry| entry.suffix == suffix)
        .map(|entry| entry.intervals)
}

/// Root spellings and their pitch classes.
static SPELLINGS: [(&str, u8); 21] = [
    ("C", 0),
    ("B#", 0),
    ("C#", 1),
    ("Db", 1),
    ("D", 2),
    ("D#", 3),
    ("Eb", 3),
    ("E", 4),
    ("Fb", 4),
    ("F", 5),
    ("E#", 5),
    ("F#", 6),
    ("Gb", 6),
    ("G", 7),
    ("G#", 8),
    ("Ab", 8),
    ("A", 9),
    ("A#", 10),
    ("Bb", 10),
    ("B", 11),
    ("Cb", 11),
];

/// Pitch class of a spelled note name (`"Eb"` is 3). Octave digits are not accepted.
pub fn pitch_class(name: &str) -> Option<u8> {
    SPELLINGS
        .iter()
        .find(|(spelling, _)| *spelling == name)
        .map(|(_, pc)| *pc)
}

fn spelling_for(name: &str) -> Option<(&'static str, u8)> {
    SPELLINGS.iter().find(|(spelling, _)| *spelling == name).copied()
}

const NOTE_NAMES_SHARP: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];
const NOTE_NAMES_FLAT: [&str; 12] = [
    "C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B",
];

/// Pitch classes conventionally spelled with flats.
pub static FLAT_KEY_ROOTS: [u8; 6] = [1, 3, 5, 6, 8, 10];

pub fn note_name(pitch_class: u8, use_flats: bool) -> &'static str {
    let idx = (pitch_class % 12) as usize;
    if use_flats {
        NOTE_NAMES_FLAT[idx]
    } else {
        NOTE_NAMES_SHARP[idx]
    }
}

/// Parse a spelled root: a letter plus optional `b` or `#`.
fn spelled_root<'s>(input: &mut &'s str) -> PResult<&'s str> {
    (one_of('A'..='G'), opt(one_of(['b', '#'])))
        .take()
        .parse_next(input)
}

/// A parsed chord symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ChordSymbol {
    /// Root pitch class, 0-11.
    pub root: u8,
    /// Root as written (`"Bb"`, `"A#"`), kept for enharmonic decisions.
    pub root_name: &'static str,
    /// Key into [`SUFFIXES`].
    pub suffix: &'static str,
    /// Trailing `(b6)` or `(b13)` marker, if written.
    pub color: Option<&'static str>,
}

impl ChordSymbol {
    pub fn intervals(&self) -> &'static [u8] {
        // Only constructed from table entries.
        suffix_intervals(self.suffix).unwrap_or(&[0, 4, 7, 11])
    }

    pub fn third(&self) -> u8 {
        self.intervals()[1]
    }

    /// The chord's third, or the fourth on suspended chords.
    pub fn third_equivalent(&self) -> u8 {
        if self.is_suspended() {
            5
        } else {
            self.third()
        }
    }

    pub fn fifth(&self) -> u8 {
        self.intervals()[2]
    }

    /// The seventh interval when the symbol names one. Sixth chords have none.
    pub fn seventh(&self) -> Option<u8> {
        if self.is_sixth() {
            None
        } else {
            self.intervals().get(3).copied()
        }
    }

    pub fn is_sixth(&self) -> bool {
        self.suffix.ends_with('6')
    }

    pub fn is_suspended(&self) -> bool {
        self.suffix.contains("sus")
    }

    pub fn is_minor(&self) -> bool {
        self.third() == 3 || self.suffix.contains('m') || self.suffix.contains('º')
    }

    /// Half-diminished or fully diminished.
    pub fn is_diminished(&self) -> bool {
        self.suffix.contains('º') || self.suffix == "m7(b5)"
    }

    pub fn has_flat_ninth(&self) -> bool {
        self.suffix.contains("b9")
    }

    pub fn has_sharp_ninth(&self) -> bool {
        self.suffix.contains("#9")
    }

    pub fn has_flat_fifth(&self) -> bool {
        self.fifth() == 6
    }

    pub fn has_sharp_fifth(&self) -> bool {
        self.fifth() == 8
    }

    pub fn has_flat_thirteenth(&self) -> bool {
        self.color.is_some()
    }

    /// Root spelled with a flat.
    pub fn is_flat_spelled(&self) -> bool {
        self.root_name.ends_with('b')
    }

    pub fn is_sharp_spelled(&self) -> bool {
        self.root_name.ends_with('#')
    }

    /// Sounding pitch classes as a bitmask (bit `pc` set when present).
    pub fn pitch_class_mask(&self) -> u16 {
        self.intervals()
            .iter()
            .fold(0u16, |mask, &i| mask | 1 << ((self.root + i) % 12))
    }

    pub fn contains_pitch_class(&self, pitch_class: u8) -> bool {
        self.pitch_class_mask() & (1 << (pitch_class % 12)) != 0
    }
}

impl fmt::Display for ChordSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.root_name, self.suffix)?;
        if let Some(color) = self.color {
            f.write_str(color)?;
        }
        Ok(())
    }
}

impl FromStr for ChordSymbol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_chord(s)
    }
}

/// Split a trailing `/1`, `/3`, `/5` or `/7` off a chord token.
pub fn split_inversion_suffix(token: &str) -> (&str, Option<char>) {
    let mut chars = token.chars().rev();
    match (chars.next(), chars.next()) {
        (Some(digit @ ('1' | '3' | '5' | '7')), Some('/')) => (&token[..token.len() - 2], Some(digit)),
        _ => (token, None),
    }
}

/// Parse a chord symbol such as `Bb7(b9)`, `F#m7(b5)/3` or `Cmaj9`.
///
/// A trailing inversion suffix is ignored here. When the symbol does not
/// match the table directly, `maj`/`maj7` is rewritten to `∆`, then a trailing
/// bare `9`, `11` or `13` is dropped.
pub fn parse_chord(symbol: &str) -> Result<ChordSymbol> {
    let (base, _) = split_inversion_suffix(symbol.trim());

    if let Some(chord) = parse_exact(base) {
        return Ok(chord);
    }

    let normalized = replace_maj(base);
    if let Some(chord) = parse_exact(&normalized) {
        return Ok(chord);
    }

    strip_bare_extension(&normalized)
        .and_then(parse_exact)
        .ok_or_else(|| Error::UnrecognizedChord {
            symbol: symbol.to_string(),
        })
}

fn parse_exact(text: &str) -> Option<ChordSymbol> {
    let mut rest = text;
    let root_text = spelled_root.parse_next(&mut rest).ok()?;
    let (root_name, root) = spelling_for(root_text)?;
    let (suffix, color) = match_suffix(rest)?;
    Some(ChordSymbol {
        root,
        root_name,
        suffix,
        color,
    })
}

/// Longest table suffix that prefixes `rest`, leaving nothing or a color marker.
fn match_suffix(rest: &str) -> Option<(&'static str, Option<&'static str>)> {
    let color_of = |tail: &str| -> Option<Option<&'static str>> {
        if tail.is_empty() {
            Some(None)
        } else {
            COLOR_MARKERS
                .iter()
                .find(|marker| **marker == tail)
                .map(|marker| Some(*marker))
        }
    };

    let mut best: Option<(&'static str, Option<&'static str>)> = None;
    for entry in SUFFIXES {
        let Some(tail) = rest.strip_prefix(entry.suffix) else {
            continue;
        };
        let Some(color) = color_of(tail) else {
            continue;
        };
        if best.map_or(true, |(suffix, _)| entry.suffix.len() > suffix.len()) {
            best = Some((entry.suffix, color));
        }
    }

    best.or_else(|| color_of(rest).map(|color| (MAJOR_SEVENTH, color)))
}

fn replace_maj(text: &str) -> String {
    let lower = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let mut search = 0;
    while let Some(found) = lower[search..].find("maj") {
        let start = search + found;
        let mut end = start + 3;
        if lower[end..].starts_with('7') {
            end += 1;
        }
        out.push_str(&text[last..start]);
        out.push_str(MAJOR_SEVENTH);
        last = end;
        search = end;
    }
    out.push_str(&text[last..]);
    out
}

fn strip_bare_extension(text: &str) -> Option<&str> {
    ["13", "11", "9"]
        .iter()
        .find_map(|ext| text.strip_suffix(ext))
}

/// A spelled pitch with octave, `C4` being MIDI 60.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteName {
    pub pitch_class: u8,
    pub octave: i8,
}

impl NoteName {
    pub fn from_midi(pitch: u8) -> Self {
        Self {
            pitch_class: pitch % 12,
            octave: (pitch / 12) as i8 - 1,
        }
    }

    /// MIDI number of the first C in this note's octave.
    pub fn octave_base(&self) -> i32 {
        (self.octave as i32 + 1) * 12
    }

    pub fn midi(&self) -> i32 {
        self.octave_base() + self.pitch_class as i32
    }
}

impl fmt::Display for NoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", note_name(self.pitch_class, false), self.octave)
    }
}

fn octave_number(input: &mut &str) -> PResult<i8> {
    (opt('-'), take_while(1.., |c: char| c.is_ascii_digit()))
        .take()
        .try_map(str::parse::<i8>)
        .parse_next(input)
}

impl FromStr for NoteName {
    type Err = Error;

    /// Accepts enharmonic spellings: `Cb4` is the same key as `B3`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidNoteName {
            value: s.to_string(),
        };
        let mut rest = s.trim();
        let root = spelled_root.parse_next(&mut rest).map_err(|_| invalid())?;
        let octave = octave_number.parse_next(&mut rest).map_err(|_| invalid())?;
        if !rest.is_empty() {
            return Err(invalid());
        }

        let letter = pitch_class(&root[..1]).ok_or_else(invalid)? as i32;
        let accidental = match root.as_bytes().get(1) {
            Some(b'#') => 1,
            Some(b'b') => -1,
            _ => 0,
        };
        let midi = (octave as i32 + 1) * 12 + letter + accidental;
        let midi = u8::try_from(midi).map_err(|_| invalid())?;
        if midi > 127 {
            return Err(invalid());
        }
        Ok(Self::from_midi(midi))
    }
}
