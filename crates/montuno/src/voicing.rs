//! Bass voice-leading.
//!
//! Each chord gets an inversion and a bass target (MIDI pitch). The first
//! target sits in C3..=C4; every later one is the octave placement closest to
//! the previous target, keeping the previous bass pitch class when the chord
//! contains it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::progression::Assignment;
use crate::theory::ChordSymbol;
use crate::{Error, Result};

/// Lowest allowed first bass target (C3).
pub const FIRST_BASS_MIN: i32 = 48;
/// Highest allowed first bass target (C4).
pub const FIRST_BASS_MAX: i32 = 60;

/// MIDI number of C2; unfolded bass pitches sit in the octave above it.
const BASS_REFERENCE_BASE: i32 = 36;

/// Octaves tried either side when folding toward the previous bass.
const FOLD_OCTAVES: i32 = 5;

/// Which chord tone sits in the bass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Inversion {
    Root,
    Third,
    Fifth,
    Seventh,
}

impl Inversion {
    pub const ALL: [Inversion; 4] = [Self::Root, Self::Third, Self::Fifth, Self::Seventh];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Third => "third",
            Self::Fifth => "fifth",
            Self::Seventh => "seventh",
        }
    }

    /// Inversion for a `/1`, `/3`, `/5` or `/7` suffix digit.
    pub fn from_digit(digit: char) -> Result<Self> {
        match digit {
            '1' => Ok(Self::Root),
            '3' => Ok(Self::Third),
            '5' => Ok(Self::Fifth),
            '7' => Ok(Self::Seventh),
            other => Err(Error::UnknownInversion {
                value: other.to_string(),
            }),
        }
    }

    /// Semitones above the root of this inversion's bass tone.
    ///
    /// Chords without a seventh use a minor seventh for [`Inversion::Seventh`].
    pub fn interval(&self, chord: &ChordSymbol) -> u8 {
        match self {
            Self::Root => 0,
            Self::Third => chord.third(),
            Self::Fifth => chord.fifth(),
            Self::Seventh => chord.intervals().get(3).copied().unwrap_or(10),
        }
    }
}

impl fmt::Display for Inversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Inversion {
    type Err = Error;

    /// Accepts names and suffix digits. Duplicated names such as
    /// `root_root` keep only the first part.
    fn from_str(s: &str) -> Result<Self> {
        let cleaned = s.trim().split('_').next().unwrap_or_default().to_lowercase();
        match cleaned.as_str() {
            "root" | "1" => Ok(Self::Root),
            "third" | "3" => Ok(Self::Third),
            "fifth" | "5" => Ok(Self::Fifth),
            "seventh" | "7" => Ok(Self::Seventh),
            _ => Err(Error::UnknownInversion {
                value: s.to_string(),
            }),
        }
    }
}

/// Octave displacement requested for a chord's voicing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Registration {
    #[default]
    Original,
    OctaveUp,
    OctaveDown,
}

impl Registration {
    pub fn offset(&self) -> i32 {
        match self {
            Self::Original => 0,
            Self::OctaveUp => 12,
            Self::OctaveDown => -12,
        }
    }
}

impl FromStr for Registration {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', '_'], " ").as_str() {
            "" | "original" => Ok(Self::Original),
            "octave up" | "octava arriba" => Ok(Self::OctaveUp),
            "octave down" | "octava abajo" => Ok(Self::OctaveDown),
            other => Err(format!("unknown registration: {other}")),
        }
    }
}

/// Bass decision for one assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BassPlan {
    pub inversion: Inversion,
    /// MIDI pitch of the lowest rendered voice.
    pub target: i32,
}

/// Unfolded bass pitch: the inversion's tone in the octave above C2.
pub fn bass_pitch(chord: &ChordSymbol, inversion: Inversion) -> i32 {
    BASS_REFERENCE_BASE + ((chord.root + inversion.interval(chord)) % 12) as i32
}

/// Move `pitch` by octaves into [`FIRST_BASS_MIN`]..=[`FIRST_BASS_MAX`].
pub fn clamp_first_bass(mut pitch: i32) -> i32 {
    while pitch < FIRST_BASS_MIN {
        pitch += 12;
    }
    while pitch > FIRST_BASS_MAX {
        pitch -= 12;
    }
    pitch
}

/// Octave placement of `pitch` closest to `previous`.
///
/// With no previous bass this is [`clamp_first_bass`]. Ties keep the
/// placement found first, starting from `pitch` itself.
pub fn fold_toward(previous: Option<i32>, pitch: i32) -> i32 {
    let Some(previous) = previous else {
        return clamp_first_bass(pitch);
    };

    let mut best = pitch;
    let mut best_distance = (pitch - previous).abs();
    for octave in -FOLD_OCTAVES..=FOLD_OCTAVES {
        let candidate = pitch + 12 * octave;
        let distance = (candidate - previous).abs();
        if distance < best_distance {
            best = candidate;
            best_distance = distance;
        }
    }
    best
}

/// Choose the inversion whose bass moves least from `previous`.
///
/// With no previous bass every candidate is clamped into the first-bass
/// range and the highest one wins. Otherwise an inversion whose bass keeps
/// the previous pitch class wins outright; among several, or when none
/// does, the smallest move wins. Ties go to the inversion whose name sorts
/// first (fifth, root, seventh, third).
pub fn select_inversion(
    previous: Option<i32>,
    chord: &ChordSymbol,
    octave_offset: i32,
) -> (Inversion, i32) {
    let candidates = Inversion::ALL.map(|inversion| {
        let base = bass_pitch(chord, inversion) + octave_offset;
        let pitch = fold_toward(previous, base);
        let distance = previous.map_or(0, |p| (pitch - p).abs());
        (distance, inversion, pitch, base.rem_euclid(12))
    });

    let Some(previous) = previous else {
        let (_, inversion, pitch, _) = candidates
            .iter()
            .copied()
            .max_by(|a, b| a.2.cmp(&b.2).then(b.1.name().cmp(a.1.name())))
            .unwrap_or(candidates[0]);
        return (inversion, pitch);
    };

    let by_motion = |c: &&(i32, Inversion, i32, i32)| (c.0, c.1.name());
    let common_tone = candidates
        .iter()
        .filter(|c| c.3 == previous.rem_euclid(12))
        .min_by_key(by_motion);
    let (_, inversion, pitch, _) = *common_tone
        .or_else(|| candidates.iter().min_by_key(by_motion))
        .unwrap_or(&candidates[0]);
    (inversion, pitch)
}

/// Chain bass decisions across a progression.
///
/// Per chord, in priority order: a `manual` override, the assignment's
/// forced inversion, `initial` (first chord only), then [`select_inversion`].
/// `registrations` are indexed like `assignments`; missing entries mean
/// [`Registration::Original`].
pub fn plan_bass_line(
    assignments: &[Assignment],
    initial: Option<Inversion>,
    registrations: &[Registration],
    manual: &[Option<Inversion>],
) -> Vec<BassPlan> {
    let mut plans = Vec::with_capacity(assignments.len());
    let mut previous: Option<i32> = None;

    for (index, assignment) in assignments.iter().enumerate() {
        let offset = registrations
            .get(index)
            .copied()
            .unwrap_or_default()
            .offset();
        let fixed = manual
            .get(index)
            .copied()
            .flatten()
            .or(assignment.forced_inversion)
            .or(if index == 0 { initial } else { None });

        let (inversion, target) = match fixed {
            Some(inversion) => {
                let base = bass_pitch(&assignment.chord, inversion) + offset;
                (inversion, fold_toward(previous, base))
            }
            None => select_inversion(previous, &assignment.chord, offset),
        };

        debug!(
            chord = %assignment.symbol,
            inversion = %inversion,
            target,
            "bass planned"
        );
        plans.push(BassPlan { inversion, target });
        previous = Some(target);
    }

    plans
}
