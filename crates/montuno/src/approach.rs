//! Approach notes.
//!
//! Reference templates are written over a C chord. Each template pitch class
//! stands for a chord role: C, E and G are the root, third and fifth; D, F,
//! A and B are the 2nd/4th/6th/7th color tones, whose concrete targets come
//! from an [`ApproachProfile`]; D#, G# and C# are chromatic neighbours.
//! B is the chord's own seventh when the symbol names one.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::theory::{note_name, pitch_class, ChordSymbol, NoteName, FLAT_KEY_ROOTS};

/// Color-tone roles used by the templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApproachRole {
    Second,
    Fourth,
    Sixth,
    Seventh,
}

impl ApproachRole {
    pub const ALL: [ApproachRole; 4] = [Self::Second, Self::Fourth, Self::Sixth, Self::Seventh];

    pub fn index(&self) -> usize {
        match self {
            Self::Second => 0,
            Self::Fourth => 1,
            Self::Sixth => 2,
            Self::Seventh => 3,
        }
    }
}

/// Default semitone offsets above the root for the four roles.
pub fn default_intervals(chord: &ChordSymbol) -> [u8; 4] {
    let second = if chord.has_flat_ninth() {
        1
    } else if chord.has_sharp_ninth() {
        3
    } else {
        2
    };
    let fourth = if chord.is_minor() || chord.is_diminished() {
        5
    } else {
        6
    };
    let sixth = if chord.has_flat_fifth() || chord.has_sharp_fifth() || chord.has_flat_thirteenth() {
        8
    } else {
        9
    };
    let seventh = chord.seventh().filter(|i| *i < 12).unwrap_or(10);
    [second, fourth, sixth, seventh]
}

fn prefers_flats(chord: &ChordSymbol) -> bool {
    if chord.is_flat_spelled() || chord.has_flat_ninth() || chord.has_flat_fifth() {
        return true;
    }
    if chord.is_sharp_spelled() {
        return false;
    }
    FLAT_KEY_ROOTS.contains(&chord.root)
}

/// Spelled note names for the 2nd, 4th, 6th and 7th roles of one chord.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproachProfile {
    pub notes: [String; 4],
}

impl ApproachProfile {
    pub fn defaults_for(chord: &ChordSymbol) -> Self {
        let flats = prefers_flats(chord);
        let notes = default_intervals(chord)
            .map(|interval| note_name((chord.root + interval) % 12, flats).to_string());
        Self { notes }
    }

    /// Caller-supplied names fill the roles in order; missing roles keep
    /// their defaults. Blank or unknown names are dropped, extras ignored.
    pub fn with_overrides(chord: &ChordSymbol, supplied: &[String]) -> Self {
        let mut profile = Self::defaults_for(chord);
        let normalized = supplied
            .iter()
            .filter_map(|raw| normalize_note_token(raw))
            .take(4);
        for (slot, name) in profile.notes.iter_mut().zip(normalized) {
            *slot = name;
        }
        profile
    }

    pub fn note(&self, role: ApproachRole) -> &str {
        &self.notes[role.index()]
    }

    /// Semitones above the chord root for `role`, 0-11.
    pub fn interval(&self, role: ApproachRole, chord: &ChordSymbol) -> u8 {
        match pitch_class(self.note(role)) {
            Some(pc) => (pc + 12 - chord.root) % 12,
            None => default_intervals(chord)[role.index()],
        }
    }
}

/// Trim and capitalize a note token (`" eb"` becomes `"Eb"`).
fn normalize_note_token(raw: &str) -> Option<String> {
    let token = raw.trim();
    let mut chars = token.chars();
    let first = chars.next()?.to_ascii_uppercase();
    let name: String = std::iter::once(first).chain(chars).collect();
    pitch_class(&name).map(|_| name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TemplateTone {
    Root,
    Third,
    Fifth,
    /// The chord's seventh, or the 7th role when the symbol has none.
    Seventh,
    Role(ApproachRole),
    BelowThird,
    BelowFifth,
    RootNeighbour,
    Literal,
}

/// Role of each pitch class in a C-based template.
static TEMPLATE_TONES: [TemplateTone; 12] = [
    TemplateTone::Root,
    TemplateTone::RootNeighbour,
    TemplateTone::Role(ApproachRole::Second),
    TemplateTone::BelowThird,
    TemplateTone::Third,
    TemplateTone::Role(ApproachRole::Fourth),
    TemplateTone::Literal,
    TemplateTone::Fifth,
    TemplateTone::BelowFifth,
    TemplateTone::Role(ApproachRole::Sixth),
    TemplateTone::Literal,
    TemplateTone::Seventh,
];

/// A template note translated onto a chord.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolved {
    pub pitch: i32,
    pub is_approach: bool,
}

impl Resolved {
    fn structural(pitch: i32) -> Self {
        Self {
            pitch,
            is_approach: false,
        }
    }

    fn approach(pitch: i32) -> Self {
        Self {
            pitch,
            is_approach: true,
        }
    }
}

/// Translate a template note onto `chord`, keeping the note's octave.
pub fn resolve(name: &NoteName, chord: &ChordSymbol, profile: &ApproachProfile) -> Resolved {
    let at = |interval: u8| name.octave_base() + chord.root as i32 + interval as i32;

    match TEMPLATE_TONES[name.pitch_class as usize % 12] {
        TemplateTone::Root => Resolved::structural(at(0)),
        TemplateTone::Third => Resolved::structural(at(chord.third_equivalent())),
        TemplateTone::Fifth => Resolved::structural(at(chord.fifth())),
        TemplateTone::Seventh => match chord.seventh() {
            Some(interval) => Resolved::structural(at(interval)),
            None => Resolved::approach(at(profile.interval(ApproachRole::Seventh, chord))),
        },
        TemplateTone::Role(role) => Resolved::approach(at(profile.interval(role, chord))),
        TemplateTone::BelowThird => {
            Resolved::approach(at(if chord.is_minor() { 2 } else { 3 }))
        }
        TemplateTone::BelowFifth => Resolved::approach(at(chord.fifth() - 1)),
        TemplateTone::RootNeighbour => {
            Resolved::approach(at(if chord.has_flat_ninth() { 11 } else { 1 }))
        }
        TemplateTone::Literal => Resolved::structural(name.midi()),
    }
}

/// Toggles for render-time approach adjustments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproachOptions {
    /// Snap approach tones on a chord's first slot to the nearest root, third or fifth.
    pub snap_to_structure: bool,
    /// Nudge approach tones a semitone toward neighbouring chords' tones.
    pub prefer_neighbors: bool,
}

impl Default for ApproachOptions {
    fn default() -> Self {
        Self {
            snap_to_structure: true,
            prefer_neighbors: true,
        }
    }
}

/// Where a template note falls relative to the chord changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproachContext<'a> {
    /// The note plays on the owning chord's first slot.
    pub at_chord_start: bool,
    pub previous: Option<&'a ChordSymbol>,
    pub next: Option<&'a ChordSymbol>,
}

/// Root, third (fourth on sus chords) or fifth nearest to `pitch`, in the
/// octave of `name`. Ties go to the lower chord degree.
pub fn nearest_structural(name: &NoteName, chord: &ChordSymbol, pitch: i32) -> i32 {
    let base = name.octave_base() + chord.root as i32;
    [0, chord.third_equivalent(), chord.fifth()]
        .into_iter()
        .map(|interval| base + interval as i32)
        .min_by_key(|candidate| (candidate - pitch).abs())
        .unwrap_or(pitch)
}

/// Move `pitch` by at most a semitone onto a tone of the next or previous chord.
///
/// A pitch class already shared stays put. Matches against the next chord
/// win over the previous one; downward moves win over upward ones.
pub fn prefer_neighbor(
    pitch: i32,
    previous: Option<&ChordSymbol>,
    next: Option<&ChordSymbol>,
) -> i32 {
    let shares = |chord: &ChordSymbol, p: i32| chord.contains_pitch_class(p.rem_euclid(12) as u8);

    let mut candidates: Vec<(i32, u8, i32)> = Vec::new();
    for (priority, chord) in [(0u8, next), (1u8, previous)] {
        let Some(chord) = chord else {
            continue;
        };
        if shares(chord, pitch) {
            candidates.push((0, priority, pitch));
            continue;
        }
        for delta in [-1, 1] {
            if shares(chord, pitch + delta) {
                candidates.push((1, priority, pitch + delta));
            }
        }
    }

    candidates.into_iter().min().map_or(pitch, |(_, _, p)| p)
}

/// [`resolve`], then apply the chord-boundary and neighbour adjustments to
/// approach tones.
pub fn resolve_in_context(
    name: &NoteName,
    chord: &ChordSymbol,
    profile: &ApproachProfile,
    context: &ApproachContext<'_>,
    options: &ApproachOptions,
) -> Resolved {
    let resolved = resolve(name, chord, profile);
    if !resolved.is_approach {
        return resolved;
    }

    let pitch = if context.at_chord_start && options.snap_to_structure {
        nearest_structural(name, chord, resolved.pitch)
    } else if options.prefer_neighbors {
        prefer_neighbor(resolved.pitch, context.previous, context.next)
    } else {
        resolved.pitch
    };

    if pitch != resolved.pitch {
        trace!(note = %name, chord = %chord, from = resolved.pitch, to = pitch, "approach adjusted");
    }
    Resolved::approach(pitch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theory::parse_chord;
    use pretty_assertions::assert_eq;

    fn chord(symbol: &str) -> ChordSymbol {
        parse_chord(symbol).unwrap()
    }

    fn note(name: &str) -> NoteName {
        name.parse().unwrap()
    }

    fn names(profile: &ApproachProfile) -> Vec<&str> {
        profile.notes.iter().map(String::as_str).collect()
    }

    #[test]
    fn default_profiles_follow_chord_quality() {
        assert_eq!(names(&ApproachProfile::defaults_for(&chord("C7"))), vec!["D", "F#", "A", "A#"]);
        assert_eq!(names(&ApproachProfile::defaults_for(&chord("Dm7"))), vec!["E", "G", "B", "C"]);
        assert_eq!(names(&ApproachProfile::defaults_for(&chord("F7"))), vec!["G", "B", "D", "Eb"]);
        assert_eq!(
            names(&ApproachProfile::defaults_for(&chord("Bb7(b9)"))),
            vec!["B", "E", "G", "Ab"]
        );
        assert_eq!(
            names(&ApproachProfile::defaults_for(&chord("Bm7(b5)"))),
            vec!["Db", "E", "G", "A"]
        );
    }

    #[test]
    fn sharp_ninth_and_color_markers() {
        assert_eq!(default_intervals(&chord("G7(#9)"))[0], 3);
        assert_eq!(default_intervals(&chord("G7(b13)"))[2], 8);
        assert_eq!(default_intervals(&chord("C+7"))[2], 8);
        assert_eq!(default_intervals(&chord("C6"))[3], 10);
        assert_eq!(default_intervals(&chord("C∆"))[3], 11);
    }

    #[test]
    fn overrides_fill_roles_in_order() {
        let c7 = chord("C7");
        let supplied = vec![" db".to_string(), "".to_string(), "x".to_string(), "Ab".to_string()];
        let profile = ApproachProfile::with_overrides(&c7, &supplied);
        assert_eq!(names(&profile), vec!["Db", "Ab", "A", "A#"]);
        assert_eq!(profile.interval(ApproachRole::Fourth, &c7), 8);
    }

    #[test]
    fn overrides_are_truncated_to_four() {
        let supplied: Vec<String> = ["E", "F", "G", "A", "B"].iter().map(|s| s.to_string()).collect();
        let profile = ApproachProfile::with_overrides(&chord("C7"), &supplied);
        assert_eq!(names(&profile), vec!["E", "F", "G", "A"]);
    }

    #[test]
    fn structural_tones_resolve_directly() {
        let c7 = chord("C7");
        let profile = ApproachProfile::defaults_for(&c7);
        assert_eq!(resolve(&note("C4"), &c7, &profile), Resolved::structural(60));
        assert_eq!(resolve(&note("E4"), &c7, &profile), Resolved::structural(64));
        assert_eq!(resolve(&note("G4"), &c7, &profile), Resolved::structural(67));
        assert_eq!(resolve(&note("B3"), &c7, &profile), Resolved::structural(58));
        assert_eq!(resolve(&note("F#4"), &c7, &profile), Resolved::structural(66));

        let sus = chord("C7sus4");
        let profile = ApproachProfile::defaults_for(&sus);
        assert_eq!(resolve(&note("E4"), &sus, &profile), Resolved::structural(65));
    }

    #[test]
    fn roles_resolve_through_the_profile() {
        let c7 = chord("C7");
        let profile = ApproachProfile::defaults_for(&c7);
        assert_eq!(resolve(&note("D4"), &c7, &profile), Resolved::approach(62));
        assert_eq!(resolve(&note("F4"), &c7, &profile), Resolved::approach(66));
        assert_eq!(resolve(&note("A4"), &c7, &profile), Resolved::approach(69));

        let c6 = chord("C6");
        let profile = ApproachProfile::defaults_for(&c6);
        assert_eq!(resolve(&note("B3"), &c6, &profile), Resolved::approach(58));
    }

    #[test]
    fn transposes_to_chord_root() {
        let bb7 = chord("Bb7");
        let profile = ApproachProfile::defaults_for(&bb7);
        assert_eq!(resolve(&note("C4"), &bb7, &profile), Resolved::structural(70));
        assert_eq!(resolve(&note("D4"), &bb7, &profile), Resolved::approach(72));
    }

    #[test]
    fn chromatic_neighbours() {
        let c7 = chord("C7");
        let profile = ApproachProfile::defaults_for(&c7);
        assert_eq!(resolve(&note("D#4"), &c7, &profile), Resolved::approach(63));
        assert_eq!(resolve(&note("G#4"), &c7, &profile), Resolved::approach(66));
        assert_eq!(resolve(&note("C#4"), &c7, &profile), Resolved::approach(61));

        let cm7 = chord("Cm7");
        let profile = ApproachProfile::defaults_for(&cm7);
        assert_eq!(resolve(&note("D#4"), &cm7, &profile), Resolved::approach(62));

        let c7b9 = chord("C7(b9)");
        let profile = ApproachProfile::defaults_for(&c7b9);
        assert_eq!(resolve(&note("C#4"), &c7b9, &profile), Resolved::approach(71));
    }

    #[test]
    fn structural_resolution_ignores_context() {
        let c7 = chord("C7");
        let f7 = chord("F7");
        let profile = ApproachProfile::defaults_for(&c7);
        let context = ApproachContext {
            at_chord_start: true,
            previous: Some(&f7),
            next: Some(&f7),
        };
        let options = ApproachOptions::default();
        let first = resolve_in_context(&note("E4"), &c7, &profile, &context, &options);
        let second = resolve_in_context(&note("E4"), &c7, &profile, &context, &options);
        assert_eq!(first, second);
        assert_eq!(first, resolve(&note("E4"), &c7, &profile));
    }

    #[test]
    fn boundary_snaps_to_nearest_chord_tone() {
        let bb7 = chord("Bb7");
        // Candidates in octave 4: Bb 70, D 74, F 77. 72 ties between 70 and 74.
        assert_eq!(nearest_structural(&note("D4"), &bb7, 72), 70);
        assert_eq!(nearest_structural(&note("D4"), &bb7, 76), 77);

        let profile = ApproachProfile::defaults_for(&bb7);
        let context = ApproachContext {
            at_chord_start: true,
            ..Default::default()
        };
        let snapped = resolve_in_context(&note("D4"), &bb7, &profile, &context, &ApproachOptions::default());
        assert_eq!(snapped, Resolved::approach(70));
    }

    #[test]
    fn neighbour_preference_favours_next_chord() {
        let c = chord("C∆");
        let dm = chord("Dm");
        assert_eq!(prefer_neighbor(61, Some(&c), Some(&dm)), 62);
        assert_eq!(prefer_neighbor(61, Some(&c), None), 60);
        assert_eq!(prefer_neighbor(61, None, None), 61);
        // Already a tone of the next chord.
        assert_eq!(prefer_neighbor(62, Some(&c), Some(&dm)), 62);
        // Both directions reach the next chord: downward wins.
        assert_eq!(prefer_neighbor(61, None, Some(&chord("Dm7"))), 60);
    }

    #[test]
    fn neighbour_preference_can_be_disabled() {
        let c7 = chord("C7");
        let db = chord("Db∆");
        let profile = ApproachProfile::defaults_for(&c7);
        let context = ApproachContext {
            at_chord_start: false,
            previous: None,
            next: Some(&db),
        };
        let on = resolve_in_context(&note("D4"), &c7, &profile, &context, &ApproachOptions::default());
        assert_eq!(on.pitch, 61);
        let off = ApproachOptions {
            prefer_neighbors: false,
            ..Default::default()
        };
        let kept = resolve_in_context(&note("D4"), &c7, &profile, &context, &off);
        assert_eq!(kept.pitch, 62);
    }
}
