//! Template replay.
//!
//! Every destination eighth-slot pulls the note group at the same phase of
//! the chosen inversion's reference loop, re-harmonizes it against the chord
//! that owns the slot, and shifts the result so each chord's lowest note sits
//! on its planned bass octave. That lowest note is then set to the planned
//! bass pitch itself.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::approach::{resolve, resolve_in_context, ApproachContext, ApproachOptions, ApproachProfile};
use crate::note::NoteEvent;
use crate::progression::{total_slots, Assignment};
use crate::template::TemplateSet;
use crate::voicing::{BassPlan, Registration};
use crate::{Error, Result};

/// Tolerance for comparing note times, in seconds.
const TIME_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    pub approach: ApproachOptions,
    /// Add silent pitch-0 notes at the piece's first and last grid cells so
    /// MIDI readers see the full length.
    pub anchors: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            approach: ApproachOptions::default(),
            anchors: true,
        }
    }
}

/// A template note placed on a chord before its bass retarget.
struct Placed {
    pitch: i32,
    velocity: u8,
    start: f64,
    end: f64,
}

/// Render `assignments` against `templates`.
///
/// `assignments` must start at slot 0; `start_slot` is where they began in
/// the full piece and sets the template phase. `plans` is indexed like
/// `assignments`. Missing `profiles` entries use the chord defaults and
/// missing `registrations` entries mean [`Registration::Original`].
pub fn render(
    assignments: &[Assignment],
    start_slot: usize,
    templates: &TemplateSet,
    plans: &[BassPlan],
    profiles: &[ApproachProfile],
    registrations: &[Registration],
    options: &RenderOptions,
) -> Result<Vec<NoteEvent>> {
    if assignments.is_empty() {
        return Err(Error::EmptyProgression);
    }
    if plans.len() < assignments.len() {
        warn!(
            plans = plans.len(),
            chords = assignments.len(),
            "fewer bass plans than chords, trailing chords are skipped"
        );
    }

    let grid = templates.grid_seconds;
    let mut notes = Vec::new();

    for (index, (assignment, plan)) in assignments.iter().zip(plans).enumerate() {
        let defaults;
        let profile = match profiles.get(index) {
            Some(profile) => profile,
            None => {
                defaults = ApproachProfile::defaults_for(&assignment.chord);
                &defaults
            }
        };
        let context = |at_chord_start| ApproachContext {
            at_chord_start,
            previous: index.checked_sub(1).and_then(|i| assignments.get(i)).map(|a| &a.chord),
            next: assignments.get(index + 1).map(|a| &a.chord),
        };
        let chord_end = assignment.slots.end as f64 * grid;

        let mut placed = Vec::new();
        for slot in assignment.slots.clone() {
            let frame = slot as f64 * grid;
            let group = templates.group(plan.inversion, start_slot + slot);
            let context = context(slot == assignment.first_slot());
            // Doubled approach tones in one group move together.
            let mut deltas: HashMap<(u8, i64), i32> = HashMap::new();

            for note in group {
                let plain = resolve(&note.name, &assignment.chord, profile);
                let pitch = if plain.is_approach {
                    let key = (note.name.pitch_class, (note.start * 1e6).round() as i64);
                    let delta = *deltas.entry(key).or_insert_with(|| {
                        let adjusted = resolve_in_context(
                            &note.name,
                            &assignment.chord,
                            profile,
                            &context,
                            &options.approach,
                        );
                        adjusted.pitch - plain.pitch
                    });
                    plain.pitch + delta
                } else {
                    plain.pitch
                };

                let start = (frame + note.start).max(0.0);
                let end = (frame + note.end).min(chord_end);
                if end - start <= TIME_EPSILON {
                    continue;
                }
                placed.push(Placed {
                    pitch,
                    velocity: note.velocity,
                    start,
                    end,
                });
            }
        }

        let Some(lowest) = placed.iter().map(|p| p.pitch).min() else {
            continue;
        };
        let offset = registrations
            .get(index)
            .copied()
            .unwrap_or_default()
            .offset();
        let shift = offset + retarget_octaves(plan.target, lowest + offset);
        debug!(
            chord = %assignment.symbol,
            inversion = %plan.inversion,
            target = plan.target,
            lowest = lowest + shift,
            "chord rendered"
        );

        let mut rendered: Vec<NoteEvent> = placed
            .into_iter()
            .map(|p| NoteEvent {
                velocity: p.velocity,
                pitch: midi_pitch(p.pitch + shift),
                start: p.start,
                end: p.end,
            })
            .collect();
        pin_lowest(&mut rendered, plan.target);
        notes.extend(rendered);
    }

    let limit = total_slots(assignments) as f64 * grid;
    Ok(finish(notes, limit, grid, options.anchors))
}

/// Whole-octave shift that brings `lowest` nearest to `target`.
///
/// Halfway cases round to the even octave count.
pub fn retarget_octaves(target: i32, lowest: i32) -> i32 {
    12 * ((target - lowest) as f64 / 12.0).round_ties_even() as i32
}

/// Set the lowest sounding note of one chord to `target`.
///
/// Only the first of several equally low notes moves. Pitch-0 notes are ignored.
pub fn pin_lowest(notes: &mut [NoteEvent], target: i32) {
    if let Some(lowest) = notes
        .iter_mut()
        .filter(|n| !n.is_anchor())
        .min_by_key(|n| n.pitch)
    {
        lowest.pitch = midi_pitch(target);
    }
}

/// Fold a pitch by octaves into the playable MIDI range 1..=127.
fn midi_pitch(mut pitch: i32) -> u8 {
    while pitch < 1 {
        pitch += 12;
    }
    while pitch > 127 {
        pitch -= 12;
    }
    pitch as u8
}

/// Trim overlaps, clip to `limit`, optionally anchor, and sort.
pub fn finish(mut notes: Vec<NoteEvent>, limit: f64, grid: f64, anchors: bool) -> Vec<NoteEvent> {
    trim_overlaps(&mut notes);
    clip_to(&mut notes, limit);
    if anchors {
        add_anchors(&mut notes, limit, grid);
    }
    sort_notes(&mut notes);
    notes
}

/// Cut a note short where the next note of the same pitch begins.
///
/// Notes left with no duration are dropped.
pub fn trim_overlaps(notes: &mut Vec<NoteEvent>) {
    notes.sort_by(|a, b| a.pitch.cmp(&b.pitch).then(a.start.total_cmp(&b.start)));
    for i in 1..notes.len() {
        let (before, after) = notes.split_at_mut(i);
        let (prev, next) = (&mut before[i - 1], &after[0]);
        if prev.pitch == next.pitch && next.start < prev.end {
            prev.end = next.start;
        }
    }
    notes.retain(|n| n.end - n.start > TIME_EPSILON);
}

/// Drop notes starting at or after `limit` and cut the rest to end by it.
pub fn clip_to(notes: &mut Vec<NoteEvent>, limit: f64) {
    notes.retain(|n| n.start < limit - TIME_EPSILON);
    for note in notes.iter_mut() {
        note.end = note.end.min(limit);
    }
}

/// Add pitch-0 notes covering the first and last grid cells when no real
/// note sounds at time 0 or anywhere in the last grid cell.
pub fn add_anchors(notes: &mut Vec<NoteEvent>, limit: f64, grid: f64) {
    if limit <= 0.0 {
        return;
    }
    let anchor = |start: f64, end: f64| NoteEvent {
        velocity: 1,
        pitch: 0,
        start: start.max(0.0),
        end,
    };

    let covers_start = notes
        .iter()
        .any(|n| !n.is_anchor() && n.start <= TIME_EPSILON && n.end > 0.0);
    let covers_end = notes
        .iter()
        .any(|n| !n.is_anchor() && n.start < limit && n.end > limit - grid);
    if !covers_start {
        notes.push(anchor(0.0, grid.min(limit)));
    }
    if !covers_end {
        notes.push(anchor(limit - grid, limit));
    }
}

/// Order by start time, then pitch.
pub fn sort_notes(notes: &mut [NoteEvent]) {
    notes.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.pitch.cmp(&b.pitch)));
}
