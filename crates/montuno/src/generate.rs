//! End-to-end montuno generation.
//!
//! Cleans the progression text, segments it, plans the bass line over the
//! whole piece, then renders each style segment separately (phase-aligned to
//! its absolute slot) and stitches the results.

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::approach::ApproachProfile;
use crate::clave::ClaveGrid;
use crate::cleanup::{normalise_bars, ChordReplacements};
use crate::note::{Instrument, NoteEvent};
use crate::progression::{rebase_segment, segment, split_by_style, Harmonization};
use crate::render::{finish, render, RenderOptions};
use crate::template::{TemplateSet, TemplateStore, Variant, VariantChoice};
use crate::voicing::{plan_bass_line, BassPlan, Inversion, Registration};
use crate::{Error, Result};

/// Everything needed to render one progression.
#[derive(Debug, Clone, Default)]
pub struct MontunoRequest {
    pub progression: String,
    pub clave: ClaveGrid,
    /// Inversion of the first chord. `None` lets voice-leading pick it.
    pub initial_inversion: Option<Inversion>,
    pub variant: VariantChoice,
    pub default_registration: Registration,
    /// Per-chord registrations; missing entries use `default_registration`.
    pub registrations: Vec<Registration>,
    /// Per-chord approach note names for the 2nd, 4th, 6th and 7th roles.
    pub approach_notes: Vec<Option<Vec<String>>>,
    /// Per-chord inversion overrides.
    pub manual_inversions: Vec<Option<Inversion>>,
    pub default_harmonization: Option<Harmonization>,
    pub options: RenderOptions,
    /// Rewrite rules for the progression text; `None` uses the built-in set.
    pub replacements: Option<ChordReplacements>,
}

impl MontunoRequest {
    pub fn new(progression: impl Into<String>) -> Self {
        Self {
            progression: progression.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MontunoResult {
    pub notes: Vec<NoteEvent>,
    pub instrument: Instrument,
    pub clave_tag: String,
    pub variant: Variant,
    /// Length of the piece in eighth notes.
    pub max_eighths: usize,
    pub grid_seconds: f64,
    pub bass_plan: Vec<BassPlan>,
}

impl MontunoResult {
    pub fn duration_seconds(&self) -> f64 {
        self.max_eighths as f64 * self.grid_seconds
    }
}

/// Render `request` using templates from `store`.
///
/// `rng` is only consulted for [`VariantChoice::Random`].
pub fn generate<R: Rng + ?Sized>(
    request: &MontunoRequest,
    store: &dyn TemplateStore,
    rng: &mut R,
) -> Result<MontunoResult> {
    let rules = match &request.replacements {
        Some(rules) => rules,
        None => ChordReplacements::builtin(),
    };
    let text = normalise_bars(&rules.apply(&request.progression));
    debug!(input = %request.progression, cleaned = %text, "progression cleaned");

    let segmentation = segment(&text, request.default_harmonization, 0, &request.clave)?;
    let assignments = &segmentation.assignments;
    if assignments.is_empty() {
        return Err(Error::EmptyProgression);
    }

    let registrations: Vec<Registration> = (0..assignments.len())
        .map(|i| {
            request
                .registrations
                .get(i)
                .copied()
                .unwrap_or(request.default_registration)
        })
        .collect();
    let plans = plan_bass_line(
        assignments,
        request.initial_inversion,
        &registrations,
        &request.manual_inversions,
    );
    let profiles: Vec<ApproachProfile> = assignments
        .iter()
        .enumerate()
        .map(|(i, a)| match request.approach_notes.get(i) {
            Some(Some(notes)) => ApproachProfile::with_overrides(&a.chord, notes),
            _ => ApproachProfile::defaults_for(&a.chord),
        })
        .collect();

    let variant = request.variant.pick(rng);
    let fallback = request.initial_inversion.unwrap_or(Inversion::Root);
    let templates = TemplateSet::load(store, &request.clave.tag, variant, fallback)?;
    let grid = templates.grid_seconds;

    let segment_options = RenderOptions {
        anchors: false,
        ..request.options
    };
    let mut notes = Vec::new();
    let mut first = 0;
    for run in split_by_style(assignments) {
        let range = first..first + run.len();
        first = range.end;
        let (start_slot, rebased) = rebase_segment(run);
        let rendered = render(
            &rebased,
            start_slot,
            &templates,
            &plans[range.clone()],
            &profiles[range.clone()],
            &registrations[range],
            &segment_options,
        )?;
        debug!(
            style = run[0].style.as_deref().unwrap_or("-"),
            start_slot,
            chords = run.len(),
            notes = rendered.len(),
            "segment rendered"
        );
        let offset = start_slot as f64 * grid;
        notes.extend(rendered.iter().map(|n| n.shifted(offset)));
    }

    let max_eighths = segmentation.total_slots();
    let notes = finish(notes, max_eighths as f64 * grid, grid, request.options.anchors);
    info!(
        clave = %request.clave.tag,
        variant = %variant,
        chords = assignments.len(),
        measures = segmentation.measure_count,
        eighths = max_eighths,
        notes = notes.len(),
        "montuno generated"
    );

    Ok(MontunoResult {
        notes,
        instrument: templates.instrument.clone(),
        clave_tag: request.clave.tag.clone(),
        variant,
        max_eighths,
        grid_seconds: grid,
        bass_plan: plans,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{MemoryTemplateStore, Template, TemplateKey, TemplateNote};
    use crate::theory::NoteName;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    fn name(text: &str) -> NoteName {
        text.parse().unwrap()
    }

    /// C4/G4 on every eighth of a 16-eighth loop at 120 bpm.
    fn store() -> MemoryTemplateStore {
        let mut notes = Vec::new();
        for slot in 0..16 {
            let start = slot as f64 * 0.25;
            notes.push(TemplateNote::new(name("C4"), start, start + 0.125, 100));
            notes.push(TemplateNote::new(name("G4"), start, start + 0.125, 80));
        }
        let mut store = MemoryTemplateStore::new();
        for variant in Variant::ALL {
            store.insert(
                TemplateKey::new("2-3", Inversion::Root, variant),
                Template::new(notes.clone(), 4.0, 120.0),
            );
        }
        store
    }

    fn rng() -> Pcg32 {
        Pcg32::seed_from_u64(42)
    }

    #[test]
    fn empty_progression_fails() {
        let request = MontunoRequest::new("   ");
        let result = generate(&request, &store(), &mut rng());
        assert!(matches!(result, Err(Error::EmptyProgression)));
    }

    #[test]
    fn piece_length_matches_slots() {
        let request = MontunoRequest::new("Cmaj7 | Dm7 G7 | C∆");
        let result = generate(&request, &store(), &mut rng()).unwrap();
        // 7 + 4 + 3 + 9 eighths in 2-3.
        assert_eq!(result.max_eighths, 23);
        assert_eq!(result.grid_seconds, 0.25);
        assert_eq!(result.bass_plan.len(), 4);
        assert!(result.notes.iter().all(|n| n.end <= result.duration_seconds() + 1e-9));
        assert_eq!(result.variant, Variant::A);
    }

    #[test]
    fn style_segments_stay_phase_aligned() {
        let plain = generate(&MontunoRequest::new("C7 | F7 | C7 | G7"), &store(), &mut rng()).unwrap();
        let styled = generate(
            &MontunoRequest::new("C7 | F7 | [B]C7 | G7"),
            &store(),
            &mut rng(),
        )
        .unwrap();
        assert_eq!(plain.notes, styled.notes);
    }

    #[test]
    fn random_variant_is_seeded() {
        let request = MontunoRequest {
            variant: VariantChoice::Random,
            ..MontunoRequest::new("Dm7 | G7")
        };
        let a = generate(&request, &store(), &mut Pcg32::seed_from_u64(9)).unwrap();
        let b = generate(&request, &store(), &mut Pcg32::seed_from_u64(9)).unwrap();
        assert_eq!(a.variant, b.variant);
        assert_eq!(a.notes, b.notes);
    }

    #[test]
    fn manual_inversion_reaches_bass_plan() {
        let request = MontunoRequest {
            manual_inversions: vec![None, Some(Inversion::Seventh)],
            ..MontunoRequest::new("F7 | F7")
        };
        let result = generate(&request, &store(), &mut rng()).unwrap();
        assert_eq!(result.bass_plan[1].inversion, Inversion::Seventh);
        // Eb folded toward the first chord's A3.
        assert_eq!(result.bass_plan[1].target, 51);
    }

    #[test]
    fn missing_templates_fail() {
        let request = MontunoRequest {
            clave: ClaveGrid::three_two(),
            ..MontunoRequest::new("C7")
        };
        let result = generate(&request, &store(), &mut rng());
        assert!(matches!(result, Err(Error::MissingTemplate { .. })));
    }
}
