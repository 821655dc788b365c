//! Full renders against small in-memory and on-disk reference loops.

use montuno::{
    generate, notes_to_midi, segment, ApproachOptions, CachedTemplateStore, ClaveGrid,
    DirectoryTemplateStore, Error, Instrument, Inversion, MemoryTemplateStore, MidiFileSink,
    MontunoRequest, NoteEvent, NoteSink, RenderOptions, Template, TemplateKey, TemplateNote,
    TemplateStore, Variant, VariantChoice,
};
use pretty_assertions::assert_eq;
use rand::SeedableRng;
use rand_pcg::Pcg32;

const GRID: f64 = 0.25;

fn note(name: &str, slot: usize, length: f64, velocity: u8) -> TemplateNote {
    let start = slot as f64 * GRID;
    TemplateNote::new(name.parse().unwrap(), start, start + length, velocity)
}

/// A 16-eighth loop at 120 bpm built from `(name, slot)` pairs.
fn loop_of(notes: &[(&str, usize)]) -> Template {
    let notes = notes
        .iter()
        .map(|(name, slot)| note(name, *slot, 0.125, 96))
        .collect();
    Template::new(notes, 16.0 * GRID, 120.0)
}

/// Typical tumbao-ish comping: octave C-E-G stabs on the off-beats.
fn comping_loop() -> Template {
    let mut pairs = Vec::new();
    for slot in [0, 2, 3, 5, 7, 8, 10, 11, 13, 15] {
        for name in ["C4", "E4", "G4", "C5"] {
            pairs.push((name, slot));
        }
    }
    loop_of(&pairs)
}

fn store_for(clave: &str, template: Template) -> MemoryTemplateStore {
    let mut store = MemoryTemplateStore::new();
    for variant in Variant::ALL {
        store.insert(
            TemplateKey::new(clave, Inversion::Root, variant),
            template.clone(),
        );
    }
    store
}

fn rng() -> Pcg32 {
    Pcg32::seed_from_u64(2024)
}

fn real(notes: &[NoteEvent]) -> Vec<NoteEvent> {
    notes.iter().filter(|n| !n.is_anchor()).copied().collect()
}

#[test]
fn classic_cadence_on_three_two() {
    let request = MontunoRequest {
        clave: ClaveGrid::three_two(),
        initial_inversion: Some(Inversion::Root),
        ..MontunoRequest::new("C∆ | Fm7 | G7 | C∆")
    };
    let result = generate(&request, &store_for("3-2", comping_loop()), &mut rng()).unwrap();

    let first = result.bass_plan[0];
    assert_eq!(first.inversion, Inversion::Root);
    assert!((48..=60).contains(&first.target));
    assert_eq!(first.target % 12, 0);

    // Fm7 keeps the C in the bass.
    assert_eq!(result.bass_plan[1].inversion, Inversion::Fifth);
    assert_eq!(result.bass_plan[1].target, first.target);

    let lowest_first_chord = real(&result.notes)
        .iter()
        .filter(|n| n.start < 6.0 * GRID)
        .map(|n| n.pitch as i32)
        .min();
    assert_eq!(lowest_first_chord, Some(first.target));
}

#[test]
fn forced_inversion_bass_is_sounded_with_borrowed_template() {
    let request = MontunoRequest {
        initial_inversion: Some(Inversion::Root),
        ..MontunoRequest::new("C∆ | G7/5")
    };
    let result = generate(&request, &store_for("2-3", comping_loop()), &mut rng()).unwrap();
    let target = result.bass_plan[1].target;
    assert_eq!(result.bass_plan[1].inversion, Inversion::Fifth);
    assert_eq!(target % 12, 2);

    let lowest_g7 = real(&result.notes)
        .iter()
        .filter(|n| n.start >= 7.0 * GRID - 1e-9)
        .map(|n| n.pitch as i32)
        .min();
    assert_eq!(lowest_g7, Some(target));
}

#[test]
fn slots_partition_the_piece() {
    let seg = segment("C7 | % | Dm7 G7 | (10)C∆/3", None, 0, &ClaveGrid::two_three()).unwrap();
    assert_eq!(seg.measure_count, 4);
    let mut expected_start = 0;
    for assignment in &seg.assignments {
        assert_eq!(assignment.slots.start, expected_start);
        assert!(!assignment.slots.is_empty());
        expected_start = assignment.slots.end;
    }
    assert_eq!(expected_start, seg.total_slots());
    assert_eq!(seg.assignments[0].symbol, seg.assignments[1].symbol);
    assert_eq!(seg.assignments[4].forced_inversion, Some(Inversion::Third));
}

#[test]
fn empty_progression_produces_no_notes() {
    let result = generate(
        &MontunoRequest::new(" | | "),
        &store_for("2-3", comping_loop()),
        &mut rng(),
    );
    assert!(matches!(result, Err(Error::EmptyProgression)));
}

#[test]
fn unknown_chord_is_reported() {
    let result = generate(
        &MontunoRequest::new("C7 | Hm7"),
        &store_for("2-3", comping_loop()),
        &mut rng(),
    );
    assert!(matches!(result, Err(Error::UnrecognizedChord { .. })));
}

#[test]
fn first_bass_is_in_range_for_any_progression() {
    let store = store_for("2-3", comping_loop());
    for text in ["Bb7 | Eb∆", "F#m7(b5) | B7(b9) | Em", "Ab6 | Db7", "E7sus4 | A"] {
        let result = generate(&MontunoRequest::new(text), &store, &mut rng()).unwrap();
        let target = result.bass_plan[0].target;
        assert!((48..=60).contains(&target), "{text}: {target}");
    }
}

#[test]
fn octave_doublings_resolve_together() {
    // The 6th-role tone A doubled across three octaves, off the chord start.
    // The low C on slot 1 takes the bass pin.
    let template = loop_of(&[("C2", 1), ("A3", 2), ("A4", 2), ("A5", 2)]);
    let result = generate(
        &MontunoRequest::new("C7 | F7"),
        &store_for("2-3", template),
        &mut rng(),
    )
    .unwrap();

    let first_chord: Vec<u8> = real(&result.notes)
        .iter()
        .filter(|n| (n.start - 2.0 * GRID).abs() < 1e-9)
        .map(|n| n.pitch)
        .collect();
    assert_eq!(first_chord.len(), 3);
    assert_eq!(first_chord[1] - first_chord[0], 12);
    assert_eq!(first_chord[2] - first_chord[1], 12);
}

#[test]
fn approach_snaps_on_chord_start() {
    // D is the 2nd-role tone; on the first slot it snaps to C. The low C on
    // slot 4 carries the bass pin.
    let store = store_for("2-3", loop_of(&[("D4", 0), ("C2", 4)]));
    let snapped = generate(&MontunoRequest::new("C7"), &store, &mut rng()).unwrap();
    assert_eq!(real(&snapped.notes)[0].pitch % 12, 0);

    let loose = MontunoRequest {
        options: RenderOptions {
            approach: ApproachOptions {
                snap_to_structure: false,
                prefer_neighbors: false,
            },
            anchors: true,
        },
        ..MontunoRequest::new("C7")
    };
    let unsnapped = generate(&loose, &store, &mut rng()).unwrap();
    assert_eq!(real(&unsnapped.notes)[0].pitch % 12, 2);
}

#[test]
fn approach_leans_toward_next_chord() {
    // With an Eb second-role override, Eb steps up to E, a tone of F∆.
    let store = store_for("2-3", loop_of(&[("D4", 3), ("C2", 5)]));
    let request = MontunoRequest {
        approach_notes: vec![Some(vec!["eb".to_string()])],
        ..MontunoRequest::new("C7 | F∆")
    };
    let leaning = generate(&request, &store, &mut rng()).unwrap();
    assert_eq!(real(&leaning.notes)[0].pitch % 12, 4);

    let plain = MontunoRequest {
        options: RenderOptions {
            approach: ApproachOptions {
                snap_to_structure: true,
                prefer_neighbors: false,
            },
            anchors: true,
        },
        ..request
    };
    let unmoved = generate(&plain, &store, &mut rng()).unwrap();
    assert_eq!(real(&unmoved.notes)[0].pitch % 12, 3);
}

#[test]
fn seeded_random_variant_is_reproducible() {
    let mut store = MemoryTemplateStore::new();
    for (variant, slot) in Variant::ALL.into_iter().zip([0, 1, 2, 3]) {
        store.insert(
            TemplateKey::new("2-3", Inversion::Root, variant),
            loop_of(&[("C4", slot), ("G4", slot + 4)]),
        );
    }
    let request = MontunoRequest {
        variant: VariantChoice::Random,
        ..MontunoRequest::new("Dm7 G7 | C∆ | A7 | Dm7 G7")
    };

    let first = generate(&request, &store, &mut Pcg32::seed_from_u64(11)).unwrap();
    let again = generate(&request, &store, &mut Pcg32::seed_from_u64(11)).unwrap();
    assert_eq!(first.variant, again.variant);
    assert_eq!(first.notes, again.notes);
    assert_eq!(first.bass_plan, again.bass_plan);
}

#[test]
fn anchors_cover_silent_edges() {
    // A single mid-loop note leaves both ends silent.
    let store = store_for("2-3", loop_of(&[("E4", 4)]));
    let result = generate(&MontunoRequest::new("C∆"), &store, &mut rng()).unwrap();

    let anchors: Vec<&NoteEvent> = result.notes.iter().filter(|n| n.is_anchor()).collect();
    assert_eq!(anchors.len(), 2);
    assert_eq!(anchors[0].start, 0.0);
    assert!((anchors[1].end - result.duration_seconds()).abs() < 1e-9);

    let bare = MontunoRequest {
        options: RenderOptions {
            anchors: false,
            ..RenderOptions::default()
        },
        ..MontunoRequest::new("C∆")
    };
    let result = generate(&bare, &store, &mut rng()).unwrap();
    assert!(result.notes.iter().all(|n| !n.is_anchor()));
}

#[test]
fn reference_files_on_disk_render_to_midi() {
    let references = tempfile::tempdir().unwrap();
    let loop_notes: Vec<NoteEvent> = comping_loop()
        .notes
        .iter()
        .map(|n| NoteEvent {
            velocity: n.velocity,
            pitch: n.name.midi() as u8,
            start: n.start,
            end: n.end,
        })
        .chain(std::iter::once(NoteEvent {
            velocity: 1,
            pitch: 0,
            start: 15.0 * GRID,
            end: 16.0 * GRID,
        }))
        .collect();
    let bytes = notes_to_midi(&loop_notes, &Instrument::default(), 120.0);
    let key = TemplateKey::new("2-3", Inversion::Root, Variant::B);
    std::fs::write(references.path().join(key.file_name()), bytes).unwrap();

    let store = CachedTemplateStore::new(DirectoryTemplateStore::new(references.path()));
    let decoded = store.fetch(&key).unwrap().unwrap();
    assert_eq!(decoded.eighths(), 16);
    assert!((decoded.grid_seconds() - GRID).abs() < 1e-9);

    let request = MontunoRequest {
        variant: VariantChoice::Fixed(Variant::B),
        ..MontunoRequest::new("Am7 | D7 | Gm7 C7 | F∆")
    };
    let result = generate(&request, &store, &mut rng()).unwrap();
    assert_eq!(result.variant, Variant::B);
    assert_eq!(result.instrument.name, "Piano");

    let out_dir = tempfile::tempdir().unwrap();
    let out = out_dir.path().join("montuno.mid");
    let mut sink = MidiFileSink::new(&out, 120.0);
    sink.write(&result.notes, &result.instrument).unwrap();

    let written = std::fs::read(&out).unwrap();
    let smf = midly::Smf::parse(&written).unwrap();
    assert_eq!(smf.tracks.len(), 2);
    let note_ons = smf.tracks[1]
        .iter()
        .filter(|e| {
            matches!(
                e.kind,
                midly::TrackEventKind::Midi {
                    message: midly::MidiMessage::NoteOn { vel, .. },
                    ..
                } if vel.as_int() > 0
            )
        })
        .count();
    assert_eq!(note_ons, result.notes.len());
}
