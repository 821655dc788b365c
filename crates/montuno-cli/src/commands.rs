//! Subcommand implementations.

use anyhow::{anyhow, Context, Result};
use clap::Args;
use montuno::clave::prefix_tag;
use montuno::cleanup::default_rules;
use montuno::{
    generate, plan_bass_line, segment, ApproachOptions, CachedTemplateStore, ChordReplacements,
    ClaveGrid, DirectoryTemplateStore, Inversion, MidiFileSink, MontunoRequest, NoteSink,
    Registration, RenderOptions, ReplacementRule, VariantChoice,
};
use montunoconf::{ConfigSources, MontunoConfig};
use rand::SeedableRng;
use rand_pcg::Pcg32;
use std::path::Path;
use tracing::info;

/// Render flags; unset ones fall back to the `[render]` config section.
#[derive(Args, Debug, Default)]
pub struct RenderArgs {
    /// Clave pattern name (2-3, 3-2, or one from [claves])
    #[arg(long)]
    pub clave: Option<String>,

    /// First-chord inversion (root, third, fifth, seventh, auto)
    #[arg(long)]
    pub inversion: Option<String>,

    /// Template variant letter A-D, or "random"
    #[arg(long)]
    pub variant: Option<String>,

    /// Seed for random variant selection
    #[arg(long)]
    pub seed: Option<u64>,

    /// original, octave-up or octave-down
    #[arg(long)]
    pub registration: Option<String>,

    /// Directory of reference loops
    #[arg(long)]
    pub references: Option<std::path::PathBuf>,

    /// Tempo of the written file
    #[arg(long)]
    pub bpm: Option<f64>,

    /// Do not pad silent edges with pitch-0 notes
    #[arg(long)]
    pub no_anchors: bool,
}

pub fn render(config: &MontunoConfig, progression: &str, out: &Path, args: &RenderArgs) -> Result<()> {
    let defaults = &config.render;
    let clave = clave_grid(config, args.clave.as_deref().unwrap_or(&defaults.clave))?;
    let initial_inversion = parse_inversion(args.inversion.as_deref().unwrap_or(&defaults.inversion))?;
    let variant: VariantChoice = args
        .variant
        .as_deref()
        .unwrap_or(&defaults.variant)
        .parse()?;
    let registration: Registration = args
        .registration
        .as_deref()
        .unwrap_or(&defaults.registration)
        .parse()
        .map_err(|e: String| anyhow!(e))?;

    let request = MontunoRequest {
        clave,
        initial_inversion,
        variant,
        default_registration: registration,
        options: RenderOptions {
            approach: ApproachOptions {
                snap_to_structure: defaults.snap_approach_to_structure,
                prefer_neighbors: defaults.prefer_neighbor_approach,
            },
            anchors: defaults.anchors && !args.no_anchors,
        },
        replacements: Some(replacements(config)?),
        ..MontunoRequest::new(progression)
    };

    let reference_dir = args
        .references
        .clone()
        .unwrap_or_else(|| config.paths.reference_dir.clone());
    let store = CachedTemplateStore::new(DirectoryTemplateStore::new(&reference_dir));
    let mut rng = match args.seed {
        Some(seed) => Pcg32::seed_from_u64(seed),
        None => Pcg32::from_entropy(),
    };

    let result = generate(&request, &store, &mut rng)
        .with_context(|| format!("rendering with references in {}", reference_dir.display()))?;

    let bpm = args.bpm.unwrap_or(defaults.bpm);
    let mut sink = MidiFileSink::new(out, bpm);
    sink.write(&result.notes, &result.instrument)?;

    info!(
        out = %out.display(),
        variant = %result.variant,
        notes = result.notes.len(),
        "render complete"
    );
    println!(
        "{}: {} notes, {} eighths, clave {}, variant {}",
        out.display(),
        result.notes.len(),
        result.max_eighths,
        result.clave_tag,
        result.variant
    );
    Ok(())
}

pub fn parse(
    config: &MontunoConfig,
    progression: &str,
    clave: Option<&str>,
    inversion: Option<&str>,
) -> Result<()> {
    let grid = clave_grid(config, clave.unwrap_or(&config.render.clave))?;
    let initial = parse_inversion(inversion.unwrap_or(&config.render.inversion))?;
    let rules = replacements(config)?;
    let text = montuno::normalise_bars(&rules.apply(progression));

    let segmentation = segment(&text, None, 0, &grid)?;
    let plans = plan_bass_line(&segmentation.assignments, initial, &[], &[]);

    println!(
        "{} measures, {} eighths on clave {}",
        segmentation.measure_count,
        segmentation.total_slots(),
        grid.tag
    );
    for (assignment, plan) in segmentation.assignments.iter().zip(&plans) {
        println!(
            "{:>4}..{:<4} {:<10} bass {:<7} {:>3}  {}{}{}",
            assignment.slots.start,
            assignment.slots.end,
            assignment.symbol,
            plan.inversion.name(),
            plan.target,
            assignment
                .harmonization
                .map(|h| format!("harmonization={h} "))
                .unwrap_or_default(),
            assignment
                .forced_inversion
                .map(|i| format!("forced={i} "))
                .unwrap_or_default(),
            assignment
                .style
                .as_deref()
                .map(|s| format!("style={s}"))
                .unwrap_or_default(),
        );
    }
    Ok(())
}

pub fn show_config(config: &MontunoConfig, sources: &ConfigSources) {
    for file in &sources.files {
        println!("# loaded: {}", file.display());
    }
    for var in &sources.env_overrides {
        println!("# env: {var}");
    }
    print!("{}", config.to_toml());
}

/// Config-defined pattern by name, else a built-in one.
fn clave_grid(config: &MontunoConfig, name: &str) -> Result<ClaveGrid> {
    match config.clave(name) {
        Some(pattern) => Ok(ClaveGrid::new(
            prefix_tag(&pattern.midi_prefix),
            pattern.head.clone(),
            pattern.body.clone(),
        )),
        None => Ok(ClaveGrid::named(name)?),
    }
}

/// `auto` leaves the first inversion to voice-leading.
fn parse_inversion(value: &str) -> Result<Option<Inversion>> {
    if value.trim().eq_ignore_ascii_case("auto") {
        return Ok(None);
    }
    Ok(Some(value.parse()?))
}

/// Built-in rewrite rules followed by the configured ones.
fn replacements(config: &MontunoConfig) -> Result<ChordReplacements> {
    let mut rules = default_rules();
    rules.extend(
        config
            .replacements
            .iter()
            .map(|r| ReplacementRule::new(&r.pattern, &r.replacement, &r.flags)),
    );
    Ok(ChordReplacements::compile(&rules)?)
}
