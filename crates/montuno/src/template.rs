//! Reference templates.
//!
//! A template is one recorded montuno loop over a C chord for a given clave,
//! bass inversion and variant letter. Files are named
//! `salsa_{clave}_{inversion}_{variant}.mid`, e.g. `salsa_2-3_third_B.mid`.

use midly::{MetaMessage, MidiMessage, Smf, TrackEventKind};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::note::Instrument;
use crate::theory::NoteName;
use crate::voicing::Inversion;
use crate::{Error, Result};

const DEFAULT_MICROS_PER_BEAT: u32 = 500_000;

/// Template variant letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Variant {
    A,
    B,
    C,
    D,
}

impl Variant {
    pub const ALL: [Variant; 4] = [Self::A, Self::B, Self::C, Self::D];

    pub fn letter(&self) -> char {
        match self {
            Self::A => 'A',
            Self::B => 'B',
            Self::C => 'C',
            Self::D => 'D',
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for Variant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            _ => Err(Error::UnknownVariant {
                value: s.to_string(),
            }),
        }
    }
}

/// How the variant for a render is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantChoice {
    Fixed(Variant),
    /// Drawn uniformly from the caller's generator.
    Random,
}

impl VariantChoice {
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Variant {
        match self {
            Self::Fixed(variant) => *variant,
            Self::Random => Variant::ALL[rng.gen_range(0..Variant::ALL.len())],
        }
    }
}

impl Default for VariantChoice {
    fn default() -> Self {
        Self::Fixed(Variant::A)
    }
}

impl FromStr for VariantChoice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("random") {
            Ok(Self::Random)
        } else {
            s.parse().map(Self::Fixed)
        }
    }
}

/// One note of a reference loop, times in seconds from the loop start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemplateNote {
    pub name: NoteName,
    pub start: f64,
    pub end: f64,
    pub velocity: u8,
}

impl TemplateNote {
    pub fn new(name: NoteName, start: f64, end: f64, velocity: u8) -> Self {
        Self {
            name,
            start,
            end,
            velocity,
        }
    }
}

/// A decoded reference loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub notes: Vec<TemplateNote>,
    pub loop_seconds: f64,
    pub bpm: f64,
    pub instrument: Instrument,
}

impl Template {
    pub fn new(notes: Vec<TemplateNote>, loop_seconds: f64, bpm: f64) -> Self {
        Self {
            notes,
            loop_seconds,
            bpm,
            instrument: Instrument::default(),
        }
    }

    /// Seconds per eighth note.
    pub fn grid_seconds(&self) -> f64 {
        60.0 / self.bpm / 2.0
    }

    /// Loop length in eighth notes.
    pub fn eighths(&self) -> usize {
        (self.loop_seconds / self.grid_seconds()).round().max(0.0) as usize
    }

    /// Partition notes by the eighth they start nearest to.
    ///
    /// Times in each group are relative to the group's own start. Notes
    /// starting past `length` eighths are dropped.
    pub fn groups(&self, grid_seconds: f64, length: usize) -> Vec<Vec<TemplateNote>> {
        let mut groups = vec![Vec::new(); length];
        for note in &self.notes {
            let index = (note.start / grid_seconds).round();
            if index < 0.0 || index as usize >= length {
                continue;
            }
            let index = index as usize;
            let offset = index as f64 * grid_seconds;
            groups[index].push(TemplateNote {
                start: note.start - offset,
                end: note.end - offset,
                ..*note
            });
        }
        groups
    }

    /// Decode a Standard MIDI File.
    ///
    /// Notes come from the first track that has any. Tempo changes are
    /// honored when converting ticks to seconds; the first one sets `bpm`.
    /// The loop runs to the latest note end, anchors included.
    pub fn from_smf(bytes: &[u8]) -> Result<Self> {
        let smf = Smf::parse(bytes).map_err(|e| Error::MidiParse(e.to_string()))?;
        let ppq = match smf.header.timing {
            midly::Timing::Metrical(ticks) => ticks.as_int(),
            midly::Timing::Timecode(_, _) => 480,
        };

        let mut tempo_changes: Vec<(u64, u32)> = Vec::new();
        for track in &smf.tracks {
            let mut tick = 0u64;
            for event in track {
                tick += event.delta.as_int() as u64;
                if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = event.kind {
                    tempo_changes.push((tick, tempo.as_int()));
                }
            }
        }
        tempo_changes.sort_by_key(|(tick, _)| *tick);
        tempo_changes.dedup();
        let tempo_map = TempoMap::new(ppq, tempo_changes);

        let mut notes = Vec::new();
        let mut instrument = Instrument::default();
        for track in &smf.tracks {
            let decoded = decode_track(track, &tempo_map);
            if !decoded.notes.is_empty() {
                notes = decoded.notes;
                instrument = decoded.instrument;
                break;
            }
        }

        // Pitch-0 anchors only mark the loop length.
        let loop_seconds = notes.iter().map(|n| n.end).fold(0.0, f64::max);
        notes.retain(|n| n.name.midi() > 0);
        notes.sort_by(|a, b| {
            a.start
                .total_cmp(&b.start)
                .then(a.name.midi().cmp(&b.name.midi()))
        });

        Ok(Self {
            notes,
            loop_seconds,
            bpm: tempo_map.first_bpm(),
            instrument,
        })
    }
}

struct TempoMap {
    ppq: f64,
    changes: Vec<(u64, u32)>,
}

impl TempoMap {
    fn new(ppq: u16, changes: Vec<(u64, u32)>) -> Self {
        Self {
            ppq: ppq.max(1) as f64,
            changes,
        }
    }

    fn first_bpm(&self) -> f64 {
        let micros = self
            .changes
            .first()
            .map_or(DEFAULT_MICROS_PER_BEAT, |(_, micros)| *micros);
        60_000_000.0 / micros as f64
    }

    fn seconds_at(&self, tick: u64) -> f64 {
        let mut seconds = 0.0;
        let mut last_tick = 0u64;
        let mut micros = DEFAULT_MICROS_PER_BEAT;
        for &(change_tick, change_micros) in &self.changes {
            if change_tick >= tick {
                break;
            }
            seconds += (change_tick - last_tick) as f64 / self.ppq * micros as f64 / 1e6;
            last_tick = change_tick;
            micros = change_micros;
        }
        seconds + (tick - last_tick) as f64 / self.ppq * micros as f64 / 1e6
    }
}

struct DecodedTrack {
    notes: Vec<TemplateNote>,
    instrument: Instrument,
}

fn decode_track(track: &[midly::TrackEvent<'_>], tempo: &TempoMap) -> DecodedTrack {
    let mut notes = Vec::new();
    let mut instrument = Instrument::default();
    let mut named = false;
    // (channel, key) -> stack of (onset tick, velocity)
    let mut pending: HashMap<(u8, u8), Vec<(u64, u8)>> = HashMap::new();
    let mut tick = 0u64;

    let mut close = |key: u8, onset: u64, velocity: u8, offset: u64| {
        notes.push(TemplateNote::new(
            NoteName::from_midi(key),
            tempo.seconds_at(onset),
            tempo.seconds_at(offset),
            velocity,
        ));
    };

    for event in track {
        tick += event.delta.as_int() as u64;
        match event.kind {
            TrackEventKind::Meta(MetaMessage::TrackName(raw)) if !named => {
                let name = String::from_utf8_lossy(raw).trim().to_string();
                if !name.is_empty() {
                    instrument.name = name;
                    named = true;
                }
            }
            TrackEventKind::Midi { channel, message } => {
                let ch = channel.as_int();
                match message {
                    MidiMessage::ProgramChange { program } => {
                        instrument.program = program.as_int();
                    }
                    MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                        instrument.is_drum = ch == 9;
                        pending
                            .entry((ch, key.as_int()))
                            .or_default()
                            .push((tick, vel.as_int()));
                    }
                    MidiMessage::NoteOff { key, .. } | MidiMessage::NoteOn { key, .. } => {
                        if let Some((onset, velocity)) = pending
                            .get_mut(&(ch, key.as_int()))
                            .and_then(|stack| stack.pop())
                        {
                            close(key.as_int(), onset, velocity, tick);
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    // Unterminated notes end with the track.
    for ((_, key), stack) in pending {
        for (onset, velocity) in stack {
            close(key, onset, velocity, tick);
        }
    }

    DecodedTrack { notes, instrument }
}

/// Store lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    /// Short clave tag, e.g. `"2-3"`.
    pub clave: String,
    pub inversion: Inversion,
    pub variant: Variant,
}

impl TemplateKey {
    pub fn new(clave: &str, inversion: Inversion, variant: Variant) -> Self {
        Self {
            clave: clave.to_string(),
            inversion,
            variant,
        }
    }

    pub fn file_name(&self) -> String {
        format!("salsa_{}_{}_{}.mid", self.clave, self.inversion, self.variant)
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.clave, self.inversion, self.variant)
    }
}

/// Source of reference templates.
pub trait TemplateStore: Send + Sync {
    /// Template for `key`, or `None` when the store has no such loop.
    fn fetch(&self, key: &TemplateKey) -> Result<Option<Arc<Template>>>;
}

impl<S: TemplateStore + ?Sized> TemplateStore for Arc<S> {
    fn fetch(&self, key: &TemplateKey) -> Result<Option<Arc<Template>>> {
        (**self).fetch(key)
    }
}

/// Reads `salsa_*.mid` files from a directory.
#[derive(Debug, Clone)]
pub struct DirectoryTemplateStore {
    root: PathBuf,
}

impl DirectoryTemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TemplateStore for DirectoryTemplateStore {
    fn fetch(&self, key: &TemplateKey) -> Result<Option<Arc<Template>>> {
        let path = self.root.join(key.file_name());
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(Error::Io { path, source }),
        };
        debug!(path = %path.display(), "loaded reference template");
        Template::from_smf(&bytes).map(|t| Some(Arc::new(t)))
    }
}

/// Templates held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryTemplateStore {
    templates: HashMap<TemplateKey, Arc<Template>>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: TemplateKey, template: Template) {
        self.templates.insert(key, Arc::new(template));
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl TemplateStore for MemoryTemplateStore {
    fn fetch(&self, key: &TemplateKey) -> Result<Option<Arc<Template>>> {
        Ok(self.templates.get(key).cloned())
    }
}

/// Read-through cache in front of another store. Misses are cached too.
pub struct CachedTemplateStore<S> {
    inner: S,
    cache: RwLock<HashMap<TemplateKey, Option<Arc<Template>>>>,
}

impl<S: TemplateStore> CachedTemplateStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<S: TemplateStore> TemplateStore for CachedTemplateStore<S> {
    fn fetch(&self, key: &TemplateKey) -> Result<Option<Arc<Template>>> {
        if let Some(hit) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Ok(hit.clone());
        }

        let loaded = self.inner.fetch(key)?;
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), loaded.clone());
        Ok(loaded)
    }
}

/// Per-inversion template groups sharing one grid.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    pub grid_seconds: f64,
    /// Eighths per loop; group lookups wrap at this length.
    pub length: usize,
    pub instrument: Instrument,
    groups: HashMap<Inversion, Vec<Vec<TemplateNote>>>,
}

impl TemplateSet {
    /// Group templates on the grid of the first one.
    pub fn from_templates(templates: &[(Inversion, Arc<Template>)]) -> Option<Self> {
        let (_, first) = templates.first()?;
        let grid_seconds = first.grid_seconds();
        let length = first.eighths();
        let groups = templates
            .iter()
            .map(|(inversion, template)| (*inversion, template.groups(grid_seconds, length)))
            .collect();
        Some(Self {
            grid_seconds,
            length,
            instrument: first.instrument.clone(),
            groups,
        })
    }

    /// Load one template per inversion for `clave` and `variant`.
    ///
    /// An inversion without its own file borrows the `fallback` inversion's
    /// template. Fails when neither exists.
    pub fn load(
        store: &dyn TemplateStore,
        clave: &str,
        variant: Variant,
        fallback: Inversion,
    ) -> Result<Self> {
        let fallback_key = TemplateKey::new(clave, fallback, variant);
        let mut fallback_template: Option<Arc<Template>> = None;
        let mut templates = Vec::with_capacity(Inversion::ALL.len());

        // The fallback inversion loads first so it sets the grid.
        let order = std::iter::once(fallback)
            .chain(Inversion::ALL.into_iter().filter(|inv| *inv != fallback));
        for inversion in order {
            let key = TemplateKey::new(clave, inversion, variant);
            let template = match store.fetch(&key)? {
                Some(template) => template,
                None => {
                    if fallback_template.is_none() {
                        fallback_template = store.fetch(&fallback_key)?;
                    }
                    let template =
                        fallback_template
                            .clone()
                            .ok_or_else(|| Error::MissingTemplate {
                                clave: clave.to_string(),
                                inversion: inversion.to_string(),
                                variant: variant.to_string(),
                            })?;
                    warn!(missing = %key, using = %fallback_key, "template fallback");
                    template
                }
            };
            templates.push((inversion, template));
        }

        Self::from_templates(&templates).ok_or_else(|| Error::MissingTemplate {
            clave: clave.to_string(),
            inversion: fallback.to_string(),
            variant: variant.to_string(),
        })
    }

    pub fn groups(&self, inversion: Inversion) -> &[Vec<TemplateNote>] {
        self.groups.get(&inversion).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Group at `index`, wrapping at the loop length.
    pub fn group(&self, inversion: Inversion, index: usize) -> &[TemplateNote] {
        if self.length == 0 {
            return &[];
        }
        self.groups(inversion)
            .get(index % self.length)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
