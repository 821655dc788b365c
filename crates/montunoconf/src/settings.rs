//! Configuration sections.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Filesystem locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding `salsa_{clave}_{inversion}_{variant}.mid` reference loops.
    /// Default: ~/.local/share/montuno/references
    #[serde(default = "PathsConfig::default_reference_dir")]
    pub reference_dir: PathBuf,
}

impl PathsConfig {
    fn default_reference_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.data_dir().join("montuno/references"))
            .unwrap_or_else(|| PathBuf::from("references"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            reference_dir: Self::default_reference_dir(),
        }
    }
}

/// Defaults for a render when the command line does not say otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Default: 120
    #[serde(default = "RenderConfig::default_bpm")]
    pub bpm: f64,

    /// Clave pattern name, a key of `[claves]`.
    /// Default: 2-3
    #[serde(default = "RenderConfig::default_clave")]
    pub clave: String,

    /// Inversion of the first chord: root, third, fifth, seventh, or "auto".
    /// Default: root
    #[serde(default = "RenderConfig::default_inversion")]
    pub inversion: String,

    /// Template variant letter, or "random".
    /// Default: A
    #[serde(default = "RenderConfig::default_variant")]
    pub variant: String,

    /// original, octave-up or octave-down.
    #[serde(default = "RenderConfig::default_registration")]
    pub registration: String,

    #[serde(default = "default_true")]
    pub snap_approach_to_structure: bool,

    #[serde(default = "default_true")]
    pub prefer_neighbor_approach: bool,

    /// Pad silent edges of the piece with pitch-0 notes.
    #[serde(default = "default_true")]
    pub anchors: bool,
}

fn default_true() -> bool {
    true
}

impl RenderConfig {
    fn default_bpm() -> f64 {
        120.0
    }

    fn default_clave() -> String {
        "2-3".to_string()
    }

    fn default_inversion() -> String {
        "root".to_string()
    }

    fn default_variant() -> String {
        "A".to_string()
    }

    fn default_registration() -> String {
        "original".to_string()
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            bpm: Self::default_bpm(),
            clave: Self::default_clave(),
            inversion: Self::default_inversion(),
            variant: Self::default_variant(),
            registration: Self::default_registration(),
            snap_approach_to_structure: true,
            prefer_neighbor_approach: true,
            anchors: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level or `tracing_subscriber` filter directive.
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// One clave pattern: group lengths in eighth notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClavePattern {
    /// Reference file prefix, `salsa_<tag>`; the part after the first
    /// underscore is the tag in `salsa_{tag}_{inversion}_{variant}.mid`.
    pub midi_prefix: String,
    /// Groups played once at the start.
    pub head: Vec<u32>,
    /// Groups repeated after the head.
    pub body: Vec<u32>,
}

/// Built-in 2-3 and 3-2 patterns.
pub fn default_claves() -> BTreeMap<String, ClavePattern> {
    BTreeMap::from([
        (
            "2-3".to_string(),
            ClavePattern {
                midi_prefix: "salsa_2-3".to_string(),
                head: vec![3, 4, 4, 3],
                body: vec![5, 4, 4, 3],
            },
        ),
        (
            "3-2".to_string(),
            ClavePattern {
                midi_prefix: "salsa_3-2".to_string(),
                head: vec![3, 3, 5, 4],
                body: vec![4, 3, 5, 4],
            },
        ),
    ])
}

/// Regex rewrite applied to progression text before parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementConfig {
    pub pattern: String,
    pub replacement: String,
    /// `i` for case-insensitive, `m` for multi-line.
    #[serde(default)]
    pub flags: String,
}
