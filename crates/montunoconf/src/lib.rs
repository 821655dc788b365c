//! Configuration loading for the montuno renderer.
//!
//! # Config File Locations
//!
//! Files are merged in order (later wins, table by table):
//! 1. `/etc/montuno/config.toml` (system)
//! 2. `~/.config/montuno/config.toml` (user)
//! 3. `./montuno.toml`, or the path given on the command line
//! 4. Environment variables (`MONTUNO_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! reference_dir = "~/salsa/references"
//!
//! [render]
//! bpm = 96
//! clave = "3-2"
//! variant = "random"
//!
//! [telemetry]
//! log_level = "debug"
//!
//! [claves.rumba]
//! midi_prefix = "salsa_rumba"
//! head = [3, 4, 5, 4]
//! body = [3, 4, 5, 4]
//!
//! [[replacements]]
//! pattern = "Maj7"
//! replacement = "∆"
//! ```

pub mod loader;
pub mod settings;

pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};
pub use settings::{
    default_claves, ClavePattern, PathsConfig, RenderConfig, ReplacementConfig, TelemetryConfig,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Complete montuno configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MontunoConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Clave patterns by name. Files add to the built-in 2-3 and 3-2.
    #[serde(default = "default_claves")]
    pub claves: BTreeMap<String, ClavePattern>,

    /// Extra rewrite rules, applied after the built-in set.
    #[serde(default)]
    pub replacements: Vec<ReplacementConfig>,
}

impl Default for MontunoConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            render: RenderConfig::default(),
            telemetry: TelemetryConfig::default(),
            claves: default_claves(),
            replacements: Vec::new(),
        }
    }
}

impl MontunoConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load with `config_path` taking the place of `./montuno.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and variables contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged)?;
        loader::apply_env_overrides(&mut config, &mut sources);
        Ok((config, sources))
    }

    /// Parse a single TOML document over the defaults, without env overrides.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let table = loader::parse_table(contents, Path::new("<string>"))?;
        loader::from_table(table)
    }

    /// Look up a clave pattern by name, accepting a `Clave ` prefix.
    pub fn clave(&self, name: &str) -> Option<&ClavePattern> {
        let trimmed = name.trim();
        let short = trimmed.strip_prefix("Clave ").unwrap_or(trimmed);
        self.claves.get(short)
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# montuno configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "reference_dir = {}\n",
            quoted(&self.paths.reference_dir.display().to_string())
        ));

        let render = &self.render;
        output.push_str("\n[render]\n");
        output.push_str(&format!("bpm = {:?}\n", render.bpm));
        output.push_str(&format!("clave = {}\n", quoted(&render.clave)));
        output.push_str(&format!("inversion = {}\n", quoted(&render.inversion)));
        output.push_str(&format!("variant = {}\n", quoted(&render.variant)));
        output.push_str(&format!("registration = {}\n", quoted(&render.registration)));
        output.push_str(&format!(
            "snap_approach_to_structure = {}\n",
            render.snap_approach_to_structure
        ));
        output.push_str(&format!(
            "prefer_neighbor_approach = {}\n",
            render.prefer_neighbor_approach
        ));
        output.push_str(&format!("anchors = {}\n", render.anchors));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = {}\n", quoted(&self.telemetry.log_level)));

        for (name, clave) in &self.claves {
            output.push_str(&format!("\n[claves.{}]\n", quoted(name)));
            output.push_str(&format!("midi_prefix = {}\n", quoted(&clave.midi_prefix)));
            output.push_str(&format!("head = {:?}\n", clave.head));
            output.push_str(&format!("body = {:?}\n", clave.body));
        }

        for rule in &self.replacements {
            output.push_str("\n[[replacements]]\n");
            output.push_str(&format!("pattern = {}\n", quoted(&rule.pattern)));
            output.push_str(&format!("replacement = {}\n", quoted(&rule.replacement)));
            output.push_str(&format!("flags = {}\n", quoted(&rule.flags)));
        }

        output
    }
}

/// Value rendered as a TOML string, quoted and escaped.
fn quoted(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}
