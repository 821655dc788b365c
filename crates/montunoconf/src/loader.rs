//! Config file discovery, table merging, and environment variable overlay.

use crate::{default_claves, ConfigError, MontunoConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local
/// `./montuno.toml`. Returns existing paths in load order.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/montuno/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("montuno/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("montuno.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file into a raw table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_table(&contents, path)
}

pub fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Merge `overlay` into `base`. Nested tables merge key by key; any other
/// value, arrays included, replaces what was there.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        let incoming = match value {
            toml::Value::Table(incoming) => incoming,
            other => {
                base.insert(key, other);
                continue;
            }
        };
        if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
            merge_tables(existing, incoming);
            continue;
        }
        base.insert(key, toml::Value::Table(incoming));
    }
}

/// Deserialize a merged table over the defaults.
pub fn from_table(table: toml::Table) -> Result<MontunoConfig, ConfigError> {
    let mut config: MontunoConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Invalid {
                message: e.to_string(),
            })?;

    config.paths.reference_dir = expand_path(&config.paths.reference_dir.to_string_lossy());
    for (name, clave) in default_claves() {
        config.claves.entry(name).or_insert(clave);
    }
    if let Some((name, _)) = config
        .claves
        .iter()
        .find(|(_, c)| c.head.is_empty() && c.body.is_empty())
    {
        return Err(ConfigError::Invalid {
            message: format!("clave {name} has no groups"),
        });
    }
    Ok(config)
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut MontunoConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("MONTUNO_REFERENCE_DIR") {
        config.paths.reference_dir = expand_path(&v);
        sources.env_overrides.push("MONTUNO_REFERENCE_DIR".to_string());
    }
    if let Ok(v) = env::var("MONTUNO_BPM") {
        if let Ok(bpm) = v.parse() {
            config.render.bpm = bpm;
            sources.env_overrides.push("MONTUNO_BPM".to_string());
        }
    }
    if let Ok(v) = env::var("MONTUNO_CLAVE") {
        config.render.clave = v;
        sources.env_overrides.push("MONTUNO_CLAVE".to_string());
    }
    if let Ok(v) = env::var("MONTUNO_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("MONTUNO_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        directories::BaseDirs::new()
            .map(|d| d.home_dir().join(stripped))
            .unwrap_or_else(|| PathBuf::from(path))
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        match stripped.split_once('/') {
            Some((var_name, rest)) => env::var(var_name)
                .map(|value| PathBuf::from(value).join(rest))
                .unwrap_or_else(|_| PathBuf::from(path)),
            None => env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path)),
        }
    } else {
        PathBuf::from(path)
    }
}
