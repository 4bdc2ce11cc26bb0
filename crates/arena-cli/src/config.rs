//! User settings – reads/writes `~/.arena/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted user configuration stored in `~/.arena/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Scene loaded when no path is given on the command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_path: Option<String>,

    /// Pace ticks in wall-clock time instead of running flat out.
    #[serde(default = "default_realtime")]
    pub realtime: bool,

    /// Stop after this many ticks; run until Ctrl-C when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ticks: Option<u64>,

    /// Print a status line every this many ticks.
    #[serde(default = "default_report_every")]
    pub report_every: u64,
}

fn default_realtime() -> bool {
    true
}
fn default_report_every() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scene_path: None,
            realtime: default_realtime(),
            max_ticks: None,
            report_every: default_report_every(),
        }
    }
}

/// Return the path to `~/.arena/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".arena").join("config.toml")
}

/// The config file merged with `ARENA_*` overrides; defaults when the file
/// does not exist.
pub fn load() -> Result<Config, String> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config file at `path`.  `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `ARENA_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ARENA_SCENE` | `scene_path` |
/// | `ARENA_REALTIME` | `realtime` (`true`/`false`/`1`/`0`) |
/// | `ARENA_MAX_TICKS` | `max_ticks` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ARENA_SCENE")
        && !v.is_empty()
    {
        cfg.scene_path = Some(v);
    }
    if let Ok(v) = std::env::var("ARENA_REALTIME")
        && let Some(flag) = parse_flag(&v)
    {
        cfg.realtime = flag;
    }
    if let Ok(v) = std::env::var("ARENA_MAX_TICKS")
        && let Ok(n) = v.parse::<u64>()
    {
        cfg.max_ticks = Some(n);
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Save the config, creating `~/.arena/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
