//! Configuration file management for signalforge.
//!
//! Reads/writes `~/.signalforge/config.yaml` with the pager tuning used for
//! the rtl_fm → multimon-ng chain, the dump1090 SBS endpoint, and the
//! supervisor's restart policy. `PAGER_FREQ`, `PAGER_GAIN` and
//! `PAGER_DEVICE` in the environment override the file.

use std::path::PathBuf;

use crate::backoff::DEFAULT_MAX_BACKOFF_MS;
use crate::types::SignalError;

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub pager: PagerConfig,
    pub sbs: SbsConfig,
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PagerConfig {
    /// Tuned frequency in Hz.
    pub frequency: u64,
    pub sample_rate: u32,
    pub gain: f64,
    pub ppm: i32,
    /// RTL-SDR device index; omitted from the command line when unset.
    pub device: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SbsConfig {
    pub host: String,
    pub port: u16,
    /// Wait after dump1090 starts before the first connect.
    pub connect_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    pub restart_on_crash: bool,
    pub max_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pager: PagerConfig {
                frequency: 153_350_000,
                sample_rate: 22050,
                gain: 40.0,
                ppm: 0,
                device: None,
            },
            sbs: SbsConfig {
                host: "127.0.0.1".into(),
                port: 30003,
                connect_delay_ms: 2000,
            },
            supervisor: SupervisorConfig {
                restart_on_crash: true,
                max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            },
        }
    }
}

impl SbsConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Get the config directory path (`~/.signalforge/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".signalforge")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.signalforge/config.yaml`, then apply environment
/// overrides.
///
/// Returns default config if the file doesn't exist or can't be read.
pub fn load_config() -> Config {
    let mut config = read_config_file(&config_file()).unwrap_or_default();
    apply_env(&mut config, |key| std::env::var(key).ok());
    config
}

/// Read a config file. `None` if missing or unreadable.
pub fn read_config_file(path: &std::path::Path) -> Option<Config> {
    let text = std::fs::read_to_string(path).ok()?;
    parse_config(&text)
}

/// Save config to `~/.signalforge/config.yaml`.
pub fn save_config(config: &Config) -> Result<PathBuf, SignalError> {
    let path = config_file();
    write_config_file(config, &path)?;
    Ok(path)
}

/// Write a config file, creating parent directories.
pub fn write_config_file(config: &Config, path: &std::path::Path) -> Result<(), SignalError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| SignalError::Config(e.to_string()))?;
    }
    std::fs::write(path, serialize_config(config))
        .map_err(|e| SignalError::Config(e.to_string()))
}

/// Apply `PAGER_FREQ`, `PAGER_GAIN` and `PAGER_DEVICE` overrides.
///
/// Unparsable values are ignored.
pub fn apply_env(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(freq) = lookup("PAGER_FREQ").and_then(|v| parse_frequency(&v)) {
        config.pager.frequency = freq;
    }
    if let Some(gain) = lookup("PAGER_GAIN").and_then(|v| v.trim().parse().ok()) {
        config.pager.gain = gain;
    }
    if let Some(device) = lookup("PAGER_DEVICE").and_then(|v| v.trim().parse().ok()) {
        config.pager.device = Some(device);
    }
}

/// Parse a frequency in Hz, accepting `k`/`M`/`G` suffixes (`153.350M`).
pub fn parse_frequency(val: &str) -> Option<u64> {
    let val = val.trim();
    let (num, scale) = match val.chars().last()? {
        'k' | 'K' => (&val[..val.len() - 1], 1e3),
        'M' | 'm' => (&val[..val.len() - 1], 1e6),
        'G' | 'g' => (&val[..val.len() - 1], 1e9),
        _ => (val, 1.0),
    };
    let hz = num.trim().parse::<f64>().ok()? * scale;
    if !hz.is_finite() || hz <= 0.0 {
        return None;
    }
    Some(hz.round() as u64)
}

/// Parse simple YAML-like config text.
fn parse_config(text: &str) -> Option<Config> {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            current_section = val.is_empty().then(|| key.to_string());
            continue;
        }

        let Some(section) = current_section.as_deref() else {
            continue;
        };

        match (section, key) {
            ("pager", "frequency") => {
                if let Some(v) = parse_string_value(val).and_then(|v| parse_frequency(&v)) {
                    config.pager.frequency = v;
                }
            }
            ("pager", "sample_rate") => {
                if let Ok(v) = val.parse() {
                    config.pager.sample_rate = v;
                }
            }
            ("pager", "gain") => {
                if let Ok(v) = val.parse() {
                    config.pager.gain = v;
                }
            }
            ("pager", "ppm") => {
                if let Ok(v) = val.parse() {
                    config.pager.ppm = v;
                }
            }
            ("pager", "device") => {
                config.pager.device = parse_string_value(val).and_then(|v| v.parse().ok());
            }
            ("sbs", "host") => {
                if let Some(v) = parse_string_value(val) {
                    config.sbs.host = v;
                }
            }
            ("sbs", "port") => {
                if let Ok(v) = val.parse() {
                    config.sbs.port = v;
                }
            }
            ("sbs", "connect_delay_ms") => {
                if let Ok(v) = val.parse() {
                    config.sbs.connect_delay_ms = v;
                }
            }
            ("supervisor", "restart_on_crash") => {
                if let Some(v) = parse_bool_value(val) {
                    config.supervisor.restart_on_crash = v;
                }
            }
            ("supervisor", "max_backoff_ms") => {
                if let Ok(v) = val.parse() {
                    config.supervisor.max_backoff_ms = v;
                }
            }
            _ => {}
        }
    }

    Some(config)
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn parse_bool_value(val: &str) -> Option<bool> {
    match val {
        "true" | "yes" | "on" => Some(true),
        "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Serialize config to YAML-like text.
pub fn serialize_config(config: &Config) -> String {
    let mut lines = vec!["# signalforge configuration".to_string(), String::new()];

    lines.push("pager:".into());
    lines.push(format!("  frequency: {}", config.pager.frequency));
    lines.push(format!("  sample_rate: {}", config.pager.sample_rate));
    lines.push(format!("  gain: {}", config.pager.gain));
    lines.push(format!("  ppm: {}", config.pager.ppm));
    match config.pager.device {
        Some(d) => lines.push(format!("  device: {d}")),
        None => lines.push("  device: null".into()),
    }
    lines.push(String::new());

    lines.push("sbs:".into());
    lines.push(format!("  host: \"{}\"", config.sbs.host));
    lines.push(format!("  port: {}", config.sbs.port));
    lines.push(format!("  connect_delay_ms: {}", config.sbs.connect_delay_ms));
    lines.push(String::new());

    lines.push("supervisor:".into());
    lines.push(format!(
        "  restart_on_crash: {}",
        config.supervisor.restart_on_crash
    ));
    lines.push(format!(
        "  max_backoff_ms: {}",
        config.supervisor.max_backoff_ms
    ));

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
