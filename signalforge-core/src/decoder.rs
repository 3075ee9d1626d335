//! Decoder definitions: which binary to run and how to read its output.

use std::fmt;
use std::str::FromStr;

use crate::backoff::BASE_BACKOFF_MS;
use crate::config::Config;
use crate::parse;
use crate::types::Payload;

/// Output format of a supervised decoder. Selects the line parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecoderKind {
    Rtl433,
    Multimon,
    Dump1090,
}

impl DecoderKind {
    /// Parse one trimmed stdout line.
    pub fn parse_line(self, line: &str, timestamp: f64) -> Option<Payload> {
        match self {
            DecoderKind::Rtl433 => parse::parse_rtl433(line),
            DecoderKind::Multimon => parse::parse_multimon(line, timestamp),
            DecoderKind::Dump1090 => parse::parse_dump1090(line),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DecoderKind::Rtl433 => "rtl_433",
            DecoderKind::Multimon => "multimon-ng",
            DecoderKind::Dump1090 => "dump1090",
        }
    }
}

impl fmt::Display for DecoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecoderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rtl_433" | "rtl433" => Ok(DecoderKind::Rtl433),
            "multimon-ng" | "multimon" => Ok(DecoderKind::Multimon),
            "dump1090" => Ok(DecoderKind::Dump1090),
            other => Err(format!("unknown decoder kind: {other}")),
        }
    }
}

/// Upstream process whose stdout becomes the decoder's stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeSource {
    pub command: String,
    pub args: Vec<String>,
}

/// Immutable description of one supervised decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderSpec {
    pub name: String,
    pub kind: DecoderKind,
    pub command: String,
    pub args: Vec<String>,
    pub pipe_from: Option<PipeSource>,
    pub restart_on_crash: bool,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl DecoderSpec {
    pub fn new(name: &str, kind: DecoderKind, command: &str, args: &[&str]) -> Self {
        DecoderSpec {
            name: name.to_string(),
            kind,
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            pipe_from: None,
            restart_on_crash: true,
            base_backoff_ms: BASE_BACKOFF_MS,
            max_backoff_ms: crate::backoff::DEFAULT_MAX_BACKOFF_MS,
        }
    }

    pub fn with_pipe_from(mut self, command: &str, args: &[String]) -> Self {
        self.pipe_from = Some(PipeSource {
            command: command.to_string(),
            args: args.to_vec(),
        });
        self
    }

    pub fn with_restart(mut self, restart_on_crash: bool, max_backoff_ms: u64) -> Self {
        self.restart_on_crash = restart_on_crash;
        self.max_backoff_ms = max_backoff_ms;
        self
    }

    /// Full shell-style command line, including the pipe source.
    pub fn command_line(&self) -> String {
        let main = join_command(&self.command, &self.args);
        match &self.pipe_from {
            Some(src) => format!("{} | {main}", join_command(&src.command, &src.args)),
            None => main,
        }
    }
}

fn join_command(command: &str, args: &[String]) -> String {
    std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `rtl_fm` arguments for the pager chain.
pub fn rtl_fm_args(config: &Config) -> Vec<String> {
    let pager = &config.pager;
    let mut args = vec![
        "-f".to_string(),
        pager.frequency.to_string(),
        "-s".to_string(),
        pager.sample_rate.to_string(),
        "-g".to_string(),
        pager.gain.to_string(),
        "-p".to_string(),
        pager.ppm.to_string(),
    ];
    if let Some(device) = pager.device {
        args.push("-d".to_string());
        args.push(device.to_string());
    }
    args
}

/// The three standard decoders: `rtl_433`, `multimon` (fed by `rtl_fm`),
/// and `dump1090`.
pub fn default_decoders(config: &Config) -> Vec<DecoderSpec> {
    let restart = config.supervisor.restart_on_crash;
    let max_backoff = config.supervisor.max_backoff_ms;

    vec![
        DecoderSpec::new(
            "rtl_433",
            DecoderKind::Rtl433,
            "rtl_433",
            &["-F", "json", "-M", "utc", "-M", "protocol"],
        )
        .with_restart(restart, max_backoff),
        DecoderSpec::new(
            "multimon",
            DecoderKind::Multimon,
            "multimon-ng",
            &[
                "-a", "POCSAG512", "-a", "POCSAG1200", "-a", "POCSAG2400", "-a", "FLEX", "-t",
                "raw", "-",
            ],
        )
        .with_pipe_from("rtl_fm", &rtl_fm_args(config))
        .with_restart(restart, max_backoff),
        DecoderSpec::new(
            "dump1090",
            DecoderKind::Dump1090,
            "dump1090",
            &["--net", "--quiet"],
        )
        .with_restart(restart, max_backoff),
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
