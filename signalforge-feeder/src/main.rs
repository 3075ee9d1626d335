//! signalforge: run and inspect radio decoders.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{Cell, Table};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use signalforge_core::config;
use signalforge_core::parse;
use signalforge_core::{now, OutputRecord, Payload};
use signalforge_feeder::{DecoderEvent, DecoderManager, Forwarder};

mod logging;

use logging::{init_logging, LogFormat, LogLevel};

/// How long `run` waits for decoder processes to exit after Ctrl-C.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(
    name = "signalforge",
    version,
    about = "Supervise rtl_433, multimon-ng and dump1090 and decode their output"
)]
struct Cli {
    #[arg(long, global = true, value_enum, default_value = "info")]
    log_level: LogLevel,

    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start decoders and print records as they arrive
    Run {
        /// Decoder to start (repeatable; default: every available decoder)
        #[arg(short, long = "decoder")]
        decoders: Vec<String>,

        /// POST each record as JSON to this URL
        #[arg(long, env = "SIGNALFORGE_FORWARD_URL")]
        forward_url: Option<String>,

        /// Print records as JSON lines instead of summaries
        #[arg(long)]
        json: bool,
    },

    /// Show configured decoders and whether their binaries are installed
    Status,

    /// Decode a capture file of decoder output
    Parse {
        /// Output format of the capture
        #[arg(value_enum)]
        format: ParseFormat,

        /// Capture file (one line per record), or `-` for stdin
        file: PathBuf,
    },

    /// Show the effective configuration
    Config {
        /// Write the current configuration to ~/.signalforge/config.yaml
        #[arg(long)]
        init: bool,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ParseFormat {
    /// rtl_433 `-F json` lines
    Rtl433,
    /// multimon-ng POCSAG/FLEX lines
    Multimon,
    /// BaseStation CSV from dump1090's port 30003
    Sbs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    match cli.command {
        Commands::Run {
            decoders,
            forward_url,
            json,
        } => cmd_run(decoders, forward_url, json).await,
        Commands::Status => cmd_status(),
        Commands::Parse { format, file } => cmd_parse(format, file),
        Commands::Config { init } => cmd_config(init),
    }
}

async fn cmd_run(decoders: Vec<String>, forward_url: Option<String>, json: bool) {
    let config = config::load_config();
    let manager = DecoderManager::from_config(&config).unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let names: Vec<String> = if decoders.is_empty() {
        manager
            .get_decoders()
            .into_iter()
            .filter(|s| s.supervisor.available)
            .map(|s| s.supervisor.name)
            .collect()
    } else {
        decoders
    };

    for name in &names {
        if manager.get_decoder(name).is_none() {
            eprintln!(
                "Error: unknown decoder '{name}' (known: {})",
                manager.decoder_names().join(", ")
            );
            std::process::exit(1);
        }
    }

    let forwarder = forward_url.map(|url| {
        info!(url = %url, "Forwarding records");
        Forwarder::new(&url, &[]).spawn(manager.subscribe())
    });

    let mut rx = manager.subscribe();
    let started = names.iter().filter(|n| manager.start_decoder(n)).count();
    if started == 0 {
        eprintln!("Error: no decoder could be started");
        for status in manager.get_decoders() {
            if let Some(err) = &status.supervisor.last_error {
                eprintln!("  {}: {err}", status.supervisor.name);
            }
        }
        std::process::exit(1);
    }
    eprintln!("Running {started} decoder(s), Ctrl-C to stop");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = rx.recv() => match event {
                Ok(DecoderEvent::Message { data, .. }) => print_record(&data, json),
                Ok(DecoderEvent::DecoderError { decoder, error }) => {
                    eprintln!("  [{decoder}] {error}");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "Output lagging"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    eprintln!("Stopping decoders...");
    manager.stop_all();
    if !manager.wait_idle(SHUTDOWN_TIMEOUT).await {
        warn!("Some decoder processes did not exit in time");
    }
    if let Some(handle) = forwarder {
        handle.abort();
    }
}

fn print_record(record: &OutputRecord, json: bool) {
    if json {
        match serde_json::to_string(record) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "Failed to serialize record"),
        }
    } else {
        println!(
            "{:.3} [{}] {}",
            record.timestamp,
            record.decoder_name,
            record.payload.summary()
        );
    }
}

fn cmd_status() {
    let config = config::load_config();
    let specs = signalforge_core::default_decoders(&config);

    let mut table = Table::new();
    table.set_header(vec!["Decoder", "Kind", "Available", "Restart", "Command"]);

    for spec in &specs {
        let mut missing: Vec<&str> = Vec::new();
        if !signalforge_feeder::discovery::is_available(&spec.command) {
            missing.push(&spec.command);
        }
        if let Some(src) = &spec.pipe_from {
            if !signalforge_feeder::discovery::is_available(&src.command) {
                missing.push(&src.command);
            }
        }
        let available = if missing.is_empty() {
            "yes".to_string()
        } else {
            format!("no (missing {})", missing.join(", "))
        };

        table.add_row(vec![
            Cell::new(&spec.name),
            Cell::new(spec.kind),
            Cell::new(available),
            Cell::new(if spec.restart_on_crash { "on crash" } else { "off" }),
            Cell::new(spec.command_line()),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!("  SBS feed: {}", config.sbs.addr());
    println!();
}

fn cmd_parse(format: ParseFormat, file: PathBuf) {
    let reader: Box<dyn BufRead> = if file.to_str() == Some("-") {
        Box::new(io::stdin().lock())
    } else {
        let f = std::fs::File::open(&file).unwrap_or_else(|e| {
            eprintln!("Error opening {}: {e}", file.display());
            std::process::exit(1);
        });
        Box::new(io::BufReader::new(f))
    };

    let name = match format {
        ParseFormat::Rtl433 => "rtl_433",
        ParseFormat::Multimon => "multimon",
        ParseFormat::Sbs => "dump1090",
    };

    let mut total = 0u64;
    let mut decoded = 0u64;

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => continue,
        };
        let Some(line) = signalforge_core::lines::clean_line(&line) else {
            continue;
        };
        total += 1;

        let timestamp = now();
        let payload: Option<Payload> = match format {
            ParseFormat::Rtl433 => parse::parse_rtl433(line),
            ParseFormat::Multimon => parse::parse_multimon(line, timestamp),
            ParseFormat::Sbs => parse::parse_sbs(line, timestamp),
        };

        if let Some(payload) = payload {
            decoded += 1;
            print_record(&OutputRecord::new(name, payload, timestamp), true);
        }
    }

    eprintln!("{total} lines, {decoded} decoded");
}

fn cmd_config(init: bool) {
    let config = config::load_config();

    if init {
        match config::save_config(&config) {
            Ok(path) => eprintln!("Wrote {}", path.display()),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let path = config::config_file();
    if path.exists() {
        eprintln!("# {}", path.display());
    } else {
        eprintln!("# {} (not found, showing defaults)", path.display());
    }
    print!("{}", config::serialize_config(&config));
}
