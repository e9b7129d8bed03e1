use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use glob::Pattern;
use livetap_core::{
    CaptureConfig, CaptureError, CaptureLauncher, CaptureSession, DEFAULT_TSHARK, Interrupt,
    PacketStream, PacketSummary, Report, TsharkLauncher, build_report,
};
use log::{LevelFilter, info};
use serde::Serialize;

const INTERRUPT_POLL: Duration = Duration::from_millis(100);

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("LIVETAP_BUILD_COMMIT"),
    " ",
    env!("LIVETAP_BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "livetap")]
#[command(version, long_version = LONG_VERSION)]
#[command(
    about = "Live packet capture controller driving tshark.",
    long_about = None,
    after_help = "Examples:\n  livetap capture sniff -i eth0 -c 100 --timeout 10 -o report.json\n  livetap capture stream -i 'en*' -f 'udp port 53'\n  livetap capture interfaces"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Live capture operations.
    Capture {
        #[command(subcommand)]
        command: CaptureCommands,
    },
}

#[derive(Subcommand, Debug)]
enum CaptureCommands {
    /// Capture until the packet count, the timeout or Ctrl-C and write a JSON report.
    Sniff {
        #[command(flatten)]
        capture: CaptureArgs,

        /// Stop after this many packets
        #[arg(short = 'c', long = "count", value_name = "N")]
        count: Option<usize>,

        /// Stop after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<f64>,

        #[command(flatten)]
        output: OutputArgs,
    },
    /// Print one JSON summary line per packet as packets arrive.
    Stream {
        #[command(flatten)]
        capture: CaptureArgs,

        /// Stop after this many packets
        #[arg(short = 'c', long = "count", value_name = "N")]
        count: Option<usize>,

        /// Suppress non-error output
        #[arg(long)]
        quiet: bool,
    },
    /// Print the parameters tshark would be started with, one per line.
    Params {
        #[command(flatten)]
        capture: CaptureArgs,

        /// Packet count the parameters are built for
        #[arg(short = 'c', long = "count", value_name = "N")]
        count: Option<usize>,
    },
    /// List the interfaces tshark can capture on.
    Interfaces {
        /// tshark executable
        #[arg(long, env = "LIVETAP_TSHARK", default_value = DEFAULT_TSHARK)]
        tshark: PathBuf,
    },
}

#[derive(Args, Debug)]
struct CaptureArgs {
    /// Interface name or glob pattern (repeatable; default: all interfaces)
    #[arg(short = 'i', long = "interface", value_name = "IFACE")]
    interfaces: Vec<String>,

    /// Capture (BPF) filter
    #[arg(short = 'f', long = "filter", value_name = "BPF")]
    filter: Option<String>,

    /// Keep packet summaries only
    #[arg(long)]
    summaries: bool,

    /// Extra tshark parameter appended after the base parameters (repeatable)
    #[arg(long = "extra", value_name = "PARAM", allow_hyphen_values = true)]
    extra: Vec<String>,

    /// tshark executable
    #[arg(long, env = "LIVETAP_TSHARK", default_value = DEFAULT_TSHARK)]
    tshark: PathBuf,
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Output report path (JSON)
    #[arg(short = 'o', long, required_unless_present = "stdout")]
    report: Option<PathBuf>,

    /// Write JSON report to stdout
    #[arg(long, conflicts_with = "report")]
    stdout: bool,

    /// Pretty-print JSON output
    #[arg(long, conflicts_with = "compact")]
    pretty: bool,

    /// Compact JSON output (default)
    #[arg(long)]
    compact: bool,

    /// Suppress non-error output
    #[arg(long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Capture { command } => match command {
            CaptureCommands::Sniff {
                capture,
                count,
                timeout,
                output,
            } => {
                init_logging(output.quiet);
                cmd_capture_sniff(capture, count, timeout, output)
            }
            CaptureCommands::Stream {
                capture,
                count,
                quiet,
            } => {
                init_logging(quiet);
                cmd_capture_stream(capture, count, quiet)
            }
            CaptureCommands::Params { capture, count } => {
                init_logging(true);
                cmd_capture_params(capture, count)
            }
            CaptureCommands::Interfaces { tshark } => {
                init_logging(true);
                cmd_capture_interfaces(&tshark)
            }
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err.message);
            if let Some(hint) = err.hint {
                eprintln!("hint: {}", hint);
            }
            ExitCode::from(2)
        }
    }
}

fn init_logging(quiet: bool) {
    let level = if quiet {
        LevelFilter::Error
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_target(false)
        .init();
}

#[derive(Debug)]
struct CliError {
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(message: impl Into<String>, hint: Option<String>) -> Self {
        Self {
            message: message.into(),
            hint,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::new(err.to_string(), None)
    }
}

impl From<CaptureError> for CliError {
    fn from(err: CaptureError) -> Self {
        let hint = match &err {
            CaptureError::SubprocessStart { .. } => {
                Some("install tshark or point --tshark / LIVETAP_TSHARK at it".to_string())
            }
            CaptureError::InterfaceQuery(_) => {
                Some("check that tshark can list interfaces (`tshark -D`)".to_string())
            }
            CaptureError::ProcessFailed { .. } => Some(
                "check the interface name, the capture filter and capture permissions".to_string(),
            ),
            CaptureError::Decode(_) => {
                Some("tshark wrote an unexpected stream; check --extra parameters".to_string())
            }
            CaptureError::Configuration(_) | CaptureError::CancellationDelivery => None,
        };
        CliError::new(err.to_string(), hint)
    }
}

fn cmd_capture_sniff(
    capture: CaptureArgs,
    count: Option<usize>,
    timeout: Option<f64>,
    output: OutputArgs,
) -> Result<(), CliError> {
    let timeout = timeout.map(parse_timeout).transpose()?;
    let report = if output.stdout {
        None
    } else {
        Some(output.report.clone().ok_or_else(|| {
            CliError::new(
                "missing output path",
                Some("use -o/--report or --stdout".to_string()),
            )
        })?)
    };
    if output.pretty && output.compact {
        return Err(CliError::new(
            "cannot use --pretty and --compact together",
            Some("choose one output format".to_string()),
        ));
    }

    let mut session = open_session(&capture)?;
    let outcome = session.sniff(count, timeout)?;
    let rep = build_report(&session, count, Some(outcome));
    let json = serialize_report(&rep, output.pretty)?;

    let Some(report) = report else {
        print!("{}", json);
        return Ok(());
    };
    write_report(&report, &json)?;
    if !output.quiet {
        eprintln!(
            "OK: {} packets captured ({:?}) -> {}",
            outcome.captured,
            outcome.reason,
            report.display()
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct StreamRecord<'a> {
    number: u64,
    #[serde(flatten)]
    summary: &'a PacketSummary,
}

fn cmd_capture_stream(
    capture: CaptureArgs,
    count: Option<usize>,
    quiet: bool,
) -> Result<(), CliError> {
    let mut session = open_session(&capture)?;
    // tshark runs in its own process group; Ctrl-C must be routed to us
    // before it is launched.
    let interrupt = Interrupt::ctrl_c();
    let _armed = interrupt.arm();
    let stream = session.sniff_continuously(count)?;
    let canceller = stream.canceller();
    let finished = AtomicBool::new(false);

    let streamed = thread::scope(|scope| {
        scope.spawn(|| {
            while !finished.load(Ordering::SeqCst) {
                if interrupt.wait_timeout(INTERRUPT_POLL) {
                    info!("interrupted, stopping stream");
                    if let Err(err) = canceller.cancel() {
                        log::debug!("{err}");
                    }
                    break;
                }
            }
        });
        let streamed = print_stream(stream);
        finished.store(true, Ordering::SeqCst);
        streamed
    })?;
    session.cleanup();

    if !quiet {
        eprintln!("OK: {} packets streamed", streamed);
    }
    Ok(())
}

fn print_stream(stream: PacketStream) -> Result<u64, CliError> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut streamed = 0u64;
    for packet in stream {
        let packet = packet?;
        let summary = packet.summary();
        let line = serde_json::to_string(&StreamRecord {
            number: packet.number,
            summary: &summary,
        })
        .context("JSON serialization failed")?;
        writeln!(out, "{}", line).context("Failed to write to stdout")?;
        out.flush().context("Failed to write to stdout")?;
        streamed += 1;
    }
    Ok(streamed)
}

fn cmd_capture_params(capture: CaptureArgs, count: Option<usize>) -> Result<(), CliError> {
    if count == Some(0) {
        return Err(CliError::new(
            "packet count must be at least 1",
            Some("omit -c/--count to capture without a limit".to_string()),
        ));
    }
    let session = open_session(&capture)?;
    for param in session.get_parameters(count) {
        println!("{}", param);
    }
    Ok(())
}

fn cmd_capture_interfaces(tshark: &Path) -> Result<(), CliError> {
    let interfaces = TsharkLauncher::new(tshark).list_interfaces()?;
    if interfaces.is_empty() {
        return Err(CliError::new(
            "tshark reported no capture interfaces",
            Some("capturing usually needs elevated privileges".to_string()),
        ));
    }
    for name in interfaces {
        println!("{}", name);
    }
    Ok(())
}

fn open_session(capture: &CaptureArgs) -> Result<CaptureSession, CliError> {
    let interfaces = resolve_interfaces(&capture.interfaces, &capture.tshark)?;
    let config = CaptureConfig {
        interfaces,
        bpf_filter: capture.filter.clone(),
        display_filter: None,
        only_summaries: capture.summaries,
        tshark_path: capture.tshark.clone(),
        extra_parameters: capture.extra.clone(),
    };
    CaptureSession::new(config).map_err(|err| match err {
        CaptureError::Configuration(message) => CliError::new(
            message,
            Some("pass -i/--interface; see `livetap capture interfaces`".to_string()),
        ),
        other => other.into(),
    })
}

fn parse_timeout(secs: f64) -> Result<Duration, CliError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(CliError::new(
            format!("invalid timeout '{}'", secs),
            Some("use a positive number of seconds".to_string()),
        ));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn serialize_report(rep: &Report, pretty: bool) -> Result<String, CliError> {
    if pretty {
        serde_json::to_string_pretty(rep)
            .context("JSON serialization failed")
            .map_err(Into::into)
    } else {
        serde_json::to_string(rep)
            .context("JSON serialization failed")
            .map_err(Into::into)
    }
}

fn write_report(report: &Path, json: &str) -> Result<(), CliError> {
    if let Some(parent) = report.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create output directory: {}", parent.display())
            })?;
        }
    }
    fs::write(report, json)
        .with_context(|| format!("Failed to write report: {}", report.display()))?;
    Ok(())
}

/// Expand glob patterns against the interfaces tshark lists; plain names are
/// kept as given. Order follows the arguments, duplicates are dropped.
fn resolve_interfaces(requested: &[String], tshark: &Path) -> Result<Vec<String>, CliError> {
    if !requested.iter().any(|name| is_glob_pattern(name)) {
        return Ok(requested.to_vec());
    }
    let available = TsharkLauncher::new(tshark).list_interfaces()?;

    let mut resolved: Vec<String> = Vec::new();
    for name in requested {
        if !is_glob_pattern(name) {
            if !resolved.contains(name) {
                resolved.push(name.clone());
            }
            continue;
        }
        let pattern = Pattern::new(name).map_err(|err| {
            CliError::new(
                format!("invalid interface pattern '{}'", name),
                Some(format!("pattern error: {}", err.msg)),
            )
        })?;
        let matches: Vec<&String> = available
            .iter()
            .filter(|candidate| pattern.matches(candidate))
            .collect();
        if matches.is_empty() {
            return Err(CliError::new(
                format!("no interfaces match pattern '{}'", name),
                Some(format!("available: {}", available.join(", "))),
            ));
        }
        for candidate in matches {
            if !resolved.contains(candidate) {
                resolved.push(candidate.clone());
            }
        }
    }
    Ok(resolved)
}

fn is_glob_pattern(input: &str) -> bool {
    input.contains('*') || input.contains('?') || input.contains('[')
}
