//! Purpose: `linelog` daemon entry point.
//! Role: Binary crate root; parses args, sets up logging and signals, runs the server.
//! Invariants: The local UTC offset is read before any thread is spawned.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `to_exit_code`.
use std::error::Error as StdError;
use std::fs::OpenOptions;
use std::io::{self, IsTerminal};
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use signal_hook::consts::{SIGINT, SIGTERM};
use time::UtcOffset;
use tracing_subscriber::EnvFilter;

use linelog::core::error::{Error, ErrorKind, to_exit_code};
use linelog::core::frame::DEFAULT_MAX_FRAME_BYTES;
use linelog::core::ring::DEFAULT_CAPACITY;
use linelog::serve::{DEFAULT_DATA_FILE, MediumConfig, ServeConfig, Server, Shutdown};

#[derive(Parser)]
#[command(
    name = "linelog",
    version,
    about = "Append newline-terminated records from TCP clients and echo the log back",
    long_about = None,
    after_help = r#"EXAMPLES
  $ linelog --bind 127.0.0.1:9000
  $ printf 'hello\n' | nc -q1 127.0.0.1 9000
  $ linelog --medium slots --capacity 10 -d

SEEK
  A record `AESDCHAR_IOCSEEKTO:<record>,<offset>` is not stored; the reply to it
  starts at that byte of that record (slots medium only)."#
)]
struct Cli {
    #[arg(short = 'd', long, help = "Fork into the background after binding")]
    daemon: bool,
    #[arg(long, default_value = "0.0.0.0:9000", help = "Address to listen on")]
    bind: SocketAddr,
    #[arg(long, value_enum, default_value = "file", help = "Backing storage for records")]
    medium: MediumKind,
    #[arg(
        long,
        default_value = DEFAULT_DATA_FILE,
        help = "Data file for --medium file (removed at start and on exit)"
    )]
    data_file: PathBuf,
    #[arg(long, default_value_t = DEFAULT_CAPACITY, help = "Record slots for --medium slots")]
    capacity: usize,
    #[arg(long, default_value_t = 10, help = "Seconds between timestamp records (0 disables)")]
    stamp_interval_secs: u64,
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_FRAME_BYTES,
        help = "Largest partial record buffered per connection"
    )]
    max_frame_bytes: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum MediumKind {
    File,
    Slots,
}

impl Cli {
    fn into_config(self, stamp_offset: UtcOffset) -> ServeConfig {
        let medium = match self.medium {
            MediumKind::File => MediumConfig::File {
                path: self.data_file,
            },
            MediumKind::Slots => MediumConfig::Slots {
                capacity: self.capacity,
            },
        };
        let stamp_interval =
            (self.stamp_interval_secs > 0).then(|| Duration::from_secs(self.stamp_interval_secs));
        ServeConfig {
            bind: self.bind,
            medium,
            stamp_interval,
            stamp_offset,
            max_frame_bytes: self.max_frame_bytes,
        }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            let err = add_io_hint(err);
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32, Error> {
    // Reading the offset is only sound while the process is single-threaded.
    let stamp_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                return Ok(0);
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `linelog --help`."));
            }
        },
    };

    init_tracing();

    let daemon = cli.daemon;
    let server = Server::bind(cli.into_config(stamp_offset))?;
    let addr = server.local_addr()?;
    let log = server.log();

    if daemon {
        daemonize()?;
    }

    let shutdown = Shutdown::new();
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, shutdown.flag()).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to install signal handler")
                .with_source(err)
        })?;
    }

    tracing::info!(%addr, medium = log.kind(), "listening");
    let report = server.run(&shutdown)?;
    tracing::info!(
        sessions = report.sessions_joined,
        frames = report.frames,
        appended = report.appended,
        seeks = report.seeks,
        failed = report.failed_ops,
        stamps = report.stamps,
        "server stopped"
    );
    Ok(0)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}

/// Detaches from the terminal: the parent exits 0 once the child exists.
///
/// Must run before any thread is spawned; the listener and medium are
/// inherited by the child.
fn daemonize() -> Result<(), Error> {
    // SAFETY: the process is still single-threaded here.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(Error::new(ErrorKind::Internal)
            .with_message("fork failed")
            .with_source(io::Error::last_os_error()));
    }
    if pid > 0 {
        std::process::exit(0);
    }

    // SAFETY: plain syscall in the freshly forked child.
    if unsafe { libc::setsid() } < 0 {
        return Err(Error::new(ErrorKind::Internal)
            .with_message("setsid failed")
            .with_source(io::Error::last_os_error()));
    }

    std::env::set_current_dir("/").map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to change directory")
            .with_path("/")
            .with_source(err)
    })?;

    let null = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to open /dev/null")
                .with_path("/dev/null")
                .with_source(err)
        })?;
    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: both descriptors are valid for the duration of the call.
        if unsafe { libc::dup2(null.as_raw_fd(), fd) } < 0 {
            return Err(Error::new(ErrorKind::Io)
                .with_message("failed to redirect standard streams")
                .with_source(io::Error::last_os_error()));
        }
    }
    Ok(())
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Permission => {
            err.with_hint("Permission denied. Check the data file path or the bind port.")
        }
        ErrorKind::Busy => err.with_hint("Resource is busy. Retry once the other holder exits."),
        ErrorKind::Io => err.with_hint("I/O error. Check the path, filesystem, and disk space."),
        ErrorKind::Internal => err.with_hint(
            "Unexpected internal failure. Retry with RUST_LOG=debug and share the output if it persists.",
        ),
        _ => err,
    }
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Unsupported => "unsupported operation".to_string(),
        ErrorKind::Busy => "resource is busy".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(path) = err.path() {
        lines.push(format!("path: {}", path.display()));
    }
    if let Some(offset) = err.offset() {
        lines.push(format!("offset: {offset}"));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}
