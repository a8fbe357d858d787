//! Purpose: TCP front end for the shared line log.
//! Exports: `Server`, `ServeConfig`, `MediumConfig`, `ServeReport`.
//! Role: Binds the listener, accepts connections, and hands each one to the supervisor.
//! Invariants: At most one medium per server; it is closed only after every session has joined.
//! Invariants: Shutdown stops accepting first, then the injector, then the sessions.
pub mod session;
pub mod shared;
pub mod shutdown;
pub mod stamp;
pub mod supervisor;

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use time::UtcOffset;

use crate::core::error::{Error, ErrorKind};
use crate::core::frame::DEFAULT_MAX_FRAME_BYTES;
use crate::core::medium::{FileMedium, Medium, SlotMedium};
use crate::core::ring::DEFAULT_CAPACITY;

pub use shared::SharedLog;
pub use shutdown::Shutdown;
pub use supervisor::{ServeReport, Supervisor};

pub const DEFAULT_PORT: u16 = 9000;
pub const DEFAULT_DATA_FILE: &str = "/var/tmp/aesdsocketdata";

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MediumConfig {
    File { path: PathBuf },
    Slots { capacity: usize },
}

impl MediumConfig {
    pub fn open(&self) -> Result<Box<dyn Medium>, Error> {
        match self {
            MediumConfig::File { path } => Ok(Box::new(FileMedium::create(path)?)),
            MediumConfig::Slots { capacity } => Ok(Box::new(SlotMedium::new(*capacity)?)),
        }
    }
}

impl Default for MediumConfig {
    fn default() -> Self {
        MediumConfig::File {
            path: PathBuf::from(DEFAULT_DATA_FILE),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub medium: MediumConfig,
    /// `None` disables timestamp injection.
    pub stamp_interval: Option<Duration>,
    pub stamp_offset: UtcOffset,
    pub max_frame_bytes: usize,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            medium: MediumConfig::default(),
            stamp_interval: Some(stamp::DEFAULT_STAMP_INTERVAL),
            stamp_offset: UtcOffset::UTC,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    match &config.medium {
        MediumConfig::Slots { capacity: 0 } => {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("--capacity must be greater than zero")
                .with_hint(format!("Use a positive value like {DEFAULT_CAPACITY}.")));
        }
        MediumConfig::File { path } if path.as_os_str().is_empty() => {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("--data-file must not be empty")
                .with_hint(format!("Use a writable path like {DEFAULT_DATA_FILE}.")));
        }
        _ => {}
    }

    if config.max_frame_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-frame-bytes must be greater than zero")
            .with_hint("Use a positive value like 16777216."));
    }

    if config.stamp_interval == Some(Duration::ZERO) {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("timestamp interval must be greater than zero")
            .with_hint("Pass --stamp-interval-secs 0 to disable timestamps instead."));
    }

    Ok(())
}

pub struct Server {
    listener: TcpListener,
    log: Arc<SharedLog>,
    config: ServeConfig,
}

impl Server {
    /// Validates `config`, opens the medium, and binds the listener.
    ///
    /// The medium is opened before binding so a stale data file is gone
    /// before the first client can connect.
    pub fn bind(config: ServeConfig) -> Result<Self, Error> {
        validate_config(&config)?;
        let log = Arc::new(SharedLog::from_boxed(config.medium.open()?));

        let listener = match TcpListener::bind(config.bind) {
            Ok(listener) => listener,
            Err(err) => {
                if let Err(close_err) = log.close() {
                    tracing::warn!(error = %close_err, "failed to release medium");
                }
                let kind = match err.kind() {
                    io::ErrorKind::AddrInUse => ErrorKind::Busy,
                    io::ErrorKind::PermissionDenied => ErrorKind::Permission,
                    _ => ErrorKind::Io,
                };
                return Err(Error::new(kind)
                    .with_message(format!("failed to bind {}", config.bind))
                    .with_hint("Pick a free port with --bind, or stop the process holding it.")
                    .with_source(err));
            }
        };

        Ok(Self {
            listener,
            log,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        self.listener.local_addr().map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read listener address")
                .with_source(err)
        })
    }

    pub fn log(&self) -> Arc<SharedLog> {
        Arc::clone(&self.log)
    }

    /// Accepts connections until `shutdown` is requested, then drains.
    pub fn run(self, shutdown: &Shutdown) -> Result<ServeReport, Error> {
        let Self {
            listener,
            log,
            config,
        } = self;

        listener.set_nonblocking(true).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to configure listener")
                .with_source(err)
        })?;

        let stamper = match config.stamp_interval {
            Some(interval) => Some(stamp::spawn(
                Arc::clone(&log),
                shutdown.clone(),
                interval,
                config.stamp_offset,
            )?),
            None => None,
        };

        let mut supervisor =
            Supervisor::new(Arc::clone(&log), shutdown.clone(), config.max_frame_bytes);

        while !shutdown.is_requested() {
            match listener.accept() {
                Ok((stream, peer)) => {
                    tracing::info!(%peer, "accepted connection");
                    if let Err(err) = stream.set_nonblocking(false) {
                        tracing::warn!(%peer, error = %err, "dropping connection");
                        continue;
                    }
                    if let Err(err) = supervisor.spawn(stream, peer) {
                        tracing::warn!(%peer, error = %err, "dropping connection");
                    }
                    supervisor.reap();
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    supervisor.reap();
                    shutdown.wait_timeout(ACCEPT_POLL_INTERVAL);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    shutdown.wait_timeout(ACCEPT_POLL_INTERVAL);
                }
            }
        }

        tracing::info!("caught signal, exiting");
        drop(listener);
        shutdown.request();

        let mut stamps = 0;
        if let Some(handle) = stamper {
            match handle.join() {
                Ok(count) => stamps = count,
                Err(_) => tracing::error!("timestamp thread panicked"),
            }
        }

        let mut report = supervisor.drain();
        report.stamps = stamps;

        log.close()?;
        tracing::debug!(medium = log.kind(), "medium closed");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::{MediumConfig, ServeConfig, Server, validate_config};
    use crate::core::error::ErrorKind;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn loopback(medium: MediumConfig) -> ServeConfig {
        ServeConfig {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            medium,
            stamp_interval: None,
            ..ServeConfig::default()
        }
    }

    #[test]
    fn defaults_match_service_conventions() {
        let config = ServeConfig::default();
        assert_eq!(config.bind.port(), 9000);
        assert_eq!(
            config.medium,
            MediumConfig::File {
                path: "/var/tmp/aesdsocketdata".into()
            }
        );
        assert_eq!(config.stamp_interval, Some(Duration::from_secs(10)));
    }

    #[test]
    fn rejects_zero_limits() {
        let err = validate_config(&loopback(MediumConfig::Slots { capacity: 0 }))
            .expect_err("capacity");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(err.hint().is_some());

        let mut config = loopback(MediumConfig::Slots { capacity: 4 });
        config.max_frame_bytes = 0;
        let err = validate_config(&config).expect_err("frame limit");
        assert_eq!(err.kind(), ErrorKind::Usage);

        let mut config = loopback(MediumConfig::Slots { capacity: 4 });
        config.stamp_interval = Some(Duration::ZERO);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn bind_conflict_releases_the_data_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = Server::bind(loopback(MediumConfig::Slots { capacity: 4 })).expect("bind");
        let taken = first.local_addr().expect("addr");

        let path = dir.path().join("log.data");
        let mut config = loopback(MediumConfig::File { path: path.clone() });
        config.bind = taken;
        let err = Server::bind(config).err().expect("conflict");
        assert_eq!(err.kind(), ErrorKind::Busy);
        assert!(!path.exists());
    }
}
