// Periodic timestamp records appended through the shared log.
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use time::format_description::{self, OwnedFormatItem};
use time::{OffsetDateTime, UtcOffset};

use crate::core::error::{Error, ErrorKind};
use crate::serve::shared::SharedLog;
use crate::serve::shutdown::Shutdown;

pub const DEFAULT_STAMP_INTERVAL: Duration = Duration::from_secs(10);

const STAMP_FORMAT: &str = "[weekday repr:short], [day] [month repr:short] [year] \
     [hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]";

pub struct StampFormat {
    items: OwnedFormatItem,
}

impl StampFormat {
    pub fn new() -> Result<Self, Error> {
        let items = format_description::parse_owned::<2>(STAMP_FORMAT).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("invalid timestamp format")
                .with_source(err)
        })?;
        Ok(Self { items })
    }

    /// `timestamp:Tue, 05 Mar 2024 14:07:09 +0000\n`
    pub fn record(&self, now: OffsetDateTime) -> Result<String, Error> {
        let formatted = now.format(&self.items).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to format timestamp")
                .with_source(err)
        })?;
        Ok(format!("timestamp:{formatted}\n"))
    }
}

/// Starts the injector thread; it returns the number of stamps appended.
pub fn spawn(
    log: Arc<SharedLog>,
    shutdown: Shutdown,
    interval: Duration,
    offset: UtcOffset,
) -> Result<JoinHandle<u64>, Error> {
    let format = StampFormat::new()?;
    thread::Builder::new()
        .name("stamp".to_string())
        .spawn(move || {
            let mut stamps = 0u64;
            while !shutdown.wait_timeout(interval) {
                let now = OffsetDateTime::now_utc().to_offset(offset);
                let appended = format
                    .record(now)
                    .and_then(|record| log.append(record.as_bytes()));
                match appended {
                    Ok(()) => {
                        stamps += 1;
                        tracing::debug!(stamps, "appended timestamp");
                    }
                    Err(err) => tracing::error!(error = %err, "timestamp append failed"),
                }
            }
            stamps
        })
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to spawn timestamp thread")
                .with_source(err)
        })
}

#[cfg(test)]
mod tests {
    use super::{StampFormat, spawn};
    use crate::core::medium::SlotMedium;
    use crate::serve::shared::SharedLog;
    use crate::serve::shutdown::Shutdown;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use time::{Date, Month, UtcOffset};

    #[test]
    fn record_matches_rfc2822_style() {
        let format = StampFormat::new().expect("format");
        let now = Date::from_calendar_date(2024, Month::March, 5)
            .expect("date")
            .with_hms(14, 7, 9)
            .expect("time")
            .assume_utc();
        assert_eq!(
            format.record(now).expect("record"),
            "timestamp:Tue, 05 Mar 2024 14:07:09 +0000\n"
        );

        let offset = UtcOffset::from_hms(5, 30, 0).expect("offset");
        assert_eq!(
            format.record(now.to_offset(offset)).expect("record"),
            "timestamp:Tue, 05 Mar 2024 19:37:09 +0530\n"
        );
    }

    #[test]
    fn injector_appends_until_shutdown() {
        let log = Arc::new(SharedLog::new(SlotMedium::new(100).expect("slots")));
        let shutdown = Shutdown::new();
        let handle = spawn(
            Arc::clone(&log),
            shutdown.clone(),
            Duration::from_millis(10),
            UtcOffset::UTC,
        )
        .expect("spawn");

        thread::sleep(Duration::from_millis(100));
        shutdown.request();
        let stamps = handle.join().expect("join");

        assert!(stamps >= 1);
        let content = String::from_utf8(log.read_all().expect("read")).expect("utf8");
        assert_eq!(content.lines().count() as u64, stamps);
        assert!(content.lines().all(|line| line.starts_with("timestamp:")));
    }
}
