// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tracing subscriber setup for netbackup processes.
//!
//! [`init`] builds a `tracing_subscriber::fmt` subscriber filtered by the
//! configured `log_level` directive, matching the teacher's own
//! `main.rs`-level logging setup. When `syslog` is requested, log lines
//! are additionally routed to the local syslog facility.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::io;
use std::sync::{Arc, Mutex};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global `tracing` subscriber.
///
/// `log_level` is an `EnvFilter` directive (e.g. `"info"` or
/// `"netbackup=debug"`); an unparsable directive falls back to `"info"`.
/// When `syslog` is `true`, log lines are written to the local syslog
/// facility in addition to stdout.
pub fn init(log_level: &str, syslog: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = fmt::layer();

    if syslog {
        let writer = SyslogWriter::connect()?;
        let syslog_layer = fmt::layer().with_writer(writer).with_ansi(false);
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .with(syslog_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;
    }

    Ok(())
}

/// A `tracing_subscriber` writer that forwards formatted log lines to the
/// local syslog facility.
#[derive(Clone)]
struct SyslogWriter {
    logger: Arc<Mutex<syslog::Logger<syslog::LoggerBackend, syslog::Formatter3164>>>,
}

impl SyslogWriter {
    fn connect() -> anyhow::Result<Self> {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_DAEMON,
            hostname: None,
            process: "netbackup".into(),
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter)
            .map_err(|e| anyhow::anyhow!("failed to connect to syslog: {e}"))?;
        Ok(SyslogWriter { logger: Arc::new(Mutex::new(logger)) })
    }
}

impl io::Write for SyslogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        let mut logger = self.logger.lock().expect("syslog logger lock poisoned");
        logger
            .info(text.trim_end())
            .map_err(|e| io::Error::other(e.to_string()))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> fmt::MakeWriter<'a> for SyslogWriter {
    type Writer = SyslogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparsable_directive_falls_back_to_info() {
        let filter = EnvFilter::try_new("???not a directive???").unwrap_or_else(|_| EnvFilter::new("info"));
        assert_eq!(filter.to_string(), "info");
    }
}
