//! Logging capability injected into the downloader and crawler
//!
//! Components log through [`Log`] instead of calling `tracing` directly so
//! tests can capture their output with [`MemoryLog`]. In the binary each
//! component gets a [`TracingLog`] channel, and [`init`] routes every channel
//! to the console and to its own log file.

use std::fmt;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::{EnvFilter, LevelFilter, Targets};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

pub const DOWNLOADER_TARGET: &str = "screener_concalls::downloader";
pub const CRAWLER_TARGET: &str = "screener_concalls::crawler";

pub trait Log: Send + Sync {
    fn log(&self, level: Level, message: &str);

    fn debug(&self, message: &str) {
        self.log(Level::DEBUG, message);
    }

    fn info(&self, message: &str) {
        self.log(Level::INFO, message);
    }

    fn warn(&self, message: &str) {
        self.log(Level::WARN, message);
    }

    fn error(&self, message: &str) {
        self.log(Level::ERROR, message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Downloader,
    Crawler,
}

impl Channel {
    pub fn target(&self) -> &'static str {
        match self {
            Channel::Downloader => DOWNLOADER_TARGET,
            Channel::Crawler => CRAWLER_TARGET,
        }
    }
}

macro_rules! emit {
    ($target:expr, $level:expr, $message:expr) => {
        match $level {
            Level::ERROR => tracing::error!(target: $target, "{}", $message),
            Level::WARN => tracing::warn!(target: $target, "{}", $message),
            Level::INFO => tracing::info!(target: $target, "{}", $message),
            Level::DEBUG => tracing::debug!(target: $target, "{}", $message),
            _ => tracing::trace!(target: $target, "{}", $message),
        }
    };
}

/// Forwards to `tracing` under a fixed per-component target
#[derive(Debug, Clone, Copy)]
pub struct TracingLog {
    channel: Channel,
}

impl TracingLog {
    pub fn downloader() -> Self {
        Self {
            channel: Channel::Downloader,
        }
    }

    pub fn crawler() -> Self {
        Self {
            channel: Channel::Crawler,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }
}

impl Log for TracingLog {
    fn log(&self, level: Level, message: &str) {
        match self.channel {
            Channel::Downloader => emit!(DOWNLOADER_TARGET, level, message),
            Channel::Crawler => emit!(CRAWLER_TARGET, level, message),
        }
    }
}

/// Keeps every entry in memory
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<(Level, String)>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries
            .lock()
            .map(|entries| entries.to_vec())
            .unwrap_or_default()
    }

    /// Whether any entry at `level` contains `needle`
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.entries()
            .iter()
            .any(|(l, message)| *l == level && message.contains(needle))
    }

    pub fn count(&self, level: Level) -> usize {
        self.entries().iter().filter(|(l, _)| *l == level).count()
    }
}

impl Log for MemoryLog {
    fn log(&self, level: Level, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((level, message.to_string()));
        }
    }
}

pub fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARNING",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        _ => "TRACE",
    }
}

/// `<timestamp> - <LEVEL> - <message>`
#[derive(Debug, Clone, Copy, Default)]
pub struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let now = chrono::Local::now();
        write!(
            writer,
            "{} - {} - ",
            now.format("%Y-%m-%d %H:%M:%S,%3f"),
            level_name(event.metadata().level())
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install console output plus one log file per component channel
pub fn init(download_log: &Path, crawl_log: &Path) -> Result<()> {
    // Set default log level to INFO if not specified
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("screener_concalls=info,concalls=info"));

    let download_file = file_appender(download_log)?;
    let crawl_file = file_appender(crawl_log)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(LineFormat)
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(LineFormat)
                .with_writer(download_file)
                .with_ansi(false)
                .with_filter(Targets::new().with_target(DOWNLOADER_TARGET, LevelFilter::INFO)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(LineFormat)
                .with_writer(crawl_file)
                .with_ansi(false)
                .with_filter(Targets::new().with_target(CRAWLER_TARGET, LevelFilter::INFO)),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

fn file_appender(path: &Path) -> Result<tracing_appender::rolling::RollingFileAppender> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .with_context(|| format!("Log path has no file name: {}", path.display()))?;
    std::fs::create_dir_all(directory)
        .with_context(|| format!("Cannot create log directory: {}", directory.display()))?;
    Ok(tracing_appender::rolling::never(directory, file_name))
}
