//! Tracing setup: console output plus optional daily log files
//!
//! Daily files are named `YYYY-MM-DD.log` after the date in the configured
//! timezone and are switched on the first line written after midnight.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// HTTP stack noise is capped at WARN on every output
const QUIET_DEPENDENCIES: &str = "hyper=warn,hyper_util=warn,reqwest=warn,h2=warn,rustls=warn";

/// Install the global subscriber
///
/// Every line carries its target (`d2n_core::reconciler`, `d2n_notion`,
/// `d2n_docker`, ...) so failures can be traced to the originating component.
pub fn init(level: &str, log_dir: Option<&Path>, timezone: Tz) -> Result<()> {
    let console_layer = fmt::layer().with_filter(filter(level)?);

    let file_layer = match log_dir {
        Some(dir) => Some(file_layer(dir, timezone, level)?),
        None => None,
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to set tracing subscriber")
}

/// Plain-text layer writing to the daily log file under `dir`
fn file_layer<S>(dir: &Path, timezone: Tz, level: &str) -> Result<Box<dyn Layer<S> + Send + Sync>>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    let writer = DailyFileMakeWriter::new(dir, timezone)?;
    Ok(fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(filter(level)?)
        .boxed())
}

fn filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(format!("{},{}", level.to_lowercase(), QUIET_DEPENDENCIES))
        .with_context(|| format!("Invalid log level '{}'", level))
}

/// Path of the log file for `date`
pub fn log_file_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("{}.log", date.format("%Y-%m-%d")))
}

struct DailyFile {
    dir: PathBuf,
    timezone: Tz,
    current: Mutex<Option<(NaiveDate, File)>>,
}

impl DailyFile {
    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    fn append(&self, date: NaiveDate, buf: &[u8]) -> io::Result<()> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;

        let stale = current.as_ref().is_none_or(|(open_date, _)| *open_date != date);
        if stale {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file_path(&self.dir, date))?;
            *current = Some((date, file));
        }

        if let Some((_, file)) = current.as_mut() {
            file.write_all(buf)?;
            file.flush()?;
        }
        Ok(())
    }
}

/// [`MakeWriter`](tracing_subscriber::fmt::MakeWriter) appending to the
/// current day's log file
#[derive(Clone)]
pub struct DailyFileMakeWriter {
    file: Arc<DailyFile>,
}

impl DailyFileMakeWriter {
    /// Create the log directory if needed
    pub fn new(dir: &Path, timezone: Tz) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

        Ok(Self {
            file: Arc::new(DailyFile {
                dir: dir.to_path_buf(),
                timezone,
                current: Mutex::new(None),
            }),
        })
    }
}

impl<'a> fmt::MakeWriter<'a> for DailyFileMakeWriter {
    type Writer = DailyFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        DailyFileWriter {
            file: Arc::clone(&self.file),
            buf: Vec::with_capacity(256),
        }
    }
}

/// Per-event writer; the buffered line is appended on drop
pub struct DailyFileWriter {
    file: Arc<DailyFile>,
    buf: Vec<u8>,
}

impl Write for DailyFileWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for DailyFileWriter {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }

        let date = self.file.today();
        if let Err(e) = self.file.append(date, &self.buf) {
            // Logging about logging would recurse
            eprintln!("Failed to write log file: {}", e);
        }
    }
}
