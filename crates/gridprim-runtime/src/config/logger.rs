use super::autotune::{OutputConfig, TuneVerbosity};
use crate::tune::TuningParameters;
use core::fmt::Display;
use std::{
    fs::OpenOptions,
    io::Write,
    path::PathBuf,
    sync::Arc,
};

/// In-memory text buffer that can be shared with an [output sink](OutputSink).
#[derive(Clone, Debug, Default)]
pub struct SharedBuffer(Arc<spin::Mutex<String>>);

impl SharedBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far.
    pub fn contents(&self) -> String {
        self.0.lock().clone()
    }

    /// Discard everything written so far.
    pub fn clear(&self) {
        self.0.lock().clear();
    }

    fn push_line(&self, line: &str) {
        let mut content = self.0.lock();
        content.push_str(line);
        content.push('\n');
    }
}

/// Destination of tuning progress.
#[derive(Clone, Debug, Default)]
pub enum OutputSink {
    /// Standard output.
    #[default]
    Stdout,
    /// Standard error.
    Stderr,
    /// The `log` crate, at the info level.
    Log,
    /// A file, appended to.
    File(PathBuf),
    /// An in-memory buffer.
    Buffer(SharedBuffer),
}

impl From<&OutputConfig> for OutputSink {
    fn from(value: &OutputConfig) -> Self {
        match value {
            OutputConfig::Stdout => OutputSink::Stdout,
            OutputConfig::Stderr => OutputSink::Stderr,
            OutputConfig::Log => OutputSink::Log,
            OutputConfig::File(path) => OutputSink::File(path.clone()),
        }
    }
}

impl OutputSink {
    fn write_line(&self, line: &str) {
        match self {
            OutputSink::Stdout => println!("{line}"),
            OutputSink::Stderr => eprintln!("{line}"),
            OutputSink::Log => log::info!("{line}"),
            OutputSink::File(path) => {
                let written = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .and_then(|mut file| writeln!(file, "{line}"));
                if let Err(err) = written {
                    log::warn!("Can't write tuning progress to {path:?}: {err}");
                }
            }
            OutputSink::Buffer(buffer) => buffer.push_line(line),
        }
    }
}

/// Reports the progress of a tuning run to an [output sink](OutputSink).
///
/// Reporting never influences which candidate is selected.
#[derive(Debug)]
pub struct TuneLogger {
    sink: OutputSink,
    verbosity: TuneVerbosity,
    progress: String,
}

impl TuneLogger {
    /// Create a logger writing to the given sink.
    pub fn new(sink: OutputSink, verbosity: TuneVerbosity) -> Self {
        Self {
            sink,
            verbosity,
            progress: String::new(),
        }
    }

    /// A tuning run starts.
    pub fn start(&mut self, algorithm: &str, device: &str) {
        if self.verbosity >= TuneVerbosity::Terse {
            self.sink
                .write_line(&format!("Tuning {algorithm} on {device}"));
        }
    }

    /// A candidate ran successfully.
    pub fn candidate(&mut self, parameters: &TuningParameters, score: f64) {
        match self.verbosity {
            TuneVerbosity::Normal => self.progress.push('.'),
            TuneVerbosity::Debug => self.sink.write_line(&format!("  {parameters}: {score:.3}")),
            _ => {}
        }
    }

    /// A candidate failed to build or to run.
    pub fn candidate_failed<R: Display>(&mut self, parameters: &TuningParameters, reason: R) {
        match self.verbosity {
            TuneVerbosity::Normal => self.progress.push('!'),
            TuneVerbosity::Debug => self
                .sink
                .write_line(&format!("  {parameters}: failed ({reason})")),
            _ => {}
        }
    }

    /// The tuning run is over.
    pub fn finish(&mut self, selected: Option<&TuningParameters>) {
        match self.verbosity {
            TuneVerbosity::Normal => {
                let progress = core::mem::take(&mut self.progress);
                self.sink.write_line(&progress);
            }
            TuneVerbosity::Debug => {
                if let Some(selected) = selected {
                    self.sink.write_line(&format!("Selected {selected}"));
                }
            }
            _ => {}
        }
    }
}
