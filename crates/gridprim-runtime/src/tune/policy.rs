use crate::config::{GlobalConfig, OutputSink, TuneLogger, autotune::TuneVerbosity};

/// Governs whether and how loudly tuning runs.
#[derive(Clone, Debug)]
pub struct TunePolicy {
    /// Whether tuning may run. When disabled, only cached parameters can be used.
    pub enabled: bool,
    /// How much progress is reported.
    pub verbosity: TuneVerbosity,
    /// Where progress is reported.
    pub output: OutputSink,
}

impl Default for TunePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            verbosity: TuneVerbosity::default(),
            output: OutputSink::default(),
        }
    }
}

impl TunePolicy {
    /// Create a policy.
    pub fn new(enabled: bool, verbosity: TuneVerbosity, output: OutputSink) -> Self {
        Self {
            enabled,
            verbosity,
            output,
        }
    }

    /// The policy described by the [global config](GlobalConfig).
    pub fn from_config() -> Self {
        let config = GlobalConfig::get();

        Self {
            enabled: config.autotune.enabled,
            verbosity: config.autotune.verbosity,
            output: OutputSink::from(&config.autotune.output),
        }
    }

    /// A policy that tunes without reporting anything.
    pub fn silent() -> Self {
        Self::default().with_verbosity(TuneVerbosity::Silent)
    }

    /// Enable or disable tuning.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the verbosity.
    pub fn with_verbosity(mut self, verbosity: TuneVerbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set the output sink.
    pub fn with_output(mut self, output: OutputSink) -> Self {
        self.output = output;
        self
    }

    pub(crate) fn logger(&self) -> TuneLogger {
        TuneLogger::new(self.output.clone(), self.verbosity)
    }
}
