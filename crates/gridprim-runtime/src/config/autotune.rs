use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Autotuning configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutotuneConfig {
    /// Whether tuning may run when the cache has no usable entry.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// How much tuning progress is reported.
    #[serde(default)]
    pub verbosity: TuneVerbosity,
    /// Where tuning progress is reported.
    #[serde(default)]
    pub output: OutputConfig,
    /// Where tuning results are persisted.
    #[serde(default)]
    pub cache: AutotuneCache,
}

impl Default for AutotuneConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            verbosity: TuneVerbosity::default(),
            output: OutputConfig::default(),
            cache: AutotuneCache::default(),
        }
    }
}

fn enabled_default() -> bool {
    true
}

/// Amount of tuning progress written to the output sink.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TuneVerbosity {
    /// Nothing is written.
    #[serde(rename = "silent")]
    Silent,
    /// One line per tuning run.
    #[serde(rename = "terse")]
    Terse,
    /// One line per tuning run and one character per candidate.
    #[default]
    #[serde(rename = "normal")]
    Normal,
    /// One line per candidate with its score, and the selected parameters.
    #[serde(rename = "debug")]
    Debug,
}

impl TuneVerbosity {
    /// Parse a verbosity name, as accepted in the configuration file.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "silent" | "0" => Some(Self::Silent),
            "terse" | "1" => Some(Self::Terse),
            "normal" | "2" => Some(Self::Normal),
            "debug" | "3" => Some(Self::Debug),
            _ => None,
        }
    }
}

/// Destination of tuning progress in the configuration file.
#[derive(Default, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputConfig {
    /// Standard output.
    #[default]
    Stdout,
    /// Standard error.
    Stderr,
    /// The `log` crate, at the info level.
    Log,
    /// A file, appended to.
    File(PathBuf),
}

/// Location of the persistent tuning cache.
#[derive(Default, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutotuneCache {
    /// The current directory.
    Local,
    /// The `target` directory of the enclosing cargo project.
    Target,
    /// The user cache directory.
    #[default]
    Global,
    /// A specific directory.
    File(PathBuf),
}

impl AutotuneCache {
    /// The root directory of the cache.
    pub fn root(&self) -> PathBuf {
        let current_dir = || std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        match self {
            AutotuneCache::Local => current_dir().join("gridprim-cache"),
            AutotuneCache::Target => {
                let start_dir = current_dir();
                let mut dir = start_dir.clone();

                loop {
                    if let Ok(true) = std::fs::exists(dir.join("Cargo.toml")) {
                        return dir.join("target").join("gridprim");
                    }

                    if !dir.pop() {
                        break;
                    }
                }

                start_dir.join("target").join("gridprim")
            }
            AutotuneCache::Global => global_root(),
            AutotuneCache::File(path_buf) => path_buf.clone(),
        }
    }
}

#[cfg(feature = "std")]
fn global_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("gridprim")
}

#[cfg(not(feature = "std"))]
fn global_root() -> PathBuf {
    std::env::temp_dir().join("gridprim")
}
