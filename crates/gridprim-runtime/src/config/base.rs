use super::autotune::{AutotuneCache, AutotuneConfig, TuneVerbosity};
use std::sync::Arc;

/// Static mutex holding the global configuration, initialized as `None`.
static GRIDPRIM_GLOBAL_CONFIG: spin::Mutex<Option<Arc<GlobalConfig>>> = spin::Mutex::new(None);

/// Environment variable overriding the cache root directory.
pub const ENV_CACHE_DIR: &str = "GRIDPRIM_CACHE_DIR";
/// Environment variable enabling (`1`, `true`) or disabling (`0`, `false`) autotuning.
pub const ENV_AUTOTUNE: &str = "GRIDPRIM_AUTOTUNE";
/// Environment variable overriding the tuning verbosity.
pub const ENV_AUTOTUNE_LOG: &str = "GRIDPRIM_AUTOTUNE_LOG";

/// Represents the global configuration for gridprim.
#[derive(Default, Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GlobalConfig {
    /// Configuration for autotuning.
    #[serde(default)]
    pub autotune: AutotuneConfig,
}

impl GlobalConfig {
    /// Retrieves the current global configuration, loading it from the current directory if not
    /// set.
    ///
    /// If no configuration is set, it attempts to load one from `gridprim.toml` in the current
    /// directory or its parents, then applies the environment overrides. If no file is found, a
    /// default configuration is used.
    pub fn get() -> Arc<Self> {
        let mut state = GRIDPRIM_GLOBAL_CONFIG.lock();

        match state.as_ref() {
            Some(config) => config.clone(),
            None => {
                cfg_if::cfg_if! {
                    if #[cfg(std_io)] {
                        let config = Self::from_current_dir().override_from_env();
                    } else {
                        let config = Self::default().override_from_env();
                    }
                }
                let config = Arc::new(config);
                *state = Some(config.clone());
                config
            }
        }
    }

    /// Sets the global configuration to the provided value.
    ///
    /// # Panics
    /// Panics if the configuration has already been set or read, as it cannot be overridden.
    pub fn set(config: Self) {
        let mut state = GRIDPRIM_GLOBAL_CONFIG.lock();
        if state.is_some() {
            panic!("Cannot set the global configuration multiple times.");
        }
        *state = Some(Arc::new(config));
    }

    #[cfg(std_io)]
    /// Save the current configuration to the provided file path.
    pub fn save_default<P: AsRef<std::path::Path>>(path: P) -> std::io::Result<()> {
        let config = Self::get();
        let content = toml::to_string_pretty(config.as_ref()).map_err(std::io::Error::other)?;
        std::fs::write(path, content)
    }

    /// Overrides configuration fields based on environment variables.
    pub fn override_from_env(self) -> Self {
        self.override_from(|name| std::env::var(name).ok())
    }

    /// Overrides configuration fields from the provided variable lookup.
    pub fn override_from<F: Fn(&str) -> Option<String>>(mut self, var: F) -> Self {
        if let Some(val) = var(ENV_CACHE_DIR) {
            if !val.is_empty() {
                self.autotune.cache = AutotuneCache::File(val.into());
            }
        }

        if let Some(val) = var(ENV_AUTOTUNE) {
            match val.as_str() {
                "0" | "false" => self.autotune.enabled = false,
                "1" | "true" => self.autotune.enabled = true,
                other => log::warn!("Ignoring {ENV_AUTOTUNE}={other}, expected a boolean"),
            }
        }

        if let Some(val) = var(ENV_AUTOTUNE_LOG) {
            match TuneVerbosity::parse(&val) {
                Some(verbosity) => self.autotune.verbosity = verbosity,
                None => log::warn!("Ignoring {ENV_AUTOTUNE_LOG}={val}, unknown verbosity"),
            }
        }

        self
    }

    /// Parse a configuration from its toml representation.
    #[cfg(feature = "std")]
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    // Loads configuration from `gridprim.toml` in the current directory or its parents.
    //
    // Traverses up the directory tree until a valid configuration file is found or the root is
    // reached. A file that can't be parsed is reported and skipped.
    #[cfg(std_io)]
    fn from_current_dir() -> Self {
        let Ok(mut dir) = std::env::current_dir() else {
            return Self::default();
        };

        loop {
            let path = dir.join("gridprim.toml");
            if let Ok(content) = std::fs::read_to_string(&path) {
                match Self::from_toml(&content) {
                    Ok(config) => return config,
                    Err(err) => log::warn!("Ignoring malformed config file {path:?}: {err}"),
                }
            }

            if !dir.pop() {
                break;
            }
        }

        Self::default()
    }
}
