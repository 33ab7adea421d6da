use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::{Result, SimError};
use crate::trace::{DEFAULT_TRACE_PATH, MAX_TRACE_DEPTH};

/// File looked up by [`DriverConfig::discover`].
pub const CONFIG_FILE: &str = "sim.yaml";

/// How the driver advances the model each iteration.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    /// Invert the clock, then evaluate. The model lives inline in the driver.
    #[default]
    Clocked,
    /// Evaluate only; the model drives its own clock. The model is boxed.
    SelfTimed,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TraceConfig {
    pub path: Utf8PathBuf,
    pub depth: u32,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            path: Utf8PathBuf::from(DEFAULT_TRACE_PATH),
            depth: MAX_TRACE_DEPTH,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct DriverConfig {
    pub preset: Preset,
    pub trace: TraceConfig,
}

impl DriverConfig {
    pub fn from_yaml_str(yaml: &str, origin: &Utf8Path) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|err| SimError::Config {
            path: origin.to_owned(),
            reason: err.to_string(),
        })
    }

    pub fn load(path: &Utf8Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|err| SimError::Config {
            path: path.to_owned(),
            reason: err.to_string(),
        })?;
        Self::from_yaml_str(&yaml, path)
    }

    /// Load `dir/sim.yaml` if present, otherwise return the defaults.
    pub fn discover(dir: &Utf8Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if path.is_file() {
            log::debug!("loading driver config from {path}");
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }
}
