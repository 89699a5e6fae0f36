//! Pipeline configuration

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Default bucket holding uploaded ledger files
pub const DEFAULT_BUCKET: &str = "ledger-bucket";

/// Default folder (key prefix) inside the bucket
pub const DEFAULT_FOLDER: &str = "files";

/// Default location tag written on file records
pub const DEFAULT_LOCATION: &str = "object-store";

/// Where uploaded files live and where they are staged during processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub bucket: String,
    pub folder: String,
    /// Location tag recorded on registered files
    pub location: String,
    /// Directory for per-run staged copies
    pub staging_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.to_string(),
            folder: DEFAULT_FOLDER.to_string(),
            location: DEFAULT_LOCATION.to_string(),
            staging_dir: env::temp_dir().join("ledger-staging"),
        }
    }
}

impl PipelineConfig {
    /// Build configuration from environment variables.
    ///
    /// Reads:
    /// - `LEDGER_BUCKET`: bucket name (default: "ledger-bucket")
    /// - `LEDGER_FOLDER`: key prefix (default: "files")
    /// - `LEDGER_LOCATION`: location tag (default: "object-store")
    /// - `LEDGER_STAGING_DIR`: staging directory (default: `<tmp>/ledger-staging`)
    ///
    /// Empty values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bucket: non_empty_var("LEDGER_BUCKET").unwrap_or(defaults.bucket),
            folder: non_empty_var("LEDGER_FOLDER").unwrap_or(defaults.folder),
            location: non_empty_var("LEDGER_LOCATION").unwrap_or(defaults.location),
            staging_dir: non_empty_var("LEDGER_STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.staging_dir),
        }
    }

    /// Use a different staging directory
    pub fn with_staging_dir(mut self, staging_dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = staging_dir.into();
        self
    }

    /// Object key for a file name: `<folder>/<name>`
    pub fn object_key(&self, name: &str) -> String {
        let folder = self.folder.trim_end_matches('/');
        if folder.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", folder, name)
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}
