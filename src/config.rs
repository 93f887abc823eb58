//! TOML configuration.
//!
//! ```toml
//! [crossmatch]
//! tolerance_arcsec = 1.0
//!
//! [fetch]
//! max_concurrency = 8
//! timeout_ms = 30000
//! max_retries = 3
//! backoff_ms = 200
//!
//! [layout]
//! split = "train"
//! index_partition = "_index"
//! partition_column = "healpix"
//! ```
//!
//! Every key is optional.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::catalog::Layout;
use crate::crossmatch::CrossmatchConfig;
use crate::error::{MatchError, Result};
use crate::fetch::FetchConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub crossmatch: CrossmatchConfig,
    pub fetch: FetchConfig,
    pub layout: Layout,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MatchError::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| MatchError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.crossmatch.validate()?;
        self.fetch.validate()?;
        for (key, value) in [
            ("layout.split", &self.layout.split),
            ("layout.index_partition", &self.layout.index_partition),
            ("layout.partition_column", &self.layout.partition_column),
        ] {
            if value.trim().is_empty() || value.contains('/') {
                return Err(MatchError::Config(format!(
                    "{key} must be a non-empty name without '/', got {value:?}"
                )));
            }
        }
        if self.layout.index_partition.starts_with(&format!("{}=", self.layout.partition_column)) {
            return Err(MatchError::Config(
                "layout.index_partition must not look like a data partition".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.crossmatch.tolerance_arcsec, 1.0);
        assert_eq!(config.fetch.max_concurrency, 8);
        assert_eq!(config.layout.partition_column, "healpix");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [crossmatch]
            tolerance_arcsec = 1.5

            [fetch]
            max_retries = 5

            [layout]
            split = "all"
            "#,
        )
        .unwrap();
        assert_eq!(config.crossmatch.tolerance_arcsec, 1.5);
        assert_eq!(config.fetch.max_retries, 5);
        assert_eq!(config.fetch.timeout_ms, 30_000);
        assert_eq!(config.layout.split, "all");
        assert_eq!(config.layout.index_partition, "_index");
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(matches!(
            Config::from_toml("[crossmatch]\ntolerance_arcsec = -1.0"),
            Err(MatchError::InvalidTolerance { .. })
        ));
        assert!(matches!(
            Config::from_toml("[fetch]\nmax_concurrency = 0"),
            Err(MatchError::Config(_))
        ));
        assert!(matches!(
            Config::from_toml("[layout]\npartition_column = \"\""),
            Err(MatchError::Config(_))
        ));
        assert!(matches!(
            Config::from_toml("[layout]\nindex_partition = \"healpix=0\""),
            Err(MatchError::Config(_))
        ));
        assert!(matches!(Config::from_toml("[unknown]\nx = 1"), Err(MatchError::Config(_))));
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skyjoin.toml");
        std::fs::write(&path, "[fetch]\ntimeout_ms = 1000\n").unwrap();
        assert_eq!(Config::from_file(&path).unwrap().fetch.timeout_ms, 1000);

        let missing = dir.path().join("nope.toml");
        assert!(matches!(Config::from_file(&missing), Err(MatchError::Config(_))));
    }
}
