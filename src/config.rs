//! Environment driven configuration.

use std::path::PathBuf;

/// Restricts the run to cases whose title contains this substring.
pub const FILTER_VAR: &str = "TESTONLY";

/// Overrides the snapshot file location.
pub const SNAPSHOT_PATH_VAR: &str = "NESTRUN_SNAPSHOT_PATH";

/// Forces snapshot update mode when set to `1` or `true`.
pub const UPDATE_SNAPSHOTS_VAR: &str = "NESTRUN_UPDATE_SNAPSHOTS";

pub const DEFAULT_SNAPSHOT_PATH: &str = ".nestrun.snap";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub filter: Option<String>,
    pub snapshot_path: PathBuf,
    pub update_snapshots: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            filter: None,
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
            update_snapshots: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build a config from `(name, value)` pairs, unknown names are ignored.
    pub fn from_vars<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut config = Config::default();
        for (key, value) in vars {
            let value = value.into();
            match key.as_ref() {
                FILTER_VAR if !value.is_empty() => config.filter = Some(value),
                SNAPSHOT_PATH_VAR if !value.is_empty() => config.snapshot_path = value.into(),
                UPDATE_SNAPSHOTS_VAR => config.update_snapshots = matches!(value.as_str(), "1" | "true"),
                _ => {}
            }
        }
        config
    }

    pub fn with_filter(self, filter: impl Into<String>) -> Self {
        let filter = filter.into();
        Self {
            filter: (!filter.is_empty()).then_some(filter),
            ..self
        }
    }

    pub fn with_snapshot_path(self, path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: path.into(),
            ..self
        }
    }

    pub fn with_update_snapshots(self, update: bool) -> Self {
        Self {
            update_snapshots: update,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::from_vars(Vec::<(String, String)>::new());
        assert_eq!(config, Config::default());
        assert_eq!(config.snapshot_path, PathBuf::from(".nestrun.snap"));
    }

    #[test]
    fn reads_known_vars() {
        let config = Config::from_vars([
            ("TESTONLY", "Group A"),
            ("NESTRUN_SNAPSHOT_PATH", "snaps/all.snap"),
            ("NESTRUN_UPDATE_SNAPSHOTS", "true"),
            ("PATH", "/usr/bin"),
        ]);
        assert_eq!(config.filter.as_deref(), Some("Group A"));
        assert_eq!(config.snapshot_path, PathBuf::from("snaps/all.snap"));
        assert!(config.update_snapshots);
    }

    #[test]
    fn empty_filter_is_no_filter() {
        let config = Config::from_vars([("TESTONLY", "")]);
        assert_eq!(config.filter, None);
        assert_eq!(Config::default().with_filter("").filter, None);
    }

    #[test]
    fn update_mode_needs_exact_value() {
        for (value, expected) in [("1", true), ("true", true), ("yes", false), ("TRUE", false)] {
            let config = Config::from_vars([("NESTRUN_UPDATE_SNAPSHOTS", value)]);
            assert_eq!(config.update_snapshots, expected, "value {value:?}");
        }
    }
}
