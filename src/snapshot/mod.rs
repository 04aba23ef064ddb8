//! Value snapshots shared by a whole run.
//!
//! The [`SnapshotStore`] is one flat, keyed namespace of serialized values
//! backed by a single file. It is loaded lazily the first time a case claims
//! a title, mutated in memory while cases run and written back at most once,
//! at the end of the run, and only if an entry was added or updated.
//!
//! Keys are either an explicit snapshot name or `"{case title} {ordinal}"`,
//! where the ordinal counts the unnamed snapshots of one attempt. Because the
//! namespace is flat, case titles must be unique across the whole run: the
//! first case instance to claim a title owns it.
//!
//! The backing file is a JSON object mapping keys to serialized values, keys
//! sorted and indented by two spaces so it diffs well under version control.
//! Values are rendered with [`format::serialize`].

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fs, io,
    path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::{debug, warn};

use crate::{config::Config, error::UsageError, report::CaseId};

pub mod format;

/// What a comparison did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotChange {
    Unchanged,
    New,
    Updated,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub new: usize,
    pub updated: usize,
}

impl SnapshotSummary {
    pub fn is_empty(&self) -> bool {
        self.new == 0 && self.updated == 0
    }
}

#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    update: bool,
    entries: Option<BTreeMap<String, String>>,
    new: BTreeSet<String>,
    updated: BTreeSet<String>,
    owners: HashMap<String, CaseId>,
    flushed: bool,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            update: false,
            entries: None,
            new: BTreeSet::new(),
            updated: BTreeSet::new(),
            owners: HashMap::new(),
            flushed: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.snapshot_path).with_update(config.update_snapshots)
    }

    pub fn with_update(self, update: bool) -> Self {
        Self { update, ..self }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_update_mode(&self) -> bool {
        self.update
    }

    pub fn is_loaded(&self) -> bool {
        self.entries.is_some()
    }

    /// Point the store at another file and set the update mode.
    ///
    /// Only possible before the store was loaded.
    pub fn configure(&mut self, path: impl Into<PathBuf>, update: bool) -> Result<(), UsageError> {
        if self.is_loaded() {
            return Err(UsageError::ConfigureAfterLoad(self.path.clone()));
        }
        self.path = path.into();
        self.update = update;
        Ok(())
    }

    fn entries(&mut self) -> &mut BTreeMap<String, String> {
        let path = &self.path;
        self.entries.get_or_insert_with(|| load(path))
    }

    /// Claim `title` for the case `owner`.
    ///
    /// Claiming the same title again from the same case is fine (retries),
    /// from another case it is a [`UsageError::DuplicateTitle`].
    pub fn claim_title(&mut self, title: &str, owner: CaseId) -> Result<(), UsageError> {
        self.entries();
        match self.owners.get(title) {
            Some(existing) if *existing != owner => {
                Err(UsageError::DuplicateTitle(title.to_string()))
            }
            Some(_) => Ok(()),
            None => {
                self.owners.insert(title.to_string(), owner);
                Ok(())
            }
        }
    }

    /// Serialize `value` and compare it against the entry stored under `key`.
    pub fn compare<T: Serialize + ?Sized>(
        &mut self,
        key: &str,
        value: &T,
    ) -> Result<SnapshotChange, UsageError> {
        let value = serde_json::to_value(value).map_err(|err| UsageError::Unserializable {
            key: key.to_string(),
            message: err.to_string(),
        })?;
        self.compare_serialized(key, format::serialize(&value))
    }

    /// Compare an already serialized value against the entry stored under `key`.
    pub fn compare_serialized(
        &mut self,
        key: &str,
        serialized: String,
    ) -> Result<SnapshotChange, UsageError> {
        let touched = self.new.contains(key) || self.updated.contains(key);
        let update = self.update;
        let entries = self.entries();

        if touched {
            // written earlier in this run, only a retry writing the same value is fine
            return match entries.get(key) == Some(&serialized) {
                true => Ok(SnapshotChange::Unchanged),
                false => Err(UsageError::DuplicateSnapshotKey(key.to_string())),
            };
        }

        let Some(existing) = entries.get(key) else {
            entries.insert(key.to_string(), serialized);
            self.new.insert(key.to_string());
            return Ok(SnapshotChange::New);
        };

        if *existing == serialized {
            return Ok(SnapshotChange::Unchanged);
        }

        match update {
            true => {
                entries.insert(key.to_string(), serialized);
                self.updated.insert(key.to_string());
                Ok(SnapshotChange::Updated)
            }
            false => Err(UsageError::SnapshotMismatch {
                key: key.to_string(),
                expected: existing.clone(),
                received: serialized,
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.as_ref()?.get(key).map(String::as_str)
    }

    pub fn is_dirty(&self) -> bool {
        !self.new.is_empty() || !self.updated.is_empty()
    }

    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            new: self.new.len(),
            updated: self.updated.len(),
        }
    }

    /// Write the store to its file if anything changed.
    ///
    /// Returns whether the file was written. Only the first call can write.
    pub fn flush(&mut self) -> io::Result<bool> {
        if self.flushed || !self.is_dirty() {
            return Ok(false);
        }
        let Some(entries) = &self.entries else {
            return Ok(false);
        };
        self.flushed = true;

        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let mut content = serde_json::to_string_pretty(entries)?;
        content.push('\n');
        fs::write(&self.path, content)?;

        debug!(
            path = %self.path.display(),
            new = self.new.len(),
            updated = self.updated.len(),
            "snapshots written"
        );
        Ok(true)
    }
}

fn load(path: &Path) -> BTreeMap<String, String> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no snapshot file yet");
            return BTreeMap::new();
        }
        Err(err) => {
            warn!(path = %path.display(), %err, "cannot read snapshot file, starting empty");
            return BTreeMap::new();
        }
    };

    match serde_json::from_str(&content) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(path = %path.display(), %err, "malformed snapshot file, starting empty");
            BTreeMap::new()
        }
    }
}
