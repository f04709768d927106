//! Persisted set of hosts that answered a probe
//!
//! Quick scans only look at these (plus localhost), so the set is written
//! back to disk whenever it grows.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ScanError;

#[derive(Debug, Serialize, Deserialize)]
struct KnownHostsFile {
    hosts: Vec<String>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct KnownHosts {
    path: Option<PathBuf>,
    hosts: Mutex<BTreeSet<String>>,
}

impl KnownHosts {
    /// A set that is never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the set from `path`; a missing file yields an empty set
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ScanError> {
        let path = path.into();
        let hosts = match std::fs::read_to_string(&path) {
            Ok(raw) => {
                let file: KnownHostsFile = serde_json::from_str(&raw)?;
                file.hosts.into_iter().collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: Some(path),
            hosts: Mutex::new(hosts),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn hosts(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    pub fn contains(&self, host: &str) -> bool {
        self.lock().contains(host)
    }

    /// Adds hosts, returning true when the set grew
    pub fn extend<I>(&self, hosts: I) -> bool
    where
        I: IntoIterator<Item = String>,
    {
        let mut set = self.lock();
        let before = set.len();
        set.extend(hosts);
        set.len() != before
    }

    /// Writes the set to its file, if it has one
    pub fn save(&self) -> Result<(), ScanError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let file = KnownHostsFile {
            hosts: self.hosts(),
            updated_at: Utc::now(),
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.hosts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
