//! Session index maintenance.
//!
//! The index maps `session_id` to the aggregate holding it. It is a cache:
//! aggregates are authoritative, and the index is rebuilt from them whenever
//! it is missing, corrupt or stale.

use std::path::Path;

use crate::models::{MonthlyAggregate, SessionIndex};
use crate::storage::{DocumentStore, MemoryLayout, ReadOutcome};
use crate::{Error, Result};

/// Reads and repairs the session index of one project.
#[derive(Debug, Clone)]
pub struct IndexService {
    layout: MemoryLayout,
    store: DocumentStore,
}

impl IndexService {
    /// Creates a service for a layout.
    #[must_use]
    pub const fn new(layout: MemoryLayout, store: DocumentStore) -> Self {
        Self { layout, store }
    }

    /// Records that `session_id` lives in `aggregate`, under lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is corrupt or cannot be written.
    pub fn record(&self, session_id: &str, aggregate: &str) -> Result<()> {
        self.store
            .update::<SessionIndex, _>(&self.layout.index_path(), |index| {
                index.insert(session_id, aggregate);
                Ok(())
            })
    }

    /// Finds the aggregate holding a session from the index alone.
    ///
    /// An entry is trusted only if the aggregate it names contains the
    /// session. Unlike [`locate`](Self::locate), a miss never triggers a
    /// rebuild.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is corrupt or unreadable.
    pub fn lookup(&self, session_id: &str) -> Result<Option<String>> {
        let path = self.layout.index_path();
        let index = self.store.read::<SessionIndex>(&path)?.or_default(&path)?;
        match index.get(session_id) {
            Some(name) if self.aggregate_contains(name, session_id)? => Ok(Some(name.to_string())),
            _ => Ok(None),
        }
    }

    /// Builds an index by scanning every readable aggregate.
    ///
    /// Corrupt aggregates are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the episodic directory cannot be listed.
    pub fn scan(&self) -> Result<SessionIndex> {
        let mut index = SessionIndex::new();
        for path in self.layout.aggregate_paths()? {
            let name = file_name(&path);
            match self.store.read::<MonthlyAggregate>(&path)? {
                ReadOutcome::Loaded(aggregate) => {
                    for session in &aggregate.sessions {
                        index.insert(session.session_id.clone(), name.clone());
                    }
                },
                ReadOutcome::Corrupt(reason) => {
                    tracing::warn!(aggregate = %name, reason = %reason, "Skipping corrupt aggregate while indexing");
                },
                ReadOutcome::Missing => {},
            }
        }
        Ok(index)
    }

    /// Rewrites the index from the aggregates. Returns the number of entries.
    ///
    /// The index lock is held from before the scan until the write, so a
    /// concurrent [`record`](Self::record) lands either before the scan or
    /// after the rewrite.
    ///
    /// # Errors
    ///
    /// Returns an error if scanning or writing fails.
    #[tracing::instrument(skip(self), fields(root = %self.layout.root().display()))]
    pub fn rebuild(&self) -> Result<usize> {
        let path = self.layout.index_path();
        let _lock = self.store.lock(&path)?;
        let index = self.scan()?;
        self.store.write(&path, &index)?;
        tracing::info!(entries = index.len(), "Rebuilt session index");
        Ok(index.len())
    }

    /// Finds the aggregate holding a session.
    ///
    /// Trusts the index only after confirming the session is present in the
    /// referenced aggregate; otherwise rebuilds the index and retries.
    ///
    /// # Errors
    ///
    /// Returns an error if the index has to be rebuilt and that fails.
    pub fn locate(&self, session_id: &str) -> Result<Option<String>> {
        if let ReadOutcome::Loaded(index) = self.store.read::<SessionIndex>(&self.layout.index_path())? {
            if let Some(name) = index.get(session_id) {
                if self.aggregate_contains(name, session_id)? {
                    return Ok(Some(name.to_string()));
                }
                tracing::debug!(session_id, aggregate = name, "Stale index entry");
            }
        }

        tracing::debug!(session_id, "Index miss, rebuilding from aggregates");
        self.rebuild()?;
        let index = self
            .store
            .read::<SessionIndex>(&self.layout.index_path())?
            .loaded()
            .ok_or_else(|| Error::operation("locate_session", "index unreadable after rebuild"))?;
        Ok(index.get(session_id).map(str::to_string))
    }

    /// Entries that point at an aggregate that is missing or lacks the session.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failures.
    pub fn stale_entries(&self, index: &SessionIndex) -> Result<Vec<(String, String)>> {
        let mut stale = Vec::new();
        for (session_id, name) in index.iter() {
            if !self.aggregate_contains(name, session_id)? {
                stale.push((session_id.to_string(), name.to_string()));
            }
        }
        Ok(stale)
    }

    fn aggregate_contains(&self, name: &str, session_id: &str) -> Result<bool> {
        let path = self.layout.aggregate_path_for(name);
        Ok(self
            .store
            .read::<MonthlyAggregate>(&path)?
            .loaded()
            .is_some_and(|aggregate| aggregate.contains(session_id)))
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
