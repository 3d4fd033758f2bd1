use std::collections::HashMap;

use chrono::{DateTime, Local};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::backend::{Backend, BackendError, Selection, decode_rows};
use crate::list::ListKey;
use crate::query::Query;

/// Group of cache keys that a mutation invalidates together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    Projects,
    Tasks,
    TimeEntries,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Projects,
    /// Every task, joined with its project's name.
    Tasks,
    /// Tasks offered for one project.
    TasksFor(String),
    TimeEntries(ListKey),
}

impl QueryKey {
    pub fn family(&self) -> KeyFamily {
        match self {
            QueryKey::Projects => KeyFamily::Projects,
            QueryKey::Tasks | QueryKey::TasksFor(_) => KeyFamily::Tasks,
            QueryKey::TimeEntries(_) => KeyFamily::TimeEntries,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CachedSelection {
    pub data: Selection,
    pub fetched_at: DateTime<Local>,
}

#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub rows: Vec<T>,
    pub total: Option<usize>,
}

#[derive(Debug, Default)]
pub struct QueryCache {
    entries: HashMap<QueryKey, CachedSelection>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh data for `key`, if any.
    pub fn get(&self, key: &QueryKey) -> Option<&CachedSelection> {
        self.entries.get(key)
    }

    pub fn put(&mut self, key: QueryKey, data: Selection) {
        self.entries.insert(
            key,
            CachedSelection {
                data,
                fetched_at: Local::now(),
            },
        );
    }

    /// Drops every entry in `family`; the next read refetches.
    pub fn invalidate(&mut self, family: KeyFamily) {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.family() != family);
        let dropped = before - self.entries.len();
        debug!(?family, dropped, "invalidated cached queries");
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Serves `key` from the cache, or runs `query` and caches the result.
    pub fn fetch<T: DeserializeOwned>(
        &mut self,
        backend: &dyn Backend,
        key: QueryKey,
        query: &Query,
    ) -> Result<Fetched<T>, BackendError> {
        let selection = match self.get(&key) {
            Some(cached) => cached.data.clone(),
            None => {
                let selection = backend.select(query)?;
                self.put(key, selection.clone());
                selection
            }
        };
        Ok(Fetched {
            rows: decode_rows(selection.rows)?,
            total: selection.total,
        })
    }
}
