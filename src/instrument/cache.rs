// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Deduplicated asynchronous loading and caching of instruments.
//!
//! The cache lives for the life of the player instance, so instruments are
//! fetched at most once across plays.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::{Fetcher, Instrument, DEFAULT_KEY};

/// One cache slot. The cell encodes the entry states: an absent slot is
/// unloaded, an initializing cell is loading (all concurrent requesters
/// share the single in-flight load), `Some` is loaded and `None` is a
/// terminal failure that is never retried.
type Entry = Arc<OnceCell<Option<Arc<Instrument>>>>;

/// A deduplicated loader and cache for instrument resources, keyed by
/// instrument key.
pub struct InstrumentCache {
    fetcher: Arc<dyn Fetcher>,
    entries: Mutex<HashMap<u8, Entry>>,
}

impl InstrumentCache {
    /// Creates a new cache over the given fetcher.
    pub fn new(fetcher: Arc<dyn Fetcher>) -> InstrumentCache {
        InstrumentCache {
            fetcher,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Loads the instrument for the given key, reusing a cached handle or an
    /// in-flight load when one exists. Returns None if the key is
    /// permanently unavailable.
    pub async fn load(&self, key: u8) -> Option<Arc<Instrument>> {
        let entry = self.entry(key);
        entry
            .get_or_init(|| self.load_uncached(key))
            .await
            .clone()
    }

    /// Returns the loaded handle for the key without performing any I/O,
    /// falling back to the default instrument when the key is unavailable.
    pub fn handle(&self, key: u8) -> Option<Arc<Instrument>> {
        self.loaded(key).or_else(|| self.loaded(DEFAULT_KEY))
    }

    /// Loads all of the given keys concurrently and waits for every load to
    /// settle. One key failing never aborts the batch.
    pub async fn preload(self: &Arc<Self>, keys: impl IntoIterator<Item = u8>) {
        let mut loads = JoinSet::new();
        for key in keys {
            let cache = Arc::clone(self);
            loads.spawn(async move {
                cache.load(key).await;
            });
        }
        while loads.join_next().await.is_some() {}
    }

    /// Gets or creates the slot for a key. There is no suspension between
    /// the lookup and the cell claim, so two concurrent loads for the same
    /// key always land on the same cell.
    fn entry(&self, key: u8) -> Entry {
        self.entries
            .lock()
            .expect("unable to get cache lock")
            .entry(key)
            .or_default()
            .clone()
    }

    /// The settled handle for a key, if any.
    fn loaded(&self, key: u8) -> Option<Arc<Instrument>> {
        self.entries
            .lock()
            .expect("unable to get cache lock")
            .get(&key)
            .and_then(|entry| entry.get())
            .and_then(|handle| handle.clone())
    }

    /// Fetches and installs an instrument. On failure the already-loaded
    /// default instrument is substituted under the key when available;
    /// otherwise the key is marked permanently unavailable.
    async fn load_uncached(&self, key: u8) -> Option<Arc<Instrument>> {
        let fetcher = self.fetcher.clone();
        let result = tokio::task::spawn_blocking(move || {
            fetcher
                .fetch(key)
                .and_then(|bytes| Instrument::parse(&bytes))
        })
        .await;

        match result {
            Ok(Ok(instrument)) => {
                info!(key, instrument = instrument.name(), "Loaded instrument.");
                Some(Arc::new(instrument))
            }
            Ok(Err(e)) => {
                warn!(key, err = e.to_string(), "Error loading instrument.");
                self.substitute_default(key)
            }
            Err(e) => {
                warn!(key, err = e.to_string(), "Instrument load task failed.");
                self.substitute_default(key)
            }
        }
    }

    fn substitute_default(&self, key: u8) -> Option<Arc<Instrument>> {
        match self.loaded(DEFAULT_KEY) {
            Some(fallback) => {
                info!(key, "Substituting the default instrument.");
                Some(fallback)
            }
            None => {
                warn!(key, "No instrument available, marking key unavailable.");
                None
            }
        }
    }
}

impl std::fmt::Debug for InstrumentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock().expect("unable to get cache lock");
        f.debug_struct("InstrumentCache")
            .field("fetcher", &self.fetcher.name())
            .field("entries", &entries.len())
            .finish()
    }
}
