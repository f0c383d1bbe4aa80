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
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// A mock fetcher. Serves canned instrument definitions and keeps per-key
/// fetch counts so tests can assert load deduplication.
pub struct Fetcher {
    name: String,
    delay: Duration,
    fetches: Mutex<HashMap<u8, usize>>,
    fail_keys: Mutex<HashSet<u8>>,
}

impl Fetcher {
    /// Gets the given mock fetcher.
    pub fn get(name: &str) -> Fetcher {
        Fetcher::with_delay(name, Duration::ZERO)
    }

    /// Gets a mock fetcher that simulates fetch latency.
    pub fn with_delay(name: &str, delay: Duration) -> Fetcher {
        Fetcher {
            name: name.to_string(),
            delay,
            fetches: Mutex::new(HashMap::new()),
            fail_keys: Mutex::new(HashSet::new()),
        }
    }

    /// Makes fetches for the given key fail.
    pub fn fail_key(&self, key: u8) {
        self.fail_keys
            .lock()
            .expect("unable to get fail keys lock")
            .insert(key);
    }

    /// The number of fetches issued for the given key.
    pub fn fetch_count(&self, key: u8) -> usize {
        *self
            .fetches
            .lock()
            .expect("unable to get fetches lock")
            .get(&key)
            .unwrap_or(&0)
    }
}

impl super::Fetcher for Fetcher {
    fn name(&self) -> String {
        format!("{} (Mock)", self.name)
    }

    fn fetch(&self, key: u8) -> Result<Vec<u8>, Box<dyn Error + Send + Sync>> {
        {
            let mut fetches = self.fetches.lock().expect("unable to get fetches lock");
            *fetches.entry(key).or_insert(0) += 1;
        }

        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        if self
            .fail_keys
            .lock()
            .expect("unable to get fail keys lock")
            .contains(&key)
        {
            return Err(format!("mock fetch failure for key {}", key).into());
        }

        Ok(format!(r#"{{"name": "mock-{}", "partials": [1.0, 0.25]}}"#, key).into_bytes())
    }
}
