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
use std::error::Error;
use std::sync::Arc;

use serde::Deserialize;

pub mod bank;
pub mod cache;
mod mock;

/// The key of the default instrument, used as a fallback whenever a key
/// cannot be loaded or resolved.
pub const DEFAULT_KEY: u8 = 0;

/// An executable instrument representation, compiled from a fetched
/// definition. Consumed by the sound renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    /// The display name of the instrument.
    name: String,
    /// Attack ramp length in seconds.
    attack_seconds: f64,
    /// Release ramp length in seconds, past the end of the note.
    release_seconds: f64,
    /// Relative amplitudes of the harmonic partials, fundamental first.
    partials: Vec<f32>,
}

/// The serialized shape of an instrument definition. Definitions are plain
/// data deserialized from JSON; nothing fetched is ever executed.
#[derive(Deserialize)]
struct Definition {
    name: String,
    #[serde(default = "Definition::default_attack")]
    attack_seconds: f64,
    #[serde(default = "Definition::default_release")]
    release_seconds: f64,
    #[serde(default)]
    partials: Vec<f32>,
}

impl Definition {
    fn default_attack() -> f64 {
        0.005
    }

    fn default_release() -> f64 {
        0.05
    }
}

impl Instrument {
    /// Parses raw definition bytes into an instrument.
    pub fn parse(bytes: &[u8]) -> Result<Instrument, Box<dyn Error + Send + Sync>> {
        let definition: Definition = serde_json::from_slice(bytes)?;
        Ok(Instrument {
            name: definition.name,
            attack_seconds: definition.attack_seconds,
            release_seconds: definition.release_seconds,
            partials: if definition.partials.is_empty() {
                vec![1.0]
            } else {
                definition.partials
            },
        })
    }

    /// Gets the name of the instrument.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the attack ramp length in seconds.
    pub fn attack_seconds(&self) -> f64 {
        self.attack_seconds
    }

    /// Gets the release ramp length in seconds.
    pub fn release_seconds(&self) -> f64 {
        self.release_seconds
    }

    /// Gets the relative amplitudes of the harmonic partials.
    pub fn partials(&self) -> &[f32] {
        &self.partials
    }
}

/// Fetches raw instrument-definition bytes for an instrument key.
pub trait Fetcher: Send + Sync {
    /// Returns the name of the fetcher.
    fn name(&self) -> String;

    /// Fetches the definition bytes for the given key.
    fn fetch(&self, key: u8) -> Result<Vec<u8>, Box<dyn Error + Send + Sync>>;
}

/// Gets a fetcher for the given soundbank location.
pub fn get_fetcher(soundbank: &str) -> Arc<dyn Fetcher> {
    if soundbank.starts_with("mock") {
        return Arc::new(mock::Fetcher::get(soundbank));
    }

    Arc::new(bank::FileFetcher::new(soundbank))
}
