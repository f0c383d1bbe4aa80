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
use std::fs;
use std::path::PathBuf;

use tracing::debug;

use crate::score::resolve::PERCUSSION_KEY;

/// Locators for the instrument keys a soundbank is expected to carry.
/// Unmapped keys fall back to the key-0 locator.
const LOCATORS: &[(u8, &str)] = &[
    (0, "acoustic_grand_piano"),
    (4, "electric_piano"),
    (6, "harpsichord"),
    (16, "drawbar_organ"),
    (19, "church_organ"),
    (24, "acoustic_guitar_nylon"),
    (27, "electric_guitar_clean"),
    (32, "acoustic_bass"),
    (33, "electric_bass_finger"),
    (40, "violin"),
    (42, "cello"),
    (46, "orchestral_harp"),
    (48, "string_ensemble"),
    (56, "trumpet"),
    (57, "trombone"),
    (60, "french_horn"),
    (65, "alto_sax"),
    (68, "oboe"),
    (71, "clarinet"),
    (73, "flute"),
    (80, "square_lead"),
    (81, "sawtooth_lead"),
    (88, "new_age_pad"),
    (PERCUSSION_KEY, "percussion_kit"),
];

/// Resolves an instrument key to its resource locator.
pub fn locator(key: u8) -> &'static str {
    LOCATORS
        .iter()
        .find(|(candidate, _)| *candidate == key)
        .map(|(_, locator)| *locator)
        .unwrap_or(LOCATORS[0].1)
}

/// Fetches instrument definitions from a soundbank directory on disk.
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    /// Creates a fetcher rooted at the given soundbank directory.
    pub fn new(root: impl Into<PathBuf>) -> FileFetcher {
        FileFetcher { root: root.into() }
    }
}

impl super::Fetcher for FileFetcher {
    fn name(&self) -> String {
        self.root.display().to_string()
    }

    fn fetch(&self, key: u8) -> Result<Vec<u8>, Box<dyn Error + Send + Sync>> {
        let path = self.root.join(format!("{}.json", locator(key)));
        debug!(key, path = %path.display(), "Fetching instrument definition.");
        fs::read(&path)
            .map_err(|e| format!("failed to read instrument {}: {}", path.display(), e).into())
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;
    use crate::instrument::{Fetcher, Instrument};

    #[test]
    fn test_unmapped_key_falls_back_to_default_locator() {
        assert_eq!(locator(0), "acoustic_grand_piano");
        assert_eq!(locator(24), "acoustic_guitar_nylon");
        assert_eq!(locator(3), "acoustic_grand_piano");
        assert_eq!(locator(127), "acoustic_grand_piano");
        assert_eq!(locator(PERCUSSION_KEY), "percussion_kit");
    }

    #[test]
    fn test_fetch_from_directory() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let dir = tempfile::tempdir()?;
        let mut file = std::fs::File::create(dir.path().join("violin.json"))?;
        file.write_all(br#"{"name": "Violin"}"#)?;

        let fetcher = FileFetcher::new(dir.path());
        let instrument = Instrument::parse(&fetcher.fetch(40)?)?;
        assert_eq!(instrument.name(), "Violin");

        // Key 41 is unmapped and resolves to the key-0 locator, which this
        // bank does not carry.
        assert!(fetcher.fetch(41).is_err());
        Ok(())
    }
}
