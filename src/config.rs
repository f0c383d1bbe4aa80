// Copyright (C) 2024 Michael Wilson <mike@mdwn.dev>
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
use std::path::Path;

use serde::Deserialize;

/// The configuration for the player.
#[derive(Debug, Deserialize)]
pub struct Player {
    /// The soundbank to read instrument definitions from.
    soundbank: String,
    /// The sample rate for offline rendering.
    #[serde(default = "Player::default_sample_rate")]
    sample_rate: u32,
    /// The default tempo scale in percent. 100 is original speed.
    #[serde(default = "Player::default_tempo_scale")]
    tempo_scale_percent: u16,
}

impl Player {
    /// Parses the player configuration from a YAML file.
    pub fn parse(file: &Path) -> Result<Player, Box<dyn Error>> {
        let config: Player = serde_yml::from_str(&fs::read_to_string(file)?)
            .map_err(|e| format!("error parsing file {}: {}", file.display(), e))?;
        if config.tempo_scale_percent == 0 {
            return Err("tempo scale must be positive".into());
        }
        Ok(config)
    }

    fn default_sample_rate() -> u32 {
        44100
    }

    fn default_tempo_scale() -> u16 {
        100
    }

    /// Gets the soundbank location.
    pub fn soundbank(&self) -> &str {
        &self.soundbank
    }

    /// Gets the sample rate for offline rendering.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Gets the default tempo scale in percent.
    pub fn tempo_scale_percent(&self) -> u16 {
        self.tempo_scale_percent
    }
}

impl Default for Player {
    fn default() -> Player {
        Player {
            soundbank: "soundbank".to_string(),
            sample_rate: Player::default_sample_rate(),
            tempo_scale_percent: Player::default_tempo_scale(),
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;

    fn write_config(contents: &[u8]) -> Result<tempfile::NamedTempFile, Box<dyn Error>> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(contents)?;
        Ok(file)
    }

    #[test]
    fn test_parse() -> Result<(), Box<dyn Error>> {
        let file = write_config(
            b"soundbank: /var/lib/mplay/soundbank\nsample_rate: 48000\ntempo_scale_percent: 150\n",
        )?;

        let config = Player::parse(file.path())?;
        assert_eq!(config.soundbank(), "/var/lib/mplay/soundbank");
        assert_eq!(config.sample_rate(), 48000);
        assert_eq!(config.tempo_scale_percent(), 150);
        Ok(())
    }

    #[test]
    fn test_parse_defaults() -> Result<(), Box<dyn Error>> {
        let file = write_config(b"soundbank: soundbank\n")?;

        let config = Player::parse(file.path())?;
        assert_eq!(config.sample_rate(), 44100);
        assert_eq!(config.tempo_scale_percent(), 100);
        Ok(())
    }

    #[test]
    fn test_parse_rejects_zero_tempo_scale() -> Result<(), Box<dyn Error>> {
        let file = write_config(b"soundbank: soundbank\ntempo_scale_percent: 0\n")?;

        assert!(Player::parse(file.path()).is_err());
        Ok(())
    }

    #[test]
    fn test_parse_rejects_malformed_file() -> Result<(), Box<dyn Error>> {
        let file = write_config(b"sample_rate: [not a number\n")?;

        assert!(Player::parse(file.path()).is_err());
        Ok(())
    }
}
