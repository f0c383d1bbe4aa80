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

use tracing::debug;

use crate::instrument::Instrument;

use super::{mix, Placement};

/// Renders to buffers without an audio device. Used by the export path.
#[derive(Default)]
pub struct Synth {}

impl Synth {
    /// Creates a new offline synth.
    pub fn new() -> Synth {
        Synth::default()
    }
}

impl super::Synth for Synth {
    fn name(&self) -> String {
        "offline".to_string()
    }

    fn note_on(&self, _: Arc<Instrument>, pitch: u8, _: f64, _: f32) {
        // There is no live output path; scheduled notes are ignored.
        debug!(pitch, "Ignoring live note in offline synth.");
    }

    fn render(
        &self,
        placements: &[Placement],
        sample_rate: u32,
    ) -> Result<Vec<f32>, Box<dyn Error>> {
        Ok(mix(placements, sample_rate))
    }
}
