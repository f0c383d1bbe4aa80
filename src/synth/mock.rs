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
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use crate::instrument::Instrument;

use super::Placement;

/// A note handed to the mock synth.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayedNote {
    pub instrument: String,
    pub pitch: u8,
    pub duration_seconds: f64,
    pub gain: f32,
}

/// A mock synth. Doesn't produce any audio.
#[derive(Default)]
pub struct Synth {
    played: Mutex<Vec<PlayedNote>>,
    rendered: Mutex<Vec<usize>>,
    fail_render: AtomicBool,
}

impl Synth {
    /// Gets a mock synth.
    pub fn get() -> Synth {
        Synth::default()
    }

    /// The notes played so far, in order.
    pub fn played(&self) -> Vec<PlayedNote> {
        self.played.lock().expect("unable to get played lock").clone()
    }

    /// The number of notes played so far.
    pub fn played_count(&self) -> usize {
        self.played.lock().expect("unable to get played lock").len()
    }

    /// The placement counts of render calls so far.
    pub fn rendered(&self) -> Vec<usize> {
        self.rendered
            .lock()
            .expect("unable to get rendered lock")
            .clone()
    }

    /// Makes subsequent render calls fail.
    pub fn fail_render(&self) {
        self.fail_render.store(true, Ordering::Relaxed);
    }
}

impl super::Synth for Synth {
    fn name(&self) -> String {
        "mock".to_string()
    }

    fn note_on(&self, instrument: Arc<Instrument>, pitch: u8, duration_seconds: f64, gain: f32) {
        self.played
            .lock()
            .expect("unable to get played lock")
            .push(PlayedNote {
                instrument: instrument.name().to_string(),
                pitch,
                duration_seconds,
                gain,
            });
    }

    fn render(
        &self,
        placements: &[Placement],
        sample_rate: u32,
    ) -> Result<Vec<f32>, Box<dyn Error>> {
        if self.fail_render.load(Ordering::Relaxed) {
            return Err("mock render failure".into());
        }

        self.rendered
            .lock()
            .expect("unable to get rendered lock")
            .push(placements.len());

        let total_seconds = placements
            .iter()
            .map(|p| p.start_seconds + p.duration_seconds.max(0.0))
            .fold(0.0_f64, f64::max);
        Ok(vec![0.0; (total_seconds * f64::from(sample_rate)).ceil() as usize])
    }
}
