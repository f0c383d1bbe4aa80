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
use std::f64::consts::TAU;
use std::sync::Arc;

use crate::instrument::Instrument;

pub mod cpal;
#[cfg(test)]
mod mock;
pub mod offline;

/// A note placed on a render timeline.
#[derive(Debug, Clone)]
pub struct Placement {
    pub instrument: Arc<Instrument>,
    pub pitch: u8,
    pub start_seconds: f64,
    pub duration_seconds: f64,
    pub gain: f32,
}

/// A sound renderer. Live playback schedules audible notes; export renders
/// placements into a sample buffer without touching an audio device.
pub trait Synth: Send + Sync {
    /// Returns the name of the synth.
    fn name(&self) -> String;

    /// Schedules an audible note starting now. Fire-and-forget.
    fn note_on(&self, instrument: Arc<Instrument>, pitch: u8, duration_seconds: f64, gain: f32);

    /// Renders the given placements into a mono sample buffer.
    fn render(
        &self,
        placements: &[Placement],
        sample_rate: u32,
    ) -> Result<Vec<f32>, Box<dyn Error>>;
}

/// Converts a MIDI pitch to its frequency in Hz (equal temperament, A4 = 440).
pub fn pitch_to_frequency(pitch: u8) -> f64 {
    440.0 * 2f64.powf((f64::from(pitch) - 69.0) / 12.0)
}

/// Converts a MIDI velocity to a linear gain.
pub fn velocity_to_gain(velocity: u8) -> f32 {
    f32::from(velocity) / 127.0
}

/// A single sounding note: additive harmonic partials under a linear
/// attack/release envelope.
pub struct Voice {
    frequency: f64,
    gain: f32,
    attack_seconds: f64,
    release_seconds: f64,
    duration_seconds: f64,
    partials: Vec<f32>,
    elapsed_frames: u64,
}

impl Voice {
    /// Creates a voice for the given instrument and note.
    pub fn new(instrument: &Instrument, pitch: u8, duration_seconds: f64, gain: f32) -> Voice {
        Voice {
            frequency: pitch_to_frequency(pitch),
            gain,
            attack_seconds: instrument.attack_seconds(),
            release_seconds: instrument.release_seconds(),
            duration_seconds: duration_seconds.max(0.0),
            partials: instrument.partials().to_vec(),
            elapsed_frames: 0,
        }
    }

    /// Returns true once the voice has played out, including its release.
    pub fn finished(&self, sample_rate: u32) -> bool {
        self.elapsed(sample_rate) >= self.duration_seconds + self.release_seconds
    }

    /// Produces the next mono sample and advances the voice by one frame.
    pub fn next_sample(&mut self, sample_rate: u32) -> f32 {
        let t = self.elapsed(sample_rate);
        self.elapsed_frames += 1;

        let mut sample = 0.0f64;
        for (index, amplitude) in self.partials.iter().enumerate() {
            let harmonic = self.frequency * (index as f64 + 1.0);
            sample += f64::from(*amplitude) * (TAU * harmonic * t).sin();
        }

        // Scale so the partial amplitudes sum to at most unity.
        let norm: f32 = self.partials.iter().sum();
        if norm > 1.0 {
            sample /= f64::from(norm);
        }

        (sample * self.envelope(t)) as f32 * self.gain
    }

    fn elapsed(&self, sample_rate: u32) -> f64 {
        self.elapsed_frames as f64 / f64::from(sample_rate)
    }

    /// The envelope value at `t` seconds: attack ramp, unity sustain, then a
    /// release ramp past the end of the note.
    fn envelope(&self, t: f64) -> f64 {
        if t >= self.duration_seconds + self.release_seconds {
            return 0.0;
        }
        let mut level = 1.0;
        if self.attack_seconds > 0.0 && t < self.attack_seconds {
            level = t / self.attack_seconds;
        }
        if t >= self.duration_seconds && self.release_seconds > 0.0 {
            level *= 1.0 - (t - self.duration_seconds) / self.release_seconds;
        }
        level.clamp(0.0, 1.0)
    }
}

/// Mixes the placements into a single mono buffer. Shared by the offline
/// render paths.
pub fn mix(placements: &[Placement], sample_rate: u32) -> Vec<f32> {
    let total_seconds = placements
        .iter()
        .map(|p| p.start_seconds + p.duration_seconds.max(0.0) + p.instrument.release_seconds())
        .fold(0.0_f64, f64::max);
    let frames = (total_seconds * f64::from(sample_rate)).ceil() as usize;
    let mut buffer = vec![0.0f32; frames];

    for placement in placements {
        let mut voice = Voice::new(
            &placement.instrument,
            placement.pitch,
            placement.duration_seconds,
            placement.gain,
        );
        let start = (placement.start_seconds * f64::from(sample_rate)).round() as usize;
        for frame in buffer.iter_mut().skip(start) {
            if voice.finished(sample_rate) {
                break;
            }
            *frame += voice.next_sample(sample_rate);
        }
    }

    buffer
}
