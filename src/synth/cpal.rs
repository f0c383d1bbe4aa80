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
    Arc,
};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tracing::{error, info};

use crate::instrument::Instrument;

use super::{mix, Placement, Voice};

/// Plays notes through the default cpal output device, mixing the active
/// voices in the stream callback.
pub struct Synth {
    name: String,
    sample_rate: u32,
    voices: Arc<Mutex<Vec<Voice>>>,
    closed: Arc<AtomicBool>,
}

impl Synth {
    /// Opens the default output device and starts the output stream.
    pub fn open() -> Result<Synth, Box<dyn Error>> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or("no default audio output device available")?;
        let name = device.name()?;
        let supported = device.default_output_config()?;
        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(format!(
                "unsupported sample format {:?}",
                supported.sample_format()
            )
            .into());
        }
        let config = supported.config();
        let sample_rate = config.sample_rate;
        let channels = config.channels as usize;

        let voices: Arc<Mutex<Vec<Voice>>> = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));

        // The stream is not Send, so it is created and kept alive on a
        // dedicated thread.
        {
            let voices = voices.clone();
            let closed = closed.clone();
            thread::spawn(move || {
                let stream = device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut voices = voices.lock();
                        for frame in data.chunks_mut(channels) {
                            let mut sample = 0.0f32;
                            for voice in voices.iter_mut() {
                                sample += voice.next_sample(sample_rate);
                            }
                            for channel in frame.iter_mut() {
                                *channel = sample;
                            }
                        }
                        voices.retain(|voice| !voice.finished(sample_rate));
                    },
                    |e| error!(err = e.to_string(), "Output stream error."),
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            error!(err = e.to_string(), "Unable to start output stream.");
                            return;
                        }
                        // Keep the stream alive until the synth is dropped.
                        while !closed.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(100));
                        }
                    }
                    Err(e) => error!(err = e.to_string(), "Unable to build output stream."),
                }
            });
        }

        info!(device = name, sample_rate, "Opened audio output.");

        Ok(Synth {
            name,
            sample_rate,
            voices,
            closed,
        })
    }

    /// Gets the output sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl super::Synth for Synth {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn note_on(&self, instrument: Arc<Instrument>, pitch: u8, duration_seconds: f64, gain: f32) {
        self.voices
            .lock()
            .push(Voice::new(&instrument, pitch, duration_seconds, gain));
    }

    fn render(
        &self,
        placements: &[Placement],
        sample_rate: u32,
    ) -> Result<Vec<f32>, Box<dyn Error>> {
        Ok(mix(placements, sample_rate))
    }
}

impl Drop for Synth {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

impl std::fmt::Display for Synth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (cpal)", self.name)
    }
}
