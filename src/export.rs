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

//! Offline export of a score, independent of wall time.
//!
//! The planner re-runs the same tick-to-seconds conversion and note
//! resolution as live playback, so exported timing matches what a listener
//! would hear. Structured export reflects the piece's native timing; audio
//! export applies the tempo scale.

use std::collections::BTreeSet;
use std::error::Error;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use hound::{SampleFormat, WavSpec, WavWriter};
use serde::Serialize;
use tracing::{info, warn};

use crate::instrument::cache::InstrumentCache;
use crate::score::resolve::{self, Note};
use crate::score::Score;
use crate::synth::{self, Placement, Synth};

/// A note placed on the export timeline, scaled the same way the live
/// scheduler scales it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedNote {
    pub note: Note,
    /// The tempo-scaled start in seconds.
    pub start_seconds: f64,
    /// The tempo-scaled duration in seconds.
    pub duration_seconds: f64,
    /// The resolved instrument key.
    pub key: u8,
}

/// Plans the full ordered event list for offline rendering under the given
/// tempo scale.
pub fn plan(score: &Score, scale_percent: u16) -> Vec<PlannedNote> {
    let factor = f64::from(scale_percent) / 100.0;
    resolve::resolve(score)
        .notes
        .iter()
        .map(|note| PlannedNote {
            note: *note,
            start_seconds: note.start_seconds / factor,
            duration_seconds: (note.duration_seconds / factor).max(0.0),
            key: note.key,
        })
        .collect()
}

/// The structured export artifact: one entry per source track.
#[derive(Debug, Serialize, PartialEq)]
pub struct Export {
    pub tracks: Vec<ExportTrack>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ExportTrack {
    pub notes: Vec<ExportNote>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ExportNote {
    pub note: u8,
    pub time: f64,
    pub duration: f64,
    pub velocity: u8,
}

/// Produces the structured export of a score. Times are in original-tempo
/// seconds; the tempo scale is deliberately not applied here.
pub fn structured(score: &Score) -> Export {
    let resolution = resolve::resolve(score);
    let mut tracks: Vec<ExportTrack> = score
        .tracks()
        .iter()
        .map(|_| ExportTrack { notes: Vec::new() })
        .collect();
    for note in &resolution.notes {
        tracks[note.track].notes.push(ExportNote {
            note: note.pitch,
            time: note.start_seconds,
            duration: note.duration_seconds,
            velocity: note.velocity,
        });
    }
    Export { tracks }
}

/// Writes the structured export of a score as JSON.
pub fn write_json(score: &Score, path: &Path) -> Result<(), Box<dyn Error>> {
    let json = serde_json::to_string_pretty(&structured(score))?;
    fs::write(path, json)?;
    info!(path = %path.display(), "Wrote structured export.");
    Ok(())
}

/// Renders a score into a 16-bit PCM stereo WAV file under the given tempo
/// scale. A render failure propagates and leaves no partial file behind.
pub async fn write_wav(
    score: &Score,
    scale_percent: u16,
    cache: &Arc<InstrumentCache>,
    synth: &Arc<dyn Synth>,
    sample_rate: u32,
    path: &Path,
) -> Result<(), Box<dyn Error>> {
    let planned = plan(score, scale_percent);
    cache
        .preload(planned.iter().map(|entry| entry.key).collect::<BTreeSet<u8>>())
        .await;

    let mut placements = Vec::with_capacity(planned.len());
    let mut dropped = 0usize;
    for entry in &planned {
        match cache.handle(entry.key) {
            Some(instrument) => placements.push(Placement {
                instrument,
                pitch: entry.note.pitch,
                start_seconds: entry.start_seconds,
                duration_seconds: entry.duration_seconds,
                gain: synth::velocity_to_gain(entry.note.velocity),
            }),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        warn!(dropped, "Skipping notes with no available instrument.");
    }

    // Render fully before touching the file system, so a failed render
    // leaves nothing behind.
    let samples = synth.render(&placements, sample_rate)?;

    let mut writer = WavWriter::create(
        path,
        WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        },
    )?;
    for sample in samples {
        let sample = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        // The mono render is duplicated across the stereo pair.
        writer.write_sample(sample)?;
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    info!(path = %path.display(), scale_percent, sample_rate, "Wrote audio export.");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::score::{RawEvent, Track, TrackEvent};
    use crate::{instrument, synth};

    fn score() -> Score {
        // Two notes on track 0 and one on track 1, all channel 0.
        let track0 = Track {
            events: vec![
                TrackEvent {
                    tick: 0,
                    event: RawEvent::NoteOn {
                        note: 60,
                        velocity: 64,
                        channel: 0,
                    },
                },
                TrackEvent {
                    tick: 480,
                    event: RawEvent::NoteOff {
                        note: 60,
                        channel: 0,
                    },
                },
                TrackEvent {
                    tick: 480,
                    event: RawEvent::NoteOn {
                        note: 64,
                        velocity: 80,
                        channel: 0,
                    },
                },
                TrackEvent {
                    tick: 960,
                    event: RawEvent::NoteOff {
                        note: 64,
                        channel: 0,
                    },
                },
            ],
        };
        let track1 = Track {
            events: vec![
                TrackEvent {
                    tick: 960,
                    event: RawEvent::NoteOn {
                        note: 67,
                        velocity: 100,
                        channel: 0,
                    },
                },
                TrackEvent {
                    tick: 1440,
                    event: RawEvent::NoteOff {
                        note: 67,
                        channel: 0,
                    },
                },
            ],
        };
        Score::from_tracks("test", 480, vec![track0, track1])
    }

    fn test_cache() -> Arc<InstrumentCache> {
        Arc::new(InstrumentCache::new(Arc::new(
            instrument::test::Fetcher::get("mock"),
        )))
    }

    #[test]
    fn test_plan_scales_inversely_with_tempo() {
        let score = score();
        let original = plan(&score, 100);
        let doubled = plan(&score, 200);

        assert_eq!(original.len(), 3);
        for (original, doubled) in original.iter().zip(doubled.iter()) {
            assert_eq!(original.start_seconds, doubled.start_seconds * 2.0);
            assert_eq!(original.duration_seconds, doubled.duration_seconds * 2.0);
            assert_eq!(original.key, doubled.key);
        }
    }

    #[test]
    fn test_structured_ignores_tempo_scale() {
        let score = score();
        let export = structured(&score);

        // Native timing, grouped by source track.
        assert_eq!(export.tracks.len(), 2);
        assert_eq!(
            export.tracks[0].notes,
            vec![
                ExportNote {
                    note: 60,
                    time: 0.0,
                    duration: 0.5,
                    velocity: 64
                },
                ExportNote {
                    note: 64,
                    time: 0.5,
                    duration: 0.5,
                    velocity: 80
                },
            ]
        );
        assert_eq!(export.tracks[1].notes[0].time, 1.0);
    }

    #[test]
    fn test_write_json() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("export.json");

        write_json(&score(), &path)?;

        let parsed: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert_eq!(parsed["tracks"].as_array().map(Vec::len), Some(2));
        assert_eq!(parsed["tracks"][1]["notes"][0]["note"], 67);
        Ok(())
    }

    #[tokio::test]
    async fn test_write_wav() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("export.wav");
        let synth: Arc<dyn Synth> = Arc::new(synth::offline::Synth::new());

        write_wav(&score(), 100, &test_cache(), &synth, 8000, &path).await?;

        let reader = hound::WavReader::open(&path)?;
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 8000);
        assert_eq!(spec.bits_per_sample, 16);
        // The piece is 1.5 seconds of notes plus the final release.
        assert!(reader.duration() >= 12000);
        Ok(())
    }

    #[tokio::test]
    async fn test_doubled_tempo_halves_rendered_length() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let original = dir.path().join("original.wav");
        let doubled = dir.path().join("doubled.wav");
        let synth: Arc<dyn Synth> = Arc::new(synth::offline::Synth::new());
        let cache = test_cache();

        write_wav(&score(), 100, &cache, &synth, 8000, &original).await?;
        write_wav(&score(), 200, &cache, &synth, 8000, &doubled).await?;

        let original = hound::WavReader::open(&original)?.duration() as f64;
        let doubled = hound::WavReader::open(&doubled)?.duration() as f64;
        // Not exactly half, as the release tails are not scaled.
        assert!(doubled < original * 0.6);
        Ok(())
    }

    #[tokio::test]
    async fn test_render_failure_leaves_no_file() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("export.wav");
        let mock = Arc::new(synth::test::Synth::get());
        mock.fail_render();
        let synth: Arc<dyn Synth> = mock;

        assert!(write_wav(&score(), 100, &test_cache(), &synth, 8000, &path)
            .await
            .is_err());
        assert!(!path.exists());
        Ok(())
    }
}
