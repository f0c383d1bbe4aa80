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
use std::fs;
use std::path::Path;

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};

use crate::util;

pub mod resolve;
pub mod timing;

/// An event relevant to playback, positioned at an absolute tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEvent {
    /// A tempo change, in microseconds per beat.
    Tempo { microseconds_per_beat: u32 },
    /// A program assignment for a channel.
    ProgramChange { channel: u8, program: u8 },
    /// The start of a note.
    NoteOn { note: u8, velocity: u8, channel: u8 },
    /// The end of a note.
    NoteOff { note: u8, channel: u8 },
}

/// A raw event together with its absolute tick position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackEvent {
    pub tick: u64,
    pub event: RawEvent,
}

/// A single track of tick-ordered events.
#[derive(Debug, Clone, Default)]
pub struct Track {
    pub events: Vec<TrackEvent>,
}

/// A parsed MIDI document, reduced to the events playback cares about.
#[derive(Debug, Clone)]
pub struct Score {
    /// The name of the score, taken from the file name when read from disk.
    name: String,
    /// The MIDI division: ticks per beat. Always positive.
    ticks_per_beat: u16,
    /// The tracks of the score.
    tracks: Vec<Track>,
}

/// Typed error for score load/parse failures so callers can distinguish
/// e.g. file-not-found from malformed documents without string matching.
#[derive(Debug, thiserror::Error)]
pub enum ScoreError {
    #[error("error reading {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("MIDI parse error: {0}")]
    Parse(#[from] midly::Error),
    #[error("SMPTE timecode division is not supported")]
    SmpteTiming,
    #[error("ticks per beat must be positive")]
    InvalidDivision,
    #[error("tempo at tick {tick} must be positive")]
    InvalidTempo { tick: u64 },
}

impl Score {
    /// Reads and parses a standard MIDI file from disk.
    pub fn open(path: &Path) -> Result<Score, ScoreError> {
        let buf = fs::read(path).map_err(|source| ScoreError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Score::parse(util::stem_display(path), &buf)
    }

    /// Parses a standard MIDI file from a byte buffer.
    pub fn parse(name: &str, buf: &[u8]) -> Result<Score, ScoreError> {
        let smf = Smf::parse(buf)?;

        let ticks_per_beat = match smf.header.timing {
            Timing::Metrical(division) => division.as_int(),
            Timing::Timecode(_, _) => return Err(ScoreError::SmpteTiming),
        };
        if ticks_per_beat == 0 {
            return Err(ScoreError::InvalidDivision);
        }

        let tracks = smf
            .tracks
            .iter()
            .map(|track| {
                let mut tick: u64 = 0;
                let mut events = Vec::new();
                for event in track {
                    tick += u64::from(event.delta.as_int());
                    if let Some(event) = convert_event(tick, &event.kind)? {
                        events.push(TrackEvent { tick, event });
                    }
                }
                Ok(Track { events })
            })
            .collect::<Result<Vec<Track>, ScoreError>>()?;

        Ok(Score {
            name: name.to_string(),
            ticks_per_beat,
            tracks,
        })
    }

    /// Creates a score directly from structured tracks. Used by tests and by
    /// callers that produce events without going through a MIDI file.
    pub fn from_tracks(name: &str, ticks_per_beat: u16, tracks: Vec<Track>) -> Score {
        Score {
            name: name.to_string(),
            ticks_per_beat,
            tracks,
        }
    }

    /// Gets the name of the score.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the MIDI division in ticks per beat.
    pub fn ticks_per_beat(&self) -> u16 {
        self.ticks_per_beat
    }

    /// Gets the tracks of the score.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// The total number of playback-relevant events across all tracks.
    pub fn num_events(&self) -> usize {
        self.tracks.iter().map(|track| track.events.len()).sum()
    }
}

/// Converts a midly event into a raw event, if playback cares about it.
fn convert_event(tick: u64, kind: &TrackEventKind) -> Result<Option<RawEvent>, ScoreError> {
    Ok(match kind {
        TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => {
            let microseconds_per_beat = tempo.as_int();
            if microseconds_per_beat == 0 {
                return Err(ScoreError::InvalidTempo { tick });
            }
            Some(RawEvent::Tempo {
                microseconds_per_beat,
            })
        }
        TrackEventKind::Midi { channel, message } => {
            let channel = channel.as_int();
            match message {
                // A note-on with zero velocity is a note-off in running status.
                MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => Some(RawEvent::NoteOff {
                    note: key.as_int(),
                    channel,
                }),
                MidiMessage::NoteOn { key, vel } => Some(RawEvent::NoteOn {
                    note: key.as_int(),
                    velocity: vel.as_int(),
                    channel,
                }),
                MidiMessage::NoteOff { key, .. } => Some(RawEvent::NoteOff {
                    note: key.as_int(),
                    channel,
                }),
                MidiMessage::ProgramChange { program } => Some(RawEvent::ProgramChange {
                    channel,
                    program: program.as_int(),
                }),
                _ => None,
            }
        }
        _ => None,
    })
}
