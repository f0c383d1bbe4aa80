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
use std::collections::HashMap;

use crate::score::{timing, RawEvent, Score};

/// The channel reserved for percussion in General MIDI.
pub const PERCUSSION_CHANNEL: u8 = 9;

/// The instrument key of the percussion kit. Distinct from any numbered
/// General MIDI program.
pub const PERCUSSION_KEY: u8 = 128;

/// Resolves the instrument key for a note or program assignment. Channel 9
/// always maps to the percussion kit, regardless of the raw program.
pub fn instrument_key(channel: u8, program: u8) -> u8 {
    if channel == PERCUSSION_CHANNEL {
        PERCUSSION_KEY
    } else {
        program
    }
}

/// A note derived from a matched note-on/note-off pair. Times are in
/// original-tempo seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Note {
    pub pitch: u8,
    pub velocity: u8,
    pub channel: u8,
    pub start_seconds: f64,
    pub duration_seconds: f64,
    /// The index of the track the note-on was found in.
    pub track: usize,
    /// The instrument key in effect at the note-on.
    pub key: u8,
}

impl Note {
    /// The end of the note in original-tempo seconds.
    pub fn end_seconds(&self) -> f64 {
        self.start_seconds + self.duration_seconds
    }
}

/// A program assignment stamped with its position in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgramAssignment {
    pub channel: u8,
    pub program: u8,
    pub seconds: f64,
}

impl ProgramAssignment {
    /// The instrument key this assignment resolves to.
    pub fn key(&self) -> u8 {
        instrument_key(self.channel, self.program)
    }
}

/// The result of resolving a score: discrete notes, program assignments and
/// the final per-channel program state. Recomputed from the score on every
/// scheduling or export call rather than persisted.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Notes ordered by start time.
    pub notes: Vec<Note>,
    /// Program assignments in tick order, stamped with seconds.
    pub programs: Vec<ProgramAssignment>,
    /// The program in effect per channel after all events.
    pub channel_programs: [u8; 16],
    /// The end of the last note, in original-tempo seconds.
    pub duration_seconds: f64,
}

impl Resolution {
    /// Returns true if the score resolved to no playable notes.
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// The distinct instrument keys used by the resolved notes.
    pub fn instrument_keys(&self) -> Vec<u8> {
        let mut keys: Vec<u8> = self.notes.iter().map(|note| note.key).collect();
        keys.sort_unstable();
        keys.dedup();
        keys
    }
}

/// Pairs note events into notes and tracks program assignments, converting
/// ticks to seconds through the tempo map as it goes.
pub fn resolve(score: &Score) -> Resolution {
    let changes = timing::tempo_map(score);
    let ticks_per_beat = score.ticks_per_beat();

    // Merge all tracks into one stream. The stable sort keeps the track
    // order for events at the same tick.
    let mut merged: Vec<(usize, crate::score::TrackEvent)> = score
        .tracks()
        .iter()
        .enumerate()
        .flat_map(|(index, track)| track.events.iter().map(move |event| (index, *event)))
        .collect();
    merged.sort_by_key(|(_, event)| event.tick);

    let mut channel_programs = [0u8; 16];
    let mut programs = Vec::new();
    let mut notes = Vec::new();
    // At most one pending note-on per (pitch, channel). A second note-on
    // before the matching note-off overwrites the first.
    let mut pending: HashMap<(u8, u8), Note> = HashMap::new();

    for (track, event) in merged {
        let seconds = timing::ticks_to_seconds(event.tick, ticks_per_beat, &changes);
        match event.event {
            RawEvent::Tempo { .. } => {}
            RawEvent::ProgramChange { channel, program } => {
                channel_programs[usize::from(channel) & 0xf] = program;
                programs.push(ProgramAssignment {
                    channel,
                    program,
                    seconds,
                });
            }
            RawEvent::NoteOn {
                note,
                velocity,
                channel,
            } => {
                pending.insert(
                    (note, channel),
                    Note {
                        pitch: note,
                        velocity,
                        channel,
                        start_seconds: seconds,
                        duration_seconds: 0.0,
                        track,
                        key: instrument_key(channel, channel_programs[usize::from(channel) & 0xf]),
                    },
                );
            }
            RawEvent::NoteOff { note, channel } => {
                if let Some(mut pending_note) = pending.remove(&(note, channel)) {
                    pending_note.duration_seconds = seconds - pending_note.start_seconds;
                    notes.push(pending_note);
                }
            }
        }
    }

    // Unterminated note-ons never become notes; `pending` is simply dropped.
    notes.sort_by(|a, b| {
        a.start_seconds
            .partial_cmp(&b.start_seconds)
            .expect("note start times are finite")
    });

    let duration_seconds = notes
        .iter()
        .map(Note::end_seconds)
        .fold(0.0_f64, f64::max);

    Resolution {
        notes,
        programs,
        channel_programs,
        duration_seconds,
    }
}
