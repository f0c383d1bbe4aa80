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
use crate::score::{RawEvent, Score};

/// The default MIDI tempo of 120 BPM, in microseconds per beat. In effect
/// from tick 0 until the first tempo change.
pub const DEFAULT_TEMPO: u32 = 500_000;

/// A tempo change positioned at an absolute tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempoChange {
    pub tick: u64,
    pub microseconds_per_beat: u32,
}

/// Collects the tempo changes of all tracks into a single map, sorted
/// ascending by tick. Changes at the same tick keep their encounter order.
pub fn tempo_map(score: &Score) -> Vec<TempoChange> {
    let mut changes: Vec<TempoChange> = score
        .tracks()
        .iter()
        .flat_map(|track| track.events.iter())
        .filter_map(|event| match event.event {
            RawEvent::Tempo {
                microseconds_per_beat,
            } => Some(TempoChange {
                tick: event.tick,
                microseconds_per_beat,
            }),
            _ => None,
        })
        .collect();

    // Stable, so ties preserve encounter order.
    changes.sort_by_key(|change| change.tick);
    changes
}

/// Converts an absolute tick position to seconds by walking the tempo map.
/// Changes positioned at or past the target tick have no effect. Monotonic
/// non-decreasing in `ticks`; O(changes) per call, which is acceptable since
/// tempo changes are rare.
pub fn ticks_to_seconds(ticks: u64, ticks_per_beat: u16, changes: &[TempoChange]) -> f64 {
    let mut seconds = 0.0;
    let mut current_tick: u64 = 0;
    let mut current_tempo = DEFAULT_TEMPO;

    for change in changes.iter().filter(|change| change.tick < ticks) {
        seconds += (change.tick - current_tick) as f64 / f64::from(ticks_per_beat)
            * (f64::from(current_tempo) / 1e6);
        current_tick = change.tick;
        current_tempo = change.microseconds_per_beat;
    }

    seconds
        + (ticks - current_tick) as f64 / f64::from(ticks_per_beat)
            * (f64::from(current_tempo) / 1e6)
}
