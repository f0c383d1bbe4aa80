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

//! Converts resolved notes into deferred, cancellable firing events.
//!
//! One driver task works through a precomputed due-list instead of arming a
//! timer per note. Cancellation is cooperative: the shared cancel handle is
//! checked at fire time, so a firing that is already due when the generation
//! is cancelled no-ops.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::instrument::cache::InstrumentCache;
use crate::playsync::CancelHandle;
use crate::score::resolve::{Note, Resolution};

/// A scheduled firing: the start of a note or its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fire {
    NoteOn,
    NoteOff,
}

/// Invoked by the driver task when an entry becomes due.
pub type FireCallback = Arc<dyn Fn(&Note, Fire) + Send + Sync>;

/// One entry of the due-list.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Entry {
    due: Duration,
    note_index: usize,
    fire: Fire,
}

/// The handles of one scheduling generation. Cancelling clears all pending
/// firings; no due-callback fires afterward.
pub struct ScheduleHandle {
    cancel: CancelHandle,
    driver: JoinHandle<()>,
}

impl ScheduleHandle {
    /// Cancels all pending firings of this generation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true once the driver has worked through the due-list or the
    /// generation was cancelled.
    pub fn is_finished(&self) -> bool {
        self.driver.is_finished()
    }
}

/// Schedules the resolution's notes from the given start offset and tempo
/// scale. Program assignments at or after the offset trigger instrument
/// loads as an unconditional side effect, so instruments begin loading ahead
/// of the notes that need them.
pub fn schedule(
    resolution: Arc<Resolution>,
    start_offset: f64,
    scale_percent: u16,
    cache: Arc<InstrumentCache>,
    callback: FireCallback,
    cancel: CancelHandle,
) -> ScheduleHandle {
    let entries = entries(&resolution.notes, start_offset, scale_percent);
    debug!(
        entries = entries.len(),
        start_offset, scale_percent, "Scheduling notes."
    );

    // Loads are deliberately not gated by the cancel handle.
    for key in load_keys(&resolution, start_offset, scale_percent) {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache.load(key).await;
        });
    }

    let driver = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            for entry in entries {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep_until(started + entry.due) => {}
                }
                // The gate check: a due entry after cancellation is a no-op.
                if cancel.is_cancelled() {
                    return;
                }
                callback(&resolution.notes[entry.note_index], entry.fire);
            }
        })
    };

    ScheduleHandle { cancel, driver }
}

/// Builds the due-list. Notes whose scaled start lies before the offset are
/// skipped entirely; zero and negative delays fire immediately. The sort is
/// stable, so equal delays fire in source-list order.
fn entries(notes: &[Note], start_offset: f64, scale_percent: u16) -> Vec<Entry> {
    let factor = f64::from(scale_percent) / 100.0;
    let mut entries = Vec::with_capacity(notes.len() * 2);

    for (note_index, note) in notes.iter().enumerate() {
        let scaled_start = note.start_seconds / factor;
        if scaled_start < start_offset {
            continue;
        }
        let delay = (scaled_start - start_offset).max(0.0);
        let scaled_duration = (note.duration_seconds / factor).max(0.0);
        entries.push(Entry {
            due: Duration::from_secs_f64(delay),
            note_index,
            fire: Fire::NoteOn,
        });
        entries.push(Entry {
            due: Duration::from_secs_f64(delay + scaled_duration),
            note_index,
            fire: Fire::NoteOff,
        });
    }

    entries.sort_by_key(|entry| entry.due);
    entries
}

/// The instrument keys whose program assignments fall at or after the
/// offset, under the same scaling as the notes.
fn load_keys(resolution: &Resolution, start_offset: f64, scale_percent: u16) -> BTreeSet<u8> {
    let factor = f64::from(scale_percent) / 100.0;
    resolution
        .programs
        .iter()
        .filter(|assignment| assignment.seconds / factor >= start_offset)
        .map(|assignment| assignment.key())
        .collect()
}
