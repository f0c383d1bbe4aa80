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
use std::time::Instant;

/// Tracks virtual playback time as a function of wall time and tempo scale.
/// There is no live resampling: a tempo or position change tears the clock
/// down and anchors a new one.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackClock {
    /// The virtual time the clock was anchored at.
    virtual_anchor: f64,
    /// The wall time the clock was anchored at.
    wall_anchor: Instant,
    /// The tempo scale in percent. 100 is original speed.
    scale_percent: u16,
}

impl PlaybackClock {
    /// Starts a clock anchored at the given virtual time and tempo scale.
    pub fn start(virtual_anchor: f64, scale_percent: u16) -> PlaybackClock {
        PlaybackClock {
            virtual_anchor,
            wall_anchor: Instant::now(),
            scale_percent,
        }
    }

    /// The current virtual time in seconds.
    pub fn current(&self) -> f64 {
        self.virtual_anchor
            + self.wall_anchor.elapsed().as_secs_f64() * (f64::from(self.scale_percent) / 100.0)
    }
}
