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
use std::sync::Mutex;

/// A visualizer notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Added { pitch: u8, velocity: u8 },
    Removed { pitch: u8 },
}

/// A mock visualizer. Records every notification for assertions.
#[derive(Default)]
pub struct Visualizer {
    notifications: Mutex<Vec<Notification>>,
}

impl Visualizer {
    /// Gets a mock visualizer.
    pub fn get() -> Visualizer {
        Visualizer::default()
    }

    /// All notifications received so far, in order.
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .expect("unable to get notifications lock")
            .clone()
    }

    /// The pitches of the added notes, in order.
    pub fn added(&self) -> Vec<u8> {
        self.notifications()
            .into_iter()
            .filter_map(|notification| match notification {
                Notification::Added { pitch, .. } => Some(pitch),
                Notification::Removed { .. } => None,
            })
            .collect()
    }

    /// The number of added notes.
    pub fn added_count(&self) -> usize {
        self.added().len()
    }
}

impl super::Visualizer for Visualizer {
    fn add_note(&self, pitch: u8, velocity: u8) {
        self.notifications
            .lock()
            .expect("unable to get notifications lock")
            .push(Notification::Added { pitch, velocity });
    }

    fn remove_note(&self, pitch: u8) {
        self.notifications
            .lock()
            .expect("unable to get notifications lock")
            .push(Notification::Removed { pitch });
    }
}
