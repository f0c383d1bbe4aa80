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
use std::collections::BTreeSet;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, span, Level, Span};

use crate::instrument::cache::InstrumentCache;
use crate::instrument::DEFAULT_KEY;
use crate::playsync::CancelHandle;
use crate::score::resolve::{self, Note, Resolution, PERCUSSION_CHANNEL, PERCUSSION_KEY};
use crate::score::Score;
use crate::synth::{self, Synth};
use crate::visual::Visualizer;

pub mod clock;
pub mod scheduler;

use clock::PlaybackClock;
use scheduler::{Fire, FireCallback, ScheduleHandle};

/// How often the end-of-piece watcher samples the clock.
const END_POLL_PERIOD: Duration = Duration::from_millis(100);

/// The transport state of the playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Stopped,
    Playing,
    Paused,
}

/// One generation of scheduling. A new generation is created every time
/// playback (re)starts; transport operations cancel the old generation
/// before installing a new one.
struct Generation {
    schedule: ScheduleHandle,
    clock: PlaybackClock,
}

/// The playback session. Created with the player and mutated in place by
/// every transport operation; never destroyed, only reset to Stopped.
struct Session {
    state: State,
    scale_percent: u16,
    /// The frozen position while Paused or Stopped. While Playing the clock
    /// of the current generation is authoritative.
    position_seconds: f64,
    generation: Option<Generation>,
}

impl Session {
    /// The current virtual position in seconds.
    fn position(&self) -> f64 {
        match (&self.state, &self.generation) {
            (State::Playing, Some(generation)) => generation.clock.current(),
            _ => self.position_seconds,
        }
    }

    /// Cancels the current generation, if any. No firing callback runs after
    /// this returns, even for entries that were already due.
    fn halt(&mut self) {
        if let Some(generation) = self.generation.take() {
            generation.schedule.cancel();
        }
    }
}

/// Plays a score by scheduling its resolved notes against a tempo-scalable
/// virtual clock. The player is the single source of playback-state truth:
/// it alone drives the scheduler and the clock.
pub struct Player {
    score: Score,
    cache: Arc<InstrumentCache>,
    synth: Arc<dyn Synth>,
    visualizer: Arc<dyn Visualizer>,
    /// Transport operations lock the session for their whole transition, so
    /// no two transitions interleave.
    session: Arc<Mutex<Session>>,
    span: Span,
}

impl Player {
    /// Creates a new player for the given score.
    pub fn new(
        score: Score,
        cache: Arc<InstrumentCache>,
        synth: Arc<dyn Synth>,
        visualizer: Arc<dyn Visualizer>,
    ) -> Player {
        Player {
            score,
            cache,
            synth,
            visualizer,
            session: Arc::new(Mutex::new(Session {
                state: State::Stopped,
                scale_percent: 100,
                position_seconds: 0.0,
                generation: None,
            })),
            span: span!(Level::INFO, "player"),
        }
    }

    /// Gets the transport state.
    pub async fn state(&self) -> State {
        self.session.lock().await.state
    }

    /// Gets the current virtual position in seconds.
    pub async fn position(&self) -> f64 {
        self.session.lock().await.position()
    }

    /// Gets the tempo scale in percent.
    pub async fn tempo_scale(&self) -> u16 {
        self.session.lock().await.scale_percent
    }

    /// Starts or resumes playback from the current position.
    pub async fn play(&self) -> Result<(), Box<dyn Error>> {
        let _enter = self.span.enter();

        let mut session = self.session.lock().await;
        if session.state == State::Playing {
            info!(score = self.score.name(), "Player is already playing.");
            return Ok(());
        }

        self.start(&mut session).await;
        Ok(())
    }

    /// Pauses playback, freezing the virtual position.
    pub async fn pause(&self) -> Result<(), Box<dyn Error>> {
        let _enter = self.span.enter();

        let mut session = self.session.lock().await;
        if session.state != State::Playing {
            info!("Player is not playing, nothing to pause.");
            return Ok(());
        }

        let position = session.position();
        session.halt();
        session.state = State::Paused;
        session.position_seconds = position;
        info!(position, "Paused playback.");
        Ok(())
    }

    /// Stops playback and resets the position to the start.
    pub async fn stop(&self) -> Result<(), Box<dyn Error>> {
        let _enter = self.span.enter();

        let mut session = self.session.lock().await;
        if session.state == State::Stopped {
            info!("Player is not active, nothing to stop.");
            return Ok(());
        }

        session.halt();
        session.state = State::Stopped;
        session.position_seconds = 0.0;
        info!("Stopped playback.");
        Ok(())
    }

    /// Re-anchors the session at the given position. The transport state is
    /// preserved: a playing session keeps playing from the new position, a
    /// paused or stopped one stays where it is.
    pub async fn seek(&self, position_seconds: f64) -> Result<(), Box<dyn Error>> {
        let _enter = self.span.enter();

        let mut session = self.session.lock().await;
        let was_playing = session.state == State::Playing;
        session.halt();
        session.position_seconds = position_seconds.max(0.0);
        info!(position = session.position_seconds, "Seeked.");

        if was_playing {
            self.start(&mut session).await;
        }
        Ok(())
    }

    /// Sets the tempo scale in percent. 100 is original speed. The transport
    /// state is preserved; a playing session resumes from its captured
    /// position under the new scale.
    pub async fn set_tempo_scale(&self, scale_percent: u16) -> Result<(), Box<dyn Error>> {
        let _enter = self.span.enter();

        if scale_percent == 0 {
            return Err("tempo scale must be positive".into());
        }

        let mut session = self.session.lock().await;
        let was_playing = session.state == State::Playing;
        let position = session.position();
        session.halt();
        session.scale_percent = scale_percent;
        session.position_seconds = position;
        info!(scale_percent, position, "Set tempo scale.");

        if was_playing {
            self.start(&mut session).await;
        }
        Ok(())
    }

    /// Waits until the session is stopped, either by a transport operation
    /// or by reaching the end of the piece.
    pub async fn wait_until_stopped(&self) {
        loop {
            if self.session.lock().await.state == State::Stopped {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Anchors a new generation at the session position: preloads the
    /// instruments in range, starts the clock and invokes the scheduler.
    async fn start(&self, session: &mut Session) {
        let position = session.position_seconds;
        let scale_percent = session.scale_percent;
        let resolution = Arc::new(resolve::resolve(&self.score));
        info!(
            score = self.score.name(),
            notes = resolution.notes.len(),
            position,
            scale_percent,
            "Starting playback."
        );

        self.cache
            .preload(preload_keys(&resolution, position, scale_percent))
            .await;

        let cancel = CancelHandle::new();
        let schedule = scheduler::schedule(
            resolution.clone(),
            position,
            scale_percent,
            self.cache.clone(),
            self.fire_callback(scale_percent),
            cancel.clone(),
        );
        let clock = PlaybackClock::start(position, scale_percent);
        let total_seconds = resolution.duration_seconds / (f64::from(scale_percent) / 100.0);
        self.watch_end(cancel.clone(), clock, total_seconds);

        session.state = State::Playing;
        session.generation = Some(Generation { schedule, clock });
    }

    /// The due-callback for one generation. Notes whose instrument is
    /// unavailable are dropped, never raised.
    fn fire_callback(&self, scale_percent: u16) -> FireCallback {
        let cache = self.cache.clone();
        let synth = self.synth.clone();
        let visualizer = self.visualizer.clone();
        let factor = f64::from(scale_percent) / 100.0;

        Arc::new(move |note: &Note, fire: Fire| {
            let instrument = match cache.handle(note.key) {
                Some(instrument) => instrument,
                None => {
                    debug!(
                        pitch = note.pitch,
                        key = note.key,
                        "No instrument available, dropping note."
                    );
                    return;
                }
            };
            match fire {
                Fire::NoteOn => {
                    synth.note_on(
                        instrument,
                        note.pitch,
                        (note.duration_seconds / factor).max(0.0),
                        synth::velocity_to_gain(note.velocity),
                    );
                    // Fire-and-forget; the outcome is ignored.
                    visualizer.add_note(note.pitch, note.velocity);
                }
                Fire::NoteOff => visualizer.remove_note(note.pitch),
            }
        })
    }

    /// Polls the clock and stops the session once the piece has played out.
    fn watch_end(&self, cancel: CancelHandle, clock: PlaybackClock, total_seconds: f64) {
        let session = self.session.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(END_POLL_PERIOD) => {}
                }
                if clock.current() < total_seconds {
                    continue;
                }

                let mut session = session.lock().await;
                // A transport operation may have superseded this generation
                // while the lock was contended.
                if cancel.is_cancelled() {
                    return;
                }
                info!("End of piece reached, stopping.");
                session.halt();
                session.state = State::Stopped;
                session.position_seconds = 0.0;
                return;
            }
        });
    }
}

/// The keys to load before playback starts: the program assignments falling
/// at or after the offset, the default instrument as the substitution
/// fallback, and the percussion kit when channel-9 notes are in range.
fn preload_keys(resolution: &Resolution, start_offset: f64, scale_percent: u16) -> BTreeSet<u8> {
    let factor = f64::from(scale_percent) / 100.0;
    let mut keys: BTreeSet<u8> = resolution
        .programs
        .iter()
        .filter(|assignment| assignment.seconds / factor >= start_offset)
        .map(|assignment| assignment.key())
        .collect();
    keys.insert(DEFAULT_KEY);
    if resolution
        .notes
        .iter()
        .any(|note| note.channel == PERCUSSION_CHANNEL && note.start_seconds / factor >= start_offset)
    {
        keys.insert(PERCUSSION_KEY);
    }
    keys
}

#[cfg(test)]
mod test {
    use std::error::Error;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::instrument::cache::InstrumentCache;
    use crate::score::{RawEvent, Score, Track, TrackEvent};
    use crate::test::eventually;
    use crate::{instrument, synth, visual};

    use super::{Player, State};

    /// Builds a score with one track per note. At 480 ticks per beat and the
    /// default tempo, one second is 960 ticks.
    fn score(notes: &[(u64, u64, u8)]) -> Score {
        let tracks = notes
            .iter()
            .map(|(on_tick, off_tick, pitch)| Track {
                events: vec![
                    TrackEvent {
                        tick: *on_tick,
                        event: RawEvent::NoteOn {
                            note: *pitch,
                            velocity: 64,
                            channel: 0,
                        },
                    },
                    TrackEvent {
                        tick: *off_tick,
                        event: RawEvent::NoteOff {
                            note: *pitch,
                            channel: 0,
                        },
                    },
                ],
            })
            .collect();
        Score::from_tracks("test", 480, tracks)
    }

    struct Fixture {
        player: Player,
        fetcher: Arc<instrument::test::Fetcher>,
        synth: Arc<synth::test::Synth>,
        visualizer: Arc<visual::test::Visualizer>,
    }

    fn fixture(score: Score) -> Fixture {
        let fetcher = Arc::new(instrument::test::Fetcher::get("mock"));
        let synth = Arc::new(synth::test::Synth::get());
        let visualizer = Arc::new(visual::test::Visualizer::get());
        let player = Player::new(
            score,
            Arc::new(InstrumentCache::new(fetcher.clone())),
            synth.clone(),
            visualizer.clone(),
        );
        Fixture {
            player,
            fetcher,
            synth,
            visualizer,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_play_fires_notes_and_stops_at_end() -> Result<(), Box<dyn Error>> {
        let fixture = fixture(score(&[(0, 48, 60), (48, 96, 64)]));

        fixture.player.play().await?;
        assert_eq!(fixture.player.state().await, State::Playing);

        // The visualizer is notified after the synth, so both have seen both
        // notes once the second add arrives.
        eventually(
            || fixture.visualizer.added_count() == 2,
            "notes never reached the visualizer",
        )
        .await;
        assert_eq!(
            fixture
                .synth
                .played()
                .iter()
                .map(|note| note.pitch)
                .collect::<Vec<u8>>(),
            vec![60, 64]
        );
        assert_eq!(fixture.visualizer.added(), vec![60, 64]);

        // The end-of-piece watcher resets the session.
        eventually(
            || is_stopped(&fixture.player),
            "player never stopped at the end of the piece",
        )
        .await;
        assert_eq!(fixture.player.position().await, 0.0);
        Ok(())
    }

    /// Polls the stopped state from a synchronous predicate.
    fn is_stopped(player: &Player) -> bool {
        match player.session.try_lock() {
            Ok(session) => session.state == State::Stopped,
            Err(_) => false,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_play_while_playing_is_noop() -> Result<(), Box<dyn Error>> {
        let fixture = fixture(score(&[(0, 48, 60)]));

        fixture.player.play().await?;
        fixture.player.play().await?;

        eventually(
            || fixture.synth.played_count() == 1,
            "note never reached the synth",
        )
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        // The second play did not schedule a second generation.
        assert_eq!(fixture.synth.played_count(), 1);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_suppresses_due_firings() -> Result<(), Box<dyn Error>> {
        let fixture = fixture(score(&[(48, 96, 60)]));

        fixture.player.play().await?;
        fixture.player.stop().await?;
        assert_eq!(fixture.player.state().await, State::Stopped);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fixture.synth.played_count(), 0);
        assert!(fixture.visualizer.notifications().is_empty());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_seek_schedules_only_later_notes() -> Result<(), Box<dyn Error>> {
        // Notes at roughly 20, 60 and 90 milliseconds.
        let fixture = fixture(score(&[(19, 38, 60), (58, 77, 62), (86, 106, 64)]));

        fixture.player.seek(0.05).await?;
        assert_eq!(fixture.player.state().await, State::Stopped);
        assert_eq!(fixture.player.position().await, 0.05);

        fixture.player.play().await?;
        eventually(
            || fixture.synth.played_count() == 2,
            "later notes never reached the synth",
        )
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            fixture
                .synth
                .played()
                .iter()
                .map(|note| note.pitch)
                .collect::<Vec<u8>>(),
            vec![62, 64]
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pause_freezes_position() -> Result<(), Box<dyn Error>> {
        let fixture = fixture(score(&[(0, 960, 60)]));

        fixture.player.play().await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        fixture.player.pause().await?;

        let frozen = fixture.player.position().await;
        assert!(frozen > 0.0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fixture.player.position().await, frozen);
        assert_eq!(fixture.player.state().await, State::Paused);

        // Resuming anchors a new generation at the frozen position.
        fixture.player.play().await?;
        assert_eq!(fixture.player.state().await, State::Playing);
        fixture.player.stop().await?;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_set_tempo_scale_preserves_state() -> Result<(), Box<dyn Error>> {
        let fixture = fixture(score(&[(0, 960, 60)]));

        // Stopped stays stopped.
        fixture.player.set_tempo_scale(200).await?;
        assert_eq!(fixture.player.state().await, State::Stopped);
        assert_eq!(fixture.player.tempo_scale().await, 200);

        // Paused stays paused at its position.
        fixture.player.play().await?;
        tokio::time::sleep(Duration::from_millis(30)).await;
        fixture.player.pause().await?;
        let frozen = fixture.player.position().await;
        fixture.player.set_tempo_scale(50).await?;
        assert_eq!(fixture.player.state().await, State::Paused);
        assert_eq!(fixture.player.position().await, frozen);

        assert!(fixture.player.set_tempo_scale(0).await.is_err());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tempo_scale_scales_durations() -> Result<(), Box<dyn Error>> {
        // One note of 0.2 seconds.
        let fixture = fixture(score(&[(0, 192, 60)]));

        fixture.player.set_tempo_scale(200).await?;
        fixture.player.play().await?;

        eventually(
            || fixture.synth.played_count() == 1,
            "note never reached the synth",
        )
        .await;
        // At double speed the synth is handed half the duration.
        let played = fixture.synth.played();
        assert!((played[0].duration_seconds - 0.1).abs() < 1e-9);
        fixture.player.stop().await?;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_instrument_drops_notes() -> Result<(), Box<dyn Error>> {
        let fixture = fixture(score(&[(0, 48, 60)]));
        // The default instrument fails too, so no substitution exists.
        fixture.fetcher.fail_key(instrument::DEFAULT_KEY);

        fixture.player.play().await?;
        eventually(
            || is_stopped(&fixture.player),
            "player never stopped at the end of the piece",
        )
        .await;

        // Playback completed without the note ever reaching the synth.
        assert_eq!(fixture.synth.played_count(), 0);
        assert!(fixture.visualizer.notifications().is_empty());
        Ok(())
    }
}
