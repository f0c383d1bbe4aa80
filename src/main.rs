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
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};

use mplay::instrument::cache::InstrumentCache;
use mplay::player::Player;
use mplay::score::{resolve, Score};
use mplay::{config, export, instrument, synth, util, visual};

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A MIDI playback and export engine."
)]
struct Cli {
    /// The path to the player config.
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prints information about a MIDI file.
    Info {
        /// The path to the MIDI file.
        file: PathBuf,
    },
    /// Plays a MIDI file through the default audio output.
    Play {
        /// The path to the MIDI file.
        file: PathBuf,
        /// The tempo scale in percent. 100 is original speed.
        #[arg(short, long)]
        tempo_scale: Option<u16>,
        /// The position in seconds to start playback from.
        #[arg(short, long)]
        start: Option<f64>,
    },
    /// Renders a MIDI file into a WAV file.
    Export {
        /// The path to the MIDI file.
        file: PathBuf,
        /// The path of the WAV file to write.
        output: PathBuf,
        /// The tempo scale in percent. 100 is original speed.
        #[arg(short, long)]
        tempo_scale: Option<u16>,
        /// The sample rate to render at.
        #[arg(short, long)]
        sample_rate: Option<u32>,
    },
    /// Exports the notes of a MIDI file as JSON.
    ExportJson {
        /// The path to the MIDI file.
        file: PathBuf,
        /// The path of the JSON file to write.
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => config::Player::parse(path)?,
        None => config::Player::default(),
    };

    match cli.command {
        Commands::Info { file } => {
            let score = Score::open(&file)?;
            let resolution = resolve::resolve(&score);

            println!("{}:", score.name());
            println!("- Ticks per beat: {}", score.ticks_per_beat());
            println!("- Tracks: {}", score.tracks().len());
            println!("- Events: {}", score.num_events());
            println!("- Notes: {}", resolution.notes.len());
            println!(
                "- Duration: {}",
                util::duration_minutes_seconds(Duration::from_secs_f64(
                    resolution.duration_seconds
                ))
            );
        }
        Commands::Play {
            file,
            tempo_scale,
            start,
        } => {
            let score = Score::open(&file)?;
            let cache = Arc::new(InstrumentCache::new(instrument::get_fetcher(
                config.soundbank(),
            )));
            let synth = Arc::new(synth::cpal::Synth::open()?);
            let player = Player::new(score, cache, synth, Arc::new(visual::Null::new()));

            player
                .set_tempo_scale(tempo_scale.unwrap_or_else(|| config.tempo_scale_percent()))
                .await?;
            if let Some(start) = start {
                player.seek(start).await?;
            }
            player.play().await?;
            player.wait_until_stopped().await;
        }
        Commands::Export {
            file,
            output,
            tempo_scale,
            sample_rate,
        } => {
            let score = Score::open(&file)?;
            let cache = Arc::new(InstrumentCache::new(instrument::get_fetcher(
                config.soundbank(),
            )));
            let synth: Arc<dyn synth::Synth> = Arc::new(synth::offline::Synth::new());

            export::write_wav(
                &score,
                tempo_scale.unwrap_or_else(|| config.tempo_scale_percent()),
                &cache,
                &synth,
                sample_rate.unwrap_or_else(|| config.sample_rate()),
                &output,
            )
            .await?;
            println!("Wrote {}", output.display());
        }
        Commands::ExportJson { file, output } => {
            let score = Score::open(&file)?;
            export::write_json(&score, &output)?;
            println!("Wrote {}", output.display());
        }
    }

    Ok(())
}
