// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
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
use std::thread;
use std::time::{Duration, Instant};

use clap::{crate_version, Parser, Subcommand};
use duration_string::DurationString;
use tracing_subscriber::EnvFilter;

use plasma_sound::config::Settings;
use plasma_sound::middleware::simulated::SimulatedMiddleware;
use plasma_sound::middleware::Middleware;
use plasma_sound::{AudioSampleBuffer, SoundApi, Vec3};

/// How long to wait for a played sound to be torn down.
const PLAYBACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "Plays in-memory sample buffers through programmer sound events."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the events in the bank.
    Events {
        /// The path to the config file.
        #[arg[short, long]]
        config: Option<PathBuf>,
    },
    /// Plays a generated tone through the simulated middleware.
    Tone {
        /// The path to the config file.
        #[arg[short, long]]
        config: Option<PathBuf>,
        /// The tone frequency in Hz.
        #[arg[short, long, default_value_t = 440.0]]
        frequency: f32,
        /// How long the tone lasts.
        #[arg[short, long, default_value = "500ms"]]
        duration: String,
        /// The number of channels.
        #[arg[long, default_value_t = 1]]
        channels: u16,
        /// The sample rate.
        #[arg[short, long, default_value_t = 44100]]
        sample_rate: u32,
        /// Plays the tone at a position, given as x,y,z.
        #[arg[short, long]]
        position: Option<Vec3>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Events { config } => {
            let settings = Settings::load(config.as_deref())?;
            let simulator = Arc::new(SimulatedMiddleware::new(settings.simulator().options()));
            let api = sound_api(&settings, &simulator);

            let bank = api.init()?;
            let events = simulator.bank_events(bank)?;
            if events.is_empty() {
                println!("No events found.");
                return Ok(());
            }

            println!("Events (count: {}):", events.len());
            for event in events {
                let mut line = format!("- {} {}", event.id, event.path);
                if event.is_3d {
                    line.push_str(" (3D)");
                }
                let roles = api.events();
                if event.matches(&roles.sound_2d) || event.matches(&roles.sound_3d) {
                    line.push_str(" [programmer sound]");
                }
                println!("{}", line);
            }
        }
        Commands::Tone {
            config,
            frequency,
            duration,
            channels,
            sample_rate,
            position,
        } => {
            let settings = Settings::load(config.as_deref())?;
            let simulator = Arc::new(SimulatedMiddleware::new(settings.simulator().options()));
            let api = sound_api(&settings, &simulator);
            api.init()?;

            let duration: Duration = DurationString::from_string(duration)?.into();
            let buffer =
                AudioSampleBuffer::sine("tone", frequency, 0.5, duration, channels, sample_rate)?;

            let updater = simulator.spawn_update_thread(settings.simulator().update_interval()?)?;
            let instance = match position {
                Some(position) => api.play_3d(buffer, position)?,
                None => api.play_2d(buffer)?,
            };

            let start = Instant::now();
            while api.live_contexts() > 0 {
                if start.elapsed() > PLAYBACK_TIMEOUT {
                    return Err(format!("{} was never torn down", instance).into());
                }
                thread::sleep(Duration::from_millis(5));
            }
            updater.stop();

            match simulator.playback(instance) {
                Some(playback) => {
                    println!("Played {} through {}:", instance, playback.event.path);
                    println!("- sound: {}", playback.sound_name);
                    println!("- channels: {}", playback.channels);
                    println!("- sample rate: {}", playback.sample_rate);
                    println!("- samples: {}", playback.samples.len());
                    if let Some(attributes) = playback.attributes {
                        println!("- position: {}", attributes.position);
                    }
                }
                None => println!("{} played nothing.", instance),
            }
        }
    }

    Ok(())
}

fn sound_api(settings: &Settings, simulator: &Arc<SimulatedMiddleware>) -> SoundApi {
    let middleware: Arc<dyn Middleware> = simulator.clone();
    SoundApi::new(
        middleware,
        settings.bank_source(),
        settings.events().clone(),
    )
}
