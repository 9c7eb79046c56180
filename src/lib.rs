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

//! Plays in-memory sample buffers through an audio middleware's programmer sound
//! events.
//!
//! A host installs one [`SoundApi`] for the process, calls [`init`] once it is ready,
//! and then plays buffers with [`play_sound_2d`] and [`play_sound_3d`].

use std::sync::OnceLock;

pub mod api;
pub mod bank;
pub mod buffer;
pub mod callback;
pub mod config;
pub mod context;
pub mod error;
pub mod middleware;
pub mod spans;
#[cfg(test)]
mod testutil;

pub use api::{SoundApi, Spatial};
pub use buffer::AudioSampleBuffer;
pub use error::{BankError, CallbackError, PlaybackError};
pub use middleware::{InstanceHandle, Vec3};

static API: OnceLock<SoundApi> = OnceLock::new();

/// Installs the process wide sound API. Only the first install takes effect; later
/// ones hand their API back.
pub fn install(api: SoundApi) -> Result<(), SoundApi> {
    API.set(api)
}

/// Returns the installed sound API, if any.
pub fn installed() -> Option<&'static SoundApi> {
    API.get()
}

fn api() -> Result<&'static SoundApi, PlaybackError> {
    installed().ok_or(PlaybackError::NotInstalled)
}

/// Host initialization hook. Loads the bank; safe to call repeatedly.
pub fn init() -> Result<(), PlaybackError> {
    api()?.init()?;
    Ok(())
}

/// Plays a buffer without a position.
pub fn play_sound_2d(buffer: AudioSampleBuffer) -> Result<InstanceHandle, PlaybackError> {
    api()?.play_2d(buffer)
}

/// Plays a buffer at a position in world space.
pub fn play_sound_3d(
    buffer: AudioSampleBuffer,
    position: Vec3,
) -> Result<InstanceHandle, PlaybackError> {
    api()?.play_3d(buffer, position)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serial_test::serial;

    use super::*;
    use crate::bank::EmbeddedBank;
    use crate::config::EventIds;
    use crate::middleware::simulated::{SimulatedMiddleware, SimulatorOptions};
    use crate::middleware::Middleware;
    use crate::testutil::{ramp_buffer, scenario_buffer};

    static SIMULATOR: OnceLock<Arc<SimulatedMiddleware>> = OnceLock::new();

    fn simulator() -> &'static Arc<SimulatedMiddleware> {
        SIMULATOR.get_or_init(|| {
            let simulator = Arc::new(SimulatedMiddleware::new(SimulatorOptions::default()));
            let middleware: Arc<dyn Middleware> = simulator.clone();
            let api = SoundApi::new(middleware, Box::new(EmbeddedBank), EventIds::default());
            assert!(install(api).is_ok());
            simulator
        })
    }

    fn drain(simulator: &SimulatedMiddleware) {
        while simulator.update() > 0 {}
    }

    #[test]
    #[serial]
    fn test_init_loads_embedded_bank_once() {
        let simulator = simulator();
        init().unwrap();
        init().unwrap();

        assert_eq!(simulator.bank_loads(), 1);
        assert!(!installed().unwrap().is_disabled());
    }

    #[test]
    #[serial]
    fn test_play_sound_2d() {
        let simulator = simulator();
        let instance = play_sound_2d(scenario_buffer()).unwrap();
        drain(simulator);

        let playback = simulator.playback(instance).unwrap();
        assert_eq!(playback.samples, vec![0.1, -0.2, 0.3, -0.4]);
        assert_eq!(playback.event.path, "event:/2D action");
        assert_eq!(installed().unwrap().live_contexts(), 0);
    }

    #[test]
    #[serial]
    fn test_play_sound_3d() {
        let simulator = simulator();
        let position = Vec3::new(0.0, 1.5, 10.0);
        let instance = play_sound_3d(ramp_buffer("voice", 0, 128), position).unwrap();
        drain(simulator);

        let playback = simulator.playback(instance).unwrap();
        assert_eq!(playback.event.path, "event:/3D action");
        assert_eq!(playback.attributes.map(|a| a.position), Some(position));
        assert_eq!(installed().unwrap().live_contexts(), 0);
    }

    #[test]
    #[serial]
    fn test_second_install_is_rejected() {
        simulator();
        let other: Arc<dyn Middleware> =
            Arc::new(SimulatedMiddleware::new(SimulatorOptions::default()));
        let api = SoundApi::new(other, Box::new(EmbeddedBank), EventIds::default());

        assert!(install(api).is_err());
    }
}
