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

//! Fire and forget playback of in-memory sample buffers.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bank::{BankBootstrap, BankSource};
use crate::buffer::AudioSampleBuffer;
use crate::callback::programmer_sound_callback;
use crate::config::EventIds;
use crate::context::{ContextKey, ContextRegistry};
use crate::error::{BankError, PlaybackError};
use crate::middleware::{
    Attributes3D, BankHandle, EventCallback, InstanceHandle, Middleware, MiddlewareError, Vec3,
};

/// Where a sound plays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Spatial {
    /// No position; played through the 2D event.
    Flat,
    /// Played through the 3D event at the given position.
    At(Vec3),
}

impl fmt::Display for Spatial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Spatial::Flat => write!(f, "2d"),
            Spatial::At(position) => write!(f, "3d at {}", position),
        }
    }
}

/// Plays sample buffers through programmer sound events.
pub struct SoundApi {
    middleware: Arc<dyn Middleware>,
    bank: BankBootstrap,
    registry: Arc<ContextRegistry>,
    callback: EventCallback,
    events: EventIds,
}

impl SoundApi {
    pub fn new(
        middleware: Arc<dyn Middleware>,
        source: Box<dyn BankSource>,
        events: EventIds,
    ) -> SoundApi {
        let registry = Arc::new(ContextRegistry::new());
        let callback = programmer_sound_callback(Arc::downgrade(&middleware), registry.clone());
        SoundApi {
            bank: BankBootstrap::new(source, events.all()),
            middleware,
            registry,
            callback,
            events,
        }
    }

    /// Loads the bank. Safe to call any number of times; playback calls it as well.
    pub fn init(&self) -> Result<BankHandle, BankError> {
        self.bank.ensure_loaded(self.middleware.as_ref())
    }

    /// Starts playing the buffer and returns the instance playing it. The instance
    /// releases itself once the sound finishes; the handle is for identification only.
    pub fn play(
        &self,
        buffer: AudioSampleBuffer,
        spatial: Spatial,
    ) -> Result<InstanceHandle, PlaybackError> {
        self.init()?;

        let event = match spatial {
            Spatial::Flat => &self.events.sound_2d,
            Spatial::At(_) => &self.events.sound_3d,
        };
        let instance =
            self.middleware
                .create_instance(event)
                .map_err(|source| PlaybackError::Instance {
                    event: event.clone(),
                    action: "create instance",
                    source,
                })?;

        let name = buffer.name().to_string();
        let samples = buffer.sample_count();
        let duration = buffer.duration();
        let key = self.registry.register(buffer);

        if let Err((action, source)) = self.attach(instance, key, spatial) {
            // The callback never saw this context, so it is freed here instead.
            if let Err(e) = self.registry.free(key) {
                warn!(%instance, context = %key, "Unable to discard context: {}", e);
            }
            if let Err(e) = self.middleware.release(instance) {
                warn!(%instance, code = e.code(), "Unable to release instance: {}", e);
            }
            return Err(PlaybackError::Instance {
                event: event.clone(),
                action,
                source,
            });
        }

        // From here on the callback owns the context and frees it on teardown.
        if let Err(e) = self.middleware.start(instance) {
            warn!(%instance, code = e.code(), "Unable to start instance: {}", e);
        }
        if let Err(e) = self.middleware.release(instance) {
            warn!(%instance, code = e.code(), "Unable to release instance: {}", e);
        }

        info!(
            %instance,
            context = %key,
            %spatial,
            name = %name,
            samples,
            ?duration,
            "Playing sound"
        );
        Ok(instance)
    }

    fn attach(
        &self,
        instance: InstanceHandle,
        key: ContextKey,
        spatial: Spatial,
    ) -> Result<(), (&'static str, MiddlewareError)> {
        self.middleware
            .set_user_data(instance, key.to_user_data())
            .map_err(|e| ("set user data", e))?;

        if let Spatial::At(position) = spatial {
            self.middleware
                .set_3d_attributes(instance, Attributes3D::at(position))
                .map_err(|e| ("set 3D attributes", e))?;
        }

        self.middleware
            .set_callback(instance, self.callback.clone())
            .map_err(|e| ("set callback", e))?;

        debug!(%instance, context = %key, "Context attached");
        Ok(())
    }

    /// Plays the buffer without a position.
    pub fn play_2d(&self, buffer: AudioSampleBuffer) -> Result<InstanceHandle, PlaybackError> {
        self.play(buffer, Spatial::Flat)
    }

    /// Plays the buffer at a position in world space.
    pub fn play_3d(
        &self,
        buffer: AudioSampleBuffer,
        position: Vec3,
    ) -> Result<InstanceHandle, PlaybackError> {
        self.play(buffer, Spatial::At(position))
    }

    /// The number of playback contexts not yet freed.
    pub fn live_contexts(&self) -> usize {
        self.registry.live()
    }

    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventIds {
        &self.events
    }

    /// Whether playback has been disabled by a failed bank load.
    pub fn is_disabled(&self) -> bool {
        self.bank.is_failed()
    }
}

impl fmt::Debug for SoundApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoundApi")
            .field("bank", &self.bank)
            .field("registry", &self.registry)
            .field("events", &self.events)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::bank::MemoryBank;
    use crate::middleware::simulated::{SimulatedMiddleware, SimulatorOptions};
    use crate::testutil::{eventually, ramp_buffer, scenario_buffer, TEST_BANK};

    fn api_with(
        simulator: &Arc<SimulatedMiddleware>,
        bank: Option<&str>,
        events: EventIds,
    ) -> SoundApi {
        let middleware: Arc<dyn Middleware> = simulator.clone();
        SoundApi::new(
            middleware,
            Box::new(MemoryBank::new(
                "test.bank",
                bank.map(|bank| bank.as_bytes().to_vec()),
            )),
            events,
        )
    }

    fn setup(options: SimulatorOptions) -> (Arc<SimulatedMiddleware>, SoundApi) {
        let simulator = Arc::new(SimulatedMiddleware::new(options));
        let api = api_with(&simulator, Some(TEST_BANK), EventIds::default());
        (simulator, api)
    }

    fn drain(simulator: &SimulatedMiddleware) {
        while simulator.update() > 0 {}
    }

    #[test]
    fn test_single_span_scenario() {
        let (simulator, api) = setup(SimulatorOptions::default());
        let instance = api.play_2d(scenario_buffer()).unwrap();
        assert_eq!(api.live_contexts(), 1);

        // CREATE
        simulator.update();
        let playback = simulator.playback(instance).unwrap();
        assert_eq!(playback.samples, vec![0.1, -0.2, 0.3, -0.4]);
        assert_eq!(playback.samples.len() * 4, scenario_buffer().byte_len());
        assert_eq!(playback.channels, 1);
        assert_eq!(playback.sample_rate, 44100);
        assert_eq!(playback.event.id, "{2e2adb70-14df-4219-bb0d-b5c6ffd8fd4f}");
        assert_eq!(playback.attributes, None);
        assert_eq!(simulator.live_sounds(), 1);

        // DESTROY
        simulator.update();
        assert_eq!(simulator.live_sounds(), 0);
        assert_eq!(api.live_contexts(), 1);

        // DESTROYED
        simulator.update();
        assert_eq!(api.live_contexts(), 0);
        assert_eq!(api.registry().allocated(), 1);
        assert_eq!(api.registry().freed(), 1);
        assert!(!simulator.is_valid(instance));
    }

    #[test]
    fn test_two_span_scenario() {
        let (simulator, api) = setup(SimulatorOptions {
            ring_offset: Some(8),
            ..Default::default()
        });
        let instance = api.play_2d(scenario_buffer()).unwrap();
        drain(&simulator);

        assert_eq!(
            simulator.playback(instance).unwrap().samples,
            vec![0.1, -0.2, 0.3, -0.4]
        );
        assert_eq!(api.live_contexts(), 0);
        assert_eq!(simulator.live_sounds(), 0);
    }

    #[test]
    fn test_3d_playback() {
        let (simulator, api) = setup(SimulatorOptions::default());
        let position = Vec3::new(1.0, 2.0, -3.0);
        let instance = api.play_3d(ramp_buffer("voice", 0, 64), position).unwrap();
        drain(&simulator);

        let playback = simulator.playback(instance).unwrap();
        assert!(playback.event.is_3d);
        assert_eq!(playback.event.id, "{6ced009f-0452-428d-9d94-994ae51660fc}");
        let attributes = playback.attributes.unwrap();
        assert_eq!(attributes.position, position);
        assert_eq!(attributes.velocity, Vec3::ZERO);
        assert_eq!(attributes.forward, Vec3::FORWARD);
        assert_eq!(attributes.up, Vec3::UP);
        assert_eq!(playback.samples, ramp_buffer("voice", 0, 64).samples());
        assert_eq!(api.live_contexts(), 0);
    }

    #[test]
    fn test_stereo_playback() {
        let (simulator, api) = setup(SimulatorOptions {
            ring_offset: Some(100),
            ..Default::default()
        });
        let buffer = AudioSampleBuffer::sine(
            "tone",
            440.0,
            0.5,
            Duration::from_millis(10),
            2,
            48000,
        )
        .unwrap();
        let instance = api.play_2d(buffer.clone()).unwrap();
        drain(&simulator);

        let playback = simulator.playback(instance).unwrap();
        assert_eq!(playback.channels, 2);
        assert_eq!(playback.sample_rate, 48000);
        assert_eq!(playback.samples, buffer.samples());
    }

    #[test]
    fn test_bank_failure_disables_playback() {
        let simulator = Arc::new(SimulatedMiddleware::new(SimulatorOptions::default()));
        let api = api_with(&simulator, None, EventIds::default());

        assert!(matches!(
            api.play_2d(scenario_buffer()),
            Err(PlaybackError::Bank(BankError::MissingResourceStream(_)))
        ));
        assert!(api.is_disabled());
        assert!(matches!(
            api.play_3d(scenario_buffer(), Vec3::ZERO),
            Err(PlaybackError::Bank(BankError::Unavailable(_)))
        ));
        assert_eq!(api.live_contexts(), 0);
        assert_eq!(simulator.live_instances(), 0);
        assert_eq!(api.registry().allocated(), 0);
    }

    #[test]
    fn test_init_is_idempotent() {
        let (simulator, api) = setup(SimulatorOptions::default());
        let bank = api.init().unwrap();
        assert_eq!(api.init().unwrap(), bank);

        api.play_2d(scenario_buffer()).unwrap();
        assert_eq!(simulator.bank_loads(), 1);
    }

    #[test]
    fn test_unknown_event() {
        let simulator = Arc::new(SimulatedMiddleware::new(SimulatorOptions::default()));
        let api = api_with(
            &simulator,
            Some(TEST_BANK),
            EventIds {
                sound_2d: "event:/missing".to_string(),
                ..Default::default()
            },
        );

        match api.play_2d(scenario_buffer()) {
            Err(PlaybackError::Instance { event, action, source }) => {
                assert_eq!(event, "event:/missing");
                assert_eq!(action, "create instance");
                assert_eq!(source, MiddlewareError::EventNotFound);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(api.registry().allocated(), 0);

        // The 3D event is still fine.
        api.play_3d(scenario_buffer(), Vec3::ZERO).unwrap();
    }

    #[test]
    fn test_sound_creation_failure_frees_context() {
        let (simulator, api) = setup(SimulatorOptions::default());
        simulator.fail_next_create_sound(MiddlewareError::Memory);

        let instance = api.play_2d(scenario_buffer()).unwrap();
        drain(&simulator);

        assert!(simulator.playback(instance).is_none());
        assert_eq!(api.live_contexts(), 0);
        assert_eq!(simulator.live_sounds(), 0);
        assert_eq!(simulator.live_instances(), 0);

        // Later requests are unaffected.
        let instance = api.play_2d(scenario_buffer()).unwrap();
        drain(&simulator);
        assert!(simulator.playback(instance).is_some());
    }

    #[test]
    fn test_lock_failure_frees_everything() {
        let (simulator, api) = setup(SimulatorOptions::default());
        simulator.fail_next_lock(MiddlewareError::NotReady);

        let instance = api.play_2d(scenario_buffer()).unwrap();
        drain(&simulator);

        assert!(simulator.playback(instance).is_none());
        assert_eq!(api.live_contexts(), 0);
        assert_eq!(simulator.live_sounds(), 0);
        assert_eq!(simulator.locked_sounds(), 0);
    }

    #[test]
    fn test_empty_buffer_is_a_request_failure() {
        let (simulator, api) = setup(SimulatorOptions::default());
        let empty = AudioSampleBuffer::new("empty", 0, 1, 44100, Vec::new()).unwrap();

        let instance = api.play_2d(empty).unwrap();
        drain(&simulator);

        assert!(simulator.playback(instance).is_none());
        assert_eq!(api.live_contexts(), 0);
    }

    #[test]
    fn test_many_sounds_interleave() {
        let (simulator, api) = setup(SimulatorOptions {
            ring_offset: Some(40),
            ..Default::default()
        });

        let instances: Vec<_> = (0..10)
            .map(|i| {
                let buffer = ramp_buffer(&format!("clip-{}", i), i * 100, 32 + i);
                api.play_2d(buffer).unwrap()
            })
            .collect();
        assert_eq!(api.live_contexts(), 10);
        drain(&simulator);

        for (i, instance) in instances.iter().enumerate() {
            let playback = simulator.playback(*instance).unwrap();
            assert_eq!(playback.sound_name, format!("clip-{}", i));
            assert_eq!(
                playback.samples,
                ramp_buffer("expected", i * 100, 32 + i).samples()
            );
        }
        assert_eq!(api.live_contexts(), 0);
        assert_eq!(api.registry().freed(), 10);
    }

    #[test]
    fn test_concurrent_playback_with_update_thread() {
        let (simulator, api) = setup(SimulatorOptions::default());
        let api = Arc::new(api);
        let updater = simulator
            .spawn_update_thread(Duration::from_millis(1))
            .unwrap();

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let api = api.clone();
                thread::spawn(move || {
                    (0..10)
                        .map(|i| {
                            let start = t * 1000 + i * 10;
                            let instance = api.play_2d(ramp_buffer("ramp", start, 16)).unwrap();
                            (instance, start)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let started: Vec<(InstanceHandle, usize)> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        eventually(
            || api.live_contexts() == 0,
            "Playback contexts were never freed",
        );
        updater.stop();

        assert_eq!(simulator.playbacks().len(), 40);
        for (instance, start) in started {
            assert_eq!(
                simulator.playback(instance).unwrap().samples,
                ramp_buffer("ramp", start, 16).samples()
            );
        }
        assert_eq!(api.registry().allocated(), 40);
        assert_eq!(api.registry().freed(), 40);
        assert_eq!(simulator.live_sounds(), 0);
    }

    #[test]
    fn test_dropped_middleware_fails_callbacks() {
        let simulator = Arc::new(SimulatedMiddleware::new(SimulatorOptions::default()));
        let api = api_with(&simulator, Some(TEST_BANK), EventIds::default());
        let instance = api.play_2d(scenario_buffer()).unwrap();

        // Only the weak reference inside the callback remains.
        let callback = api.callback.clone();
        drop(api);
        drop(simulator);

        assert_eq!(
            callback(
                crate::middleware::CallbackType::Destroyed,
                instance,
                crate::middleware::CallbackParams::None
            ),
            Err(MiddlewareError::Internal)
        );
    }
}
