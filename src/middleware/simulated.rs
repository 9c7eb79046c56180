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

//! An in-process middleware. Doesn't output any audio, but honors the programmer
//! sound lifecycle and records what each instance would have played.
//!
//! Banks are YAML documents listing their events. Each call to [`SimulatedMiddleware::update`]
//! advances every live instance by one lifecycle step:
//!
//! ```text
//! started  --update--> CREATE_PROGRAMMER_SOUND (playback recorded)
//! playing  --update--> DESTROY_PROGRAMMER_SOUND
//! stopped  --update--> DESTROYED, once the instance has been released
//! ```
//!
//! Callbacks are invoked without any internal lock held, so they are free to call
//! back into the middleware.

use std::collections::HashMap;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{
    Attributes3D, BankHandle, CallbackParams, CallbackType, EventCallback, EventDescription,
    InstanceHandle, LockedRegion, Middleware, MiddlewareError, Mode, ProgrammerSoundProperties,
    SoundHandle, SoundInfo, Span,
};
use crate::buffer::SampleFormat;
use crate::spans::read_from_spans;

/// Tunables for the simulated middleware.
#[derive(Debug, Clone, Default)]
pub struct SimulatorOptions {
    /// Byte offset at which each sound's ring buffer starts. When set, locking a whole
    /// sound returns two spans that wrap around the end of the ring.
    pub ring_offset: Option<u32>,
    /// How long a bank load takes.
    pub bank_load_delay: Duration,
}

/// What an instance played, as read back out of its programmer sound.
#[derive(Debug, Clone, PartialEq)]
pub struct Playback {
    pub instance: InstanceHandle,
    pub event: EventDescription,
    pub attributes: Option<Attributes3D>,
    pub sound_name: String,
    pub channels: u16,
    pub sample_rate: u32,
    pub mode: Mode,
    pub samples: Vec<f32>,
}

/// The YAML bank format understood by the simulator.
#[derive(Deserialize)]
struct BankFile {
    name: String,
    events: Vec<BankEvent>,
}

#[derive(Deserialize)]
struct BankEvent {
    path: String,
    id: String,
    #[serde(default)]
    is_3d: bool,
}

struct Bank {
    name: String,
    events: Vec<EventDescription>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Created,
    Starting,
    Playing(SoundHandle),
    Stopped,
}

struct Instance {
    event: EventDescription,
    user_data: usize,
    callback: Option<EventCallback>,
    attributes: Option<Attributes3D>,
    stage: Stage,
    released: bool,
}

struct Sound {
    name: String,
    mode: Mode,
    info: SoundInfo,
    data: Box<[u8]>,
    ring_start: usize,
    /// Address and length of the outstanding lock.
    lock: Option<(usize, usize)>,
}

impl Sound {
    fn in_ring_order(&self) -> Vec<f32> {
        let (head, tail) = self.data.split_at(self.ring_start);
        read_from_spans(&[tail, head])
    }
}

/// One-shot failures to return from the next matching call.
#[derive(Default)]
struct Faults {
    bank_load: Option<MiddlewareError>,
    create_sound: Option<MiddlewareError>,
    lock: Option<MiddlewareError>,
    unlock: Option<MiddlewareError>,
    set_mode: Option<MiddlewareError>,
}

#[derive(Default)]
struct State {
    banks: HashMap<BankHandle, Bank>,
    instances: HashMap<InstanceHandle, Instance>,
    sounds: HashMap<SoundHandle, Sound>,
    playbacks: Vec<Playback>,
    faults: Faults,
}

impl State {
    fn instance_mut(&mut self, instance: InstanceHandle) -> Result<&mut Instance, MiddlewareError> {
        self.instances
            .get_mut(&instance)
            .ok_or(MiddlewareError::InvalidHandle)
    }

    fn sound_mut(&mut self, sound: SoundHandle) -> Result<&mut Sound, MiddlewareError> {
        self.sounds
            .get_mut(&sound)
            .ok_or(MiddlewareError::InvalidHandle)
    }
}

/// The lifecycle work an update performs for one instance.
enum Step {
    Create,
    Destroy(SoundHandle),
    Teardown,
}

/// A simulated audio middleware.
pub struct SimulatedMiddleware {
    options: SimulatorOptions,
    state: Mutex<State>,
    /// Serializes updates so callbacks for an instance never overlap.
    update_lock: Mutex<()>,
    next_handle: AtomicU64,
    bank_loads: AtomicUsize,
}

impl SimulatedMiddleware {
    pub fn new(options: SimulatorOptions) -> SimulatedMiddleware {
        SimulatedMiddleware {
            options,
            state: Mutex::new(State::default()),
            update_lock: Mutex::new(()),
            next_handle: AtomicU64::new(1),
            bank_loads: AtomicUsize::new(0),
        }
    }

    fn next_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    /// Advances every live instance by one lifecycle step, invoking callbacks as it goes.
    /// Returns the number of instances that advanced.
    pub fn update(&self) -> usize {
        let _serial = self.update_lock.lock();

        let mut work: Vec<(InstanceHandle, Step, Option<EventCallback>, String)> = {
            let state = self.state.lock();
            state
                .instances
                .iter()
                .filter_map(|(handle, instance)| {
                    let step = match instance.stage {
                        Stage::Starting => Step::Create,
                        Stage::Playing(sound) => Step::Destroy(sound),
                        Stage::Created | Stage::Stopped if instance.released => Step::Teardown,
                        _ => return None,
                    };
                    Some((
                        *handle,
                        step,
                        instance.callback.clone(),
                        instance.event.path.clone(),
                    ))
                })
                .collect()
        };
        work.sort_by_key(|(handle, ..)| *handle);

        for (instance, step, callback, slot) in work.iter() {
            match step {
                Step::Create => self.create_programmer_sound(*instance, callback.as_ref(), slot),
                Step::Destroy(sound) => {
                    self.destroy_programmer_sound(*instance, *sound, callback.as_ref(), slot)
                }
                Step::Teardown => self.teardown(*instance, callback.as_ref()),
            }
        }

        work.len()
    }

    fn notify(&self, callback: &EventCallback, kind: CallbackType, instance: InstanceHandle) {
        if let Err(e) = callback(kind, instance, CallbackParams::None) {
            debug!(%instance, callback = %kind, code = e.code(), "Callback returned an error");
        }
    }

    fn set_stage(&self, instance: InstanceHandle, stage: Stage) {
        if let Some(instance) = self.state.lock().instances.get_mut(&instance) {
            instance.stage = stage;
        }
    }

    fn create_programmer_sound(
        &self,
        instance: InstanceHandle,
        callback: Option<&EventCallback>,
        slot: &str,
    ) {
        let callback = match callback {
            Some(callback) => callback,
            None => {
                debug!(%instance, "No callback registered, nothing to play");
                self.set_stage(instance, Stage::Stopped);
                return;
            }
        };

        self.notify(callback, CallbackType::Starting, instance);

        let mut properties = ProgrammerSoundProperties::new(slot);
        let result = callback(
            CallbackType::CreateProgrammerSound,
            instance,
            CallbackParams::ProgrammerSound(&mut properties),
        );

        let stage = match (result, properties.sound) {
            (Ok(()), Some(sound)) => match self.record_playback(instance, sound) {
                Ok(()) => Stage::Playing(sound),
                Err(e) => {
                    warn!(%instance, %sound, code = e.code(), "Programmer sound is not playable: {}", e);
                    Stage::Stopped
                }
            },
            (Ok(()), None) => {
                warn!(%instance, "Programmer sound callback returned no sound");
                Stage::Stopped
            }
            (Err(e), _) => {
                debug!(%instance, code = e.code(), "Programmer sound creation failed: {}", e);
                Stage::Stopped
            }
        };
        self.set_stage(instance, stage);

        if matches!(stage, Stage::Playing(_)) {
            self.notify(callback, CallbackType::Started, instance);
        }
    }

    fn record_playback(
        &self,
        instance: InstanceHandle,
        sound: SoundHandle,
    ) -> Result<(), MiddlewareError> {
        let mut state = self.state.lock();
        let event = state.instance_mut(instance)?.event.clone();
        let attributes = state.instance_mut(instance)?.attributes;

        let sound_data = state.sound_mut(sound)?;
        if sound_data.lock.is_some() {
            return Err(MiddlewareError::NotReady);
        }

        let playback = Playback {
            instance,
            event,
            attributes,
            sound_name: sound_data.name.clone(),
            channels: sound_data.info.channels,
            sample_rate: sound_data.info.default_frequency,
            mode: sound_data.mode,
            samples: sound_data.in_ring_order(),
        };
        debug!(
            %instance,
            %sound,
            samples = playback.samples.len(),
            "Playing programmer sound"
        );
        state.playbacks.push(playback);
        Ok(())
    }

    fn destroy_programmer_sound(
        &self,
        instance: InstanceHandle,
        sound: SoundHandle,
        callback: Option<&EventCallback>,
        slot: &str,
    ) {
        if let Some(callback) = callback {
            let mut properties = ProgrammerSoundProperties::new(slot);
            properties.sound = Some(sound);
            if let Err(e) = callback(
                CallbackType::DestroyProgrammerSound,
                instance,
                CallbackParams::ProgrammerSound(&mut properties),
            ) {
                warn!(%instance, %sound, code = e.code(), "Programmer sound destroy failed: {}", e);
            }
            self.notify(callback, CallbackType::Stopped, instance);
        }
        self.set_stage(instance, Stage::Stopped);
    }

    fn teardown(&self, instance: InstanceHandle, callback: Option<&EventCallback>) {
        if let Some(callback) = callback {
            self.notify(callback, CallbackType::Destroyed, instance);
        }
        self.state.lock().instances.remove(&instance);
        debug!(%instance, "Instance destroyed");
    }

    /// Starts a thread that calls [`update`](Self::update) at the given interval until the
    /// returned handle is dropped.
    pub fn spawn_update_thread(
        self: &Arc<Self>,
        interval: Duration,
    ) -> std::io::Result<UpdateThread> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let middleware = Arc::clone(self);

        let join = thread::Builder::new()
            .name("middleware-update".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        middleware.update();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(UpdateThread {
            stop_tx: Some(stop_tx),
            join: Some(join),
        })
    }

    /// The number of times a bank load was attempted.
    pub fn bank_loads(&self) -> usize {
        self.bank_loads.load(Ordering::Relaxed)
    }

    pub fn live_instances(&self) -> usize {
        self.state.lock().instances.len()
    }

    pub fn live_sounds(&self) -> usize {
        self.state.lock().sounds.len()
    }

    /// The number of sounds with an outstanding lock.
    pub fn locked_sounds(&self) -> usize {
        self.state
            .lock()
            .sounds
            .values()
            .filter(|sound| sound.lock.is_some())
            .count()
    }

    /// Everything played so far, in the order it started.
    pub fn playbacks(&self) -> Vec<Playback> {
        self.state.lock().playbacks.clone()
    }

    pub fn playback(&self, instance: InstanceHandle) -> Option<Playback> {
        self.state
            .lock()
            .playbacks
            .iter()
            .find(|playback| playback.instance == instance)
            .cloned()
    }

    /// The raw contents of an unlocked sound, as floats in memory order.
    pub fn sound_memory(&self, sound: SoundHandle) -> Option<Vec<f32>> {
        let state = self.state.lock();
        let sound = state.sounds.get(&sound)?;
        if sound.lock.is_some() {
            return None;
        }
        Some(read_from_spans(&[&sound.data]))
    }

    /// The contents of an unlocked sound, starting at its ring offset.
    pub fn sound_in_ring_order(&self, sound: SoundHandle) -> Option<Vec<f32>> {
        let state = self.state.lock();
        let sound = state.sounds.get(&sound)?;
        if sound.lock.is_some() {
            return None;
        }
        Some(sound.in_ring_order())
    }

    pub fn sound_mode(&self, sound: SoundHandle) -> Option<Mode> {
        self.state.lock().sounds.get(&sound).map(|sound| sound.mode)
    }

    pub fn fail_next_bank_load(&self, error: MiddlewareError) {
        self.state.lock().faults.bank_load = Some(error);
    }

    pub fn fail_next_create_sound(&self, error: MiddlewareError) {
        self.state.lock().faults.create_sound = Some(error);
    }

    pub fn fail_next_lock(&self, error: MiddlewareError) {
        self.state.lock().faults.lock = Some(error);
    }

    pub fn fail_next_unlock(&self, error: MiddlewareError) {
        self.state.lock().faults.unlock = Some(error);
    }

    pub fn fail_next_set_mode(&self, error: MiddlewareError) {
        self.state.lock().faults.set_mode = Some(error);
    }
}

impl Middleware for SimulatedMiddleware {
    fn load_bank_memory(&self, data: &[u8]) -> Result<BankHandle, MiddlewareError> {
        self.bank_loads.fetch_add(1, Ordering::Relaxed);
        if !self.options.bank_load_delay.is_zero() {
            thread::sleep(self.options.bank_load_delay);
        }

        if let Some(error) = self.state.lock().faults.bank_load.take() {
            return Err(error);
        }

        let file: BankFile = serde_yml::from_slice(data).map_err(|e| {
            warn!(err = %e, "Unable to parse bank");
            MiddlewareError::FileBad
        })?;

        let mut state = self.state.lock();
        if state.banks.values().any(|bank| bank.name == file.name) {
            return Err(MiddlewareError::AlreadyLoaded);
        }

        let handle = BankHandle::from_raw(self.next_handle());
        let events = file
            .events
            .into_iter()
            .map(|event| EventDescription {
                path: event.path,
                id: event.id,
                is_3d: event.is_3d,
            })
            .collect::<Vec<_>>();
        info!(bank = %file.name, events = events.len(), "Bank loaded");
        state.banks.insert(
            handle,
            Bank {
                name: file.name,
                events,
            },
        );
        Ok(handle)
    }

    fn bank_events(&self, bank: BankHandle) -> Result<Vec<EventDescription>, MiddlewareError> {
        self.state
            .lock()
            .banks
            .get(&bank)
            .map(|bank| bank.events.clone())
            .ok_or(MiddlewareError::InvalidHandle)
    }

    fn create_instance(&self, event: &str) -> Result<InstanceHandle, MiddlewareError> {
        let mut state = self.state.lock();
        let description = state
            .banks
            .values()
            .flat_map(|bank| bank.events.iter())
            .find(|description| description.matches(event))
            .cloned()
            .ok_or(MiddlewareError::EventNotFound)?;

        let handle = InstanceHandle::from_raw(self.next_handle());
        state.instances.insert(
            handle,
            Instance {
                event: description,
                user_data: 0,
                callback: None,
                attributes: None,
                stage: Stage::Created,
                released: false,
            },
        );
        Ok(handle)
    }

    fn is_valid(&self, instance: InstanceHandle) -> bool {
        self.state.lock().instances.contains_key(&instance)
    }

    fn set_user_data(&self, instance: InstanceHandle, data: usize) -> Result<(), MiddlewareError> {
        self.state.lock().instance_mut(instance)?.user_data = data;
        Ok(())
    }

    fn user_data(&self, instance: InstanceHandle) -> Result<usize, MiddlewareError> {
        Ok(self.state.lock().instance_mut(instance)?.user_data)
    }

    fn set_3d_attributes(
        &self,
        instance: InstanceHandle,
        attributes: Attributes3D,
    ) -> Result<(), MiddlewareError> {
        self.state.lock().instance_mut(instance)?.attributes = Some(attributes);
        Ok(())
    }

    fn set_callback(
        &self,
        instance: InstanceHandle,
        callback: EventCallback,
    ) -> Result<(), MiddlewareError> {
        self.state.lock().instance_mut(instance)?.callback = Some(callback);
        Ok(())
    }

    fn start(&self, instance: InstanceHandle) -> Result<(), MiddlewareError> {
        let mut state = self.state.lock();
        let instance = state.instance_mut(instance)?;
        if instance.stage == Stage::Created {
            instance.stage = Stage::Starting;
        }
        Ok(())
    }

    fn release(&self, instance: InstanceHandle) -> Result<(), MiddlewareError> {
        self.state.lock().instance_mut(instance)?.released = true;
        Ok(())
    }

    fn create_sound(
        &self,
        name: &str,
        mode: Mode,
        info: &SoundInfo,
    ) -> Result<SoundHandle, MiddlewareError> {
        let mut state = self.state.lock();
        if let Some(error) = state.faults.create_sound.take() {
            return Err(error);
        }

        if !mode.contains(Mode::OPEN_USER) {
            return Err(MiddlewareError::InvalidParam);
        }
        if info.format != SampleFormat::PcmFloat {
            return Err(MiddlewareError::Format);
        }
        if info.length == 0 || info.channels == 0 || info.default_frequency == 0 {
            return Err(MiddlewareError::InvalidParam);
        }

        let length = info.length as usize;
        let ring_start = self
            .options
            .ring_offset
            .map(|offset| offset as usize % length)
            .unwrap_or(0);

        let handle = SoundHandle::from_raw(self.next_handle());
        state.sounds.insert(
            handle,
            Sound {
                name: name.to_string(),
                mode,
                info: info.clone(),
                data: vec![0u8; length].into_boxed_slice(),
                ring_start,
                lock: None,
            },
        );
        debug!(sound = %handle, name, bytes = length, "Sound created");
        Ok(handle)
    }

    fn sound_length(&self, sound: SoundHandle) -> Result<u32, MiddlewareError> {
        Ok(self.state.lock().sound_mut(sound)?.info.length)
    }

    fn lock_sound(
        &self,
        sound: SoundHandle,
        offset: u32,
        length: u32,
    ) -> Result<LockedRegion, MiddlewareError> {
        let mut state = self.state.lock();
        let fault = state.faults.lock.take();
        let sound = state.sound_mut(sound)?;
        if sound.lock.is_some() {
            return Err(MiddlewareError::NotReady);
        }
        if let Some(error) = fault {
            return Err(error);
        }

        let size = sound.data.len();
        let (offset, length) = (offset as usize, length as usize);
        if offset + length > size {
            return Err(MiddlewareError::InvalidParam);
        }

        let start = (sound.ring_start + offset) % size;
        let first_len = length.min(size - start);
        let second_len = length - first_len;

        let base = sound.data.as_mut_ptr();
        // SAFETY: start < size, so the pointer stays inside the allocation.
        let first_ptr = NonNull::new(unsafe { base.add(start) }).ok_or(MiddlewareError::Internal)?;
        // SAFETY: [start, start + first_len) and [0, second_len) lie within the sound data
        // and do not overlap, because second_len <= start. The data is boxed, so it does not
        // move while the sound is locked, and nothing reads it until it is unlocked.
        let region = unsafe {
            let first = Span::from_raw_parts(first_ptr, first_len);
            let second = match NonNull::new(base) {
                Some(ptr) if second_len > 0 => Span::from_raw_parts(ptr, second_len),
                _ => Span::empty(),
            };
            LockedRegion::new(first, second)
        };

        sound.lock = Some((first_ptr.as_ptr() as usize, length));
        Ok(region)
    }

    fn unlock_sound(
        &self,
        sound: SoundHandle,
        region: LockedRegion,
    ) -> Result<(), MiddlewareError> {
        let mut state = self.state.lock();
        let fault = state.faults.unlock.take();
        let sound = state.sound_mut(sound)?;

        match sound.lock {
            Some((address, length))
                if address == region.first().as_ptr() as usize && length == region.len() =>
            {
                sound.lock = None;
            }
            _ => return Err(MiddlewareError::InvalidParam),
        }

        match fault {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn set_sound_mode(&self, sound: SoundHandle, mode: Mode) -> Result<(), MiddlewareError> {
        let mut state = self.state.lock();
        if let Some(error) = state.faults.set_mode.take() {
            return Err(error);
        }
        state.sound_mut(sound)?.mode = mode;
        Ok(())
    }

    fn release_sound(&self, sound: SoundHandle) -> Result<(), MiddlewareError> {
        let mut state = self.state.lock();
        if state.sound_mut(sound)?.lock.is_some() {
            return Err(MiddlewareError::NotReady);
        }
        state.sounds.remove(&sound);
        debug!(%sound, "Sound released");
        Ok(())
    }
}

impl fmt::Debug for SimulatedMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimulatedMiddleware")
            .field("banks", &state.banks.len())
            .field("instances", &state.instances.len())
            .field("sounds", &state.sounds.len())
            .field("playbacks", &state.playbacks.len())
            .finish()
    }
}

/// Runs [`SimulatedMiddleware::update`] on a background thread until dropped.
pub struct UpdateThread {
    stop_tx: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl UpdateThread {
    /// Stops the thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender disconnects the channel and ends the loop.
        self.stop_tx.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("Middleware update thread panicked");
            }
        }
    }
}

impl Drop for UpdateThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
