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

//! Playback contexts and the registry that hands out their opaque keys.
//!
//! The middleware only offers an untyped, pointer sized user data slot per instance.
//! Each started instance gets a [`ContextKey`] in that slot; the callback resolves the
//! key back to the buffer it has to play. A context is inserted once when the instance
//! is started and removed once when the instance is destroyed.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::buffer::AudioSampleBuffer;
use crate::error::CallbackError;
use crate::middleware::SoundHandle;

/// Opaque key stored in an instance's user data. Zero is never a valid key, so an
/// instance without attached data resolves to no context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextKey(NonZeroUsize);

impl ContextKey {
    /// The value to store in the instance's user data slot.
    pub fn to_user_data(self) -> usize {
        self.0.get()
    }

    /// Recovers a key from an instance's user data slot.
    pub fn from_user_data(data: usize) -> Option<ContextKey> {
        NonZeroUsize::new(data).map(ContextKey)
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context#{}", self.0)
    }
}

/// Where a context is in the programmer sound lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Attached to an instance, waiting for the middleware to ask for a sound.
    Attached,
    /// A create callback is building the sound.
    Creating,
    /// The sound was handed to the middleware and is still alive.
    SoundCreated(SoundHandle),
    /// Sound creation failed; the middleware has nothing to release.
    CreateFailed,
    /// The sound was released; only instance teardown remains.
    SoundReleased,
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextState::Attached => write!(f, "attached"),
            ContextState::Creating => write!(f, "creating"),
            ContextState::SoundCreated(sound) => write!(f, "playing {}", sound),
            ContextState::CreateFailed => write!(f, "create failed"),
            ContextState::SoundReleased => write!(f, "sound released"),
        }
    }
}

/// The per instance state owned by the registry.
pub struct PlaybackContext {
    buffer: Arc<AudioSampleBuffer>,
    state: ContextState,
}

impl PlaybackContext {
    pub fn buffer(&self) -> &AudioSampleBuffer {
        &self.buffer
    }

    pub fn state(&self) -> ContextState {
        self.state
    }
}

/// Maps opaque keys to the contexts of live instances.
pub struct ContextRegistry {
    contexts: Mutex<HashMap<ContextKey, PlaybackContext>>,
    next_key: AtomicUsize,
    allocated: AtomicUsize,
    freed: AtomicUsize,
}

impl ContextRegistry {
    pub fn new() -> ContextRegistry {
        ContextRegistry {
            contexts: Mutex::new(HashMap::new()),
            next_key: AtomicUsize::new(1),
            allocated: AtomicUsize::new(0),
            freed: AtomicUsize::new(0),
        }
    }

    /// Stores a context for the buffer and returns its key.
    pub fn register(&self, buffer: AudioSampleBuffer) -> ContextKey {
        let mut raw = self.next_key.fetch_add(1, Ordering::Relaxed);
        if raw == 0 {
            // Wrapped around; zero means "no context".
            raw = self.next_key.fetch_add(1, Ordering::Relaxed);
        }
        let key = ContextKey::from_user_data(raw).unwrap_or(ContextKey(NonZeroUsize::MIN));

        self.contexts.lock().insert(
            key,
            PlaybackContext {
                buffer: Arc::new(buffer),
                state: ContextState::Attached,
            },
        );
        self.allocated.fetch_add(1, Ordering::Relaxed);

        debug!(context = %key, "Context registered");
        key
    }

    /// Returns the buffer for a live context.
    pub fn resolve(&self, key: ContextKey) -> Option<Arc<AudioSampleBuffer>> {
        self.contexts
            .lock()
            .get(&key)
            .map(|context| context.buffer.clone())
    }

    /// Returns the lifecycle state of a live context.
    pub fn state(&self, key: ContextKey) -> Option<ContextState> {
        self.contexts.lock().get(&key).map(|context| context.state)
    }

    /// Moves a context from attached to creating and returns the buffer to build the sound from.
    pub fn begin_create(&self, key: ContextKey) -> Result<Arc<AudioSampleBuffer>, CallbackError> {
        let mut contexts = self.contexts.lock();
        let context = contexts
            .get_mut(&key)
            .ok_or(CallbackError::ContextMissing(key))?;

        match context.state {
            ContextState::Attached => {
                context.state = ContextState::Creating;
                Ok(context.buffer.clone())
            }
            state => Err(CallbackError::OutOfOrder {
                context: key,
                state,
                event: "create",
            }),
        }
    }

    /// Records the outcome of a create callback.
    pub fn finish_create(
        &self,
        key: ContextKey,
        sound: Option<SoundHandle>,
    ) -> Result<(), CallbackError> {
        let mut contexts = self.contexts.lock();
        let context = contexts
            .get_mut(&key)
            .ok_or(CallbackError::ContextMissing(key))?;

        match context.state {
            ContextState::Creating => {
                context.state = match sound {
                    Some(sound) => ContextState::SoundCreated(sound),
                    None => ContextState::CreateFailed,
                };
                Ok(())
            }
            state => Err(CallbackError::OutOfOrder {
                context: key,
                state,
                event: "create",
            }),
        }
    }

    /// Moves a context from playing to released and returns the sound it was playing.
    pub fn release_sound(&self, key: ContextKey) -> Result<SoundHandle, CallbackError> {
        let mut contexts = self.contexts.lock();
        let context = contexts
            .get_mut(&key)
            .ok_or(CallbackError::ContextMissing(key))?;

        match context.state {
            ContextState::SoundCreated(sound) => {
                context.state = ContextState::SoundReleased;
                Ok(sound)
            }
            state => Err(CallbackError::OutOfOrder {
                context: key,
                state,
                event: "destroy",
            }),
        }
    }

    /// Removes a context. Each key can be freed once; afterwards it no longer resolves.
    pub fn free(&self, key: ContextKey) -> Result<PlaybackContext, CallbackError> {
        let context = self
            .contexts
            .lock()
            .remove(&key)
            .ok_or(CallbackError::ContextMissing(key))?;
        self.freed.fetch_add(1, Ordering::Relaxed);

        debug!(context = %key, state = %context.state, "Context freed");
        Ok(context)
    }

    /// The number of contexts currently alive.
    pub fn live(&self) -> usize {
        self.contexts.lock().len()
    }

    /// The number of contexts ever registered.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// The number of contexts ever freed.
    pub fn freed(&self) -> usize {
        self.freed.load(Ordering::Relaxed)
    }
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextRegistry")
            .field("live", &self.live())
            .field("allocated", &self.allocated())
            .field("freed", &self.freed())
            .finish()
    }
}
