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

//! The programmer sound callback.
//!
//! The middleware drives each instance through three callbacks, in order:
//!
//! ```text
//! CREATE_PROGRAMMER_SOUND  -> build a user sound, copy the samples in, hand it back
//! DESTROY_PROGRAMMER_SOUND -> release that sound
//! DESTROYED                -> free the playback context
//! ```
//!
//! Every other callback type is ignored. Callbacks arrive on the middleware's own
//! thread, so everything here works from the registry and the handles it is given.

use std::sync::{Arc, Weak};

use tracing::{debug, error, warn};

use crate::buffer::AudioSampleBuffer;
use crate::context::{ContextKey, ContextRegistry, ContextState};
use crate::error::CallbackError;
use crate::middleware::{
    CallbackParams, CallbackType, EventCallback, InstanceHandle, Middleware, MiddlewareError,
    Mode, SoundHandle, SoundInfo,
};
use crate::spans;

/// Builds the callback shared by every instance started through a sound API.
///
/// The middleware is held weakly: the middleware keeps the callback alive for as long
/// as it has instances, and the callback must not keep the middleware alive in turn.
pub fn programmer_sound_callback(
    middleware: Weak<dyn Middleware>,
    registry: Arc<ContextRegistry>,
) -> EventCallback {
    Arc::new(
        move |kind: CallbackType, instance: InstanceHandle, params: CallbackParams<'_>| {
            let middleware = match middleware.upgrade() {
                Some(middleware) => middleware,
                None => {
                    error!(%instance, callback = %kind, "{}", CallbackError::MiddlewareGone);
                    return Err(MiddlewareError::Internal);
                }
            };

            ProgrammerSound {
                middleware: middleware.as_ref(),
                registry: &registry,
            }
            .handle(kind, instance, params)
        },
    )
}

/// One callback invocation's view of the middleware and the registry.
struct ProgrammerSound<'a> {
    middleware: &'a dyn Middleware,
    registry: &'a ContextRegistry,
}

impl ProgrammerSound<'_> {
    fn handle(
        &self,
        kind: CallbackType,
        instance: InstanceHandle,
        params: CallbackParams<'_>,
    ) -> Result<(), MiddlewareError> {
        let result = match kind {
            CallbackType::CreateProgrammerSound => self.create(instance, params),
            CallbackType::DestroyProgrammerSound => self.destroy(instance, params),
            CallbackType::Destroyed => self.destroyed(instance),
            _ => return Ok(()),
        };

        result.map_err(|e| {
            let status = e.status();
            match &e {
                CallbackError::OutOfOrder { .. } | CallbackError::ContextMissing(_) => {
                    error!(%instance, callback = %kind, code = status.code(), "{}", e)
                }
                _ => warn!(%instance, callback = %kind, code = status.code(), "{}", e),
            }
            status
        })
    }

    /// Resolves the context key stored on the instance.
    fn context_key(&self, instance: InstanceHandle) -> Result<ContextKey, CallbackError> {
        if !self.middleware.is_valid(instance) {
            return Err(CallbackError::InvalidInstance(instance));
        }

        let data = self
            .middleware
            .user_data(instance)
            .map_err(|_| CallbackError::InvalidInstance(instance))?;
        ContextKey::from_user_data(data).ok_or(CallbackError::NoContext(instance))
    }

    fn create(
        &self,
        instance: InstanceHandle,
        mut params: CallbackParams<'_>,
    ) -> Result<(), CallbackError> {
        let key = self.context_key(instance)?;
        let properties = params
            .programmer_sound()
            .ok_or(CallbackError::MissingProperties(instance))?;
        let buffer = self.registry.begin_create(key)?;

        match self.build_sound(&buffer) {
            Ok(sound) => {
                self.registry.finish_create(key, Some(sound))?;
                properties.sound = Some(sound);
                properties.subsound_index = -1;
                debug!(
                    %instance,
                    %sound,
                    name = buffer.name(),
                    bytes = buffer.byte_len(),
                    "Programmer sound created"
                );
                Ok(())
            }
            Err(e) => {
                self.registry.finish_create(key, None)?;
                Err(e)
            }
        }
    }

    /// Creates a user sound sized for the buffer and fills it with the samples.
    fn build_sound(&self, buffer: &AudioSampleBuffer) -> Result<SoundHandle, CallbackError> {
        let length = u32::try_from(buffer.byte_len()).map_err(|_| CallbackError::TooLarge {
            name: buffer.name().to_string(),
            bytes: buffer.byte_len(),
        })?;
        let info = SoundInfo {
            length,
            format: buffer.format(),
            channels: buffer.channel_count(),
            default_frequency: buffer.sample_rate(),
        };

        let sound = self
            .middleware
            .create_sound(buffer.name(), Mode::OPEN_USER, &info)
            .map_err(CallbackError::SoundCreation)?;

        if let Err(e) = self.fill(sound, buffer, length) {
            // The middleware never sees this sound, so nobody else will release it.
            if let Err(release) = self.middleware.release_sound(sound) {
                warn!(%sound, code = release.code(), "Failed to release unfinished sound: {}", release);
            }
            return Err(e);
        }

        if let Err(e) = self.middleware.set_sound_mode(sound, Mode::DEFAULT) {
            warn!(%sound, code = e.code(), "Failed to set the sound mode: {}", e);
        }

        Ok(sound)
    }

    /// Locks the whole sound, copies the samples into the returned spans and unlocks it.
    /// The unlock happens whether or not the copy succeeded.
    fn fill(
        &self,
        sound: SoundHandle,
        buffer: &AudioSampleBuffer,
        length: u32,
    ) -> Result<(), CallbackError> {
        let mut region = self
            .middleware
            .lock_sound(sound, 0, length)
            .map_err(|source| CallbackError::Lock { sound, source })?;

        let copied = {
            // SAFETY: the region is locked until unlock_sound below, and the middleware does
            // not touch locked sound memory.
            let mut targets = unsafe { region.bytes_mut() };
            spans::copy_into_spans(buffer.samples(), &mut targets)
        };

        let unlocked = self
            .middleware
            .unlock_sound(sound, region)
            .map_err(|source| CallbackError::Unlock { sound, source });

        let copied = copied.map_err(|source| CallbackError::SampleCopy { sound, source })?;
        unlocked?;

        debug!(%sound, samples = copied, "Samples copied into sound");
        Ok(())
    }

    fn destroy(
        &self,
        instance: InstanceHandle,
        mut params: CallbackParams<'_>,
    ) -> Result<(), CallbackError> {
        let key = self.context_key(instance)?;
        let properties = params
            .programmer_sound()
            .ok_or(CallbackError::MissingProperties(instance))?;
        let created = self.registry.release_sound(key)?;

        let sound = match properties.sound.take() {
            Some(sound) if sound != created => {
                warn!(%instance, %sound, %created, "Releasing a different sound than was created");
                sound
            }
            Some(sound) => sound,
            None => created,
        };

        self.middleware
            .release_sound(sound)
            .map_err(|source| CallbackError::SoundRelease { sound, source })?;

        debug!(%instance, %sound, "Programmer sound released");
        Ok(())
    }

    fn destroyed(&self, instance: InstanceHandle) -> Result<(), CallbackError> {
        let key = self.context_key(instance)?;
        let context = self.registry.free(key)?;

        match context.state() {
            ContextState::Attached | ContextState::CreateFailed | ContextState::SoundReleased => {
                debug!(
                    %instance,
                    context = %key,
                    buffer = context.buffer().name(),
                    "Playback context freed"
                );
                Ok(())
            }
            // The context is gone either way; a sound still held here would otherwise leak.
            ContextState::SoundCreated(sound) => {
                if let Err(e) = self.middleware.release_sound(sound) {
                    warn!(%sound, code = e.code(), "Failed to release leftover sound: {}", e);
                }
                Err(CallbackError::OutOfOrder {
                    context: key,
                    state: context.state(),
                    event: "destroyed",
                })
            }
            state @ ContextState::Creating => Err(CallbackError::OutOfOrder {
                context: key,
                state,
                event: "destroyed",
            }),
        }
    }
}
