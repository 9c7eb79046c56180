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
use crate::context::{ContextKey, ContextState};
use crate::middleware::{InstanceHandle, MiddlewareError, SoundHandle};
use crate::spans::SpanCopyError;

/// Errors from bootstrapping the programmer sound bank. Any of these disables playback
/// for the rest of the process.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BankError {
    #[error("bank resource stream {0} is missing")]
    MissingResourceStream(String),

    #[error("failed to read bank {name}: {message}")]
    Read { name: String, message: String },

    #[error("bank load failed: {0} (code {code})", code = .0.code())]
    LoadFailed(MiddlewareError),

    #[error("bank unavailable after an earlier failure: {0}")]
    Unavailable(Box<BankError>),
}

/// Errors returned to callers of the playback API.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Bank(#[from] BankError),

    #[error("failed to {action} for event {event}: {source} (code {code})", code = .source.code())]
    Instance {
        event: String,
        action: &'static str,
        source: MiddlewareError,
    },

    #[error("no sound API has been installed")]
    NotInstalled,
}

/// Per request failures inside the programmer sound callback. These are logged and the
/// mapped status is returned to the middleware; the caller of `play` never sees them.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("{0} is not a valid event instance")]
    InvalidInstance(InstanceHandle),

    #[error("{0} has no playback context")]
    NoContext(InstanceHandle),

    #[error("{0} is missing from the registry")]
    ContextMissing(ContextKey),

    #[error("{0} callback carried no programmer sound properties")]
    MissingProperties(InstanceHandle),

    #[error("{context} received {event} while {state}")]
    OutOfOrder {
        context: ContextKey,
        state: ContextState,
        event: &'static str,
    },

    #[error("sound for {name} would be {bytes} bytes, which the middleware cannot address")]
    TooLarge { name: String, bytes: usize },

    #[error("failed to create sound: {0} (code {code})", code = .0.code())]
    SoundCreation(MiddlewareError),

    #[error("failed to lock {sound}: {source} (code {code})", code = .source.code())]
    Lock {
        sound: SoundHandle,
        source: MiddlewareError,
    },

    #[error("failed to copy samples into {sound}: {source}")]
    SampleCopy {
        sound: SoundHandle,
        source: SpanCopyError,
    },

    #[error("failed to unlock {sound}: {source} (code {code})", code = .source.code())]
    Unlock {
        sound: SoundHandle,
        source: MiddlewareError,
    },

    #[error("failed to release {sound}: {source} (code {code})", code = .source.code())]
    SoundRelease {
        sound: SoundHandle,
        source: MiddlewareError,
    },

    #[error("the middleware has shut down")]
    MiddlewareGone,
}

impl CallbackError {
    /// The status reported back to the middleware for this failure.
    pub fn status(&self) -> MiddlewareError {
        match self {
            CallbackError::InvalidInstance(_) => MiddlewareError::EventNotFound,
            CallbackError::NoContext(_) | CallbackError::ContextMissing(_) => {
                MiddlewareError::InvalidHandle
            }
            CallbackError::MissingProperties(_)
            | CallbackError::OutOfOrder { .. }
            | CallbackError::TooLarge { .. } => MiddlewareError::InvalidParam,
            CallbackError::SoundCreation(source) => *source,
            CallbackError::Lock { source, .. }
            | CallbackError::Unlock { source, .. }
            | CallbackError::SoundRelease { source, .. } => *source,
            CallbackError::SampleCopy { .. } => MiddlewareError::Format,
            CallbackError::MiddlewareGone => MiddlewareError::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_error_status() {
        let sound = SoundHandle::from_raw(3);
        assert_eq!(
            CallbackError::Lock {
                sound,
                source: MiddlewareError::NotReady
            }
            .status(),
            MiddlewareError::NotReady
        );
        assert_eq!(
            CallbackError::InvalidInstance(InstanceHandle::from_raw(1)).status(),
            MiddlewareError::EventNotFound
        );
        assert_eq!(
            CallbackError::SampleCopy {
                sound,
                source: SpanCopyError::Misaligned { index: 0, len: 3 }
            }
            .status(),
            MiddlewareError::Format
        );
    }

    #[test]
    fn test_messages_carry_status_codes() {
        let message = BankError::LoadFailed(MiddlewareError::FileBad).to_string();
        assert_eq!(message, "bank load failed: error loading file (code 13)");

        let unavailable = BankError::Unavailable(Box::new(BankError::MissingResourceStream(
            "Modded.bank".to_string(),
        )));
        assert_eq!(
            unavailable.to_string(),
            "bank unavailable after an earlier failure: bank resource stream Modded.bank is missing"
        );
    }
}
