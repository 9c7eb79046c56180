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

//! The slice of the event-based audio middleware that programmer sounds need.
//!
//! The middleware owns banks, event instances and native sounds. Everything is
//! addressed through small copyable handles, and the middleware calls back into
//! user code through an [`EventCallback`] registered per instance.

use std::fmt;
use std::ptr::NonNull;
use std::str::FromStr;
use std::sync::Arc;

use crate::buffer::SampleFormat;

pub mod simulated;

/// Failure statuses reported by the middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MiddlewareError {
    #[error("error loading file")]
    FileBad,

    #[error("unsupported or invalid format")]
    Format,

    #[error("an internal error occurred")]
    Internal,

    #[error("an invalid object handle was used")]
    InvalidHandle,

    #[error("an invalid parameter was passed")]
    InvalidParam,

    #[error("not enough memory or resources")]
    Memory,

    #[error("the specified resource is not ready")]
    NotReady,

    #[error("the bank has already been loaded")]
    AlreadyLoaded,

    #[error("the requested event could not be found")]
    EventNotFound,
}

impl MiddlewareError {
    /// The numeric status code the middleware reports for this failure.
    pub fn code(self) -> i32 {
        match self {
            MiddlewareError::FileBad => 13,
            MiddlewareError::Format => 19,
            MiddlewareError::Internal => 28,
            MiddlewareError::InvalidHandle => 30,
            MiddlewareError::InvalidParam => 31,
            MiddlewareError::Memory => 38,
            MiddlewareError::NotReady => 46,
            MiddlewareError::AlreadyLoaded => 70,
            MiddlewareError::EventNotFound => 74,
        }
    }
}

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw middleware handle value.
            pub fn from_raw(raw: u64) -> Self {
                $name(raw)
            }

            /// Returns the raw middleware handle value.
            pub fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $label, self.0)
            }
        }
    };
}

handle_type!(
    /// A loaded bank.
    BankHandle,
    "bank"
);
handle_type!(
    /// One live occurrence of an event.
    InstanceHandle,
    "instance"
);
handle_type!(
    /// A native sound object owned by the middleware.
    SoundHandle,
    "sound"
);

/// Describes one event defined by a loaded bank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDescription {
    /// The authored path, e.g. `event:/2D action`.
    pub path: String,
    /// The event GUID in braced string form.
    pub id: String,
    /// Whether the event is spatialized.
    pub is_3d: bool,
}

impl EventDescription {
    /// Returns true if the given identifier names this event, either by GUID or by path.
    pub fn matches(&self, identifier: &str) -> bool {
        self.id.eq_ignore_ascii_case(identifier) || self.path == identifier
    }
}

/// A position or direction in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);
    pub const FORWARD: Vec3 = Vec3::new(0.0, 0.0, 1.0);
    pub const UP: Vec3 = Vec3::new(0.0, 1.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Vec3 {
        Vec3 { x, y, z }
    }
}

impl FromStr for Vec3 {
    type Err = String;

    /// Parses a position in the form `x,y,z`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|part| part.trim().parse::<f32>())
            .collect::<Result<Vec<f32>, _>>()
            .map_err(|e| format!("invalid position {}: {}", s, e))?;

        match parts.as_slice() {
            [x, y, z] => Ok(Vec3::new(*x, *y, *z)),
            _ => Err(format!("position {} must have exactly three components", s)),
        }
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// The 3D attributes of an event instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attributes3D {
    pub position: Vec3,
    pub velocity: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
}

impl Attributes3D {
    /// Stationary attributes at the given position, facing forward with the default up vector.
    pub fn at(position: Vec3) -> Attributes3D {
        Attributes3D {
            position,
            velocity: Vec3::ZERO,
            forward: Vec3::FORWARD,
            up: Vec3::UP,
        }
    }
}

/// Sound creation mode flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode(u32);

impl Mode {
    pub const DEFAULT: Mode = Mode(0x0000_0000);
    pub const OPEN_USER: Mode = Mode(0x0000_0400);

    pub fn contains(self, other: Mode) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Extended information for creating a user-filled sound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoundInfo {
    /// Length of the sound data in bytes.
    pub length: u32,
    pub format: SampleFormat,
    pub channels: u16,
    pub default_frequency: u32,
}

/// Lifecycle points at which the middleware invokes an instance's callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackType {
    Created,
    Destroyed,
    Starting,
    Started,
    Stopped,
    CreateProgrammerSound,
    DestroyProgrammerSound,
}

impl fmt::Display for CallbackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallbackType::Created => "CREATED",
            CallbackType::Destroyed => "DESTROYED",
            CallbackType::Starting => "STARTING",
            CallbackType::Started => "STARTED",
            CallbackType::Stopped => "STOPPED",
            CallbackType::CreateProgrammerSound => "CREATE_PROGRAMMER_SOUND",
            CallbackType::DestroyProgrammerSound => "DESTROY_PROGRAMMER_SOUND",
        };
        f.write_str(name)
    }
}

/// The parameter block passed with programmer sound callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgrammerSoundProperties {
    /// The name of the programmer sound slot.
    pub name: String,
    /// The sound to play, written by the callback on create and read on destroy.
    pub sound: Option<SoundHandle>,
    /// The sub-sound to play, or -1 for the sound itself.
    pub subsound_index: i32,
}

impl ProgrammerSoundProperties {
    pub fn new(name: &str) -> ProgrammerSoundProperties {
        ProgrammerSoundProperties {
            name: name.to_string(),
            sound: None,
            subsound_index: -1,
        }
    }
}

/// The lifecycle-specific parameters that accompany a callback.
#[derive(Debug)]
pub enum CallbackParams<'a> {
    None,
    ProgrammerSound(&'a mut ProgrammerSoundProperties),
}

impl CallbackParams<'_> {
    /// Returns the programmer sound parameter block, if that is what was passed.
    pub fn programmer_sound(&mut self) -> Option<&mut ProgrammerSoundProperties> {
        match self {
            CallbackParams::ProgrammerSound(properties) => Some(properties),
            CallbackParams::None => None,
        }
    }
}

/// A callback the middleware invokes for instance lifecycle events, on a thread of its choosing.
pub type EventCallback = Arc<
    dyn Fn(CallbackType, InstanceHandle, CallbackParams<'_>) -> Result<(), MiddlewareError>
        + Send
        + Sync,
>;

/// One contiguous writable range of a locked sound.
#[derive(Debug)]
pub struct Span {
    ptr: NonNull<u8>,
    len: usize,
}

impl Span {
    /// A zero length span.
    pub fn empty() -> Span {
        Span {
            ptr: NonNull::dangling(),
            len: 0,
        }
    }

    /// Creates a span over memory owned by the middleware.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes until the region
    /// that contains this span is unlocked.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Span {
        Span { ptr, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Views the span as a mutable byte slice.
    ///
    /// # Safety
    ///
    /// The region must still be locked, and no other reference into it may exist.
    unsafe fn bytes_mut(&mut self) -> &mut [u8] {
        if self.len == 0 {
            return &mut [];
        }
        // SAFETY: upheld by the caller and by the contract of `from_raw_parts`.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

/// The writable region returned by locking a sound. A ring buffer may hand out the
/// region as two spans when it wraps; the second span is empty otherwise.
#[derive(Debug)]
pub struct LockedRegion {
    first: Span,
    second: Span,
}

impl LockedRegion {
    pub fn new(first: Span, second: Span) -> LockedRegion {
        LockedRegion { first, second }
    }

    pub fn first(&self) -> &Span {
        &self.first
    }

    pub fn second(&self) -> &Span {
        &self.second
    }

    /// Total writable length in bytes.
    pub fn len(&self) -> usize {
        self.first.len + self.second.len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrows both spans as byte slices, in write order.
    ///
    /// # Safety
    ///
    /// The region must not have been unlocked yet, and the middleware must not touch
    /// the locked memory while the returned slices are alive.
    pub unsafe fn bytes_mut(&mut self) -> [&mut [u8]; 2] {
        let LockedRegion { first, second } = self;
        // SAFETY: the spans are disjoint and the caller guarantees the lock is held.
        unsafe { [first.bytes_mut(), second.bytes_mut()] }
    }
}

/// The middleware surface used to host programmer sounds.
pub trait Middleware: Send + Sync {
    /// Loads a bank from an in-memory copy of its bytes.
    fn load_bank_memory(&self, data: &[u8]) -> Result<BankHandle, MiddlewareError>;

    /// Lists the events defined by a loaded bank.
    fn bank_events(&self, bank: BankHandle) -> Result<Vec<EventDescription>, MiddlewareError>;

    /// Creates an instance of the event with the given GUID or path.
    fn create_instance(&self, event: &str) -> Result<InstanceHandle, MiddlewareError>;

    /// Returns true if the instance handle refers to a live instance.
    fn is_valid(&self, instance: InstanceHandle) -> bool;

    /// Stores a pointer sized value on the instance.
    fn set_user_data(&self, instance: InstanceHandle, data: usize) -> Result<(), MiddlewareError>;

    /// Returns the value stored with `set_user_data`, or zero if none was stored.
    fn user_data(&self, instance: InstanceHandle) -> Result<usize, MiddlewareError>;

    fn set_3d_attributes(
        &self,
        instance: InstanceHandle,
        attributes: Attributes3D,
    ) -> Result<(), MiddlewareError>;

    /// Registers the lifecycle callback for the instance.
    fn set_callback(
        &self,
        instance: InstanceHandle,
        callback: EventCallback,
    ) -> Result<(), MiddlewareError>;

    fn start(&self, instance: InstanceHandle) -> Result<(), MiddlewareError>;

    /// Marks the instance for destruction once it has stopped.
    fn release(&self, instance: InstanceHandle) -> Result<(), MiddlewareError>;

    /// Creates a native sound.
    fn create_sound(
        &self,
        name: &str,
        mode: Mode,
        info: &SoundInfo,
    ) -> Result<SoundHandle, MiddlewareError>;

    /// Returns the length of the sound data in bytes.
    fn sound_length(&self, sound: SoundHandle) -> Result<u32, MiddlewareError>;

    /// Locks `length` bytes of sound data starting at `offset` for writing.
    fn lock_sound(
        &self,
        sound: SoundHandle,
        offset: u32,
        length: u32,
    ) -> Result<LockedRegion, MiddlewareError>;

    /// Unlocks a region returned by `lock_sound`.
    fn unlock_sound(&self, sound: SoundHandle, region: LockedRegion)
        -> Result<(), MiddlewareError>;

    fn set_sound_mode(&self, sound: SoundHandle, mode: Mode) -> Result<(), MiddlewareError>;

    fn release_sound(&self, sound: SoundHandle) -> Result<(), MiddlewareError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec3_parse() {
        assert_eq!(
            "1, -2.5,3".parse::<Vec3>().unwrap(),
            Vec3::new(1.0, -2.5, 3.0)
        );
        assert!("1,2".parse::<Vec3>().is_err());
        assert!("1,2,x".parse::<Vec3>().is_err());
    }

    #[test]
    fn test_attributes_at_position() {
        let attributes = Attributes3D::at(Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(attributes.position, Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(attributes.velocity, Vec3::ZERO);
        assert_eq!(attributes.forward, Vec3::FORWARD);
        assert_eq!(attributes.up, Vec3::UP);
    }

    #[test]
    fn test_mode_flags() {
        assert!(Mode::OPEN_USER.contains(Mode::OPEN_USER));
        assert!(Mode::OPEN_USER.contains(Mode::DEFAULT));
        assert!(!Mode::DEFAULT.contains(Mode::OPEN_USER));
    }

    #[test]
    fn test_event_matches_id_or_path() {
        let event = EventDescription {
            path: "event:/2D action".to_string(),
            id: "{2e2adb70-14df-4219-bb0d-b5c6ffd8fd4f}".to_string(),
            is_3d: false,
        };
        assert!(event.matches("{2E2ADB70-14DF-4219-BB0D-B5C6FFD8FD4F}"));
        assert!(event.matches("event:/2D action"));
        assert!(!event.matches("event:/3D action"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(MiddlewareError::EventNotFound.code(), 74);
        assert_eq!(MiddlewareError::InvalidHandle.code(), 30);
    }
}
