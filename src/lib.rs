#![no_std]
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![allow(clippy::too_many_lines)]

#[macro_use]
mod fmt;

mod address;
pub mod api;
pub mod broadcast;
pub mod constants;
pub mod device;
pub mod dongle;
pub mod le_audio_volume;
pub mod processor;
pub mod sources;
pub mod timer;
pub mod volume;

#[cfg(test)]
mod test_support;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::constants::EVENT_QUEUE_DEPTH;

pub use address::BluetoothAddress;
pub use broadcast::{BisSyncState, BroadcastManagerData};
pub use device::DeviceHandle;
pub use dongle::{
    AudioMode, DongleEvent, DongleOptions, DonglePlatform, DongleState, TransportMode, UsbDongle,
};
pub use le_audio_volume::{EarbudPlatform, LeAudioVolume};
pub use sources::{AudioSource, GenericSource, VoiceSource};
pub use volume::{Volume, VolumeConfig, VolumeRange};

pub(crate) static REQUEST_CHANNEL: Channel<CriticalSectionRawMutex, Request, EVENT_QUEUE_DEPTH> =
    Channel::new();

pub(crate) static RESPONSE_CHANNEL: Channel<CriticalSectionRawMutex, Response, EVENT_QUEUE_DEPTH> =
    Channel::new();

/// Errors of the dongle and earbud state machines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DongleError {
    /// A collaborator could not be set up
    InitializationFailed,
    /// `init` was called twice
    AlreadyInitialised,
    /// Used before `init`
    NotInitialised,
    /// No room left for another observer
    ObserverListFull,
    /// A bounded queue is full
    QueueFull,
    /// Wire or storage record could not be parsed
    Malformed,
    /// Argument out of range
    InvalidParameter,
    /// Request or response channel misbehaved
    ChannelError,
    /// Persistent storage refused a write
    StorageFailed,
    /// Not allowed in the current state, or an undefined state value
    InvalidState,
    /// The requested context cannot be streamed
    InvalidContext,
    /// Another operation of the same kind is running
    AlreadyInProgress,
    /// No sink connected
    NotConnected,
}

/// Requests handled by [`processor::run`]
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Request {
    /// Deliver an event to the dongle
    Event(DongleEvent),
    /// Pair with a sink
    PairSink(BluetoothAddress),
    /// Current application state
    GetState,
    /// Connected or most recently used sink
    GetCurrentSink,
    /// Current audio and transport mode
    GetMode,
}

/// Responses sent back by [`processor::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Response {
    /// Request accepted
    Ack,
    /// Current application state
    State(DongleState),
    /// Connected or most recently used sink
    CurrentSink(Option<DeviceHandle>),
    /// Current audio and transport mode
    Mode(AudioMode, TransportMode),
    /// Request failed
    Error(DongleError),
}
