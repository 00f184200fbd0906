//! `Wrenlink` API Functions
//!
//! Async functions for talking to a dongle driven by [`processor::run`](crate::processor::run).
//! Each call sends one request over a static channel and waits for its
//! response, so they can be used from any task: a USB class driver, a button
//! handler or a debug console.
//!
//! # Usage
//!
//! ```rust,no_run
//! use wrenlink::api::{get_state, set_mode, usb_audio_connected};
//! use wrenlink::{AudioMode, TransportMode};
//!
//! # async fn example() -> Result<(), wrenlink::DongleError> {
//! set_mode(AudioMode::Gaming, TransportMode::LeAudio).await?;
//! usb_audio_connected().await?;
//! let state = get_state().await?;
//! # let _ = state;
//! # Ok(())
//! # }
//! ```

use crate::{
    AudioMode, BluetoothAddress, DeviceHandle, DongleError, DongleEvent, DongleState,
    REQUEST_CHANNEL, RESPONSE_CHANNEL, Request, Response, TransportMode,
};

async fn request(request: Request) -> Response {
    REQUEST_CHANNEL.sender().send(request).await;
    RESPONSE_CHANNEL.receiver().receive().await
}

/// Deliver `event` to the dongle.
///
/// # Errors
///
/// Returns [`DongleError::ChannelError`] if the processor answers with an
/// unexpected response.
pub async fn send_event(event: DongleEvent) -> Result<(), DongleError> {
    match request(Request::Event(event)).await {
        Response::Ack => Ok(()),
        Response::Error(e) => Err(e),
        _ => Err(DongleError::ChannelError),
    }
}

/// Get the current application state.
///
/// # Errors
///
/// Returns [`DongleError::ChannelError`] if the response is unexpected.
pub async fn get_state() -> Result<DongleState, DongleError> {
    match request(Request::GetState).await {
        Response::State(state) => Ok(state),
        Response::Error(e) => Err(e),
        _ => Err(DongleError::ChannelError),
    }
}

/// Get the connected sink, or the most recently used one.
///
/// # Errors
///
/// Returns [`DongleError::ChannelError`] if the response is unexpected.
pub async fn get_current_sink() -> Result<Option<DeviceHandle>, DongleError> {
    match request(Request::GetCurrentSink).await {
        Response::CurrentSink(sink) => Ok(sink),
        Response::Error(e) => Err(e),
        _ => Err(DongleError::ChannelError),
    }
}

/// Get the current audio and transport mode.
///
/// # Errors
///
/// Returns [`DongleError::ChannelError`] if the response is unexpected.
pub async fn get_mode() -> Result<(AudioMode, TransportMode), DongleError> {
    match request(Request::GetMode).await {
        Response::Mode(audio, transport) => Ok((audio, transport)),
        Response::Error(e) => Err(e),
        _ => Err(DongleError::ChannelError),
    }
}

/// Switch audio and transport mode. A transport change waits for the
/// current sink to disconnect.
///
/// # Errors
///
/// Returns [`DongleError::InvalidParameter`] for broadcast over BR/EDR, or
/// [`DongleError::ChannelError`] if the response is unexpected.
pub async fn set_mode(audio: AudioMode, transport: TransportMode) -> Result<(), DongleError> {
    if !crate::dongle::DongleConfig::is_mode_combination_valid(audio, transport) {
        return Err(DongleError::InvalidParameter);
    }
    send_event(DongleEvent::SetMode { audio, transport }).await
}

/// Pair with the sink at `address`, given as `XX:XX:XX:XX:XX:XX`.
///
/// # Errors
///
/// Returns [`DongleError::InvalidParameter`] if the address is malformed,
/// [`DongleError::InvalidState`] unless the dongle is idle and
/// [`DongleError::AlreadyInProgress`] while another pairing runs.
pub async fn pair_sink(address: &str) -> Result<(), DongleError> {
    let address = BluetoothAddress::from_hex(address)?;
    match request(Request::PairSink(address)).await {
        Response::Ack => Ok(()),
        Response::Error(e) => Err(e),
        _ => Err(DongleError::ChannelError),
    }
}

/// Forget every paired sink, disconnecting first if needed.
///
/// # Errors
///
/// Returns [`DongleError::ChannelError`] if the response is unexpected.
pub async fn delete_paired_devices() -> Result<(), DongleError> {
    send_event(DongleEvent::DeletePairedDevices).await
}

/// Forget everything and reboot, disconnecting first if needed.
///
/// # Errors
///
/// Returns [`DongleError::ChannelError`] if the response is unexpected.
pub async fn factory_reset() -> Result<(), DongleError> {
    send_event(DongleEvent::FactoryReset).await
}

/// The USB audio streaming interface became active.
///
/// # Errors
///
/// Returns [`DongleError::ChannelError`] if the response is unexpected.
pub async fn usb_audio_connected() -> Result<(), DongleError> {
    send_event(DongleEvent::UsbAudioConnected).await
}

/// The USB audio streaming interface became inactive.
///
/// # Errors
///
/// Returns [`DongleError::ChannelError`] if the response is unexpected.
pub async fn usb_audio_disconnected() -> Result<(), DongleError> {
    send_event(DongleEvent::UsbAudioDisconnected).await
}
