//! Collaborators the dongle drives.
//!
//! The Bluetooth stack, the DSP, the USB class drivers, persistent storage and
//! the UI all live outside this crate. Each is reached through one narrow trait
//! and [`DonglePlatform`] bundles them for [`UsbDongle`](super::UsbDongle).
//!
//! Requests that complete later carry a [`RequestToken`]. The completion event
//! echoes it back so a late answer to an abandoned request can be recognised.

use crate::constants::{
    APTX_ADAPTIVE_TARGET_LATENCY_US, APTX_LITE_6_25MS_TARGET_LATENCY_US,
    APTX_LITE_TARGET_LATENCY_US, LATENCY_THRESHOLD_US, LC3_7_5MS_TARGET_LATENCY_US,
    LC3_10MS_TARGET_LATENCY_US,
};
use crate::device::DeviceStore;
use crate::sources::{AudioSource, GenericSource, SourceRegistry};
use crate::{BluetoothAddress, DongleError};

use super::config::AudioMode;

/// LE Audio Client group of a connected sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GroupHandle(pub u16);

/// Correlates an LE Audio Client request with its completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RequestToken(pub u16);

/// CAP audio context requested from the LE Audio Client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CapContext {
    /// No stream may be started
    Prohibited,
    /// Music
    Media,
    /// Low latency audio
    Game,
    /// Low latency audio with a back channel microphone
    GameWithVbc,
    /// Bidirectional voice
    Conversational,
}

/// Streaming topology of the LE Audio Client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LeaClientMode {
    /// Connected isochronous streams to one sink group
    Unicast,
    /// Broadcast isochronous group
    Broadcast,
}

/// Codec and frame duration negotiated for an LE stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LeCodec {
    /// LC3, 10 ms frames
    Lc3_10Ms,
    /// LC3, 7.5 ms frames
    Lc3_7_5Ms,
    /// aptX Lite, default frames
    AptxLite,
    /// aptX Lite, 6.25 ms frames
    AptxLite6_25Ms,
    /// aptX adaptive
    AptxAdaptive,
}

impl LeCodec {
    /// Target end to end latency in microseconds
    #[must_use]
    pub const fn target_latency_us(self) -> u32 {
        match self {
            Self::Lc3_10Ms => LC3_10MS_TARGET_LATENCY_US,
            Self::Lc3_7_5Ms => LC3_7_5MS_TARGET_LATENCY_US,
            Self::AptxLite => APTX_LITE_TARGET_LATENCY_US,
            Self::AptxLite6_25Ms => APTX_LITE_6_25MS_TARGET_LATENCY_US,
            Self::AptxAdaptive => APTX_ADAPTIVE_TARGET_LATENCY_US,
        }
    }

    /// Latency window handed to the audio graph
    #[must_use]
    pub const fn latency(self) -> LatencyBounds {
        let target_us = self.target_latency_us();
        LatencyBounds {
            min_us: target_us.saturating_sub(LATENCY_THRESHOLD_US),
            target_us,
            max_us: target_us + LATENCY_THRESHOLD_US,
        }
    }
}

/// Accepted latency window in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LatencyBounds {
    /// Lower bound
    pub min_us: u32,
    /// Target
    pub target_us: u32,
    /// Upper bound
    pub max_us: u32,
}

/// Stream parameters reported when an LE stream starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamParams {
    /// Negotiated codec
    pub codec: LeCodec,
    /// Whether the sink sends microphone audio back
    pub microphone_present: bool,
}

/// Parameters of a USB to LE audio graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UsbLeGraphParams {
    /// LE source whose stream the graph feeds
    pub source: GenericSource,
    /// Use the USB voice interface instead of USB audio
    pub voice: bool,
    /// Route the sink microphone back to the USB host
    pub microphone: bool,
    /// Latency window
    pub latency: LatencyBounds,
}

/// Parameters of an analog line-in to LE audio graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AnalogLeGraphParams {
    /// LE source whose stream the graph feeds
    pub source: GenericSource,
    /// Latency window
    pub latency: LatencyBounds,
}

/// Whether stopping a graph should be reported back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopNotify {
    /// Nobody waits for the graph to stop
    Silent,
    /// Deliver [`DongleEvent::GraphStopped`](super::DongleEvent::GraphStopped) once stopped
    GraphStopped,
}

/// Sink service connection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SinkServiceMode {
    /// BR/EDR sinks only
    Bredr,
    /// LE Audio sinks only
    Le,
    /// Either, BR/EDR first
    DualPrefBredr,
    /// Either, LE Audio first
    DualPrefLe,
}

/// Application context shown by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AppUiContext {
    /// Not started
    Inactive,
    /// Nothing connected
    Idle,
    /// Pairing with a new sink
    Pairing,
    /// Connecting to a known sink
    Connecting,
    /// Sink connected, nothing streaming
    Connected,
    /// Audio or voice streaming
    Streaming,
}

/// Report sent to the USB host over HID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HidCommand {
    /// Consumer control volume up
    VolumeUp,
    /// Consumer control volume down
    VolumeDown,
    /// Telephony hook switch, answer
    HookSwitchAnswer,
    /// Telephony hook switch, hang up
    HookSwitchTerminate,
    /// Telephony button one
    ButtonOne,
    /// Telephony phone mute toggle
    PhoneMute,
}

/// aptX adaptive operating point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AptxQuality {
    /// High quality, higher latency
    HighQuality,
    /// Low latency
    LowLatency,
}

/// Persisted configuration records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigKey {
    /// Audio and transport modes
    Modes,
    /// Broadcast source name
    BroadcastName,
    /// Broadcast code
    BroadcastCode,
    /// Broadcast identifier
    BroadcastId,
    /// Broadcast audio configuration
    BroadcastAudioConfig,
}

/// LE Audio Client: unicast and broadcast stream control
pub trait LeAudioClient {
    /// Select unicast or broadcast operation
    fn set_client_mode(&mut self, mode: LeaClientMode);

    /// Start streaming `context`. `false` if the request was refused.
    fn start_streaming(
        &mut self,
        group: Option<GroupHandle>,
        context: CapContext,
        token: RequestToken,
    ) -> bool;

    /// Stop the active stream. `false` if the request was refused.
    fn stop_streaming(&mut self, group: Option<GroupHandle>, force: bool, token: RequestToken)
    -> bool;

    /// Abandon a stream start still in progress
    fn start_streaming_cancel_request(
        &mut self,
        group: Option<GroupHandle>,
        token: RequestToken,
    ) -> bool;

    /// Whether a unicast sink is connected on `group`
    fn is_unicast_connected(&self, group: Option<GroupHandle>) -> bool;

    /// Whether unicast streams are running on `group`
    fn is_unicast_streaming_active(&self, group: Option<GroupHandle>) -> bool;

    /// Whether a broadcast is running
    fn is_broadcast_streaming_active(&self) -> bool;

    /// CAP context of the running unicast session
    fn unicast_session_context(&self, group: Option<GroupHandle>) -> CapContext;

    /// Set the absolute volume of every sink in `group`
    fn set_group_volume(&mut self, group: GroupHandle, volume: u8);

    /// Broadcast source configuration changed and must be re-read
    fn broadcast_config_changed(&mut self);
}

/// DSP audio graphs ("chains")
pub trait AudioGraph {
    /// Start a USB to LE graph. `false` if it could not be built.
    fn start_usb_le(&mut self, params: &UsbLeGraphParams) -> bool;

    /// Stop the USB to LE graph
    fn stop_usb_le(&mut self, is_voice: bool, notify: StopNotify);

    /// Start an analog line-in to LE graph. `false` if it could not be built.
    fn start_analog_le(&mut self, params: &AnalogLeGraphParams) -> bool;

    /// Stop the analog line-in to LE graph
    fn stop_analog_le(&mut self);

    /// Start the A2DP encoder graph fed from `input`
    fn start_a2dp(&mut self, input: AudioSource);

    /// Stop the A2DP encoder graph
    fn stop_a2dp(&mut self, notify: StopNotify);

    /// Start the USB voice to SCO graph
    fn start_sco(&mut self);

    /// Stop the USB voice to SCO graph
    fn stop_sco(&mut self);

    /// No graph is running
    fn is_graph_idle(&self) -> bool;
}

/// Finds and connects a sink over BR/EDR or LE
pub trait SinkService {
    /// Connect to a known sink. `false` if there is nothing to connect to.
    fn connect_sink(&mut self) -> bool;

    /// Disconnect every sink
    fn disconnect_all(&mut self);

    /// Change the connection policy. `false` if the connected sink uses a
    /// transport the new policy excludes, which then needs a disconnect.
    fn set_service_mode(&mut self, mode: SinkServiceMode) -> bool;

    /// Allow sink connections
    fn enable_sink_service(&mut self);

    /// Refuse sink connections
    fn disable_sink_service(&mut self);
}

/// BR/EDR audio profiles (A2DP, AVRCP, HFP AG)
pub trait BredrAudio {
    /// A2DP media channel connected to the sink
    fn is_media_available(&self) -> bool;

    /// HFP service level connection up
    fn is_voice_available(&self) -> bool;

    /// Open or resume the A2DP media channel
    fn media_connect(&mut self);

    /// Suspend the A2DP media channel
    fn media_suspend(&mut self);

    /// Connect the audio profiles of the current sink
    fn connect_audio_profiles(&mut self);

    /// Connect the voice profile to `addr`
    fn connect_voice_profile(&mut self, addr: BluetoothAddress);

    /// Open the SCO link. `true` if it is already up.
    fn voice_audio_connect(&mut self) -> bool;

    /// Close the SCO link. `true` if it is already down.
    fn voice_audio_disconnect(&mut self) -> bool;

    /// Indicate an incoming call to the sink
    fn incoming_call(&mut self);

    /// Answer the call on the sink
    fn accept_call(&mut self);

    /// Reject or end the call on the sink
    fn reject_call(&mut self);

    /// AVRCP absolute volume
    fn set_avrcp_volume(&mut self, volume: u8);

    /// Toggle the HFP microphone mute
    fn toggle_microphone_mute(&mut self);

    /// Preferred aptX adaptive operating point
    fn set_aptx_quality(&mut self, quality: AptxQuality);

    /// The A2DP stream uses aptX adaptive
    fn is_aptx_adaptive_active(&self) -> bool;
}

/// User interface indications
pub trait Ui {
    /// Current application context
    fn app_context(&mut self, context: AppUiContext);

    /// The input rescan stopped converging
    fn rescan_stalled(&mut self);
}

/// Mode indication LED
pub trait Led {
    /// Show the pattern of `mode`
    fn show_audio_mode(&mut self, mode: AudioMode);
}

/// USB device side towards the host
pub trait UsbHost {
    /// Enumerated by a host
    fn is_usb_attached(&self) -> bool;

    /// Send a HID report
    fn send_hid(&mut self, command: HidCommand);

    /// A USB graph stopped and its interface may be released
    fn usb_chain_stopped(&mut self, is_voice: bool);
}

/// Persistent key/value storage
pub trait ConfigStore {
    /// Read `key` into `buf`, returning the stored length. Bytes beyond
    /// `buf.len()` are not copied.
    fn load_config(&self, key: ConfigKey, buf: &mut [u8]) -> Option<usize>;

    /// Write `data` under `key`
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::StorageFailed`] if the record cannot be written.
    fn store_config(&mut self, key: ConfigKey, data: &[u8]) -> Result<(), DongleError>;

    /// Erase every record
    fn clear_config(&mut self);
}

/// ACL links and pairing
pub trait AclControl {
    /// Create and hold an ACL to `addr`
    fn create_acl(&mut self, addr: BluetoothAddress);

    /// Release a held ACL
    fn release_acl(&mut self, addr: BluetoothAddress);

    /// Whether an ACL to `addr` is up
    fn is_acl_connected(&self, addr: BluetoothAddress) -> bool;

    /// Start pairing over the held ACL
    fn pair_device(&mut self, addr: BluetoothAddress);
}

/// Device level services
pub trait System {
    /// Programmed public address
    fn local_address(&self) -> BluetoothAddress;

    /// Restart the device
    fn reboot(&mut self);
}

/// Everything [`UsbDongle`](super::UsbDongle) needs from the platform
pub trait DonglePlatform:
    SourceRegistry
    + DeviceStore
    + LeAudioClient
    + AudioGraph
    + SinkService
    + BredrAudio
    + Ui
    + Led
    + UsbHost
    + ConfigStore
    + AclControl
    + System
{
}

impl<T> DonglePlatform for T where
    T: SourceRegistry
        + DeviceStore
        + LeAudioClient
        + AudioGraph
        + SinkService
        + BredrAudio
        + Ui
        + Led
        + UsbHost
        + ConfigStore
        + AclControl
        + System
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_table() {
        let expected = [
            (LeCodec::Lc3_10Ms, 25_000),
            (LeCodec::Lc3_7_5Ms, 19_000),
            (LeCodec::AptxLite, 9_900),
            (LeCodec::AptxLite6_25Ms, 12_340),
            (LeCodec::AptxAdaptive, 30_000),
        ];
        for (codec, target_us) in expected {
            let bounds = codec.latency();
            assert_eq!(bounds.target_us, target_us);
            assert_eq!(bounds.min_us, target_us - LATENCY_THRESHOLD_US);
            assert_eq!(bounds.max_us, target_us + LATENCY_THRESHOLD_US);
        }
    }
}
