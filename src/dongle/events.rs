//! Inputs of the dongle state machines.

use crate::BluetoothAddress;
use crate::device::DeviceHandle;
use crate::sources::{AudioSource, MuteChange, VoiceSource, VolumeChange};

use super::config::{AudioMode, SinkTransport, TransportMode};
use super::platform::{CapContext, GroupHandle, RequestToken, StreamParams};

/// Media context reported by LE Audio or the BR/EDR media layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MediaContext {
    /// No media link
    Disconnected,
    /// Media link up, not streaming
    Connected,
    /// Media streaming
    Streaming,
}

/// Call state reported by the sink telephony profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TelephonyContext {
    /// A call is in progress on the sink
    InCall,
    /// The sink is ringing
    RingingIncoming,
    /// Connected, no call
    Connected,
}

/// Call state reported by the USB host over the HID telephony page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HidCallEvent {
    /// Host rings
    IncomingRinging,
    /// Host stopped ringing
    IncomingEnded,
    /// Call answered on the host
    CallActive,
    /// Call ended on the host
    CallEnded,
    /// Call put on hold
    HoldActive,
    /// Call taken off hold
    HoldInactive,
}

/// Indications from the LE Audio Client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LeaEvent {
    /// Unicast connection attempt finished
    ConnectInd {
        /// Connection established
        success: bool,
        /// Group of the sink
        group: GroupHandle,
    },
    /// Unicast group disconnected
    DisconnectInd {
        /// Group that went away
        group: GroupHandle,
    },
    /// Stream start finished
    StreamStartInd {
        /// Group, `None` for broadcast
        group: Option<GroupHandle>,
        /// Token of the request, `None` if started by the client itself
        token: Option<RequestToken>,
        /// Stream running
        success: bool,
        /// CAP context the stream was configured for
        audio_context: CapContext,
        /// LE source role of the stream
        sender: AudioSource,
        /// Negotiated stream parameters
        params: StreamParams,
    },
    /// Stream stopped
    StreamStopInd {
        /// Group, `None` for broadcast
        group: Option<GroupHandle>,
        /// Token of the request, `None` if stopped by the remote
        token: Option<RequestToken>,
    },
    /// Cancellation of a stream start finished
    StartCancelComplete {
        /// Group, `None` for broadcast
        group: Option<GroupHandle>,
        /// Token of the cancel request
        token: Option<RequestToken>,
        /// The start was cancelled before the stream came up
        success: bool,
    },
}

/// Everything that can happen to the dongle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DongleEvent {
    /// System initialisation finished
    SystemActive,
    /// USB audio streaming interface became active
    UsbAudioConnected,
    /// USB audio streaming interface became inactive
    UsbAudioDisconnected,
    /// Analog input plugged in
    LineInConnected,
    /// Analog input unplugged
    LineInDisconnected,
    /// Voice audio path of `source` came up
    VoiceAudioConnected(VoiceSource),
    /// Voice audio path of `source` went down
    VoiceAudioDisconnected(VoiceSource),
    /// Sink telephony state
    Telephony(TelephonyContext),
    /// USB HID telephony state
    HidCall(HidCallEvent),
    /// Sink media state
    Media(MediaContext),
    /// HFP service level connection established
    VoiceProfileConnected,
    /// USB host deconfigured the device
    UsbDeviceDeconfigured,
    /// USB bus suspended
    UsbSuspend,
    /// USB bus resumed
    UsbResume,
    /// USB audio interface reconfigured
    UsbAudioConfigChanged {
        /// Sample rate differs from the running graph
        sample_rate_changed: bool,
    },
    /// USB voice interface reconfigured
    UsbVoiceConfigChanged,
    /// LE Audio Client indication
    Lea(LeaEvent),
    /// A graph stopped with [`StopNotify::GraphStopped`](super::platform::StopNotify::GraphStopped)
    GraphStopped {
        /// The graph carried USB voice
        is_voice: bool,
    },
    /// Sink service connected a sink
    SinkConnected {
        /// Device record of the sink
        device: DeviceHandle,
        /// Transport it connected over
        transport: SinkTransport,
    },
    /// Sink service failed to connect any sink
    SinkConnectFailed,
    /// Sink disconnected
    SinkDisconnected {
        /// Device record of the sink
        device: DeviceHandle,
    },
    /// First BR/EDR profile connected to a sink not yet known as connected
    SinkFirstProfileConnected {
        /// Device record of the sink
        device: DeviceHandle,
    },
    /// Pair with the sink at `addr`
    PairSink(BluetoothAddress),
    /// ACL for pairing was created or failed
    PairingAclComplete {
        /// ACL is up
        connected: bool,
    },
    /// Pairing finished
    PairingCfm {
        /// Bonded
        success: bool,
        /// Remote address
        addr: BluetoothAddress,
    },
    /// Forget every paired sink
    DeletePairedDevices,
    /// Forget everything and reboot
    FactoryReset,
    /// Switch audio and transport modes
    SetMode {
        /// New audio mode
        audio: AudioMode,
        /// New transport mode
        transport: TransportMode,
    },
    /// Move to the next valid audio mode
    CycleAudioMode,
    /// A source registry changed a volume
    VolumeChanged(VolumeChange),
    /// A source registry changed a mute state
    MuteChanged(MuteChange),
    /// AVRCP connected to the sink
    AvrcpConnected,
    /// AVRCP disconnected
    AvrcpDisconnected,
    /// HFP audio gateway connected to the sink
    AghfpConnected,
    /// HFP audio gateway disconnected
    AghfpDisconnected,
    /// USB host muted or unmuted the microphone
    UsbMicMute(bool),
    /// Sink muted or unmuted its microphone
    TelephonyMute {
        /// Voice source the mute applies to
        source: VoiceSource,
        /// New state
        muted: bool,
    },
}

/// Raised by the LE Audio context machine for the application machine.
///
/// Queued while a handler runs and delivered once it returns, keeping every
/// handler's effects in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Notification {
    /// LE media context changed
    MediaContext(MediaContext),
    /// LE voice stream started
    VoiceCallStarted,
    /// LE voice stream ended
    VoiceCallEnded,
}

impl DongleEvent {
    /// Events that reset the rescan convergence guard. Internal completions
    /// of work the dongle itself started do not.
    #[must_use]
    pub const fn is_external_input(&self) -> bool {
        !matches!(
            self,
            Self::Lea(_) | Self::GraphStopped { .. } | Self::VolumeChanged(_) | Self::MuteChanged(_)
        )
    }
}
