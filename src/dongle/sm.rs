//! Application state machine of the dongle.
//!
//! Decides when to connect to the sink, when to stream audio or voice and
//! when to let go. Most decisions are taken by [`rescan`](UsbDongle::request_rescan):
//! every change of inputs or of sink capabilities arms a short debounce
//! timer, and on expiry the machine compares what is connected with what is
//! streaming and moves one step closer.
//!
//! Streaming states are always left through their `*Stopping` state so that
//! the audio and voice chains never run at the same time.

use crate::constants::{GRAPH_RESTART_DELAY_MS, MAX_RESCAN_ITERATIONS, RESCAN_DEBOUNCE_MS};
use crate::device::DeviceHandle;
use crate::sources::VoiceSource;
use crate::timer::{Debouncer, TimerId};
use crate::{BluetoothAddress, DongleError};

use super::audio::InputSource;
use super::config::{AudioMode, DongleConfig, DongleOptions, SinkTransport, TransportMode};
use super::events::{
    DongleEvent, HidCallEvent, LeaEvent, MediaContext, Notification, TelephonyContext,
};
use super::lea::StreamStart;
use super::platform::{AppUiContext, AptxQuality, DonglePlatform, HidCommand};
use super::volume_observer::ObserverCx;
use super::{LeaContext, UsbDongle};

/// Application state. The discriminants are the raw values accepted by
/// [`UsbDongle::force_state_raw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DongleState {
    /// Waiting for the system to come up
    Init = 0,
    /// No sink connected
    Idle,
    /// Pairing a new sink
    Pairing,
    /// Sink service connecting
    Connecting,
    /// Sink connected, nothing streaming
    Connected,
    /// Audio stream requested
    AudioStarting,
    /// Audio streaming
    AudioStreaming,
    /// Audio stream stopping
    AudioStopping,
    /// Voice stream requested
    VoiceStarting,
    /// Voice streaming
    VoiceStreaming,
    /// Voice stream stopping
    VoiceStopping,
    /// Sink disconnecting
    Disconnecting,
}

impl TryFrom<u8> for DongleState {
    type Error = DongleError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        Ok(match raw {
            0 => Self::Init,
            1 => Self::Idle,
            2 => Self::Pairing,
            3 => Self::Connecting,
            4 => Self::Connected,
            5 => Self::AudioStarting,
            6 => Self::AudioStreaming,
            7 => Self::AudioStopping,
            8 => Self::VoiceStarting,
            9 => Self::VoiceStreaming,
            10 => Self::VoiceStopping,
            11 => Self::Disconnecting,
            _ => {
                error!("[SM] undefined state {}", raw);
                return Err(DongleError::InvalidState);
            }
        })
    }
}

impl DongleState {
    /// A sink link is up and usable
    #[must_use]
    pub const fn is_acl_connected(self) -> bool {
        matches!(
            self,
            Self::Connected
                | Self::AudioStarting
                | Self::AudioStreaming
                | Self::AudioStopping
                | Self::VoiceStarting
                | Self::VoiceStreaming
                | Self::VoiceStopping
        )
    }

    /// UI context shown in this state
    #[must_use]
    pub const fn app_ui_context(self) -> AppUiContext {
        match self {
            Self::Init => AppUiContext::Inactive,
            Self::Idle => AppUiContext::Idle,
            Self::Pairing => AppUiContext::Pairing,
            Self::Connecting => AppUiContext::Connecting,
            Self::Connected | Self::Disconnecting | Self::AudioStarting | Self::VoiceStarting => {
                AppUiContext::Connected
            }
            Self::AudioStreaming | Self::AudioStopping | Self::VoiceStreaming | Self::VoiceStopping => {
                AppUiContext::Streaming
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct DongleSm {
    pub(super) state: DongleState,
    pub(super) connected_sink: Option<DeviceHandle>,
    pairing_addr: Option<BluetoothAddress>,
    clear_pairing_requested: bool,
    factory_reset_requested: bool,
    transport_switch_in_progress: bool,
    disconnect_on_suspend: bool,
    hold_active: bool,
    hid_call_active: bool,
    hid_call_incoming: bool,
    rescan: Debouncer,
    rescan_iterations: u8,
    pub(super) rescan_stalled: bool,
}

impl DongleSm {
    pub(super) const fn new(options: &DongleOptions) -> Self {
        Self {
            state: DongleState::Init,
            connected_sink: None,
            pairing_addr: None,
            clear_pairing_requested: false,
            factory_reset_requested: false,
            transport_switch_in_progress: false,
            disconnect_on_suspend: options.disconnect_on_suspend,
            hold_active: false,
            hid_call_active: false,
            hid_call_incoming: false,
            rescan: Debouncer::new(TimerId::Rescan, RESCAN_DEBOUNCE_MS),
            rescan_iterations: 0,
            rescan_stalled: false,
        }
    }

    pub(super) fn reset_rescan_guard(&mut self) {
        if self.rescan_stalled {
            info!("[SM] rescan resumed");
        }
        self.rescan_iterations = 0;
        self.rescan_stalled = false;
    }
}

impl<P: DonglePlatform> UsbDongle<P> {
    pub(super) fn set_state(&mut self, new_state: DongleState) {
        let old_state = self.sm.state;
        if new_state == old_state {
            return;
        }
        info!("[SM] {:?} -> {:?}", old_state, new_state);
        self.exit_state(old_state);
        self.sm.state = new_state;
        self.enter_state(new_state);
        let context = self.sm.state.app_ui_context();
        self.io.platform.app_context(context);
    }

    fn exit_state(&mut self, state: DongleState) {
        if state == DongleState::VoiceStreaming {
            self.voice_stop();
        }
    }

    fn enter_state(&mut self, state: DongleState) {
        match state {
            DongleState::Connecting => {
                if !self.io.platform.connect_sink() {
                    if self.sm.connected_sink.is_some() {
                        self.set_state(DongleState::Connected);
                    } else {
                        self.set_state(DongleState::Idle);
                        if self.config.is_broadcast() {
                            self.lea.handle_broadcast_mode_toggle(&mut self.io, &self.config, false);
                        }
                    }
                }
            }
            DongleState::Connected => self.request_rescan(),
            DongleState::AudioStarting => self.audio_stream_connect(),
            DongleState::AudioStreaming => {
                if !self.is_audio_chain_active() {
                    self.audio_start();
                }
            }
            DongleState::AudioStopping => {
                self.io.timers.cancel(TimerId::GraphRestart);
                self.audio_stream_disconnect();
            }
            DongleState::VoiceStarting => {
                if self.voice_stream_connect() {
                    self.set_state(DongleState::VoiceStreaming);
                }
            }
            DongleState::VoiceStreaming => self.voice_start(),
            DongleState::VoiceStopping => {
                if self.voice_stream_disconnect() {
                    self.set_state(DongleState::Connected);
                }
            }
            DongleState::Disconnecting => self.io.platform.disconnect_all(),
            DongleState::Init | DongleState::Idle | DongleState::Pairing => {}
        }
    }

    /// Re-evaluate the inputs once the debounce expires
    pub(super) fn request_rescan(&mut self) {
        if self.sm.rescan_stalled {
            debug!("[SM] rescan suppressed, stalled");
            return;
        }
        self.sm.rescan.trigger(&mut self.io.timers, self.io.now_ms);
    }

    pub(super) fn handle_rescan_timer(&mut self) {
        let before = self.sm.state;
        self.rescan_audio_inputs();
        if self.sm.state == before {
            self.sm.rescan_iterations = 0;
            return;
        }
        self.sm.rescan_iterations = self.sm.rescan_iterations.saturating_add(1);
        if self.sm.rescan_iterations > MAX_RESCAN_ITERATIONS {
            error!(
                "[SM] rescan changed state {} times in a row, stopping",
                self.sm.rescan_iterations
            );
            self.sm.rescan_stalled = true;
            self.sm.rescan.cancel(&mut self.io.timers);
            self.io.platform.rescan_stalled();
        }
    }

    fn rescan_audio_inputs(&mut self) {
        self.sm.rescan.cancel(&mut self.io.timers);
        let state = self.sm.state;
        debug!("[SM] rescan in {:?}, inputs {:?}", state, self.inputs);

        if self.inputs.has_no_source() {
            if self.io.platform.is_usb_attached() {
                match state {
                    DongleState::AudioStarting | DongleState::AudioStreaming => {
                        self.set_state(DongleState::AudioStopping);
                    }
                    DongleState::VoiceStarting | DongleState::VoiceStreaming => {
                        self.set_state(DongleState::VoiceStopping);
                    }
                    _ => {}
                }
            } else if state.is_acl_connected() {
                self.set_state(DongleState::Disconnecting);
            }
            return;
        }

        match state {
            DongleState::Idle => {
                if !self.config.is_pairing_disallowed() {
                    self.set_state(DongleState::Connecting);
                }
            }
            DongleState::Disconnecting => {
                if !self.sm.transport_switch_in_progress {
                    self.set_state(DongleState::Connecting);
                }
            }
            DongleState::Connected => self.rescan_connected(),
            DongleState::AudioStarting | DongleState::AudioStreaming => self.rescan_audio(),
            DongleState::VoiceStarting | DongleState::VoiceStreaming => {
                if self.inputs.voice_source() != Some(VoiceSource::Usb)
                    && !self.sm.hid_call_active
                    && !self.sm.hold_active
                {
                    self.set_state(DongleState::VoiceStopping);
                }
            }
            DongleState::Init
            | DongleState::Pairing
            | DongleState::Connecting
            | DongleState::AudioStopping
            | DongleState::VoiceStopping => debug!("[SM] rescan waits in {:?}", state),
        }
    }

    fn rescan_connected(&mut self) {
        if self.inputs.is_connected(InputSource::UsbVoice) {
            if self.is_voice_available() {
                self.set_state(DongleState::VoiceStarting);
            } else if self.is_vbc_available() {
                self.set_state(DongleState::AudioStarting);
            } else {
                self.connect_voice_profile();
            }
        } else if self.is_audio_available() {
            // An LE sink cannot ring and stream media at once.
            if !(self.sm.hid_call_incoming && self.config.is_connected_to_le_sink()) {
                self.set_state(DongleState::AudioStarting);
            }
        } else if !self.is_le_path() {
            self.io.platform.connect_audio_profiles();
        }
    }

    fn rescan_audio(&mut self) {
        if self.inputs.is_connected(InputSource::UsbVoice) {
            if self.is_voice_available() {
                self.set_state(DongleState::AudioStopping);
            } else if self.is_vbc_available() {
                if self.audio_source_switch_required() {
                    self.set_state(DongleState::AudioStopping);
                }
            } else {
                self.connect_voice_profile();
            }
        } else if self.audio_source_switch_required() {
            self.set_state(DongleState::AudioStopping);
        }
    }

    fn connect_voice_profile(&mut self) {
        if self.is_le_path() {
            return;
        }
        let address = self
            .sm
            .connected_sink
            .and_then(|sink| self.io.platform.address(sink));
        match address {
            Some(address) => self.io.platform.connect_voice_profile(address),
            None => warn!("[SM] no sink address for voice profile"),
        }
    }

    pub(super) fn handle_graph_restart_timer(&mut self) {
        if self.is_usb_audio_streaming() {
            self.restart_usb_audio_graph();
        } else {
            debug!("[SM] graph restart dropped in {:?}", self.sm.state);
        }
    }

    fn is_usb_audio_streaming(&self) -> bool {
        self.sm.state == DongleState::AudioStreaming
            || (!self.sm.state.is_acl_connected() && self.is_lea_broadcast_active())
    }

    pub(super) fn dispatch(&mut self, event: DongleEvent) {
        match event {
            DongleEvent::SystemActive => self.handle_system_active(),
            DongleEvent::UsbAudioConnected => {
                self.volume.on_usb_audio_connected();
                self.input_connected(InputSource::UsbAudio, LeaContext::Audio);
            }
            DongleEvent::UsbAudioDisconnected => {
                let mut cx = ObserverCx {
                    io: &mut self.io,
                    config: &self.config,
                };
                self.volume.on_usb_audio_disconnected(&mut cx);
                self.input_disconnected(InputSource::UsbAudio, LeaContext::Audio);
            }
            DongleEvent::LineInConnected => {
                self.input_connected(InputSource::LineIn, LeaContext::AnalogAudio);
            }
            DongleEvent::LineInDisconnected => {
                self.input_disconnected(InputSource::LineIn, LeaContext::AnalogAudio);
            }
            DongleEvent::VoiceAudioConnected(source) => self.handle_voice_connected(source),
            DongleEvent::VoiceAudioDisconnected(source) => self.handle_voice_disconnected(source),
            DongleEvent::Telephony(context) => self.handle_telephony(context),
            DongleEvent::HidCall(call) => self.handle_hid_call(call),
            DongleEvent::Media(context) => self.handle_media_context(context),
            DongleEvent::VoiceProfileConnected => self.handle_voice_profile_connected(),
            DongleEvent::UsbDeviceDeconfigured => self.request_rescan(),
            DongleEvent::UsbSuspend => {
                if self.sm.disconnect_on_suspend {
                    self.io.platform.disable_sink_service();
                }
            }
            DongleEvent::UsbResume => {
                if self.sm.disconnect_on_suspend {
                    self.io.platform.enable_sink_service();
                }
            }
            DongleEvent::UsbAudioConfigChanged {
                sample_rate_changed,
            } => self.handle_usb_audio_config_changed(sample_rate_changed),
            DongleEvent::UsbVoiceConfigChanged => {
                if self.sm.state == DongleState::VoiceStreaming
                    || (self.sm.state == DongleState::AudioStreaming && self.is_vbc_active())
                {
                    self.restart_voice_graph();
                }
            }
            DongleEvent::Lea(event) => self.handle_lea(event),
            DongleEvent::GraphStopped { is_voice } => {
                self.lea.handle_graph_stopped(&mut self.io, is_voice);
            }
            DongleEvent::SinkConnected { device, transport } => {
                self.handle_sink_connected(device, transport);
            }
            DongleEvent::SinkConnectFailed => self.handle_sink_connect_failed(),
            DongleEvent::SinkDisconnected { device } => self.handle_sink_disconnected(device),
            DongleEvent::SinkFirstProfileConnected { device } => {
                debug!("[SM] first profile of sink {}", device.0);
                self.config.set_connected_transport(SinkTransport::Bredr);
                self.set_state(DongleState::Connected);
            }
            DongleEvent::PairSink(address) => {
                if let Err(e) = self.pair_sink(address) {
                    warn!("[SM] pairing refused: {:?}", e);
                }
            }
            DongleEvent::PairingAclComplete { connected } => self.handle_pairing_acl(connected),
            DongleEvent::PairingCfm { success, addr } => self.handle_pairing_cfm(success, addr),
            DongleEvent::DeletePairedDevices => self.handle_delete_paired_devices(),
            DongleEvent::FactoryReset => self.handle_factory_reset(),
            DongleEvent::SetMode { audio, transport } => self.handle_set_mode(audio, transport),
            DongleEvent::CycleAudioMode => self.handle_cycle_audio_mode(),
            DongleEvent::VolumeChanged(change) => self.notify_volume(&change),
            DongleEvent::MuteChanged(change) => self.notify_mute(&change),
            DongleEvent::AvrcpConnected => {
                let mut cx = ObserverCx {
                    io: &mut self.io,
                    config: &self.config,
                };
                self.volume.on_avrcp_connected(&mut cx);
            }
            DongleEvent::AvrcpDisconnected => {
                let mut cx = ObserverCx {
                    io: &mut self.io,
                    config: &self.config,
                };
                self.volume.on_avrcp_disconnected(&mut cx);
            }
            DongleEvent::AghfpConnected => {
                let mut cx = ObserverCx {
                    io: &mut self.io,
                    config: &self.config,
                };
                self.volume.on_aghfp_connected(&mut cx);
            }
            DongleEvent::AghfpDisconnected => {
                let mut cx = ObserverCx {
                    io: &mut self.io,
                    config: &self.config,
                };
                self.volume.on_aghfp_disconnected(&mut cx);
            }
            DongleEvent::UsbMicMute(muted) => {
                let mut cx = ObserverCx {
                    io: &mut self.io,
                    config: &self.config,
                };
                self.volume.on_usb_mic_mute(&mut cx, muted);
            }
            DongleEvent::TelephonyMute { source, muted } => {
                let mut cx = ObserverCx {
                    io: &mut self.io,
                    config: &self.config,
                };
                self.volume.on_telephony_mute(&mut cx, source, muted);
            }
        }
    }

    pub(super) fn handle_notification(&mut self, notification: Notification) {
        debug!("[SM] notification {:?} in {:?}", notification, self.sm.state);
        match notification {
            Notification::MediaContext(context) => self.handle_media_context(context),
            Notification::VoiceCallStarted => {
                if self.sm.state == DongleState::VoiceStarting {
                    self.set_state(DongleState::VoiceStreaming);
                }
            }
            Notification::VoiceCallEnded => {
                if matches!(
                    self.sm.state,
                    DongleState::VoiceStreaming | DongleState::VoiceStopping
                ) {
                    self.set_state(DongleState::Connected);
                }
            }
        }
    }

    fn handle_system_active(&mut self) {
        if self.sm.state != DongleState::Init {
            debug!("[SM] already active");
            return;
        }
        let quality = if self.config.is_gaming() {
            AptxQuality::LowLatency
        } else {
            AptxQuality::HighQuality
        };
        self.io.platform.set_aptx_quality(quality);
        if self.config.is_pairing_disallowed() {
            self.set_state(DongleState::Idle);
            self.lea.handle_broadcast_mode_toggle(&mut self.io, &self.config, false);
        } else {
            self.set_state(DongleState::Connecting);
        }
    }

    fn input_connected(&mut self, input: InputSource, context: LeaContext) {
        self.inputs.connect(input);
        self.lea.add_context(&mut self.io, &self.config, context);
        self.request_rescan();
    }

    fn input_disconnected(&mut self, input: InputSource, context: LeaContext) {
        self.inputs.disconnect(input);
        self.lea.remove_context(&mut self.io, &self.config, context);
        self.request_rescan();
    }

    fn handle_media_context(&mut self, context: MediaContext) {
        match (context, self.sm.state) {
            (MediaContext::Disconnected | MediaContext::Connected, DongleState::AudioStopping) => {
                self.set_state(DongleState::Connected);
            }
            (MediaContext::Disconnected | MediaContext::Connected, DongleState::AudioStarting) => {
                self.set_state(DongleState::AudioStopping);
            }
            (MediaContext::Disconnected | MediaContext::Connected, DongleState::AudioStreaming)
            | (MediaContext::Streaming, DongleState::AudioStopping) => self.request_rescan(),
            (
                MediaContext::Streaming,
                DongleState::Connected | DongleState::VoiceStopping | DongleState::AudioStarting,
            ) => self.set_state(DongleState::AudioStreaming),
            _ => trace!("[SM] media {:?} ignored in {:?}", context, self.sm.state),
        }
    }

    fn handle_voice_connected(&mut self, source: VoiceSource) {
        if source == VoiceSource::Usb {
            self.inputs.connect(InputSource::UsbVoice);
            if self.config.is_high_quality() && self.config.le_voice_in_high_quality() {
                self.lea.add_context(&mut self.io, &self.config, LeaContext::Voice);
            } else {
                self.lea.add_context(&mut self.io, &self.config, LeaContext::AudioVbc);
                let call = self.sm.hid_call_incoming || self.sm.hid_call_active;
                if (call || self.config.is_broadcast())
                    && self.lea.switch_to_voice_context_if_required(&mut self.io, &self.config)
                {
                    self.handle_set_mode(AudioMode::HighQuality, self.config.transport_mode());
                }
            }
            self.request_rescan();
        } else if source == self.sink_voice_source() {
            match self.sm.state {
                DongleState::VoiceStarting => self.set_state(DongleState::VoiceStreaming),
                DongleState::VoiceStreaming if self.io.platform.is_graph_idle() => self.voice_start(),
                _ => {}
            }
        }
    }

    fn handle_voice_disconnected(&mut self, source: VoiceSource) {
        if source == VoiceSource::Usb {
            self.inputs.disconnect(InputSource::UsbVoice);
            let context = if self.lea.contexts().contains(LeaContext::Voice) {
                LeaContext::Voice
            } else {
                LeaContext::AudioVbc
            };
            self.lea.remove_context(&mut self.io, &self.config, context);
            self.request_rescan();
        } else if source == self.sink_voice_source() {
            match self.sm.state {
                DongleState::VoiceStopping => self.set_state(DongleState::Connected),
                DongleState::VoiceStreaming => self.voice_stop(),
                _ => {}
            }
        }
    }

    fn handle_telephony(&mut self, context: TelephonyContext) {
        match context {
            TelephonyContext::InCall => {
                if self.sm.hid_call_incoming {
                    self.io.platform.send_hid(HidCommand::HookSwitchAnswer);
                }
            }
            TelephonyContext::RingingIncoming => {
                if self.sm.hid_call_incoming
                    && self.sm.state == DongleState::AudioStreaming
                    && self.lea.is_source_active()
                {
                    self.set_state(DongleState::AudioStopping);
                }
            }
            TelephonyContext::Connected => {
                if self.sm.hid_call_incoming || self.sm.hid_call_active {
                    self.io.platform.send_hid(HidCommand::ButtonOne);
                    self.io.platform.send_hid(HidCommand::HookSwitchTerminate);
                }
                if matches!(
                    self.sm.state,
                    DongleState::VoiceStarting | DongleState::VoiceStreaming
                ) {
                    if !self.sm.hid_call_active && self.sm.hold_active {
                        self.set_state(DongleState::VoiceStopping);
                    } else {
                        self.io.platform.send_hid(HidCommand::HookSwitchTerminate);
                    }
                }
            }
        }
    }

    fn handle_hid_call(&mut self, call: HidCallEvent) {
        match call {
            HidCallEvent::IncomingRinging => {
                self.sm.hid_call_incoming = true;
                if self.is_voice_available() {
                    self.io.platform.incoming_call();
                }
            }
            HidCallEvent::IncomingEnded => {
                self.sm.hid_call_incoming = false;
                if self.sm.state != DongleState::VoiceStreaming && self.is_voice_available() {
                    self.io.platform.reject_call();
                }
                self.request_rescan();
            }
            HidCallEvent::CallActive => {
                self.sm.hid_call_incoming = false;
                self.sm.hid_call_active = true;
                if self.is_le_path()
                    && self.lea.switch_to_voice_context_if_required(&mut self.io, &self.config)
                {
                    self.handle_set_mode(AudioMode::HighQuality, self.config.transport_mode());
                    return;
                }
                if self.is_voice_available() {
                    self.io.platform.accept_call();
                }
            }
            HidCallEvent::CallEnded => {
                if self.is_le_path() {
                    self.io.platform.reject_call();
                }
                self.sm.hid_call_active = false;
                self.request_rescan();
            }
            HidCallEvent::HoldActive | HidCallEvent::HoldInactive => {
                let active = call == HidCallEvent::HoldActive;
                let mut cx = ObserverCx {
                    io: &mut self.io,
                    config: &self.config,
                };
                self.volume.on_hold(&mut cx, active);
                if active == self.sm.hold_active {
                    return;
                }
                self.sm.hold_active = active;
                if !active {
                    self.request_rescan();
                }
            }
        }
    }

    fn handle_voice_profile_connected(&mut self) {
        if self.is_le_path() {
            return;
        }
        if matches!(
            self.sm.state,
            DongleState::Connected
                | DongleState::AudioStarting
                | DongleState::AudioStreaming
                | DongleState::AudioStopping
                | DongleState::VoiceStopping
        ) {
            self.request_rescan();
        }
    }

    fn handle_usb_audio_config_changed(&mut self, sample_rate_changed: bool) {
        if !self.inputs.is_connected(InputSource::UsbAudio) || !sample_rate_changed {
            return;
        }
        if self.is_usb_audio_streaming() {
            self.restart_usb_audio_graph();
        } else {
            self.io
                .timers
                .start(TimerId::GraphRestart, self.io.now_ms, GRAPH_RESTART_DELAY_MS);
        }
    }

    fn handle_lea(&mut self, event: LeaEvent) {
        match event {
            LeaEvent::ConnectInd { success, group } => {
                self.lea.handle_connect_ind(&mut self.io, &self.config, success, group);
                if success {
                    self.volume.on_lea_connected(group);
                }
            }
            LeaEvent::DisconnectInd { group } => {
                self.lea.handle_disconnect_ind(&mut self.io, &self.config, group);
                let mut cx = ObserverCx {
                    io: &mut self.io,
                    config: &self.config,
                };
                self.volume.on_lea_disconnected(&mut cx);
            }
            LeaEvent::StreamStartInd {
                group: _,
                token,
                success,
                audio_context,
                sender,
                params,
            } => {
                self.lea.handle_stream_start_ind(
                    &mut self.io,
                    &self.config,
                    StreamStart {
                        token,
                        success,
                        audio_context,
                        sender,
                        params,
                    },
                );
                let mut cx = ObserverCx {
                    io: &mut self.io,
                    config: &self.config,
                };
                self.volume.on_stream_started(&mut cx, success, audio_context);
            }
            LeaEvent::StreamStopInd { group: _, token } => {
                self.lea.handle_stream_stop_ind(&mut self.io, &self.config, token);
                let mut cx = ObserverCx {
                    io: &mut self.io,
                    config: &self.config,
                };
                self.volume.on_stream_stopped(&mut cx);
            }
            LeaEvent::StartCancelComplete {
                group: _,
                token,
                success,
            } => {
                self.lea.handle_start_cancel_complete(&mut self.io, token, success);
            }
        }
    }

    fn handle_sink_connected(&mut self, device: DeviceHandle, transport: SinkTransport) {
        info!("[SM] sink {} connected over {:?}", device.0, transport);
        self.sm.connected_sink = Some(device);
        self.config.set_connected_transport(transport);
        if !self.sm.state.is_acl_connected() {
            self.set_state(DongleState::Connected);
        }
        if self.config.pending_transport().is_some() || self.lea.is_transport_switch_required(&self.config) {
            self.disconnect_current_transport();
        }
    }

    fn handle_sink_connect_failed(&mut self) {
        warn!("[SM] no sink connected");
        self.set_state(DongleState::Idle);
        if self.config.is_broadcast() {
            self.lea.handle_broadcast_mode_toggle(&mut self.io, &self.config, false);
        }
    }

    fn handle_sink_disconnected(&mut self, device: DeviceHandle) {
        if self.sm.connected_sink == Some(device) {
            info!("[SM] sink {} disconnected", device.0);
            self.sm.connected_sink = None;
            if self.sm.clear_pairing_requested {
                self.sm.clear_pairing_requested = false;
                self.io.platform.delete_all_paired();
            }
            if self.sm.factory_reset_requested {
                self.sm.factory_reset_requested = false;
                self.factory_reset();
            }
        } else if self.sm.state == DongleState::Connecting {
            debug!("[SM] connect attempt to {} timed out", device.0);
        }

        if self.is_le_path() {
            match self.sm.state {
                DongleState::AudioStarting | DongleState::AudioStreaming => {
                    if self.sm.rescan.is_pending(&self.io.timers) {
                        self.rescan_audio_inputs();
                    }
                    if matches!(
                        self.sm.state,
                        DongleState::AudioStarting | DongleState::AudioStreaming
                    ) {
                        self.set_state(DongleState::AudioStopping);
                    }
                }
                DongleState::VoiceStarting | DongleState::VoiceStreaming => {
                    self.set_state(DongleState::VoiceStopping);
                }
                _ => {}
            }
        }

        self.set_state(DongleState::Idle);
        if self.sm.connected_sink.is_none() {
            self.config.set_connected_transport(SinkTransport::Unknown);
        }
        self.reconnect_transport_if_required();
    }

    fn reconnect_transport_if_required(&mut self) {
        if !self.sm.transport_switch_in_progress {
            self.request_rescan();
            return;
        }
        self.sm.transport_switch_in_progress = false;
        if self.config.apply_pending_transport() {
            info!("[SM] transport now {:?}", self.config.transport_mode());
            self.save_modes();
            self.apply_service_policy();
        }
        self.set_state(DongleState::Connecting);
    }

    fn disconnect_current_transport(&mut self) {
        info!("[SM] transport switch, disconnecting");
        self.sm.transport_switch_in_progress = true;
        if self.is_lea_broadcast_active() {
            self.lea.audio_stop(&mut self.io);
        }
        self.set_state(DongleState::Disconnecting);
    }

    /// Create an ACL to `address` and pair once it is up
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::InvalidState`] unless idle and
    /// [`DongleError::AlreadyInProgress`] while another pairing holds an ACL.
    pub fn pair_sink(&mut self, address: BluetoothAddress) -> Result<(), DongleError> {
        if self.sm.state != DongleState::Idle {
            return Err(DongleError::InvalidState);
        }
        if self.sm.pairing_addr.is_some() {
            return Err(DongleError::AlreadyInProgress);
        }
        info!("[SM] pairing {:?}", address);
        self.sm.pairing_addr = Some(address);
        self.io.platform.create_acl(address);
        self.set_state(DongleState::Pairing);
        Ok(())
    }

    fn handle_pairing_acl(&mut self, connected: bool) {
        let Some(address) = self.sm.pairing_addr.filter(|_| self.sm.state == DongleState::Pairing) else {
            debug!("[SM] stray pairing ACL completion");
            return;
        };
        if connected {
            self.io.platform.pair_device(address);
        } else {
            warn!("[SM] pairing ACL failed");
            self.release_pairing_acl();
            self.set_state(DongleState::Idle);
        }
    }

    fn handle_pairing_cfm(&mut self, success: bool, address: BluetoothAddress) {
        if success {
            match self.io.platform.create_sink(address) {
                Ok(device) if self.io.platform.is_acl_connected(address) => {
                    if self.sm.connected_sink.is_none() {
                        self.sm.connected_sink = Some(device);
                        self.config.set_connected_transport(SinkTransport::Bredr);
                    }
                    self.set_state(DongleState::Connected);
                    self.io.platform.connect_sink();
                }
                Ok(_) => self.set_state(DongleState::Idle),
                Err(e) => {
                    error!("[SM] cannot store sink: {:?}", e);
                    self.set_state(DongleState::Idle);
                }
            }
        } else if self.sm.state == DongleState::Pairing {
            warn!("[SM] pairing failed");
            self.set_state(DongleState::Idle);
        }
        self.release_pairing_acl();
    }

    fn release_pairing_acl(&mut self) {
        if let Some(address) = self.sm.pairing_addr.take() {
            self.io.platform.release_acl(address);
        }
    }

    fn handle_delete_paired_devices(&mut self) {
        if self.sm.state.is_acl_connected() {
            self.sm.clear_pairing_requested = true;
            self.set_state(DongleState::Disconnecting);
        } else if self.sm.state == DongleState::Idle {
            self.io.platform.delete_all_paired();
            self.io.platform.connect_sink();
        } else {
            warn!("[SM] cannot delete paired devices in {:?}", self.sm.state);
        }
    }

    fn handle_factory_reset(&mut self) {
        match self.sm.state {
            DongleState::Idle | DongleState::Pairing | DongleState::Connecting => self.factory_reset(),
            DongleState::Disconnecting => self.sm.factory_reset_requested = true,
            state if state.is_acl_connected() => {
                self.set_state(DongleState::Disconnecting);
                self.sm.factory_reset_requested = true;
            }
            state => warn!("[SM] factory reset ignored in {:?}", state),
        }
    }

    fn factory_reset(&mut self) {
        info!("[SM] factory reset");
        self.io.platform.delete_all_paired();
        self.io.platform.clear_config();
        self.io.platform.reboot();
    }

    fn save_modes(&mut self) {
        if let Err(e) = self.config.save(&mut self.io.platform) {
            error!("[SM] cannot store modes: {:?}", e);
        }
    }

    fn handle_set_mode(&mut self, audio: AudioMode, transport: TransportMode) {
        if !DongleConfig::is_mode_combination_valid(audio, transport) {
            warn!("[SM] invalid mode {:?} over {:?}", audio, transport);
            return;
        }
        let old_audio = self.config.audio_mode();
        let mut transport = transport;
        if !self
            .io
            .platform
            .set_service_mode(DongleConfig::sink_service_mode_for(transport, audio))
        {
            self.config.set_pending_transport(transport);
            transport = self.config.transport_mode();
            self.disconnect_current_transport();
        }
        self.config.set_audio_mode(audio);
        self.config.set_transport_mode(transport);
        self.save_modes();

        if old_audio != audio {
            self.handle_audio_mode_change(old_audio, audio);
        }
        if self.sm.state == DongleState::Idle && !self.config.is_pairing_disallowed() {
            self.set_state(DongleState::Connecting);
        }
    }

    fn handle_cycle_audio_mode(&mut self) {
        let transport = self.config.transport_mode();
        let mut mode = self.config.audio_mode().next();
        if !DongleConfig::is_mode_combination_valid(mode, transport) {
            mode = mode.next();
        }
        self.handle_set_mode(mode, transport);
    }

    fn handle_audio_mode_change(&mut self, old: AudioMode, new: AudioMode) {
        info!("[SM] audio mode {:?} -> {:?}", old, new);
        self.io.platform.show_audio_mode(new);
        if old == AudioMode::Broadcast || new == AudioMode::Broadcast {
            let connected = self.sm.state >= DongleState::Connected;
            if self
                .lea
                .handle_broadcast_mode_toggle(&mut self.io, &self.config, connected)
            {
                self.rescan_audio_inputs();
            }
        }
        if matches!(new, AudioMode::HighQuality | AudioMode::Gaming) {
            self.enter_gaming_or_high_quality(new);
        }
    }

    fn enter_gaming_or_high_quality(&mut self, mode: AudioMode) {
        self.io.platform.set_aptx_quality(if mode == AudioMode::Gaming {
            AptxQuality::LowLatency
        } else {
            AptxQuality::HighQuality
        });
        let restart = self.is_le_path() || self.io.platform.is_aptx_adaptive_active();
        if restart && self.sm.state == DongleState::AudioStreaming {
            self.set_state(DongleState::AudioStopping);
        }
    }
}
