//! Audio and voice inputs, and the transport specific half of starting and
//! stopping them.

use crate::sources::{AudioSource, VoiceSource};

use super::platform::{DonglePlatform, StopNotify};
use super::{LeaContext, LeaState, UsbDongle};

/// An input that can be routed to the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InputSource {
    /// Nothing connected
    #[default]
    None,
    /// USB audio streaming interface
    UsbAudio,
    /// Analog line-in
    LineIn,
    /// USB voice interface
    UsbVoice,
}

impl InputSource {
    const fn bit(self) -> u8 {
        match self {
            Self::None => 0,
            Self::UsbAudio => 1 << 0,
            Self::LineIn => 1 << 1,
            Self::UsbVoice => 1 << 2,
        }
    }
}

/// Connected inputs and the BR/EDR audio chain built from one of them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AudioInputs {
    connected: u8,
    active: Option<AudioSource>,
    chain_running: bool,
}

impl AudioInputs {
    /// Nothing connected
    #[must_use]
    pub const fn new() -> Self {
        Self {
            connected: 0,
            active: None,
            chain_running: false,
        }
    }

    pub(crate) fn connect(&mut self, input: InputSource) {
        self.connected |= input.bit();
    }

    pub(crate) fn disconnect(&mut self, input: InputSource) {
        self.connected &= !input.bit();
    }

    /// Whether `input` is connected
    #[must_use]
    pub const fn is_connected(&self, input: InputSource) -> bool {
        input.bit() != 0 && self.connected & input.bit() != 0
    }

    /// Highest priority input: USB voice, then line-in, then USB audio
    #[must_use]
    pub const fn determine_new_source(&self) -> InputSource {
        if self.is_connected(InputSource::UsbVoice) {
            InputSource::UsbVoice
        } else if self.is_connected(InputSource::LineIn) {
            InputSource::LineIn
        } else if self.is_connected(InputSource::UsbAudio) {
            InputSource::UsbAudio
        } else {
            InputSource::None
        }
    }

    /// Audio source the sink should play
    #[must_use]
    pub const fn audio_source(&self) -> Option<AudioSource> {
        if self.is_connected(InputSource::LineIn) {
            Some(AudioSource::LineIn)
        } else if self.is_connected(InputSource::UsbAudio) {
            Some(AudioSource::Usb)
        } else {
            None
        }
    }

    /// Voice source the sink should carry
    #[must_use]
    pub const fn voice_source(&self) -> Option<VoiceSource> {
        if self.is_connected(InputSource::UsbVoice) {
            Some(VoiceSource::Usb)
        } else {
            None
        }
    }

    /// No audio and no voice input
    #[must_use]
    pub const fn has_no_source(&self) -> bool {
        self.audio_source().is_none() && self.voice_source().is_none()
    }

    /// Input the BR/EDR media stream was set up for
    #[must_use]
    pub const fn active_audio(&self) -> Option<AudioSource> {
        self.active
    }
}

impl<P: DonglePlatform> UsbDongle<P> {
    /// Audio goes over LE Audio rather than A2DP and HFP
    pub(super) const fn is_le_path(&self) -> bool {
        self.config.is_le_or_dual_with_le_connected()
    }

    /// Voice source of the sink link
    pub(super) const fn sink_voice_source(&self) -> VoiceSource {
        if self.is_le_path() {
            VoiceSource::LeAudioUnicast
        } else {
            VoiceSource::Hfp1
        }
    }

    pub(super) fn is_lea_broadcast_active(&self) -> bool {
        matches!(
            self.lea.state(),
            LeaState::BroadcastStreamingStarting | LeaState::BroadcastStreaming
        )
    }

    pub(super) fn is_vbc_active(&self) -> bool {
        self.is_le_path() && self.lea.active_context() == LeaContext::AudioVbc
    }

    pub(super) fn audio_stream_connect(&mut self) {
        self.inputs.active = self.inputs.audio_source();
        if self.is_le_path() {
            self.lea.audio_start(&mut self.io, &self.config);
        } else {
            debug!("[SM] media connect for {:?}", self.inputs.active);
            self.io.platform.media_connect();
        }
    }

    pub(super) fn audio_stream_disconnect(&mut self) {
        if self.is_le_path() {
            self.lea.audio_stop(&mut self.io);
        } else {
            if self.inputs.chain_running {
                let notify = if self.inputs.active == Some(AudioSource::Usb) {
                    StopNotify::GraphStopped
                } else {
                    StopNotify::Silent
                };
                self.io.platform.stop_a2dp(notify);
                self.inputs.chain_running = false;
            }
            self.io.platform.media_suspend();
        }
        self.inputs.active = None;
    }

    pub(super) fn is_audio_chain_active(&self) -> bool {
        if self.is_le_path() {
            self.lea.is_source_active()
        } else {
            self.inputs.chain_running
        }
    }

    /// Build the BR/EDR chain once the media stream runs. LE graphs are
    /// built by the LE Audio machine.
    pub(super) fn audio_start(&mut self) {
        if self.is_le_path() {
            return;
        }
        match self.inputs.active.or(self.inputs.audio_source()) {
            Some(input) => {
                self.io.platform.start_a2dp(input);
                self.inputs.active = Some(input);
                self.inputs.chain_running = true;
            }
            None => warn!("[SM] media streaming without an input"),
        }
    }

    pub(super) fn restart_usb_audio_graph(&mut self) {
        if self.is_le_path() || self.is_lea_broadcast_active() {
            let enable_mic = self.is_vbc_active();
            self.lea.restart_audio_graph(&mut self.io, enable_mic);
        } else if self.inputs.chain_running && self.inputs.active == Some(AudioSource::Usb) {
            self.io.platform.stop_a2dp(StopNotify::Silent);
            self.io.platform.start_a2dp(AudioSource::Usb);
        }
    }

    pub(super) fn voice_stream_connect(&mut self) -> bool {
        if self.is_le_path() {
            true
        } else {
            self.io.platform.voice_audio_connect()
        }
    }

    pub(super) fn voice_stream_disconnect(&mut self) -> bool {
        if self.is_le_path() {
            true
        } else {
            self.io.platform.voice_audio_disconnect()
        }
    }

    pub(super) fn voice_start(&mut self) {
        if self.is_le_path() {
            self.lea.audio_start(&mut self.io, &self.config);
        } else {
            self.io.platform.start_sco();
        }
    }

    pub(super) fn voice_stop(&mut self) {
        if self.is_le_path() {
            self.lea.audio_stop(&mut self.io);
        } else {
            self.io.platform.stop_sco();
        }
    }

    pub(super) fn restart_voice_graph(&mut self) {
        if self.is_le_path() {
            self.lea.restart_audio_graph(&mut self.io, true);
        } else {
            self.io.platform.stop_sco();
            self.io.platform.start_sco();
        }
    }

    pub(super) fn is_audio_available(&self) -> bool {
        if self.is_le_path() {
            self.lea.is_audio_available(&self.io, &self.config)
        } else {
            self.io.platform.is_media_available()
        }
    }

    pub(super) fn is_voice_available(&self) -> bool {
        if self.is_le_path() {
            self.lea.is_voice_available(&self.io)
        } else {
            self.io.platform.is_voice_available()
        }
    }

    pub(super) fn is_vbc_available(&self) -> bool {
        self.is_le_path() && self.lea.is_vbc_available(&self.io)
    }

    /// The stream no longer carries the input that should play
    pub(super) fn audio_source_switch_required(&self) -> bool {
        if self.is_le_path() {
            self.lea.context_switch_is_required()
                || self.lea.is_context_change_required(&self.io, &self.config)
        } else {
            self.inputs.active != self.inputs.audio_source()
        }
    }
}
