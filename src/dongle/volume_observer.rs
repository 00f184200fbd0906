//! USB volume synchronisation.
//!
//! The USB host and the sink both own a volume. Host changes are forwarded to
//! the sink over HFP, AVRCP or the LE group volume. Sink changes cannot be
//! written into the host and are instead replayed as HID volume key presses
//! until the host reports the target volume.
//!
//! Hosts do not say how they react to HID volume keys. Windows and macOS
//! report every step back, Linux reports nothing, so the first steps double
//! as a probe: if a short burst goes unanswered the host is taken to be Linux
//! and from then on receives one key press per sink change.

use crate::DongleError;
use crate::constants::{
    SINK_VOLUME_UPDATE_DELAY_MS, USB_VOLUME_DOWN_CUTOFF_PERCENT, USB_VOLUME_PROBE_BURST,
    USB_VOLUME_STEP_COUNT_MAX, USB_VOLUME_STEP_DELAY_MS,
};
use crate::sources::{
    AudioSource, EventOrigin, GenericSource, ObserverList, VoiceSource, VolumeChange,
    VolumeObserver,
};
use crate::timer::TimerId;
use crate::volume::{
    AVRCP_VOLUME_CONFIG, HFP_VOLUME_CONFIG, LE_AUDIO_VOLUME_CONFIG, USB_VOLUME_CONFIG, Volume,
};

use super::config::DongleConfig;
use super::platform::{CapContext, DonglePlatform, GroupHandle, HidCommand};
use super::{DongleObserverKey, Io};

const USB_AUDIO: GenericSource = GenericSource::Audio(AudioSource::Usb);
const USB_VOICE: GenericSource = GenericSource::Voice(VoiceSource::Usb);
const AVRCP_SINK: GenericSource = GenericSource::Audio(AudioSource::A2dp1);
const LE_SINK: GenericSource = GenericSource::Audio(AudioSource::LeAudioUnicastSender);
const HFP_SINK: GenericSource = GenericSource::Voice(VoiceSource::Hfp1);
const LE_VOICE_SINK: GenericSource = GenericSource::Voice(VoiceSource::LeAudioUnicast);

const OBSERVED: [GenericSource; 6] = [USB_AUDIO, AVRCP_SINK, LE_SINK, HFP_SINK, LE_VOICE_SINK, USB_VOICE];

/// Synchronisation direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VolumeSyncState {
    /// No USB audio or no sink profile
    Idle,
    /// Stepping the host towards a sink volume
    UsbVolumeSync,
    /// Forwarding host volume to the sink
    SinkVolumeSync,
}

/// How the host reacts to HID volume keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostOs {
    /// Not probed yet
    Unidentified,
    /// Reports every step back
    WindowsMac,
    /// Reports nothing back
    Linux,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum StepDirection {
    Up,
    Down,
}

/// What the observer gets to touch while handling a change
pub(crate) struct ObserverCx<'a, P> {
    pub(crate) io: &'a mut Io<P>,
    pub(crate) config: &'a DongleConfig,
}

/// USB volume observer of the dongle
#[derive(Debug)]
pub struct DongleVolumeObserver {
    state: VolumeSyncState,
    host_os: HostOs,
    usb_audio_connected: bool,
    avrcp_connected: bool,
    aghfp_connected: bool,
    le_audio_connected: bool,
    vbc_active: bool,
    group: Option<GroupHandle>,
    target: i16,
    direction: StepDirection,
    step_count: u8,
    old_volume: i16,
    avrcp_target: Option<u8>,
    le_target: Option<u8>,
    last_sync_sink_volume: Option<u8>,
    mic_muted: bool,
    hold_active: bool,
    pre_hold_mute: bool,
}

impl Default for DongleVolumeObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl DongleVolumeObserver {
    /// Idle, host not probed
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: VolumeSyncState::Idle,
            host_os: HostOs::Unidentified,
            usb_audio_connected: false,
            avrcp_connected: false,
            aghfp_connected: false,
            le_audio_connected: false,
            vbc_active: false,
            group: None,
            target: 0,
            direction: StepDirection::Up,
            step_count: 0,
            old_volume: USB_VOLUME_CONFIG.midpoint(),
            avrcp_target: None,
            le_target: None,
            last_sync_sink_volume: None,
            mic_muted: false,
            hold_active: false,
            pre_hold_mute: false,
        }
    }

    /// Current direction
    #[must_use]
    pub const fn state(&self) -> VolumeSyncState {
        self.state
    }

    /// Result of the host probe
    #[must_use]
    pub const fn host_os(&self) -> HostOs {
        self.host_os
    }

    /// An LE stream with a back channel is running
    #[must_use]
    pub const fn is_vbc_active(&self) -> bool {
        self.vbc_active
    }

    /// Microphone mute as last reported
    #[must_use]
    pub const fn is_mic_muted(&self) -> bool {
        self.mic_muted
    }

    /// Seed the sink volumes and register on every observed source
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::ObserverListFull`] if the list overflows.
    pub(crate) fn init<P: DonglePlatform>(
        &mut self,
        io: &mut Io<P>,
        observers: &mut ObserverList<DongleObserverKey>,
    ) -> Result<(), DongleError> {
        self.old_volume = USB_VOLUME_CONFIG.midpoint();
        io.platform
            .set_volume(AVRCP_SINK, EventOrigin::Local, Volume::midpoint(AVRCP_VOLUME_CONFIG));
        io.platform
            .set_volume(LE_SINK, EventOrigin::Local, Volume::midpoint(LE_AUDIO_VOLUME_CONFIG));
        for source in OBSERVED {
            observers.register(source, DongleObserverKey::UsbVolume)?;
        }
        Ok(())
    }

    const fn is_any_profile_connected(&self) -> bool {
        self.avrcp_connected || self.aghfp_connected || self.le_audio_connected
    }

    pub(crate) fn on_usb_audio_connected(&mut self) {
        self.usb_audio_connected = true;
        if self.is_any_profile_connected() {
            self.state = VolumeSyncState::SinkVolumeSync;
        }
    }

    pub(crate) fn on_usb_audio_disconnected<P: DonglePlatform>(&mut self, cx: &mut ObserverCx<'_, P>) {
        self.usb_audio_connected = false;
        self.state = VolumeSyncState::Idle;
        for id in [
            TimerId::UsbVolumeStep,
            TimerId::AvrcpVolumeUpdate,
            TimerId::LeAudioVolumeUpdate,
        ] {
            cx.io.timers.cancel(id);
        }
        self.avrcp_target = None;
        self.le_target = None;
    }

    fn on_profile_connected<P: DonglePlatform>(&mut self, cx: &mut ObserverCx<'_, P>) {
        if self.usb_audio_connected {
            self.state = VolumeSyncState::SinkVolumeSync;
            let volume = cx.io.platform.volume(USB_AUDIO);
            self.update_sink_volume(cx, volume);
        }
    }

    fn on_profile_disconnected<P: DonglePlatform>(&mut self, cx: &mut ObserverCx<'_, P>) {
        if !self.is_any_profile_connected() {
            cx.io.timers.cancel(TimerId::UsbVolumeStep);
            self.state = VolumeSyncState::Idle;
        }
    }

    pub(crate) fn on_avrcp_connected<P: DonglePlatform>(&mut self, cx: &mut ObserverCx<'_, P>) {
        self.avrcp_connected = true;
        self.on_profile_connected(cx);
    }

    pub(crate) fn on_avrcp_disconnected<P: DonglePlatform>(&mut self, cx: &mut ObserverCx<'_, P>) {
        self.avrcp_connected = false;
        self.avrcp_target = None;
        cx.io.timers.cancel(TimerId::AvrcpVolumeUpdate);
        self.on_profile_disconnected(cx);
    }

    pub(crate) fn on_aghfp_connected<P: DonglePlatform>(&mut self, cx: &mut ObserverCx<'_, P>) {
        self.aghfp_connected = true;
        self.on_profile_connected(cx);
    }

    pub(crate) fn on_aghfp_disconnected<P: DonglePlatform>(&mut self, cx: &mut ObserverCx<'_, P>) {
        self.aghfp_connected = false;
        self.on_profile_disconnected(cx);
    }

    pub(crate) fn on_lea_connected(&mut self, group: GroupHandle) {
        self.group = Some(group);
    }

    fn reset_le<P: DonglePlatform>(&mut self, cx: &mut ObserverCx<'_, P>) {
        self.le_audio_connected = false;
        self.vbc_active = false;
        self.le_target = None;
        self.last_sync_sink_volume = None;
        cx.io.timers.cancel(TimerId::LeAudioVolumeUpdate);
        self.on_profile_disconnected(cx);
    }

    pub(crate) fn on_lea_disconnected<P: DonglePlatform>(&mut self, cx: &mut ObserverCx<'_, P>) {
        self.group = None;
        self.reset_le(cx);
    }

    pub(crate) fn on_stream_started<P: DonglePlatform>(
        &mut self,
        cx: &mut ObserverCx<'_, P>,
        success: bool,
        context: CapContext,
    ) {
        if !success {
            return;
        }
        if context == CapContext::GameWithVbc {
            self.vbc_active = true;
        }
        if context != CapContext::Prohibited && !self.le_audio_connected {
            self.le_audio_connected = true;
            self.on_profile_connected(cx);
        }
    }

    pub(crate) fn on_stream_stopped<P: DonglePlatform>(&mut self, cx: &mut ObserverCx<'_, P>) {
        self.reset_le(cx);
    }

    /// USB host changed the microphone mute
    pub(crate) fn on_usb_mic_mute<P: DonglePlatform>(&mut self, cx: &mut ObserverCx<'_, P>, muted: bool) {
        if muted == self.mic_muted {
            return;
        }
        self.mic_muted = muted;
        if cx.config.is_bredr_or_dual_with_bredr_connected() {
            cx.io.platform.toggle_microphone_mute();
        }
    }

    /// A telephony source changed the microphone mute
    pub(crate) fn on_telephony_mute<P: DonglePlatform>(
        &mut self,
        cx: &mut ObserverCx<'_, P>,
        source: VoiceSource,
        muted: bool,
    ) {
        if muted == self.mic_muted {
            return;
        }
        match source {
            VoiceSource::Hfp1 if !self.hold_active => cx.io.platform.send_hid(HidCommand::PhoneMute),
            VoiceSource::Usb => cx.io.platform.toggle_microphone_mute(),
            _ => debug!("[VOL_OBS] mute from {:?} not mirrored", source),
        }
        self.mic_muted = muted;
    }

    /// The host call went on or off hold
    pub(crate) fn on_hold<P: DonglePlatform>(&mut self, cx: &mut ObserverCx<'_, P>, active: bool) {
        if active == self.hold_active {
            return;
        }
        self.hold_active = active;
        if active {
            self.pre_hold_mute = self.mic_muted;
        } else {
            cx.io.platform.set_mute(HFP_SINK, EventOrigin::Local, self.pre_hold_mute);
            self.mic_muted = self.pre_hold_mute;
        }
    }

    /// Write `volume` to the sink now, dropping any queued update
    pub(crate) fn set_absolute_sink_volume<P: DonglePlatform>(
        &mut self,
        cx: &mut ObserverCx<'_, P>,
        volume: Volume,
    ) {
        if let Some(group) = self.group.filter(|_| cx.config.is_le_or_dual_with_le_connected()) {
            let value = volume.converted(LE_AUDIO_VOLUME_CONFIG).limited().as_u8();
            cx.io.platform.set_group_volume(group, value);
            cx.io.timers.cancel(TimerId::LeAudioVolumeUpdate);
            self.le_target = None;
            self.last_sync_sink_volume = Some(value);
        } else if self.avrcp_connected {
            let value = volume.converted(AVRCP_VOLUME_CONFIG).limited().as_u8();
            cx.io.platform.set_avrcp_volume(value);
            cx.io.timers.cancel(TimerId::AvrcpVolumeUpdate);
            self.avrcp_target = None;
        } else {
            debug!("[VOL_OBS] no sink to set volume on");
        }
    }

    pub(crate) fn handle_timer<P: DonglePlatform>(&mut self, cx: &mut ObserverCx<'_, P>, id: TimerId) {
        match id {
            TimerId::AvrcpVolumeUpdate => {
                if let Some(volume) = self.avrcp_target.take() {
                    cx.io.platform.set_avrcp_volume(volume);
                }
            }
            TimerId::LeAudioVolumeUpdate => {
                if let (Some(volume), Some(group)) = (self.le_target.take(), self.group) {
                    cx.io.platform.set_group_volume(group, volume);
                    self.last_sync_sink_volume = Some(volume);
                }
            }
            TimerId::UsbVolumeStep => {
                if self.state == VolumeSyncState::UsbVolumeSync {
                    self.handle_update_usb_volume(cx);
                }
            }
            _ => {}
        }
    }

    fn update_sink_volume<P: DonglePlatform>(&mut self, cx: &mut ObserverCx<'_, P>, volume: Volume) {
        if self.aghfp_connected {
            cx.io
                .platform
                .set_volume(HFP_SINK, EventOrigin::Local, volume.converted(HFP_VOLUME_CONFIG).limited());
        }
        if self.avrcp_connected {
            self.avrcp_target = Some(volume.converted(AVRCP_VOLUME_CONFIG).limited().as_u8());
            if !cx.io.timers.is_pending(TimerId::AvrcpVolumeUpdate) {
                cx.io
                    .timers
                    .start(TimerId::AvrcpVolumeUpdate, cx.io.now_ms, SINK_VOLUME_UPDATE_DELAY_MS);
            }
        }
        if self.le_audio_connected && self.group.is_some() {
            self.le_target = Some(volume.converted(LE_AUDIO_VOLUME_CONFIG).limited().as_u8());
            if !cx.io.timers.is_pending(TimerId::LeAudioVolumeUpdate) {
                cx.io
                    .timers
                    .start(TimerId::LeAudioVolumeUpdate, cx.io.now_ms, SINK_VOLUME_UPDATE_DELAY_MS);
            }
        }
    }

    fn current_usb_volume<P: DonglePlatform>(cx: &ObserverCx<'_, P>) -> Volume {
        cx.io.platform.volume(USB_AUDIO).converted(USB_VOLUME_CONFIG)
    }

    fn update_usb_target<P: DonglePlatform>(&mut self, cx: &mut ObserverCx<'_, P>, volume: Volume) {
        let new = volume.convert_to(USB_VOLUME_CONFIG);
        cx.io.timers.cancel(TimerId::UsbVolumeStep);
        let current = match self.host_os {
            HostOs::Linux => {
                let old = self.old_volume;
                self.old_volume = new;
                old
            }
            HostOs::WindowsMac | HostOs::Unidentified => Self::current_usb_volume(cx).value,
        };
        if new == current {
            self.state = VolumeSyncState::SinkVolumeSync;
            return;
        }
        self.target = new;
        self.direction = if new > current {
            StepDirection::Up
        } else {
            StepDirection::Down
        };
        debug!("[VOL_OBS] usb target {} from {}", new, current);
        self.handle_update_usb_volume(cx);
    }

    /// Stepping down to zero on an LE sink mutes the host on some systems;
    /// stop short and let the sink keep the last few steps.
    fn step_allowed<P: DonglePlatform>(&self, cx: &ObserverCx<'_, P>) -> bool {
        !(cx.config.is_le_or_dual_with_le_connected()
            && self.direction == StepDirection::Down
            && self.target > 0
            && Self::current_usb_volume(cx).percent() <= USB_VOLUME_DOWN_CUTOFF_PERCENT)
    }

    fn send_step<P: DonglePlatform>(&self, cx: &mut ObserverCx<'_, P>) {
        cx.io.platform.send_hid(match self.direction {
            StepDirection::Up => HidCommand::VolumeUp,
            StepDirection::Down => HidCommand::VolumeDown,
        });
    }

    fn handle_update_usb_volume<P: DonglePlatform>(&mut self, cx: &mut ObserverCx<'_, P>) {
        match self.host_os {
            HostOs::WindowsMac => {
                if self.step_count < USB_VOLUME_STEP_COUNT_MAX && self.step_allowed(cx) {
                    self.step_count += 1;
                    self.send_step(cx);
                    cx.io
                        .timers
                        .start(TimerId::UsbVolumeStep, cx.io.now_ms, USB_VOLUME_STEP_DELAY_MS);
                } else {
                    debug!("[VOL_OBS] stepping finished after {}", self.step_count);
                    self.state = VolumeSyncState::SinkVolumeSync;
                }
            }
            HostOs::Linux => self.send_step(cx),
            HostOs::Unidentified => {
                if self.step_count < USB_VOLUME_PROBE_BURST {
                    self.step_count += 1;
                    self.send_step(cx);
                    cx.io
                        .timers
                        .start(TimerId::UsbVolumeStep, cx.io.now_ms, USB_VOLUME_STEP_DELAY_MS);
                } else {
                    info!("[VOL_OBS] host silent, assuming linux");
                    self.host_os = HostOs::Linux;
                    self.state = VolumeSyncState::SinkVolumeSync;
                }
            }
        }
    }

    fn is_target_met(&self, usb: i16) -> bool {
        match self.direction {
            StepDirection::Up => usb >= self.target,
            StepDirection::Down => usb <= self.target,
        }
    }
}

impl<P: DonglePlatform> VolumeObserver<ObserverCx<'_, P>> for DongleVolumeObserver {
    fn on_volume_change(&mut self, cx: &mut ObserverCx<'_, P>, change: &VolumeChange) {
        if change.origin != EventOrigin::External {
            return;
        }
        let host_to_sink = matches!(change.source, USB_AUDIO | USB_VOICE);

        if !host_to_sink && cx.config.is_le_or_dual_with_le_connected() {
            let reported = change.volume.converted(LE_AUDIO_VOLUME_CONFIG).limited().as_u8();
            if self.last_sync_sink_volume == Some(reported) {
                trace!("[VOL_OBS] echo of {} ignored", reported);
                self.last_sync_sink_volume = None;
                return;
            }
        }

        match (self.state, host_to_sink) {
            (VolumeSyncState::Idle, _) => trace!("[VOL_OBS] idle, {:?} ignored", change.source),
            (VolumeSyncState::SinkVolumeSync, true) => self.update_sink_volume(cx, change.volume),
            (VolumeSyncState::SinkVolumeSync, false) => {
                self.state = VolumeSyncState::UsbVolumeSync;
                self.step_count = 0;
                self.update_usb_target(cx, change.volume);
            }
            (VolumeSyncState::UsbVolumeSync, true) => {
                self.step_count = 0;
                self.host_os = HostOs::WindowsMac;
                if self.is_target_met(change.volume.convert_to(USB_VOLUME_CONFIG)) {
                    cx.io.timers.cancel(TimerId::UsbVolumeStep);
                    self.state = VolumeSyncState::SinkVolumeSync;
                }
            }
            (VolumeSyncState::UsbVolumeSync, false) => self.update_usb_target(cx, change.volume),
        }
    }
}
