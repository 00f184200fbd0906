//! # USB Dongle
//!
//! Control plane of a USB audio dongle streaming to a Bluetooth sink over
//! BR/EDR (A2DP and HFP) or LE Audio (unicast or broadcast).
//!
//! [`UsbDongle`] owns four cooperating pieces:
//!
//! - the application state machine ([`DongleState`]), which decides when to
//!   connect, stream audio, stream voice and disconnect
//! - the LE Audio context machine ([`LeaAudio`]), which talks to the LE
//!   Audio Client and builds the LE graphs
//! - the USB volume observer ([`DongleVolumeObserver`]), which keeps host
//!   and sink volume in step
//! - the persisted [`DongleConfig`] and [`BroadcastSourceConfig`]
//!
//! Everything runs to completion on one task. Events come in through
//! [`UsbDongle::handle_event`], timers expire through
//! [`UsbDongle::poll_timers`], and every collaborator is reached through the
//! [`DonglePlatform`] the dongle was created with.

pub mod config;
pub mod events;
pub mod lea;
pub mod lea_config;
pub mod platform;
pub mod volume_observer;

mod audio;
mod sm;

use heapless::Deque;

use crate::DongleError;
use crate::constants::NOTIFICATION_QUEUE_DEPTH;
use crate::device::DeviceHandle;
use crate::sources::{MuteChange, ObserverList, VolumeChange, VolumeObserver};
use crate::timer::{TimerId, TimerQueue};
use crate::volume::Volume;

pub use audio::{AudioInputs, InputSource};
pub use config::{AudioMode, DongleConfig, DongleOptions, SinkTransport, TransportMode};
pub use events::{
    DongleEvent, HidCallEvent, LeaEvent, MediaContext, Notification, TelephonyContext,
};
pub use lea::{LeaAudio, LeaContext, LeaContextMask, LeaState, PendingKind, PendingRequest};
pub use lea_config::{BroadcastAudioConfig, BroadcastSourceConfig, BroadcastType};
pub use platform::DonglePlatform;
pub use sm::DongleState;
pub use volume_observer::{DongleVolumeObserver, HostOs, VolumeSyncState};

use volume_observer::ObserverCx;

/// Platform, timers and the notification queue, shared by every state machine
#[derive(Debug)]
pub(crate) struct Io<P> {
    pub(crate) platform: P,
    pub(crate) timers: TimerQueue,
    pub(crate) outbox: Deque<Notification, NOTIFICATION_QUEUE_DEPTH>,
    pub(crate) now_ms: u64,
}

impl<P> Io<P> {
    pub(crate) const fn new(platform: P) -> Self {
        Self {
            platform,
            timers: TimerQueue::new(),
            outbox: Deque::new(),
            now_ms: 0,
        }
    }

    /// Queue `notification` for delivery once the running handler returns
    pub(crate) fn notify(&mut self, notification: Notification) {
        if self.outbox.push_back(notification).is_err() {
            error!("[DONGLE] notification queue full, dropped {:?}", notification);
        }
    }
}

/// Observers registered by the dongle on its sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DongleObserverKey {
    /// [`DongleVolumeObserver`]
    UsbVolume,
}

/// The dongle
#[derive(Debug)]
pub struct UsbDongle<P> {
    io: Io<P>,
    config: DongleConfig,
    lea: LeaAudio,
    sm: sm::DongleSm,
    inputs: AudioInputs,
    broadcast: BroadcastSourceConfig,
    volume: DongleVolumeObserver,
    observers: ObserverList<DongleObserverKey>,
    initialised: bool,
}

impl<P: DonglePlatform> UsbDongle<P> {
    /// Dongle in [`DongleState::Init`], configured from `options` until
    /// [`init`](Self::init) loads the stored configuration
    pub fn new(platform: P, options: &DongleOptions) -> Self {
        Self {
            io: Io::new(platform),
            config: DongleConfig::new(options),
            lea: LeaAudio::new(),
            sm: sm::DongleSm::new(options),
            inputs: AudioInputs::new(),
            broadcast: BroadcastSourceConfig::new(),
            volume: DongleVolumeObserver::new(),
            observers: ObserverList::new(),
            initialised: false,
        }
    }

    /// Load the stored configuration, register the volume observer and
    /// apply the sink service policy
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::AlreadyInitialised`] on a second call and
    /// [`DongleError::ObserverListFull`] if the observer list overflows.
    pub fn init(&mut self) -> Result<(), DongleError> {
        if self.initialised {
            return Err(DongleError::AlreadyInitialised);
        }
        self.config.load(&self.io.platform);
        let local = self.io.platform.local_address();
        self.broadcast.load(&self.io.platform, local);
        self.volume.init(&mut self.io, &mut self.observers)?;
        self.apply_service_policy();
        self.initialised = true;
        info!(
            "[DONGLE] initialised, {:?} over {:?}",
            self.config.audio_mode(),
            self.config.transport_mode()
        );
        Ok(())
    }

    /// Process one event at time `now_ms`, including every notification it raised
    pub fn handle_event(&mut self, now_ms: u64, event: DongleEvent) {
        self.io.now_ms = now_ms;
        trace!("[DONGLE] event {:?}", event);
        if event.is_external_input() {
            self.sm.reset_rescan_guard();
        }
        self.dispatch(event);
        self.drain_notifications();
    }

    /// Run every timer expired at `now_ms`
    pub fn poll_timers(&mut self, now_ms: u64) {
        self.io.now_ms = now_ms;
        while let Some(id) = self.io.timers.pop_expired(now_ms) {
            trace!("[DONGLE] timer {:?}", id);
            match id {
                TimerId::Rescan => self.handle_rescan_timer(),
                TimerId::GraphRestart => self.handle_graph_restart_timer(),
                TimerId::LeaContextChange => {
                    self.lea.handle_context_change_timer(&mut self.io, &self.config);
                }
                TimerId::AvrcpVolumeUpdate | TimerId::LeAudioVolumeUpdate | TimerId::UsbVolumeStep => {
                    let mut cx = ObserverCx {
                        io: &mut self.io,
                        config: &self.config,
                    };
                    self.volume.handle_timer(&mut cx, id);
                }
            }
            self.drain_notifications();
        }
    }

    /// Earliest armed timer deadline
    pub fn next_deadline(&self) -> Option<u64> {
        self.io.timers.next_deadline()
    }

    fn drain_notifications(&mut self) {
        while let Some(notification) = self.io.outbox.pop_front() {
            self.handle_notification(notification);
        }
    }

    /// Current application state
    pub const fn state(&self) -> DongleState {
        self.sm.state
    }

    /// Connected sink, else the most recently used one
    pub fn current_sink(&self) -> Option<DeviceHandle> {
        self.sm.connected_sink.or_else(|| self.io.platform.mru_sink())
    }

    /// Input re-evaluation gave up because it kept changing state
    pub const fn rescan_stalled(&self) -> bool {
        self.sm.rescan_stalled
    }

    /// Current audio mode
    pub const fn audio_mode(&self) -> AudioMode {
        self.config.audio_mode()
    }

    /// Current transport mode
    pub const fn transport_mode(&self) -> TransportMode {
        self.config.transport_mode()
    }

    /// Mode configuration
    pub const fn config(&self) -> &DongleConfig {
        &self.config
    }

    /// LE Audio context machine
    pub const fn lea(&self) -> &LeaAudio {
        &self.lea
    }

    /// Connected inputs
    pub const fn inputs(&self) -> &AudioInputs {
        &self.inputs
    }

    /// USB volume observer
    pub const fn volume_observer(&self) -> &DongleVolumeObserver {
        &self.volume
    }

    /// Broadcast source configuration
    pub const fn broadcast_config(&self) -> &BroadcastSourceConfig {
        &self.broadcast
    }

    /// Underlying platform
    pub const fn platform(&self) -> &P {
        &self.io.platform
    }

    /// Underlying platform, mutable
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.io.platform
    }

    /// Enter the state with raw value `raw`, running its entry actions
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::InvalidState`] if `raw` names no state.
    pub fn force_state_raw(&mut self, now_ms: u64, raw: u8) -> Result<(), DongleError> {
        let state = DongleState::try_from(raw)?;
        self.io.now_ms = now_ms;
        self.set_state(state);
        self.drain_notifications();
        Ok(())
    }

    /// Add a connected LE Audio context
    pub fn add_lea_context(&mut self, now_ms: u64, context: LeaContext) {
        self.io.now_ms = now_ms;
        self.lea.add_context(&mut self.io, &self.config, context);
        self.drain_notifications();
    }

    /// Remove a disconnected LE Audio context
    pub fn remove_lea_context(&mut self, now_ms: u64, context: LeaContext) {
        self.io.now_ms = now_ms;
        self.lea.remove_context(&mut self.io, &self.config, context);
        self.drain_notifications();
    }

    /// Set and store the broadcast name
    ///
    /// # Errors
    ///
    /// See [`BroadcastSourceConfig::set_name`].
    pub fn set_broadcast_name(&mut self, name: &str) -> Result<(), DongleError> {
        if self.broadcast.set_name(&mut self.io.platform, name)? {
            self.io.platform.broadcast_config_changed();
        }
        Ok(())
    }

    /// Set and store the broadcast code, empty for an open broadcast
    ///
    /// # Errors
    ///
    /// See [`BroadcastSourceConfig::set_code`].
    pub fn set_broadcast_code(&mut self, code: &[u8]) -> Result<(), DongleError> {
        if self.broadcast.set_code(&mut self.io.platform, code)? {
            self.io.platform.broadcast_config_changed();
        }
        Ok(())
    }

    /// Set and store the broadcast identifier
    ///
    /// # Errors
    ///
    /// See [`BroadcastSourceConfig::set_broadcast_id`].
    pub fn set_broadcast_id(&mut self, id: &[u8]) -> Result<(), DongleError> {
        self.broadcast.set_broadcast_id(&mut self.io.platform, id)?;
        self.io.platform.broadcast_config_changed();
        Ok(())
    }

    /// Set and store a broadcast audio configuration record
    ///
    /// # Errors
    ///
    /// See [`BroadcastSourceConfig::set_audio_config`].
    pub fn set_broadcast_audio_config(&mut self, record: &[u8]) -> Result<(), DongleError> {
        self.broadcast.set_audio_config(&mut self.io.platform, record)?;
        self.io.platform.broadcast_config_changed();
        Ok(())
    }

    /// Push `volume` to the connected sink right away
    pub fn set_absolute_sink_volume(&mut self, volume: Volume) {
        let mut cx = ObserverCx {
            io: &mut self.io,
            config: &self.config,
        };
        self.volume.set_absolute_sink_volume(&mut cx, volume);
    }

    fn notify_volume(&mut self, change: &VolumeChange) {
        for key in self.observers.observers_of(change.source) {
            match key {
                DongleObserverKey::UsbVolume => {
                    let mut cx = ObserverCx {
                        io: &mut self.io,
                        config: &self.config,
                    };
                    self.volume.on_volume_change(&mut cx, change);
                }
            }
        }
    }

    fn notify_mute(&mut self, change: &MuteChange) {
        for key in self.observers.observers_of(change.source) {
            match key {
                DongleObserverKey::UsbVolume => {
                    let mut cx = ObserverCx {
                        io: &mut self.io,
                        config: &self.config,
                    };
                    self.volume.on_mute_change(&mut cx, change);
                }
            }
        }
    }

    fn apply_service_policy(&mut self) {
        if !self.io.platform.set_service_mode(self.config.sink_service_mode()) {
            warn!("[DONGLE] sink service refused {:?}", self.config.sink_service_mode());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dongle::platform::{ConfigKey, ConfigStore};
    use crate::sources::{AudioSource, EventOrigin, GenericSource};
    use crate::test_support::{Call, FakeDongle};
    use crate::volume::{AVRCP_VOLUME_CONFIG, USB_VOLUME_CONFIG};

    fn dongle() -> UsbDongle<FakeDongle> {
        let mut dongle = UsbDongle::new(FakeDongle::new(), &DongleOptions::default());
        dongle.init().unwrap();
        dongle
    }

    #[test]
    fn test_init_once() {
        let mut dongle = dongle();
        assert_eq!(dongle.state(), DongleState::Init);
        assert!(dongle.platform().called(Call::SetServiceMode(
            dongle.config().sink_service_mode()
        )));
        assert_eq!(dongle.init(), Err(DongleError::AlreadyInitialised));
    }

    #[test]
    fn test_stored_modes_loaded() {
        let mut platform = FakeDongle::new();
        platform
            .store_config(
                ConfigKey::Modes,
                &[AudioMode::Gaming as u8, TransportMode::LeAudio as u8],
            )
            .unwrap();
        let mut dongle = UsbDongle::new(platform, &DongleOptions::default());
        dongle.init().unwrap();
        assert_eq!(dongle.audio_mode(), AudioMode::Gaming);
        assert_eq!(dongle.transport_mode(), TransportMode::LeAudio);
    }

    #[test]
    fn test_force_state_raw_rejects_unknown() {
        let mut dongle = dongle();
        assert_eq!(dongle.force_state_raw(0, 0xFF), Err(DongleError::InvalidState));
        dongle.force_state_raw(0, DongleState::Idle as u8).unwrap();
        assert_eq!(dongle.state(), DongleState::Idle);
    }

    #[test]
    fn test_current_sink_falls_back_to_mru() {
        let mut dongle = dongle();
        assert_eq!(dongle.current_sink(), None);
        dongle.platform_mut().mru = Some(DeviceHandle(3));
        assert_eq!(dongle.current_sink(), Some(DeviceHandle(3)));
    }

    #[test]
    fn test_volume_change_reaches_observer() {
        let mut dongle = dongle();
        dongle.handle_event(0, DongleEvent::UsbAudioConnected);
        dongle.handle_event(0, DongleEvent::AvrcpConnected);
        assert_eq!(dongle.volume_observer().state(), VolumeSyncState::SinkVolumeSync);
        dongle.poll_timers(1_000);
        dongle.platform_mut().calls.clear();

        let volume = Volume::new(USB_VOLUME_CONFIG, 255);
        dongle.handle_event(
            1_000,
            DongleEvent::VolumeChanged(VolumeChange {
                source: GenericSource::Audio(AudioSource::Usb),
                origin: EventOrigin::External,
                volume,
            }),
        );
        assert!(dongle.next_deadline().is_some());
        dongle.poll_timers(2_000);
        let expected = volume.convert_to(AVRCP_VOLUME_CONFIG);
        assert!(dongle.platform().called(Call::SetAvrcpVolume(expected as u8)));
    }

    #[test]
    fn test_broadcast_setters_notify_client() {
        let mut dongle = dongle();
        dongle.set_broadcast_name("Lounge").unwrap();
        assert_eq!(dongle.broadcast_config().name(), "Lounge");
        assert_eq!(dongle.platform().count(|c| *c == Call::BroadcastConfigChanged), 1);

        // Same name again: stored, nothing to reconfigure.
        dongle.set_broadcast_name("Lounge").unwrap();
        assert_eq!(dongle.platform().count(|c| *c == Call::BroadcastConfigChanged), 1);

        assert_eq!(dongle.set_broadcast_name(""), Err(DongleError::InvalidParameter));
        dongle.set_broadcast_id(&[1, 2, 3, 4]).unwrap();
        assert_eq!(dongle.broadcast_config().broadcast_id(), 0x0403_0201);
        assert_eq!(dongle.platform().count(|c| *c == Call::BroadcastConfigChanged), 2);
    }
}
