//! # LE Audio Volume
//!
//! Earbud side volume handling for LE Audio:
//!
//! - [`renderer`]: the VCS server role, turning volume indications from a
//!   VCS client into changes on the routed source
//! - [`observer`]: mirrors local changes back into the VCS server state
//! - [`sync`]: replicates volume from the primary to the secondary earbud
//!
//! [`LeAudioVolume`] owns all three together with the observer list and the
//! platform, and dispatches each volume or mute change to the observers
//! registered on its source.

pub mod observer;
pub mod renderer;
pub mod sync;

use crate::DongleError;
use crate::device::{DeviceHandle, DeviceProperties};
use crate::sources::{
    EventOrigin, GenericSource, MuteChange, ObserverList, RoutingInfo, SourceRegistry,
    VolumeChange, VolumeObserver,
};
use crate::volume::Volume;

pub use observer::LeAudioVolumeObserver;
pub use renderer::{ServiceHandle, VcsServer, VolumeRenderer};
pub use sync::{LeAudioVolumeSync, PeerSigChannel, PeerSignalling, PeerUpdate, SyncUpdate};

/// Observers held by [`LeAudioVolume`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ObserverKey {
    /// [`LeAudioVolumeSync`]
    VolumeSync,
    /// [`LeAudioVolumeObserver`]
    VcsMirror,
}

/// Everything the earbud volume components need from the platform
pub trait EarbudPlatform:
    SourceRegistry + RoutingInfo + VcsServer + PeerSignalling + DeviceProperties
{
}

impl<T> EarbudPlatform for T where
    T: SourceRegistry + RoutingInfo + VcsServer + PeerSignalling + DeviceProperties
{
}

/// LE Audio volume handling of one earbud
#[derive(Debug)]
pub struct LeAudioVolume<P> {
    platform: P,
    observers: ObserverList<ObserverKey>,
    renderer: VolumeRenderer,
    mirror: LeAudioVolumeObserver,
    sync: LeAudioVolumeSync,
}

impl<P: EarbudPlatform> LeAudioVolume<P> {
    /// Wrap `platform`. `is_primary` is the role before any handover.
    pub fn new(platform: P, is_primary: bool) -> Self {
        let mut sync = LeAudioVolumeSync::new();
        sync.set_role(is_primary);
        Self {
            platform,
            observers: ObserverList::new(),
            renderer: VolumeRenderer::new(),
            mirror: LeAudioVolumeObserver::new(),
            sync,
        }
    }

    /// Register the VCS server and start mirroring LE Audio source changes
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::AlreadyInitialised`] on a second call,
    /// [`DongleError::InitializationFailed`] if the service cannot be
    /// registered and [`DongleError::ObserverListFull`] if observers run out.
    pub fn init(&mut self) -> Result<ServiceHandle, DongleError> {
        let handle = self.renderer.init(&mut self.platform)?;
        self.mirror.attach(handle, &mut self.observers)?;
        Ok(handle)
    }

    /// Source VCS volume applies to, see [`VolumeRenderer::routed_source`]
    pub fn routed_source(&self) -> GenericSource {
        VolumeRenderer::routed_source(&self.platform)
    }

    /// VCS server reported a new volume state from a client
    pub fn handle_vcs_volume_state(&mut self, volume: u8, mute: bool) {
        let (volume, mute) = self.renderer.on_volume_state(&mut self.platform, volume, mute);
        self.notify_volume(&volume);
        self.notify_mute(&mute);
    }

    /// Change the volume of `source` and notify its observers
    pub fn set_volume(&mut self, source: GenericSource, origin: EventOrigin, volume: Volume) {
        self.platform.set_volume(source, origin, volume);
        self.handle_volume_change(&VolumeChange {
            source,
            origin,
            volume,
        });
    }

    /// Change the mute state of `source` and notify its observers
    pub fn set_mute(&mut self, source: GenericSource, origin: EventOrigin, mute: bool) {
        self.platform.set_mute(source, origin, mute);
        self.handle_mute_change(&MuteChange {
            source,
            origin,
            mute,
        });
    }

    /// The registry changed a volume on its own
    pub fn handle_volume_change(&mut self, change: &VolumeChange) {
        self.notify_volume(change);
    }

    /// The registry changed a mute state on its own
    pub fn handle_mute_change(&mut self, change: &MuteChange) {
        self.notify_mute(change);
    }

    /// Peer signalling link is up
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::ObserverListFull`] if observers run out.
    pub fn handle_peer_signalling_connected(&mut self) -> Result<(), DongleError> {
        let routed = self.platform.routed_generic_source();
        self.sync
            .handle_peer_connected(&mut self.platform, &mut self.observers, routed)
    }

    /// Peer signalling link is down
    pub fn handle_peer_signalling_disconnected(&mut self) {
        self.sync.handle_peer_disconnected(&mut self.observers);
    }

    /// Message received on [`PeerSigChannel::LeAudioVolume`]
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::Malformed`] if the payload does not decode.
    pub fn handle_peer_message(&mut self, payload: &[u8]) -> Result<(), DongleError> {
        let update = LeAudioVolumeSync::decode(payload)?;
        debug!("[VOL_SYNC] peer update for {:?}", update.source());
        let (volume, mute) = update.apply(&mut self.platform);
        self.notify_volume(&volume);
        self.notify_mute(&mute);
        Ok(())
    }

    /// Whether volume handling blocks a handover
    pub fn handover_veto(&self) -> bool {
        self.sync.veto()
    }

    /// Handover finished with this earbud in role `is_primary`
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::ObserverListFull`] if observers run out.
    pub fn handover_commit(&mut self, is_primary: bool) -> Result<(), DongleError> {
        self.sync.commit(&mut self.observers, is_primary)
    }

    /// Store the VCS client configuration of `device`
    ///
    /// # Errors
    ///
    /// See [`VolumeRenderer::persist_client_config`].
    pub fn persist_client_config(&mut self, device: DeviceHandle) -> Result<(), DongleError> {
        self.renderer.persist_client_config(&mut self.platform, device)
    }

    /// Restore the VCS client configuration of `device`
    ///
    /// # Errors
    ///
    /// See [`VolumeRenderer::restore_client_config`].
    pub fn restore_client_config(&mut self, device: DeviceHandle) -> Result<bool, DongleError> {
        self.renderer.restore_client_config(&mut self.platform, device)
    }

    /// Replication state
    pub const fn sync(&self) -> &LeAudioVolumeSync {
        &self.sync
    }

    /// Underlying platform
    pub const fn platform(&self) -> &P {
        &self.platform
    }

    /// Underlying platform, mutable
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    fn notify_volume(&mut self, change: &VolumeChange) {
        for key in self.observers.observers_of(change.source) {
            match key {
                ObserverKey::VolumeSync => self.sync.on_volume_change(&mut self.platform, change),
                ObserverKey::VcsMirror => self.mirror.on_volume_change(&mut self.platform, change),
            }
        }
    }

    fn notify_mute(&mut self, change: &MuteChange) {
        for key in self.observers.observers_of(change.source) {
            match key {
                ObserverKey::VolumeSync => self.sync.on_mute_change(&mut self.platform, change),
                ObserverKey::VcsMirror => self.mirror.on_mute_change(&mut self.platform, change),
            }
        }
    }
}
