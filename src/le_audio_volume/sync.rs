//! Primary to secondary earbud volume replication.
//!
//! The primary earbud observes its LE Audio and A2DP sources and sends every
//! non-peer change to the secondary over a dedicated peer signalling channel.
//! The channel holds at most one message: each send first cancels whatever is
//! still waiting for transmission, so only the latest value ever goes out.
//!
//! Changes are only forwarded as a [`ForwardableChange`], which cannot be built
//! from a peer-originated event. Updates received from the peer are decoded
//! into a [`PeerUpdate`], which always applies with [`EventOrigin::Peer`] and has
//! no way back into a [`ForwardableChange`].

use crate::DongleError;
use crate::sources::{
    AudioSource, EventOrigin, GenericSource, MuteChange, ObserverList, SourceRegistry,
    VoiceSource, VolumeChange, VolumeObserver,
};
use crate::volume::Volume;

use super::ObserverKey;

/// Logical channels multiplexed over the peer signalling link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeerSigChannel {
    /// LE Audio volume replication
    LeAudioVolume,
}

/// Marshalled message transport between the two earbuds
pub trait PeerSignalling {
    /// Drop every message on `channel` that has not been transmitted yet.
    /// Returns how many were dropped. Best effort: a message already on air is not recalled.
    fn cancel_pending(&mut self, channel: PeerSigChannel) -> usize;

    /// Queue `payload` for transmission on `channel`
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::ChannelError`] if the link refuses the message.
    fn send(&mut self, channel: PeerSigChannel, payload: &[u8]) -> Result<(), DongleError>;
}

/// Kind of source carried in a [`SyncUpdate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SourceType {
    /// [`GenericSource::Audio`]
    Audio = 0,
    /// [`GenericSource::Voice`]
    Voice = 1,
}

/// Wire layout of a replicated volume: `[source_type, source, volume, mute]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SyncUpdate {
    /// Audio or voice
    pub source_type: SourceType,
    /// Source identifier within its type
    pub source: u8,
    /// Raw volume in the source's native units
    pub volume: u8,
    /// Non-zero when muted
    pub mute: u8,
}

impl SyncUpdate {
    /// Encoded size in bytes
    pub const LENGTH: usize = 4;

    /// Encode for the peer link
    #[must_use]
    pub const fn to_bytes(&self) -> [u8; Self::LENGTH] {
        [self.source_type as u8, self.source, self.volume, self.mute]
    }

    /// Decode a peer link payload
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::Malformed`] on a wrong length or unknown source type.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DongleError> {
        let &[source_type, source, volume, mute] = bytes else {
            return Err(DongleError::Malformed);
        };
        let source_type = match source_type {
            0 => SourceType::Audio,
            1 => SourceType::Voice,
            _ => return Err(DongleError::Malformed),
        };
        Ok(Self {
            source_type,
            source,
            volume,
            mute,
        })
    }
}

/// A local or externally caused change that may be sent to the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardableChange {
    source: GenericSource,
    volume: Volume,
    mute: bool,
}

impl ForwardableChange {
    /// Accept a volume change unless it came from the peer. `mute` is the
    /// source's current mute state.
    #[must_use]
    pub fn from_volume_change(change: &VolumeChange, mute: bool) -> Option<Self> {
        Self::new(change.source, change.origin, change.volume, mute)
    }

    /// Accept a mute change unless it came from the peer. `volume` is the
    /// source's current volume.
    #[must_use]
    pub fn from_mute_change(change: &MuteChange, volume: Volume) -> Option<Self> {
        Self::new(change.source, change.origin, volume, change.mute)
    }

    fn new(source: GenericSource, origin: EventOrigin, volume: Volume, mute: bool) -> Option<Self> {
        match origin {
            EventOrigin::Peer => None,
            EventOrigin::Local | EventOrigin::External => Some(Self {
                source,
                volume,
                mute,
            }),
        }
    }

    /// Snapshot of the state of a source, pushed once when the link comes up
    fn snapshot<R: SourceRegistry + ?Sized>(registry: &R, source: GenericSource) -> Self {
        Self {
            source,
            volume: registry.volume(source),
            mute: registry.mute(source),
        }
    }

    /// Source concerned
    #[must_use]
    pub const fn source(&self) -> GenericSource {
        self.source
    }

    /// Wire form, or `None` for [`GenericSource::Invalid`]
    #[must_use]
    pub fn to_update(&self) -> Option<SyncUpdate> {
        let (source_type, source) = match self.source {
            GenericSource::Audio(audio) => (SourceType::Audio, audio.id()),
            GenericSource::Voice(voice) => (SourceType::Voice, voice.id()),
            GenericSource::Invalid => return None,
        };
        Some(SyncUpdate {
            source_type,
            source,
            volume: self.volume.as_u8(),
            mute: u8::from(self.mute),
        })
    }
}

/// A change received from the peer, applied with [`EventOrigin::Peer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerUpdate {
    source: GenericSource,
    volume: u8,
    mute: bool,
}

impl TryFrom<SyncUpdate> for PeerUpdate {
    type Error = DongleError;

    fn try_from(update: SyncUpdate) -> Result<Self, Self::Error> {
        let source = match update.source_type {
            SourceType::Audio => AudioSource::from_id(update.source).map(GenericSource::Audio),
            SourceType::Voice => VoiceSource::from_id(update.source).map(GenericSource::Voice),
        }
        .ok_or(DongleError::Malformed)?;
        Ok(Self {
            source,
            volume: update.volume,
            mute: update.mute != 0,
        })
    }
}

impl PeerUpdate {
    /// Source concerned
    #[must_use]
    pub const fn source(&self) -> GenericSource {
        self.source
    }

    /// Push the replicated state into the local registry. The raw volume is
    /// interpreted in the source's native config.
    pub fn apply<R: SourceRegistry + ?Sized>(&self, registry: &mut R) -> (VolumeChange, MuteChange) {
        let config = registry.volume(self.source).config;
        let volume = Volume::new(config, i16::from(self.volume));
        registry.set_volume(self.source, EventOrigin::Peer, volume);
        registry.set_mute(self.source, EventOrigin::Peer, self.mute);
        (
            VolumeChange {
                source: self.source,
                origin: EventOrigin::Peer,
                volume,
            },
            MuteChange {
                source: self.source,
                origin: EventOrigin::Peer,
                mute: self.mute,
            },
        )
    }
}

/// Replication role and link state
#[derive(Debug, Default)]
pub struct LeAudioVolumeSync {
    is_primary: bool,
    peer_connected: bool,
}

impl LeAudioVolumeSync {
    /// New instance, secondary with the link down
    #[must_use]
    pub const fn new() -> Self {
        Self {
            is_primary: false,
            peer_connected: false,
        }
    }

    /// Whether this earbud currently forwards changes
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.is_primary && self.peer_connected
    }

    /// Current role
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        self.is_primary
    }

    /// Whether the peer link is up
    #[must_use]
    pub const fn is_peer_connected(&self) -> bool {
        self.peer_connected
    }

    /// Set the initial role before any link event
    pub fn set_role(&mut self, is_primary: bool) {
        self.is_primary = is_primary;
    }

    /// The peer link came up. As primary, start observing and push `routed`
    /// once.
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::ObserverListFull`] if observers cannot be registered.
    pub fn handle_peer_connected<Cx>(
        &mut self,
        cx: &mut Cx,
        observers: &mut ObserverList<ObserverKey>,
        routed: GenericSource,
    ) -> Result<(), DongleError>
    where
        Cx: PeerSignalling + SourceRegistry + ?Sized,
    {
        self.peer_connected = true;
        if !self.is_primary {
            debug!("[VOL_SYNC] peer connected, secondary");
            return Ok(());
        }
        info!("[VOL_SYNC] peer connected, primary, start observing");
        Self::register_observers(observers)?;
        if routed.is_valid() {
            let snapshot = ForwardableChange::snapshot(&*cx, routed);
            self.send(cx, &snapshot);
        }
        Ok(())
    }

    /// The peer link went down
    pub fn handle_peer_disconnected(&mut self, observers: &mut ObserverList<ObserverKey>) {
        info!("[VOL_SYNC] peer disconnected");
        self.peer_connected = false;
        observers.unregister_all(ObserverKey::VolumeSync);
    }

    /// Handover veto hook. Volume replication never blocks a handover.
    #[must_use]
    pub const fn veto(&self) -> bool {
        false
    }

    /// Handover completed; adopt the new role. Observers follow the role but
    /// nothing is re-sent.
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::ObserverListFull`] if observers cannot be registered.
    pub fn commit(
        &mut self,
        observers: &mut ObserverList<ObserverKey>,
        is_primary: bool,
    ) -> Result<(), DongleError> {
        info!("[VOL_SYNC] handover commit, primary={}", is_primary);
        self.is_primary = is_primary;
        if self.is_active() {
            Self::register_observers(observers)
        } else {
            observers.unregister_all(ObserverKey::VolumeSync);
            Ok(())
        }
    }

    /// Decode a message received from the peer
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::Malformed`] for payloads that do not decode.
    pub fn decode(payload: &[u8]) -> Result<PeerUpdate, DongleError> {
        SyncUpdate::from_bytes(payload)?.try_into()
    }

    fn register_observers(observers: &mut ObserverList<ObserverKey>) -> Result<(), DongleError> {
        for source in AudioSource::ALL.into_iter().filter(|s| s.is_synchronised()) {
            observers.register(GenericSource::Audio(source), ObserverKey::VolumeSync)?;
        }
        observers.register(
            GenericSource::Voice(VoiceSource::LeAudioUnicast),
            ObserverKey::VolumeSync,
        )
    }

    fn send<Cx: PeerSignalling + ?Sized>(&mut self, cx: &mut Cx, change: &ForwardableChange) {
        if !self.is_active() {
            return;
        }
        let Some(update) = change.to_update() else {
            return;
        };
        let dropped = cx.cancel_pending(PeerSigChannel::LeAudioVolume);
        if dropped > 0 {
            debug!("[VOL_SYNC] superseded {} pending update(s)", dropped);
        }
        if let Err(e) = cx.send(PeerSigChannel::LeAudioVolume, &update.to_bytes()) {
            warn!("[VOL_SYNC] send failed: {:?}", e);
        }
    }
}

impl<Cx> VolumeObserver<Cx> for LeAudioVolumeSync
where
    Cx: PeerSignalling + SourceRegistry + ?Sized,
{
    fn on_volume_change(&mut self, cx: &mut Cx, change: &VolumeChange) {
        let mute = cx.mute(change.source);
        if let Some(forward) = ForwardableChange::from_volume_change(change, mute) {
            self.send(cx, &forward);
        }
    }

    fn on_mute_change(&mut self, cx: &mut Cx, change: &MuteChange) {
        let volume = cx.volume(change.source);
        if let Some(forward) = ForwardableChange::from_mute_change(change, volume) {
            self.send(cx, &forward);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeEarbud;
    use crate::volume::AVRCP_VOLUME_CONFIG;

    const A2DP: GenericSource = GenericSource::Audio(AudioSource::A2dp1);

    fn primary(fake: &mut FakeEarbud, observers: &mut ObserverList<ObserverKey>) -> LeAudioVolumeSync {
        let mut sync = LeAudioVolumeSync::new();
        sync.set_role(true);
        sync.handle_peer_connected(fake, observers, GenericSource::Invalid)
            .unwrap();
        sync
    }

    fn change(origin: EventOrigin, value: i16) -> VolumeChange {
        VolumeChange {
            source: A2DP,
            origin,
            volume: Volume::new(AVRCP_VOLUME_CONFIG, value),
        }
    }

    #[test]
    fn test_sync_update_wire_layout() {
        let update = SyncUpdate {
            source_type: SourceType::Voice,
            source: 4,
            volume: 200,
            mute: 1,
        };
        assert_eq!(update.to_bytes(), [1, 4, 200, 1]);
        assert_eq!(SyncUpdate::from_bytes(&[1, 4, 200, 1]), Ok(update));
        assert_eq!(SyncUpdate::from_bytes(&[2, 4, 200, 1]), Err(DongleError::Malformed));
        assert_eq!(SyncUpdate::from_bytes(&[0, 4, 200]), Err(DongleError::Malformed));
    }

    #[test]
    fn test_peer_origin_is_never_forwardable() {
        assert!(ForwardableChange::from_volume_change(&change(EventOrigin::Peer, 10), false).is_none());
        assert!(ForwardableChange::from_volume_change(&change(EventOrigin::Local, 10), false).is_some());
        assert!(ForwardableChange::from_volume_change(&change(EventOrigin::External, 10), false).is_some());
    }

    #[test]
    fn test_two_quick_updates_transmit_only_the_latest() {
        let mut fake = FakeEarbud::new();
        let mut observers = ObserverList::new();
        let mut sync = primary(&mut fake, &mut observers);

        sync.on_volume_change(&mut fake, &change(EventOrigin::Local, 90));
        sync.on_volume_change(&mut fake, &change(EventOrigin::Local, 100));
        fake.flush_peer_link();

        assert_eq!(fake.transmitted.as_slice(), &[[0, 1, 100, 0]]);
        assert_eq!(fake.cancel_calls, 2);
    }

    #[test]
    fn test_nothing_sent_while_secondary_or_link_down() {
        let mut fake = FakeEarbud::new();
        let mut observers = ObserverList::new();
        let mut sync = LeAudioVolumeSync::new();

        sync.handle_peer_connected(&mut fake, &mut observers, A2DP).unwrap();
        sync.on_volume_change(&mut fake, &change(EventOrigin::Local, 50));
        assert_eq!(observers.count(ObserverKey::VolumeSync), 0);

        sync.set_role(true);
        sync.handle_peer_disconnected(&mut observers);
        sync.on_volume_change(&mut fake, &change(EventOrigin::Local, 60));

        fake.flush_peer_link();
        assert!(fake.transmitted.is_empty());
    }

    #[test]
    fn test_connect_pushes_routed_volume_once() {
        let mut fake = FakeEarbud::new();
        fake.set_volume(A2DP, EventOrigin::Local, Volume::new(AVRCP_VOLUME_CONFIG, 80));
        let mut observers = ObserverList::new();
        let mut sync = LeAudioVolumeSync::new();
        sync.set_role(true);

        sync.handle_peer_connected(&mut fake, &mut observers, A2DP).unwrap();
        fake.flush_peer_link();

        assert_eq!(fake.transmitted.as_slice(), &[[0, 1, 80, 0]]);
        assert!(observers.is_registered(A2DP, ObserverKey::VolumeSync));
        assert!(observers.is_registered(
            GenericSource::Audio(AudioSource::LeAudioUnicast),
            ObserverKey::VolumeSync
        ));
        assert!(!observers.is_registered(
            GenericSource::Audio(AudioSource::Usb),
            ObserverKey::VolumeSync
        ));
    }

    #[test]
    fn test_handover_commit_swaps_observers_without_resend() {
        let mut fake = FakeEarbud::new();
        let mut observers = ObserverList::new();
        let mut sync = LeAudioVolumeSync::new();
        sync.handle_peer_connected(&mut fake, &mut observers, A2DP).unwrap();

        assert!(!sync.veto());
        sync.commit(&mut observers, true).unwrap();
        assert!(observers.is_registered(A2DP, ObserverKey::VolumeSync));

        sync.commit(&mut observers, false).unwrap();
        assert_eq!(observers.count(ObserverKey::VolumeSync), 0);

        fake.flush_peer_link();
        assert!(fake.transmitted.is_empty());
    }

    #[test]
    fn test_peer_update_applies_with_peer_origin() {
        let mut fake = FakeEarbud::new();
        let update = LeAudioVolumeSync::decode(&[0, 1, 100, 1]).unwrap();
        let (volume, mute) = update.apply(&mut fake);

        assert_eq!(volume.origin, EventOrigin::Peer);
        assert_eq!(volume.volume.value, 100);
        assert!(mute.mute);
        assert_eq!(fake.volume(A2DP).value, 100);
        assert_eq!(fake.last_origin(A2DP), Some(EventOrigin::Peer));
        assert_eq!(LeAudioVolumeSync::decode(&[0, 0xEE, 1, 0]), Err(DongleError::Malformed));
    }
}
