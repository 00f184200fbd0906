//! Audio and voice source identifiers and the volume registry contract.
//!
//! The registry that owns per-source volume and mute state lives outside this
//! crate and is reached through [`SourceRegistry`]. Components that react to
//! volume changes implement [`VolumeObserver`] and are tracked per logical
//! source in an [`ObserverList`].

use heapless::Vec;

use crate::DongleError;
use crate::constants::MAX_OBSERVERS;
use crate::volume::Volume;

/// Logical audio sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AudioSource {
    /// First A2DP link
    A2dp1 = 1,
    /// Second A2DP link
    A2dp2 = 2,
    /// USB audio streaming interface
    Usb = 3,
    /// Wired analog line-in
    LineIn = 4,
    /// LE Audio unicast sink role
    LeAudioUnicast = 5,
    /// LE Audio broadcast sink role, also the idle fallback
    LeAudioBroadcast = 6,
    /// LE Audio unicast source role (dongle)
    LeAudioUnicastSender = 7,
    /// LE Audio broadcast source role (dongle)
    LeAudioBroadcastSender = 8,
}

impl AudioSource {
    /// Every audio source, in id order
    pub const ALL: [Self; 8] = [
        Self::A2dp1,
        Self::A2dp2,
        Self::Usb,
        Self::LineIn,
        Self::LeAudioUnicast,
        Self::LeAudioBroadcast,
        Self::LeAudioUnicastSender,
        Self::LeAudioBroadcastSender,
    ];

    /// Numeric identifier used on the wire
    #[must_use]
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Inverse of [`AudioSource::id`]
    #[must_use]
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    /// A2DP and LE Audio sink sources, the set replicated between earbuds
    #[must_use]
    pub const fn is_synchronised(self) -> bool {
        matches!(
            self,
            Self::A2dp1 | Self::A2dp2 | Self::LeAudioUnicast | Self::LeAudioBroadcast
        )
    }
}

/// Logical voice sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum VoiceSource {
    /// First HFP link
    Hfp1 = 1,
    /// Second HFP link
    Hfp2 = 2,
    /// USB voice (headset) interface
    Usb = 3,
    /// LE Audio unicast voice
    LeAudioUnicast = 4,
}

impl VoiceSource {
    /// Every voice source, in id order
    pub const ALL: [Self; 4] = [Self::Hfp1, Self::Hfp2, Self::Usb, Self::LeAudioUnicast];

    /// Numeric identifier used on the wire
    #[must_use]
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Inverse of [`VoiceSource::id`]
    #[must_use]
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }
}

/// Whatever is currently routed: an audio source, a voice source, or nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GenericSource {
    /// An audio source
    Audio(AudioSource),
    /// A voice source
    Voice(VoiceSource),
    /// Nothing routed
    #[default]
    Invalid,
}

impl GenericSource {
    /// `false` for [`GenericSource::Invalid`]
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid)
    }
}

/// Where a volume or mute change came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventOrigin {
    /// User action on this device
    Local,
    /// Remote controller (handset, host, VCS client)
    External,
    /// Replicated from the peer earbud
    Peer,
}

/// A volume change reported for one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VolumeChange {
    /// Source whose volume changed
    pub source: GenericSource,
    /// Who caused it
    pub origin: EventOrigin,
    /// New volume
    pub volume: Volume,
}

/// A mute change reported for one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MuteChange {
    /// Source whose mute state changed
    pub source: GenericSource,
    /// Who caused it
    pub origin: EventOrigin,
    /// New mute state
    pub mute: bool,
}

/// Volume and mute state owned by the audio/voice source registries.
pub trait SourceRegistry {
    /// Current volume of `source`, in its native config
    fn volume(&self, source: GenericSource) -> Volume;

    /// Request a volume change on `source`
    fn set_volume(&mut self, source: GenericSource, origin: EventOrigin, volume: Volume);

    /// Current mute state of `source`
    fn mute(&self, source: GenericSource) -> bool;

    /// Request a mute change on `source`
    fn set_mute(&mut self, source: GenericSource, origin: EventOrigin, mute: bool);
}

/// Answers "what is playing right now".
pub trait RoutingInfo {
    /// Source currently routed to the audio output
    fn routed_generic_source(&self) -> GenericSource;

    /// Audio source of the most recently used handset, if any is known
    fn mru_handset_audio_source(&self) -> Option<AudioSource>;
}

/// Receives volume and mute changes for the sources it is registered on.
///
/// `Cx` is whatever the observer needs to act on a change (a peer link, the
/// VCS server, the dongle's collaborators).
pub trait VolumeObserver<Cx: ?Sized> {
    /// Volume of an observed source changed
    fn on_volume_change(&mut self, cx: &mut Cx, change: &VolumeChange);

    /// Mute state of an observed source changed
    fn on_mute_change(&mut self, cx: &mut Cx, change: &MuteChange) {
        let _ = (cx, change);
    }
}

/// Which observers are attached to which source.
///
/// `K` names a concrete observer; the owner maps keys back to the observer
/// values it holds when dispatching.
#[derive(Debug)]
pub struct ObserverList<K> {
    entries: Vec<(GenericSource, K), MAX_OBSERVERS>,
}

impl<K: Copy + PartialEq> Default for ObserverList<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + PartialEq> ObserverList<K> {
    /// Create an empty list
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Attach `key` to `source`. Registering twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::ObserverListFull`] when the fixed capacity is exhausted.
    pub fn register(&mut self, source: GenericSource, key: K) -> Result<(), DongleError> {
        if self.is_registered(source, key) {
            return Ok(());
        }
        self.entries
            .push((source, key))
            .map_err(|_| DongleError::ObserverListFull)
    }

    /// Detach `key` from `source`
    pub fn unregister(&mut self, source: GenericSource, key: K) {
        self.entries.retain(|&(s, k)| !(s == source && k == key));
    }

    /// Detach `key` from every source
    pub fn unregister_all(&mut self, key: K) {
        self.entries.retain(|&(_, k)| k != key);
    }

    /// Whether `key` observes `source`
    #[must_use]
    pub fn is_registered(&self, source: GenericSource, key: K) -> bool {
        self.entries.iter().any(|&(s, k)| s == source && k == key)
    }

    /// Number of sources `key` observes
    #[must_use]
    pub fn count(&self, key: K) -> usize {
        self.entries.iter().filter(|&&(_, k)| k == key).count()
    }

    /// Observers attached to `source`, in registration order.
    ///
    /// Returns an owned snapshot so the caller may mutate observers while iterating.
    #[must_use]
    pub fn observers_of(&self, source: GenericSource) -> Vec<K, MAX_OBSERVERS> {
        self.entries
            .iter()
            .filter(|&&(s, _)| s == source)
            .map(|&(_, k)| k)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Key {
        Sync,
        Vcs,
    }

    #[test]
    fn test_source_ids_round_trip() {
        for source in AudioSource::ALL {
            assert_eq!(AudioSource::from_id(source.id()), Some(source));
        }
        for source in VoiceSource::ALL {
            assert_eq!(VoiceSource::from_id(source.id()), Some(source));
        }
        assert_eq!(AudioSource::from_id(0), None);
        assert_eq!(VoiceSource::from_id(9), None);
    }

    #[test]
    fn test_observer_list_per_source() {
        let a2dp = GenericSource::Audio(AudioSource::A2dp1);
        let hfp = GenericSource::Voice(VoiceSource::Hfp1);
        let mut list = ObserverList::new();

        list.register(a2dp, Key::Sync).unwrap();
        list.register(a2dp, Key::Vcs).unwrap();
        list.register(a2dp, Key::Sync).unwrap();
        list.register(hfp, Key::Sync).unwrap();

        assert_eq!(list.observers_of(a2dp).as_slice(), &[Key::Sync, Key::Vcs]);
        assert_eq!(list.count(Key::Sync), 2);

        list.unregister_all(Key::Sync);
        assert_eq!(list.observers_of(a2dp).as_slice(), &[Key::Vcs]);
        assert!(list.observers_of(hfp).is_empty());
    }

    #[test]
    fn test_observer_list_capacity_is_reported() {
        let mut list = ObserverList::new();
        for id in 0..MAX_OBSERVERS {
            let source = if id % 2 == 0 {
                GenericSource::Audio(AudioSource::ALL[id / 2 % 8])
            } else {
                GenericSource::Voice(VoiceSource::ALL[id / 2 % 4])
            };
            let key = u8::try_from(id).unwrap();
            list.register(source, key).unwrap();
        }
        assert_eq!(
            list.register(GenericSource::Invalid, 0xFF),
            Err(DongleError::ObserverListFull)
        );
    }
}
