//! Mirrors LE Audio source volume changes into the VCS server state.

use crate::sources::{
    AudioSource, EventOrigin, GenericSource, MuteChange, ObserverList, SourceRegistry,
    VoiceSource, VolumeChange, VolumeObserver,
};
use crate::volume::LE_AUDIO_VOLUME_CONFIG;
use crate::DongleError;

use super::ObserverKey;
use super::renderer::{ServiceHandle, VcsServer};

/// Sources whose volume is published through VCS
pub const MIRRORED_SOURCES: [GenericSource; 3] = [
    GenericSource::Audio(AudioSource::LeAudioUnicast),
    GenericSource::Audio(AudioSource::LeAudioBroadcast),
    GenericSource::Voice(VoiceSource::LeAudioUnicast),
];

/// Keeps the VCS volume state in line with changes made on the earbud
#[derive(Debug, Default)]
pub struct LeAudioVolumeObserver {
    handle: Option<ServiceHandle>,
}

impl LeAudioVolumeObserver {
    /// Observer without a service yet
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Attach to the registered VCS instance and start observing
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::ObserverListFull`] if the observer list is exhausted.
    pub fn attach(
        &mut self,
        handle: ServiceHandle,
        observers: &mut ObserverList<ObserverKey>,
    ) -> Result<(), DongleError> {
        self.handle = Some(handle);
        MIRRORED_SOURCES
            .into_iter()
            .try_for_each(|source| observers.register(source, ObserverKey::VcsMirror))
    }

    fn publish<Cx>(&self, cx: &mut Cx, source: GenericSource, origin: EventOrigin)
    where
        Cx: VcsServer + SourceRegistry + ?Sized,
    {
        // VCS originated changes are already reflected in the server state.
        if origin == EventOrigin::External {
            return;
        }
        let Some(handle) = self.handle else {
            return;
        };
        let volume = cx.volume(source).converted(LE_AUDIO_VOLUME_CONFIG).limited();
        let mute = cx.mute(source);
        cx.set_volume_state(handle, volume.as_u8(), mute);
    }
}

impl<Cx> VolumeObserver<Cx> for LeAudioVolumeObserver
where
    Cx: VcsServer + SourceRegistry + ?Sized,
{
    fn on_volume_change(&mut self, cx: &mut Cx, change: &VolumeChange) {
        self.publish(cx, change.source, change.origin);
    }

    fn on_mute_change(&mut self, cx: &mut Cx, change: &MuteChange) {
        self.publish(cx, change.source, change.origin);
    }
}
