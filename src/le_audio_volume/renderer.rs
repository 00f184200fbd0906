//! Volume renderer role: VCS server indications into the source registry.

use crate::DongleError;
use crate::constants::VCS_CONFIG_PERSISTENCE_TAG;
use crate::device::{DeviceHandle, DeviceProperties, PropertyBlob};
use crate::sources::{
    AudioSource, EventOrigin, GenericSource, MuteChange, RoutingInfo, SourceRegistry, VolumeChange,
};
use crate::volume::{LE_AUDIO_VOLUME_CONFIG, Volume};

/// Handle of the registered VCS server instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServiceHandle(pub u16);

/// GATT Volume Control Service server
pub trait VcsServer {
    /// Register the service. `None` if the stack refused.
    fn register(&mut self) -> Option<ServiceHandle>;

    /// Publish a new volume state to connected clients
    fn set_volume_state(&mut self, handle: ServiceHandle, volume: u8, mute: bool);

    /// Client characteristic configuration held for `device`
    fn client_config(&self, handle: ServiceHandle, device: DeviceHandle) -> Option<PropertyBlob>;

    /// Restore a previously persisted client configuration
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::InvalidParameter`] if the server rejects the blob.
    fn set_client_config(
        &mut self,
        handle: ServiceHandle,
        device: DeviceHandle,
        config: &[u8],
    ) -> Result<(), DongleError>;
}

/// Bridges VCS volume indications to whichever source is routed
#[derive(Debug, Default)]
pub struct VolumeRenderer {
    handle: Option<ServiceHandle>,
}

impl VolumeRenderer {
    /// Persistence tag of the VCS client configuration
    pub const PERSISTENCE_TAG: u8 = VCS_CONFIG_PERSISTENCE_TAG;

    /// Source used when nothing is routed and no handset is known
    pub const IDLE_SOURCE: GenericSource = GenericSource::Audio(AudioSource::LeAudioBroadcast);

    /// Unregistered renderer
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register the single VCS server instance
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::AlreadyInitialised`] on a second call and
    /// [`DongleError::InitializationFailed`] if the stack refuses the service.
    pub fn init<V: VcsServer + ?Sized>(&mut self, vcs: &mut V) -> Result<ServiceHandle, DongleError> {
        if self.handle.is_some() {
            return Err(DongleError::AlreadyInitialised);
        }
        let handle = vcs.register().ok_or(DongleError::InitializationFailed)?;
        info!("[VCS] renderer registered, handle {}", handle.0);
        self.handle = Some(handle);
        Ok(handle)
    }

    /// Registered service handle
    #[must_use]
    pub const fn handle(&self) -> Option<ServiceHandle> {
        self.handle
    }

    /// Source VCS volume applies to: the routed source, else the most recently
    /// used handset's audio source, else the idle broadcast source.
    #[must_use]
    pub fn routed_source<R: RoutingInfo + ?Sized>(routing: &R) -> GenericSource {
        let routed = routing.routed_generic_source();
        if routed.is_valid() {
            return routed;
        }
        routing
            .mru_handset_audio_source()
            .map_or(Self::IDLE_SOURCE, GenericSource::Audio)
    }

    /// Apply a VCS server volume state indication. Returns the resulting
    /// changes so the caller can notify observers.
    pub fn on_volume_state<Cx>(&self, cx: &mut Cx, volume: u8, mute: bool) -> (VolumeChange, MuteChange)
    where
        Cx: RoutingInfo + SourceRegistry + ?Sized,
    {
        let source = Self::routed_source(&*cx);
        let target = cx.volume(source).config;
        let converted = Volume::new(LE_AUDIO_VOLUME_CONFIG, i16::from(volume)).converted(target);
        debug!(
            "[VCS] volume {} mute {} -> {:?} value {}",
            volume,
            mute,
            source,
            converted.value
        );
        cx.set_volume(source, EventOrigin::External, converted);
        cx.set_mute(source, EventOrigin::External, mute);
        (
            VolumeChange {
                source,
                origin: EventOrigin::External,
                volume: converted,
            },
            MuteChange {
                source,
                origin: EventOrigin::External,
                mute,
            },
        )
    }

    /// Copy the client configuration of `device` into its device record
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::NotInitialised`] before [`VolumeRenderer::init`],
    /// or the store's error.
    pub fn persist_client_config<Cx>(&self, cx: &mut Cx, device: DeviceHandle) -> Result<(), DongleError>
    where
        Cx: VcsServer + DeviceProperties + ?Sized,
    {
        let handle = self.handle.ok_or(DongleError::NotInitialised)?;
        match cx.client_config(handle, device) {
            Some(blob) => cx.set_property(device, Self::PERSISTENCE_TAG, &blob),
            None => Ok(()),
        }
    }

    /// Restore the persisted client configuration of `device`. Returns `false`
    /// when nothing was stored.
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::NotInitialised`] before [`VolumeRenderer::init`],
    /// or the server's error.
    pub fn restore_client_config<Cx>(&self, cx: &mut Cx, device: DeviceHandle) -> Result<bool, DongleError>
    where
        Cx: VcsServer + DeviceProperties + ?Sized,
    {
        let handle = self.handle.ok_or(DongleError::NotInitialised)?;
        let Some(blob) = cx.property(device, Self::PERSISTENCE_TAG) else {
            return Ok(false);
        };
        cx.set_client_config(handle, device, &blob)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::VoiceSource;
    use crate::test_support::FakeEarbud;
    use crate::volume::AVRCP_VOLUME_CONFIG;

    #[test]
    fn test_single_service_handle() {
        let mut fake = FakeEarbud::new();
        let mut renderer = VolumeRenderer::new();

        let handle = renderer.init(&mut fake).unwrap();
        assert_eq!(renderer.handle(), Some(handle));
        assert_eq!(renderer.init(&mut fake), Err(DongleError::AlreadyInitialised));
        assert_eq!(fake.vcs_registrations, 1);
    }

    #[test]
    fn test_routed_source_fallbacks() {
        let mut fake = FakeEarbud::new();
        assert_eq!(VolumeRenderer::routed_source(&fake), VolumeRenderer::IDLE_SOURCE);

        fake.mru_handset = Some(AudioSource::A2dp2);
        assert_eq!(
            VolumeRenderer::routed_source(&fake),
            GenericSource::Audio(AudioSource::A2dp2)
        );

        fake.routed = GenericSource::Voice(VoiceSource::Hfp1);
        assert_eq!(
            VolumeRenderer::routed_source(&fake),
            GenericSource::Voice(VoiceSource::Hfp1)
        );
    }

    #[test]
    fn test_volume_state_converted_to_source_units() {
        let a2dp = GenericSource::Audio(AudioSource::A2dp1);
        let mut fake = FakeEarbud::new();
        fake.routed = a2dp;
        let renderer = VolumeRenderer::new();

        let (change, mute) = renderer.on_volume_state(&mut fake, 255, true);

        assert_eq!(change.volume, Volume::new(AVRCP_VOLUME_CONFIG, 127));
        assert_eq!(change.origin, EventOrigin::External);
        assert!(mute.mute);
        assert_eq!(fake.volume(a2dp).value, 127);
        assert!(fake.mute(a2dp));
    }

    #[test]
    fn test_client_config_persisted_under_tag() {
        let device = DeviceHandle(7);
        let mut fake = FakeEarbud::new();
        let mut renderer = VolumeRenderer::new();
        assert_eq!(
            renderer.persist_client_config(&mut fake, device),
            Err(DongleError::NotInitialised)
        );
        renderer.init(&mut fake).unwrap();
        fake.vcs_client_config = Some(PropertyBlob::from_slice(&[1, 0, 2]).unwrap());

        renderer.persist_client_config(&mut fake, device).unwrap();
        assert_eq!(
            fake.property(device, 0x04).as_deref(),
            Some(&[1u8, 0, 2][..])
        );

        fake.vcs_client_config = None;
        assert_eq!(renderer.restore_client_config(&mut fake, device), Ok(true));
        assert_eq!(fake.vcs_client_config.as_deref(), Some(&[1u8, 0, 2][..]));
        assert_eq!(renderer.restore_client_config(&mut fake, DeviceHandle(8)), Ok(false));
    }
}
