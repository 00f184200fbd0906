//! LE broadcast source configuration.
//!
//! Name, code, identifier and the audio configuration the LE Audio Client
//! uses when the dongle broadcasts. Two audio configurations are kept, one
//! for public (PBP) broadcasts and one for TMAP broadcasts, and the public
//! broadcast flag selects between them. Everything is persisted through
//! [`ConfigStore`].

use core::fmt::Write;

use heapless::{String, Vec};

use crate::constants::{
    BROADCAST_AUDIO_CONFIG_LENGTH, BROADCAST_DEFAULT_MAX_LATENCY_MS,
    BROADCAST_DEFAULT_PRESENTATION_DELAY_US, BROADCAST_DEFAULT_RTN,
    BROADCAST_DEFAULT_SDU_INTERVAL_US, BROADCAST_DEFAULT_SDU_SIZE, BROADCAST_ID_DONT_CARE,
    BROADCAST_ID_LENGTH, MAX_BROADCAST_CODE_LENGTH, MAX_BROADCAST_NAME_LENGTH,
    MIN_BROADCAST_CODE_LENGTH,
};
use crate::{BluetoothAddress, DongleError};

use super::platform::{ConfigKey, ConfigStore};

/// 16 kHz, 7.5 ms frames
pub const STREAM_CAPABILITY_16_1: u32 = 0x0001;
/// 16 kHz, 10 ms frames
pub const STREAM_CAPABILITY_16_2: u32 = 0x0002;
/// 24 kHz, 10 ms frames
pub const STREAM_CAPABILITY_24_2: u32 = 0x0004;
/// 32 kHz, 10 ms frames
pub const STREAM_CAPABILITY_32_2: u32 = 0x0008;
/// 48 kHz, 7.5 ms frames, 75 octets
pub const STREAM_CAPABILITY_48_1: u32 = 0x0010;
/// 48 kHz, 10 ms frames, 100 octets
pub const STREAM_CAPABILITY_48_2: u32 = 0x0020;
/// 48 kHz, 7.5 ms frames, 90 octets
pub const STREAM_CAPABILITY_48_3: u32 = 0x0040;
/// 48 kHz, 10 ms frames, 120 octets
pub const STREAM_CAPABILITY_48_4: u32 = 0x0080;
/// 48 kHz, 7.5 ms frames, 117 octets
pub const STREAM_CAPABILITY_48_5: u32 = 0x0100;
/// 48 kHz, 10 ms frames, 155 octets
pub const STREAM_CAPABILITY_48_6: u32 = 0x0200;
/// Vendor codec identifier bits of a stream capability
pub const STREAM_CAPABILITY_CODEC_ID_MASK: u32 = 0xFF00_0000;

/// Media audio context
pub const AUDIO_CONTEXT_MEDIA: u32 = 0x0004;

const PHY_LE_2M: u16 = 0x0002;
const DEFAULT_CODE_PREFIX_LENGTH: usize = 4;

const HIGH_QUALITY_CAPABILITIES: [u32; 6] = [
    STREAM_CAPABILITY_48_1,
    STREAM_CAPABILITY_48_2,
    STREAM_CAPABILITY_48_3,
    STREAM_CAPABILITY_48_4,
    STREAM_CAPABILITY_48_5,
    STREAM_CAPABILITY_48_6,
];

/// Flavour of broadcast announced to receivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum BroadcastType {
    /// Public broadcast, standard quality
    StandardQualityPublic = 1,
    /// Public broadcast, high quality
    HighQualityPublic = 2,
    /// TMAP broadcast
    Tmap = 4,
}

impl BroadcastType {
    /// Decode a stored type. Unknown values are high quality public.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::StandardQualityPublic,
            4 => Self::Tmap,
            _ => Self::HighQualityPublic,
        }
    }
}

/// Broadcast audio configuration handed to the LE Audio Client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BroadcastAudioConfig {
    /// Retransmissions
    pub rtn: u8,
    /// Codec frames per SDU
    pub max_codec_frames_per_sdu: u8,
    /// SDU size in octets
    pub sdu_size: u16,
    /// Maximum transport latency in milliseconds
    pub max_latency_ms: u16,
    /// PHY
    pub phy: u16,
    /// Number of BISes
    pub number_of_bis: u16,
    /// Audio channels carried by each BIS
    pub channels_per_bis: u16,
    /// Announced audio context
    pub audio_context: u32,
    /// Broadcast flavour
    pub broadcast_type: BroadcastType,
    /// Stream capability bits
    pub stream_capability: u32,
    /// SDU interval in microseconds
    pub sdu_interval_us: u32,
    /// Presentation delay in microseconds
    pub presentation_delay_us: u32,
}

impl BroadcastAudioConfig {
    /// Defaults for `broadcast_type`, 48 kHz 10 ms on one mono BIS
    #[must_use]
    pub const fn default_for(broadcast_type: BroadcastType) -> Self {
        Self {
            rtn: BROADCAST_DEFAULT_RTN,
            max_codec_frames_per_sdu: 1,
            sdu_size: BROADCAST_DEFAULT_SDU_SIZE,
            max_latency_ms: BROADCAST_DEFAULT_MAX_LATENCY_MS,
            phy: PHY_LE_2M,
            number_of_bis: 1,
            channels_per_bis: 1,
            audio_context: AUDIO_CONTEXT_MEDIA,
            broadcast_type,
            stream_capability: STREAM_CAPABILITY_48_2,
            sdu_interval_us: BROADCAST_DEFAULT_SDU_INTERVAL_US,
            presentation_delay_us: BROADCAST_DEFAULT_PRESENTATION_DELAY_US,
        }
    }

    /// Parse the little-endian record layout
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::Malformed`] unless `bytes` is exactly
    /// [`BROADCAST_AUDIO_CONFIG_LENGTH`] long.
    pub fn parse(bytes: &[u8]) -> Result<Self, DongleError> {
        let bytes: &[u8; BROADCAST_AUDIO_CONFIG_LENGTH] =
            bytes.try_into().map_err(|_| DongleError::Malformed)?;
        let u16_at = |offset: usize| u16::from_le_bytes([bytes[offset], bytes[offset + 1]]);
        let u32_at = |offset: usize| {
            u32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ])
        };
        Ok(Self {
            rtn: bytes[0],
            max_codec_frames_per_sdu: bytes[1],
            sdu_size: u16_at(2),
            max_latency_ms: u16_at(4),
            phy: u16_at(6),
            number_of_bis: u16_at(8),
            channels_per_bis: u16_at(10),
            audio_context: u32_at(12),
            broadcast_type: BroadcastType::from_raw(u32_at(16)),
            stream_capability: u32_at(20),
            sdu_interval_us: u32_at(24),
            presentation_delay_us: u32_at(28),
        })
    }

    /// Serialise into the record layout read by [`BroadcastAudioConfig::parse`]
    #[must_use]
    pub fn to_bytes(&self) -> [u8; BROADCAST_AUDIO_CONFIG_LENGTH] {
        let mut out = [0u8; BROADCAST_AUDIO_CONFIG_LENGTH];
        out[0] = self.rtn;
        out[1] = self.max_codec_frames_per_sdu;
        out[2..4].copy_from_slice(&self.sdu_size.to_le_bytes());
        out[4..6].copy_from_slice(&self.max_latency_ms.to_le_bytes());
        out[6..8].copy_from_slice(&self.phy.to_le_bytes());
        out[8..10].copy_from_slice(&self.number_of_bis.to_le_bytes());
        out[10..12].copy_from_slice(&self.channels_per_bis.to_le_bytes());
        out[12..16].copy_from_slice(&self.audio_context.to_le_bytes());
        out[16..20].copy_from_slice(&(self.broadcast_type as u32).to_le_bytes());
        out[20..24].copy_from_slice(&self.stream_capability.to_le_bytes());
        out[24..28].copy_from_slice(&self.sdu_interval_us.to_le_bytes());
        out[28..32].copy_from_slice(&self.presentation_delay_us.to_le_bytes());
        out
    }
}

/// Everything the LE Audio Client asks for when it sets up a broadcast
#[derive(Debug, Clone)]
pub struct BroadcastSourceConfig {
    name: String<MAX_BROADCAST_NAME_LENGTH>,
    code: Vec<u8, MAX_BROADCAST_CODE_LENGTH>,
    encrypted: bool,
    broadcast_id: u32,
    public_broadcast: bool,
    pbp: BroadcastAudioConfig,
    tmap: BroadcastAudioConfig,
}

impl Default for BroadcastSourceConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastSourceConfig {
    /// Unnamed, unencrypted public broadcast with default audio settings
    #[must_use]
    pub const fn new() -> Self {
        Self {
            name: String::new(),
            code: Vec::new(),
            encrypted: false,
            broadcast_id: BROADCAST_ID_DONT_CARE,
            public_broadcast: true,
            pbp: BroadcastAudioConfig::default_for(BroadcastType::HighQualityPublic),
            tmap: BroadcastAudioConfig::default_for(BroadcastType::Tmap),
        }
    }

    /// Load every record, falling back to defaults derived from `local`
    pub fn load<S: ConfigStore + ?Sized>(&mut self, store: &S, local: BluetoothAddress) {
        let lap = local.lap() & 0xFFFF;

        let mut buf = [0u8; MAX_BROADCAST_NAME_LENGTH];
        let stored_name = store
            .load_config(ConfigKey::BroadcastName, &mut buf)
            .filter(|len| (1..=MAX_BROADCAST_NAME_LENGTH).contains(len))
            .and_then(|len| core::str::from_utf8(&buf[..len]).ok())
            .and_then(|name| String::try_from(name).ok());
        self.name = stored_name.unwrap_or_else(|| {
            let mut name = String::new();
            // "Broadcast" and four hex digits fit
            let _ = write!(name, "Broadcast{lap:04x}");
            name
        });

        let mut buf = [0u8; MAX_BROADCAST_CODE_LENGTH];
        match store.load_config(ConfigKey::BroadcastCode, &mut buf) {
            Some(len) if (MIN_BROADCAST_CODE_LENGTH..=MAX_BROADCAST_CODE_LENGTH).contains(&len) => {
                self.code = Vec::from_slice(&buf[..len]).unwrap_or_default();
                self.encrypted = true;
            }
            _ => {
                self.code = Self::default_code(lap);
                self.encrypted = false;
            }
        }

        let mut buf = [0u8; BROADCAST_AUDIO_CONFIG_LENGTH];
        self.pbp = BroadcastAudioConfig::default_for(BroadcastType::HighQualityPublic);
        self.tmap = BroadcastAudioConfig::default_for(BroadcastType::Tmap);
        self.public_broadcast = true;
        if store.load_config(ConfigKey::BroadcastAudioConfig, &mut buf) == Some(buf.len()) {
            if let Ok(config) = BroadcastAudioConfig::parse(&buf) {
                self.apply_audio_config(config);
            }
        }

        let mut buf = [0u8; BROADCAST_ID_LENGTH];
        self.broadcast_id = if store.load_config(ConfigKey::BroadcastId, &mut buf) == Some(buf.len()) {
            u32::from_le_bytes(buf)
        } else {
            BROADCAST_ID_DONT_CARE
        };

        info!(
            "[LEA] broadcast '{}' encrypted {} public {}",
            self.name.as_str(),
            self.encrypted,
            self.public_broadcast
        );
    }

    fn default_code(lap: u32) -> Vec<u8, MAX_BROADCAST_CODE_LENGTH> {
        let mut prefix: String<DEFAULT_CODE_PREFIX_LENGTH> = String::new();
        let _ = write!(prefix, "{lap:04x}");
        let mut code = Vec::new();
        let _ = code.extend_from_slice(prefix.as_bytes());
        let _ = code.resize(MAX_BROADCAST_CODE_LENGTH, 0);
        code
    }

    /// Broadcast source name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Broadcast code, `None` for an unencrypted broadcast
    #[must_use]
    pub fn code(&self) -> Option<&[u8]> {
        self.encrypted.then_some(self.code.as_slice())
    }

    /// Broadcast identifier, [`BROADCAST_ID_DONT_CARE`] to let the stack choose
    #[must_use]
    pub const fn broadcast_id(&self) -> u32 {
        self.broadcast_id
    }

    /// Public (PBP) rather than TMAP broadcast
    #[must_use]
    pub const fn is_public_broadcast(&self) -> bool {
        self.public_broadcast
    }

    /// Audio configuration of the selected broadcast flavour
    #[must_use]
    pub const fn audio_config(&self) -> &BroadcastAudioConfig {
        if self.public_broadcast {
            &self.pbp
        } else {
            &self.tmap
        }
    }

    /// Choose between public and TMAP broadcast
    pub fn set_public_broadcast(&mut self, enable: bool) {
        debug!("[LEA] public broadcast {} -> {}", self.public_broadcast, enable);
        self.public_broadcast = enable;
    }

    /// Rename the broadcast. Returns `true` if the name changed.
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::InvalidParameter`] for an empty name or one
    /// longer than [`MAX_BROADCAST_NAME_LENGTH`] bytes, or the store's error.
    pub fn set_name<S: ConfigStore + ?Sized>(
        &mut self,
        store: &mut S,
        name: &str,
    ) -> Result<bool, DongleError> {
        if name.is_empty() {
            error!("[LEA] empty broadcast name");
            return Err(DongleError::InvalidParameter);
        }
        let name = String::try_from(name).map_err(|()| DongleError::InvalidParameter)?;
        let changed = self.name != name;
        self.name = name;
        store.store_config(ConfigKey::BroadcastName, self.name.as_bytes())?;
        Ok(changed)
    }

    /// Set the broadcast code, an empty code disables encryption. Returns
    /// `true` if encryption was switched on or off.
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::InvalidParameter`] for codes longer than
    /// [`MAX_BROADCAST_CODE_LENGTH`], or the store's error.
    pub fn set_code<S: ConfigStore + ?Sized>(
        &mut self,
        store: &mut S,
        code: &[u8],
    ) -> Result<bool, DongleError> {
        let mut padded: Vec<u8, MAX_BROADCAST_CODE_LENGTH> =
            Vec::from_slice(code).map_err(|()| DongleError::InvalidParameter)?;
        let _ = padded.resize(MAX_BROADCAST_CODE_LENGTH, 0);
        let encrypted = !code.is_empty();
        self.code = padded;
        store.store_config(ConfigKey::BroadcastCode, code)?;
        let changed = self.encrypted != encrypted;
        self.encrypted = encrypted;
        Ok(changed)
    }

    /// Set the broadcast identifier from its 4 little-endian bytes
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::InvalidParameter`] unless `id` is 4 bytes, or the store's error.
    pub fn set_broadcast_id<S: ConfigStore + ?Sized>(
        &mut self,
        store: &mut S,
        id: &[u8],
    ) -> Result<(), DongleError> {
        let bytes: [u8; BROADCAST_ID_LENGTH] =
            id.try_into().map_err(|_| DongleError::InvalidParameter)?;
        self.broadcast_id = u32::from_le_bytes(bytes);
        store.store_config(ConfigKey::BroadcastId, id)
    }

    /// Replace the audio configuration of the flavour the record names and
    /// select that flavour
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::Malformed`] for a record of the wrong length, or
    /// the store's error.
    pub fn set_audio_config<S: ConfigStore + ?Sized>(
        &mut self,
        store: &mut S,
        record: &[u8],
    ) -> Result<(), DongleError> {
        let config = BroadcastAudioConfig::parse(record)?;
        self.apply_audio_config(config);
        store.store_config(ConfigKey::BroadcastAudioConfig, record)
    }

    fn apply_audio_config(&mut self, config: BroadcastAudioConfig) {
        if config.broadcast_type == BroadcastType::Tmap {
            self.set_public_broadcast(false);
            self.tmap = config;
        } else {
            self.set_public_broadcast(true);
            self.pbp = config;
        }
    }

    /// Stream capability of the public or TMAP configuration. A public
    /// broadcast not using one 48 kHz configuration is standard quality.
    pub fn set_stream_capability(&mut self, capability: u32, public: bool) {
        debug!("[LEA] stream capability {=u32:x} public {}", capability, public);
        if public {
            let without_codec = capability & !STREAM_CAPABILITY_CODEC_ID_MASK;
            if !HIGH_QUALITY_CAPABILITIES.contains(&without_codec) {
                self.pbp.broadcast_type = BroadcastType::StandardQualityPublic;
            }
            self.pbp.stream_capability = capability;
        } else {
            self.tmap.stream_capability = capability;
        }
    }

    /// BIS layout of both configurations, SDU size following the channel count
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::InvalidParameter`] for more than two BISes or
    /// more than two channels per BIS.
    pub fn set_bis_config(&mut self, number_of_bis: u16, channels_per_bis: u16) -> Result<(), DongleError> {
        if number_of_bis > 2 || channels_per_bis > 2 {
            error!(
                "[LEA] invalid BIS layout {} x {}",
                number_of_bis,
                channels_per_bis
            );
            return Err(DongleError::InvalidParameter);
        }
        for config in [&mut self.pbp, &mut self.tmap] {
            config.sdu_size = BROADCAST_DEFAULT_SDU_SIZE * channels_per_bis;
            config.number_of_bis = number_of_bis;
            config.channels_per_bis = channels_per_bis;
        }
        Ok(())
    }
}
