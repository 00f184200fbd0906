//! Audio and transport modes of the dongle.

use crate::DongleError;

use super::platform::{ConfigKey, ConfigStore, SinkServiceMode};

/// What the dongle optimises for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AudioMode {
    /// Music quality
    HighQuality = 0,
    /// Low latency
    Gaming = 1,
    /// LE broadcast source
    Broadcast = 2,
}

impl AudioMode {
    /// Number of audio modes
    pub const COUNT: u8 = 3;

    /// Mode with raw value `value`
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::HighQuality),
            1 => Some(Self::Gaming),
            2 => Some(Self::Broadcast),
            _ => None,
        }
    }

    /// Next mode in cycling order
    #[must_use]
    pub const fn next(self) -> Self {
        match Self::from_u8((self as u8 + 1) % Self::COUNT) {
            Some(mode) => mode,
            None => Self::HighQuality,
        }
    }

    /// Transport preferred for this mode when both are allowed
    #[must_use]
    pub const fn preferred_transport(self) -> SinkTransport {
        match self {
            Self::HighQuality => SinkTransport::Bredr,
            Self::Gaming | Self::Broadcast => SinkTransport::Le,
        }
    }
}

/// Which radio transport sinks may use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TransportMode {
    /// BR/EDR only
    Bredr = 0,
    /// LE Audio only
    LeAudio = 1,
    /// Either
    Dual = 2,
}

impl TransportMode {
    /// Mode with raw value `value`
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Bredr),
            1 => Some(Self::LeAudio),
            2 => Some(Self::Dual),
            _ => None,
        }
    }
}

/// Transport of the connected sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SinkTransport {
    /// No sink connected
    #[default]
    Unknown,
    /// BR/EDR
    Bredr,
    /// LE Audio
    Le,
}

/// Options for a [`UsbDongle`](super::UsbDongle)
///
/// # Examples
///
/// ```rust
/// use wrenlink::{AudioMode, DongleOptions, TransportMode};
///
/// let options = DongleOptions {
///     audio_mode: AudioMode::Gaming,
///     transport_mode: TransportMode::LeAudio,
///     ..DongleOptions::default()
/// };
/// assert!(options.le_voice_in_high_quality);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct DongleOptions {
    /// Audio mode used until a stored one is loaded
    pub audio_mode: AudioMode,
    /// Transport mode used until a stored one is loaded
    pub transport_mode: TransportMode,
    /// Broadcasting while acting as a broadcast assistant.
    ///
    /// Without an assistant the dongle neither pairs nor connects in
    /// broadcast mode.
    pub broadcast_assistant: bool,
    /// Disable the sink service while the USB bus is suspended
    pub disconnect_on_suspend: bool,
    /// Use the LE voice context for USB voice in high quality mode instead of
    /// a back channel on the media stream
    pub le_voice_in_high_quality: bool,
}

impl Default for DongleOptions {
    fn default() -> Self {
        Self {
            audio_mode: AudioMode::HighQuality,
            transport_mode: TransportMode::Dual,
            broadcast_assistant: false,
            disconnect_on_suspend: false,
            le_voice_in_high_quality: true,
        }
    }
}

/// Live mode configuration
#[derive(Debug, Clone)]
pub struct DongleConfig {
    audio_mode: AudioMode,
    transport_mode: TransportMode,
    pending_transport: Option<TransportMode>,
    connected_transport: SinkTransport,
    broadcast_assistant: bool,
    le_voice_in_high_quality: bool,
}

impl DongleConfig {
    /// Configuration from `options`, nothing connected
    #[must_use]
    pub const fn new(options: &DongleOptions) -> Self {
        Self {
            audio_mode: options.audio_mode,
            transport_mode: options.transport_mode,
            pending_transport: None,
            connected_transport: SinkTransport::Unknown,
            broadcast_assistant: options.broadcast_assistant,
            le_voice_in_high_quality: options.le_voice_in_high_quality,
        }
    }

    /// Whether `audio` can run over `transport`. Broadcast needs LE.
    #[must_use]
    pub const fn is_mode_combination_valid(audio: AudioMode, transport: TransportMode) -> bool {
        !matches!(
            (audio, transport),
            (AudioMode::Broadcast, TransportMode::Bredr)
        )
    }

    /// Current audio mode
    #[must_use]
    pub const fn audio_mode(&self) -> AudioMode {
        self.audio_mode
    }

    /// Current transport mode
    #[must_use]
    pub const fn transport_mode(&self) -> TransportMode {
        self.transport_mode
    }

    /// Set the audio mode
    pub fn set_audio_mode(&mut self, mode: AudioMode) {
        self.audio_mode = mode;
    }

    /// Set the transport mode
    pub fn set_transport_mode(&mut self, mode: TransportMode) {
        self.transport_mode = mode;
    }

    /// Transport mode waiting for the current sink to disconnect
    #[must_use]
    pub const fn pending_transport(&self) -> Option<TransportMode> {
        self.pending_transport
    }

    /// Defer `mode` until the current sink has disconnected
    pub fn set_pending_transport(&mut self, mode: TransportMode) {
        self.pending_transport = Some(mode);
    }

    /// Make the deferred transport mode current. Returns `true` if there was one.
    pub fn apply_pending_transport(&mut self) -> bool {
        match self.pending_transport.take() {
            Some(mode) => {
                self.transport_mode = mode;
                true
            }
            None => false,
        }
    }

    /// Transport of the connected sink
    #[must_use]
    pub const fn connected_transport(&self) -> SinkTransport {
        self.connected_transport
    }

    /// Record the transport of the connected sink
    pub fn set_connected_transport(&mut self, transport: SinkTransport) {
        self.connected_transport = transport;
    }

    /// Broadcast mode
    #[must_use]
    pub const fn is_broadcast(&self) -> bool {
        matches!(self.audio_mode, AudioMode::Broadcast)
    }

    /// Gaming mode
    #[must_use]
    pub const fn is_gaming(&self) -> bool {
        matches!(self.audio_mode, AudioMode::Gaming)
    }

    /// High quality mode
    #[must_use]
    pub const fn is_high_quality(&self) -> bool {
        matches!(self.audio_mode, AudioMode::HighQuality)
    }

    /// Whether USB voice uses the LE voice context in high quality mode
    #[must_use]
    pub const fn le_voice_in_high_quality(&self) -> bool {
        self.le_voice_in_high_quality
    }

    /// Broadcasting without an assistant, where sinks are neither paired nor connected
    #[must_use]
    pub const fn is_pairing_disallowed(&self) -> bool {
        self.is_broadcast() && !self.broadcast_assistant
    }

    /// Audio goes over LE
    #[must_use]
    pub const fn is_le_or_dual_with_le_connected(&self) -> bool {
        match self.transport_mode {
            TransportMode::LeAudio => true,
            TransportMode::Dual => matches!(self.connected_transport, SinkTransport::Le),
            TransportMode::Bredr => false,
        }
    }

    /// Audio goes over BR/EDR
    #[must_use]
    pub const fn is_bredr_or_dual_with_bredr_connected(&self) -> bool {
        match self.transport_mode {
            TransportMode::Bredr => true,
            TransportMode::Dual => matches!(self.connected_transport, SinkTransport::Bredr),
            TransportMode::LeAudio => false,
        }
    }

    /// The connected sink is an LE Audio sink
    #[must_use]
    pub const fn is_connected_to_le_sink(&self) -> bool {
        matches!(self.connected_transport, SinkTransport::Le)
    }

    /// Sink service policy for `transport` and `audio`
    #[must_use]
    pub const fn sink_service_mode_for(transport: TransportMode, audio: AudioMode) -> SinkServiceMode {
        match transport {
            TransportMode::Bredr => SinkServiceMode::Bredr,
            TransportMode::LeAudio => SinkServiceMode::Le,
            TransportMode::Dual => match (audio.preferred_transport(), audio) {
                (SinkTransport::Bredr, _) => SinkServiceMode::DualPrefBredr,
                (_, AudioMode::Broadcast) => SinkServiceMode::Le,
                _ => SinkServiceMode::DualPrefLe,
            },
        }
    }

    /// Sink service policy for the current modes
    #[must_use]
    pub const fn sink_service_mode(&self) -> SinkServiceMode {
        Self::sink_service_mode_for(self.transport_mode, self.audio_mode)
    }

    /// Load stored modes. Missing or invalid records leave the modes untouched.
    pub fn load<S: ConfigStore + ?Sized>(&mut self, store: &S) {
        let mut buf = [0u8; 2];
        if store.load_config(ConfigKey::Modes, &mut buf) != Some(buf.len()) {
            debug!("[DONGLE] no stored modes");
            return;
        }
        let (Some(audio), Some(transport)) = (AudioMode::from_u8(buf[0]), TransportMode::from_u8(buf[1]))
        else {
            warn!("[DONGLE] stored modes {} invalid", buf);
            return;
        };
        if !Self::is_mode_combination_valid(audio, transport) {
            warn!("[DONGLE] stored mode combination invalid");
            return;
        }
        self.audio_mode = audio;
        self.transport_mode = transport;
    }

    /// Store the current modes
    ///
    /// # Errors
    ///
    /// Propagates [`DongleError::StorageFailed`] from the store.
    pub fn save<S: ConfigStore + ?Sized>(&self, store: &mut S) -> Result<(), DongleError> {
        store.store_config(
            ConfigKey::Modes,
            &[self.audio_mode as u8, self.transport_mode as u8],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeDongle;

    #[test]
    fn test_broadcast_needs_le() {
        assert!(!DongleConfig::is_mode_combination_valid(
            AudioMode::Broadcast,
            TransportMode::Bredr
        ));
        assert!(DongleConfig::is_mode_combination_valid(
            AudioMode::Broadcast,
            TransportMode::Dual
        ));
        assert!(DongleConfig::is_mode_combination_valid(
            AudioMode::Gaming,
            TransportMode::Bredr
        ));
    }

    #[test]
    fn test_dual_mode_follows_connected_transport() {
        let mut config = DongleConfig::new(&DongleOptions::default());
        assert!(!config.is_le_or_dual_with_le_connected());
        assert!(!config.is_bredr_or_dual_with_bredr_connected());

        config.set_connected_transport(SinkTransport::Le);
        assert!(config.is_le_or_dual_with_le_connected());
        config.set_connected_transport(SinkTransport::Bredr);
        assert!(config.is_bredr_or_dual_with_bredr_connected());
    }

    #[test]
    fn test_sink_service_mode_selection() {
        use DongleConfig as C;
        assert_eq!(
            C::sink_service_mode_for(TransportMode::Dual, AudioMode::HighQuality),
            SinkServiceMode::DualPrefBredr
        );
        assert_eq!(
            C::sink_service_mode_for(TransportMode::Dual, AudioMode::Gaming),
            SinkServiceMode::DualPrefLe
        );
        assert_eq!(
            C::sink_service_mode_for(TransportMode::Dual, AudioMode::Broadcast),
            SinkServiceMode::Le
        );
        assert_eq!(
            C::sink_service_mode_for(TransportMode::Bredr, AudioMode::Gaming),
            SinkServiceMode::Bredr
        );
    }

    #[test]
    fn test_modes_persisted() {
        let mut store = FakeDongle::new();
        let mut config = DongleConfig::new(&DongleOptions::default());
        config.set_audio_mode(AudioMode::Broadcast);
        config.set_transport_mode(TransportMode::LeAudio);
        config.save(&mut store).unwrap();

        let mut loaded = DongleConfig::new(&DongleOptions::default());
        loaded.load(&store);
        assert_eq!(loaded.audio_mode(), AudioMode::Broadcast);
        assert_eq!(loaded.transport_mode(), TransportMode::LeAudio);

        store.store_config(ConfigKey::Modes, &[2, 0]).unwrap();
        let mut rejected = DongleConfig::new(&DongleOptions::default());
        rejected.load(&store);
        assert_eq!(rejected.audio_mode(), AudioMode::HighQuality);
    }

    #[test]
    fn test_mode_cycle_order() {
        assert_eq!(AudioMode::HighQuality.next(), AudioMode::Gaming);
        assert_eq!(AudioMode::Broadcast.next(), AudioMode::HighQuality);
        assert_eq!(AudioMode::from_u8(3), None);
    }
}
