//! Fake collaborators shared by the unit tests.

use heapless::Vec;

use crate::device::{DeviceHandle, DeviceProperties, DeviceStore, PropertyBlob};
use crate::dongle::config::AudioMode;
use crate::dongle::platform::{
    AclControl, AnalogLeGraphParams, AppUiContext, AptxQuality, AudioGraph, BredrAudio, CapContext,
    ConfigKey, ConfigStore, GroupHandle, HidCommand, LeAudioClient, LeaClientMode, Led,
    RequestToken, SinkService, SinkServiceMode, StopNotify, System, Ui, UsbHost, UsbLeGraphParams,
};
use crate::le_audio_volume::{PeerSigChannel, PeerSignalling, ServiceHandle, VcsServer};
use crate::sources::{
    AudioSource, EventOrigin, GenericSource, RoutingInfo, SourceRegistry, VoiceSource,
};
use crate::volume::{
    AVRCP_VOLUME_CONFIG, HFP_VOLUME_CONFIG, LE_AUDIO_VOLUME_CONFIG, USB_VOLUME_CONFIG, Volume,
    VolumeConfig,
};
use crate::{BluetoothAddress, DongleError};

#[derive(Debug, Clone, Copy)]
struct SourceState {
    source: GenericSource,
    volume: Volume,
    mute: bool,
    origin: Option<EventOrigin>,
}

/// Volume registry keeping every source in its native config
#[derive(Debug, Default)]
pub struct VolumeStore {
    sources: Vec<SourceState, 16>,
}

impl VolumeStore {
    fn native_config(source: GenericSource) -> VolumeConfig {
        match source {
            GenericSource::Audio(AudioSource::A2dp1 | AudioSource::A2dp2) => AVRCP_VOLUME_CONFIG,
            GenericSource::Audio(AudioSource::Usb | AudioSource::LineIn)
            | GenericSource::Voice(VoiceSource::Usb) => USB_VOLUME_CONFIG,
            GenericSource::Voice(VoiceSource::Hfp1 | VoiceSource::Hfp2) => HFP_VOLUME_CONFIG,
            _ => LE_AUDIO_VOLUME_CONFIG,
        }
    }

    fn entry(&mut self, source: GenericSource) -> &mut SourceState {
        let index = match self.sources.iter().position(|s| s.source == source) {
            Some(index) => index,
            None => {
                let state = SourceState {
                    source,
                    volume: Volume::midpoint(Self::native_config(source)),
                    mute: false,
                    origin: None,
                };
                self.sources.push(state).unwrap();
                self.sources.len() - 1
            }
        };
        &mut self.sources[index]
    }

    fn get(&self, source: GenericSource) -> Option<&SourceState> {
        self.sources.iter().find(|s| s.source == source)
    }

    fn volume(&self, source: GenericSource) -> Volume {
        self.get(source)
            .map_or_else(|| Volume::midpoint(Self::native_config(source)), |s| s.volume)
    }

    fn mute(&self, source: GenericSource) -> bool {
        self.get(source).is_some_and(|s| s.mute)
    }

    fn last_origin(&self, source: GenericSource) -> Option<EventOrigin> {
        self.get(source).and_then(|s| s.origin)
    }

    fn set_volume(&mut self, source: GenericSource, origin: EventOrigin, volume: Volume) {
        let entry = self.entry(source);
        entry.volume = volume;
        entry.origin = Some(origin);
    }

    fn set_mute(&mut self, source: GenericSource, origin: EventOrigin, mute: bool) {
        let entry = self.entry(source);
        entry.mute = mute;
        entry.origin = Some(origin);
    }
}

/// Earbud collaborators: registry, routing, VCS server, peer link and device properties
#[derive(Debug, Default)]
pub struct FakeEarbud {
    volumes: VolumeStore,
    pending: Vec<[u8; 4], 16>,
    properties: Vec<(DeviceHandle, u8, PropertyBlob), 8>,
    /// Messages that left the peer link
    pub transmitted: Vec<[u8; 4], 16>,
    /// Calls to [`PeerSignalling::cancel_pending`]
    pub cancel_calls: usize,
    /// Routed source
    pub routed: GenericSource,
    /// Most recently used handset
    pub mru_handset: Option<AudioSource>,
    /// Calls to [`VcsServer::register`]
    pub vcs_registrations: usize,
    /// Last published VCS volume state
    pub vcs_state: Option<(u8, bool)>,
    /// Client configuration held by the VCS server
    pub vcs_client_config: Option<PropertyBlob>,
}

impl FakeEarbud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transmit everything queued on the peer link
    pub fn flush_peer_link(&mut self) {
        for message in self.pending.iter() {
            self.transmitted.push(*message).unwrap();
        }
        self.pending.clear();
    }

    pub fn last_origin(&self, source: GenericSource) -> Option<EventOrigin> {
        self.volumes.last_origin(source)
    }
}

impl SourceRegistry for FakeEarbud {
    fn volume(&self, source: GenericSource) -> Volume {
        self.volumes.volume(source)
    }

    fn set_volume(&mut self, source: GenericSource, origin: EventOrigin, volume: Volume) {
        self.volumes.set_volume(source, origin, volume);
    }

    fn mute(&self, source: GenericSource) -> bool {
        self.volumes.mute(source)
    }

    fn set_mute(&mut self, source: GenericSource, origin: EventOrigin, mute: bool) {
        self.volumes.set_mute(source, origin, mute);
    }
}

impl RoutingInfo for FakeEarbud {
    fn routed_generic_source(&self) -> GenericSource {
        self.routed
    }

    fn mru_handset_audio_source(&self) -> Option<AudioSource> {
        self.mru_handset
    }
}

impl VcsServer for FakeEarbud {
    fn register(&mut self) -> Option<ServiceHandle> {
        self.vcs_registrations += 1;
        Some(ServiceHandle(1))
    }

    fn set_volume_state(&mut self, _handle: ServiceHandle, volume: u8, mute: bool) {
        self.vcs_state = Some((volume, mute));
    }

    fn client_config(&self, _handle: ServiceHandle, _device: DeviceHandle) -> Option<PropertyBlob> {
        self.vcs_client_config.clone()
    }

    fn set_client_config(
        &mut self,
        _handle: ServiceHandle,
        _device: DeviceHandle,
        config: &[u8],
    ) -> Result<(), DongleError> {
        let blob = PropertyBlob::from_slice(config).map_err(|()| DongleError::InvalidParameter)?;
        self.vcs_client_config = Some(blob);
        Ok(())
    }
}

impl PeerSignalling for FakeEarbud {
    fn cancel_pending(&mut self, _channel: PeerSigChannel) -> usize {
        self.cancel_calls += 1;
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    fn send(&mut self, _channel: PeerSigChannel, payload: &[u8]) -> Result<(), DongleError> {
        let message: [u8; 4] = payload.try_into().map_err(|_| DongleError::ChannelError)?;
        self.pending
            .push(message)
            .map_err(|_| DongleError::ChannelError)
    }
}

impl DeviceProperties for FakeEarbud {
    fn property(&self, device: DeviceHandle, tag: u8) -> Option<PropertyBlob> {
        self.properties
            .iter()
            .find(|(d, t, _)| *d == device && *t == tag)
            .map(|(_, _, blob)| blob.clone())
    }

    fn set_property(&mut self, device: DeviceHandle, tag: u8, data: &[u8]) -> Result<(), DongleError> {
        let blob = PropertyBlob::from_slice(data).map_err(|()| DongleError::StorageFailed)?;
        self.properties.retain(|(d, t, _)| !(*d == device && *t == tag));
        self.properties
            .push((device, tag, blob))
            .map_err(|_| DongleError::StorageFailed)
    }
}

/// One collaborator call made by the dongle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    SetClientMode(LeaClientMode),
    StartStreaming(CapContext, RequestToken),
    StopStreaming { force: bool, token: RequestToken },
    CancelStart(RequestToken),
    SetGroupVolume(u8),
    BroadcastConfigChanged,
    StartUsbLe { voice: bool, microphone: bool },
    StopUsbLe { voice: bool, notify: StopNotify },
    StartAnalogLe,
    StopAnalogLe,
    StartA2dp(AudioSource),
    StopA2dp,
    StartSco,
    StopSco,
    ConnectSink,
    DisconnectAll,
    SetServiceMode(SinkServiceMode),
    EnableSinkService,
    DisableSinkService,
    MediaConnect,
    MediaSuspend,
    ConnectAudioProfiles,
    ConnectVoiceProfile,
    VoiceAudioConnect,
    VoiceAudioDisconnect,
    IncomingCall,
    AcceptCall,
    RejectCall,
    SetAvrcpVolume(u8),
    ToggleMicrophoneMute,
    SetAptxQuality(AptxQuality),
    AppContext(AppUiContext),
    RescanStalled,
    ShowAudioMode(AudioMode),
    SendHid(HidCommand),
    UsbChainStopped(bool),
    ClearConfig,
    CreateAcl,
    ReleaseAcl,
    PairDevice,
    DeleteAllPaired,
    Reboot,
}

/// Dongle collaborators. Graph and stream state follow the calls made, link
/// state is driven by the test.
#[derive(Debug)]
pub struct FakeDongle {
    volumes: VolumeStore,
    config: Vec<(ConfigKey, Vec<u8, 32>), 8>,
    devices: Vec<BluetoothAddress, 4>,
    /// Every collaborator call, in order
    pub calls: Vec<Call, 256>,
    /// Most recently used sink
    pub mru: Option<DeviceHandle>,
    /// Result of [`SinkService::connect_sink`]
    pub connect_accepts: bool,
    /// Result of [`SinkService::set_service_mode`]
    pub service_mode_accepts: bool,
    /// Result of the stream start, stop and cancel requests
    pub lea_accepts: bool,
    /// LE unicast sink connected
    pub unicast_connected: bool,
    /// LE unicast streams running
    pub unicast_streaming: bool,
    /// LE broadcast running
    pub broadcast_streaming: bool,
    /// Context of the running unicast session
    pub session_context: CapContext,
    /// A2DP media channel up
    pub media_available: bool,
    /// HFP connected
    pub voice_available: bool,
    /// SCO opens and closes synchronously
    pub sco_sync: bool,
    /// A2DP stream uses aptX adaptive
    pub aptx_adaptive: bool,
    /// USB host attached
    pub usb_attached: bool,
    /// ACL to the pairing target
    pub acl_up: bool,
    /// Stores fail
    pub store_fails: bool,
    /// Graphs currently running
    pub graphs_running: u8,
    /// Most graphs ever running at once
    pub peak_graphs: u8,
    /// Programmed address
    pub local_address: BluetoothAddress,
}

impl Default for FakeDongle {
    fn default() -> Self {
        Self {
            volumes: VolumeStore::default(),
            config: Vec::new(),
            devices: Vec::new(),
            calls: Vec::new(),
            mru: None,
            connect_accepts: true,
            service_mode_accepts: true,
            lea_accepts: true,
            unicast_connected: false,
            unicast_streaming: false,
            broadcast_streaming: false,
            session_context: CapContext::Prohibited,
            media_available: false,
            voice_available: false,
            sco_sync: false,
            aptx_adaptive: false,
            usb_attached: true,
            acl_up: false,
            store_fails: false,
            graphs_running: 0,
            peak_graphs: 0,
            local_address: BluetoothAddress::from_parts(0x0002, 0x5B, 0x00_EB_12),
        }
    }
}

impl FakeDongle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn called(&self, call: Call) -> bool {
        self.calls.contains(&call)
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| matches(c)).count()
    }

    /// Graph start and stop calls, in order
    pub fn graph_calls(&self) -> Vec<Call, 32> {
        self.calls
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    Call::StartUsbLe { .. }
                        | Call::StopUsbLe { .. }
                        | Call::StartAnalogLe
                        | Call::StopAnalogLe
                        | Call::StartA2dp(_)
                        | Call::StopA2dp
                        | Call::StartSco
                        | Call::StopSco
                )
            })
            .copied()
            .collect()
    }

    /// Last token handed to the LE Audio Client
    pub fn last_token(&self) -> Option<RequestToken> {
        self.calls.iter().rev().find_map(|c| match c {
            Call::StartStreaming(_, token)
            | Call::StopStreaming { token, .. }
            | Call::CancelStart(token) => Some(*token),
            _ => None,
        })
    }

    pub fn last_app_context(&self) -> Option<AppUiContext> {
        self.calls.iter().rev().find_map(|c| match c {
            Call::AppContext(context) => Some(*context),
            _ => None,
        })
    }

    pub fn stored(&self, key: ConfigKey) -> Option<&[u8]> {
        self.config
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_slice())
    }

    pub fn last_origin(&self, source: GenericSource) -> Option<EventOrigin> {
        self.volumes.last_origin(source)
    }

    fn log(&mut self, call: Call) {
        self.calls.push(call).unwrap();
    }

    fn graph_started(&mut self) {
        self.graphs_running += 1;
        self.peak_graphs = self.peak_graphs.max(self.graphs_running);
    }

    fn graph_stopped(&mut self) {
        self.graphs_running = self.graphs_running.saturating_sub(1);
    }
}

impl SourceRegistry for FakeDongle {
    fn volume(&self, source: GenericSource) -> Volume {
        self.volumes.volume(source)
    }

    fn set_volume(&mut self, source: GenericSource, origin: EventOrigin, volume: Volume) {
        self.volumes.set_volume(source, origin, volume);
    }

    fn mute(&self, source: GenericSource) -> bool {
        self.volumes.mute(source)
    }

    fn set_mute(&mut self, source: GenericSource, origin: EventOrigin, mute: bool) {
        self.volumes.set_mute(source, origin, mute);
    }
}

impl DeviceStore for FakeDongle {
    fn create_sink(&mut self, addr: BluetoothAddress) -> Result<DeviceHandle, DongleError> {
        let index = match self.devices.iter().position(|a| *a == addr) {
            Some(index) => index,
            None => {
                self.devices
                    .push(addr)
                    .map_err(|_| DongleError::StorageFailed)?;
                self.devices.len() - 1
            }
        };
        let handle = DeviceHandle(u16::try_from(index).unwrap() + 1);
        self.mru = Some(handle);
        Ok(handle)
    }

    fn address(&self, device: DeviceHandle) -> Option<BluetoothAddress> {
        let index = usize::from(device.0.checked_sub(1)?);
        self.devices.get(index).copied()
    }

    fn mru_sink(&self) -> Option<DeviceHandle> {
        self.mru
    }

    fn delete_all_paired(&mut self) {
        self.log(Call::DeleteAllPaired);
        self.devices.clear();
        self.mru = None;
    }
}

impl LeAudioClient for FakeDongle {
    fn set_client_mode(&mut self, mode: LeaClientMode) {
        self.log(Call::SetClientMode(mode));
    }

    fn start_streaming(
        &mut self,
        _group: Option<GroupHandle>,
        context: CapContext,
        token: RequestToken,
    ) -> bool {
        self.log(Call::StartStreaming(context, token));
        self.lea_accepts
    }

    fn stop_streaming(&mut self, _group: Option<GroupHandle>, force: bool, token: RequestToken) -> bool {
        self.log(Call::StopStreaming { force, token });
        self.lea_accepts
    }

    fn start_streaming_cancel_request(
        &mut self,
        _group: Option<GroupHandle>,
        token: RequestToken,
    ) -> bool {
        self.log(Call::CancelStart(token));
        self.lea_accepts
    }

    fn is_unicast_connected(&self, _group: Option<GroupHandle>) -> bool {
        self.unicast_connected
    }

    fn is_unicast_streaming_active(&self, _group: Option<GroupHandle>) -> bool {
        self.unicast_streaming
    }

    fn is_broadcast_streaming_active(&self) -> bool {
        self.broadcast_streaming
    }

    fn unicast_session_context(&self, _group: Option<GroupHandle>) -> CapContext {
        self.session_context
    }

    fn set_group_volume(&mut self, _group: GroupHandle, volume: u8) {
        self.log(Call::SetGroupVolume(volume));
    }

    fn broadcast_config_changed(&mut self) {
        self.log(Call::BroadcastConfigChanged);
    }
}

impl AudioGraph for FakeDongle {
    fn start_usb_le(&mut self, params: &UsbLeGraphParams) -> bool {
        self.log(Call::StartUsbLe {
            voice: params.voice,
            microphone: params.microphone,
        });
        self.graph_started();
        true
    }

    fn stop_usb_le(&mut self, is_voice: bool, notify: StopNotify) {
        self.log(Call::StopUsbLe {
            voice: is_voice,
            notify,
        });
        self.graph_stopped();
    }

    fn start_analog_le(&mut self, _params: &AnalogLeGraphParams) -> bool {
        self.log(Call::StartAnalogLe);
        self.graph_started();
        true
    }

    fn stop_analog_le(&mut self) {
        self.log(Call::StopAnalogLe);
        self.graph_stopped();
    }

    fn start_a2dp(&mut self, input: AudioSource) {
        self.log(Call::StartA2dp(input));
        self.graph_started();
    }

    fn stop_a2dp(&mut self, _notify: StopNotify) {
        self.log(Call::StopA2dp);
        self.graph_stopped();
    }

    fn start_sco(&mut self) {
        self.log(Call::StartSco);
        self.graph_started();
    }

    fn stop_sco(&mut self) {
        self.log(Call::StopSco);
        self.graph_stopped();
    }

    fn is_graph_idle(&self) -> bool {
        self.graphs_running == 0
    }
}

impl SinkService for FakeDongle {
    fn connect_sink(&mut self) -> bool {
        self.log(Call::ConnectSink);
        self.connect_accepts
    }

    fn disconnect_all(&mut self) {
        self.log(Call::DisconnectAll);
    }

    fn set_service_mode(&mut self, mode: SinkServiceMode) -> bool {
        self.log(Call::SetServiceMode(mode));
        self.service_mode_accepts
    }

    fn enable_sink_service(&mut self) {
        self.log(Call::EnableSinkService);
    }

    fn disable_sink_service(&mut self) {
        self.log(Call::DisableSinkService);
    }
}

impl BredrAudio for FakeDongle {
    fn is_media_available(&self) -> bool {
        self.media_available
    }

    fn is_voice_available(&self) -> bool {
        self.voice_available
    }

    fn media_connect(&mut self) {
        self.log(Call::MediaConnect);
    }

    fn media_suspend(&mut self) {
        self.log(Call::MediaSuspend);
    }

    fn connect_audio_profiles(&mut self) {
        self.log(Call::ConnectAudioProfiles);
    }

    fn connect_voice_profile(&mut self, _addr: BluetoothAddress) {
        self.log(Call::ConnectVoiceProfile);
    }

    fn voice_audio_connect(&mut self) -> bool {
        self.log(Call::VoiceAudioConnect);
        self.sco_sync
    }

    fn voice_audio_disconnect(&mut self) -> bool {
        self.log(Call::VoiceAudioDisconnect);
        self.sco_sync
    }

    fn incoming_call(&mut self) {
        self.log(Call::IncomingCall);
    }

    fn accept_call(&mut self) {
        self.log(Call::AcceptCall);
    }

    fn reject_call(&mut self) {
        self.log(Call::RejectCall);
    }

    fn set_avrcp_volume(&mut self, volume: u8) {
        self.log(Call::SetAvrcpVolume(volume));
    }

    fn toggle_microphone_mute(&mut self) {
        self.log(Call::ToggleMicrophoneMute);
    }

    fn set_aptx_quality(&mut self, quality: AptxQuality) {
        self.log(Call::SetAptxQuality(quality));
    }

    fn is_aptx_adaptive_active(&self) -> bool {
        self.aptx_adaptive
    }
}

impl Ui for FakeDongle {
    fn app_context(&mut self, context: AppUiContext) {
        self.log(Call::AppContext(context));
    }

    fn rescan_stalled(&mut self) {
        self.log(Call::RescanStalled);
    }
}

impl Led for FakeDongle {
    fn show_audio_mode(&mut self, mode: AudioMode) {
        self.log(Call::ShowAudioMode(mode));
    }
}

impl UsbHost for FakeDongle {
    fn is_usb_attached(&self) -> bool {
        self.usb_attached
    }

    fn send_hid(&mut self, command: HidCommand) {
        self.log(Call::SendHid(command));
    }

    fn usb_chain_stopped(&mut self, is_voice: bool) {
        self.log(Call::UsbChainStopped(is_voice));
    }
}

impl ConfigStore for FakeDongle {
    fn load_config(&self, key: ConfigKey, buf: &mut [u8]) -> Option<usize> {
        let stored = self.stored(key)?;
        let copied = stored.len().min(buf.len());
        buf[..copied].copy_from_slice(&stored[..copied]);
        Some(stored.len())
    }

    fn store_config(&mut self, key: ConfigKey, data: &[u8]) -> Result<(), DongleError> {
        if self.store_fails {
            return Err(DongleError::StorageFailed);
        }
        let value = Vec::from_slice(data).map_err(|()| DongleError::StorageFailed)?;
        self.config.retain(|(k, _)| *k != key);
        self.config
            .push((key, value))
            .map_err(|_| DongleError::StorageFailed)
    }

    fn clear_config(&mut self) {
        self.log(Call::ClearConfig);
        self.config.clear();
    }
}

impl AclControl for FakeDongle {
    fn create_acl(&mut self, _addr: BluetoothAddress) {
        self.log(Call::CreateAcl);
    }

    fn release_acl(&mut self, _addr: BluetoothAddress) {
        self.log(Call::ReleaseAcl);
    }

    fn is_acl_connected(&self, _addr: BluetoothAddress) -> bool {
        self.acl_up
    }

    fn pair_device(&mut self, _addr: BluetoothAddress) {
        self.log(Call::PairDevice);
    }
}

impl System for FakeDongle {
    fn local_address(&self) -> BluetoothAddress {
        self.local_address
    }

    fn reboot(&mut self) {
        self.log(Call::Reboot);
    }
}
