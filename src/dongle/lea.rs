//! LE Audio context and stream state machine of the dongle.
//!
//! Tracks which audio contexts are connected on the USB and analog side,
//! asks the LE Audio Client to stream the highest priority one and builds the
//! DSP graph once the stream is up. Every request that completes later is
//! remembered as a [`PendingRequest`]; indications carrying another token are
//! answers to abandoned requests and are dropped.

use crate::DongleError;
use crate::constants::LEA_CONTEXT_CHANGE_DELAY_MS;
use crate::sources::{AudioSource, GenericSource, VoiceSource};
use crate::timer::{Debouncer, TimerId};

use super::Io;
use super::config::DongleConfig;
use super::events::{MediaContext, Notification};
use super::platform::{
    AnalogLeGraphParams, CapContext, DonglePlatform, GroupHandle, LeaClientMode, RequestToken,
    StopNotify, StreamParams, UsbLeGraphParams,
};

/// State of the LE Audio link. Ordered: everything after `Disconnected`
/// counts as connected or streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LeaState {
    /// No unicast sink and no broadcast
    Disconnected,
    /// Unicast sink connected, idle
    Connected,
    /// Unicast stream requested
    UnicastStreamingStarting,
    /// Unicast stream and graph running
    UnicastStreaming,
    /// Broadcast requested
    BroadcastStreamingStarting,
    /// Broadcast and graph running
    BroadcastStreaming,
    /// Stream stop requested
    StreamingStopping,
}

/// Input the LE stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LeaContext {
    /// Nothing
    #[default]
    None,
    /// USB audio
    Audio,
    /// Analog line-in
    AnalogAudio,
    /// USB audio with a back channel microphone
    AudioVbc,
    /// USB voice
    Voice,
}

impl LeaContext {
    const fn bit(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Audio => 1 << 0,
            Self::AnalogAudio => 1 << 1,
            Self::AudioVbc => 1 << 2,
            Self::Voice => 1 << 3,
        }
    }

    const fn is_audio(self) -> bool {
        matches!(self, Self::Audio | Self::AnalogAudio)
    }
}

/// Set of connected [`LeaContext`]s
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LeaContextMask(u8);

impl LeaContextMask {
    /// Empty set
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Whether `context` is in the set
    #[must_use]
    pub const fn contains(self, context: LeaContext) -> bool {
        context.bit() != 0 && self.0 & context.bit() != 0
    }

    /// Add `context`
    pub fn insert(&mut self, context: LeaContext) {
        self.0 |= context.bit();
    }

    /// Remove `context`
    pub fn remove(&mut self, context: LeaContext) {
        self.0 &= !context.bit();
    }

    /// Whether the set is empty
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Highest priority member: voice, then audio with VBC, then analog,
    /// then audio.
    #[must_use]
    pub const fn focused(self) -> LeaContext {
        if self.contains(LeaContext::Voice) {
            LeaContext::Voice
        } else if self.contains(LeaContext::AudioVbc) {
            LeaContext::AudioVbc
        } else if self.contains(LeaContext::AnalogAudio) {
            LeaContext::AnalogAudio
        } else if self.contains(LeaContext::Audio) {
            LeaContext::Audio
        } else {
            LeaContext::None
        }
    }
}

/// What an outstanding LE Audio Client request asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PendingKind {
    /// Stream start in `context`
    Start {
        /// Requested CAP context
        context: CapContext,
    },
    /// Stream stop
    Stop,
    /// Cancellation of a stream start
    Cancel,
}

/// An LE Audio Client request awaiting its indication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PendingRequest {
    /// Token handed to the client
    pub token: RequestToken,
    /// Request type
    pub kind: PendingKind,
}

/// Stream start indication, as delivered by [`LeaEvent::StreamStartInd`](super::LeaEvent::StreamStartInd)
#[derive(Debug, Clone, Copy)]
pub(crate) struct StreamStart {
    pub token: Option<RequestToken>,
    pub success: bool,
    pub audio_context: CapContext,
    pub sender: AudioSource,
    pub params: StreamParams,
}

/// LE Audio context machine
#[derive(Debug)]
pub struct LeaAudio {
    state: LeaState,
    group: Option<GroupHandle>,
    mask: LeaContextMask,
    active: LeaContext,
    requested: LeaContext,
    pending: Option<PendingRequest>,
    graph: Option<LeaContext>,
    stream: Option<(AudioSource, StreamParams)>,
    next_token: u16,
    context_change: Debouncer,
}

impl Default for LeaAudio {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaAudio {
    /// Disconnected, no contexts
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: LeaState::Disconnected,
            group: None,
            mask: LeaContextMask::empty(),
            active: LeaContext::None,
            requested: LeaContext::None,
            pending: None,
            graph: None,
            stream: None,
            next_token: 0,
            context_change: Debouncer::new(TimerId::LeaContextChange, LEA_CONTEXT_CHANGE_DELAY_MS),
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> LeaState {
        self.state
    }

    /// Context streaming with a running graph
    #[must_use]
    pub const fn active_context(&self) -> LeaContext {
        self.active
    }

    /// Context the current start request is for
    #[must_use]
    pub const fn requested_context(&self) -> LeaContext {
        self.requested
    }

    /// Connected contexts
    #[must_use]
    pub const fn contexts(&self) -> LeaContextMask {
        self.mask
    }

    /// Outstanding client request
    #[must_use]
    pub const fn pending(&self) -> Option<PendingRequest> {
        self.pending
    }

    /// Group of the connected unicast sink
    #[must_use]
    pub const fn group(&self) -> Option<GroupHandle> {
        self.group
    }

    /// A context is streaming
    #[must_use]
    pub const fn is_source_active(&self) -> bool {
        !matches!(self.active, LeaContext::None)
    }

    /// Context the stream should carry now
    #[must_use]
    pub const fn determine_new_context(&self) -> LeaContext {
        self.mask.focused()
    }

    /// Media context matching the current state
    #[must_use]
    pub const fn ui_media_context(&self) -> MediaContext {
        match self.state {
            LeaState::UnicastStreaming | LeaState::BroadcastStreaming => MediaContext::Streaming,
            LeaState::Disconnected => MediaContext::Disconnected,
            _ => MediaContext::Connected,
        }
    }

    fn next_token(&mut self) -> RequestToken {
        self.next_token = self.next_token.wrapping_add(1);
        RequestToken(self.next_token)
    }

    fn is_connected<P: DonglePlatform>(&self, io: &Io<P>) -> bool {
        self.group.is_some() && io.platform.is_unicast_connected(self.group)
    }

    fn is_client_streaming<P: DonglePlatform>(&self, io: &Io<P>) -> bool {
        io.platform.is_unicast_streaming_active(self.group) || io.platform.is_broadcast_streaming_active()
    }

    /// Indication carrying `token` answers the outstanding request
    fn is_current(&self, token: Option<RequestToken>) -> bool {
        match token {
            Some(token) => self.pending.is_some_and(|p| p.token == token),
            None => true,
        }
    }

    /// Broadcast applies: broadcast mode with an audio context in focus
    #[must_use]
    pub const fn broadcast_mode_required(&self, config: &DongleConfig) -> bool {
        config.is_broadcast() && self.determine_new_context().is_audio()
    }

    /// CAP context to request for `context`
    #[must_use]
    pub const fn requested_audio_context(&self, config: &DongleConfig, context: LeaContext) -> CapContext {
        if self.broadcast_mode_required(config) {
            return if context.is_audio() {
                CapContext::Media
            } else {
                CapContext::Prohibited
            };
        }
        match context {
            LeaContext::AudioVbc if config.is_gaming() => CapContext::GameWithVbc,
            LeaContext::AudioVbc | LeaContext::Voice => CapContext::Conversational,
            LeaContext::Audio | LeaContext::AnalogAudio if config.is_gaming() => CapContext::Game,
            LeaContext::Audio | LeaContext::AnalogAudio => CapContext::Media,
            LeaContext::None => CapContext::Prohibited,
        }
    }

    pub(crate) fn set_state<P: DonglePlatform>(
        &mut self,
        io: &mut Io<P>,
        config: &DongleConfig,
        new_state: LeaState,
    ) {
        let starting = matches!(
            new_state,
            LeaState::UnicastStreamingStarting | LeaState::BroadcastStreamingStarting
        );
        // Re-entering a starting state retries a start that was never issued.
        if new_state == self.state && !starting {
            return;
        }
        debug!("[LEA] state {:?} -> {:?}", self.state, new_state);
        self.state = new_state;
        match new_state {
            LeaState::UnicastStreamingStarting | LeaState::BroadcastStreamingStarting => {
                self.requested = self.determine_new_context();
                if let Err(e) = self.start_streaming(io, config) {
                    error!("[LEA] cannot start streaming: {:?}", e);
                }
            }
            LeaState::StreamingStopping => self.audio_stop(io),
            _ => {}
        }
    }

    /// Ask the LE Audio Client to stream the requested context
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::InvalidContext`] if the requested context maps
    /// to [`CapContext::Prohibited`].
    fn start_streaming<P: DonglePlatform>(
        &mut self,
        io: &mut Io<P>,
        config: &DongleConfig,
    ) -> Result<(), DongleError> {
        let context = self.requested_audio_context(config, self.requested);
        if context == CapContext::Prohibited {
            return Err(DongleError::InvalidContext);
        }
        if !config.is_broadcast() && !self.is_connected(io) {
            debug!("[LEA] start ignored, no unicast sink");
            return Ok(());
        }
        if self.is_client_streaming(io) || self.pending.is_some() {
            debug!("[LEA] start deferred, client busy");
            return Ok(());
        }

        let broadcast = self.broadcast_mode_required(config);
        io.platform.set_client_mode(if broadcast {
            LeaClientMode::Broadcast
        } else {
            LeaClientMode::Unicast
        });
        let group = if broadcast { None } else { self.group };
        let token = self.next_token();
        if io.platform.start_streaming(group, context, token) {
            info!("[LEA] start {:?} for {:?}", context, self.requested);
            self.pending = Some(PendingRequest {
                token,
                kind: PendingKind::Start { context },
            });
        } else {
            warn!("[LEA] start {:?} refused", context);
        }
        Ok(())
    }

    fn request_stop<P: DonglePlatform>(&mut self, io: &mut Io<P>) -> bool {
        let token = self.next_token();
        if io.platform.stop_streaming(self.group, true, token) {
            self.pending = Some(PendingRequest {
                token,
                kind: PendingKind::Stop,
            });
            true
        } else {
            self.pending = None;
            false
        }
    }

    /// Start streaming the focused context
    pub fn audio_start<P: DonglePlatform>(&mut self, io: &mut Io<P>, config: &DongleConfig) {
        let broadcast = self.broadcast_mode_required(config);
        if self.state == LeaState::BroadcastStreaming && broadcast {
            io.notify(Notification::MediaContext(MediaContext::Streaming));
            return;
        }
        let starting = if broadcast {
            LeaState::BroadcastStreamingStarting
        } else {
            LeaState::UnicastStreamingStarting
        };
        self.set_state(io, config, starting);
    }

    /// Stop whatever is streaming or starting
    pub fn audio_stop<P: DonglePlatform>(&mut self, io: &mut Io<P>) {
        self.requested = LeaContext::None;
        match self.pending {
            Some(PendingRequest {
                kind: PendingKind::Start { .. },
                ..
            }) => {
                let token = self.next_token();
                if io.platform.start_streaming_cancel_request(self.group, token) {
                    self.pending = Some(PendingRequest {
                        token,
                        kind: PendingKind::Cancel,
                    });
                } else {
                    warn!("[LEA] start cancel refused");
                }
            }
            Some(_) => debug!("[LEA] stop already in progress"),
            None if self.is_client_streaming(io) => {
                if self.graph.is_some() {
                    self.stop_graph(io);
                }
                if !self.request_stop(io) {
                    error!("[LEA] stop refused");
                }
            }
            // No request is outstanding, so no indication will move us on.
            None if matches!(
                self.state,
                LeaState::UnicastStreamingStarting
                    | LeaState::BroadcastStreamingStarting
                    | LeaState::StreamingStopping
            ) =>
            {
                let ended = self.active;
                self.active = LeaContext::None;
                self.settle(io, ended);
            }
            None => io.notify(Notification::MediaContext(self.ui_media_context())),
        }
    }

    fn start_graph<P: DonglePlatform>(
        &mut self,
        io: &mut Io<P>,
        context: LeaContext,
        enable_mic: bool,
        is_restart: bool,
    ) -> bool {
        if self.graph.is_some() && !is_restart {
            warn!("[LEA] graph already running");
            return false;
        }
        let Some((sender, params)) = self.stream else {
            warn!("[LEA] no stream to build a graph for");
            return false;
        };
        let source = match context {
            LeaContext::Voice => GenericSource::Voice(VoiceSource::LeAudioUnicast),
            _ => GenericSource::Audio(sender),
        };
        let latency = params.codec.latency();
        let started = match context {
            LeaContext::Audio | LeaContext::AudioVbc | LeaContext::Voice => {
                io.platform.start_usb_le(&UsbLeGraphParams {
                    source,
                    voice: enable_mic,
                    microphone: params.microphone_present,
                    latency,
                })
            }
            LeaContext::AnalogAudio => io
                .platform
                .start_analog_le(&AnalogLeGraphParams { source, latency }),
            LeaContext::None => false,
        };
        if started {
            info!("[LEA] graph {:?} target {} us", context, latency.target_us);
            self.graph = Some(context);
        } else {
            error!("[LEA] graph {:?} failed", context);
        }
        started
    }

    fn stop_graph<P: DonglePlatform>(&mut self, io: &mut Io<P>) {
        match self.graph.take() {
            Some(context @ (LeaContext::Audio | LeaContext::AudioVbc | LeaContext::Voice)) => {
                let is_voice = matches!(context, LeaContext::AudioVbc | LeaContext::Voice);
                io.platform.stop_usb_le(is_voice, StopNotify::GraphStopped);
            }
            Some(LeaContext::AnalogAudio) => io.platform.stop_analog_le(),
            Some(LeaContext::None) | None => warn!("[LEA] no graph to stop"),
        }
    }

    /// Rebuild the running graph, for example after the USB interface changed
    pub fn restart_audio_graph<P: DonglePlatform>(&mut self, io: &mut Io<P>, enable_mic: bool) {
        if self.is_source_active() {
            self.stop_graph(io);
            self.start_graph(io, self.active, enable_mic, true);
        }
    }

    /// A USB graph stopped with [`StopNotify::GraphStopped`]
    pub fn handle_graph_stopped<P: DonglePlatform>(&mut self, io: &mut Io<P>, is_voice: bool) {
        io.platform.usb_chain_stopped(is_voice);
    }

    /// Unicast connection attempt finished
    pub fn handle_connect_ind<P: DonglePlatform>(
        &mut self,
        io: &mut Io<P>,
        config: &DongleConfig,
        success: bool,
        group: GroupHandle,
    ) {
        if !success {
            warn!("[LEA] connect failed");
            return;
        }
        self.group = Some(group);
        if self.state == LeaState::Disconnected {
            self.set_state(io, config, LeaState::Connected);
        }
        io.notify(Notification::MediaContext(MediaContext::Connected));
    }

    /// Unicast group went away
    pub fn handle_disconnect_ind<P: DonglePlatform>(
        &mut self,
        io: &mut Io<P>,
        config: &DongleConfig,
        group: GroupHandle,
    ) {
        if self.group.is_some_and(|g| g != group) {
            warn!("[LEA] disconnect of unknown group {}", group.0);
            return;
        }
        // The stream stop indication may never arrive once the link is gone.
        if self.is_source_active() {
            if self.graph.is_some() {
                self.stop_graph(io);
            }
            self.active = LeaContext::None;
        }
        self.group = None;
        if matches!(
            self.state,
            LeaState::Connected | LeaState::UnicastStreamingStarting | LeaState::UnicastStreaming
        ) {
            self.set_state(io, config, LeaState::Disconnected);
        }
        self.pending = None;
        self.requested = LeaContext::None;
        io.notify(Notification::MediaContext(self.ui_media_context()));
    }

    pub(crate) fn handle_stream_start_ind<P: DonglePlatform>(
        &mut self,
        io: &mut Io<P>,
        config: &DongleConfig,
        ind: StreamStart,
    ) {
        if !self.is_current(ind.token) {
            debug!("[LEA] stale stream start ignored");
            return;
        }
        if !ind.success {
            error!("[LEA] stream start failed");
            self.pending = None;
            self.settle(io, self.active);
            return;
        }
        self.stream = Some((ind.sender, ind.params));

        let expected = self.requested_audio_context(config, self.requested);
        if ind.audio_context != expected || self.requested != self.determine_new_context() {
            info!(
                "[LEA] context moved on ({:?} != {:?}), restarting stream",
                ind.audio_context, expected
            );
            if !self.request_stop(io) {
                warn!("[LEA] stop refused");
            }
            return;
        }

        if self.state == LeaState::BroadcastStreaming && self.requested == self.active {
            self.pending = None;
            io.notify(Notification::MediaContext(MediaContext::Streaming));
            return;
        }

        let enable_mic = matches!(self.requested, LeaContext::Voice | LeaContext::AudioVbc);
        let started = self.start_graph(io, self.requested, enable_mic, false);
        self.pending = None;
        if !started {
            return;
        }
        let streaming = if ind.sender == AudioSource::LeAudioBroadcastSender {
            LeaState::BroadcastStreaming
        } else {
            LeaState::UnicastStreaming
        };
        self.set_state(io, config, streaming);
        self.active = self.requested;
        io.notify(if self.active == LeaContext::Voice {
            Notification::VoiceCallStarted
        } else {
            Notification::MediaContext(MediaContext::Streaming)
        });
    }

    pub(crate) fn handle_stream_stop_ind<P: DonglePlatform>(
        &mut self,
        io: &mut Io<P>,
        config: &DongleConfig,
        token: Option<RequestToken>,
    ) {
        if !self.is_current(token) {
            debug!("[LEA] stale stream stop ignored");
            return;
        }
        let ended = self.active;
        if self.graph.is_some() {
            self.stop_graph(io);
        }
        self.pending = None;

        // Still wanted: go straight for the context now in focus.
        if self.requested != LeaContext::None {
            self.requested = self.determine_new_context();
            if self.requested != LeaContext::None {
                self.active = LeaContext::None;
                self.state = if self.broadcast_mode_required(config) {
                    LeaState::BroadcastStreamingStarting
                } else {
                    LeaState::UnicastStreamingStarting
                };
                if let Err(e) = self.start_streaming(io, config) {
                    error!("[LEA] restart failed: {:?}", e);
                }
                if self.pending.is_some() {
                    return;
                }
                self.requested = LeaContext::None;
            }
        }

        let connected = self.is_connected(io);
        if self.state >= LeaState::Connected || (config.is_broadcast() && !connected) {
            self.settle(io, ended);
        }
        self.active = LeaContext::None;

        if config.is_broadcast() && !connected && self.determine_new_context().is_audio() {
            self.set_state(io, config, LeaState::BroadcastStreamingStarting);
        }
    }

    pub(crate) fn handle_start_cancel_complete<P: DonglePlatform>(
        &mut self,
        io: &mut Io<P>,
        token: Option<RequestToken>,
        success: bool,
    ) {
        if !self.is_current(token) {
            debug!("[LEA] stale cancel completion ignored");
            return;
        }
        self.pending = None;
        if !success {
            // The stream came up anyway and nobody wants it.
            warn!("[LEA] cancel lost the race, stopping stream");
            if !self.request_stop(io) {
                error!("[LEA] stop refused");
            }
            return;
        }
        if self.state >= LeaState::Connected {
            self.settle(io, self.active);
        }
    }

    /// Back to `Connected` or `Disconnected` and tell the application that
    /// `ended` is over
    fn settle<P: DonglePlatform>(&mut self, io: &mut Io<P>, ended: LeaContext) {
        let settled = if self.is_connected(io) {
            LeaState::Connected
        } else {
            LeaState::Disconnected
        };
        if settled != self.state {
            debug!("[LEA] state {:?} -> {:?}", self.state, settled);
            self.state = settled;
        }
        io.notify(if ended == LeaContext::Voice {
            Notification::VoiceCallEnded
        } else {
            Notification::MediaContext(self.ui_media_context())
        });
    }

    /// Add a connected context
    pub fn add_context<P: DonglePlatform>(&mut self, io: &mut Io<P>, config: &DongleConfig, context: LeaContext) {
        self.mask.insert(context);
        self.context_changed(io, config);
    }

    /// Remove a disconnected context
    pub fn remove_context<P: DonglePlatform>(
        &mut self,
        io: &mut Io<P>,
        config: &DongleConfig,
        context: LeaContext,
    ) {
        self.mask.remove(context);
        self.context_changed(io, config);
    }

    fn context_changed<P: DonglePlatform>(&mut self, io: &mut Io<P>, config: &DongleConfig) {
        debug!("[LEA] contexts {:?}", self.mask);
        if config.is_broadcast() && !self.is_connected(io) {
            self.context_change.trigger(&mut io.timers, io.now_ms);
        }
    }

    /// The context change debounce expired
    pub fn handle_context_change_timer<P: DonglePlatform>(&mut self, io: &mut Io<P>, config: &DongleConfig) {
        if !config.is_broadcast() || self.is_connected(io) {
            return;
        }
        if self.context_switch_is_required()
            && matches!(
                self.state,
                LeaState::BroadcastStreamingStarting | LeaState::BroadcastStreaming
            )
        {
            self.set_state(io, config, LeaState::StreamingStopping);
        }
        if self.determine_new_context().is_audio() && self.state == LeaState::Disconnected {
            self.set_state(io, config, LeaState::BroadcastStreamingStarting);
        }
    }

    /// Broadcast mode was entered or left. Returns `true` if a unicast sink
    /// is connected and the application has to re-evaluate its inputs.
    pub fn handle_broadcast_mode_toggle<P: DonglePlatform>(
        &mut self,
        io: &mut Io<P>,
        config: &DongleConfig,
        is_connected: bool,
    ) -> bool {
        if is_connected {
            return true;
        }
        let required = self.broadcast_mode_required(config);
        match self.state {
            LeaState::BroadcastStreamingStarting | LeaState::BroadcastStreaming if !required => {
                self.set_state(io, config, LeaState::StreamingStopping);
            }
            LeaState::Disconnected if required => {
                self.set_state(io, config, LeaState::BroadcastStreamingStarting);
            }
            _ => {}
        }
        false
    }

    /// An audio stream can be started now
    #[must_use]
    pub fn is_audio_available<P: DonglePlatform>(&self, io: &Io<P>, config: &DongleConfig) -> bool {
        let mut allowed = LeaContextMask::empty();
        allowed.insert(LeaContext::Audio);
        allowed.insert(LeaContext::AnalogAudio);
        if !config.is_broadcast() {
            if !self.is_connected(io) {
                return false;
            }
            allowed.insert(LeaContext::AudioVbc);
        }
        self.mask.0 & allowed.0 != 0
    }

    /// Audio with back channel can be streamed to the connected sink
    #[must_use]
    pub fn is_vbc_available<P: DonglePlatform>(&self, io: &Io<P>) -> bool {
        self.is_connected(io) && self.mask.contains(LeaContext::AudioVbc)
    }

    /// Voice can be streamed to the connected sink
    #[must_use]
    pub fn is_voice_available<P: DonglePlatform>(&self, io: &Io<P>) -> bool {
        self.is_connected(io) && self.mask.contains(LeaContext::Voice)
    }

    /// The streaming or requested context is no longer the one in focus
    #[must_use]
    pub const fn context_switch_is_required(&self) -> bool {
        let new = self.determine_new_context();
        if !matches!(self.active, LeaContext::None) {
            !matches_context(self.active, new)
        } else if !matches!(self.requested, LeaContext::None) {
            !matches_context(self.requested, new)
        } else {
            false
        }
    }

    /// The running session was configured for the other audio mode
    #[must_use]
    pub fn is_context_change_required<P: DonglePlatform>(&self, io: &Io<P>, config: &DongleConfig) -> bool {
        if !self.is_source_active() {
            return false;
        }
        let gaming_session = matches!(
            io.platform.unicast_session_context(self.group),
            CapContext::Game | CapContext::GameWithVbc
        );
        config.is_gaming() != gaming_session
    }

    /// Replace a VBC context by the voice context. Returns `true` if it did.
    pub fn switch_to_voice_context_if_required<P: DonglePlatform>(
        &mut self,
        io: &mut Io<P>,
        config: &DongleConfig,
    ) -> bool {
        if !self.mask.contains(LeaContext::AudioVbc) {
            return false;
        }
        self.remove_context(io, config, LeaContext::AudioVbc);
        self.add_context(io, config, LeaContext::Voice);
        true
    }

    /// Streaming over the other kind of transport than the audio mode wants
    #[must_use]
    pub fn is_transport_switch_required(&self, config: &DongleConfig) -> bool {
        if config.is_broadcast() {
            self.state == LeaState::UnicastStreaming
        } else {
            self.state == LeaState::BroadcastStreaming
        }
    }

    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        let streaming = matches!(
            self.state,
            LeaState::UnicastStreaming | LeaState::BroadcastStreaming
        );
        let graph_matches = match self.graph {
            Some(context) => context == self.active && context != LeaContext::None,
            None => true,
        };
        (!streaming || self.is_source_active()) && graph_matches
    }
}

const fn matches_context(a: LeaContext, b: LeaContext) -> bool {
    a.bit() == b.bit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dongle::config::{AudioMode, DongleOptions, TransportMode};
    use crate::dongle::platform::LeCodec;
    use crate::test_support::{Call, FakeDongle};

    const GROUP: GroupHandle = GroupHandle(7);
    const PARAMS: StreamParams = StreamParams {
        codec: LeCodec::Lc3_10Ms,
        microphone_present: false,
    };

    fn config(audio_mode: AudioMode) -> DongleConfig {
        DongleConfig::new(&DongleOptions {
            audio_mode,
            transport_mode: TransportMode::LeAudio,
            ..DongleOptions::default()
        })
    }

    fn connected() -> (LeaAudio, Io<FakeDongle>) {
        let mut io = Io::new(FakeDongle::new());
        io.platform.unicast_connected = true;
        let mut lea = LeaAudio::new();
        lea.handle_connect_ind(&mut io, &config(AudioMode::HighQuality), true, GROUP);
        io.outbox.clear();
        (lea, io)
    }

    fn start_ind(token: Option<RequestToken>, context: CapContext) -> StreamStart {
        StreamStart {
            token,
            success: true,
            audio_context: context,
            sender: AudioSource::LeAudioUnicastSender,
            params: PARAMS,
        }
    }

    #[test]
    fn test_context_priority() {
        let mut mask = LeaContextMask::empty();
        assert_eq!(mask.focused(), LeaContext::None);
        mask.insert(LeaContext::Audio);
        mask.insert(LeaContext::AnalogAudio);
        assert_eq!(mask.focused(), LeaContext::AnalogAudio);
        mask.insert(LeaContext::AudioVbc);
        assert_eq!(mask.focused(), LeaContext::AudioVbc);
        mask.insert(LeaContext::Voice);
        assert_eq!(mask.focused(), LeaContext::Voice);
        mask.remove(LeaContext::Voice);
        assert!(!mask.contains(LeaContext::Voice));
        assert!(!mask.contains(LeaContext::None));
    }

    #[test]
    fn test_cap_context_mapping() {
        let lea = LeaAudio::new();
        let gaming = config(AudioMode::Gaming);
        let hq = config(AudioMode::HighQuality);
        assert_eq!(
            lea.requested_audio_context(&gaming, LeaContext::AudioVbc),
            CapContext::GameWithVbc
        );
        assert_eq!(
            lea.requested_audio_context(&hq, LeaContext::AudioVbc),
            CapContext::Conversational
        );
        assert_eq!(lea.requested_audio_context(&gaming, LeaContext::Audio), CapContext::Game);
        assert_eq!(lea.requested_audio_context(&hq, LeaContext::AnalogAudio), CapContext::Media);
        assert_eq!(
            lea.requested_audio_context(&hq, LeaContext::Voice),
            CapContext::Conversational
        );
        assert_eq!(lea.requested_audio_context(&hq, LeaContext::None), CapContext::Prohibited);
    }

    #[test]
    fn test_unicast_start_builds_graph() {
        let (mut lea, mut io) = connected();
        let cfg = config(AudioMode::Gaming);
        lea.add_context(&mut io, &cfg, LeaContext::Audio);
        lea.audio_start(&mut io, &cfg);

        assert_eq!(lea.state(), LeaState::UnicastStreamingStarting);
        assert!(io.platform.called(Call::SetClientMode(LeaClientMode::Unicast)));
        let token = io.platform.last_token();
        assert!(io.platform.called(Call::StartStreaming(CapContext::Game, token.unwrap())));

        lea.handle_stream_start_ind(&mut io, &cfg, start_ind(token, CapContext::Game));
        assert_eq!(lea.state(), LeaState::UnicastStreaming);
        assert_eq!(lea.active_context(), LeaContext::Audio);
        assert_eq!(lea.pending(), None);
        assert!(io.platform.called(Call::StartUsbLe {
            voice: false,
            microphone: false
        }));
        assert_eq!(
            io.outbox.pop_front(),
            Some(Notification::MediaContext(MediaContext::Streaming))
        );
        assert!(lea.is_consistent());
    }

    #[test]
    fn test_start_without_sink_not_requested() {
        let mut io = Io::new(FakeDongle::new());
        let mut lea = LeaAudio::new();
        let cfg = config(AudioMode::HighQuality);
        lea.add_context(&mut io, &cfg, LeaContext::Audio);
        lea.audio_start(&mut io, &cfg);
        assert_eq!(io.platform.count(|c| matches!(c, Call::StartStreaming(..))), 0);
        assert_eq!(lea.pending(), None);
    }

    #[test]
    fn test_context_change_before_confirmation_restarts() {
        let (mut lea, mut io) = connected();
        let cfg = config(AudioMode::Gaming);
        lea.add_context(&mut io, &cfg, LeaContext::Audio);
        lea.audio_start(&mut io, &cfg);
        let start = io.platform.last_token();

        // VBC arrives while the Game stream is being set up.
        lea.add_context(&mut io, &cfg, LeaContext::AudioVbc);
        lea.handle_stream_start_ind(&mut io, &cfg, start_ind(start, CapContext::Game));

        assert!(io.platform.graph_calls().is_empty());
        let stop = io.platform.last_token().unwrap();
        assert!(io.platform.called(Call::StopStreaming {
            force: true,
            token: stop
        }));
        assert_eq!(
            lea.pending(),
            Some(PendingRequest {
                token: stop,
                kind: PendingKind::Stop
            })
        );

        lea.handle_stream_stop_ind(&mut io, &cfg, Some(stop));
        assert_eq!(lea.requested_context(), LeaContext::AudioVbc);
        let restart = io.platform.last_token().unwrap();
        assert!(io.platform.called(Call::StartStreaming(CapContext::GameWithVbc, restart)));
        assert_eq!(lea.state(), LeaState::UnicastStreamingStarting);
        assert!(io.outbox.is_empty());

        lea.handle_stream_start_ind(&mut io, &cfg, start_ind(Some(restart), CapContext::GameWithVbc));
        assert_eq!(lea.active_context(), LeaContext::AudioVbc);
        assert!(io.platform.called(Call::StartUsbLe {
            voice: true,
            microphone: false
        }));
        assert!(lea.is_consistent());
    }

    #[test]
    fn test_stale_indication_ignored() {
        let (mut lea, mut io) = connected();
        let cfg = config(AudioMode::HighQuality);
        lea.add_context(&mut io, &cfg, LeaContext::Audio);
        lea.audio_start(&mut io, &cfg);
        let start = io.platform.last_token().unwrap();
        lea.audio_stop(&mut io);
        assert!(io.platform.called(Call::CancelStart(io.platform.last_token().unwrap())));

        lea.handle_stream_start_ind(&mut io, &cfg, start_ind(Some(start), CapContext::Media));
        assert!(io.platform.graph_calls().is_empty());
        assert_eq!(lea.active_context(), LeaContext::None);
        assert_eq!(lea.pending().map(|p| p.kind), Some(PendingKind::Cancel));
    }

    #[test]
    fn test_cancel_completion_settles() {
        let (mut lea, mut io) = connected();
        let cfg = config(AudioMode::HighQuality);
        lea.add_context(&mut io, &cfg, LeaContext::Audio);
        lea.audio_start(&mut io, &cfg);
        lea.audio_stop(&mut io);
        let cancel = io.platform.last_token();

        lea.handle_start_cancel_complete(&mut io, cancel, true);
        assert_eq!(lea.state(), LeaState::Connected);
        assert_eq!(lea.pending(), None);
        assert_eq!(
            io.outbox.pop_front(),
            Some(Notification::MediaContext(MediaContext::Connected))
        );
    }

    #[test]
    fn test_stop_stops_graph_first() {
        let (mut lea, mut io) = connected();
        let cfg = config(AudioMode::HighQuality);
        lea.add_context(&mut io, &cfg, LeaContext::Voice);
        lea.audio_start(&mut io, &cfg);
        let token = io.platform.last_token();
        lea.handle_stream_start_ind(&mut io, &cfg, start_ind(token, CapContext::Conversational));
        assert_eq!(io.outbox.pop_front(), Some(Notification::VoiceCallStarted));
        io.platform.unicast_streaming = true;

        lea.audio_stop(&mut io);
        let stop = io.platform.last_token();
        let calls = io.platform.calls.clone();
        let graph_stop = calls
            .iter()
            .position(|c| matches!(c, Call::StopUsbLe { voice: true, .. }))
            .unwrap();
        let stream_stop = calls
            .iter()
            .position(|c| matches!(c, Call::StopStreaming { .. }))
            .unwrap();
        assert!(graph_stop < stream_stop);

        io.platform.unicast_streaming = false;
        lea.handle_stream_stop_ind(&mut io, &cfg, stop);
        assert_eq!(io.platform.count(|c| matches!(c, Call::StopUsbLe { .. })), 1);
        assert_eq!(lea.state(), LeaState::Connected);
        assert_eq!(io.outbox.pop_front(), Some(Notification::VoiceCallEnded));
        assert_eq!(lea.active_context(), LeaContext::None);
    }

    #[test]
    fn test_disconnect_tears_down() {
        let (mut lea, mut io) = connected();
        let cfg = config(AudioMode::HighQuality);
        lea.add_context(&mut io, &cfg, LeaContext::Audio);
        lea.audio_start(&mut io, &cfg);
        let token = io.platform.last_token();
        lea.handle_stream_start_ind(&mut io, &cfg, start_ind(token, CapContext::Media));
        io.outbox.clear();

        io.platform.unicast_connected = false;
        lea.handle_disconnect_ind(&mut io, &cfg, GROUP);
        assert_eq!(lea.state(), LeaState::Disconnected);
        assert_eq!(lea.group(), None);
        assert_eq!(lea.active_context(), LeaContext::None);
        assert_eq!(io.platform.graphs_running, 0);
        assert_eq!(
            io.outbox.pop_front(),
            Some(Notification::MediaContext(MediaContext::Disconnected))
        );
    }

    #[test]
    fn test_broadcast_starts_on_context_timer() {
        let mut io = Io::new(FakeDongle::new());
        let mut lea = LeaAudio::new();
        let cfg = config(AudioMode::Broadcast);
        lea.add_context(&mut io, &cfg, LeaContext::Audio);
        assert!(io.timers.is_pending(TimerId::LeaContextChange));

        lea.handle_context_change_timer(&mut io, &cfg);
        assert_eq!(lea.state(), LeaState::BroadcastStreamingStarting);
        assert!(io.platform.called(Call::SetClientMode(LeaClientMode::Broadcast)));
        let token = io.platform.last_token();
        assert!(io.platform.called(Call::StartStreaming(CapContext::Media, token.unwrap())));

        let mut ind = start_ind(token, CapContext::Media);
        ind.sender = AudioSource::LeAudioBroadcastSender;
        lea.handle_stream_start_ind(&mut io, &cfg, ind);
        assert_eq!(lea.state(), LeaState::BroadcastStreaming);
        io.platform.broadcast_streaming = true;

        // Input unplugged: broadcast stops after the debounce.
        lea.remove_context(&mut io, &cfg, LeaContext::Audio);
        lea.handle_context_change_timer(&mut io, &cfg);
        assert_eq!(lea.state(), LeaState::StreamingStopping);
        assert!(io.platform.count(|c| matches!(c, Call::StopStreaming { .. })) == 1);
        assert!(lea.is_consistent());
    }

    #[test]
    fn test_broadcast_toggle() {
        let mut io = Io::new(FakeDongle::new());
        let mut lea = LeaAudio::new();
        let cfg = config(AudioMode::Broadcast);
        lea.add_context(&mut io, &cfg, LeaContext::Audio);
        assert!(!lea.handle_broadcast_mode_toggle(&mut io, &cfg, false));
        assert_eq!(lea.state(), LeaState::BroadcastStreamingStarting);
        assert!(lea.handle_broadcast_mode_toggle(&mut io, &cfg, true));
        lea.handle_broadcast_mode_toggle(&mut io, &config(AudioMode::HighQuality), false);
        assert_eq!(lea.state(), LeaState::StreamingStopping);
    }

    #[test]
    fn test_voice_switch_and_availability() {
        let (mut lea, mut io) = connected();
        let cfg = config(AudioMode::Gaming);
        assert!(!lea.is_audio_available(&io, &cfg));
        lea.add_context(&mut io, &cfg, LeaContext::AudioVbc);
        assert!(lea.is_audio_available(&io, &cfg));
        assert!(lea.is_vbc_available(&io));
        assert!(!lea.is_voice_available(&io));

        assert!(lea.switch_to_voice_context_if_required(&mut io, &cfg));
        assert!(lea.is_voice_available(&io));
        assert!(!lea.switch_to_voice_context_if_required(&mut io, &cfg));
    }

    #[test]
    fn test_deferred_start_is_retried() {
        let (mut lea, mut io) = connected();
        let cfg = config(AudioMode::HighQuality);
        lea.add_context(&mut io, &cfg, LeaContext::Audio);
        io.platform.unicast_streaming = true;
        lea.audio_start(&mut io, &cfg);
        assert_eq!(io.platform.count(|c| matches!(c, Call::StartStreaming(..))), 0);
        assert_eq!(lea.state(), LeaState::UnicastStreamingStarting);

        io.platform.unicast_streaming = false;
        lea.audio_start(&mut io, &cfg);
        let token = io.platform.last_token().unwrap();
        assert!(io.platform.called(Call::StartStreaming(CapContext::Media, token)));
        assert_eq!(
            lea.pending().map(|p| p.kind),
            Some(PendingKind::Start {
                context: CapContext::Media
            })
        );
    }

    #[test]
    fn test_refused_start_is_retried() {
        let (mut lea, mut io) = connected();
        let cfg = config(AudioMode::HighQuality);
        lea.add_context(&mut io, &cfg, LeaContext::Audio);
        io.platform.lea_accepts = false;
        lea.audio_start(&mut io, &cfg);
        assert_eq!(lea.pending(), None);

        io.platform.lea_accepts = true;
        lea.audio_start(&mut io, &cfg);
        assert_eq!(io.platform.count(|c| matches!(c, Call::StartStreaming(..))), 2);
        assert!(lea.pending().is_some());

        let token = io.platform.last_token();
        lea.handle_stream_start_ind(&mut io, &cfg, start_ind(token, CapContext::Media));
        assert_eq!(lea.state(), LeaState::UnicastStreaming);
        assert!(lea.is_consistent());
    }

    #[test]
    fn test_stop_settles_when_nothing_was_requested() {
        let (mut lea, mut io) = connected();
        let cfg = config(AudioMode::HighQuality);
        lea.add_context(&mut io, &cfg, LeaContext::Audio);
        io.platform.lea_accepts = false;
        lea.audio_start(&mut io, &cfg);

        lea.audio_stop(&mut io);
        assert_eq!(lea.state(), LeaState::Connected);
        assert_eq!(
            io.platform
                .count(|c| matches!(c, Call::CancelStart(..) | Call::StopStreaming { .. })),
            0
        );
        assert_eq!(
            io.outbox.pop_front(),
            Some(Notification::MediaContext(MediaContext::Connected))
        );

        io.platform.lea_accepts = true;
        lea.audio_start(&mut io, &cfg);
        assert_eq!(lea.state(), LeaState::UnicastStreamingStarting);
        assert_eq!(io.platform.count(|c| matches!(c, Call::StartStreaming(..))), 2);
    }

    #[test]
    fn test_failed_voice_restart_ends_call() {
        let (mut lea, mut io) = connected();
        let cfg = config(AudioMode::HighQuality);
        lea.add_context(&mut io, &cfg, LeaContext::Voice);
        lea.audio_start(&mut io, &cfg);
        let token = io.platform.last_token();
        lea.handle_stream_start_ind(&mut io, &cfg, start_ind(token, CapContext::Conversational));
        assert_eq!(io.outbox.pop_front(), Some(Notification::VoiceCallStarted));

        // The sink dropped the stream and will not take it back.
        io.platform.lea_accepts = false;
        lea.handle_stream_stop_ind(&mut io, &cfg, None);
        assert_eq!(io.platform.count(|c| matches!(c, Call::StartStreaming(..))), 2);
        assert_eq!(lea.state(), LeaState::Connected);
        assert_eq!(lea.active_context(), LeaContext::None);
        assert_eq!(io.outbox.pop_front(), Some(Notification::VoiceCallEnded));
        assert!(lea.is_consistent());
    }
}
