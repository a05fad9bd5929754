// Copyright 2024 Huddle, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Scriptable peer connections for driving the engine without a native
//! WebRTC stack.

use std::sync::{
    atomic::{AtomicI32, Ordering},
    Arc,
};

use async_trait::async_trait;
use huddle::rtc::prelude::*;
use parking_lot::Mutex;
use tokio::sync::watch;

#[derive(Default)]
struct PcCallbacks {
    on_ice_candidate: Mutex<Option<OnIceCandidate>>,
    on_connection_state_change: Mutex<Option<OnConnectionChange>>,
    on_data_channel: Mutex<Option<OnDataChannel>>,
    on_track: Mutex<Option<OnTrack>>,
}

struct PcState {
    signaling: SignalingState,
    connection: PeerConnectionState,
    ice: IceConnectionState,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    added_candidates: Vec<IceCandidate>,
    applied_configs: Vec<RtcConfiguration>,
    offer_options: Vec<OfferOptions>,
    restart_ice_calls: u32,
    senders: Vec<RtpSender>,
    removed_senders: Vec<RtpSender>,
    closed: bool,
    sdp_counter: u32,
}

pub struct FakePeerConnection {
    state: Mutex<PcState>,
    callbacks: PcCallbacks,
    created_channels: Mutex<Vec<Arc<FakeDataChannel>>>,
    offer_gate: watch::Sender<bool>,
    next_dc_id: AtomicI32,
}

impl FakePeerConnection {
    pub fn new() -> Self {
        let (offer_gate, _) = watch::channel(false);
        Self {
            state: Mutex::new(PcState {
                signaling: SignalingState::Stable,
                connection: PeerConnectionState::New,
                ice: IceConnectionState::New,
                local_description: None,
                remote_description: None,
                added_candidates: Vec::new(),
                applied_configs: Vec::new(),
                offer_options: Vec::new(),
                restart_ice_calls: 0,
                senders: Vec::new(),
                removed_senders: Vec::new(),
                closed: false,
                sdp_counter: 0,
            }),
            callbacks: PcCallbacks::default(),
            created_channels: Mutex::new(Vec::new()),
            offer_gate,
            next_dc_id: AtomicI32::new(1),
        }
    }

    /// Moves the connection (and its ICE state) and fires the registered
    /// state-change callback, like the native observer would.
    pub fn transition(&self, connection: PeerConnectionState) {
        {
            let mut state = self.state.lock();
            state.connection = connection;
            state.ice = match connection {
                PeerConnectionState::New => IceConnectionState::New,
                PeerConnectionState::Connecting => IceConnectionState::Checking,
                PeerConnectionState::Connected => IceConnectionState::Connected,
                PeerConnectionState::Disconnected => IceConnectionState::Disconnected,
                PeerConnectionState::Failed => IceConnectionState::Failed,
                PeerConnectionState::Closed => IceConnectionState::Closed,
            };
        }

        if let Some(callback) = self.callbacks.on_connection_state_change.lock().as_mut() {
            callback(connection);
        }
    }

    /// Delivers a server-created data channel, as the subscriber transport
    /// does in subscriber-primary mode.
    pub fn deliver_data_channel(&self, channel: Arc<FakeDataChannel>) {
        if let Some(callback) = self.callbacks.on_data_channel.lock().as_mut() {
            callback(channel);
        }
    }

    pub fn deliver_track(&self, event: TrackEvent) {
        if let Some(callback) = self.callbacks.on_track.lock().as_mut() {
            callback(event);
        }
    }

    pub fn emit_ice_candidate(&self, candidate: IceCandidate) {
        if let Some(callback) = self.callbacks.on_ice_candidate.lock().as_mut() {
            callback(candidate);
        }
    }

    /// Blocks `create_offer` calls until [`FakePeerConnection::release_offers`].
    pub fn hold_offers(&self) {
        self.offer_gate.send_replace(true);
    }

    pub fn release_offers(&self) {
        self.offer_gate.send_replace(false);
    }

    pub fn added_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().added_candidates.clone()
    }

    pub fn applied_configs(&self) -> Vec<RtcConfiguration> {
        self.state.lock().applied_configs.clone()
    }

    pub fn offer_options(&self) -> Vec<OfferOptions> {
        self.state.lock().offer_options.clone()
    }

    pub fn restart_ice_calls(&self) -> u32 {
        self.state.lock().restart_ice_calls
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn add_fake_sender(&self, sender: RtpSender) {
        self.state.lock().senders.push(sender);
    }

    pub fn removed_senders(&self) -> Vec<RtpSender> {
        self.state.lock().removed_senders.clone()
    }

    pub fn created_channels(&self) -> Vec<Arc<FakeDataChannel>> {
        self.created_channels.lock().clone()
    }

    pub fn created_channel(&self, label: &str) -> Option<Arc<FakeDataChannel>> {
        self.created_channels.lock().iter().find(|dc| dc.label() == label).cloned()
    }

    fn next_sdp(&self, kind: &str) -> String {
        let mut state = self.state.lock();
        state.sdp_counter += 1;
        format!("v=0\r\no=- {} 0 IN IP4 127.0.0.1\r\ns={}-{}", state.sdp_counter, kind, state.sdp_counter)
    }
}

#[async_trait]
impl PeerConnection for FakePeerConnection {
    async fn create_offer(&self, options: OfferOptions) -> Result<SessionDescription, RtcError> {
        let mut gate = self.offer_gate.subscribe();
        while *gate.borrow() {
            if gate.changed().await.is_err() {
                break;
            }
        }

        self.state.lock().offer_options.push(options);
        let sdp = self.next_sdp("offer");
        SessionDescription::parse(&sdp, SdpType::Offer).map_err(|err| RtcError {
            error_type: RtcErrorType::InvalidSdp,
            message: err.to_string(),
        })
    }

    async fn create_answer(&self, _options: AnswerOptions) -> Result<SessionDescription, RtcError> {
        let sdp = self.next_sdp("answer");
        SessionDescription::parse(&sdp, SdpType::Answer).map_err(|err| RtcError {
            error_type: RtcErrorType::InvalidSdp,
            message: err.to_string(),
        })
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), RtcError> {
        let mut state = self.state.lock();
        state.signaling = match description.sdp_type() {
            SdpType::Offer => SignalingState::HaveLocalOffer,
            _ => SignalingState::Stable,
        };
        state.local_description = Some(description);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), RtcError> {
        let mut state = self.state.lock();
        state.signaling = match description.sdp_type() {
            SdpType::Offer => SignalingState::HaveRemoteOffer,
            _ => SignalingState::Stable,
        };
        state.remote_description = Some(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), RtcError> {
        self.state.lock().added_candidates.push(candidate);
        Ok(())
    }

    async fn get_stats(&self) -> Result<Vec<RtcStats>, RtcError> {
        Ok(vec![RtcStats {
            id: "RTCTransport_fake_0".to_owned(),
            timestamp_us: 0,
            kind: "transport".to_owned(),
            values: vec![],
        }])
    }

    fn set_configuration(&self, config: RtcConfiguration) -> Result<(), RtcError> {
        self.state.lock().applied_configs.push(config);
        Ok(())
    }

    fn create_data_channel(
        &self,
        label: &str,
        init: DataChannelInit,
    ) -> Result<Arc<dyn DataChannel>, RtcError> {
        let channel = Arc::new(FakeDataChannel::new(
            label,
            self.next_dc_id.fetch_add(1, Ordering::Relaxed),
            init,
        ));
        self.created_channels.lock().push(channel.clone());
        Ok(channel)
    }

    fn restart_ice(&self) {
        self.state.lock().restart_ice_calls += 1;
    }

    fn connection_state(&self) -> PeerConnectionState {
        self.state.lock().connection
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        self.state.lock().ice
    }

    fn signaling_state(&self) -> SignalingState {
        self.state.lock().signaling
    }

    fn current_local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local_description.clone()
    }

    fn current_remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote_description.clone()
    }

    fn senders(&self) -> Vec<RtpSender> {
        self.state.lock().senders.clone()
    }

    fn remove_track(&self, sender: RtpSender) -> Result<(), RtcError> {
        let mut state = self.state.lock();
        state.senders.retain(|existing| existing != &sender);
        state.removed_senders.push(sender);
        Ok(())
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.connection = PeerConnectionState::Closed;
        state.ice = IceConnectionState::Closed;
    }

    fn on_ice_candidate(&self, handler: Option<OnIceCandidate>) {
        *self.callbacks.on_ice_candidate.lock() = handler;
    }

    fn on_connection_state_change(&self, handler: Option<OnConnectionChange>) {
        *self.callbacks.on_connection_state_change.lock() = handler;
    }

    fn on_data_channel(&self, handler: Option<OnDataChannel>) {
        *self.callbacks.on_data_channel.lock() = handler;
    }

    fn on_track(&self, handler: Option<OnTrack>) {
        *self.callbacks.on_track.lock() = handler;
    }
}

pub struct FakeDataChannel {
    label: String,
    id: i32,
    pub init: DataChannelInit,
    state: Mutex<DataChannelState>,
    sent: Mutex<Vec<Vec<u8>>>,
    on_message: Mutex<Option<OnMessage>>,
    on_state_change: Mutex<Option<OnStateChange>>,
    closed: Mutex<bool>,
}

impl FakeDataChannel {
    pub fn new(label: &str, id: i32, init: DataChannelInit) -> Self {
        Self {
            label: label.to_owned(),
            id,
            init,
            state: Mutex::new(DataChannelState::Connecting),
            sent: Mutex::new(Vec::new()),
            on_message: Mutex::new(None),
            on_state_change: Mutex::new(None),
            closed: Mutex::new(false),
        }
    }

    pub fn set_state(&self, state: DataChannelState) {
        *self.state.lock() = state;
        if let Some(callback) = self.on_state_change.lock().as_mut() {
            callback(state);
        }
    }

    pub fn deliver_message(&self, data: &[u8]) {
        if let Some(callback) = self.on_message.lock().as_mut() {
            callback(DataBuffer { data, binary: true });
        }
    }

    pub fn sent_messages(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    pub fn has_message_handler(&self) -> bool {
        self.on_message.lock().is_some()
    }
}

impl DataChannel for FakeDataChannel {
    fn send(&self, data: &[u8], _binary: bool) -> Result<(), DataChannelError> {
        if *self.state.lock() != DataChannelState::Open {
            return Err(DataChannelError::Send);
        }

        self.sent.lock().push(data.to_vec());
        Ok(())
    }

    fn id(&self) -> i32 {
        self.id
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn state(&self) -> DataChannelState {
        *self.state.lock()
    }

    fn buffered_amount(&self) -> u64 {
        0
    }

    fn close(&self) {
        *self.closed.lock() = true;
        *self.state.lock() = DataChannelState::Closed;
    }

    fn on_message(&self, handler: Option<OnMessage>) {
        *self.on_message.lock() = handler;
    }

    fn on_state_change(&self, handler: Option<OnStateChange>) {
        *self.on_state_change.lock() = handler;
    }
}

#[derive(Default)]
pub struct FakePeerConnectionFactory {
    connections: Mutex<Vec<Arc<FakePeerConnection>>>,
}

impl FakePeerConnectionFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connections in creation order; the engine builds the publisher
    /// first, then the subscriber, for every session.
    pub fn connection(&self, index: usize) -> Arc<FakePeerConnection> {
        self.connections.lock()[index].clone()
    }

    pub fn created(&self) -> usize {
        self.connections.lock().len()
    }
}

impl PeerConnectionFactory for FakePeerConnectionFactory {
    fn create_peer_connection(
        &self,
        config: RtcConfiguration,
    ) -> Result<Arc<dyn PeerConnection>, RtcError> {
        let connection = Arc::new(FakePeerConnection::new());
        connection.state.lock().applied_configs.push(config);
        self.connections.lock().push(connection.clone());
        Ok(connection)
    }
}
