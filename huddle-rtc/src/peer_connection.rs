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

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;

use crate::{
    data_channel::{DataChannel, DataChannelInit},
    ice_candidate::IceCandidate,
    peer_connection_factory::RtcConfiguration,
    session_description::SessionDescription,
    stats::RtcStats,
    MediaType, RtcError,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Disconnected,
    Closed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveLocalPrAnswer,
    HaveRemoteOffer,
    HaveRemotePrAnswer,
    Closed,
}

#[derive(Debug, Clone, Default)]
pub struct OfferOptions {
    pub ice_restart: bool,
    pub offer_to_receive_audio: bool,
    pub offer_to_receive_video: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AnswerOptions {}

/// Descriptor of a remote media track delivered by the subscriber peer
/// connection. The engine forwards these handles untouched; decoding and
/// rendering belong to the platform layer.
#[derive(Debug, Clone)]
pub struct MediaStream {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct MediaStreamTrack {
    pub id: String,
    pub kind: MediaType,
}

#[derive(Debug, Clone)]
pub struct RtpReceiver {
    pub id: String,
}

/// Handle over an RTP sender attached to the publisher peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpSender {
    pub id: String,
    pub track_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TrackEvent {
    pub receiver: RtpReceiver,
    pub streams: Vec<MediaStream>,
    pub track: MediaStreamTrack,
}

pub type OnConnectionChange = Box<dyn FnMut(PeerConnectionState) + Send + Sync>;
pub type OnDataChannel = Box<dyn FnMut(Arc<dyn DataChannel>) + Send + Sync>;
pub type OnIceCandidate = Box<dyn FnMut(IceCandidate) + Send + Sync>;
pub type OnTrack = Box<dyn FnMut(TrackEvent) + Send + Sync>;

/// A single native peer connection.
///
/// The engine serializes every mutating call through a per-transport
/// operation queue, so implementations only need the same thread-safety
/// the native stack already provides. State accessors are side-effect
/// free and may be called from any task.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self, options: OfferOptions) -> Result<SessionDescription, RtcError>;

    async fn create_answer(&self, options: AnswerOptions) -> Result<SessionDescription, RtcError>;

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), RtcError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), RtcError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), RtcError>;

    async fn get_stats(&self) -> Result<Vec<RtcStats>, RtcError>;

    fn set_configuration(&self, config: RtcConfiguration) -> Result<(), RtcError>;

    fn create_data_channel(
        &self,
        label: &str,
        init: DataChannelInit,
    ) -> Result<Arc<dyn DataChannel>, RtcError>;

    fn restart_ice(&self);

    fn connection_state(&self) -> PeerConnectionState;

    fn ice_connection_state(&self) -> IceConnectionState;

    fn signaling_state(&self) -> SignalingState;

    fn current_local_description(&self) -> Option<SessionDescription>;

    fn current_remote_description(&self) -> Option<SessionDescription>;

    fn senders(&self) -> Vec<RtpSender>;

    fn remove_track(&self, sender: RtpSender) -> Result<(), RtcError>;

    fn close(&self);

    fn on_ice_candidate(&self, handler: Option<OnIceCandidate>);

    fn on_connection_state_change(&self, handler: Option<OnConnectionChange>);

    fn on_data_channel(&self, handler: Option<OnDataChannel>);

    fn on_track(&self, handler: Option<OnTrack>);
}

impl Debug for dyn PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("connection_state", &self.connection_state())
            .field("signaling_state", &self.signaling_state())
            .finish()
    }
}
