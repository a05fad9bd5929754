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

//! The signaling side of a session.
//!
//! The engine does not own a websocket; it talks to a [`SignalLink`]
//! provided by the embedding application (or a test double). The link is
//! expected to be safe for sequential command submission from a single
//! caller; the engine guarantees that discipline.

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use huddle_protocol as proto;
use thiserror::Error;
use tokio::sync::mpsc;

pub type SignalEmitter = mpsc::UnboundedSender<SignalEvent>;
pub type SignalEvents = mpsc::UnboundedReceiver<SignalEvent>;
pub type SignalResult<T> = Result<T, SignalError>;

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("signal transport failure: {0}")]
    Transport(String),
    #[error("failed to decode messages from server")]
    ProtoParse(#[from] prost::DecodeError),
    #[error("{0}")]
    Timeout(String),
    #[error("failed to send message to server")]
    SendError,
}

#[derive(Debug, Clone)]
pub struct SignalOptions {
    pub auto_subscribe: bool,
    pub adaptive_stream: bool,
}

impl Default for SignalOptions {
    fn default() -> Self {
        Self { auto_subscribe: true, adaptive_stream: false }
    }
}

/// Outcome of a resume attempt: the server either accepts the session
/// resume or demands a fresh join.
#[derive(Debug)]
pub enum ResumeOutcome {
    Resumed(proto::ReconnectResponse),
    MustFullReconnect,
}

/// Events delivered by the link. All payloads are already decoded; the
/// wire codec lives behind the [`SignalConnector`].
#[derive(Debug)]
pub enum SignalEvent {
    Answer(proto::SessionDescription),
    Offer(proto::SessionDescription),
    Trickle {
        /// JSON-encoded candidate init (camelCase members), as sent by the
        /// server out of band from the SDP exchange.
        candidate_init: String,
        target: proto::SignalTarget,
    },
    LocalTrackPublished(proto::TrackPublishedResponse),
    LocalTrackUnpublished {
        track_sid: String,
    },
    ParticipantUpdate {
        updates: Vec<proto::ParticipantInfo>,
    },
    SpeakersChanged {
        speakers: Vec<proto::SpeakerInfo>,
    },
    ActiveSpeakers {
        speakers: Vec<proto::SpeakerInfo>,
    },
    ConnectionQuality {
        updates: Vec<proto::ConnectionQualityInfo>,
    },
    RoomUpdate {
        room: proto::Room,
    },
    MuteChanged {
        track_sid: String,
        muted: bool,
    },
    StreamStateUpdate {
        updates: Vec<proto::StreamStateInfo>,
    },
    SubscribedQualityUpdate(proto::SubscribedQualityUpdate),
    SubscriptionPermissionUpdate(proto::SubscriptionPermissionUpdate),
    RefreshToken {
        token: String,
    },
    Leave {
        can_reconnect: bool,
        reason: proto::DisconnectReason,
    },
    Close {
        reason: String,
        code: u16,
    },
    Error {
        error: SignalError,
    },
}

/// Dials the server and performs the join handshake.
#[async_trait]
pub trait SignalConnector: Send + Sync {
    async fn join(
        &self,
        url: &str,
        token: &str,
        options: SignalOptions,
    ) -> SignalResult<(Arc<dyn SignalLink>, proto::JoinResponse, SignalEvents)>;
}

/// An established, bidirectional signaling channel to the server.
#[async_trait]
pub trait SignalLink: Send + Sync {
    /// Resumes the session identified by `participant_sid` over a fresh
    /// stream, reusing the existing transports on success.
    async fn reconnect(
        &self,
        url: &str,
        token: &str,
        participant_sid: &str,
    ) -> SignalResult<ResumeOutcome>;

    /// Tells the server the join response was consumed and the client is
    /// ready for the remaining responses.
    async fn on_ready_for_responses(&self);

    /// Tells the link the primary peer connection reached the connected
    /// state (flushes any queued requests).
    async fn on_pc_connected(&self);

    async fn send_add_track(&self, req: proto::AddTrackRequest);

    async fn send_mute_track(&self, req: proto::MuteTrackRequest);

    async fn send_update_subscription_permissions(&self, req: proto::SubscriptionPermission);

    async fn send_answer(&self, answer: proto::SessionDescription);

    async fn send_offer(&self, offer: proto::SessionDescription);

    async fn send_trickle(&self, target: proto::SignalTarget, candidate_init: String);

    async fn send_sync_state(&self, state: proto::SyncState);

    /// Notifies the server the client is leaving for good.
    async fn send_leave(&self);

    async fn close(&self, reason: &str);
}

impl Debug for dyn SignalLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalLink").finish()
    }
}
