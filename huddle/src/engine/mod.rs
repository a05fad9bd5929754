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

//! The session engine.
//!
//! [`Engine`] owns the signaling link and both media transports of a
//! conference session. It translates signaling events into transport
//! actions, transport state into consumer events, and keeps the session
//! alive across network churn with soft (ICE restart) and full (rejoin)
//! reconnects.

use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use huddle_protocol as proto;
use huddle_rtc::{
    data_channel::DataChannelError,
    peer_connection::{MediaStream, MediaStreamTrack, RtpReceiver},
    session_description::{SdpParseError, SessionDescription},
    stats::RtcStats,
    RtcError,
};
use log::{error, info, trace};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot, Notify, RwLock as AsyncRwLock},
    task::JoinHandle,
};

use crate::{
    options::EngineOptions,
    signal::{SignalConnector, SignalError},
    DataPacketKind,
};

pub mod pending;
pub mod reconnect;
pub mod rtc_events;
pub mod transport;

mod session;

use huddle_rtc::peer_connection_factory::PeerConnectionFactory;
use reconnect::{reconnect_delay, AttemptSelector, MAX_RECONNECT_RETRIES, MAX_RECONNECT_TIMEOUT};
use session::{EngineSession, SessionEvent, SessionEvents};

pub use reconnect::MAX_ICE_CONNECT_TIMEOUT;
pub use session::{
    LOSSY_DC_LABEL, MAX_DATA_PACKET_SIZE, RELIABLE_DC_LABEL, TRACK_PUBLISH_TIMEOUT,
};

pub type EngineEmitter = mpsc::UnboundedSender<EngineEvent>;
pub type EngineEvents = mpsc::UnboundedReceiver<EngineEvent>;
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("signal failure: {0}")]
    Signal(#[from] SignalError),
    #[error("internal webrtc failure: {0}")]
    Rtc(#[from] RtcError),
    #[error("failed to parse sdp: {0}")]
    Parse(#[from] SdpParseError),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("failed to decode protobuf message: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("failed to send data to the datachannel: {0}")]
    Data(#[from] DataChannelError),
    #[error("track with cid {0} is already waiting for its publication")]
    DuplicatePublication(String),
    #[error("publish failure: {0}")]
    Publish(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events delivered to the consumer. The `ack` senders sequence the
/// reconnection handshake with the consumer's own state sync; everything
/// else is fire-and-forget.
#[derive(Debug)]
pub enum EngineEvent {
    Connected,
    Reconnecting,
    Reconnected,
    Disconnected {
        reason: proto::DisconnectReason,
    },
    /// The signal link is (re)established. On a resume the consumer is
    /// expected to submit its sync state before acking.
    SignalConnected {
        resume: bool,
        ack: oneshot::Sender<()>,
    },
    /// Transports are about to be torn down for a full reconnect.
    FullReconnecting {
        ack: oneshot::Sender<()>,
    },
    /// A reconnect completed and the session is usable again.
    PostReconnect {
        full_reconnect: bool,
        ack: oneshot::Sender<()>,
    },
    JoinResponse {
        response: proto::JoinResponse,
    },
    MediaTrack {
        track: MediaStreamTrack,
        streams: Vec<MediaStream>,
        receiver: RtpReceiver,
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
    RemoteMuteChanged {
        track_sid: String,
        muted: bool,
    },
    RoomUpdate {
        room: proto::Room,
    },
    Data {
        participant_sid: Option<String>,
        payload: Vec<u8>,
        topic: Option<String>,
        kind: DataPacketKind,
    },
    StreamStateUpdate {
        updates: Vec<proto::StreamStateInfo>,
    },
    SubscribedQualityUpdate {
        update: proto::SubscribedQualityUpdate,
    },
    SubscriptionPermissionUpdate {
        update: proto::SubscriptionPermissionUpdate,
    },
    LocalTrackUnpublished {
        track_sid: String,
    },
}

/// Session state retained for consumers building their sync state after a
/// reconnect.
#[derive(Default, Debug, Clone)]
pub struct LastInfo {
    /// Updated on the first join and on every full reconnect.
    pub join_response: proto::JoinResponse,

    pub subscriber_offer: Option<SessionDescription>,
    pub subscriber_answer: Option<SessionDescription>,

    pub data_channels_info: Vec<proto::DataChannelInfo>,
}

#[derive(Clone)]
struct SessionCredentials {
    url: String,
    token: String,
}

/// A running session with its event-dispatch task.
struct EngineHandle {
    session: EngineSession,
    engine_task: JoinHandle<()>,
    close_sender: oneshot::Sender<()>,
}

struct EngineInner {
    connector: Arc<dyn SignalConnector>,
    factory: Arc<dyn PeerConnectionFactory>,
    options: EngineOptions,
    emitter: EngineEmitter,

    state: Mutex<ConnectionState>,
    running_handle: AsyncRwLock<Option<EngineHandle>>,

    /// Captured on the first successful join, refreshed by the server and
    /// cleared on close.
    credentials: Mutex<Option<SessionCredentials>>,
    last_info: Mutex<LastInfo>,

    closed: AtomicBool,
    reconnecting: AtomicBool,
    full_reconnect_on_next: AtomicBool,
    reconnect_notifier: Arc<Notify>,
}

impl Debug for EngineInner {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("EngineInner")
            .field("state", &*self.state.lock())
            .field("closed", &self.closed)
            .field("reconnecting", &self.reconnecting)
            .finish()
    }
}

#[derive(Debug)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Joins a session. The engine state is `Connecting` until the primary
    /// transport reports its first ICE connect, at which point
    /// [`EngineEvent::Connected`] fires.
    pub async fn connect(
        connector: Arc<dyn SignalConnector>,
        factory: Arc<dyn PeerConnectionFactory>,
        url: &str,
        token: &str,
        options: EngineOptions,
    ) -> EngineResult<(Self, EngineEvents)> {
        let (emitter, engine_events) = mpsc::unbounded_channel();

        let inner = Arc::new(EngineInner {
            connector,
            factory,
            options,
            emitter,
            state: Mutex::new(ConnectionState::Disconnected),
            running_handle: Default::default(),
            credentials: Mutex::new(None),
            last_info: Default::default(),
            closed: Default::default(),
            reconnecting: Default::default(),
            full_reconnect_on_next: Default::default(),
            reconnect_notifier: Arc::new(Notify::new()),
        });

        inner.set_connection_state(ConnectionState::Connecting);
        if let Err(err) = inner.connect(url, token).await {
            inner.set_connection_state(ConnectionState::Disconnected);
            return Err(err);
        }

        Ok((Self { inner }, engine_events))
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    pub fn last_info(&self) -> LastInfo {
        self.inner.last_info.lock().clone()
    }

    /// Idempotent; at most one `Disconnected` event is ever emitted.
    pub async fn close(&self) {
        self.inner
            .close(proto::DisconnectReason::ClientInitiated, "client initiated")
            .await;
    }

    pub async fn publish_data(
        &self,
        data: &proto::DataPacket,
        kind: DataPacketKind,
    ) -> EngineResult<()> {
        self.inner.wait_reconnection().await?;
        let handle = self.inner.running_handle.read().await;
        let session = Self::session(&handle)?;
        session.publish_data(data, kind).await
    }

    /// Registers the publication, forwards the request to the server and
    /// resolves once the matching acknowledgment arrives.
    pub async fn add_track(&self, req: proto::AddTrackRequest) -> EngineResult<proto::TrackInfo> {
        self.inner.wait_reconnection().await?;
        let handle = self.inner.running_handle.read().await;
        let session = Self::session(&handle)?;
        session.add_track(req).await
    }

    pub async fn remove_track(&self, cid: &str) -> EngineResult<()> {
        self.inner.wait_reconnection().await?;
        let handle = self.inner.running_handle.read().await;
        let session = Self::session(&handle)?;
        session.remove_track(cid).await
    }

    pub async fn mute_track(&self, req: proto::MuteTrackRequest) -> EngineResult<()> {
        self.inner.wait_reconnection().await?;
        let handle = self.inner.running_handle.read().await;
        let session = Self::session(&handle)?;
        session.mute_track(req).await;
        Ok(())
    }

    pub async fn update_subscription_permissions(
        &self,
        req: proto::SubscriptionPermission,
    ) -> EngineResult<()> {
        self.inner.wait_reconnection().await?;
        let handle = self.inner.running_handle.read().await;
        let session = Self::session(&handle)?;
        session.update_subscription_permissions(req).await;
        Ok(())
    }

    /// Submits the current session state (subscriber answer, subscription,
    /// published tracks and data-channel infos) to the server.
    pub async fn send_sync_state(
        &self,
        subscription: proto::UpdateSubscription,
        publish_tracks: Vec<proto::TrackPublishedResponse>,
    ) -> EngineResult<()> {
        let handle = self.inner.running_handle.read().await;
        let session = Self::session(&handle)?;
        session.send_sync_state(subscription, publish_tracks).await
    }

    pub async fn get_publisher_stats(&self) -> EngineResult<Vec<RtcStats>> {
        self.inner.wait_reconnection().await?;
        let handle = self.inner.running_handle.read().await;
        let session = Self::session(&handle)?;
        session.get_publisher_stats().await
    }

    pub async fn get_subscriber_stats(&self) -> EngineResult<Vec<RtcStats>> {
        self.inner.wait_reconnection().await?;
        let handle = self.inner.running_handle.read().await;
        let session = Self::session(&handle)?;
        session.get_subscriber_stats().await
    }

    /// Kicks a publisher negotiation (used by the publication layer after
    /// attaching a sender). Coalesced by the transport.
    pub fn publisher_negotiation_needed(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if inner.wait_reconnection().await.is_ok() {
                if let Some(handle) = inner.running_handle.read().await.as_ref() {
                    handle.session.publisher_negotiation_needed();
                }
            }
        });
    }

    fn session<'a>(
        handle: &'a tokio::sync::RwLockReadGuard<'_, Option<EngineHandle>>,
    ) -> EngineResult<&'a EngineSession> {
        handle
            .as_ref()
            .map(|handle| &handle.session)
            .ok_or_else(|| EngineError::Connection("engine is not connected".to_owned()))
    }
}

impl EngineInner {
    async fn engine_task(
        self: Arc<Self>,
        mut session_events: SessionEvents,
        mut close_receiver: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                res = session_events.recv() => {
                    if let Some(event) = res {
                        if let Err(err) = self.on_session_event(event).await {
                            error!("failed to handle session event: {:?}", err);
                        }
                    }
                },
                _ = &mut close_receiver => {
                    trace!("closing engine task");
                    break;
                }
            }
        }
    }

    async fn on_session_event(self: &Arc<Self>, event: SessionEvent) -> EngineResult<()> {
        match event {
            SessionEvent::Close { source, reason, can_reconnect, full_reconnect } => {
                info!("received session close: {}, {:?}", source, reason);
                if can_reconnect {
                    self.try_reconnect(full_reconnect);
                } else {
                    // close() waits for the engine task this handler runs
                    // on, so it has to happen elsewhere.
                    tokio::spawn({
                        let inner = self.clone();
                        async move {
                            inner.close(reason, "session closed by server").await;
                        }
                    });
                }
            }
            SessionEvent::TransportsConnected => {
                if self.set_connection_state(ConnectionState::Connected) {
                    if let Some(handle) = self.running_handle.read().await.as_ref() {
                        handle.session.signal().on_pc_connected().await;
                    }
                }
            }
            SessionEvent::RefreshToken { token } => {
                if let Some(credentials) = self.credentials.lock().as_mut() {
                    credentials.token = token;
                }
            }
            SessionEvent::Data { participant_sid, payload, topic, kind } => {
                let _ =
                    self.emitter.send(EngineEvent::Data { participant_sid, payload, topic, kind });
            }
            SessionEvent::MediaTrack { event } => {
                let _ = self.emitter.send(EngineEvent::MediaTrack {
                    track: event.track,
                    streams: event.streams,
                    receiver: event.receiver,
                });
            }
            SessionEvent::ParticipantUpdate { updates } => {
                let _ = self.emitter.send(EngineEvent::ParticipantUpdate { updates });
            }
            SessionEvent::SpeakersChanged { speakers } => {
                let _ = self.emitter.send(EngineEvent::SpeakersChanged { speakers });
            }
            SessionEvent::ActiveSpeakers { speakers } => {
                let _ = self.emitter.send(EngineEvent::ActiveSpeakers { speakers });
            }
            SessionEvent::ConnectionQuality { updates } => {
                let _ = self.emitter.send(EngineEvent::ConnectionQuality { updates });
            }
            SessionEvent::RoomUpdate { room } => {
                let _ = self.emitter.send(EngineEvent::RoomUpdate { room });
            }
            SessionEvent::LocalTrackUnpublished { track_sid } => {
                let _ = self.emitter.send(EngineEvent::LocalTrackUnpublished { track_sid });
            }
            SessionEvent::RemoteMuteChanged { track_sid, muted } => {
                let _ = self.emitter.send(EngineEvent::RemoteMuteChanged { track_sid, muted });
            }
            SessionEvent::StreamStateUpdate { updates } => {
                let _ = self.emitter.send(EngineEvent::StreamStateUpdate { updates });
            }
            SessionEvent::SubscribedQualityUpdate { update } => {
                let _ = self.emitter.send(EngineEvent::SubscribedQualityUpdate { update });
            }
            SessionEvent::SubscriptionPermissionUpdate { update } => {
                let _ = self.emitter.send(EngineEvent::SubscriptionPermissionUpdate { update });
            }
        }

        Ok(())
    }

    async fn connect(self: &Arc<Self>, url: &str, token: &str) -> EngineResult<()> {
        let mut running_handle = self.running_handle.write().await;
        if running_handle.is_some() {
            return Err(EngineError::Internal("engine is already connected".to_owned()));
        }

        let (session, session_events) = EngineSession::connect(
            &self.connector,
            &self.factory,
            url,
            token,
            self.options.clone(),
        )
        .await?;
        let join_response = session.join_response().clone();

        let (close_sender, close_receiver) = oneshot::channel();
        let engine_task = tokio::spawn(self.clone().engine_task(session_events, close_receiver));

        *running_handle = Some(EngineHandle { session, engine_task, close_sender });
        drop(running_handle);

        *self.credentials.lock() =
            Some(SessionCredentials { url: url.to_owned(), token: token.to_owned() });

        // The join response changes on every full reconnect.
        self.update_last_info().await;
        let _ = self.emitter.send(EngineEvent::JoinResponse { response: join_response });

        Ok(())
    }

    async fn update_last_info(&self) {
        if let Some(handle) = self.running_handle.read().await.as_ref() {
            let subscriber_offer = handle
                .session
                .subscriber()
                .peer_connection()
                .current_remote_description();
            let subscriber_answer = handle.session.subscriber_answer().await.unwrap_or(None);

            let mut last_info = self.last_info.lock();
            last_info.join_response = handle.session.join_response().clone();
            last_info.subscriber_offer = subscriber_offer;
            last_info.subscriber_answer = subscriber_answer;
            last_info.data_channels_info = handle.session.data_channels_info();
        }
    }

    /// Serialized state setter; equal-value transitions are suppressed and
    /// every real transition emits its event exactly once.
    fn set_connection_state(&self, target: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if *state == target {
            return false;
        }

        // CONNECTED is only reachable from an ongoing (re)connection.
        if target == ConnectionState::Connected
            && !matches!(*state, ConnectionState::Connecting | ConnectionState::Reconnecting)
        {
            return false;
        }

        let previous = *state;
        *state = target;
        drop(state);

        match (previous, target) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                let _ = self.emitter.send(EngineEvent::Connected);
            }
            (ConnectionState::Reconnecting, ConnectionState::Connected) => {
                let _ = self.emitter.send(EngineEvent::Reconnected);
            }
            (_, ConnectionState::Reconnecting) => {
                let _ = self.emitter.send(EngineEvent::Reconnecting);
            }
            _ => {}
        }

        true
    }

    async fn terminate_session(&self, reason: &str) -> bool {
        // The write guard must not be held while awaiting the engine task:
        // the task itself takes read locks while dispatching events.
        let handle = self.running_handle.write().await.take();
        if let Some(handle) = handle {
            handle.session.close(reason).await;
            let _ = handle.close_sender.send(());
            let _ = handle.engine_task.await;
            return true;
        }
        false
    }

    async fn close(&self, reason: proto::DisconnectReason, source: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.credentials.lock().take();
        self.terminate_session(source).await;

        let was_active = {
            let mut state = self.state.lock();
            let previous = *state;
            *state = ConnectionState::Disconnected;
            previous != ConnectionState::Disconnected
        };

        if was_active {
            let _ = self.emitter.send(EngineEvent::Disconnected { reason });
        }
    }

    /// Waits for an in-flight reconnection before touching the session.
    async fn wait_reconnection(&self) -> EngineResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Connection("engine is closed".to_owned()));
        }

        if self.reconnecting.load(Ordering::Acquire) {
            self.reconnect_notifier.notified().await;
        }

        if self.running_handle.read().await.is_none() {
            return Err(EngineError::Connection("reconnection failed".to_owned()));
        }

        Ok(())
    }

    /// Starts the reconnect task unless one is already running; a second
    /// trigger only records the full-reconnect request.
    fn try_reconnect(self: &Arc<Self>, full_reconnect: bool) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        if full_reconnect {
            self.full_reconnect_on_next.store(true, Ordering::Release);
        }

        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        self.set_connection_state(ConnectionState::Reconnecting);

        tokio::spawn({
            let inner = self.clone();
            async move {
                let res = inner.reconnect_task().await;
                inner.reconnecting.store(false, Ordering::Release);

                if res.is_ok() {
                    info!("engine successfully reconnected");
                } else {
                    error!("failed to reconnect after {} attempts", MAX_RECONNECT_RETRIES);
                    inner.close(proto::DisconnectReason::UnknownReason, "Failed reconnecting").await;
                }

                inner.reconnect_notifier.notify_waiters();
            }
        });
    }

    /// The retry loop: bounded by both an attempt count and a wall-clock
    /// budget, re-checking `closed` after every suspension point.
    async fn reconnect_task(self: &Arc<Self>) -> EngineResult<()> {
        self.update_last_info().await;

        let mut selector = AttemptSelector::new(
            self.options.reconnect_policy,
            self.full_reconnect_on_next.swap(false, Ordering::AcqRel),
        );
        let started = Instant::now();

        for attempt in 0..MAX_RECONNECT_RETRIES {
            if self.closed.load(Ordering::Acquire) {
                return Ok(());
            }
            if started.elapsed() >= MAX_RECONNECT_TIMEOUT {
                break;
            }

            tokio::time::sleep(reconnect_delay(attempt)).await;
            if self.closed.load(Ordering::Acquire) {
                return Ok(());
            }

            // Credentials carry the latest refreshed token.
            let Some(credentials) = self.credentials.lock().clone() else {
                return Err(EngineError::Connection("no session credentials".to_owned()));
            };

            let full = selector.is_full();
            let result = if full {
                info!("restarting connection... attempt: {}", attempt);
                self.try_restart_connection(&credentials.url, &credentials.token).await
            } else {
                info!("resuming connection... attempt: {}", attempt);
                self.try_resume_connection(&credentials.url, &credentials.token).await
            };

            match result {
                Ok(()) => {
                    if self.set_connection_state(ConnectionState::Connected) {
                        if let Some(handle) = self.running_handle.read().await.as_ref() {
                            handle.session.signal().on_pc_connected().await;
                        }
                    }

                    let (tx, rx) = oneshot::channel();
                    let _ = self
                        .emitter
                        .send(EngineEvent::PostReconnect { full_reconnect: full, ack: tx });
                    let _ = rx.await;

                    return Ok(());
                }
                Err(err) => {
                    if full {
                        error!("restarting connection failed: {:?}", err);
                    } else {
                        error!("resuming connection failed: {:?}", err);
                        selector.soft_failed();
                    }
                }
            }
        }

        Err(EngineError::Connection("failed to reconnect".to_owned()))
    }

    /// Full reconnect: tears the session down and joins from scratch.
    async fn try_restart_connection(
        self: &Arc<Self>,
        url: &str,
        token: &str,
    ) -> EngineResult<()> {
        self.terminate_session("full reconnect").await;

        let (tx, rx) = oneshot::channel();
        let _ = self.emitter.send(EngineEvent::FullReconnecting { ack: tx });
        let _ = rx.await;

        self.connect(url, token).await?;

        let (tx, rx) = oneshot::channel();
        let _ = self.emitter.send(EngineEvent::SignalConnected { resume: false, ack: tx });
        let _ = rx.await;

        let handle = self.running_handle.read().await;
        let session = handle
            .as_ref()
            .map(|handle| &handle.session)
            .ok_or_else(|| EngineError::Connection("session closed during reconnect".to_owned()))?;
        session.wait_pc_connection().await
    }

    /// Soft reconnect: keeps the transports, resumes the signal session and
    /// restarts ICE.
    async fn try_resume_connection(&self, url: &str, token: &str) -> EngineResult<()> {
        let handle = self.running_handle.read().await;
        let session = handle
            .as_ref()
            .map(|handle| &handle.session)
            .ok_or_else(|| EngineError::Connection("session closed during reconnect".to_owned()))?;

        session.restart(url, token).await?;

        let (tx, rx) = oneshot::channel();
        let _ = self.emitter.send(EngineEvent::SignalConnected { resume: true, ack: tx });
        // The consumer submits its sync state before acking.
        let _ = rx.await;

        // The publisher offer must go out after the sync state.
        session.restart_publisher().await?;
        session.wait_pc_connection().await
    }
}
