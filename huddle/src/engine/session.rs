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

use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use huddle_protocol as proto;
use huddle_rtc::prelude::*;
use log::{debug, error, warn};
use parking_lot::Mutex;
use prost::Message;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::sleep,
};

use super::{
    pending::PendingTrackRegistry,
    reconnect::MAX_ICE_CONNECT_TIMEOUT,
    rtc_events::{self, RtcEvent, RtcEvents},
    transport::Transport,
    EngineError, EngineResult,
};
use crate::{
    options::EngineOptions,
    signal::{ResumeOutcome, SignalConnector, SignalEvent, SignalEvents, SignalLink},
    DataPacketKind,
};

pub const LOSSY_DC_LABEL: &str = "_lossy";
pub const RELIABLE_DC_LABEL: &str = "_reliable";
pub const MAX_DATA_PACKET_SIZE: usize = 15_000;
pub const TRACK_PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

const CONNECTION_POLL_INTERVAL: Duration = Duration::from_millis(50);

const DEFAULT_STUN_SERVERS: &[&str] =
    &["stun:stun.l.google.com:19302", "stun:stun1.l.google.com:19302"];

pub(crate) type SessionEmitter = mpsc::UnboundedSender<SessionEvent>;
pub(crate) type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

#[derive(Debug)]
pub(crate) enum SessionEvent {
    Close {
        source: String,
        reason: proto::DisconnectReason,
        can_reconnect: bool,
        full_reconnect: bool,
    },
    /// The primary transport (and the publisher when publishing) reached
    /// the connected ICE state.
    TransportsConnected,
    Data {
        participant_sid: Option<String>,
        payload: Vec<u8>,
        topic: Option<String>,
        kind: DataPacketKind,
    },
    MediaTrack {
        event: TrackEvent,
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
    LocalTrackUnpublished {
        track_sid: String,
    },
    RemoteMuteChanged {
        track_sid: String,
        muted: bool,
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
    RefreshToken {
        token: String,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IceCandidateJson {
    pub sdp_mid: String,
    pub sdp_m_line_index: i32,
    pub candidate: String,
}

/// Fields shared with the signal and rtc tasks.
struct SessionInner {
    signal: Arc<dyn SignalLink>,
    join_response: proto::JoinResponse,
    subscriber_primary: bool,
    options: EngineOptions,

    has_published: AtomicBool,

    publisher: Arc<Transport>,
    subscriber: Arc<Transport>,

    pending_tracks: PendingTrackRegistry,

    // Outbound channels, created on the publisher at construction.
    lossy_dc: Arc<dyn DataChannel>,
    reliable_dc: Arc<dyn DataChannel>,

    // Inbound channels, delivered lazily by the subscriber transport when
    // the server is subscriber-primary.
    sub_lossy_dc: Mutex<Option<Arc<dyn DataChannel>>>,
    sub_reliable_dc: Mutex<Option<Arc<dyn DataChannel>>>,

    closed: AtomicBool,
    emitter: SessionEmitter,
}

struct SessionHandle {
    close_tx: watch::Sender<bool>,
    signal_task: JoinHandle<()>,
    rtc_task: JoinHandle<()>,
}

/// One conference session: a signal link plus its two transports. A new
/// session is built on join (and on every full reconnect) and dropped on
/// close.
pub(crate) struct EngineSession {
    inner: Arc<SessionInner>,
    handle: Mutex<Option<SessionHandle>>,
}

impl Debug for EngineSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSession")
            .field("subscriber_primary", &self.inner.subscriber_primary)
            .finish()
    }
}

impl EngineSession {
    pub(crate) async fn connect(
        connector: &Arc<dyn SignalConnector>,
        factory: &Arc<dyn PeerConnectionFactory>,
        url: &str,
        token: &str,
        options: EngineOptions,
    ) -> EngineResult<(Self, SessionEvents)> {
        let (emitter, session_events) = mpsc::unbounded_channel();

        let (signal, join_response, signal_events) =
            connector.join(url, token, options.signal_options.clone()).await?;
        debug!("received join response: {:?}", join_response);

        let rtc_config = make_rtc_config_join(&join_response, &options);
        let subscriber_primary = join_response.subscriber_primary;

        let publisher = Arc::new(Transport::new(
            factory.create_peer_connection(rtc_config.clone())?,
            proto::SignalTarget::Publisher,
        ));
        let subscriber = Arc::new(Transport::new(
            factory.create_peer_connection(rtc_config)?,
            proto::SignalTarget::Subscriber,
        ));

        let lossy_dc = publisher.peer_connection().create_data_channel(
            LOSSY_DC_LABEL,
            DataChannelInit { ordered: true, max_retransmits: Some(0), ..Default::default() },
        )?;
        let reliable_dc = publisher
            .peer_connection()
            .create_data_channel(RELIABLE_DC_LABEL, DataChannelInit::default())?;

        let (rtc_emitter, rtc_events) = mpsc::unbounded_channel();
        rtc_events::forward_pc_events(&publisher, rtc_emitter.clone());
        rtc_events::forward_pc_events(&subscriber, rtc_emitter.clone());
        rtc_events::forward_dc_events(&lossy_dc, rtc_emitter.clone());
        rtc_events::forward_dc_events(&reliable_dc, rtc_emitter);

        let (close_tx, close_rx) = watch::channel(false);

        let inner = Arc::new(SessionInner {
            signal,
            join_response,
            subscriber_primary,
            options,
            has_published: Default::default(),
            publisher,
            subscriber,
            pending_tracks: PendingTrackRegistry::new(),
            lossy_dc,
            reliable_dc,
            sub_lossy_dc: Mutex::new(None),
            sub_reliable_dc: Mutex::new(None),
            closed: Default::default(),
            emitter,
        });

        let signal_task =
            tokio::spawn(inner.clone().signal_task(signal_events, close_rx.clone()));
        let rtc_task = tokio::spawn(inner.clone().rtc_task(rtc_events, close_rx));

        // The server only negotiates the subscriber on its own; when the
        // publisher is primary the initial offer comes from us.
        if !subscriber_primary {
            inner.publisher.negotiate();
        }

        inner.signal.on_ready_for_responses().await;

        let handle = Mutex::new(Some(SessionHandle { close_tx, signal_task, rtc_task }));
        Ok((Self { inner, handle }, session_events))
    }

    pub(crate) fn join_response(&self) -> &proto::JoinResponse {
        &self.inner.join_response
    }

    pub(crate) fn signal(&self) -> &Arc<dyn SignalLink> {
        &self.inner.signal
    }

    pub(crate) fn subscriber(&self) -> &Arc<Transport> {
        &self.inner.subscriber
    }

    /// Marks publishing active and kicks a (coalesced) publisher
    /// negotiation.
    pub(crate) fn publisher_negotiation_needed(&self) {
        self.inner.publisher_negotiation_needed();
    }

    pub(crate) async fn add_track(
        &self,
        req: proto::AddTrackRequest,
    ) -> EngineResult<proto::TrackInfo> {
        self.inner.add_track(req).await
    }

    pub(crate) async fn remove_track(&self, cid: &str) -> EngineResult<()> {
        self.inner.remove_track(cid).await
    }

    pub(crate) async fn mute_track(&self, req: proto::MuteTrackRequest) {
        self.inner.signal.send_mute_track(req).await;
    }

    pub(crate) async fn update_subscription_permissions(
        &self,
        req: proto::SubscriptionPermission,
    ) {
        self.inner.signal.send_update_subscription_permissions(req).await;
    }

    pub(crate) async fn publish_data(
        &self,
        data: &proto::DataPacket,
        kind: DataPacketKind,
    ) -> EngineResult<()> {
        self.inner.publish_data(data, kind).await
    }

    pub(crate) async fn send_sync_state(
        &self,
        subscription: proto::UpdateSubscription,
        publish_tracks: Vec<proto::TrackPublishedResponse>,
    ) -> EngineResult<()> {
        self.inner.send_sync_state(subscription, publish_tracks).await
    }

    /// Resumes the signaling session in place, reusing both transports.
    pub(crate) async fn restart(&self, url: &str, token: &str) -> EngineResult<()> {
        self.inner.restart(url, token).await
    }

    /// Re-offers the publisher with an ICE restart; part of the soft
    /// reconnect sequence, after sync state went out.
    pub(crate) async fn restart_publisher(&self) -> EngineResult<()> {
        self.inner.restart_publisher().await
    }

    pub(crate) async fn wait_pc_connection(&self) -> EngineResult<()> {
        self.inner.wait_pc_connection().await
    }

    pub(crate) async fn get_publisher_stats(&self) -> EngineResult<Vec<RtcStats>> {
        self.inner.publisher.get_stats().await
    }

    pub(crate) async fn get_subscriber_stats(&self) -> EngineResult<Vec<RtcStats>> {
        self.inner.subscriber.get_stats().await
    }

    pub(crate) async fn subscriber_answer(&self) -> EngineResult<Option<SessionDescription>> {
        self.inner.subscriber.local_description().await
    }

    pub(crate) fn data_channels_info(&self) -> Vec<proto::DataChannelInfo> {
        self.inner.data_channels_info()
    }

    /// Closes the signal link, both transports and every data channel.
    /// The event tasks are stopped first so no operation races teardown.
    pub(crate) async fn close(&self, reason: &str) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.close_tx.send(true);
            let _ = handle.signal_task.await;
            let _ = handle.rtc_task.await;
        }

        self.inner.close(reason).await;
    }
}

impl SessionInner {
    async fn signal_task(
        self: Arc<Self>,
        mut signal_events: SignalEvents,
        mut close_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                Some(event) = signal_events.recv() => {
                    match event {
                        SignalEvent::Close { reason, code } => {
                            if !self.closed.load(Ordering::Acquire) {
                                self.on_session_disconnected(
                                    &format!("signal link closed: {} ({})", reason, code),
                                    proto::DisconnectReason::UnknownReason,
                                    true,
                                    false,
                                );
                            }
                        }
                        event => {
                            if let Err(err) = self.on_signal_event(event).await {
                                warn!("failed to handle signal event: {:?}", err);
                            }
                        }
                    }
                },
                _ = close_rx.changed() => break,
            }
        }

        debug!("closing signal_task");
    }

    async fn rtc_task(
        self: Arc<Self>,
        mut rtc_events: RtcEvents,
        mut close_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                Some(event) = rtc_events.recv() => {
                    if let Err(err) = self.on_rtc_event(event).await {
                        warn!("failed to handle rtc event: {:?}", err);
                    }
                },
                _ = close_rx.changed() => break,
            }
        }

        debug!("closing rtc_task");
    }

    async fn on_signal_event(&self, event: SignalEvent) -> EngineResult<()> {
        match event {
            SignalEvent::Answer(answer) => {
                debug!("received publisher answer: {:?}", answer);
                let answer = parse_proto_description(&answer)?;
                if let Err(err) = self.publisher.set_remote_description(answer).await {
                    // Not fatal for the session; a reconnect may follow.
                    error!("failed to apply publisher answer: {:?}", err);
                }
            }
            SignalEvent::Offer(offer) => {
                debug!("received subscriber offer: {:?}", offer);
                if self.closed.load(Ordering::Acquire) {
                    return Ok(());
                }

                let offer = parse_proto_description(&offer)?;
                let answer =
                    self.subscriber.create_answer(offer, AnswerOptions::default()).await?;

                if self.closed.load(Ordering::Acquire) {
                    return Ok(());
                }

                self.signal
                    .send_answer(proto::SessionDescription {
                        r#type: "answer".to_owned(),
                        sdp: answer.to_string(),
                    })
                    .await;
            }
            SignalEvent::Trickle { candidate_init, target } => {
                let json = serde_json::from_str::<IceCandidateJson>(&candidate_init)?;
                let ice_candidate =
                    IceCandidate::parse(&json.sdp_mid, json.sdp_m_line_index, &json.candidate)?;
                debug!("remote ice_candidate {:?} {:?}", ice_candidate, target);

                if target == proto::SignalTarget::Publisher {
                    self.publisher.add_ice_candidate(ice_candidate).await?;
                } else {
                    self.subscriber.add_ice_candidate(ice_candidate).await?;
                }
            }
            SignalEvent::LocalTrackPublished(response) => {
                let Some(track) = response.track else {
                    warn!("TrackPublished response without track info: {}", response.cid);
                    return Ok(());
                };

                if !self.pending_tracks.complete(&response.cid, track) {
                    warn!("received TrackPublished for unknown cid: {}", response.cid);
                }
            }
            SignalEvent::LocalTrackUnpublished { track_sid } => {
                let _ = self.emitter.send(SessionEvent::LocalTrackUnpublished { track_sid });
            }
            SignalEvent::ParticipantUpdate { updates } => {
                let _ = self.emitter.send(SessionEvent::ParticipantUpdate { updates });
            }
            SignalEvent::SpeakersChanged { speakers } => {
                let _ = self.emitter.send(SessionEvent::SpeakersChanged { speakers });
            }
            SignalEvent::ActiveSpeakers { speakers } => {
                let _ = self.emitter.send(SessionEvent::ActiveSpeakers { speakers });
            }
            SignalEvent::ConnectionQuality { updates } => {
                let _ = self.emitter.send(SessionEvent::ConnectionQuality { updates });
            }
            SignalEvent::RoomUpdate { room } => {
                let _ = self.emitter.send(SessionEvent::RoomUpdate { room });
            }
            SignalEvent::MuteChanged { track_sid, muted } => {
                let _ = self.emitter.send(SessionEvent::RemoteMuteChanged { track_sid, muted });
            }
            SignalEvent::StreamStateUpdate { updates } => {
                let _ = self.emitter.send(SessionEvent::StreamStateUpdate { updates });
            }
            SignalEvent::SubscribedQualityUpdate(update) => {
                let _ = self.emitter.send(SessionEvent::SubscribedQualityUpdate { update });
            }
            SignalEvent::SubscriptionPermissionUpdate(update) => {
                let _ = self.emitter.send(SessionEvent::SubscriptionPermissionUpdate { update });
            }
            SignalEvent::RefreshToken { token } => {
                let _ = self.emitter.send(SessionEvent::RefreshToken { token });
            }
            SignalEvent::Leave { can_reconnect, reason } => {
                debug!("received leave: can_reconnect={} reason={:?}", can_reconnect, reason);
                // A recoverable leave forces the next attempt to rejoin
                // from scratch.
                self.on_session_disconnected(
                    "server request to leave",
                    reason,
                    can_reconnect,
                    true,
                );
            }
            SignalEvent::Error { error } => {
                warn!("signal link error: {:?}", error);
            }
            SignalEvent::Close { .. } => unreachable!("handled by signal_task"),
        }

        Ok(())
    }

    async fn on_rtc_event(&self, event: RtcEvent) -> EngineResult<()> {
        match event {
            RtcEvent::IceCandidate { ice_candidate, target } => {
                debug!("local ice_candidate {:?} {:?}", ice_candidate, target);
                let candidate_init = serde_json::to_string(&IceCandidateJson {
                    sdp_mid: ice_candidate.sdp_mid(),
                    sdp_m_line_index: ice_candidate.sdp_mline_index(),
                    candidate: ice_candidate.candidate(),
                })?;

                self.signal.send_trickle(target, candidate_init).await;
            }
            RtcEvent::ConnectionChange { state, target } => {
                debug!("connection change, {:?} {:?}", state, target);
                match state {
                    PeerConnectionState::Connected => {
                        if self.transports_connected() {
                            let _ = self.emitter.send(SessionEvent::TransportsConnected);
                        }
                    }
                    PeerConnectionState::Disconnected | PeerConnectionState::Failed => {
                        let is_primary = target == self.primary_target();
                        // A dead publisher matters even when non-primary,
                        // as long as something is being published over it.
                        let publisher_down = target == proto::SignalTarget::Publisher
                            && self.subscriber_primary
                            && self.has_published.load(Ordering::Acquire);

                        if is_primary || publisher_down {
                            self.on_session_disconnected(
                                &format!("{:?} pc state {:?}", target, state),
                                proto::DisconnectReason::UnknownReason,
                                true,
                                false,
                            );
                        }
                    }
                    _ => {}
                }
            }
            RtcEvent::DataChannel { data_channel, target } => {
                debug!("received data channel: {} {:?}", data_channel.label(), target);
                if target == proto::SignalTarget::Subscriber {
                    match data_channel.label().as_str() {
                        LOSSY_DC_LABEL => {
                            self.sub_lossy_dc.lock().replace(data_channel);
                        }
                        RELIABLE_DC_LABEL => {
                            self.sub_reliable_dc.lock().replace(data_channel);
                        }
                        label => debug!("ignoring unknown data channel label: {}", label),
                    }
                }
            }
            RtcEvent::Offer { offer, target: _ } => {
                debug!("sending publisher offer: {:?}", offer);
                self.signal
                    .send_offer(proto::SessionDescription {
                        r#type: "offer".to_owned(),
                        sdp: offer.to_string(),
                    })
                    .await;
            }
            RtcEvent::Track { event, target: _ } => {
                let _ = self.emitter.send(SessionEvent::MediaTrack { event });
            }
            RtcEvent::Data { data, binary } => {
                if !binary {
                    return Err(EngineError::Internal(
                        "text data channel messages aren't supported".to_owned(),
                    ));
                }

                self.on_data_packet(&data);
            }
        }

        Ok(())
    }

    /// Inbound packets are length-prefixed protobufs; anything malformed
    /// or empty is dropped.
    fn on_data_packet(&self, data: &[u8]) {
        let packet = match proto::DataPacket::decode_length_delimited(data) {
            Ok(packet) => packet,
            Err(err) => {
                debug!("dropping malformed data packet: {:?}", err);
                return;
            }
        };

        let kind = DataPacketKind::from(packet.kind());
        match packet.value {
            Some(proto::data_packet::Value::User(user)) => {
                let participant_sid =
                    (!user.participant_sid.is_empty()).then(|| user.participant_sid.clone());

                let _ = self.emitter.send(SessionEvent::Data {
                    participant_sid,
                    payload: user.payload,
                    topic: user.topic,
                    kind,
                });
            }
            Some(proto::data_packet::Value::Speaker(update)) => {
                let _ =
                    self.emitter.send(SessionEvent::ActiveSpeakers { speakers: update.speakers });
            }
            None => {
                debug!("dropping empty data packet");
            }
        }
    }

    fn publisher_negotiation_needed(&self) {
        self.has_published.store(true, Ordering::Release);
        self.publisher.negotiate();
    }

    async fn add_track(&self, req: proto::AddTrackRequest) -> EngineResult<proto::TrackInfo> {
        let cid = req.cid.clone();
        let rx = self.pending_tracks.register(&cid)?;

        self.signal.send_add_track(req).await;

        tokio::select! {
            res = rx => match res {
                Ok(info) => Ok(info),
                Err(_) => Err(EngineError::Connection("track publication cancelled".to_owned())),
            },
            _ = sleep(TRACK_PUBLISH_TIMEOUT) => {
                self.pending_tracks.remove(&cid);
                Err(EngineError::Connection(
                    "track publication timed out, no response received from the server".to_owned(),
                ))
            },
        }
    }

    async fn remove_track(&self, cid: &str) -> EngineResult<()> {
        self.pending_tracks.remove(cid);

        let cid = cid.to_owned();
        self.publisher
            .with_peer_connection(move |pc| async move {
                for sender in pc.senders() {
                    if sender.track_id.as_deref() == Some(cid.as_str()) {
                        pc.remove_track(sender)?;
                    }
                }
                Ok::<_, RtcError>(())
            })
            .await??;

        Ok(())
    }

    async fn publish_data(
        &self,
        data: &proto::DataPacket,
        kind: DataPacketKind,
    ) -> EngineResult<()> {
        let payload = data.encode_length_delimited_to_vec();
        if payload.len() > MAX_DATA_PACKET_SIZE {
            return Err(EngineError::Publish(format!(
                "data packet exceeds the maximum size of {} bytes",
                MAX_DATA_PACKET_SIZE
            )));
        }

        self.ensure_publisher_connected(kind).await?;

        let dc = self
            .data_channel(proto::SignalTarget::Publisher, kind)
            .ok_or_else(|| EngineError::Publish(format!("no data channel for kind {:?}", kind)))?;
        dc.send(&payload, true)?;

        Ok(())
    }

    /// Ensures the publisher transport and the outbound channel for `kind`
    /// are usable, negotiating the publisher first when the subscriber is
    /// primary and nothing was published yet.
    async fn ensure_publisher_connected(&self, kind: DataPacketKind) -> EngineResult<()> {
        if self.subscriber_primary
            && !self.publisher.is_connected()
            && self.publisher.ice_connection_state() != IceConnectionState::Checking
        {
            self.publisher_negotiation_needed();
        }

        let dc = self
            .data_channel(proto::SignalTarget::Publisher, kind)
            .ok_or_else(|| EngineError::Publish(format!("no data channel for kind {:?}", kind)))?;
        if dc.state() == DataChannelState::Open {
            return Ok(());
        }

        let wait_connected = async {
            while !self.publisher.is_connected() || dc.state() != DataChannelState::Open {
                if self.closed.load(Ordering::Acquire) {
                    return Err(EngineError::Connection("session closed".to_owned()));
                }

                sleep(CONNECTION_POLL_INTERVAL).await;
            }

            Ok(())
        };

        tokio::select! {
            res = wait_connected => res,
            _ = sleep(MAX_ICE_CONNECT_TIMEOUT) => {
                let err = EngineError::Connection(
                    "could not establish publisher connection: timeout".to_owned(),
                );
                error!("{}", err);
                Err(err)
            }
        }
    }

    async fn send_sync_state(
        &self,
        subscription: proto::UpdateSubscription,
        publish_tracks: Vec<proto::TrackPublishedResponse>,
    ) -> EngineResult<()> {
        let answer = self.subscriber.local_description().await?;

        let state = proto::SyncState {
            answer: answer.map(|sd| proto::SessionDescription {
                r#type: sd.sdp_type().to_string(),
                sdp: sd.to_string(),
            }),
            subscription: Some(subscription),
            publish_tracks,
            data_channels: self.data_channels_info(),
        };

        debug!("sending sync state");
        self.signal.send_sync_state(state).await;
        Ok(())
    }

    async fn restart(&self, url: &str, token: &str) -> EngineResult<()> {
        // The next subscriber offer restarts ICE; buffer candidates until
        // it is applied.
        self.subscriber.prepare_ice_restart().await;

        let participant_sid = self
            .join_response
            .participant
            .as_ref()
            .map(|participant| participant.sid.clone())
            .unwrap_or_default();

        match self.signal.reconnect(url, token, &participant_sid).await? {
            ResumeOutcome::Resumed(response) => {
                debug!("received reconnect response: {:?}", response);
                let config = make_rtc_config_reconnect(&response, &self.options);
                self.publisher.update_rtc_config(config.clone()).await?;
                self.subscriber.update_rtc_config(config).await?;
                Ok(())
            }
            ResumeOutcome::MustFullReconnect => {
                Err(EngineError::Connection("server requires a full reconnect".to_owned()))
            }
        }
    }

    async fn restart_publisher(&self) -> EngineResult<()> {
        if self.has_published.load(Ordering::Acquire) {
            self.publisher
                .create_and_send_offer(OfferOptions { ice_restart: true, ..Default::default() })
                .await?;
        }
        Ok(())
    }

    /// Waits for the publisher (when applicable), then the subscriber, to
    /// reach the connected ICE state. Each wait is bounded separately.
    async fn wait_pc_connection(&self) -> EngineResult<()> {
        if !self.subscriber_primary || self.has_published.load(Ordering::Acquire) {
            self.wait_transport_connected(&self.publisher).await?;
        }

        if self.subscriber_primary {
            self.wait_transport_connected(&self.subscriber).await?;
        }

        Ok(())
    }

    async fn wait_transport_connected(&self, transport: &Transport) -> EngineResult<()> {
        let wait_connected = async {
            while !transport.is_connected() {
                if self.closed.load(Ordering::Acquire) {
                    return Err(EngineError::Connection("session closed".to_owned()));
                }

                sleep(CONNECTION_POLL_INTERVAL).await;
            }

            Ok(())
        };

        tokio::select! {
            res = wait_connected => res,
            _ = sleep(MAX_ICE_CONNECT_TIMEOUT) => {
                Err(EngineError::Connection(format!(
                    "{:?} transport never reached the connected state",
                    transport.signal_target(),
                )))
            }
        }
    }

    fn primary_target(&self) -> proto::SignalTarget {
        if self.subscriber_primary {
            proto::SignalTarget::Subscriber
        } else {
            proto::SignalTarget::Publisher
        }
    }

    fn transports_connected(&self) -> bool {
        let primary =
            if self.subscriber_primary { &self.subscriber } else { &self.publisher };
        if !primary.is_connected() {
            return false;
        }

        if self.has_published.load(Ordering::Acquire) && !self.publisher.is_connected() {
            return false;
        }

        true
    }

    fn data_channel(
        &self,
        target: proto::SignalTarget,
        kind: DataPacketKind,
    ) -> Option<Arc<dyn DataChannel>> {
        if target == proto::SignalTarget::Publisher {
            match kind {
                DataPacketKind::Reliable => Some(self.reliable_dc.clone()),
                DataPacketKind::Lossy => Some(self.lossy_dc.clone()),
            }
        } else {
            match kind {
                DataPacketKind::Reliable => self.sub_reliable_dc.lock().clone(),
                DataPacketKind::Lossy => self.sub_lossy_dc.lock().clone(),
            }
        }
    }

    fn data_channels_info(&self) -> Vec<proto::DataChannelInfo> {
        [&self.reliable_dc, &self.lossy_dc]
            .into_iter()
            .map(|dc| proto::DataChannelInfo {
                label: dc.label(),
                id: dc.id().max(0) as u32,
                target: proto::SignalTarget::Publisher as i32,
            })
            .collect()
    }

    /// Reports the loss of the signal link or a transport; the engine
    /// decides whether a reconnect follows.
    fn on_session_disconnected(
        &self,
        source: &str,
        reason: proto::DisconnectReason,
        can_reconnect: bool,
        full_reconnect: bool,
    ) {
        let _ = self.emitter.send(SessionEvent::Close {
            source: source.to_owned(),
            reason,
            can_reconnect,
            full_reconnect,
        });
    }

    async fn close(&self, reason: &str) {
        self.closed.store(true, Ordering::Release);

        self.pending_tracks.clear();

        self.signal.send_leave().await;
        self.signal.close(reason).await;

        let subscriber_channels =
            [self.sub_lossy_dc.lock().take(), self.sub_reliable_dc.lock().take()];
        for dc in [Some(self.lossy_dc.clone()), Some(self.reliable_dc.clone())]
            .into_iter()
            .chain(subscriber_channels)
            .flatten()
        {
            dc.on_message(None);
            dc.on_state_change(None);
            dc.close();
        }

        self.publisher.close_blocking().await;
        self.subscriber.close_blocking().await;
    }
}

fn parse_proto_description(sd: &proto::SessionDescription) -> EngineResult<SessionDescription> {
    let sdp_type = sd
        .r#type
        .parse::<SdpType>()
        .map_err(|err| EngineError::Internal(format!("invalid sdp type: {}", err)))?;
    Ok(SessionDescription::parse(&sd.sdp, sdp_type)?)
}

/// Caller-supplied ICE servers win; otherwise the server's list; otherwise
/// a default STUN set. Duplicates are removed by structural equality.
fn make_rtc_config(
    server_ice_servers: &[proto::IceServer],
    client_configuration: Option<&proto::ClientConfiguration>,
    options: &EngineOptions,
) -> RtcConfiguration {
    let mut config = options.rtc_config.clone().unwrap_or_default();
    config.sdp_semantics = SdpSemantics::UnifiedPlan;
    config.continual_gathering_policy = ContinualGatheringPolicy::GatherContinually;

    let mut ice_servers = options.ice_servers.clone();
    if ice_servers.is_empty() {
        ice_servers = std::mem::take(&mut config.ice_servers);
    }
    if ice_servers.is_empty() {
        ice_servers = server_ice_servers
            .iter()
            .map(|server| IceServer {
                urls: server.urls.clone(),
                username: server.username.clone(),
                password: server.credential.clone(),
            })
            .collect();
    }
    if ice_servers.is_empty() {
        ice_servers = DEFAULT_STUN_SERVERS
            .iter()
            .map(|url| IceServer {
                urls: vec![(*url).to_owned()],
                username: String::new(),
                password: String::new(),
            })
            .collect();
    }

    let mut deduped: Vec<IceServer> = Vec::with_capacity(ice_servers.len());
    for server in ice_servers {
        if !deduped.contains(&server) {
            deduped.push(server);
        }
    }
    config.ice_servers = deduped;

    if let Some(client_configuration) = client_configuration {
        if client_configuration.force_relay() == proto::ClientConfigSetting::Enabled {
            config.ice_transport_type = IceTransportsType::Relay;
        }
    }

    config
}

fn make_rtc_config_join(value: &proto::JoinResponse, options: &EngineOptions) -> RtcConfiguration {
    make_rtc_config(&value.ice_servers, value.client_configuration.as_ref(), options)
}

fn make_rtc_config_reconnect(
    value: &proto::ReconnectResponse,
    options: &EngineOptions,
) -> RtcConfiguration {
    make_rtc_config(&value.ice_servers, value.client_configuration.as_ref(), options)
}
