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

use std::sync::Arc;

use huddle_protocol as proto;
use huddle_rtc::prelude::*;
use tokio::sync::mpsc;

use crate::engine::transport::Transport;

pub type RtcEmitter = mpsc::UnboundedSender<RtcEvent>;
pub type RtcEvents = mpsc::UnboundedReceiver<RtcEvent>;

/// Everything the native layer can tell us, flattened into one variant set
/// so the session task observes it in a single ordered stream.
#[derive(Debug)]
pub enum RtcEvent {
    IceCandidate {
        ice_candidate: IceCandidate,
        target: proto::SignalTarget,
    },
    ConnectionChange {
        state: PeerConnectionState,
        target: proto::SignalTarget,
    },
    DataChannel {
        data_channel: Arc<dyn DataChannel>,
        target: proto::SignalTarget,
    },
    Offer {
        offer: SessionDescription,
        target: proto::SignalTarget,
    },
    Track {
        event: TrackEvent,
        target: proto::SignalTarget,
    },
    Data {
        data: Vec<u8>,
        binary: bool,
    },
}

/// Callbacks are invoked on the native signaling thread; they only forward
/// into the channel.

fn on_connection_state_change(target: proto::SignalTarget, emitter: RtcEmitter) -> OnConnectionChange {
    Box::new(move |state| {
        let _ = emitter.send(RtcEvent::ConnectionChange { state, target });
    })
}

fn on_ice_candidate(target: proto::SignalTarget, emitter: RtcEmitter) -> OnIceCandidate {
    Box::new(move |ice_candidate| {
        let _ = emitter.send(RtcEvent::IceCandidate { ice_candidate, target });
    })
}

fn on_data_channel(target: proto::SignalTarget, emitter: RtcEmitter) -> OnDataChannel {
    Box::new(move |data_channel| {
        data_channel.on_message(Some(on_message(emitter.clone())));

        let _ = emitter.send(RtcEvent::DataChannel { data_channel, target });
    })
}

fn on_track(target: proto::SignalTarget, emitter: RtcEmitter) -> OnTrack {
    Box::new(move |event| {
        let _ = emitter.send(RtcEvent::Track { event, target });
    })
}

fn on_message(emitter: RtcEmitter) -> OnMessage {
    Box::new(move |buffer| {
        let _ = emitter.send(RtcEvent::Data { data: buffer.data.to_vec(), binary: buffer.binary });
    })
}

fn on_local_offer(target: proto::SignalTarget, emitter: RtcEmitter) -> crate::engine::transport::OnLocalOffer {
    Box::new(move |offer| {
        let _ = emitter.send(RtcEvent::Offer { offer, target });
    })
}

pub fn forward_pc_events(transport: &Transport, rtc_emitter: RtcEmitter) {
    let target = transport.signal_target();
    let pc = transport.peer_connection();

    pc.on_ice_candidate(Some(on_ice_candidate(target, rtc_emitter.clone())));
    pc.on_data_channel(Some(on_data_channel(target, rtc_emitter.clone())));
    pc.on_track(Some(on_track(target, rtc_emitter.clone())));
    pc.on_connection_state_change(Some(on_connection_state_change(target, rtc_emitter.clone())));

    transport.on_offer(Some(on_local_offer(target, rtc_emitter)));
}

pub fn forward_dc_events(dc: &Arc<dyn DataChannel>, rtc_emitter: RtcEmitter) {
    dc.on_message(Some(on_message(rtc_emitter)));
}
