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

#![allow(dead_code)]

pub mod fake_rtc;
pub mod fake_signal;

use std::{sync::Arc, time::Duration};

use huddle::{
    engine::{Engine, EngineEvent, EngineEvents},
    options::EngineOptions,
    proto,
};

use fake_rtc::FakePeerConnectionFactory;
use fake_signal::FakeSignalConnector;

pub const TEST_URL: &str = "wss://huddle.test";
pub const TEST_TOKEN: &str = "server-token";

pub fn join_response(subscriber_primary: bool) -> proto::JoinResponse {
    proto::JoinResponse {
        room: Some(proto::Room {
            sid: "RM_test".to_owned(),
            name: "test-room".to_owned(),
            ..Default::default()
        }),
        participant: Some(proto::ParticipantInfo {
            sid: "PA_local".to_owned(),
            identity: "local".to_owned(),
            ..Default::default()
        }),
        server_version: "1.6.0".to_owned(),
        subscriber_primary,
        ..Default::default()
    }
}

pub struct TestSession {
    pub engine: Arc<Engine>,
    pub events: EngineEvents,
    pub connector: Arc<FakeSignalConnector>,
    pub factory: Arc<FakePeerConnectionFactory>,
}

impl TestSession {
    /// Fake peer connections of session `n`: the engine always builds the
    /// publisher first, then the subscriber.
    pub fn publisher(&self, session: usize) -> Arc<fake_rtc::FakePeerConnection> {
        self.factory.connection(session * 2)
    }

    pub fn subscriber(&self, session: usize) -> Arc<fake_rtc::FakePeerConnection> {
        self.factory.connection(session * 2 + 1)
    }
}

pub async fn connect(subscriber_primary: bool) -> anyhow::Result<TestSession> {
    connect_with_options(subscriber_primary, EngineOptions::default()).await
}

pub async fn connect_with_options(
    subscriber_primary: bool,
    options: EngineOptions,
) -> anyhow::Result<TestSession> {
    let connector = FakeSignalConnector::new();
    let factory = FakePeerConnectionFactory::new();
    connector.push_join_result(Ok(join_response(subscriber_primary)));

    let (engine, events) =
        Engine::connect(connector.clone(), factory.clone(), TEST_URL, TEST_TOKEN, options).await?;

    Ok(TestSession { engine: Arc::new(engine), events, connector, factory })
}

pub async fn next_event(events: &mut EngineEvents) -> EngineEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for an engine event")
        .expect("engine event stream ended")
}

/// Acks the reconnect-handshake events that block the engine until the
/// consumer answers.
pub fn ack(event: EngineEvent) {
    match event {
        EngineEvent::SignalConnected { ack, .. }
        | EngineEvent::FullReconnecting { ack }
        | EngineEvent::PostReconnect { ack, .. } => {
            let _ = ack.send(());
        }
        _ => {}
    }
}

/// Receives (and acks) events until `matcher` returns true.
pub async fn drive_until(
    events: &mut EngineEvents,
    matcher: impl Fn(&EngineEvent) -> bool,
) -> EngineEvent {
    loop {
        let event = next_event(events).await;
        if matcher(&event) {
            return event;
        }
        ack(event);
    }
}

/// Collects whatever is already queued (or becomes queued while the
/// runtime settles), without waiting for anything specific.
pub async fn drain_pending(events: &mut EngineEvents) -> Vec<EngineEvent> {
    let mut drained = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(100), events.recv()).await
    {
        drained.push(event);
    }
    drained
}

/// Polls `cond` until it holds; with a paused clock this resolves as soon
/// as the runtime goes idle.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}
