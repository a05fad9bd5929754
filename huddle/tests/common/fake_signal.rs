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

//! A scriptable signal link: joins and resumes return canned responses,
//! every command the engine sends is recorded.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use huddle::{
    proto,
    signal::{
        ResumeOutcome, SignalConnector, SignalEmitter, SignalError, SignalEvent, SignalEvents,
        SignalLink, SignalOptions, SignalResult,
    },
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum SentCommand {
    AddTrack(proto::AddTrackRequest),
    MuteTrack(proto::MuteTrackRequest),
    UpdateSubscriptionPermissions(proto::SubscriptionPermission),
    Answer(proto::SessionDescription),
    Offer(proto::SessionDescription),
    Trickle { target: proto::SignalTarget, candidate_init: String },
    SyncState(proto::SyncState),
    Leave,
    ReadyForResponses,
    PcConnected,
    Close(String),
}

#[derive(Default)]
pub struct SignalShared {
    emitter: Mutex<Option<SignalEmitter>>,
    commands: Mutex<Vec<SentCommand>>,
    reconnect_results: Mutex<VecDeque<SignalResult<ResumeOutcome>>>,
    reconnect_calls: Mutex<Vec<(String, String, String)>>,
}

impl SignalShared {
    /// Pushes a server event into the current session's event stream.
    pub fn emit(&self, event: SignalEvent) {
        let emitter = self.emitter.lock();
        emitter
            .as_ref()
            .expect("no active signal session")
            .send(event)
            .expect("signal events receiver dropped");
    }

    pub fn record(&self, command: SentCommand) {
        self.commands.lock().push(command);
    }

    pub fn with_commands<T>(&self, f: impl FnOnce(&[SentCommand]) -> T) -> T {
        f(&self.commands.lock())
    }

    pub fn command_count(&self, matcher: impl Fn(&SentCommand) -> bool) -> usize {
        self.commands.lock().iter().filter(|command| matcher(command)).count()
    }

    /// Queues the outcome of the next `reconnect` call. Without scripting,
    /// resumes succeed with an empty reconnect response.
    pub fn push_reconnect_result(&self, result: SignalResult<ResumeOutcome>) {
        self.reconnect_results.lock().push_back(result);
    }

    pub fn reconnect_calls(&self) -> Vec<(String, String, String)> {
        self.reconnect_calls.lock().clone()
    }
}

pub struct FakeSignalLink {
    shared: Arc<SignalShared>,
}

#[async_trait]
impl SignalLink for FakeSignalLink {
    async fn reconnect(
        &self,
        url: &str,
        token: &str,
        participant_sid: &str,
    ) -> SignalResult<ResumeOutcome> {
        self.shared.reconnect_calls.lock().push((
            url.to_owned(),
            token.to_owned(),
            participant_sid.to_owned(),
        ));

        match self.shared.reconnect_results.lock().pop_front() {
            Some(result) => result,
            None => Ok(ResumeOutcome::Resumed(proto::ReconnectResponse::default())),
        }
    }

    async fn on_ready_for_responses(&self) {
        self.shared.record(SentCommand::ReadyForResponses);
    }

    async fn on_pc_connected(&self) {
        self.shared.record(SentCommand::PcConnected);
    }

    async fn send_add_track(&self, req: proto::AddTrackRequest) {
        self.shared.record(SentCommand::AddTrack(req));
    }

    async fn send_mute_track(&self, req: proto::MuteTrackRequest) {
        self.shared.record(SentCommand::MuteTrack(req));
    }

    async fn send_update_subscription_permissions(&self, req: proto::SubscriptionPermission) {
        self.shared.record(SentCommand::UpdateSubscriptionPermissions(req));
    }

    async fn send_answer(&self, answer: proto::SessionDescription) {
        self.shared.record(SentCommand::Answer(answer));
    }

    async fn send_offer(&self, offer: proto::SessionDescription) {
        self.shared.record(SentCommand::Offer(offer));
    }

    async fn send_trickle(&self, target: proto::SignalTarget, candidate_init: String) {
        self.shared.record(SentCommand::Trickle { target, candidate_init });
    }

    async fn send_sync_state(&self, state: proto::SyncState) {
        self.shared.record(SentCommand::SyncState(state));
    }

    async fn send_leave(&self) {
        self.shared.record(SentCommand::Leave);
    }

    async fn close(&self, reason: &str) {
        self.shared.record(SentCommand::Close(reason.to_owned()));
    }
}

pub struct FakeSignalConnector {
    pub shared: Arc<SignalShared>,
    join_results: Mutex<VecDeque<SignalResult<proto::JoinResponse>>>,
    join_calls: AtomicU32,
}

impl FakeSignalConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(SignalShared::default()),
            join_results: Mutex::new(VecDeque::new()),
            join_calls: AtomicU32::new(0),
        })
    }

    /// Queues the response for the next `join` call.
    pub fn push_join_result(&self, result: SignalResult<proto::JoinResponse>) {
        self.join_results.lock().push_back(result);
    }

    pub fn join_calls(&self) -> u32 {
        self.join_calls.load(Ordering::Acquire)
    }
}

#[async_trait]
impl SignalConnector for FakeSignalConnector {
    async fn join(
        &self,
        _url: &str,
        _token: &str,
        _options: SignalOptions,
    ) -> SignalResult<(Arc<dyn SignalLink>, proto::JoinResponse, SignalEvents)> {
        self.join_calls.fetch_add(1, Ordering::AcqRel);

        let response = match self.join_results.lock().pop_front() {
            Some(Ok(response)) => response,
            Some(Err(err)) => return Err(err),
            None => return Err(SignalError::Transport("no scripted join response".to_owned())),
        };

        let (emitter, events) = mpsc::unbounded_channel();
        *self.shared.emitter.lock() = Some(emitter);

        let link = Arc::new(FakeSignalLink { shared: self.shared.clone() });
        Ok((link, response, events))
    }
}
