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
    fmt::{Debug, Formatter},
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use futures_util::future::BoxFuture;
use huddle_protocol as proto;
use huddle_rtc::prelude::*;
use log::{debug, error};
use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, oneshot, Mutex as AsyncMutex},
    task::JoinHandle,
};

use super::{EngineError, EngineResult};

pub type OnLocalOffer = Box<dyn FnMut(SessionDescription) + Send + Sync>;

/// Work items executed by the transport worker, strictly in submission
/// order. Each op runs to completion before the next one starts.
type TransportOp = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NegotiationState {
    Idle,
    InProgress,
    PendingRetry,
}

struct TransportInner {
    pending_candidates: Vec<IceCandidate>,
    renegotiate: bool,
    restarting_ice: bool,
}

/// Wraps one peer connection and serializes every mutating operation
/// through a dedicated single-consumer queue. Concurrent callers never
/// observe a partially-applied state change.
pub struct Transport {
    signal_target: proto::SignalTarget,
    peer_connection: Arc<dyn PeerConnection>,
    ops_tx: Mutex<Option<mpsc::UnboundedSender<TransportOp>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    inner: Arc<AsyncMutex<TransportInner>>,
    negotiation_state: Mutex<NegotiationState>,
    on_offer_handler: Arc<Mutex<Option<OnLocalOffer>>>,
    closed: AtomicBool,
}

impl Debug for Transport {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.debug_struct("Transport").field("target", &self.signal_target).finish()
    }
}

impl Transport {
    pub fn new(peer_connection: Arc<dyn PeerConnection>, signal_target: proto::SignalTarget) -> Self {
        let (ops_tx, mut ops_rx) = mpsc::unbounded_channel::<TransportOp>();
        let worker = tokio::spawn(async move {
            while let Some(op) = ops_rx.recv().await {
                op().await;
            }
        });

        Self {
            signal_target,
            peer_connection,
            ops_tx: Mutex::new(Some(ops_tx)),
            worker: Mutex::new(Some(worker)),
            inner: Arc::new(AsyncMutex::new(TransportInner {
                pending_candidates: Vec::default(),
                renegotiate: false,
                restarting_ice: false,
            })),
            negotiation_state: Mutex::new(NegotiationState::Idle),
            on_offer_handler: Default::default(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn signal_target(&self) -> proto::SignalTarget {
        self.signal_target
    }

    pub fn peer_connection(&self) -> Arc<dyn PeerConnection> {
        self.peer_connection.clone()
    }

    pub fn on_offer(&self, handler: Option<OnLocalOffer>) {
        *self.on_offer_handler.lock() = handler;
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.peer_connection.ice_connection_state(),
            IceConnectionState::Connected | IceConnectionState::Completed
        )
    }

    pub fn ice_connection_state(&self) -> IceConnectionState {
        self.peer_connection.ice_connection_state()
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.peer_connection.signaling_state()
    }

    /// Runs `f` with exclusive access to the peer connection, after every
    /// previously submitted operation has completed.
    pub async fn with_peer_connection<F, Fut, T>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(Arc<dyn PeerConnection>) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let pc = self.peer_connection.clone();
        let op: TransportOp = Box::new(move || {
            Box::pin(async move {
                let _ = tx.send(f(pc).await);
            })
        });

        {
            let ops_tx = self.ops_tx.lock();
            let Some(ops_tx) = ops_tx.as_ref() else {
                return Err(EngineError::Connection("transport is closed".to_owned()));
            };
            if ops_tx.send(op).is_err() {
                return Err(EngineError::Connection("transport is closed".to_owned()));
            }
        }

        rx.await.map_err(|_| EngineError::Connection("transport is closed".to_owned()))
    }

    /// Marks the transport so the next offer restarts ICE; until that
    /// offer is applied, inbound candidates are buffered again.
    pub async fn prepare_ice_restart(&self) {
        self.inner.lock().await.restarting_ice = true;
    }

    pub async fn add_ice_candidate(&self, ice_candidate: IceCandidate) -> EngineResult<()> {
        let mut inner = self.inner.lock().await;

        if self.peer_connection.current_remote_description().is_some() && !inner.restarting_ice {
            drop(inner);
            self.with_peer_connection(move |pc| async move { pc.add_ice_candidate(ice_candidate).await })
                .await??;
            return Ok(());
        }

        inner.pending_candidates.push(ice_candidate);
        Ok(())
    }

    /// Applies the remote description, then flushes buffered candidates in
    /// arrival order.
    pub async fn set_remote_description(
        &self,
        remote_description: SessionDescription,
    ) -> EngineResult<()> {
        let mut inner = self.inner.lock().await;

        self.with_peer_connection(move |pc| async move {
            pc.set_remote_description(remote_description).await
        })
        .await??;

        for ic in inner.pending_candidates.drain(..) {
            self.with_peer_connection(move |pc| async move { pc.add_ice_candidate(ic).await })
                .await??;
        }

        inner.restarting_ice = false;

        let renegotiate = std::mem::take(&mut inner.renegotiate);
        drop(inner);

        if renegotiate {
            self.create_and_send_offer(OfferOptions::default()).await?;
        }

        Ok(())
    }

    /// Subscriber side of the offer/answer exchange: applies the remote
    /// offer and produces a local answer.
    pub async fn create_answer(
        &self,
        offer: SessionDescription,
        options: AnswerOptions,
    ) -> EngineResult<SessionDescription> {
        self.set_remote_description(offer).await?;

        let answer = self
            .with_peer_connection(move |pc| async move { pc.create_answer(options).await })
            .await??;

        let local = answer.clone();
        self.with_peer_connection(move |pc| async move { pc.set_local_description(local).await })
            .await??;

        Ok(answer)
    }

    /// Publisher side: creates an offer, installs it as the local
    /// description and hands it to the offer handler.
    pub async fn create_and_send_offer(&self, options: OfferOptions) -> EngineResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Connection("transport is closed".to_owned()));
        }

        let mut inner = self.inner.lock().await;

        if self.peer_connection.signaling_state() == SignalingState::HaveLocalOffer {
            if options.ice_restart {
                if let Some(remote) = self.peer_connection.current_remote_description() {
                    // Roll back to the previous remote description so a
                    // restart offer can be produced from a stable state.
                    self.with_peer_connection(move |pc| async move {
                        pc.set_remote_description(remote).await
                    })
                    .await??;
                } else {
                    error!("trying to restart ICE when the pc doesn't have a remote description");
                }
            } else {
                inner.renegotiate = true;
                return Ok(());
            }
        }

        if options.ice_restart {
            debug!("restarting ICE on {:?}", self.signal_target);
            inner.restarting_ice = false;
            self.with_peer_connection(|pc| async move { pc.restart_ice() }).await?;
        }

        let offer = self
            .with_peer_connection(move |pc| async move {
                let offer = pc.create_offer(options).await?;
                pc.set_local_description(offer.clone()).await?;
                Ok::<_, RtcError>(offer)
            })
            .await??;

        drop(inner);

        if let Some(handler) = self.on_offer_handler.lock().as_mut() {
            handler(offer);
        }

        Ok(())
    }

    /// Requests a (re)negotiation. Calls arriving while one is in flight
    /// collapse into a single trailing negotiation.
    pub fn negotiate(self: &Arc<Self>) {
        let mut state = self.negotiation_state.lock();
        match *state {
            NegotiationState::Idle => {
                *state = NegotiationState::InProgress;
                drop(state);

                let transport = self.clone();
                tokio::spawn(async move {
                    transport.run_negotiation().await;
                });
            }
            NegotiationState::InProgress => {
                debug!("negotiation in progress, queuing a retry");
                *state = NegotiationState::PendingRetry;
            }
            NegotiationState::PendingRetry => {}
        }
    }

    async fn run_negotiation(self: Arc<Self>) {
        loop {
            if let Err(err) = self.create_and_send_offer(OfferOptions::default()).await {
                error!("failed to negotiate {:?}: {:?}", self.signal_target, err);
            }

            let mut state = self.negotiation_state.lock();
            if *state == NegotiationState::PendingRetry {
                *state = NegotiationState::InProgress;
                continue;
            }

            *state = NegotiationState::Idle;
            break;
        }
    }

    /// Atomically replaces the transport-wide RTC configuration.
    pub async fn update_rtc_config(&self, config: RtcConfiguration) -> EngineResult<()> {
        self.with_peer_connection(move |pc| async move { pc.set_configuration(config) }).await??;
        Ok(())
    }

    pub async fn local_description(&self) -> EngineResult<Option<SessionDescription>> {
        self.with_peer_connection(|pc| async move { pc.current_local_description() }).await
    }

    pub async fn get_stats(&self) -> EngineResult<Vec<RtcStats>> {
        let stats =
            self.with_peer_connection(|pc| async move { pc.get_stats().await }).await??;
        Ok(stats)
    }

    /// Closes the peer connection after draining the queue. Idempotent;
    /// operations submitted afterwards are rejected.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let pc = self.peer_connection.clone();
        if let Some(ops_tx) = self.ops_tx.lock().take() {
            let _ = ops_tx.send(Box::new(move || {
                Box::pin(async move {
                    pc.close();
                })
            }));
            // Dropping the sender ends the worker once the close op ran.
        }
    }

    /// Like [`Transport::close`] but waits for the queue to drain and the
    /// peer connection to be disposed.
    pub async fn close_blocking(&self) {
        self.close();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}
