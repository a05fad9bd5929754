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

use std::collections::HashMap;

use huddle_protocol as proto;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{EngineError, EngineResult};

/// Correlates local publish requests with server acknowledgments by
/// client-assigned id. Each resolver is completed at most once, either by
/// the matching `TrackPublished` response or by cancellation at session
/// close.
#[derive(Default)]
pub struct PendingTrackRegistry {
    pending: Mutex<HashMap<String, oneshot::Sender<proto::TrackInfo>>>,
}

impl PendingTrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resolver for `cid`. Fails if a publication with the
    /// same cid is already waiting for its acknowledgment.
    pub fn register(&self, cid: &str) -> EngineResult<oneshot::Receiver<proto::TrackInfo>> {
        let mut pending = self.pending.lock();
        if pending.contains_key(cid) {
            return Err(EngineError::DuplicatePublication(cid.to_owned()));
        }

        let (tx, rx) = oneshot::channel();
        pending.insert(cid.to_owned(), tx);
        Ok(rx)
    }

    /// Completes the resolver for `cid`, if any. Returns whether a waiter
    /// was resolved.
    pub fn complete(&self, cid: &str, info: proto::TrackInfo) -> bool {
        if let Some(tx) = self.pending.lock().remove(cid) {
            let _ = tx.send(info);
            return true;
        }
        false
    }

    /// Drops the resolver for `cid` without completing it (publish timed
    /// out or the track was removed before the server answered).
    pub fn remove(&self, cid: &str) {
        self.pending.lock().remove(cid);
    }

    /// Cancels every outstanding resolver; their waiters fail.
    pub fn clear(&self) {
        self.pending.lock().clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.pending.lock().len()
    }
}
