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

use crate::{peer_connection::PeerConnection, RtcError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ContinualGatheringPolicy {
    GatherOnce,
    GatherContinually,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IceTransportsType {
    Relay,
    NoHost,
    All,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SdpSemantics {
    PlanB,
    UnifiedPlan,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RtcConfiguration {
    pub ice_servers: Vec<IceServer>,
    pub continual_gathering_policy: ContinualGatheringPolicy,
    pub ice_transport_type: IceTransportsType,
    pub sdp_semantics: SdpSemantics,
}

impl Default for RtcConfiguration {
    fn default() -> Self {
        Self {
            ice_servers: vec![],
            continual_gathering_policy: ContinualGatheringPolicy::GatherContinually,
            ice_transport_type: IceTransportsType::All,
            sdp_semantics: SdpSemantics::UnifiedPlan,
        }
    }
}

/// Creates peer connections. One factory is shared by both transports of a
/// session; implementations are expected to be cheap to clone behind an
/// `Arc`.
pub trait PeerConnectionFactory: Send + Sync {
    fn create_peer_connection(
        &self,
        config: RtcConfiguration,
    ) -> Result<Arc<dyn PeerConnection>, RtcError>;
}
