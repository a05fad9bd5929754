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

use huddle_rtc::peer_connection_factory::{IceServer, RtcConfiguration};

use crate::signal::SignalOptions;

/// Strategy applied by the reconnection loop after a session loses its
/// transports or its signal link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// First attempt resumes the existing transports; once a resume fails,
    /// every following attempt is a full rejoin.
    #[default]
    Default,
    ForceSoftReconnect,
    ForceFullReconnect,
}

#[derive(Default, Debug, Clone)]
pub struct EngineOptions {
    pub reconnect_policy: ReconnectPolicy,

    /// Overrides the server-provided ICE servers when nonempty.
    pub ice_servers: Vec<IceServer>,

    /// Full RTC configuration override. ICE servers still follow the
    /// precedence rules of the session setup.
    pub rtc_config: Option<RtcConfiguration>,

    pub signal_options: SignalOptions,
}
