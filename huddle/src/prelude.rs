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

pub use crate::engine::{
    ConnectionState, Engine, EngineError, EngineEvent, EngineEvents, EngineResult, LastInfo,
    LOSSY_DC_LABEL, MAX_DATA_PACKET_SIZE, MAX_ICE_CONNECT_TIMEOUT, RELIABLE_DC_LABEL,
};
pub use crate::options::{EngineOptions, ReconnectPolicy};
pub use crate::signal::{
    ResumeOutcome, SignalConnector, SignalError, SignalEvent, SignalEvents, SignalLink,
    SignalOptions, SignalResult,
};
pub use crate::DataPacketKind;
