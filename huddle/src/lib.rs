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

pub mod engine;
pub mod options;
pub mod signal;

pub use huddle_protocol as proto;

pub mod rtc {
    pub use huddle_rtc::*;
}

/// `use huddle::prelude::*;` to import the engine types.
pub mod prelude;

/// Delivery guarantee for user data sent over the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataPacketKind {
    Lossy,
    Reliable,
}

impl From<proto::data_packet::Kind> for DataPacketKind {
    fn from(value: proto::data_packet::Kind) -> Self {
        match value {
            proto::data_packet::Kind::Lossy => Self::Lossy,
            proto::data_packet::Kind::Reliable => Self::Reliable,
        }
    }
}

impl From<DataPacketKind> for proto::data_packet::Kind {
    fn from(value: DataPacketKind) -> Self {
        match value {
            DataPacketKind::Lossy => Self::Lossy,
            DataPacketKind::Reliable => Self::Reliable,
        }
    }
}
