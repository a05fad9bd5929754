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

//! Typed interfaces over the native WebRTC stack.
//!
//! The engine never links the native peer-connection implementation
//! directly; it talks to the [`peer_connection::PeerConnection`] and
//! [`data_channel::DataChannel`] traits defined here. A platform crate (or
//! a test double) provides the implementation.

use thiserror::Error;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MediaType {
    Audio,
    Video,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RtcErrorType {
    Internal,
    InvalidSdp,
    InvalidState,
}

#[derive(Error, Debug, Clone)]
#[error("an RtcError occured: {error_type:?} - {message}")]
pub struct RtcError {
    pub error_type: RtcErrorType,
    pub message: String,
}

pub mod data_channel;
pub mod ice_candidate;
pub mod peer_connection;
pub mod peer_connection_factory;
pub mod session_description;
pub mod stats;

pub mod prelude;
