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

pub use crate::data_channel::{
    DataBuffer, DataChannel, DataChannelError, DataChannelInit, DataChannelState, OnMessage,
    OnStateChange,
};
pub use crate::ice_candidate::IceCandidate;
pub use crate::peer_connection::{
    AnswerOptions, IceConnectionState, MediaStream, MediaStreamTrack, OfferOptions,
    OnConnectionChange, OnDataChannel, OnIceCandidate, OnTrack, PeerConnection,
    PeerConnectionState, RtpReceiver, RtpSender, SignalingState, TrackEvent,
};
pub use crate::peer_connection_factory::{
    ContinualGatheringPolicy, IceServer, IceTransportsType, PeerConnectionFactory,
    RtcConfiguration, SdpSemantics,
};
pub use crate::session_description::{SdpParseError, SdpType, SessionDescription};
pub use crate::stats::RtcStats;
pub use crate::{MediaType, RtcError, RtcErrorType};
