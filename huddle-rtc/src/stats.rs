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

/// One entry of a peer-connection stats report.
///
/// Kept deliberately flat; the platform crate fills `kind` with the
/// standard stats type string (`"transport"`, `"outbound-rtp"`, ...) and
/// `values` with the serialized members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcStats {
    pub id: String,
    pub timestamp_us: i64,
    pub kind: String,
    pub values: Vec<(String, String)>,
}
