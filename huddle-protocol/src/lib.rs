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

//! Wire types shared between the signal link and the media engine.
//!
//! These mirror the server protobuf schema. They are authored by hand in
//! the prost idiom (stable field tags, `#[repr(i32)]` enumerations) so the
//! build does not depend on protoc.

mod wire;

pub use wire::*;
