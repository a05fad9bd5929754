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
    fmt::{Debug, Display},
    str::FromStr,
};

use thiserror::Error;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    PrAnswer,
    Answer,
    Rollback,
}

impl FromStr for SdpType {
    type Err = &'static str;

    fn from_str(sdp_type: &str) -> Result<Self, Self::Err> {
        match sdp_type {
            "offer" => Ok(Self::Offer),
            "pranswer" => Ok(Self::PrAnswer),
            "answer" => Ok(Self::Answer),
            "rollback" => Ok(Self::Rollback),
            _ => Err("invalid SdpType"),
        }
    }
}

impl Display for SdpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SdpType::Offer => "offer",
            SdpType::PrAnswer => "pranswer",
            SdpType::Answer => "answer",
            SdpType::Rollback => "rollback",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Error, Debug)]
#[error("failed to parse sdp: {line} - {description}")]
pub struct SdpParseError {
    pub line: String,
    pub description: String,
}

/// A session description as exchanged during offer/answer negotiation.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionDescription {
    sdp_type: SdpType,
    sdp: String,
}

impl SessionDescription {
    pub fn parse(sdp: &str, sdp_type: SdpType) -> Result<Self, SdpParseError> {
        // Rollback descriptions are empty by definition.
        if sdp_type != SdpType::Rollback && !sdp.starts_with("v=") {
            return Err(SdpParseError {
                line: sdp.lines().next().unwrap_or_default().to_owned(),
                description: "expected a version line".to_owned(),
            });
        }

        Ok(Self { sdp_type, sdp: sdp.to_owned() })
    }

    pub fn sdp_type(&self) -> SdpType {
        self.sdp_type
    }
}

impl Display for SessionDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sdp)
    }
}

impl Debug for SessionDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDescription")
            .field("sdp_type", &self.sdp_type)
            .field("sdp", &self.sdp)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_sdp_without_version_line() {
        assert!(SessionDescription::parse("o=- 0 0", SdpType::Offer).is_err());
        assert!(SessionDescription::parse("v=0\r\no=- 0 0", SdpType::Offer).is_ok());
    }

    #[test]
    fn sdp_type_from_str() {
        assert_eq!("offer".parse::<SdpType>().unwrap(), SdpType::Offer);
        assert_eq!("answer".parse::<SdpType>().unwrap(), SdpType::Answer);
        assert!("invalid".parse::<SdpType>().is_err());
    }
}
