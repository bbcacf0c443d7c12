// Copyright 2021 The Keystone Project Developers
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

use ruma::EventEncryptionAlgorithm;
use serde::{Deserialize, Serialize};

/// The content of the room state event that switches a room over to
/// encrypted messaging.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomEncryptionContent {
    /// The algorithm messages in the room are to be encrypted with.
    pub algorithm: EventEncryptionAlgorithm,

    /// How long a single session may be used before it gets rotated, in
    /// milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation_period_ms: Option<u64>,

    /// How many messages a single session may encrypt before it gets
    /// rotated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation_period_msgs: Option<u64>,
}

impl RoomEncryptionContent {
    /// Create a new content enabling the given algorithm, with no rotation
    /// overrides.
    pub fn new(algorithm: EventEncryptionAlgorithm) -> Self {
        Self { algorithm, rotation_period_ms: None, rotation_period_msgs: None }
    }
}
