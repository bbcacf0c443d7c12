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

//! Transient request and response objects exchanged with the key directory.
//!
//! These are constructed per call and never persisted; the transport layer
//! is responsible for putting them on the wire.

use std::collections::BTreeMap;

use ruma::{serde::Raw, OneTimeKeyAlgorithm, OwnedDeviceId, OwnedOneTimeKeyId, OwnedUserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{DeviceKeys, OneTimeKey};

/// A request publishing a device's identity keys and one-time prekeys to
/// the key directory.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KeysUploadRequest {
    /// The self-signed identity keys of the uploading device, if they should
    /// be (re)published.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_keys: Option<Raw<DeviceKeys>>,

    /// One-time prekeys, keyed by `<algorithm>:<key_id>`. All keys of a
    /// single request use the same algorithm.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub one_time_keys: BTreeMap<OwnedOneTimeKeyId, Raw<OneTimeKey>>,
}

impl KeysUploadRequest {
    /// Does the request publish anything at all?
    pub fn is_empty(&self) -> bool {
        self.device_keys.is_none() && self.one_time_keys.is_empty()
    }
}

/// The server's acknowledgment of a key upload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KeysUploadResponse {
    /// The number of one-time keys the server now holds for the device, per
    /// algorithm.
    #[serde(default)]
    pub one_time_key_counts: BTreeMap<OneTimeKeyAlgorithm, u64>,
}

/// A request for the published identity keys of a set of users.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KeysQueryRequest {
    /// The users to fetch keys for; an empty device list requests all of a
    /// user's devices.
    pub device_keys: BTreeMap<OwnedUserId, Vec<OwnedDeviceId>>,
}

impl KeysQueryRequest {
    /// Build a query for all devices of every given user.
    pub fn all_devices(users: impl IntoIterator<Item = OwnedUserId>) -> Self {
        Self { device_keys: users.into_iter().map(|user_id| (user_id, Vec::new())).collect() }
    }
}

/// The raw, not yet verified, response to a key query.
///
/// Records in here must not be trusted before they went through the
/// [`KeyDirectoryClient`]'s verification step.
///
/// [`KeyDirectoryClient`]: crate::KeyDirectoryClient
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KeysQueryResponse {
    /// The published device key records, per user and device. A queried
    /// user with no published devices appears with an empty device map.
    #[serde(default)]
    pub device_keys: BTreeMap<OwnedUserId, BTreeMap<OwnedDeviceId, Raw<DeviceKeys>>>,

    /// The part of the query the directory couldn't serve, keyed by the
    /// unreachable server, with the server's error as the value.
    #[serde(default)]
    pub failures: BTreeMap<String, Value>,
}

/// The users whose device lists changed between two sync positions.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KeyChangesResponse {
    /// Users that published, replaced or revoked device keys in the
    /// interval.
    #[serde(default)]
    pub changed: Vec<OwnedUserId>,

    /// Users that stopped sharing any encrypted room with us in the
    /// interval.
    #[serde(default)]
    pub left: Vec<OwnedUserId>,
}
