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

//! An in-process key directory for the test-suite.
//!
//! [`MemoryServer`] plays the role a real homeserver plays for a deployed
//! client: it stores uploaded keys, answers queries, mints sync tokens and
//! keeps a change feed. Each simulated participant logs in and receives its
//! own [`Connection`], an authenticated [`Transport`] handle, so tests wire
//! components up exactly like production code does.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use ruma::{
    serde::Raw, DeviceId, EventId, OneTimeKeyAlgorithm, OwnedDeviceId, OwnedEventId,
    OwnedOneTimeKeyId, OwnedRoomId, OwnedUserId, RoomId, UserId,
};
use serde_json::{json, Value};

use crate::{
    error::TransportError,
    requests::{
        KeyChangesResponse, KeysQueryRequest, KeysQueryResponse, KeysUploadRequest,
        KeysUploadResponse,
    },
    tracker::SyncToken,
    transport::Transport,
    types::{DeviceKeys, OneTimeKey, RoomEncryptionContent},
};

#[derive(Debug, Default)]
struct ServerState {
    device_keys: BTreeMap<OwnedUserId, BTreeMap<OwnedDeviceId, Raw<DeviceKeys>>>,
    one_time_keys:
        BTreeMap<(OwnedUserId, OwnedDeviceId), BTreeMap<OwnedOneTimeKeyId, Raw<OneTimeKey>>>,
    changed: Vec<(u64, OwnedUserId)>,
    left: Vec<(u64, OwnedUserId)>,
    timelines: BTreeMap<OwnedRoomId, Vec<(OwnedEventId, RoomEncryptionContent)>>,
    failing_servers: Vec<String>,
    sequence: u64,
    offline: bool,
}

impl ServerState {
    fn one_time_key_counts(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> BTreeMap<OneTimeKeyAlgorithm, u64> {
        let mut counts = BTreeMap::new();

        if let Some(keys) = self.one_time_keys.get(&(user_id.to_owned(), device_id.to_owned())) {
            for key_id in keys.keys() {
                *counts.entry(key_id.algorithm()).or_insert(0) += 1;
            }
        }

        counts
    }
}

/// A miniature key directory holding everything in memory.
#[derive(Debug, Default)]
pub(crate) struct MemoryServer {
    state: Mutex<ServerState>,
}

impl MemoryServer {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hand out an authenticated transport handle for the given device.
    pub(crate) fn login(
        self: &Arc<Self>,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> Arc<Connection> {
        Arc::new(Connection {
            server: self.clone(),
            user_id: user_id.to_owned(),
            device_id: device_id.to_owned(),
        })
    }

    /// The token a sync would hand out right now.
    pub(crate) fn sync_token(&self) -> SyncToken {
        SyncToken::new(self.state.lock().unwrap().sequence.to_string())
    }

    /// Record that a user left all rooms shared with the account under
    /// test.
    pub(crate) fn mark_left(&self, user_id: &UserId) {
        let mut state = self.state.lock().unwrap();

        state.sequence += 1;
        let sequence = state.sequence;
        state.left.push((sequence, user_id.to_owned()));
    }

    /// Make key queries for users of the given server fail.
    pub(crate) fn fail_server(&self, server_name: &str) {
        self.state.lock().unwrap().failing_servers.push(server_name.to_owned());
    }

    /// Cut, or restore, the network.
    pub(crate) fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    /// The one-time keys the directory currently holds for a device, per
    /// algorithm.
    pub(crate) fn one_time_key_counts(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> BTreeMap<OneTimeKeyAlgorithm, u64> {
        self.state.lock().unwrap().one_time_key_counts(user_id, device_id)
    }

    /// The marker events a timeline scan of the room would see, in the
    /// order they were sent.
    pub(crate) fn timeline(&self, room_id: &RoomId) -> Vec<(OwnedEventId, RoomEncryptionContent)> {
        self.state.lock().unwrap().timelines.get(room_id).cloned().unwrap_or_default()
    }

    /// Swap a stored identity key out so the record no longer matches its
    /// signature.
    pub(crate) fn corrupt_device_keys(&self, user_id: &UserId, device_id: &DeviceId) {
        let mut state = self.state.lock().unwrap();

        let raw = state
            .device_keys
            .get_mut(user_id)
            .and_then(|devices| devices.get_mut(device_id))
            .expect("the device to corrupt has uploaded keys");

        let mut value: Value =
            serde_json::from_str(raw.json().get()).expect("stored device keys are valid JSON");
        value["keys"][format!("curve25519:{device_id}")] =
            "F8QhZ0Z1rjtWrQOblMDgZtEX5x1UrG7sZ2Kk3xliNAU".into();

        *raw = Raw::from_json(
            serde_json::value::to_raw_value(&value).expect("the tampered record serializes"),
        );
    }
}

/// An authenticated handle acting as a single device's [`Transport`].
#[derive(Debug)]
pub(crate) struct Connection {
    server: Arc<MemoryServer>,
    user_id: OwnedUserId,
    device_id: OwnedDeviceId,
}

fn offline_check(state: &ServerState) -> Result<(), TransportError> {
    if state.offline {
        Err(TransportError::Network("connection refused".to_owned()))
    } else {
        Ok(())
    }
}

#[async_trait]
impl Transport for Connection {
    async fn upload_keys(
        &self,
        request: &KeysUploadRequest,
    ) -> Result<KeysUploadResponse, TransportError> {
        let mut state = self.server.state.lock().unwrap();
        offline_check(&state)?;

        if let Some(device_keys) = &request.device_keys {
            state
                .device_keys
                .entry(self.user_id.clone())
                .or_default()
                .insert(self.device_id.clone(), device_keys.clone());
        }

        if !request.one_time_keys.is_empty() {
            // A new batch supersedes whatever the directory still held for
            // the device; claimed keys never come back.
            state.one_time_keys.insert(
                (self.user_id.clone(), self.device_id.clone()),
                request.one_time_keys.clone(),
            );
        }

        state.sequence += 1;
        let sequence = state.sequence;
        state.changed.push((sequence, self.user_id.clone()));

        Ok(KeysUploadResponse {
            one_time_key_counts: state.one_time_key_counts(&self.user_id, &self.device_id),
        })
    }

    async fn query_keys(
        &self,
        request: &KeysQueryRequest,
    ) -> Result<KeysQueryResponse, TransportError> {
        let state = self.server.state.lock().unwrap();
        offline_check(&state)?;

        let mut response = KeysQueryResponse::default();

        for (user_id, requested_devices) in &request.device_keys {
            let server_name = user_id.server_name();

            if state.failing_servers.iter().any(|failing| server_name.as_str() == failing) {
                response
                    .failures
                    .insert(server_name.to_string(), json!({ "errcode": "M_UNREACHABLE" }));
                continue;
            }

            let mut devices = state.device_keys.get(user_id).cloned().unwrap_or_default();

            if !requested_devices.is_empty() {
                devices.retain(|device_id, _| requested_devices.contains(device_id));
            }

            response.device_keys.insert(user_id.clone(), devices);
        }

        Ok(response)
    }

    async fn key_changes(
        &self,
        from: &SyncToken,
        to: &SyncToken,
    ) -> Result<KeyChangesResponse, TransportError> {
        let state = self.server.state.lock().unwrap();
        offline_check(&state)?;

        let parse = |token: &SyncToken| {
            token.as_str().parse::<u64>().map_err(|_| TransportError::Server {
                status: 400,
                message: "invalid sync token".to_owned(),
            })
        };

        let from = parse(from)?;
        let to = parse(to)?;

        let collect = |feed: &[(u64, OwnedUserId)]| -> Vec<OwnedUserId> {
            feed.iter()
                .filter(|(sequence, _)| *sequence > from && *sequence <= to)
                .map(|(_, user_id)| user_id.clone())
                .collect()
        };

        Ok(KeyChangesResponse { changed: collect(&state.changed), left: collect(&state.left) })
    }

    async fn send_state_event(
        &self,
        room_id: &RoomId,
        content: &RoomEncryptionContent,
    ) -> Result<OwnedEventId, TransportError> {
        let mut state = self.server.state.lock().unwrap();
        offline_check(&state)?;

        state.sequence += 1;
        let event_id = EventId::parse(format!("$event{}:localhost", state.sequence))
            .expect("generated event ids are valid");

        state
            .timelines
            .entry(room_id.to_owned())
            .or_default()
            .push((event_id.clone(), content.clone()));

        Ok(event_id)
    }
}
