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

use async_trait::async_trait;
use ruma::{OwnedEventId, RoomId};

use crate::{
    error::TransportError,
    requests::{
        KeyChangesResponse, KeysQueryRequest, KeysQueryResponse, KeysUploadRequest,
        KeysUploadResponse,
    },
    tracker::SyncToken,
    types::RoomEncryptionContent,
};

/// Abstraction over the client's authenticated HTTP layer.
///
/// An implementation is injected into every network-facing component; it
/// owns authentication, retries and wire framing. All methods are
/// non-blocking, callers may have any number of requests in flight
/// concurrently.
#[async_trait]
pub trait Transport: std::fmt::Debug + Send + Sync {
    /// Publish device and one-time keys to the key directory.
    ///
    /// The response reports how many one-time keys the directory holds for
    /// the device afterwards, per algorithm.
    async fn upload_keys(
        &self,
        request: &KeysUploadRequest,
    ) -> Result<KeysUploadResponse, TransportError>;

    /// Fetch the published device keys of a set of users.
    async fn query_keys(
        &self,
        request: &KeysQueryRequest,
    ) -> Result<KeysQueryResponse, TransportError>;

    /// Fetch the users whose device lists changed in the half-open interval
    /// `(from, to]` of the account's sync sequence.
    async fn key_changes(
        &self,
        from: &SyncToken,
        to: &SyncToken,
    ) -> Result<KeyChangesResponse, TransportError>;

    /// Send the room state event that enables encryption, returning the id
    /// of the created event.
    async fn send_state_event(
        &self,
        room_id: &RoomId,
        content: &RoomEncryptionContent,
    ) -> Result<OwnedEventId, TransportError>;
}
