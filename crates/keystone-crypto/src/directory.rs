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

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use ruma::{OwnedDeviceId, OwnedUserId};
use tracing::{debug, instrument, warn};

use crate::{
    device::DeviceIdentity,
    error::TransportError,
    requests::{KeysQueryRequest, KeysQueryResponse},
    transport::Transport,
    types::DeviceKeys,
};

/// The verified result of a key directory query.
#[derive(Clone, Debug, Default)]
pub struct KeyQueryResult {
    /// The verified device records, per user and device. A queried user
    /// with no published devices appears with an empty device map.
    pub device_keys: BTreeMap<OwnedUserId, BTreeMap<OwnedDeviceId, DeviceIdentity>>,

    /// The servers the directory couldn't reach for a part of the query.
    pub failures: BTreeSet<String>,

    /// Devices whose records were present but couldn't be verified. They
    /// are dropped from `device_keys` and must never be trusted, but stay
    /// visible so a caller can tell "no such key" from "key present but
    /// untrusted".
    pub invalid_devices: BTreeMap<OwnedUserId, BTreeSet<OwnedDeviceId>>,
}

/// A client for the remote key directory.
///
/// Issues key queries and reconciles the fan-out responses: every returned
/// device record is checked against its own claimed signing key before it
/// is surfaced, and a record failing verification doesn't invalidate the
/// other devices of the same response.
///
/// The client is stateless; overlapping concurrent queries are independent
/// and no caching happens at this layer.
#[derive(Clone, Debug)]
pub struct KeyDirectoryClient {
    transport: Arc<dyn Transport>,
}

impl KeyDirectoryClient {
    /// Create a new client on top of the given transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Query the directory for the given users' device keys and verify the
    /// response.
    ///
    /// Per-server failures inside a partially successful response end up in
    /// [`KeyQueryResult::failures`]; only a transport breakdown makes the
    /// whole query fail.
    #[instrument(skip(self))]
    pub async fn query(&self, request: KeysQueryRequest) -> Result<KeyQueryResult, TransportError> {
        let response = self.transport.query_keys(&request).await?;

        Ok(Self::reconcile(response))
    }

    fn reconcile(response: KeysQueryResponse) -> KeyQueryResult {
        let mut result = KeyQueryResult {
            failures: response.failures.into_keys().collect(),
            ..Default::default()
        };

        for (user_id, device_map) in response.device_keys {
            let devices = result.device_keys.entry(user_id.clone()).or_default();

            for (device_id, device_keys) in device_map {
                let device_keys = match device_keys.deserialize_as::<DeviceKeys>() {
                    Ok(device_keys) => device_keys,
                    Err(error) => {
                        warn!(
                            %user_id,
                            %device_id,
                            ?error,
                            "A device key record failed to deserialize",
                        );
                        result
                            .invalid_devices
                            .entry(user_id.clone())
                            .or_default()
                            .insert(device_id);
                        continue;
                    }
                };

                if user_id != device_keys.user_id || device_id != device_keys.device_id {
                    warn!(
                        %user_id,
                        %device_id,
                        claimed_user_id = %device_keys.user_id,
                        claimed_device_id = %device_keys.device_id,
                        "Mismatch in the device keys payload",
                    );
                    result.invalid_devices.entry(user_id.clone()).or_default().insert(device_id);
                    continue;
                }

                match DeviceIdentity::try_from(&device_keys) {
                    Ok(device) => {
                        devices.insert(device_id, device);
                    }
                    Err(error) => {
                        warn!(
                            %user_id,
                            %device_id,
                            ?error,
                            "A device key record failed signature verification",
                        );
                        result
                            .invalid_devices
                            .entry(user_id.clone())
                            .or_default()
                            .insert(device_id);
                    }
                }
            }
        }

        debug!(
            users = result.device_keys.len(),
            failures = result.failures.len(),
            "Reconciled a key query response"
        );

        result
    }
}
