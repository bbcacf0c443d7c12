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

use std::collections::BTreeMap;

use ruma::{
    DeviceKeyAlgorithm, DeviceKeyId, EventEncryptionAlgorithm, OwnedDeviceId, OwnedDeviceKeyId,
    OwnedUserId,
};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use vodozemac::{Curve25519PublicKey, Ed25519PublicKey};

use super::Signatures;
use crate::{error::SignatureError, utility::VerifyJson};

/// The public identity keys of a single device, in the form they are
/// published to and fetched from the key directory.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DeviceKeys {
    /// The id of the user the device belongs to.
    pub user_id: OwnedUserId,

    /// The id of the device these keys belong to.
    pub device_id: OwnedDeviceId,

    /// The encryption algorithms the device supports.
    pub algorithms: Vec<EventEncryptionAlgorithm>,

    /// The public identity keys, keyed by `<algorithm>:<device_id>`.
    #[serde(
        serialize_with = "serialize_device_key_map",
        deserialize_with = "deserialize_device_key_map"
    )]
    pub keys: BTreeMap<OwnedDeviceKeyId, DeviceKey>,

    /// Signatures over the canonical form of this object, at minimum the
    /// device's own self-signature.
    pub signatures: Signatures,

    /// Fields the publishing client attached that we don't interpret,
    /// carried along so the signature stays valid across a round-trip.
    #[serde(flatten)]
    other: BTreeMap<String, Value>,
}

impl DeviceKeys {
    /// Create a new `DeviceKeys` object for the given device and key set.
    pub fn new(
        user_id: OwnedUserId,
        device_id: OwnedDeviceId,
        algorithms: Vec<EventEncryptionAlgorithm>,
        keys: BTreeMap<OwnedDeviceKeyId, DeviceKey>,
        signatures: Signatures,
    ) -> Self {
        Self { user_id, device_id, algorithms, keys, signatures, other: BTreeMap::new() }
    }

    /// The long-term Curve25519 identity key of the device.
    pub fn curve25519_key(&self) -> Option<Curve25519PublicKey> {
        self.get_key(DeviceKeyAlgorithm::Curve25519).and_then(DeviceKey::curve25519)
    }

    /// The Ed25519 key the device signs its published objects with.
    pub fn ed25519_key(&self) -> Option<Ed25519PublicKey> {
        self.get_key(DeviceKeyAlgorithm::Ed25519).and_then(DeviceKey::ed25519)
    }

    fn get_key(&self, algorithm: DeviceKeyAlgorithm) -> Option<&DeviceKey> {
        self.keys.get(&DeviceKeyId::from_parts(algorithm, &self.device_id))
    }

    /// Check that the object carries a valid signature from its own claimed
    /// Ed25519 key.
    ///
    /// Every record fetched from the directory has to pass this check before
    /// any of its fields may be trusted.
    pub fn check_self_signature(&self) -> Result<(), SignatureError> {
        let signing_key = self.ed25519_key().ok_or(SignatureError::MissingSigningKey)?;
        let key_id = DeviceKeyId::from_parts(DeviceKeyAlgorithm::Ed25519, &self.device_id);

        signing_key.verify_json(&self.user_id, &key_id, serde_json::to_value(self)?)
    }
}

/// A single public key belonging to a device.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceKey {
    /// A Curve25519 key, used to establish sessions with the device.
    Curve25519(Curve25519PublicKey),
    /// An Ed25519 key, used by the device to sign the objects it publishes.
    Ed25519(Ed25519PublicKey),
    /// A key using an algorithm we don't know about, kept as base64.
    Unknown(String),
}

impl DeviceKey {
    /// Convert the key to a base64 encoded string.
    pub fn to_base64(&self) -> String {
        match self {
            Self::Curve25519(key) => key.to_base64(),
            Self::Ed25519(key) => key.to_base64(),
            Self::Unknown(key) => key.clone(),
        }
    }

    /// Get the Curve25519 key, if this is one.
    pub fn curve25519(&self) -> Option<Curve25519PublicKey> {
        match self {
            Self::Curve25519(key) => Some(*key),
            _ => None,
        }
    }

    /// Get the Ed25519 key, if this is one.
    pub fn ed25519(&self) -> Option<Ed25519PublicKey> {
        match self {
            Self::Ed25519(key) => Some(*key),
            _ => None,
        }
    }
}

fn deserialize_device_key_map<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<OwnedDeviceKeyId, DeviceKey>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let map: BTreeMap<OwnedDeviceKeyId, String> = Deserialize::deserialize(deserializer)?;

    map.into_iter()
        .map(|(key_id, key)| {
            let key = match key_id.algorithm() {
                DeviceKeyAlgorithm::Curve25519 => Curve25519PublicKey::from_base64(&key)
                    .map(DeviceKey::Curve25519)
                    .map_err(serde::de::Error::custom)?,
                DeviceKeyAlgorithm::Ed25519 => Ed25519PublicKey::from_base64(&key)
                    .map(DeviceKey::Ed25519)
                    .map_err(serde::de::Error::custom)?,
                _ => DeviceKey::Unknown(key),
            };

            Ok((key_id, key))
        })
        .collect()
}

fn serialize_device_key_map<S>(
    keys: &BTreeMap<OwnedDeviceKeyId, DeviceKey>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let keys: BTreeMap<&OwnedDeviceKeyId, String> =
        keys.iter().map(|(key_id, key)| (key_id, key.to_base64())).collect();

    keys.serialize(serializer)
}
