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

//! Types modeling the key objects the directory exchanges.
//!
//! The types deserialize directly into vodozemac key types and support
//! lossless serialization cycles: white-space and field order aren't
//! preserved, but the data is, so canonical-JSON signatures stay valid
//! across a round-trip.

mod device_keys;
mod events;
mod one_time_keys;

use std::collections::BTreeMap;

pub use device_keys::{DeviceKey, DeviceKeys};
pub use events::RoomEncryptionContent;
pub use one_time_keys::{OneTimeKey, SignedKey};
use ruma::{DeviceKeyAlgorithm, DeviceKeyId, OwnedDeviceKeyId, OwnedUserId, UserId};
use serde::{Deserialize, Serialize, Serializer};
use vodozemac::Ed25519Signature;

/// A single digital signature attached to a signed key object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Signature {
    /// An Ed25519 digital signature.
    Ed25519(Ed25519Signature),
    /// A signature using an algorithm we don't support, kept as a base64
    /// encoded string.
    Other(String),
    /// An Ed25519 signature that couldn't be decoded, left unmodified so a
    /// serialization cycle stays lossless.
    Invalid(String),
}

impl Signature {
    /// Get the Ed25519 signature, if this is one.
    pub fn ed25519(&self) -> Option<Ed25519Signature> {
        match self {
            Self::Ed25519(signature) => Some(*signature),
            _ => None,
        }
    }

    /// Convert the signature to a base64 encoded string.
    pub fn to_base64(&self) -> String {
        match self {
            Self::Ed25519(signature) => signature.to_base64(),
            Self::Other(signature) | Self::Invalid(signature) => signature.clone(),
        }
    }
}

impl From<Ed25519Signature> for Signature {
    fn from(signature: Ed25519Signature) -> Self {
        Self::Ed25519(signature)
    }
}

/// The collection of signatures a signed key object carries, keyed by the
/// signing user and the id of the signing key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Signatures(BTreeMap<OwnedUserId, BTreeMap<OwnedDeviceKeyId, Signature>>);

impl Signatures {
    /// Create an empty signature collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a signature from the given signer under the given key id,
    /// returning the signature it replaced, if any.
    pub fn add_signature(
        &mut self,
        signer: OwnedUserId,
        key_id: OwnedDeviceKeyId,
        signature: Ed25519Signature,
    ) -> Option<Signature> {
        self.0.entry(signer).or_default().insert(key_id, signature.into())
    }

    /// Try to find an Ed25519 signature from the given signer with the given
    /// key id.
    pub fn get_signature(&self, signer: &UserId, key_id: &DeviceKeyId) -> Option<Ed25519Signature> {
        self.get(signer)?.get(key_id)?.ed25519()
    }

    /// Get all the signatures that belong to the given signer.
    pub fn get(&self, signer: &UserId) -> Option<&BTreeMap<OwnedDeviceKeyId, Signature>> {
        self.0.get(signer)
    }

    /// Do we hold any signatures at all?
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for Signatures {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let map: BTreeMap<OwnedUserId, BTreeMap<OwnedDeviceKeyId, String>> =
            Deserialize::deserialize(deserializer)?;

        let map = map
            .into_iter()
            .map(|(signer, signatures)| {
                let signatures = signatures
                    .into_iter()
                    .map(|(key_id, signature)| {
                        let signature = match key_id.algorithm() {
                            DeviceKeyAlgorithm::Ed25519 => Ed25519Signature::from_base64(&signature)
                                .map(Signature::Ed25519)
                                .unwrap_or(Signature::Invalid(signature)),
                            _ => Signature::Other(signature),
                        };

                        (key_id, signature)
                    })
                    .collect();

                (signer, signatures)
            })
            .collect();

        Ok(Self(map))
    }
}

impl Serialize for Signatures {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let signatures: BTreeMap<&OwnedUserId, BTreeMap<&OwnedDeviceKeyId, String>> = self
            .0
            .iter()
            .map(|(signer, signatures)| {
                (signer, signatures.iter().map(|(key_id, s)| (key_id, s.to_base64())).collect())
            })
            .collect();

        signatures.serialize(serializer)
    }
}
