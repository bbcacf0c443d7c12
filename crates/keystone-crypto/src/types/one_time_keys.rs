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

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use vodozemac::Curve25519PublicKey;

use super::Signatures;

/// A Curve25519 one-time prekey wrapped with the publishing device's
/// signature, keyed under the `signed_curve25519` algorithm.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SignedKey {
    /// The Curve25519 key that can be used to establish a session.
    #[serde(serialize_with = "serialize_curve_key", deserialize_with = "deserialize_curve_key")]
    key: Curve25519PublicKey,

    /// Signatures of the publishing device over the canonical form of the
    /// key object.
    signatures: Signatures,

    /// Fields the publishing client attached that we don't interpret,
    /// carried along so the signature stays valid across a round-trip.
    #[serde(flatten)]
    other: BTreeMap<String, Value>,
}

impl SignedKey {
    /// Create a new, not yet signed, `SignedKey` wrapping the given key.
    pub fn new(key: Curve25519PublicKey) -> Self {
        Self { key, signatures: Signatures::new(), other: BTreeMap::new() }
    }

    /// The wrapped Curve25519 public key.
    pub fn key(&self) -> Curve25519PublicKey {
        self.key
    }

    /// The signatures the key carries.
    pub fn signatures(&self) -> &Signatures {
        &self.signatures
    }

    /// Mutable access to the signatures, used while signing the key.
    pub fn signatures_mut(&mut self) -> &mut Signatures {
        &mut self.signatures
    }
}

/// A one-time prekey as it appears in an upload request or a directory
/// response.
///
/// The algorithm prefix of the key name, `curve25519` or
/// `signed_curve25519`, is the sole discriminator telling a consumer
/// whether the key carries a signature that has to be verified before use.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OneTimeKey {
    /// A signed Curve25519 one-time key.
    Signed(SignedKey),

    /// A raw, unsigned Curve25519 one-time key.
    #[serde(
        serialize_with = "serialize_curve_key",
        deserialize_with = "deserialize_curve_key"
    )]
    Key(Curve25519PublicKey),
}

// Vodozemac serializes Curve25519 keys as byte slices, the wire format wants
// them base64 encoded.
fn deserialize_curve_key<'de, D>(deserializer: D) -> Result<Curve25519PublicKey, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let key: String = Deserialize::deserialize(deserializer)?;

    Curve25519PublicKey::from_base64(&key).map_err(serde::de::Error::custom)
}

fn serialize_curve_key<S>(key: &Curve25519PublicKey, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&key.to_base64())
}
