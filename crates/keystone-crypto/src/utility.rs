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

use ruma::{canonical_json::to_canonical_value, DeviceKeyAlgorithm, DeviceKeyId, UserId};
use serde_json::Value;
use vodozemac::Ed25519PublicKey;

use crate::{error::SignatureError, types::Signatures};

/// Convert a JSON object into the canonical string form that signatures are
/// computed over.
///
/// The `signatures` and `unsigned` fields are never part of the signed
/// payload and get stripped before canonicalization.
pub(crate) fn canonical_json(mut object: Value) -> Result<String, SignatureError> {
    let json_object = object.as_object_mut().ok_or(SignatureError::NotAnObject)?;
    json_object.remove("signatures");
    json_object.remove("unsigned");

    Ok(to_canonical_value(&object)?.to_string())
}

/// Trait implemented by public keys that can check the signature of a signed
/// JSON object.
pub trait VerifyJson {
    /// Verify that the given JSON object carries a valid signature from the
    /// given user and key id.
    ///
    /// The object is canonicalized, minus its `signatures` and `unsigned`
    /// fields, before the signature is checked.
    fn verify_json(
        &self,
        user_id: &UserId,
        key_id: &DeviceKeyId,
        signed_object: Value,
    ) -> Result<(), SignatureError>;

    /// Verify a signature over an already canonicalized string.
    ///
    /// Only useful if the same object needs to be checked multiple times and
    /// the canonicalization step should happen once. The caller is
    /// responsible for the string being correctly canonicalized.
    fn verify_canonicalized_json(
        &self,
        user_id: &UserId,
        key_id: &DeviceKeyId,
        signatures: &Signatures,
        canonical_json: &str,
    ) -> Result<(), SignatureError>;
}

impl VerifyJson for Ed25519PublicKey {
    fn verify_json(
        &self,
        user_id: &UserId,
        key_id: &DeviceKeyId,
        mut signed_object: Value,
    ) -> Result<(), SignatureError> {
        if key_id.algorithm() != DeviceKeyAlgorithm::Ed25519 {
            return Err(SignatureError::UnsupportedAlgorithm);
        }

        let object = signed_object.as_object_mut().ok_or(SignatureError::NotAnObject)?;
        let signatures = object.remove("signatures").ok_or(SignatureError::NoSignatureFound)?;
        let signatures: Signatures = serde_json::from_value(signatures)?;
        object.remove("unsigned");

        let canonical = to_canonical_value(&signed_object)?.to_string();

        self.verify_canonicalized_json(user_id, key_id, &signatures, &canonical)
    }

    fn verify_canonicalized_json(
        &self,
        user_id: &UserId,
        key_id: &DeviceKeyId,
        signatures: &Signatures,
        canonical_json: &str,
    ) -> Result<(), SignatureError> {
        let signature = signatures
            .get_signature(user_id, key_id)
            .ok_or(SignatureError::NoSignatureFound)?;

        Ok(self.verify(canonical_json.as_bytes(), &signature)?)
    }
}
