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

use ruma::{DeviceId, DeviceKeyAlgorithm, DeviceKeyId, UserId};
use tracing::trace;
use vodozemac::{Curve25519PublicKey, Ed25519PublicKey};

use crate::{
    error::SignatureError,
    types::{DeviceKeys, SignedKey},
    utility::VerifyJson,
};

/// A remote device's published identity whose self-signature has been
/// verified.
///
/// The only way to construct a `DeviceIdentity` is through
/// [`TryFrom<&DeviceKeys>`], which checks the record's signature against
/// the Ed25519 key the record itself claims; an unverifiable record never
/// becomes a `DeviceIdentity`.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceIdentity {
    device_keys: DeviceKeys,
}

impl DeviceIdentity {
    /// The id of the user the device belongs to.
    pub fn user_id(&self) -> &UserId {
        &self.device_keys.user_id
    }

    /// The id of the device.
    pub fn device_id(&self) -> &DeviceId {
        &self.device_keys.device_id
    }

    /// The long-term Curve25519 identity key of the device.
    pub fn curve25519_key(&self) -> Option<Curve25519PublicKey> {
        self.device_keys.curve25519_key()
    }

    /// The Ed25519 key the device signs its published objects with.
    pub fn ed25519_key(&self) -> Option<Ed25519PublicKey> {
        self.device_keys.ed25519_key()
    }

    /// The verified record in its published form.
    pub fn as_device_keys(&self) -> &DeviceKeys {
        &self.device_keys
    }

    /// Replace this record with a newer directory result for the same
    /// device.
    ///
    /// The new record has to verify, belong to the same user and device,
    /// and keep the Ed25519 signing key; a changed signing key means the
    /// record can't be the same device anymore. Returns `true` if anything
    /// was updated.
    pub fn update(&mut self, device_keys: &DeviceKeys) -> Result<bool, SignatureError> {
        device_keys.check_self_signature()?;

        if self.user_id() != device_keys.user_id || self.device_id() != device_keys.device_id {
            Err(SignatureError::UserIdMismatch)
        } else if self.ed25519_key() != device_keys.ed25519_key() {
            Err(SignatureError::SigningKeyChanged(
                self.ed25519_key().map(Box::new),
                device_keys.ed25519_key().map(Box::new),
            ))
        } else if &self.device_keys != device_keys {
            trace!(
                user_id = %self.user_id(),
                device_id = %self.device_id(),
                "Updated a device identity",
            );

            self.device_keys = device_keys.clone();

            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Check that the given one-time key was signed by this device.
    pub fn verify_one_time_key(&self, key: &SignedKey) -> Result<(), SignatureError> {
        let signing_key = self.ed25519_key().ok_or(SignatureError::MissingSigningKey)?;
        let key_id = DeviceKeyId::from_parts(DeviceKeyAlgorithm::Ed25519, self.device_id());

        signing_key.verify_json(self.user_id(), &key_id, serde_json::to_value(key)?)
    }
}

impl TryFrom<&DeviceKeys> for DeviceIdentity {
    type Error = SignatureError;

    fn try_from(device_keys: &DeviceKeys) -> Result<Self, Self::Error> {
        device_keys.check_self_signature()?;

        Ok(Self { device_keys: device_keys.clone() })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use ruma::{device_id, user_id};

    use super::DeviceIdentity;
    use crate::{account::Account, error::SignatureError};

    #[test]
    fn only_verified_records_become_identities() {
        let account = Account::new(user_id!("@alice:localhost"), device_id!("ALICEDEVICE"));

        let signed = account.device_keys();
        DeviceIdentity::try_from(&signed).unwrap();

        let unsigned = account.unsigned_device_keys();
        assert_matches!(
            DeviceIdentity::try_from(&unsigned),
            Err(SignatureError::NoSignatureFound)
        );
    }

    #[test]
    fn updates_from_a_different_device_are_rejected() {
        let alice = Account::new(user_id!("@alice:localhost"), device_id!("ALICEDEVICE"));
        let eve = Account::new(user_id!("@eve:localhost"), device_id!("EVEDEVICE"));

        let mut identity = DeviceIdentity::try_from(&alice.device_keys()).unwrap();

        assert_matches!(
            identity.update(&eve.device_keys()),
            Err(SignatureError::UserIdMismatch)
        );

        // A verifying record for the same ids but a rotated signing key is
        // rejected as well.
        let impostor = Account::new(user_id!("@alice:localhost"), device_id!("ALICEDEVICE"));
        assert_matches!(
            identity.update(&impostor.device_keys()),
            Err(SignatureError::SigningKeyChanged(_, _))
        );

        // Re-applying the same record is a no-op.
        assert!(!identity.update(&alice.device_keys()).unwrap());
    }
}
