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
    collections::{BTreeMap, HashMap},
    fmt,
};

use ruma::{
    serde::Raw, DeviceId, DeviceKeyAlgorithm, DeviceKeyId, EventEncryptionAlgorithm,
    OneTimeKeyAlgorithm, OneTimeKeyId, OwnedDeviceId, OwnedOneTimeKeyId, OwnedUserId, UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};
use vodozemac::{
    olm::{Account as InnerAccount, AccountPickle, IdentityKeys},
    Curve25519PublicKey, Ed25519Signature, KeyId,
};

use crate::{
    error::{AccountError, SignatureError},
    requests::{KeysUploadRequest, KeysUploadResponse},
    store::KeyStore,
    types::{DeviceKey, DeviceKeys, OneTimeKey, SignedKey, Signatures},
    utility::canonical_json,
};

/// A device's long-term cryptographic identity and its pool of one-time
/// prekeys.
///
/// The identity key pair is generated once, when the account is created, and
/// stays fixed for the lifetime of the device. One-time prekeys are
/// generated in batches on demand and move through a strict
/// unpublished-to-published lifecycle: a key is offered for upload only
/// while unpublished and gets marked as published strictly after the upload
/// was acknowledged, never speculatively.
///
/// An `Account` is exclusively owned by its device. All mutating operations
/// take `&mut self`, which enforces the single-writer discipline the prekey
/// bookkeeping needs; wrap the account in a [`tokio::sync::Mutex`] if it has
/// to be shared. Accounts of different devices are fully independent.
pub struct Account {
    user_id: OwnedUserId,
    device_id: OwnedDeviceId,
    identity_keys: IdentityKeys,
    inner: Box<InnerAccount>,
    /// Did the server acknowledge an upload of our identity keys yet?
    shared: bool,
    /// The number of signed one-time keys the server holds for us, as
    /// reported by the last upload acknowledgment.
    uploaded_key_count: u64,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("user_id", &self.user_id)
            .field("device_id", &self.device_id)
            .field("identity_keys", &self.identity_keys)
            .field("shared", &self.shared)
            .finish()
    }
}

impl Account {
    /// Create a fresh account, generating a new identity key pair.
    ///
    /// The account starts out with an empty prekey pool; use
    /// [`Account::generate_one_time_keys()`] to fill it.
    pub fn new(user_id: &UserId, device_id: &DeviceId) -> Self {
        let inner = InnerAccount::new();
        let identity_keys = inner.identity_keys();

        Self {
            user_id: user_id.to_owned(),
            device_id: device_id.to_owned(),
            identity_keys,
            inner: Box::new(inner),
            shared: false,
            uploaded_key_count: 0,
        }
    }

    /// Create the device's identity and persist it to the given store.
    ///
    /// Fails with [`AccountError::AlreadyInitialized`] if the store already
    /// holds an identity for this device; an identity is created exactly
    /// once and can only be replaced after an explicit
    /// [`Account::reset()`].
    pub async fn initialize(
        user_id: &UserId,
        device_id: &DeviceId,
        store: &dyn KeyStore,
    ) -> Result<Self, AccountError> {
        if store.load_account().await?.is_some() {
            return Err(AccountError::AlreadyInitialized);
        }

        let account = Self::new(user_id, device_id);
        store.save_account(account.pickle()).await?;

        debug!(
            user_id = %account.user_id,
            device_id = %account.device_id,
            "Created a new device identity"
        );

        Ok(account)
    }

    /// Restore a previously initialized account from the given store.
    pub async fn restore(store: &dyn KeyStore) -> Result<Option<Self>, AccountError> {
        let Some(pickle) = store.load_account().await? else {
            return Ok(None);
        };

        Ok(Some(Self::from_pickle(pickle)))
    }

    /// Remove the persisted identity from the store, allowing
    /// [`Account::initialize()`] to be called again.
    pub async fn reset(store: &dyn KeyStore) -> Result<(), AccountError> {
        store.delete_account().await?;
        Ok(())
    }

    /// The id of the user that owns this account.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// The id of the device that owns this account.
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// The public parts of the account's long-term identity keys.
    ///
    /// Pure accessor, the keys never change once the account exists.
    pub fn identity_keys(&self) -> IdentityKeys {
        self.identity_keys
    }

    /// Did the server acknowledge an upload of our identity keys yet?
    pub fn shared(&self) -> bool {
        self.shared
    }

    /// The number of signed one-time keys the server reported holding for us
    /// in the last upload acknowledgment.
    pub fn uploaded_key_count(&self) -> u64 {
        self.uploaded_key_count
    }

    /// Generate `count` new one-time prekeys, returning the number actually
    /// created.
    ///
    /// The new keys start out unpublished. Keys evicted because the pool ran
    /// over its capacity were never published and are safe to drop.
    pub fn generate_one_time_keys(&mut self, count: usize) -> usize {
        let result = self.inner.generate_one_time_keys(count);

        if !result.removed.is_empty() {
            debug!(
                discarded = result.removed.len(),
                "Generating one-time keys evicted old unpublished keys"
            );
        }

        debug!(count = result.created.len(), "Generated new one-time keys");

        result.created.len()
    }

    /// The maximum number of one-time keys the account can hold.
    pub fn max_one_time_keys(&self) -> usize {
        self.inner.max_number_of_one_time_keys()
    }

    /// A read-only snapshot of the generated-but-unpublished prekeys.
    ///
    /// Reading the pool doesn't consume anything; keys only leave the pool
    /// through [`Account::receive_keys_upload_response()`] once their upload
    /// was acknowledged.
    pub fn one_time_keys(&self) -> HashMap<KeyId, Curve25519PublicKey> {
        self.inner.one_time_keys()
    }

    /// Sign the given message with the device's Ed25519 key.
    pub fn sign(&self, message: &str) -> Ed25519Signature {
        self.inner.sign(message)
    }

    /// Sign the canonical form of the given JSON object.
    ///
    /// The `signatures` and `unsigned` fields are stripped before the object
    /// is canonicalized, matching what verifiers do on their side.
    pub fn sign_json(&self, value: Value) -> Result<Ed25519Signature, SignatureError> {
        Ok(self.sign(&canonical_json(value)?))
    }

    /// The device's public identity keys, without a self-signature.
    pub fn unsigned_device_keys(&self) -> DeviceKeys {
        let keys = BTreeMap::from([
            (
                DeviceKeyId::from_parts(DeviceKeyAlgorithm::Curve25519, &self.device_id),
                DeviceKey::Curve25519(self.identity_keys.curve25519),
            ),
            (
                DeviceKeyId::from_parts(DeviceKeyAlgorithm::Ed25519, &self.device_id),
                DeviceKey::Ed25519(self.identity_keys.ed25519),
            ),
        ]);

        DeviceKeys::new(
            self.user_id.clone(),
            self.device_id.clone(),
            vec![
                EventEncryptionAlgorithm::OlmV1Curve25519AesSha2,
                EventEncryptionAlgorithm::MegolmV1AesSha2,
            ],
            keys,
            Signatures::new(),
        )
    }

    /// The device's identity keys, self-signed and ready for publication.
    pub fn device_keys(&self) -> DeviceKeys {
        let mut device_keys = self.unsigned_device_keys();

        let signature = self
            .sign_json(
                serde_json::to_value(&device_keys)
                    .expect("device keys can always be serialized"),
            )
            .expect("newly created device keys can always be signed");

        device_keys.signatures.add_signature(
            self.user_id.clone(),
            DeviceKeyId::from_parts(DeviceKeyAlgorithm::Ed25519, &self.device_id),
            signature,
        );

        device_keys
    }

    /// All unpublished prekeys, each wrapped in a signature bundle and keyed
    /// as `signed_curve25519:<key_id>`.
    pub fn signed_one_time_keys(&self) -> BTreeMap<OwnedOneTimeKeyId, Raw<OneTimeKey>> {
        self.one_time_keys()
            .into_iter()
            .map(|(key_id, key)| {
                let signed = self.sign_one_time_key(key);

                (
                    OneTimeKeyId::from_parts(
                        OneTimeKeyAlgorithm::SignedCurve25519,
                        key_id.to_base64().as_str().into(),
                    ),
                    Raw::new(&OneTimeKey::Signed(signed))
                        .expect("one-time keys can always be serialized"),
                )
            })
            .collect()
    }

    /// All unpublished prekeys, raw, keyed as `curve25519:<key_id>`.
    ///
    /// The missing `signed_` prefix tells consumers that there is no
    /// signature to check before using the key.
    pub fn raw_one_time_keys(&self) -> BTreeMap<OwnedOneTimeKeyId, Raw<OneTimeKey>> {
        self.one_time_keys()
            .into_iter()
            .map(|(key_id, key)| {
                (
                    OneTimeKeyId::from_parts(
                        OneTimeKeyAlgorithm::from("curve25519"),
                        key_id.to_base64().as_str().into(),
                    ),
                    Raw::new(&OneTimeKey::Key(key))
                        .expect("one-time keys can always be serialized"),
                )
            })
            .collect()
    }

    fn sign_one_time_key(&self, key: Curve25519PublicKey) -> SignedKey {
        let mut key = SignedKey::new(key);

        let signature = self
            .sign_json(
                serde_json::to_value(&key).expect("one-time keys can always be serialized"),
            )
            .expect("newly created one-time keys can always be signed");

        key.signatures_mut().add_signature(
            self.user_id.clone(),
            DeviceKeyId::from_parts(DeviceKeyAlgorithm::Ed25519, &self.device_id),
            signature,
        );

        key
    }

    /// Build an upload request carrying only the self-signed identity keys.
    ///
    /// Republishing identity keys is idempotent, the server sees the same
    /// keys and signature every time.
    pub fn identity_upload_request(&self) -> KeysUploadRequest {
        KeysUploadRequest {
            device_keys: Some(
                Raw::new(&self.device_keys()).expect("device keys can always be serialized"),
            ),
            one_time_keys: BTreeMap::new(),
        }
    }

    /// Build an upload request carrying every unpublished prekey.
    ///
    /// One mode per batch: all keys in the request are either raw or
    /// individually signed, selected by `signed`; the two are never mixed in
    /// a single request.
    pub fn one_time_key_upload_request(&self, signed: bool) -> KeysUploadRequest {
        let one_time_keys =
            if signed { self.signed_one_time_keys() } else { self.raw_one_time_keys() };

        KeysUploadRequest { device_keys: None, one_time_keys }
    }

    /// Build the full upload request: the self-signed identity keys plus
    /// every unpublished prekey.
    ///
    /// This is the common publication path. An already published prekey is
    /// never offered again; the request only contains the unpublished part
    /// of the pool.
    pub fn create_upload_request(&self, signed: bool) -> KeysUploadRequest {
        KeysUploadRequest {
            device_keys: Some(
                Raw::new(&self.device_keys()).expect("device keys can always be serialized"),
            ),
            one_time_keys: if signed {
                self.signed_one_time_keys()
            } else {
                self.raw_one_time_keys()
            },
        }
    }

    /// Handle the server's acknowledgment of a key upload.
    ///
    /// Marks the prekeys carried by the acknowledged request as published,
    /// excluding them from all future uploads, and records the server's
    /// one-time key count. This is the only place where keys move from the
    /// unpublished to the published partition; an abandoned or failed upload
    /// leaves the pool untouched.
    #[instrument(skip_all)]
    pub fn receive_keys_upload_response(
        &mut self,
        request: &KeysUploadRequest,
        response: &KeysUploadResponse,
    ) {
        if !self.shared {
            debug!("Marking the account as shared");
            self.shared = true;
        }

        let count = response
            .one_time_key_counts
            .get(&OneTimeKeyAlgorithm::SignedCurve25519)
            .copied()
            .unwrap_or_default();

        if count != self.uploaded_key_count {
            debug!(
                old_count = self.uploaded_key_count,
                new_count = count,
                "Updated the uploaded one-time key count"
            );
            self.uploaded_key_count = count;
        }

        if !request.one_time_keys.is_empty() {
            debug!(
                count = request.one_time_keys.len(),
                "Marking one-time keys as published"
            );
            self.inner.mark_keys_as_published();
        }
    }

    /// Get a serializable version of the account, for the secure store.
    pub fn pickle(&self) -> PickledAccount {
        PickledAccount {
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
            pickle: self.inner.pickle(),
            shared: self.shared,
            uploaded_key_count: self.uploaded_key_count,
        }
    }

    /// Restore an account from its pickled form.
    pub fn from_pickle(pickle: PickledAccount) -> Self {
        let inner: InnerAccount = pickle.pickle.into();
        let identity_keys = inner.identity_keys();

        Self {
            user_id: pickle.user_id,
            device_id: pickle.device_id,
            identity_keys,
            inner: Box::new(inner),
            shared: pickle.shared,
            uploaded_key_count: pickle.uploaded_key_count,
        }
    }
}

/// A pickled version of an [`Account`].
///
/// Holds everything the secure store needs to persist so the account can be
/// restored, including the private identity keys and the
/// unpublished/published prekey partition.
#[derive(Serialize, Deserialize)]
#[allow(missing_debug_implementations)]
pub struct PickledAccount {
    /// The id of the user that owns the account.
    pub user_id: OwnedUserId,
    /// The id of the device that owns the account.
    pub device_id: OwnedDeviceId,
    /// The pickled account key material.
    pub pickle: AccountPickle,
    /// Was an upload of the identity keys acknowledged.
    pub shared: bool,
    /// The number of uploaded one-time keys the server holds for us.
    pub uploaded_key_count: u64,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use ruma::{device_id, user_id, DeviceId, OneTimeKeyAlgorithm, UserId};

    use super::Account;
    use crate::{
        device::DeviceIdentity,
        error::AccountError,
        requests::KeysUploadResponse,
        store::{KeyStore, MemoryStore},
        types::OneTimeKey,
    };

    fn alice() -> &'static UserId {
        user_id!("@alice:localhost")
    }

    fn alice_device() -> &'static DeviceId {
        device_id!("ALICEDEVICE")
    }

    fn response_with_count(count: u64) -> KeysUploadResponse {
        KeysUploadResponse {
            one_time_key_counts: [(OneTimeKeyAlgorithm::SignedCurve25519, count)].into(),
        }
    }

    #[test]
    fn one_time_key_generation_fills_the_unpublished_pool() {
        let mut account = Account::new(alice(), alice_device());
        assert!(account.one_time_keys().is_empty());

        assert_eq!(account.generate_one_time_keys(5), 5);
        assert_eq!(account.one_time_keys().len(), 5);

        // Reading the pool is a snapshot, not a consuming operation.
        assert_eq!(account.one_time_keys().len(), 5);
    }

    #[test]
    fn prekeys_are_marked_published_only_after_an_acknowledgment() {
        let mut account = Account::new(alice(), alice_device());
        account.generate_one_time_keys(5);

        let request = account.create_upload_request(true);
        assert_eq!(request.one_time_keys.len(), 5);
        // Building the request must not consume the pool.
        assert_eq!(account.one_time_keys().len(), 5);

        account.receive_keys_upload_response(&request, &response_with_count(5));

        assert!(account.one_time_keys().is_empty());
        assert!(account.shared());
        assert_eq!(account.uploaded_key_count(), 5);

        // Freshly generated keys get new ids, a published key is never
        // offered again.
        account.generate_one_time_keys(2);
        let next = account.create_upload_request(true);
        assert_eq!(next.one_time_keys.len(), 2);

        for key_id in next.one_time_keys.keys() {
            assert!(!request.one_time_keys.contains_key(key_id));
        }
    }

    #[test]
    fn an_identity_only_acknowledgment_leaves_the_pool_alone() {
        let mut account = Account::new(alice(), alice_device());
        account.generate_one_time_keys(3);

        let request = account.identity_upload_request();
        assert!(request.one_time_keys.is_empty());

        account.receive_keys_upload_response(&request, &KeysUploadResponse::default());

        assert!(account.shared());
        assert_eq!(account.one_time_keys().len(), 3);
    }

    #[test]
    fn device_keys_are_self_signed() {
        let account = Account::new(alice(), alice_device());

        let device_keys = account.device_keys();
        device_keys.check_self_signature().unwrap();

        // Signing is deterministic, a republished identity looks identical.
        assert_eq!(device_keys, account.device_keys());
    }

    #[test]
    fn signed_one_time_keys_verify_against_the_device() {
        let mut account = Account::new(alice(), alice_device());
        account.generate_one_time_keys(2);

        let identity = DeviceIdentity::try_from(&account.device_keys()).unwrap();

        for (key_id, key) in account.signed_one_time_keys() {
            assert_eq!(key_id.algorithm(), OneTimeKeyAlgorithm::SignedCurve25519);

            let key = key.deserialize_as::<OneTimeKey>().unwrap();
            let OneTimeKey::Signed(signed) = key else {
                panic!("a signed upload should only contain signed keys");
            };

            identity.verify_one_time_key(&signed).unwrap();
        }
    }

    #[test]
    fn raw_one_time_keys_carry_the_plain_algorithm_prefix() {
        let mut account = Account::new(alice(), alice_device());
        account.generate_one_time_keys(2);

        let request = account.one_time_key_upload_request(false);
        assert!(request.device_keys.is_none());
        assert_eq!(request.one_time_keys.len(), 2);

        for (key_id, key) in &request.one_time_keys {
            assert_eq!(key_id.algorithm(), OneTimeKeyAlgorithm::from("curve25519"));
            assert_matches!(
                key.deserialize_as::<OneTimeKey>().unwrap(),
                OneTimeKey::Key(_)
            );
        }
    }

    #[tokio::test]
    async fn initialization_is_exclusive_until_reset() {
        let store = MemoryStore::new();

        Account::initialize(alice(), alice_device(), &store).await.unwrap();
        assert_matches!(
            Account::initialize(alice(), alice_device(), &store).await,
            Err(AccountError::AlreadyInitialized)
        );

        Account::reset(&store).await.unwrap();
        Account::initialize(alice(), alice_device(), &store).await.unwrap();
    }

    #[tokio::test]
    async fn a_restored_account_keeps_its_identity_and_pool() {
        let store = MemoryStore::new();

        let mut account = Account::initialize(alice(), alice_device(), &store).await.unwrap();
        account.generate_one_time_keys(3);
        store.save_account(account.pickle()).await.unwrap();

        let restored = Account::restore(&store).await.unwrap().unwrap();

        assert_eq!(restored.user_id(), account.user_id());
        assert_eq!(restored.device_id(), account.device_id());
        assert_eq!(
            restored.identity_keys().curve25519,
            account.identity_keys().curve25519
        );
        assert_eq!(restored.identity_keys().ed25519, account.identity_keys().ed25519);
        assert_eq!(restored.one_time_keys().len(), 3);
    }
}
