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

use ruma::CanonicalJsonError;
use serde_json::Error as SerdeError;
use thiserror::Error;
use vodozemac::Ed25519PublicKey;

/// Error describing a failure while signing a JSON object or while checking
/// the signature of a signed JSON object.
#[derive(Error, Debug)]
pub enum SignatureError {
    /// The signature was made using an unsupported algorithm.
    #[error("the signature used an unsupported algorithm")]
    UnsupportedAlgorithm,

    /// The Ed25519 key that should have signed the object is missing from
    /// the object.
    #[error("the signing key is missing from the object that signed the message")]
    MissingSigningKey,

    /// The signed object couldn't be deserialized.
    #[error(transparent)]
    JsonError(#[from] SerdeError),

    /// The provided JSON value isn't an object.
    #[error("the provided JSON value isn't an object")]
    NotAnObject,

    /// The provided JSON object doesn't contain a signature from the claimed
    /// signer.
    #[error("the provided JSON object doesn't contain a signatures field")]
    NoSignatureFound,

    /// The JSON object couldn't be converted into its canonical form.
    #[error(transparent)]
    CanonicalJson(#[from] CanonicalJsonError),

    /// The user id of the object differs from the user id of the key that
    /// provided the signature.
    #[error("the user id of the object and the user id of the signing key differ")]
    UserIdMismatch,

    /// The Ed25519 key a device signs with changed; a device must keep its
    /// signing key for its whole lifetime.
    #[error("the signing key of the device has changed, old: {0:?}, new: {1:?}")]
    SigningKeyChanged(Option<Box<Ed25519PublicKey>>, Option<Box<Ed25519PublicKey>>),

    /// The signature itself was invalid.
    #[error(transparent)]
    Verification(#[from] vodozemac::SignatureError),
}

/// Error describing a failure of the injected secure key store.
///
/// Store failures are fatal for the enclosing operation and are never
/// retried transparently, a transparent retry could republish key material
/// whose bookkeeping is in an unknown state.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store backend reported a failure.
    #[error("the store backend failed: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync>),

    /// The account couldn't be serialized or deserialized.
    #[error(transparent)]
    Serialization(#[from] SerdeError),

    /// The stored account pickle couldn't be decoded.
    #[error(transparent)]
    Pickle(#[from] vodozemac::PickleError),
}

/// Error describing a failure of the device's own identity provider.
#[derive(Error, Debug)]
pub enum AccountError {
    /// The device identity was already created; it has to be explicitly
    /// reset before another one can be initialized.
    #[error("the device identity has already been initialized")]
    AlreadyInitialized,

    /// The secure store failed while loading or persisting the account.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Error surfaced by the injected transport layer.
///
/// Per-subject failures inside an otherwise successful multi-subject
/// request are not errors; they are reported in the `failures` field of the
/// respective response.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The request didn't reach the server or the connection broke while it
    /// was in flight. Transient; the caller's retry policy applies.
    #[error("network failure: {0}")]
    Network(String),

    /// The server answered with an error.
    #[error("the server returned an error, status {status}: {message}")]
    Server {
        /// The HTTP status code of the response.
        status: u16,
        /// The error message the server returned.
        message: String,
    },
}
