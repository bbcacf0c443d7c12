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

//! The injected secure store for a device's long-term key material.

mod memorystore;

use async_trait::async_trait;
pub use memorystore::MemoryStore;

use crate::{account::PickledAccount, error::StoreError};

/// A secure store holding the pickled account of a single device.
///
/// The store owns the at-rest representation; implementations are expected
/// to encrypt the pickle before it touches disk. One store serves exactly
/// one device, the pickle it hands out contains both the private identity
/// keys and the unpublished/published prekey partition.
#[async_trait]
pub trait KeyStore: std::fmt::Debug + Send + Sync {
    /// Load the previously stored account, if any.
    async fn load_account(&self) -> Result<Option<PickledAccount>, StoreError>;

    /// Persist the given account, replacing a previously stored one.
    async fn save_account(&self, account: PickledAccount) -> Result<(), StoreError>;

    /// Forget the stored account.
    async fn delete_account(&self) -> Result<(), StoreError>;
}
