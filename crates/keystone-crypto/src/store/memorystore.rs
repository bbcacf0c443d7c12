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
use tokio::sync::RwLock;

use super::KeyStore;
use crate::{account::PickledAccount, error::StoreError};

/// An in-memory [`KeyStore`].
///
/// Everything is lost when the store is dropped; useful for tests and for
/// ephemeral clients that don't want their identity to outlive the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    account: RwLock<Option<String>>,
}

impl MemoryStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn load_account(&self) -> Result<Option<PickledAccount>, StoreError> {
        self.account
            .read()
            .await
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(StoreError::from)
    }

    async fn save_account(&self, account: PickledAccount) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(&account)?;
        *self.account.write().await = Some(serialized);

        Ok(())
    }

    async fn delete_account(&self) -> Result<(), StoreError> {
        *self.account.write().await = None;

        Ok(())
    }
}
