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

use std::{collections::BTreeSet, fmt, sync::Arc};

use ruma::OwnedUserId;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::{error::TransportError, transport::Transport};

/// An opaque marker of a client's progress through its account's event
/// stream.
///
/// The server mints tokens in a strictly increasing sequence per account;
/// the client treats them as opaque and only ever compares them for
/// equality. Comparing tokens minted for different accounts is undefined.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncToken(String);

impl SyncToken {
    /// Wrap a token received from the sync feed.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The token in its wire form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SyncToken {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

/// The set of users whose device lists changed between two sync positions.
///
/// The two sets are disjoint: a user that left all shared rooms appears in
/// `left` only, even if their keys also changed in the interval.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyChangeDelta {
    /// Users that published, replaced or revoked device keys in the
    /// interval. Their cached device lists have to be re-queried before
    /// they may be trusted again.
    pub changed: BTreeSet<OwnedUserId>,

    /// Users we stopped sharing encrypted rooms with; their device lists
    /// don't need to be tracked anymore.
    pub left: BTreeSet<OwnedUserId>,
}

impl KeyChangeDelta {
    /// Did anything change in the interval?
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.left.is_empty()
    }
}

/// Correlates two sync positions to the set of users whose device lists
/// changed in between.
///
/// This is purely a query against the directory's change feed; no key
/// verification happens here. Callers are expected to run a
/// [`KeyDirectoryClient::query`] for every user reported as changed before
/// trusting that user's previously cached keys.
///
/// [`KeyDirectoryClient::query`]: crate::KeyDirectoryClient::query
#[derive(Clone, Debug)]
pub struct KeyChangeTracker {
    transport: Arc<dyn Transport>,
}

impl KeyChangeTracker {
    /// Create a new tracker on top of the given transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// The users whose device sets changed in the half-open interval
    /// `(since, until]`.
    ///
    /// Both tokens must come from the same account's sync sequence. Equal
    /// tokens describe an empty interval; the delta is empty by definition
    /// and no request is made.
    #[instrument(skip(self))]
    pub async fn changes(
        &self,
        since: &SyncToken,
        until: &SyncToken,
    ) -> Result<KeyChangeDelta, TransportError> {
        if since == until {
            return Ok(KeyChangeDelta::default());
        }

        let response = self.transport.key_changes(since, until).await?;

        let left: BTreeSet<OwnedUserId> = response.left.into_iter().collect();
        let mut changed: BTreeSet<OwnedUserId> = response.changed.into_iter().collect();

        for user_id in &left {
            if changed.remove(user_id) {
                warn!(%user_id, "The server reported a user as both changed and left");
            }
        }

        Ok(KeyChangeDelta { changed, left })
    }
}
