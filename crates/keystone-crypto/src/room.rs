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

use std::sync::Arc;

use dashmap::DashMap;
use ruma::{EventEncryptionAlgorithm, OwnedRoomId, RoomId};
use tracing::{debug, instrument};

use crate::{error::TransportError, transport::Transport, types::RoomEncryptionContent};

/// The encryption state of a single room.
///
/// Rooms start out `Disabled` and switch to `Enabled` at most once; the
/// transition is terminal, there is no way back to plain-text messaging.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RoomEncryptionState {
    /// The room hasn't enabled encryption.
    #[default]
    Disabled,

    /// The room has permanently switched to encrypted messaging.
    Enabled {
        /// The algorithm the room's messages are encrypted with.
        algorithm: EventEncryptionAlgorithm,
    },
}

impl RoomEncryptionState {
    /// Has encryption been switched on?
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }
}

/// Applies and observes the room-level "encryption enabled" transition.
#[derive(Debug)]
pub struct RoomEncryptionManager {
    transport: Arc<dyn Transport>,
    states: DashMap<OwnedRoomId, RoomEncryptionState>,
}

impl RoomEncryptionManager {
    /// Create a new manager on top of the given transport. All rooms start
    /// out with encryption disabled.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport, states: DashMap::new() }
    }

    /// Switch the given room over to encrypted messaging.
    ///
    /// Re-invoking this on an already enabled room is a successful no-op
    /// and emits no further state event; other devices may race us on the
    /// transition, so re-application must not be an error.
    #[instrument(skip(self))]
    pub async fn enable(
        &self,
        room_id: &RoomId,
        algorithm: EventEncryptionAlgorithm,
    ) -> Result<(), TransportError> {
        if self.is_encrypted(room_id) {
            debug!(%room_id, "The room already has encryption enabled");
            return Ok(());
        }

        let content = RoomEncryptionContent::new(algorithm.clone());
        let event_id = self.transport.send_state_event(room_id, &content).await?;

        debug!(
            %room_id,
            %event_id,
            algorithm = algorithm.as_str(),
            "Enabled encryption in a room"
        );

        self.mark_enabled(room_id, algorithm);

        Ok(())
    }

    /// Record an encryption marker event observed on the room's timeline.
    ///
    /// The first observation flips the room to `Enabled`; every further one
    /// is idempotent and the state never transitions back.
    pub fn receive_encryption_event(&self, room_id: &RoomId, content: &RoomEncryptionContent) {
        self.mark_enabled(room_id, content.algorithm.clone());
    }

    fn mark_enabled(&self, room_id: &RoomId, algorithm: EventEncryptionAlgorithm) {
        let mut state = self.states.entry(room_id.to_owned()).or_default();

        if !state.is_enabled() {
            *state = RoomEncryptionState::Enabled { algorithm };
        }
    }

    /// The locally known encryption state of the given room.
    pub fn encryption_state(&self, room_id: &RoomId) -> RoomEncryptionState {
        self.states.get(room_id).map(|state| state.clone()).unwrap_or_default()
    }

    /// Has the given room switched to encrypted messaging?
    pub fn is_encrypted(&self, room_id: &RoomId) -> bool {
        self.states.get(room_id).map_or(false, |state| state.is_enabled())
    }
}
