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

#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations)]

mod account;
mod device;
mod directory;
mod error;
mod requests;
mod room;
pub mod store;
mod tracker;
mod transport;
pub mod types;
mod utility;

#[cfg(test)]
mod testing;

pub use account::{Account, PickledAccount};
pub use device::DeviceIdentity;
pub use directory::{KeyDirectoryClient, KeyQueryResult};
pub use error::{AccountError, SignatureError, StoreError, TransportError};
pub use requests::{
    KeyChangesResponse, KeysQueryRequest, KeysQueryResponse, KeysUploadRequest,
    KeysUploadResponse,
};
pub use room::{RoomEncryptionManager, RoomEncryptionState};
pub use tracker::{KeyChangeDelta, KeyChangeTracker, SyncToken};
pub use transport::Transport;
pub use utility::VerifyJson;
#[doc(no_inline)]
pub use vodozemac;

/// The version of the keystone-crypto crate being used.
pub static VERSION: &str = env!("CARGO_PKG_VERSION");

// Enable tracing for tests in this crate.
#[cfg(test)]
#[ctor::ctor]
fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .init();
}
