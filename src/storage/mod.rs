// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Content-addressed blob storage.
//!
//! [`StorageGateway`] is the pipeline's only write/read path to the storage
//! network. It walks an ordered candidate endpoint list with a bounded
//! per-attempt timeout; the network's own replication provides durability
//! once any single ingress point accepts a write, so the gateway's job is
//! only to find one reachable endpoint.

mod gateway;
mod http;

pub use gateway::StorageGateway;
pub use http::{BlobTransport, HttpBlobTransport, PutOutcome, TransportError};
