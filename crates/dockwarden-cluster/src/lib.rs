// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster transport: mTLS certificate authority, QUIC server/client, and the
//! server/agent halves of the fleet channel protocol.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                     dockwarden-cluster                    │
//! ├───────────────────────────────────────────────────────────┤
//! │  Channel: ClusterServer <-> ClusterAgent (Frame RPC)       │
//! ├───────────────────────────────────────────────────────────┤
//! │  Transport: QUIC + mTLS (quinn, rustls)                    │
//! ├───────────────────────────────────────────────────────────┤
//! │  Trust: ClusterCa (ECDSA P-256 root, agent leaf signing)   │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Enrollment runs with no client certificate required; the Channel endpoint
//! requires one, and derives the connecting host's identity from its
//! certificate's common name.

pub mod agent;
pub mod ca;
pub mod quic_client;
pub mod quic_server;
pub mod server;

pub use agent::{AgentConfig, AgentError, AgentIdentity, ClusterAgent};
pub use ca::{is_revoked, revoke, CaError, ClusterCa, SignedLeaf, RENEWAL_WINDOW_DAYS};
pub use quic_client::{ClientError, QuicClient, QuicClientConfig};
pub use quic_server::{ConnectionHandler, QuicServer, QuicServerConfig, ServerError, StreamHandler};
pub use server::{ClusterError, ClusterServer, HostRecord};
