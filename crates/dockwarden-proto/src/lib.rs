// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire protocol for the cluster server/agent channel: frame codec plus the
//! enrollment and channel message schema.

pub mod frame;
pub mod messages;

pub use frame::{read_frame, write_frame, Frame, FrameError, FramedStream, MessageType, HEADER_SIZE, MAX_FRAME_SIZE};
pub use messages::{
    AgentMessage, AgentPayload, CertRenewal, CertRenewalResponse, ContainerAction,
    ContainerActionRequest, ContainerActionResult, ContainerInfo, ContainerList, EnrollRequest,
    EnrollResponse, Heartbeat, HookResult, JournalEntry, ListContainersRequest, OfflineJournal,
    RollbackResult, ServerMessage, ServerPayload, StateReport, UpdateContainer, UpdateResult,
};
