// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Completion signalling between the connection leader and its followers.

pub mod event;
pub mod leader_follower;

pub use event::{LfEvent, LfState};
pub use leader_follower::{LeaderFollower, LeaderGuard, WaitOutcome};
