// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ports shared by Nudge services.
//! Adapters (filesystem, memory) implement these; the session service only
//! ever talks to the traits.

pub mod config;
pub mod storage;

pub use storage::MemoryStorage;
