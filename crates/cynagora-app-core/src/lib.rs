// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared application services for cynagora tools (settings persistence).
//! Keeps the daemon and CLI adapters thin and storage-agnostic.

pub mod config;
