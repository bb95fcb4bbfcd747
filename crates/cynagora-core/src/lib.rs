// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The daemon's single-threaded evaluation core: the critical section
//! rule edits are serialized through, the agent registry, the built-in
//! `@` agent, and bounded-recursion query evaluation.

pub mod agents;
pub mod builtin_agent;
pub mod critical;
pub mod observers;
pub mod query;

pub use agents::{AgentError, AgentRegistry};
pub use critical::{CriticalError, CriticalSection, Ticket};
pub use observers::ChangeCounter;
pub use query::{evaluate_check, evaluate_check_resuming, evaluate_test, CheckOutcome, QueryError, MAX_CHECK_DEPTH};
