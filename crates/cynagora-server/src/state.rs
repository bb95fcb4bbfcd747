// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared daemon state: the rule database, the critical section rule
//! edits serialize through, and the agent registry. A single
//! [`ServerState`] is threaded through every connection's dispatch
//! call — the server is single-threaded, so `&mut` borrows are the
//! only synchronization needed.

use crate::asks::AskTable;
use cynagora_core::{AgentRegistry, ChangeCounter, CriticalSection};
use cynagora_db::Db;

/// Everything connection dispatch needs that outlives any one
/// connection.
pub struct ServerState {
    /// The rule database (persistent + session-scoped backends).
    pub db: Db,
    /// The FIFO gate rule edits are serialized through.
    pub critical: CriticalSection,
    /// Connections currently registered as named agents.
    pub agents: AgentRegistry,
    /// Outstanding `ask`s, suspended `check`/`sub`s waiting on a
    /// `reply` from the agent connection they were forwarded to.
    pub agent_asks: AskTable,
    /// The current rule-set generation number.
    pub change_id: ChangeCounter,
}

impl ServerState {
    /// Bundle a freshly opened database with empty registries.
    pub fn new(db: Db) -> Self {
        Self {
            db,
            critical: CriticalSection::new(),
            agents: AgentRegistry::new(),
            agent_asks: AskTable::new(),
            change_id: ChangeCounter::new(),
        }
    }

    /// Current epoch seconds, used for rule expiration comparisons.
    pub fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}
