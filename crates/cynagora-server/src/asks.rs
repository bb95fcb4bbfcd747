// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bookkeeping for outstanding `ask`s: every external-agent directive a
//! `check`/`sub` suspends on until the agent's connection `reply`s.
//! Scoped per agent connection, mirroring each agent's own id generator
//! and ask list on the original daemon.

use cynagora_proto::IdGenerator;
use std::collections::HashMap;

/// One outstanding `ask`, from the point the server forwarded it to an
/// agent connection to the point that agent `reply`s (or disconnects).
pub struct PendingAsk {
    /// The connection whose `check`/`sub` is waiting on this ask.
    pub requester: u64,
    /// The id the requester used, echoed back in the eventual reply.
    pub request_id: String,
    /// The agent connection this ask was sent to.
    pub agent_conn: u64,
    /// How far the subquery chain had gone when the agent was found —
    /// carried over if the agent answers via `sub` instead of `reply`.
    pub depth: u32,
}

/// Outstanding asks, keyed by `(agent_conn, askid)` since ids are only
/// guaranteed unique within one agent's own pending set.
#[derive(Default)]
pub struct AskTable {
    idgen: HashMap<u64, IdGenerator>,
    pending: HashMap<(u64, String), PendingAsk>,
}

impl AskTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh askid for `agent_conn` and register the ask. The id
    /// is guaranteed not to collide with any ask still pending on that
    /// same agent connection.
    pub fn register(&mut self, agent_conn: u64, requester: u64, request_id: String, depth: u32) -> String {
        let pending = &self.pending;
        let gen = self.idgen.entry(agent_conn).or_insert_with(IdGenerator::new);
        let id = gen.next_unused(&|s| pending.contains_key(&(agent_conn, s.to_string())));
        let askid = id.as_str().to_string();
        self.pending.insert(
            (agent_conn, askid.clone()),
            PendingAsk {
                requester,
                request_id,
                agent_conn,
                depth,
            },
        );
        askid
    }

    /// Remove and return the ask `askid` pending on `agent_conn`, for
    /// `reply` — which answers an ask once and is done with it.
    pub fn take(&mut self, agent_conn: u64, askid: &str) -> Option<PendingAsk> {
        self.pending.remove(&(agent_conn, askid.to_string()))
    }

    /// Look up the ask `askid` pending on `agent_conn` without removing
    /// it, for `sub` — which reuses the same ask's remaining depth
    /// budget but does not itself resolve it.
    pub fn peek(&self, agent_conn: u64, askid: &str) -> Option<&PendingAsk> {
        self.pending.get(&(agent_conn, askid.to_string()))
    }

    /// Remove and return every ask pending on `agent_conn` — used when
    /// that agent disconnects, so each waiting requester can be told
    /// `no`, do-not-cache rather than wait forever.
    pub fn take_all_for_agent(&mut self, agent_conn: u64) -> Vec<PendingAsk> {
        self.idgen.remove(&agent_conn);
        let keys: Vec<(u64, String)> = self
            .pending
            .keys()
            .filter(|(conn, _)| *conn == agent_conn)
            .cloned()
            .collect();
        keys.into_iter().filter_map(|k| self.pending.remove(&k)).collect()
    }

    /// Drop every ask whose requester is `requester` — used when that
    /// connection disconnects, so a later `reply` finds nothing to
    /// forward to instead of leaking the entry forever.
    pub fn cancel_requester(&mut self, requester: u64) {
        self.pending.retain(|_, ask| ask.requester != requester);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_take_round_trips() {
        let mut table = AskTable::new();
        let askid = table.register(10, 1, "q1".to_string(), 0);
        let ask = table.take(10, &askid).unwrap();
        assert_eq!(ask.requester, 1);
        assert_eq!(ask.request_id, "q1");
        assert_eq!(ask.depth, 0);
        assert!(table.take(10, &askid).is_none());
    }

    #[test]
    fn ids_are_scoped_per_agent_connection() {
        let mut table = AskTable::new();
        let a = table.register(10, 1, "a".to_string(), 0);
        let b = table.register(20, 2, "b".to_string(), 0);
        assert_eq!(a, b);
        assert!(table.peek(10, &a).is_some());
        assert!(table.peek(20, &b).is_some());
    }

    #[test]
    fn peek_does_not_remove() {
        let mut table = AskTable::new();
        let askid = table.register(10, 1, "q1".to_string(), 3);
        assert_eq!(table.peek(10, &askid).unwrap().depth, 3);
        assert!(table.peek(10, &askid).is_some());
    }

    #[test]
    fn agent_disconnect_drains_only_its_own_asks() {
        let mut table = AskTable::new();
        table.register(10, 1, "a".to_string(), 0);
        table.register(20, 2, "b".to_string(), 0);
        let drained = table.take_all_for_agent(10);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].requester, 1);
        assert!(table.peek(20, "0").is_some());
    }

    #[test]
    fn requester_disconnect_cancels_its_pending_asks() {
        let mut table = AskTable::new();
        let askid = table.register(10, 1, "a".to_string(), 0);
        table.cancel_requester(1);
        assert!(table.peek(10, &askid).is_none());
    }
}
