// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bounded-recursion rule evaluation: `test` never recurses, `check`
//! follows the built-in `@` agent's subquery chain synchronously and
//! suspends on any other registered agent's directive for the caller to
//! forward as an `ask`.

use crate::agents::AgentRegistry;
use crate::builtin_agent::{expand_template, split_fields};
use cynagora_db::{Db, DbError, RawKey, RawValue};
use thiserror::Error;
use tracing::warn;

/// How many subquery hops (built-in or external) [`evaluate_check`] will
/// follow before giving up.
pub const MAX_CHECK_DEPTH: u32 = 10;

/// Errors rule evaluation can report.
#[derive(Debug, Error)]
pub enum QueryError {
    /// A backend operation failed.
    #[error(transparent)]
    Db(#[from] DbError),
    /// The subquery chain exceeded [`MAX_CHECK_DEPTH`].
    #[error("subquery recursion exceeded the depth budget")]
    TooDeep,
}

const BUILTIN_AGENT_PREFIX: &str = "@:";

/// What [`evaluate_check`] produced: either a final verdict (`None` if
/// no rule matched at all), or a directive naming a registered external
/// agent, which the caller must suspend on — forwarding an `ask` to
/// that agent's connection and resuming once it `reply`s.
pub enum CheckOutcome {
    /// The best-matching rule's value, or `None` if nothing matched.
    Resolved(Option<RawValue>),
    /// `key`'s best-matching rule named `name`, a registered agent;
    /// `payload` is the text after the directive's first `:`. `depth`
    /// is how far the subquery chain had already gone when the agent
    /// was found, needed to resume with [`evaluate_check_resuming`] if
    /// that agent issues a `sub` of its own.
    Pending {
        agent_conn: u64,
        name: String,
        payload: String,
        key: RawKey,
        depth: u32,
    },
}

/// A plain lookup with no caching and no subquery following — used by
/// the `test` wire command. Never consults the agent registry: `test`
/// is specified to run at depth 0, so even a directive naming a
/// registered agent is returned verbatim.
pub fn evaluate_test(db: &mut Db, key: &RawKey, now: i64) -> Result<Option<RawValue>, QueryError> {
    Ok(db.test(key, now)?)
}

/// A lookup that follows the built-in `@` agent's subquery chain and
/// suspends on any other registered agent, used by the `check` wire
/// command.
pub fn evaluate_check(
    db: &mut Db,
    agents: &AgentRegistry,
    key: &RawKey,
    now: i64,
) -> Result<CheckOutcome, QueryError> {
    evaluate_check_at_depth(db, agents, key, now, 0)
}

/// Continue a suspended check from `depth` hops in — used by the
/// agent-issued `sub` command, which shares the remaining budget of the
/// ask it is nested under rather than getting a fresh one.
pub fn evaluate_check_resuming(
    db: &mut Db,
    agents: &AgentRegistry,
    key: &RawKey,
    now: i64,
    depth: u32,
) -> Result<CheckOutcome, QueryError> {
    evaluate_check_at_depth(db, agents, key, now, depth)
}

fn evaluate_check_at_depth(
    db: &mut Db,
    agents: &AgentRegistry,
    key: &RawKey,
    now: i64,
    depth: u32,
) -> Result<CheckOutcome, QueryError> {
    if depth > MAX_CHECK_DEPTH {
        warn!(
            client = %key.client.as_deref().unwrap_or("*"),
            permission = %key.permission.as_deref().unwrap_or("*"),
            "subquery chain exceeded the depth budget"
        );
        return Err(QueryError::TooDeep);
    }
    let Some(hit) = db.test(key, now)? else {
        return Ok(CheckOutcome::Resolved(None));
    };
    if let Some(template) = hit.value.strip_prefix(BUILTIN_AGENT_PREFIX) {
        let expanded = expand_template(template, key);
        let (client, session, user) = split_fields(&expanded);
        let subquery = RawKey {
            client: client.or_else(|| key.client.clone()),
            session: session.or_else(|| key.session.clone()),
            user: user.or_else(|| key.user.clone()),
            permission: key.permission.clone(),
        };
        return evaluate_check_at_depth(db, agents, &subquery, now, depth + 1);
    }
    if let Some((name, payload)) = hit.value.split_once(':') {
        if let Some(agent_conn) = agents.lookup(name) {
            return Ok(CheckOutcome::Pending {
                agent_conn,
                name: name.to_string(),
                payload: payload.to_string(),
                key: key.clone(),
                depth,
            });
        }
    }
    Ok(CheckOutcome::Resolved(Some(hit)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cynagora_db::RawValue;

    fn raw(c: &str, s: &str, u: &str, p: &str) -> RawKey {
        RawKey::new(c, s, u, p)
    }

    fn resolved(outcome: CheckOutcome) -> RawValue {
        match outcome {
            CheckOutcome::Resolved(Some(value)) => value,
            CheckOutcome::Resolved(None) => panic!("expected a matching rule"),
            CheckOutcome::Pending { .. } => panic!("expected a resolved outcome"),
        }
    }

    #[test]
    fn test_never_follows_agent_directives() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Db::open(dir.path()).unwrap();
        db.begin().unwrap();
        db.set(
            &raw("alice", "*", "1000", "audio"),
            &RawValue {
                value: "@:%c".to_string(),
                expire: 0,
            },
        )
        .unwrap();
        db.commit().unwrap();

        let result = evaluate_test(&mut db, &raw("alice", "s1", "1000", "audio"), 100)
            .unwrap()
            .unwrap();
        assert_eq!(result.value, "@:%c");
    }

    #[test]
    fn test_reports_no_match_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Db::open(dir.path()).unwrap();
        let result = evaluate_test(&mut db, &raw("alice", "s1", "1000", "audio"), 100).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn check_follows_one_subquery_hop() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Db::open(dir.path()).unwrap();
        db.begin().unwrap();
        db.set(
            &raw("alice", "*", "1000", "audio"),
            &RawValue {
                value: "@:bob;%s;%u".to_string(),
                expire: 0,
            },
        )
        .unwrap();
        db.set(
            &raw("bob", "s1", "1000", "audio"),
            &RawValue {
                value: "yes".to_string(),
                expire: 0,
            },
        )
        .unwrap();
        db.commit().unwrap();

        let agents = AgentRegistry::new();
        let outcome = evaluate_check(&mut db, &agents, &raw("alice", "s1", "1000", "audio"), 100).unwrap();
        assert_eq!(resolved(outcome).value, "yes");
    }

    #[test]
    fn check_detects_unbounded_self_reference() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Db::open(dir.path()).unwrap();
        db.begin().unwrap();
        db.set(
            &raw("alice", "*", "1000", "audio"),
            &RawValue {
                value: "@:%c;%s;%u".to_string(),
                expire: 0,
            },
        )
        .unwrap();
        db.commit().unwrap();

        let agents = AgentRegistry::new();
        let err = evaluate_check(&mut db, &agents, &raw("alice", "s1", "1000", "audio"), 100).unwrap_err();
        assert!(matches!(err, QueryError::TooDeep));
    }

    #[test]
    fn check_suspends_on_a_registered_external_agent() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Db::open(dir.path()).unwrap();
        db.begin().unwrap();
        db.set(
            &raw("alice", "s1", "1000", "audio"),
            &RawValue {
                value: "vasum:extra".to_string(),
                expire: 0,
            },
        )
        .unwrap();
        db.commit().unwrap();

        let mut agents = AgentRegistry::new();
        agents.add("vasum", 42).unwrap();
        let outcome = evaluate_check(&mut db, &agents, &raw("alice", "s1", "1000", "audio"), 100).unwrap();
        match outcome {
            CheckOutcome::Pending {
                agent_conn,
                name,
                payload,
                depth,
                ..
            } => {
                assert_eq!(agent_conn, 42);
                assert_eq!(name, "vasum");
                assert_eq!(payload, "extra");
                assert_eq!(depth, 0);
            }
            CheckOutcome::Resolved(_) => panic!("expected to suspend on the registered agent"),
        }
    }

    #[test]
    fn check_passes_through_an_unregistered_agent_directive() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Db::open(dir.path()).unwrap();
        db.begin().unwrap();
        db.set(
            &raw("alice", "s1", "1000", "audio"),
            &RawValue {
                value: "ghost:extra".to_string(),
                expire: 0,
            },
        )
        .unwrap();
        db.commit().unwrap();

        let agents = AgentRegistry::new();
        let outcome = evaluate_check(&mut db, &agents, &raw("alice", "s1", "1000", "audio"), 100).unwrap();
        assert_eq!(resolved(outcome).value, "ghost:extra");
    }
}
