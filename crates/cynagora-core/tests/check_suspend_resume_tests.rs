// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
use cynagora_core::{evaluate_check, evaluate_check_resuming, AgentRegistry, CheckOutcome, QueryError};
use cynagora_db::{Db, RawKey, RawValue};

fn raw(c: &str, s: &str, u: &str, p: &str) -> RawKey {
    RawKey::new(c, s, u, p)
}

fn rule(value: &str) -> RawValue {
    RawValue {
        value: value.to_string(),
        expire: 0,
    }
}

#[test]
fn a_registered_agents_directive_suspends_and_resumes_through_a_sub() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = Db::open(dir.path()).unwrap();
    db.begin().unwrap();
    db.set(&raw("alice", "s1", "1000", "audio"), &rule("vasum:extra")).unwrap();
    db.commit().unwrap();

    let mut agents = AgentRegistry::new();
    agents.add("vasum", 42).unwrap();

    let outcome = evaluate_check(&mut db, &agents, &raw("alice", "s1", "1000", "audio"), 100).unwrap();
    let depth = match outcome {
        CheckOutcome::Pending {
            agent_conn, name, depth, ..
        } => {
            assert_eq!(agent_conn, 42);
            assert_eq!(name, "vasum");
            depth
        }
        CheckOutcome::Resolved(_) => panic!("expected to suspend on the registered agent"),
    };

    // The agent answers by sub-checking a different rule instead of
    // replying directly, reusing the depth the original ask suspended
    // at.
    db.begin().unwrap();
    db.set(&raw("bob", "s1", "1000", "audio"), &rule("yes")).unwrap();
    db.commit().unwrap();

    let resumed = evaluate_check_resuming(&mut db, &agents, &raw("bob", "s1", "1000", "audio"), 100, depth).unwrap();
    match resumed {
        CheckOutcome::Resolved(Some(value)) => assert_eq!(value.value, "yes"),
        other => panic!("expected a resolved sub-check, got a different outcome: {}", describe(&other)),
    }
}

#[test]
fn an_unregistered_agent_directive_is_never_mistaken_for_a_suspend() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = Db::open(dir.path()).unwrap();
    db.begin().unwrap();
    db.set(&raw("alice", "s1", "1000", "audio"), &rule("ghost:extra")).unwrap();
    db.commit().unwrap();

    let agents = AgentRegistry::new();
    let outcome = evaluate_check(&mut db, &agents, &raw("alice", "s1", "1000", "audio"), 100).unwrap();
    match outcome {
        CheckOutcome::Resolved(Some(value)) => assert_eq!(value.value, "ghost:extra"),
        other => panic!("expected the directive to pass through verbatim: {}", describe(&other)),
    }
}

#[test]
fn the_builtin_agent_chain_eventually_exceeds_its_depth_budget() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = Db::open(dir.path()).unwrap();
    db.begin().unwrap();
    db.set(&raw("alice", "*", "1000", "audio"), &rule("@:%c;%s;%u")).unwrap();
    db.commit().unwrap();

    let agents = AgentRegistry::new();
    let err = evaluate_check(&mut db, &agents, &raw("alice", "s1", "1000", "audio"), 100).unwrap_err();
    assert!(matches!(err, QueryError::TooDeep));
}

fn describe(outcome: &CheckOutcome) -> &'static str {
    match outcome {
        CheckOutcome::Resolved(Some(_)) => "resolved(some)",
        CheckOutcome::Resolved(None) => "resolved(none)",
        CheckOutcome::Pending { .. } => "pending",
    }
}
