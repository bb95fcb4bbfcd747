// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-connection protocol state and the wire-command dispatch table.
//! Each connection is pinned to exactly one of the three socket kinds
//! for its whole lifetime, which the dispatcher uses to reject
//! commands the peer has no business sending.

use crate::state::ServerState;
use cynagora_core::{evaluate_check, evaluate_check_resuming, evaluate_test, CheckOutcome, Ticket};
use cynagora_db::{RawKey, RawValue};

/// Which of the three listening sockets a connection arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// `check`/`test` — the permission-checking surface. Per the wire
    /// grammar these two commands are actually open to any connection
    /// kind, not just this one.
    Check,
    /// `enter`/`leave`/`set`/`drop`/`get`/`clearall` — rule editing.
    Admin,
    /// `agent`/`reply`/`sub`/`clearall` — the external-agent answer
    /// channel.
    Agent,
}

/// Mutable state kept per connection across calls to [`dispatch`].
pub struct ConnState {
    /// Opaque identity used as the critical-section/agent-registry key.
    pub id: u64,
    /// The socket this connection is bound to.
    pub kind: SocketKind,
    /// Ownership proof while this connection holds the critical section.
    pub ticket: Option<Ticket>,
    /// The agent name this connection has registered, if any.
    pub agent_name: Option<String>,
    /// Whether this connection has issued a `check`/`test`/`sub` since
    /// the last `clear` broadcast it received — the cache-invalidation
    /// protocol's per-connection flip side of the global change id.
    pub caching: bool,
}

impl ConnState {
    /// A fresh connection with no held ticket, no agent identity, and
    /// nothing cached yet.
    pub fn new(id: u64, kind: SocketKind) -> Self {
        Self {
            id,
            kind,
            ticket: None,
            agent_name: None,
            caching: false,
        }
    }
}

/// What dispatch wants the connection's writer — and, for commands that
/// touch another connection, the multiplexer that owns every
/// connection's state — to do next.
pub enum DispatchOutcome {
    /// Send these fields back as one frame.
    Reply(Vec<String>),
    /// The command was accepted but produces no reply on this
    /// connection (an agent `reply` whose ask already vanished).
    NoReply,
    /// Forward `fields` as a new frame to `to_conn` — an `ask` sent to
    /// an agent, or a check-style reply routed back to the connection
    /// whose `check`/`sub` had suspended on it. `self_reply`, if
    /// present, is written back to the calling connection first.
    /// `mark_caching` sets `to_conn`'s caching flag once delivered.
    Forward {
        self_reply: Option<Vec<String>>,
        to_conn: u64,
        fields: Vec<String>,
        mark_caching: bool,
    },
    /// `leave` succeeded; if a queued connection was granted the
    /// critical section, the multiplexer must give it this ticket and
    /// send it its own deferred `done` reply. `broadcast`, when set to
    /// a commit's resulting change id, must be delivered to every
    /// caching connection after `reply` is sent and before `granted`
    /// is admitted.
    Left {
        reply: Vec<String>,
        granted: Option<(u64, Ticket)>,
        broadcast: Option<u64>,
    },
    /// A bare change-id bump with no underlying rule mutation
    /// (`clearall`): reply, then broadcast `clear <change_id>` to
    /// every caching connection.
    Broadcast { reply: Vec<String>, change_id: u64 },
}

fn err(msg: &str) -> DispatchOutcome {
    DispatchOutcome::Reply(vec!["error".to_string(), msg.to_string()])
}

fn done() -> DispatchOutcome {
    DispatchOutcome::Reply(vec!["done".to_string()])
}

/// Route one parsed request to its handler, rejecting it outright if
/// the connection's socket kind does not carry that command.
pub fn dispatch(server: &mut ServerState, conn: &mut ConnState, fields: &[String]) -> DispatchOutcome {
    match fields.first().map(String::as_str) {
        Some("cynagora") => handle_handshake(server, fields),
        Some("check") => handle_check(server, conn, fields),
        Some("test") => handle_test(server, conn, fields),
        Some("enter") if conn.kind == SocketKind::Admin => handle_enter(server, conn),
        Some("leave") if conn.kind == SocketKind::Admin => handle_leave(server, conn, fields),
        Some("set") if conn.kind == SocketKind::Admin => handle_set(server, conn, fields),
        Some("drop") if conn.kind == SocketKind::Admin => handle_drop(server, conn, fields),
        Some("get") if conn.kind == SocketKind::Admin => handle_get(server, fields),
        Some("clearall") if matches!(conn.kind, SocketKind::Admin | SocketKind::Agent) => handle_clearall(server),
        Some("agent") if conn.kind == SocketKind::Agent => handle_agent(server, conn, fields),
        Some("reply") if conn.kind == SocketKind::Agent => handle_reply(server, conn, fields),
        Some("sub") if conn.kind == SocketKind::Agent => handle_sub(server, conn, fields),
        Some("log") => done(),
        Some(other) => err(&format!("unknown or misdirected command: {other}")),
        None => err("empty request"),
    }
}

/// Run when a connection drops, so held locks, registrations, and
/// outstanding asks do not outlive it. Returns the teardown replies
/// (`no`, do-not-cache) owed to connections still waiting on an ask
/// this one was supposed to answer — the multiplexer delivers these
/// since only it can reach another connection's stream.
pub fn on_disconnect(server: &mut ServerState, conn: &ConnState) -> Vec<(u64, Vec<String>)> {
    server.agents.remove_by_holder(conn.id);
    server.critical.cancel_wait(conn.id);
    if let Some(ticket) = conn.ticket {
        let _ = server.critical.leave(ticket);
        let _ = server.db.cancel();
    }
    server.agent_asks.cancel_requester(conn.id);
    let now = ServerState::now();
    server
        .agent_asks
        .take_all_for_agent(conn.id)
        .into_iter()
        .map(|ask| {
            let denial = RawValue {
                value: "no".to_string(),
                expire: -1,
            };
            let (reply, _caching) = check_reply(&ask.request_id, Some(denial), true, now);
            (ask.requester, reply)
        })
        .collect()
}

fn handle_handshake(server: &ServerState, fields: &[String]) -> DispatchOutcome {
    if fields.get(1).map(String::as_str) != Some("1") {
        return err("unsupported protocol version");
    }
    DispatchOutcome::Reply(vec![
        "done".to_string(),
        "1".to_string(),
        server.change_id.current().to_string(),
    ])
}

fn key_from_fields(fields: &[String]) -> Option<RawKey> {
    Some(RawKey::new(
        fields.get(1)?.as_str(),
        fields.get(2)?.as_str(),
        fields.get(3)?.as_str(),
        fields.get(4)?.as_str(),
    ))
}

/// Parses the `<id> c s u p` shape shared by `check`/`test`: `id` is a
/// caller-chosen correlation token, not part of the rule key.
fn id_and_key_from_fields(fields: &[String]) -> Option<(String, RawKey)> {
    let id = fields.get(1)?.clone();
    let key = RawKey::new(
        fields.get(2)?.as_str(),
        fields.get(3)?.as_str(),
        fields.get(4)?.as_str(),
        fields.get(5)?.as_str(),
    );
    Some((id, key))
}

/// Renders an optional expiration the way a check reply encodes it:
/// omitted for "forever", a literal `-` for "do not cache", and the
/// rendered duration otherwise.
fn exp2check(expire: i64, now: i64) -> Option<String> {
    if expire == 0 {
        None
    } else if expire < 0 {
        Some("-".to_string())
    } else {
        Some(cynagora_proto::exp2txt(expire, now, true))
    }
}

/// Builds a `yes <id> [expire]` / `no <id> [expire]` / `ack <id>` reply
/// and reports whether the replying connection should start caching.
/// `ischeck` forces any non-`yes` verdict to `no` instead of `ack` —
/// true for `check` and `sub`, false for `test`, the only command that
/// can surface a raw, unresolved agent directive as `ack`. No matching
/// rule at all always replies `no <id> -` without marking caching.
fn check_reply(id: &str, value: Option<RawValue>, ischeck: bool, now: i64) -> (Vec<String>, bool) {
    let Some(value) = value else {
        return (vec!["no".to_string(), id.to_string(), "-".to_string()], false);
    };
    let vtxt = if value.value == "yes" {
        "yes"
    } else if value.value == "no" || ischeck {
        "no"
    } else {
        "ack"
    };
    let caching = value.expire >= 0;
    let mut reply = vec![vtxt.to_string(), id.to_string()];
    if let Some(etxt) = exp2check(value.expire, now) {
        reply.push(etxt);
    }
    (reply, caching)
}

/// Builds the `ask <askid> <name> <payload> c s u p` frame forwarded to
/// an agent connection.
fn ask_fields(askid: &str, name: &str, payload: &str, key: &RawKey) -> Vec<String> {
    vec![
        "ask".to_string(),
        askid.to_string(),
        name.to_string(),
        payload.to_string(),
        key.client.clone().unwrap_or_default(),
        key.session.clone().unwrap_or_default(),
        key.user.clone().unwrap_or_default(),
        key.permission.clone().unwrap_or_default(),
    ]
}

fn handle_check(server: &mut ServerState, conn: &mut ConnState, fields: &[String]) -> DispatchOutcome {
    let Some((id, key)) = id_and_key_from_fields(fields) else {
        return err("check requires id client session user permission");
    };
    let now = ServerState::now();
    match evaluate_check(&mut server.db, &server.agents, &key, now) {
        Ok(CheckOutcome::Resolved(value)) => {
            let (reply, caching) = check_reply(&id, value, true, now);
            conn.caching = caching;
            DispatchOutcome::Reply(reply)
        }
        Ok(CheckOutcome::Pending {
            agent_conn,
            name,
            payload,
            key,
            depth,
        }) => {
            let askid = server.agent_asks.register(agent_conn, conn.id, id, depth);
            DispatchOutcome::Forward {
                self_reply: None,
                to_conn: agent_conn,
                fields: ask_fields(&askid, &name, &payload, &key),
                mark_caching: false,
            }
        }
        Err(e) => err(&e.to_string()),
    }
}

fn handle_test(server: &mut ServerState, conn: &mut ConnState, fields: &[String]) -> DispatchOutcome {
    let Some((id, key)) = id_and_key_from_fields(fields) else {
        return err("test requires id client session user permission");
    };
    let now = ServerState::now();
    match evaluate_test(&mut server.db, &key, now) {
        Ok(value) => {
            let (reply, caching) = check_reply(&id, value, false, now);
            conn.caching = caching;
            DispatchOutcome::Reply(reply)
        }
        Err(e) => err(&e.to_string()),
    }
}

fn handle_enter(server: &mut ServerState, conn: &mut ConnState) -> DispatchOutcome {
    if conn.ticket.is_some() {
        return err("already entered");
    }
    match server.critical.enter(conn.id) {
        Ok(ticket) => {
            conn.ticket = Some(ticket);
            if server.db.begin().is_err() {
                return err("failed to start transaction");
            }
            done()
        }
        Err(_busy) => DispatchOutcome::Reply(vec!["busy".to_string()]),
    }
}

fn handle_leave(server: &mut ServerState, conn: &mut ConnState, fields: &[String]) -> DispatchOutcome {
    let Some(ticket) = conn.ticket.take() else {
        return err("not entered");
    };
    // Mirrors the wire grammar `leave [commit|rollback]`: an admin that
    // hangs up or sends a bare `leave` gets its edits discarded.
    let should_commit = fields.get(1).map(String::as_str) == Some("commit");
    let op_ok = if should_commit {
        server.db.commit().is_ok()
    } else {
        server.db.cancel().is_ok()
    };
    match server.critical.leave(ticket) {
        Ok(granted) => {
            if granted.is_some() {
                let _ = server.db.begin();
            }
            let mut broadcast = None;
            let reply = if op_ok {
                if should_commit {
                    broadcast = Some(server.change_id.bump());
                }
                vec!["done".to_string()]
            } else {
                vec!["error".to_string(), "leave failed".to_string()]
            };
            DispatchOutcome::Left {
                reply,
                granted: granted.map(|t| (cynagora_core::CriticalSection::holder_of(t), t)),
                broadcast,
            }
        }
        Err(e) => err(&e.to_string()),
    }
}

fn handle_set(server: &mut ServerState, conn: &ConnState, fields: &[String]) -> DispatchOutcome {
    if conn.ticket.is_none() {
        return err("set requires an open transaction");
    }
    let Some(key) = key_from_fields(fields) else {
        return err("set requires client session user permission value expire");
    };
    let Some(value_text) = fields.get(5) else {
        return err("set requires a value");
    };
    let expire = match fields.get(6) {
        Some(text) => match cynagora_proto::txt2exp(text, ServerState::now(), true) {
            Ok(e) => e,
            Err(e) => return err(&e.to_string()),
        },
        None => 0,
    };
    let value = RawValue {
        value: value_text.clone(),
        expire,
    };
    match server.db.set(&key, &value) {
        Ok(()) => done(),
        Err(e) => err(&e.to_string()),
    }
}

fn handle_drop(server: &mut ServerState, conn: &ConnState, fields: &[String]) -> DispatchOutcome {
    if conn.ticket.is_none() {
        return err("drop requires an open transaction");
    }
    let Some(key) = key_from_fields(fields) else {
        return err("drop requires client session user permission");
    };
    match server.db.drop(&key) {
        Ok(()) => done(),
        Err(e) => err(&e.to_string()),
    }
}

fn handle_get(server: &mut ServerState, fields: &[String]) -> DispatchOutcome {
    let Some(key) = key_from_fields(fields) else {
        return err("get requires client session user permission");
    };
    let mut rows = Vec::new();
    let now = ServerState::now();
    if let Err(e) = server.db.for_all(&key, now, |k, v| {
        rows.push(format!(
            "{} {} {} {} {} {}",
            k.client.as_deref().unwrap_or("*"),
            k.session.as_deref().unwrap_or("*"),
            k.user.as_deref().unwrap_or("*"),
            k.permission.as_deref().unwrap_or("*"),
            v.value,
            cynagora_proto::exp2txt(v.expire, now, true)
        ));
    }) {
        return err(&e.to_string());
    }
    let mut reply = vec!["done".to_string()];
    reply.extend(rows);
    DispatchOutcome::Reply(reply)
}

/// `clearall` bumps the change id and broadcasts it without touching a
/// single rule — it exists purely to force every caching checker to
/// drop its cache, e.g. after an out-of-band edit to the rule files.
fn handle_clearall(server: &mut ServerState) -> DispatchOutcome {
    let change_id = server.change_id.bump();
    DispatchOutcome::Broadcast {
        reply: vec!["done".to_string()],
        change_id,
    }
}

fn handle_agent(server: &mut ServerState, conn: &mut ConnState, fields: &[String]) -> DispatchOutcome {
    let Some(name) = fields.get(1) else {
        return err("agent requires a name");
    };
    match server.agents.add(name, conn.id) {
        Ok(()) => {
            conn.agent_name = Some(name.clone());
            done()
        }
        Err(e) => err(&e.to_string()),
    }
}

/// `reply <askid> yes|no [expire]`: answers an ask this connection was
/// sent, forwarding the verdict to whichever connection's `check`/`sub`
/// suspended on it. A reply naming an unknown or already-answered
/// askid is silently ignored, matching the original daemon (`reply`
/// never sends its own acknowledgement either way).
fn handle_reply(server: &mut ServerState, conn: &ConnState, fields: &[String]) -> DispatchOutcome {
    let Some(askid) = fields.get(1) else {
        return err("reply requires an askid");
    };
    let Some(verdict) = fields.get(2) else {
        return err("reply requires yes or no");
    };
    if verdict != "yes" && verdict != "no" {
        return err("reply verdict must be yes or no");
    }
    let now = ServerState::now();
    let expire = match fields.get(3) {
        Some(text) => match cynagora_proto::txt2exp(text, now, true) {
            Ok(e) => e,
            Err(e) => return err(&e.to_string()),
        },
        None => 0,
    };
    let Some(ask) = server.agent_asks.take(conn.id, askid) else {
        return DispatchOutcome::NoReply;
    };
    let value = RawValue {
        value: verdict.clone(),
        expire,
    };
    let (reply, caching) = check_reply(&ask.request_id, Some(value), true, now);
    DispatchOutcome::Forward {
        self_reply: None,
        to_conn: ask.requester,
        fields: reply,
        mark_caching: caching,
    }
}

/// `sub <askid> <id> c s u p`: the agent holding `askid` issues one more
/// nested check, reusing that ask's remaining depth budget, and gets
/// the answer back on its own connection (tagged by its own `id`) — it
/// does not by itself resolve the outer ask; the agent still has to
/// `reply` to that separately once it has decided.
fn handle_sub(server: &mut ServerState, conn: &mut ConnState, fields: &[String]) -> DispatchOutcome {
    let Some(askid) = fields.get(1) else {
        return err("sub requires an askid");
    };
    let Some(id) = fields.get(2) else {
        return err("sub requires an id");
    };
    let (Some(c), Some(s), Some(u), Some(p)) = (fields.get(3), fields.get(4), fields.get(5), fields.get(6)) else {
        return err("sub requires client session user permission");
    };
    let key = RawKey::new(c.as_str(), s.as_str(), u.as_str(), p.as_str());
    let now = ServerState::now();
    let Some(depth) = server.agent_asks.peek(conn.id, askid).map(|ask| ask.depth) else {
        let (reply, _caching) = check_reply(id, None, true, now);
        return DispatchOutcome::Reply(reply);
    };
    match evaluate_check_resuming(&mut server.db, &server.agents, &key, now, depth) {
        Ok(CheckOutcome::Resolved(value)) => {
            let (reply, caching) = check_reply(id, value, true, now);
            conn.caching = caching;
            DispatchOutcome::Reply(reply)
        }
        Ok(CheckOutcome::Pending {
            agent_conn,
            name,
            payload,
            key,
            depth,
        }) => {
            let askid = server.agent_asks.register(agent_conn, conn.id, id.clone(), depth);
            DispatchOutcome::Forward {
                self_reply: None,
                to_conn: agent_conn,
                fields: ask_fields(&askid, &name, &payload, &key),
                mark_caching: false,
            }
        }
        Err(e) => err(&e.to_string()),
    }
}
