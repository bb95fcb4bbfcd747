// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Blocking clients for `cynagorad`'s three sockets: one synchronous
//! [`UnixStream`] per connection plus the line-framed wire codec.
//! [`CheckClient`] additionally fronts its queries with a small LRU
//! cache so a busy caller does not round-trip to the daemon for every
//! request; [`AdminClient`] and [`AgentClient`] are thin, uncached
//! wrappers over the same request/reply primitive, used by the
//! `cynagora-admin` and `cynagora-agent` binaries.
#![deny(missing_docs)]

mod cache;
mod raw;

pub use cache::{CachedVerdict, VerdictCache};

use cynagora_proto::wire::ProtoError;
use raw::RawConnection;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Errors raised while talking to the daemon.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The underlying socket failed.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    /// A malformed wire record was sent or received.
    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),
    /// The daemon replied with something other than a well-formed
    /// verdict for the command sent.
    #[error("unexpected reply: {0:?}")]
    UnexpectedReply(Vec<String>),
}

/// The four fields a `check`/`test`/`set`/`drop`/`get` query is made
/// against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    /// The requesting client's label.
    pub client: String,
    /// The session identifier.
    pub session: String,
    /// The numeric user id, as text.
    pub user: String,
    /// The permission name being asked about.
    pub permission: String,
}

fn handshake(conn: &mut RawConnection) -> Result<u64, ClientError> {
    let reply = conn.roundtrip(&["cynagora", "1"])?;
    if reply.first().map(String::as_str) != Some("done") {
        return Err(ClientError::UnexpectedReply(reply));
    }
    Ok(reply.get(2).and_then(|s| s.parse().ok()).unwrap_or(0))
}

fn parse_verdict(command: &str, reply: &[String]) -> Result<CachedVerdict, ClientError> {
    if reply.first().map(String::as_str) != Some(command) {
        return Err(ClientError::UnexpectedReply(reply.to_vec()));
    }
    let value = reply
        .get(1)
        .ok_or_else(|| ClientError::UnexpectedReply(reply.to_vec()))?
        .clone();
    let expire_text = reply.get(2).map(String::as_str).unwrap_or("0");
    let now = i64::try_from(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    )
    .unwrap_or(0);
    let expire = cynagora_proto::txt2exp(expire_text, now, true)
        .map_err(|_| ClientError::UnexpectedReply(reply.to_vec()))?;
    debug!(command, %value, expire, "verdict received");
    Ok(CachedVerdict { value, expire })
}

fn expect_done(reply: Vec<String>) -> Result<Vec<String>, ClientError> {
    if reply.first().map(String::as_str) != Some("done") {
        return Err(ClientError::UnexpectedReply(reply));
    }
    Ok(reply)
}

fn cache_key(query: &Query) -> (String, String, String, String) {
    (
        query.client.clone(),
        query.session.clone(),
        query.user.clone(),
        query.permission.clone(),
    )
}

const DEFAULT_CACHE_CAPACITY: usize = 256;

/// A blocking connection to `cynagorad`'s check socket, with a local
/// verdict cache invalidated whenever the daemon reports a new change
/// generation.
pub struct CheckClient {
    conn: RawConnection,
    cache: VerdictCache,
    change_id: u64,
}

impl CheckClient {
    /// Connect to the check socket at `path` and complete the
    /// handshake.
    pub fn connect(path: &Path) -> Result<Self, ClientError> {
        let mut conn = RawConnection::connect(path)?;
        let change_id = handshake(&mut conn)?;
        Ok(Self {
            conn,
            cache: VerdictCache::new(DEFAULT_CACHE_CAPACITY),
            change_id,
        })
    }

    /// Ask whether `query` is allowed right now, consulting the local
    /// cache first and refreshing it from the daemon on a miss.
    ///
    /// `now` is the caller's notion of the current epoch-second clock,
    /// used only to judge cache freshness — the authoritative
    /// expiration check still happens in the daemon.
    pub fn check(&mut self, query: &Query, now: i64) -> Result<CachedVerdict, ClientError> {
        let key = cache_key(query);
        if let Some(cached) = self.cache.get(&key, now) {
            return Ok(cached);
        }
        let reply = self.conn.roundtrip(&[
            "check",
            &query.client,
            &query.session,
            &query.user,
            &query.permission,
        ])?;
        let verdict = parse_verdict("check", &reply)?;
        self.cache.put(key, verdict.clone());
        Ok(verdict)
    }

    /// Ask the daemon to evaluate `query` without following any
    /// agent-directive rules, and without touching the cache.
    pub fn test(&mut self, query: &Query) -> Result<CachedVerdict, ClientError> {
        let reply = self.conn.roundtrip(&[
            "test",
            &query.client,
            &query.session,
            &query.user,
            &query.permission,
        ])?;
        parse_verdict("test", &reply)
    }

    /// Subscribe to change notifications; the daemon sends an
    /// unsolicited frame whenever the rule set changes, which callers
    /// should use to invalidate their own copy of this cache via
    /// [`VerdictCache::clear`].
    pub fn subscribe(&mut self) -> Result<(), ClientError> {
        expect_done(self.conn.roundtrip(&["sub"])?)?;
        Ok(())
    }

    /// The change generation reported at handshake time.
    #[must_use]
    pub const fn change_id(&self) -> u64 {
        self.change_id
    }
}

/// A blocking connection to `cynagorad`'s admin socket: rule editing
/// under an explicit enter/leave critical section.
pub struct AdminClient {
    conn: RawConnection,
}

impl AdminClient {
    /// Connect to the admin socket at `path` and complete the
    /// handshake.
    pub fn connect(path: &Path) -> Result<Self, ClientError> {
        let mut conn = RawConnection::connect(path)?;
        handshake(&mut conn)?;
        Ok(Self { conn })
    }

    /// Enter the critical section, opening a transaction. Blocks (from
    /// the daemon's perspective, not this call) until no other admin
    /// holds it.
    pub fn enter(&mut self) -> Result<(), ClientError> {
        expect_done(self.conn.roundtrip(&["enter"])?)?;
        Ok(())
    }

    /// Leave the critical section, either persisting every edit made
    /// since [`AdminClient::enter`] (`commit`) or discarding them
    /// (the default, matching the wire grammar's bare `leave`).
    pub fn leave(&mut self, commit: bool) -> Result<(), ClientError> {
        let fields: &[&str] = if commit { &["leave", "commit"] } else { &["leave"] };
        expect_done(self.conn.roundtrip(fields)?)?;
        Ok(())
    }

    /// Add or replace a rule. Requires an open transaction. `expire`
    /// is expiration grammar text (a relative duration, `"forever"`,
    /// or a leading `-` for "do not cache"), the same text `cynagora-admin`
    /// takes on the command line.
    pub fn set(&mut self, query: &Query, value: &str, expire: &str) -> Result<(), ClientError> {
        expect_done(self.conn.roundtrip(&[
            "set",
            &query.client,
            &query.session,
            &query.user,
            &query.permission,
            value,
            expire,
        ])?)?;
        Ok(())
    }

    /// Queue the removal of every rule matching `query`. Requires an
    /// open transaction; the drop only takes effect once the
    /// transaction is left with `commit`.
    pub fn drop(&mut self, query: &Query) -> Result<(), ClientError> {
        expect_done(self.conn.roundtrip(&[
            "drop",
            &query.client,
            &query.session,
            &query.user,
            &query.permission,
        ])?)?;
        Ok(())
    }

    /// List every rule matching `query`, each as one raw reply line.
    pub fn get(&mut self, query: &Query) -> Result<Vec<String>, ClientError> {
        let reply = expect_done(self.conn.roundtrip(&[
            "get",
            &query.client,
            &query.session,
            &query.user,
            &query.permission,
        ])?)?;
        Ok(reply.into_iter().skip(1).collect())
    }

    /// Remove every rule in the database. Requires an open transaction.
    pub fn clearall(&mut self) -> Result<(), ClientError> {
        expect_done(self.conn.roundtrip(&["clearall"])?)?;
        Ok(())
    }
}

/// A blocking connection to `cynagorad`'s agent socket: registering as
/// a named `@`-agent and answering pending `ask` verdicts.
pub struct AgentClient {
    conn: RawConnection,
}

impl AgentClient {
    /// Connect to the agent socket at `path` and complete the
    /// handshake.
    pub fn connect(path: &Path) -> Result<Self, ClientError> {
        let mut conn = RawConnection::connect(path)?;
        handshake(&mut conn)?;
        Ok(Self { conn })
    }

    /// Register this connection under `name`.
    pub fn register(&mut self, name: &str) -> Result<(), ClientError> {
        expect_done(self.conn.roundtrip(&["agent", name])?)?;
        Ok(())
    }

    /// Answer a pending question with `verdict` and expiration grammar
    /// text for how long the answer should stand.
    pub fn reply(&mut self, id: &str, verdict: &str, expire: &str) -> Result<(), ClientError> {
        expect_done(self.conn.roundtrip(&["reply", id, verdict, expire])?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> Query {
        Query {
            client: "app".into(),
            session: "s1".into(),
            user: "1000".into(),
            permission: "dial".into(),
        }
    }

    #[test]
    fn parses_a_well_formed_verdict() {
        let reply = vec!["check".to_string(), "yes".to_string(), "forever".to_string()];
        let verdict = parse_verdict("check", &reply).unwrap();
        assert_eq!(verdict.value, "yes");
        assert_eq!(verdict.expire, 0);
    }

    #[test]
    fn rejects_a_reply_for_the_wrong_command() {
        let reply = vec!["test".to_string(), "yes".to_string(), "forever".to_string()];
        assert!(parse_verdict("check", &reply).is_err());
    }

    #[test]
    fn rejects_a_reply_missing_fields() {
        let reply = vec!["check".to_string()];
        assert!(parse_verdict("check", &reply).is_err());
    }

    #[test]
    fn cache_key_is_stable_for_the_same_query() {
        let q = query();
        assert_eq!(cache_key(&q), cache_key(&q));
    }

    #[test]
    fn expect_done_rejects_an_error_reply() {
        let reply = vec!["error".to_string(), "nope".to_string()];
        assert!(expect_done(reply).is_err());
    }
}
