// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The single-threaded, cooperative event loop: one [`mio::Poll`]
//! multiplexing three listening sockets (check/admin/agent) and every
//! accepted connection. Nothing here ever blocks — a connection that
//! would need to wait (a queued `enter`, a pending agent `ask`) is
//! simply not given its reply yet.

use crate::connection::{dispatch, on_disconnect, ConnState, DispatchOutcome, SocketKind};
use crate::state::ServerState;
use cynagora_proto::wire::{FrameDecoder, FrameEncoder};
use cynagora_proto::Reactor;
use mio::net::UnixListener;
use mio::Token;
use std::collections::HashMap;
use std::io::{self, Read};
use std::time::Duration;
use tracing::{debug, info, warn};

struct Connection {
    stream: mio::net::UnixStream,
    decoder: FrameDecoder,
    encoder: FrameEncoder,
    state: ConnState,
}

/// The three sockets the daemon listens on, paired with the socket
/// kind new connections on each should be tagged with.
pub struct Listeners {
    /// Checker clients: `check`/`test`/`sub`.
    pub check: UnixListener,
    /// Administrators: `enter`/`leave`/`set`/`drop`/`get`/`clearall`.
    pub admin: UnixListener,
    /// Agents answering `ask`-verdict rules.
    pub agent: UnixListener,
}

/// Runs the accept/read/dispatch/write loop until the process is
/// signaled to stop. Never returns under normal operation.
pub struct Daemon {
    reactor: Reactor,
    listener_tokens: HashMap<Token, SocketKind>,
    listeners: Listeners,
    connections: HashMap<Token, Connection>,
    next_conn_id: u64,
    state: ServerState,
}

const POLL_CAPACITY: usize = 256;

impl Daemon {
    /// Bind the reactor to `listeners` and wrap `state` for dispatch.
    pub fn new(mut listeners: Listeners, state: ServerState) -> io::Result<Self> {
        let mut reactor = Reactor::new(POLL_CAPACITY)?;
        let mut listener_tokens = HashMap::new();

        let check_token = reactor.next_token();
        reactor.register(&mut listeners.check, check_token, mio::Interest::READABLE)?;
        listener_tokens.insert(check_token, SocketKind::Check);

        let admin_token = reactor.next_token();
        reactor.register(&mut listeners.admin, admin_token, mio::Interest::READABLE)?;
        listener_tokens.insert(admin_token, SocketKind::Admin);

        let agent_token = reactor.next_token();
        reactor.register(&mut listeners.agent, agent_token, mio::Interest::READABLE)?;
        listener_tokens.insert(agent_token, SocketKind::Agent);

        Ok(Self {
            reactor,
            listener_tokens,
            listeners,
            connections: HashMap::new(),
            next_conn_id: 1,
            state,
        })
    }

    /// Run forever, polling with a 1-second timeout so periodic
    /// housekeeping (expired-rule cleanup) still happens on an idle
    /// daemon.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            self.tick(Some(Duration::from_secs(1)))?;
        }
    }

    /// Run a single poll-and-dispatch cycle; exposed separately so
    /// tests can drive the loop deterministically.
    pub fn tick(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        let events = self.reactor.poll(timeout)?;
        let tokens: Vec<Token> = events.iter().map(|e| e.token()).collect();
        for token in tokens {
            if let Some(&kind) = self.listener_tokens.get(&token) {
                self.accept_on(token, kind)?;
            } else {
                self.service(token);
            }
        }
        self.state.db.cleanup(ServerState::now());
        Ok(())
    }

    fn accept_on(&mut self, token: Token, kind: SocketKind) -> io::Result<()> {
        let listener = match kind {
            SocketKind::Check => &self.listeners.check,
            SocketKind::Admin => &self.listeners.admin,
            SocketKind::Agent => &self.listeners.agent,
        };
        loop {
            match listener.accept() {
                Ok((mut stream, _addr)) => {
                    let conn_token = self.reactor.next_token();
                    self.reactor
                        .register(&mut stream, conn_token, mio::Interest::READABLE)?;
                    let id = self.next_conn_id;
                    self.next_conn_id += 1;
                    self.connections.insert(
                        conn_token,
                        Connection {
                            stream,
                            decoder: FrameDecoder::new(),
                            encoder: FrameEncoder::new(),
                            state: ConnState::new(id, kind),
                        },
                    );
                    debug!(id, ?kind, "accepted connection");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
            let _ = token;
        }
        Ok(())
    }

    fn service(&mut self, token: Token) {
        // Own the connection for the duration of this call so dispatch
        // can freely look at (and grant tickets to) every *other*
        // connection in `self.connections` without a borrow conflict.
        let Some(mut conn) = self.connections.remove(&token) else {
            return;
        };

        let mut buf = [0u8; 4096];
        let mut closed = false;
        loop {
            match conn.stream.read(&mut buf) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => {
                    if conn.decoder.push_bytes(&buf[..n]).is_err() {
                        closed = true;
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => {
                    closed = true;
                    break;
                }
            }
        }

        loop {
            match conn.decoder.next_message() {
                Ok(Some(fields)) => {
                    let outcome = dispatch(&mut self.state, &mut conn.state, &fields);
                    match outcome {
                        DispatchOutcome::Reply(reply) => write_reply(&mut conn, &reply),
                        DispatchOutcome::NoReply => {}
                        DispatchOutcome::Forward {
                            self_reply,
                            to_conn,
                            fields,
                            mark_caching,
                        } => {
                            if let Some(reply) = self_reply {
                                write_reply(&mut conn, &reply);
                            }
                            if let Some(target) =
                                self.connections.values_mut().find(|c| c.state.id == to_conn)
                            {
                                write_reply(target, &fields);
                                if mark_caching {
                                    target.state.caching = true;
                                }
                            }
                        }
                        DispatchOutcome::Broadcast { reply, change_id } => {
                            write_reply(&mut conn, &reply);
                            self.broadcast_clear(change_id);
                        }
                        DispatchOutcome::Left {
                            reply,
                            granted,
                            broadcast,
                        } => {
                            write_reply(&mut conn, &reply);
                            if let Some(change_id) = broadcast {
                                self.broadcast_clear(change_id);
                            }
                            if let Some((holder_id, ticket)) = granted {
                                if let Some(waiting) =
                                    self.connections.values_mut().find(|c| c.state.id == holder_id)
                                {
                                    waiting.state.ticket = Some(ticket);
                                    write_reply(waiting, &["done".to_string()]);
                                }
                            }
                        }
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    closed = true;
                    break;
                }
            }
        }

        if closed {
            let forwards = on_disconnect(&mut self.state, &conn.state);
            for (to_conn, reply) in forwards {
                if let Some(target) = self.connections.values_mut().find(|c| c.state.id == to_conn) {
                    write_reply(target, &reply);
                }
            }
            let _ = self.reactor.deregister(&mut conn.stream);
            info!(id = conn.state.id, "connection closed");
        } else {
            self.connections.insert(token, conn);
        }
    }

    /// Tell every connection still holding a cached answer that the
    /// rule set moved on. Every socket kind registers for this, not
    /// just checkers — an admin or agent connection that issued its own
    /// `check`/`test` is just as stale.
    fn broadcast_clear(&mut self, change_id: u64) {
        let msg = vec!["clear".to_string(), change_id.to_string()];
        for conn in self.connections.values_mut() {
            if conn.state.caching {
                write_reply(conn, &msg);
                conn.state.caching = false;
            }
        }
    }
}

fn write_reply(conn: &mut Connection, fields: &[String]) {
    let refs: Vec<&str> = fields.iter().map(String::as_str).collect();
    if conn.encoder.put_fields(&refs).is_ok() {
        let _ = conn.encoder.write_to(&mut conn.stream);
    }
}
