// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Thin `mio` wrapper: one polling primitive shared by every listening
//! and connection socket, matching the single-threaded, event-driven,
//! cooperative server model the daemon requires. Handlers are expected
//! to run to completion and never block; this module only owns the
//! poll/registry bookkeeping, not any handler dispatch.

use mio::{Events, Interest, Poll, Token};
use std::io;
use std::time::Duration;

/// Wraps an `mio::Poll` and the monotonically increasing token
/// allocator used to key registered sources.
pub struct Reactor {
    poll: Poll,
    events: Events,
    next_token: usize,
}

impl Reactor {
    /// Create a reactor with room for `capacity` events per poll cycle.
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity),
            next_token: 0,
        })
    }

    /// Allocate a fresh token for a new registration.
    pub fn next_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// Register `source` for `interest` under `token`.
    pub fn register<S>(&mut self, source: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: mio::event::Source + ?Sized,
    {
        self.poll.registry().register(source, token, interest)
    }

    /// Change the interest set for an already-registered source.
    pub fn reregister<S>(
        &mut self,
        source: &mut S,
        token: Token,
        interest: Interest,
    ) -> io::Result<()>
    where
        S: mio::event::Source + ?Sized,
    {
        self.poll.registry().reregister(source, token, interest)
    }

    /// Deregister a source, e.g. on connection teardown.
    pub fn deregister<S>(&mut self, source: &mut S) -> io::Result<()>
    where
        S: mio::event::Source + ?Sized,
    {
        self.poll.registry().deregister(source)
    }

    /// Block until at least one source is ready (or `timeout` elapses),
    /// then hand the caller an iterator over ready events to dispatch.
    /// Each event carries the `Token` the caller registered it under.
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<&Events> {
        self.poll.poll(&mut self.events, timeout)?;
        Ok(&self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::{UnixListener, UnixStream};
    use std::time::Duration;

    #[test]
    fn wakes_on_connection_accept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sock");
        let mut listener = UnixListener::bind(&path).unwrap();

        let mut reactor = Reactor::new(8).unwrap();
        let token = reactor.next_token();
        reactor
            .register(&mut listener, token, Interest::READABLE)
            .unwrap();

        let _client = UnixStream::connect(&path).unwrap();

        let events = reactor.poll(Some(Duration::from_secs(1))).unwrap();
        assert!(events.iter().any(|e| e.token() == token && e.is_readable()));
    }
}
