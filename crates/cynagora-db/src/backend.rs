// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The abstract backend interface shared by the in-memory session
//! store and the persistent file store.

use crate::intern::Idx;
use crate::key::{Key, Value};
use thiserror::Error;

/// Errors a backend can report.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Lookup miss when interning was not permitted to create an entry.
    #[error("not found")]
    NotFound,
    /// I/O failure against the backing store (file backend only).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The on-disk magic header did not match; the store is unreadable.
    #[error("bad magic header in {0}")]
    BadMagic(String),
    /// A transaction operation was requested without a matching start,
    /// or nested while one was already open.
    #[error("no transaction in progress")]
    NoTransaction,
    /// An initial-import line's expiration field was not valid
    /// expiration text.
    #[error("bad expiration: {0}")]
    BadExpire(#[from] cynagora_proto::ExpireParseError),
}

/// What a visitor wants done with the rule it was just shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Move on to the next rule, keeping this one as-is.
    Continue,
    /// Stop iterating.
    Stop,
    /// Persist the (possibly mutated) value, then continue.
    UpdateAndContinue,
    /// Persist the (possibly mutated) value, then stop.
    UpdateAndStop,
    /// Remove this rule, then continue.
    RemoveAndContinue,
    /// Remove this rule, then stop.
    RemoveAndStop,
}

impl Action {
    /// Whether iteration should continue after this rule.
    pub fn continues(self) -> bool {
        !matches!(self, Action::Stop | Action::UpdateAndStop | Action::RemoveAndStop)
    }
}

/// The three transaction operations a backend understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transaction {
    /// Begin a cancelable transaction.
    Start,
    /// Commit the started transaction's changes.
    Commit,
    /// Discard the started transaction's changes.
    Cancel,
}

/// Capability set shared by the memory and file rule stores.
pub trait Backend {
    /// Resolve `name` to its string-table index, creating an entry if
    /// `create` is set and the name is not already present.
    fn intern(&mut self, name: &str, create: bool) -> Result<Idx, BackendError>;

    /// Look up the string for `idx`. `idx` must be a value this backend
    /// has previously returned from [`Backend::intern`].
    fn string_of(&self, idx: Idx) -> &str;

    /// Visit every rule, in implementation-defined order, applying
    /// `visitor`'s requested [`Action`] before advancing.
    fn apply(&mut self, visitor: &mut dyn FnMut(&Key, &mut Value) -> Action);

    /// Append a new rule. The caller guarantees no existing rule shares
    /// `key`.
    fn add(&mut self, key: Key, value: Value) -> Result<(), BackendError>;

    /// Start, commit, or cancel a transaction.
    fn transaction(&mut self, op: Transaction) -> Result<(), BackendError>;

    /// Garbage-collect unreferenced string-table entries. A no-op for
    /// backends that do not need it.
    fn gc(&mut self) {}

    /// Flush any in-memory mirror to durable storage. A no-op for
    /// backends with no durable storage.
    fn sync(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}
