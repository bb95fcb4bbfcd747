// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The facade a daemon talks to: routes a rule to the persistent file
//! store or the volatile session store by its `session` field, and
//! keeps both backends' transactions in lockstep.

use crate::anydb::RuleIndex;
use crate::backend::{Backend, BackendError, Transaction};
use crate::file::FileBackend;
use crate::key::{RawKey, RawValue};
use crate::mem::MemBackend;
use std::path::Path;
use thiserror::Error;

/// Errors the facade can report, layered on top of a single backend's
/// own [`BackendError`].
#[derive(Debug, Error)]
pub enum DbError {
    /// A backend operation failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// `set`/`drop` was called with no transaction open.
    #[error("no transaction is open")]
    NotInTransaction,
    /// `begin` was called while a transaction was already open.
    #[error("a transaction is already open")]
    AlreadyInTransaction,
}

/// One `set` or `drop` queued against an open transaction, not yet
/// applied to either backend.
enum QueuedOp {
    Set(RawKey, RawValue),
    Drop(RawKey),
}

/// Rules whose `session` is a concrete value live in the volatile
/// [`MemBackend`]; rules with `WIDE`/`ANY` session live in the
/// persistent [`FileBackend`]. Reads consult both and let the
/// session-scoped match win on a score tie.
pub struct Db {
    file: RuleIndex<FileBackend>,
    mem: RuleIndex<MemBackend>,
    in_transaction: bool,
    /// `set`/`drop` calls issued since the last `begin`, replayed onto
    /// the backends only at `commit`. Until then, `test`/`for_all` from
    /// any other connection still sees the pre-transaction rule set.
    queue: Vec<QueuedOp>,
}

impl Db {
    /// Open the persistent store under `dir`; the session store always
    /// starts empty.
    pub fn open(dir: &Path) -> Result<Self, DbError> {
        Ok(Self {
            file: RuleIndex::new(FileBackend::open(dir)?),
            mem: RuleIndex::new(MemBackend::new()),
            in_transaction: false,
            queue: Vec::new(),
        })
    }

    /// Load the initial rule set from a human-edited file into the
    /// persistent store. Intended for first boot or `--force-init`.
    /// `now` resolves each rule's relative expiration text.
    pub fn import_initial(&mut self, path: &Path, now: i64) -> Result<usize, DbError> {
        Ok(self.file.backend_mut().import_initial(path, now)?)
    }

    /// Begin a transaction spanning both backends.
    pub fn begin(&mut self) -> Result<(), DbError> {
        if self.in_transaction {
            return Err(DbError::AlreadyInTransaction);
        }
        self.file.backend_mut().transaction(Transaction::Start)?;
        self.mem.backend_mut().transaction(Transaction::Start)?;
        self.in_transaction = true;
        self.queue.clear();
        Ok(())
    }

    /// Replay every queued `set`/`drop`, in issue order, onto the
    /// backends they target, then commit both — persisting the file
    /// backend and compacting the session backend. Readers on other
    /// connections observe the old rule set right up until this call
    /// returns; there is no point at which a partially-applied edit is
    /// visible.
    pub fn commit(&mut self) -> Result<(), DbError> {
        if !self.in_transaction {
            return Err(DbError::NotInTransaction);
        }
        for op in self.queue.drain(..) {
            match op {
                QueuedOp::Set(key, value) => {
                    if key.session_is_wide_or_any() {
                        self.file.set(&key, &value)?;
                    } else {
                        self.mem.set(&key, &value)?;
                    }
                }
                QueuedOp::Drop(key) => {
                    self.file.drop(&key)?;
                    self.mem.drop(&key)?;
                }
            }
        }
        self.file.backend_mut().transaction(Transaction::Commit)?;
        self.mem.backend_mut().transaction(Transaction::Commit)?;
        self.file.backend_mut().gc();
        self.in_transaction = false;
        Ok(())
    }

    /// Cancel the open transaction, discarding every queued `set`/`drop`
    /// and leaving both backends as they were before [`Db::begin`].
    pub fn cancel(&mut self) -> Result<(), DbError> {
        if !self.in_transaction {
            return Err(DbError::NotInTransaction);
        }
        self.queue.clear();
        self.file.backend_mut().transaction(Transaction::Cancel)?;
        self.mem.backend_mut().transaction(Transaction::Cancel)?;
        self.in_transaction = false;
        Ok(())
    }

    /// Whether a transaction is currently open.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Queue a rule to be set, routed to the file or session backend by
    /// its `session` field at commit time. Requires an open
    /// transaction; does not itself mutate either backend.
    pub fn set(&mut self, key: &RawKey, value: &RawValue) -> Result<(), DbError> {
        if !self.in_transaction {
            return Err(DbError::NotInTransaction);
        }
        self.queue.push(QueuedOp::Set(key.clone(), value.clone()));
        Ok(())
    }

    /// Queue every rule matching `key` to be dropped from both backends
    /// at commit time. Requires an open transaction; does not itself
    /// mutate either backend.
    pub fn drop(&mut self, key: &RawKey) -> Result<(), DbError> {
        if !self.in_transaction {
            return Err(DbError::NotInTransaction);
        }
        self.queue.push(QueuedOp::Drop(key.clone()));
        Ok(())
    }

    /// Visit every matching rule in both backends. Does not require a
    /// transaction.
    pub fn for_all(
        &mut self,
        key: &RawKey,
        now: i64,
        mut f: impl FnMut(&RawKey, &RawValue),
    ) -> Result<(), DbError> {
        self.file.for_all(key, now, &mut f)?;
        self.mem.for_all(key, now, &mut f)?;
        Ok(())
    }

    /// Find the single best-matching rule across both backends. On a
    /// score tie, the session-scoped (`mem`) match wins, since it is
    /// by construction at least as specific as any file-backed rule.
    pub fn test(&mut self, key: &RawKey, now: i64) -> Result<Option<RawValue>, DbError> {
        let mem_hit = self.mem.test_with_score(key, now)?;
        let file_hit = self.file.test_with_score(key, now)?;
        let winner = match (mem_hit, file_hit) {
            (Some((mem_score, mem_value)), Some((file_score, file_value))) => {
                if file_score > mem_score {
                    Some(file_value)
                } else {
                    Some(mem_value)
                }
            }
            (Some((_, v)), None) | (None, Some((_, v))) => Some(v),
            (None, None) => None,
        };
        Ok(winner)
    }

    /// Remove expired rules from both backends.
    pub fn cleanup(&mut self, now: i64) {
        self.file.cleanup(now);
        self.mem.cleanup(now);
    }

    /// Whether both backends hold no rules at all.
    pub fn is_empty(&mut self) -> bool {
        self.file.is_empty() && self.mem.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(c: &str, s: &str, u: &str, p: &str) -> RawKey {
        RawKey::new(c, s, u, p)
    }

    #[test]
    fn set_routes_concrete_session_to_mem_and_wide_session_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Db::open(dir.path()).unwrap();
        db.begin().unwrap();
        db.set(&raw("alice", "s1", "1000", "audio"), &RawValue { value: "yes".into(), expire: 0 })
            .unwrap();
        db.set(&raw("alice", "*", "1000", "video"), &RawValue { value: "no".into(), expire: 0 })
            .unwrap();
        db.commit().unwrap();

        assert!(!db.mem.is_empty());
        assert!(!db.file.is_empty());
    }

    #[test]
    fn mutation_requires_open_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Db::open(dir.path()).unwrap();
        let err = db
            .set(&raw("alice", "s1", "1000", "audio"), &RawValue { value: "yes".into(), expire: 0 })
            .unwrap_err();
        assert!(matches!(err, DbError::NotInTransaction));
    }

    #[test]
    fn cancel_discards_both_backends() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Db::open(dir.path()).unwrap();
        db.begin().unwrap();
        db.set(&raw("alice", "s1", "1000", "audio"), &RawValue { value: "yes".into(), expire: 0 })
            .unwrap();
        db.cancel().unwrap();
        assert!(db.is_empty());
    }

    #[test]
    fn test_prefers_session_scoped_match_on_tie() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Db::open(dir.path()).unwrap();
        db.begin().unwrap();
        db.set(&raw("alice", "*", "1000", "audio"), &RawValue { value: "no".into(), expire: 0 })
            .unwrap();
        db.set(&raw("alice", "s1", "1000", "audio"), &RawValue { value: "yes".into(), expire: 0 })
            .unwrap();
        db.commit().unwrap();

        let result = db.test(&raw("alice", "s1", "1000", "audio"), 100).unwrap();
        assert_eq!(result.unwrap().value, "yes");
    }

    #[test]
    fn queued_edits_are_invisible_to_test_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Db::open(dir.path()).unwrap();
        db.begin().unwrap();
        db.set(&raw("alice", "s1", "1000", "audio"), &RawValue { value: "yes".into(), expire: 0 })
            .unwrap();

        // A concurrent reader sharing this transaction's in-progress
        // connection must still see the old rule set — the edit has
        // only been queued, not applied to either backend.
        let result = db.test(&raw("alice", "s1", "1000", "audio"), 100).unwrap();
        assert!(result.is_none());

        db.commit().unwrap();
        let result = db.test(&raw("alice", "s1", "1000", "audio"), 100).unwrap();
        assert_eq!(result.unwrap().value, "yes");
    }

    #[test]
    fn queued_drop_is_invisible_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Db::open(dir.path()).unwrap();
        db.begin().unwrap();
        db.set(&raw("alice", "s1", "1000", "audio"), &RawValue { value: "yes".into(), expire: 0 })
            .unwrap();
        db.commit().unwrap();

        db.begin().unwrap();
        db.drop(&raw("alice", "s1", "1000", "audio")).unwrap();
        let result = db.test(&raw("alice", "s1", "1000", "audio"), 100).unwrap();
        assert_eq!(result.unwrap().value, "yes");

        db.commit().unwrap();
        let result = db.test(&raw("alice", "s1", "1000", "audio"), 100).unwrap();
        assert!(result.is_none());
    }
}
