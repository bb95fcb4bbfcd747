// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The volatile session backend: holds rules whose `session` component
//! is concrete. Transactions are tag-based rather than file-backed —
//! touched rules keep their prior value in a shadow slot so a cancel
//! can restore them without ever touching disk.

use crate::backend::{Action, Backend, BackendError, Transaction};
use crate::intern::Idx;
use crate::key::{Key, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Clean,
    Changed,
    Deleted,
    Added,
}

struct Rule {
    key: Key,
    value: Value,
    shadow: Option<Value>,
    tag: Tag,
}

/// In-memory rule store, also used as the interning arena for names
/// that only ever appear in session-scoped rules.
#[derive(Default)]
pub struct MemBackend {
    names: Vec<String>,
    by_name: HashMap<String, Idx>,
    rules: Vec<Rule>,
    in_transaction: bool,
}

impl MemBackend {
    /// Create an empty, interned-string-free backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-deleted) rules — used by tests and by
    /// emptiness checks at the facade layer.
    pub fn rule_count(&self) -> usize {
        self.rules.iter().filter(|r| r.tag != Tag::Deleted).count()
    }
}

impl Backend for MemBackend {
    fn intern(&mut self, name: &str, create: bool) -> Result<Idx, BackendError> {
        if let Some(&idx) = self.by_name.get(name) {
            return Ok(idx);
        }
        if !create {
            return Err(BackendError::NotFound);
        }
        let idx = self.names.len() as Idx;
        self.names.push(name.to_string());
        self.by_name.insert(name.to_string(), idx);
        Ok(idx)
    }

    fn string_of(&self, idx: Idx) -> &str {
        &self.names[idx as usize]
    }

    fn apply(&mut self, visitor: &mut dyn FnMut(&Key, &mut Value) -> Action) {
        let mut i = 0;
        while i < self.rules.len() {
            if self.rules[i].tag == Tag::Deleted {
                i += 1;
                continue;
            }
            let before = self.rules[i].value;
            let action = visitor(&self.rules[i].key, &mut self.rules[i].value);
            let rule = &mut self.rules[i];
            match action {
                Action::Continue => {}
                Action::Stop => break,
                Action::UpdateAndContinue | Action::UpdateAndStop => {
                    if self.in_transaction && rule.tag == Tag::Clean {
                        rule.shadow = Some(before);
                        rule.tag = Tag::Changed;
                    }
                    if action == Action::UpdateAndStop {
                        i += 1;
                        break;
                    }
                }
                Action::RemoveAndContinue | Action::RemoveAndStop => {
                    if self.in_transaction {
                        if rule.tag == Tag::Added {
                            // never existed outside this transaction
                        } else if rule.tag == Tag::Clean {
                            rule.shadow = Some(before);
                        }
                        rule.tag = Tag::Deleted;
                    } else {
                        rule.tag = Tag::Deleted;
                    }
                    if action == Action::RemoveAndStop {
                        i += 1;
                        break;
                    }
                }
            }
            i += 1;
        }
        if !self.in_transaction {
            self.rules.retain(|r| r.tag != Tag::Deleted);
        }
    }

    fn add(&mut self, key: Key, value: Value) -> Result<(), BackendError> {
        self.rules.push(Rule {
            key,
            value,
            shadow: None,
            tag: if self.in_transaction {
                Tag::Added
            } else {
                Tag::Clean
            },
        });
        Ok(())
    }

    fn transaction(&mut self, op: Transaction) -> Result<(), BackendError> {
        match op {
            Transaction::Start => {
                if self.in_transaction {
                    return Err(BackendError::NoTransaction);
                }
                self.in_transaction = true;
            }
            Transaction::Commit => {
                if !self.in_transaction {
                    return Err(BackendError::NoTransaction);
                }
                for rule in &mut self.rules {
                    rule.shadow = None;
                    if rule.tag != Tag::Deleted {
                        rule.tag = Tag::Clean;
                    }
                }
                self.rules.retain(|r| r.tag != Tag::Deleted);
                self.in_transaction = false;
            }
            Transaction::Cancel => {
                if !self.in_transaction {
                    return Err(BackendError::NoTransaction);
                }
                for rule in &mut self.rules {
                    match rule.tag {
                        Tag::Changed | Tag::Deleted => {
                            if let Some(shadow) = rule.shadow.take() {
                                rule.value = shadow;
                            }
                            rule.tag = Tag::Clean;
                        }
                        Tag::Added => {}
                        Tag::Clean => {}
                    }
                }
                self.rules.retain(|r| r.tag != Tag::Added);
                self.in_transaction = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(db: &mut MemBackend, c: &str, s: &str, u: &str, p: &str) -> Key {
        Key {
            client: db.intern(c, true).unwrap(),
            session: db.intern(s, true).unwrap(),
            user: db.intern(u, true).unwrap(),
            permission: db.intern(p, true).unwrap(),
        }
    }

    #[test]
    fn interning_is_stable() {
        let mut db = MemBackend::new();
        let a = db.intern("alice", true).unwrap();
        let b = db.intern("alice", true).unwrap();
        assert_eq!(a, b);
        assert_eq!(db.string_of(a), "alice");
    }

    #[test]
    fn intern_without_create_fails_on_miss() {
        let mut db = MemBackend::new();
        assert!(matches!(
            db.intern("nope", false),
            Err(BackendError::NotFound)
        ));
    }

    #[test]
    fn rollback_restores_changed_and_deleted_rules() {
        let mut db = MemBackend::new();
        let k1 = key(&mut db, "c", "s1", "u", "p");
        let v_yes = Value {
            value: db.intern("yes", true).unwrap(),
            expire: 0,
        };
        db.add(k1, v_yes).unwrap();

        db.transaction(Transaction::Start).unwrap();
        let v_no = db.intern("no", true).unwrap();
        db.apply(&mut |_key, value| {
            value.value = v_no;
            Action::UpdateAndContinue
        });
        db.transaction(Transaction::Cancel).unwrap();

        let mut seen = Vec::new();
        db.apply(&mut |_k, v| {
            seen.push(v.value);
            Action::Continue
        });
        assert_eq!(seen, vec![v_yes.value]);
    }

    #[test]
    fn commit_compacts_deletions() {
        let mut db = MemBackend::new();
        let k1 = key(&mut db, "c", "s1", "u", "p");
        db.add(
            k1,
            Value {
                value: db.intern("yes", true).unwrap(),
                expire: 0,
            },
        )
        .unwrap();

        db.transaction(Transaction::Start).unwrap();
        db.apply(&mut |_k, _v| Action::RemoveAndContinue);
        db.transaction(Transaction::Commit).unwrap();

        assert_eq!(db.rule_count(), 0);
    }

    #[test]
    fn cancel_removes_rules_added_during_the_transaction() {
        let mut db = MemBackend::new();
        db.transaction(Transaction::Start).unwrap();
        let k1 = key(&mut db, "c", "s1", "u", "p");
        db.add(
            k1,
            Value {
                value: db.intern("yes", true).unwrap(),
                expire: 0,
            },
        )
        .unwrap();
        db.transaction(Transaction::Cancel).unwrap();

        assert_eq!(db.rule_count(), 0);
    }
}
