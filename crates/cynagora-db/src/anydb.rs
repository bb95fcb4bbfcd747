// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The polymorphic rule index: turns a bare [`Backend`] into the
//! query surface permission rules are actually browsed, set, dropped,
//! and scored through.
//!
//! Permission names are compared by their interned index like every
//! other field, which makes matching case-sensitive; callers are
//! expected to canonicalize permission casing before it reaches here.

use crate::backend::{Action, Backend, BackendError};
use crate::intern::{Idx, IDX_ANY, IDX_WIDE};
use crate::key::{Key, RawKey, RawValue, Value};

/// Bit set when a rule matched at all, even if only through a `WIDE`
/// or query-side `ANY` wildcard.
const SOME_MATCH_SCORE: u32 = 0x10;
/// Exact match on `session`, the highest-priority field.
const KEY_SESSION_MATCH_SCORE: u32 = 0x18;
/// Exact match on `user`.
const KEY_USER_MATCH_SCORE: u32 = 0x14;
/// Exact match on `client`.
const KEY_CLIENT_MATCH_SCORE: u32 = 0x12;
/// Exact match on `permission`.
const KEY_PERMISSION_MATCH_SCORE: u32 = 0x11;

/// Whether an expiration value denotes an already-expired rule.
/// Negative expirations encode "valid but do not cache" as
/// `-(real + 1)`; decode before comparing to `now`.
pub fn expired(expire: i64, now: i64) -> bool {
    let decoded = if expire < 0 { -(expire + 1) } else { expire };
    decoded != 0 && decoded <= now
}

/// A prepared, interned query key: `IDX_ANY` marks a wildcard field.
#[derive(Debug, Clone, Copy)]
struct QueryKey {
    client: Idx,
    session: Idx,
    user: Idx,
    permission: Idx,
}

fn field_matches(stored: Idx, query: Idx) -> bool {
    query == IDX_ANY || stored == IDX_WIDE || stored == query
}

fn matches_query(key: &Key, query: &QueryKey) -> bool {
    field_matches(key.client, query.client)
        && field_matches(key.session, query.session)
        && field_matches(key.user, query.user)
        && field_matches(key.permission, query.permission)
}

/// A matching field's contribution to a rule's specificity score: 0 for
/// a `WIDE` stored field (it only earns the flat [`SOME_MATCH_SCORE`]),
/// `bonus` for a concrete one. Matching validity is decided separately
/// by [`field_matches`] — this only weighs matches that already passed.
fn field_bonus(stored: Idx, bonus: u32) -> u32 {
    if stored == IDX_WIDE {
        0
    } else {
        bonus
    }
}

/// A rule's specificity score against `query`, or `None` if it doesn't
/// match at all. `SOME_MATCH_SCORE` is added once per matching rule,
/// not per field, so a rule concrete on every field it matches always
/// outranks one concrete on fewer fields.
fn score_rule(key: &Key, query: &QueryKey) -> Option<u32> {
    if !field_matches(key.client, query.client)
        || !field_matches(key.session, query.session)
        || !field_matches(key.user, query.user)
        || !field_matches(key.permission, query.permission)
    {
        return None;
    }
    Some(
        SOME_MATCH_SCORE
            + field_bonus(key.client, KEY_CLIENT_MATCH_SCORE)
            + field_bonus(key.session, KEY_SESSION_MATCH_SCORE)
            + field_bonus(key.user, KEY_USER_MATCH_SCORE)
            + field_bonus(key.permission, KEY_PERMISSION_MATCH_SCORE),
    )
}

/// Wraps a [`Backend`] with the `for_all`/`drop`/`set`/`test`/`is_empty`
/// query surface that every spec-level lookup goes through.
pub struct RuleIndex<B: Backend> {
    backend: B,
}

impl<B: Backend> RuleIndex<B> {
    /// Wrap `backend`.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Borrow the underlying backend, for transaction control and sync.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Borrow the underlying backend read-only.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Whether the index holds no rules at all.
    pub fn is_empty(&mut self) -> bool {
        let mut any = false;
        self.backend.apply(&mut |_k, _v| {
            any = true;
            Action::Stop
        });
        !any
    }

    /// Remove every rule whose expiration has passed as of `now`.
    pub fn cleanup(&mut self, now: i64) {
        self.backend.apply(&mut |_key, value| {
            if expired(value.expire, now) {
                Action::RemoveAndContinue
            } else {
                Action::Continue
            }
        });
    }

    /// Visit every rule matching `raw_key`, with `ANY`/empty fields
    /// acting as wildcards on the query side and stored `WIDE` fields
    /// acting as wildcards on the rule side. A field naming a string
    /// this backend has never interned makes the whole query match
    /// nothing, silently.
    pub fn for_all(
        &mut self,
        raw_key: &RawKey,
        now: i64,
        mut f: impl FnMut(&RawKey, &RawValue),
    ) -> Result<(), BackendError> {
        let Some(query) = self.prepare_match(raw_key)? else {
            return Ok(());
        };
        let mut hits: Vec<(Key, Value)> = Vec::new();
        self.backend.apply(&mut |key, value| {
            if expired(value.expire, now) {
                return Action::RemoveAndContinue;
            }
            if matches_query(key, &query) {
                hits.push((*key, *value));
            }
            Action::Continue
        });
        for (key, value) in hits {
            let raw_key = RawKey {
                client: Some(self.backend.string_of(key.client).to_string()),
                session: Some(self.backend.string_of(key.session).to_string()),
                user: Some(self.backend.string_of(key.user).to_string()),
                permission: Some(self.backend.string_of(key.permission).to_string()),
            };
            let raw_value = RawValue {
                value: self.backend.string_of(value.value).to_string(),
                expire: value.expire,
            };
            f(&raw_key, &raw_value);
        }
        Ok(())
    }

    /// Remove every rule matching `raw_key` (`match` semantics, see
    /// [`RuleIndex::for_all`]). Returns the number of rules removed.
    pub fn drop(&mut self, raw_key: &RawKey) -> Result<usize, BackendError> {
        let Some(query) = self.prepare_match(raw_key)? else {
            return Ok(0);
        };
        let mut removed = 0;
        self.backend.apply(&mut |key, _value| {
            if matches_query(key, &query) {
                removed += 1;
                Action::RemoveAndContinue
            } else {
                Action::Continue
            }
        });
        Ok(removed)
    }

    /// Set (insert or overwrite) the rule at `raw_key` to `raw_value`.
    /// `ANY`/empty query fields collapse to `WIDE` on write (`is`
    /// semantics): this is a literal key, not a pattern.
    pub fn set(&mut self, raw_key: &RawKey, raw_value: &RawValue) -> Result<(), BackendError> {
        let key = Key {
            client: self.intern_or_wide(raw_key.client.as_deref())?,
            session: self.intern_or_wide(raw_key.session.as_deref())?,
            user: self.intern_or_wide(raw_key.user.as_deref())?,
            permission: self.intern_or_wide(raw_key.permission.as_deref())?,
        };
        let value = Value {
            value: self.backend.intern(&raw_value.value, true)?,
            expire: raw_value.expire,
        };
        let mut found = false;
        self.backend.apply(&mut |existing, slot| {
            if *existing == key {
                *slot = value;
                found = true;
                Action::UpdateAndStop
            } else {
                Action::Continue
            }
        });
        if !found {
            self.backend.add(key, value)?;
        }
        Ok(())
    }

    /// Find the single best-matching rule for `raw_key` (`test`
    /// semantics): the rule with the highest specificity score wins,
    /// where an exact match on a field outranks a `WIDE`/`ANY` match on
    /// that field, and `session` outranks `user` outranks `client`
    /// outranks `permission`. Expired rules encountered along the way
    /// are removed.
    pub fn test(&mut self, raw_key: &RawKey, now: i64) -> Result<Option<RawValue>, BackendError> {
        Ok(self.test_with_score(raw_key, now)?.map(|(_, value)| value))
    }

    /// Like [`RuleIndex::test`], but also returns the winning rule's
    /// specificity score so callers merging several indices can decide
    /// ties themselves.
    pub fn test_with_score(
        &mut self,
        raw_key: &RawKey,
        now: i64,
    ) -> Result<Option<(u32, RawValue)>, BackendError> {
        let query = self.prepare_test(raw_key)?;
        let mut best: Option<(u32, Value)> = None;
        self.backend.apply(&mut |key, value| {
            if expired(value.expire, now) {
                return Action::RemoveAndContinue;
            }
            if let Some(score) = score_rule(key, &query) {
                if best.map(|(s, _)| score > s).unwrap_or(true) {
                    best = Some((score, *value));
                }
            }
            Action::Continue
        });
        Ok(best.map(|(score, value)| {
            (
                score,
                RawValue {
                    value: self.backend.string_of(value.value).to_string(),
                    expire: value.expire,
                },
            )
        }))
    }

    fn intern_or_wide(&mut self, text: Option<&str>) -> Result<Idx, BackendError> {
        match text {
            Some(t) if !crate::intern::is_any_or_wide(Some(t)) => self.backend.intern(t, true),
            _ => Ok(IDX_WIDE),
        }
    }

    fn resolve_query_field(&mut self, text: Option<&str>) -> Result<Idx, BackendError> {
        let Some(t) = text.filter(|t| !crate::intern::is_any(Some(t))) else {
            return Ok(IDX_ANY);
        };
        match self.backend.intern(t, false) {
            Ok(idx) => Ok(idx),
            Err(BackendError::NotFound) => Ok(IDX_ANY),
            Err(e) => Err(e),
        }
    }

    fn prepare_match(&mut self, raw_key: &RawKey) -> Result<Option<QueryKey>, BackendError> {
        for field in [&raw_key.client, &raw_key.session, &raw_key.user, &raw_key.permission] {
            if let Some(name) = field {
                if !crate::intern::is_any(Some(name.as_str())) && self.backend.intern(name, false).is_err() {
                    return Ok(None);
                }
            }
        }
        Ok(Some(QueryKey {
            client: self.resolve_query_field(raw_key.client.as_deref())?,
            session: self.resolve_query_field(raw_key.session.as_deref())?,
            user: self.resolve_query_field(raw_key.user.as_deref())?,
            permission: self.resolve_query_field(raw_key.permission.as_deref())?,
        }))
    }

    fn prepare_test(&mut self, raw_key: &RawKey) -> Result<QueryKey, BackendError> {
        Ok(QueryKey {
            client: self.resolve_query_field(raw_key.client.as_deref())?,
            session: self.resolve_query_field(raw_key.session.as_deref())?,
            user: self.resolve_query_field(raw_key.user.as_deref())?,
            permission: self.resolve_query_field(raw_key.permission.as_deref())?,
        })
    }
}
