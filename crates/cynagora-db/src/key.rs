// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Rule keys and values, in both their string (caller-facing) and
//! interned (backend-facing) shapes.

use crate::intern::Idx;

/// A rule's 4-tuple in string form, as callers pass it to `set`/`drop`/
/// `test`. `None` is treated as `ANY` when scanning and as `WIDE` when
/// storing, matching the distilled field encodings `*`/`#`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawKey {
    /// Requesting client identity.
    pub client: Option<String>,
    /// Session identifier.
    pub session: Option<String>,
    /// User identity.
    pub user: Option<String>,
    /// Permission name.
    pub permission: Option<String>,
}

impl RawKey {
    /// Build a key from four owned strings, no special handling.
    pub fn new(
        client: impl Into<String>,
        session: impl Into<String>,
        user: impl Into<String>,
        permission: impl Into<String>,
    ) -> Self {
        Self {
            client: Some(client.into()),
            session: Some(session.into()),
            user: Some(user.into()),
            permission: Some(permission.into()),
        }
    }

    /// Whether the session component is `WIDE` or `ANY` — the routing
    /// test between the persistent and the session backend.
    pub fn session_is_wide_or_any(&self) -> bool {
        crate::intern::is_any_or_wide(self.session.as_deref())
    }
}

/// A rule's value in string form: a verdict word (`"yes"`, `"no"`, or an
/// agent directive `"<name>:<payload>"`) and a signed expiration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawValue {
    /// The verdict string.
    pub value: String,
    /// Expiration: 0 forever, positive absolute epoch second, negative
    /// "valid until `-(expire+1)` but do not cache".
    pub expire: i64,
}

/// A rule's 4-tuple once every field has been interned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key {
    /// Interned client index.
    pub client: Idx,
    /// Interned session index.
    pub session: Idx,
    /// Interned user index.
    pub user: Idx,
    /// Interned permission index.
    pub permission: Idx,
}

/// A rule's value once its verdict string has been interned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value {
    /// Interned verdict-string index.
    pub value: Idx,
    /// Expiration, same encoding as [`RawValue::expire`].
    pub expire: i64,
}
