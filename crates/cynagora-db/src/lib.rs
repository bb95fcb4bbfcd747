// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Rule storage: the two backend implementations, the scoring index
//! that sits on top of either one, and the facade that routes a rule
//! to the right backend by its session field.

pub mod anydb;
pub mod backend;
pub mod db;
pub mod file;
pub mod intern;
pub mod key;
pub mod mem;

pub use anydb::{expired, RuleIndex};
pub use backend::{Action, Backend, BackendError, Transaction};
pub use db::{Db, DbError};
pub use file::FileBackend;
pub use intern::{Idx, IDX_ANY, IDX_INVALID, IDX_MAX, IDX_NONE, IDX_WIDE};
pub use key::{Key, RawKey, RawValue, Value};
pub use mem::MemBackend;
