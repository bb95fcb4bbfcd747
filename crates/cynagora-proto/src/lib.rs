// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Wire-level building blocks shared by the cynagora daemon and its
//! client library: the line-framed protocol, the expiration codec, the
//! short-id generator, and a single-threaded poll reactor.

pub mod expire;
pub mod idgen;
pub mod reactor;
pub mod wire;

pub use expire::{exp2txt, txt2exp, ExpireParseError};
pub use idgen::{IdGenerator, ShortId};
pub use reactor::Reactor;
pub use wire::{FrameDecoder, FrameEncoder, ProtoError, MAX_BUF_LEN, MAX_FIELDS};
