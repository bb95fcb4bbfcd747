// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Short opaque id generator: a 6-character odometer over a fixed
//! alphabet, used for ask ids and other per-connection correlation
//! tokens that must be short, printable, and collision-avoidable by
//! simple advancement.

const ALPHABET: &[u8] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz-+*/<%$#@?!,.&~^>=|_";
const MAX_LEN: usize = 6;
const ZERO: u8 = ALPHABET[0];
const ONE: u8 = ALPHABET[1];

fn successor(c: u8) -> u8 {
    match ALPHABET.iter().position(|&a| a == c) {
        Some(i) => ALPHABET.get(i + 1).copied().unwrap_or(ZERO),
        None => ONE,
    }
}

/// A short id: up to [`MAX_LEN`] characters drawn from [`ALPHABET`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShortId {
    chars: Vec<u8>,
}

impl ShortId {
    /// The initial id, `"0"`.
    pub fn new() -> Self {
        Self { chars: vec![ZERO] }
    }

    /// Advance in place to the next id in sequence (odometer increment
    /// with carry; wraps the whole alphabet per position before
    /// growing to the next one, up to [`MAX_LEN`] characters).
    pub fn advance(&mut self) {
        let mut i = 0;
        loop {
            if i == self.chars.len() {
                self.chars.push(0);
            }
            let c = successor(self.chars[i]);
            self.chars[i] = c;
            i += 1;
            if c != ZERO || i >= MAX_LEN {
                break;
            }
        }
        self.chars.truncate(i);
    }

    /// Render as a `&str`.
    #[allow(clippy::expect_used)] // every byte comes from ALPHABET, which is pure ASCII
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.chars).expect("alphabet is ASCII")
    }

    /// Whether `s` is a syntactically valid short id: nonempty, at most
    /// [`MAX_LEN`] characters, every character drawn from [`ALPHABET`].
    pub fn is_valid(s: &str) -> bool {
        !s.is_empty() && s.len() <= MAX_LEN && s.bytes().all(|b| ALPHABET.contains(&b))
    }
}

impl Default for ShortId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ShortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generates a stream of ids by repeated [`ShortId::advance`], skipping
/// any id found in `taken` — used to pick an `askid` guaranteed not to
/// collide with any still-pending ask on a connection.
pub struct IdGenerator {
    current: ShortId,
}

impl IdGenerator {
    /// Create a generator starting from the initial id.
    pub fn new() -> Self {
        Self {
            current: ShortId::new(),
        }
    }

    /// Produce the next id not present in `taken`.
    pub fn next_unused(&mut self, taken: &impl Fn(&str) -> bool) -> ShortId {
        loop {
            self.current.advance();
            if !taken(self.current.as_str()) {
                return self.current.clone();
            }
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
