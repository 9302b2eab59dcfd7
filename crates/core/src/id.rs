// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ID generation: a 64-bit time-ordered snowflake for [`JobId`]/[`DlqId`],
//! and a fixed-size inline string buffer for everything else.

use parking_lot::Mutex;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum byte length for an inline ID: a 4-char prefix plus either a
/// 19-char nanoid suffix or a 20-digit zero-padded snowflake.
pub const ID_MAX_LEN: usize = 24;

/// Returns a string slice truncated to at most `n` characters.
pub fn short(s: &str, n: usize) -> &str {
    if s.len() <= n {
        s
    } else {
        &s[..n]
    }
}

/// Fixed-size inline ID buffer. Always <= 23 ASCII bytes, `Copy`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IdBuf {
    len: u8,
    buf: [u8; ID_MAX_LEN],
}

impl std::hash::Hash for IdBuf {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl PartialOrd for IdBuf {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IdBuf {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl IdBuf {
    pub const fn empty() -> Self {
        Self { len: 0, buf: [0; ID_MAX_LEN] }
    }

    pub fn new(s: &str) -> Self {
        debug_assert!(
            s.len() <= ID_MAX_LEN,
            "ID exceeds {} bytes ({} bytes): {:?}",
            ID_MAX_LEN,
            s.len(),
            s,
        );
        let len = s.len().min(ID_MAX_LEN);
        let mut buf = [0u8; ID_MAX_LEN];
        buf[..len].copy_from_slice(&s.as_bytes()[..len]);
        Self { len: len as u8, buf }
    }

    pub fn as_str(&self) -> &str {
        match std::str::from_utf8(&self.buf[..self.len as usize]) {
            Ok(s) => s,
            Err(_) => unreachable!("IdBuf constructed from non-UTF-8"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::borrow::Borrow<str> for IdBuf {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Debug for IdBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl std::fmt::Display for IdBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl serde::Serialize for IdBuf {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for IdBuf {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = <&str>::deserialize(deserializer)?;
        if s.len() > ID_MAX_LEN {
            return Err(serde::de::Error::custom(format!(
                "ID exceeds {} bytes: {:?}",
                ID_MAX_LEN, s
            )));
        }
        Ok(IdBuf::new(s))
    }
}

/// Define a newtype ID wrapper around [`IdBuf`] with a type prefix, backed by
/// a random nanoid suffix. Used for ids that carry no ordering requirement.
#[macro_export]
macro_rules! define_rand_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident($prefix:literal);
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $crate::id::IdBuf);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            pub fn new() -> Self {
                Self($crate::id::IdBuf::new(&format!(
                    "{}{}",
                    Self::PREFIX,
                    nanoid::nanoid!(19)
                )))
            }

            pub fn from_string(id: impl AsRef<str>) -> Self {
                Self($crate::id::IdBuf::new(id.as_ref()))
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0.as_str())
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::from_string(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::from_string(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.0.as_str()
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                self.0.as_str()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                self.0.as_str()
            }
        }
    };
}

/// Epoch for snowflake timestamps: 2025-01-01T00:00:00Z, in milliseconds
/// since the Unix epoch. Keeps the 42-bit timestamp field from overflowing
/// for a little over a century.
const SNOWFLAKE_EPOCH_MS: u64 = 1_735_689_600_000;

/// Bits allotted to each snowflake field, Twitter-style: 42 timestamp,
/// 10 worker/runner, 12 per-millisecond sequence.
const TIMESTAMP_BITS: u32 = 42;
const RUNNER_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_RUNNER_ID: u64 = (1 << RUNNER_BITS) - 1;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;

/// Monotonic, time-ordered 64-bit ID generator (see spec §3 invariant 4:
/// `jobId` is globally unique and monotonically increasing).
///
/// `runner_id` distinguishes generators on different runners so concurrent
/// submitters never collide; it must be stable for the lifetime of the
/// process (derived from `cluster_shard_assignment.runnerId` at startup).
pub struct Snowflake {
    runner_id: u64,
    state: Mutex<(u64, u64)>, // (last_ms, sequence)
}

impl Snowflake {
    pub fn new(runner_id: u64) -> Self {
        Self { runner_id: runner_id & MAX_RUNNER_ID, state: Mutex::new((0, 0)) }
    }

    /// Generate the next ID using the real wall clock.
    pub fn next_id(&self) -> u64 {
        self.next_id_at(epoch_ms_now())
    }

    /// Generate the next ID for a caller-supplied timestamp (for
    /// deterministic tests via [`crate::clock::Clock`]).
    pub fn next_id_at(&self, now_ms: u64) -> u64 {
        let mut guard = self.state.lock();
        let (last_ms, seq) = *guard;
        let (ms, sequence) = if now_ms > last_ms {
            (now_ms, 0)
        } else if seq >= MAX_SEQUENCE {
            // Sequence exhausted within this millisecond: spin to the next one.
            (last_ms + 1, 0)
        } else {
            (last_ms, seq + 1)
        };
        *guard = (ms, sequence);
        drop(guard);

        let relative_ms = ms.saturating_sub(SNOWFLAKE_EPOCH_MS);
        (relative_ms << (RUNNER_BITS + SEQUENCE_BITS))
            | (self.runner_id << SEQUENCE_BITS)
            | sequence
    }
}

fn epoch_ms_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Process-wide snowflake generator, lazily seeded with runner id 0.
/// Components that care about runner-distinctness should construct and
/// thread their own [`Snowflake`] instead; this is a convenience default
/// for single-runner tests and the CLI.
fn default_generator() -> &'static Snowflake {
    static GEN: OnceLock<Snowflake> = OnceLock::new();
    GEN.get_or_init(|| Snowflake::new(0))
}

/// Sortable, time-embedded job identifier: `job-{20-digit-decimal-snowflake}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct JobId(pub IdBuf);

impl JobId {
    pub const PREFIX: &'static str = "job-";

    pub fn new() -> Self {
        Self::from_snowflake(default_generator().next_id())
    }

    pub fn from_snowflake(value: u64) -> Self {
        Self(IdBuf::new(&format!("{}{:020}", Self::PREFIX, value)))
    }

    pub fn from_string(id: impl AsRef<str>) -> Self {
        Self(IdBuf::new(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// The embedded snowflake integer, or `None` if this id wasn't produced
    /// by [`Self::from_snowflake`] (e.g. a test fixture string).
    pub fn snowflake_value(&self) -> Option<u64> {
        self.as_str().strip_prefix(Self::PREFIX)?.parse().ok()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.as_str())
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl std::borrow::Borrow<str> for JobId {
    fn borrow(&self) -> &str {
        self.0.as_str()
    }
}

impl std::ops::Deref for JobId {
    type Target = str;

    fn deref(&self) -> &str {
        self.0.as_str()
    }
}

define_rand_id! {
    /// Unique identifier for a dead-letter entry.
    pub struct DlqId("dlq-");
}

define_rand_id! {
    /// Handle for one live `onStatusChange` subscription (spec §6.1), so a
    /// caller juggling several can tell its receivers apart without relying
    /// on the `broadcast::Receiver`'s own (non-`Debug`) identity.
    pub struct SubscriptionId("sub-");
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
