//! Pluggable id generation.
//!
//! A workspace owns exactly one generator and every block and document id is
//! drawn from it, which is what keeps ids collision-free across the
//! workspace's lifetime.

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Produces workspace-unique string ids.
pub trait IdGenerator: Send + Sync {
    /// Returns a fresh id. Two calls on the same generator never return the
    /// same value.
    fn generate(&self) -> String;
}

impl<F> IdGenerator for F
where
    F: Fn() -> String + Send + Sync,
{
    fn generate(&self) -> String {
        self()
    }
}

const URL_ALPHABET: &[u8; 64] =
    b"useandom-26T198340PX75pxJACKVERYMINDBUSHWOLF_GQZbfghjklqvwyzrict";

/// Random url-safe short ids. The default generator.
#[derive(Debug, Clone)]
pub struct NanoIdGenerator {
    len: usize,
}

impl NanoIdGenerator {
    /// Default id length, ~60 bits of entropy.
    pub const DEFAULT_LEN: usize = 10;

    /// Creates a generator producing ids of `len` characters.
    #[must_use]
    pub fn with_len(len: usize) -> Self {
        Self { len: len.max(1) }
    }
}

impl Default for NanoIdGenerator {
    fn default() -> Self {
        Self::with_len(Self::DEFAULT_LEN)
    }
}

impl IdGenerator for NanoIdGenerator {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.len)
            .map(|_| URL_ALPHABET[rng.gen_range(0..URL_ALPHABET.len())] as char)
            .collect()
    }
}

/// Sequential ids `"0"`, `"1"`, `"2"`, ... Deterministic, for tests.
#[derive(Debug, Default)]
pub struct AutoIncrementIdGenerator {
    next: AtomicU64,
}

impl AutoIncrementIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for AutoIncrementIdGenerator {
    fn generate(&self) -> String {
        self.next.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

/// Ids of the form `"<client>:<clock>"`.
///
/// Unique across replicas as long as every replica uses a distinct client
/// number.
#[derive(Debug)]
pub struct PeerScopedIdGenerator {
    client: u64,
    clock: AtomicU64,
}

impl PeerScopedIdGenerator {
    #[must_use]
    pub fn new(client: u64) -> Self {
        Self {
            client,
            clock: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for PeerScopedIdGenerator {
    fn generate(&self) -> String {
        let clock = self.clock.fetch_add(1, Ordering::Relaxed);
        format!("{}:{}", self.client, clock)
    }
}

/// Random UUID v4 ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }
}
