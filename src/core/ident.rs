//! Replica identity and cookie generation.
//!
//! A [`ReplicaId`] names one replica of a service: the sanitised local
//! hostname, the service name, and the pool slot the replica holds (0 when
//! it holds none). [`CookieGen`] produces opaque correlation cookies for
//! request tracing and replica-scoped identifiers.

use crate::core::hostname::hostname;
use parking_lot::Mutex;
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};

/// Identity of one service replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaId {
    hostname: String,
    service: String,
    slot: i64,
    value: String,
}

impl ReplicaId {
    /// Build an identity for the given service and pool slot.
    ///
    /// Slot 0 means "no pool membership" and is left out of the rendered
    /// name.
    pub fn new(service: impl Into<String>, slot: i64) -> Self {
        let service = service.into();
        let hostname = hostname();
        let value = if slot > 0 {
            format!("{}-{}-{}", hostname, service, slot)
        } else {
            format!("{}-{}", hostname, service)
        };
        Self {
            hostname,
            service,
            slot,
            value,
        }
    }

    /// The sanitised hostname component.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The service component.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The numeric pool slot, 0 when none.
    pub fn slot(&self) -> i64 {
        self.slot
    }

    /// Render the identity with the hostname replaced by `mask`.
    pub fn mask(&self, mask: &str) -> String {
        if self.slot > 0 {
            format!("{}-{}-{}", mask, self.service, self.slot)
        } else {
            format!("{}-{}", mask, self.service)
        }
    }
}

impl std::fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

// ============================================================================
// Cookie generation
// ============================================================================

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

const COOKIE_LEN: usize = 32;
const LETTER_IDX_BITS: u32 = 6;
const LETTER_IDX_MASK: i64 = (1 << LETTER_IDX_BITS) - 1;
const LETTER_IDX_MAX: u32 = 63 / LETTER_IDX_BITS;

const INCREMENTED_SOURCE_OFFSET: u64 = 100_000_000;

/// Where a [`CookieGen`] draws its randomness from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieSource {
    /// Seeded pseudo-random generator.
    PseudoRand,
    /// Operating-system randomness, with a pseudo-random fallback.
    CryptoRand,
    /// Monotonic counter offset by the node identifier.
    Incremented,
}

impl std::fmt::Display for CookieSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PseudoRand => "CookieSourcePseudoRand",
            Self::CryptoRand => "CookieSourceCryptoRand",
            Self::Incremented => "CookieSourceIncremented",
        };
        f.write_str(name)
    }
}

enum Generator {
    Pseudo(StdRng),
    Crypto { fallback: StdRng },
    Incremented(u64),
}

impl Generator {
    fn next(&mut self) -> i64 {
        match self {
            Self::Pseudo(rng) => (rng.next_u64() >> 1) as i64,
            Self::Crypto { fallback } => {
                let mut bytes = [0u8; 8];
                if OsRng.try_fill_bytes(&mut bytes).is_ok() {
                    (u64::from_be_bytes(bytes) >> 1) as i64
                } else {
                    (fallback.next_u64() >> 1) as i64
                }
            }
            Self::Incremented(counter) => {
                *counter += 1;
                *counter as i64
            }
        }
    }
}

/// Thread-safe cookie generator.
pub struct CookieGen {
    generator: Mutex<Generator>,
    source: CookieSource,
}

impl CookieGen {
    /// Create a generator for the given source.
    ///
    /// `node_id` seeds the incremented source and is ignored otherwise.
    pub fn new(source: CookieSource, node_id: i64) -> Self {
        let generator = match source {
            CookieSource::PseudoRand => Generator::Pseudo(StdRng::from_entropy()),
            CookieSource::CryptoRand => Generator::Crypto {
                fallback: StdRng::from_entropy(),
            },
            CookieSource::Incremented => {
                Generator::Incremented(INCREMENTED_SOURCE_OFFSET * node_id.max(0) as u64)
            }
        };
        Self {
            generator: Mutex::new(generator),
            source,
        }
    }

    /// The source this generator was built with.
    pub fn source(&self) -> CookieSource {
        self.source
    }

    fn next(&self) -> i64 {
        self.generator.lock().next()
    }

    /// Produce a new 32-letter cookie.
    ///
    /// Each generator output yields up to ten 6-bit letter indices; indices
    /// past the alphabet are discarded, so cookies stay uniform over the
    /// letter set.
    pub fn cookie(&self) -> String {
        let mut out = [0u8; COOKIE_LEN];
        let mut i = COOKIE_LEN;
        let mut cache = self.next();
        let mut remain = LETTER_IDX_MAX;

        while i > 0 {
            if remain == 0 {
                cache = self.next();
                remain = LETTER_IDX_MAX;
            }
            let idx = (cache & LETTER_IDX_MASK) as usize;
            if idx < LETTERS.len() {
                i -= 1;
                out[i] = LETTERS[idx];
            }
            cache >>= LETTER_IDX_BITS;
            remain -= 1;
        }

        String::from_utf8_lossy(&out).into_owned()
    }

    /// Produce a new non-negative 63-bit cookie packed in a u64.
    pub fn int63(&self) -> u64 {
        self.next() as u64
    }
}
