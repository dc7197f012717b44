// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Challenge/response authentication blocks.
//!
//! The shared secret is pre-stretched once into a 16-byte digest; each
//! challenge then derives a 32-byte response by an alternating MD5/SHA-256
//! chain seeded from SHA-512 of the challenge randomness and the stretched
//! secret. Both directions of the alternation are fixed here so the two
//! endpoints always agree:
//!
//! * pre-stretch: SHA-512(secret), then 16 rounds, even = SHA-256,
//!   odd = MD5 (the last round is MD5, hence 16 bytes),
//! * per-challenge: SHA-512(random ‖ stretched), then `iterations` rounds,
//!   even = MD5, odd = SHA-256; the response is the last SHA-256 output.

use std::sync::Mutex;

use anyhow::{Result, anyhow};
use md5::Md5;
use once_cell::sync::Lazy;
use rand::{RngExt, SeedableRng, rngs::StdRng};
use sha2::{Digest, Sha256, Sha512};
use zerocopy::{
    FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, LittleEndian, U16,
    Unaligned,
};

/// Challenge iterations are drawn from `[MIN_ITERATIONS, MAX_ITERATIONS)`.
pub const MIN_ITERATIONS: u16 = 10_000;
pub const MAX_ITERATIONS: u16 = 20_000;

pub const RESPONSE_LEN: usize = 32;
pub const CHALLENGE_LEN: usize = 36;

/// 32-byte header a client sends in front of its response when it wants a
/// non-default tenant on a new-enough indexer.
pub const TENANT_SENTINEL: [u8; 32] = *b"gravwellingestauthheadertenant01";

/// Server-generated challenge, written to the client immediately after the
/// byte stream is established. 36 bytes, little-endian.
#[repr(C)]
#[derive(Debug, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct Challenge {
    pub iterations: U16<LittleEndian>,
    pub random: [u8; 32],
    pub version: U16<LittleEndian>,
}

/// Pre-stretched shared secret. Deriving it is deliberately slow-ish; do it
/// once per configured secret, not per challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedSecretHash([u8; 16]);

impl SharedSecretHash {
    pub fn derive(secret: &str) -> Self {
        let mut cur: Vec<u8> = Sha512::digest(secret.as_bytes()).to_vec();
        for round in 0..16u32 {
            cur = if round % 2 == 0 {
                Sha256::digest(&cur).to_vec()
            } else {
                Md5::digest(&cur).to_vec()
            };
        }
        let mut out = [0u8; 16];
        out.copy_from_slice(&cur);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl Challenge {
    /// Draws a fresh challenge from the given RNG, advertising `version`.
    pub fn generate(rng: &mut ChallengeRng, version: u16) -> Self {
        let mut random = [0u8; 32];
        rng.fill_bytes(&mut random);
        Self {
            iterations: rng.iterations().into(),
            random,
            version: version.into(),
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        Self::read_from_bytes(buf).map_err(|e| anyhow!("failed to parse challenge: {e}"))
    }

    /// Computes the expected 32-byte response for this challenge.
    pub fn response(&self, secret: &SharedSecretHash) -> [u8; RESPONSE_LEN] {
        let mut seed = Sha512::new();
        seed.update(self.random);
        seed.update(secret.as_bytes());
        let mut cur: Vec<u8> = seed.finalize().to_vec();

        let mut last_sha = [0u8; RESPONSE_LEN];
        for round in 0..self.iterations.get() {
            if round % 2 == 0 {
                cur = Md5::digest(&cur).to_vec();
            } else {
                let d = Sha256::digest(&cur);
                last_sha.copy_from_slice(&d);
                cur = d.to_vec();
            }
        }
        last_sha
    }

    /// True iff `response` matches what [`Challenge::response`] yields.
    pub fn verify(&self, response: &[u8], secret: &SharedSecretHash) -> bool {
        response.len() == RESPONSE_LEN && response == self.response(secret)
    }
}

/// Process-wide challenge randomness: an OS-seeded `StdRng` that reseeds
/// itself every 1024 ± 1024 draws, behind a lock.
#[derive(Debug)]
pub struct ChallengeRng {
    rng: StdRng,
    draws: u32,
    reseed_at: u32,
}

static GLOBAL_RNG: Lazy<Mutex<ChallengeRng>> =
    Lazy::new(|| Mutex::new(ChallengeRng::new()));

impl ChallengeRng {
    pub fn new() -> Self {
        let mut rng = StdRng::from_rng(&mut rand::rng());
        let reseed_at = rng.random_range(1..=2048);
        Self {
            rng,
            draws: 0,
            reseed_at,
        }
    }

    pub fn global() -> &'static Mutex<ChallengeRng> {
        &GLOBAL_RNG
    }

    fn tick(&mut self) {
        self.draws += 1;
        if self.draws >= self.reseed_at {
            self.rng = StdRng::from_rng(&mut rand::rng());
            self.reseed_at = self.rng.random_range(1..=2048);
            self.draws = 0;
        }
    }

    pub fn fill_bytes(&mut self, buf: &mut [u8]) {
        self.tick();
        self.rng.fill(buf);
    }

    pub fn iterations(&mut self) -> u16 {
        self.tick();
        self.rng.random_range(MIN_ITERATIONS..MAX_ITERATIONS)
    }
}

impl Default for ChallengeRng {
    fn default() -> Self {
        Self::new()
    }
}

/// Trailing tenant selector of the sentinel-prefixed response form:
/// `{version: u16, name_len: u16, name}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantSelector {
    pub version: u16,
    pub name: String,
}
