//! Seed derivation for independent, reproducible random streams.
//!
//! A run seed is expanded into one stream seed per simulation unit with
//! HMAC-SHA256 domain separation. Units therefore never share a generator,
//! and the draws a unit sees do not depend on which thread runs it or in
//! what order units are scheduled.

use hmac::{Hmac, Mac};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sha2::Sha256;

/// Generator used for every stream. Portable across platforms, so a seed
/// reproduces the same draws everywhere.
pub type StreamRng = ChaCha8Rng;

/// Derive a stream seed from a run seed, a domain tag and a unit index.
///
/// # Panics
///
/// Never: HMAC accepts keys of any length.
#[must_use]
pub fn derive_stream_seed(run_seed: u64, domain_tag: &[u8], index: u64) -> u64 {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(&run_seed.to_le_bytes()).expect("64-bit seed is valid key");
    mac.update(domain_tag);
    mac.update(b"/");
    mac.update(&index.to_le_bytes());
    let digest = mac.finalize().into_bytes();
    let mut seed_bytes = [0u8; 8];
    seed_bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(seed_bytes)
}

/// Construct the generator for one unit stream.
#[must_use]
pub fn stream_rng(run_seed: u64, domain_tag: &[u8], index: u64) -> StreamRng {
    StreamRng::seed_from_u64(derive_stream_seed(run_seed, domain_tag, index))
}

/// Use the supplied seed or draw a fresh one from OS entropy.
///
/// Drawn seeds are logged so an unseeded run can still be replayed.
#[must_use]
pub fn resolve_run_seed(seed: Option<u64>) -> u64 {
    seed.unwrap_or_else(|| {
        let drawn = rand::random::<u64>();
        log::info!("no seed supplied; drew run seed {drawn}");
        drawn
    })
}
