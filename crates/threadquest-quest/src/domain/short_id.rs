//! Short public quest ids.

use threadquest_core::rng::DeterministicRng;

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Length of a short id.
pub const SHORT_ID_LEN: usize = 8;

/// Draws an 8-character base-62 id.
pub fn generate_short_id(rng: &mut dyn DeterministicRng) -> String {
    #[allow(clippy::cast_possible_truncation)]
    let max = (ALPHABET.len() - 1) as u32;
    (0..SHORT_ID_LEN)
        .map(|_| {
            let index = rng.next_u32_range(0, max) as usize;
            char::from(ALPHABET[index.min(ALPHABET.len() - 1)])
        })
        .collect()
}
