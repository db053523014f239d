//! Test fixtures for generating test data.

use bytes::Bytes;

/// Generate deterministic test data based on a seed.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Upload ID from a `Location` header (its last path segment).
#[allow(dead_code)]
pub fn id_from_location(location: &str) -> String {
    location
        .rsplit('/')
        .next()
        .expect("location has a path")
        .to_string()
}
