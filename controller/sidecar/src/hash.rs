//! 64-bit FNV-1 hashing of configuration documents.
//!
//! Note that this is FNV-1 (multiply, then xor), not FNV-1a. Configuration
//! versions derived from it must stay stable across releases.

const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const PRIME: u64 = 0x0000_0100_0000_01b3;

pub fn fnv1_64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(OFFSET_BASIS, |hash, &b| {
        hash.wrapping_mul(PRIME) ^ u64::from(b)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(fnv1_64(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1_64(b"a"), 0xaf63bd4c8601b7be);
        assert_eq!(fnv1_64(b"foobar"), 0x340d8765a4dda9c2);
    }

    #[test]
    fn is_not_fnv1a() {
        // FNV-1a("a") would be 0xaf63dc4c8601ec8c.
        assert_ne!(fnv1_64(b"a"), 0xaf63dc4c8601ec8c);
    }
}
