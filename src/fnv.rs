// ftail - fnv.rs
//
// FNV-1a, 64-bit variant. Used as the lightweight file-identity fingerprint
// (the "head-hash", spec.md §3/§4.G). A single well-known, fully-specified
// algorithm — hand-rolled rather than pulled in as a dependency.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Incremental FNV-1a 64-bit hasher.
#[derive(Debug, Clone, Copy)]
pub struct Fnv1a64(u64);

impl Fnv1a64 {
    pub fn new() -> Self {
        Self(FNV_OFFSET_BASIS)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        let mut hash = self.0;
        for &b in bytes {
            hash ^= b as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        self.0 = hash;
    }

    pub fn finish(&self) -> u64 {
        self.0
    }

    /// Format the current digest the way spec.md §3 requires: a hex string.
    pub fn finish_hex(&self) -> String {
        format!("{:x}", self.finish())
    }
}

impl Default for Fnv1a64 {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot hash of a full byte slice.
pub fn hash_hex(bytes: &[u8]) -> String {
    let mut h = Fnv1a64::new();
    h.write(bytes);
    h.finish_hex()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_offset_basis() {
        let h = Fnv1a64::new();
        assert_eq!(h.finish(), FNV_OFFSET_BASIS);
    }

    #[test]
    fn known_vector_matches_reference_fnv1a64() {
        // FNV-1a 64-bit of the empty string and of "a" are well-known test
        // vectors from the FNV reference implementation.
        assert_eq!(hash_hex(b""), format!("{:x}", FNV_OFFSET_BASIS));
        let mut h = Fnv1a64::new();
        h.write(b"a");
        assert_eq!(h.finish(), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut incremental = Fnv1a64::new();
        incremental.write(b"hello, ");
        incremental.write(b"world");
        let one_shot = hash_hex(b"hello, world");
        assert_eq!(incremental.finish_hex(), one_shot);
    }
}
