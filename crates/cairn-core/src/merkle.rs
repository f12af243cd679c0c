//! Merkle aggregation over 32-byte digests.
//!
//! The canonical leaf order is lexicographic over the digest bytes; callers
//! pass digests in any order. Odd-length levels duplicate their trailing
//! node. A single digest is its own root, which is why a one-file record's
//! metadata carries the file digest verbatim as its Merkle root.

use sha2::{Digest, Sha256};

use crate::digest::DIGEST_SIZE;

/// Compute the Merkle root of a set of digests.
///
/// Returns the all-zero digest for an empty set; every caller in the store
/// guarantees non-empty input (records must carry files, anchors must cover
/// commits).
pub fn merkle_root(digests: &[[u8; DIGEST_SIZE]]) -> [u8; DIGEST_SIZE] {
    if digests.is_empty() {
        return [0u8; DIGEST_SIZE];
    }

    let mut level: Vec<[u8; DIGEST_SIZE]> = digests.to_vec();
    level.sort_unstable();

    while level.len() > 1 {
        if level.len() % 2 != 0 {
            let last = *level.last().unwrap();
            level.push(last);
        }
        level = level
            .chunks_exact(2)
            .map(|pair| {
                let mut hasher = Sha256::new();
                hasher.update(pair[0]);
                hasher.update(pair[1]);
                hasher.finalize().into()
            })
            .collect();
    }

    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::sha256;

    #[test]
    fn test_single_digest_is_its_own_root() {
        let d = sha256(b"x\n");
        assert_eq!(merkle_root(&[d]), d);
    }

    #[test]
    fn test_order_independent() {
        let a = sha256(b"a");
        let b = sha256(b"b");
        let c = sha256(b"c");
        assert_eq!(merkle_root(&[a, b, c]), merkle_root(&[c, a, b]));
    }

    #[test]
    fn test_pair_is_hash_of_sorted_concat() {
        let a = sha256(b"a");
        let b = sha256(b"b");
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let mut concat = Vec::with_capacity(64);
        concat.extend_from_slice(&lo);
        concat.extend_from_slice(&hi);
        assert_eq!(merkle_root(&[a, b]), sha256(&concat));
    }

    #[test]
    fn test_odd_count_duplicates_tail() {
        let a = sha256(b"a");
        let b = sha256(b"b");
        let c = sha256(b"c");
        // Three leaves behave as four with the last duplicated.
        let mut sorted = [a, b, c];
        sorted.sort_unstable();
        let four = [sorted[0], sorted[1], sorted[2], sorted[2]];
        assert_eq!(merkle_root(&[a, b, c]), merkle_root(&four));
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(merkle_root(&[]), [0u8; 32]);
    }
}
