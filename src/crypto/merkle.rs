//! Binary BLAKE3 Merkle root over transaction ids.

use crate::Hash;

/// Compute the Merkle root of a list of leaves.
///
/// Empty input yields the zero hash and a single leaf is its own root.
/// Layers are padded to a power of two with the zero hash.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return [0u8; 32];
    }
    if leaves.len() == 1 {
        return leaves[0];
    }

    let n = leaves.len().next_power_of_two();
    let mut layer: Vec<Hash> = leaves.to_vec();
    layer.resize(n, [0u8; 32]);

    while layer.len() > 1 {
        layer = layer
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }
    layer[0]
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = blake3::Hasher::new_derive_key("stratum.merkle.node");
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_single() {
        assert_eq!(merkle_root(&[]), [0u8; 32]);
        assert_eq!(merkle_root(&[[5u8; 32]]), [5u8; 32]);
    }

    #[test]
    fn order_matters() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }

    #[test]
    fn three_leaves_pads_with_zero() {
        let leaves = [[1u8; 32], [2u8; 32], [3u8; 32]];
        let expected = hash_pair(
            &hash_pair(&leaves[0], &leaves[1]),
            &hash_pair(&leaves[2], &[0u8; 32]),
        );
        assert_eq!(merkle_root(&leaves), expected);
    }
}
