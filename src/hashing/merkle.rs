//! Merkle Tree Engine
//!
//! Builds a deterministic root hash over a batch of leaves so a whole batch
//! of ballot hashes can be anchored with a single external timestamp.

use sha2::{Digest, Sha256};
use serde::Serialize;

/// Digest algorithm used by this deployment. Leaf hashing, internal-node
/// hashing and the root re-hash all share it; changing it changes every
/// anchored root, so it is fixed here rather than configured.
pub type DeploymentDigest = Sha256;

/// Digest of a single buffer.
pub fn digest_once<D: Digest>(data: &[u8]) -> Vec<u8> {
    let mut hasher = D::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Digest of `left ‖ right` with no separator. A fresh hasher per call, so
/// concurrent computations never share scratch state.
pub fn content_hash<D: Digest>(left: &[u8], right: &[u8]) -> Vec<u8> {
    let mut hasher = D::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().to_vec()
}

/// Leaf hash of one item over its canonical JSON serialization. Field order
/// follows the struct declaration, so equal logical content hashes equally.
pub fn leaf_hash<D: Digest, T: Serialize>(item: &T) -> Result<Vec<u8>, serde_json::Error> {
    let canonical = serde_json::to_vec(item)?;
    Ok(digest_once::<D>(&canonical))
}

/// Reduce prepared leaves to a Merkle root. `None` for an empty batch; a
/// single leaf is the root itself with no pairing step. Odd-sized levels
/// pair the last node with itself.
pub fn merkle_root<D: Digest>(leaves: &[Vec<u8>]) -> Option<Vec<u8>> {
    if leaves.is_empty() {
        return None;
    }

    let mut level: Vec<Vec<u8>> = leaves.to_vec();
    while level.len() > 1 {
        let mut next_level = Vec::with_capacity((level.len() + 1) / 2);
        for pair in level.chunks(2) {
            let parent = match pair {
                [left, right] => content_hash::<D>(left, right),
                [last] => content_hash::<D>(last, last),
                _ => unreachable!("chunks(2) yields one or two nodes"),
            };
            next_level.push(parent);
        }
        level = next_level;
    }

    level.pop()
}

/// Merkle root over arbitrary items: leaf-hash each, then reduce.
pub fn calculate_merkle_root<D: Digest, T: Serialize>(
    items: &[T],
) -> Result<Option<Vec<u8>>, serde_json::Error> {
    let leaves = items
        .iter()
        .map(leaf_hash::<D, T>)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(merkle_root::<D>(&leaves))
}
