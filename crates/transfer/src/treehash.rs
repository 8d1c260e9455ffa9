//! SHA-256 tree hash over 1 MiB leaves.
//!
//! The vault recomputes the same tree over every byte range it receives,
//! so leaf size and the odd-one-out carry rule must match exactly.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::TransferError;

/// Leaf size of the tree: 1 MiB.
pub const LEAF_SIZE: usize = 1024 * 1024;

/// A 32-byte SHA-256 tree hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeHash([u8; 32]);

impl TreeHash {
    /// Wraps raw digest bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form, as sent to and returned by the service.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for TreeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TreeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TreeHash({})", self.to_hex())
    }
}

impl FromStr for TreeHash {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s.trim(), &mut out)
            .map_err(|e| TransferError::InvalidChecksum(format!("{s:?}: {e}")))?;
        Ok(Self(out))
    }
}

/// Hashes a single leaf block (at most [`LEAF_SIZE`] bytes).
pub fn chunk_digest(bytes: &[u8]) -> TreeHash {
    debug_assert!(bytes.len() <= LEAF_SIZE);
    TreeHash(Sha256::digest(bytes).into())
}

/// Tree hash of one part: leaf digests over 1 MiB chunks, folded pairwise.
pub fn part_digest(bytes: &[u8]) -> TreeHash {
    let mut hasher = TreeHasher::new();
    hasher.update(bytes);
    hasher.finish()
}

/// Folds digests pairwise, left to right, until one remains.
///
/// A trailing unpaired digest is carried into the next round unchanged.
/// Returns `None` for empty input.
pub fn fold_pairs(digests: &[TreeHash]) -> Option<TreeHash> {
    let mut level = digests.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [a, b] => hash_pair(a, b),
                [single] => *single,
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
    }
    level.pop()
}

/// Archive-level tree hash: [`fold_pairs`] over per-part roots in part order.
pub fn total_digest(part_digests: &[TreeHash]) -> Option<TreeHash> {
    fold_pairs(part_digests)
}

fn hash_pair(a: &TreeHash, b: &TreeHash) -> TreeHash {
    let mut hasher = Sha256::new();
    hasher.update(a.0);
    hasher.update(b.0);
    TreeHash(hasher.finalize().into())
}

/// Incremental tree hasher.
///
/// Feeding the same bytes in any split yields the same result as
/// [`part_digest`] over their concatenation.
pub struct TreeHasher {
    leaves: Vec<TreeHash>,
    current: Sha256,
    current_len: usize,
}

impl Default for TreeHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeHasher {
    pub fn new() -> Self {
        Self {
            leaves: Vec::new(),
            current: Sha256::new(),
            current_len: 0,
        }
    }

    /// Feeds more bytes.
    pub fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            if self.current_len == LEAF_SIZE {
                self.close_leaf();
            }
            let take = (LEAF_SIZE - self.current_len).min(data.len());
            self.current.update(&data[..take]);
            self.current_len += take;
            data = &data[take..];
        }
    }

    /// Number of bytes fed so far.
    pub fn len(&self) -> u64 {
        self.leaves.len() as u64 * LEAF_SIZE as u64 + self.current_len as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finishes the tree. Empty input hashes as a single empty leaf.
    pub fn finish(mut self) -> TreeHash {
        if self.current_len > 0 || self.leaves.is_empty() {
            self.close_leaf();
        }
        fold_pairs(&self.leaves).unwrap_or_else(|| chunk_digest(&[]))
    }

    fn close_leaf(&mut self) {
        let leaf = std::mem::take(&mut self.current);
        self.leaves.push(TreeHash(leaf.finalize().into()));
        self.current_len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha(data: &[u8]) -> TreeHash {
        TreeHash(Sha256::digest(data).into())
    }

    fn concat_hash(a: TreeHash, b: TreeHash) -> TreeHash {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(a.as_bytes());
        buf.extend_from_slice(b.as_bytes());
        sha(&buf)
    }

    #[test]
    fn part_digest_deterministic() {
        let data = vec![7u8; LEAF_SIZE + 17];
        assert_eq!(part_digest(&data), part_digest(&data));
    }

    #[test]
    fn part_digest_small_is_plain_sha256() {
        assert_eq!(part_digest(b"hello world"), sha(b"hello world"));
        assert_eq!(
            part_digest(b"hello world").to_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn empty_input_is_single_empty_leaf() {
        assert_eq!(part_digest(&[]), sha(&[]));
    }

    #[test]
    fn fold_pairs_singleton_unchanged() {
        let d = sha(b"only");
        assert_eq!(fold_pairs(&[d]), Some(d));
    }

    #[test]
    fn fold_pairs_empty_is_none() {
        assert_eq!(fold_pairs(&[]), None);
    }

    #[test]
    fn fold_pairs_carries_odd_digest() {
        let (a, b, c) = (sha(b"a"), sha(b"b"), sha(b"c"));
        // Round 1: [h(a,b), c]; round 2: h(h(a,b), c).
        let expected = concat_hash(concat_hash(a, b), c);
        assert_eq!(fold_pairs(&[a, b, c]), Some(expected));
    }

    #[test]
    fn fold_pairs_five_leaves() {
        let d: Vec<TreeHash> = (0u8..5).map(|i| sha(&[i])).collect();
        let ab = concat_hash(d[0], d[1]);
        let cd = concat_hash(d[2], d[3]);
        let expected = concat_hash(concat_hash(ab, cd), d[4]);
        assert_eq!(fold_pairs(&d), Some(expected));
    }

    #[test]
    fn part_digest_splits_on_leaf_boundary() {
        let mut data = vec![1u8; LEAF_SIZE];
        data.extend_from_slice(&[2u8; 10]);
        let expected = concat_hash(sha(&data[..LEAF_SIZE]), sha(&data[LEAF_SIZE..]));
        assert_eq!(part_digest(&data), expected);
    }

    #[test]
    fn two_part_total_digest() {
        let part0 = vec![0xAAu8; LEAF_SIZE];
        let part1 = vec![0x55u8; LEAF_SIZE / 2];

        let d0 = part_digest(&part0);
        let d1 = part_digest(&part1);
        assert_eq!(d0, sha(&part0));
        assert_eq!(d1, sha(&part1));

        let total = total_digest(&[d0, d1]).unwrap();
        assert_eq!(total, concat_hash(d0, d1));

        // Same as hashing the archive as one stream.
        let mut whole = part0.clone();
        whole.extend_from_slice(&part1);
        assert_eq!(total, part_digest(&whole));
    }

    #[test]
    fn streaming_matches_one_shot() {
        let data: Vec<u8> = (0..(LEAF_SIZE * 2 + 333)).map(|i| (i % 251) as u8).collect();
        let mut hasher = TreeHasher::new();
        for piece in data.chunks(65_537) {
            hasher.update(piece);
        }
        assert_eq!(hasher.len(), data.len() as u64);
        assert_eq!(hasher.finish(), part_digest(&data));
    }

    #[test]
    fn exact_leaf_multiple_has_no_trailing_empty_leaf() {
        let data = vec![3u8; LEAF_SIZE * 2];
        let expected = concat_hash(sha(&data[..LEAF_SIZE]), sha(&data[LEAF_SIZE..]));
        assert_eq!(part_digest(&data), expected);
    }

    #[test]
    fn hex_roundtrip_and_rejects_garbage() {
        let d = sha(b"x");
        let parsed: TreeHash = d.to_hex().parse().unwrap();
        assert_eq!(parsed, d);
        assert!("not-hex".parse::<TreeHash>().is_err());
        assert!("abcd".parse::<TreeHash>().is_err());
    }
}
