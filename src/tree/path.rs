//! Node paths
//!
//! A path is the sequence of branch choices from the root:
//! 0 = below the threshold, 1 = at or above it.
//! Root = empty path. Paths double as stable node identifiers.

use std::fmt;
use std::str::FromStr;

use bitvec::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Which side of a split a point falls on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Branch {
    /// `value < threshold` (bit 0)
    Below,

    /// `value >= threshold` (bit 1)
    Above,
}

impl Branch {
    /// Route a value against a threshold
    #[inline]
    pub fn of(value: f64, threshold: f64) -> Self {
        if value < threshold {
            Branch::Below
        } else {
            Branch::Above
        }
    }

    /// Bit recorded in the path
    #[inline]
    pub fn bit(self) -> bool {
        matches!(self, Branch::Above)
    }
}

/// Bit string identifying a node's position in the tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NodePath {
    bits: BitVec,
}

impl NodePath {
    /// Empty path of the root node
    pub fn root() -> Self {
        Self { bits: BitVec::new() }
    }

    /// Path of the child reached through `branch`
    pub fn child(&self, branch: Branch) -> Self {
        let mut bits = self.bits.clone();
        bits.push(branch.bit());
        Self { bits }
    }

    /// Build a path from explicit branch bits (most significant first)
    pub fn from_bits(bits: &[bool]) -> Self {
        Self {
            bits: bits.iter().copied().collect(),
        }
    }

    /// Depth of the node (number of branch choices)
    #[inline]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// True for the root path
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Branch taken at `level`
    pub fn branch(&self, level: usize) -> Option<Branch> {
        self.bits
            .get(level)
            .map(|bit| if *bit { Branch::Above } else { Branch::Below })
    }

    /// Branch bits from the root down
    pub fn bits(&self) -> impl Iterator<Item = bool> + '_ {
        self.bits.iter().by_vals()
    }

    /// Dense level-order index of this node, see [`bit_to_index`].
    ///
    /// `None` once the path is too long for the index to fit in a `usize`.
    pub fn index(&self) -> Option<usize> {
        (self.len() <= MAX_INDEXED_LEN).then(|| bit_to_index(self))
    }
}

/// Longest path whose level-order index fits in a `usize`
pub const MAX_INDEXED_LEN: usize = usize::BITS as usize - 1;

/// Map a path to its level-order (heap) index.
///
/// The path bits are read most significant first behind an implicit leading
/// 1, so the root maps to 0, `[0]` to 1, `[1]` to 2, `[0, 0]` to 3 and so on.
/// Paths of different lengths never collide, and every path of length
/// `<= depth` lands in `0..2^(depth + 1) - 1`.
///
/// ```
/// use kdcode::{bit_to_index, NodePath};
/// assert_eq!(bit_to_index(&NodePath::root()), 0);
/// assert_eq!(bit_to_index(&NodePath::from_bits(&[false])), 1);
/// assert_eq!(bit_to_index(&NodePath::from_bits(&[true])), 2);
/// assert_eq!(bit_to_index(&NodePath::from_bits(&[true, true])), 6);
/// ```
///
/// # Panics
///
/// If the path is longer than [`MAX_INDEXED_LEN`]; use [`NodePath::index`]
/// for a checked lookup.
pub fn bit_to_index(path: &NodePath) -> usize {
    assert!(
        path.len() <= MAX_INDEXED_LEN,
        "path of {} bits has no level-order index",
        path.len()
    );
    let code = path
        .bits()
        .fold(1usize, |acc, bit| (acc << 1) | usize::from(bit));
    code - 1
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bit in self.bits() {
            f.write_str(if bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

/// Error parsing a path string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid path character '{ch}' at position {position}")]
pub struct ParsePathError {
    /// Offending character
    pub ch: char,
    /// Offset in the input
    pub position: usize,
}

impl FromStr for NodePath {
    type Err = ParsePathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bits = BitVec::with_capacity(s.len());
        for (position, ch) in s.chars().enumerate() {
            match ch {
                '0' => bits.push(false),
                '1' => bits.push(true),
                _ => return Err(ParsePathError { ch, position }),
            }
        }
        Ok(Self { bits })
    }
}

impl Serialize for NodePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_appends_branch() {
        let root = NodePath::root();
        let below = root.child(Branch::Below);
        let above_below = root.child(Branch::Above).child(Branch::Below);

        assert!(root.is_empty());
        assert_eq!(below.to_string(), "0");
        assert_eq!(above_below.to_string(), "10");
        assert_eq!(above_below.branch(0), Some(Branch::Above));
        assert_eq!(above_below.branch(1), Some(Branch::Below));
        assert_eq!(above_below.branch(2), None);
    }

    #[test]
    fn test_threshold_routing() {
        assert_eq!(Branch::of(1.0, 2.0), Branch::Below);
        assert_eq!(Branch::of(2.0, 2.0), Branch::Above);
        assert_eq!(Branch::of(3.0, 2.0), Branch::Above);
    }

    #[test]
    fn test_parse_roundtrip() {
        let path: NodePath = "0110".parse().unwrap();
        assert_eq!(path.len(), 4);
        assert_eq!(path.to_string(), "0110");
        assert_eq!("".parse::<NodePath>().unwrap(), NodePath::root());

        let err = "01x".parse::<NodePath>().unwrap_err();
        assert_eq!(err.ch, 'x');
        assert_eq!(err.position, 2);
    }

    #[test]
    fn test_level_order_index() {
        let expected = [
            ("", 0),
            ("0", 1),
            ("1", 2),
            ("00", 3),
            ("01", 4),
            ("10", 5),
            ("11", 6),
        ];
        for (raw, index) in expected {
            let path: NodePath = raw.parse().unwrap();
            assert_eq!(bit_to_index(&path), index, "path {:?}", raw);
            assert_eq!(path.index(), Some(index));
        }
    }

    #[test]
    fn test_index_bounds() {
        let longest = NodePath::from_bits(&[true; MAX_INDEXED_LEN]);
        assert_eq!(longest.index(), Some(usize::MAX - 1));

        let zeros = NodePath::from_bits(&[false; MAX_INDEXED_LEN]);
        assert_eq!(zeros.index(), Some((1usize << MAX_INDEXED_LEN) - 1));

        let too_long = NodePath::from_bits(&[false; MAX_INDEXED_LEN + 1]);
        assert_eq!(too_long.index(), None);
    }

    #[test]
    #[should_panic(expected = "has no level-order index")]
    fn test_unchecked_index_rejects_long_paths() {
        bit_to_index(&NodePath::from_bits(&[true; MAX_INDEXED_LEN + 1]));
    }
}
