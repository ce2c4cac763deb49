//! AMT wire-shape interpretation
//!
//! The decoder produces a generic [`Value`] tree; this module checks that
//! tree against the Filecoin AMTv3 layout and rejects every shape
//! violation as [`MalformedNode`] instead of reaching into fields that may
//! not exist.
//!
//! Wire layout, fixed by the published trie format:
//!
//! - root: `[bit_width, height, count, node]`
//! - node: `[bmap, links, values]` where `bmap` is a byte string of
//!   `ceil(fan_out / 8)` bytes, `links` is a list of child CIDs (internal
//!   nodes only) and `values` is a list of inline payloads (leaves only).
//!
//! Bit `i` of the bitmap lives at `bmap[i / 8] & (1 << (i % 8))`. A set
//! bit's payload is found by its popcount rank, not by slot number.
//!
//! [`MalformedNode`]: crate::error::AmtErrorKind::MalformedNode

use bytes::Bytes;
use cid::Cid;

use crate::cbor::Value;
use crate::error::{NodeError, Result};

/// Smallest accepted bit width (fan-out 2)
pub const MIN_BIT_WIDTH: u32 = 1;
/// Largest accepted bit width (fan-out 256)
pub const MAX_BIT_WIDTH: u32 = 8;

/// One decoded trie node: bitmap plus rank-indexed payloads
///
/// Constructed fresh from a decoded block on every traversal step and
/// discarded afterwards; never mutated.
#[derive(Debug, Clone)]
pub struct AmtNode {
    bmap: Bytes,
    links: Vec<Cid>,
    values: Vec<Value>,
}

/// The root wrapper: traversal parameters plus the top node
#[derive(Debug, Clone)]
pub struct AmtRoot {
    /// Bits consumed from the key per level; fan-out is `1 << bit_width`
    pub bit_width: u32,
    /// Height of the top node; 0 means the root is itself a leaf
    pub height: u32,
    /// Elements at and below the root
    pub count: u64,
    /// The top node
    pub node: AmtNode,
}

impl AmtRoot {
    /// Interpret a decoded block as an AMT root
    pub fn from_value(value: &Value) -> Result<Self> {
        let fields = value.as_list().ok_or(NodeError::NotAList("root"))?;
        if fields.len() != 4 {
            return Err(NodeError::WrongArity {
                what: "root",
                expected: 4,
                got: fields.len(),
            }
            .into());
        }

        let bit_width = fields[0].as_u64().ok_or(NodeError::FieldType {
            field: "bit_width",
            expected: "unsigned integer",
        })?;
        if !(u64::from(MIN_BIT_WIDTH)..=u64::from(MAX_BIT_WIDTH)).contains(&bit_width) {
            return Err(NodeError::BitWidthOutOfRange(bit_width).into());
        }
        let bit_width = bit_width as u32;

        let height = fields[1].as_u64().ok_or(NodeError::FieldType {
            field: "height",
            expected: "unsigned integer",
        })?;
        // Keys are u64, so a deeper tree could never be addressed.
        if height
            .checked_add(1)
            .map(|levels| levels.saturating_mul(u64::from(bit_width)) > 64)
            .unwrap_or(true)
        {
            return Err(NodeError::HeightOverflow { height, bit_width }.into());
        }
        let height = height as u32;

        let count = fields[2].as_u64().ok_or(NodeError::FieldType {
            field: "count",
            expected: "unsigned integer",
        })?;

        let node = AmtNode::from_value(&fields[3], bit_width, height)?;

        Ok(Self {
            bit_width,
            height,
            count,
            node,
        })
    }

    /// Slots per node
    pub fn fan_out(&self) -> u32 {
        1 << self.bit_width
    }

    /// Number of keys addressable at the declared height
    ///
    /// `None` means the tree spans the full u64 key space, so every key is
    /// in range.
    pub fn capacity(&self) -> Option<u64> {
        1u64.checked_shl(self.bit_width * (self.height + 1))
    }
}

impl AmtNode {
    /// Interpret a decoded block as a node at the given height
    ///
    /// Child blocks carry a bare node (no root wrapper); the expected
    /// height comes from the parent, stepped down by one.
    pub fn from_value(value: &Value, bit_width: u32, height: u32) -> Result<Self> {
        let fields = value.as_list().ok_or(NodeError::NotAList("node"))?;
        if fields.len() != 3 {
            return Err(NodeError::WrongArity {
                what: "node",
                expected: 3,
                got: fields.len(),
            }
            .into());
        }

        let fan_out = 1u32 << bit_width;
        let bmap = fields[0]
            .as_bytes()
            .ok_or(NodeError::FieldType {
                field: "bmap",
                expected: "byte string",
            })?
            .clone();

        let expected_len = (fan_out as usize).div_ceil(8);
        if bmap.len() != expected_len {
            return Err(NodeError::BitmapLength {
                got: bmap.len(),
                expected: expected_len,
                fan_out,
            }
            .into());
        }
        // Fan-outs below 8 leave padding bits in the last byte; they must
        // be clear or two encodings of the same node would both verify.
        if fan_out % 8 != 0 && bmap[expected_len - 1] >> (fan_out % 8) != 0 {
            return Err(NodeError::PaddingBitsSet { fan_out }.into());
        }

        let links = fields[1]
            .as_list()
            .ok_or(NodeError::FieldType {
                field: "links",
                expected: "list of links",
            })?
            .iter()
            .map(|item| {
                item.as_link().copied().ok_or(NodeError::FieldType {
                    field: "links",
                    expected: "list of links",
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let values = fields[2]
            .as_list()
            .ok_or(NodeError::FieldType {
                field: "values",
                expected: "list",
            })?
            .to_vec();

        let bits = bmap.iter().map(|b| b.count_ones() as usize).sum::<usize>();
        if height == 0 {
            if !links.is_empty() {
                return Err(NodeError::LeafWithLinks(links.len()).into());
            }
            if bits != values.len() {
                return Err(NodeError::PayloadMismatch {
                    bits,
                    payloads: values.len(),
                }
                .into());
            }
        } else {
            if !values.is_empty() {
                return Err(NodeError::InnerWithValues {
                    height,
                    values: values.len(),
                }
                .into());
            }
            if bits != links.len() {
                return Err(NodeError::PayloadMismatch {
                    bits,
                    payloads: links.len(),
                }
                .into());
            }
        }

        Ok(Self { bmap, links, values })
    }

    /// Whether the given slot is populated
    pub fn bit(&self, slot: u32) -> bool {
        self.bmap[(slot / 8) as usize] & (1 << (slot % 8)) != 0
    }

    /// Payload index for a populated slot: count of set bits below it
    pub fn rank(&self, slot: u32) -> usize {
        let full_bytes = (slot / 8) as usize;
        let whole = self.bmap[..full_bytes]
            .iter()
            .map(|b| b.count_ones() as usize)
            .sum::<usize>();
        let partial = (self.bmap[full_bytes] & ((1u16 << (slot % 8)) - 1) as u8).count_ones();
        whole + partial as usize
    }

    /// Inline value for a populated slot (leaf nodes)
    ///
    /// Construction guarantees rank is within the payload sequence.
    pub fn value_for_slot(&self, slot: u32) -> &Value {
        &self.values[self.rank(slot)]
    }

    /// Child link for a populated slot (internal nodes)
    pub fn link_for_slot(&self, slot: u32) -> &Cid {
        &self.links[self.rank(slot)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbor;

    fn leaf_value(bmap: &[u8], values: Vec<&str>) -> Value {
        Value::List(vec![
            Value::Bytes(Bytes::copy_from_slice(bmap)),
            Value::List(vec![]),
            Value::List(values.into_iter().map(|s| Value::String(s.into())).collect()),
        ])
    }

    #[test]
    fn parses_a_leaf_root() {
        let root = Value::List(vec![
            Value::Integer(3),
            Value::Integer(0),
            Value::Integer(2),
            leaf_value(&[0b0000_0101], vec!["x", "y"]),
        ]);
        let root = AmtRoot::from_value(&root).unwrap();
        assert_eq!(root.fan_out(), 8);
        assert_eq!(root.capacity(), Some(8));
        assert!(root.node.bit(0));
        assert!(!root.node.bit(1));
        assert!(root.node.bit(2));
        assert_eq!(root.node.rank(2), 1);
        assert_eq!(root.node.value_for_slot(2), &Value::String("y".into()));
    }

    #[test]
    fn rank_spans_bitmap_bytes() {
        // bit_width 5: 32 slots over 4 bytes, like the live market AMT
        let node = Value::List(vec![
            Value::Bytes(Bytes::from_static(&[0xff, 0x01, 0x00, 0x80])),
            Value::List(vec![]),
            Value::List((0..10).map(Value::Integer).collect()),
        ]);
        let node = AmtNode::from_value(&node, 5, 0).unwrap();
        assert_eq!(node.rank(8), 8);
        assert_eq!(node.rank(31), 9);
        assert_eq!(node.value_for_slot(31), &Value::Integer(9));
    }

    #[test]
    fn rejects_wrong_arity() {
        let bad = Value::List(vec![Value::Integer(3), Value::Integer(0)]);
        assert!(AmtRoot::from_value(&bad).is_err());

        let bad_node = Value::List(vec![Value::Bytes(Bytes::from_static(&[0]))]);
        assert!(AmtNode::from_value(&bad_node, 3, 0).is_err());
    }

    #[test]
    fn rejects_bitmap_payload_mismatch() {
        let root = Value::List(vec![
            Value::Integer(3),
            Value::Integer(0),
            Value::Integer(2),
            leaf_value(&[0b0000_0111], vec!["x", "y"]),
        ]);
        assert!(AmtRoot::from_value(&root).is_err());
    }

    #[test]
    fn rejects_leaf_with_links() {
        let cid = crate::identifier::compute_cid(b"child").unwrap();
        let node = Value::List(vec![
            Value::Bytes(Bytes::from_static(&[0b0000_0001])),
            Value::List(vec![Value::Link(cid)]),
            Value::List(vec![Value::String("x".into())]),
        ]);
        assert!(AmtNode::from_value(&node, 3, 0).is_err());
    }

    #[test]
    fn rejects_inner_node_with_values() {
        let node = Value::List(vec![
            Value::Bytes(Bytes::from_static(&[0b0000_0001])),
            Value::List(vec![]),
            Value::List(vec![Value::String("x".into())]),
        ]);
        assert!(AmtNode::from_value(&node, 3, 1).is_err());
    }

    #[test]
    fn rejects_bad_bitmap_length_and_padding() {
        let short = Value::List(vec![
            Value::Bytes(Bytes::from_static(&[])),
            Value::List(vec![]),
            Value::List(vec![]),
        ]);
        assert!(AmtNode::from_value(&short, 3, 0).is_err());

        // bit_width 1: only bits 0 and 1 may be set
        let padded = Value::List(vec![
            Value::Bytes(Bytes::from_static(&[0b0000_0100])),
            Value::List(vec![]),
            Value::List(vec![Value::Null]),
        ]);
        assert!(AmtNode::from_value(&padded, 1, 0).is_err());
    }

    #[test]
    fn rejects_bad_root_parameters() {
        let mk = |bit_width: i128, height: i128| {
            Value::List(vec![
                Value::Integer(bit_width),
                Value::Integer(height),
                Value::Integer(0),
                leaf_value(&[0x00], vec![]),
            ])
        };
        assert!(AmtRoot::from_value(&mk(0, 0)).is_err());
        assert!(AmtRoot::from_value(&mk(9, 0)).is_err());
        // 3 bits per level * 22 levels > 64-bit key space
        assert!(AmtRoot::from_value(&mk(3, 21)).is_err());
        assert!(AmtRoot::from_value(&mk(3, 20)).is_ok());
    }

    #[test]
    fn matches_bytes_from_the_ecosystem_encoder() {
        let encoded = serde_ipld_dagcbor::to_vec(&(
            3u64,
            0u64,
            1u64,
            (
                serde_bytes::ByteBuf::from(vec![0b0000_0010]),
                Vec::<cid::Cid>::new(),
                vec!["only".to_string()],
            ),
        ))
        .unwrap();
        let root = AmtRoot::from_value(&cbor::decode(&encoded).unwrap()).unwrap();
        assert_eq!(root.count, 1);
        assert_eq!(root.node.value_for_slot(1), &Value::String("only".into()));
    }
}
