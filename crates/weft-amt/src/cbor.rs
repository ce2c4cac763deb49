//! Strict decoder for canonical DAG-CBOR
//!
//! Integrity verification hashes raw bytes, so two encodings of the same
//! logical tree must never both decode. This decoder therefore rejects
//! everything the canonical form forbids instead of tolerating it:
//! non-minimal heads, indefinite lengths, unsorted or duplicate map keys,
//! tags other than the CID link tag, floats and exotic simple values,
//! truncated input and trailing bytes. Lenience at any of these points
//! would reopen the hole that CID verification closes.
//!
//! The decoded form is a closed [`Value`] tree; interpretation of that tree
//! as an AMT node lives in [`crate::amt`], not here.

use bytes::Bytes;
use cid::Cid;

use crate::error::{DecodeError, Result};

/// CBOR tag reserved for CID links in DAG-CBOR
pub const LINK_TAG: u64 = 42;

/// Maximum nesting depth accepted before a block is rejected
pub const MAX_DEPTH: usize = 128;

/// A decoded DAG-CBOR value
///
/// Closed set of variants; anything the wire can carry that is not listed
/// here fails decoding rather than mapping onto a lossy approximation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Unsigned or negative integer (the negative range exceeds i64)
    Integer(i128),
    /// Byte string
    Bytes(Bytes),
    /// Text string
    String(String),
    /// Ordered sequence
    List(Vec<Value>),
    /// String-keyed map, keys unique and in canonical order
    Map(Vec<(String, Value)>),
    /// CID link (tag 42)
    Link(Cid),
    /// Boolean
    Bool(bool),
    /// Null (the wire's undefined folds into this)
    Null,
}

impl Value {
    /// View as a list, if this is one
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// View as a u64, if this is a non-negative integer in range
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Integer(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    /// View as a byte string, if this is one
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// View as a link, if this is one
    pub fn as_link(&self) -> Option<&Cid> {
        match self {
            Value::Link(cid) => Some(cid),
            _ => None,
        }
    }
}

/// Decode a single canonical DAG-CBOR item occupying the whole input
///
/// Fails, never partially returns, on truncated input, trailing bytes,
/// non-canonical encodings, and unsupported constructs.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    let mut reader = Reader { input: bytes, pos: 0 };
    let value = reader.value(0)?;
    let remaining = reader.remaining();
    if remaining != 0 {
        return Err(DecodeError::TrailingBytes { remaining }.into());
    }
    Ok(value)
}

struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }

    fn take(&mut self, n: usize) -> std::result::Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::Truncated {
                needed: n - self.remaining(),
            });
        }
        let slice = &self.input[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn byte(&mut self) -> std::result::Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    /// Read a head, enforcing minimal-width arguments and definite lengths
    fn head(&mut self) -> std::result::Result<(u8, u64), DecodeError> {
        let initial = self.byte()?;
        let major = initial >> 5;
        let info = initial & 0x1f;

        let value = match info {
            0..=23 => u64::from(info),
            24 => {
                let v = u64::from(self.byte()?);
                if v < 24 {
                    return Err(DecodeError::NonMinimal { value: v, width: 1 });
                }
                v
            }
            25 => {
                let b = self.take(2)?;
                let v = u64::from(u16::from_be_bytes([b[0], b[1]]));
                if v <= 0xff {
                    return Err(DecodeError::NonMinimal { value: v, width: 2 });
                }
                v
            }
            26 => {
                let b = self.take(4)?;
                let v = u64::from(u32::from_be_bytes([b[0], b[1], b[2], b[3]]));
                if v <= 0xffff {
                    return Err(DecodeError::NonMinimal { value: v, width: 4 });
                }
                v
            }
            27 => {
                let b = self.take(8)?;
                let v = u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
                if v <= 0xffff_ffff {
                    return Err(DecodeError::NonMinimal { value: v, width: 8 });
                }
                v
            }
            28..=30 => return Err(DecodeError::ReservedInfo(info)),
            _ => return Err(DecodeError::IndefiniteLength),
        };

        Ok((major, value))
    }

    /// Read the payload of a byte or text string head
    fn payload(&mut self, len: u64) -> std::result::Result<&'a [u8], DecodeError> {
        if len > self.remaining() as u64 {
            return Err(DecodeError::LengthOverflow {
                len,
                remaining: self.remaining(),
            });
        }
        self.take(len as usize)
    }

    fn value(&mut self, depth: usize) -> Result<Value> {
        if depth >= MAX_DEPTH {
            return Err(DecodeError::DepthLimit(MAX_DEPTH).into());
        }

        let (major, arg) = self.head()?;
        match major {
            0 => Ok(Value::Integer(i128::from(arg))),
            1 => Ok(Value::Integer(-1 - i128::from(arg))),
            2 => {
                let raw = self.payload(arg)?;
                Ok(Value::Bytes(Bytes::copy_from_slice(raw)))
            }
            3 => {
                let raw = self.payload(arg)?;
                let text = std::str::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8)?;
                Ok(Value::String(text.to_owned()))
            }
            4 => {
                // Each element occupies at least one byte, so the declared
                // count can be bounded against the input before allocating.
                if arg > self.remaining() as u64 {
                    return Err(DecodeError::LengthOverflow {
                        len: arg,
                        remaining: self.remaining(),
                    }
                    .into());
                }
                let mut items = Vec::with_capacity(arg as usize);
                for _ in 0..arg {
                    items.push(self.value(depth + 1)?);
                }
                Ok(Value::List(items))
            }
            5 => {
                if arg > (self.remaining() / 2) as u64 {
                    return Err(DecodeError::LengthOverflow {
                        len: arg,
                        remaining: self.remaining(),
                    }
                    .into());
                }
                let mut entries: Vec<(String, Value)> = Vec::with_capacity(arg as usize);
                for _ in 0..arg {
                    let key = self.map_key()?;
                    if let Some((prev, _)) = entries.last() {
                        match canonical_key_order(prev, &key) {
                            std::cmp::Ordering::Less => {}
                            std::cmp::Ordering::Equal => {
                                return Err(DecodeError::DuplicateKey(key).into());
                            }
                            std::cmp::Ordering::Greater => {
                                return Err(DecodeError::KeyOrder {
                                    prev: prev.clone(),
                                    key,
                                }
                                .into());
                            }
                        }
                    }
                    let value = self.value(depth + 1)?;
                    entries.push((key, value));
                }
                Ok(Value::Map(entries))
            }
            6 => {
                if arg != LINK_TAG {
                    return Err(DecodeError::UnexpectedTag(arg).into());
                }
                self.link()
            }
            _ => {
                // Major 7: arg already passed head minimality, so only the
                // simple values listed by the canonical form are reachable.
                match arg {
                    20 => Ok(Value::Bool(false)),
                    21 => Ok(Value::Bool(true)),
                    22 | 23 => Ok(Value::Null),
                    other => Err(DecodeError::UnsupportedSimple(other).into()),
                }
            }
        }
    }

    fn map_key(&mut self) -> Result<String> {
        let (major, len) = self.head()?;
        if major != 3 {
            return Err(DecodeError::NonStringKey.into());
        }
        let raw = self.payload(len)?;
        let text = std::str::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8)?;
        Ok(text.to_owned())
    }

    fn link(&mut self) -> Result<Value> {
        let (major, len) = self.head()?;
        if major != 2 {
            return Err(DecodeError::InvalidLink("tag 42 content is not a byte string".into()).into());
        }
        let raw = self.payload(len)?;
        // DAG-CBOR prefixes link bytes with the identity multibase byte.
        match raw.split_first() {
            Some((0x00, cid_bytes)) => {
                let cid = Cid::try_from(cid_bytes)
                    .map_err(|e| DecodeError::InvalidLink(e.to_string()))?;
                Ok(Value::Link(cid))
            }
            Some((prefix, _)) => Err(DecodeError::InvalidLink(format!(
                "link missing identity prefix (got 0x{:02x})",
                prefix
            ))
            .into()),
            None => Err(DecodeError::InvalidLink("empty link".into()).into()),
        }
    }
}

/// Canonical DAG-CBOR key ordering: shorter keys first, then bytewise
fn canonical_key_order(a: &str, b: &str) -> std::cmp::Ordering {
    a.len().cmp(&b.len()).then_with(|| a.as_bytes().cmp(b.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AmtErrorKind;

    fn decode_err(bytes: &[u8]) {
        let err = decode(bytes).unwrap_err();
        assert_eq!(err.kind(), &AmtErrorKind::Decode, "input {:02x?}", bytes);
    }

    #[test]
    fn decodes_small_integers() {
        assert_eq!(decode(&[0x00]).unwrap(), Value::Integer(0));
        assert_eq!(decode(&[0x17]).unwrap(), Value::Integer(23));
        assert_eq!(decode(&[0x18, 0x18]).unwrap(), Value::Integer(24));
        assert_eq!(decode(&[0x20]).unwrap(), Value::Integer(-1));
    }

    #[test]
    fn decodes_u64_max() {
        let mut input = vec![0x1b];
        input.extend_from_slice(&u64::MAX.to_be_bytes());
        assert_eq!(
            decode(&input).unwrap(),
            Value::Integer(i128::from(u64::MAX))
        );
    }

    #[test]
    fn rejects_non_minimal_integers() {
        // 16 has a canonical single-byte form
        decode_err(&[0x18, 0x10]);
        // 32 fits in the one-byte argument
        decode_err(&[0x19, 0x00, 0x20]);
        // 70000 fits in four bytes, not eight
        decode_err(&[0x1b, 0, 0, 0, 0, 0, 0x01, 0x11, 0x70]);
        // non-minimal byte string length
        decode_err(&[0x58, 0x02, 0xaa, 0xbb]);
    }

    #[test]
    fn rejects_indefinite_lengths() {
        decode_err(&[0x5f, 0x41, 0xaa, 0xff]); // bytes
        decode_err(&[0x7f, 0x61, 0x61, 0xff]); // text
        decode_err(&[0x9f, 0x01, 0xff]); // array
        decode_err(&[0xbf, 0x61, 0x61, 0x01, 0xff]); // map
    }

    #[test]
    fn rejects_truncation_and_trailing_bytes() {
        decode_err(&[0x19, 0x01]); // head cut short
        decode_err(&[0x43, 0xaa, 0xbb]); // byte string cut short
        decode_err(&[0x82, 0x01]); // array missing an element
        decode_err(&[0x01, 0x01]); // trailing byte
        decode_err(&[]); // empty input
    }

    #[test]
    fn rejects_floats_and_odd_simples() {
        decode_err(&[0xfb, 0x3f, 0xf0, 0, 0, 0, 0, 0, 0]); // 1.0f64
        decode_err(&[0xf9, 0x3c, 0x00]); // half float
        decode_err(&[0xf8, 0x20]); // simple(32)
        assert_eq!(decode(&[0xf4]).unwrap(), Value::Bool(false));
        assert_eq!(decode(&[0xf5]).unwrap(), Value::Bool(true));
        assert_eq!(decode(&[0xf6]).unwrap(), Value::Null);
        assert_eq!(decode(&[0xf7]).unwrap(), Value::Null);
    }

    #[test]
    fn enforces_map_key_rules() {
        // {"b": 1, "a": 2} — bytewise order violated
        decode_err(&[0xa2, 0x61, 0x62, 0x01, 0x61, 0x61, 0x02]);
        // {"aa": 1, "b": 2} — longer key first violates length-first order
        decode_err(&[0xa2, 0x62, 0x61, 0x61, 0x01, 0x61, 0x62, 0x02]);
        // {"a": 1, "a": 2}
        decode_err(&[0xa2, 0x61, 0x61, 0x01, 0x61, 0x61, 0x02]);
        // {1: 2} — integer key
        decode_err(&[0xa1, 0x01, 0x02]);

        let ok = decode(&[0xa2, 0x61, 0x62, 0x01, 0x62, 0x61, 0x61, 0x02]).unwrap();
        assert_eq!(
            ok,
            Value::Map(vec![
                ("b".into(), Value::Integer(1)),
                ("aa".into(), Value::Integer(2)),
            ])
        );
    }

    #[test]
    fn rejects_foreign_tags() {
        // tag 0 (datetime) around a text string
        decode_err(&[0xc0, 0x61, 0x61]);
        // tag 42 around an integer
        decode_err(&[0xd8, 0x2a, 0x01]);
        // tag 42 byte string without the identity prefix
        decode_err(&[0xd8, 0x2a, 0x42, 0x01, 0x02]);
    }

    #[test]
    fn decodes_links_encoded_by_the_ecosystem_encoder() {
        let cid = crate::identifier::compute_cid(b"linked block").unwrap();
        let encoded = serde_ipld_dagcbor::to_vec(&cid).unwrap();
        assert_eq!(decode(&encoded).unwrap(), Value::Link(cid));
    }

    #[test]
    fn agrees_with_the_ecosystem_encoder_on_composites() {
        let encoded = serde_ipld_dagcbor::to_vec(&(
            3u64,
            serde_bytes::ByteBuf::from(vec![0x09]),
            vec!["A".to_string(), "B".to_string()],
        ))
        .unwrap();
        let value = decode(&encoded).unwrap();
        assert_eq!(
            value,
            Value::List(vec![
                Value::Integer(3),
                Value::Bytes(Bytes::from_static(&[0x09])),
                Value::List(vec![
                    Value::String("A".into()),
                    Value::String("B".into())
                ]),
            ])
        );
    }

    #[test]
    fn decoding_is_idempotent() {
        let encoded = serde_ipld_dagcbor::to_vec(&(1u64, vec![2u64, 3u64])).unwrap();
        assert_eq!(decode(&encoded).unwrap(), decode(&encoded).unwrap());
    }

    #[test]
    fn rejects_runaway_nesting() {
        let mut input = vec![0x81u8; MAX_DEPTH + 1];
        input.push(0x01);
        decode_err(&input);
    }

    #[test]
    fn rejects_absurd_declared_lengths() {
        // array claiming u64::MAX elements in a 9-byte input
        let mut input = vec![0x9b];
        input.extend_from_slice(&u64::MAX.to_be_bytes());
        decode_err(&input);
    }
}
