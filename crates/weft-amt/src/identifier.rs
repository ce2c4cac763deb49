//! Content identifier parsing and block verification
//!
//! Only the tag combinations that Filecoin state blocks actually use are
//! accepted: CIDv1, dag-cbor or raw codec, blake2b-256 or sha2-256 digest.
//! Anything else is reported as a distinct [`MalformedIdentifier`] error
//! rather than passed through, so an unsupported identifier can never reach
//! the decoder looking like a verified block.
//!
//! [`MalformedIdentifier`]: crate::error::AmtErrorKind::MalformedIdentifier

use blake2::Blake2b;
use blake2::digest::consts::U32;
use cid::Cid;
use sha2::{Digest, Sha256};

use crate::error::{AmtError, Result};

/// DAG-CBOR codec identifier (0x71)
pub const DAG_CBOR: u64 = 0x71;
/// Raw binary codec identifier (0x55)
pub const RAW: u64 = 0x55;
/// blake2b-256 multihash identifier (0xb220)
pub const BLAKE2B_256: u64 = 0xb220;
/// sha2-256 multihash identifier (0x12)
pub const SHA2_256: u64 = 0x12;
/// Digest length for both supported algorithms
pub const DIGEST_LEN: usize = 32;

type Blake2b256 = Blake2b<U32>;

/// Parse a content identifier from its multibase textual form
///
/// Round-trips through the standard multibase/multicodec encoding; no
/// project-specific textual form exists. The parsed identifier is checked
/// against the supported tag set before being returned.
pub fn parse_cid(input: &str) -> Result<Cid> {
    let cid = Cid::try_from(input)
        .map_err(|e| AmtError::malformed_identifier(e.to_string()))?;
    check_cid(&cid)?;
    Ok(cid)
}

/// Parse a content identifier from its binary form
pub fn parse_cid_bytes(input: &[u8]) -> Result<Cid> {
    let cid = Cid::try_from(input)
        .map_err(|e| AmtError::malformed_identifier(e.to_string()))?;
    check_cid(&cid)?;
    Ok(cid)
}

/// Check an identifier against the supported version/codec/multihash set
///
/// Unknown tags are a reported error, never a panic. The digest length is
/// checked against what the multihash tag specifies.
pub fn check_cid(cid: &Cid) -> Result<()> {
    if cid.version() != cid::Version::V1 {
        return Err(AmtError::malformed_identifier(format!(
            "unsupported CID version {:?}",
            cid.version()
        )));
    }

    match cid.codec() {
        DAG_CBOR | RAW => {}
        other => {
            return Err(AmtError::malformed_identifier(format!(
                "unsupported codec 0x{:x}",
                other
            )));
        }
    }

    let hash = cid.hash();
    match hash.code() {
        BLAKE2B_256 | SHA2_256 => {}
        other => {
            return Err(AmtError::malformed_identifier(format!(
                "unsupported multihash 0x{:x}",
                other
            )));
        }
    }

    if hash.digest().len() != DIGEST_LEN {
        return Err(AmtError::malformed_identifier(format!(
            "digest is {} bytes, multihash 0x{:x} specifies {}",
            hash.digest().len(),
            hash.code(),
            DIGEST_LEN
        )));
    }

    Ok(())
}

/// Verify that raw bytes hash to the identifier they were fetched under
///
/// Recomputes the digest named by the identifier's multihash tag over the
/// raw bytes exactly as fetched (never a re-serialized form) and compares
/// for exact equality. Returns false, never an error, on mismatch or on an
/// algorithm this module does not support; the caller decides whether a
/// mismatch is fatal.
pub fn verify_block(cid: &Cid, bytes: &[u8]) -> bool {
    let digest = match cid.hash().code() {
        BLAKE2B_256 => Blake2b256::digest(bytes).to_vec(),
        SHA2_256 => Sha256::digest(bytes).to_vec(),
        _ => return false,
    };
    digest.as_slice() == cid.hash().digest()
}

/// Compute the identifier for a DAG-CBOR block
///
/// Uses blake2b-256, the digest Filecoin chains address state blocks with.
/// Assumes the data is already canonical DAG-CBOR.
pub fn compute_cid(data: &[u8]) -> Result<Cid> {
    let digest = Blake2b256::digest(data);
    let mh = multihash::Multihash::<64>::wrap(BLAKE2B_256, digest.as_slice())
        .map_err(|e| AmtError::malformed_identifier(e.to_string()))?;
    Ok(Cid::new_v1(DAG_CBOR, mh))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Proposals AMT root of the f05 storage market actor, observed live.
    const MARKET_PROPOSALS_ROOT: &str =
        "bafy2bzacebwg6zmvh62eplkwipho46zd5xe2dbeqkitgerc44bbrz6nbmkxn4";
    const MARKET_PROPOSALS_DIGEST: &str =
        "6c6f65953fb447ad5643ceee7b23edc9a18490522662445ce0431cf9a162aede";

    #[test]
    fn parses_mainnet_identifier() {
        let cid = parse_cid(MARKET_PROPOSALS_ROOT).unwrap();
        assert_eq!(cid.version(), cid::Version::V1);
        assert_eq!(cid.codec(), DAG_CBOR);
        assert_eq!(cid.hash().code(), BLAKE2B_256);
        assert_eq!(
            cid.hash().digest(),
            hex::decode(MARKET_PROPOSALS_DIGEST).unwrap().as_slice()
        );
    }

    #[test]
    fn textual_form_round_trips() {
        let cid = parse_cid(MARKET_PROPOSALS_ROOT).unwrap();
        assert_eq!(cid.to_string(), MARKET_PROPOSALS_ROOT);
    }

    #[test]
    fn rejects_cid_v0() {
        let err = parse_cid("QmdfTbBqBPQ7VNxZEYEj14VmRuZBkqFbiwReogJgS1zR1n").unwrap_err();
        assert_eq!(err.kind(), &crate::AmtErrorKind::MalformedIdentifier);
    }

    #[test]
    fn rejects_garbage_input() {
        assert!(parse_cid("not a cid").is_err());
        assert!(parse_cid_bytes(&[0xff, 0xff]).is_err());
    }

    #[test]
    fn rejects_unsupported_codec() {
        let digest = Sha256::digest(b"payload");
        let mh = multihash::Multihash::<64>::wrap(SHA2_256, &digest).unwrap();
        // 0x70 is dag-pb, which this system never fetches
        let cid = Cid::new_v1(0x70, mh);
        assert!(check_cid(&cid).is_err());
    }

    #[test]
    fn rejects_unsupported_multihash() {
        // 0x11 is sha1
        let mh = multihash::Multihash::<64>::wrap(0x11, &[0u8; 20]).unwrap();
        let cid = Cid::new_v1(DAG_CBOR, mh);
        assert!(check_cid(&cid).is_err());
    }

    #[test]
    fn verify_accepts_matching_bytes() {
        let data = b"some dag-cbor block";
        let cid = compute_cid(data).unwrap();
        assert!(verify_block(&cid, data));
    }

    #[test]
    fn verify_rejects_every_single_bit_flip() {
        let data = b"short block".to_vec();
        let cid = compute_cid(&data).unwrap();
        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut mutated = data.clone();
                mutated[byte] ^= 1 << bit;
                assert!(!verify_block(&cid, &mutated), "flip at {}:{}", byte, bit);
            }
        }
    }

    #[test]
    fn verify_supports_sha2_identifiers() {
        let data = b"sha2 addressed block";
        let digest = Sha256::digest(data);
        let mh = multihash::Multihash::<64>::wrap(SHA2_256, &digest).unwrap();
        let cid = Cid::new_v1(DAG_CBOR, mh);
        assert!(verify_block(&cid, data));
        assert!(!verify_block(&cid, b"different bytes"));
    }
}
