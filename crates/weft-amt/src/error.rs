//! Error types for AMT retrieval and traversal

use std::error::Error;
use std::fmt;

/// Boxed error type for error sources
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Result type alias for AMT operations
pub type Result<T> = std::result::Result<T, AmtError>;

/// AMT operation error with rich diagnostics
///
/// An absent key is not an error: lookups return `Ok(None)` for keys that
/// are in range but unpopulated.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub struct AmtError {
    kind: AmtErrorKind,
    #[source]
    source: Option<BoxError>,
    #[help]
    help: Option<String>,
    context: Option<String>,
}

/// Error categories for AMT operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmtErrorKind {
    /// Content identifier could not be parsed, or uses an unsupported tag
    MalformedIdentifier,
    /// Fetched bytes do not hash to the identifier they were requested under
    IntegrityFailure,
    /// Payload is not canonical DAG-CBOR
    Decode,
    /// Payload decoded but does not match the AMT node shape
    MalformedNode,
    /// Key exceeds the capacity the tree's height can address
    OutOfRange,
    /// Block source has no block for the identifier
    NotFound,
    /// Block source transport failed
    Transport,
}

impl AmtError {
    /// Create a new error with the given kind and optional source
    pub fn new(kind: AmtErrorKind, source: Option<BoxError>) -> Self {
        Self {
            kind,
            source,
            help: None,
            context: None,
        }
    }

    /// Add a help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Add context information to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> &AmtErrorKind {
        &self.kind
    }

    // Constructors for different error kinds

    /// Create a malformed identifier error
    pub fn malformed_identifier(msg: impl Into<String>) -> Self {
        Self::new(AmtErrorKind::MalformedIdentifier, Some(msg.into().into()))
            .with_help("supported: CIDv1, dag-cbor/raw codec, blake2b-256/sha2-256 digest")
    }

    /// Create an integrity failure error
    ///
    /// Always fatal to the traversal that observed it.
    pub fn integrity_failure(cid: impl fmt::Display) -> Self {
        Self::new(AmtErrorKind::IntegrityFailure, None)
            .with_context(format!("block does not hash to {}", cid))
    }

    /// Create a malformed node error
    pub fn malformed_node(msg: impl Into<String>) -> Self {
        Self::new(AmtErrorKind::MalformedNode, Some(msg.into().into()))
            .with_help("expected Filecoin AMTv3 layout: [bit_width, height, count, [bmap, links, values]]")
    }

    /// Create an out of range error
    pub fn out_of_range(key: u64, height: u32, capacity: u64) -> Self {
        Self::new(AmtErrorKind::OutOfRange, None).with_context(format!(
            "key {} exceeds capacity {} at height {}",
            key, capacity, height
        ))
    }

    /// Create a not found error
    pub fn not_found(cid: impl fmt::Display) -> Self {
        Self::new(AmtErrorKind::NotFound, None).with_context(format!("block not found: {}", cid))
    }

    /// Create a transport error
    pub fn transport(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(AmtErrorKind::Transport, Some(Box::new(source)))
    }
}

impl fmt::Display for AmtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;

        if let Some(ctx) = &self.context {
            write!(f, ": {}", ctx)?;
        }

        if let Some(src) = &self.source {
            write!(f, ": {}", src)?;
        }

        Ok(())
    }
}

// Internal granular errors

/// Canonical DAG-CBOR decoding errors
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum DecodeError {
    /// Input ended before the item did
    #[error("Truncated input: needed {needed} more bytes")]
    Truncated {
        /// Bytes missing from the input
        needed: usize,
    },

    /// Bytes left over after the top-level item
    #[error("Trailing bytes after value: {remaining}")]
    TrailingBytes {
        /// Unconsumed byte count
        remaining: usize,
    },

    /// Integer or length not in minimal form
    #[error("Non-minimal encoding: argument {value} in a {width}-byte head")]
    NonMinimal {
        /// Decoded argument value
        value: u64,
        /// Head width used for it
        width: u8,
    },

    /// Indefinite-length item
    #[error("Indefinite-length items are not permitted")]
    IndefiniteLength,

    /// Reserved additional-information value in a head
    #[error("Reserved additional info {0} in head")]
    ReservedInfo(u8),

    /// Major type 7 value outside false/true/null/undefined
    #[error("Unsupported simple or float value (argument {0})")]
    UnsupportedSimple(u64),

    /// Map key is not a text string
    #[error("Map key is not a text string")]
    NonStringKey,

    /// Map keys out of canonical order
    #[error("Map keys out of canonical order: {key:?} after {prev:?}")]
    KeyOrder {
        /// Preceding key
        prev: String,
        /// Offending key
        key: String,
    },

    /// Duplicate map key
    #[error("Duplicate map key: {0:?}")]
    DuplicateKey(String),

    /// Tag other than the CID link tag
    #[error("Unexpected tag {0}: only tag 42 links are supported")]
    UnexpectedTag(u64),

    /// Tag 42 content is not a valid link
    #[error("Invalid link: {0}")]
    InvalidLink(String),

    /// Text string is not UTF-8
    #[error("Text string is not valid UTF-8")]
    InvalidUtf8,

    /// Nesting exceeds the recursion limit
    #[error("Nesting exceeds depth limit of {0}")]
    DepthLimit(usize),

    /// Declared length exceeds the input
    #[error("Declared length {len} exceeds remaining input {remaining}")]
    LengthOverflow {
        /// Declared item length
        len: u64,
        /// Remaining input bytes
        remaining: usize,
    },
}

impl From<DecodeError> for AmtError {
    fn from(e: DecodeError) -> Self {
        AmtError::new(AmtErrorKind::Decode, Some(Box::new(e)))
            .with_help("blocks must be canonical DAG-CBOR; re-fetch rather than repair")
    }
}

/// AMT node shape errors
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum NodeError {
    /// Root or node is not a list
    #[error("Expected a CBOR list, got {0}")]
    NotAList(&'static str),

    /// List has the wrong number of elements
    #[error("Wrong arity for {what}: expected {expected}, got {got}")]
    WrongArity {
        /// Which structure was being read
        what: &'static str,
        /// Expected element count
        expected: usize,
        /// Actual element count
        got: usize,
    },

    /// A field has the wrong type
    #[error("Field {field} has wrong type: expected {expected}")]
    FieldType {
        /// Field name
        field: &'static str,
        /// Expected type
        expected: &'static str,
    },

    /// Bit width outside the supported range
    #[error("Bit width {0} outside supported range 1..=8")]
    BitWidthOutOfRange(u64),

    /// Height and bit width together overflow the 64-bit key space
    #[error("Height {height} with bit width {bit_width} exceeds the 64-bit key space")]
    HeightOverflow {
        /// Declared height
        height: u64,
        /// Declared bit width
        bit_width: u32,
    },

    /// Bitmap byte length does not match the fan-out
    #[error("Bitmap is {got} bytes, expected {expected} for fan-out {fan_out}")]
    BitmapLength {
        /// Actual bitmap length
        got: usize,
        /// Required bitmap length
        expected: usize,
        /// Node fan-out
        fan_out: u32,
    },

    /// Bitmap has bits set beyond the fan-out
    #[error("Bitmap has padding bits set beyond slot {fan_out}")]
    PaddingBitsSet {
        /// Node fan-out
        fan_out: u32,
    },

    /// Set-bit count does not match the payload sequence
    #[error("Bitmap has {bits} set bits but node carries {payloads} payloads")]
    PayloadMismatch {
        /// Set bits in the bitmap
        bits: usize,
        /// Payload entries present
        payloads: usize,
    },

    /// Leaf node carries child links
    #[error("Leaf node (height 0) carries {0} child links")]
    LeafWithLinks(usize),

    /// Internal node carries inline values
    #[error("Internal node (height {height}) carries {values} inline values")]
    InnerWithValues {
        /// Node height
        height: u32,
        /// Inline value count
        values: usize,
    },
}

impl From<NodeError> for AmtError {
    fn from(e: NodeError) -> Self {
        AmtError::malformed_node(e.to_string())
    }
}
