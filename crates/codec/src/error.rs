use thiserror::Error;

/// An error while decoding a compressed stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum Error {
    /// The stream ended mid-token, mid-tree or mid-block.
    #[error("compressed stream ends unexpectedly")]
    Truncated,

    /// The stream header is not one this codec produces.
    #[error("unrecognised compression header")]
    BadHeader,

    /// The ASH magic number is wrong.
    #[error("bad ASH magic number")]
    BadMagic,

    /// A serialised Huffman tree is malformed.
    #[error("malformed Huffman tree")]
    BadTree,

    /// A back-reference points outside the decoded output, past the declared
    /// uncompressed size, or uses a reserved distance.
    #[error("invalid back-reference in compressed stream")]
    BadReference,
}
