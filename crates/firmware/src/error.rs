use std::io;

use thiserror::Error;

use crate::flash::module::ModuleKind;

/// An error surfaced by an image operation.
#[derive(Debug, Error)]
pub enum Error {
    /// The buffer is too small to be a firmware image, or the header is
    /// impossible.
    #[error("not a valid firmware image")]
    InvalidImage,

    /// A module could not be decoded. Advisory for the reporting
    /// operations, fatal for the rewriting ones.
    #[error("the {0} could not be decompressed")]
    NotDecodable(ModuleKind),

    /// A cipher buffer was not a whole number of blocks.
    #[error("buffer is not aligned to the cipher block size")]
    Misaligned,

    /// The user configuration uses an unrecognised schema version.
    #[error("unsupported user configuration version {0}")]
    UnsupportedVersion(u8),

    /// Repacking the modules would cross into the configuration area.
    #[error("the modules do not fit below the user configuration area")]
    OutOfSpace,

    /// A settings backup file has the wrong size or layout.
    #[error("not a valid settings backup")]
    InvalidBackup,

    /// An address or range falls outside the image.
    #[error("address range is out of bounds")]
    OutOfBounds,

    #[error(transparent)]
    Codec(#[from] codec::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}
