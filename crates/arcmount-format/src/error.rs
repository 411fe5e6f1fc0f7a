use thiserror::Error;

/// Process exit codes reported by the mount binary.
///
/// Unless the filesystem runs in the foreground, the parent process may well
/// ignore these after the mount goes live; they matter most for the startup
/// phase, which completes before the event loop starts.
pub mod exit_code {
    /// Bad arguments, out of memory, and other unclassified failures.
    pub const GENERIC_FAILURE: i32 = 1;
    /// The archive file could not be opened.
    pub const CANNOT_OPEN_ARCHIVE: i32 = 11;
    /// The archive is encrypted and no passphrase was supplied.
    pub const PASSPHRASE_REQUIRED: i32 = 20;
    /// The supplied passphrase did not decrypt the archive.
    pub const PASSPHRASE_INCORRECT: i32 = 21;
    /// The archive uses an encryption scheme this program cannot decrypt.
    pub const PASSPHRASE_NOT_SUPPORTED: i32 = 22;
    /// The file is neither a recognised container nor a compressed stream.
    pub const INVALID_RAW_ARCHIVE: i32 = 30;
    /// The archive's header stream could not be parsed.
    pub const INVALID_ARCHIVE_HEADER: i32 = 31;
    /// An entry body could not be decompressed.
    pub const INVALID_ARCHIVE_CONTENTS: i32 = 32;
}

/// Errors that can occur when classifying, indexing or reading archives.
#[derive(Debug, Error)]
pub enum Error {
    /// The archive file could not be opened or resolved.
    #[error("cannot open archive: {0}")]
    CannotOpenArchive(String),

    /// An encrypted entry was found but no passphrase is available.
    #[error("passphrase required but none supplied")]
    PassphraseRequired,

    /// The passphrase failed its verification check.
    #[error("passphrase incorrect")]
    PassphraseIncorrect,

    /// The entry uses an encryption scheme we cannot decrypt.
    #[error("encryption scheme not supported: {0}")]
    PassphraseNotSupported(&'static str),

    /// A file with no compression filter was offered as a raw archive.
    #[error("invalid raw archive: no compression filter detected")]
    InvalidRawArchive,

    /// The header stream could not be parsed.
    #[error("invalid archive header: {0}")]
    InvalidArchiveHeader(String),

    /// An entry body failed to decompress.
    #[error("invalid archive contents: {0}")]
    InvalidArchiveContents(String),

    /// A recognised archive family this program does not decode.
    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(&'static str),

    /// The archive ended before a previously indexed entry was reached,
    /// meaning the file changed on disk after the indexing pass.
    #[error("inconsistent archive: {0}")]
    InconsistentArchive(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The process exit code this error maps to when it aborts startup.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::CannotOpenArchive(_) => exit_code::CANNOT_OPEN_ARCHIVE,
            Error::PassphraseRequired => exit_code::PASSPHRASE_REQUIRED,
            Error::PassphraseIncorrect => exit_code::PASSPHRASE_INCORRECT,
            Error::PassphraseNotSupported(_) => exit_code::PASSPHRASE_NOT_SUPPORTED,
            Error::InvalidRawArchive => exit_code::INVALID_RAW_ARCHIVE,
            Error::InvalidArchiveHeader(_) | Error::UnsupportedFormat(_) => {
                exit_code::INVALID_ARCHIVE_HEADER
            }
            Error::InvalidArchiveContents(_) => exit_code::INVALID_ARCHIVE_CONTENTS,
            Error::InconsistentArchive(_) | Error::Io(_) => exit_code::GENERIC_FAILURE,
        }
    }
}

/// Result type for arcmount-format operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_the_documented_table() {
        assert_eq!(
            Error::CannotOpenArchive("x".into()).exit_code(),
            exit_code::CANNOT_OPEN_ARCHIVE
        );
        assert_eq!(Error::PassphraseRequired.exit_code(), 20);
        assert_eq!(Error::PassphraseIncorrect.exit_code(), 21);
        assert_eq!(Error::PassphraseNotSupported("aes").exit_code(), 22);
        assert_eq!(Error::InvalidRawArchive.exit_code(), 30);
        assert_eq!(Error::InvalidArchiveHeader("x".into()).exit_code(), 31);
        assert_eq!(Error::UnsupportedFormat("7z").exit_code(), 31);
        assert_eq!(Error::InvalidArchiveContents("x".into()).exit_code(), 32);
    }
}
