use std::path::PathBuf;

use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants fall into the groups the patching engine distinguishes when deciding whether an
/// operation can continue. Images that simply have nothing to patch are *not* errors; they are
/// reported through [`crate::PatchOutcome::Skipped`].
///
/// # Error Categories
///
/// ## Image Parsing Errors
/// - [`Error::Malformed`] - Corrupted or invalid PE structure
/// - [`Error::OutOfBounds`] - Attempted to read or write beyond a buffer
/// - [`Error::NotSupported`] - The image is not a PE32+ executable
/// - [`Error::Empty`] - Empty input provided
/// - [`Error::GoblinErr`] - PE parsing errors from the goblin crate
/// - [`Error::NoSectionHeaderSpace`] - No room left in the header region for new sections
///
/// ## Record Format Errors
/// - [`Error::InvalidMagic`] - The record section does not start with the expected magic
/// - [`Error::FormatMismatch`] - Version, format type or kind differs from the decoder's
/// - [`Error::UnregisteredSymbolType`] - No decoder is registered for a record triple
/// - [`Error::DuplicateRecordType`] - A decoder was registered twice for the same triple
///
/// ## Symbol Consistency Errors
/// - [`Error::InvalidSymbol`] - A symbol descriptor violates the symbol invariants
///
/// ## I/O Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::BackupFailed`] - The backup copy of the original image could not be written
/// - [`Error::WriteFailed`] - The patched image could not be written
/// - [`Error::UnpatchFailed`] - An existing patch could not be removed before re-patching
///
/// # Examples
///
/// ```rust,no_run
/// use modtweak::{Error, PatchOptions};
/// use std::path::Path;
///
/// match modtweak::unpatch_file(Path::new("Mod.dll"), &PatchOptions::new()) {
///     Ok(outcome) => println!("{outcome:?}"),
///     Err(Error::FormatMismatch { field, expected, actual }) => {
///         eprintln!("record {field} is {actual}, expected {expected}");
///     }
///     Err(e) => eprintln!("unpatch failed: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // Image parsing Errors
    /// The file is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected for debugging
    /// purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while reading or writing a buffer.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This file type is not supported.
    ///
    /// Only PE32+ images carry 8-byte import slots, which the record format assumes.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// The header region has no room for another section header.
    ///
    /// New section headers are written directly after the existing section table. Images whose
    /// first section starts right after the table cannot grow without moving raw data.
    #[error("No room for {needed} more section header(s) before the first section's raw data")]
    NoSectionHeaderSpace {
        /// Number of additional section headers that were requested
        needed: usize,
    },

    /// Error from the goblin crate during PE parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    // Record format Errors
    /// The record section does not start with the expected magic string.
    #[error("Invalid magic signature '{actual}', expected '{expected}'")]
    InvalidMagic {
        /// The magic this decoder expects
        expected: &'static str,
        /// The magic found in the data
        actual: String,
    },

    /// A record field that identifies the record layout did not match.
    ///
    /// Every record re-verifies its version, format type and kind on read, so data written by
    /// an incompatible producer is rejected instead of being misparsed.
    #[error("Incompatible record {field} '{actual}', expected '{expected}'")]
    FormatMismatch {
        /// Which identifying field mismatched (`version`, `format` or `kind`)
        field: &'static str,
        /// The value this decoder expects
        expected: String,
        /// The value found in the data
        actual: String,
    },

    /// No decoder is registered for this `(version, format, kind)` triple.
    #[error("Unregistered symbol type v{version}, {format}, {kind}")]
    UnregisteredSymbolType {
        /// Record version
        version: u32,
        /// Record format type
        format: String,
        /// Record kind
        kind: String,
    },

    /// A decoder for this `(version, format, kind)` triple is already registered.
    #[error("A decoder for v{version}, {format}, {kind} is already registered")]
    DuplicateRecordType {
        /// Record version
        version: u32,
        /// Record format type
        format: String,
        /// Record kind
        kind: String,
    },

    // Symbol consistency Errors
    /// A symbol descriptor violates the symbol invariants.
    #[error("Invalid symbol '{name}': {reason}")]
    InvalidSymbol {
        /// Name of the offending symbol
        name: String,
        /// What is wrong with it
        reason: String,
    },

    // I/O Errors
    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// The backup copy of the original image could not be written.
    ///
    /// The original file is left untouched when this error is returned.
    #[error("Failed to back up original image to {path}: {source}")]
    BackupFailed {
        /// The backup path that could not be written
        path: PathBuf,
        /// The underlying I/O failure
        source: std::io::Error,
    },

    /// Writing the patched image failed.
    #[error("Failed to write image - {message}")]
    WriteFailed {
        /// Description of the failure
        message: String,
    },

    /// An already patched image could not be restored before patching it again.
    #[error("Failed to remove existing patch: {0}")]
    UnpatchFailed(Box<Error>),
}
