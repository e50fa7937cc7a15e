//! Errors that abort decoding of a record or lifting of a function.
//!
//! Resolution gaps (a symbolic value that cannot be turned into a concrete AST form) are *not*
//! errors; they produce placeholder nodes and a [`Diagnostic`](crate::diagnostics::Diagnostic).
//! Everything in here is either a decode error, which is fatal to the one fact record, or a
//! programmer-contract violation, which is fatal to the function being lifted.

use thiserror::Error;

/// The generic error type for the crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A key letter in an `a:`/`ar:` key that the decoder does not know about.
    #[error("record {index}: key letter {letter:?} in {key:?} not recognized")]
    UnknownKeyLetter {
        index: usize,
        key: String,
        letter: char,
    },

    /// A key that is neither `nop`, `subsumes`, `a:...` nor `ar:...`.
    #[error("record {index}: key {key:?} not supported")]
    UnsupportedKey { index: usize, key: String },

    /// Fewer arguments than the key letters require.
    #[error("record {index}: key {key:?} needs {letters} arguments, found {args}")]
    ArgumentCountMismatch {
        index: usize,
        key: String,
        letters: usize,
        args: usize,
    },

    /// A raw argument that is neither an index nor the error sentinel of its field kind.
    #[error("record {index}: invalid argument {raw} at position {position}")]
    InvalidArgument {
        index: usize,
        position: usize,
        raw: i64,
    },

    /// The error sentinel appeared for a field that cannot be error-valued.
    #[error("record {index}: error-valued argument at position {position} for letter {letter:?}")]
    UnexpectedErrorValue {
        index: usize,
        position: usize,
        letter: char,
    },

    /// A committed family whose count does not line up with its result counterpart.
    #[error("record {index}: {committed} committed {family} for {results} results")]
    CommittedCountMismatch {
        index: usize,
        family: &'static str,
        committed: usize,
        results: usize,
    },

    /// An opcode record that violates its declared `(tag_count, arg_count)` contract.
    #[error(
        "opcode {opcode}: expected {expected_tags} tags and {expected_args} args, \
         got {tags} tags and {args} args"
    )]
    OpcodeContract {
        opcode: String,
        expected_tags: usize,
        expected_args: usize,
        tags: usize,
        args: usize,
    },

    /// A lookup past the end of an interned or external table.
    #[error("{table}: index {index} out of range")]
    IndexOutOfRange { table: String, index: usize },

    /// A record whose shape does not match its table's encoding.
    #[error("{table}: malformed record {index}: {message}")]
    Malformed {
        table: String,
        index: usize,
        message: String,
    },

    /// A decoded field was requested before the record was decoded.
    #[error("xdata record {index} accessed before decoding")]
    NotDecoded { index: usize },

    /// A var-info type was refined a second time.
    #[error("type of {name} has already been refined")]
    TypeAlreadyRefined { name: String },

    /// A composite key registered twice with different contents.
    #[error("composite key {ckey} ({name}) registered with conflicting definitions")]
    ConflictingCompInfo { ckey: usize, name: String },

    /// The fact file could not be parsed.
    #[error("fact file, line {line}: {message}")]
    Parse { line: usize, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Construct an [`Error::Malformed`] for the named table.
macro_rules! malformed {
    ($table:expr, $index:expr, $($arg:tt)*) => {
        crate::error::Error::Malformed {
            table: $table.to_string(),
            index: $index,
            message: format!($($arg)*),
        }
    };
}

pub(crate) use malformed;
