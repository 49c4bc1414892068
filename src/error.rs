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

macro_rules! assembly_error {
    ($msg:expr) => {
        crate::Error::AssemblyFailure {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::AssemblyFailure {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants fall into three groups that mirror the life of an image:
///
/// ## Building
/// - [`Error::HeapOverflow`] - A heap grew past the 24-bit offset ceiling
/// - [`Error::InvalidTableOrder`] - A row was appended out of the order the tables require
/// - [`Error::InvalidInstruction`] - An instruction could not be encoded
/// - [`Error::AssemblyFailure`] - The frozen inputs are inconsistent, assembly aborted
///
/// ## Reading
/// - [`Error::Malformed`] - Corrupted or invalid file structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond the end of the data
/// - [`Error::NotSupported`] - The image uses something outside the supported subset
/// - [`Error::Empty`] - Empty input provided
/// - [`Error::FileError`] / [`Error::GoblinErr`] - I/O and PE parsing failures
///
/// ## Loading and invocation
/// - [`Error::LoadRejected`] - The loader refused the image
/// - [`Error::TypeNotFound`] / [`Error::MethodNotFound`] - Name resolution failed
/// - [`Error::InvocationFailed`] - The image loaded, but running code threw
/// - [`Error::RuntimeUnavailable`] - No usable runtime is installed
///
/// # Examples
///
/// ```rust,no_run
/// use dotforge::{Error, runtime::{ReferenceRuntime, RuntimeLoader}};
/// use std::path::Path;
///
/// match ReferenceRuntime::new().load(Path::new("SampleLib.dll")) {
///     Ok(_) => println!("loaded"),
///     Err(Error::LoadRejected(diagnostic)) => eprintln!("rejected: {}", diagnostic),
///     Err(e) => eprintln!("other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A heap would exceed the largest offset a metadata reference can hold.
    ///
    /// Offsets into `#Strings`, `#US` and `#Blob`, and indices into `#GUID`, are capped at
    /// `0x00FF_FFFF`. Interning content that would start beyond that fails.
    #[error("The {heap} heap overflowed - {size} bytes exceed the 24-bit offset range")]
    HeapOverflow {
        /// Name of the heap stream (`#Strings`, `#US`, `#GUID` or `#Blob`)
        heap: &'static str,
        /// Size the heap would have had after the append
        size: usize,
    },

    /// A row was appended in an order the metadata tables do not allow.
    ///
    /// Examples are a second `Module` row, a first `TypeDef` that is not `<Module>`, or a
    /// member list start that goes backwards.
    #[error("Invalid row order in {table} - {message}")]
    InvalidTableOrder {
        /// Name of the table the row was appended to
        table: &'static str,
        /// What was wrong with the append
        message: String,
    },

    /// An instruction could not be encoded into a method body.
    #[error("Invalid instruction - {0}")]
    InvalidInstruction(String),

    /// The frozen builder state is internally inconsistent and no image was produced.
    ///
    /// This is raised by the consistency pass at freeze time and by the image assembler; it
    /// points at a dangling token, an out-of-range heap reference or a broken member list.
    #[error("Assembly failed - {file}:{line}: {message}")]
    AssemblyFailure {
        /// The message to be printed for the AssemblyFailure error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The runtime loader refused the image.
    ///
    /// Carries the loader's diagnostic verbatim. This is distinct from
    /// [`Error::InvocationFailed`], which means the image loaded fine but executing code threw.
    #[error("Load rejected - {0}")]
    LoadRejected(String),

    /// No type with this fully qualified name exists in the loaded module.
    #[error("Type not found - {0}")]
    TypeNotFound(String),

    /// No method with this name exists on the resolved type.
    #[error("Method not found - {0}")]
    MethodNotFound(String),

    /// Constructing an instance or invoking a method threw.
    #[error("Invocation failed - {0}")]
    InvocationFailed(String),

    /// No runtime able to host the image could be found on this machine.
    #[error("Runtime unavailable - {0}")]
    RuntimeUnavailable(String),

    /// The file is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the file.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This file type or feature is not supported.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// Error from the goblin crate during PE parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),
}
