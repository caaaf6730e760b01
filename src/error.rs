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

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! analysis_error {
    ($method:expr, $fmt:expr) => {
        crate::Error::Analysis {
            method: $method.to_string(),
            message: $fmt.to_string(),
        }
    };

    ($method:expr, $fmt:expr, $($arg:tt)*) => {
        crate::Error::Analysis {
            method: $method.to_string(),
            message: format!($fmt, $($arg)*),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants follow the fault taxonomy of the deobfuscation pipeline:
///
/// ## Load faults
/// - [`Error::Malformed`] - The class file or archive structure is corrupt
/// - [`Error::OutOfBounds`] - A read would have crossed the end of the input
/// - [`Error::Empty`] - Empty input provided
/// - [`Error::Io`] / [`Error::Zip`] - Filesystem and archive errors
///
/// ## Per-method analysis faults
/// - [`Error::Analysis`] - A single method could not be analyzed. Passes catch this,
///   record a warning and continue with the next method.
///
/// ## Encoding limits
/// - [`Error::NotSupported`] - Valid input the encoder cannot express
///
/// Invariant violations (editing a node that is not in the instruction list, removing a
/// label that is still referenced) are programming errors and panic instead of producing
/// an `Error`.
///
/// # Examples
///
/// ```rust,no_run
/// use jarscope::{Error, file::JarArchive};
/// use std::path::Path;
///
/// match JarArchive::open(Path::new("gamepack.jar")) {
///     Ok(jar) => println!("Loaded {} classes", jar.group().len()),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed class: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The input is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected
    /// for debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the input.
    #[error("Out of Bound read would have occurred - {file}:{line}")]
    OutOfBounds {
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The input uses a feature that cannot be represented.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// Error from the zip crate while reading or writing an archive.
    #[error("{0}")]
    Zip(#[from] zip::result::ZipError),

    /// Data-flow analysis of a single method failed.
    ///
    /// Raised for stack underflows, category mismatches, unknown labels, execution
    /// falling off the end of the code, or an exhausted iteration budget.
    #[error("Analysis of {method} failed: {message}")]
    Analysis {
        /// `owner.name+descriptor` of the offending method
        method: String,
        /// What went wrong
        message: String,
    },

    /// A class was looked up by name and is not part of the group.
    #[error("Class not found - {0}")]
    ClassNotFound(String),

    /// A class with the same internal name is already present in the group.
    #[error("Duplicate class - {0}")]
    DuplicateClass(String),

    /// Graph construction or traversal failed.
    #[error("{0}")]
    GraphError(String),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
