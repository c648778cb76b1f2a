//! Error kinds and the error channel
//!
//! Every failure in the core is raised through [`Context::throw`], which hands
//! the kind and message to the configured handler before the operation
//! returns `Err`. Without a handler the process prints the error and exits
//! with `100 + code`.
//!
//! [`Context::throw`]: crate::Context::throw

use crate::config::ERROR_BUFFER_SIZE;

/// Kind of a raised error
///
/// Discriminants are the stable error codes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Generic = 0,
    Access = 1,
    Internal = 2,
    Import = 3,
    Assertion = 4,
    Type = 5,
    Cast = 6,
    Filesystem = 7,
    Index = 8,
    Runtime = 9,
    Memory = 10,
    Math = 11,
    Unicode = 12,
    Regex = 13,
    Syntax = 14,
    Symbol = 15,
    IO = 16,
    Unimplemented = 17,
}

impl ErrorKind {
    pub const COUNT: usize = 18;

    /// Numeric error code
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Human-readable name, as printed by the default handler
    pub const fn name(self) -> &'static str {
        match self {
            ErrorKind::Generic => "Error",
            ErrorKind::Access => "Access error",
            ErrorKind::Internal => "Internal error",
            ErrorKind::Import => "Import error",
            ErrorKind::Assertion => "Assertion error",
            ErrorKind::Type => "Type error",
            ErrorKind::Cast => "Cast error",
            ErrorKind::Filesystem => "File system error",
            ErrorKind::Index => "Index error",
            ErrorKind::Runtime => "Runtime error",
            ErrorKind::Memory => "Memory error",
            ErrorKind::Math => "Math error",
            ErrorKind::Unicode => "Unicode error",
            ErrorKind::Regex => "Regular expression error",
            ErrorKind::Syntax => "Syntax error",
            ErrorKind::Symbol => "Symbol error",
            ErrorKind::IO => "Input/Output error",
            ErrorKind::Unimplemented => "Feature not implemented",
        }
    }

    /// Process exit status used by the default handler
    #[inline]
    pub const fn exit_code(self) -> i32 {
        100 + self.code()
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// An error raised by the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: truncate_message(message.into()),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.message)
    }
}

impl std::error::Error for Error {}

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error handler installed on a context
pub type ErrorHandler = Box<dyn Fn(ErrorKind, &str)>;

/// Handler used when none is configured: report and terminate
pub fn default_handler(kind: ErrorKind, message: &str) {
    eprint!("[{}]\n{}\n", kind.name(), message);
    std::process::exit(kind.exit_code());
}

/// Report an error through `handler`, or the default handler if none is set
pub(crate) fn raise(
    handler: Option<&ErrorHandler>,
    kind: ErrorKind,
    message: impl Into<String>,
) -> Error {
    let error = Error::new(kind, message);
    log::debug!("raising {}: {}", kind.name(), error.message);
    match handler {
        Some(handler) => handler(kind, &error.message),
        None => default_handler(kind, &error.message),
    }
    error
}

/// Clip a message to what fits in the error buffer, on a char boundary
fn truncate_message(mut message: String) -> String {
    let max = ERROR_BUFFER_SIZE - 1;
    if message.len() > max {
        let mut end = max;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    message
}

/// Allocation failure reported by the arena and the allocator hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError {
    /// Number of bytes that could not be reserved
    pub requested: usize,
}

impl std::fmt::Display for AllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to allocate {} bytes", self.requested)
    }
}

impl std::error::Error for AllocError {}
