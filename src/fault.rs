use std::fmt;

use thiserror::Error;

/// Where inside the embedded interpreter a failure originated.
///
/// Filled in by the script bridge so that a failure surfacing several
/// suspension points away from the interpreter still names the chunk and
/// line that raised it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLocation {
    /// Name of the loaded chunk (script file or snippet).
    pub chunk: String,
    /// 1-based line within the chunk.
    pub line: u32,
}

impl fmt::Display for ScriptLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chunk, self.line)
    }
}

/// A failure delivered into a completion cell and re-raised at the await
/// site of every computation up the chain.
///
/// Faults are cloneable: a failure can be observed by a registered
/// continuation and still be re-raised at the await site.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    /// The cancellation chain this computation belonged to was aborted.
    #[error("computation canceled")]
    Canceled,
    /// A raced deadline elapsed first; carries the actual elapsed ticks.
    #[error("timed out after {0} ticks")]
    TimedOut(u64),
    /// An error raised inside the embedded scripting runtime.
    #[error("script error at {location}: {message}")]
    Script {
        /// Interpreter-reported error text.
        message: String,
        /// Originating chunk and line.
        location: ScriptLocation,
    },
    /// An application-level failure raised by domain code.
    #[error("{0}")]
    App(String),
}

impl Fault {
    /// Shorthand for an application-level failure.
    pub fn app(message: impl Into<String>) -> Self {
        Fault::App(message.into())
    }
}
