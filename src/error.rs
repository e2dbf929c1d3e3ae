use thiserror::Error;

use crate::ir::FuncId;

/// Helper macro for creating internal-consistency errors with source location information.
///
/// Captures the current file and line so a violation found deep inside the evaluator can be
/// traced back to the check that detected it.
///
/// # Examples
///
/// ```rust,ignore
/// return Err(consistency_error!("dangling object id {}", id));
/// return Err(consistency_error!("frame stack underflow"));
/// ```
macro_rules! consistency_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Inconsistent {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Inconsistent {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which covers every error this library can return.
///
/// Imprecision is never an error: unresolved pointers, bypassed loops, exhausted budgets and
/// unresolved indirect calls are all recovered locally by widening. Only two classes of problems
/// surface here.
///
/// # Error Categories
///
/// ## Internal Consistency Errors
/// - [`Error::Inconsistent`] - Malformed program graph or a broken heap invariant
/// - [`Error::UnknownFunction`] - A function id outside of the program
/// - [`Error::GraphError`] - Graph construction with invalid node ids
///
/// ## Configuration Errors
/// - [`Error::InvalidConfig`] - Rejected before the analysis starts
///
/// # Examples
///
/// ```rust,ignore
/// use preeval::{Error, Evaluator, EvalConfig};
///
/// match Evaluator::new(&program, &oracle, EvalConfig::default()) {
///     Ok(evaluator) => { /* ... */ }
///     Err(Error::InvalidConfig(reason)) => eprintln!("bad configuration: {reason}"),
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The program graph or the heap model violated an invariant.
    ///
    /// Raised for dangling object ids, addresses that reference a popped frame, mismatched
    /// frame stacks at a merge, and program-graph defects the verifier should have caught.
    /// Fatal for the function under analysis only; its summary is discarded.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the violated invariant
    /// * `file` - Source file where the violation was detected
    /// * `line` - Source line where the violation was detected
    #[error("Inconsistent - {file}:{line}: {message}")]
    Inconsistent {
        /// The message to be printed for the Inconsistent error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A function id does not name a function of the program.
    #[error("Unknown function - {0}")]
    UnknownFunction(FuncId),

    /// The analysis configuration or the points-to oracle was rejected.
    ///
    /// Returned by [`crate::EvalConfig::validate`] and by evaluator construction, before any
    /// function is analyzed.
    #[error("Invalid configuration - {0}")]
    InvalidConfig(String),

    /// A call depth beyond what the evaluator can simulate.
    ///
    /// Returned when a configuration asks for more nesting than
    /// [`crate::analysis::MAX_SUPPORTED_CALL_DEPTH`], and by the driver if its own recursion
    /// ever passes that depth.
    #[error("Recursion limit reached - {0}")]
    RecursionLimit(usize),

    /// Graph construction error.
    ///
    /// Adding an edge between nodes that do not exist in the graph.
    #[error("{0}")]
    GraphError(String),
}
