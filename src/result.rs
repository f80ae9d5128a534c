//! Result and error types representing the outcome of encoding an operation.

use thiserror::Error;

/// An encoding error.
///
/// Every failure this crate can detect is a build-time condition: either the
/// requested operation has no lowering at the selected capability tier, or a
/// documented operand precondition was violated. Nothing here survives into
/// the emitted code; once emission succeeds the bytes either execute as
/// ordinary native instructions or fault under the host processor's own
/// illegal-instruction handling.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodegenError {
    /// The operation/width combination has no defined lowering for the
    /// selected capability tier.
    #[error("no lowering for {op} at tier {tier}")]
    Unsupported {
        /// Rendered operation descriptor.
        op: String,
        /// Name of the selected tier.
        tier: &'static str,
    },

    /// Operand registers alias in a way that violates the operation's
    /// documented exclusivity constraint.
    #[error("register aliasing violates '{constraint}' for {op}")]
    RegisterAliasing {
        /// Rendered operation descriptor.
        op: String,
        /// The violated constraint, in words.
        constraint: &'static str,
    },

    /// The scratch buffer was checked out while another lowering still holds
    /// it. Emulated lowerings must run to completion before the next one
    /// starts.
    #[error("scratch buffer is already checked out by an open lowering")]
    ScratchInUse,

    /// An operand value is outside the range its tag admits (wide-vector id
    /// past the register file, mask bank out of the k1..k4 window, shift
    /// amount wider than the lane).
    #[error("invalid operand: {what}")]
    InvalidOperand {
        /// What was out of range.
        what: &'static str,
    },
}

/// A convenient alias for a `Result` that uses `CodegenError` as the error type.
pub type CodegenResult<T> = Result<T, CodegenError>;
