use thiserror::Error;

/// Failures the FEC engine can encounter while processing a segment.
///
/// None of these propagate as a hard error across the `Tcb` boundary: every
/// variant resolves to one of drop-this-segment, emit-RECOVERY_FAILED, or
/// disable-FEC-on-this-connection, as described in the module-level
/// documentation for [`super`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FecError {
    /// Could not allocate the working buffer for a decode episode.
    #[error("allocation failure decoding FEC parity segment")]
    AllocationFailure,
    /// Could not linearize a retained or out-of-order segment's payload.
    #[error("failed to linearize segment payload for FEC decode")]
    LinearizationFailure,
    /// A segment claimed to be encoded but carried no parseable FEC option.
    #[error("segment claims ENCODED but carries no FEC option")]
    MissingOptionOnEncodedClaim,
    /// The FEC option named a coding type this engine does not implement.
    #[error("unknown FEC coding type")]
    UnknownCodingType,
}

impl FecError {
    /// Whether this failure should count toward the per-connection
    /// allocation-failure budget that disables FEC after repeated trouble
    /// (see DESIGN.md's Open-question decisions).
    pub fn counts_as_allocation_trouble(self) -> bool {
        matches!(
            self,
            FecError::AllocationFailure | FecError::LinearizationFailure
        )
    }
}
