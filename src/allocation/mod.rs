//! Allocation transactions: selection, validation and batch submit

mod selection;
mod transaction;
mod validate;

pub use selection::{Selection, SelectionEntry};
pub use transaction::{AllocationTransaction, Committed, MarkEntry, TransactionError};
pub use validate::{
    has_unallotable, has_unmarkable, parse_partial, requires_partial, validate, validate_batch,
    validate_marking, AllotEntry, ValidationContext, ValidationError, ALLOT_REL, MARK_REL,
    MAX_PARTIAL,
};
