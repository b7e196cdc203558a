//! Control-loop errors.

use thiserror::Error;

use crate::gate::CallError;
use crate::heap::HeapError;
use crate::workers::DispatchError;

#[derive(Debug, Error)]
pub enum ControlError {
    /// A privileged call failed or timed out.  Aborts the current step only.
    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    Heap(#[from] HeapError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The host refused a purchase or upgrade the policy had budgeted for.
    #[error("host refused {action} of '{node}' (cost {cost:.0}, funds {funds:.0})")]
    Refused {
        action: &'static str,
        node: String,
        cost: f64,
        funds: f64,
    },
}

impl ControlError {
    /// `true` when the loop should log the error and try again next cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ControlError::Call(_))
    }
}
