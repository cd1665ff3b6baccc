//! Request kind and lifecycle status

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;

/// Why funds are leaving cold custody
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Hot/cold ratio rebalancing triggered by the treasury engine
    Rebalancing,
    /// Withdrawal that cannot wait for the next rebalancing window
    EmergencyWithdrawal,
    /// Key rotation, address migration, consolidation
    Maintenance,
}

/// Lifecycle status of a signing request
///
/// Moves forward only: `pending → partial → completed`, or from `pending`/`partial`
/// into `expired` or `cancelled`. The last three are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Partial,
    Completed,
    Expired,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Expired | RequestStatus::Cancelled
        )
    }

    /// Whether `self → next` is a legal step.
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        match (self, next) {
            (Pending, Partial | Completed | Expired | Cancelled) => true,
            (Partial, Partial | Completed | Expired | Cancelled) => true,
            _ => false,
        }
    }

    /// Status implied by a signature count
    pub fn for_progress(obtained: u32, required: u32) -> RequestStatus {
        if obtained == 0 {
            RequestStatus::Pending
        } else if obtained < required {
            RequestStatus::Partial
        } else {
            RequestStatus::Completed
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Illegal status transition {from} -> {to}")]
pub struct TransitionError {
    pub from: RequestStatus,
    pub to: RequestStatus,
}
