//! Coldsign Core - Domain types
//!
//! Types shared by every Coldsign crate:
//! - `SigningRequest`: the aggregate root, with its bundles and signers
//! - `RequestKind` / `RequestStatus`: closed enums with the lifecycle rules
//! - `SignatureScheme` / `AssetFamily`: which curve a signer's key lives on
//! - `Amount`: non-negative decimal
//! - `Clock`: injectable time source

pub mod amount;
pub mod clock;
pub mod request;
pub mod scheme;
pub mod status;

pub use amount::{Amount, AmountError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use request::{
    Cancellation, Priority, RequestError, RequestMetadata, Signer, SigningRequest,
    TransactionBundle,
};
pub use scheme::{AssetFamily, SignatureScheme};
pub use status::{RequestKind, RequestStatus, TransitionError};
