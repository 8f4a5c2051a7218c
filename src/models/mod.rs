pub mod batch;
pub mod code;
pub mod verification;

pub use batch::{Batch, BatchStatus, BatchWithCounts, CreateBatch, UpdateBatch};
pub use code::{AuthenticationCode, CodeRecord, CodeStatus};
pub use verification::{
    Geolocation, LocatedScan, NewVerificationEvent, ProductSummary, VerificationOutcome,
    VerificationStatus,
};
