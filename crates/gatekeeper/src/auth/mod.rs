//! Step-up authentication for relay clients

pub mod codes;
pub mod step_up;

pub use codes::{PendingCodes, PendingGuard, generate_code};
pub use step_up::{RedeemOutcome, StepUpAuthenticator};
