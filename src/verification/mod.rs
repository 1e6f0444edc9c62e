//! Post-submission verification tracking.
//!
//! After the application is submitted the backend decides, asynchronously,
//! whether the business is approved. The poller observes that decision and
//! fires a single transition into the protected area when it lands.

pub mod poller;

pub use poller::{
    Observation, PollResult, PollState, PollTracker, PollerHandle,
    TerminalHook, VerificationEvent, VerificationPoller,
};
