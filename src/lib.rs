//! Business onboarding — plan selection, KYC sections, step guards and
//! verification polling.

pub mod backend;
pub mod config;
pub mod error;
pub mod onboarding;
pub mod session;
pub mod verification;
