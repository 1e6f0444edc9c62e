//! Onboarding workflow — from business details to an approved account.
//!
//! The record is built up across a fixed sequence of steps. Plan choice
//! decides the verification rigor: tiers 1-2 go straight to live capture,
//! tiers 3+ pass through the KYC hub and its four sections first. Each step
//! is guarded by data completeness and a live session check. After
//! submission the verification poller takes over.

pub mod guard;
pub mod manager;
pub mod model;
pub mod plans;
pub mod routes;
pub mod sections;
pub mod state;
pub mod store;

pub use guard::{BlockReason, GuardEvaluator, StepGuardResult};
pub use manager::{OnboardingManager, OnboardingStatus};
pub use model::{
    Attachment, AttachmentType, OnboardingRecord, RecordPatch, SectionId, VerificationType,
};
pub use plans::{PlanTier, TierSelection, select_plan};
pub use routes::{OnboardingRouteState, onboarding_routes};
pub use state::OnboardingStep;
pub use store::OnboardingStore;
