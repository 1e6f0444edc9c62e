//! Step entry guard.
//!
//! Two checks, ANDed: data completeness (pure, runs first) and session
//! validity (checks the auth collaborator, bounded by a timeout). The result
//! is tagged so callers can tell a transient `checking` from a real block.

use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::OnboardingConfig;
use crate::error::{AuthError, Error};
use crate::session::{AuthClient, SessionPhase, SessionStore};

use super::model::{OnboardingRecord, RecordField};
use super::state::OnboardingStep;

/// Why a step was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockReason {
    /// The session is still hydrating; ask again shortly.
    Checking,
    Unauthenticated,
    MissingFields,
    /// `pending` is only reachable through a successful submission.
    NotSubmitted,
    /// `dashboard` is only reachable once verification is approved.
    AwaitingApproval,
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Checking => write!(f, "checking"),
            Self::Unauthenticated => write!(f, "unauthenticated"),
            Self::MissingFields => write!(f, "missing-fields"),
            Self::NotSubmitted => write!(f, "not-submitted"),
            Self::AwaitingApproval => write!(f, "awaiting-approval"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepGuardResult {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<BlockReason>,
    pub missing_fields: Vec<String>,
}

impl StepGuardResult {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            missing_fields: Vec::new(),
        }
    }

    pub fn block(reason: BlockReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            missing_fields: Vec::new(),
        }
    }

    pub fn missing(fields: Vec<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(BlockReason::MissingFields),
            missing_fields: fields,
        }
    }
}

const IDENTITY: &[RecordField] = &[
    RecordField::BusinessName,
    RecordField::BusinessType,
    RecordField::Email,
    RecordField::Phone,
];

const LOCATED: &[RecordField] = &[
    RecordField::BusinessName,
    RecordField::BusinessType,
    RecordField::Email,
    RecordField::Phone,
    RecordField::Address,
];

const PLANNED: &[RecordField] = &[
    RecordField::BusinessName,
    RecordField::BusinessType,
    RecordField::Email,
    RecordField::Phone,
    RecordField::Address,
    RecordField::Plan,
    RecordField::Tier,
];

/// Record fields that must be filled before `step` may be entered.
pub fn required_fields(step: OnboardingStep) -> &'static [RecordField] {
    use OnboardingStep::*;
    match step {
        BusinessInfo | Pending | Dashboard => &[],
        Location => IDENTITY,
        Plan => LOCATED,
        Kyc | KycRegistration | KycOwner | KycIndustry | KycAdmins | LiveCapture | Review => {
            PLANNED
        }
    }
}

/// Names of the required fields that are empty, in declaration order.
pub fn missing_fields(step: OnboardingStep, record: &OnboardingRecord) -> Vec<String> {
    required_fields(step)
        .iter()
        .filter(|f| !record.has_field(**f))
        .map(|f| f.as_str().to_string())
        .collect()
}

/// Evaluates step entry against the record and the live session.
pub struct GuardEvaluator {
    session: Arc<SessionStore>,
    auth: Arc<dyn AuthClient>,
    timeout: Duration,
    allow_refresh: bool,
}

impl GuardEvaluator {
    pub fn new(
        session: Arc<SessionStore>,
        auth: Arc<dyn AuthClient>,
        timeout: Duration,
        allow_refresh: bool,
    ) -> Self {
        Self {
            session,
            auth,
            timeout,
            allow_refresh,
        }
    }

    pub fn from_config(
        config: &OnboardingConfig,
        session: Arc<SessionStore>,
        auth: Arc<dyn AuthClient>,
    ) -> Self {
        Self::new(session, auth, config.guard_timeout, config.guard_refresh)
    }

    /// Decide whether `step` may be entered with `record`.
    ///
    /// Missing data short-circuits the session check. A hydrating session
    /// yields `checking`; a rejected, unrefreshable or timed-out check yields
    /// `unauthenticated`.
    pub async fn evaluate(&self, step: OnboardingStep, record: &OnboardingRecord) -> StepGuardResult {
        let missing = missing_fields(step, record);
        if !missing.is_empty() {
            debug!(step = %step, missing = ?missing, "Step blocked on missing fields");
            return StepGuardResult::missing(missing);
        }

        match self.session.phase() {
            SessionPhase::Hydrating => {
                debug!(step = %step, "Session still hydrating");
                return StepGuardResult::block(BlockReason::Checking);
            }
            SessionPhase::SignedOut => {
                debug!(step = %step, "No session");
                return StepGuardResult::block(BlockReason::Unauthenticated);
            }
            SessionPhase::Active => {}
        }

        match tokio::time::timeout(self.timeout, self.check_session()).await {
            Ok(Ok(())) => StepGuardResult::allow(),
            Ok(Err(e)) => {
                warn!(step = %step, error = %e, "Session check failed");
                StepGuardResult::block(BlockReason::Unauthenticated)
            }
            Err(_) => {
                let e = AuthError::Timeout {
                    timeout: self.timeout,
                };
                warn!(step = %step, error = %e, "Session check timed out");
                StepGuardResult::block(BlockReason::Unauthenticated)
            }
        }
    }

    /// Re-validate the token, refreshing at most once on Unauthorized.
    async fn check_session(&self) -> Result<(), Error> {
        let token = self.session.token().ok_or(AuthError::NoSession)?;
        match self.auth.get_current_user(token.expose_secret()).await {
            Ok(_) => Ok(()),
            Err(Error::Auth(AuthError::Unauthorized)) if self.allow_refresh => {
                debug!("Token rejected, attempting one refresh");
                if let Err(e) = self.auth.refresh_session().await {
                    self.auth.clear_session().await;
                    return Err(e.into());
                }
                let token = self.session.token().ok_or(AuthError::NoSession)?;
                match self.auth.get_current_user(token.expose_secret()).await {
                    Ok(_) => Ok(()),
                    Err(e) => {
                        if matches!(e, Error::Auth(_)) {
                            self.auth.clear_session().await;
                        }
                        Err(e)
                    }
                }
            }
            Err(e @ Error::Auth(_)) => {
                self.auth.clear_session().await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
