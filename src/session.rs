//! Session state owned by the authentication collaborator.
//!
//! The onboarding workflow reads the session to validate step entry and to
//! observe `verificationStatus`; it writes only the business tier and plan.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AuthError, Error};

/// Signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Business attached to the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessSession {
    #[serde(default)]
    pub id: Option<String>,
    /// Backend-authoritative approval state. Never written by this crate.
    #[serde(default)]
    pub verification_status: String,
    #[serde(default)]
    pub tier: Option<u8>,
    #[serde(default)]
    pub plan: Option<String>,
}

/// What `getCurrentUser` returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub user: SessionUser,
    #[serde(default)]
    pub business: Option<BusinessSession>,
}

impl SessionRecord {
    pub fn verification_status(&self) -> Option<&str> {
        self.business
            .as_ref()
            .map(|b| b.verification_status.as_str())
            .filter(|s| !s.is_empty())
    }
}

/// Normalized verification status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Unverified,
    Pending,
    /// `approved`, `active` and `verified` all land here.
    Approved,
    Rejected,
    Unknown(String),
}

impl VerificationStatus {
    /// Case-insensitive classification of a backend status string.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "approved" | "active" | "verified" => Self::Approved,
            "rejected" => Self::Rejected,
            "pending" => Self::Pending,
            "unverified" | "" => Self::Unverified,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

/// Where the session subsystem is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Persisted credentials are still being loaded.
    Hydrating,
    SignedOut,
    Active,
}

#[derive(Debug)]
struct SessionState {
    phase: SessionPhase,
    token: Option<SecretString>,
    refresh_token: Option<SecretString>,
    record: Option<SessionRecord>,
}

/// Shared, read-mostly session holder.
#[derive(Debug)]
pub struct SessionStore {
    state: RwLock<SessionState>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// New store in the `Hydrating` phase.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SessionState {
                phase: SessionPhase::Hydrating,
                token: None,
                refresh_token: None,
                record: None,
            }),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.read(|s| s.phase)
    }

    pub fn token(&self) -> Option<SecretString> {
        self.read(|s| s.token.as_ref().map(clone_secret))
    }

    pub fn refresh_token(&self) -> Option<SecretString> {
        self.read(|s| s.refresh_token.as_ref().map(clone_secret))
    }

    pub fn record(&self) -> Option<SessionRecord> {
        self.read(|s| s.record.clone())
    }

    pub fn verification_status(&self) -> Option<String> {
        self.read(|s| {
            s.record
                .as_ref()
                .and_then(|r| r.verification_status())
                .map(str::to_string)
        })
    }

    /// Finish hydration with a signed-in session.
    pub fn sign_in(
        &self,
        token: SecretString,
        refresh_token: Option<SecretString>,
        record: Option<SessionRecord>,
    ) {
        self.write(|s| {
            s.phase = SessionPhase::Active;
            s.token = Some(token);
            s.refresh_token = refresh_token;
            s.record = record;
        });
        info!("Session active");
    }

    /// Finish hydration without credentials.
    pub fn mark_signed_out(&self) {
        self.clear();
    }

    /// Rotate tokens after a successful refresh.
    pub fn set_tokens(&self, token: SecretString, refresh_token: Option<SecretString>) {
        self.write(|s| {
            s.token = Some(token);
            if refresh_token.is_some() {
                s.refresh_token = refresh_token;
            }
        });
        debug!("Session tokens rotated");
    }

    /// Replace the cached record with a fresh one from the backend, keeping
    /// the tier and plan this workflow wrote if the backend has none yet.
    pub fn replace_record(&self, mut record: SessionRecord) {
        self.write(|s| {
            if let (Some(fresh), Some(old)) = (
                record.business.as_mut(),
                s.record.as_ref().and_then(|r| r.business.as_ref()),
            ) {
                if fresh.tier.is_none() {
                    fresh.tier = old.tier;
                }
                if fresh.plan.is_none() {
                    fresh.plan = old.plan.clone();
                }
            }
            s.record = Some(record);
        });
    }

    /// Write the workflow-owned tier/plan sub-fields. Returns `false` when
    /// there is no business record to write into.
    pub fn set_business_plan(&self, tier: u8, plan: &str) -> bool {
        self.write(|s| match s.record.as_mut().and_then(|r| r.business.as_mut()) {
            Some(business) => {
                business.tier = Some(tier);
                business.plan = Some(plan.to_string());
                true
            }
            None => false,
        })
    }

    /// Drop all credentials.
    pub fn clear(&self) {
        self.write(|s| {
            s.phase = SessionPhase::SignedOut;
            s.token = None;
            s.refresh_token = None;
            s.record = None;
        });
        info!("Session cleared");
    }

    fn read<T>(&self, f: impl FnOnce(&SessionState) -> T) -> T {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<T>(&self, f: impl FnOnce(&mut SessionState) -> T) -> T {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

fn clone_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_owned())
}

/// Operations the authentication collaborator provides.
#[async_trait]
pub trait AuthClient: Send + Sync {
    /// Re-validate `token` and return the current session. Fails with
    /// `AuthError::Unauthorized` when the token is rejected.
    async fn get_current_user(&self, token: &str) -> Result<SessionRecord, Error>;

    /// Exchange the refresh token for a new access token.
    async fn refresh_session(&self) -> Result<(), AuthError>;

    /// Forget the current session.
    async fn clear_session(&self);
}
