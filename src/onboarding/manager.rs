//! OnboardingManager — coordinates the store, guard, sequencer, submission
//! and verification polling for one onboarding session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::backend::{AttachmentUpload, OnboardingBackend};
use crate::config::OnboardingConfig;
use crate::error::{AuthError, Error, ValidationError};
use crate::session::{AuthClient, SessionStore, VerificationStatus};
use crate::verification::{
    PollResult, PollState, PollerHandle, VerificationEvent, VerificationPoller,
};

use super::guard::{BlockReason, GuardEvaluator, StepGuardResult, missing_fields};
use super::model::{Attachment, OnboardingRecord, RecordPatch, SectionId, VerificationType};
use super::plans::{TierSelection, select_plan, verification_type_for_tier};
use super::sections::{self, SectionProgress};
use super::state::OnboardingStep;
use super::store::OnboardingStore;

/// Coordinates one onboarding session end to end.
pub struct OnboardingManager {
    store: Arc<RwLock<OnboardingStore>>,
    session: Arc<SessionStore>,
    backend: Arc<dyn OnboardingBackend>,
    guard: GuardEvaluator,
    poller: VerificationPoller,
    step: Arc<watch::Sender<OnboardingStep>>,
    submitted: Arc<AtomicBool>,
    watch: Mutex<Option<PollerHandle>>,
}

impl OnboardingManager {
    pub fn new(
        config: &OnboardingConfig,
        session: Arc<SessionStore>,
        auth: Arc<dyn AuthClient>,
        backend: Arc<dyn OnboardingBackend>,
    ) -> Self {
        let (step, _) = watch::channel(OnboardingStep::default());
        Self {
            store: Arc::new(RwLock::new(OnboardingStore::new())),
            guard: GuardEvaluator::from_config(config, Arc::clone(&session), Arc::clone(&auth)),
            poller: VerificationPoller::from_config(config, auth, Arc::clone(&session)),
            session,
            backend,
            step: Arc::new(step),
            submitted: Arc::new(AtomicBool::new(false)),
            watch: Mutex::new(None),
        }
    }

    /// Snapshot of the record.
    pub fn record(&self) -> OnboardingRecord {
        self.read_store(|s| s.get().clone())
    }

    pub fn current_step(&self) -> OnboardingStep {
        *self.step.borrow()
    }

    /// Observe routing decisions, including the automatic move to the
    /// dashboard on approval.
    pub fn subscribe_steps(&self) -> watch::Receiver<OnboardingStep> {
        self.step.subscribe()
    }

    pub fn merge(&self, patch: RecordPatch) -> Result<OnboardingRecord, ValidationError> {
        self.write_store(|s| s.merge(patch).cloned())
    }

    /// Apply a plan choice to the record and to the session's business.
    pub fn select_plan(&self, plan_id: &str) -> Result<TierSelection, ValidationError> {
        let selection = select_plan(plan_id)?;
        self.write_store(|s| {
            s.apply_tier(&selection);
        });
        if !self
            .session
            .set_business_plan(selection.tier_number, &selection.plan.id)
        {
            warn!(plan = %selection.plan.id, "No business on session; plan kept locally only");
        }
        Ok(selection)
    }

    /// Seed the record with the tier and plan a returning business already
    /// chose, as cached on the session. A record that already has a tier
    /// is left alone.
    pub fn restore_plan(&self) -> Result<Option<TierSelection>, ValidationError> {
        let Some(business) = self.session.record().and_then(|r| r.business) else {
            return Ok(None);
        };
        let (Some(tier), Some(plan_id)) = (business.tier, business.plan) else {
            return Ok(None);
        };
        verification_type_for_tier(tier)?;
        let selection = select_plan(&plan_id)?;
        if selection.tier_number != tier {
            return Err(ValidationError::Malformed {
                field: "tier".to_string(),
                message: format!("tier {tier} does not match plan {plan_id}"),
            });
        }
        let applied = self.write_store(|s| {
            if s.get().tier.is_some() {
                return false;
            }
            s.apply_tier(&selection);
            true
        });
        if applied {
            info!(plan = %selection.plan.id, tier, "Plan restored from session");
        }
        Ok(Some(selection))
    }

    pub fn set_section_complete(&self, section: SectionId, done: bool) -> OnboardingRecord {
        self.write_store(|s| s.set_section_complete(section, done).clone())
    }

    pub fn add_attachment(&self, attachment: Attachment) -> OnboardingRecord {
        self.write_store(|s| s.add_attachment(attachment).clone())
    }

    /// Upload a captured file and attach it. On failure the record is left
    /// untouched, so the dependent section stays incomplete.
    pub async fn upload_attachment(&self, upload: AttachmentUpload) -> Result<Attachment, Error> {
        let attachment_type = upload.attachment_type;
        let step = upload.step;
        let uploaded = match self.backend.upload_attachment(upload).await {
            Ok(uploaded) => uploaded,
            Err(e) => {
                warn!(attachment_type = %attachment_type, error = %e, "Attachment upload failed");
                return Err(e.into());
            }
        };
        let attachment = Attachment::new(attachment_type, uploaded.url, step);
        self.add_attachment(attachment.clone());
        Ok(attachment)
    }

    pub fn sections(&self) -> Vec<SectionProgress> {
        self.read_store(|s| sections::progress(s.get()))
    }

    /// Guard check without moving.
    ///
    /// `pending` and `dashboard` are gated on the workflow itself before the
    /// data and session checks run.
    pub async fn evaluate_step(&self, step: OnboardingStep) -> StepGuardResult {
        if let Some(reason) = self.lifecycle_block(step).await {
            debug!(step = %step, reason = %reason, "Step not reachable yet");
            return StepGuardResult::block(reason);
        }
        let record = self.record();
        self.guard.evaluate(step, &record).await
    }

    /// Enter `step` if its guard allows it.
    pub async fn enter_step(&self, step: OnboardingStep) -> StepGuardResult {
        let result = self.evaluate_step(step).await;
        if result.allowed {
            self.route(step);
        }
        result
    }

    /// Mark the current step done and move to whatever the sequencer picks,
    /// provided the guard lets the user in there.
    pub async fn complete_step(&self, step: OnboardingStep) -> Result<OnboardingStep, Error> {
        let current = self.current_step();
        if step != current {
            return Err(ValidationError::StepBlocked {
                step: step.to_string(),
                reason: format!("current step is {current}"),
            }
            .into());
        }

        let record = self.record();
        let next = step.next(&record);
        if next == step {
            info!(step = %step, all_sections_complete = record.all_sections_complete, "Step cannot advance yet");
            return Ok(step);
        }

        let guard = self.evaluate_step(next).await;
        if !guard.allowed {
            info!(step = %step, next = %next, reason = ?guard.reason, "Next step refused");
            return Err(blocked(next, guard));
        }
        self.route(next);
        Ok(next)
    }

    /// Submit the application and start watching for approval.
    pub async fn submit(&self) -> Result<(), Error> {
        let record = self.record();
        let missing = missing_fields(OnboardingStep::Review, &record);
        if !missing.is_empty() {
            return Err(ValidationError::MissingFields { fields: missing }.into());
        }
        if record.verification_type == VerificationType::Formal && !record.all_sections_complete {
            return Err(ValidationError::StepBlocked {
                step: OnboardingStep::Review.to_string(),
                reason: "KYC sections incomplete".to_string(),
            }
            .into());
        }

        self.backend.submit_onboarding(&record).await?;
        self.submitted.store(true, Ordering::SeqCst);
        info!(record_id = %record.id, tier = ?record.tier, "Application submitted");

        self.route(OnboardingStep::Pending);
        self.watch_verification().await;
        Ok(())
    }

    /// Start the verification poller if it is not already running.
    pub async fn watch_verification(&self) {
        let mut slot = self.watch.lock().await;
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let store = Arc::clone(&self.store);
        let step = Arc::clone(&self.step);
        let on_approved = move |result: &PollResult| {
            store
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .reset();
            info!(status = %result.status, "Routing to dashboard");
            step.send_replace(OnboardingStep::Dashboard);
        };

        // A rejected application is finished too; a new one starts from scratch.
        let store = Arc::clone(&self.store);
        let submitted = Arc::clone(&self.submitted);
        let on_rejected = move |result: &PollResult| {
            store
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .reset();
            submitted.store(false, Ordering::SeqCst);
            info!(status = %result.status, "Application rejected; record discarded");
        };

        *slot = Some(self.poller.start_with(on_approved, on_rejected));
    }

    /// Poll right now. Returns `false` if nothing is watching.
    pub async fn refresh_verification(&self) -> bool {
        self.watch
            .lock()
            .await
            .as_ref()
            .is_some_and(PollerHandle::refresh_now)
    }

    pub async fn verification_state(&self) -> PollState {
        self.watch
            .lock()
            .await
            .as_ref()
            .map(PollerHandle::state)
            .unwrap_or(PollState::Idle)
    }

    pub async fn subscribe_verification(
        &self,
    ) -> Option<tokio::sync::broadcast::Receiver<VerificationEvent>> {
        self.watch.lock().await.as_ref().map(PollerHandle::subscribe)
    }

    pub async fn stop_verification(&self) {
        if let Some(handle) = self.watch.lock().await.take() {
            handle.stop().await;
        }
    }

    /// Give up on this registration: stop watching and discard the record.
    pub async fn abandon(&self) {
        self.stop_verification().await;
        self.write_store(|s| s.reset());
        self.submitted.store(false, Ordering::SeqCst);
        self.route(OnboardingStep::BusinessInfo);
        info!("Onboarding abandoned");
    }

    pub async fn status(&self) -> OnboardingStatus {
        let record = self.record();
        OnboardingStatus {
            step: self.current_step(),
            record_id: record.id.to_string(),
            tier: record.tier,
            verification_type: record.verification_type,
            all_sections_complete: record.all_sections_complete,
            sections: sections::progress(&record),
            verification: self.verification_state().await,
            verification_status: self.session.verification_status(),
        }
    }

    async fn lifecycle_block(&self, step: OnboardingStep) -> Option<BlockReason> {
        match step {
            OnboardingStep::Dashboard
                if self.verification_state().await != PollState::TerminalApproved =>
            {
                Some(BlockReason::AwaitingApproval)
            }
            OnboardingStep::Pending if !self.submitted.load(Ordering::SeqCst) => {
                // A session that already reports pending resumes a prior submission.
                let resumed = self
                    .session
                    .verification_status()
                    .is_some_and(|s| VerificationStatus::parse(&s) == VerificationStatus::Pending);
                (!resumed).then_some(BlockReason::NotSubmitted)
            }
            _ => None,
        }
    }

    fn route(&self, step: OnboardingStep) {
        let previous = self.step.send_replace(step);
        if previous != step {
            info!(from = %previous, to = %step, "Onboarding step changed");
        }
    }

    fn read_store<T>(&self, f: impl FnOnce(&OnboardingStore) -> T) -> T {
        let guard = self.store.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write_store<T>(&self, f: impl FnOnce(&mut OnboardingStore) -> T) -> T {
        let mut guard = self.store.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

/// Error for a completion whose next step was refused by the guard.
fn blocked(next: OnboardingStep, guard: StepGuardResult) -> Error {
    match guard.reason {
        Some(BlockReason::MissingFields) => ValidationError::MissingFields {
            fields: guard.missing_fields,
        }
        .into(),
        Some(BlockReason::Unauthenticated) => AuthError::Unauthorized.into(),
        reason => ValidationError::StepBlocked {
            step: next.to_string(),
            reason: reason.map_or_else(|| "blocked".to_string(), |r| r.to_string()),
        }
        .into(),
    }
}

/// Onboarding status returned by the REST endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingStatus {
    pub step: OnboardingStep,
    pub record_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<u8>,
    pub verification_type: VerificationType,
    pub all_sections_complete: bool,
    pub sections: Vec<SectionProgress>,
    pub verification: PollState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_status: Option<String>,
}
