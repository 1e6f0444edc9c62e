//! Onboarding store — the single owner of the record for one workflow session.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::error::ValidationError;

use super::model::{Attachment, OnboardingRecord, RecordPatch, SectionId};
use super::plans::TierSelection;
use super::sections;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9][0-9 ()\-]{5,19}$").unwrap());

/// Holds accumulated registration data and section flags.
///
/// Every mutation recomputes `all_sections_complete` before returning.
#[derive(Debug, Default)]
pub struct OnboardingStore {
    record: OnboardingRecord,
}

impl OnboardingStore {
    /// Start an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> &OnboardingRecord {
        &self.record
    }

    /// Overlay `patch` field by field, last write wins.
    ///
    /// Non-empty `email` and `phone` values are format-checked first; a
    /// malformed value rejects the whole patch and leaves the record as-is.
    pub fn merge(&mut self, patch: RecordPatch) -> Result<&OnboardingRecord, ValidationError> {
        validate_patch(&patch)?;
        patch.apply_to(&mut self.record);
        self.recompute();
        debug!(record_id = %self.record.id, "Merged onboarding patch");
        Ok(&self.record)
    }

    /// Record the chosen plan's tier and rigor. Never clears section flags.
    pub fn apply_tier(&mut self, selection: &TierSelection) -> &OnboardingRecord {
        let previous = self.record.verification_type;
        self.record.tier = Some(selection.tier_number);
        self.record.verification_type = selection.verification_type;
        self.record.plan = Some(selection.plan.clone());
        if self.record.trial_days.is_none() && selection.trial_days > 0 {
            self.record.trial_days = Some(selection.trial_days);
        }
        self.recompute();

        info!(
            record_id = %self.record.id,
            tier = selection.tier_number,
            from = %previous,
            to = %selection.verification_type,
            "Plan selected"
        );
        &self.record
    }

    pub fn set_section_complete(&mut self, section: SectionId, done: bool) -> &OnboardingRecord {
        self.record.sections.insert(section, done);
        self.recompute();
        debug!(
            record_id = %self.record.id,
            section = %section,
            done,
            effective = sections::is_section_complete(&self.record, section),
            "Section flag updated"
        );
        &self.record
    }

    /// Append an attachment. Earlier entries of the same type are kept but
    /// shadowed.
    pub fn add_attachment(&mut self, attachment: Attachment) -> &OnboardingRecord {
        debug!(
            record_id = %self.record.id,
            attachment_type = %attachment.attachment_type,
            step = %attachment.step,
            "Attachment added"
        );
        self.record.attachments.push(attachment);
        self.recompute();
        &self.record
    }

    pub fn is_section_complete(&self, section: SectionId) -> bool {
        sections::is_section_complete(&self.record, section)
    }

    /// Discard everything and start a fresh session.
    pub fn reset(&mut self) {
        info!(record_id = %self.record.id, "Onboarding record discarded");
        self.record = OnboardingRecord::default();
    }

    fn recompute(&mut self) {
        self.record.all_sections_complete = sections::all_sections_complete(&self.record);
    }
}

fn validate_patch(patch: &RecordPatch) -> Result<(), ValidationError> {
    if let Some(email) = patch.email.as_deref().map(str::trim)
        && !email.is_empty()
        && !EMAIL_RE.is_match(email)
    {
        return Err(ValidationError::Malformed {
            field: "email".to_string(),
            message: format!("'{email}' is not an email address"),
        });
    }
    if let Some(phone) = patch.phone.as_deref().map(str::trim)
        && !phone.is_empty()
        && !PHONE_RE.is_match(phone)
    {
        return Err(ValidationError::Malformed {
            field: "phone".to_string(),
            message: format!("'{phone}' is not a phone number"),
        });
    }
    if let Some(Some(days)) = patch.trial_days
        && days > 365
    {
        return Err(ValidationError::Malformed {
            field: "trialDays".to_string(),
            message: format!("{days} exceeds one year"),
        });
    }
    Ok(())
}
