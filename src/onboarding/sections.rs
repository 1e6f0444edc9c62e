//! Section completion tracking.
//!
//! A section counts as complete only when its form flag is set AND every
//! attachment the current verification type demands for it is present. The
//! raw flags are never cleared by a plan change; effective completeness is
//! re-derived against whichever verification type is active.

use serde::Serialize;

use super::model::{AttachmentType, OnboardingRecord, SectionId, VerificationType};

/// Sections that must be complete before the application can move on.
pub fn required_sections(verification_type: VerificationType) -> &'static [SectionId] {
    match verification_type {
        VerificationType::Formal => &SectionId::ALL,
        VerificationType::Informal => &[SectionId::Owner],
    }
}

/// Attachments a section needs under the given verification type.
///
/// INFORMAL requirements are always a subset of FORMAL ones, so a section
/// that satisfied FORMAL stays satisfied after a downgrade.
pub fn required_attachments(
    section: SectionId,
    verification_type: VerificationType,
) -> &'static [AttachmentType] {
    match (section, verification_type) {
        (SectionId::Owner, VerificationType::Informal) => &[AttachmentType::IdFront],
        (SectionId::Owner, VerificationType::Formal) => {
            &[AttachmentType::IdFront, AttachmentType::Selfie]
        }
        (SectionId::Registration, VerificationType::Formal) => {
            &[AttachmentType::RegistrationCertificate]
        }
        _ => &[],
    }
}

/// Required attachments not yet uploaded for `section`.
pub fn missing_attachments(record: &OnboardingRecord, section: SectionId) -> Vec<AttachmentType> {
    required_attachments(section, record.verification_type)
        .iter()
        .copied()
        .filter(|t| !record.has_attachment(*t))
        .collect()
}

/// Effective completeness of one section.
pub fn is_section_complete(record: &OnboardingRecord, section: SectionId) -> bool {
    record.section_flag(section) && missing_attachments(record, section).is_empty()
}

/// AND over the sections required by the record's verification type.
pub fn all_sections_complete(record: &OnboardingRecord) -> bool {
    required_sections(record.verification_type)
        .iter()
        .all(|s| is_section_complete(record, *s))
}

/// Per-section view for status screens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionProgress {
    pub section: SectionId,
    pub required: bool,
    pub flagged: bool,
    pub complete: bool,
    pub missing_attachments: Vec<AttachmentType>,
}

/// Progress of every section, in hub order.
pub fn progress(record: &OnboardingRecord) -> Vec<SectionProgress> {
    let required = required_sections(record.verification_type);
    SectionId::ALL
        .into_iter()
        .map(|section| {
            let missing = missing_attachments(record, section);
            let flagged = record.section_flag(section);
            SectionProgress {
                section,
                required: required.contains(&section),
                flagged,
                complete: flagged && missing.is_empty(),
                missing_attachments: missing,
            }
        })
        .collect()
}
