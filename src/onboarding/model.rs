//! Onboarding record and its building blocks.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

use super::state::OnboardingStep;

/// How rigorous verification must be for the selected tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationType {
    #[default]
    Informal,
    Formal,
}

impl VerificationType {
    /// FORMAL iff tier >= 3.
    pub fn for_tier(tier: u8) -> Self {
        if tier >= 3 { Self::Formal } else { Self::Informal }
    }
}

impl std::fmt::Display for VerificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Informal => write!(f, "INFORMAL"),
            Self::Formal => write!(f, "FORMAL"),
        }
    }
}

/// Independent KYC subsections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionId {
    /// Business registration documents.
    Registration,
    /// Owner identity.
    Owner,
    /// Industry classification.
    Industry,
    /// Admin users.
    Admins,
}

impl SectionId {
    pub const ALL: [SectionId; 4] = [
        SectionId::Registration,
        SectionId::Owner,
        SectionId::Industry,
        SectionId::Admins,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Owner => "owner",
            Self::Industry => "industry",
            Self::Admins => "admins",
        }
    }
}

impl std::fmt::Display for SectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SectionId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownSection {
                section: s.to_string(),
            })
    }
}

/// Kind of document or photo attached to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttachmentType {
    IdFront,
    IdBack,
    Selfie,
    RegistrationCertificate,
    ProofOfAddress,
    Logo,
}

impl std::fmt::Display for AttachmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::IdFront => "id-front",
            Self::IdBack => "id-back",
            Self::Selfie => "selfie",
            Self::RegistrationCertificate => "registration-certificate",
            Self::ProofOfAddress => "proof-of-address",
            Self::Logo => "logo",
        };
        write!(f, "{s}")
    }
}

/// An uploaded file referenced by the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(rename = "type")]
    pub attachment_type: AttachmentType,
    pub url: String,
    /// Step the file was captured on.
    pub step: OnboardingStep,
    pub uploaded_at: DateTime<Utc>,
}

impl Attachment {
    pub fn new(attachment_type: AttachmentType, url: impl Into<String>, step: OnboardingStep) -> Self {
        Self {
            attachment_type,
            url: url.into(),
            step,
            uploaded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Plan chosen on the plan step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedPlan {
    pub id: String,
    pub name: String,
    pub tier: u8,
    /// Monthly price.
    pub price: Decimal,
}

/// Everything collected during a single onboarding session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingRecord {
    pub id: Uuid,
    pub business_name: String,
    pub business_type: String,
    pub email: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<SelectedPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<u8>,
    pub verification_type: VerificationType,
    /// Raw completion flags as reported by each section's form.
    pub sections: BTreeMap<SectionId, bool>,
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promo_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trial_days: Option<u32>,
    /// Derived: every section required by `verification_type` is complete.
    pub all_sections_complete: bool,
}

impl Default for OnboardingRecord {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            business_name: String::new(),
            business_type: String::new(),
            email: String::new(),
            phone: String::new(),
            registration_number: None,
            website: None,
            address: String::new(),
            coordinates: None,
            plan: None,
            tier: None,
            verification_type: VerificationType::default(),
            sections: BTreeMap::new(),
            attachments: Vec::new(),
            promo_code: None,
            trial_days: None,
            all_sections_complete: false,
        }
    }
}

impl OnboardingRecord {
    /// Most recent attachment of the given type (last write wins).
    pub fn latest_attachment(&self, attachment_type: AttachmentType) -> Option<&Attachment> {
        self.attachments
            .iter()
            .rev()
            .find(|a| a.attachment_type == attachment_type)
    }

    pub fn has_attachment(&self, attachment_type: AttachmentType) -> bool {
        self.latest_attachment(attachment_type).is_some()
    }

    /// Raw section flag, ignoring attachment requirements.
    pub fn section_flag(&self, section: SectionId) -> bool {
        self.sections.get(&section).copied().unwrap_or(false)
    }

    /// Whether a required field carries a usable value.
    pub fn has_field(&self, field: RecordField) -> bool {
        match field {
            RecordField::BusinessName => !self.business_name.trim().is_empty(),
            RecordField::BusinessType => !self.business_type.trim().is_empty(),
            RecordField::Email => !self.email.trim().is_empty(),
            RecordField::Phone => !self.phone.trim().is_empty(),
            RecordField::Address => !self.address.trim().is_empty(),
            RecordField::Coordinates => self.coordinates.is_some(),
            RecordField::Plan => self.plan.is_some(),
            RecordField::Tier => self.tier.is_some(),
        }
    }
}

/// Record fields that steps can require before entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordField {
    BusinessName,
    BusinessType,
    Email,
    Phone,
    Address,
    Coordinates,
    Plan,
    Tier,
}

impl RecordField {
    /// Wire name, as the field appears in the serialized record.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BusinessName => "businessName",
            Self::BusinessType => "businessType",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Address => "address",
            Self::Coordinates => "coordinates",
            Self::Plan => "plan",
            Self::Tier => "tier",
        }
    }
}

impl std::fmt::Display for RecordField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partial update applied by a step's save action. `None` leaves the field
/// untouched; `Some` overwrites it. Optional record fields take a nested
/// option: `Some(None)` (JSON `null`) clears them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordPatch {
    pub business_name: Option<String>,
    pub business_type: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub registration_number: Option<Option<String>>,
    #[serde(deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub website: Option<Option<String>>,
    pub address: Option<String>,
    #[serde(deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Option<Coordinates>>,
    #[serde(deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub promo_code: Option<Option<String>>,
    #[serde(deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub trial_days: Option<Option<u32>>,
}

/// A present key always yields `Some`, so `null` survives as `Some(None)`.
fn clearable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl RecordPatch {
    /// Overlay this patch onto `record`, field by field.
    pub fn apply_to(self, record: &mut OnboardingRecord) {
        if let Some(v) = self.business_name {
            record.business_name = v;
        }
        if let Some(v) = self.business_type {
            record.business_type = v;
        }
        if let Some(v) = self.email {
            record.email = v;
        }
        if let Some(v) = self.phone {
            record.phone = v;
        }
        if let Some(v) = self.registration_number {
            record.registration_number = v;
        }
        if let Some(v) = self.website {
            record.website = v;
        }
        if let Some(v) = self.address {
            record.address = v;
        }
        if let Some(v) = self.coordinates {
            record.coordinates = v;
        }
        if let Some(v) = self.promo_code {
            record.promo_code = v;
        }
        if let Some(v) = self.trial_days {
            record.trial_days = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_type_follows_tier() {
        for tier in 1..=6u8 {
            let expected = if tier >= 3 {
                VerificationType::Formal
            } else {
                VerificationType::Informal
            };
            assert_eq!(VerificationType::for_tier(tier), expected, "tier {tier}");
        }
    }

    #[test]
    fn section_id_parses_wire_names() {
        for id in SectionId::ALL {
            assert_eq!(id.as_str().parse::<SectionId>().unwrap(), id);
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, format!("\"{id}\""));
        }
        assert!("billing".parse::<SectionId>().is_err());
    }

    #[test]
    fn latest_attachment_wins_per_type() {
        let mut record = OnboardingRecord::default();
        record.attachments.push(Attachment::new(
            AttachmentType::IdFront,
            "https://cdn.example/one.jpg",
            OnboardingStep::KycOwner,
        ));
        record.attachments.push(Attachment::new(
            AttachmentType::Selfie,
            "https://cdn.example/selfie.jpg",
            OnboardingStep::LiveCapture,
        ));
        record.attachments.push(Attachment::new(
            AttachmentType::IdFront,
            "https://cdn.example/two.jpg",
            OnboardingStep::KycOwner,
        ));

        let latest = record.latest_attachment(AttachmentType::IdFront).unwrap();
        assert_eq!(latest.url, "https://cdn.example/two.jpg");
        assert_eq!(record.attachments.len(), 3);
        assert!(!record.has_attachment(AttachmentType::IdBack));
    }

    #[test]
    fn whitespace_only_fields_count_as_missing() {
        let record = OnboardingRecord {
            business_name: "   ".to_string(),
            email: "owner@example.com".to_string(),
            ..Default::default()
        };
        assert!(!record.has_field(RecordField::BusinessName));
        assert!(record.has_field(RecordField::Email));
    }

    #[test]
    fn record_serializes_camel_case() {
        let record = OnboardingRecord {
            business_name: "Acme Bakery".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["businessName"], "Acme Bakery");
        assert_eq!(json["verificationType"], "INFORMAL");
        assert_eq!(json["allSectionsComplete"], false);
        assert!(json.get("plan").is_none());
    }

    #[test]
    fn attachment_serializes_type_key() {
        let attachment = Attachment::new(
            AttachmentType::RegistrationCertificate,
            "https://cdn.example/cert.pdf",
            OnboardingStep::KycRegistration,
        );
        let json = serde_json::to_value(&attachment).unwrap();
        assert_eq!(json["type"], "registration-certificate");
        assert_eq!(json["step"], "kyc-registration");
        assert!(json.get("uploadedAt").is_some());
    }

    #[test]
    fn patch_deserializes_partial_body() {
        let patch: RecordPatch =
            serde_json::from_str(r#"{"businessName":"Acme","phone":"+15550100"}"#).unwrap();
        assert_eq!(patch.business_name.as_deref(), Some("Acme"));
        assert_eq!(patch.phone.as_deref(), Some("+15550100"));
        assert!(patch.email.is_none());
    }

    #[test]
    fn null_in_patch_clears_optional_field() {
        let mut record = OnboardingRecord::default();
        let set: RecordPatch =
            serde_json::from_str(r#"{"website":"https://acme.test","promoCode":"SPRING"}"#)
                .unwrap();
        set.apply_to(&mut record);
        assert_eq!(record.website.as_deref(), Some("https://acme.test"));

        let clear: RecordPatch = serde_json::from_str(r#"{"website":null}"#).unwrap();
        assert_eq!(clear.website, Some(None));
        assert_eq!(clear.promo_code, None);
        clear.apply_to(&mut record);
        assert!(record.website.is_none());
        assert_eq!(record.promo_code.as_deref(), Some("SPRING"));
    }
}
