//! Onboarding steps and the sequencer that moves between them.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

use super::model::{OnboardingRecord, SectionId};

/// The screens of the onboarding workflow.
///
/// Progresses: BusinessInfo → Location → Plan → (Kyc hub, tier >= 3) →
/// LiveCapture → Review → Pending → Dashboard. The four `Kyc*` section steps
/// are entered from the hub in any order and always return to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OnboardingStep {
    #[default]
    BusinessInfo,
    Location,
    Plan,
    Kyc,
    KycRegistration,
    KycOwner,
    KycIndustry,
    KycAdmins,
    LiveCapture,
    Review,
    Pending,
    Dashboard,
}

impl OnboardingStep {
    pub const ALL: [OnboardingStep; 12] = [
        OnboardingStep::BusinessInfo,
        OnboardingStep::Location,
        OnboardingStep::Plan,
        OnboardingStep::Kyc,
        OnboardingStep::KycRegistration,
        OnboardingStep::KycOwner,
        OnboardingStep::KycIndustry,
        OnboardingStep::KycAdmins,
        OnboardingStep::LiveCapture,
        OnboardingStep::Review,
        OnboardingStep::Pending,
        OnboardingStep::Dashboard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BusinessInfo => "business-info",
            Self::Location => "location",
            Self::Plan => "plan",
            Self::Kyc => "kyc",
            Self::KycRegistration => "kyc-registration",
            Self::KycOwner => "kyc-owner",
            Self::KycIndustry => "kyc-industry",
            Self::KycAdmins => "kyc-admins",
            Self::LiveCapture => "live-capture",
            Self::Review => "review",
            Self::Pending => "pending",
            Self::Dashboard => "dashboard",
        }
    }

    /// The KYC section this step edits, if it is one of the hub's children.
    pub fn section(&self) -> Option<SectionId> {
        match self {
            Self::KycRegistration => Some(SectionId::Registration),
            Self::KycOwner => Some(SectionId::Owner),
            Self::KycIndustry => Some(SectionId::Industry),
            Self::KycAdmins => Some(SectionId::Admins),
            _ => None,
        }
    }

    /// Step that edits the given section.
    pub fn for_section(section: SectionId) -> Self {
        match section {
            SectionId::Registration => Self::KycRegistration,
            SectionId::Owner => Self::KycOwner,
            SectionId::Industry => Self::KycIndustry,
            SectionId::Admins => Self::KycAdmins,
        }
    }

    /// Whether this step is the protected area reached after approval.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Dashboard)
    }

    /// Step to move to once `self` is completed.
    ///
    /// Deterministic in the record: the plan step branches on tier, the KYC
    /// hub only lets go once every required section is complete, and steps
    /// that cannot advance yet return `self`.
    pub fn next(&self, record: &OnboardingRecord) -> OnboardingStep {
        use OnboardingStep::*;
        match self {
            BusinessInfo => Location,
            Location => Plan,
            Plan => match record.tier {
                Some(tier) if tier >= 3 => Kyc,
                Some(_) => LiveCapture,
                None => Plan,
            },
            Kyc => {
                if record.all_sections_complete {
                    LiveCapture
                } else {
                    Kyc
                }
            }
            KycRegistration | KycOwner | KycIndustry | KycAdmins => Kyc,
            LiveCapture => Review,
            // Review only advances through submission.
            Review => Review,
            Pending => Pending,
            Dashboard => Dashboard,
        }
    }
}

impl std::fmt::Display for OnboardingStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OnboardingStep {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownStep {
                step: s.to_string(),
            })
    }
}
