//! Remote collaborators the workflow submits to.

pub mod http;

use async_trait::async_trait;

use crate::error::{Error, UploadError};
use crate::onboarding::model::{AttachmentType, OnboardingRecord};
use crate::onboarding::state::OnboardingStep;

pub use http::HttpClient;

/// A captured file waiting to be sent to the media host.
#[derive(Debug, Clone)]
pub struct AttachmentUpload {
    pub attachment_type: AttachmentType,
    pub step: OnboardingStep,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Where the media host put the file.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct UploadedFile {
    pub url: String,
}

/// Backend operations for submitting an application.
#[async_trait]
pub trait OnboardingBackend: Send + Sync {
    /// Submit the finished record. Fails with a validation error when the
    /// server rejects fields, or a network error otherwise.
    async fn submit_onboarding(&self, record: &OnboardingRecord) -> Result<(), Error>;

    async fn upload_attachment(&self, upload: AttachmentUpload) -> Result<UploadedFile, UploadError>;
}
