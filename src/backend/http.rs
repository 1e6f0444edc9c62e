//! REST client for the auth and onboarding endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{AuthError, Error, NetworkError, UploadError, ValidationError};
use crate::onboarding::model::OnboardingRecord;
use crate::session::{AuthClient, SessionRecord, SessionStore};

use super::{AttachmentUpload, OnboardingBackend, UploadedFile};

/// HTTP implementation of both collaborator traits.
///
/// Doubles as the auth collaborator: successful `get_current_user` and
/// `refresh_session` calls are written back to the shared [`SessionStore`].
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    session: Arc<SessionStore>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FieldErrors {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Vec<FieldError>,
}

#[derive(Debug, Deserialize)]
struct FieldError {
    field: String,
    #[serde(default)]
    message: Option<String>,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>, session: Arc<SessionStore>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn bearer(&self) -> Result<SecretString, AuthError> {
        self.session.token().ok_or(AuthError::NoSession)
    }
}

fn request_error(endpoint: &str, e: reqwest::Error) -> NetworkError {
    NetworkError::Request {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    }
}

async fn status_error(endpoint: &str, response: reqwest::Response) -> NetworkError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    NetworkError::Status {
        endpoint: endpoint.to_string(),
        status,
        body,
    }
}

#[async_trait]
impl AuthClient for HttpClient {
    async fn get_current_user(&self, token: &str) -> Result<SessionRecord, Error> {
        const ENDPOINT: &str = "/auth/me";
        let response = self
            .client
            .get(self.url(ENDPOINT))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| request_error(ENDPOINT, e))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AuthError::Unauthorized.into());
            }
            s if !s.is_success() => return Err(status_error(ENDPOINT, response).await.into()),
            _ => {}
        }

        let record: SessionRecord = response.json().await.map_err(|e| NetworkError::Decode {
            endpoint: ENDPOINT.to_string(),
            reason: e.to_string(),
        })?;
        self.session.replace_record(record.clone());
        Ok(record)
    }

    async fn refresh_session(&self) -> Result<(), AuthError> {
        const ENDPOINT: &str = "/auth/refresh";
        let refresh_token = self.session.refresh_token().ok_or_else(|| AuthError::RefreshFailed {
            reason: "no refresh token".to_string(),
        })?;

        let response = self
            .client
            .post(self.url(ENDPOINT))
            .json(&serde_json::json!({ "refreshToken": refresh_token.expose_secret() }))
            .send()
            .await
            .map_err(|e| AuthError::RefreshFailed {
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(AuthError::RefreshFailed {
                reason: format!("HTTP {}", response.status().as_u16()),
            });
        }

        let body: RefreshResponse = response.json().await.map_err(|e| AuthError::RefreshFailed {
            reason: e.to_string(),
        })?;
        self.session.set_tokens(
            SecretString::from(body.token),
            body.refresh_token.map(SecretString::from),
        );
        info!("Session refreshed");
        Ok(())
    }

    async fn clear_session(&self) {
        self.session.clear();
    }
}

#[async_trait]
impl OnboardingBackend for HttpClient {
    async fn submit_onboarding(&self, record: &OnboardingRecord) -> Result<(), Error> {
        const ENDPOINT: &str = "/businesses/onboarding";
        let token = self.bearer()?;
        let response = self
            .client
            .post(self.url(ENDPOINT))
            .bearer_auth(token.expose_secret())
            .json(record)
            .send()
            .await
            .map_err(|e| request_error(ENDPOINT, e))?;

        match response.status() {
            s if s.is_success() => {
                info!(record_id = %record.id, "Onboarding submitted");
                Ok(())
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AuthError::Unauthorized.into()),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                let body: FieldErrors = response.json().await.unwrap_or_default();
                let fields: Vec<String> = body.errors.iter().map(|e| e.field.clone()).collect();
                let message = body
                    .message
                    .or_else(|| body.errors.iter().find_map(|e| e.message.clone()))
                    .unwrap_or_else(|| "validation failed".to_string());
                warn!(record_id = %record.id, fields = ?fields, "Submission rejected");
                Err(ValidationError::Rejected { fields, message }.into())
            }
            _ => Err(status_error(ENDPOINT, response).await.into()),
        }
    }

    async fn upload_attachment(&self, upload: AttachmentUpload) -> Result<UploadedFile, UploadError> {
        const ENDPOINT: &str = "/uploads";
        let attachment_type = upload.attachment_type.to_string();
        let failed = |reason: String| UploadError::Failed {
            attachment_type: attachment_type.clone(),
            reason,
        };

        if upload.bytes.is_empty() {
            return Err(UploadError::EmptyFile {
                attachment_type: attachment_type.clone(),
            });
        }

        let token = self.bearer().map_err(|e| failed(e.to_string()))?;
        let part = Part::bytes(upload.bytes)
            .file_name(upload.file_name)
            .mime_str(&upload.content_type)
            .map_err(|e| failed(e.to_string()))?;
        let form = Form::new()
            .text("type", attachment_type.clone())
            .text("step", upload.step.to_string())
            .part("file", part);

        debug!(attachment_type = %attachment_type, "Uploading attachment");
        let response = self
            .client
            .post(self.url(ENDPOINT))
            .bearer_auth(token.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let reason = response.text().await.unwrap_or_default();
            return Err(UploadError::Rejected {
                attachment_type,
                reason: format!("HTTP {}: {reason}", status.as_u16()),
            });
        }
        if !status.is_success() {
            return Err(failed(format!("HTTP {}", status.as_u16())));
        }

        response
            .json::<UploadedFile>()
            .await
            .map_err(|e| failed(e.to_string()))
    }
}
