//! HTTP + JSON implementation of [`AttendanceBackend`].

use crate::backend::{
    AttendanceBackend, AttendanceSession, ClientError, EnrollmentTicket, FinalizeOutcome,
    FrameSubmission, VerifyRequest,
};
use crate::wire::{
    ErrorBody, FinalizeBody, FrameBody, SessionBody, SessionListBody, StartEnrollmentBody,
    VerifyBody,
};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use rollcall_core::VerificationResult;
use serde::de::DeserializeOwned;
use std::time::Duration;

pub struct HttpBackend {
    http_client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBackend {
    /// `base_url` is the API root, e.g. `http://localhost:5000/api`.
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder, what: &'static str) -> Result<T, ClientError> {
        let response = self.authorized(req).send().await?;
        let response = check_status(response, what).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::Decode(format!("{what}: {e}")))
    }
}

async fn check_status(response: Response, what: &'static str) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        tracing::warn!(what, "credential rejected");
        return Err(ClientError::Unauthorized);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.error.or(b.message))
        .unwrap_or_else(|| if body.is_empty() { "<no body>".into() } else { body });
    tracing::debug!(what, status = status.as_u16(), %message, "request failed");
    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl AttendanceBackend for HttpBackend {
    async fn start_enrollment(&self, num_images: u32) -> Result<EnrollmentTicket, ClientError> {
        let req = self
            .http_client
            .post(self.url("face/register/start"))
            .json(&serde_json::json!({ "numImages": num_images }));
        let body: StartEnrollmentBody = self.send(req, "start enrollment").await?;
        let ticket = body.into_ticket(num_images).map_err(ClientError::Rejected)?;
        tracing::info!(session_id = %ticket.session_id, num_images = ticket.num_images, "enrollment job opened");
        Ok(ticket)
    }

    async fn submit_enrollment_frame(&self, session_id: &str, jpeg: &[u8]) -> Result<FrameSubmission, ClientError> {
        let image = Part::bytes(jpeg.to_vec())
            .file_name("frame.jpg")
            .mime_str("image/jpeg")?;
        let form = Form::new()
            .text("sessionId", session_id.to_string())
            .part("image", image);
        let req = self.http_client.post(self.url("face/register/frame")).multipart(form);
        let body: FrameBody = self.send(req, "enrollment frame").await?;
        Ok(body.into())
    }

    async fn finalize_enrollment(&self, session_id: &str) -> Result<FinalizeOutcome, ClientError> {
        let req = self
            .http_client
            .post(self.url("face/register/complete"))
            .json(&serde_json::json!({ "sessionId": session_id }));
        let body: FinalizeBody = self.send(req, "finalize enrollment").await?;
        Ok(body.into())
    }

    async fn verify_frame(&self, request: &VerifyRequest) -> Result<VerificationResult, ClientError> {
        let req = self.http_client.post(self.url("face/verify")).json(request);
        let body: VerifyBody = self.send(req, "verify").await?;
        Ok(body.into())
    }

    async fn list_active_sessions(&self) -> Result<Vec<AttendanceSession>, ClientError> {
        let req = self.http_client.get(self.url("sessions/active"));
        let body: SessionListBody = self.send(req, "active sessions").await?;
        Ok(body.sessions)
    }

    async fn get_session(&self, id: &str) -> Result<AttendanceSession, ClientError> {
        let req = self.http_client.get(self.url(&format!("faculty/sessions/{id}")));
        let body: SessionBody = self.send(req, "get session").await?;
        body.session
            .ok_or_else(|| ClientError::Decode(format!("session {id} missing from response")))
    }

    async fn end_session(&self, id: &str) -> Result<(), ClientError> {
        let req = self.http_client.post(self.url(&format!("faculty/sessions/{id}/end")));
        let response = self.authorized(req).send().await?;
        check_status(response, "end session").await?;
        tracing::info!(session_id = id, "session ended");
        Ok(())
    }
}
