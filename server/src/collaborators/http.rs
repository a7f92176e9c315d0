//! REST Backend
//!
//! Calls the domain services over JSON/HTTP at `BACKEND_URL`. Per-action
//! deadlines are enforced by the dispatcher; the client timeout here is only
//! a hard upper bound.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    AnswerService, CaseDirectory, CaseRecord, CollaboratorError, CollaboratorResult,
    ComplaintIntake, ComplaintReceipt, IntentRequest, IntentService, NewComplaint, Notifier,
    Session, SessionDirectory, VerificationService,
};

#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest<'a> {
    channel: &'a str,
    channel_user_id: &'a str,
}

#[derive(Deserialize)]
struct IntentResponse {
    #[serde(default)]
    replies: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnswerRequest<'a> {
    session_id: Uuid,
    question: &'a str,
}

#[derive(Deserialize)]
struct AnswerResponse {
    #[serde(default)]
    answer: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CodeRequest<'a> {
    case_number: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
}

#[derive(Deserialize)]
struct CodeResponse {
    code: String,
}

#[derive(Deserialize)]
struct ValidationResponse {
    valid: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationRequest<'a> {
    email: &'a str,
    case_number: &'a str,
    code: &'a str,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> CollaboratorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(CollaboratorError::from)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> CollaboratorResult<R>
    where
        B: Serialize + Sync,
        R: for<'de> Deserialize<'de>,
    {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        let response = check_status(response).await?;
        Ok(response.json::<R>().await?)
    }
}

async fn check_status(response: reqwest::Response) -> CollaboratorResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message: String = response
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(200)
        .collect();

    if status == StatusCode::UNPROCESSABLE_ENTITY || status == StatusCode::BAD_REQUEST {
        return Err(CollaboratorError::Rejected(message));
    }
    Err(CollaboratorError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl SessionDirectory for HttpBackend {
    async fn get_or_create(
        &self,
        channel: &str,
        channel_user_id: &str,
    ) -> CollaboratorResult<Session> {
        self.post_json(
            "/sessions",
            &SessionRequest {
                channel,
                channel_user_id,
            },
        )
        .await
    }
}

#[async_trait]
impl IntentService for HttpBackend {
    async fn detect_intent(&self, request: &IntentRequest) -> CollaboratorResult<Vec<String>> {
        let response: IntentResponse = self.post_json("/intents", request).await?;
        Ok(response.replies)
    }
}

#[async_trait]
impl CaseDirectory for HttpBackend {
    async fn find_case(&self, number: &str) -> CollaboratorResult<Option<CaseRecord>> {
        let response = self
            .client
            .get(self.url("/cases"))
            .query(&[("number", number)])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        Ok(Some(response.json::<CaseRecord>().await?))
    }
}

#[async_trait]
impl ComplaintIntake for HttpBackend {
    async fn create_complaint(
        &self,
        complaint: NewComplaint,
    ) -> CollaboratorResult<ComplaintReceipt> {
        self.post_json("/complaints", &complaint).await
    }
}

#[async_trait]
impl AnswerService for HttpBackend {
    async fn answer(&self, session_id: Uuid, question: &str) -> CollaboratorResult<Option<String>> {
        let response: AnswerResponse = self
            .post_json(
                "/answers",
                &AnswerRequest {
                    session_id,
                    question,
                },
            )
            .await?;
        Ok(response.answer.filter(|a| !a.trim().is_empty()))
    }
}

#[async_trait]
impl VerificationService for HttpBackend {
    async fn issue_code(&self, case_number: &str) -> CollaboratorResult<String> {
        let response: CodeResponse = self
            .post_json(
                "/verification/codes",
                &CodeRequest {
                    case_number,
                    code: None,
                },
            )
            .await?;
        Ok(response.code)
    }

    async fn validate_code(&self, case_number: &str, code: &str) -> CollaboratorResult<bool> {
        let response: ValidationResponse = self
            .post_json(
                "/verification/validate",
                &CodeRequest {
                    case_number,
                    code: Some(code),
                },
            )
            .await?;
        Ok(response.valid)
    }
}

#[async_trait]
impl Notifier for HttpBackend {
    async fn send_verification_code(
        &self,
        email: &str,
        case_number: &str,
        code: &str,
    ) -> CollaboratorResult<()> {
        let response = self
            .client
            .post(self.url("/notifications/verification-code"))
            .json(&NotificationRequest {
                email,
                case_number,
                code,
            })
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}
