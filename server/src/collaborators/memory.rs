//! In-Memory Backend
//!
//! Development and test stand-in for the domain services. Seeded cases and
//! canned answers, 6-digit verification codes with a TTL, and a record of
//! every notification "sent". Individual services can be switched off to
//! exercise failure paths.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use rand::Rng;
use uuid::Uuid;

use super::{
    AnswerService, CaseDirectory, CaseRecord, CollaboratorError, CollaboratorResult,
    ComplaintIntake, ComplaintReceipt, IntentRequest, IntentService, NewComplaint, Notifier,
    Session, SessionDirectory, VerificationService,
};

/// Verification code lifetime.
const CODE_TTL: Duration = Duration::from_secs(10 * 60);

/// A notification captured instead of delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCode {
    pub email: String,
    pub case_number: String,
    pub code: String,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    sessions: DashMap<(String, String), Session>,
    cases: DashMap<String, CaseRecord>,
    complaints: Mutex<Vec<NewComplaint>>,
    next_complaint_id: AtomicI64,
    answers: DashMap<String, String>,
    codes: DashMap<String, (String, Instant)>,
    sent: Mutex<Vec<SentCode>>,
    greetings: Mutex<Vec<String>>,
    intents: Mutex<Vec<IntentRequest>>,
    down: DashSet<&'static str>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_complaint_id: AtomicI64::new(1),
            ..Self::default()
        }
    }

    /// Add (or replace) a case.
    #[must_use]
    pub fn with_case(self, number: &str, status: &str, email: Option<&str>) -> Self {
        self.cases.insert(
            number.to_string(),
            CaseRecord {
                number: number.to_string(),
                status: status.to_string(),
                email: email.map(str::to_string),
            },
        );
        self
    }

    /// Answer returned for questions containing `keyword` (case-insensitive).
    #[must_use]
    pub fn with_answer(self, keyword: &str, answer: &str) -> Self {
        self.answers
            .insert(keyword.to_lowercase(), answer.to_string());
        self
    }

    /// Reply the agent sends for every inbound message, before fulfillment.
    #[must_use]
    pub fn with_agent_reply(self, text: &str) -> Self {
        if let Ok(mut greetings) = self.greetings.lock() {
            greetings.push(text.to_string());
        }
        self
    }

    /// Messages forwarded to the agent so far.
    pub fn intents(&self) -> Vec<IntentRequest> {
        self.intents.lock().map(|i| i.clone()).unwrap_or_default()
    }

    /// Make every call to `service` fail with a transport error. Service
    /// names: `sessions`, `cases`, `complaints`, `answers`, `verification`,
    /// `notifier`, `intents`.
    #[must_use]
    pub fn with_outage(self, service: &'static str) -> Self {
        self.down.insert(service);
        self
    }

    fn available(&self, service: &'static str) -> CollaboratorResult<()> {
        if self.down.contains(service) {
            return Err(CollaboratorError::Transport(format!("{service} unavailable")));
        }
        Ok(())
    }

    /// Complaints received so far.
    pub fn complaints(&self) -> Vec<NewComplaint> {
        self.complaints
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Notifications captured so far.
    pub fn sent_codes(&self) -> Vec<SentCode> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SessionDirectory for MemoryBackend {
    async fn get_or_create(
        &self,
        channel: &str,
        channel_user_id: &str,
    ) -> CollaboratorResult<Session> {
        self.available("sessions")?;
        if channel_user_id.trim().is_empty() {
            return Err(CollaboratorError::Rejected("channel user id is empty".into()));
        }

        let now = Utc::now();
        let mut entry = self
            .sessions
            .entry((channel.to_string(), channel_user_id.to_string()))
            .or_insert_with(|| Session {
                id: Uuid::new_v4(),
                channel: channel.to_string(),
                channel_user_id: channel_user_id.to_string(),
                created_at: now,
                last_activity_at: now,
            });
        entry.last_activity_at = now;
        Ok(entry.clone())
    }
}

#[async_trait]
impl IntentService for MemoryBackend {
    async fn detect_intent(&self, request: &IntentRequest) -> CollaboratorResult<Vec<String>> {
        self.available("intents")?;
        self.intents
            .lock()
            .map_err(|_| CollaboratorError::Transport("intent log poisoned".into()))?
            .push(request.clone());
        Ok(self.greetings.lock().map(|g| g.clone()).unwrap_or_default())
    }
}

#[async_trait]
impl CaseDirectory for MemoryBackend {
    async fn find_case(&self, number: &str) -> CollaboratorResult<Option<CaseRecord>> {
        self.available("cases")?;
        Ok(self.cases.get(number).map(|c| c.clone()))
    }
}

#[async_trait]
impl ComplaintIntake for MemoryBackend {
    async fn create_complaint(
        &self,
        complaint: NewComplaint,
    ) -> CollaboratorResult<ComplaintReceipt> {
        self.available("complaints")?;
        let id = self.next_complaint_id.fetch_add(1, Ordering::Relaxed);
        self.complaints
            .lock()
            .map_err(|_| CollaboratorError::Transport("complaint store poisoned".into()))?
            .push(complaint);
        Ok(ComplaintReceipt { id })
    }
}

#[async_trait]
impl AnswerService for MemoryBackend {
    async fn answer(&self, _session_id: Uuid, question: &str) -> CollaboratorResult<Option<String>> {
        self.available("answers")?;
        let question = question.to_lowercase();
        Ok(self
            .answers
            .iter()
            .find(|entry| question.contains(entry.key().as_str()))
            .map(|entry| entry.value().clone()))
    }
}

#[async_trait]
impl VerificationService for MemoryBackend {
    async fn issue_code(&self, case_number: &str) -> CollaboratorResult<String> {
        self.available("verification")?;
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
        self.codes.insert(
            case_number.to_string(),
            (code.clone(), Instant::now() + CODE_TTL),
        );
        Ok(code)
    }

    async fn validate_code(&self, case_number: &str, code: &str) -> CollaboratorResult<bool> {
        self.available("verification")?;
        let valid = self
            .codes
            .remove_if(case_number, |_, (stored, expires_at)| {
                stored == code.trim() && Instant::now() < *expires_at
            })
            .is_some();
        Ok(valid)
    }
}

#[async_trait]
impl Notifier for MemoryBackend {
    async fn send_verification_code(
        &self,
        email: &str,
        case_number: &str,
        code: &str,
    ) -> CollaboratorResult<()> {
        self.available("notifier")?;
        self.sent
            .lock()
            .map_err(|_| CollaboratorError::Transport("outbox poisoned".into()))?
            .push(SentCode {
                email: email.to_string(),
                case_number: case_number.to_string(),
                code: code.to_string(),
            });
        Ok(())
    }
}
