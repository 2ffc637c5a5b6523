//! Outbound notification delivery
//!
//! The dispatcher is the only component that performs I/O. It sends a
//! request through a [`Transport`], bounds the wait with a timeout, and turns
//! the response status into notifier state transitions. The caller receives
//! a [`DispatchOutcome`] and applies it to the originating rule.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::evaluator::CandidateKind;
use super::message::NotificationRequest;
use super::rule::RuleId;
use super::state::SharedNotifierState;
use crate::clock::Clock;

/// Raw endpoint response
#[derive(Debug, Clone)]
pub struct NotificationResult {
    pub status_code: u16,
    pub body: String,
}

/// Transient delivery failures
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Send timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Sends a request and reports the endpoint's status code
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &NotificationRequest)
        -> Result<NotificationResult, TransportError>;
}

/// Pushover-style form POST over HTTPS
pub struct PushoverTransport {
    client: reqwest::Client,
    url: String,
    app_token: String,
    user_key: String,
}

impl PushoverTransport {
    pub fn new(
        server: &str,
        api: &str,
        app_token: impl Into<String>,
        user_key: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url: format!("https://{}{}", server, api),
            app_token: app_token.into(),
            user_key: user_key.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for PushoverTransport {
    async fn send(
        &self,
        request: &NotificationRequest,
    ) -> Result<NotificationResult, TransportError> {
        let form = [
            ("token", self.app_token.as_str()),
            ("user", self.user_key.as_str()),
            ("title", request.title.as_str()),
            ("message", request.message.as_str()),
        ];

        let response = self
            .client
            .post(&self.url)
            .form(&form)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status_code = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        Ok(NotificationResult { status_code, body })
    }
}

/// Transport that only logs; used when sending is switched off
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn send(
        &self,
        request: &NotificationRequest,
    ) -> Result<NotificationResult, TransportError> {
        tracing::info!(
            rule = %request.rule,
            title = %request.title,
            "Notification (send disabled): {}",
            request.message
        );
        Ok(NotificationResult {
            status_code: 200,
            body: String::new(),
        })
    }
}

/// How a dispatch attempt ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchStatus {
    Delivered,
    /// 4xx: sending is halted for the rest of the process
    ClientError { code: u16 },
    /// 5xx: sending is suspended until `until`
    ServerError { code: u16, until: DateTime<Utc> },
    /// Any other status; treated like a transport failure
    Unexpected { code: u16 },
    TransportFailed { error: String },
}

/// Result of one dispatch, fed back to the originating rule
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub rule: RuleId,
    pub kind: CandidateKind,
    pub episode: u64,
    pub at: DateTime<Utc>,
    pub status: DispatchStatus,
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self.status, DispatchStatus::Delivered)
    }
}

/// Sends notifications and records endpoint failures in the notifier state
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    notifier: SharedNotifierState,
    clock: Arc<dyn Clock>,
    send_timeout: std::time::Duration,
    client_error_log_frequency: Duration,
    server_error_wait_period: Duration,
    log_notifications: bool,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        notifier: SharedNotifierState,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            notifier,
            clock,
            send_timeout: std::time::Duration::from_secs(30),
            client_error_log_frequency: Duration::seconds(3600),
            server_error_wait_period: Duration::seconds(3600),
            log_notifications: true,
        }
    }

    pub fn with_send_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_client_error_log_frequency(mut self, frequency: Duration) -> Self {
        self.client_error_log_frequency = frequency;
        self
    }

    pub fn with_server_error_wait_period(mut self, period: Duration) -> Self {
        self.server_error_wait_period = period;
        self
    }

    pub fn with_log_notifications(mut self, enabled: bool) -> Self {
        self.log_notifications = enabled;
        self
    }

    /// Send one notification and interpret the response
    pub async fn dispatch(&self, request: &NotificationRequest) -> DispatchOutcome {
        if self.log_notifications {
            tracing::info!(rule = %request.rule, "{}", request.title);
            tracing::info!(rule = %request.rule, "{}", request.message);
        }

        let sent = tokio::time::timeout(self.send_timeout, self.transport.send(request))
            .await
            .unwrap_or(Err(TransportError::Timeout(self.send_timeout)));

        let now = self.clock.now();
        let status = match sent {
            Ok(result) => self.interpret(request, &result, now),
            Err(e) => {
                tracing::warn!(
                    rule = %request.rule,
                    error = %e,
                    "Failed to send notification, will retry on next match"
                );
                DispatchStatus::TransportFailed {
                    error: e.to_string(),
                }
            }
        };

        DispatchOutcome {
            rule: request.rule,
            kind: request.kind,
            episode: request.episode,
            at: now,
            status,
        }
    }

    fn interpret(
        &self,
        request: &NotificationRequest,
        result: &NotificationResult,
        now: DateTime<Utc>,
    ) -> DispatchStatus {
        let code = result.status_code;
        tracing::debug!(rule = %request.rule, status = code, "Notification response");

        match code {
            200..=299 => DispatchStatus::Delivered,
            400..=499 => {
                let mut notifier = self.notifier.lock();
                notifier.halt(now);
                if notifier.client_error_log_due(now, self.client_error_log_frequency) {
                    tracing::error!(
                        rule = %request.rule,
                        status = code,
                        errors = %describe_errors(&result.body),
                        "Client error from notification endpoint, halting all notifications"
                    );
                }
                DispatchStatus::ClientError { code }
            }
            500..=599 => {
                let mut notifier = self.notifier.lock();
                notifier.suspend(now, self.server_error_wait_period);
                let until = now + self.server_error_wait_period;
                tracing::error!(
                    rule = %request.rule,
                    status = code,
                    until = %until,
                    errors = %describe_errors(&result.body),
                    "Server error from notification endpoint, suspending notifications"
                );
                DispatchStatus::ServerError { code, until }
            }
            _ => {
                tracing::warn!(
                    rule = %request.rule,
                    status = code,
                    "Unexpected status from notification endpoint"
                );
                DispatchStatus::Unexpected { code }
            }
        }
    }
}

/// Pull the `errors` array out of a Pushover error body, or echo the body
fn describe_errors(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(json) => match json.get("errors").and_then(|e| e.as_array()) {
            Some(errors) => errors
                .iter()
                .filter_map(|e| e.as_str())
                .collect::<Vec<_>>()
                .join("; "),
            None => body.to_string(),
        },
        Err(_) => body.to_string(),
    }
}
