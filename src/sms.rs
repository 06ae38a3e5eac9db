//! Notification Gateway
//!
//! Sends one text to a batch of phone numbers. Every number is dispatched on
//! its own task; a failure is recorded for that number only and never aborts
//! the rest of the batch.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{SmsConfig, TwilioCredentials};

/// Why a single number did not receive the message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchFailure {
    #[error("invalid phone number: {0}")]
    InvalidNumber(String),

    #[error("SMS provider error (status {status}): {body}")]
    Provider { status: u16, body: String },

    #[error("SMS transport error: {0}")]
    Transport(String),
}

/// Outbound SMS provider.
#[async_trait]
pub trait SmsSender: Send + Sync {
    /// `to` is already normalized to `+<digits>`.
    async fn send(&self, to: &str, body: &str) -> Result<(), DispatchFailure>;

    fn provider_name(&self) -> &'static str;
}

// ========================================
// Number normalization
// ========================================

/// Normalizes `raw` to `+<8..15 digits>`.
///
/// Numbers already in international form (`+...` or `00...`) are not prefixed;
/// everything else loses one leading trunk `0` and gets `country_code`.
pub fn normalize_number(raw: &str, country_code: &str) -> Result<String, DispatchFailure> {
    let compact: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();

    let normalized = if let Some(rest) = compact.strip_prefix('+') {
        format!("+{}", rest)
    } else if let Some(rest) = compact.strip_prefix("00") {
        format!("+{}", rest)
    } else {
        let local = compact.strip_prefix('0').unwrap_or(&compact);
        format!("{}{}", country_code, local)
    };

    match normalized.strip_prefix('+') {
        Some(digits)
            if (8..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit()) =>
        {
            Ok(normalized)
        }
        _ => Err(DispatchFailure::InvalidNumber(raw.to_string())),
    }
}

// ========================================
// Gateway
// ========================================

/// Per-number outcome of one `send_batch` call, keyed by the number as given.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: BTreeMap<String, Result<(), DispatchFailure>>,
}

impl BatchReport {
    pub fn sent(&self) -> usize {
        self.outcomes.values().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.sent()
    }
}

#[derive(Clone)]
pub struct NotificationGateway {
    sender: Arc<dyn SmsSender>,
    country_code: String,
    // 全バッチ共通の同時送信数上限
    permits: Arc<Semaphore>,
}

impl NotificationGateway {
    pub fn new(sender: Arc<dyn SmsSender>, country_code: &str, max_in_flight: usize) -> Self {
        Self {
            sender,
            country_code: format!("+{}", country_code.trim().trim_start_matches('+')),
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Twilio when credentials are configured, log-only otherwise.
    pub fn from_config(config: &SmsConfig) -> anyhow::Result<Self> {
        let sender: Arc<dyn SmsSender> = match &config.twilio {
            Some(credentials) => Arc::new(TwilioSender::new(credentials.clone())?),
            None => {
                warn!("Twilio credentials not configured; SMS will only be logged");
                Arc::new(LogSender)
            }
        };
        info!(
            provider = sender.provider_name(),
            country_code = %config.country_code,
            max_in_flight = config.max_in_flight,
            "Notification gateway ready"
        );
        Ok(Self::new(sender, &config.country_code, config.max_in_flight))
    }

    /// Sends `message` to every number. Never fails as a whole.
    ///
    /// Inputs that normalize to the same handset are sent once; each of them
    /// gets that single send's outcome in the report.
    pub async fn send_batch(&self, numbers: &BTreeSet<String>, message: &str) -> BatchReport {
        let mut report = BatchReport::default();
        let message: Arc<str> = Arc::from(message);
        let mut tasks = JoinSet::new();
        // 正規化後の番号 → 入力の表記
        let mut aliases: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for raw in numbers {
            let to = match normalize_number(raw, &self.country_code) {
                Ok(to) => to,
                Err(e) => {
                    warn!(phone = %raw, error = %e, "❌ SMS not sent");
                    report.outcomes.insert(raw.clone(), Err(e));
                    continue;
                }
            };

            // タスクが panic した場合もこの結果が残る
            report.outcomes.insert(
                raw.clone(),
                Err(DispatchFailure::Transport("dispatch task aborted".to_string())),
            );

            let seen = aliases.entry(to.clone()).or_default();
            seen.push(raw.clone());
            if seen.len() > 1 {
                debug!(phone = %to, raw = %raw, "Duplicate number in batch; sent once");
                continue;
            }

            let sender = self.sender.clone();
            let permits = self.permits.clone();
            let message = message.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let result = sender.send(&to, &message).await;
                (to, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((to, result)) => {
                    match &result {
                        Ok(()) => info!(phone = %to, "✅ SMS sent"),
                        Err(e) => warn!(phone = %to, error = %e, "❌ SMS not sent"),
                    }
                    for raw in aliases.get(&to).into_iter().flatten() {
                        report.outcomes.insert(raw.clone(), result.clone());
                    }
                }
                Err(e) => warn!("SMS dispatch task failed: {}", e),
            }
        }

        info!(
            recipients = aliases.len(),
            sent = report.sent(),
            failed = report.failed(),
            "SMS batch finished"
        );
        report
    }
}

// ========================================
// Providers
// ========================================

/// Logs instead of sending. Used when no provider is configured.
pub struct LogSender;

#[async_trait]
impl SmsSender for LogSender {
    async fn send(&self, to: &str, body: &str) -> Result<(), DispatchFailure> {
        info!(to, body, "SMS (log only)");
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "log"
    }
}

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Twilio Programmable Messaging over its REST API.
pub struct TwilioSender {
    http: reqwest::Client,
    credentials: TwilioCredentials,
    api_url: String,
}

impl TwilioSender {
    pub fn new(credentials: TwilioCredentials) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        let api_url = format!(
            "{}/Accounts/{}/Messages.json",
            TWILIO_API_BASE, credentials.account_sid
        );
        Ok(Self { http, credentials, api_url })
    }
}

#[async_trait]
impl SmsSender for TwilioSender {
    async fn send(&self, to: &str, body: &str) -> Result<(), DispatchFailure> {
        let mut form = vec![("To", to), ("Body", body)];
        match (&self.credentials.messaging_service_sid, &self.credentials.from) {
            (Some(sid), _) => form.push(("MessagingServiceSid", sid.as_str())),
            (None, Some(from)) => form.push(("From", from.as_str())),
            (None, None) => {}
        }

        let response = self
            .http
            .post(&self.api_url)
            .basic_auth(&self.credentials.account_sid, Some(&self.credentials.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| DispatchFailure::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(to, "Twilio accepted message");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DispatchFailure::Provider { status: status.as_u16(), body })
    }

    fn provider_name(&self) -> &'static str {
        "twilio"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records deliveries; numbers in `reject` fail at the provider.
    #[derive(Default)]
    struct RecordingSender {
        reject: Vec<String>,
        delivered: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SmsSender for RecordingSender {
        async fn send(&self, to: &str, body: &str) -> Result<(), DispatchFailure> {
            if self.reject.iter().any(|r| r == to) {
                return Err(DispatchFailure::Provider { status: 400, body: "unreachable".into() });
            }
            self.delivered.lock().unwrap().push((to.to_string(), body.to_string()));
            Ok(())
        }

        fn provider_name(&self) -> &'static str {
            "recording"
        }
    }

    fn numbers(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn local_numbers_get_country_code() {
        assert_eq!(normalize_number("9876543210", "+91").unwrap(), "+919876543210");
        assert_eq!(normalize_number("098765 43210", "+91").unwrap(), "+919876543210");
        assert_eq!(normalize_number("(987) 654-3210", "+91").unwrap(), "+919876543210");
    }

    #[test]
    fn international_numbers_bypass_prefix() {
        assert_eq!(normalize_number("+44 20 7946 0958", "+91").unwrap(), "+442079460958");
        assert_eq!(normalize_number("0044 20 7946 0958", "+91").unwrap(), "+442079460958");
    }

    #[test]
    fn garbage_is_rejected() {
        for raw in ["", "12345", "98765abc10", "+", "+1234567890123456"] {
            assert_eq!(
                normalize_number(raw, "+91"),
                Err(DispatchFailure::InvalidNumber(raw.to_string())),
                "{raw:?}"
            );
        }
    }

    #[tokio::test]
    async fn invalid_number_does_not_block_valid_one() {
        let sender = Arc::new(RecordingSender::default());
        let gateway = NotificationGateway::new(sender.clone(), "+91", 2);

        let report = gateway
            .send_batch(&numbers(&["not-a-phone", "9876543210"]), "Fresh stock alert!")
            .await;

        assert_eq!(report.sent(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.outcomes["9876543210"], Ok(()));
        assert!(matches!(
            report.outcomes["not-a-phone"],
            Err(DispatchFailure::InvalidNumber(_))
        ));

        let delivered = sender.delivered.lock().unwrap();
        assert_eq!(
            *delivered,
            vec![("+919876543210".to_string(), "Fresh stock alert!".to_string())]
        );
    }

    #[tokio::test]
    async fn provider_failure_is_isolated() {
        let sender = Arc::new(RecordingSender {
            reject: vec!["+919000000002".into()],
            ..Default::default()
        });
        let gateway = NotificationGateway::new(sender.clone(), "+91", 1);

        let report = gateway
            .send_batch(&numbers(&["9000000001", "9000000002", "9000000003"]), "hello")
            .await;

        assert_eq!(report.sent(), 2);
        assert!(matches!(
            report.outcomes["9000000002"],
            Err(DispatchFailure::Provider { status: 400, .. })
        ));
        assert_eq!(sender.delivered.lock().unwrap().len(), 2);
    }

    #[test]
    fn empty_country_code_does_not_panic() {
        assert_eq!(normalize_number("", ""), Err(DispatchFailure::InvalidNumber(String::new())));
        assert!(normalize_number("9876543210", "").is_err());
    }

    #[tokio::test]
    async fn same_handset_in_different_spellings_gets_one_sms() {
        let sender = Arc::new(RecordingSender::default());
        let gateway = NotificationGateway::new(sender.clone(), "+91", 4);

        let report = gateway
            .send_batch(
                &numbers(&["9876543210", "+91 98765 43210", "09876543210", "9000000001"]),
                "hi",
            )
            .await;

        let mut delivered: Vec<String> =
            sender.delivered.lock().unwrap().iter().map(|(to, _)| to.clone()).collect();
        delivered.sort();
        assert_eq!(delivered, vec!["+919000000001", "+919876543210"]);

        assert_eq!(report.outcomes.len(), 4);
        assert_eq!(report.outcomes["+91 98765 43210"], Ok(()));
        assert_eq!(report.outcomes["09876543210"], Ok(()));
        assert_eq!(report.failed(), 0);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let gateway = NotificationGateway::new(Arc::new(LogSender), "+91", 4);
        let report = gateway.send_batch(&BTreeSet::new(), "unused").await;
        assert!(report.outcomes.is_empty());
    }
}
