//! 設定
//! `Default` はローカル開発用の値。本番は環境変数で上書きする。

use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TwilioCredentials {
    pub account_sid: String,
    pub auth_token: String,
    pub from: Option<String>,
    pub messaging_service_sid: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SmsConfig {
    /// Prefixed to numbers that are not already international.
    pub country_code: String,
    pub max_in_flight: usize,
    pub twilio: Option<TwilioCredentials>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub db_path: String,
    /// `None` returns every match.
    pub search_limit: Option<usize>,
    pub notify_queue_capacity: usize,
    pub shutdown_grace: Duration,
    pub sms: SmsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            db_path: "krishi_market.db".to_string(),
            search_limit: None,
            notify_queue_capacity: 1024,
            shutdown_grace: Duration::from_secs(10),
            sms: SmsConfig {
                country_code: "+91".to_string(),
                max_in_flight: 4,
                twilio: None,
            },
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `lookup` は環境変数の代わり（テストで差し替える）
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(addr) = get("KRISHI_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(path) = get("KRISHI_DB_PATH") {
            config.db_path = path;
        }
        if let Some(limit) = get("KRISHI_SEARCH_LIMIT") {
            let limit: usize = parse("KRISHI_SEARCH_LIMIT", &limit)?;
            if limit == 0 {
                bail!("KRISHI_SEARCH_LIMIT must be > 0 (unset it to return every match)");
            }
            config.search_limit = Some(limit);
        }
        if let Some(capacity) = get("KRISHI_NOTIFY_QUEUE_CAPACITY") {
            config.notify_queue_capacity = parse("KRISHI_NOTIFY_QUEUE_CAPACITY", &capacity)?;
        }
        if let Some(secs) = get("KRISHI_SHUTDOWN_GRACE_SECS") {
            config.shutdown_grace = Duration::from_secs(parse("KRISHI_SHUTDOWN_GRACE_SECS", &secs)?);
        }
        if let Some(code) = get("KRISHI_SMS_COUNTRY_CODE") {
            config.sms.country_code = parse_country_code(&code)?;
        }
        if let Some(n) = get("KRISHI_SMS_MAX_IN_FLIGHT") {
            config.sms.max_in_flight = parse("KRISHI_SMS_MAX_IN_FLIGHT", &n)?;
        }

        config.sms.twilio = match (get("TWILIO_SID"), get("TWILIO_AUTH_TOKEN")) {
            (Some(account_sid), Some(auth_token)) => {
                let from = get("TWILIO_FROM");
                let messaging_service_sid = get("TWILIO_MESSAGING_SID");
                if from.is_none() && messaging_service_sid.is_none() {
                    bail!("TWILIO_FROM or TWILIO_MESSAGING_SID is required with TWILIO_SID");
                }
                Some(TwilioCredentials { account_sid, auth_token, from, messaging_service_sid })
            }
            (None, None) => None,
            _ => bail!("TWILIO_SID and TWILIO_AUTH_TOKEN must be set together"),
        };

        if config.notify_queue_capacity == 0 || config.sms.max_in_flight == 0 {
            bail!("KRISHI_NOTIFY_QUEUE_CAPACITY and KRISHI_SMS_MAX_IN_FLIGHT must be > 0");
        }

        Ok(config)
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("{} has an invalid value: {:?}", key, value))
}

/// "91" / "+91" → "+91"
fn parse_country_code(raw: &str) -> Result<String> {
    let digits = raw.trim_start_matches('+');
    if digits.is_empty() || digits.len() > 3 || !digits.chars().all(|c| c.is_ascii_digit()) {
        bail!("KRISHI_SMS_COUNTRY_CODE has an invalid value: {:?}", raw);
    }
    Ok(format!("+{}", digits))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let env: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_without_env() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:5000");
        assert_eq!(config.search_limit, None);
        assert_eq!(config.sms.country_code, "+91");
        assert!(config.sms.twilio.is_none());
    }

    #[test]
    fn overrides_from_env() {
        let config = from_pairs(&[
            ("KRISHI_SEARCH_LIMIT", "25"),
            ("KRISHI_SMS_COUNTRY_CODE", "44"),
            ("TWILIO_SID", "AC123"),
            ("TWILIO_AUTH_TOKEN", "secret"),
            ("TWILIO_FROM", "+15005550006"),
        ])
        .unwrap();
        assert_eq!(config.search_limit, Some(25));
        assert_eq!(config.sms.country_code, "+44");
        let twilio = config.sms.twilio.unwrap();
        assert_eq!(twilio.account_sid, "AC123");
        assert_eq!(twilio.from.as_deref(), Some("+15005550006"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(from_pairs(&[("KRISHI_SEARCH_LIMIT", "many")]).is_err());
        assert!(from_pairs(&[("KRISHI_SMS_COUNTRY_CODE", "+9a")]).is_err());
        assert!(from_pairs(&[("TWILIO_SID", "AC123")]).is_err());
        assert!(from_pairs(&[("TWILIO_SID", "AC123"), ("TWILIO_AUTH_TOKEN", "x")]).is_err());
        assert!(from_pairs(&[("KRISHI_SMS_MAX_IN_FLIGHT", "0")]).is_err());
    }

    #[test]
    fn zero_search_limit_is_rejected() {
        let err = from_pairs(&[("KRISHI_SEARCH_LIMIT", "0")]).unwrap_err();
        assert!(err.to_string().contains("KRISHI_SEARCH_LIMIT"));
        assert_eq!(from_pairs(&[("KRISHI_SEARCH_LIMIT", "1")]).unwrap().search_limit, Some(1));
    }
}
