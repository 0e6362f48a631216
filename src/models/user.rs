// src/models/user.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::common::{impl_soft_delete, Record};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Analyst,
    #[default]
    Standard,
}

/// Account record read by the downstream API. Credentials never serialize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(flatten)]
    pub record: Record,
    pub name: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    #[serde(default)]
    pub role: Role,
    #[serde(skip)]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub preferences: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subscription_tier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_expiry: Option<DateTime<Utc>>,
}

impl_soft_delete!(User);

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn has_active_subscription(&self, now: DateTime<Utc>) -> bool {
        let tier = self.subscription_tier.trim();
        if tier.is_empty() || tier.eq_ignore_ascii_case("free") {
            return false;
        }
        matches!(self.subscription_expiry, Some(exp) if now < exp)
    }

    pub fn record_login(&mut self, now: DateTime<Utc>) {
        self.last_login = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn subscription_rules() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let mut u = User {
            subscription_tier: "free".into(),
            subscription_expiry: Some(now + Duration::days(30)),
            ..Default::default()
        };
        assert!(!u.has_active_subscription(now));
        u.subscription_tier = "pro".into();
        assert!(u.has_active_subscription(now));
        u.subscription_expiry = Some(now - Duration::days(1));
        assert!(!u.has_active_subscription(now));
        u.subscription_expiry = None;
        assert!(!u.has_active_subscription(now));
    }

    #[test]
    fn secrets_are_not_serialized() {
        let u = User {
            name: "Ana".into(),
            email: "ana@example.test".into(),
            password_hash: "hash".into(),
            api_key: "key".into(),
            role: Role::Admin,
            ..Default::default()
        };
        let v = serde_json::to_value(&u).unwrap();
        assert!(v.get("password_hash").is_none());
        assert!(v.get("api_key").is_none());
        assert_eq!(v["role"], "admin");
        assert!(u.is_admin());
    }
}
