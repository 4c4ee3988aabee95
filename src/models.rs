use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub mod auth;

/// User details normalized from a provider response
///
/// Backends map their raw response into this shape so pipeline steps can work
/// with every provider the same way.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct UserDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fullname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl UserDetails {
    /// Create details carrying only an email address
    #[must_use]
    pub fn with_email(email: &str) -> Self {
        Self {
            email: Some(email.to_string()),
            ..Default::default()
        }
    }

    /// Domain part of the email address, split once on `@`
    #[must_use]
    pub fn email_domain(&self) -> Option<&str> {
        self.email
            .as_deref()
            .and_then(|email| email.split_once('@'))
            .map(|(_, domain)| domain)
    }
}

/// Application user record as seen by the pipeline
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub has_usable_password: bool,
}

fn default_true() -> bool {
    true
}

/// Link between an application user and a provider identity
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SocialIdentity {
    pub id: Uuid,
    pub user_id: String,
    pub provider: String,
    pub uid: String,
    #[serde(default)]
    pub extra_data: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SocialIdentity {
    /// Create a fresh identity link for `user`
    #[must_use]
    pub fn new(user: &UserRecord, provider: &str, uid: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user.id.clone(),
            provider: provider.to_string(),
            uid: uid.to_string(),
            extra_data: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
