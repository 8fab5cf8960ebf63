use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::User;

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// The verification code arrives as a number or as the digits typed into a text field.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CodeInput {
    Number(i64),
    Text(String),
}

impl CodeInput {
    /// `None` when the input cannot be a stored code at all.
    pub fn as_code(&self) -> Option<i32> {
        match self {
            CodeInput::Number(n) => i32::try_from(*n).ok(),
            CodeInput::Text(s) => s.trim().parse::<i32>().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub email: String,
    pub code: CodeInput,
}

#[derive(Debug, Deserialize)]
pub struct ResendRequest {
    pub email: String,
}

/// Body fallback for clients that keep the refresh token outside the cookie jar.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub message: &'static str,
    pub access_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub message: &'static str,
    pub user: PublicUser,
    pub access_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenResponse {
    pub access_token: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub email_verified: Option<OffsetDateTime>,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            name: u.name,
            email: u.email,
            email_verified: u.email_verified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_accepts_number_or_text() {
        let v: VerifyRequest = serde_json::from_str(r#"{"email":"a@b.co","code":123456}"#).unwrap();
        assert_eq!(v.code.as_code(), Some(123456));

        let v: VerifyRequest = serde_json::from_str(r#"{"email":"a@b.co","code":" 654321 "}"#).unwrap();
        assert_eq!(v.code.as_code(), Some(654321));

        let v: VerifyRequest = serde_json::from_str(r#"{"email":"a@b.co","code":"12ab"}"#).unwrap();
        assert_eq!(v.code.as_code(), None);

        let v: VerifyRequest =
            serde_json::from_str(r#"{"email":"a@b.co","code":99999999999}"#).unwrap();
        assert_eq!(v.code.as_code(), None);
    }

    #[test]
    fn public_user_hides_secrets() {
        let user = User {
            id: Uuid::new_v4(),
            name: "Ann".into(),
            email: "ann@x.com".into(),
            password_hash: "$argon2id$secret".into(),
            email_verified: None,
            verification_code: Some(123456),
            verification_sent_at: None,
            verification_attempts: 0,
            created_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_string(&PublicUser::from(user)).unwrap();
        assert!(json.contains("ann@x.com"));
        assert!(json.contains("\"emailVerified\":null"));
        assert!(!json.contains("argon2"));
        assert!(!json.contains("123456"));
    }
}
