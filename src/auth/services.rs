use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{CodeInput, RegisterRequest},
        jwt::TokenPair,
        password::{hash_password, verify_password},
        repo_types::{NewUser, User},
    },
    error::{AppError, AppResult},
    state::AppState,
};

const MIN_PASSWORD_LEN: usize = 6;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Uniform over 100000..=999999.
pub(crate) fn generate_code() -> i32 {
    rand::thread_rng().gen_range(100_000..=999_999)
}

fn mail_failed(e: anyhow::Error) -> AppError {
    error!(error = ?e, "verification mail delivery failed");
    AppError::MailDelivery(e)
}

#[derive(Debug)]
pub struct Registered {
    pub user_id: Uuid,
    pub tokens: TokenPair,
}

/// Creates an unverified user, mails the one-time code and signs a token pair.
/// Mail delivery is part of the request: if it fails the caller sees the error.
#[instrument(skip(st, req))]
pub async fn register(st: &AppState, req: RegisterRequest) -> AppResult<Registered> {
    let name = req.name.trim().to_string();
    let email = normalize_email(&req.email);

    if name.is_empty() {
        return Err(AppError::InvalidInput("Name is required.".into()));
    }
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(AppError::InvalidInput("Invalid email.".into()));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::InvalidInput(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters."
        )));
    }

    if st.users.find_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AppError::Conflict("Email already registered.".into()));
    }

    let password_hash = hash_password(req.password).await?;
    let code = generate_code();
    let user = st
        .users
        .create(NewUser {
            name,
            email,
            password_hash,
            verification_code: code,
            verification_sent_at: OffsetDateTime::now_utc(),
        })
        .await?
        .ok_or_else(|| AppError::Conflict("Email already registered.".into()))?;

    st.mailer
        .send_verification_code(&user.email, code)
        .await
        .map_err(mail_failed)?;

    let tokens = st.tokens.issue(user.id)?;
    info!(user_id = %user.id, "user registered");
    Ok(Registered {
        user_id: user.id,
        tokens,
    })
}

/// Checks the emailed code. A matching code is consumed and cannot be used again.
#[instrument(skip(st, code))]
pub async fn verify_email(st: &AppState, email: &str, code: &CodeInput) -> AppResult<()> {
    let email = normalize_email(email);
    let user = st
        .users
        .find_by_email(&email)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found.".into()))?;

    if user.verification_code.is_none() {
        return Err(AppError::InvalidCode);
    }
    // The attempt is counted before the code is compared, in one conditional update.
    let max_attempts = st.config.verification.max_attempts;
    if !st.users.reserve_verification_attempt(user.id, max_attempts).await? {
        warn!(user_id = %user.id, "verification attempts exhausted");
        return Err(AppError::TooManyRequests {
            message: "Too many invalid attempts. Request a new code.".into(),
            retry_after_secs: None,
        });
    }

    let matched = match code.as_code() {
        Some(given) => st.users.consume_verification_code(user.id, given).await?,
        None => false,
    };
    if !matched {
        warn!(user_id = %user.id, "invalid verification code");
        return Err(AppError::InvalidCode);
    }

    info!(user_id = %user.id, "email verified");
    Ok(())
}

/// Issues a new code for an unverified user, at most once per cooldown.
#[instrument(skip(st))]
pub async fn resend_code(st: &AppState, email: &str) -> AppResult<()> {
    let email = normalize_email(email);
    let user = st
        .users
        .find_by_email(&email)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found.".into()))?;

    if user.is_verified() {
        return Err(AppError::InvalidInput("Email already verified.".into()));
    }

    let now = OffsetDateTime::now_utc();
    if let Some(sent_at) = user.verification_sent_at {
        let cooldown = TimeDuration::seconds(st.config.verification.resend_cooldown.as_secs() as i64);
        let remaining = cooldown - (now - sent_at);
        if remaining.is_positive() {
            let secs = remaining.whole_seconds() + i64::from(remaining.subsec_nanoseconds() > 0);
            return Err(AppError::TooManyRequests {
                message: format!("Please wait {secs} seconds before requesting a new code."),
                retry_after_secs: Some(secs as u64),
            });
        }
    }

    let code = generate_code();
    st.users.replace_verification_code(user.id, code, now).await?;
    st.mailer
        .send_verification_code(&user.email, code)
        .await
        .map_err(mail_failed)?;

    info!(user_id = %user.id, "verification code resent");
    Ok(())
}

#[instrument(skip(st, password))]
pub async fn login(st: &AppState, email: &str, password: String) -> AppResult<(User, TokenPair)> {
    let email = normalize_email(email);
    if !is_valid_email(&email) {
        return Err(AppError::InvalidInput("Invalid email.".into()));
    }

    let user = match st.users.find_by_email(&email).await? {
        Some(u) => u,
        None => {
            warn!(email = %email, "login unknown email");
            return Err(AppError::NotFound("User not found.".into()));
        }
    };

    if !verify_password(password, user.password_hash.clone()).await? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::Unauthenticated("Invalid credentials.".into()));
    }

    if st.config.verification.require_verified_login && !user.is_verified() {
        warn!(user_id = %user.id, "login before email verification");
        return Err(AppError::Forbidden("Email not verified.".into()));
    }

    let tokens = st.tokens.issue(user.id)?;
    info!(user_id = %user.id, "user logged in");
    Ok((user, tokens))
}

/// Verifies a refresh token and rotates it: both tokens are re-issued.
#[instrument(skip_all)]
pub async fn refresh(st: &AppState, refresh_token: Option<String>) -> AppResult<TokenPair> {
    let token = refresh_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthenticated("No refresh token provided.".into()))?;

    let claims = st.tokens.verify_refresh(&token)?;
    let user = st.users.find_by_id(claims.sub).await?.ok_or_else(|| {
        warn!(user_id = %claims.sub, "refresh for missing user");
        AppError::Forbidden("Invalid or expired refresh token.".into())
    })?;

    st.tokens.issue(user.id)
}

pub async fn current_user(st: &AppState, user_id: Uuid) -> AppResult<User> {
    st.users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found.".into()))
}
