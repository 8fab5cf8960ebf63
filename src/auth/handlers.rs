use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::CookieJar;
use tracing::instrument;

use crate::{
    auth::{
        cookie::{cleared_refresh_cookie, refresh_cookie, REFRESH_COOKIE},
        dto::{
            AccessTokenResponse, LoginRequest, LoginResponse, MessageResponse, PublicUser,
            RefreshRequest, RegisterRequest, RegisterResponse, ResendRequest, VerifyRequest,
        },
        extractors::AuthUser,
        jwt::TokenPair,
        services,
    },
    error::{AppError, AppJson, AppResult},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/verify", post(verify))
        .route("/verify/resend", post(resend))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

fn with_refresh_cookie(state: &AppState, jar: CookieJar, tokens: &TokenPair) -> CookieJar {
    jar.add(refresh_cookie(
        tokens.refresh_token.clone(),
        state.tokens.refresh_ttl(),
        state.config.cookie_secure,
    ))
}

#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    AppJson(payload): AppJson<RegisterRequest>,
) -> AppResult<(StatusCode, CookieJar, Json<RegisterResponse>)> {
    let registered = services::register(&state, payload).await?;
    let jar = with_refresh_cookie(&state, jar, &registered.tokens);
    Ok((
        StatusCode::CREATED,
        jar,
        Json(RegisterResponse {
            message: "User registered successfully. Please verify your email.",
            access_token: registered.tokens.access_token,
        }),
    ))
}

#[instrument(skip_all)]
pub async fn verify(
    State(state): State<AppState>,
    AppJson(payload): AppJson<VerifyRequest>,
) -> AppResult<Json<MessageResponse>> {
    services::verify_email(&state, &payload.email, &payload.code).await?;
    Ok(Json(MessageResponse {
        message: "Email verified successfully.",
    }))
}

#[instrument(skip_all)]
pub async fn resend(
    State(state): State<AppState>,
    AppJson(payload): AppJson<ResendRequest>,
) -> AppResult<Json<MessageResponse>> {
    services::resend_code(&state, &payload.email).await?;
    Ok(Json(MessageResponse {
        message: "Verification code sent.",
    }))
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    AppJson(payload): AppJson<LoginRequest>,
) -> AppResult<(CookieJar, Json<LoginResponse>)> {
    let (user, tokens) = services::login(&state, &payload.email, payload.password).await?;
    let jar = with_refresh_cookie(&state, jar, &tokens);
    Ok((
        jar,
        Json(LoginResponse {
            message: "Login successful.",
            user: user.into(),
            access_token: tokens.access_token,
        }),
    ))
}

/// Reads the refresh cookie, falling back to `{"refreshToken": ...}` in the body.
#[instrument(skip_all)]
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Result<Bytes, BytesRejection>,
) -> AppResult<(CookieJar, Json<AccessTokenResponse>)> {
    let body = body.map_err(|e| AppError::InvalidInput(e.body_text()))?;
    let from_cookie = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty());
    let token = from_cookie.or_else(|| {
        serde_json::from_slice::<RefreshRequest>(&body)
            .unwrap_or_default()
            .refresh_token
    });

    let tokens = services::refresh(&state, token).await?;
    let jar = with_refresh_cookie(&state, jar, &tokens);
    Ok((
        jar,
        Json(AccessTokenResponse {
            access_token: tokens.access_token,
        }),
    ))
}

pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Json<MessageResponse>) {
    (
        jar.add(cleared_refresh_cookie(state.config.cookie_secure)),
        Json(MessageResponse {
            message: "Logged out.",
        }),
    )
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<PublicUser>> {
    let user = services::current_user(&state, user_id).await?;
    Ok(Json(user.into()))
}
