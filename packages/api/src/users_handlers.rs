// ABOUTME: HTTP request handlers for registration, login and the user profile
// ABOUTME: Public endpoints hash credentials and issue bearer tokens

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chainlab_identity::User;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::auth::{self, AuthError, AuthUser};
use crate::response::{ApiError, ApiResponse};
use crate::AppState;

#[derive(Deserialize)]
pub struct RegisterRequest {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub password: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = request.user_id.trim();
    if user_id.is_empty() {
        return Err(ApiError::BadRequest("userID must not be empty".to_string()));
    }
    if request.password.is_empty() {
        return Err(ApiError::BadRequest(
            "password must not be empty".to_string(),
        ));
    }

    let password_hash = auth::hash_password(&request.password)?;
    state
        .storage
        .create_user(&User::new(user_id, password_hash))
        .await?;

    info!("Registered user: {}", user_id);
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(json!({ "userID": user_id }))),
    ))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Same rejection whether the user is unknown or the password is wrong.
    let user = state
        .storage
        .find_user(request.user_id.trim())
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    if !auth::verify_password(&user.password_hash, &request.password)? {
        return Err(AuthError::InvalidCredentials.into());
    }

    let token = auth::issue_token(&user.id, &state.auth.token_secret, state.auth.token_ttl)?;

    info!("User logged in: {}", user.id);
    Ok(Json(ApiResponse::success(json!({ "token": token }))))
}

pub async fn profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.storage.get_user(&user.id).await?;
    Ok(Json(ApiResponse::success(json!({
        "userID": user.id,
        "courseProgress": user.course_progress,
        "sandboxState": user.sandbox.state.as_str(),
    }))))
}

#[derive(Deserialize)]
pub struct ProgressRequest {
    #[serde(rename = "courseProgress")]
    pub course_progress: i64,
}

pub async fn update_progress(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<ProgressRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.course_progress < 0 {
        return Err(ApiError::BadRequest(
            "courseProgress must not be negative".to_string(),
        ));
    }

    state
        .storage
        .set_course_progress(&user.id, request.course_progress)
        .await?;

    Ok(Json(ApiResponse::success(json!({
        "userID": user.id,
        "courseProgress": request.course_progress,
    }))))
}
