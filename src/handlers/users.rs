//! Users API Handlers
//! 出品者・買い手の連絡先と位置情報

use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use std::sync::Arc;

use crate::error::{api_error, ApiError};
use crate::models::{CreateUserRequest, UserResponse};
use crate::AppState;

use super::ApiJson;

#[derive(Serialize)]
pub struct UserCreateResponse {
    pub success: bool,
    pub user: UserResponse,
}

#[derive(Serialize)]
pub struct UserListResponse {
    pub users: Vec<UserResponse>,
    pub total: usize,
}

/// POST /api/users - ユーザー登録
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserCreateResponse>), ApiError> {
    let new_user = req.validate().map_err(api_error)?;
    let user = state.repo.insert_user(new_user).await.map_err(api_error)?;

    Ok((
        StatusCode::CREATED,
        Json(UserCreateResponse {
            success: true,
            user: UserResponse::from_row(&user),
        }),
    ))
}

/// GET /api/users - ユーザー一覧
pub async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<UserListResponse>, ApiError> {
    let rows = state.repo.list_users().await.map_err(api_error)?;
    let users: Vec<UserResponse> = rows.iter().map(UserResponse::from_row).collect();
    let total = users.len();

    Ok(Json(UserListResponse { users, total }))
}
