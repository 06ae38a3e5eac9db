//! Stores API Handlers
//! /api/stores エンドポイント

use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::error::{api_error, ApiError};
use crate::matching::Matched;
use crate::models::{require_origin, RegisterStoreRequest, StoreResponse, StoreSearchRequest};
use crate::AppState;

use super::ApiJson;

#[derive(Serialize)]
pub struct StoreCreateResponse {
    pub success: bool,
    pub message: String,
    pub store: StoreResponse,
}

/// POST /api/stores/search - 近い順の店舗一覧
pub async fn search_stores(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<StoreSearchRequest>,
) -> Result<Json<Vec<Matched<StoreResponse>>>, ApiError> {
    let origin = require_origin(req.geolocation).map_err(api_error)?;

    let ranked = state
        .engine
        .search_stores(origin, req.store_type.as_deref(), req.search.as_deref())
        .await
        .map_err(api_error)?;

    Ok(Json(ranked.into_iter().map(|m| m.map(StoreResponse::from_row)).collect()))
}

/// POST /api/stores/register - 店舗登録
pub async fn register_store(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RegisterStoreRequest>,
) -> Result<(StatusCode, Json<StoreCreateResponse>), ApiError> {
    let new_store = req.validate().map_err(api_error)?;
    let store = state.repo.insert_store(new_store).await.map_err(api_error)?;

    info!("Store created: store_id={}, type={}", store.store_id, store.store_type);

    Ok((
        StatusCode::CREATED,
        Json(StoreCreateResponse {
            success: true,
            message: "Store registered successfully".to_string(),
            store: StoreResponse::from_row(&store),
        }),
    ))
}
