//! Rent Equipment API Handlers
//! /api/rentequipment, /api/equipment エンドポイント

use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::error::{api_error, ApiError};
use crate::matching::Matched;
use crate::models::{
    require_origin, EquipmentResponse, EquipmentSearchRequest, RegisterEquipmentRequest,
};
use crate::AppState;

use super::ApiJson;

#[derive(Serialize)]
pub struct EquipmentCreateResponse {
    pub success: bool,
    pub message: String,
    pub equipment: EquipmentResponse,
}

/// POST /api/rentequipment/search - 近い順のレンタル機材一覧
pub async fn search_equipment(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<EquipmentSearchRequest>,
) -> Result<Json<Vec<Matched<EquipmentResponse>>>, ApiError> {
    let origin = require_origin(req.geolocation).map_err(api_error)?;

    let ranked = state
        .engine
        .search_equipment(origin, req.equipment_type.as_deref(), req.search.as_deref())
        .await
        .map_err(api_error)?;

    Ok(Json(ranked.into_iter().map(|m| m.map(EquipmentResponse::from_row)).collect()))
}

/// POST /api/equipment/register - レンタル機材登録
pub async fn register_equipment(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RegisterEquipmentRequest>,
) -> Result<(StatusCode, Json<EquipmentCreateResponse>), ApiError> {
    let new_equipment = req.validate().map_err(api_error)?;
    let equipment = state.repo.insert_equipment(new_equipment).await.map_err(api_error)?;

    info!(
        "Equipment created: equipment_id={}, owner={}",
        equipment.equipment_id, equipment.owner_id
    );

    Ok((
        StatusCode::CREATED,
        Json(EquipmentCreateResponse {
            success: true,
            message: "Equipment registered successfully".to_string(),
            equipment: EquipmentResponse::from_row(&equipment),
        }),
    ))
}
