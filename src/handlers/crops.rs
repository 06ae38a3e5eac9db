//! Crops API Handlers
//! 買い手の需要 (crop demand) と農家の在庫 (stocked crop) の検索・登録

use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use std::sync::Arc;

use crate::error::{api_error, ApiError, MarketError};
use crate::matching::Matched;
use crate::models::{
    require_origin, CropSearchRequest, DemandResponse, RegisterDemandRequest,
    RegisterStockRequest, StockResponse,
};
use crate::AppState;

use super::ApiJson;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockCreateResponse {
    pub success: bool,
    pub message: String,
    pub crop: StockResponse,
    pub notifications_queued: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DemandCreateResponse {
    pub success: bool,
    pub message: String,
    pub demand: DemandResponse,
    pub notifications_queued: usize,
}

// ========================================
// 検索
// ========================================

/// POST /api/buyers/search - 作物を求める買い手を近い順に
pub async fn search_buyers(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<CropSearchRequest>,
) -> Result<Json<Vec<Matched<DemandResponse>>>, ApiError> {
    let origin = require_origin(req.geolocation).map_err(api_error)?;
    let crop_name = req.crop_name.unwrap_or_default();

    let ranked = state
        .engine
        .search_demands(origin, &crop_name)
        .await
        .map_err(api_error)?;

    if ranked.is_empty() {
        return Err(api_error(MarketError::NotFound(
            "No buyers found for this crop".to_string(),
        )));
    }

    Ok(Json(ranked.into_iter().map(|m| m.map(DemandResponse::from_listing)).collect()))
}

/// POST /api/stockedcrops/search - 作物を在庫している農家を近い順に
pub async fn search_stocked_crops(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<CropSearchRequest>,
) -> Result<Json<Vec<Matched<StockResponse>>>, ApiError> {
    let origin = require_origin(req.geolocation).map_err(api_error)?;
    let crop_name = req.crop_name.unwrap_or_default();

    let ranked = state
        .engine
        .search_stocks(origin, &crop_name)
        .await
        .map_err(api_error)?;

    if ranked.is_empty() {
        return Err(api_error(MarketError::NotFound(
            "No stocked crops found for this crop".to_string(),
        )));
    }

    Ok(Json(ranked.into_iter().map(|m| m.map(StockResponse::from_listing)).collect()))
}

// ========================================
// 登録 (一致する相手へ SMS 通知)
// ========================================

/// POST /api/crop/register - 農家の在庫登録、需要のある買い手へ通知
pub async fn register_stocked_crop(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RegisterStockRequest>,
) -> Result<(StatusCode, Json<StockCreateResponse>), ApiError> {
    let new_stock = req.validate().map_err(api_error)?;
    let registered = state.notifier.register_stock(new_stock).await.map_err(api_error)?;

    Ok((
        StatusCode::CREATED,
        Json(StockCreateResponse {
            success: true,
            message: "Crop stock registered successfully".to_string(),
            crop: StockResponse::from_row(&registered.listing),
            notifications_queued: registered.batches_queued,
        }),
    ))
}

/// POST /api/cropdemand/register - 買い手の需要登録、在庫のある農家へ通知
pub async fn register_crop_demand(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RegisterDemandRequest>,
) -> Result<(StatusCode, Json<DemandCreateResponse>), ApiError> {
    let new_demand = req.validate().map_err(api_error)?;
    let registered = state.notifier.register_demand(new_demand).await.map_err(api_error)?;

    Ok((
        StatusCode::CREATED,
        Json(DemandCreateResponse {
            success: true,
            message: "Crop demand registered successfully".to_string(),
            demand: DemandResponse::from_row(&registered.listing),
            notifications_queued: registered.batches_queued,
        }),
    ))
}
