//! KrishiMitram marketplace service
//! 店舗・レンタル機材・作物の需給を距離順にマッチングし、需給一致時に SMS で通知する

pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod handlers;
pub mod matching;
pub mod models;
pub mod notifier;
pub mod repository;
pub mod sms;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::matching::MatchingEngine;
use crate::notifier::{CrossMatchNotifier, NotificationQueue};
use crate::repository::MarketRepository;

/// Handler 共有状態
pub struct AppState {
    pub repo: Arc<dyn MarketRepository>,
    pub engine: MatchingEngine,
    pub notifier: CrossMatchNotifier,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn MarketRepository>,
        queue: NotificationQueue,
        search_limit: Option<usize>,
    ) -> Self {
        Self {
            engine: MatchingEngine::new(repo.clone(), search_limit),
            notifier: CrossMatchNotifier::new(repo.clone(), queue),
            repo,
        }
    }
}

// ========================================
// ルーター
// ========================================

pub fn build_router(state: Arc<AppState>) -> Router {
    use handlers::{crops, equipment, stores, users};

    Router::new()
        .route("/api/health", get(handlers::health_check))
        .route("/api/users", get(users::list_users).post(users::create_user))
        // Stores
        .route("/api/stores/search", post(stores::search_stores))
        .route("/api/stores/register", post(stores::register_store))
        // Rent Equipment
        .route("/api/rentequipment/search", post(equipment::search_equipment))
        .route("/api/equipment/register", post(equipment::register_equipment))
        // Crops (需要 / 在庫)
        .route("/api/buyers/search", post(crops::search_buyers))
        .route("/api/stockedcrops/search", post(crops::search_stocked_crops))
        .route("/api/crop/register", post(crops::register_stocked_crop))
        .route("/api/cropdemand/register", post(crops::register_crop_demand))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
