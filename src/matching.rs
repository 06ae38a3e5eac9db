//! Matching Engine
//!
//! Pulls candidates from the repository, attaches the great-circle distance
//! from the requester's origin and orders them nearest first. One generic
//! [`rank`] serves all four listing kinds; the kinds differ only in where their
//! location comes from and whether price breaks distance ties.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::MarketError;
use crate::geo::{distance_km, Coordinate};
use crate::models::{DemandListing, Equipment, EquipmentType, StockListing, Store, StoreType};
use crate::repository::{ListingFilter, MarketRepository};

/// Shape the ranking needs from a listing.
pub trait Listing {
    /// `None` when the listing (or its owner) has no usable location.
    fn location(&self) -> Option<Coordinate>;

    fn price(&self) -> f64;
}

impl Listing for Store {
    fn location(&self) -> Option<Coordinate> {
        Coordinate::from_parts(self.lat, self.lng)
    }

    fn price(&self) -> f64 {
        0.0
    }
}

impl Listing for Equipment {
    fn location(&self) -> Option<Coordinate> {
        Coordinate::from_parts(self.lat, self.lng)
    }

    fn price(&self) -> f64 {
        self.rate_amount
    }
}

impl Listing for StockListing {
    fn location(&self) -> Option<Coordinate> {
        Coordinate::from_parts(self.farmer_lat, self.farmer_lng)
    }

    fn price(&self) -> f64 {
        self.stock.price
    }
}

impl Listing for DemandListing {
    fn location(&self) -> Option<Coordinate> {
        Coordinate::from_parts(self.buyer_lat, self.buyer_lng)
    }

    fn price(&self) -> f64 {
        self.demand.price
    }
}

/// Secondary ordering among results at exactly the same distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    /// Keep repository order.
    None,
    /// Higher price first.
    PriceDesc,
}

/// A listing with its distance from the search origin. Never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Matched<L> {
    #[serde(flatten)]
    pub listing: L,
    pub distance_km: Option<f64>,
}

impl<L> Matched<L> {
    pub fn map<R>(self, f: impl FnOnce(&L) -> R) -> Matched<R> {
        Matched {
            listing: f(&self.listing),
            distance_km: self.distance_km,
        }
    }
}

/// Attaches distances and sorts.
///
/// Known distances come first, ascending; listings without a usable location
/// keep their relative order at the end. The sort is stable, and equal
/// distances are compared exactly (no tolerance) before `tie_break` applies.
pub fn rank<L: Listing>(origin: Coordinate, candidates: Vec<L>, tie_break: TieBreak) -> Vec<Matched<L>> {
    let mut matched: Vec<Matched<L>> = candidates
        .into_iter()
        .map(|listing| {
            // 座標が壊れている候補は検索全体を失敗させず「距離不明」扱い
            let distance_km = listing
                .location()
                .and_then(|loc| distance_km(origin, loc).ok());
            Matched { listing, distance_km }
        })
        .collect();

    matched.sort_by(|a, b| compare(a, b, tie_break));
    matched
}

fn compare<L: Listing>(a: &Matched<L>, b: &Matched<L>, tie_break: TieBreak) -> Ordering {
    match (a.distance_km, b.distance_km) {
        (Some(da), Some(db)) => da.total_cmp(&db).then_with(|| match tie_break {
            TieBreak::None => Ordering::Equal,
            TieBreak::PriceDesc => b.listing.price().total_cmp(&a.listing.price()),
        }),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

// ========================================
// Engine
// ========================================

#[derive(Clone)]
pub struct MatchingEngine {
    repo: Arc<dyn MarketRepository>,
    limit: Option<usize>,
}

impl MatchingEngine {
    /// `limit = None` returns every match.
    pub fn new(repo: Arc<dyn MarketRepository>, limit: Option<usize>) -> Self {
        Self { repo, limit }
    }

    pub async fn search_stores(
        &self,
        origin: Coordinate,
        store_type: Option<&str>,
        search: Option<&str>,
    ) -> Result<Vec<Matched<Store>>, MarketError> {
        let origin = origin.validate()?;
        let category = store_type.map(|t| StoreType::parse(t).map_or(t, |st| st.as_str()));
        let filter = ListingFilter::new(category, search);

        let stores = self.repo.find_stores(&filter).await?;
        debug!(count = stores.len(), ?filter, "Store candidates");
        Ok(self.finish("stores", rank(origin, stores, TieBreak::None)))
    }

    pub async fn search_equipment(
        &self,
        origin: Coordinate,
        equipment_type: Option<&str>,
        search: Option<&str>,
    ) -> Result<Vec<Matched<Equipment>>, MarketError> {
        let origin = origin.validate()?;
        let category =
            equipment_type.map(|t| EquipmentType::parse(t).map_or(t, |et| et.as_str()));
        let filter = ListingFilter::new(category, search);

        let equipment = self.repo.find_equipment(&filter).await?;
        debug!(count = equipment.len(), ?filter, "Equipment candidates");
        Ok(self.finish("equipment", rank(origin, equipment, TieBreak::None)))
    }

    /// Buyer demands for a crop, nearest buyer first, higher price first on ties.
    pub async fn search_demands(
        &self,
        origin: Coordinate,
        crop_name: &str,
    ) -> Result<Vec<Matched<DemandListing>>, MarketError> {
        let origin = origin.validate()?;
        let crop_name = require_crop_name(crop_name)?;

        let demands = self.repo.find_demands(&ListingFilter::by_name(crop_name)).await?;
        Ok(self.finish("demands", rank(origin, demands, TieBreak::PriceDesc)))
    }

    /// Farmer stock for a crop, nearest farmer first.
    pub async fn search_stocks(
        &self,
        origin: Coordinate,
        crop_name: &str,
    ) -> Result<Vec<Matched<StockListing>>, MarketError> {
        let origin = origin.validate()?;
        let crop_name = require_crop_name(crop_name)?;

        let stocks = self.repo.find_stocks(&ListingFilter::by_name(crop_name)).await?;
        Ok(self.finish("stocks", rank(origin, stocks, TieBreak::None)))
    }

    fn finish<L>(&self, kind: &str, mut ranked: Vec<Matched<L>>) -> Vec<Matched<L>> {
        if let Some(limit) = self.limit {
            ranked.truncate(limit);
        }
        info!(kind, results = ranked.len(), "Search completed");
        ranked
    }
}

fn require_crop_name(crop_name: &str) -> Result<&str, MarketError> {
    let crop_name = crop_name.trim();
    if crop_name.is_empty() {
        return Err(MarketError::Validation("cropName is required".to_string()));
    }
    Ok(crop_name)
}
