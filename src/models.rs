//! Data Models
//! User, Store, Equipment, StockedCrop, CropDemand などのデータ構造定義

use serde::{Deserialize, Serialize};

use crate::error::MarketError;
use crate::geo::Coordinate;

// ========================================
// Constants
// ========================================

pub mod role {
    pub const FARMER: &str = "farmer";
    pub const BUYER: &str = "buyer";
    pub const STORE_OWNER: &str = "storeowner";
    pub const OFFICER: &str = "officer";

    pub const ALL: [&str; 4] = [FARMER, BUYER, STORE_OWNER, OFFICER];
}

pub mod rate_unit {
    pub const PER_HOUR: &str = "per hour";
    pub const PER_DAY: &str = "per day";
}

pub mod equipment_status {
    // "rented" へ遷移する操作は無い
    pub const AVAILABLE: &str = "available";
}

pub mod store_size {
    pub const ALL: [&str; 3] = ["small", "wholeseller", "retailer"];
}

/// Lower-cases and drops separators so "Disk Harrow", "disk-harrow" and
/// "DiskHarrow" compare equal.
fn category_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

// ========================================
// Categories
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquipmentType {
    Tractor,
    Seeder,
    Harvester,
    Cultivator,
    Plower,
    DiskHarrow,
}

impl EquipmentType {
    pub const ALL: [EquipmentType; 6] = [
        Self::Tractor,
        Self::Seeder,
        Self::Harvester,
        Self::Cultivator,
        Self::Plower,
        Self::DiskHarrow,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tractor => "Tractor",
            Self::Seeder => "Seeder",
            Self::Harvester => "Harvester",
            Self::Cultivator => "Cultivator",
            Self::Plower => "Plower",
            Self::DiskHarrow => "DiskHarrow",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let key = category_key(raw);
        Self::ALL.into_iter().find(|t| category_key(t.as_str()) == key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    Equipment,
    PesticideFertilizer,
}

impl StoreType {
    pub const ALL: [StoreType; 2] = [Self::Equipment, Self::PesticideFertilizer];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equipment => "equipment-store",
            Self::PesticideFertilizer => "pesticide-fertilizer-store",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let key = category_key(raw);
        Self::ALL.into_iter().find(|t| category_key(t.as_str()) == key)
    }
}

// ========================================
// Request helpers
// ========================================

/// `geolocation` as sent by clients. Both halves are optional so that a
/// missing value is reported as a validation error instead of a JSON rejection.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct GeoInput {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

impl GeoInput {
    pub fn into_coordinate(self) -> Option<Coordinate> {
        Coordinate::from_parts(self.lat, self.lng)
    }
}

/// Search origin: absent or half-filled → `MissingOrigin`, out of range →
/// `InvalidCoordinate`.
pub fn require_origin(geo: Option<GeoInput>) -> Result<Coordinate, MarketError> {
    geo.and_then(GeoInput::into_coordinate)
        .ok_or(MarketError::MissingOrigin)?
        .validate()
}

/// Geolocation attached to a new listing.
fn require_location(geo: Option<GeoInput>) -> Result<Coordinate, MarketError> {
    geo.and_then(GeoInput::into_coordinate)
        .ok_or_else(|| MarketError::Validation("geolocation is required".to_string()))?
        .validate()
}

fn require_text(value: Option<String>, field: &str) -> Result<String, MarketError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| MarketError::Validation(format!("{} is required", field)))
}

fn optional_text(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Amounts, prices and rates must be finite and strictly positive.
fn require_positive(value: Option<f64>, field: &str) -> Result<f64, MarketError> {
    match value {
        None => Err(MarketError::Validation(format!("{} is required", field))),
        Some(v) if v.is_finite() && v > 0.0 => Ok(v),
        Some(v) => Err(MarketError::Validation(format!(
            "{} must be a positive number, got {}",
            field, v
        ))),
    }
}

// ========================================
// User (owner directory)
// ========================================

/// User (DB row)
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub user_id: String,
    pub role: String,
    pub name: String,
    pub phone: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub role: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub geolocation: Option<GeoInput>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub role: String,
    pub name: String,
    pub phone: Option<String>,
    pub location: Option<Coordinate>,
}

impl CreateUserRequest {
    pub fn validate(self) -> Result<NewUser, MarketError> {
        let role = require_text(self.role, "role")?.to_lowercase();
        if !role::ALL.contains(&role.as_str()) {
            return Err(MarketError::Validation(format!(
                "role must be one of {}",
                role::ALL.join(", ")
            )));
        }
        let location = match self.geolocation {
            Some(geo) => Some(require_location(Some(geo))?),
            None => None,
        };
        Ok(NewUser {
            role,
            name: require_text(self.name, "name")?,
            phone: optional_text(self.phone),
            location,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub role: String,
    pub name: String,
    pub phone: Option<String>,
    pub geolocation: Option<Coordinate>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl UserResponse {
    pub fn from_row(u: &User) -> Self {
        Self {
            id: u.user_id.clone(),
            role: u.role.clone(),
            name: u.name.clone(),
            phone: u.phone.clone(),
            geolocation: Coordinate::from_parts(u.lat, u.lng),
            created_at_ms: u.created_at_ms,
            updated_at_ms: u.updated_at_ms,
        }
    }
}

// ========================================
// Store
// ========================================

/// Store (DB row)
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Store {
    pub store_id: String,
    pub owner_id: String,
    pub owner_name: Option<String>,
    pub store_name: String,
    pub store_type: String,
    pub store_size: Option<String>,
    pub contact: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterStoreRequest {
    pub store_name: Option<String>,
    pub store_type: Option<String>,
    pub store_size: Option<String>,
    pub owner_id: Option<String>,
    pub owner_name: Option<String>,
    pub contact: Option<String>,
    pub geolocation: Option<GeoInput>,
}

#[derive(Debug, Clone)]
pub struct NewStore {
    pub owner_id: String,
    pub owner_name: Option<String>,
    pub store_name: String,
    pub store_type: StoreType,
    pub store_size: Option<String>,
    pub contact: String,
    pub location: Coordinate,
}

impl RegisterStoreRequest {
    pub fn validate(self) -> Result<NewStore, MarketError> {
        let raw_type = require_text(self.store_type, "storeType")?;
        let store_type = StoreType::parse(&raw_type)
            .ok_or_else(|| MarketError::Validation(format!("unknown storeType: {}", raw_type)))?;
        let store_size = optional_text(self.store_size).map(|s| s.to_lowercase());
        if let Some(size) = &store_size {
            if !store_size::ALL.contains(&size.as_str()) {
                return Err(MarketError::Validation(format!("unknown storeSize: {}", size)));
            }
        }
        Ok(NewStore {
            store_name: require_text(self.store_name, "storeName")?,
            store_type,
            store_size,
            owner_id: require_text(self.owner_id, "ownerId")?,
            owner_name: optional_text(self.owner_name),
            contact: require_text(self.contact, "contact")?,
            location: require_location(self.geolocation)?,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreResponse {
    pub id: String,
    pub owner_id: String,
    pub owner_name: Option<String>,
    pub store_name: String,
    pub store_type: String,
    pub store_size: Option<String>,
    pub contact: String,
    pub geolocation: Option<Coordinate>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl StoreResponse {
    pub fn from_row(s: &Store) -> Self {
        Self {
            id: s.store_id.clone(),
            owner_id: s.owner_id.clone(),
            owner_name: s.owner_name.clone(),
            store_name: s.store_name.clone(),
            store_type: s.store_type.clone(),
            store_size: s.store_size.clone(),
            contact: s.contact.clone(),
            geolocation: Coordinate::from_parts(s.lat, s.lng),
            created_at_ms: s.created_at_ms,
            updated_at_ms: s.updated_at_ms,
        }
    }
}

// ========================================
// Rent Equipment
// ========================================

/// Equipment (DB row)
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Equipment {
    pub equipment_id: String,
    pub equipment_name: String,
    pub equipment_type: String,
    pub rate_amount: f64,
    pub rate_unit: String,
    pub description: Option<String>,
    pub owner_name: String,
    pub owner_id: String,
    pub contact: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub status: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateInput {
    pub amount: Option<f64>,
    pub unit: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterEquipmentRequest {
    pub equipment_name: Option<String>,
    #[serde(rename = "type")]
    pub equipment_type: Option<String>,
    pub rate: Option<RateInput>,
    pub description: Option<String>,
    pub owner_name: Option<String>,
    pub owner_id: Option<String>,
    pub contact: Option<String>,
    pub geolocation: Option<GeoInput>,
}

#[derive(Debug, Clone)]
pub struct NewEquipment {
    pub equipment_name: String,
    pub equipment_type: EquipmentType,
    pub rate_amount: f64,
    pub rate_unit: &'static str,
    pub description: Option<String>,
    pub owner_name: String,
    pub owner_id: String,
    pub contact: String,
    pub location: Coordinate,
}

impl RegisterEquipmentRequest {
    pub fn validate(self) -> Result<NewEquipment, MarketError> {
        let raw_type = require_text(self.equipment_type, "type")?;
        let equipment_type = EquipmentType::parse(&raw_type)
            .ok_or_else(|| MarketError::Validation(format!("unknown equipment type: {}", raw_type)))?;

        let rate = self
            .rate
            .ok_or_else(|| MarketError::Validation("rate is required".to_string()))?;
        let rate_amount = require_positive(rate.amount, "rate.amount")?;
        let rate_unit = match require_text(rate.unit, "rate.unit")?.to_lowercase().as_str() {
            rate_unit::PER_HOUR => rate_unit::PER_HOUR,
            rate_unit::PER_DAY => rate_unit::PER_DAY,
            other => {
                return Err(MarketError::Validation(format!(
                    "rate.unit must be '{}' or '{}', got '{}'",
                    rate_unit::PER_HOUR,
                    rate_unit::PER_DAY,
                    other
                )))
            }
        };

        Ok(NewEquipment {
            equipment_name: require_text(self.equipment_name, "equipmentName")?,
            equipment_type,
            rate_amount,
            rate_unit,
            description: optional_text(self.description),
            owner_name: require_text(self.owner_name, "ownerName")?,
            owner_id: require_text(self.owner_id, "ownerId")?,
            contact: require_text(self.contact, "contact")?,
            location: require_location(self.geolocation)?,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentResponse {
    pub id: String,
    pub equipment_name: String,
    #[serde(rename = "type")]
    pub equipment_type: String,
    pub rate: RateInput,
    pub description: Option<String>,
    pub owner_name: String,
    pub owner_id: String,
    pub contact: String,
    pub geolocation: Option<Coordinate>,
    pub status: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl EquipmentResponse {
    pub fn from_row(e: &Equipment) -> Self {
        Self {
            id: e.equipment_id.clone(),
            equipment_name: e.equipment_name.clone(),
            equipment_type: e.equipment_type.clone(),
            rate: RateInput {
                amount: Some(e.rate_amount),
                unit: Some(e.rate_unit.clone()),
            },
            description: e.description.clone(),
            owner_name: e.owner_name.clone(),
            owner_id: e.owner_id.clone(),
            contact: e.contact.clone(),
            geolocation: Coordinate::from_parts(e.lat, e.lng),
            status: e.status.clone(),
            created_at_ms: e.created_at_ms,
            updated_at_ms: e.updated_at_ms,
        }
    }
}

// ========================================
// Stocked Crop (supply)
// ========================================

/// StockedCrop (DB row)
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StockedCrop {
    pub stock_id: String,
    pub crop_name: String,
    pub amount: f64,
    pub price: f64,
    pub farmer_id: String,
    pub contact_of_farmer: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// StockedCrop joined with the farmer's profile, used for matching.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StockListing {
    #[sqlx(flatten)]
    pub stock: StockedCrop,
    pub farmer_name: Option<String>,
    pub farmer_lat: Option<f64>,
    pub farmer_lng: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterStockRequest {
    pub crop_name: Option<String>,
    pub amount: Option<f64>,
    pub price: Option<f64>,
    pub farmer_id: Option<String>,
    pub contact_of_farmer: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewStock {
    pub crop_name: String,
    pub amount: f64,
    pub price: f64,
    pub farmer_id: String,
    pub contact_of_farmer: String,
}

impl RegisterStockRequest {
    pub fn validate(self) -> Result<NewStock, MarketError> {
        Ok(NewStock {
            crop_name: require_text(self.crop_name, "cropName")?,
            amount: require_positive(self.amount, "amount")?,
            price: require_positive(self.price, "price")?,
            farmer_id: require_text(self.farmer_id, "farmerId")?,
            contact_of_farmer: require_text(self.contact_of_farmer, "contactOfFarmer")?,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockResponse {
    pub id: String,
    pub crop_name: String,
    pub amount: f64,
    pub price: f64,
    pub farmer_id: String,
    pub contact_of_farmer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub farmer_name: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl StockResponse {
    pub fn from_row(s: &StockedCrop) -> Self {
        Self {
            id: s.stock_id.clone(),
            crop_name: s.crop_name.clone(),
            amount: s.amount,
            price: s.price,
            farmer_id: s.farmer_id.clone(),
            contact_of_farmer: s.contact_of_farmer.clone(),
            farmer_name: None,
            created_at_ms: s.created_at_ms,
            updated_at_ms: s.updated_at_ms,
        }
    }

    pub fn from_listing(l: &StockListing) -> Self {
        Self {
            farmer_name: Some(l.farmer_name.clone().unwrap_or_else(|| UNKNOWN_OWNER.to_string())),
            ..Self::from_row(&l.stock)
        }
    }
}

// ========================================
// Crop Demand
// ========================================

pub const UNKNOWN_OWNER: &str = "Unknown";

/// CropDemand (DB row)
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CropDemand {
    pub demand_id: String,
    pub crop_name: String,
    pub amount: f64,
    pub price: f64,
    pub buyer_id: String,
    pub contact: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// CropDemand joined with the buyer's profile, used for matching.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DemandListing {
    #[sqlx(flatten)]
    pub demand: CropDemand,
    pub buyer_name: Option<String>,
    pub buyer_lat: Option<f64>,
    pub buyer_lng: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDemandRequest {
    pub crop_name: Option<String>,
    pub amount: Option<f64>,
    pub price: Option<f64>,
    pub contact: Option<String>,
    pub buyer_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewDemand {
    pub crop_name: String,
    pub amount: f64,
    pub price: f64,
    pub buyer_id: String,
    pub contact: String,
}

impl RegisterDemandRequest {
    pub fn validate(self) -> Result<NewDemand, MarketError> {
        Ok(NewDemand {
            crop_name: require_text(self.crop_name, "cropName")?,
            amount: require_positive(self.amount, "amount")?,
            price: require_positive(self.price, "price")?,
            contact: require_text(self.contact, "contact")?,
            buyer_id: require_text(self.buyer_id, "buyerId")?,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DemandResponse {
    pub id: String,
    pub crop_name: String,
    pub amount: f64,
    pub price: f64,
    pub buyer_id: String,
    pub contact: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_name: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl DemandResponse {
    pub fn from_row(d: &CropDemand) -> Self {
        Self {
            id: d.demand_id.clone(),
            crop_name: d.crop_name.clone(),
            amount: d.amount,
            price: d.price,
            buyer_id: d.buyer_id.clone(),
            contact: d.contact.clone(),
            buyer_name: None,
            created_at_ms: d.created_at_ms,
            updated_at_ms: d.updated_at_ms,
        }
    }

    pub fn from_listing(l: &DemandListing) -> Self {
        Self {
            buyer_name: Some(l.buyer_name.clone().unwrap_or_else(|| UNKNOWN_OWNER.to_string())),
            ..Self::from_row(&l.demand)
        }
    }
}

// ========================================
// Search Requests
// ========================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSearchRequest {
    pub search: Option<String>,
    pub store_type: Option<String>,
    pub geolocation: Option<GeoInput>,
}

#[derive(Debug, Deserialize)]
pub struct EquipmentSearchRequest {
    pub search: Option<String>,
    #[serde(rename = "type")]
    pub equipment_type: Option<String>,
    pub geolocation: Option<GeoInput>,
}

/// Body of both `/api/buyers/search` and `/api/stockedcrops/search`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropSearchRequest {
    pub crop_name: Option<String>,
    pub geolocation: Option<GeoInput>,
}
