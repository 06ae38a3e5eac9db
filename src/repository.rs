//! Listing Repository
//! 4 種類の listing と owner directory への読み書き

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite};
use tracing::info;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::MarketError;
use crate::models::{
    equipment_status, CropDemand, DemandListing, Equipment, NewDemand, NewEquipment, NewStock,
    NewStore, NewUser, StockListing, StockedCrop, Store, User, role,
};

pub type RepoResult<T> = Result<T, MarketError>;

/// Category / name filter shared by every listing kind.
///
/// `category` matches exactly (case-insensitive); `name` is a case-insensitive
/// substring. `None` means "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingFilter {
    pub category: Option<String>,
    pub name: Option<String>,
}

impl ListingFilter {
    pub fn new(category: Option<&str>, name: Option<&str>) -> Self {
        let clean = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(String::from);
        Self {
            category: clean(category),
            name: clean(name),
        }
    }

    pub fn by_name(name: &str) -> Self {
        Self::new(None, Some(name))
    }
}

/// Storage seam used by the matching engine and the cross-match notifier.
///
/// Reads return rows in insertion order; empty results are `Ok(vec![])`.
#[async_trait]
pub trait MarketRepository: Send + Sync {
    async fn find_stores(&self, filter: &ListingFilter) -> RepoResult<Vec<Store>>;
    async fn find_equipment(&self, filter: &ListingFilter) -> RepoResult<Vec<Equipment>>;
    /// Stocked crops joined with the owning farmer's name and geolocation.
    async fn find_stocks(&self, filter: &ListingFilter) -> RepoResult<Vec<StockListing>>;
    /// Crop demands joined with the owning buyer's name and geolocation.
    async fn find_demands(&self, filter: &ListingFilter) -> RepoResult<Vec<DemandListing>>;

    async fn insert_user(&self, user: NewUser) -> RepoResult<User>;
    async fn list_users(&self) -> RepoResult<Vec<User>>;
    async fn insert_store(&self, store: NewStore) -> RepoResult<Store>;
    async fn insert_equipment(&self, equipment: NewEquipment) -> RepoResult<Equipment>;
    /// Fails with `Validation` when `farmer_id` is not a registered user.
    async fn insert_stock(&self, stock: NewStock) -> RepoResult<StockedCrop>;
    /// Fails with `Validation` when `buyer_id` is not a registered user.
    async fn insert_demand(&self, demand: NewDemand) -> RepoResult<CropDemand>;

    /// id → phone for the given owners. Owners without a phone are skipped.
    async fn find_owner_contacts_by_ids(
        &self,
        owner_ids: &BTreeSet<String>,
    ) -> RepoResult<HashMap<String, String>>;
}

// ========================================
// SQLite 実装
// ========================================

#[derive(Clone)]
pub struct SqliteRepository {
    db: DbPool,
}

impl SqliteRepository {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    async fn require_user(&self, user_id: &str, expected_role: &str) -> RepoResult<()> {
        let found: Option<(String,)> = sqlx::query_as("SELECT role FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;

        match found {
            Some((r,)) if r == expected_role => Ok(()),
            Some((r,)) => Err(MarketError::Validation(format!(
                "user {} is a {}, expected {}",
                user_id, r, expected_role
            ))),
            None => Err(MarketError::Validation(format!("{} not found: {}", expected_role, user_id))),
        }
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl MarketRepository for SqliteRepository {
    async fn find_stores(&self, filter: &ListingFilter) -> RepoResult<Vec<Store>> {
        let stores = sqlx::query_as(r#"
            SELECT * FROM stores
            WHERE (?1 IS NULL OR lower(store_type) = lower(?1))
              AND (?2 IS NULL OR instr(lower(store_name), lower(?2)) > 0)
            ORDER BY created_at_ms, rowid
        "#)
        .bind(&filter.category)
        .bind(&filter.name)
        .fetch_all(&self.db)
        .await?;
        Ok(stores)
    }

    async fn find_equipment(&self, filter: &ListingFilter) -> RepoResult<Vec<Equipment>> {
        let equipment = sqlx::query_as(r#"
            SELECT * FROM equipment
            WHERE (?1 IS NULL OR lower(equipment_type) = lower(?1))
              AND (?2 IS NULL OR instr(lower(equipment_name), lower(?2)) > 0)
            ORDER BY created_at_ms, rowid
        "#)
        .bind(&filter.category)
        .bind(&filter.name)
        .fetch_all(&self.db)
        .await?;
        Ok(equipment)
    }

    async fn find_stocks(&self, filter: &ListingFilter) -> RepoResult<Vec<StockListing>> {
        let stocks = sqlx::query_as(r#"
            SELECT s.*, u.name AS farmer_name, u.lat AS farmer_lat, u.lng AS farmer_lng
            FROM stocked_crops s
            LEFT JOIN users u ON u.user_id = s.farmer_id
            WHERE (?1 IS NULL OR instr(lower(s.crop_name), lower(?1)) > 0)
            ORDER BY s.created_at_ms, s.rowid
        "#)
        .bind(&filter.name)
        .fetch_all(&self.db)
        .await?;
        Ok(stocks)
    }

    async fn find_demands(&self, filter: &ListingFilter) -> RepoResult<Vec<DemandListing>> {
        let demands = sqlx::query_as(r#"
            SELECT d.*, u.name AS buyer_name, u.lat AS buyer_lat, u.lng AS buyer_lng
            FROM crop_demands d
            LEFT JOIN users u ON u.user_id = d.buyer_id
            WHERE (?1 IS NULL OR instr(lower(d.crop_name), lower(?1)) > 0)
            ORDER BY d.created_at_ms, d.rowid
        "#)
        .bind(&filter.name)
        .fetch_all(&self.db)
        .await?;
        Ok(demands)
    }

    async fn insert_user(&self, user: NewUser) -> RepoResult<User> {
        let now = now_ms();
        let row = User {
            user_id: new_id(),
            role: user.role,
            name: user.name,
            phone: user.phone,
            lat: user.location.map(|c| c.lat),
            lng: user.location.map(|c| c.lng),
            created_at_ms: now,
            updated_at_ms: now,
        };

        sqlx::query(r#"
            INSERT INTO users (user_id, role, name, phone, lat, lng, created_at_ms, updated_at_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#)
        .bind(&row.user_id)
        .bind(&row.role)
        .bind(&row.name)
        .bind(&row.phone)
        .bind(row.lat)
        .bind(row.lng)
        .bind(row.created_at_ms)
        .bind(row.updated_at_ms)
        .execute(&self.db)
        .await?;

        info!(user_id = %row.user_id, role = %row.role, "User registered");
        Ok(row)
    }

    async fn list_users(&self) -> RepoResult<Vec<User>> {
        let users = sqlx::query_as("SELECT * FROM users ORDER BY created_at_ms DESC, rowid DESC")
            .fetch_all(&self.db)
            .await?;
        Ok(users)
    }

    async fn insert_store(&self, store: NewStore) -> RepoResult<Store> {
        let now = now_ms();
        let row = Store {
            store_id: new_id(),
            owner_id: store.owner_id,
            owner_name: store.owner_name,
            store_name: store.store_name,
            store_type: store.store_type.as_str().to_string(),
            store_size: store.store_size,
            contact: store.contact,
            lat: Some(store.location.lat),
            lng: Some(store.location.lng),
            created_at_ms: now,
            updated_at_ms: now,
        };

        sqlx::query(r#"
            INSERT INTO stores (
                store_id, owner_id, owner_name, store_name, store_type, store_size,
                contact, lat, lng, created_at_ms, updated_at_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#)
        .bind(&row.store_id)
        .bind(&row.owner_id)
        .bind(&row.owner_name)
        .bind(&row.store_name)
        .bind(&row.store_type)
        .bind(&row.store_size)
        .bind(&row.contact)
        .bind(row.lat)
        .bind(row.lng)
        .bind(row.created_at_ms)
        .bind(row.updated_at_ms)
        .execute(&self.db)
        .await?;

        info!(store_id = %row.store_id, store_type = %row.store_type, "Store registered");
        Ok(row)
    }

    async fn insert_equipment(&self, equipment: NewEquipment) -> RepoResult<Equipment> {
        let now = now_ms();
        let row = Equipment {
            equipment_id: new_id(),
            equipment_name: equipment.equipment_name,
            equipment_type: equipment.equipment_type.as_str().to_string(),
            rate_amount: equipment.rate_amount,
            rate_unit: equipment.rate_unit.to_string(),
            description: equipment.description,
            owner_name: equipment.owner_name,
            owner_id: equipment.owner_id,
            contact: equipment.contact,
            lat: Some(equipment.location.lat),
            lng: Some(equipment.location.lng),
            status: equipment_status::AVAILABLE.to_string(),
            created_at_ms: now,
            updated_at_ms: now,
        };

        sqlx::query(r#"
            INSERT INTO equipment (
                equipment_id, equipment_name, equipment_type, rate_amount, rate_unit,
                description, owner_name, owner_id, contact, lat, lng, status,
                created_at_ms, updated_at_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#)
        .bind(&row.equipment_id)
        .bind(&row.equipment_name)
        .bind(&row.equipment_type)
        .bind(row.rate_amount)
        .bind(&row.rate_unit)
        .bind(&row.description)
        .bind(&row.owner_name)
        .bind(&row.owner_id)
        .bind(&row.contact)
        .bind(row.lat)
        .bind(row.lng)
        .bind(&row.status)
        .bind(row.created_at_ms)
        .bind(row.updated_at_ms)
        .execute(&self.db)
        .await?;

        info!(equipment_id = %row.equipment_id, equipment_type = %row.equipment_type, "Equipment registered");
        Ok(row)
    }

    async fn insert_stock(&self, stock: NewStock) -> RepoResult<StockedCrop> {
        self.require_user(&stock.farmer_id, role::FARMER).await?;

        let now = now_ms();
        let row = StockedCrop {
            stock_id: new_id(),
            crop_name: stock.crop_name,
            amount: stock.amount,
            price: stock.price,
            farmer_id: stock.farmer_id,
            contact_of_farmer: stock.contact_of_farmer,
            created_at_ms: now,
            updated_at_ms: now,
        };

        sqlx::query(r#"
            INSERT INTO stocked_crops (
                stock_id, crop_name, amount, price, farmer_id, contact_of_farmer,
                created_at_ms, updated_at_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#)
        .bind(&row.stock_id)
        .bind(&row.crop_name)
        .bind(row.amount)
        .bind(row.price)
        .bind(&row.farmer_id)
        .bind(&row.contact_of_farmer)
        .bind(row.created_at_ms)
        .bind(row.updated_at_ms)
        .execute(&self.db)
        .await?;

        info!(stock_id = %row.stock_id, crop = %row.crop_name, "Stocked crop registered");
        Ok(row)
    }

    async fn insert_demand(&self, demand: NewDemand) -> RepoResult<CropDemand> {
        self.require_user(&demand.buyer_id, role::BUYER).await?;

        let now = now_ms();
        let row = CropDemand {
            demand_id: new_id(),
            crop_name: demand.crop_name,
            amount: demand.amount,
            price: demand.price,
            buyer_id: demand.buyer_id,
            contact: demand.contact,
            created_at_ms: now,
            updated_at_ms: now,
        };

        sqlx::query(r#"
            INSERT INTO crop_demands (
                demand_id, crop_name, amount, price, buyer_id, contact,
                created_at_ms, updated_at_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#)
        .bind(&row.demand_id)
        .bind(&row.crop_name)
        .bind(row.amount)
        .bind(row.price)
        .bind(&row.buyer_id)
        .bind(&row.contact)
        .bind(row.created_at_ms)
        .bind(row.updated_at_ms)
        .execute(&self.db)
        .await?;

        info!(demand_id = %row.demand_id, crop = %row.crop_name, "Crop demand registered");
        Ok(row)
    }

    async fn find_owner_contacts_by_ids(
        &self,
        owner_ids: &BTreeSet<String>,
    ) -> RepoResult<HashMap<String, String>> {
        if owner_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT user_id, phone FROM users WHERE phone IS NOT NULL AND trim(phone) <> '' AND user_id IN (",
        );
        let mut ids = qb.separated(", ");
        for id in owner_ids {
            ids.push_bind(id);
        }
        ids.push_unseparated(")");

        let rows: Vec<(String, String)> = qb.build_query_as().fetch_all(&self.db).await?;
        Ok(rows.into_iter().collect())
    }
}
