//! Database Module
//! SQLite を使用した users/stores/equipment/stocked_crops/crop_demands の管理

use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Sqlite,
};
use std::str::FromStr;
use tracing::info;

/// データベース接続プール
pub type DbPool = Pool<Sqlite>;

/// データベースを初期化
pub async fn init_db(db_path: &str) -> Result<DbPool> {
    let db_url = format!("sqlite:{}?mode=rwc", db_path);

    info!("Initializing database: {}", db_path);

    let options = SqliteConnectOptions::from_str(&db_url)?
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

/// インメモリDB（テスト用）
///
/// 接続ごとに別のDBになるので接続数は 1 に固定する
pub async fn open_in_memory() -> Result<DbPool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// スキーマ作成
async fn create_schema(pool: &DbPool) -> Result<()> {
    // users テーブル（owner の連絡先と位置）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY,
            role TEXT NOT NULL,
            name TEXT NOT NULL,
            phone TEXT,
            lat REAL,
            lng REAL,
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL
        )
    "#)
    .execute(pool)
    .await?;

    // stores テーブル
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS stores (
            store_id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            owner_name TEXT,
            store_name TEXT NOT NULL,
            store_type TEXT NOT NULL,
            store_size TEXT,
            contact TEXT NOT NULL,
            lat REAL,
            lng REAL,
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL
        )
    "#)
    .execute(pool)
    .await?;

    // equipment テーブル（レンタル機材）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS equipment (
            equipment_id TEXT PRIMARY KEY,
            equipment_name TEXT NOT NULL,
            equipment_type TEXT NOT NULL,
            rate_amount REAL NOT NULL CHECK (rate_amount >= 0),
            rate_unit TEXT NOT NULL,
            description TEXT,
            owner_name TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            contact TEXT NOT NULL,
            lat REAL,
            lng REAL,
            status TEXT NOT NULL DEFAULT 'available',
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL
        )
    "#)
    .execute(pool)
    .await?;

    // stocked_crops テーブル（供給）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS stocked_crops (
            stock_id TEXT PRIMARY KEY,
            crop_name TEXT NOT NULL,
            amount REAL NOT NULL CHECK (amount >= 0),
            price REAL NOT NULL CHECK (price >= 0),
            farmer_id TEXT NOT NULL,
            contact_of_farmer TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL,
            FOREIGN KEY (farmer_id) REFERENCES users(user_id)
        )
    "#)
    .execute(pool)
    .await?;

    // crop_demands テーブル（需要）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS crop_demands (
            demand_id TEXT PRIMARY KEY,
            crop_name TEXT NOT NULL,
            amount REAL NOT NULL CHECK (amount >= 0),
            price REAL NOT NULL CHECK (price >= 0),
            buyer_id TEXT NOT NULL,
            contact TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL,
            FOREIGN KEY (buyer_id) REFERENCES users(user_id)
        )
    "#)
    .execute(pool)
    .await?;

    // インデックス作成
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_stores_type ON stores(store_type)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_equipment_type ON equipment(equipment_type)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_stocked_crops_farmer ON stocked_crops(farmer_id)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_crop_demands_buyer ON crop_demands(buyer_id)")
        .execute(pool).await?;

    Ok(())
}
