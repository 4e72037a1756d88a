use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Current quantity/reservation state for one (store, variant) pair.
///
/// Created lazily on the first successful receive or adjust, never
/// hard-deleted, and mutated only by the inventory service. Every writer
/// must uphold `quantity >= reserved >= 0` before commit. The `version`
/// column is the optimistic concurrency token; updates carry a
/// `WHERE version = ?` guard.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_positions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub store_id: i64,
    pub variant_id: i64,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub quantity: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub reserved: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub last_cost: Decimal,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
