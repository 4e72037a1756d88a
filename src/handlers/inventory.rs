use crate::auth::StoreScope;
use crate::entities::{inventory_position, product_variant, stock_lot, stock_movement};
use crate::entities::stock_movement::MovementType;
use crate::errors::ServiceError;
use crate::services::inventory::{
    AdjustStockInput, InventoryService, MovementFilter, ReceiveStockInput,
};
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Trait for handler state that provides access to the inventory service.
pub trait InventoryHandlerState: Clone + Send + Sync + 'static {
    fn inventory_service(&self) -> &InventoryService;
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveStockRequest {
    /// Per-request store hint; resolved through the caller's store scope.
    pub store_id: Option<i64>,
    pub variant_id: i64,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    #[validate(length(min = 1, max = 100))]
    pub lot_code: Option<String>,
    /// ISO date (YYYY-MM-DD)
    pub expiry_date: Option<String>,
    #[validate(length(max = 100))]
    pub reference_id: Option<String>,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdjustStockRequest {
    pub store_id: Option<i64>,
    pub variant_id: i64,
    pub delta: Option<Decimal>,
    pub set_to: Option<Decimal>,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    #[validate(length(max = 100))]
    pub reference_id: Option<String>,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreQuery {
    pub store_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementListQuery {
    pub store_id: Option<i64>,
    pub variant_id: Option<i64>,
    pub movement_type: Option<String>,
    /// Free-text match against reason and reference id
    pub q: Option<String>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_page() -> u64 {
    1
}

fn default_limit() -> u64 {
    50
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveStockResponse {
    pub position: inventory_position::Model,
    pub lot: stock_lot::Model,
    pub movement: stock_movement::Model,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustStockResponse {
    pub position: inventory_position::Model,
    pub movement: stock_movement::Model,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementListResponse {
    pub movements: Vec<stock_movement::Model>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BarcodeLookupResponse {
    pub variant: product_variant::Model,
    pub position: Option<inventory_position::Model>,
}

/// Create the inventory router
pub fn inventory_router<S>() -> Router<S>
where
    S: InventoryHandlerState,
{
    Router::new()
        .route("/receive", post(receive_stock::<S>))
        .route("/adjust", post(adjust_stock::<S>))
        .route("/positions/:variant_id", get(get_position::<S>))
        .route("/movements", get(list_movements::<S>))
        .route("/barcode/:barcode", get(lookup_by_barcode::<S>))
}

/// Receive a batch of stock into the caller's active store.
async fn receive_stock<S>(
    State(state): State<S>,
    scope: StoreScope,
    Json(payload): Json<ReceiveStockRequest>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    payload.validate()?;
    let store_id = scope.require_active_store(payload.store_id)?;
    let expiry_date = parse_expiry_date(payload.expiry_date.as_deref())?;

    let outcome = state
        .inventory_service()
        .receive(ReceiveStockInput {
            store_id,
            variant_id: payload.variant_id,
            quantity: payload.quantity,
            unit_cost: payload.unit_cost,
            lot_code: payload.lot_code,
            expiry_date,
            reference_id: payload.reference_id,
            reason: payload.reason,
            actor_id: Some(scope.actor_id.clone()),
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ReceiveStockResponse {
            position: outcome.position,
            lot: outcome.lot,
            movement: outcome.movement,
        }),
    ))
}

/// Adjust the caller's active store position by delta or to a target.
async fn adjust_stock<S>(
    State(state): State<S>,
    scope: StoreScope,
    Json(payload): Json<AdjustStockRequest>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    payload.validate()?;
    let store_id = scope.require_active_store(payload.store_id)?;

    let outcome = state
        .inventory_service()
        .adjust(AdjustStockInput {
            store_id,
            variant_id: payload.variant_id,
            delta: payload.delta,
            set_to: payload.set_to,
            reason: payload.reason,
            reference_id: payload.reference_id,
            note: payload.note,
            actor_id: Some(scope.actor_id.clone()),
        })
        .await?;

    Ok((
        StatusCode::OK,
        Json(AdjustStockResponse {
            position: outcome.position,
            movement: outcome.movement,
        }),
    ))
}

/// Current position for one variant in the caller's active store.
async fn get_position<S>(
    State(state): State<S>,
    scope: StoreScope,
    Path(variant_id): Path<i64>,
    Query(query): Query<StoreQuery>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    let store_id = scope.require_active_store(query.store_id)?;
    let position = state
        .inventory_service()
        .get_position(store_id, variant_id)
        .await?;

    Ok((StatusCode::OK, Json(position)))
}

/// Movement history. Admin callers may list across all stores by omitting
/// the store filter; everyone else is pinned to their resolved store.
async fn list_movements<S>(
    State(state): State<S>,
    scope: StoreScope,
    Query(query): Query<MovementListQuery>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    let store_id = scope.require_active_store_unless_admin(query.store_id)?;

    let movement_type = query
        .movement_type
        .as_deref()
        .map(|raw| {
            MovementType::parse(raw).ok_or_else(|| {
                ServiceError::ValidationError(format!("unknown movement type: {}", raw))
            })
        })
        .transpose()?;

    let page = state
        .inventory_service()
        .list_movements(MovementFilter {
            store_id,
            variant_id: query.variant_id,
            movement_type,
            query: query.q,
            page: query.page,
            limit: query.limit,
        })
        .await?;

    Ok((
        StatusCode::OK,
        Json(MovementListResponse {
            movements: page.movements,
            total: page.total,
            page: page.page,
            limit: page.limit,
        }),
    ))
}

/// Resolve a scanned barcode against the caller's active store.
async fn lookup_by_barcode<S>(
    State(state): State<S>,
    scope: StoreScope,
    Path(barcode): Path<String>,
    Query(query): Query<StoreQuery>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    let store_id = scope.require_active_store(query.store_id)?;
    let lookup = state
        .inventory_service()
        .lookup_by_barcode(store_id, &barcode)
        .await?;

    Ok((
        StatusCode::OK,
        Json(BarcodeLookupResponse {
            variant: lookup.variant,
            position: lookup.position,
        }),
    ))
}

fn parse_expiry_date(raw: Option<&str>) -> Result<Option<NaiveDate>, ServiceError> {
    raw.map(|s| {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| {
            ServiceError::ValidationError(format!("expiryDate must be YYYY-MM-DD, got {}", s))
        })
    })
    .transpose()
}
