use crate::{
    cache::CacheInvalidationNotifier,
    db::DbPool,
    entities::{
        inventory_position::{self, Entity as InventoryPositions},
        product_variant::{self, Entity as ProductVariants},
        stock_lot::{self, Entity as StockLots},
        stock_movement::{self, Entity as StockMovements, MovementType},
        store::Entity as Stores,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, LikeExpr},
    ActiveModelTrait, ColumnTrait, Condition, DatabaseTransaction, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, SqlErr, TransactionError, TransactionTrait,
};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Bounded retries for optimistic write conflicts on one position row.
const MAX_WRITE_ATTEMPTS: u32 = 3;

/// The mutation engine for the inventory ledger.
///
/// Every receive/adjust call executes as one atomic transaction: position
/// upsert, lot insert (receive only) and movement insert commit together or
/// not at all. Concurrent writers on the same (store, variant) key serialize
/// through the position's `version` column; a stale write rolls the whole
/// transaction back and is retried with fresh state.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    cache_notifier: Arc<CacheInvalidationNotifier>,
}

#[derive(Debug, Clone)]
pub struct ReceiveStockInput {
    pub store_id: i64,
    pub variant_id: i64,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub lot_code: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub reference_id: Option<String>,
    pub reason: Option<String>,
    pub actor_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReceiveStockOutcome {
    pub position: inventory_position::Model,
    pub lot: stock_lot::Model,
    pub movement: stock_movement::Model,
}

#[derive(Debug, Clone)]
pub struct AdjustStockInput {
    pub store_id: i64,
    pub variant_id: i64,
    /// Signed relative change. Mutually exclusive with `set_to`.
    pub delta: Option<Decimal>,
    /// Absolute target quantity. Mutually exclusive with `delta`.
    pub set_to: Option<Decimal>,
    pub reason: Option<String>,
    pub reference_id: Option<String>,
    pub note: Option<String>,
    pub actor_id: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum AdjustmentTarget {
    Delta(Decimal),
    SetTo(Decimal),
}

impl AdjustStockInput {
    fn target(&self) -> Result<AdjustmentTarget, ServiceError> {
        match (self.delta, self.set_to) {
            (Some(_), Some(_)) => Err(ServiceError::ValidationError(
                "exactly one of delta and setTo must be supplied, not both".to_string(),
            )),
            (None, None) => Err(ServiceError::ValidationError(
                "one of delta or setTo must be supplied".to_string(),
            )),
            (Some(delta), None) => Ok(AdjustmentTarget::Delta(delta)),
            (None, Some(set_to)) => Ok(AdjustmentTarget::SetTo(set_to)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdjustStockOutcome {
    pub position: inventory_position::Model,
    pub movement: stock_movement::Model,
}

#[derive(Debug, Clone, Default)]
pub struct MovementFilter {
    pub store_id: Option<i64>,
    pub variant_id: Option<i64>,
    pub movement_type: Option<MovementType>,
    /// Free-text match against reason and reference id.
    pub query: Option<String>,
    pub page: u64,
    pub limit: u64,
}

#[derive(Debug, Clone)]
pub struct MovementPage {
    pub movements: Vec<stock_movement::Model>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

#[derive(Debug, Clone)]
pub struct BarcodeLookup {
    pub variant: product_variant::Model,
    pub position: Option<inventory_position::Model>,
}

impl InventoryService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: EventSender,
        cache_notifier: Arc<CacheInvalidationNotifier>,
    ) -> Self {
        Self {
            db,
            event_sender,
            cache_notifier,
        }
    }

    /// Receive a batch of stock into a store.
    ///
    /// Atomically upserts the position, records the lot and appends a
    /// `receive` movement. Cache invalidation and the domain event fire
    /// after commit only.
    #[instrument(skip(self, input), fields(store_id = input.store_id, variant_id = input.variant_id))]
    pub async fn receive(
        &self,
        input: ReceiveStockInput,
    ) -> Result<ReceiveStockOutcome, ServiceError> {
        if input.quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "receive quantity must be positive".to_string(),
            ));
        }
        if input.unit_cost < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "unit cost must be non-negative".to_string(),
            ));
        }

        self.ensure_store_exists(input.store_id).await?;
        self.ensure_variant_exists(input.variant_id).await?;

        let outcome = retry_on_write_conflict(|| self.receive_in_txn(&input)).await?;

        self.cache_notifier.invalidate(input.store_id).await;
        let event = Event::InventoryReceived {
            store_id: input.store_id,
            variant_id: input.variant_id,
            quantity: input.quantity,
            lot_id: outcome.lot.id,
            movement_id: outcome.movement.id,
        };
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, "failed to publish receive event");
        }

        Ok(outcome)
    }

    async fn receive_in_txn(
        &self,
        input: &ReceiveStockInput,
    ) -> Result<ReceiveStockOutcome, ServiceError> {
        let input = input.clone();
        self.db
            .transaction::<_, ReceiveStockOutcome, ServiceError>(move |txn| {
                Box::pin(async move {
                    let now = Utc::now();

                    let existing = find_position(txn, input.store_id, input.variant_id).await?;
                    let position = match existing {
                        Some(current) => {
                            apply_position_update(
                                txn,
                                &current,
                                current.quantity + input.quantity,
                                Some(input.unit_cost),
                                now,
                            )
                            .await?
                        }
                        None => {
                            insert_position(
                                txn,
                                inventory_position::ActiveModel {
                                    store_id: Set(input.store_id),
                                    variant_id: Set(input.variant_id),
                                    quantity: Set(input.quantity),
                                    reserved: Set(Decimal::ZERO),
                                    last_cost: Set(input.unit_cost),
                                    version: Set(0),
                                    created_at: Set(now),
                                    last_update: Set(now),
                                    ..Default::default()
                                },
                            )
                            .await?
                        }
                    };

                    let lot = stock_lot::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        store_id: Set(input.store_id),
                        variant_id: Set(input.variant_id),
                        lot_code: Set(input.lot_code.clone()),
                        quantity: Set(input.quantity),
                        quantity_remaining: Set(input.quantity),
                        cost: Set(input.unit_cost),
                        expiry_date: Set(input.expiry_date),
                        created_at: Set(now),
                    }
                    .insert(txn)
                    .await?;

                    let movement = stock_movement::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        store_id: Set(input.store_id),
                        variant_id: Set(input.variant_id),
                        change: Set(input.quantity),
                        movement_type: Set(MovementType::Receive.as_str().to_string()),
                        reference_id: Set(Some(
                            input
                                .reference_id
                                .clone()
                                .unwrap_or_else(|| lot.id.to_string()),
                        )),
                        reason: Set(Some(
                            input
                                .reason
                                .clone()
                                .unwrap_or_else(|| "Stock receive".to_string()),
                        )),
                        created_by: Set(input.actor_id.clone()),
                        created_at: Set(now),
                    }
                    .insert(txn)
                    .await?;

                    Ok(ReceiveStockOutcome {
                        position,
                        lot,
                        movement,
                    })
                })
            })
            .await
            .map_err(unwrap_txn_err)
    }

    /// Adjust a position by a signed delta or to an absolute target.
    ///
    /// Exactly one of `delta`/`set_to` must be supplied. The position update
    /// and the `adjustment` movement commit atomically; any business-rule
    /// violation (negative result, below reserved) rolls everything back.
    #[instrument(skip(self, input), fields(store_id = input.store_id, variant_id = input.variant_id))]
    pub async fn adjust(&self, input: AdjustStockInput) -> Result<AdjustStockOutcome, ServiceError> {
        // Input-shape validation happens before any transaction opens.
        let target = input.target()?;

        let outcome = retry_on_write_conflict(|| self.adjust_in_txn(&input, target)).await?;

        self.cache_notifier.invalidate(input.store_id).await;
        let event = Event::InventoryAdjusted {
            store_id: input.store_id,
            variant_id: input.variant_id,
            change: outcome.movement.change,
            new_quantity: outcome.position.quantity,
            movement_id: outcome.movement.id,
        };
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, "failed to publish adjust event");
        }

        Ok(outcome)
    }

    async fn adjust_in_txn(
        &self,
        input: &AdjustStockInput,
        target: AdjustmentTarget,
    ) -> Result<AdjustStockOutcome, ServiceError> {
        let input = input.clone();
        self.db
            .transaction::<_, AdjustStockOutcome, ServiceError>(move |txn| {
                Box::pin(async move {
                    let now = Utc::now();

                    let existing = find_position(txn, input.store_id, input.variant_id).await?;
                    let (position, change) = match existing {
                        None => {
                            let initial = match target {
                                AdjustmentTarget::Delta(delta) => {
                                    if delta <= Decimal::ZERO {
                                        return Err(ServiceError::NotFound(format!(
                                            "no inventory position for store {} variant {}",
                                            input.store_id, input.variant_id
                                        )));
                                    }
                                    delta
                                }
                                AdjustmentTarget::SetTo(set_to) => {
                                    if set_to < Decimal::ZERO {
                                        return Err(ServiceError::Conflict(
                                            "cannot set a missing position to a negative quantity"
                                                .to_string(),
                                        ));
                                    }
                                    set_to
                                }
                            };
                            let position = insert_position(
                                txn,
                                inventory_position::ActiveModel {
                                    store_id: Set(input.store_id),
                                    variant_id: Set(input.variant_id),
                                    quantity: Set(initial),
                                    reserved: Set(Decimal::ZERO),
                                    last_cost: Set(Decimal::ZERO),
                                    version: Set(0),
                                    created_at: Set(now),
                                    last_update: Set(now),
                                    ..Default::default()
                                },
                            )
                            .await?;
                            (position, initial)
                        }
                        Some(current) => {
                            let effective_delta = match target {
                                AdjustmentTarget::Delta(delta) => delta,
                                AdjustmentTarget::SetTo(set_to) => set_to - current.quantity,
                            };
                            let new_quantity = current.quantity + effective_delta;
                            if new_quantity < Decimal::ZERO {
                                return Err(ServiceError::Conflict(format!(
                                    "negative result: adjustment would drive quantity to {}",
                                    new_quantity
                                )));
                            }
                            if new_quantity < current.reserved {
                                return Err(ServiceError::Conflict(format!(
                                    "below reserved: {} on hand cannot cover {} reserved",
                                    new_quantity, current.reserved
                                )));
                            }
                            let position =
                                apply_position_update(txn, &current, new_quantity, None, now)
                                    .await?;
                            (position, effective_delta)
                        }
                    };

                    let reference_id = input
                        .reference_id
                        .clone()
                        .or_else(|| input.note.as_ref().map(|n| format!("NOTE:{}", n)));

                    let movement = stock_movement::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        store_id: Set(input.store_id),
                        variant_id: Set(input.variant_id),
                        change: Set(change),
                        movement_type: Set(MovementType::Adjustment.as_str().to_string()),
                        reference_id: Set(reference_id),
                        reason: Set(Some(
                            input
                                .reason
                                .clone()
                                .unwrap_or_else(|| "Inventory adjustment".to_string()),
                        )),
                        created_by: Set(input.actor_id.clone()),
                        created_at: Set(now),
                    }
                    .insert(txn)
                    .await?;

                    Ok(AdjustStockOutcome { position, movement })
                })
            })
            .await
            .map_err(unwrap_txn_err)
    }

    /// Current position for one (store, variant) key.
    #[instrument(skip(self))]
    pub async fn get_position(
        &self,
        store_id: i64,
        variant_id: i64,
    ) -> Result<inventory_position::Model, ServiceError> {
        InventoryPositions::find()
            .filter(inventory_position::Column::StoreId.eq(store_id))
            .filter(inventory_position::Column::VariantId.eq(variant_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "no inventory position for store {} variant {}",
                    store_id, variant_id
                ))
            })
    }

    /// Filtered, paginated movement history, newest first.
    #[instrument(skip(self))]
    pub async fn list_movements(&self, filter: MovementFilter) -> Result<MovementPage, ServiceError> {
        let mut find = StockMovements::find();

        if let Some(store_id) = filter.store_id {
            find = find.filter(stock_movement::Column::StoreId.eq(store_id));
        }
        if let Some(variant_id) = filter.variant_id {
            find = find.filter(stock_movement::Column::VariantId.eq(variant_id));
        }
        if let Some(movement_type) = filter.movement_type {
            find = find.filter(stock_movement::Column::MovementType.eq(movement_type.as_str()));
        }
        if let Some(query) = &filter.query {
            let pattern = format!("%{}%", escape_like(query));
            find = find.filter(
                Condition::any()
                    .add(
                        stock_movement::Column::Reason
                            .like(LikeExpr::new(pattern.clone()).escape('\\')),
                    )
                    .add(
                        stock_movement::Column::ReferenceId
                            .like(LikeExpr::new(pattern).escape('\\')),
                    ),
            );
        }

        let limit = filter.limit.clamp(1, 500);
        let page = filter.page.max(1);
        let paginator = find
            .order_by_desc(stock_movement::Column::CreatedAt)
            .paginate(self.db.as_ref(), limit);

        let total = paginator.num_items().await?;
        let movements = paginator.fetch_page(page - 1).await?;

        Ok(MovementPage {
            movements,
            total,
            page,
            limit,
        })
    }

    /// Resolve a scanned barcode to its variant and the store's position.
    #[instrument(skip(self))]
    pub async fn lookup_by_barcode(
        &self,
        store_id: i64,
        barcode: &str,
    ) -> Result<BarcodeLookup, ServiceError> {
        let variant = ProductVariants::find()
            .filter(product_variant::Column::Barcode.eq(barcode))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("no variant carries barcode {}", barcode))
            })?;

        let position = InventoryPositions::find()
            .filter(inventory_position::Column::StoreId.eq(store_id))
            .filter(inventory_position::Column::VariantId.eq(variant.id))
            .one(self.db.as_ref())
            .await?;

        Ok(BarcodeLookup { variant, position })
    }

    async fn ensure_store_exists(&self, store_id: i64) -> Result<(), ServiceError> {
        Stores::find_by_id(store_id)
            .one(self.db.as_ref())
            .await?
            .map(|_| ())
            .ok_or_else(|| ServiceError::NotFound(format!("store {} not found", store_id)))
    }

    async fn ensure_variant_exists(&self, variant_id: i64) -> Result<(), ServiceError> {
        ProductVariants::find_by_id(variant_id)
            .one(self.db.as_ref())
            .await?
            .map(|_| ())
            .ok_or_else(|| ServiceError::NotFound(format!("variant {} not found", variant_id)))
    }
}

/// Re-run a transactional write while it loses the optimistic version race,
/// up to `MAX_WRITE_ATTEMPTS` tries. Each retry re-reads fresh state inside
/// a new transaction; any other error passes straight through.
async fn retry_on_write_conflict<T, F, Fut>(mut attempt_fn: F) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ServiceError>>,
{
    let mut attempt = 0;
    loop {
        match attempt_fn().await {
            Err(ServiceError::ConcurrentModification(key)) if attempt + 1 < MAX_WRITE_ATTEMPTS => {
                attempt += 1;
                warn!(%key, attempt, "write conflict, retrying with fresh state");
            }
            other => return other,
        }
    }
}

/// Escape LIKE wildcards so user-supplied search text matches literally.
fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

async fn find_position(
    txn: &DatabaseTransaction,
    store_id: i64,
    variant_id: i64,
) -> Result<Option<inventory_position::Model>, ServiceError> {
    Ok(InventoryPositions::find()
        .filter(inventory_position::Column::StoreId.eq(store_id))
        .filter(inventory_position::Column::VariantId.eq(variant_id))
        .one(txn)
        .await?)
}

/// Insert a fresh position; a racing creator trips the unique
/// (store_id, variant_id) index and is retried as a write conflict.
async fn insert_position(
    txn: &DatabaseTransaction,
    model: inventory_position::ActiveModel,
) -> Result<inventory_position::Model, ServiceError> {
    model.insert(txn).await.map_err(|e| match e.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            ServiceError::ConcurrentModification("position created concurrently".to_string())
        }
        _ => ServiceError::DatabaseError(e),
    })
}

/// Version-guarded position update. Zero affected rows means another writer
/// committed first; the caller rolls back and retries with fresh state.
async fn apply_position_update(
    txn: &DatabaseTransaction,
    current: &inventory_position::Model,
    new_quantity: Decimal,
    new_last_cost: Option<Decimal>,
    now: DateTime<Utc>,
) -> Result<inventory_position::Model, ServiceError> {
    let mut update = InventoryPositions::update_many()
        .col_expr(inventory_position::Column::Quantity, Expr::value(new_quantity))
        .col_expr(
            inventory_position::Column::Version,
            Expr::value(current.version + 1),
        )
        .col_expr(inventory_position::Column::LastUpdate, Expr::value(now));

    if let Some(cost) = new_last_cost {
        update = update.col_expr(inventory_position::Column::LastCost, Expr::value(cost));
    }

    let result = update
        .filter(inventory_position::Column::Id.eq(current.id))
        .filter(inventory_position::Column::Version.eq(current.version))
        .exec(txn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(format!(
            "position {}/{}",
            current.store_id, current.variant_id
        )));
    }

    InventoryPositions::find_by_id(current.id)
        .one(txn)
        .await?
        .ok_or_else(|| {
            ServiceError::InternalError("position disappeared mid-transaction".to_string())
        })
}

fn unwrap_txn_err(e: TransactionError<ServiceError>) -> ServiceError {
    match e {
        TransactionError::Connection(db_err) => ServiceError::DatabaseError(db_err),
        TransactionError::Transaction(service_err) => service_err,
    }
}
