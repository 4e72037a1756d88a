mod common;

use assert_matches::assert_matches;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use stockpilot_api::{
    entities::{inventory_position, stock_lot, stock_movement},
    errors::ServiceError,
    services::inventory::{
        AdjustStockInput, MovementFilter, ReceiveStockInput, ReceiveStockOutcome,
    },
};

fn receive_input(store_id: i64, variant_id: i64, quantity: Decimal, cost: Decimal) -> ReceiveStockInput {
    ReceiveStockInput {
        store_id,
        variant_id,
        quantity,
        unit_cost: cost,
        lot_code: None,
        expiry_date: None,
        reference_id: None,
        reason: None,
        actor_id: Some("tester".to_string()),
    }
}

fn adjust_input(store_id: i64, variant_id: i64) -> AdjustStockInput {
    AdjustStockInput {
        store_id,
        variant_id,
        delta: None,
        set_to: None,
        reason: None,
        reference_id: None,
        note: None,
        actor_id: Some("tester".to_string()),
    }
}

async fn movement_count(ctx: &common::TestContext) -> u64 {
    stock_movement::Entity::find()
        .count(ctx.db.as_ref())
        .await
        .unwrap()
}

#[tokio::test]
async fn receive_creates_position_lot_and_movement() {
    let ctx = common::setup().await;

    let ReceiveStockOutcome {
        position,
        lot,
        movement,
    } = ctx
        .service
        .receive(receive_input(1, 1, dec!(2), dec!(1000)))
        .await
        .unwrap();

    assert_eq!(position.quantity, dec!(2));
    assert_eq!(position.reserved, Decimal::ZERO);
    assert_eq!(position.last_cost, dec!(1000));
    assert_eq!(position.version, 0);

    assert_eq!(lot.quantity, dec!(2));
    assert_eq!(lot.quantity_remaining, dec!(2));
    assert_eq!(lot.cost, dec!(1000));

    assert_eq!(movement.change, dec!(2));
    assert_eq!(movement.movement_type, "receive");
    // Without an explicit reference the movement points at its lot.
    assert_eq!(movement.reference_id.as_deref(), Some(lot.id.to_string().as_str()));
    assert_eq!(movement.reason.as_deref(), Some("Stock receive"));
    assert_eq!(movement.created_by.as_deref(), Some("tester"));
}

#[tokio::test]
async fn receive_accumulates_quantity_and_refreshes_last_cost() {
    let ctx = common::setup().await;

    ctx.service
        .receive(receive_input(1, 1, dec!(2), dec!(1000)))
        .await
        .unwrap();
    let second = ctx
        .service
        .receive(receive_input(1, 1, dec!(3.5), dec!(1100)))
        .await
        .unwrap();

    assert_eq!(second.position.quantity, dec!(5.5));
    assert_eq!(second.position.last_cost, dec!(1100));
    assert_eq!(second.position.version, 1);

    // Each receipt keeps its own lot record.
    let lots = stock_lot::Entity::find()
        .count(ctx.db.as_ref())
        .await
        .unwrap();
    assert_eq!(lots, 2);
}

#[tokio::test]
async fn receive_rejects_bad_quantities_and_unknown_keys() {
    let ctx = common::setup().await;

    assert_matches!(
        ctx.service
            .receive(receive_input(1, 1, dec!(0), dec!(10)))
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        ctx.service
            .receive(receive_input(1, 1, dec!(-1), dec!(10)))
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        ctx.service
            .receive(receive_input(1, 1, dec!(1), dec!(-0.01)))
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        ctx.service
            .receive(receive_input(99, 1, dec!(1), dec!(10)))
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        ctx.service
            .receive(receive_input(1, 99, dec!(1), dec!(10)))
            .await,
        Err(ServiceError::NotFound(_))
    );

    // Nothing was written.
    assert_eq!(movement_count(&ctx).await, 0);
}

#[tokio::test]
async fn adjust_by_delta_moves_quantity_and_appends_movement() {
    let ctx = common::setup().await;
    ctx.service
        .receive(receive_input(1, 1, dec!(10), dec!(50)))
        .await
        .unwrap();

    let outcome = ctx
        .service
        .adjust(AdjustStockInput {
            delta: Some(dec!(2)),
            reason: Some("Found two in the back room".to_string()),
            ..adjust_input(1, 1)
        })
        .await
        .unwrap();

    assert_eq!(outcome.position.quantity, dec!(12));
    assert_eq!(outcome.movement.change, dec!(2));
    assert_eq!(outcome.movement.movement_type, "adjustment");
    assert_eq!(
        outcome.movement.reason.as_deref(),
        Some("Found two in the back room")
    );
    // Adjustments never touch last_cost.
    assert_eq!(outcome.position.last_cost, dec!(50));
}

#[tokio::test]
async fn adjust_set_to_records_the_difference() {
    let ctx = common::setup().await;
    ctx.service
        .receive(receive_input(1, 1, dec!(10), dec!(50)))
        .await
        .unwrap();

    let outcome = ctx
        .service
        .adjust(AdjustStockInput {
            set_to: Some(dec!(4)),
            ..adjust_input(1, 1)
        })
        .await
        .unwrap();

    assert_eq!(outcome.position.quantity, dec!(4));
    assert_eq!(outcome.movement.change, dec!(-6));
    assert_eq!(outcome.movement.reason.as_deref(), Some("Inventory adjustment"));
}

#[tokio::test]
async fn adjust_note_becomes_movement_reference() {
    let ctx = common::setup().await;
    ctx.service
        .receive(receive_input(1, 1, dec!(5), dec!(10)))
        .await
        .unwrap();

    let outcome = ctx
        .service
        .adjust(AdjustStockInput {
            delta: Some(dec!(-1)),
            note: Some("cycle count".to_string()),
            ..adjust_input(1, 1)
        })
        .await
        .unwrap();

    assert_eq!(outcome.movement.reference_id.as_deref(), Some("NOTE:cycle count"));
}

#[tokio::test]
async fn adjust_missing_position_semantics() {
    let ctx = common::setup().await;

    // Negative or zero delta against nothing: there is nothing to move.
    assert_matches!(
        ctx.service
            .adjust(AdjustStockInput {
                delta: Some(dec!(-1)),
                ..adjust_input(1, 1)
            })
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        ctx.service
            .adjust(AdjustStockInput {
                delta: Some(dec!(0)),
                ..adjust_input(1, 1)
            })
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        ctx.service
            .adjust(AdjustStockInput {
                set_to: Some(dec!(-3)),
                ..adjust_input(1, 1)
            })
            .await,
        Err(ServiceError::Conflict(_))
    );
    assert_eq!(movement_count(&ctx).await, 0);

    // A positive delta creates the position with zero cost basis.
    let created = ctx
        .service
        .adjust(AdjustStockInput {
            delta: Some(dec!(3)),
            ..adjust_input(1, 1)
        })
        .await
        .unwrap();
    assert_eq!(created.position.quantity, dec!(3));
    assert_eq!(created.position.last_cost, Decimal::ZERO);
    assert_eq!(created.movement.change, dec!(3));

    // setTo against a missing position also creates it.
    let set = ctx
        .service
        .adjust(AdjustStockInput {
            set_to: Some(dec!(7)),
            ..adjust_input(1, 2)
        })
        .await
        .unwrap();
    assert_eq!(set.position.quantity, dec!(7));
    assert_eq!(set.movement.change, dec!(7));
}

#[tokio::test]
async fn adjust_rejects_both_or_neither_target() {
    let ctx = common::setup().await;

    assert_matches!(
        ctx.service.adjust(adjust_input(1, 1)).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        ctx.service
            .adjust(AdjustStockInput {
                delta: Some(dec!(1)),
                set_to: Some(dec!(2)),
                ..adjust_input(1, 1)
            })
            .await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn conflicting_adjustment_rolls_back_completely() {
    let ctx = common::setup().await;
    ctx.service
        .receive(receive_input(1, 1, dec!(5), dec!(20)))
        .await
        .unwrap();
    let before_movements = movement_count(&ctx).await;

    // Driving the quantity negative is refused.
    assert_matches!(
        ctx.service
            .adjust(AdjustStockInput {
                delta: Some(dec!(-6)),
                ..adjust_input(1, 1)
            })
            .await,
        Err(ServiceError::Conflict(_))
    );

    // Pin the whole position as reserved, then any shrink is refused.
    let position = ctx.service.get_position(1, 1).await.unwrap();
    inventory_position::ActiveModel {
        id: Set(position.id),
        reserved: Set(dec!(5)),
        ..Default::default()
    }
    .update(ctx.db.as_ref())
    .await
    .unwrap();

    let err = ctx
        .service
        .adjust(AdjustStockInput {
            delta: Some(dec!(-1)),
            ..adjust_input(1, 1)
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    // No movement leaked out of either rolled-back attempt and the
    // quantity is untouched.
    assert_eq!(movement_count(&ctx).await, before_movements);
    let after = ctx.service.get_position(1, 1).await.unwrap();
    assert_eq!(after.quantity, dec!(5));
    assert_eq!(after.reserved, dec!(5));
}

#[tokio::test]
async fn movement_changes_always_sum_to_current_quantity() {
    let ctx = common::setup().await;

    ctx.service
        .receive(receive_input(1, 1, dec!(10), dec!(5)))
        .await
        .unwrap();
    ctx.service
        .adjust(AdjustStockInput {
            delta: Some(dec!(-4)),
            ..adjust_input(1, 1)
        })
        .await
        .unwrap();
    ctx.service
        .receive(receive_input(1, 1, dec!(2.25), dec!(6)))
        .await
        .unwrap();
    ctx.service
        .adjust(AdjustStockInput {
            set_to: Some(dec!(3)),
            ..adjust_input(1, 1)
        })
        .await
        .unwrap();
    // Conflicting attempt must not disturb the ledger.
    let _ = ctx
        .service
        .adjust(AdjustStockInput {
            delta: Some(dec!(-100)),
            ..adjust_input(1, 1)
        })
        .await;

    let position = ctx.service.get_position(1, 1).await.unwrap();
    let movements = stock_movement::Entity::find()
        .filter(stock_movement::Column::StoreId.eq(1))
        .filter(stock_movement::Column::VariantId.eq(1))
        .all(ctx.db.as_ref())
        .await
        .unwrap();

    let total: Decimal = movements.iter().map(|m| m.change).sum();
    assert_eq!(total, position.quantity);
    assert_eq!(position.quantity, dec!(3));
    assert_eq!(movements.len(), 4);
}

#[tokio::test]
async fn positions_are_scoped_per_store() {
    let ctx = common::setup().await;

    ctx.service
        .receive(receive_input(1, 1, dec!(4), dec!(10)))
        .await
        .unwrap();
    ctx.service
        .receive(receive_input(2, 1, dec!(9), dec!(11)))
        .await
        .unwrap();

    assert_eq!(ctx.service.get_position(1, 1).await.unwrap().quantity, dec!(4));
    assert_eq!(ctx.service.get_position(2, 1).await.unwrap().quantity, dec!(9));
    assert_matches!(
        ctx.service.get_position(1, 2).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn list_movements_filters_and_paginates() {
    let ctx = common::setup().await;

    ctx.service
        .receive(ReceiveStockInput {
            reference_id: Some("PO-7781".to_string()),
            ..receive_input(1, 1, dec!(10), dec!(5))
        })
        .await
        .unwrap();
    ctx.service
        .receive(receive_input(2, 2, dec!(3), dec!(5)))
        .await
        .unwrap();
    ctx.service
        .adjust(AdjustStockInput {
            delta: Some(dec!(-2)),
            note: Some("cycle count aisle 4".to_string()),
            ..adjust_input(1, 1)
        })
        .await
        .unwrap();

    let all = ctx
        .service
        .list_movements(MovementFilter {
            page: 1,
            limit: 50,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(all.total, 3);

    let store_one = ctx
        .service
        .list_movements(MovementFilter {
            store_id: Some(1),
            page: 1,
            limit: 50,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(store_one.total, 2);

    let receives = ctx
        .service
        .list_movements(MovementFilter {
            movement_type: Some(stock_movement::MovementType::Receive),
            page: 1,
            limit: 50,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(receives.total, 2);
    assert!(receives
        .movements
        .iter()
        .all(|m| m.movement_type == "receive"));

    // Free-text match hits both reason and reference id.
    let by_reference = ctx
        .service
        .list_movements(MovementFilter {
            query: Some("PO-7781".to_string()),
            page: 1,
            limit: 50,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_reference.total, 1);

    let by_note = ctx
        .service
        .list_movements(MovementFilter {
            query: Some("cycle count".to_string()),
            page: 1,
            limit: 50,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_note.total, 1);

    // Page size is honored; the second page holds the remainder.
    let first_page = ctx
        .service
        .list_movements(MovementFilter {
            page: 1,
            limit: 2,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(first_page.movements.len(), 2);
    assert_eq!(first_page.total, 3);

    let second_page = ctx
        .service
        .list_movements(MovementFilter {
            page: 2,
            limit: 2,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(second_page.movements.len(), 1);

    // Wildcards in the search text match literally, never as patterns.
    ctx.service
        .adjust(AdjustStockInput {
            delta: Some(dec!(-1)),
            reason: Some("Damaged 100% writeoff".to_string()),
            ..adjust_input(1, 1)
        })
        .await
        .unwrap();

    let literal_percent = ctx
        .service
        .list_movements(MovementFilter {
            query: Some("100%".to_string()),
            page: 1,
            limit: 50,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(literal_percent.total, 1);

    let bare_wildcard = ctx
        .service
        .list_movements(MovementFilter {
            query: Some("%".to_string()),
            page: 1,
            limit: 50,
            ..Default::default()
        })
        .await
        .unwrap();
    // Only the row containing a literal percent sign, not every movement.
    assert_eq!(bare_wildcard.total, 1);
}

#[tokio::test]
async fn barcode_lookup_resolves_variant_and_optional_position() {
    let ctx = common::setup().await;

    // Variant known, nothing on hand yet.
    let empty = ctx
        .service
        .lookup_by_barcode(1, "4006381333931")
        .await
        .unwrap();
    assert_eq!(empty.variant.sku, "SKU-001");
    assert!(empty.position.is_none());

    ctx.service
        .receive(receive_input(1, 1, dec!(6), dec!(2)))
        .await
        .unwrap();
    let stocked = ctx
        .service
        .lookup_by_barcode(1, "4006381333931")
        .await
        .unwrap();
    assert_eq!(stocked.position.unwrap().quantity, dec!(6));

    assert_matches!(
        ctx.service.lookup_by_barcode(1, "0000000000000").await,
        Err(ServiceError::NotFound(_))
    );
}
