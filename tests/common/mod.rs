#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use stockpilot_api::{
    auth::{issue_token, Claims},
    cache::{CacheInvalidationNotifier, InMemoryCache},
    config::AppConfig,
    db::{establish_connection_with_config, run_migrations, DbConfig, DbPool},
    entities::{product_variant, store},
    events::EventSender,
    services::inventory::InventoryService,
    AppState,
};
use tokio::sync::mpsc;

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// Test harness: inventory service over a fresh SQLite database seeded with
/// two stores and two variants.
pub struct TestContext {
    pub db: Arc<DbPool>,
    pub service: InventoryService,
    pub cache: Arc<InMemoryCache>,
    _event_rx: mpsc::Receiver<stockpilot_api::events::Event>,
}

pub async fn setup() -> TestContext {
    setup_with_db_config(DbConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        ..Default::default()
    })
    .await
}

pub async fn setup_with_db_config(cfg: DbConfig) -> TestContext {
    let db = Arc::new(
        establish_connection_with_config(&cfg)
            .await
            .expect("db connect"),
    );
    run_migrations(db.as_ref()).await.expect("migrations");
    seed_catalog(db.as_ref()).await;

    let cache = Arc::new(InMemoryCache::new());
    let notifier = Arc::new(CacheInvalidationNotifier::new(
        cache.clone(),
        Duration::from_millis(250),
    ));

    let (tx, rx) = mpsc::channel(100);
    let service = InventoryService::new(db.clone(), EventSender::new(tx), notifier);

    TestContext {
        db,
        service,
        cache,
        _event_rx: rx,
    }
}

async fn seed_catalog(db: &DbPool) {
    let now = Utc::now();

    for (id, name, code) in [(1_i64, "Downtown", "DT"), (2, "Uptown", "UT")] {
        store::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            code: Set(code.to_string()),
            active: Set(true),
            created_at: Set(now),
        }
        .insert(db)
        .await
        .expect("seed store");
    }

    for (id, sku, name, barcode) in [
        (1_i64, "SKU-001", "Espresso Beans 1kg", Some("4006381333931")),
        (2, "SKU-002", "Filter Papers 100pk", None),
    ] {
        product_variant::ActiveModel {
            id: Set(id),
            product_id: Set(id),
            sku: Set(sku.to_string()),
            name: Set(name.to_string()),
            barcode: Set(barcode.map(str::to_string)),
            active: Set(true),
            created_at: Set(now),
        }
        .insert(db)
        .await
        .expect("seed variant");
    }
}

/// Build a full application state over the given context for router tests.
pub fn app_state(ctx: &TestContext) -> AppState {
    let cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        TEST_JWT_SECRET.to_string(),
        "127.0.0.1".to_string(),
        18_080,
    );
    AppState {
        db: ctx.db.clone(),
        config: cfg,
        event_sender: event_sender(),
        inventory_service: ctx.service.clone(),
    }
}

fn event_sender() -> EventSender {
    let (tx, mut rx) = mpsc::channel(100);
    tokio::spawn(async move { while rx.recv().await.is_some() {} });
    EventSender::new(tx)
}

pub fn bearer_token(actor: &str, admin: bool, stores: Vec<i64>, primary: Option<i64>) -> String {
    let claims = Claims {
        sub: actor.to_string(),
        admin,
        stores,
        primary_store: primary,
        exp: (Utc::now().timestamp() + 3600) as usize,
    };
    issue_token(&claims, TEST_JWT_SECRET).expect("token")
}
