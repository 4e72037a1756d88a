//! Stockpilot API Library
//!
//! Multi-store retail back-office core: the inventory ledger and mutation
//! engine, gated by a store-scope access guard.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]

pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;

use axum::{middleware, Router};
use std::sync::Arc;

use db::DbPool;
use handlers::inventory::InventoryHandlerState;
use services::inventory::InventoryService;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub inventory_service: InventoryService,
}

impl InventoryHandlerState for AppState {
    fn inventory_service(&self) -> &InventoryService {
        &self.inventory_service
    }
}

/// Assemble the full application router: health endpoints stay open, the
/// inventory API sits behind the caller-identity middleware.
pub fn app_router(state: AppState) -> Router {
    let protected = Router::new()
        .nest(
            "/api/v1/inventory",
            handlers::inventory::inventory_router::<AppState>(),
        )
        .layer(middleware::from_fn_with_state(
            state.config.jwt_secret.clone(),
            auth::authenticate,
        ))
        .with_state(state.clone());

    Router::new()
        .merge(handlers::health::health_router(state.db.clone()))
        .merge(protected)
}
