pub mod inventory_position;
pub mod product_variant;
pub mod stock_lot;
pub mod stock_movement;
pub mod store;
