//! sea-orm entities for the inventory and point-of-sale schema.

pub mod organization;
pub mod organization_user;
pub mod plan;
pub mod product;
pub mod sale;
pub mod sale_item;
pub mod stock_movement;
pub mod subscription;
pub mod user;
pub mod variant;
