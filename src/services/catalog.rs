use crate::{
    auth::Principal,
    db::DbPool,
    entities::{
        product,
        stock_movement::MovementKind,
        variant::{self, DEFAULT_UNIT_TYPE},
    },
    errors::ServiceError,
    services::{
        inventory_ledger::{record_movement, scoped_variants, Movement},
        plan_enforcer::{PlanEnforcer, ResourceKind},
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateVariantRequest {
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[validate(length(min = 1, max = 100, message = "sku is required"))]
    pub sku: String,
    #[serde(default)]
    pub purchase_price: Decimal,
    pub sale_price: Decimal,
    /// Opening stock; recorded as an adjustment movement when non-zero
    #[serde(default)]
    #[validate(range(min = 0, message = "quantity cannot be negative"))]
    pub quantity: i32,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub min_stock_level: i32,
    pub unit_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 255, message = "name is required"))]
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub vendor_id: Option<Uuid>,
    #[validate(length(min = 1, message = "a product needs at least one variant"))]
    pub variants: Vec<CreateVariantRequest>,
}

impl CreateProductRequest {
    fn check_prices(&self) -> Result<(), ServiceError> {
        for (index, v) in self.variants.iter().enumerate() {
            v.validate()?;
            if v.sale_price <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "variants[{}].sale_price must be greater than zero",
                    index
                )));
            }
            if v.purchase_price < Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "variants[{}].purchase_price cannot be negative",
                    index
                )));
            }
        }
        Ok(())
    }
}

/// Partial update of a variant's price and metadata. Quantity is not
/// editable here; stock changes go through adjust-stock or sales.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateVariantRequest {
    pub purchase_price: Option<Decimal>,
    pub sale_price: Option<Decimal>,
    #[validate(length(min = 1, max = 100))]
    pub sku: Option<String>,
    #[validate(range(min = 0))]
    pub min_stock_level: Option<i32>,
    #[validate(length(min = 1, max = 20))]
    pub unit_type: Option<String>,
    pub attributes: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProductWithVariants {
    #[serde(flatten)]
    pub product: product::Model,
    pub variants: Vec<variant::Model>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct ProductListQuery {
    pub category: Option<String>,
    pub search: Option<String>,
    pub low_stock: Option<bool>,
}

fn attributes_json(attributes: &HashMap<String, String>) -> serde_json::Value {
    serde_json::to_value(attributes).unwrap_or_else(|_| serde_json::json!({}))
}

/// Product and variant management for an organization's catalog.
#[derive(Debug, Clone)]
pub struct CatalogService {
    db: Arc<DbPool>,
    plans: Arc<PlanEnforcer>,
}

impl CatalogService {
    pub fn new(db: Arc<DbPool>, plans: Arc<PlanEnforcer>) -> Self {
        Self { db, plans }
    }

    /// Creates a product and all its variants in one transaction once the
    /// organization's product limit allows it.
    #[instrument(skip(self, principal, request), fields(organization_id = %principal.organization_id, name = %request.name))]
    pub async fn create_product(
        &self,
        principal: &Principal,
        request: CreateProductRequest,
    ) -> Result<ProductWithVariants, ServiceError> {
        request.validate()?;
        request.check_prices()?;

        let organization_id = principal.organization_id;
        if !self.plans.is_strict() {
            self.plans
                .check_limit(organization_id, ResourceKind::Product)
                .await?;
        }

        let txn = self.db.begin().await?;
        if self.plans.is_strict() {
            self.plans
                .check_limit_in(&txn, organization_id, ResourceKind::Product)
                .await?;
        }

        let now = Utc::now();
        let product = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            organization_id: Set(organization_id),
            vendor_id: Set(request.vendor_id),
            name: Set(request.name.trim().to_string()),
            description: Set(request.description.clone()),
            category: Set(request.category.clone()),
            image_url: Set(request.image_url.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut variants = Vec::with_capacity(request.variants.len());
        for v in &request.variants {
            let created = variant::ActiveModel {
                id: Set(Uuid::new_v4()),
                product_id: Set(product.id),
                attributes: Set(attributes_json(&v.attributes)),
                sku: Set(v.sku.trim().to_string()),
                purchase_price: Set(v.purchase_price),
                sale_price: Set(v.sale_price),
                quantity: Set(v.quantity),
                min_stock_level: Set(v.min_stock_level),
                unit_type: Set(v
                    .unit_type
                    .as_deref()
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .unwrap_or(DEFAULT_UNIT_TYPE)
                    .to_string()),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;

            if created.quantity > 0 {
                record_movement(
                    &txn,
                    principal,
                    created.id,
                    Movement {
                        kind: MovementKind::Adjustment,
                        delta: created.quantity,
                        quantity_after: created.quantity,
                        reason: Some("opening stock"),
                        reference_id: Some(product.id),
                    },
                )
                .await?;
            }
            variants.push(created);
        }

        txn.commit().await?;

        info!(product_id = %product.id, variants = variants.len(), "product created");
        Ok(ProductWithVariants { product, variants })
    }

    #[instrument(skip(self, principal), fields(organization_id = %principal.organization_id))]
    pub async fn list_products(
        &self,
        principal: &Principal,
        query: &ProductListQuery,
    ) -> Result<Vec<ProductWithVariants>, ServiceError> {
        let mut select = product::Entity::find()
            .filter(product::Column::OrganizationId.eq(principal.organization_id));
        if let Some(category) = query.category.as_deref().filter(|c| !c.is_empty()) {
            select = select.filter(product::Column::Category.eq(category));
        }
        if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
            select = select.filter(product::Column::Name.contains(search));
        }

        let rows = select
            .order_by_asc(product::Column::Name)
            .find_with_related(variant::Entity)
            .all(self.db.as_ref())
            .await?;

        let low_stock_only = query.low_stock.unwrap_or(false);
        Ok(rows
            .into_iter()
            .filter(|(_, variants)| !low_stock_only || variants.iter().any(|v| v.is_low_stock()))
            .map(|(product, variants)| ProductWithVariants { product, variants })
            .collect())
    }

    pub async fn get_product(
        &self,
        principal: &Principal,
        product_id: Uuid,
    ) -> Result<ProductWithVariants, ServiceError> {
        let db = self.db.as_ref();
        let product = product::Entity::find_by_id(product_id)
            .filter(product::Column::OrganizationId.eq(principal.organization_id))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", product_id))?;
        let variants = product
            .find_related(variant::Entity)
            .order_by_asc(variant::Column::Sku)
            .all(db)
            .await?;
        Ok(ProductWithVariants { product, variants })
    }

    /// Applies the provided fields to a variant of the caller's
    /// organization. Quantity is left untouched.
    #[instrument(skip(self, principal, request), fields(organization_id = %principal.organization_id))]
    pub async fn update_variant(
        &self,
        principal: &Principal,
        variant_id: Uuid,
        request: UpdateVariantRequest,
    ) -> Result<variant::Model, ServiceError> {
        request.validate()?;
        if matches!(request.sale_price, Some(p) if p <= Decimal::ZERO) {
            return Err(ServiceError::ValidationError(
                "sale_price must be greater than zero".to_string(),
            ));
        }
        if matches!(request.purchase_price, Some(p) if p < Decimal::ZERO) {
            return Err(ServiceError::ValidationError(
                "purchase_price cannot be negative".to_string(),
            ));
        }

        let existing = scoped_variants(principal.organization_id)
            .filter(variant::Column::Id.eq(variant_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::not_found("Variant", variant_id))?;

        let mut active: variant::ActiveModel = existing.into();
        if let Some(price) = request.purchase_price {
            active.purchase_price = Set(price);
        }
        if let Some(price) = request.sale_price {
            active.sale_price = Set(price);
        }
        if let Some(sku) = request.sku {
            active.sku = Set(sku.trim().to_string());
        }
        if let Some(level) = request.min_stock_level {
            active.min_stock_level = Set(level);
        }
        if let Some(unit) = request.unit_type {
            active.unit_type = Set(unit.trim().to_string());
        }
        if let Some(attributes) = request.attributes {
            active.attributes = Set(attributes_json(&attributes));
        }

        let updated = active.update(self.db.as_ref()).await?;
        info!(variant_id = %variant_id, "variant updated");
        Ok(updated)
    }
}
