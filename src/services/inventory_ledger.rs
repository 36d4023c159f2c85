use crate::{
    auth::Principal,
    db::DbPool,
    entities::{
        product,
        stock_movement::{self, MovementKind},
        variant,
    },
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::sea_query::{Expr, Query, SelectStatement};
use sea_orm::*;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Ids of the organization's products, used to scope variant lookups
/// without joining (and therefore without locking) product rows.
pub(crate) fn organization_products(organization_id: Uuid) -> SelectStatement {
    Query::select()
        .column(product::Column::Id)
        .from(product::Entity)
        .and_where(product::Column::OrganizationId.eq(organization_id))
        .to_owned()
}

/// Variant query restricted to one organization.
pub(crate) fn scoped_variants(organization_id: Uuid) -> Select<variant::Entity> {
    variant::Entity::find()
        .filter(variant::Column::ProductId.in_subquery(organization_products(organization_id)))
}

/// Audit row for a quantity change.
pub(crate) struct Movement<'a> {
    pub kind: MovementKind,
    pub delta: i32,
    pub quantity_after: i32,
    pub reason: Option<&'a str>,
    pub reference_id: Option<Uuid>,
}

pub(crate) async fn record_movement<C: ConnectionTrait>(
    conn: &C,
    principal: &Principal,
    variant_id: Uuid,
    movement: Movement<'_>,
) -> Result<stock_movement::Model, DbErr> {
    stock_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        organization_id: Set(principal.organization_id),
        variant_id: Set(variant_id),
        kind: Set(movement.kind),
        delta: Set(movement.delta),
        quantity_after: Set(movement.quantity_after),
        reason: Set(movement.reason.map(str::to_string)),
        reference_id: Set(movement.reference_id),
        created_by: Set(Some(principal.user_id)),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await
}

/// Owns per-variant stock. Every path that changes `quantity` goes through
/// here and keeps it non-negative.
#[derive(Debug, Clone)]
pub struct InventoryLedger {
    db: Arc<DbPool>,
}

impl InventoryLedger {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Locks the variant row inside `txn`, verifies availability and
    /// decrements it. Returns the locked row carrying the new quantity; its
    /// prices are the values the sale must snapshot.
    ///
    /// On any error nothing has been written; the caller is expected to
    /// abandon `txn`.
    #[instrument(skip(txn, principal), fields(organization_id = %principal.organization_id))]
    pub async fn reserve_and_decrement(
        txn: &DatabaseTransaction,
        principal: &Principal,
        variant_id: Uuid,
        requested: i32,
        sale_id: Uuid,
    ) -> Result<variant::Model, ServiceError> {
        if requested <= 0 {
            return Err(ServiceError::ValidationError(
                "quantity must be greater than zero".to_string(),
            ));
        }

        let locked = scoped_variants(principal.organization_id)
            .filter(variant::Column::Id.eq(variant_id))
            .lock_exclusive()
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Variant", variant_id))?;

        if requested > locked.quantity {
            debug!(
                variant_id = %variant_id,
                available = locked.quantity,
                requested,
                "insufficient stock"
            );
            return Err(ServiceError::InsufficientStock {
                variant_id,
                available: locked.quantity,
                requested,
            });
        }

        let remaining = locked.quantity - requested;
        let mut active: variant::ActiveModel = locked.into();
        active.quantity = Set(remaining);
        let updated = active.update(txn).await?;

        record_movement(
            txn,
            principal,
            variant_id,
            Movement {
                kind: MovementKind::Sale,
                delta: -requested,
                quantity_after: remaining,
                reason: None,
                reference_id: Some(sale_id),
            },
        )
        .await?;

        Ok(updated)
    }

    /// Applies a signed manual correction to a variant's stock.
    ///
    /// The change is a single conditional update, so a concurrent sale can
    /// never be overwritten and the result can never go below zero.
    #[instrument(skip(self, principal, reason), fields(organization_id = %principal.organization_id))]
    pub async fn adjust_stock(
        &self,
        principal: &Principal,
        variant_id: Uuid,
        delta: i32,
        reason: Option<&str>,
    ) -> Result<variant::Model, ServiceError> {
        if delta == 0 {
            return Err(ServiceError::ValidationError(
                "adjustment must be non-zero".to_string(),
            ));
        }

        let db = self.db.as_ref();
        let current = self.find_scoped(principal, variant_id).await?;
        let txn = db.begin().await?;

        let result = variant::Entity::update_many()
            .col_expr(
                variant::Column::Quantity,
                Expr::col(variant::Column::Quantity).add(delta),
            )
            .col_expr(variant::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(variant::Column::Id.eq(current.id))
            .filter(variant::Column::Quantity.gte(-(delta as i64)))
            .exec(&txn)
            .await?;

        let after = variant::Entity::find_by_id(variant_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Variant", variant_id))?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NegativeStock {
                variant_id,
                available: after.quantity,
                adjustment: delta,
            });
        }

        record_movement(
            &txn,
            principal,
            variant_id,
            Movement {
                kind: MovementKind::Adjustment,
                delta,
                quantity_after: after.quantity,
                reason,
                reference_id: None,
            },
        )
        .await?;

        txn.commit().await?;

        info!(
            variant_id = %variant_id,
            delta,
            quantity = after.quantity,
            "stock adjusted"
        );
        Ok(after)
    }

    /// Variant lookup scoped to the caller's organization.
    pub async fn find_scoped(
        &self,
        principal: &Principal,
        variant_id: Uuid,
    ) -> Result<variant::Model, ServiceError> {
        scoped_variants(principal.organization_id)
            .filter(variant::Column::Id.eq(variant_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::not_found("Variant", variant_id))
    }

    /// Variants at or below their minimum stock level, with their product.
    #[instrument(skip(self, principal), fields(organization_id = %principal.organization_id))]
    pub async fn low_stock(
        &self,
        principal: &Principal,
    ) -> Result<Vec<(variant::Model, Option<product::Model>)>, ServiceError> {
        let rows = scoped_variants(principal.organization_id)
            .filter(
                Expr::col((variant::Entity, variant::Column::Quantity))
                    .lte(Expr::col((variant::Entity, variant::Column::MinStockLevel))),
            )
            .order_by_asc(variant::Column::Quantity)
            .find_also_related(product::Entity)
            .all(self.db.as_ref())
            .await?;
        Ok(rows)
    }

    /// Most recent quantity changes for a variant, newest first.
    pub async fn movements(
        &self,
        principal: &Principal,
        variant_id: Uuid,
        limit: u64,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        let variant = self.find_scoped(principal, variant_id).await?;
        let rows = stock_movement::Entity::find()
            .filter(stock_movement::Column::VariantId.eq(variant.id))
            .filter(stock_movement::Column::OrganizationId.eq(principal.organization_id))
            .order_by_desc(stock_movement::Column::CreatedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await?;
        Ok(rows)
    }
}
