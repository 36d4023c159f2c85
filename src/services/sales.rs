use crate::{
    auth::Principal,
    db::DbPool,
    entities::{sale, sale_item},
    errors::ServiceError,
    services::inventory_ledger::InventoryLedger,
};
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Instant};
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

const MAX_LINES_PER_SALE: usize = 500;

/// One requested line of a sale.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SaleLineRequest {
    /// Variant id as a UUID string
    pub variant_id: String,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct SaleRequest {
    #[validate(length(min = 1, max = 50, message = "payment_method is required"))]
    pub payment_method: String,
    pub items: Vec<SaleLineRequest>,
}

/// A validated sale line. `line_number` is the zero-based position in the
/// request as submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaleLine {
    pub line_number: i32,
    pub variant_id: Uuid,
    pub quantity: i32,
}

/// Validates request shape before any transaction is opened.
pub fn validate_sale_request(request: &SaleRequest) -> Result<Vec<SaleLine>, ServiceError> {
    request.validate()?;

    if request.items.is_empty() {
        return Err(ServiceError::ValidationError(
            "a sale must contain at least one item".to_string(),
        ));
    }
    if request.items.len() > MAX_LINES_PER_SALE {
        return Err(ServiceError::ValidationError(format!(
            "a sale may contain at most {} items",
            MAX_LINES_PER_SALE
        )));
    }

    request
        .items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let variant_id = Uuid::parse_str(item.variant_id.trim()).map_err(|_| {
                ServiceError::ValidationError(format!(
                    "items[{}].variant_id is not a valid id",
                    index
                ))
            })?;
            if item.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "items[{}].quantity must be greater than zero",
                    index
                )));
            }
            Ok(SaleLine {
                line_number: index as i32,
                variant_id,
                quantity: item.quantity,
            })
        })
        .collect()
}

/// Order in which variant rows are locked: ascending variant id, stable
/// for duplicates. Two sales touching the same variants always acquire
/// their locks in the same sequence.
pub fn lock_order(lines: &[SaleLine]) -> Vec<SaleLine> {
    let mut ordered = lines.to_vec();
    ordered.sort_by_key(|line| line.variant_id);
    ordered
}

/// Running totals for a sale, computed from locked variant prices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaleTotals {
    pub amount: Decimal,
    pub profit: Decimal,
}

impl SaleTotals {
    pub fn add_line(&mut self, quantity: i32, sale_price: Decimal, purchase_price: Decimal) {
        let qty = Decimal::from(quantity);
        self.amount += qty * sale_price;
        self.profit += qty * (sale_price - purchase_price);
    }
}

/// A sale with its line items in submission order.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SaleWithItems {
    #[serde(flatten)]
    pub sale: sale::Model,
    pub items: Vec<sale_item::Model>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct SaleListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SalePage {
    pub sales: Vec<SaleWithItems>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

pub(crate) fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Exclusive upper bound covering the whole of `date`.
pub(crate) fn end_of_day_exclusive(date: NaiveDate) -> DateTime<Utc> {
    start_of_day(date.checked_add_days(Days::new(1)).unwrap_or(date))
}

/// Processes sales as single all-or-nothing transactions.
#[derive(Debug, Clone)]
pub struct SaleTransactionCoordinator {
    db: Arc<DbPool>,
}

impl SaleTransactionCoordinator {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Validates the request, then deducts stock for every line and records
    /// the sale in one transaction. Any failure leaves stock and sales
    /// exactly as they were.
    #[instrument(skip(self, principal, request), fields(organization_id = %principal.organization_id, lines = request.items.len()))]
    pub async fn process_sale(
        &self,
        principal: &Principal,
        request: SaleRequest,
    ) -> Result<SaleWithItems, ServiceError> {
        let lines = validate_sale_request(&request)?;
        let started = Instant::now();

        let result = self
            .commit_sale(principal, &request.payment_method, &lines)
            .await;

        match &result {
            Ok(sale) => {
                counter!("bstock_sales.committed", 1);
                info!(
                    sale_id = %sale.sale.id,
                    total_amount = %sale.sale.total_amount,
                    total_profit = %sale.sale.total_profit,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "sale committed"
                );
            }
            Err(err) => {
                counter!("bstock_sales.rolled_back", 1);
                if err.status_code().is_server_error() {
                    warn!(error = %err, "sale rolled back");
                } else {
                    info!(error = %err, "sale rejected");
                }
            }
        }

        result
    }

    async fn commit_sale(
        &self,
        principal: &Principal,
        payment_method: &str,
        lines: &[SaleLine],
    ) -> Result<SaleWithItems, ServiceError> {
        // Dropping `txn` on any early return rolls the whole sale back.
        let txn = self.db.begin().await?;
        let sale_id = Uuid::new_v4();
        let now = Utc::now();
        let mut totals = SaleTotals::default();
        let mut pending = Vec::with_capacity(lines.len());

        for line in lock_order(lines) {
            let locked = InventoryLedger::reserve_and_decrement(
                &txn,
                principal,
                line.variant_id,
                line.quantity,
                sale_id,
            )
            .await?;

            totals.add_line(line.quantity, locked.sale_price, locked.purchase_price);
            pending.push(sale_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                sale_id: Set(sale_id),
                variant_id: Set(line.variant_id),
                line_number: Set(line.line_number),
                quantity: Set(line.quantity),
                price_at_sale: Set(locked.sale_price),
                purchase_price_at_sale: Set(locked.purchase_price),
                created_at: Set(now),
            });
        }

        let sale = sale::ActiveModel {
            id: Set(sale_id),
            organization_id: Set(principal.organization_id),
            user_id: Set(principal.user_id),
            total_amount: Set(totals.amount),
            total_profit: Set(totals.profit),
            payment_method: Set(payment_method.trim().to_string()),
            payment_proof_url: Set(None),
            is_synced: Set(true),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(pending.len());
        for item in pending {
            items.push(item.insert(&txn).await?);
        }
        items.sort_by_key(|item| item.line_number);

        txn.commit().await?;

        Ok(SaleWithItems { sale, items })
    }

    /// Organization sales, newest first. `end_date` includes the whole day.
    #[instrument(skip(self, principal), fields(organization_id = %principal.organization_id))]
    pub async fn list_sales(
        &self,
        principal: &Principal,
        query: &SaleListQuery,
        page_size: u64,
    ) -> Result<SalePage, ServiceError> {
        let db = self.db.as_ref();
        let page = query.page.unwrap_or(1).max(1);
        let page_size = page_size.max(1);

        let mut select =
            sale::Entity::find().filter(sale::Column::OrganizationId.eq(principal.organization_id));
        if let Some(start) = query.start_date {
            select = select.filter(sale::Column::CreatedAt.gte(start_of_day(start)));
        }
        if let Some(end) = query.end_date {
            select = select.filter(sale::Column::CreatedAt.lt(end_of_day_exclusive(end)));
        }

        let paginator = select
            .order_by_desc(sale::Column::CreatedAt)
            .order_by_desc(sale::Column::Id)
            .paginate(db, page_size);
        let total = paginator.num_items().await?;
        let sales = paginator.fetch_page(page - 1).await?;

        let ids: Vec<Uuid> = sales.iter().map(|s| s.id).collect();
        let mut items_by_sale: HashMap<Uuid, Vec<sale_item::Model>> = HashMap::new();
        if !ids.is_empty() {
            let items = sale_item::Entity::find()
                .filter(sale_item::Column::SaleId.is_in(ids))
                .order_by_asc(sale_item::Column::LineNumber)
                .all(db)
                .await?;
            for item in items {
                items_by_sale.entry(item.sale_id).or_default().push(item);
            }
        }

        let sales = sales
            .into_iter()
            .map(|sale| SaleWithItems {
                items: items_by_sale.remove(&sale.id).unwrap_or_default(),
                sale,
            })
            .collect();

        Ok(SalePage {
            sales,
            total,
            page,
            limit: page_size,
            total_pages: total.div_ceil(page_size),
        })
    }

    /// A single sale with items. Sales of other organizations are not found.
    #[instrument(skip(self, principal), fields(organization_id = %principal.organization_id))]
    pub async fn get_sale(
        &self,
        principal: &Principal,
        sale_id: Uuid,
    ) -> Result<SaleWithItems, ServiceError> {
        let db = self.db.as_ref();
        let sale = sale::Entity::find_by_id(sale_id)
            .filter(sale::Column::OrganizationId.eq(principal.organization_id))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Sale", sale_id))?;

        let items = sale
            .find_related(sale_item::Entity)
            .order_by_asc(sale_item::Column::LineNumber)
            .all(db)
            .await?;

        Ok(SaleWithItems { sale, items })
    }

    /// Records where the proof of payment for a sale is stored. A sale
    /// accepts exactly one proof; a second attach is a conflict.
    #[instrument(skip(self, principal, url), fields(organization_id = %principal.organization_id))]
    pub async fn attach_payment_proof(
        &self,
        principal: &Principal,
        sale_id: Uuid,
        url: &str,
    ) -> Result<sale::Model, ServiceError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ServiceError::ValidationError(
                "payment proof url is required".to_string(),
            ));
        }

        let db = self.db.as_ref();
        let result = sale::Entity::update_many()
            .col_expr(sale::Column::PaymentProofUrl, Expr::value(url.to_string()))
            .filter(sale::Column::Id.eq(sale_id))
            .filter(sale::Column::OrganizationId.eq(principal.organization_id))
            .filter(sale::Column::PaymentProofUrl.is_null())
            .exec(db)
            .await?;

        let sale = sale::Entity::find_by_id(sale_id)
            .filter(sale::Column::OrganizationId.eq(principal.organization_id))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Sale", sale_id))?;

        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "payment proof already attached to this sale".to_string(),
            ));
        }

        info!(sale_id = %sale_id, "payment proof attached");
        Ok(sale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn request(items: Vec<(&str, i32)>) -> SaleRequest {
        SaleRequest {
            payment_method: "cash".to_string(),
            items: items
                .into_iter()
                .map(|(variant_id, quantity)| SaleLineRequest {
                    variant_id: variant_id.to_string(),
                    quantity,
                })
                .collect(),
        }
    }

    #[test]
    fn empty_sale_is_rejected() {
        assert_matches!(
            validate_sale_request(&request(vec![])),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn malformed_variant_id_is_rejected() {
        assert_matches!(
            validate_sale_request(&request(vec![("not-a-uuid", 1)])),
            Err(ServiceError::ValidationError(msg)) if msg.contains("items[0]")
        );
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        let id = Uuid::new_v4().to_string();
        assert_matches!(
            validate_sale_request(&request(vec![(&id, 0)])),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn blank_payment_method_is_rejected() {
        let id = Uuid::new_v4().to_string();
        let mut req = request(vec![(&id, 1)]);
        req.payment_method = String::new();
        assert_matches!(
            validate_sale_request(&req),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn totals_follow_locked_prices() {
        let mut totals = SaleTotals::default();
        totals.add_line(5, dec!(100), dec!(60));
        totals.add_line(2, dec!(12.50), dec!(7.25));
        assert_eq!(totals.amount, dec!(525.00));
        assert_eq!(totals.profit, dec!(210.50));
    }

    #[test]
    fn end_date_covers_whole_day() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        assert_eq!(
            end_of_day_exclusive(day),
            start_of_day(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap())
        );
    }

    fn line_strategy() -> impl Strategy<Value = Vec<SaleLine>> {
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        prop::collection::vec((0usize..4, 1i32..10), 1..12).prop_map(move |picks| {
            picks
                .into_iter()
                .enumerate()
                .map(|(n, (idx, quantity))| SaleLine {
                    line_number: n as i32,
                    variant_id: ids[idx],
                    quantity,
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn lock_order_is_sorted_and_stable(lines in line_strategy()) {
            let ordered = lock_order(&lines);
            prop_assert_eq!(ordered.len(), lines.len());
            for pair in ordered.windows(2) {
                prop_assert!(pair[0].variant_id <= pair[1].variant_id);
                if pair[0].variant_id == pair[1].variant_id {
                    prop_assert!(pair[0].line_number < pair[1].line_number);
                }
            }
        }

        #[test]
        fn lock_order_is_independent_of_submission_order(lines in line_strategy()) {
            let mut reversed = lines.clone();
            reversed.reverse();
            let a: Vec<Uuid> = lock_order(&lines).iter().map(|l| l.variant_id).collect();
            let b: Vec<Uuid> = lock_order(&reversed).iter().map(|l| l.variant_id).collect();
            prop_assert_eq!(a, b);
        }
    }
}
