use crate::{
    auth::Principal,
    db::DbPool,
    entities::{product, sale, sale_item, variant},
    errors::ServiceError,
    services::sales::{end_of_day_exclusive, start_of_day},
};
use chrono::{Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, Order, Query, SelectStatement};
use sea_orm::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tracing::{debug, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

pub const DEFAULT_RANGE_DAYS: u64 = 30;
pub const DEFAULT_TOP_LIMIT: u64 = 10;
const MAX_TOP_LIMIT: u64 = 100;

/// Inclusive calendar-day window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DateRange {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl DateRange {
    /// Fills missing bounds relative to `today`: the end defaults to today
    /// and the start to thirty days before the end.
    pub fn resolve(
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Result<Self, ServiceError> {
        let end_date = end.unwrap_or(today);
        let start_date = match start {
            Some(start) => start,
            None => end_date
                .checked_sub_days(Days::new(DEFAULT_RANGE_DAYS))
                .unwrap_or(end_date),
        };
        if start_date > end_date {
            return Err(ServiceError::ValidationError(
                "start_date must not be after end_date".to_string(),
            ));
        }
        Ok(Self {
            start_date,
            end_date,
        })
    }

    fn sales_in_range(&self, organization_id: Uuid) -> Select<sale::Entity> {
        sale::Entity::find()
            .filter(sale::Column::OrganizationId.eq(organization_id))
            .filter(sale::Column::CreatedAt.gte(start_of_day(self.start_date)))
            .filter(sale::Column::CreatedAt.lt(end_of_day_exclusive(self.end_date)))
    }

    fn sale_ids(&self, organization_id: Uuid) -> SelectStatement {
        Query::select()
            .column(sale::Column::Id)
            .from(sale::Entity)
            .and_where(sale::Column::OrganizationId.eq(organization_id))
            .and_where(sale::Column::CreatedAt.gte(start_of_day(self.start_date)))
            .and_where(sale::Column::CreatedAt.lt(end_of_day_exclusive(self.end_date)))
            .to_owned()
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct AnalyticsQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub sort_by: Option<TopProductsSort>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TopProductsSort {
    #[default]
    Quantity,
    Profit,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SalesSummary {
    pub total_revenue: Decimal,
    pub total_cost: Decimal,
    pub gross_profit: Decimal,
    pub transaction_count: u64,
    pub items_sold: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProductPerformance {
    pub product_id: Uuid,
    pub product_name: String,
    pub variant_id: Uuid,
    pub sku: String,
    pub total_quantity: i64,
    pub total_revenue: Decimal,
    pub total_profit: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DailySales {
    pub date: NaiveDate,
    pub revenue: Decimal,
    pub profit: Decimal,
    pub transactions: u64,
}

pub fn summarize(sales: &[sale::Model], items: &[sale_item::Model]) -> SalesSummary {
    let total_revenue: Decimal = sales.iter().map(|s| s.total_amount).sum();
    let gross_profit: Decimal = sales.iter().map(|s| s.total_profit).sum();
    SalesSummary {
        total_revenue,
        total_cost: total_revenue - gross_profit,
        gross_profit,
        transaction_count: sales.len() as u64,
        items_sold: items.iter().map(|i| i64::from(i.quantity)).sum(),
    }
}

/// Per-variant totals, keyed by variant id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VariantTotals {
    pub quantity: i64,
    pub revenue: Decimal,
    pub profit: Decimal,
}

pub fn totals_by_variant(items: &[sale_item::Model]) -> HashMap<Uuid, VariantTotals> {
    let mut totals: HashMap<Uuid, VariantTotals> = HashMap::new();
    for item in items {
        let entry = totals.entry(item.variant_id).or_default();
        entry.quantity += i64::from(item.quantity);
        entry.revenue += item.line_total();
        entry.profit += item.line_profit();
    }
    totals
}

/// Orders performance rows by the chosen metric, descending, and keeps
/// the first `limit`. Ties fall back to variant id for a stable result.
pub fn rank_products(
    mut rows: Vec<ProductPerformance>,
    sort_by: TopProductsSort,
    limit: usize,
) -> Vec<ProductPerformance> {
    rows.sort_by(|a, b| {
        let primary = match sort_by {
            TopProductsSort::Quantity => b.total_quantity.cmp(&a.total_quantity),
            TopProductsSort::Profit => b.total_profit.cmp(&a.total_profit),
        };
        primary.then_with(|| a.variant_id.cmp(&b.variant_id))
    });
    rows.truncate(limit);
    rows
}

pub fn bucket_daily(sales: &[sale::Model]) -> Vec<DailySales> {
    let mut days: BTreeMap<NaiveDate, DailySales> = BTreeMap::new();
    for sale in sales {
        let date = sale.created_at.date_naive();
        let day = days.entry(date).or_insert_with(|| DailySales {
            date,
            revenue: Decimal::ZERO,
            profit: Decimal::ZERO,
            transactions: 0,
        });
        day.revenue += sale.total_amount;
        day.profit += sale.total_profit;
        day.transactions += 1;
    }
    days.into_values().collect()
}

#[derive(Debug, Default, FromQueryResult)]
struct SummaryRow {
    revenue: Option<Decimal>,
    profit: Option<Decimal>,
    transactions: i64,
}

#[derive(Debug, FromQueryResult)]
struct VariantTotalsRow {
    variant_id: Uuid,
    quantity: Option<i64>,
    revenue: Option<Decimal>,
    profit: Option<Decimal>,
}

#[derive(Debug, FromQueryResult)]
struct DailyRow {
    day: String,
    revenue: Option<Decimal>,
    profit: Option<Decimal>,
    transactions: i64,
}

const PG_SALE_DAY: &str = "TO_CHAR(created_at AT TIME ZONE 'UTC', 'YYYY-MM-DD')";

/// Read-only revenue and profit reporting over committed sales.
///
/// On Postgres the sums run in SQL over NUMERIC columns. SQLite keeps
/// NUMERIC values as floating point, so there the scoped rows are loaded
/// and summed as `Decimal`.
#[derive(Debug, Clone)]
pub struct AnalyticsAggregator {
    db: Arc<DbPool>,
}

impl AnalyticsAggregator {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    pub fn range(&self, query: &AnalyticsQuery) -> Result<DateRange, ServiceError> {
        DateRange::resolve(query.start_date, query.end_date, Utc::now().date_naive())
    }

    #[instrument(skip(self, principal), fields(organization_id = %principal.organization_id))]
    pub async fn summary(
        &self,
        principal: &Principal,
        range: &DateRange,
    ) -> Result<SalesSummary, ServiceError> {
        let summary = if self.aggregates_in_sql() {
            self.summary_in_sql(principal, range).await?
        } else {
            let sales = range
                .sales_in_range(principal.organization_id)
                .all(self.db.as_ref())
                .await?;
            let items = self.items_in_range(principal, range).await?;
            summarize(&sales, &items)
        };
        debug!(transactions = summary.transaction_count, "summary computed");
        Ok(summary)
    }

    #[instrument(skip(self, principal), fields(organization_id = %principal.organization_id))]
    pub async fn top_products(
        &self,
        principal: &Principal,
        range: &DateRange,
        sort_by: TopProductsSort,
        limit: Option<u64>,
    ) -> Result<Vec<ProductPerformance>, ServiceError> {
        let limit = limit.unwrap_or(DEFAULT_TOP_LIMIT).clamp(1, MAX_TOP_LIMIT) as usize;
        let totals = if self.aggregates_in_sql() {
            self.variant_totals_in_sql(principal, range, sort_by, limit)
                .await?
        } else {
            totals_by_variant(&self.items_in_range(principal, range).await?)
        };
        if totals.is_empty() {
            return Ok(Vec::new());
        }

        let variants = variant::Entity::find()
            .filter(variant::Column::Id.is_in(totals.keys().copied().collect::<Vec<_>>()))
            .find_also_related(product::Entity)
            .all(self.db.as_ref())
            .await?;

        let rows = variants
            .into_iter()
            .filter_map(|(variant, product)| {
                let product = product?;
                let t = totals.get(&variant.id)?;
                Some(ProductPerformance {
                    product_id: product.id,
                    product_name: product.name,
                    variant_id: variant.id,
                    sku: variant.sku,
                    total_quantity: t.quantity,
                    total_revenue: t.revenue,
                    total_profit: t.profit,
                })
            })
            .collect();

        Ok(rank_products(rows, sort_by, limit))
    }

    #[instrument(skip(self, principal), fields(organization_id = %principal.organization_id))]
    pub async fn daily_sales(
        &self,
        principal: &Principal,
        range: &DateRange,
    ) -> Result<Vec<DailySales>, ServiceError> {
        if self.aggregates_in_sql() {
            return self.daily_in_sql(principal, range).await;
        }
        let sales = range
            .sales_in_range(principal.organization_id)
            .order_by_asc(sale::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;
        Ok(bucket_daily(&sales))
    }

    fn aggregates_in_sql(&self) -> bool {
        self.db.get_database_backend() == DbBackend::Postgres
    }

    async fn summary_in_sql(
        &self,
        principal: &Principal,
        range: &DateRange,
    ) -> Result<SalesSummary, ServiceError> {
        let db = self.db.as_ref();
        let totals = range
            .sales_in_range(principal.organization_id)
            .select_only()
            .column_as(Expr::col(sale::Column::TotalAmount).sum(), "revenue")
            .column_as(Expr::col(sale::Column::TotalProfit).sum(), "profit")
            .column_as(Expr::col(sale::Column::Id).count(), "transactions")
            .into_model::<SummaryRow>()
            .one(db)
            .await?
            .unwrap_or_default();

        let items_sold = sale_item::Entity::find()
            .filter(sale_item::Column::SaleId.in_subquery(range.sale_ids(principal.organization_id)))
            .select_only()
            .column_as(Expr::col(sale_item::Column::Quantity).sum(), "items_sold")
            .into_tuple::<Option<i64>>()
            .one(db)
            .await?
            .flatten()
            .unwrap_or(0);

        let total_revenue = totals.revenue.unwrap_or_default();
        let gross_profit = totals.profit.unwrap_or_default();
        Ok(SalesSummary {
            total_revenue,
            total_cost: total_revenue - gross_profit,
            gross_profit,
            transaction_count: totals.transactions.max(0) as u64,
            items_sold,
        })
    }

    /// `SUM ... GROUP BY variant_id`, ordered and limited in SQL.
    async fn variant_totals_in_sql(
        &self,
        principal: &Principal,
        range: &DateRange,
        sort_by: TopProductsSort,
        limit: usize,
    ) -> Result<HashMap<Uuid, VariantTotals>, ServiceError> {
        let quantity = || Expr::col(sale_item::Column::Quantity);
        let line_revenue = quantity().mul(Expr::col(sale_item::Column::PriceAtSale));
        let line_profit = quantity()
            .mul(Expr::col(sale_item::Column::PriceAtSale))
            .sub(quantity().mul(Expr::col(sale_item::Column::PurchasePriceAtSale)));
        let metric = match sort_by {
            TopProductsSort::Quantity => "quantity",
            TopProductsSort::Profit => "profit",
        };

        let rows = sale_item::Entity::find()
            .filter(sale_item::Column::SaleId.in_subquery(range.sale_ids(principal.organization_id)))
            .select_only()
            .column(sale_item::Column::VariantId)
            .column_as(quantity().sum(), "quantity")
            .column_as(Expr::expr(line_revenue).sum(), "revenue")
            .column_as(Expr::expr(line_profit).sum(), "profit")
            .group_by(sale_item::Column::VariantId)
            .order_by(Expr::cust(metric), Order::Desc)
            .order_by_asc(sale_item::Column::VariantId)
            .limit(limit as u64)
            .into_model::<VariantTotalsRow>()
            .all(self.db.as_ref())
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.variant_id,
                    VariantTotals {
                        quantity: row.quantity.unwrap_or(0),
                        revenue: row.revenue.unwrap_or_default(),
                        profit: row.profit.unwrap_or_default(),
                    },
                )
            })
            .collect())
    }

    async fn daily_in_sql(
        &self,
        principal: &Principal,
        range: &DateRange,
    ) -> Result<Vec<DailySales>, ServiceError> {
        let rows = range
            .sales_in_range(principal.organization_id)
            .select_only()
            .column_as(Expr::cust(PG_SALE_DAY), "day")
            .column_as(Expr::col(sale::Column::TotalAmount).sum(), "revenue")
            .column_as(Expr::col(sale::Column::TotalProfit).sum(), "profit")
            .column_as(Expr::col(sale::Column::Id).count(), "transactions")
            .group_by(Expr::cust(PG_SALE_DAY))
            .order_by(Expr::cust(PG_SALE_DAY), Order::Asc)
            .into_model::<DailyRow>()
            .all(self.db.as_ref())
            .await?;

        rows.into_iter()
            .map(|row| {
                let date = NaiveDate::parse_from_str(&row.day, "%Y-%m-%d").map_err(|e| {
                    ServiceError::InternalError(format!("unexpected sale day {}: {}", row.day, e))
                })?;
                Ok(DailySales {
                    date,
                    revenue: row.revenue.unwrap_or_default(),
                    profit: row.profit.unwrap_or_default(),
                    transactions: row.transactions.max(0) as u64,
                })
            })
            .collect()
    }

    async fn items_in_range(
        &self,
        principal: &Principal,
        range: &DateRange,
    ) -> Result<Vec<sale_item::Model>, ServiceError> {
        let items = sale_item::Entity::find()
            .filter(sale_item::Column::SaleId.in_subquery(range.sale_ids(principal.organization_id)))
            .all(self.db.as_ref())
            .await?;
        Ok(items)
    }
}
