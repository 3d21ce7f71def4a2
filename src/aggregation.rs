//! Aggregation stage: four views computed from the cleaned customers and purchases.
//!
//! Every view is a pure function of its inputs. Sums accumulate in cleaned source order, so the
//! same input always produces bit-identical totals.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::codec::{read_parquet, write_parquet};
use crate::config::StorageLayout;
use crate::context::PipelineContext;
use crate::error::PipelineResult;
use crate::records::{
    CountryStats, Customer, CustomerStats, MonthlyStats, ProductStats, Purchase, Record, ViewKind,
    from_dataset, to_dataset,
};

/// Running count/sum/min/max over purchase amounts, plus first/last purchase time.
#[derive(Debug, Clone, Default)]
struct Accumulator {
    count: i64,
    total: f64,
    min: Option<f64>,
    max: Option<f64>,
    first: Option<NaiveDateTime>,
    last: Option<NaiveDateTime>,
}

impl Accumulator {
    fn push(&mut self, p: &Purchase) {
        self.count += 1;
        self.total += p.amount;
        self.min = Some(self.min.map_or(p.amount, |m| m.min(p.amount)));
        self.max = Some(self.max.map_or(p.amount, |m| m.max(p.amount)));
        self.first = Some(self.first.map_or(p.purchased_at, |t| t.min(p.purchased_at)));
        self.last = Some(self.last.map_or(p.purchased_at, |t| t.max(p.purchased_at)));
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }
}

/// Revenue descending, then name ascending.
fn by_revenue_then_name(a_rev: f64, a_name: &str, b_rev: f64, b_name: &str) -> Ordering {
    b_rev.total_cmp(&a_rev).then_with(|| a_name.cmp(b_name))
}

/// One row per cleaned customer, in customer order; customers without purchases keep zeroes.
pub fn customer_stats(customers: &[Customer], purchases: &[Purchase]) -> Vec<CustomerStats> {
    let mut by_customer: HashMap<i64, Accumulator> = HashMap::new();
    for p in purchases {
        by_customer.entry(p.customer_id).or_default().push(p);
    }

    customers
        .iter()
        .map(|c| {
            let acc = by_customer.get(&c.id).cloned().unwrap_or_default();
            CustomerStats {
                customer_id: c.id,
                name: c.name.clone(),
                email: c.email.clone(),
                registered_at: c.registered_at,
                country: c.country.clone(),
                purchase_count: acc.count,
                total_amount: acc.total,
                mean_amount: acc.mean(),
                first_purchase: acc.first,
                last_purchase: acc.last,
            }
        })
        .collect()
}

/// One row per product, by revenue descending then product ascending.
pub fn product_stats(purchases: &[Purchase]) -> Vec<ProductStats> {
    let mut by_product: HashMap<&str, Accumulator> = HashMap::new();
    for p in purchases {
        by_product.entry(p.product.as_str()).or_default().push(p);
    }

    let mut rows: Vec<ProductStats> = by_product
        .into_iter()
        .map(|(product, acc)| ProductStats {
            product: product.to_string(),
            sale_count: acc.count,
            revenue: acc.total,
            mean_price: acc.mean(),
            min_price: acc.min.unwrap_or(0.0),
            max_price: acc.max.unwrap_or(0.0),
        })
        .collect();
    rows.sort_by(|a, b| by_revenue_then_name(a.revenue, &a.product, b.revenue, &b.product));
    rows
}

/// One row per `YYYY-MM` present in the purchases, ascending.
pub fn monthly_stats(purchases: &[Purchase]) -> Vec<MonthlyStats> {
    let mut by_month: BTreeMap<String, (Accumulator, HashSet<i64>)> = BTreeMap::new();
    for p in purchases {
        let (acc, customers) = by_month.entry(p.year_month()).or_default();
        acc.push(p);
        customers.insert(p.customer_id);
    }

    by_month
        .into_iter()
        .map(|(year_month, (acc, customers))| MonthlyStats {
            year_month,
            purchase_count: acc.count,
            revenue: acc.total,
            mean_basket: acc.mean(),
            unique_customers: customers.len() as i64,
        })
        .collect()
}

/// Country view plus the number of purchases left out of it.
#[derive(Debug, Clone, PartialEq)]
pub struct CountryView {
    pub rows: Vec<CountryStats>,
    /// Purchases whose customer is not in the cleaned customer set.
    pub unresolved: usize,
}

/// One row per country with at least one resolved purchase, by revenue descending then country.
pub fn country_stats(customers: &[Customer], purchases: &[Purchase]) -> CountryView {
    let country_of: HashMap<i64, &str> = customers
        .iter()
        .map(|c| (c.id, c.country.as_str()))
        .collect();

    let mut by_country: HashMap<&str, (Accumulator, HashSet<i64>)> = HashMap::new();
    let mut unresolved = 0;
    for p in purchases {
        let Some(&country) = country_of.get(&p.customer_id) else {
            unresolved += 1;
            continue;
        };
        let (acc, buyers) = by_country.entry(country).or_default();
        acc.push(p);
        buyers.insert(p.customer_id);
    }

    let mut rows: Vec<CountryStats> = by_country
        .into_iter()
        .map(|(country, (acc, buyers))| CountryStats {
            country: country.to_string(),
            customer_count: buyers.len() as i64,
            purchase_count: acc.count,
            revenue: acc.total,
            mean_basket: acc.mean(),
        })
        .collect();
    rows.sort_by(|a, b| by_revenue_then_name(a.revenue, &a.country, b.revenue, &b.country));

    CountryView { rows, unresolved }
}

/// All four views.
#[derive(Debug, Clone, PartialEq)]
pub struct Views {
    pub customers: Vec<CustomerStats>,
    pub products: Vec<ProductStats>,
    pub monthly: Vec<MonthlyStats>,
    pub countries: CountryView,
}

/// Compute the four views concurrently on the current rayon pool.
pub fn aggregate_all(customers: &[Customer], purchases: &[Purchase]) -> Views {
    let ((c, p), (m, k)) = rayon::join(
        || {
            rayon::join(
                || customer_stats(customers, purchases),
                || product_stats(purchases),
            )
        },
        || {
            rayon::join(
                || monthly_stats(purchases),
                || country_stats(customers, purchases),
            )
        },
    );
    Views {
        customers: c,
        products: p,
        monthly: m,
        countries: k,
    }
}

/// Outcome of one aggregation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AggregationReport {
    /// Cleaned purchases read.
    pub rows_in: usize,
    /// Rows in the written view.
    pub rows_out: usize,
    /// Purchases excluded for an unknown customer (country view only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unresolved: Option<usize>,
}

fn read_intermediate<R: Record>(ctx: &PipelineContext, key: &str) -> PipelineResult<Vec<R>> {
    let bytes = ctx.objects.get(&ctx.layout.intermediate_bucket, key)?;
    let dataset = read_parquet(bytes, &R::schema())?;
    from_dataset(&dataset)
}

fn write_view<R: Record>(ctx: &PipelineContext, view: ViewKind, rows: &[R]) -> PipelineResult<()> {
    let bytes = write_parquet(&to_dataset(rows))?;
    let bucket = &ctx.layout.aggregate_bucket;
    ctx.objects.ensure_bucket(bucket)?;
    ctx.objects.put(bucket, view.object_key(), &bytes)?;
    tracing::info!(view = %view, rows = rows.len(), bytes = bytes.len(), "wrote aggregate view");
    Ok(())
}

/// Unit `aggregate_<view>`: intermediate artifacts → one aggregate-tier view.
pub fn run_aggregate(ctx: &PipelineContext, view: ViewKind) -> PipelineResult<AggregationReport> {
    let purchases: Vec<Purchase> = read_intermediate(ctx, StorageLayout::CLEAN_PURCHASES_KEY)?;
    let rows_in = purchases.len();

    let (rows_out, unresolved) = match view {
        ViewKind::CustomerStats => {
            let customers: Vec<Customer> =
                read_intermediate(ctx, StorageLayout::CLEAN_CUSTOMERS_KEY)?;
            let rows = customer_stats(&customers, &purchases);
            write_view(ctx, view, &rows)?;
            (rows.len(), None)
        }
        ViewKind::ProductStats => {
            let rows = product_stats(&purchases);
            write_view(ctx, view, &rows)?;
            (rows.len(), None)
        }
        ViewKind::MonthlyStats => {
            let rows = monthly_stats(&purchases);
            write_view(ctx, view, &rows)?;
            (rows.len(), None)
        }
        ViewKind::CountryStats => {
            let customers: Vec<Customer> =
                read_intermediate(ctx, StorageLayout::CLEAN_CUSTOMERS_KEY)?;
            let CountryView { rows, unresolved } = country_stats(&customers, &purchases);
            if unresolved > 0 {
                tracing::warn!(
                    unresolved,
                    "purchases reference unknown customers; excluded from the country view"
                );
            }
            write_view(ctx, view, &rows)?;
            (rows.len(), Some(unresolved))
        }
    };

    Ok(AggregationReport {
        rows_in,
        rows_out,
        unresolved,
    })
}
