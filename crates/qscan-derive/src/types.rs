use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// One period's raw line items, keyed by whatever field name the vendor
/// used. [`crate::fields`] resolves a semantic field (revenue, EBIT, ...)
/// against a ranked alias list over this map, since different vendors and
/// even different periods from the same vendor are inconsistent about
/// naming.
#[derive(Debug, Clone)]
pub struct PeriodSnapshot {
    pub period_end: DateTime<Utc>,
    pub raw: BTreeMap<String, f64>,
}

impl PeriodSnapshot {
    pub fn new(period_end: DateTime<Utc>) -> Self {
        Self { period_end, raw: BTreeMap::new() }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: f64) -> Self {
        self.raw.insert(key.into(), value);
        self
    }
}

/// Market/context inputs orthogonal to the fundamentals series.
#[derive(Debug, Clone)]
pub struct MarketInputs {
    pub price: f64,
    pub currency: String,
    pub country: String,
    pub market_cap: f64,
    pub beta: Option<f64>,
    pub cash: f64,
    pub is_emerging_market: bool,
}

#[derive(Debug, Clone)]
pub struct DerivationConfig {
    pub horizon_years: u32,
    pub risk_free_by_currency: BTreeMap<String, f64>,
    pub default_risk_free: f64,
    pub terminal_growth_by_currency: BTreeMap<String, f64>,
    pub default_terminal_growth: f64,
    pub emerging_market_terminal_growth: f64,
    pub country_risk_premium: BTreeMap<String, f64>,
    pub tax_floor_by_country: BTreeMap<String, f64>,
    pub tax_floor_by_currency: BTreeMap<String, f64>,
    pub default_tax_floor: f64,
}

impl Default for DerivationConfig {
    fn default() -> Self {
        Self {
            horizon_years: 5,
            risk_free_by_currency: BTreeMap::new(),
            default_risk_free: 0.045,
            terminal_growth_by_currency: BTreeMap::new(),
            default_terminal_growth: 0.02,
            emerging_market_terminal_growth: 0.025,
            country_risk_premium: BTreeMap::new(),
            tax_floor_by_country: BTreeMap::new(),
            tax_floor_by_currency: BTreeMap::new(),
            default_tax_floor: 0.20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValuationQuality {
    Ok,
    NotAvailable,
}

#[derive(Debug, Clone, Copy)]
pub struct Sensitivity {
    pub low: f64,
    pub high: f64,
}

/// One projected DCF year. Kept around on the valuation for callers that
/// want to inspect the glide path, not just the final per-share number.
#[derive(Debug, Clone, Copy)]
pub struct YearProjection {
    pub year: u32,
    pub growth: f64,
    pub revenue: f64,
    pub ebit: f64,
    pub nopat: f64,
    pub reinvestment: f64,
    pub fcf: f64,
    pub reinvestment_clamped: bool,
}

#[derive(Debug, Clone)]
pub struct Valuation {
    pub quality: ValuationQuality,
    pub reason_code: Option<qscan_schemas::ReasonCode>,
    pub reason_inputs: BTreeMap<String, String>,
    pub wacc: Option<f64>,
    pub projection: Vec<YearProjection>,
    pub fair_value_per_share: Option<f64>,
    pub upside: Option<f64>,
    pub sensitivity: Option<Sensitivity>,
}

impl Valuation {
    pub fn not_available(reason_code: qscan_schemas::ReasonCode, reason_inputs: BTreeMap<String, String>) -> Self {
        Self {
            quality: ValuationQuality::NotAvailable,
            reason_code: Some(reason_code),
            reason_inputs,
            wacc: None,
            projection: Vec::new(),
            fair_value_per_share: None,
            upside: None,
            sensitivity: None,
        }
    }
}
