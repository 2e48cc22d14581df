//! Builds a [`qscan_schemas::DerivationArtifact`] from a period series.
//! Every computation here is pure: no I/O, no wall-clock reads — "now" for
//! TTM windows is always the latest snapshot's `period_end`.

use std::collections::BTreeMap;

use qscan_numerics::dates::DatedValue;
use qscan_numerics::{clamp, coefficient_of_variation, geometric_mean, safe_div, std_dev, ttm};
use qscan_schemas::{
    ControlFlags, DerivationArtifact, GrowthMetrics, MarginMetrics, ProfitabilityMetrics,
    ReinvestmentMetrics, StructureMetrics, TaxMetrics,
};

use crate::fields;
use crate::types::PeriodSnapshot;

const MAX_GROWTH_WINDOW: usize = 5;
const TRIM_FRACTION: f64 = 0.2;

/// Drops the lowest and highest `TRIM_FRACTION` of the sorted sample, then
/// averages what remains. Falls back to the plain mean when trimming would
/// leave nothing.
fn trimmed_mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let trim = ((sorted.len() as f64) * TRIM_FRACTION).floor() as usize;
    let slice = if sorted.len() > 2 * trim { &sorted[trim..sorted.len() - trim] } else { &sorted[..] };
    Some(slice.iter().sum::<f64>() / slice.len() as f64)
}

fn growth_metrics(periods: &[PeriodSnapshot]) -> GrowthMetrics {
    let revenue = fields::revenue(periods);
    let mut factors = Vec::new();
    for window in revenue.windows(2) {
        if let (Some(prev), Some(cur)) = (window[0], window[1]) {
            if prev > 0.0 && cur > 0.0 {
                factors.push(cur / prev);
            }
        }
    }
    let recent: Vec<f64> = factors.iter().rev().take(MAX_GROWTH_WINDOW).copied().collect();
    let per_period_growth: Vec<f64> = recent.iter().map(|f| f - 1.0).collect();

    match geometric_mean(&recent) {
        Some(gm) if recent.len() >= 2 => GrowthMetrics {
            revenue_cagr: clamp(gm - 1.0, -0.2, 0.25),
            volatility: std_dev(&per_period_growth),
            per_period_growth,
            using_default_revenue_growth: false,
        },
        _ => GrowthMetrics {
            revenue_cagr: 0.05,
            per_period_growth,
            volatility: 0.0,
            using_default_revenue_growth: true,
        },
    }
}

fn margin_series(numerator: &[Option<f64>], denominator: &[Option<f64>]) -> Vec<f64> {
    numerator
        .iter()
        .zip(denominator.iter())
        .filter_map(|(n, d)| match (n, d) {
            (Some(n), Some(d)) if *d != 0.0 => Some(n / d),
            _ => None,
        })
        .filter(|r| *r > 0.0 && *r < 1.0)
        .collect()
}

fn margin_metrics(periods: &[PeriodSnapshot]) -> MarginMetrics {
    let revenue = fields::revenue(periods);
    let operating = margin_series(&fields::ebit(periods), &revenue);
    let ebitda = margin_series(&fields::ebitda(periods), &revenue);

    let operating_margin = trimmed_mean(&operating).map(|m| clamp(m, 0.05, 0.3));
    let ebitda_margin = trimmed_mean(&ebitda).map(|m| clamp(m, 0.05, 0.45));

    MarginMetrics {
        using_default_margin: operating_margin.is_none() && ebitda_margin.is_none(),
        operating_margin_volatility: std_dev(&operating),
        ebitda_margin_volatility: std_dev(&ebitda),
        operating_margin,
        ebitda_margin,
    }
}

fn reinvestment_metrics(periods: &[PeriodSnapshot], working_capital_series: &[f64]) -> ReinvestmentMetrics {
    let revenue = fields::revenue(periods);
    let capex = fields::capex_outflow_positive(periods);
    let depreciation = fields::depreciation(periods);

    let mut ratios = Vec::new();
    let mut reinvestments = Vec::new();
    for i in 1..periods.len() {
        let (Some(rev_prev), Some(rev_cur)) = (revenue[i - 1], revenue[i]) else { continue };
        let delta_revenue = rev_cur - rev_prev;
        if delta_revenue <= 0.0 {
            continue;
        }
        let capex_t = capex[i].unwrap_or(0.0);
        let da_t = depreciation[i].unwrap_or(0.0).abs();
        let delta_wc = if i < working_capital_series.len() {
            working_capital_series[i] - working_capital_series[i - 1]
        } else {
            0.0
        };
        let reinvestment = (capex_t - da_t + delta_wc.max(0.0)).max(0.0);
        reinvestments.push(reinvestment);
        if reinvestment > 0.0 {
            let ratio = delta_revenue / reinvestment;
            if ratio > 0.0 && ratio < 20.0 {
                ratios.push(ratio);
            }
        }
    }

    if ratios.is_empty() {
        return ReinvestmentMetrics {
            sales_to_capital: 2.5,
            deviation: 0.0,
            flagged: true,
            using_default_sales_to_capital: true,
        };
    }

    let sales_to_capital = clamp(ratios.iter().sum::<f64>() / ratios.len() as f64, 1.0, 8.0);
    let deviation = coefficient_of_variation(&reinvestments);
    ReinvestmentMetrics {
        sales_to_capital,
        deviation,
        flagged: deviation > 0.25,
        using_default_sales_to_capital: false,
    }
}

fn tax_metrics(periods: &[PeriodSnapshot]) -> TaxMetrics {
    let tax = fields::tax_expense(periods);
    let pretax = fields::pretax_income(periods);
    let rates: Vec<f64> = tax
        .iter()
        .zip(pretax.iter())
        .filter_map(|(t, p)| match (t, p) {
            (Some(t), Some(p)) if *p != 0.0 => Some(t / p),
            _ => None,
        })
        .filter(|r| *r > 0.0 && *r <= 0.6)
        .collect();

    match trimmed_mean(&rates) {
        Some(rate) => TaxMetrics { effective_rate: clamp(rate, 0.15, 0.35), using_default_tax_rate: false },
        None => TaxMetrics { effective_rate: 0.25, using_default_tax_rate: true },
    }
}

fn structure_metrics(periods: &[PeriodSnapshot]) -> (StructureMetrics, bool) {
    let latest = periods.last().expect("caller checked periods is non-empty");
    let (shares_diluted, using_fallback_shares) = fields::shares_diluted(latest);
    let working_capital = fields::working_capital(latest);
    let ppe = fields::ppe(latest);
    // Invested capital approximated as net PP&E plus non-cash working
    // capital — the Damodaran operating-asset view, since the vendor feed
    // carries no direct "invested capital" line.
    let invested_capital = ppe + working_capital.max(0.0);
    (
        StructureMetrics {
            net_debt: fields::net_debt(latest),
            shares_diluted,
            shares_basic: fields::shares_basic(latest),
            using_fallback_shares,
            working_capital,
            ppe,
            invested_capital,
            minority_interest: fields::minority_interest(latest),
            preferred_equity: fields::preferred_equity(latest),
            investments_in_associates: fields::investments_in_associates(latest),
        },
        using_fallback_shares,
    )
}

fn profitability_metrics(revenue_ttm: f64, operating_margin: f64, tax_rate: f64, invested_capital: f64) -> ProfitabilityMetrics {
    let ebit = revenue_ttm * operating_margin;
    let nopat = ebit * (1.0 - tax_rate);
    ProfitabilityMetrics { nopat, roic: safe_div(nopat, invested_capital, 0.0) }
}

/// Trailing-twelve-month revenue, anchored at the latest period's date.
pub fn revenue_ttm(periods: &[PeriodSnapshot]) -> Option<f64> {
    let observations: Vec<DatedValue> = periods
        .iter()
        .filter_map(|p| fields::extract_one(p, &["revenue", "totalRevenue", "netSales", "sales"]).map(|v| DatedValue { at: p.period_end, value: v }))
        .collect();
    let now = periods.last()?.period_end;
    ttm(&observations, now)
}

pub fn build(periods: &[PeriodSnapshot]) -> DerivationArtifact {
    let symbol = String::new();
    if periods.is_empty() {
        return DerivationArtifact { symbol, ..Default::default() };
    }

    let growth = growth_metrics(periods);
    let margins = margin_metrics(periods);
    let working_capital_series: Vec<f64> = periods.iter().map(fields::working_capital).collect();
    let reinvestment = reinvestment_metrics(periods, &working_capital_series);
    let taxes = tax_metrics(periods);
    let (structure, fallback_shares) = structure_metrics(periods);

    let revenue_ttm = revenue_ttm(periods).unwrap_or(0.0);
    let profitability = profitability_metrics(
        revenue_ttm,
        margins.operating_margin.unwrap_or(0.05),
        taxes.effective_rate,
        structure.invested_capital,
    );

    let fewer_than_3_periods = periods.len() < 3;
    let mut flags = BTreeMap::new();
    flags.insert("usingDefaultRevenueGrowth".to_string(), growth.using_default_revenue_growth);
    flags.insert("usingDefaultMargin".to_string(), margins.using_default_margin);
    flags.insert("usingDefaultSalesToCapital".to_string(), reinvestment.using_default_sales_to_capital);
    flags.insert("usingDefaultTaxRate".to_string(), taxes.using_default_tax_rate);
    flags.insert("usingFallbackShares".to_string(), fallback_shares);
    flags.insert("fewerThanThreePeriods".to_string(), fewer_than_3_periods);
    let defaults = flags.values().filter(|v| **v).count();
    let data_quality_score = 1.0 - (defaults as f64 / flags.len() as f64);

    let volatility = (growth.volatility + margins.operating_margin_volatility + margins.ebitda_margin_volatility) / 3.0;

    let reinvestment_flagged = reinvestment.flagged;
    DerivationArtifact {
        symbol,
        growth,
        margins,
        reinvestment,
        taxes,
        structure,
        profitability,
        volatility,
        controls: ControlFlags {
            data_quality_flags: flags,
            data_quality_score,
            reinvestment_flagged,
        },
    }
}
