//! Semantic field extraction over vendor-inconsistent period data. Every
//! function here is pure and takes its input by reference; no snapshot is
//! ever mutated in place (capex sign inference returns a corrected copy
//! of the series rather than rewriting `PeriodSnapshot::raw`).

use crate::types::PeriodSnapshot;

const REVENUE_ALIASES: &[&str] = &["revenue", "totalRevenue", "netSales", "sales"];
const EBIT_ALIASES: &[&str] = &["ebit", "operatingIncome", "incomeFromOperations"];
const EBITDA_ALIASES: &[&str] = &["ebitda", "operatingIncomeBeforeDA"];
const CAPEX_ALIASES: &[&str] = &["capitalExpenditure", "capex", "purchaseOfPPE"];
const DEPRECIATION_ALIASES: &[&str] = &["depreciationAndAmortization", "da", "depreciation"];
const CURRENT_ASSETS_ALIASES: &[&str] = &["totalCurrentAssets", "currentAssets"];
const CURRENT_LIABILITIES_ALIASES: &[&str] = &["totalCurrentLiabilities", "currentLiabilities"];
const TAX_ALIASES: &[&str] = &["incomeTaxExpense", "provisionForIncomeTaxes", "taxExpense"];
const PRETAX_INCOME_ALIASES: &[&str] = &["incomeBeforeTax", "pretaxIncome", "ebt"];
const NET_DEBT_ALIASES: &[&str] = &["netDebt"];
const PPE_ALIASES: &[&str] = &["propertyPlantEquipmentNet", "netPPE", "ppe"];
const MINORITY_INTEREST_ALIASES: &[&str] = &["minorityInterest", "nonControllingInterest"];
const PREFERRED_EQUITY_ALIASES: &[&str] = &["preferredStockValue", "preferredEquity"];
const ASSOCIATES_ALIASES: &[&str] = &["investmentsInAssociates", "equityMethodInvestments"];
const DILUTED_SHARES_ALIASES: &[&str] = &["dilutedSharesOutstanding", "weightedAverageShsOutDil"];
const BASIC_SHARES_ALIASES: &[&str] = &["sharesOutstanding", "weightedAverageShsOut"];

/// First finite non-zero value found by trying `aliases` in rank order.
pub fn extract_one(snapshot: &PeriodSnapshot, aliases: &[&str]) -> Option<f64> {
    aliases.iter().find_map(|key| {
        snapshot.raw.get(*key).copied().filter(|v| v.is_finite() && *v != 0.0)
    })
}

/// `extract_one` across every period, in period order. Missing periods
/// come back as `None` rather than being dropped, so callers that need
/// year-over-year deltas keep correct alignment.
pub fn extract_series(periods: &[PeriodSnapshot], aliases: &[&str]) -> Vec<Option<f64>> {
    periods.iter().map(|p| extract_one(p, aliases)).collect()
}

pub fn revenue(periods: &[PeriodSnapshot]) -> Vec<Option<f64>> {
    extract_series(periods, REVENUE_ALIASES)
}

pub fn ebit(periods: &[PeriodSnapshot]) -> Vec<Option<f64>> {
    extract_series(periods, EBIT_ALIASES)
}

pub fn ebitda(periods: &[PeriodSnapshot]) -> Vec<Option<f64>> {
    extract_series(periods, EBITDA_ALIASES)
}

pub fn depreciation(periods: &[PeriodSnapshot]) -> Vec<Option<f64>> {
    extract_series(periods, DEPRECIATION_ALIASES)
}

pub fn current_assets(periods: &[PeriodSnapshot]) -> Vec<Option<f64>> {
    extract_series(periods, CURRENT_ASSETS_ALIASES)
}

pub fn current_liabilities(periods: &[PeriodSnapshot]) -> Vec<Option<f64>> {
    extract_series(periods, CURRENT_LIABILITIES_ALIASES)
}

pub fn tax_expense(periods: &[PeriodSnapshot]) -> Vec<Option<f64>> {
    extract_series(periods, TAX_ALIASES)
}

pub fn pretax_income(periods: &[PeriodSnapshot]) -> Vec<Option<f64>> {
    extract_series(periods, PRETAX_INCOME_ALIASES)
}

pub fn net_debt(latest: &PeriodSnapshot) -> f64 {
    extract_one(latest, NET_DEBT_ALIASES).unwrap_or(0.0)
}

pub fn ppe(latest: &PeriodSnapshot) -> f64 {
    extract_one(latest, PPE_ALIASES).unwrap_or(0.0)
}

pub fn minority_interest(latest: &PeriodSnapshot) -> f64 {
    extract_one(latest, MINORITY_INTEREST_ALIASES).unwrap_or(0.0)
}

pub fn preferred_equity(latest: &PeriodSnapshot) -> f64 {
    extract_one(latest, PREFERRED_EQUITY_ALIASES).unwrap_or(0.0)
}

pub fn investments_in_associates(latest: &PeriodSnapshot) -> f64 {
    extract_one(latest, ASSOCIATES_ALIASES).unwrap_or(0.0)
}

pub fn working_capital(latest: &PeriodSnapshot) -> f64 {
    let ca = extract_one(latest, CURRENT_ASSETS_ALIASES).unwrap_or(0.0);
    let cl = extract_one(latest, CURRENT_LIABILITIES_ALIASES).unwrap_or(0.0);
    ca - cl
}

/// Diluted shares, falling back to basic shares when no diluted alias
/// resolves. Returns `(shares, used_fallback)`.
pub fn shares_diluted(latest: &PeriodSnapshot) -> (f64, bool) {
    if let Some(v) = extract_one(latest, DILUTED_SHARES_ALIASES) {
        return (v, false);
    }
    (extract_one(latest, BASIC_SHARES_ALIASES).unwrap_or(0.0), true)
}

pub fn shares_basic(latest: &PeriodSnapshot) -> f64 {
    extract_one(latest, BASIC_SHARES_ALIASES).unwrap_or(0.0)
}

/// Raw capex observations (sign as reported by the vendor, before the
/// sign-inference pass).
pub fn capex_raw(periods: &[PeriodSnapshot]) -> Vec<Option<f64>> {
    extract_series(periods, CAPEX_ALIASES)
}

/// Capex sign is inferred once per company: vendors disagree on whether
/// capex is reported as a negative cash outflow or a positive spend
/// figure. If strictly-positive observations outnumber strictly-negative
/// ones, the series is assumed to already be outflow-positive and is
/// returned unchanged; otherwise every value is negated so the result is
/// always a positive outflow.
pub fn capex_outflow_positive(periods: &[PeriodSnapshot]) -> Vec<Option<f64>> {
    let raw = capex_raw(periods);
    let positive = raw.iter().filter(|v| matches!(v, Some(x) if *x > 0.0)).count();
    let negative = raw.iter().filter(|v| matches!(v, Some(x) if *x < 0.0)).count();
    if positive > negative {
        raw
    } else {
        raw.into_iter().map(|v| v.map(|x| -x)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snap(fields: &[(&str, f64)]) -> PeriodSnapshot {
        let mut s = PeriodSnapshot::new(Utc::now());
        for (k, v) in fields {
            s = s.with_field(*k, *v);
        }
        s
    }

    #[test]
    fn extract_one_prefers_ranked_alias_order() {
        let s = snap(&[("netSales", 10.0), ("revenue", 20.0)]);
        assert_eq!(extract_one(&s, REVENUE_ALIASES), Some(20.0));
    }

    #[test]
    fn extract_one_skips_zero_and_tries_next_alias() {
        let s = snap(&[("revenue", 0.0), ("totalRevenue", 30.0)]);
        assert_eq!(extract_one(&s, REVENUE_ALIASES), Some(30.0));
    }

    #[test]
    fn shares_diluted_falls_back_to_basic() {
        let s = snap(&[("weightedAverageShsOut", 100.0)]);
        assert_eq!(shares_diluted(&s), (100.0, true));
    }

    #[test]
    fn capex_sign_negated_when_majority_negative() {
        let periods = vec![snap(&[("capex", -5.0)]), snap(&[("capex", -7.0)]), snap(&[("capex", 3.0)])];
        let inferred = capex_outflow_positive(&periods);
        assert_eq!(inferred, vec![Some(5.0), Some(7.0), Some(-3.0)]);
    }

    #[test]
    fn capex_sign_kept_when_majority_positive() {
        let periods = vec![snap(&[("capex", 5.0)]), snap(&[("capex", 7.0)]), snap(&[("capex", -3.0)])];
        let inferred = capex_outflow_positive(&periods);
        assert_eq!(inferred, vec![Some(5.0), Some(7.0), Some(-3.0)]);
    }
}
