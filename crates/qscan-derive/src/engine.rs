//! Top-level entry point: given a period series and market context,
//! produces the persisted [`qscan_schemas::DerivationArtifact`] and the
//! valuation derived from it. Pure and deterministic — every "now" is the
//! latest snapshot's date, never a wall-clock read.

use std::collections::BTreeMap;

use qscan_schemas::{DerivationArtifact, ReasonCode};

use crate::dcf;
use crate::gates;
use crate::metrics;
use crate::types::{DerivationConfig, MarketInputs, PeriodSnapshot, Valuation, ValuationQuality};
use crate::wacc;

pub fn evaluate(config: &DerivationConfig, periods: &[PeriodSnapshot], market: &MarketInputs) -> (DerivationArtifact, Valuation) {
    let artifact = metrics::build(periods);
    let revenue_ttm = metrics::revenue_ttm(periods).unwrap_or(0.0);

    if let Some(failure) = gates::pre_projection(&artifact, market, revenue_ttm) {
        return (artifact, Valuation::not_available(failure.reason_code, failure.reason_inputs));
    }

    let wacc_result = wacc::compute(config, market, artifact.taxes.effective_rate);
    let terminal = dcf::terminal_growth(config, market);
    let projection = dcf::project(&artifact, revenue_ttm, wacc_result.tax_rate, config.horizon_years, terminal);

    if let Some(failure) = gates::post_projection(&projection, config.horizon_years) {
        return (artifact, Valuation::not_available(failure.reason_code, failure.reason_inputs));
    }

    let Some(per_share) = dcf::present_value_per_share(&projection, wacc_result.wacc, terminal, &artifact) else {
        let mut inputs = BTreeMap::new();
        inputs.insert("wacc".to_string(), wacc_result.wacc.to_string());
        inputs.insert("terminalGrowth".to_string(), terminal.to_string());
        return (artifact, Valuation::not_available(ReasonCode::MissingData, inputs));
    };

    let fair_value_per_share = qscan_numerics::clamp(per_share, 0.0, 50_000.0);
    let upside = qscan_numerics::clamp(qscan_numerics::safe_div(fair_value_per_share, market.price, 0.0) - 1.0, -1.0, 5.0);
    let sensitivity = dcf::sensitivity(&artifact, revenue_ttm, wacc_result.tax_rate, config.horizon_years, wacc_result.wacc, terminal);

    let valuation = Valuation {
        quality: ValuationQuality::Ok,
        reason_code: None,
        reason_inputs: BTreeMap::new(),
        wacc: Some(wacc_result.wacc),
        projection,
        fair_value_per_share: Some(fair_value_per_share),
        upside: Some(upside),
        sensitivity,
    };

    (artifact, valuation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn snap(year: i32, revenue: f64, ebit: f64) -> PeriodSnapshot {
        PeriodSnapshot::new(Utc.with_ymd_and_hms(year, 12, 31, 0, 0, 0).unwrap())
            .with_field("revenue", revenue)
            .with_field("ebit", ebit)
            .with_field("capex", -revenue * 0.05)
            .with_field("da", revenue * 0.03)
            .with_field("totalCurrentAssets", revenue * 0.3)
            .with_field("totalCurrentLiabilities", revenue * 0.15)
            .with_field("incomeTaxExpense", ebit * 0.25)
            .with_field("incomeBeforeTax", ebit)
            .with_field("dilutedSharesOutstanding", 100.0)
            .with_field("netDebt", 50.0)
            .with_field("propertyPlantEquipmentNet", revenue * 0.4)
    }

    fn healthy_market() -> MarketInputs {
        MarketInputs {
            price: 40.0,
            currency: "USD".into(),
            country: "US".into(),
            market_cap: 8.0e9,
            beta: Some(1.1),
            cash: 1.0e8,
            is_emerging_market: false,
        }
    }

    fn healthy_periods() -> Vec<PeriodSnapshot> {
        (0..5).map(|i| snap(2019 + i, 1000.0 * 1.1f64.powi(i), 150.0 * 1.1f64.powi(i))).collect()
    }

    #[test]
    fn healthy_inputs_produce_a_quality_valuation() {
        let (_, valuation) = evaluate(&DerivationConfig::default(), &healthy_periods(), &healthy_market());
        assert_eq!(valuation.quality, ValuationQuality::Ok);
        assert!(valuation.fair_value_per_share.is_some());
        assert!(valuation.sensitivity.is_some());
    }

    #[test]
    fn empty_periods_is_not_available() {
        let (_, valuation) = evaluate(&DerivationConfig::default(), &[], &healthy_market());
        assert_eq!(valuation.quality, ValuationQuality::NotAvailable);
        assert_eq!(valuation.reason_code, Some(ReasonCode::MissingData));
    }

    #[test]
    fn zero_price_is_missing_data() {
        let mut market = healthy_market();
        market.price = 0.0;
        let (_, valuation) = evaluate(&DerivationConfig::default(), &healthy_periods(), &market);
        assert_eq!(valuation.reason_code, Some(ReasonCode::MissingData));
    }
}
