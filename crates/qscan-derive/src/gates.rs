//! Rejection gates (layered, sticky-on-first-match — same pattern as the
//! fixed-income risk evaluator this engine is descended from): each gate
//! is checked in order and the first failure short-circuits the rest,
//! producing a structured N/A result instead of a number.

use std::collections::BTreeMap;

use qscan_schemas::{DerivationArtifact, ReasonCode};

use crate::types::{MarketInputs, YearProjection};

pub struct GateFailure {
    pub reason_code: ReasonCode,
    pub reason_inputs: BTreeMap<String, String>,
}

fn fail(code: ReasonCode, inputs: &[(&str, String)]) -> GateFailure {
    GateFailure { reason_code: code, reason_inputs: inputs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect() }
}

/// Gates checkable before a DCF projection exists: data sufficiency and
/// the inputs that would make any projection meaningless on their own.
pub fn pre_projection(artifact: &DerivationArtifact, market: &MarketInputs, revenue_ttm: f64) -> Option<GateFailure> {
    if artifact.controls.data_quality_score < 0.7 {
        return Some(fail(
            ReasonCode::MissingData,
            &[("dataQualityScore", artifact.controls.data_quality_score.to_string())],
        ));
    }
    if revenue_ttm <= 0.0 {
        return Some(fail(ReasonCode::MissingData, &[("revenueTtm", revenue_ttm.to_string())]));
    }
    if artifact.structure.shares_diluted <= 0.0 || market.price <= 0.0 {
        return Some(fail(
            ReasonCode::MissingData,
            &[
                ("sharesDiluted", artifact.structure.shares_diluted.to_string()),
                ("price", market.price.to_string()),
            ],
        ));
    }
    if artifact.controls.reinvestment_flagged {
        return Some(fail(ReasonCode::NegFcf, &[("reinvestmentFlagged", "true".to_string())]));
    }
    let operating_margin = artifact.margins.operating_margin.unwrap_or(0.0);
    if operating_margin < 0.07 || artifact.reinvestment.sales_to_capital < 0.5 {
        return Some(fail(
            ReasonCode::NegFcf,
            &[
                ("operatingMargin", operating_margin.to_string()),
                ("salesToCapital", artifact.reinvestment.sales_to_capital.to_string()),
            ],
        ));
    }
    None
}

/// Gates that need the completed projection: FCF health across the
/// horizon and year-over-year volatility of the glide path.
pub fn post_projection(projection: &[YearProjection], horizon: u32) -> Option<GateFailure> {
    let negative_years = projection.iter().filter(|y| y.fcf <= 0.0).count();
    let threshold = ((horizon as f64) / 2.0).ceil() as usize;
    if negative_years >= threshold {
        return Some(fail(ReasonCode::NegFcf, &[("negativeFcfYears", negative_years.to_string())]));
    }
    if projection.iter().any(|y| y.reinvestment > y.nopat) {
        return Some(fail(ReasonCode::NegFcf, &[("reinvestmentExceedsNopat", "true".to_string())]));
    }
    for window in projection.windows(2) {
        let (prev, cur) = (window[0], window[1]);
        if prev.fcf.abs() < 1e-6 {
            continue;
        }
        let ratio = cur.fcf / prev.fcf;
        if !(0.5..=2.0).contains(&ratio) {
            return Some(fail(
                ReasonCode::VolatileGrowth,
                &[("year", cur.year.to_string()), ("fcfRatio", ratio.to_string())],
            ));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market(price: f64) -> MarketInputs {
        MarketInputs {
            price,
            currency: "USD".into(),
            country: "US".into(),
            market_cap: 1.0e9,
            beta: Some(1.0),
            cash: 0.0,
            is_emerging_market: false,
        }
    }

    #[test]
    fn low_quality_score_is_missing_data() {
        let mut artifact = DerivationArtifact::default();
        artifact.controls.data_quality_score = 0.5;
        let failure = pre_projection(&artifact, &market(10.0), 100.0).unwrap();
        assert_eq!(failure.reason_code, ReasonCode::MissingData);
    }

    #[test]
    fn negative_fcf_majority_rejects() {
        let projection = vec![
            YearProjection { year: 1, growth: 0.0, revenue: 100.0, ebit: 10.0, nopat: 8.0, reinvestment: 1.0, fcf: -1.0, reinvestment_clamped: false },
            YearProjection { year: 2, growth: 0.0, revenue: 100.0, ebit: 10.0, nopat: 8.0, reinvestment: 1.0, fcf: -1.0, reinvestment_clamped: false },
            YearProjection { year: 3, growth: 0.0, revenue: 100.0, ebit: 10.0, nopat: 8.0, reinvestment: 1.0, fcf: 5.0, reinvestment_clamped: false },
        ];
        let failure = post_projection(&projection, 5).unwrap();
        assert_eq!(failure.reason_code, ReasonCode::NegFcf);
    }

    #[test]
    fn volatile_fcf_ratio_flags() {
        let projection = vec![
            YearProjection { year: 1, growth: 0.0, revenue: 100.0, ebit: 10.0, nopat: 8.0, reinvestment: 1.0, fcf: 10.0, reinvestment_clamped: false },
            YearProjection { year: 2, growth: 0.0, revenue: 100.0, ebit: 10.0, nopat: 8.0, reinvestment: 1.0, fcf: 30.0, reinvestment_clamped: false },
        ];
        let failure = post_projection(&projection, 5).unwrap();
        assert_eq!(failure.reason_code, ReasonCode::VolatileGrowth);
    }
}
