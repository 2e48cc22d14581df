use qscan_numerics::{clamp, safe_div};
use qscan_schemas::DerivationArtifact;

use crate::types::{DerivationConfig, MarketInputs, Sensitivity, YearProjection};

pub fn terminal_growth(config: &DerivationConfig, market: &MarketInputs) -> f64 {
    config
        .terminal_growth_by_currency
        .get(&market.currency)
        .copied()
        .unwrap_or(if market.is_emerging_market { config.emerging_market_terminal_growth } else { config.default_terminal_growth })
}

/// Linear glide from `starting_growth` down (or up) to `terminal` over
/// `horizon` years, projecting revenue/EBIT/NOPAT/reinvestment/FCF per
/// year from the trailing-twelve-month revenue base.
pub fn project(
    artifact: &DerivationArtifact,
    revenue_ttm: f64,
    tax_rate: f64,
    horizon: u32,
    terminal: f64,
) -> Vec<YearProjection> {
    let starting_growth = clamp(artifact.growth.revenue_cagr * 0.8, -0.2, 0.3 * 0.8);
    let operating_margin = artifact.margins.operating_margin.unwrap_or(0.05);
    let sales_to_capital = artifact.reinvestment.sales_to_capital;

    let mut revenue = revenue_ttm;
    let mut years = Vec::with_capacity(horizon as usize);
    for year in 1..=horizon {
        let t = if horizon <= 1 { 1.0 } else { (year - 1) as f64 / (horizon - 1) as f64 };
        let growth = starting_growth + (terminal - starting_growth) * t;

        let prev_revenue = revenue;
        revenue *= 1.0 + growth;
        let ebit = revenue * operating_margin;
        let nopat = ebit * (1.0 - tax_rate);
        let delta_revenue = revenue - prev_revenue;
        let reinvestment = safe_div(delta_revenue, sales_to_capital, 0.0).max(0.0);

        let (fcf, clamped) = if reinvestment > nopat {
            (0.9 * nopat, true)
        } else {
            (nopat - reinvestment, false)
        };

        years.push(YearProjection { year, growth, revenue, ebit, nopat, reinvestment, fcf, reinvestment_clamped: clamped });
    }
    years
}

/// Per-share equity value, unclamped — callers apply the `[0, 50000]`
/// output clamp separately since sensitivity cells need the raw number
/// to compare low/high correctly.
pub fn present_value_per_share(
    projection: &[YearProjection],
    wacc: f64,
    terminal: f64,
    artifact: &DerivationArtifact,
) -> Option<f64> {
    if wacc <= terminal {
        return None;
    }
    let mut factor = 1.0;
    let mut pv_fcf = 0.0;
    for year in projection {
        factor /= 1.0 + wacc;
        pv_fcf += year.fcf * factor;
    }
    let last_fcf = projection.last()?.fcf;
    let terminal_value = last_fcf * (1.0 + terminal) / (wacc - terminal);
    let pv_terminal = terminal_value * factor;

    let enterprise_value = pv_fcf + pv_terminal;
    let equity_value = enterprise_value - artifact.structure.net_debt - artifact.structure.minority_interest
        - artifact.structure.preferred_equity
        + artifact.structure.investments_in_associates;
    Some(equity_value / artifact.structure.shares_diluted.max(1.0))
}

/// 3x3 grid over wacc in {-1%, 0, +1%} and terminal growth in
/// {-0.5%, 0, +0.5%}, skipping any cell where wacc <= terminal growth.
pub fn sensitivity(
    artifact: &DerivationArtifact,
    revenue_ttm: f64,
    tax_rate: f64,
    horizon: u32,
    base_wacc: f64,
    base_terminal: f64,
) -> Option<Sensitivity> {
    let wacc_offsets = [-0.01, 0.0, 0.01];
    let terminal_offsets = [-0.005, 0.0, 0.005];

    let mut values = Vec::new();
    for dw in wacc_offsets {
        for dt in terminal_offsets {
            let wacc = base_wacc + dw;
            let terminal = base_terminal + dt;
            if wacc <= terminal {
                continue;
            }
            let projection = project(artifact, revenue_ttm, tax_rate, horizon, terminal);
            if let Some(v) = present_value_per_share(&projection, wacc, terminal, artifact) {
                values.push(clamp(v, 0.0, 50_000.0));
            }
        }
    }
    if values.is_empty() {
        return None;
    }
    let low = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let high = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    Some(Sensitivity { low, high })
}
