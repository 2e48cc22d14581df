use qscan_numerics::{clamp, safe_div};

use crate::types::{DerivationConfig, MarketInputs};

pub struct WaccResult {
    pub wacc: f64,
    pub tax_rate: f64,
}

/// Risk-free rate resolved by currency, country risk premium layered on
/// the base equity risk premium, beta-scaled, with a size premium for
/// small caps and a discount for cash-heavy balance sheets.
pub fn compute(config: &DerivationConfig, market: &MarketInputs, raw_tax_rate: f64) -> WaccResult {
    let risk_free = config
        .risk_free_by_currency
        .get(&market.currency)
        .copied()
        .unwrap_or(config.default_risk_free);

    let country_risk_premium = config.country_risk_premium.get(&market.country).copied().unwrap_or(0.0);
    let erp = 0.055 + country_risk_premium;

    let beta = clamp(market.beta.unwrap_or(1.0), 0.2, 3.0);

    let size_premium = if market.market_cap < 1.0e9 {
        0.02
    } else if market.market_cap < 5.0e9 {
        0.01
    } else {
        0.0
    };

    // Cash-heavy balance sheets carry proportionally less operating risk;
    // approximate the discount as the cash fraction of market cap scaled
    // by the risk-free rate.
    let cash_yield = clamp(safe_div(market.cash, market.market_cap, 0.0) * risk_free, 0.0, 0.02);

    let wacc = clamp(risk_free + beta * erp + size_premium - cash_yield, 0.05, 0.18);

    let tax_floor = config
        .tax_floor_by_country
        .get(&market.country)
        .or_else(|| config.tax_floor_by_currency.get(&market.currency))
        .copied()
        .unwrap_or(config.default_tax_floor);
    let tax_rate = clamp(raw_tax_rate.max(tax_floor), 0.05, 0.4);

    WaccResult { wacc, tax_rate }
}
