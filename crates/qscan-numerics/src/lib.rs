//! qscan-numerics
//!
//! Shared numeric primitives for the scanning platform: safe arithmetic
//! guards, descriptive statistics, trailing-twelve-month aggregation, and
//! cross-sectional percentile ranking. Pure functions only — no IO, no
//! wall-clock reads, no RNG. Callers pass in "now" explicitly wherever a
//! function needs it.

pub mod dates;
pub mod fixedpoint;
pub mod stats;

pub use dates::{rolling_window, ttm, DateLike};
pub use fixedpoint::Micros;
pub use stats::{
    clamp, coefficient_of_variation, geometric_mean, iqr_outlier_mask, percentage_change,
    percentile_rank, quartiles, safe_div, std_dev,
};
