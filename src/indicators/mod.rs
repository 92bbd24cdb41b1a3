// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicators used by the signal
// pipeline. Every public function returns `Option<T>` (or an empty series) so
// callers are forced to handle insufficient history; no NaN ever crosses this
// module's boundary.

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod channels;
pub mod ema;
pub mod fisher;
pub mod macd;
pub mod obv;
pub mod oscillators;
pub mod psar;
pub mod regression;
pub mod rsi;
pub mod stochastic;
pub mod supertrend;

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;

pub use atr::AtrBands;
pub use bollinger::BandSet;
pub use channels::DonchianChannel;
pub use macd::MacdValue;
pub use psar::PsarValue;
pub use stochastic::StochValue;
pub use supertrend::{SuperTrendValue, TrendDirection};

/// Snapshot of every indicator the engine computes on one candle array.
///
/// Each entry is `None` whenever its minimum-history requirement is unmet.
/// The `_prev` fields carry the value one candle earlier where the vote rules
/// need cross detection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorValues {
    // Moving averages
    pub ema5: Option<f64>,
    pub ema9: Option<f64>,
    pub ema12: Option<f64>,
    pub ema21: Option<f64>,
    pub ema50: Option<f64>,
    pub ema9_prev: Option<f64>,
    pub ema21_prev: Option<f64>,
    pub sma20: Option<f64>,
    pub sma50: Option<f64>,
    pub sma200: Option<f64>,
    pub hull9: Option<f64>,
    pub ema_ribbon: Option<f64>,

    // Momentum
    pub macd: Option<MacdValue>,
    pub macd_prev: Option<MacdValue>,
    pub rsi: Option<f64>,
    pub rsi_prev: Option<f64>,
    pub stochastic: Option<StochValue>,
    pub stochastic_prev: Option<StochValue>,
    pub roc: Option<f64>,
    pub momentum: Option<f64>,
    pub ultimate: Option<f64>,
    pub cci: Option<f64>,
    pub williams_r: Option<f64>,

    // Volatility / bands
    pub atr: Option<f64>,
    pub bollinger: Option<BandSet>,
    pub keltner: Option<BandSet>,
    pub atr_bands: Option<AtrBands>,

    // Trend
    pub adx: Option<f64>,
    pub supertrend: Option<SuperTrendValue>,
    pub psar: Option<PsarValue>,
    pub linreg_slope: Option<f64>,

    // Channels / statistics
    pub donchian: Option<DonchianChannel>,
    pub range_percentile: Option<f64>,
    pub zscore: Option<f64>,
    pub fisher: Option<f64>,
    pub fisher_prev: Option<f64>,

    // Volume proxy
    pub obv: Option<f64>,
    pub obv_prev: Option<f64>,
}

/// Last and previous value of a series.
fn tail2(series: &[f64]) -> (Option<f64>, Option<f64>) {
    let n = series.len();
    let last = (n >= 1).then(|| series[n - 1]);
    let prev = (n >= 2).then(|| series[n - 2]);
    (last, prev)
}

/// Compute every indicator on the given candles (oldest first, optionally
/// including the forming candle as the tail).
pub fn compute_all(candles: &[Candle]) -> IndicatorValues {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let mut values = IndicatorValues::default();

    // Moving averages.
    values.ema5 = ema::calculate_ema(&closes, 5).last().copied();
    let ema9_series = ema::calculate_ema(&closes, 9);
    let ema21_series = ema::calculate_ema(&closes, 21);
    let (ema9, ema9_prev) = tail2(&ema9_series);
    let (ema21, ema21_prev) = tail2(&ema21_series);
    values.ema9 = ema9;
    values.ema9_prev = ema9_prev;
    values.ema12 = ema::calculate_ema(&closes, 12).last().copied();
    values.ema21 = ema21;
    values.ema21_prev = ema21_prev;
    values.ema50 = ema::calculate_ema(&closes, 50).last().copied();
    values.sma20 = ema::calculate_sma(&closes, 20).last().copied();
    values.sma50 = ema::calculate_sma(&closes, 50).last().copied();
    values.sma200 = ema::calculate_sma(&closes, 200).last().copied();
    values.hull9 = ema::hull_ma(&closes, 9);
    values.ema_ribbon = ema::ema_ribbon(&closes);

    // Momentum.
    if let Some((last, prev)) = macd::macd_with_previous(&closes) {
        values.macd = Some(last);
        values.macd_prev = Some(prev);
    } else {
        values.macd = macd::current_macd(&closes);
    }
    let rsi_values = rsi::rsi_series(candles, 14);
    let (rsi_last, rsi_prev) = tail2(&rsi_values);
    values.rsi = rsi_last;
    values.rsi_prev = rsi_prev;
    if let Some((last, prev)) = stochastic::stochastic_with_previous(candles, 14, 3) {
        values.stochastic = Some(last);
        values.stochastic_prev = Some(prev);
    }
    values.roc = oscillators::calculate_roc(&closes, 12);
    values.momentum = oscillators::calculate_momentum(&closes, 10);
    values.ultimate = oscillators::calculate_ultimate(candles, 7, 14, 28);
    values.cci = oscillators::calculate_cci(candles, 20);
    values.williams_r = oscillators::calculate_williams_r(candles, 14);

    // Volatility / bands.
    values.atr = atr::calculate_atr(candles, 14);
    values.bollinger = bollinger::calculate_bollinger(&closes, 20, 2.0);
    values.keltner = bollinger::calculate_keltner(candles, 20, 2.0);
    values.atr_bands = atr::atr_bands(candles, 20);

    // Trend.
    values.adx = adx::calculate_adx(candles, 14);
    values.supertrend = supertrend::calculate_supertrend(candles, 10, 3.0);
    values.psar = psar::calculate_psar(candles, 0.02, 0.2);
    values.linreg_slope = regression::linreg_slope(&closes, 14);

    // Channels / statistics.
    values.donchian = channels::calculate_donchian(candles, 20);
    values.range_percentile = channels::range_percentile(candles, 20);
    values.zscore = regression::zscore(&closes, 20);
    if let Some((last, prev)) = fisher::fisher_with_previous(candles) {
        values.fisher = Some(last);
        values.fisher_prev = Some(prev);
    }

    // Volume proxy.
    if let Some((last, prev)) = obv::obv_with_previous(candles) {
        values.obv = Some(last);
        values.obv_prev = Some(prev);
    }

    values
}
