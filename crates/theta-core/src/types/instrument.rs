//! Option-leg instrument description and strike-grid helpers.

use serde::{Deserialize, Serialize};

use super::enums::OptionType;

/// One option contract of the straddle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionLeg {
    /// Trading symbol used for quotes, orders, and the ledger.
    pub symbol: String,
    /// Exchange segment (e.g. `"NFO"`).
    #[serde(default)]
    pub exchange: Option<String>,
    /// Feed token, if the quote feed keys ticks by token.
    #[serde(default)]
    pub token: Option<String>,
    pub option_type: OptionType,
    #[serde(default)]
    pub strike: Option<f64>,
    /// Contracts per lot.
    pub lot_size: u32,
    /// Instrument class (e.g. `"OPTIDX"`), for margin calculators.
    #[serde(default)]
    pub instrument: Option<String>,
    /// Underlying name (e.g. `"NIFTY"`), for margin calculators.
    #[serde(default)]
    pub underlying: Option<String>,
    /// Expiry as the venue spells it (e.g. `"30-JAN-2025"`).
    #[serde(default)]
    pub expiry: Option<String>,
}

impl OptionLeg {
    /// Feed subscription key (`EXCHANGE|TOKEN`), if both parts are known.
    pub fn feed_key(&self) -> Option<String> {
        match (&self.exchange, &self.token) {
            (Some(e), Some(t)) => Some(format!("{e}|{t}")),
            _ => None,
        }
    }
}

/// Round `price` to the nearest multiple of `step`.
pub fn atm_strike(price: f64, step: f64) -> f64 {
    (price / step).round() * step
}

/// Call and put strikes for a straddle centred on `atm`, shifted out of the
/// money by `otm_points` and biased by `bias_points`.
pub fn straddle_strikes(atm: f64, otm_points: f64, bias_points: f64) -> (f64, f64) {
    (atm + otm_points + bias_points, atm - otm_points + bias_points)
}

/// Order quantity for `lots` lots of `lot_size` contracts.
pub fn sized_quantity(lots: u32, lot_size: u32) -> u64 {
    lots as u64 * lot_size as u64
}

/// Round a price to `decimals` places.
pub fn round_price(price: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (price * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atm_rounds_to_grid() {
        assert_eq!(atm_strike(22_137.4, 50.0), 22_150.0);
        assert_eq!(atm_strike(22_124.9, 50.0), 22_100.0);
        assert_eq!(atm_strike(48_049.0, 100.0), 48_000.0);
    }

    #[test]
    fn strikes_with_bias() {
        assert_eq!(straddle_strikes(22_150.0, 0.0, 0.0), (22_150.0, 22_150.0));
        assert_eq!(straddle_strikes(22_150.0, 100.0, 50.0), (22_300.0, 22_100.0));
    }

    #[test]
    fn rounding_removes_float_noise() {
        assert_eq!(round_price(100.0 * 1.05, 2), 105.0);
        assert!((round_price(118.0 * 1.1, 2) - 129.8).abs() < 1e-9);
        assert_eq!(sized_quantity(3, 75), 225);
    }

    #[test]
    fn feed_key_requires_both_parts() {
        let mut leg = OptionLeg {
            symbol: "NIFTY25JAN22150CE".into(),
            exchange: Some("NFO".into()),
            token: Some("43651".into()),
            option_type: OptionType::Call,
            strike: Some(22_150.0),
            lot_size: 75,
            instrument: None,
            underlying: None,
            expiry: None,
        };
        assert_eq!(leg.feed_key().as_deref(), Some("NFO|43651"));
        leg.token = None;
        assert!(leg.feed_key().is_none());
    }
}
