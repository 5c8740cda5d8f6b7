//! Enumerations used throughout the theta engine.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Order / trading enums
// ---------------------------------------------------------------------------

/// Buy or sell direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// Signed quantity for a fill of `quantity` in this direction
    /// (positive = long exposure, negative = short exposure).
    #[inline]
    pub fn signed(self, quantity: u64) -> i64 {
        let q = quantity as i64;
        match self {
            Self::Buy => q,
            Self::Sell => -q,
        }
    }

    /// Direction of the order that flattens a position of `signed_quantity`.
    pub fn closing(signed_quantity: i64) -> Self {
        if signed_quantity < 0 { Self::Buy } else { Self::Sell }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => f.write_str("BUY"),
            Self::Sell => f.write_str("SELL"),
        }
    }
}

/// Order kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    Market,
    StopMarket,
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Market => f.write_str("MARKET"),
            Self::StopMarket => f.write_str("STOP_MARKET"),
        }
    }
}

/// Order status. No partial fills are modeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Cancelled,
}

/// What a confirmed fill does to the ledger.
///
/// `Buy`/`Sell` open or add exposure; `Close` reduces the existing position
/// toward zero regardless of its side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FillSide {
    Buy,
    Sell,
    Close,
}

impl From<Direction> for FillSide {
    fn from(d: Direction) -> Self {
        match d {
            Direction::Buy => Self::Buy,
            Direction::Sell => Self::Sell,
        }
    }
}

impl std::fmt::Display for FillSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => f.write_str("BUY"),
            Self::Sell => f.write_str("SELL"),
            Self::Close => f.write_str("CLOSE"),
        }
    }
}

// ---------------------------------------------------------------------------
// Instrument enums
// ---------------------------------------------------------------------------

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    #[serde(rename = "CE", alias = "call")]
    Call,
    #[serde(rename = "PE", alias = "put")]
    Put,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_quantity_follows_direction() {
        assert_eq!(Direction::Buy.signed(75), 75);
        assert_eq!(Direction::Sell.signed(75), -75);
    }

    #[test]
    fn closing_direction() {
        assert_eq!(Direction::closing(-75), Direction::Buy);
        assert_eq!(Direction::closing(40), Direction::Sell);
    }

    #[test]
    fn serde_names() {
        assert_eq!(serde_json::to_string(&OrderKind::StopMarket).unwrap(), "\"STOP_MARKET\"");
        assert_eq!(serde_json::to_string(&FillSide::Close).unwrap(), "\"CLOSE\"");
        let t: OptionType = serde_json::from_str("\"PE\"").unwrap();
        assert_eq!(t, OptionType::Put);
    }
}
