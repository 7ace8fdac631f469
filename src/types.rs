// =============================================================================
// Shared types used across the Meridian pairs-trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// What a strategy (or the aggregator) wants to do with a spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpreadAction {
    /// Long leg A, short leg B.
    LongSpread,
    /// Short leg A, long leg B.
    ShortSpread,
    /// Unwind the open position for the pair.
    Close,
    /// No position change.
    Hold,
}

impl SpreadAction {
    /// `true` for the two position-opening actions.
    pub fn is_entry(self) -> bool {
        matches!(self, Self::LongSpread | Self::ShortSpread)
    }
}

impl Default for SpreadAction {
    fn default() -> Self {
        Self::Hold
    }
}

impl std::fmt::Display for SpreadAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LongSpread => write!(f, "LONG_SPREAD"),
            Self::ShortSpread => write!(f, "SHORT_SPREAD"),
            Self::Close => write!(f, "CLOSE"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// Direction of an open spread position (collapses the two entry actions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpreadDirection {
    Long,
    Short,
}

impl SpreadDirection {
    pub fn from_action(action: SpreadAction) -> Option<Self> {
        match action {
            SpreadAction::LongSpread => Some(Self::Long),
            SpreadAction::ShortSpread => Some(Self::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for SpreadDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG_SPREAD"),
            Self::Short => write!(f, "SHORT_SPREAD"),
        }
    }
}

/// Order side as the exchange understands it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The side that unwinds a fill on `self`.
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "Buy"),
            Self::Sell => write!(f, "Sell"),
        }
    }
}

/// Direction of a single leg of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn from_order_side(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => Self::Long,
            OrderSide::Sell => Self::Short,
        }
    }

    /// The order side that closes a leg held on `self`.
    pub fn exit_order_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Sell,
            Self::Short => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "Long"),
            Self::Short => write!(f, "Short"),
        }
    }
}

/// How strongly the strategies agree on an aggregated action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusLevel {
    /// Every strategy voted the same action.
    Strong,
    /// A majority agrees, or one strategy carries high weighted confidence.
    Moderate,
    Weak,
    /// Opposing entries with comparable strength. Forces `Hold`.
    Conflicting,
    /// No strategy produced an actionable vote.
    None,
}

impl std::fmt::Display for ConsensusLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strong => write!(f, "STRONG"),
            Self::Moderate => write!(f, "MODERATE"),
            Self::Weak => write!(f, "WEAK"),
            Self::Conflicting => write!(f, "CONFLICTING"),
            Self::None => write!(f, "NONE"),
        }
    }
}

/// One configured trading pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairConfig {
    pub symbol_a: String,
    pub symbol_b: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl PairConfig {
    pub fn new(symbol_a: impl Into<String>, symbol_b: impl Into<String>) -> Self {
        Self {
            symbol_a: symbol_a.into(),
            symbol_b: symbol_b.into(),
            enabled: true,
        }
    }

    /// Canonical identifier: `"<symbol_a>_<symbol_b>"`.
    pub fn pair_id(&self) -> String {
        format!("{}_{}", self.symbol_a, self.symbol_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_display_matches_wire_labels() {
        assert_eq!(SpreadAction::LongSpread.to_string(), "LONG_SPREAD");
        assert_eq!(SpreadAction::ShortSpread.to_string(), "SHORT_SPREAD");
        assert_eq!(SpreadAction::Close.to_string(), "CLOSE");
        assert_eq!(SpreadAction::Hold.to_string(), "HOLD");
    }

    #[test]
    fn entry_classification() {
        assert!(SpreadAction::LongSpread.is_entry());
        assert!(SpreadAction::ShortSpread.is_entry());
        assert!(!SpreadAction::Close.is_entry());
        assert!(!SpreadAction::Hold.is_entry());
    }

    #[test]
    fn direction_from_action() {
        assert_eq!(
            SpreadDirection::from_action(SpreadAction::LongSpread),
            Some(SpreadDirection::Long)
        );
        assert_eq!(
            SpreadDirection::from_action(SpreadAction::ShortSpread),
            Some(SpreadDirection::Short)
        );
        assert_eq!(SpreadDirection::from_action(SpreadAction::Close), None);
        assert_eq!(SpreadDirection::from_action(SpreadAction::Hold), None);
    }

    #[test]
    fn order_side_round_trips() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite().opposite(), OrderSide::Sell);
        assert_eq!(PositionSide::from_order_side(OrderSide::Buy), PositionSide::Long);
        assert_eq!(PositionSide::Long.exit_order_side(), OrderSide::Sell);
        assert_eq!(PositionSide::Short.exit_order_side(), OrderSide::Buy);
    }

    #[test]
    fn pair_id_format() {
        let pair = PairConfig::new("BTCUSDT", "ETHUSDT");
        assert_eq!(pair.pair_id(), "BTCUSDT_ETHUSDT");
        assert!(pair.enabled);
    }

    #[test]
    fn pair_config_enabled_defaults_true() {
        let pair: PairConfig =
            serde_json::from_str(r#"{"symbol_a":"BTCUSDT","symbol_b":"ETHUSDT"}"#).unwrap();
        assert!(pair.enabled);
    }
}
