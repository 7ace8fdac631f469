// =============================================================================
// Symbol Profiles — per-symbol quantity precision, caps, and sanity floors
// =============================================================================
//
// Centralizes the numeric contracts both sizing and validation consult:
// quantity step (decimal places), minimum and maximum order quantity, and a
// minimum sane price used to reject obviously broken feed data before an
// order is built from it.
// =============================================================================

/// Per-symbol execution constraints for linear perpetuals.
#[derive(Debug, Clone, Copy)]
pub struct SymbolProfile {
    /// Decimal places the exchange accepts for order quantity.
    pub qty_decimals: u32,
    /// Smallest accepted order quantity.
    pub min_qty: f64,
    /// Hard cap; anything larger is a sizing bug, not an order.
    pub max_qty: f64,
    /// Prices below this are treated as feed corruption.
    pub min_sane_price: f64,
}

impl SymbolProfile {
    /// Look up the profile for a symbol (e.g. "BTCUSDT").
    pub fn for_symbol(symbol: &str) -> Self {
        let coin = symbol.trim_end_matches("USDT");
        match coin {
            "BTC" => Self {
                qty_decimals: 3,
                min_qty: 0.001,
                max_qty: 100.0,
                min_sane_price: 10_000.0,
            },
            "ETH" => Self {
                qty_decimals: 2,
                min_qty: 0.01,
                max_qty: 1_000.0,
                min_sane_price: 500.0,
            },
            "SOL" => Self {
                qty_decimals: 1,
                min_qty: 0.01,
                max_qty: 10_000.0,
                min_sane_price: 10.0,
            },
            "AVAX" => Self {
                qty_decimals: 1,
                min_qty: 0.01,
                max_qty: 10_000.0,
                min_sane_price: 0.0,
            },
            "LTC" => Self {
                qty_decimals: 2,
                min_qty: 0.01,
                max_qty: 10_000.0,
                min_sane_price: 0.0,
            },
            "BCH" => Self {
                qty_decimals: 2,
                min_qty: 0.01,
                max_qty: 1_000.0,
                min_sane_price: 0.0,
            },
            "XRP" | "DOGE" | "ADA" => Self {
                qty_decimals: 0,
                min_qty: 0.01,
                max_qty: 50_000_000.0,
                min_sane_price: 0.0,
            },
            _ => Self {
                qty_decimals: 2,
                min_qty: 0.01,
                max_qty: 100_000.0,
                min_sane_price: 0.0,
            },
        }
    }

    /// Round a raw quantity to this symbol's step.
    pub fn round_qty(&self, qty: f64) -> f64 {
        let factor = 10f64.powi(self.qty_decimals as i32);
        (qty * factor).round() / factor
    }

    /// `true` when a rounded quantity is inside [min_qty, max_qty].
    pub fn qty_in_bounds(&self, qty: f64) -> bool {
        qty >= self.min_qty && qty <= self.max_qty
    }

    /// `true` when the price is positive and not absurd for this symbol.
    pub fn price_is_sane(&self, price: f64) -> bool {
        price > 0.0 && price >= self.min_sane_price && price.is_finite()
    }
}
