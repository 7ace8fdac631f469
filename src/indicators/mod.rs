// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicators used by the
// strategies.  Insufficient data and numerical edge cases surface as neutral
// values or `Option::None`; nothing here panics.

pub mod atr;
pub mod bollinger;
pub mod rsi;
