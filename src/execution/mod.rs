// =============================================================================
// Execution Module — broker access, order routing, position accounting
// =============================================================================

pub mod broker;
pub mod order_manager;
pub mod position_manager;
pub mod rate_limiter;
pub mod symbols;

pub use broker::{Broker, BybitClient, OrderAck, OrderRequest, OrderStatus, OrderType};
pub use order_manager::{OrderManager, PairEntryFill, PairExitFill};
pub use position_manager::{NewPosition, Position, PositionManager, Trade};
pub use rate_limiter::OrderRateLimiter;
pub use symbols::SymbolProfile;
