// =============================================================================
// Exit Management Module
// =============================================================================
//
// Protective exits that act independently of the resting stop-loss and
// take-profit orders.  Currently the profit-drawdown rule only.

pub mod drawdown;

pub use drawdown::ProfitDrawdownMonitor;
