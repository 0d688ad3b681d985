pub mod agent_id;
pub mod chain;
pub mod decimal;
pub mod sort;

pub use agent_id::{AgentId, AgentIdError};
pub use chain::{ChainSelection, MAINNET_CHAIN_ID, resolve_chains};
pub use decimal::{Decimal, DecimalError};
pub use sort::{Position, SortDirection, SortKey, SortValue, compare_ranked};
