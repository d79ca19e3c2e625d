//! Async boundary for the bot layer.
//!
//! Every call runs its core operation on tokio's blocking pool, one
//! independent worker per request. Nothing is shared between requests except
//! the engine's connection pool.

pub mod messages;
pub mod plates;
pub mod state;
pub mod users;

pub use state::CarblockService;
