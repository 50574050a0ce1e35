//! Tickflow core types.
//!
//! This crate is the bottom layer of the Tickflow workspace: ID
//! types, priorities, execution tiers and the [`ErrorCode`] contract
//! shared by every other crate. It has no runtime dependencies
//! beyond serde and uuid, so it can be used by out-of-process
//! tooling (persistence, inspectors) without pulling in tokio.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │  tickflow-types  : ids, Priority, Tier, ErrorCode     │  ← this crate
//! ├───────────────────────────────────────────────────────┤
//! │  tickflow-system : System contract, state model       │
//! │  tickflow-event  : GameEvent, subscriptions           │
//! ├───────────────────────────────────────────────────────┤
//! │  tickflow-runtime: registry, breaker, controller,     │
//! │                    orchestrator, inference, bus       │
//! └───────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod id;
pub mod priority;
pub mod tier;

pub use error::{assert_error_code, assert_error_codes, ErrorCode};
pub use id::{EntityId, EventId, ExecutionId, SubscriptionId, SystemId, TaskId, TickId};
pub use priority::Priority;
pub use tier::{ExecutionGroup, Tier};
