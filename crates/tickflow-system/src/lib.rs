//! Tickflow system contract.
//!
//! The plugin surface between simulation logic and the runtime: a
//! [`System`] implements domain behavior, registers a
//! [`SystemDefinition`] describing when and how it runs, receives an
//! [`ExecutionContext`] per invocation and returns an
//! [`ExecutionResult`] carrying a [`StateDelta`] plus events.
//!
//! # Modules
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`definition`] | [`SystemDefinition`], [`TickFrequency`] |
//! | [`traits`] | the [`System`] trait |
//! | [`context`] | [`ExecutionContext`] |
//! | [`result`] | [`ExecutionResult`] |
//! | [`state`] | [`StateSnapshot`], [`StateDelta`], [`StateStore`] |
//! | [`error`] | [`SystemError`] |
//! | [`testing`] | shared test doubles |

pub mod context;
pub mod definition;
pub mod error;
pub mod result;
pub mod state;
pub mod testing;
pub mod traits;

pub use context::ExecutionContext;
pub use definition::{SystemDefinition, TickFrequency};
pub use error::SystemError;
pub use result::ExecutionResult;
pub use state::{EntityContext, StateDelta, StateSnapshot, StateStore};
pub use traits::System;
