//! Tickflow event model.
//!
//! Events, subscriptions and dead letters shared between systems and
//! the runtime's event bus. This crate defines the data model and
//! the [`EventHandler`] contract; dispatch itself lives in
//! `tickflow-runtime`.
//!
//! # Modules
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`event`] | [`GameEvent`], [`EventType`] (with wildcard) |
//! | [`subscription`] | [`EventSubscription`], [`EventHandler`] |
//! | [`deadletter`] | [`DeadLetterEvent`] |
//! | [`error`] | [`EventError`] |

pub mod deadletter;
pub mod error;
pub mod event;
pub mod subscription;

pub use deadletter::DeadLetterEvent;
pub use error::EventError;
pub use event::{EventType, GameEvent};
pub use subscription::{EventFilter, EventHandler, EventSubscription};
