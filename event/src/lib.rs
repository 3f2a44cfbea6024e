//! # Subscriptions bound to both parties
//!
//! Entities ([`EventHandler`]) emit named events and subscribe to each
//! other's through a shared [`ListenerBank`]. Every stored [`Listener`] is
//! indexed under its emittor and, if it has one, its subscriber, so that
//! destroying either party removes it.
//!
//! Besides plain subscriptions, every entity carries named checkpoints
//! ([`EventHandler::when`]), timeouts cancelled on destruction
//! ([`EventHandler::set_timeout`]) and bindings to external event sources
//! ([`external`]).

mod bank;
mod checkpoint;
mod config;
mod entity;
mod error;
mod intern;
mod listener;
mod report;
mod timeout;
mod traits;

/// Boundary to event sources outside the registry
pub mod external;

use std::borrow::Cow;

/// Name an event is dispatched under.
pub type EventName = Cow<'static, str>;

slotmap::new_key_type! {
    /// Identity of an entity within a [`ListenerBank`].
    pub struct EntityKey;
    /// Identity of a stored [`Listener`].
    pub struct ListenerKey;
    /// Identity of a pending timeout.
    pub struct TimeoutKey;
    /// Identity of an external binding.
    pub struct BindingKey;
}

pub use crate::{
    bank::{ListenerBank, ListenerBankBuilder},
    checkpoint::{Checkpoints, When},
    config::BankConfig,
    entity::{Destroyed, EventHandler, Subscription, DESTROY},
    error::{BindingError, CheckpointError, HandlerError, HandlerFault},
    external::Bindings,
    intern::{Budget, Listener, ListenerBank as RawListenerBank},
    listener::{Handler, HandlerId},
    report::{FaultReporter, TracingReporter},
    timeout::Timeouts,
    traits::*,
};

pub mod prelude {
    pub use crate::{
        traits::{Event as _, HandlerOutput as _},
        EventHandler, Handler, ListenerBank,
    };
}
