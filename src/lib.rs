//! Event subscriptions tied to the lifetime of both parties.
//!
//! ```ignore
//! use tether::{prelude::*, Event};
//!
//! #[derive(Event)]
//! enum Door {
//!     #[event_key(opened)]
//!     Opened,
//!     #[event_key(knocked)]
//!     Knocked(u32),
//! }
//!
//! let bank = ListenerBank::new();
//! let door = EventHandler::<Door>::new(&bank);
//! door.on("knocked", &Handler::new(|e: &Door| println!("{:?}", e.unwrap_as_knocked())));
//! door.trigger(Door::Knocked(3));
//! ```

pub use tether_event as event;

#[cfg(feature = "tether_derive")]
#[allow(unused_imports)]
#[macro_use]
extern crate tether_derive;

#[cfg(feature = "tether_derive")]
pub use tether_derive::*;

pub mod prelude {
    pub use tether_event::prelude::*;
}
