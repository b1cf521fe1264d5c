//! Observability for the cache
//!
//! Logging goes through `tracing`. Every event carries a typed `event`
//! field from [`Event`] plus structured key/value context. The library
//! never installs a subscriber.
//!
//! ```ignore
//! tracing::info!(event = %Event::Serving, entries = 42, "Cache serving");
//! ```

mod events;

pub use events::Event;
