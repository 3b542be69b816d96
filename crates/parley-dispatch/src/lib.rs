//! Message dispatch for the Parley chat relay.
//!
//! Inbound transport messages flow through [`run_event_loop`] into the
//! [`SessionRouter`], which hands them one sender at a time to the
//! [`TurnDispatcher`]. The dispatcher normalizes each message, talks to the
//! AI backend, replies through the channel and commits the exchange to the
//! session store.

pub mod dispatcher;
pub mod events;
pub mod normalizer;
pub mod presence;
pub mod recovery;
pub mod router;

pub use dispatcher::{DispatcherConfig, ExchangeOutcome, TurnDispatcher};
pub use events::run_event_loop;
pub use normalizer::{MessageNormalizer, Normalization, NormalizedTurn, SkipReason};
pub use presence::PresenceSignaler;
pub use recovery::ErrorRecoveryHandler;
pub use router::SessionRouter;
