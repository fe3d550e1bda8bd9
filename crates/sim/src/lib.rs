//! Simulated external backend and sample resource kinds.
//!
//! [`SimulatedBackend`] stands in for the external system: tests inject
//! behaviours per resource id and decide when asynchronous work completes.
//! [`SimulatedResourceManager`] adapts it to the engine's operation
//! contract, and [`kinds`] defines the sample kinds `A` and `B`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod backend;
pub mod kinds;
pub mod manager;

pub use backend::{BackendEvent, Behaviour, Operation, SimulatedBackend};
pub use kinds::{
    A_FINALIZER, A_KIND, ADefinition, ASpec, B_FINALIZER, B_KIND, BDefinition, BSpec,
};
pub use manager::SimulatedResourceManager;
