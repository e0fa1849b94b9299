//! Engine — the finite-state execution core of the gantry agent.
//!
//! One job run is one pass of the [`driver::StateMachineDriver`] loop: look
//! up the [`action::Action`] bound to the current [`state::State`], invoke it
//! against the run's [`context::ExecutionContext`], feed the returned
//! [`state::Event`] through the [`transitions::TransitionTable`], repeat
//! until a terminal state. The engine coordinates:
//! - Lifecycle sequencing (resolve → setup → launch → monitor → cleanup)
//! - Failure routing (retryable vs fatal vs cancellation vs internal defect)
//! - Write-once run state accumulation and the final run report
//! - Cancellation and deadline observation at every blocking point
//!
//! Collaborators (resolution service, launcher, fetcher, ...) are trait
//! objects defined in [`services`]; implementations live elsewhere.

pub mod action;
pub mod actions;
pub mod bus;
pub mod cancel;
pub mod context;
pub mod driver;
pub mod services;
pub mod state;
pub mod transitions;
