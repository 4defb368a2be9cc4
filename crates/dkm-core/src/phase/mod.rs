//! Message-driven protocol between a remote role and its sites
//!
//! Each exchange is a `{state, input}` request to a site and an
//! `{output, state}` response back. The request's `phase` names what the
//! remote side just finished; the local side runs the matching handler:
//!
//! | inbound phase              | local step(s)                      | outbound phase             |
//! |----------------------------|------------------------------------|----------------------------|
//! | (none)                     | nothing                            | `local_noop`               |
//! | `remote_init_env`          | write config once, sample centroids | `local_init_centroids`    |
//! | `remote_init_centroids`    | assign points                      | `local_compute_clustering` |
//! | `remote_optimization_step` | update centroids, stopping check   | `local_compute_optimizer`  |
//! | `remote_converged_false`   | assign points                      | `local_compute_clustering` |
//! | `remote_aggregate_output`  | label against global centroids     | `local_aggregate_output`   |
//!
//! Neither role does I/O. [`handle_request`] is a pure function of the
//! request and a [`SiteContext`](crate::context::SiteContext);
//! [`RemoteRole`] is a state machine fed with batches of responses.

pub mod local;
pub mod message;
pub mod remote;

pub use local::{dispatch, handle_request};
pub use message::{
    InboundMessage, PhaseInput, PhaseOutput, PhaseRequest, PhaseResponse, RemotePhase,
};
pub use remote::{drive, RemoteOutcome, RemoteRole, RemoteStep, SiteSpec};
