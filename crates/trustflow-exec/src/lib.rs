#![forbid(unsafe_code)]
//! trustflow-exec: per-party execution of a partitioned plan.
//!
//! Each peer runs its jobs one at a time. After a job's backend finishes, the
//! peer tells every co-participant and waits until all of them reported back
//! (or one failed, the timeout hit, or the run was cancelled) before moving
//! on. There is no coordinator.

pub mod backend;
pub mod barrier;
pub mod binding;
pub mod error;
pub mod message;
pub mod peer;
pub mod runner;
pub mod transport;

pub use backend::{Backend, Invocation, NoopBackend, ProcessBackend};
pub use barrier::{Barrier, BarrierOutcome};
pub use binding::bind;
pub use error::{BackendError, DispatchError, ProtocolError, TransportError};
pub use message::{Completion, Phase, Status};
pub use peer::{Peer, PeerState};
pub use runner::{RunReport, Runner};
pub use transport::{mem, tcp::TcpTransport, Inbox, Transport};
