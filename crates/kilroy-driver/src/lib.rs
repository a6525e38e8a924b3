//! `kilroy-driver`: async plumbing around [`HyperprotocolRunner`].
//!
//! ```text
//! SessionHandle ──commands──▶ session task ──▶ HyperprotocolRunner ──▶ ProtocolExecutor
//!      ▲                        │   ▲                                        │
//!      │                        │   └──── CompletionSender (step done) ──────┘
//!      └──── EventStream ◀── broadcast ◀┘
//! ```
//!
//! One task owns the runner. Start, stop, completion signals and the
//! elapsed-time tick are all serialized through its command channel, so no
//! transition ever observes another half-applied.
//!
//! [`HyperprotocolRunner`]: kilroy_core::runner::HyperprotocolRunner

pub mod session;
pub mod simulate;
pub mod stream;

pub use session::{spawn, CompletionSender, SessionHandle, SessionSettings};
pub use simulate::SimulatedExecutor;
pub use stream::EventStream;
