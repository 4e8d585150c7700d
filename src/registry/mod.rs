//! Client registries
//!
//! One registry instance exists per transport kind: named stream
//! sessions, named duplex control sessions, and the nameless duplex
//! video-subscriber set. Each registry hides its backing map behind
//! atomic register/unregister/lookup/iterate operations guarded by a
//! single mutex usable from both concurrency domains.
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!   worker thread │ ClientRegistry ("stream")    │  tokio task
//!   ─────────────►│ ClientRegistry ("control")   │◄─────────────
//!     register/   │ VideoSubscribers             │   register/
//!     route       └──────────────┬───────────────┘   broadcast
//!                                │
//!                        OutboundHandle::send
//!                      (channel into the session's
//!                       own writer thread / task)
//! ```
//!
//! Delivery into a session never touches its socket directly: every
//! session owns a writer (thread or task) draining a channel, and the
//! registry stores only the channel's sending half. A send from either
//! domain is therefore just a queue push, which is what keeps
//! cross-domain routing safe.

pub mod handle;
pub mod store;

pub use handle::{DeliveryError, OutboundHandle, SendOutcome, SessionId, SessionKind};
pub use store::{ClientRegistry, RegisteredClient, VideoSubscribers};
