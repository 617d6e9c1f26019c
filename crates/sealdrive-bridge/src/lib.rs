//! sealdrive-bridge: off-thread crypto and transfer service
//!
//! Wraps the vault, cipher, and upload machinery behind a tagged
//! call/reply protocol so the slow parts (Argon2id, chunk encryption,
//! multipart uploads) run on a dedicated worker thread. Each request
//! carries a call id; each gets exactly one reply; concurrent calls may
//! complete out of order. When the worker thread cannot be created the
//! handle degrades to direct in-process calls.

pub mod handle;
pub mod protocol;
pub mod worker;

pub use handle::{shared, BridgeHandle, PendingCall};
pub use protocol::{BridgeFault, BridgeOp, BridgeReply, BridgeRequest, BridgeResponse};
pub use worker::ServiceCore;
