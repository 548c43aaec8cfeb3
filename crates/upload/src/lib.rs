//! Upload session manager for the parcel upload service.
//!
//! This crate provides:
//! - Admission control: a global open-session cap and a per-session chunk cap
//! - Ordered digest folding over out-of-order chunk arrivals
//! - The session registry and the begin / chunk / complete state machine
//! - Reclamation of abandoned sessions

pub mod admission;
pub mod error;
mod registry;
pub mod session;
pub mod verifier;

pub use admission::{AdmissionController, ChunkGate, ChunkToken, GlobalSlot};
pub use error::{AdmissionScope, UploadError, UploadResult};
pub use session::{
    BeginResult, ChunkDescriptor, ChunkReceipt, CompletionOutcome, SessionObserver, SessionSnapshot,
    SweepReport, Uploader, spawn_sweeper,
};
pub use verifier::{Offer, OrderedDigest};
