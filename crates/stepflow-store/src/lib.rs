//! # Stepflow Store
//!
//! Durable-store boundary for the Stepflow orchestration engine.
//!
//! ## Components
//!
//! - [`RunRecord`] / [`SessionStore`] - run state persistence by run ID
//! - [`Approval`] / [`ApprovalStore`] - durable approval records with a
//!   compare-and-swap update contract safe for concurrent resolvers
//!
//! Backend drivers (SQL/NoSQL) are out of scope; this crate ships the
//! traits plus in-memory and file-backed reference implementations.

pub mod approval;
pub mod approval_store;
pub mod error;
pub mod session;
pub mod session_store;

pub use approval::{
    Approval, ApprovalPayload, ApprovalStatus, ApprovalType, PauseType, SourceType,
};
pub use approval_store::{
    ApprovalFilter, ApprovalStore, ApprovalUpdate, MemoryApprovalStore,
};
pub use error::StoreError;
pub use session::RunRecord;
pub use session_store::{FileSessionStore, MemorySessionStore, SessionStore};
