//! Database layer for data persistence and access.
//!
//! ```text
//! ┌──────────────────┐
//! │  API handlers    │
//! └────────┬─────────┘
//!          │  Arc<dyn CredentialStore>
//!          ↓
//! ┌──────────────────┐       ┌──────────────────────┐
//! │ PgCredentialStore│       │ MemoryCredentialStore│
//! └────────┬─────────┘       └──────────────────────┘
//!          ↓
//! ┌──────────────────┐
//! │ Repositories     │  (db::handlers - queries)
//! └────────┬─────────┘
//!          ↓
//! ┌──────────────────┐
//! │   PostgreSQL     │
//! └──────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`store`]: The [`store::CredentialStore`] trait and its implementations
//! - [`handlers`]: Repository implementations over a PostgreSQL connection
//! - [`models`]: Database record structures
//! - [`errors`]: Database-specific error types
//!
//! # Secret fields
//!
//! Reads take a [`models::users::Fields`] selector. The default returns no password hash and no
//! token digests; callers that verify a password or rotate a token ask for
//! [`models::users::Fields::WithSecrets`] explicitly.

pub mod errors;
pub mod handlers;
pub mod models;
pub mod store;
