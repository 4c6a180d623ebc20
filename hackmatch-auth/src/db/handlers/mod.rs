//! Repository implementations for database access.
//!
//! Each repository wraps a SQLx connection or transaction, binds query parameters, and returns
//! domain models from [`crate::db::models`].
//!
//! # Available Repositories
//!
//! - [`Users`]: Accounts, security counters and one-time token columns
//! - [`BlacklistedTokens`]: Access tokens revoked by logout
//!
//! ```ignore
//! use hackmatch_auth::db::handlers::{Repository, Users};
//!
//! async fn example(pool: &sqlx::PgPool, id: uuid::Uuid) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut conn = pool.acquire().await?;
//!     let user = Users::new(&mut conn).get_by_id(id).await?;
//!     Ok(())
//! }
//! ```

pub mod blacklisted_tokens;
pub mod repository;
pub mod users;

pub use blacklisted_tokens::BlacklistedTokens;
pub use repository::Repository;
pub use users::{TokenColumn, Users};
