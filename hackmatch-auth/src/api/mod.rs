//! API layer for HTTP request handling and data models.
//!
//! - **[`extract`]**: `Json` and `Path` extractors that reject with the standard error body
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! - **Authentication** (`/api/v1/auth/*`): Registration, sessions, password and email flows
//! - **Admin** (`/api/v1/admin/*`): Account status
//! - **Health** (`/api/health`, `/healthz`)
//!
//! All endpoints are documented with `utoipa`; the rendered documentation is served at `/docs`.

pub mod extract;
pub mod handlers;
pub mod models;
