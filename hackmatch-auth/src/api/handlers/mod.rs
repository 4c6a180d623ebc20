//! HTTP request handlers.
//!
//! Each handler validates its input, runs one authentication flow against the credential store
//! and serializes the result. Errors are returned as [`crate::errors::Error`], which renders the
//! `{status, message}` JSON body and status code.
//!
//! - [`auth`]: Registration, login, logout, token refresh, password and email flows
//! - [`admin`]: Account activation by administrators
//! - [`health`]: Liveness and store connectivity

pub mod admin;
pub mod auth;
pub mod health;
