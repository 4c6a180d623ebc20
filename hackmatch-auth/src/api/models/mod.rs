//! API request and response data models.
//!
//! - [`auth`]: Bodies of the authentication endpoints and their validation
//! - [`users`]: The public user representation and admin account updates

pub mod auth;
pub mod users;
