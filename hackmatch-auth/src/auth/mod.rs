//! Authentication: credentials, tokens, lockout and revocation.
//!
//! # Tokens
//!
//! - **Access tokens** are HS256 JWTs carrying the user id (`sub`), a random `jti`, `iat` and
//!   `exp`. They travel in `Authorization: Bearer <token>` and live 15 minutes by default.
//! - **Refresh tokens** are opaque random strings exchanged for a new access token. Only their
//!   SHA-256 digest is stored, with a 30 day expiry.
//! - **Password reset** and **email verification** tokens are single-use, digest-stored and
//!   time-bounded (10 minutes and 24 hours by default).
//!
//! # Access token validity
//!
//! A bearer token is accepted by [`current_user::CurrentUser`] only if it verifies, has not
//! expired, names an active account, has not been revoked by logout, and was issued no earlier
//! than the account's last password change.
//!
//! # Modules
//!
//! - [`current_user`]: Extractors for the authenticated caller and for admins
//! - [`password`]: Argon2 hashing, the password policy and explicit password changes
//! - [`tokens`]: Access token signing/verification and refresh token issuance
//! - [`lockout`]: Failed-login counting and temporary lockout
//! - [`revocation`]: The access token blacklist
//! - [`account_tokens`]: Password reset and email verification tokens

pub mod account_tokens;
pub mod current_user;
pub mod lockout;
pub mod password;
pub mod revocation;
pub mod tokens;
