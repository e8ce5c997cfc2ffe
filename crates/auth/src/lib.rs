//! `mc-auth`: login credential encoding.
//!
//! Two mutually exclusive ways to authenticate the control websocket:
//!
//! - **Login key**: an 80-byte server-issued key. [`make_login_token`]
//!   encrypts a small JSON claim set with the first 32 bytes and the
//!   result travels in the `auth=` query parameter.
//! - **Password**: [`make_password_auth_header`] base64-encodes the
//!   username, password and optional second factor for the `x-meshauth`
//!   header. Confidentiality comes from TLS alone.

pub mod token;

pub use token::{
    make_login_token, make_login_token_now, make_password_auth_header, open_login_token,
    validate_login_key, LoginClaims, LOGIN_KEY_HEX_LEN,
};
