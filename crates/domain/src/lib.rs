//! `mc-domain`: types shared by every meshctl crate: the error enum,
//! credentials, configuration and structured trace events.

pub mod config;
pub mod credential;
pub mod error;
pub mod trace;

pub use credential::{Credential, Secret};
pub use error::{Error, Result};
