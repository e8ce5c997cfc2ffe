//! `meshctl` command-line front end: config loading, secret resolution
//! and one subcommand per server action.

pub mod cli;
