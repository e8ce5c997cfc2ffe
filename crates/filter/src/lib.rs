//! `mc-filter`: the device search language.
//!
//! ```text
//! expr      := and_expr (" or " and_expr)*
//! and_expr  := predicate (" and " predicate)*
//! predicate := prefix ":" value | bare-text
//! ```
//!
//! | prefix          | matches                                             |
//! |-----------------|-----------------------------------------------------|
//! | `user:` `u:`    | substring of a logged-in user                       |
//! | `ip:`           | substring of the device IP                          |
//! | `group:` `g:`   | substring of the owning device group's name         |
//! | `tag:` `t:`     | substring of a device tag; empty = untagged         |
//! | `atag:`         | substring of the agent tag; empty = no agent tag    |
//! | `os:`           | substring of the OS description                     |
//! | `amt:`          | Intel AMT state 0/1/2; empty = any AMT state        |
//! | `desc:`         | substring of the description; empty = has one      |
//! | `wsc:`          | `ok`, `noav`, `noupdate`, `nofirewall` or `any`     |
//! | (none)          | case-insensitive regex on the device name           |
//!
//! All comparisons are case-insensitive. Evaluation returns every device
//! satisfying the expression exactly once, in input order.
//!
//! ```rust,ignore
//! let expr = FilterExpression::parse("g:lab and t:prod or wsc:noav")?;
//! let groups = GroupDirectory::from_groups(&meshes);
//! for device in expr.evaluate(&devices, &groups) {
//!     println!("{}", device.name);
//! }
//! ```

pub mod eval;
pub mod parser;

pub use eval::GroupDirectory;
pub use parser::{FilterExpression, Predicate, WscCheck};

use mc_domain::error::Result;
use mc_protocol::DeviceRecord;

/// Parse `query` and evaluate it in one step.
pub fn search<'a>(
    query: &str,
    devices: &'a [DeviceRecord],
    groups: &GroupDirectory,
) -> Result<Vec<&'a DeviceRecord>> {
    Ok(FilterExpression::parse(query)?.evaluate(devices, groups))
}
