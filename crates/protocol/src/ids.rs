//! Fully-qualified identifier helpers.
//!
//! The server names every object `<kind>/<domain>/<name>`, e.g.
//! `user//admin` in the default domain or `mesh/lab/abc123` elsewhere.
//! All helpers are idempotent: an already-qualified id is returned as is.

use base64::Engine;

use crate::MESH_BASE64;

/// Hex length of a raw node identifier (48 bytes).
const NODE_HEX_LEN: usize = 96;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    User,
    Mesh,
    Node,
    UserGroup,
}

impl IdKind {
    pub fn prefix(self) -> &'static str {
        match self {
            IdKind::User => "user",
            IdKind::Mesh => "mesh",
            IdKind::Node => "node",
            IdKind::UserGroup => "ugrp",
        }
    }
}

/// Qualify `name` as a `kind` id in `domain`, unless it already is one.
pub fn qualify(kind: IdKind, domain: &str, name: &str) -> String {
    let prefix = kind.prefix();
    if name
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('/'))
    {
        return name.to_owned();
    }
    format!("{prefix}/{domain}/{name}")
}

pub fn user_id(domain: &str, name: &str) -> String {
    qualify(IdKind::User, domain, name)
}

pub fn mesh_id(domain: &str, name: &str) -> String {
    qualify(IdKind::Mesh, domain, name)
}

pub fn node_id(domain: &str, name: &str) -> String {
    qualify(IdKind::Node, domain, name)
}

pub fn user_group_id(domain: &str, name: &str) -> String {
    qualify(IdKind::UserGroup, domain, name)
}

/// Re-encode a hex node identifier in the server's base64 form
/// (`@`/`$` alphabet).
pub fn node_id_from_hex(hex_id: &str) -> Result<String, hex::FromHexError> {
    let raw = hex::decode(hex_id)?;
    Ok(MESH_BASE64.encode(raw))
}

/// Resolve a user-supplied node reference to a full node id.
///
/// Accepts an already-qualified id, a 96-character hex id (as shown by
/// some agent tooling) or a bare base64 id.
pub fn resolve_node_ref(domain: &str, reference: &str) -> String {
    if reference.len() == NODE_HEX_LEN && reference.chars().all(|c| c.is_ascii_hexdigit()) {
        if let Ok(encoded) = node_id_from_hex(reference) {
            return format!("node/{domain}/{encoded}");
        }
    }
    node_id(domain, reference)
}
