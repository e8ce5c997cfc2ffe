//! Typed wrappers over `call(action, fields)` for common server actions.
//!
//! Every function is generic over [`ActionCaller`], so the payload shapes
//! can be exercised without a live connection.

use async_trait::async_trait;
use mc_domain::{Error, Result};
use mc_filter::{FilterExpression, GroupDirectory};
use mc_protocol::ids::{mesh_id, resolve_node_ref, user_id};
use mc_protocol::{DeviceGroup, DeviceRecord, Reply};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::client::ActionClient;

/// Anything that can issue a named action and return the reply.
#[async_trait]
pub trait ActionCaller: Send + Sync {
    async fn call(&self, action: &str, fields: Map<String, Value>) -> Result<Reply>;

    /// Domain used to qualify bare user, mesh and node names.
    fn domain(&self) -> &str {
        ""
    }
}

#[async_trait]
impl ActionCaller for ActionClient {
    async fn call(&self, action: &str, fields: Map<String, Value>) -> Result<Reply> {
        ActionClient::call(self, action, fields).await
    }

    fn domain(&self) -> &str {
        ActionClient::domain(self)
    }
}

/// Fields for [`add_user`].
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    pub realname: Option<String>,
}

// ── Device groups ────────────────────────────────────────────────────

pub async fn list_device_groups<C: ActionCaller + ?Sized>(caller: &C) -> Result<Vec<DeviceGroup>> {
    let reply = caller.call("meshes", Map::new()).await?;
    take_field(reply, "meshes", "meshes")
}

/// Create a device group managed by the agent (`meshtype` 2).
pub async fn create_device_group<C: ActionCaller + ?Sized>(
    caller: &C,
    name: &str,
    desc: Option<&str>,
) -> Result<Reply> {
    let mut fields = object(json!({ "meshname": name, "meshtype": 2 }));
    if let Some(desc) = desc {
        fields.insert("desc".into(), desc.into());
    }
    let reply = caller.call("createmesh", fields).await?;
    expect_ok("createmesh", reply)
}

pub async fn remove_device_group<C: ActionCaller + ?Sized>(caller: &C, group: &str) -> Result<Reply> {
    let fields = object(json!({ "meshid": mesh_id(caller.domain(), group) }));
    let reply = caller.call("deletemesh", fields).await?;
    expect_ok("deletemesh", reply)
}

// ── Devices ──────────────────────────────────────────────────────────

/// Run `command` on one device. `node` may be a full id, a bare base64 id
/// or a 96-character hex id.
pub async fn run_command<C: ActionCaller + ?Sized>(
    caller: &C,
    node: &str,
    command: &str,
    run_as_user: u8,
) -> Result<Reply> {
    let fields = object(json!({
        "cmds": command,
        "nodeids": [resolve_node_ref(caller.domain(), node)],
        "runAsUser": run_as_user,
        "type": 1,
    }));
    let reply = caller.call("runcommands", fields).await?;
    expect_ok("runcommands", reply)
}

/// List devices, optionally narrowed by a filter expression.
///
/// The filter is parsed before anything is sent, so a bad expression fails
/// with [`Error::UnsupportedFilter`] without touching the network.
pub async fn list_devices<C: ActionCaller + ?Sized>(
    caller: &C,
    filter: Option<&str>,
) -> Result<Vec<DeviceRecord>> {
    let expr = FilterExpression::parse(filter.unwrap_or(""))?;

    let groups = list_device_groups(caller).await?;
    let reply = caller.call("nodes", Map::new()).await?;
    let by_group: Map<String, Value> = take_field(reply, "nodes", "nodes")?;

    let mut devices = Vec::new();
    for (group_id, nodes) in by_group {
        let records: Vec<DeviceRecord> = serde_json::from_value(nodes).map_err(|e| {
            Error::UnexpectedReply {
                action: "nodes".into(),
                message: format!("devices of {group_id}: {e}"),
            }
        })?;
        for mut record in records {
            if record.meshid.is_empty() {
                record.meshid = group_id.clone();
            }
            devices.push(record);
        }
    }

    let directory = GroupDirectory::from_groups(&groups);
    let matched = expr.evaluate(&devices, &directory);
    tracing::debug!(total = devices.len(), matched = matched.len(), "devices listed");
    Ok(matched.into_iter().cloned().collect())
}

// ── Users ────────────────────────────────────────────────────────────

pub async fn list_users<C: ActionCaller + ?Sized>(caller: &C) -> Result<Vec<Value>> {
    let reply = caller.call("users", Map::new()).await?;
    take_field(reply, "users", "users")
}

pub async fn add_user<C: ActionCaller + ?Sized>(caller: &C, user: &NewUser) -> Result<Reply> {
    let mut fields = object(json!({ "username": user.username, "pass": user.password }));
    if let Some(email) = &user.email {
        fields.insert("email".into(), email.as_str().into());
    }
    if let Some(realname) = &user.realname {
        fields.insert("realname".into(), realname.as_str().into());
    }
    let reply = caller.call("adduser", fields).await?;
    expect_ok("adduser", reply)
}

pub async fn remove_user<C: ActionCaller + ?Sized>(caller: &C, user: &str) -> Result<Reply> {
    let fields = object(json!({ "userid": user_id(caller.domain(), user) }));
    let reply = caller.call("deleteuser", fields).await?;
    expect_ok("deleteuser", reply)
}

/// User groups, flattened to a list. The server keys them by id.
pub async fn list_user_groups<C: ActionCaller + ?Sized>(caller: &C) -> Result<Vec<Value>> {
    let reply = caller.call("usergroups", Map::new()).await?;
    match reply.get("ugroups") {
        Some(Value::Object(groups)) => Ok(groups.values().cloned().collect()),
        Some(Value::Array(groups)) => Ok(groups.clone()),
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(_) => Err(unexpected("usergroups", "`ugroups` is neither a map nor a list")),
    }
}

// ── Server ───────────────────────────────────────────────────────────

pub async fn server_info<C: ActionCaller + ?Sized>(caller: &C) -> Result<Value> {
    let mut reply = caller.call("serverinfo", Map::new()).await?;
    reply
        .remove("serverinfo")
        .ok_or_else(|| unexpected("serverinfo", "missing `serverinfo`"))
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Fail with [`Error::Server`] when the reply reports a non-"ok" result.
/// Replies without a `result` field are accepted as-is.
pub fn expect_ok(action: &str, reply: Reply) -> Result<Reply> {
    match reply.get("result") {
        None | Some(Value::Null) => Ok(reply),
        Some(Value::String(result)) if result.eq_ignore_ascii_case("ok") => Ok(reply),
        Some(Value::String(result)) => Err(Error::Server {
            action: action.into(),
            message: result.clone(),
        }),
        Some(other) => Err(Error::Server {
            action: action.into(),
            message: other.to_string(),
        }),
    }
}

fn take_field<T: DeserializeOwned>(mut reply: Reply, action: &str, field: &str) -> Result<T> {
    let value = reply
        .remove(field)
        .ok_or_else(|| unexpected(action, &format!("missing `{field}`")))?;
    serde_json::from_value(value).map_err(|e| unexpected(action, &format!("`{field}`: {e}")))
}

fn unexpected(action: &str, message: &str) -> Error {
    Error::UnexpectedReply {
        action: action.into(),
        message: message.into(),
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
