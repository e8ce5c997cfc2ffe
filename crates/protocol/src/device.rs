//! Device and device-group records as returned by the `nodes` and
//! `meshes` actions. Only the fields the client inspects are typed; the
//! rest are kept in `extra` so nothing is lost when records are printed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Windows Security Center status value meaning "healthy".
const WSC_OK: &str = "OK";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Identities currently logged in on the device.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osdesc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intelamt: Option<IntelAmt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wsc: Option<SecurityCenter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    /// Id of the owning device group.
    #[serde(default)]
    pub meshid: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntelAmt {
    /// Provisioning state: 0 not activated, 1 in provisioning, 2 activated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<u8>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityCenter {
    #[serde(rename = "antiVirus", default, skip_serializing_if = "Option::is_none")]
    pub anti_virus: Option<String>,
    #[serde(rename = "autoUpdate", default, skip_serializing_if = "Option::is_none")]
    pub auto_update: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firewall: Option<String>,
}

impl SecurityCenter {
    pub fn anti_virus_ok(&self) -> bool {
        status_ok(&self.anti_virus)
    }

    pub fn auto_update_ok(&self) -> bool {
        status_ok(&self.auto_update)
    }

    pub fn firewall_ok(&self) -> bool {
        status_ok(&self.firewall)
    }

    pub fn all_ok(&self) -> bool {
        self.anti_virus_ok() && self.auto_update_ok() && self.firewall_ok()
    }
}

fn status_ok(status: &Option<String>) -> bool {
    status.as_deref() == Some(WSC_OK)
}

/// A device group ("mesh").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceGroup {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
