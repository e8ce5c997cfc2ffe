//! Evaluating a [`FilterExpression`] against device records.

use std::collections::{BTreeSet, HashMap};

use mc_protocol::{DeviceGroup, DeviceRecord};

use crate::parser::{FilterExpression, Predicate, WscCheck};

/// Group id → group name lookup used by `group:` predicates.
#[derive(Debug, Clone, Default)]
pub struct GroupDirectory {
    /// meshid → lower-cased name
    names: HashMap<String, String>,
}

impl GroupDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_groups(groups: &[DeviceGroup]) -> Self {
        let mut dir = Self::new();
        for group in groups {
            dir.insert(&group.id, &group.name);
        }
        dir
    }

    pub fn insert(&mut self, id: &str, name: &str) {
        self.names.insert(id.to_owned(), name.to_lowercase());
    }

    /// Lower-cased name of the group with `id`.
    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }
}

impl FilterExpression {
    /// Every device satisfying the expression, each once, in input order.
    pub fn evaluate<'a>(
        &self,
        devices: &'a [DeviceRecord],
        groups: &GroupDirectory,
    ) -> Vec<&'a DeviceRecord> {
        let mut selected = BTreeSet::new();

        for all_of in &self.any_of {
            let mut group_hits: Option<BTreeSet<usize>> = None;
            for predicate in all_of {
                let hits: BTreeSet<usize> = devices
                    .iter()
                    .enumerate()
                    .filter(|(_, device)| predicate.matches(device, groups))
                    .map(|(i, _)| i)
                    .collect();
                let narrowed = match group_hits {
                    None => hits,
                    Some(current) => current.intersection(&hits).copied().collect(),
                };
                let exhausted = narrowed.is_empty();
                group_hits = Some(narrowed);
                if exhausted {
                    break;
                }
            }
            selected.extend(group_hits.unwrap_or_default());
        }

        tracing::debug!(
            devices = devices.len(),
            matched = selected.len(),
            "device filter evaluated"
        );
        selected.into_iter().map(|i| &devices[i]).collect()
    }
}

impl Predicate {
    pub fn matches(&self, device: &DeviceRecord, groups: &GroupDirectory) -> bool {
        match self {
            Predicate::All => true,
            Predicate::User(needle) => device
                .users
                .iter()
                .any(|u| u.to_lowercase().contains(needle.as_str())),
            Predicate::Ip(needle) => contains_ci(device.ip.as_deref(), needle),
            Predicate::Group(needle) => groups
                .name_of(&device.meshid)
                .is_some_and(|name| name.contains(needle.as_str())),
            Predicate::Tag(needle) if needle.is_empty() => device.tags.is_empty(),
            Predicate::Tag(needle) => device
                .tags
                .iter()
                .any(|t| t.to_lowercase().contains(needle.as_str())),
            Predicate::AgentTag(needle) => {
                let tag = device
                    .agent
                    .as_ref()
                    .and_then(|a| a.tag.as_deref())
                    .filter(|t| !t.is_empty());
                if needle.is_empty() {
                    tag.is_none()
                } else {
                    contains_ci(tag, needle)
                }
            }
            Predicate::Os(needle) => contains_ci(device.osdesc.as_deref(), needle),
            Predicate::Amt(wanted) => {
                let state = device.intelamt.as_ref().and_then(|a| a.state);
                match wanted {
                    None => state.is_some(),
                    Some(s) => state == Some(*s),
                }
            }
            Predicate::Desc(needle) => {
                let desc = device.desc.as_deref().filter(|d| !d.is_empty());
                if needle.is_empty() {
                    desc.is_some()
                } else {
                    contains_ci(desc, needle)
                }
            }
            Predicate::Wsc(check) => device.wsc.as_ref().is_some_and(|wsc| match check {
                WscCheck::Ok => wsc.all_ok(),
                WscCheck::NoAntiVirus => !wsc.anti_virus_ok(),
                WscCheck::NoUpdate => !wsc.auto_update_ok(),
                WscCheck::NoFirewall => !wsc.firewall_ok(),
                WscCheck::Any => !wsc.all_ok(),
            }),
            Predicate::Name(re) => re.is_match(&device.name),
        }
    }
}

/// `needle` must already be lower-cased.
fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mc_protocol::{AgentInfo, IntelAmt};

    fn device(name: &str) -> DeviceRecord {
        DeviceRecord {
            id: format!("node//{name}"),
            name: name.into(),
            ..Default::default()
        }
    }

    #[test]
    fn group_lookup_uses_directory() {
        let mut dir = GroupDirectory::new();
        dir.insert("mesh//1", "Lab Machines");
        let mut d = device("a");
        d.meshid = "mesh//1".into();
        assert!(Predicate::Group("lab".into()).matches(&d, &dir));
        assert!(!Predicate::Group("lab".into()).matches(&d, &GroupDirectory::new()));
    }

    #[test]
    fn empty_tag_matches_untagged_only() {
        let mut tagged = device("a");
        tagged.tags = vec!["Prod".into()];
        let untagged = device("b");
        let dir = GroupDirectory::new();
        assert!(Predicate::Tag(String::new()).matches(&untagged, &dir));
        assert!(!Predicate::Tag(String::new()).matches(&tagged, &dir));
        assert!(Predicate::Tag("prod".into()).matches(&tagged, &dir));
    }

    #[test]
    fn empty_agent_tag_counts_as_absent() {
        let mut d = device("a");
        d.agent = Some(AgentInfo {
            tag: Some(String::new()),
            ..Default::default()
        });
        assert!(Predicate::AgentTag(String::new()).matches(&d, &GroupDirectory::new()));
    }

    #[test]
    fn amt_any_state() {
        let mut d = device("a");
        let dir = GroupDirectory::new();
        assert!(!Predicate::Amt(None).matches(&d, &dir));
        d.intelamt = Some(IntelAmt {
            state: Some(0),
            ..Default::default()
        });
        assert!(Predicate::Amt(None).matches(&d, &dir));
        assert!(Predicate::Amt(Some(0)).matches(&d, &dir));
        assert!(!Predicate::Amt(Some(2)).matches(&d, &dir));
    }

    #[test]
    fn wsc_requires_data() {
        let d = device("a");
        let dir = GroupDirectory::new();
        for check in [WscCheck::Ok, WscCheck::Any, WscCheck::NoAntiVirus] {
            assert!(!Predicate::Wsc(check).matches(&d, &dir));
        }
    }
}
