//! Decoding of `show -json` plan documents.

use crate::outputs::parse_json_payload;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A change action planned for a resource or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeAction {
    /// Nothing to do.
    NoOp,
    /// Resource will be created.
    Create,
    /// Data source will be read.
    Read,
    /// Resource will be updated in place.
    Update,
    /// Resource will be deleted.
    Delete,
    /// Anything the harness does not recognise.
    #[serde(other)]
    Unknown,
}

/// One planned resource change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChange {
    /// Full resource address, e.g. `aws_instance.bastion`.
    pub address: String,
    /// Resource type, e.g. `aws_instance`.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Resource name within its module.
    pub name: String,
    /// Planned actions. A replace shows up as `[delete, create]`.
    pub actions: Vec<ChangeAction>,
}

impl ResourceChange {
    /// Returns true if the change does nothing.
    #[must_use]
    pub fn is_no_op(&self) -> bool {
        self.actions.iter().all(|a| matches!(a, ChangeAction::NoOp | ChangeAction::Read))
    }
}

/// Decoded plan: the resource graph diff the engine would apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDiff {
    /// Planned resource changes in engine order.
    pub resource_changes: Vec<ResourceChange>,
    /// Planned output changes keyed by output name.
    pub output_changes: BTreeMap<String, Vec<ChangeAction>>,
}

#[derive(Deserialize)]
struct RawPlan {
    #[serde(default)]
    resource_changes: Vec<RawResourceChange>,
    #[serde(default)]
    output_changes: BTreeMap<String, RawChange>,
}

#[derive(Deserialize)]
struct RawResourceChange {
    address: String,
    #[serde(rename = "type", default)]
    resource_type: String,
    #[serde(default)]
    name: String,
    change: RawChange,
}

#[derive(Deserialize)]
struct RawChange {
    #[serde(default)]
    actions: Vec<ChangeAction>,
}

impl PlanDiff {
    /// Parses the output of `show -json <planfile>`.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the text holds no valid plan document.
    pub fn parse(text: &str) -> Result<Self, String> {
        let value = parse_json_payload(text)?;
        let raw: RawPlan = serde_json::from_value(value).map_err(|e| e.to_string())?;

        Ok(Self {
            resource_changes: raw
                .resource_changes
                .into_iter()
                .map(|rc| ResourceChange {
                    address: rc.address,
                    resource_type: rc.resource_type,
                    name: rc.name,
                    actions: rc.change.actions,
                })
                .collect(),
            output_changes: raw
                .output_changes
                .into_iter()
                .map(|(name, change)| (name, change.actions))
                .collect(),
        })
    }

    /// Returns true if the plan mentions the resource address.
    #[must_use]
    pub fn contains(&self, address: &str) -> bool {
        self.get(address).is_some()
    }

    /// Looks up a resource change by address.
    #[must_use]
    pub fn get(&self, address: &str) -> Option<&ResourceChange> {
        self.resource_changes.iter().find(|rc| rc.address == address)
    }

    /// Returns every change for a resource type.
    #[must_use]
    pub fn of_type(&self, resource_type: &str) -> Vec<&ResourceChange> {
        self.resource_changes
            .iter()
            .filter(|rc| rc.resource_type == resource_type)
            .collect()
    }

    /// Number of resources the plan would create.
    #[must_use]
    pub fn creates(&self) -> usize {
        self.count(ChangeAction::Create)
    }

    /// Number of resources the plan would delete.
    #[must_use]
    pub fn deletes(&self) -> usize {
        self.count(ChangeAction::Delete)
    }

    fn count(&self, action: ChangeAction) -> usize {
        self.resource_changes
            .iter()
            .filter(|rc| rc.actions.contains(&action))
            .count()
    }

    /// Returns true if applying the plan would change nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resource_changes.iter().all(ResourceChange::is_no_op)
    }

    /// All resource addresses in the plan.
    #[must_use]
    pub fn addresses(&self) -> Vec<&str> {
        self.resource_changes.iter().map(|rc| rc.address.as_str()).collect()
    }
}
