//! Declarative workflow documents
//!
//! Documents are YAML (JSON is accepted as the YAML subset it is):
//!
//! ```yaml
//! name: build-image
//! zone: us-central1-a
//! steps:
//!   create-disks:
//!     create_disks:
//!       - name: boot
//!         source_image: projects/debian-cloud/global/images/family/debian-12
//!   create-image:
//!     create_images:
//!       - name: golden
//!         source_disk: boot
//! dependencies:
//!   create-image: [create-disks]
//! ```

use crate::error::{ValidationError, WorkflowError};
use crate::workflow::steps::{
    CreateDisks, CreateImages, CreateInstances, DeleteResources, StepAction,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowDocument {
    pub name: String,
    /// Overrides the configured default project
    #[serde(default)]
    pub project: Option<String>,
    /// Overrides the configured default zone
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub steps: BTreeMap<String, StepDocument>,
    /// Step name to the steps it waits for
    #[serde(default)]
    pub dependencies: BTreeMap<String, Vec<String>>,
}

/// A step entry; exactly one action must be set
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDocument {
    #[serde(default)]
    pub create_disks: Option<CreateDisks>,
    #[serde(default)]
    pub create_images: Option<CreateImages>,
    #[serde(default)]
    pub create_instances: Option<CreateInstances>,
    #[serde(default)]
    pub delete_resources: Option<DeleteResources>,
}

impl StepDocument {
    pub fn into_action(self, step: &str) -> Result<Box<dyn StepAction>, ValidationError> {
        let mut actions: Vec<Box<dyn StepAction>> = Vec::new();
        if let Some(action) = self.create_disks {
            actions.push(Box::new(action));
        }
        if let Some(action) = self.create_images {
            actions.push(Box::new(action));
        }
        if let Some(action) = self.create_instances {
            actions.push(Box::new(action));
        }
        if let Some(action) = self.delete_resources {
            actions.push(Box::new(action));
        }

        match actions.len() {
            1 => Ok(actions.remove(0)),
            found => Err(ValidationError::InvalidStep {
                step: step.to_string(),
                found,
            }),
        }
    }
}

impl WorkflowDocument {
    pub fn from_yaml(content: &str) -> Result<Self, WorkflowError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Read and parse a workflow file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse workflow file: {}", path.display()))
    }
}

/// Accept `size: 10` as well as `size: "10"`
pub(crate) fn optional_string_or_number<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        Text(String),
        Integer(i64),
        Float(f64),
    }

    Ok(
        Option::<StringOrNumber>::deserialize(deserializer)?.map(|value| match value {
            StringOrNumber::Text(text) => text,
            StringOrNumber::Integer(number) => number.to_string(),
            StringOrNumber::Float(number) => number.to_string(),
        }),
    )
}
