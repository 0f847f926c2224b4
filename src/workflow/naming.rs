//! Physical resource naming
//!
//! Logical names are only unique inside one workflow. Before a resource is
//! created its name is extended with the workflow name and the run id so
//! that concurrent runs of the same workflow never collide on the backend.

use rand::distr::Alphanumeric;
use rand::Rng;

/// Backend limit on resource name length
const MAX_NAME_LEN: usize = 63;
/// Room left for `-<run id>` after the logical and workflow names
const MAX_PREFIX_LEN: usize = 56;
const RUN_ID_LEN: usize = 5;

/// Generate a short random identifier for one workflow run
pub fn generate_run_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(RUN_ID_LEN)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

/// Derives physical names for one workflow run
#[derive(Debug, Clone)]
pub struct NameGenerator {
    workflow_name: String,
    run_id: String,
}

impl NameGenerator {
    pub fn new(workflow_name: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// `<logical>-<workflow>-<run id>`, truncated and lowercased
    pub fn gen_name(&self, logical_name: &str) -> String {
        let prefix = format!("{}-{}", logical_name, self.workflow_name);
        let prefix = truncate(&prefix, MAX_PREFIX_LEN);
        let name = format!("{}-{}", prefix, self.run_id);
        truncate(&name, MAX_NAME_LEN).to_lowercase()
    }

    /// The physical name for a resource, honouring `exact_name`
    pub fn physical_name(&self, logical_name: &str, exact_name: bool) -> String {
        if exact_name {
            logical_name.to_string()
        } else {
            self.gen_name(logical_name)
        }
    }
}

fn truncate(value: &str, max_len: usize) -> &str {
    match value.char_indices().nth(max_len) {
        Some((index, _)) => &value[..index],
        None => value,
    }
}
