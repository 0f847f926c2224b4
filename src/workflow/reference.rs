//! References from one resource to another
//!
//! A reference is either a fully qualified link, used verbatim, or the
//! logical name of a resource managed by the same workflow. The distinction
//! is made once, when the workflow document is parsed.

use crate::workflow::registry::ResourceKind;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::fmt;

const PROJECT: &str = r"[a-z]([-.:a-z0-9]*[a-z0-9])?";
const RFC1035: &str = r"[a-z]([-a-z0-9]*[a-z0-9])?";
const PREFIX: &str = r"^(https://www\.googleapis\.com/compute/v1/)?";

static IMAGE_URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"{PREFIX}(projects/{PROJECT}/)?global/images/(family/{RFC1035}|{RFC1035})$"
    ))
    .expect("Valid regex pattern")
});

static DISK_URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"{PREFIX}(projects/{PROJECT}/)?zones/{RFC1035}/disks/{RFC1035}$"
    ))
    .expect("Valid regex pattern")
});

static INSTANCE_URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"{PREFIX}(projects/{PROJECT}/)?zones/{RFC1035}/instances/{RFC1035}$"
    ))
    .expect("Valid regex pattern")
});

/// Whether `value` is a link to a resource of `kind`
pub fn is_resource_url(kind: ResourceKind, value: &str) -> bool {
    match kind {
        ResourceKind::Image => IMAGE_URL_REGEX.is_match(value),
        ResourceKind::Disk => DISK_URL_REGEX.is_match(value),
        ResourceKind::Instance => INSTANCE_URL_REGEX.is_match(value),
    }
}

/// A reference to a resource of a known kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceRef {
    /// Fully qualified link, passed to the backend unchanged
    Url(String),
    /// Logical name resolved through the workflow registry
    Logical(String),
}

impl ResourceRef {
    pub fn parse(kind: ResourceKind, value: impl Into<String>) -> Self {
        let value = value.into();
        if is_resource_url(kind, &value) {
            ResourceRef::Url(value)
        } else {
            ResourceRef::Logical(value)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ResourceRef::Url(value) | ResourceRef::Logical(value) => value,
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn optional_ref<'de, D>(kind: ResourceKind, deserializer: D) -> Result<Option<ResourceRef>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .filter(|value| !value.is_empty())
        .map(|value| ResourceRef::parse(kind, value)))
}

fn ref_list<'de, D>(kind: ResourceKind, deserializer: D) -> Result<Vec<ResourceRef>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<String>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|value| ResourceRef::parse(kind, value))
        .collect())
}

pub(crate) fn optional_image_ref<'de, D>(deserializer: D) -> Result<Option<ResourceRef>, D::Error>
where
    D: Deserializer<'de>,
{
    optional_ref(ResourceKind::Image, deserializer)
}

pub(crate) fn optional_disk_ref<'de, D>(deserializer: D) -> Result<Option<ResourceRef>, D::Error>
where
    D: Deserializer<'de>,
{
    optional_ref(ResourceKind::Disk, deserializer)
}

pub(crate) fn disk_refs<'de, D>(deserializer: D) -> Result<Vec<ResourceRef>, D::Error>
where
    D: Deserializer<'de>,
{
    ref_list(ResourceKind::Disk, deserializer)
}

pub(crate) fn image_refs<'de, D>(deserializer: D) -> Result<Vec<ResourceRef>, D::Error>
where
    D: Deserializer<'de>,
{
    ref_list(ResourceKind::Image, deserializer)
}

pub(crate) fn instance_refs<'de, D>(deserializer: D) -> Result<Vec<ResourceRef>, D::Error>
where
    D: Deserializer<'de>,
{
    ref_list(ResourceKind::Instance, deserializer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_urls() {
        for url in [
            "projects/x/global/images/family/debian",
            "projects/debian-cloud/global/images/debian-12-bookworm-v20240110",
            "global/images/my-image",
            "https://www.googleapis.com/compute/v1/projects/p/global/images/family/ubuntu-2204-lts",
        ] {
            assert!(is_resource_url(ResourceKind::Image, url), "{url}");
        }

        for logical in ["debian", "my-image", "projects/x/zones/z/disks/d", ""] {
            assert!(!is_resource_url(ResourceKind::Image, logical), "{logical}");
        }
    }

    #[test]
    fn test_disk_and_instance_urls() {
        assert!(is_resource_url(
            ResourceKind::Disk,
            "projects/my.domain:proj/zones/us-central1-a/disks/boot"
        ));
        assert!(is_resource_url(ResourceKind::Disk, "zones/us-central1-a/disks/boot"));
        assert!(!is_resource_url(ResourceKind::Disk, "boot"));
        assert!(!is_resource_url(
            ResourceKind::Disk,
            "projects/p/zones/us-central1-a/instances/vm"
        ));
        assert!(is_resource_url(
            ResourceKind::Instance,
            "projects/p/zones/us-central1-a/instances/vm"
        ));
    }

    #[test]
    fn test_parse_tags_reference() {
        assert_eq!(
            ResourceRef::parse(ResourceKind::Image, "projects/x/global/images/family/debian"),
            ResourceRef::Url("projects/x/global/images/family/debian".to_string())
        );
        assert_eq!(
            ResourceRef::parse(ResourceKind::Image, "golden"),
            ResourceRef::Logical("golden".to_string())
        );
    }

    #[test]
    fn test_deserialize_empty_reference_as_none() {
        #[derive(Deserialize)]
        struct Holder {
            #[serde(default, deserialize_with = "optional_image_ref")]
            image: Option<ResourceRef>,
            #[serde(default, deserialize_with = "disk_refs")]
            disks: Vec<ResourceRef>,
        }

        let holder: Holder =
            serde_yaml::from_str("image: \"\"\ndisks: [boot, zones/z-a/disks/data]").unwrap();
        assert_eq!(holder.image, None);
        assert_eq!(
            holder.disks,
            vec![
                ResourceRef::Logical("boot".to_string()),
                ResourceRef::Url("zones/z-a/disks/data".to_string()),
            ]
        );
    }
}
