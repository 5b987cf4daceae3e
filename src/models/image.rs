// Image models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const UNTAGGED: &str = "<none>:<none>";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: String,
    /// Empty means the image is untagged (`<none>:<none>`).
    #[serde(default)]
    pub repo_tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Derived from the Store's containers on read; ignored when diffing.
    #[serde(default)]
    pub container_count: usize,
}

impl ImageRecord {
    pub fn display_tags(&self) -> Vec<&str> {
        if self.repo_tags.is_empty() {
            vec![UNTAGGED]
        } else {
            self.repo_tags.iter().map(String::as_str).collect()
        }
    }

    /// Same image ignoring the derived container count.
    pub fn same_attributes(&self, other: &ImageRecord) -> bool {
        self.id == other.id
            && self.repo_tags == other.repo_tags
            && self.created_at == other.created_at
            && self.size_bytes == other.size_bytes
            && self.arch == other.arch
            && self.os == other.os
            && self.labels == other.labels
    }

    /// Whether a container's image reference or image id points at this image.
    pub fn is_used_by(&self, image_ref: &str, image_id: &str) -> bool {
        if !image_id.is_empty() && image_id == self.id {
            return true;
        }
        if self.repo_tags.iter().any(|t| t == image_ref) {
            return true;
        }
        // "nginx" is shorthand for "nginx:latest"
        !image_ref.contains(':')
            && !image_ref.contains('@')
            && self
                .repo_tags
                .iter()
                .any(|t| t.strip_suffix(":latest") == Some(image_ref))
    }
}
