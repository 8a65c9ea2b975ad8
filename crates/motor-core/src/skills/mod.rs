//! Skills: reusable task packages harvested from run workspaces
//!
//! A skill is a directory carrying a `SKILL.md` descriptor with YAML
//! frontmatter:
//!
//! ```yaml
//! ---
//! name: skill-name
//! description: Brief description for discovery
//! version: 1.0.0
//! allowed_domains:
//!   - api.example.com
//! ---
//! ```
//!
//! Installed skills carry a trust policy sidecar; new or content-changed
//! skills always land in `pending_review`.

mod baseline;
pub(crate) mod harvester;

pub use baseline::{capture_baseline, BaselineManifest};
pub use harvester::{HarvestReport, SkillHarvester};

use std::path::Path;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Descriptor file name recognized at a candidate tree's root.
pub const DESCRIPTOR_FILE: &str = "SKILL.md";

const MAX_NAME_LEN: usize = 64;

/// Parsed `SKILL.md` frontmatter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

/// Review state of an installed skill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustStatus {
    PendingReview,
    Reviewing,
    Reviewed,
    NeedsReapproval,
    Approved,
}

/// Installed-skill policy, stored as a sidecar next to the skill directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillPolicy {
    pub trust: TrustStatus,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    /// Hash over the skill's content files (descriptor excluded), so
    /// metadata-only edits do not disturb an existing approval.
    pub content_hash: String,
    pub updated_at: DateTime<Utc>,
}

/// Validate a declared skill name: lowercase alphanumeric segments joined by
/// single hyphens, bounded length.
pub fn valid_skill_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }
    name.split('-').all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    })
}

/// Parse a `SKILL.md` file's YAML frontmatter.
pub fn parse_descriptor(content: &str) -> Result<SkillDescriptor> {
    let rest = content
        .strip_prefix("---")
        .ok_or_else(|| anyhow!("descriptor has no frontmatter"))?;
    let end = rest
        .find("\n---")
        .ok_or_else(|| anyhow!("unterminated frontmatter"))?;
    let frontmatter = &rest[..end];

    let descriptor: SkillDescriptor =
        serde_yaml::from_str(frontmatter).map_err(|e| anyhow!("invalid frontmatter: {e}"))?;
    if !valid_skill_name(&descriptor.name) {
        bail!("invalid skill name: '{}'", descriptor.name);
    }
    Ok(descriptor)
}

/// Load and parse the descriptor at a candidate directory's root.
pub fn load_descriptor(dir: &Path) -> Result<SkillDescriptor> {
    let path = dir.join(DESCRIPTOR_FILE);
    if !path.is_file() {
        bail!("{DESCRIPTOR_FILE} not found in {}", dir.display());
    }
    let content = std::fs::read_to_string(&path)?;
    parse_descriptor(&content)
}
