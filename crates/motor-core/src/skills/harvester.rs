//! Skill harvesting: lift reusable packages out of a finished workspace
//!
//! Runs once per successful run. A candidate is the workspace root (or a
//! first-level directory) carrying a `SKILL.md`. Installation is atomic:
//! copy to a temporary sibling, validate the copy, swap into place. Any
//! validation failure leaves the previously installed version untouched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _, Result};
use chrono::Utc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::baseline::{capture_baseline, hash_bytes, BaselineManifest};
use super::{load_descriptor, SkillDescriptor, SkillPolicy, TrustStatus, DESCRIPTOR_FILE};
use crate::tools::governor::SPILL_DIR;

const DEFAULT_MAX_FILE_BYTES: u64 = 1024 * 1024;
const DEFAULT_MAX_TOTAL_BYTES: u64 = 10 * 1024 * 1024;

/// What a harvest pass did.
#[derive(Debug, Clone, Default)]
pub struct HarvestReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
}

impl HarvestReport {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty()
    }
}

pub struct SkillHarvester {
    install_root: PathBuf,
    max_file_bytes: u64,
    max_total_bytes: u64,
}

impl SkillHarvester {
    pub fn new(install_root: PathBuf) -> Self {
        Self {
            install_root,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
        }
    }

    /// Extract every valid skill candidate from `workspace`.
    pub fn harvest(
        &self,
        workspace: &Path,
        baseline: Option<&BaselineManifest>,
    ) -> Result<HarvestReport> {
        let mut report = HarvestReport::default();

        for (dir, prefix) in candidates(workspace) {
            match self.harvest_one(&dir, &prefix, baseline) {
                Ok(Some(Outcome::Created(name))) => report.created.push(name),
                Ok(Some(Outcome::Updated(name))) => report.updated.push(name),
                Ok(None) => {}
                Err(e) => {
                    warn!(candidate = %dir.display(), "skill rejected: {e:#}");
                }
            }
        }

        Ok(report)
    }

    fn harvest_one(
        &self,
        dir: &Path,
        baseline_prefix: &str,
        baseline: Option<&BaselineManifest>,
    ) -> Result<Option<Outcome>> {
        let descriptor = load_descriptor(dir)?;
        self.validate_tree(dir, &descriptor)?;

        // A subdirectory candidate must be named after the skill it declares.
        if !baseline_prefix.is_empty() {
            let dir_name = dir.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if dir_name != descriptor.name {
                bail!(
                    "declared name '{}' does not match directory '{}'",
                    descriptor.name,
                    dir_name
                );
            }
        }

        let manifest = capture_baseline(dir)?;

        // Nothing the run actually changed (no edits, no additions, no
        // deletions): extraction is a no-op.
        if let Some(baseline) = baseline {
            let matched = manifest.files.iter().all(|(rel, hash)| {
                baseline.files.get(&format!("{baseline_prefix}{rel}")) == Some(hash)
            });
            let baseline_count = baseline
                .files
                .keys()
                .filter(|key| key.starts_with(baseline_prefix))
                .count();
            if matched
                && baseline_count == manifest.files.len()
                && self.policy_path(&descriptor.name).exists()
            {
                debug!(skill = %descriptor.name, "workspace unchanged since baseline");
                return Ok(None);
            }
        }

        let content_hash = content_hash(&manifest);
        let existing = self.load_policy(&descriptor.name)?;

        // Byte-identical with the installed tree and the same declared
        // policy fields: no write, no trust-status churn.
        if let Some(ref policy) = existing {
            let installed = self.installed_dir(&descriptor.name);
            if installed.is_dir()
                && capture_baseline(&installed)? == manifest
                && policy.allowed_domains == descriptor.allowed_domains
            {
                debug!(skill = %descriptor.name, "installed copy is already identical");
                return Ok(None);
            }
        }

        self.install_atomically(dir, &descriptor)?;

        let (trust, outcome) = match existing {
            None => (
                TrustStatus::PendingReview,
                Outcome::Created(descriptor.name.clone()),
            ),
            Some(ref policy) if policy.content_hash != content_hash => {
                // Content changed: whatever the previous review said no
                // longer applies.
                (
                    TrustStatus::PendingReview,
                    Outcome::Updated(descriptor.name.clone()),
                )
            }
            Some(ref policy) => {
                // Metadata-only change keeps the prior approval.
                (policy.trust, Outcome::Updated(descriptor.name.clone()))
            }
        };

        let policy = SkillPolicy {
            trust,
            allowed_domains: descriptor.allowed_domains.clone(),
            content_hash,
            updated_at: Utc::now(),
        };
        self.save_policy(&descriptor.name, &policy)?;
        info!(skill = %descriptor.name, trust = ?policy.trust, "skill installed");

        Ok(Some(outcome))
    }

    fn validate_tree(&self, dir: &Path, descriptor: &SkillDescriptor) -> Result<()> {
        let mut total: u64 = 0;
        for entry in WalkDir::new(dir).into_iter() {
            let entry = entry?;
            if entry.path_is_symlink() {
                bail!("symlink in skill tree: {}", entry.path().display());
            }
            if !entry.file_type().is_file() {
                continue;
            }
            let len = entry.metadata()?.len();
            if len > self.max_file_bytes {
                bail!(
                    "file too large ({len} bytes): {}",
                    entry.path().display()
                );
            }
            total += len;
            if total > self.max_total_bytes {
                bail!("skill '{}' exceeds the total size ceiling", descriptor.name);
            }
        }
        Ok(())
    }

    fn install_atomically(&self, dir: &Path, descriptor: &SkillDescriptor) -> Result<()> {
        std::fs::create_dir_all(&self.install_root)?;

        let staging = self
            .install_root
            .join(format!(".tmp-{}-{}", descriptor.name, uuid::Uuid::new_v4()));
        let result = (|| -> Result<()> {
            copy_tree(dir, &staging)?;
            // Validate the copy, not just the source: a mid-copy mutation of
            // the workspace must not install a half-consistent tree.
            let copied = load_descriptor(&staging)?;
            if copied.name != descriptor.name {
                bail!("descriptor changed during copy");
            }
            self.validate_tree(&staging, descriptor)?;

            let target = self.install_root.join(&descriptor.name);
            let retired = self
                .install_root
                .join(format!(".old-{}-{}", descriptor.name, uuid::Uuid::new_v4()));
            if target.exists() {
                std::fs::rename(&target, &retired)?;
            }
            std::fs::rename(&staging, &target)?;
            if retired.exists() {
                let _ = std::fs::remove_dir_all(&retired);
            }
            Ok(())
        })();

        if result.is_err() && staging.exists() {
            let _ = std::fs::remove_dir_all(&staging);
        }
        result
    }

    fn policy_path(&self, name: &str) -> PathBuf {
        self.install_root.join(format!("{name}.policy.json"))
    }

    pub fn load_policy(&self, name: &str) -> Result<Option<SkillPolicy>> {
        let path = self.policy_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("reading policy for '{name}'"))?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn save_policy(&self, name: &str, policy: &SkillPolicy) -> Result<()> {
        let json = serde_json::to_string_pretty(policy)?;
        std::fs::write(self.policy_path(name), json)?;
        Ok(())
    }

    /// The installed location for a skill, for workspace seeding.
    pub fn installed_dir(&self, name: &str) -> PathBuf {
        self.install_root.join(name)
    }
}

enum Outcome {
    Created(String),
    Updated(String),
}

/// Hash over the sorted content files, descriptor excluded, so metadata-only
/// edits keep the hash stable.
fn content_hash(manifest: &BaselineManifest) -> String {
    let filtered: BTreeMap<&String, &String> = manifest
        .files
        .iter()
        .filter(|(rel, _)| rel.as_str() != DESCRIPTOR_FILE)
        .collect();
    let mut joined = String::new();
    for (rel, hash) in filtered {
        joined.push_str(rel);
        joined.push('\0');
        joined.push_str(hash);
        joined.push('\n');
    }
    hash_bytes(joined.as_bytes())
}

fn candidates(workspace: &Path) -> Vec<(PathBuf, String)> {
    let mut found = Vec::new();
    if workspace.join(DESCRIPTOR_FILE).is_file() {
        found.push((workspace.to_path_buf(), String::new()));
        return found;
    }
    let Ok(entries) = std::fs::read_dir(workspace) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name == SPILL_DIR {
            continue;
        }
        if path.is_dir() && path.join(DESCRIPTOR_FILE).is_file() {
            found.push((path, format!("{name}/")));
        }
    }
    found
}

pub(crate) fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from).into_iter().filter_map(Result::ok) {
        let rel = entry.path().strip_prefix(from)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        if rel.starts_with(SPILL_DIR) {
            continue;
        }
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_skill(dir: &Path, name: &str, body: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(
            dir.join(DESCRIPTOR_FILE),
            format!("---\nname: {name}\ndescription: a skill\n---\n"),
        )
        .unwrap();
        std::fs::write(dir.join("run.sh"), body).unwrap();
    }

    #[test]
    fn installs_new_skill_as_pending_review() {
        let workspace = tempdir().unwrap();
        let install = tempdir().unwrap();
        write_skill(workspace.path(), "demo-skill", "echo hi");

        let harvester = SkillHarvester::new(install.path().to_path_buf());
        let report = harvester.harvest(workspace.path(), None).unwrap();

        assert_eq!(report.created, vec!["demo-skill"]);
        assert!(install.path().join("demo-skill").join("run.sh").exists());
        let policy = harvester.load_policy("demo-skill").unwrap().unwrap();
        assert_eq!(policy.trust, TrustStatus::PendingReview);
    }

    #[test]
    fn second_harvest_of_unchanged_workspace_is_a_noop() {
        let workspace = tempdir().unwrap();
        let install = tempdir().unwrap();
        write_skill(workspace.path(), "demo-skill", "echo hi");
        let baseline = capture_baseline(workspace.path()).unwrap();

        let harvester = SkillHarvester::new(install.path().to_path_buf());
        let first = harvester.harvest(workspace.path(), Some(&baseline)).unwrap();
        assert!(!first.is_empty());
        let stamped = harvester.load_policy("demo-skill").unwrap().unwrap();

        let second = harvester.harvest(workspace.path(), Some(&baseline)).unwrap();
        assert!(second.created.is_empty());
        assert!(second.updated.is_empty());
        let after = harvester.load_policy("demo-skill").unwrap().unwrap();
        assert_eq!(after.updated_at, stamped.updated_at);
    }

    #[test]
    fn content_change_resets_trust_metadata_change_keeps_it() {
        let workspace = tempdir().unwrap();
        let install = tempdir().unwrap();
        write_skill(workspace.path(), "demo-skill", "echo hi");

        let harvester = SkillHarvester::new(install.path().to_path_buf());
        harvester.harvest(workspace.path(), None).unwrap();

        // Simulate a completed review.
        let mut policy = harvester.load_policy("demo-skill").unwrap().unwrap();
        policy.trust = TrustStatus::Approved;
        harvester.save_policy("demo-skill", &policy).unwrap();

        // Metadata-only edit (descriptor): approval survives.
        std::fs::write(
            workspace.path().join(DESCRIPTOR_FILE),
            "---\nname: demo-skill\ndescription: reworded\n---\n",
        )
        .unwrap();
        let report = harvester.harvest(workspace.path(), None).unwrap();
        assert_eq!(report.updated, vec!["demo-skill"]);
        let policy = harvester.load_policy("demo-skill").unwrap().unwrap();
        assert_eq!(policy.trust, TrustStatus::Approved);

        // Content edit: back to pending review.
        std::fs::write(workspace.path().join("run.sh"), "echo changed").unwrap();
        let report = harvester.harvest(workspace.path(), None).unwrap();
        assert_eq!(report.updated, vec!["demo-skill"]);
        let policy = harvester.load_policy("demo-skill").unwrap().unwrap();
        assert_eq!(policy.trust, TrustStatus::PendingReview);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_reject_the_whole_candidate() {
        let workspace = tempdir().unwrap();
        let install = tempdir().unwrap();
        write_skill(workspace.path(), "demo-skill", "echo hi");
        std::os::unix::fs::symlink("/etc/passwd", workspace.path().join("link")).unwrap();

        let harvester = SkillHarvester::new(install.path().to_path_buf());
        let report = harvester.harvest(workspace.path(), None).unwrap();
        assert!(report.is_empty());
        assert!(!install.path().join("demo-skill").exists());
    }

    #[test]
    fn failed_validation_leaves_existing_install_untouched() {
        let workspace = tempdir().unwrap();
        let install = tempdir().unwrap();
        write_skill(workspace.path(), "demo-skill", "echo hi");

        let harvester = SkillHarvester::new(install.path().to_path_buf());
        harvester.harvest(workspace.path(), None).unwrap();

        // Break the workspace copy: oversized file.
        let mut big = SkillHarvester::new(install.path().to_path_buf());
        big.max_file_bytes = 4;
        std::fs::write(workspace.path().join("run.sh"), "a much longer body").unwrap();
        let report = big.harvest(workspace.path(), None).unwrap();

        assert!(report.is_empty());
        assert_eq!(
            std::fs::read_to_string(install.path().join("demo-skill/run.sh")).unwrap(),
            "echo hi"
        );
    }
}
