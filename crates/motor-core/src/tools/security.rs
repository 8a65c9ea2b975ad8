//! Security boundary around model-generated actions
//!
//! Three concerns live here because they all sit between the model and the
//! machine: path containment (with symlink resolution), the network domain
//! allow-list, and credential placeholder resolution plus value redaction.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use parking_lot::RwLock;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Minimum length for a credential value to enter the redaction set.
/// Shorter values would shred unrelated text when scrubbed.
const REDACTION_MIN_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("absolute paths are not allowed: {0}")]
    Absolute(String),
    #[error("path traversal (..) not allowed: {0}")]
    Traversal(String),
    #[error("path '{0}' resolves outside the workspace")]
    Escapes(String),
    #[error("path '{0}' is outside the writable roots")]
    ReadOnly(String),
    #[error("cannot resolve path '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Resolve `requested` against `workspace`, rejecting escapes.
///
/// The literal path is checked first (no absolutes, no `..` components), then
/// symlinks are resolved on the deepest existing ancestor so a link planted
/// inside the workspace cannot point the final path outside it.
pub fn resolve_safe_path(workspace: &Path, requested: &str) -> Result<PathBuf, PathError> {
    let rel = Path::new(requested);
    if rel.is_absolute() {
        return Err(PathError::Absolute(requested.to_string()));
    }
    for component in rel.components() {
        if matches!(component, Component::ParentDir) {
            return Err(PathError::Traversal(requested.to_string()));
        }
    }

    let workspace_real = workspace.canonicalize().map_err(|e| PathError::Io {
        path: workspace.display().to_string(),
        source: e,
    })?;
    let joined = workspace_real.join(rel);

    // Existing path: canonicalize resolves the final component and every
    // parent, which defeats symlink escapes as well as `..` ones.
    if joined.exists() {
        let real = joined.canonicalize().map_err(|e| PathError::Io {
            path: requested.to_string(),
            source: e,
        })?;
        if !real.starts_with(&workspace_real) {
            return Err(PathError::Escapes(requested.to_string()));
        }
        return Ok(real);
    }

    // Not created yet (write target): resolve the nearest existing ancestor
    // and re-append the remaining components.
    let mut base = joined.clone();
    let mut suffix: Vec<std::ffi::OsString> = Vec::new();
    while !base.exists() {
        match base.file_name() {
            Some(name) => suffix.push(name.to_owned()),
            None => break,
        }
        if !base.pop() {
            break;
        }
    }

    let real_base = if base.as_os_str().is_empty() || !base.exists() {
        workspace_real.clone()
    } else {
        base.canonicalize().map_err(|e| PathError::Io {
            path: requested.to_string(),
            source: e,
        })?
    };

    if !real_base.starts_with(&workspace_real) {
        return Err(PathError::Escapes(requested.to_string()));
    }

    let mut resolved = real_base;
    for component in suffix.into_iter().rev() {
        resolved.push(component);
    }
    Ok(resolved)
}

/// Like [`resolve_safe_path`], additionally requiring the target to fall
/// under one of `write_roots` (workspace-relative). An empty list means the
/// whole workspace is writable.
pub fn resolve_safe_write_path(
    workspace: &Path,
    write_roots: &[PathBuf],
    requested: &str,
) -> Result<PathBuf, PathError> {
    let resolved = resolve_safe_path(workspace, requested)?;
    if write_roots.is_empty() {
        return Ok(resolved);
    }

    let workspace_real = workspace.canonicalize().map_err(|e| PathError::Io {
        path: workspace.display().to_string(),
        source: e,
    })?;
    let allowed = write_roots
        .iter()
        .map(|root| workspace_real.join(root))
        .any(|root| resolved.starts_with(&root));
    if !allowed {
        return Err(PathError::ReadOnly(requested.to_string()));
    }
    Ok(resolved)
}

// ── Domain allow-list ──────────────────────────────────────────────────

/// Check whether `host` equals, or is a subdomain of, an allowed entry.
pub fn domain_allowed(allowed: &[String], host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    allowed.iter().any(|entry| {
        let entry = entry.to_ascii_lowercase();
        host == entry || host.ends_with(&format!(".{entry}"))
    })
}

/// The message returned for a blocked fetch. The prefix is a contract: the
/// loop watches for it to auto-trigger a pause, and tests assert on it.
pub fn blocked_domain_message(host: &str) -> String {
    format!(
        "BLOCKED: Domain {host} is not on this run's allow-list. Do not retry other URLs or \
         spellings of this domain. If access is required to finish the task, use the pause \
         mechanism (ask_user or request_approval) to request that {host} be granted."
    )
}

static BLOCKED_DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^BLOCKED: Domain ([A-Za-z0-9][A-Za-z0-9.-]*)").expect("valid regex")
});

/// Pull the attempted domain out of a blocked-fetch message.
pub fn extract_blocked_domain(output: &str) -> Option<String> {
    BLOCKED_DOMAIN_RE
        .captures(output)
        .map(|caps| caps[1].to_string())
}

// ── Credentials ────────────────────────────────────────────────────────

#[derive(Debug, Error)]
#[error("unresolved credential placeholder '{0}'")]
pub struct UnresolvedPlaceholder(pub String);

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    // <credential:NAME> | ${NAME} | ENV.NAME
    Regex::new(r"<credential:([A-Za-z0-9_]+)>|\$\{([A-Za-z0-9_]+)\}|\bENV\.([A-Za-z0-9_]+)\b")
        .expect("valid regex")
});

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid regex"));

/// Validate a credential name: alphanumeric/underscore only.
pub fn valid_credential_name(name: &str) -> bool {
    !name.is_empty() && NAME_RE.is_match(name)
}

/// Live credential map plus the redaction set derived from it.
///
/// One vault per run; values never appear in persisted messages, logs or
/// signals; every boundary calls [`CredentialVault::redact`].
#[derive(Default)]
pub struct CredentialVault {
    /// name -> value
    values: RwLock<HashMap<String, String>>,
}

impl CredentialVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(values: HashMap<String, String>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }

    pub fn insert(&self, name: &str, value: &str) {
        self.values
            .write()
            .insert(name.to_string(), value.to_string());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.read().contains_key(name)
    }

    /// Substitute every placeholder in `text`, erroring on the first name
    /// with no known value. A literal placeholder must never reach a tool.
    pub fn resolve_placeholders(&self, text: &str) -> Result<String, UnresolvedPlaceholder> {
        let values = self.values.read();
        let mut missing: Option<String> = None;
        let resolved = PLACEHOLDER_RE.replace_all(text, |caps: &regex::Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match values.get(name) {
                Some(value) => value.clone(),
                None => {
                    if missing.is_none() {
                        missing = Some(name.to_string());
                    }
                    String::new()
                }
            }
        });
        match missing {
            Some(name) => Err(UnresolvedPlaceholder(name)),
            None => Ok(resolved.into_owned()),
        }
    }

    /// Replace every occurrence of a stored value (>= 8 chars) with its
    /// placeholder form, so transcripts stay readable without leaking.
    pub fn redact(&self, text: &str) -> String {
        let values = self.values.read();
        let mut scrubbed = text.to_string();
        for (name, value) in values.iter() {
            if value.len() < REDACTION_MIN_LEN {
                continue;
            }
            if scrubbed.contains(value.as_str()) {
                scrubbed = scrubbed.replace(value.as_str(), &format!("<credential:{name}>"));
            }
        }
        scrubbed
    }
}

/// Argument fields that hold file content. Placeholders are never resolved
/// inside these, so a secret cannot be persisted to disk via write/patch.
pub fn is_content_field(tool: &str, field: &str) -> bool {
    matches!(
        (tool, field),
        ("write", "content") | ("patch", "old_text") | ("patch", "new_text")
    )
}

/// Resolve placeholders across a tool call's string arguments, skipping
/// content fields.
pub fn resolve_call_arguments(
    vault: &CredentialVault,
    tool: &str,
    arguments: &serde_json::Value,
) -> Result<serde_json::Value, UnresolvedPlaceholder> {
    let mut resolved = arguments.clone();
    if let Some(map) = resolved.as_object_mut() {
        for (field, value) in map.iter_mut() {
            if is_content_field(tool, field) {
                continue;
            }
            if let Some(text) = value.as_str() {
                *value = serde_json::Value::String(vault.resolve_placeholders(text)?);
            }
        }
    }
    Ok(resolved)
}
