//! Role-based access control.
//!
//! [`RbacConfig`] is process-wide state loaded once at startup: role
//! definitions with permissions and inheritance, an alias table mapping
//! arbitrary input role names onto canonical ones, and the closed set of
//! recognized departments.
//!
//! [`RbacEngine`] is constructed **per request** from the authenticated
//! caller's role list. Its caches are request-scoped, so they need no
//! synchronization beyond `OnceLock`'s first-write.
//!
//! Every decision about which chunks a caller may see goes through
//! [`RbacEngine::is_allowed`]; the HTTP layer never string-matches roles.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

use crate::store::ChunkMetadata;

/// Errors raised while loading an RBAC configuration.
#[derive(Debug, Error)]
pub enum RbacError {
    /// The config file could not be read.
    #[error("failed to read rbac config at {path}: {source}")]
    ConfigRead {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid JSON for the expected shape.
    #[error("failed to parse rbac config: {source}")]
    ConfigParse {
        /// Underlying parse error.
        source: serde_json::Error,
    },

    /// A config with no departments can never authorize anything.
    #[error("rbac config declares no departments")]
    EmptyDepartments,
}

/// Permissions and inheritance for one canonical role.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoleDefinition {
    /// Permission strings: `*` or `<verb>:<object>`. Unknown permissions are
    /// carried but never matched, which makes them harmless.
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Canonical roles this role transitively includes.
    #[serde(default)]
    pub inherits: Vec<String>,
}

/// Process-wide RBAC configuration. Immutable after load.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RbacConfig {
    /// Canonical role name → definition.
    pub roles: BTreeMap<String, RoleDefinition>,
    /// Arbitrary input role name → canonical role name.
    #[serde(default)]
    pub role_aliases: BTreeMap<String, String>,
    /// Closed set of recognized departments.
    pub departments: BTreeSet<String>,
}

impl RbacConfig {
    /// The compiled default policy: five departments, an admin wildcard, a
    /// C-level umbrella, per-department reader roles inheriting the employee
    /// baseline, and aliases for the title-cased names ingestion tools emit.
    #[must_use]
    pub fn builtin() -> Self {
        fn def(permissions: &[&str], inherits: &[&str]) -> RoleDefinition {
            RoleDefinition {
                permissions: permissions.iter().map(|s| (*s).to_string()).collect(),
                inherits: inherits.iter().map(|s| (*s).to_string()).collect(),
            }
        }

        let mut roles = BTreeMap::new();
        roles.insert("admin".to_string(), def(&["*"], &[]));
        roles.insert(
            "c_level".to_string(),
            def(
                &[
                    "read:finance",
                    "read:marketing",
                    "read:hr",
                    "read:engineering",
                ],
                &["employee"],
            ),
        );
        roles.insert(
            "finance_analyst".to_string(),
            def(&["read:finance"], &["employee"]),
        );
        roles.insert(
            "marketing_manager".to_string(),
            def(&["read:marketing"], &["employee"]),
        );
        roles.insert("hr_manager".to_string(), def(&["read:hr"], &["employee"]));
        roles.insert(
            "engineer".to_string(),
            def(&["read:engineering"], &["employee"]),
        );
        roles.insert("employee".to_string(), def(&["read:general"], &[]));
        roles.insert("intern".to_string(), def(&["read:general"], &[]));

        let role_aliases = [
            ("Finance", "finance_analyst"),
            ("Marketing", "marketing_manager"),
            ("HR", "hr_manager"),
            ("Engineering", "engineer"),
            ("C-Level", "c_level"),
            ("Employee", "employee"),
            ("Intern", "intern"),
            ("Admin", "admin"),
        ]
        .into_iter()
        .map(|(alias, canonical)| (alias.to_string(), canonical.to_string()))
        .collect();

        let departments = ["finance", "marketing", "hr", "engineering", "general"]
            .into_iter()
            .map(str::to_string)
            .collect();

        Self {
            roles,
            role_aliases,
            departments,
        }
    }

    /// Load a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`RbacError`] when the file is unreadable, unparsable, or
    /// declares no departments.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RbacError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| RbacError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self =
            serde_json::from_str(&content).map_err(|source| RbacError::ConfigParse { source })?;
        if config.departments.is_empty() {
            return Err(RbacError::EmptyDepartments);
        }
        Ok(config)
    }

    /// Map an input role name to its canonical form: alias table first, then
    /// lowercase with spaces collapsed to underscores.
    #[must_use]
    pub fn canonicalize(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        self.role_aliases
            .get(trimmed)
            .cloned()
            .unwrap_or_else(|| trimmed.to_lowercase().replace(' ', "_"))
    }
}

/// Snapshot of a caller's resolved authority, for the profile endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct RoleSummary {
    pub canonical_roles: Vec<String>,
    pub permissions: Vec<String>,
    pub accessible_departments: Vec<String>,
    pub is_admin: bool,
}

/// Per-request access evaluator for one caller.
pub struct RbacEngine {
    config: Arc<RbacConfig>,
    user_roles: Vec<String>,
    canonical: OnceLock<BTreeSet<String>>,
    permissions: OnceLock<BTreeSet<String>>,
    accessible: OnceLock<BTreeSet<String>>,
}

impl RbacEngine {
    /// Build an engine for a caller with the given raw role list.
    #[must_use]
    pub fn new(config: Arc<RbacConfig>, user_roles: &[String]) -> Self {
        Self {
            config,
            user_roles: user_roles.iter().map(|r| r.trim().to_string()).collect(),
            canonical: OnceLock::new(),
            permissions: OnceLock::new(),
            accessible: OnceLock::new(),
        }
    }

    /// Resolve the caller's raw roles to the canonical set, aliases applied
    /// and inheritance expanded transitively (cycle-safe).
    pub fn resolve_roles(&self) -> &BTreeSet<String> {
        self.canonical.get_or_init(|| {
            let mut canonical = BTreeSet::new();
            for raw in &self.user_roles {
                let role = self.config.canonicalize(raw);
                let mut visited = BTreeSet::new();
                self.collect_inherited(&role, &mut visited, &mut canonical);
                canonical.insert(role);
            }
            canonical
        })
    }

    fn collect_inherited(
        &self,
        role: &str,
        visited: &mut BTreeSet<String>,
        out: &mut BTreeSet<String>,
    ) {
        if !visited.insert(role.to_string()) {
            return;
        }
        let Some(definition) = self.config.roles.get(role) else {
            return;
        };
        for parent in &definition.inherits {
            out.insert(parent.clone());
            self.collect_inherited(parent, visited, out);
        }
    }

    /// Union of permissions across all resolved roles. A wildcard collapses
    /// the whole set to `{*}`.
    pub fn effective_permissions(&self) -> &BTreeSet<String> {
        self.permissions.get_or_init(|| {
            let mut permissions = BTreeSet::new();
            for role in self.resolve_roles() {
                if let Some(definition) = self.config.roles.get(role) {
                    permissions.extend(definition.permissions.iter().cloned());
                }
            }
            if permissions.contains("*") {
                let mut wildcard = BTreeSet::new();
                wildcard.insert("*".to_string());
                return wildcard;
            }
            permissions
        })
    }

    /// Whether the caller holds a permission (wildcard implies all).
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        let permissions = self.effective_permissions();
        permissions.contains("*") || permissions.contains(permission)
    }

    /// Whether the caller is an administrator.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.effective_permissions().contains("*") || self.resolve_roles().contains("admin")
    }

    /// Departments the caller may read. Admins see the full configured set;
    /// everyone else gets exactly the departments named by `read:<dept>`
    /// permissions.
    pub fn accessible_departments(&self) -> &BTreeSet<String> {
        self.accessible.get_or_init(|| {
            if self.is_admin() {
                return self.config.departments.clone();
            }
            self.effective_permissions()
                .iter()
                .filter_map(|perm| perm.strip_prefix("read:"))
                .map(str::to_string)
                .collect()
        })
    }

    /// The per-chunk allow decision. First matching rule wins; default deny.
    ///
    /// 1. Metadata that carries neither a department nor an allow-list can
    ///    never be authorized.
    /// 2. `admin` in the canonical set overrides everything.
    /// 3. A non-empty allow-list grants access on intersection, unless the
    ///    explicit deny list also intersects.
    /// 4. Otherwise the department `read:` permission decides.
    #[must_use]
    pub fn is_allowed(&self, metadata: &ChunkMetadata) -> bool {
        if metadata.department.is_empty() && metadata.allowed_roles.is_empty() {
            return false;
        }

        let canonical = self.resolve_roles();
        if canonical.contains("admin") {
            return true;
        }

        if !metadata.allowed_roles.is_empty() {
            let allowed: BTreeSet<String> = metadata
                .allowed_roles
                .iter()
                .map(|role| self.config.canonicalize(role))
                .collect();
            if allowed.intersection(canonical).next().is_some() {
                let denied: BTreeSet<String> = metadata
                    .explicit_deny
                    .iter()
                    .map(|role| self.config.canonicalize(role))
                    .collect();
                return denied.intersection(canonical).next().is_none();
            }
        }

        if !metadata.department.is_empty() {
            let permission = format!("read:{}", metadata.department.to_lowercase());
            if self.has_permission(&permission) {
                return true;
            }
        }

        false
    }

    /// Resolved-authority snapshot for the profile endpoint.
    #[must_use]
    pub fn summary(&self) -> RoleSummary {
        RoleSummary {
            canonical_roles: self.resolve_roles().iter().cloned().collect(),
            permissions: self.effective_permissions().iter().cloned().collect(),
            accessible_departments: self.accessible_departments().iter().cloned().collect(),
            is_admin: self.is_admin(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn engine(roles: &[&str]) -> RbacEngine {
        let config = Arc::new(RbacConfig::builtin());
        let roles: Vec<String> = roles.iter().map(|r| (*r).to_string()).collect();
        RbacEngine::new(config, &roles)
    }

    fn metadata(department: &str, allowed: &[&str], denied: &[&str]) -> ChunkMetadata {
        ChunkMetadata {
            chunk_id: "T_CHUNK_1".to_string(),
            source_document: "doc.md".to_string(),
            department: department.to_string(),
            chunk_index: 0,
            allowed_roles: allowed.iter().map(|r| (*r).to_string()).collect(),
            explicit_deny: denied.iter().map(|r| (*r).to_string()).collect(),
            security_level: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn aliases_resolve_before_lowercasing() {
        let e = engine(&["Finance"]);
        assert!(e.resolve_roles().contains("finance_analyst"));
        let e = engine(&["Senior Finance Analyst"]);
        assert!(e.resolve_roles().contains("senior_finance_analyst"));
    }

    #[test]
    fn inheritance_expands_transitively() {
        let e = engine(&["finance_analyst"]);
        let roles = e.resolve_roles();
        assert!(roles.contains("finance_analyst"));
        assert!(roles.contains("employee"));
    }

    #[test]
    fn inheritance_cycles_terminate() {
        let mut config = RbacConfig::builtin();
        config.roles.insert(
            "alpha".to_string(),
            RoleDefinition {
                permissions: vec!["read:finance".to_string()],
                inherits: vec!["beta".to_string()],
            },
        );
        config.roles.insert(
            "beta".to_string(),
            RoleDefinition {
                permissions: vec![],
                inherits: vec!["alpha".to_string()],
            },
        );
        let e = RbacEngine::new(Arc::new(config), &["alpha".to_string()]);
        let roles = e.resolve_roles();
        assert!(roles.contains("alpha") && roles.contains("beta"));
    }

    #[test]
    fn wildcard_collapses_permissions() {
        let e = engine(&["admin", "finance_analyst"]);
        let permissions = e.effective_permissions();
        assert_eq!(permissions.len(), 1);
        assert!(permissions.contains("*"));
        assert!(e.has_permission("read:anything"));
    }

    #[test]
    fn accessible_departments_follow_read_permissions() {
        let e = engine(&["finance_analyst"]);
        let departments = e.accessible_departments();
        assert!(departments.contains("finance"));
        assert!(departments.contains("general"));
        assert!(!departments.contains("marketing"));
    }

    #[test]
    fn admin_sees_all_configured_departments() {
        let e = engine(&["admin"]);
        assert_eq!(e.accessible_departments().len(), 5);
    }

    #[test]
    fn default_deny_for_unknown_roles() {
        let e = engine(&["visitor"]);
        assert!(!e.is_allowed(&metadata("finance", &[], &[])));
        assert!(e.accessible_departments().is_empty());
    }

    #[test]
    fn empty_metadata_is_denied_even_for_privileged_callers() {
        let e = engine(&["c_level"]);
        assert!(!e.is_allowed(&metadata("", &[], &[])));
    }

    #[test]
    fn admin_override_beats_explicit_deny() {
        let e = engine(&["admin"]);
        assert!(e.is_allowed(&metadata("finance", &["finance_analyst"], &["admin"])));
    }

    #[test]
    fn allow_list_intersection_grants_access() {
        let e = engine(&["finance_analyst"]);
        assert!(e.is_allowed(&metadata("marketing", &["Finance"], &[])));
    }

    #[test]
    fn explicit_deny_takes_precedence_over_allow_list() {
        let e = engine(&["finance_analyst"]);
        assert!(!e.is_allowed(&metadata("finance", &["finance_analyst"], &["finance_analyst"])));
    }

    #[test]
    fn inherited_role_can_be_the_denied_one() {
        let e = engine(&["finance_analyst"]);
        // The allow-list matches via the inherited employee role, but the
        // deny list names it too.
        assert!(!e.is_allowed(&metadata("finance", &["employee"], &["employee"])));
    }

    #[test]
    fn department_permission_is_the_fallback() {
        let e = engine(&["finance_analyst"]);
        assert!(e.is_allowed(&metadata("finance", &[], &[])));
        assert!(!e.is_allowed(&metadata("marketing", &[], &[])));
    }

    #[test]
    fn non_matching_allow_list_still_falls_back_to_department() {
        let e = engine(&["finance_analyst"]);
        assert!(e.is_allowed(&metadata("finance", &["hr_manager"], &[])));
    }

    #[test]
    fn summary_reports_resolved_authority() {
        let e = engine(&["Finance"]);
        let summary = e.summary();
        assert!(summary.canonical_roles.contains(&"finance_analyst".to_string()));
        assert!(summary.permissions.contains(&"read:finance".to_string()));
        assert!(!summary.is_admin);
    }
}
