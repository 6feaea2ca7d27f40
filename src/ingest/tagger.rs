//! Role metadata tagging.
//!
//! During ingestion every chunk is stamped with the canonical roles allowed
//! to read it, derived from a role ↔ department mapping. The `general`
//! department is the shared baseline: its chunks are readable by every
//! configured role.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;

use crate::store::ChunkMetadata;

/// Mapping from canonical role name to the departments it may read.
///
/// This drives *ingestion-time* tagging only; request-time decisions always
/// go through the RBAC engine, which has its own (richer) configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoleDepartmentMap {
    map: BTreeMap<String, BTreeSet<String>>,
}

impl RoleDepartmentMap {
    /// Build from explicit pairs of `(role, departments)`.
    #[must_use]
    pub fn new(entries: BTreeMap<String, BTreeSet<String>>) -> Self {
        let map = entries
            .into_iter()
            .map(|(role, departments)| {
                (
                    role.to_lowercase(),
                    departments.into_iter().map(|d| d.to_lowercase()).collect(),
                )
            })
            .collect();
        Self { map }
    }

    /// The default mapping matching the builtin RBAC policy.
    #[must_use]
    pub fn builtin() -> Self {
        fn set(departments: &[&str]) -> BTreeSet<String> {
            departments.iter().map(|d| (*d).to_string()).collect()
        }

        let mut map = BTreeMap::new();
        map.insert("finance_analyst".to_string(), set(&["finance"]));
        map.insert("marketing_manager".to_string(), set(&["marketing"]));
        map.insert("hr_manager".to_string(), set(&["hr"]));
        map.insert("engineer".to_string(), set(&["engineering"]));
        map.insert(
            "c_level".to_string(),
            set(&["finance", "marketing", "hr", "engineering"]),
        );
        map.insert("employee".to_string(), set(&[]));
        map.insert("intern".to_string(), set(&[]));
        Self { map }
    }

    /// Canonical roles allowed to read chunks of `department`: the union of
    /// roles whose department set contains it. `general` chunks are readable
    /// by every configured role.
    #[must_use]
    pub fn allowed_roles_for(&self, department: &str) -> Vec<String> {
        let department = department.to_lowercase();
        if department == "general" {
            return self.map.keys().cloned().collect();
        }
        self.map
            .iter()
            .filter(|(_, departments)| departments.contains(&department))
            .map(|(role, _)| role.clone())
            .collect()
    }
}

/// Produce the metadata sidecar for one freshly cut chunk.
#[must_use]
pub fn tag_chunk(
    role_map: &RoleDepartmentMap,
    chunk_id: &str,
    source_document: &str,
    department: &str,
    chunk_index: usize,
) -> ChunkMetadata {
    let department = department.to_lowercase();
    ChunkMetadata {
        chunk_id: chunk_id.to_string(),
        source_document: source_document.to_string(),
        allowed_roles: role_map.allowed_roles_for(&department),
        explicit_deny: Vec::new(),
        security_level: if department == "general" {
            "internal".to_string()
        } else {
            "restricted".to_string()
        },
        department,
        chunk_index,
        created_at: Utc::now(),
    }
}
