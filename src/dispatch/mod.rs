//! Dispatch table model.
//!
//! A dispatch table is an ordered list of validation units. Each unit names
//! one resource identifier per role, and the roles fix the order in which
//! staged files are handed to the validator.

pub mod table;

use std::collections::HashSet;

/// Roles used when no role list is configured.
pub const DEFAULT_ROLES: [&str; 3] = ["sequence_path", "label_path", "third_data_path"];

/// Fixed result columns; a role may not share a name with any of them.
pub const RESERVED_COLUMNS: [&str; 6] = ["unit", "status", "exit_code", "message", "truncated", "duration_ms"];

/// Errors raised while loading a dispatch table.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("role list is empty")]
    NoRoles,
    #[error("role '{0}' is listed more than once")]
    DuplicateRole(String),
    #[error("role name must not be blank")]
    BlankRole,
    #[error("role '{0}' collides with a result column")]
    ReservedRole(String),
    #[error("role '{0}' may only contain ASCII letters, digits, '_' and '-'")]
    InvalidRoleName(String),
    #[error("dispatch table has no column for role '{role}' (found: {found})")]
    MissingColumn { role: String, found: String },
    #[error("failed to open dispatch table {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read dispatch table: {0}")]
    Read(#[from] csv::Error),
}

/// A role name doubles as a table column, a result column and a staging
/// directory name, so it must be a plain identifier distinct from the fixed
/// result columns.
pub fn check_role_name(role: &str) -> Result<(), DispatchError> {
    if role.trim().is_empty() {
        return Err(DispatchError::BlankRole);
    }
    if !role.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(DispatchError::InvalidRoleName(role.to_string()));
    }
    if RESERVED_COLUMNS.contains(&role) {
        return Err(DispatchError::ReservedRole(role.to_string()));
    }
    Ok(())
}

/// Ordered, non-empty set of unique role names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSet {
    roles: Vec<String>,
}

impl RoleSet {
    pub fn new(roles: Vec<String>) -> Result<Self, DispatchError> {
        if roles.is_empty() {
            return Err(DispatchError::NoRoles);
        }

        let mut seen = HashSet::new();
        for role in &roles {
            check_role_name(role)?;
            if !seen.insert(role.as_str()) {
                return Err(DispatchError::DuplicateRole(role.clone()));
            }
        }

        Ok(RoleSet { roles })
    }

    pub fn names(&self) -> &[String] {
        &self.roles
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

impl Default for RoleSet {
    fn default() -> Self {
        RoleSet {
            roles: DEFAULT_ROLES.iter().map(|r| r.to_string()).collect(),
        }
    }
}

/// One resource identifier bound to its role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub role: String,
    pub uri: String,
}

/// One row of the dispatch table.
///
/// `index` is the row position, shifted by the configured first-unit offset
/// so that positions stay unique across mini-batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationUnit {
    pub index: u64,
    pub resources: Vec<Resource>,
}

impl ValidationUnit {
    /// Build a unit from identifiers given in role order.
    ///
    /// Missing trailing identifiers become empty strings so the unit is
    /// still reported; the fetch step rejects them.
    pub fn new(index: u64, roles: &RoleSet, uris: Vec<String>) -> Self {
        let mut uris = uris.into_iter();
        let resources = roles
            .names()
            .iter()
            .map(|role| Resource {
                role: role.clone(),
                uri: uris.next().unwrap_or_default(),
            })
            .collect();

        ValidationUnit { index, resources }
    }

    /// Identifier of the first role, used to label the unit in logs.
    pub fn primary_uri(&self) -> &str {
        self.resources.first().map(|r| r.uri.as_str()).unwrap_or("")
    }
}
