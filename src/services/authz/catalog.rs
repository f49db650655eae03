/*
 * Responsibility
 * - Static table: tool -> required provider permissions (audit only)
 * - Static table: role -> access level, allowed scopes, allowed tools
 *
 * Notes
 * - Loaded once at startup and immutable afterwards; shared via Arc.
 * - The built-in table is compiled in. There is no runtime policy editing.
 */
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("role not found: {0}")]
    RoleNotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Read,
    Write,
    Admin,
}

/// A wildcard or an explicit set of names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Allowance {
    All,
    Only(BTreeSet<String>),
}

impl Allowance {
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(names.into_iter().map(Into::into).collect())
    }

    pub fn allows(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(names) => names.contains(name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoleDefinition {
    pub name: String,
    pub level: AccessLevel,
    pub scopes: Allowance,
    pub tools: Allowance,
}

impl RoleDefinition {
    pub fn new(name: impl Into<String>, level: AccessLevel) -> Self {
        Self {
            name: name.into(),
            level,
            scopes: Allowance::All,
            tools: Allowance::All,
        }
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: Allowance) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Allowance) -> Self {
        self.tools = tools;
        self
    }
}

#[derive(Debug, Default)]
pub struct PermissionCatalog {
    permissions: BTreeMap<String, Vec<String>>,
    roles: HashMap<String, RoleDefinition>,
}

#[derive(Debug, Default)]
pub struct PermissionCatalogBuilder {
    catalog: PermissionCatalog,
}

impl PermissionCatalogBuilder {
    #[must_use]
    pub fn tool<I, S>(mut self, name: impl Into<String>, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.catalog.permissions.insert(
            name.into(),
            permissions.into_iter().map(Into::into).collect(),
        );
        self
    }

    #[must_use]
    pub fn role(mut self, role: RoleDefinition) -> Self {
        self.catalog.roles.insert(role.name.clone(), role);
        self
    }

    pub fn build(self) -> PermissionCatalog {
        self.catalog
    }
}

const READ_TOOLS: &[&str] = &[
    "auth_status",
    "permissions_list",
    "catalog_config",
    "bucket_objects_list",
    "bucket_object_info",
    "bucket_object_text",
    "package_browse",
    "package_search",
    "athena_databases_list",
    "athena_query_execute",
    "tabulator_tables_list",
];

const WRITE_TOOLS: &[&str] = &[
    "bucket_objects_put",
    "package_create",
    "package_update",
    "package_delete",
    "tabulator_table_create",
];

const S3_READ: &[&str] = &["s3:ListBucket", "s3:GetObject"];
const S3_WRITE: &[&str] = &["s3:ListBucket", "s3:GetObject", "s3:PutObject"];

impl PermissionCatalog {
    pub fn builder() -> PermissionCatalogBuilder {
        PermissionCatalogBuilder::default()
    }

    /// The compiled-in table used by the gateway.
    pub fn builtin() -> Self {
        Self::builder()
            .tool("auth_status", Vec::<String>::new())
            .tool("permissions_list", Vec::<String>::new())
            .tool("catalog_config", Vec::<String>::new())
            .tool("bucket_objects_list", ["s3:ListBucket"])
            .tool("bucket_object_info", ["s3:GetObject"])
            .tool("bucket_object_text", ["s3:GetObject"])
            .tool("bucket_objects_put", ["s3:PutObject"])
            .tool("package_browse", S3_READ.iter().copied())
            .tool("package_search", S3_READ.iter().copied())
            .tool("package_create", S3_WRITE.iter().copied())
            .tool("package_update", S3_WRITE.iter().copied())
            .tool(
                "package_delete",
                ["s3:ListBucket", "s3:GetObject", "s3:DeleteObject"],
            )
            .tool("athena_databases_list", ["glue:GetDatabases"])
            .tool(
                "athena_query_execute",
                [
                    "athena:StartQueryExecution",
                    "athena:GetQueryExecution",
                    "athena:GetQueryResults",
                    "glue:GetTable",
                    "s3:GetObject",
                    "s3:PutObject",
                ],
            )
            .tool("tabulator_tables_list", Vec::<String>::new())
            .tool("tabulator_table_create", Vec::<String>::new())
            .tool("admin_users_list", Vec::<String>::new())
            .tool("admin_user_set_role", Vec::<String>::new())
            .role(
                RoleDefinition::new("ReadOnly", AccessLevel::Read)
                    .with_tools(Allowance::only(READ_TOOLS.iter().copied())),
            )
            .role(
                RoleDefinition::new("ReadWrite", AccessLevel::Write).with_tools(Allowance::only(
                    READ_TOOLS.iter().chain(WRITE_TOOLS).copied(),
                )),
            )
            .role(RoleDefinition::new("Admin", AccessLevel::Admin))
            .build()
    }

    /// Provider permissions a tool needs. Empty for unknown tools.
    pub fn permissions_for(&self, tool: &str) -> &[String] {
        self.permissions.get(tool).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn role_definition(&self, role: &str) -> Result<&RoleDefinition, CatalogError> {
        self.roles
            .get(role)
            .ok_or_else(|| CatalogError::RoleNotFound(role.to_owned()))
    }

    pub fn contains_tool(&self, tool: &str) -> bool {
        self.permissions.contains_key(tool)
    }

    /// Tool names in sorted order.
    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.permissions.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_roles_and_tools() {
        let catalog = PermissionCatalog::builtin();

        let read_only = catalog.role_definition("ReadOnly").unwrap();
        assert_eq!(read_only.level, AccessLevel::Read);
        assert!(read_only.tools.allows("package_browse"));
        assert!(!read_only.tools.allows("package_create"));

        let admin = catalog.role_definition("Admin").unwrap();
        assert!(admin.tools.allows("admin_users_list"));
        assert!(admin.scopes.allows("any-bucket"));

        assert_eq!(
            catalog.role_definition("Nope").unwrap_err(),
            CatalogError::RoleNotFound("Nope".into())
        );
    }

    #[test]
    fn every_role_tool_is_catalogued() {
        let catalog = PermissionCatalog::builtin();
        for tool in READ_TOOLS.iter().chain(WRITE_TOOLS) {
            assert!(catalog.contains_tool(tool), "{tool} missing");
        }
    }

    #[test]
    fn permissions_lookup() {
        let catalog = PermissionCatalog::builtin();
        assert_eq!(catalog.permissions_for("bucket_objects_list"), ["s3:ListBucket"]);
        assert!(catalog.permissions_for("no_such_tool").is_empty());

        let names: Vec<_> = catalog.tool_names().collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }
}
