mod meta;
mod schema;
pub mod tenant;

pub use meta::MetaStore;
pub use tenant::{TenantStore, WorkspaceDb};

use crate::error::Result;
use crate::types::{AppUser, RlsPolicy, Workspace};

/// Looks up workspaces owned by the admin plane.
pub trait WorkspaceDirectory: Send + Sync {
    fn find_by_slug(&self, slug: &str) -> Result<Option<Workspace>>;
    fn find_by_id(&self, id: &str) -> Result<Option<Workspace>>;
}

/// Supplies deployed handler source as `(source, hash)`.
pub trait CodeSource: Send + Sync {
    fn get_code(&self, workspace_id: &str) -> Result<Option<(String, String)>>;
}

pub trait PolicyStore: Send + Sync {
    fn list_active_policies(&self, workspace_id: &str, table: &str) -> Result<Vec<RlsPolicy>>;
    fn list_policies_for_table(&self, workspace_id: &str, table: &str) -> Result<Vec<RlsPolicy>>;
}

/// Resolves an app session token to its user. Invalid, unknown and expired
/// tokens all yield `None`.
pub trait SessionValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<Option<AppUser>>;
}
