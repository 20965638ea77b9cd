//! Name rules for tenant SQL identifiers, workspace slugs, and workspace ids.

pub const MAX_IDENTIFIER_LEN: usize = 64;
pub const MAX_SLUG_LEN: usize = 64;
pub const RESERVED_PREFIX: &str = "_sys_";

/// Returns true when `name` uses the reserved internal prefix, in any case.
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    name.len() >= RESERVED_PREFIX.len()
        && name.as_bytes()[..RESERVED_PREFIX.len()].eq_ignore_ascii_case(RESERVED_PREFIX.as_bytes())
}

/// Validates a table, column, or index name.
///
/// Identifiers are ASCII letters, digits and underscores, start with a
/// letter, and are at most 64 characters long.
pub fn validate_identifier(name: &str, entity: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{entity} name cannot be empty"));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(format!(
            "{entity} name cannot exceed {MAX_IDENTIFIER_LEN} characters"
        ));
    }
    if is_reserved(name) {
        return Err(format!("{entity} name {name:?} uses a reserved prefix"));
    }
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(format!("{entity} name must start with a letter"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!(
            "{entity} name can only contain letters, digits, and underscores"
        ));
    }
    if name.len() >= 7 && name[..7].eq_ignore_ascii_case("sqlite_") {
        return Err(format!("{entity} name {name:?} uses a reserved prefix"));
    }
    Ok(())
}

/// Validates a workspace slug as used in `/runtime/{slug}/...`.
pub fn validate_slug(slug: &str) -> Result<(), String> {
    if slug.is_empty() {
        return Err("Workspace slug cannot be empty".to_string());
    }
    if slug.len() > MAX_SLUG_LEN {
        return Err(format!(
            "Workspace slug cannot exceed {MAX_SLUG_LEN} characters"
        ));
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(
            "Workspace slug can only contain lowercase letters, digits, and hyphens".to_string(),
        );
    }
    if slug.starts_with('-') || slug.ends_with('-') {
        return Err("Workspace slug cannot start or end with a hyphen".to_string());
    }
    Ok(())
}

/// Validates a workspace id. Ids become directory names under the tenants
/// root, so only path-safe characters are allowed.
pub fn validate_workspace_id(id: &str) -> Result<(), String> {
    if id.is_empty() || id.len() > MAX_IDENTIFIER_LEN {
        return Err(format!(
            "Workspace id must be 1 to {MAX_IDENTIFIER_LEN} characters"
        ));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(
            "Workspace id can only contain letters, digits, hyphens, and underscores".to_string(),
        );
    }
    Ok(())
}
