//! Identifier safety for generated SQL
//!
//! Table and column names are interpolated into SQL text, so they are
//! validated when configured and quoted when rendered.

use crate::error::ModelError;

/// Characters allowed in SQL identifiers (alphanumeric, underscore, dollar)
const ALLOWED_IDENTIFIER_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_$";

/// PostgreSQL truncates identifiers beyond this length
const MAX_IDENTIFIER_LEN: usize = 63;

/// SQL keywords rejected as bare identifiers
static SQL_KEYWORDS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "FROM", "WHERE", "JOIN", "UNION", "DROP", "CREATE",
    "ALTER", "GRANT", "REVOKE", "TRUNCATE", "EXEC", "EXECUTE", "DECLARE", "CAST", "NULL", "USER",
];

/// Escape a SQL identifier (table name, column name, etc.)
///
/// # Examples
/// ```
/// use removable_orm::security::escape_identifier;
///
/// assert_eq!(escape_identifier("removed_at"), "\"removed_at\"");
/// assert_eq!(escape_identifier("odd\"name"), "\"odd\"\"name\"");
/// ```
pub fn escape_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Validate that an identifier is safe for use in SQL
pub fn validate_identifier(identifier: &str) -> Result<(), ModelError> {
    let Some(first) = identifier.chars().next() else {
        return Err(ModelError::Configuration(
            "Identifier cannot be empty".to_string(),
        ));
    };

    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(ModelError::Configuration(format!(
            "Identifier '{}' is too long (max {} characters)",
            identifier, MAX_IDENTIFIER_LEN
        )));
    }

    if let Some(c) = identifier.chars().find(|c| !ALLOWED_IDENTIFIER_CHARS.contains(*c)) {
        return Err(ModelError::Configuration(format!(
            "Identifier '{}' contains invalid character '{}'",
            identifier, c
        )));
    }

    if first.is_ascii_digit() {
        return Err(ModelError::Configuration(format!(
            "Identifier '{}' cannot start with a number",
            identifier
        )));
    }

    if SQL_KEYWORDS.contains(&identifier.to_uppercase().as_str()) {
        return Err(ModelError::Configuration(format!(
            "Identifier '{}' is a reserved SQL keyword",
            identifier
        )));
    }

    Ok(())
}
