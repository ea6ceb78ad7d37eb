//! Object name validation.
//!
//! Valid names:
//! - Must be non-empty
//! - Must not contain `/` or NUL
//! - Must not be `.` or `..`

use crate::error::{TreeError, TreeResult};

/// Validate an object name, returning `Ok(())` if valid.
///
/// # Examples
///
/// ```
/// use trellis_tree::validate_name;
///
/// assert!(validate_name("Reports").is_ok());
/// assert!(validate_name("").is_err());
/// assert!(validate_name("a/b").is_err());
/// ```
pub fn validate_name(name: &str) -> TreeResult<()> {
    let reason = if name.is_empty() {
        "name must not be empty"
    } else if name == "." || name == ".." {
        "name must not be '.' or '..'"
    } else if name.contains('/') {
        "name must not contain '/'"
    } else if name.contains('\0') {
        "name must not contain NUL"
    } else {
        return Ok(());
    };
    Err(TreeError::InvalidName {
        name: name.to_string(),
        reason: reason.into(),
    })
}
