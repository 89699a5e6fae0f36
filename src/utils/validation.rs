//! Validation utilities

use crate::types::*;

/// Longest accepted file name, in bytes
pub const MAX_FILE_NAME_LEN: usize = 255;

/// Page size used when a caller does not ask for one
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Largest page a caller may request
pub const MAX_PAGE_SIZE: usize = 100;

/// Validate that a file name can be used as an object key suffix and a
/// staging file prefix
pub fn validate_file_name(name: &str) -> Result<(), ReconcileError> {
    let invalid = |reason: &str| ReconcileError::InvalidFileName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.trim().is_empty() {
        return Err(invalid("name cannot be empty"));
    }

    if name.len() > MAX_FILE_NAME_LEN {
        return Err(invalid("name cannot exceed 255 bytes"));
    }

    if name == "." || name == ".." {
        return Err(invalid("name cannot be a relative path component"));
    }

    if name.contains(['/', '\\']) {
        return Err(invalid("name cannot contain path separators"));
    }

    if name.chars().any(char::is_control) {
        return Err(invalid("name cannot contain control characters"));
    }

    Ok(())
}

/// Clamp a requested page size to `1..=MAX_PAGE_SIZE`
pub fn page_size(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}
