//! Input validation for names handed to cloud APIs and used as store paths

use crate::error::{Error, ErrorKind, Result};
use regex::Regex;
use std::sync::LazyLock;

/// Longest cluster or resource name accepted
pub const MAX_NAME_LEN: usize = 50;

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][-a-z0-9]*[a-z0-9]$").unwrap_or_else(|e| panic!("name pattern: {e}"))
});

/// Checks a cluster or resource name
///
/// Names start with a lowercase letter, contain lowercase letters, digits and
/// dashes, end with a letter or digit, and are at most [`MAX_NAME_LEN`] long.
pub fn validate_name(name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(Error::new(
            ErrorKind::InvalidResourceName,
            format!("'{name}' is longer than {MAX_NAME_LEN} characters"),
        ));
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(Error::new(
            ErrorKind::InvalidResourceName,
            format!("'{name}' must match {}", NAME_PATTERN.as_str()),
        ));
    }
    Ok(())
}

static REGION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][-A-Za-z0-9]{0,63}$").unwrap_or_else(|e| panic!("region pattern: {e}"))
});

/// Checks the shape of a region (`LON1`, `us-east-1`, `eastus`)
///
/// Only the shape is checked here; whether the cloud offers the region is
/// up to the backend.
pub fn validate_region(region: &str) -> Result<()> {
    if !REGION_PATTERN.is_match(region) {
        return Err(Error::new(
            ErrorKind::InvalidCloudRegion,
            format!("'{region}' is not a valid region name"),
        ));
    }
    Ok(())
}

/// Checks a count for roles that form a quorum (control plane, datastore)
pub fn validate_quorum(count: usize, kind: ErrorKind) -> Result<()> {
    if count < 3 || count % 2 == 0 {
        return Err(Error::new(
            kind,
            format!("{count} is invalid, an odd number of at least 3 is required"),
        ));
    }
    Ok(())
}
