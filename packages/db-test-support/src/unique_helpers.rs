//! Unique database names, so tests sharing a server never collide.

use ulid::Ulid;

/// Generate a database name that passes identifier validation.
///
/// The result is `{prefix}_{ulid}` in lower case, e.g.
/// `appdb_01j9z3k8m4q6r2t5v7w9x0y1z2`. `prefix` must itself be a valid
/// identifier of at most 36 bytes so the total stays within 63 bytes.
///
/// ```
/// use db_test_support::unique_helpers::unique_db_name;
///
/// let a = unique_db_name("appdb");
/// let b = unique_db_name("appdb");
/// assert_ne!(a, b);
/// assert!(a.starts_with("appdb_"));
/// ```
pub fn unique_db_name(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new().to_string().to_lowercase())
}
