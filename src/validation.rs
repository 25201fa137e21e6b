use std::fmt::Write as _;

use sha2::{Digest as _, Sha256};

use crate::error::{AppError, Result};

const MAX_NAME_LEN: usize = 64;

/// PostgreSQL truncates identifiers beyond this many bytes.
const MAX_ROLE_LEN: usize = 63;
const ROLE_PREFIX: &str = "odoo_";
/// Hex digits of the name digest appended to lossy role names.
const ROLE_HASH_LEN: usize = 12;

/// Instance names become directory names and role suffixes.
pub fn validate_instance_name(name: &str) -> Result<()> {
    let is_safe = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if !is_safe {
        return Err(AppError::other(format!("Invalid instance name: {:?}", name)));
    }
    Ok(())
}

/// Version tags become directory names and `git clone -b` arguments.
pub fn validate_version_tag(version: &str) -> Result<()> {
    let is_safe = !version.is_empty()
        && !version.starts_with(['.', '-'])
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+'));

    if !is_safe {
        return Err(AppError::other(format!("Invalid version tag: {:?}", version)));
    }
    Ok(())
}

/// PostgreSQL role dedicated to an instance.
///
/// Names that are already lowercase identifiers map to `odoo_<name>`. Any
/// other name is sanitised and suffixed with a digest of the exact name, so
/// `Shop-1` and `shop_1` get different roles and the result fits in 63 bytes.
pub fn role_name_for(instance_name: &str) -> String {
    let sanitised: String = instance_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();

    let lossless = sanitised == instance_name;
    if lossless && ROLE_PREFIX.len() + sanitised.len() <= MAX_ROLE_LEN {
        return format!("{}{}", ROLE_PREFIX, sanitised);
    }

    let digest = Sha256::digest(instance_name.as_bytes());
    let mut hash = String::with_capacity(ROLE_HASH_LEN);
    for byte in digest.iter().take(ROLE_HASH_LEN / 2) {
        let _ = write!(hash, "{:02x}", byte);
    }
    let keep = MAX_ROLE_LEN - ROLE_PREFIX.len() - 1 - ROLE_HASH_LEN;
    let stem = &sanitised[..sanitised.len().min(keep)];
    format!("{}{}_{}", ROLE_PREFIX, stem, hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_names() {
        assert!(validate_instance_name("acme").is_ok());
        assert!(validate_instance_name("acme-prod_2.x").is_ok());
        assert!(validate_instance_name("").is_err());
        assert!(validate_instance_name("../etc").is_err());
        assert!(validate_instance_name(".hidden").is_err());
        assert!(validate_instance_name("a b").is_err());
        assert!(validate_instance_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn version_tags() {
        assert!(validate_version_tag("17.0").is_ok());
        assert!(validate_version_tag("saas-17.2").is_ok());
        assert!(validate_version_tag("-b").is_err());
        assert!(validate_version_tag("17.0/../x").is_err());
    }

    #[test]
    fn plain_names_keep_readable_roles() {
        assert_eq!(role_name_for("acme"), "odoo_acme");
        assert_eq!(role_name_for("shop_1"), "odoo_shop_1");
    }

    #[test]
    fn sanitised_names_do_not_collide() {
        let dashed = role_name_for("Shop-1");
        assert!(dashed.starts_with("odoo_shop_1_"));
        assert_ne!(dashed, role_name_for("shop_1"));
        assert_ne!(dashed, role_name_for("shop.1"));
        assert_ne!(role_name_for("shop.1"), role_name_for("shop-1"));
        assert_eq!(dashed, role_name_for("Shop-1"));
    }

    #[test]
    fn long_names_fit_postgres_identifiers() {
        let a = format!("{}a", "x".repeat(63));
        let b = format!("{}b", "x".repeat(63));
        assert!(role_name_for(&a).len() <= 63);
        assert!(role_name_for(&b).len() <= 63);
        assert_ne!(role_name_for(&a), role_name_for(&b));
        assert_eq!(role_name_for(&"y".repeat(58)).len(), 63);
    }
}
