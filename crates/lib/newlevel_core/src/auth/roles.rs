//! Role computation for access-token claims.

use crate::models::auth::{Account, BandMembership, Role};

/// Roles for `account` given its band memberships.
///
/// Every account is a `User`; stored roles are kept; `Band` is added when the
/// account administers at least one verified band. Result is sorted and
/// deduplicated.
pub fn compute_roles(account: &Account, memberships: &[BandMembership]) -> Vec<Role> {
    let mut roles: Vec<Role> = account
        .roles
        .iter()
        .copied()
        .filter(|r| *r != Role::Band)
        .collect();
    roles.push(Role::User);
    if memberships.iter().any(|m| m.is_admin && m.band_verified) {
        roles.push(Role::Band);
    }
    roles.sort();
    roles.dedup();
    roles
}
