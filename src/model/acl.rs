//! read visibility.
//!
//! only the read check is evaluated here. The entries of a node are
//! checked first, then those of each ancestor up to the root; the first
//! entry naming the principal (or `Everyone`) and a matching permission
//! decides. A tree with no matching entry is readable.

use crate::storage::Ace;

pub const READ: &str = "Read";
pub const EVERYTHING: &str = "Everything";
pub const EVERYONE: &str = "Everyone";
/// principal used by internal sessions, never filtered
pub const SYSTEM: &str = "system";

fn grants_read(permission: &str) -> bool {
    permission == READ || permission == EVERYTHING
}

fn applies_to(ace: &Ace, principal: &str) -> bool {
    ace.principal == principal || ace.principal == EVERYONE
}

/// decide read access from the ACLs of a node and its ancestors
///
/// `chain` yields the node's ACL first, then its parent's, up to the root.
pub fn can_read<'a, I>(principal: &str, chain: I) -> bool
where
    I: IntoIterator<Item = &'a [Ace]>,
{
    if principal == SYSTEM {
        return true;
    }

    chain
        .into_iter()
        .flat_map(|acl| acl.iter())
        .find(|ace| applies_to(ace, principal) && grants_read(&ace.permission))
        .map_or(true, |ace| ace.granted)
}
