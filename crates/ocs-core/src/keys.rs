//! Storage key prefixes and builders
//!
//! Every persisted entity lives under `<prefix><tenant>:<id>` (or `<prefix><id>` for
//! entities that are not tenant scoped). Prefix scans over these keys drive
//! listing and cache-reload scoping.
//!
//! ```
//! use ocs_core::keys;
//!
//! assert_eq!(keys::account_key("cgrates.org:1001"), "acc_cgrates.org:1001");
//! assert_eq!(keys::tenant_id("cgrates.org", "1001"), "cgrates.org:1001");
//! ```

/// Accounts, keyed by tenant-qualified account ID
pub const ACCOUNT_PREFIX: &str = "acc_";

/// Action plans, keyed by plan ID
pub const ACTION_PLAN_PREFIX: &str = "apl_";

/// Reverse index account → action plan IDs
pub const ACCOUNT_ACTION_PLANS_PREFIX: &str = "aap_";

/// Compiled action lists, keyed by actions ID
pub const ACTIONS_PREFIX: &str = "act_";

/// Destinations (prefix groups)
pub const DESTINATION_PREFIX: &str = "dst_";

/// Rating plans
pub const RATING_PLAN_PREFIX: &str = "rpl_";

/// Rating profiles, keyed by `tenant:category:subject`
pub const RATING_PROFILE_PREFIX: &str = "rpf_";

/// Separator between tenant and ID
pub const TENANT_SEPARATOR: char = ':';

/// Subject used when no rating profile exists for the call subject
pub const ANY_SUBJECT: &str = "*any";

pub fn tenant_id(tenant: &str, id: &str) -> String {
    format!("{}{}{}", tenant, TENANT_SEPARATOR, id)
}

/// Split a tenant-qualified ID into `(tenant, id)`
///
/// IDs without a tenant part return an empty tenant.
pub fn split_tenant_id(tid: &str) -> (&str, &str) {
    match tid.split_once(TENANT_SEPARATOR) {
        Some((tenant, id)) => (tenant, id),
        None => ("", tid),
    }
}

pub fn account_key(account_id: &str) -> String {
    format!("{}{}", ACCOUNT_PREFIX, account_id)
}

pub fn action_plan_key(plan_id: &str) -> String {
    format!("{}{}", ACTION_PLAN_PREFIX, plan_id)
}

pub fn account_action_plans_key(account_id: &str) -> String {
    format!("{}{}", ACCOUNT_ACTION_PLANS_PREFIX, account_id)
}

pub fn actions_key(actions_id: &str) -> String {
    format!("{}{}", ACTIONS_PREFIX, actions_id)
}

pub fn destination_key(destination_id: &str) -> String {
    format!("{}{}", DESTINATION_PREFIX, destination_id)
}

pub fn rating_plan_key(plan_id: &str) -> String {
    format!("{}{}", RATING_PLAN_PREFIX, plan_id)
}

pub fn rating_profile_key(tenant: &str, category: &str, subject: &str) -> String {
    format!(
        "{}{}{sep}{}{sep}{}",
        RATING_PROFILE_PREFIX,
        tenant,
        category,
        subject,
        sep = TENANT_SEPARATOR
    )
}

/// Strip a known prefix from a storage key
pub fn strip_prefix<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix)
}
