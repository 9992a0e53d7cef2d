//! Authorization hook invoked by the translator before every dispatch.
//!
//! Authentication itself is treated as a middleware hook with an abstract
//! contract — [`AuthContext`] is that contract: whatever sits in front of
//! the uplink session populates one per request, and this module only
//! judges access given that context, never how it was established.

use bitflags::bitflags;

bitflags! {
    /// Permission bits an ACL rule or a dispatch call can carry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permission: u8 {
        /// Permission to read a resource's current value.
        const READ = 0b0000_0001;
        /// Permission to write, create, or delete a resource.
        const WRITE = 0b0000_0010;
    }
}

/// The caller's authentication state, as established upstream of the
/// translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthContext {
    /// Whether the caller presented valid credentials.
    pub authenticated: bool,
    /// The caller's role, compared against each rule's `minimum_role`.
    pub role: u8,
}

/// A single access-control rule.
#[derive(Debug, Clone)]
pub struct AclRule {
    /// Exact resource name, or a prefix ending in `*`.
    pub pattern: String,
    /// Permissions this rule grants once its other conditions are met.
    pub required_permission: Permission,
    /// Minimum `AuthContext::role` required to match this rule.
    pub minimum_role: u8,
    /// Whether this rule requires `AuthContext::authenticated`.
    pub require_auth: bool,
}

impl AclRule {
    fn matches(&self, resource_name: &str) -> bool {
        self.pattern.strip_suffix('*').map_or_else(
            || self.pattern == resource_name,
            |prefix| resource_name.starts_with(prefix),
        )
    }
}

/// Resource-pattern ACL check invoked by the translator before each
/// operation.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationHook {
    rules: Vec<AclRule>,
}

impl AuthorizationHook {
    /// Build a hook from an ordered rule list; first match wins.
    #[must_use]
    pub const fn new(rules: Vec<AclRule>) -> Self {
        Self { rules }
    }

    /// Whether `context` may exercise `required` on `resource_name`.
    ///
    /// The first rule whose pattern matches `resource_name` governs. With no
    /// matching rule, writes require authentication and reads are permitted.
    #[must_use]
    pub fn check(&self, resource_name: &str, required: Permission, context: &AuthContext) -> bool {
        let Some(rule) = self.rules.iter().find(|rule| rule.matches(resource_name)) else {
            return !required.contains(Permission::WRITE) || context.authenticated;
        };
        if rule.require_auth && !context.authenticated {
            return false;
        }
        if context.role < rule.minimum_role {
            return false;
        }
        rule.required_permission.contains(required)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn authed(role: u8) -> AuthContext {
        AuthContext {
            authenticated: true,
            role,
        }
    }

    #[test]
    fn no_matching_rule_permits_read_but_requires_auth_for_write() {
        let hook = AuthorizationHook::new(vec![]);
        let anon = AuthContext::default();
        assert!(hook.check("Device.Anything", Permission::READ, &anon));
        assert!(!hook.check("Device.Anything", Permission::WRITE, &anon));
        assert!(hook.check("Device.Anything", Permission::WRITE, &authed(0)));
    }

    #[rstest]
    #[case("Device.Admin.Secret", "Device.Admin.*")]
    #[case("Device.Admin.", "Device.Admin.*")]
    fn prefix_pattern_matches(#[case] resource: &str, #[case] pattern: &str) {
        let hook = AuthorizationHook::new(vec![AclRule {
            pattern: pattern.to_owned(),
            required_permission: Permission::READ | Permission::WRITE,
            minimum_role: 0,
            require_auth: false,
        }]);
        assert!(hook.check(resource, Permission::READ, &AuthContext::default()));
    }

    #[test]
    fn rule_requiring_auth_denies_anonymous_callers() {
        let hook = AuthorizationHook::new(vec![AclRule {
            pattern: "Device.Admin.*".into(),
            required_permission: Permission::READ,
            minimum_role: 0,
            require_auth: true,
        }]);
        assert!(!hook.check("Device.Admin.Secret", Permission::READ, &AuthContext::default()));
        assert!(hook.check("Device.Admin.Secret", Permission::READ, &authed(0)));
    }

    #[test]
    fn rule_enforces_minimum_role() {
        let hook = AuthorizationHook::new(vec![AclRule {
            pattern: "Device.Admin.*".into(),
            required_permission: Permission::READ,
            minimum_role: 5,
            require_auth: true,
        }]);
        assert!(!hook.check("Device.Admin.Secret", Permission::READ, &authed(1)));
        assert!(hook.check("Device.Admin.Secret", Permission::READ, &authed(5)));
    }

    #[test]
    fn rule_denies_permission_outside_its_granted_mask() {
        let hook = AuthorizationHook::new(vec![AclRule {
            pattern: "Device.ReadOnly.*".into(),
            required_permission: Permission::READ,
            minimum_role: 0,
            require_auth: false,
        }]);
        assert!(hook.check("Device.ReadOnly.X", Permission::READ, &AuthContext::default()));
        assert!(!hook.check("Device.ReadOnly.X", Permission::WRITE, &AuthContext::default()));
    }

    #[test]
    fn first_matching_rule_wins() {
        let hook = AuthorizationHook::new(vec![
            AclRule {
                pattern: "Device.WiFi.*".into(),
                required_permission: Permission::READ,
                minimum_role: 0,
                require_auth: false,
            },
            AclRule {
                pattern: "Device.WiFi.Radio.*".into(),
                required_permission: Permission::READ | Permission::WRITE,
                minimum_role: 0,
                require_auth: false,
            },
        ]);
        // the first, broader rule wins even though the second would also match
        // and would have granted WRITE.
        assert!(!hook.check("Device.WiFi.Radio.1.Enable", Permission::WRITE, &AuthContext::default()));
    }
}
