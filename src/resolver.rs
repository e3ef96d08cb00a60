use crate::{
    policy::{Group, Policy},
    rule::MatchKind,
};

/// Result of resolving a method name against a [`Resolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved<'a> {
    pub group: &'a str,
    pub policy: Option<&'a Policy>,
}

/// Ordered collection of policy groups. Immutable once constructed and
/// read without locking from every request.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    groups: Vec<Group>,
}

impl Resolver {
    /// Groups are consulted in the given order; on a full tie the earlier
    /// group wins.
    pub fn new(groups: impl IntoIterator<Item = Group>) -> Self {
        Self {
            groups: groups.into_iter().collect(),
        }
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Find the most specific group for `full_method`.
    ///
    /// Candidates are ranked by rule kind (exact, then prefix, then
    /// pattern) and then by match length. A later candidate only replaces
    /// the current best when it is strictly better, so ties resolve to the
    /// first registered group.
    pub fn resolve(&self, full_method: &str) -> Option<Resolved<'_>> {
        self.resolve_group(full_method).map(|group| Resolved {
            group: group.name(),
            policy: group.get_policy(),
        })
    }

    /// Like [`resolve`](Self::resolve), returning the winning group itself.
    pub fn resolve_group(&self, full_method: &str) -> Option<&Group> {
        let mut best: Option<(MatchKind, usize, &Group)> = None;

        for group in &self.groups {
            for rule in group.rules() {
                let Some(len) = rule.matches(full_method) else {
                    continue;
                };
                let kind = rule.kind();
                let better = match best {
                    None => true,
                    Some((best_kind, best_len, _)) => {
                        kind < best_kind || (kind == best_kind && len > best_len)
                    }
                };
                if better {
                    best = Some((kind, len, group));
                }
            }
        }

        best.map(|(_, _, group)| group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::RateLimitRule;
    use std::time::Duration;

    fn timeout(secs: u64) -> Policy {
        Policy {
            timeout: Some(Duration::from_secs(secs)),
            ..Default::default()
        }
    }

    #[test]
    fn test_exact_match() {
        let resolver = Resolver::new([Group::new("admin")
            .exact("/admin.Service/Delete")
            .policy(Policy {
                auth_required: true,
                ..Default::default()
            })]);

        let resolved = resolver.resolve("/admin.Service/Delete").unwrap();
        assert_eq!(resolved.group, "admin");
        assert!(resolved.policy.unwrap().auth_required);
    }

    #[test]
    fn test_prefix_match() {
        let resolver = Resolver::new([Group::new("public").prefix("/public.").policy(timeout(5))]);

        let resolved = resolver.resolve("/public.Service/List").unwrap();
        assert_eq!(resolved.group, "public");
        assert_eq!(resolved.policy.unwrap().timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_pattern_match() {
        let resolver = Resolver::new([Group::new("health")
            .pattern(r"/grpc\.health\.")
            .unwrap()
            .policy(Policy::default())]);

        assert!(resolver.resolve("/grpc.health.v1.Health/Check").is_some());
    }

    #[test]
    fn test_no_match() {
        let resolver = Resolver::new([Group::new("admin").exact("/admin.Service/Delete")]);
        assert!(resolver.resolve("/other.Service/Get").is_none());
        assert!(Resolver::default().resolve("/other.Service/Get").is_none());
    }

    #[test]
    fn test_group_without_policy_still_resolves() {
        let resolver = Resolver::new([Group::new("bare").prefix("/svc.")]);
        let resolved = resolver.resolve("/svc.Service/Get").unwrap();
        assert_eq!(resolved.group, "bare");
        assert!(resolved.policy.is_none());
    }

    #[test]
    fn test_exact_beats_prefix_in_either_order() {
        let prefix = Group::new("prefix-group").prefix("/svc.Service/").policy(timeout(1));
        let exact = Group::new("exact-group").exact("/svc.Service/Get").policy(timeout(2));

        for resolver in [
            Resolver::new([prefix.clone(), exact.clone()]),
            Resolver::new([exact.clone(), prefix.clone()]),
        ] {
            let resolved = resolver.resolve("/svc.Service/Get").unwrap();
            assert_eq!(resolved.group, "exact-group");
            assert_eq!(resolved.policy.unwrap().timeout, Some(Duration::from_secs(2)));
        }
    }

    #[test]
    fn test_prefix_beats_pattern_in_either_order() {
        // The pattern span is longer than the prefix; kind still wins.
        let pattern = Group::new("pattern-group").pattern(r"/svc\.Service/\w+").unwrap();
        let prefix = Group::new("prefix-group").prefix("/svc.");

        for resolver in [
            Resolver::new([pattern.clone(), prefix.clone()]),
            Resolver::new([prefix.clone(), pattern.clone()]),
        ] {
            assert_eq!(resolver.resolve("/svc.Service/List").unwrap().group, "prefix-group");
        }
    }

    #[test]
    fn test_longer_prefix_wins() {
        let resolver = Resolver::new([
            Group::new("short").prefix("/svc.").policy(timeout(1)),
            Group::new("long").prefix("/svc.Service/").policy(timeout(2)),
        ]);
        assert_eq!(resolver.resolve("/svc.Service/Get").unwrap().group, "long");

        let reversed = Resolver::new([
            Group::new("long").prefix("/svc.Service/"),
            Group::new("short").prefix("/svc."),
        ]);
        assert_eq!(reversed.resolve("/svc.Service/Get").unwrap().group, "long");
    }

    #[test]
    fn test_longer_pattern_span_wins() {
        let resolver = Resolver::new([
            Group::new("narrow").pattern("Get").unwrap(),
            Group::new("wide").pattern(r"Service/Get").unwrap(),
        ]);
        assert_eq!(resolver.resolve("/svc.Service/Get").unwrap().group, "wide");
    }

    #[test]
    fn test_tie_keeps_first_registered_group() {
        let resolver = Resolver::new([
            Group::new("first").exact("/svc.Service/Get").policy(timeout(1)),
            Group::new("second").exact("/svc.Service/Get").policy(timeout(2)),
        ]);

        for _ in 0..100 {
            let resolved = resolver.resolve("/svc.Service/Get").unwrap();
            assert_eq!(resolved.group, "first");
            assert_eq!(resolved.policy.unwrap().timeout, Some(Duration::from_secs(1)));
        }
    }

    #[test]
    fn test_multiple_rules_in_group() {
        let resolver = Resolver::new([Group::new("mixed")
            .exact("/svc.A/One")
            .prefix("/svc.B/")
            .pattern(r"/svc\.C/")
            .unwrap()]);

        for method in ["/svc.A/One", "/svc.B/Two", "/svc.C/Three"] {
            assert_eq!(resolver.resolve(method).unwrap().group, "mixed", "{method}");
        }
    }

    #[test]
    fn test_rate_limit_policy() {
        let resolver = Resolver::new([Group::new("limited")
            .exact("/api.Service/Heavy")
            .policy(Policy {
                rate_limit: Some(RateLimitRule::per_minute(100)),
                ..Default::default()
            })]);

        let resolved = resolver.resolve("/api.Service/Heavy").unwrap();
        let rule = resolved.policy.unwrap().rate_limit.unwrap();
        assert_eq!(rule.rate, 100);
        assert_eq!(rule.window, Duration::from_secs(60));
    }

    #[test]
    fn test_resolve_group_shares_name() {
        let resolver = Resolver::new([Group::new("admin").prefix("/admin.")]);

        let first = resolver.resolve_group("/admin.Console/Reset").unwrap();
        let second = resolver.resolve_group("/admin.Console/List").unwrap();
        assert_eq!(first.name(), "admin");
        assert!(std::sync::Arc::ptr_eq(first.shared_name(), second.shared_name()));
        assert!(resolver.resolve_group("/svc.Service/Get").is_none());
    }
}
