//! Mode resolution and the policy boundary.
//!
//! The effective mode of a decision is `log` (allow with a warning) or
//! `enforce` (deny). It is resolved through a precedence chain: an explicit
//! annotation on the object wins, then one on the object's namespace, then
//! whatever the configured [`Resolver`] produces, then the compile-time
//! default. The chain is a fold over ordered providers so adding a level
//! stays a local change.
//!
//! The [`Resolver`] trait is the seam for policy tooling: the core never
//! imports a concrete policy controller. [`StaticResolver`] answers with a
//! constant; [`RuleResolver`] evaluates resource rules, namespace selection,
//! and ordered mode overrides the way cluster-wide policy documents are
//! written.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::annotations;

/// Namespaces never tracked by rule-based policies.
pub const SYSTEM_NAMESPACES: &[&str] = &["kube-system", "kube-public", "kube-node-lease"];

/// Drift handling mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Allow the mutation and attach a warning.
    #[default]
    Log,
    /// Deny the mutation.
    Enforce,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Log => "log",
            Self::Enforce => "enforce",
        })
    }
}

impl FromStr for Mode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log" => Ok(Self::Log),
            "enforce" => Ok(Self::Enforce),
            _ => Err(()),
        }
    }
}

/// The resource coordinates of an admission, as seen by policy matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceContext {
    /// API group; empty for the core group.
    pub group: String,
    /// API version.
    pub version: String,
    /// Plural resource name, e.g. `replicasets`.
    pub resource: String,
    /// Namespace of the object; empty for cluster-scoped resources.
    pub namespace: String,
}

/// Policy boundary consumed by the core.
pub trait Resolver: Send + Sync {
    /// Resolves the mode for a resource, given the annotations of the object
    /// and of its namespace. Called only when no explicit mode annotation
    /// decided earlier in the precedence chain.
    fn resolve_mode(
        &self,
        ctx: &ResourceContext,
        object_annotations: &BTreeMap<String, String>,
        namespace_annotations: &BTreeMap<String, String>,
    ) -> Mode;

    /// Whether the resource is tracked at all.
    fn is_tracked(&self, ctx: &ResourceContext) -> bool;
}

/// A resolver answering with constants. The default tracks everything in
/// `log` mode.
#[derive(Debug, Clone, Copy)]
pub struct StaticResolver {
    mode: Mode,
    tracked: bool,
}

impl StaticResolver {
    /// Creates a resolver that tracks everything with the given mode.
    #[must_use]
    pub const fn new(mode: Mode) -> Self {
        Self {
            mode,
            tracked: true,
        }
    }

    /// Creates a resolver that tracks nothing.
    #[must_use]
    pub const fn untracked() -> Self {
        Self {
            mode: Mode::Log,
            tracked: false,
        }
    }
}

impl Default for StaticResolver {
    fn default() -> Self {
        Self::new(Mode::Log)
    }
}

impl Resolver for StaticResolver {
    fn resolve_mode(
        &self,
        _ctx: &ResourceContext,
        _object_annotations: &BTreeMap<String, String>,
        _namespace_annotations: &BTreeMap<String, String>,
    ) -> Mode {
        self.mode
    }

    fn is_tracked(&self, _ctx: &ResourceContext) -> bool {
        self.tracked
    }
}

/// Which resources a rule-based policy tracks within specific API groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRule {
    /// API groups this rule covers; `""` is the core group. No wildcard.
    pub api_groups: Vec<String>,
    /// Resources covered; `"*"` matches every resource in the group.
    pub resources: Vec<String>,
    /// Resources subtracted from a wildcard match.
    #[serde(default)]
    pub excluded: Vec<String>,
}

impl ResourceRule {
    fn matches(&self, group: &str, resource: &str) -> bool {
        if !self.api_groups.iter().any(|g| g == group) {
            return false;
        }
        if self.resources.iter().any(|r| r == "*") {
            return !self.excluded.iter().any(|e| e == resource);
        }
        self.resources.iter().any(|r| r == resource)
    }
}

/// Which namespaces a rule-based policy tracks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceRule {
    /// Explicit namespaces to include; empty means all non-system
    /// namespaces.
    #[serde(default)]
    pub names: Vec<String>,
    /// Namespaces always skipped, even when listed in `names`.
    #[serde(default)]
    pub excluded: Vec<String>,
}

impl NamespaceRule {
    fn matches(&self, namespace: &str) -> bool {
        if self.excluded.iter().any(|n| n == namespace) {
            return false;
        }
        if self.names.is_empty() {
            return !SYSTEM_NAMESPACES.contains(&namespace);
        }
        self.names.iter().any(|n| n == namespace)
    }
}

/// A fine-grained mode override. Overrides are evaluated in order; the
/// first whose filters all match wins. An empty filter list matches
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeOverride {
    /// Limit to these API groups.
    #[serde(default)]
    pub api_groups: Vec<String>,
    /// Limit to these resources.
    #[serde(default)]
    pub resources: Vec<String>,
    /// Limit to these namespaces.
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Mode for matching resources.
    #[serde(default)]
    pub mode: Mode,
}

impl ModeOverride {
    fn matches(&self, ctx: &ResourceContext) -> bool {
        let group_ok = self.api_groups.is_empty() || self.api_groups.iter().any(|g| *g == ctx.group);
        let resource_ok =
            self.resources.is_empty() || self.resources.iter().any(|r| *r == ctx.resource);
        let namespace_ok =
            self.namespaces.is_empty() || self.namespaces.iter().any(|n| *n == ctx.namespace);
        group_ok && resource_ok && namespace_ok
    }
}

/// Rule-based [`Resolver`] mirroring cluster-wide policy documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResolver {
    /// Tracked resources.
    pub resources: Vec<ResourceRule>,
    /// Tracked namespaces; `None` means all non-system namespaces.
    #[serde(default)]
    pub namespaces: Option<NamespaceRule>,
    /// Default mode for everything the rules track.
    #[serde(default)]
    pub mode: Mode,
    /// Ordered mode overrides, first match wins.
    #[serde(default)]
    pub overrides: Vec<ModeOverride>,
}

impl Resolver for RuleResolver {
    fn resolve_mode(
        &self,
        ctx: &ResourceContext,
        _object_annotations: &BTreeMap<String, String>,
        _namespace_annotations: &BTreeMap<String, String>,
    ) -> Mode {
        self.overrides
            .iter()
            .find(|o| o.matches(ctx))
            .map_or(self.mode, |o| o.mode)
    }

    fn is_tracked(&self, ctx: &ResourceContext) -> bool {
        let namespace_ok = match &self.namespaces {
            Some(rule) => rule.matches(&ctx.namespace),
            None => !SYSTEM_NAMESPACES.contains(&ctx.namespace.as_str()),
        };
        namespace_ok
            && self
                .resources
                .iter()
                .any(|r| r.matches(&ctx.group, &ctx.resource))
    }
}

fn annotation_mode(map: &BTreeMap<String, String>) -> Option<Mode> {
    map.get(annotations::MODE).and_then(|v| v.parse().ok())
}

/// Resolves the effective mode for a decision.
///
/// Precedence, first match wins: explicit mode annotation on the object,
/// explicit mode annotation on the object's namespace, the configured
/// resolver, the `log` default. Implemented as a fold over ordered
/// providers.
#[must_use]
pub fn effective_mode(
    resolver: &dyn Resolver,
    ctx: &ResourceContext,
    object_annotations: &BTreeMap<String, String>,
    namespace_annotations: &BTreeMap<String, String>,
) -> Mode {
    let providers: [&dyn Fn() -> Option<Mode>; 3] = [
        &|| annotation_mode(object_annotations),
        &|| annotation_mode(namespace_annotations),
        &|| Some(resolver.resolve_mode(ctx, object_annotations, namespace_annotations)),
    ];
    providers
        .iter()
        .find_map(|provider| provider())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(group: &str, resource: &str, namespace: &str) -> ResourceContext {
        ResourceContext {
            group: group.to_owned(),
            version: "v1".to_owned(),
            resource: resource.to_owned(),
            namespace: namespace.to_owned(),
        }
    }

    fn with_mode(mode: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("kausality.io/mode".to_owned(), mode.to_owned())])
    }

    #[test]
    fn mode_parses_and_displays() {
        assert_eq!("log".parse::<Mode>().unwrap(), Mode::Log);
        assert_eq!("enforce".parse::<Mode>().unwrap(), Mode::Enforce);
        assert!("block".parse::<Mode>().is_err());
        assert_eq!(Mode::Enforce.to_string(), "enforce");
    }

    #[test]
    fn object_annotation_wins() {
        let mode = effective_mode(
            &StaticResolver::new(Mode::Log),
            &ctx("apps", "replicasets", "prod"),
            &with_mode("enforce"),
            &with_mode("log"),
        );
        assert_eq!(mode, Mode::Enforce);
    }

    #[test]
    fn namespace_annotation_is_second() {
        let mode = effective_mode(
            &StaticResolver::new(Mode::Log),
            &ctx("apps", "replicasets", "prod"),
            &BTreeMap::new(),
            &with_mode("enforce"),
        );
        assert_eq!(mode, Mode::Enforce);
    }

    #[test]
    fn resolver_is_third() {
        let mode = effective_mode(
            &StaticResolver::new(Mode::Enforce),
            &ctx("apps", "replicasets", "prod"),
            &BTreeMap::new(),
            &BTreeMap::new(),
        );
        assert_eq!(mode, Mode::Enforce);
    }

    #[test]
    fn invalid_annotation_falls_through() {
        let mode = effective_mode(
            &StaticResolver::new(Mode::Log),
            &ctx("apps", "replicasets", "prod"),
            &with_mode("block"),
            &BTreeMap::new(),
        );
        assert_eq!(mode, Mode::Log);
    }

    #[test]
    fn static_resolver_tracking() {
        let ctx = ctx("apps", "replicasets", "prod");
        assert!(StaticResolver::default().is_tracked(&ctx));
        assert!(!StaticResolver::untracked().is_tracked(&ctx));
    }

    fn sample_rules() -> RuleResolver {
        RuleResolver {
            resources: vec![ResourceRule {
                api_groups: vec!["apps".to_owned()],
                resources: vec!["*".to_owned()],
                excluded: vec!["controllerrevisions".to_owned()],
            }],
            namespaces: None,
            mode: Mode::Log,
            overrides: vec![
                ModeOverride {
                    namespaces: vec!["prod".to_owned()],
                    mode: Mode::Enforce,
                    ..ModeOverride::default()
                },
                ModeOverride {
                    resources: vec!["replicasets".to_owned()],
                    mode: Mode::Log,
                    ..ModeOverride::default()
                },
            ],
        }
    }

    #[test]
    fn wildcard_resources_respect_exclusions() {
        let rules = sample_rules();
        assert!(rules.is_tracked(&ctx("apps", "deployments", "dev")));
        assert!(rules.is_tracked(&ctx("apps", "replicasets", "dev")));
        assert!(!rules.is_tracked(&ctx("apps", "controllerrevisions", "dev")));
        assert!(!rules.is_tracked(&ctx("batch", "jobs", "dev")));
    }

    #[test]
    fn system_namespaces_are_skipped_by_default() {
        let rules = sample_rules();
        assert!(!rules.is_tracked(&ctx("apps", "deployments", "kube-system")));
    }

    #[test]
    fn explicit_namespace_names_limit_tracking() {
        let mut rules = sample_rules();
        rules.namespaces = Some(NamespaceRule {
            names: vec!["prod".to_owned()],
            excluded: vec![],
        });
        assert!(rules.is_tracked(&ctx("apps", "deployments", "prod")));
        assert!(!rules.is_tracked(&ctx("apps", "deployments", "dev")));
    }

    #[test]
    fn namespace_exclusion_beats_inclusion() {
        let mut rules = sample_rules();
        rules.namespaces = Some(NamespaceRule {
            names: vec!["prod".to_owned()],
            excluded: vec!["prod".to_owned()],
        });
        assert!(!rules.is_tracked(&ctx("apps", "deployments", "prod")));
    }

    #[test]
    fn overrides_first_match_wins() {
        let rules = sample_rules();
        let annotations = BTreeMap::new();
        // prod namespace hits the first override even for replicasets.
        assert_eq!(
            rules.resolve_mode(&ctx("apps", "replicasets", "prod"), &annotations, &annotations),
            Mode::Enforce
        );
        // outside prod, the replicasets override applies.
        assert_eq!(
            rules.resolve_mode(&ctx("apps", "replicasets", "dev"), &annotations, &annotations),
            Mode::Log
        );
        // nothing matches: policy default.
        assert_eq!(
            rules.resolve_mode(&ctx("apps", "statefulsets", "dev"), &annotations, &annotations),
            Mode::Log
        );
    }

    #[test]
    fn rule_resolver_deserializes_from_policy_json() {
        let raw = r#"{
            "resources": [{"apiGroups": ["apps"], "resources": ["deployments"]}],
            "mode": "enforce",
            "overrides": [{"namespaces": ["dev"], "mode": "log"}]
        }"#;
        let rules: RuleResolver = serde_json::from_str(raw).unwrap();
        assert_eq!(rules.mode, Mode::Enforce);
        assert_eq!(rules.overrides.len(), 1);
        assert!(rules.is_tracked(&ctx("apps", "deployments", "prod")));
    }
}
