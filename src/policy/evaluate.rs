use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::canonical::{
    KIND_CATALOGS, KIND_NAMESPACES, KIND_SKILLSETS, KIND_VARIANTS, KIND_VIEWS, KINDS,
    RESOURCE_SCHEME, canonicalize_view, resolve_target_resource,
};
use super::types::{Action, Intent, Rule, Rules, Scope, Target, ViewDefinition};
use crate::error::{Error, Result};

/// Outcome of one action against one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionDecision {
    pub allowed: bool,
    pub matched_allow: Vec<Rule>,
    pub matched_deny: Vec<Rule>,
}

/// Outcome of a request: the first allowed action wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub resource: String,
    /// Actions evaluated, in order, up to and including the first allowed one.
    pub actions: Vec<Action>,
    pub allowed: bool,
    pub matched_allow: Vec<Rule>,
    pub matched_deny: Vec<Rule>,
}

impl Target {
    /// Segment-wise match against a canonical resource. `*` is only honored as the
    /// last segment, where it also covers any deeper remainder.
    #[must_use]
    pub fn matches(&self, resource: &str) -> bool {
        let pattern = self.as_str();
        if pattern.is_empty() || resource.is_empty() {
            return false;
        }

        let rule: Vec<&str> = pattern.split('/').collect();
        let actual: Vec<&str> = resource.split('/').collect();
        if rule.len() > actual.len() {
            return false;
        }
        if rule.len() < actual.len() && rule.last() != Some(&"*") {
            return false;
        }

        let last = rule.len() - 1;
        rule.iter().zip(&actual).enumerate().all(|(i, (r, a))| {
            if *r == "*" {
                i == last
            } else {
                r == a
            }
        })
    }

    /// Whether `resource` equals this target or sits below it.
    fn covers(&self, resource: &str) -> bool {
        let prefix = self.as_str();
        resource == prefix
            || resource
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
            || self.matches(resource)
    }
}

// Admin grants attach to a `<kind>/<name>` target, optionally followed by `/*`,
// or to `<kind>/*`.
fn admin_target_of_kind(kind: &str, segments: &[&str]) -> bool {
    let n = segments.len();
    if n < 2 {
        return false;
    }
    if segments[n - 1] == "*" && segments[n - 2] == kind {
        return true;
    }
    if segments[n - 1] == "*" && n > 3 && segments[n - 3] == kind {
        return true;
    }
    segments[n - 2] == kind
}

impl Rules {
    fn admin_match(&self, resource: &str) -> Option<&Rule> {
        self.iter()
            .filter(|rule| rule.intent == Intent::Allow)
            .find(|rule| {
                let admin: Vec<&Action> = rule.actions.iter().filter(|a| a.is_admin()).collect();
                if admin.is_empty() {
                    return false;
                }
                rule.targets.iter().any(|target| {
                    let segments: Vec<&str> = target.as_str().split('/').collect();
                    let grants = admin.iter().any(|action| match action.as_str() {
                        Action::CATALOG_ADMIN => admin_target_of_kind(KIND_CATALOGS, &segments),
                        Action::VARIANT_ADMIN => admin_target_of_kind(KIND_VARIANTS, &segments),
                        Action::NAMESPACE_ADMIN => {
                            admin_target_of_kind(KIND_NAMESPACES, &segments)
                        }
                        _ => false,
                    });
                    grants && target.covers(resource)
                })
            })
    }

    /// Evaluates one action against a canonical resource. Rules must already be in
    /// canonical form.
    ///
    /// Any matching Deny rule denies. Otherwise the action is allowed by a matching
    /// Allow rule, by an admin grant over the resource, or by being `allow`.
    #[must_use]
    pub fn evaluate(&self, action: &str, resource: &str) -> ActionDecision {
        let mut decision = ActionDecision {
            allowed: action == Action::ALLOW,
            ..ActionDecision::default()
        };

        if let Some(rule) = self.admin_match(resource) {
            decision.allowed = true;
            decision.matched_allow.push(rule.clone());
        }

        let resource_pattern = Target::new(resource);
        for rule in self.iter().filter(|rule| rule.names(action)) {
            for target in &rule.targets {
                match rule.intent {
                    Intent::Allow if target.matches(resource) => {
                        decision.allowed = true;
                        decision.matched_allow.push(rule.clone());
                    }
                    // A request that covers a denied sub-tree is denied too.
                    Intent::Deny
                        if target.matches(resource)
                            || resource_pattern.matches(target.as_str()) =>
                    {
                        decision.matched_deny.push(rule.clone());
                    }
                    _ => {}
                }
            }
        }

        if !decision.matched_deny.is_empty() {
            decision.allowed = false;
        }
        decision
    }

    #[must_use]
    pub fn is_action_allowed(&self, action: &str, resource: &str) -> bool {
        self.evaluate(action, resource).allowed
    }

    /// Whether every action this rule set allows is also allowed by `other`.
    /// Only Allow rules are compared.
    #[must_use]
    pub fn is_subset_of(&self, other: &Rules) -> bool {
        self.iter()
            .filter(|rule| rule.intent == Intent::Allow)
            .all(|rule| {
                rule.actions.iter().all(|action| {
                    rule.targets
                        .iter()
                        .all(|target| other.is_action_allowed(action.as_str(), target.as_str()))
                })
            })
    }
}

/// Evaluates `actions` in order against `resource`, stopping at the first allowed one.
///
/// `scope` is the routing scope the resource path is relative to.
pub fn evaluate_request(
    view: &ViewDefinition,
    scope: &Scope,
    actions: &[Action],
    resource: &str,
) -> Result<Decision> {
    if actions.is_empty() {
        return Err(Error::InvalidRequest("no actions to evaluate".to_string()));
    }
    let resource = resolve_target_resource(scope, resource)?;
    let view = canonicalize_view(view);

    let mut decision = Decision {
        resource,
        actions: Vec::new(),
        allowed: false,
        matched_allow: Vec::new(),
        matched_deny: Vec::new(),
    };
    for action in actions {
        let outcome = view.rules.evaluate(action.as_str(), &decision.resource);
        decision.actions.push(action.clone());
        decision.matched_allow.extend(outcome.matched_allow);
        decision.matched_deny.extend(outcome.matched_deny);
        if outcome.allowed {
            decision.allowed = true;
            break;
        }
    }
    Ok(decision)
}

/// A derived view must keep its parent's scope and may only narrow its rules.
pub fn validate_derived_view(parent: &ViewDefinition, child: &ViewDefinition) -> Result<()> {
    if parent.scope != child.scope {
        return Err(Error::invalid_input(
            "derived view scope must match parent view scope",
        ));
    }
    let parent = canonicalize_view(parent);
    let child = canonicalize_view(child);
    if !child.rules.is_subset_of(&parent.rules) {
        return Err(Error::invalid_input(
            "derived view rules must be a subset of parent view rules",
        ));
    }
    Ok(())
}

static SEGMENT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").ok());

fn is_valid_segment(segment: &str) -> bool {
    SEGMENT.as_ref().is_some_and(|re| re.is_match(segment))
}

/// Checks a `res://<kind>/<path>` target: known kind, no empty segments, `*` last.
pub fn validate_target(target: &str) -> Result<()> {
    let Some(rest) = target.strip_prefix(RESOURCE_SCHEME) else {
        return Err(Error::invalid_input(format!(
            "invalid resource URI '{target}': must start with {RESOURCE_SCHEME}"
        )));
    };
    if rest.is_empty() || rest == "*" {
        return Ok(());
    }

    let (kind, path) = match rest.split_once('/') {
        Some((kind, path)) => (kind, Some(path)),
        None => (rest, None),
    };
    if !KINDS.contains(&kind) {
        return Err(Error::invalid_input(format!(
            "invalid resource URI '{target}': unknown resource kind '{kind}'"
        )));
    }

    let Some(path) = path else {
        return Ok(());
    };
    let path = path.strip_suffix('/').unwrap_or(path);
    let segments: Vec<&str> = path.split('/').collect();
    for (i, segment) in segments.iter().enumerate() {
        if *segment == "*" {
            if i != segments.len() - 1 {
                return Err(Error::invalid_input(format!(
                    "invalid resource URI '{target}': wildcard is only allowed as the last segment"
                )));
            }
            continue;
        }
        if !is_valid_segment(segment) {
            return Err(Error::invalid_input(format!(
                "invalid resource URI '{target}': invalid segment '{segment}'"
            )));
        }
    }
    Ok(())
}

pub fn validate_view_definition(view: &ViewDefinition) -> Result<()> {
    for (name, value) in [
        ("catalog", &view.scope.catalog),
        ("variant", &view.scope.variant),
        ("namespace", &view.scope.namespace),
    ] {
        if !value.is_empty() && !is_valid_segment(value) {
            return Err(Error::invalid_input(format!("invalid {name} '{value}' in scope")));
        }
    }

    for rule in view.rules.iter() {
        if rule.actions.is_empty() {
            return Err(Error::invalid_input("rule must name at least one action"));
        }
        if let Some(action) = rule.actions.iter().find(|a| !a.is_valid()) {
            return Err(Error::invalid_input(format!("invalid action '{action}'")));
        }
        for target in &rule.targets {
            validate_target(target.as_str())?;
        }
    }
    Ok(())
}

/// Whether `view` may adopt the view labelled `label` in `catalog`.
pub fn can_adopt_view(view: &ViewDefinition, catalog: &str, label: &str) -> Result<bool> {
    if catalog.is_empty() {
        return Err(Error::InvalidRequest("unable to resolve catalog".to_string()));
    }
    let resource = resolve_target_resource(&Scope::catalog(catalog), &format!("/{KIND_VIEWS}/{label}"))?;
    Ok(canonicalize_view(view)
        .rules
        .is_action_allowed(Action::CATALOG_ADOPT_VIEW, &resource))
}

/// Whether `view` may run the skillset at `path` within its own scope.
pub fn can_use_skillset(view: &ViewDefinition, path: &str) -> Result<bool> {
    let path = path.trim_start_matches('/');
    let resource = resolve_target_resource(&view.scope, &format!("/{KIND_SKILLSETS}/{path}"))?;
    Ok(canonicalize_view(view)
        .rules
        .is_action_allowed(Action::SKILLSET_USE, &resource))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical(view: &ViewDefinition) -> Rules {
        canonicalize_view(view).rules
    }

    #[test]
    fn test_target_matching() {
        let t = Target::from("res://catalogs/acme/skillsets/tools/*");
        assert!(t.matches("res://catalogs/acme/skillsets/tools/k8s"));
        assert!(t.matches("res://catalogs/acme/skillsets/tools/k8s/deep"));
        assert!(!t.matches("res://catalogs/acme/skillsets/tools"));
        assert!(!t.matches("res://catalogs/acme/skillsets/other/k8s"));

        let exact = Target::from("res://catalogs/acme/skillsets/tools");
        assert!(exact.matches("res://catalogs/acme/skillsets/tools"));
        assert!(!exact.matches("res://catalogs/acme/skillsets/tools/k8s"));

        let inner = Target::from("res://catalogs/*/skillsets");
        assert!(!inner.matches("res://catalogs/acme/skillsets"));
        assert!(!Target::from("").matches("res://x"));
    }

    #[test]
    fn test_default_admin_view_allows_everything_in_catalog() {
        let rules = canonical(&ViewDefinition::catalog_admin("acme"));
        for action in [Action::RESOURCE_READ, Action::SKILLSET_USE, "kubernetes.pods.list"] {
            assert!(rules.is_action_allowed(
                action,
                "res://catalogs/acme/variants/prod/resources/db/creds"
            ));
        }
        assert!(rules.is_action_allowed(Action::VIEW_ADMIN, "res://catalogs/acme/views/v1"));
        assert!(!rules.is_action_allowed(Action::RESOURCE_READ, "res://catalogs/acme2/variants/x"));
        assert!(!rules.is_action_allowed(Action::RESOURCE_READ, "res://catalogs/other"));
    }

    #[test]
    fn test_variant_admin_is_limited_to_its_variant() {
        let view = ViewDefinition::new(
            Scope::catalog("acme"),
            vec![Rule::allow([Action::VARIANT_ADMIN], ["res://variants/dev"])],
        );
        let rules = canonical(&view);
        assert!(rules.is_action_allowed(
            Action::SKILLSET_EDIT,
            "res://catalogs/acme/variants/dev/skillsets/a"
        ));
        assert!(!rules.is_action_allowed(
            Action::SKILLSET_EDIT,
            "res://catalogs/acme/variants/prod/skillsets/a"
        ));
    }

    #[test]
    fn test_deny_overrides_admin_and_allow() {
        let view = ViewDefinition::new(
            Scope::catalog("acme"),
            vec![
                Rule::allow([Action::CATALOG_ADMIN], Vec::<Target>::new()),
                Rule::allow([Action::RESOURCE_READ], ["res://resources/*"]),
                Rule::deny([Action::RESOURCE_READ], ["res://resources/secrets/*"]),
            ],
        );
        let rules = canonical(&view);

        let denied = rules.evaluate(Action::RESOURCE_READ, "res://catalogs/acme/resources/secrets/db");
        assert!(!denied.allowed);
        assert_eq!(denied.matched_deny.len(), 1);
        assert!(!denied.matched_allow.is_empty());

        assert!(rules.is_action_allowed(Action::RESOURCE_READ, "res://catalogs/acme/resources/public/x"));
        // Other actions on the denied path are still covered by the admin grant.
        assert!(rules.is_action_allowed(Action::RESOURCE_EDIT, "res://catalogs/acme/resources/secrets/db"));
    }

    #[test]
    fn test_broad_request_over_denied_subtree_is_denied() {
        let view = ViewDefinition::new(
            Scope::catalog("acme"),
            vec![
                Rule::allow([Action::RESOURCE_LIST], ["res://resources/*"]),
                Rule::deny([Action::RESOURCE_LIST], ["res://resources/secrets"]),
            ],
        );
        let rules = canonical(&view);
        assert!(!rules.is_action_allowed(Action::RESOURCE_LIST, "res://catalogs/acme/resources/*"));
    }

    #[test]
    fn test_allow_pseudo_action() {
        let rules = canonical(&ViewDefinition::new(Scope::catalog("acme"), vec![]));
        assert!(rules.is_action_allowed(Action::ALLOW, "res://catalogs/acme/anything"));

        let denied = canonical(&ViewDefinition::new(
            Scope::catalog("acme"),
            vec![Rule::deny([Action::ALLOW], ["res://*"])],
        ));
        assert!(!denied.is_action_allowed(Action::ALLOW, "res://catalogs/acme/anything"));
    }

    #[test]
    fn test_evaluate_request_stops_at_first_allowed_action() {
        let view = ViewDefinition::new(
            Scope::catalog("acme").with_variant("dev"),
            vec![Rule::allow([Action::SKILLSET_READ], ["res://skillsets/*"])],
        );
        let decision = evaluate_request(
            &view,
            &Scope::catalog("acme").with_variant("dev"),
            &[
                Action::from(Action::SKILLSET_EDIT),
                Action::from(Action::SKILLSET_READ),
                Action::from(Action::SKILLSET_DELETE),
            ],
            "/skillsets/tools",
        )
        .unwrap();

        assert!(decision.allowed);
        assert_eq!(decision.resource, "res://catalogs/acme/variants/dev/skillsets/tools");
        assert_eq!(decision.actions.len(), 2);
        assert_eq!(decision.matched_allow.len(), 1);
    }

    #[test]
    fn test_evaluate_request_rejects_empty_actions() {
        let view = ViewDefinition::catalog_admin("acme");
        assert!(matches!(
            evaluate_request(&view, &Scope::catalog("acme"), &[], "/skillsets/x"),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_subset_and_derived_views() {
        let parent = ViewDefinition::new(
            Scope::catalog("acme"),
            vec![Rule::allow([Action::SKILLSET_USE, Action::SKILLSET_READ], ["res://skillsets/*"])],
        );
        let narrower = ViewDefinition::new(
            Scope::catalog("acme"),
            vec![Rule::allow([Action::SKILLSET_USE], ["res://skillsets/tools/k8s"])],
        );
        let wider = ViewDefinition::new(
            Scope::catalog("acme"),
            vec![Rule::allow([Action::SKILLSET_EDIT], ["res://skillsets/tools/k8s"])],
        );

        assert!(validate_derived_view(&parent, &narrower).is_ok());
        assert!(matches!(
            validate_derived_view(&parent, &wider),
            Err(Error::InvalidInput(_))
        ));
        assert!(validate_derived_view(&parent, &ViewDefinition::catalog_admin("other")).is_err());
    }

    #[test]
    fn test_validate_view_definition() {
        let ok = ViewDefinition::new(
            Scope::catalog("acme"),
            vec![
                Rule::allow(["kubernetes.pods.list"], ["res://skillsets/tools/*"]),
                Rule::deny([Action::RESOURCE_READ], ["res://resources/secrets"]),
            ],
        );
        assert!(validate_view_definition(&ok).is_ok());

        let bad_action = ViewDefinition::new(
            Scope::catalog("acme"),
            vec![Rule::allow(["system.catalog.destroy"], ["res://skillsets"])],
        );
        assert!(validate_view_definition(&bad_action).is_err());

        for target in [
            "skillsets/x",
            "res://widgets/x",
            "res://skillsets/*/x",
            "res://skillsets//x",
            "res://skillsets/a b",
        ] {
            assert!(validate_target(target).is_err(), "{target} should be rejected");
        }
        for target in ["res://", "res://*", "res://skillsets", "res://skillsets/tools/*"] {
            assert!(validate_target(target).is_ok(), "{target} should be accepted");
        }
    }

    #[test]
    fn test_can_adopt_view_and_use_skillset() {
        let view = ViewDefinition::new(
            Scope::catalog("acme").with_variant("dev"),
            vec![
                Rule::allow([Action::CATALOG_ADOPT_VIEW], ["res://views/dev-*"]),
                Rule::allow([Action::CATALOG_ADOPT_VIEW], ["res://views/readonly"]),
                Rule::allow([Action::SKILLSET_USE], ["res://skillsets/tools/*"]),
            ],
        );
        assert!(can_adopt_view(&view, "acme", "readonly").unwrap());
        assert!(!can_adopt_view(&view, "acme", "prod-view").unwrap());
        assert!(can_adopt_view(&view, "", "readonly").is_err());

        assert!(can_use_skillset(&view, "tools/k8s").unwrap());
        assert!(!can_use_skillset(&view, "/admin/k8s").unwrap());
    }
}
