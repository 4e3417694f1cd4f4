//! Resource names are compared in one canonical form:
//! `res://catalogs/<c>/variants/<v>/namespaces/<n>/<kind>/<path>`.
//!
//! Both rule targets and request paths are rewritten relative to a [`Scope`]
//! before matching, so a view written as `res://skillsets/tools/*` under scope
//! `{catalog: acme, variant: dev}` reads `res://catalogs/acme/variants/dev/skillsets/tools/*`.

use super::types::{Rule, Scope, Target, ViewDefinition};
use crate::error::{Error, Result};

pub const RESOURCE_SCHEME: &str = "res://";

pub const KIND_CATALOGS: &str = "catalogs";
pub const KIND_VARIANTS: &str = "variants";
pub const KIND_NAMESPACES: &str = "namespaces";
pub const KIND_VIEWS: &str = "views";
pub const KIND_RESOURCES: &str = "resources";
pub const KIND_SKILLSETS: &str = "skillsets";

pub const KINDS: &[&str] = &[
    KIND_CATALOGS,
    KIND_VARIANTS,
    KIND_NAMESPACES,
    KIND_VIEWS,
    KIND_RESOURCES,
    KIND_SKILLSETS,
];

/// Kinds that live directly under a catalog, outside any variant.
#[must_use]
pub fn is_catalog_level_kind(kind: &str) -> bool {
    kind == KIND_VIEWS
}

/// First segment of a resource path.
#[must_use]
pub fn resource_kind(path: &str) -> &str {
    path.trim_matches('/').split('/').next().unwrap_or_default()
}

fn normalize_resource_path(path: &str) -> String {
    const DEFINITION: &str = "/resources/definition";
    if resource_kind(path) == KIND_RESOURCES {
        if let Some(rest) = path.strip_prefix(DEFINITION) {
            return format!("/{KIND_RESOURCES}{rest}");
        }
    }
    path.to_string()
}

/// Lexically cleans a relative path: drops empty and `.` segments and resolves
/// `..` against the preceding segment. A `..` with nothing left to pop is dropped.
fn clean(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            s => out.push(s),
        }
    }
    out.join("/")
}

/// Rewrites a target relative to `scope`.
#[must_use]
pub fn canonicalize_target(scope: &Scope, target: &str) -> String {
    let s = target.strip_prefix(RESOURCE_SCHEME).unwrap_or(target);
    let s = s.strip_prefix('/').unwrap_or(s);
    let catalog_level = is_catalog_level_kind(resource_kind(s));

    let mut full = String::new();
    if !scope.catalog.is_empty() {
        full.push_str(&format!("{KIND_CATALOGS}/{}/", scope.catalog));
    }
    if !scope.variant.is_empty() && !catalog_level {
        full.push_str(&format!("{KIND_VARIANTS}/{}/", scope.variant));
    }
    if !scope.namespace.is_empty() && !catalog_level {
        full.push_str(&format!("{KIND_NAMESPACES}/{}/", scope.namespace));
    }
    full.push_str(s);

    format!("{RESOURCE_SCHEME}{}", clean(&full))
}

/// Copy of `view` with every target in canonical form. A rule without targets
/// covers the whole scope.
#[must_use]
pub fn canonicalize_view(view: &ViewDefinition) -> ViewDefinition {
    let rules = view
        .rules
        .iter()
        .map(|rule| {
            let targets: Vec<Target> = if rule.targets.is_empty() {
                vec![Target::new(canonicalize_target(&view.scope, ""))]
            } else {
                rule.targets
                    .iter()
                    .map(|t| Target::new(canonicalize_target(&view.scope, t.as_str())))
                    .collect()
            };
            Rule {
                intent: rule.intent,
                actions: dedup(&rule.actions),
                targets: dedup(&targets),
            }
        })
        .collect();

    ViewDefinition {
        scope: view.scope.clone(),
        rules,
    }
}

fn dedup<T: Clone + PartialEq>(items: &[T]) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

fn check_scope_component(name: &str, value: &str) -> Result<()> {
    if value.contains('/') || value == "." || value == ".." {
        return Err(Error::InvalidRequest(format!("malformed {name} in scope")));
    }
    Ok(())
}

/// Resolves the resource a request addresses, relative to its routing scope.
///
/// Request paths may not climb out of their scope with `..`.
pub fn resolve_target_resource(scope: &Scope, resource: &str) -> Result<String> {
    check_scope_component("catalog", &scope.catalog)?;
    check_scope_component("variant", &scope.variant)?;
    check_scope_component("namespace", &scope.namespace)?;

    let path = resource.strip_prefix(RESOURCE_SCHEME).unwrap_or(resource);
    if path.trim_matches('/').is_empty() {
        return Err(Error::InvalidRequest("resource path is empty".to_string()));
    }
    if path.split('/').any(|s| s == "..") {
        return Err(Error::InvalidRequest(format!(
            "resource path '{resource}' escapes its scope"
        )));
    }

    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    Ok(canonicalize_target(scope, &normalize_resource_path(&path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::types::Rule;

    fn dev() -> Scope {
        Scope::catalog("acme").with_variant("dev")
    }

    #[test]
    fn test_canonicalize_target_prefixes_scope() {
        assert_eq!(
            canonicalize_target(&dev(), "res://skillsets/tools/k8s"),
            "res://catalogs/acme/variants/dev/skillsets/tools/k8s"
        );
        assert_eq!(
            canonicalize_target(&dev().with_namespace("teamA"), "/resources/db/"),
            "res://catalogs/acme/variants/dev/namespaces/teamA/resources/db"
        );
        assert_eq!(canonicalize_target(&Scope::default(), ""), "res://");
        assert_eq!(canonicalize_target(&dev(), ""), "res://catalogs/acme/variants/dev");
    }

    #[test]
    fn test_views_are_catalog_level() {
        assert_eq!(
            canonicalize_target(&dev().with_namespace("teamA"), "res://views/dev-view"),
            "res://catalogs/acme/views/dev-view"
        );
    }

    #[test]
    fn test_canonicalize_cleans_path() {
        assert_eq!(
            canonicalize_target(&Scope::catalog("acme"), "res://skillsets//a/./b/../c"),
            "res://catalogs/acme/skillsets/a/c"
        );
    }

    #[test]
    fn test_resolve_rewrites_resource_definition() {
        assert_eq!(
            resolve_target_resource(&dev(), "/resources/definition/db/creds").unwrap(),
            "res://catalogs/acme/variants/dev/resources/db/creds"
        );
        assert_eq!(
            resolve_target_resource(&dev(), "/skillsets/definition/x").unwrap(),
            "res://catalogs/acme/variants/dev/skillsets/definition/x"
        );
    }

    #[test]
    fn test_resolve_rejects_malformed_input() {
        assert!(matches!(
            resolve_target_resource(&dev(), ""),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            resolve_target_resource(&dev(), "/skillsets/../../../catalogs/other"),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            resolve_target_resource(&Scope::catalog("a/b"), "/skillsets/x"),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_canonicalize_view_fills_empty_targets() {
        let view = ViewDefinition::new(
            Scope::catalog("acme"),
            vec![Rule::allow(["a", "a", "b"], Vec::<Target>::new())],
        );
        let canonical = canonicalize_view(&view);
        assert_eq!(canonical.rules[0].targets, vec![Target::from("res://catalogs/acme")]);
        assert_eq!(canonical.rules[0].actions.len(), 2);
    }
}
