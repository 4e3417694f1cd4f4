use std::fmt;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intent {
    Allow,
    Deny,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Allow => f.write_str("Allow"),
            Intent::Deny => f.write_str("Deny"),
        }
    }
}

/// A permission name. `system.*` names are reserved for the built-in set below;
/// every other name is application-defined.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(String);

impl Action {
    /// Granted unless a Deny rule names it.
    pub const ALLOW: &'static str = "allow";

    pub const CATALOG_ADMIN: &'static str = "system.catalog.admin";
    pub const CATALOG_LIST: &'static str = "system.catalog.list";
    pub const CATALOG_ADOPT_VIEW: &'static str = "system.catalog.adoptView";
    pub const CATALOG_CREATE_VIEW: &'static str = "system.catalog.createView";
    pub const VIEW_ADMIN: &'static str = "system.view.admin";
    pub const VARIANT_ADMIN: &'static str = "system.variant.admin";
    pub const VARIANT_CLONE: &'static str = "system.variant.clone";
    pub const VARIANT_LIST: &'static str = "system.variant.list";
    pub const NAMESPACE_CREATE: &'static str = "system.namespace.create";
    pub const NAMESPACE_LIST: &'static str = "system.namespace.list";
    pub const NAMESPACE_ADMIN: &'static str = "system.namespace.admin";
    pub const RESOURCE_CREATE: &'static str = "system.resource.create";
    pub const RESOURCE_READ: &'static str = "system.resource.read";
    pub const RESOURCE_EDIT: &'static str = "system.resource.edit";
    pub const RESOURCE_DELETE: &'static str = "system.resource.delete";
    pub const RESOURCE_GET: &'static str = "system.resource.get";
    pub const RESOURCE_PUT: &'static str = "system.resource.put";
    pub const RESOURCE_LIST: &'static str = "system.resource.list";
    pub const SKILLSET_ADMIN: &'static str = "system.skillset.admin";
    pub const SKILLSET_CREATE: &'static str = "system.skillset.create";
    pub const SKILLSET_READ: &'static str = "system.skillset.read";
    pub const SKILLSET_EDIT: &'static str = "system.skillset.edit";
    pub const SKILLSET_DELETE: &'static str = "system.skillset.delete";
    pub const SKILLSET_LIST: &'static str = "system.skillset.list";
    pub const SKILLSET_USE: &'static str = "system.skillset.use";
    pub const TANGENT_CREATE: &'static str = "system.tangent.create";
    pub const TANGENT_DELETE: &'static str = "system.tangent.delete";

    /// Built-in actions a view may name.
    pub const SYSTEM: &'static [&'static str] = &[
        Self::CATALOG_ADMIN,
        Self::CATALOG_LIST,
        Self::CATALOG_ADOPT_VIEW,
        Self::CATALOG_CREATE_VIEW,
        Self::VIEW_ADMIN,
        Self::VARIANT_ADMIN,
        Self::VARIANT_CLONE,
        Self::VARIANT_LIST,
        Self::NAMESPACE_CREATE,
        Self::NAMESPACE_LIST,
        Self::NAMESPACE_ADMIN,
        Self::RESOURCE_CREATE,
        Self::RESOURCE_READ,
        Self::RESOURCE_EDIT,
        Self::RESOURCE_DELETE,
        Self::RESOURCE_GET,
        Self::RESOURCE_PUT,
        Self::RESOURCE_LIST,
        Self::SKILLSET_ADMIN,
        Self::SKILLSET_CREATE,
        Self::SKILLSET_READ,
        Self::SKILLSET_EDIT,
        Self::SKILLSET_DELETE,
        Self::SKILLSET_LIST,
        Self::SKILLSET_USE,
        Self::TANGENT_CREATE,
        Self::TANGENT_DELETE,
    ];

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_system(&self) -> bool {
        self.0.starts_with("system.")
    }

    /// Non-empty, and a known built-in when it claims the `system.` prefix.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if self.0.is_empty() {
            return false;
        }
        !self.is_system() || Self::SYSTEM.contains(&self.0.as_str())
    }

    pub(crate) fn is_admin(&self) -> bool {
        matches!(
            self.0.as_str(),
            Self::CATALOG_ADMIN | Self::VARIANT_ADMIN | Self::NAMESPACE_ADMIN
        )
    }
}

impl From<&str> for Action {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resource pattern such as `res://skillsets/tools/*`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Target {
    fn from(pattern: &str) -> Self {
        Self(pattern.to_string())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub intent: Intent,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl Rule {
    pub fn allow<A, T>(actions: A, targets: T) -> Self
    where
        A: IntoIterator,
        A::Item: Into<Action>,
        T: IntoIterator,
        T::Item: Into<Target>,
    {
        Self::with_intent(Intent::Allow, actions, targets)
    }

    pub fn deny<A, T>(actions: A, targets: T) -> Self
    where
        A: IntoIterator,
        A::Item: Into<Action>,
        T: IntoIterator,
        T::Item: Into<Target>,
    {
        Self::with_intent(Intent::Deny, actions, targets)
    }

    fn with_intent<A, T>(intent: Intent, actions: A, targets: T) -> Self
    where
        A: IntoIterator,
        A::Item: Into<Action>,
        T: IntoIterator,
        T::Item: Into<Target>,
    {
        Self {
            intent,
            actions: actions.into_iter().map(Into::into).collect(),
            targets: targets.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn names(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a.as_str() == action)
    }
}

/// Ordered rule list of a view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rules(Vec<Rule>);

impl Rules {
    #[must_use]
    pub fn new(rules: Vec<Rule>) -> Self {
        Self(rules)
    }
}

impl Deref for Rules {
    type Target = Vec<Rule>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Rules {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromIterator<Rule> for Rules {
    fn from_iter<I: IntoIterator<Item = Rule>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The catalog, variant and namespace that rule targets are relative to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default)]
    pub catalog: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub variant: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

impl Scope {
    pub fn catalog(catalog: impl Into<String>) -> Self {
        Self {
            catalog: catalog.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = variant.into();
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewDefinition {
    pub scope: Scope,
    pub rules: Rules,
}

impl ViewDefinition {
    #[must_use]
    pub fn new(scope: Scope, rules: Vec<Rule>) -> Self {
        Self {
            scope,
            rules: Rules::new(rules),
        }
    }

    /// Full control of one catalog. Every new catalog gets a view with this definition.
    pub fn catalog_admin(catalog: impl Into<String>) -> Self {
        Self::new(
            Scope::catalog(catalog),
            vec![Rule::allow([Action::CATALOG_ADMIN], Vec::<Target>::new())],
        )
    }
}
