//! View-based access control.
//!
//! A view is a list of Allow and Deny rules scoped to a catalog (and optionally a
//! variant and namespace). A request names the actions its handler accepts and the
//! resource it touches; it is authorized when any one action is allowed and no
//! matching Deny rule names it.

mod canonical;
pub mod enforce;
mod evaluate;
mod types;

pub use canonical::{
    KINDS, RESOURCE_SCHEME, canonicalize_target, canonicalize_view, resolve_target_resource,
};
pub use enforce::{AuthorizedView, RequiredActions, authorize, enforce, enforce_layer};
pub use evaluate::{
    ActionDecision, Decision, can_adopt_view, can_use_skillset, evaluate_request,
    validate_derived_view, validate_target, validate_view_definition,
};
pub use types::{Action, Intent, Rule, Rules, Scope, Target, ViewDefinition};
