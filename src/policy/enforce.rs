use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{info, warn};

use super::evaluate::{Decision, evaluate_request};
use super::types::{Action, Scope, ViewDefinition};
use crate::error::{Error, Result};
use crate::types::RequestContext;

/// The view a request was authenticated with, placed in request extensions by the
/// layer that resolves view tokens.
#[derive(Debug, Clone)]
pub struct AuthorizedView(pub ViewDefinition);

/// Actions a route requires; any one of them is enough.
#[derive(Debug, Clone, Default)]
pub struct RequiredActions {
    actions: Arc<[Action]>,
    skip_view_validation: bool,
}

impl RequiredActions {
    pub fn new<I>(actions: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Action>,
    {
        Self {
            actions: actions.into_iter().map(Into::into).collect(),
            skip_view_validation: false,
        }
    }

    /// Lets a route that requires the `allow` pseudo-action through without a view.
    #[must_use]
    pub fn skip_view_validation(mut self) -> Self {
        self.skip_view_validation = true;
        self
    }

    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    fn bypasses_view(&self) -> bool {
        self.skip_view_validation && self.actions.iter().any(|a| a.as_str() == Action::ALLOW)
    }
}

fn routing_scope(ctx: &RequestContext) -> Scope {
    let catalog = ctx.catalog();
    Scope {
        catalog: catalog.catalog.clone(),
        variant: catalog.variant.clone(),
        namespace: catalog.namespace.clone(),
    }
}

fn log_decision(ctx: &RequestContext, decision: &Decision) {
    let tenant = ctx.tenant_id().map(|t| t.as_str()).unwrap_or_default();
    let user = ctx.user().map(|u| u.user_id.as_str()).unwrap_or_default();
    let actions: Vec<&str> = decision.actions.iter().map(Action::as_str).collect();

    if decision.allowed {
        info!(
            event_type = "policy_decision",
            tenant,
            user,
            target_resource = %decision.resource,
            handler_actions = ?actions,
            allowed = true,
            matched_allow_rules = decision.matched_allow.len(),
            matched_deny_rules = decision.matched_deny.len(),
            "Access allowed"
        );
    } else {
        warn!(
            event_type = "policy_decision",
            tenant,
            user,
            target_resource = %decision.resource,
            handler_actions = ?actions,
            allowed = false,
            matched_allow_rules = decision.matched_allow.len(),
            matched_deny_rules = decision.matched_deny.len(),
            "Access denied"
        );
    }
}

/// Evaluates the request against `view` relative to the context's routing scope.
///
/// Fails with `Unauthorized` when there is no view and `DisallowedByPolicy` when none
/// of `actions` is allowed on `resource`.
pub fn authorize(
    ctx: &RequestContext,
    view: Option<&ViewDefinition>,
    actions: &[Action],
    resource: &str,
) -> Result<Decision> {
    let Some(view) = view else {
        warn!(event_type = "policy_decision", target_resource = resource, "No view on request");
        return Err(Error::Unauthorized);
    };

    let decision = evaluate_request(view, &routing_scope(ctx), actions, resource)?;
    log_decision(ctx, &decision);
    if !decision.allowed {
        return Err(Error::DisallowedByPolicy);
    }
    Ok(decision)
}

/// Runs `handler` only if `view` allows one of `actions` on `resource`.
pub async fn enforce<F, Fut, T>(
    ctx: &RequestContext,
    view: Option<&ViewDefinition>,
    actions: &[Action],
    resource: &str,
    handler: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    authorize(ctx, view, actions, resource)?;
    handler().await
}

/// Middleware guarding a route with the actions in its state.
///
/// ```ignore
/// let app = Router::new()
///     .route("/skillsets/{*path}", get(get_skillset))
///     .layer(middleware::from_fn_with_state(
///         RequiredActions::new([Action::SKILLSET_READ]),
///         enforce_layer,
///     ));
/// ```
pub async fn enforce_layer(
    State(required): State<RequiredActions>,
    request: Request,
    next: Next,
) -> Response {
    if required.bypasses_view() {
        info!(
            event_type = "policy_decision",
            target_resource = request.uri().path(),
            allowed = true,
            "View validation skipped"
        );
        return next.run(request).await;
    }

    let Some(ctx) = request.extensions().get::<RequestContext>().cloned() else {
        warn!("Request reached policy enforcement without a context");
        return Error::Unauthorized.into_response();
    };
    let view = request.extensions().get::<AuthorizedView>().map(|v| v.0.clone());

    match authorize(&ctx, view.as_ref(), required.actions(), request.uri().path()) {
        Ok(_) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::types::Rule;
    use crate::types::{CatalogContext, TenantId};

    fn ctx() -> RequestContext {
        RequestContext::new()
            .with_tenant(TenantId::new("T1"))
            .with_catalog(CatalogContext::new("acme").with_variant("dev"))
    }

    fn reader() -> ViewDefinition {
        ViewDefinition::new(
            Scope::catalog("acme").with_variant("dev"),
            vec![Rule::allow([Action::SKILLSET_READ], ["res://skillsets/tools/*"])],
        )
    }

    #[tokio::test]
    async fn test_enforce_runs_handler_when_allowed() {
        let view = reader();
        let out = enforce(
            &ctx(),
            Some(&view),
            &[Action::from(Action::SKILLSET_READ)],
            "/skillsets/tools/k8s",
            || async { Ok(42) },
        )
        .await
        .unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn test_enforce_without_view_is_unauthorized() {
        let result = enforce(
            &ctx(),
            None,
            &[Action::from(Action::SKILLSET_READ)],
            "/skillsets/tools/k8s",
            || async { Ok(()) },
        )
        .await;
        assert!(matches!(result, Err(Error::Unauthorized)));
    }

    #[tokio::test]
    async fn test_enforce_denied_never_calls_handler() {
        let view = reader();
        let mut called = false;
        let result = enforce(
            &ctx(),
            Some(&view),
            &[Action::from(Action::SKILLSET_EDIT)],
            "/skillsets/tools/k8s",
            || {
                called = true;
                async { Ok(()) }
            },
        )
        .await;
        assert!(matches!(result, Err(Error::DisallowedByPolicy)));
        assert!(!called);
    }

    #[test]
    fn test_authorize_reports_first_allowed_action() {
        let view = reader();
        let decision = authorize(
            &ctx(),
            Some(&view),
            &[
                Action::from(Action::SKILLSET_EDIT),
                Action::from(Action::SKILLSET_READ),
                Action::from(Action::SKILLSET_DELETE),
            ],
            "/skillsets/tools/k8s",
        )
        .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.actions.len(), 2);
        assert_eq!(decision.resource, "res://catalogs/acme/variants/dev/skillsets/tools/k8s");
    }

    #[test]
    fn test_skip_view_validation_requires_allow_action() {
        assert!(RequiredActions::new([Action::ALLOW]).skip_view_validation().bypasses_view());
        assert!(!RequiredActions::new([Action::ALLOW]).bypasses_view());
        assert!(
            !RequiredActions::new([Action::SKILLSET_READ])
                .skip_view_validation()
                .bypasses_view()
        );
    }
}
