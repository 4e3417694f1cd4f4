mod common;

use chrono::{Duration, Utc};
use proptest::prelude::*;
use serde_json::json;
use uuid::Uuid;

use common::{TestStore, ctx, hash_of};
use skillvault::Error;
use skillvault::policy::{Action, Rule, Scope, ViewDefinition, evaluate_request};
use skillvault::store::{Lookup, generate_signing_key};
use skillvault::types::{
    Catalog, CatalogObject, DirectoryEntry, Namespace, ObjectKind, ObjectRef, ProjectId,
    RequestContext, Session, SessionStatus, Tangent, TangentInfo, Variant, View, ViewToken,
};

#[test]
fn test_tenant_isolation() {
    let store = TestStore::open();
    let a = ctx("TA", "PA");
    let b = ctx("TB", "PB");
    let a_variant = store.catalog_with_variant(&a, "acme", "prod");
    store.seed(&b);

    let hash = hash_of("secret");
    let conn = store.pool.tenant_conn(&a).unwrap();
    conn.objects()
        .upsert_resource_object(
            &a,
            a_variant.resource_directory_id,
            &DirectoryEntry::new("/db/creds", &hash),
            &CatalogObject::new(hash.clone(), ObjectKind::Resource, b"pw".to_vec()),
        )
        .unwrap();
    let a_catalog = conn.metadata().get_catalog_by_name(&a, "acme").unwrap();
    conn.close();

    // B knows every one of A's ids and still sees nothing.
    let conn = store.pool.tenant_conn(&b).unwrap();
    let meta = conn.metadata();
    let objects = conn.objects();
    assert!(meta.get_catalog_by_id(&b, a_catalog.catalog_id).unwrap_err().is_not_found());
    assert!(meta.get_variant_by_id(&b, a_variant.variant_id).unwrap_err().is_not_found());
    assert!(meta.list_catalogs(&b).unwrap().is_empty());
    assert!(objects.get_catalog_object(&b, &hash).unwrap_err().is_not_found());
    assert!(
        objects
            .get_resource(&b, a_variant.resource_directory_id, "/db/creds")
            .unwrap_err()
            .is_not_found()
    );
    assert!(
        objects
            .add_or_update_object_by_path(
                &b,
                ObjectKind::Resource,
                a_variant.resource_directory_id,
                "/db/creds",
                &ObjectRef::new(hash_of("other")),
            )
            .unwrap_err()
            .is_not_found()
    );
    assert!(!meta.delete_catalog(&b, a_catalog.catalog_id.into()).unwrap());

    // A connection scoped to B refuses to act for A at all.
    assert!(matches!(meta.list_catalogs(&a), Err(Error::Unauthorized)));
    conn.close();

    let conn = store.pool.tenant_conn(&a).unwrap();
    let entry = conn
        .objects()
        .get_resource(&a, a_variant.resource_directory_id, "/db/creds")
        .unwrap();
    assert_eq!(entry.hash, hash);
    assert!(conn.metadata().get_catalog_by_id(&a, a_catalog.catalog_id).is_ok());
    conn.close();
}

#[test]
fn test_cross_tenant_mutations_touch_nothing() {
    let store = TestStore::open();
    let a = ctx("TA", "PA");
    let b = ctx("TB", "PB");
    let variant = store.catalog_with_variant(&a, "acme", "prod");
    store.seed(&b);
    let now = Utc::now();

    // Everything A owns, one of each.
    let conn = store.pool.tenant_conn(&a).unwrap();
    let meta = conn.metadata();
    let catalog = meta.get_catalog_by_name(&a, "acme").unwrap();
    let mut namespace = Namespace::new(variant.variant_id, "teamA");
    meta.create_namespace(&a, &mut namespace).unwrap();
    let mut view = View::new(catalog.catalog_id, "dev-view", ViewDefinition::catalog_admin("acme"));
    meta.create_view(&a, &mut view).unwrap();
    let mut token = ViewToken {
        token_id: Uuid::nil(),
        view_id: view.view_id,
        expire_at: now + Duration::hours(1),
        created_at: now,
        updated_at: now,
    };
    meta.create_view_token(&a, &mut token).unwrap();
    let session = Session {
        session_id: Uuid::new_v4(),
        skillset: "/tools/k8s".to_string(),
        skill: "list-pods".to_string(),
        view_id: view.view_id,
        tangent_id: Uuid::new_v4(),
        status_summary: SessionStatus::Running,
        status: json!({}),
        info: json!({}),
        user_id: "alice".to_string(),
        catalog_id: catalog.catalog_id,
        variant_id: variant.variant_id,
        started_at: now,
        ended_at: None,
        expires_at: now + Duration::hours(1),
        created_at: now,
        updated_at: now,
    };
    meta.upsert_session(&a, &session).unwrap();
    let mut tangent = Tangent::from_info(TangentInfo {
        id: Uuid::new_v4(),
        url: "https://tangent-a.local".to_string(),
        public_key_access_key: vec![7; 32],
        ..TangentInfo::default()
    });
    meta.create_tangent(&a, &mut tangent).unwrap();
    conn.close();

    // B's connection, handed every one of A's ids.
    let conn = store.pool.tenant_conn(&b).unwrap();
    let meta = conn.metadata();

    let mut described = catalog.clone();
    described.description = Some("stolen".to_string());
    assert!(meta.update_catalog(&b, &described).unwrap_err().is_not_found());
    assert!(!meta.delete_catalog(&b, Lookup::Id(catalog.catalog_id)).unwrap());

    let mut other_variant = variant.clone();
    other_variant.name = "stolen".to_string();
    assert!(
        meta.update_variant(&b, Lookup::Id(variant.variant_id), &other_variant)
            .unwrap_err()
            .is_not_found()
    );
    assert!(!meta.delete_variant(&b, catalog.catalog_id, Lookup::Id(variant.variant_id)).unwrap());
    assert!(meta.create_variant(&b, &mut Variant::new(catalog.catalog_id, "x")).is_err());

    assert!(meta.update_namespace(&b, &namespace).unwrap_err().is_not_found());
    assert!(!meta.delete_namespace(&b, "teamA", variant.variant_id).unwrap());
    assert!(meta.create_namespace(&b, &mut Namespace::new(variant.variant_id, "teamB")).is_err());

    assert!(meta.update_view(&b, &view).unwrap_err().is_not_found());
    assert!(!meta.delete_view(&b, view.view_id).unwrap());
    assert!(!meta.delete_view_by_label(&b, "dev-view", catalog.catalog_id).unwrap());

    assert!(
        meta.update_view_token_expiry(&b, token.token_id, now - Duration::hours(1))
            .unwrap_err()
            .is_not_found()
    );
    assert!(!meta.delete_view_token(&b, token.token_id).unwrap());
    let mut foreign_token = ViewToken { token_id: Uuid::nil(), ..token.clone() };
    assert!(meta.create_view_token(&b, &mut foreign_token).is_err());

    assert!(
        meta.update_session_status(&b, session.session_id, SessionStatus::Completed, &json!({}))
            .unwrap_err()
            .is_not_found()
    );
    assert!(
        meta.update_session_end(&b, session.session_id, SessionStatus::Failed, &json!({}))
            .unwrap_err()
            .is_not_found()
    );
    assert!(
        meta.update_session_info(&b, session.session_id, &json!({"x": 1}))
            .unwrap_err()
            .is_not_found()
    );
    assert!(!meta.delete_session(&b, session.session_id).unwrap());
    assert!(meta.upsert_session(&b, &session).is_err());

    assert!(meta.update_tangent(&b, &tangent).unwrap_err().is_not_found());
    assert!(!meta.delete_tangent(&b, tangent.id).unwrap());
    assert!(meta.register_tangent(&b, &tangent).unwrap_err().is_already_exists());

    assert!(!meta.delete_project(&b, &ProjectId::new("PA")).unwrap());
    assert!(matches!(meta.delete_tenant(&a), Err(Error::Unauthorized)));
    assert!(matches!(meta.get_tenant(&a), Err(Error::Unauthorized)));
    assert!(meta.delete_tenant(&b).unwrap());
    conn.close();

    // A's data is exactly as it was.
    let conn = store.pool.tenant_conn(&a).unwrap();
    let meta = conn.metadata();
    assert!(meta.get_tenant(&a).is_ok());
    assert!(meta.get_project(&a, &ProjectId::new("PA")).is_ok());
    assert_eq!(
        meta.get_catalog_by_id(&a, catalog.catalog_id).unwrap().description,
        catalog.description
    );
    assert_eq!(meta.get_variant_by_id(&a, variant.variant_id).unwrap().name, "prod");
    assert_eq!(meta.list_variants_by_catalog(&a, catalog.catalog_id).unwrap().len(), 2);
    assert!(meta.get_namespace(&a, "teamA", variant.variant_id).is_ok());
    assert_eq!(meta.list_namespaces_by_variant(&a, variant.variant_id).unwrap().len(), 2);
    assert!(meta.get_view(&a, view.view_id).is_ok());
    assert_eq!(meta.get_view_token(&a, token.token_id).unwrap().expire_at, token.expire_at);
    let stored = meta.get_session(&a, session.session_id).unwrap();
    assert_eq!(stored.status_summary, SessionStatus::Running);
    assert_eq!(stored.info, json!({}));
    assert_eq!(meta.get_tangent(&a, tangent.id).unwrap().info.url, "https://tangent-a.local");
    conn.close();
}

#[test]
fn test_unscoped_connection_is_refused() {
    let store = TestStore::open();
    let a = ctx("TA", "PA");
    store.seed(&a);

    let conn = store.pool.conn(&a).unwrap();
    assert!(matches!(conn.metadata().list_catalogs(&a), Err(Error::Unauthorized)));
    assert!(matches!(
        conn.metadata().list_catalogs(&RequestContext::new()),
        Err(Error::MissingTenantId)
    ));
    conn.close();
}

#[test]
fn test_object_creation_is_first_write_wins() {
    let store = TestStore::open();
    let a = ctx("TA", "PA");
    let variant = store.catalog_with_variant(&a, "acme", "prod");
    let hash = hash_of("blob");

    let conn = store.pool.tenant_conn(&a).unwrap();
    let objects = conn.objects();
    let first = CatalogObject::new(hash.clone(), ObjectKind::SkillSet, b"first".to_vec());
    objects.create_catalog_object(&a, &first).unwrap();
    assert!(objects.create_catalog_object(&a, &first).unwrap_err().is_already_exists());

    let second = CatalogObject::new(hash.clone(), ObjectKind::SkillSet, b"second".to_vec());
    objects
        .upsert_skillset_object(
            &a,
            variant.skillset_directory_id,
            &DirectoryEntry::new("/tools/k8s", &hash),
            &second,
        )
        .unwrap();
    assert_eq!(objects.get_catalog_object(&a, &hash).unwrap().data, b"first".to_vec());
    conn.close();
}

#[test]
fn test_scope_cleanup_on_close() {
    let store = TestStore::with_config(|config| {
        config.max_open = 1;
        config.min_idle = 1;
    });
    let a = ctx("TA", "PA");
    store.seed(&a);

    let conn = store.pool.tenant_conn(&a).unwrap();
    assert_eq!(conn.scopes().unwrap().len(), 2);
    conn.close();

    let conn = store.pool.conn(&RequestContext::new()).unwrap();
    assert!(conn.scopes().unwrap().is_empty());
    conn.close();

    // Dropping without close releases the same way.
    {
        let conn = store.pool.tenant_conn(&a).unwrap();
        assert!(conn.scope("skillvault.tenant_id").unwrap().is_some());
    }
    let conn = store.pool.conn(&RequestContext::new()).unwrap();
    assert!(conn.scopes().unwrap().is_empty());
    conn.close();
}

#[test]
fn test_namespace_deletion_completeness() {
    let store = TestStore::open();
    let a = ctx("TA", "PA");
    let variant = store.catalog_with_variant(&a, "acme", "prod");
    let dir = variant.resource_directory_id;
    let hash = hash_of("ns");

    let keep = ["/db/creds", "/--root--/teamB/db", "/--root--/teamAB/db", "/--root--/teamA"];
    let drop = ["/--root--/teamA/db", "/--root--/teamA/nested/deep/key"];

    let conn = store.pool.tenant_conn(&a).unwrap();
    let objects = conn.objects();
    for path in keep.iter().chain(drop.iter()) {
        objects
            .add_or_update_object_by_path(&a, ObjectKind::Resource, dir, path, &ObjectRef::new(&hash))
            .unwrap();
    }
    let before = objects.get_schema_directory(&a, ObjectKind::Resource, dir).unwrap().directory;

    let mut removed = objects
        .delete_namespace_objects(&a, ObjectKind::Resource, dir, "teamA")
        .unwrap();
    removed.sort();
    assert_eq!(removed, drop.to_vec());

    let after = objects.get_schema_directory(&a, ObjectKind::Resource, dir).unwrap().directory;
    assert!(after.keys().all(|path| !path.starts_with("/--root--/teamA/")));
    for path in keep {
        assert_eq!(after.get(path), before.get(path));
    }
    assert_eq!(after.len(), keep.len());
    conn.close();
}

#[derive(Debug, Clone)]
enum KeyOp {
    Create { active: bool },
    Activate { index: usize, active: bool },
}

fn key_op() -> impl Strategy<Value = KeyOp> {
    prop_oneof![
        any::<bool>().prop_map(|active| KeyOp::Create { active }),
        (0usize..8, any::<bool>()).prop_map(|(index, active)| KeyOp::Activate { index, active }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_at_most_one_active_signing_key(ops in prop::collection::vec(key_op(), 1..12)) {
        let store = TestStore::open();
        let conn = store.pool.conn(&RequestContext::new()).unwrap();
        let meta = conn.metadata();
        let mut ids: Vec<Uuid> = Vec::new();

        for op in ops {
            match op {
                KeyOp::Create { active } => {
                    let mut key = generate_signing_key();
                    key.is_active = active;
                    meta.create_signing_key(&mut key).unwrap();
                    ids.push(key.key_id);
                }
                KeyOp::Activate { index, active } if !ids.is_empty() => {
                    meta.update_signing_key_active(ids[index % ids.len()], active).unwrap();
                }
                KeyOp::Activate { .. } => {}
            }

            let active = ids
                .iter()
                .filter(|id| meta.get_signing_key(**id).unwrap().is_active)
                .count();
            prop_assert!(active <= 1);
        }
        conn.close();
    }

    #[test]
    fn prop_directory_round_trip(
        segments in prop::collection::vec("[A-Za-z0-9_-]{1,12}", 1..5),
        seed in "[a-z]{1,8}",
        meta_value in prop::option::of(any::<u32>()),
    ) {
        let store = TestStore::open();
        let a = ctx("TA", "PA");
        let variant = store.catalog_with_variant(&a, "acme", "prod");
        let path = format!("/{}", segments.join("/"));

        let mut obj = ObjectRef::new(hash_of(&seed));
        if let Some(v) = meta_value {
            obj = obj.with_metadata(serde_json::json!({ "v": v }));
        }

        let conn = store.pool.tenant_conn(&a).unwrap();
        let objects = conn.objects();
        objects
            .add_or_update_object_by_path(&a, ObjectKind::SkillSet, variant.skillset_directory_id, &path, &obj)
            .unwrap();
        let stored = objects
            .get_object_ref_by_path(&a, ObjectKind::SkillSet, variant.skillset_directory_id, &path)
            .unwrap();
        prop_assert_eq!(stored, obj);
        conn.close();
    }

    #[test]
    fn prop_deny_overrides_allow(
        action in "[a-z]{1,6}\\.[a-z]{1,6}",
        path in prop::collection::vec("[a-z0-9]{1,6}", 1..4),
        wildcard_allow in any::<bool>(),
        deny_first in any::<bool>(),
    ) {
        let resource = format!("/skillsets/{}", path.join("/"));
        let exact = format!("res:/{resource}");
        let allow_target = if wildcard_allow { "res://skillsets/*".to_string() } else { exact.clone() };

        let allow = Rule::allow([action.as_str()], [allow_target.as_str()]);
        let deny = Rule::deny([action.as_str()], [exact.as_str()]);
        let rules = if deny_first { vec![deny, allow] } else { vec![allow, deny] };
        let scope = Scope::catalog("acme").with_variant("prod");
        let view = ViewDefinition::new(scope.clone(), rules);

        let decision = evaluate_request(&view, &scope, &[Action::from(action.as_str())], &resource).unwrap();
        prop_assert!(!decision.allowed);
        prop_assert!(!decision.matched_deny.is_empty());
    }

    #[test]
    fn prop_wildcard_covers_only_deeper_paths(
        base in prop::collection::vec("[a-z0-9]{1,6}", 1..3),
        rest in prop::collection::vec("[a-z0-9]{1,6}", 1..3),
        sibling in "[a-z0-9]{1,6}x",
    ) {
        let scope = Scope::catalog("acme").with_variant("prod");
        let target = format!("res://skillsets/{}/*", base.join("/"));
        let view = ViewDefinition::new(scope.clone(), vec![Rule::allow([Action::SKILLSET_READ], [target.as_str()])]);
        let read = [Action::from(Action::SKILLSET_READ)];

        let inside = format!("/skillsets/{}/{}", base.join("/"), rest.join("/"));
        prop_assert!(evaluate_request(&view, &scope, &read, &inside).unwrap().allowed);

        let mut other = base.clone();
        let last = other.len() - 1;
        other[last] = format!("{}{}", other[last], sibling);
        let outside = format!("/skillsets/{}/{}", other.join("/"), rest.join("/"));
        prop_assert!(!evaluate_request(&view, &scope, &read, &outside).unwrap().allowed);
    }
}

#[test]
fn test_catalog_names_are_unique_per_project() {
    let store = TestStore::open();
    let a = ctx("TA", "PA");
    store.seed(&a);

    let conn = store.pool.tenant_conn(&a).unwrap();
    conn.metadata().create_catalog(&a, &mut Catalog::new("acme")).unwrap();
    assert!(matches!(
        conn.metadata().create_catalog(&a, &mut Catalog::new("acme")),
        Err(Error::AlreadyExists(_))
    ));
    conn.close();
}
