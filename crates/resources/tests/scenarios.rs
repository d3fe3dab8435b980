//! End-to-end cycles: engine + adapters + forge client against wiremock, with the
//! in-memory object store standing in for the API server.

use std::sync::Arc;
use std::time::Duration;

use forgeplane_core::meta::{external_name, has_finalizer, set_external_name};
use forgeplane_core::{ConditionStatus, ConditionType, Reason};
use forgeplane_engine::{reconcile, Binding, ExternalResource, ManagedResource, Requeue, Retry, Settings};
use forgeplane_forge::FetchLimits;
use forgeplane_kubehub::mock::{MemoryStore, StaticConnector};
use forgeplane_resources::{
    Label, LabelAdapter, LabelSpec, Release, ReleaseAdapter, ReleaseSpec, Repository, RepositoryAdapter,
    RepositorySpec, Webhook, WebhookAdapter, WebhookSpec,
};
use serde_json::json;
use wiremock::matchers::{body_json, body_partial_json, body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct World<A: ExternalResource> {
    server: MockServer,
    store: Arc<MemoryStore<A::Managed>>,
    binding: Binding<A>,
}

async fn world<A: ExternalResource>(adapter: A) -> World<A> {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryStore::new());
    let connector = Arc::new(StaticConnector::new(server.uri(), "test-token"));
    let binding = Binding::new(adapter, store.clone(), connector, Settings::default());
    World { server, store, binding }
}

impl<A: ExternalResource> World<A> {
    async fn pass(&self, name: &str) -> Result<Requeue, forgeplane_engine::ReconcileError> {
        reconcile(&self.binding, name).await
    }

    /// Seed the object and run the finalizer-only first pass.
    async fn seed(&self, obj: A::Managed) {
        let name = kube::ResourceExt::name_any(&obj);
        self.store.insert(obj);
        assert_eq!(self.pass(&name).await.unwrap(), Requeue::Done);
    }

    fn get(&self, name: &str) -> A::Managed { self.store.get_now(name).expect("object present") }

    fn condition(&self, name: &str, t: ConditionType) -> (ConditionStatus, Reason) {
        let obj = self.get(name);
        let c = obj.managed_status().and_then(|s| s.condition(t)).cloned().expect("condition present");
        (c.status, c.reason)
    }
}

fn release(body: &str) -> Release {
    let spec: ReleaseSpec = serde_json::from_value(json!({
        "owner": "o", "repository": "r", "tagName": "v1.0.0", "name": "R1", "body": body
    }))
    .unwrap();
    Release::new("r1", spec)
}

fn release_json(id: i64, body: &str) -> serde_json::Value {
    json!({
        "id": id, "tag_name": "v1.0.0", "name": "R1", "body": body,
        "draft": false, "prerelease": false, "target_commitish": "main",
        "author": {"id": 1, "login": "octo"}, "assets": []
    })
}

#[tokio::test]
async fn happy_create_then_steady_state() {
    let w = world(ReleaseAdapter::default()).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/repos/o/r/releases/tags/v1.0.0"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "not found"})))
        .mount(&w.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/repos/o/r/releases"))
        .and(body_json(json!({"tag_name": "v1.0.0", "name": "R1", "body": "notes"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(release_json(42, "notes")))
        .expect(1)
        .mount(&w.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/repos/o/r/releases/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(release_json(42, "notes")))
        .mount(&w.server)
        .await;

    w.seed(release("notes")).await;
    w.pass("r1").await.unwrap();
    let obj = w.get("r1");
    assert_eq!(external_name(&obj), Some("42"));
    assert!(has_finalizer(&obj));
    assert_eq!(w.condition("r1", ConditionType::Synced), (ConditionStatus::True, Reason::ReconcileSuccess));

    assert_eq!(w.pass("r1").await.unwrap(), Requeue::After(Duration::from_secs(600)));
    assert_eq!(w.condition("r1", ConditionType::Ready), (ConditionStatus::True, Reason::Available));
    let obj = w.get("r1");
    let seen = obj.managed_status().and_then(|s| s.at_provider.as_ref()).unwrap();
    assert_eq!(seen.author, "octo");

    let writes = w.store.writes();
    w.pass("r1").await.unwrap();
    assert_eq!(w.store.writes(), writes);
}

#[tokio::test]
async fn rediscovery_after_partial_create() {
    let w = world(ReleaseAdapter::default()).await;
    // the previous cycle created the release but never persisted the annotation
    Mock::given(method("GET"))
        .and(path("/api/v1/repos/o/r/releases/tags/v1.0.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(release_json(42, "notes")))
        .mount(&w.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/repos/o/r/releases"))
        .respond_with(ResponseTemplate::new(201).set_body_json(release_json(43, "notes")))
        .expect(0)
        .mount(&w.server)
        .await;

    w.seed(release("notes")).await;
    w.pass("r1").await.unwrap();
    assert_eq!(external_name(&w.get("r1")), Some("42"));
    assert_eq!(w.condition("r1", ConditionType::Ready), (ConditionStatus::True, Reason::Available));
    assert!(w.store.notices().iter().any(|n| n.reason == "Adopted"));
}

#[tokio::test]
async fn drift_on_one_field_patches_only_that_field() {
    let w = world(ReleaseAdapter::default()).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/repos/o/r/releases/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(release_json(42, "old")))
        .mount(&w.server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/v1/repos/o/r/releases/42"))
        .and(body_json(json!({"body": "new"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(release_json(42, "new")))
        .expect(1)
        .mount(&w.server)
        .await;

    let mut r = release("new");
    set_external_name(&mut r, "42");
    w.seed(r).await;
    w.pass("r1").await.unwrap();
    assert_eq!(w.condition("r1", ConditionType::Synced), (ConditionStatus::True, Reason::ReconcileSuccess));
    assert_eq!(external_name(&w.get("r1")), Some("42"));
}

#[tokio::test]
async fn delete_removes_forge_object_and_finalizer() {
    let w = world(ReleaseAdapter::default()).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/repos/o/r/releases/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(release_json(42, "notes")))
        .mount(&w.server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/repos/o/r/releases/42"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&w.server)
        .await;

    let mut r = release("notes");
    set_external_name(&mut r, "42");
    w.seed(r).await;
    w.store.mark_deleted("r1");
    assert_eq!(w.pass("r1").await.unwrap(), Requeue::Done);
    assert!(w.store.get_now("r1").is_none());
}

#[tokio::test]
async fn delete_treats_not_found_as_success() {
    let w = world(ReleaseAdapter::default()).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/repos/o/r/releases/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(release_json(42, "notes")))
        .mount(&w.server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/repos/o/r/releases/42"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&w.server)
        .await;

    let mut r = release("notes");
    set_external_name(&mut r, "42");
    w.seed(r).await;
    w.store.mark_deleted("r1");
    w.pass("r1").await.unwrap();
    assert!(w.store.get_now("r1").is_none());
}

fn label(repository: &str) -> Label {
    let spec: LabelSpec = serde_json::from_value(json!({
        "repository": repository, "name": "bug", "color": "#FF0000"
    }))
    .unwrap();
    Label::new("bug", spec)
}

#[tokio::test]
async fn label_with_unparseable_repository_is_invalid_spec() {
    let w = world(LabelAdapter).await;
    w.seed(label("not-a-repo")).await;
    let err = w.pass("bug").await.unwrap_err();
    assert_eq!(err.reason(), Reason::InvalidSpec);
    assert_eq!(err.retry(), Retry::Never);
    assert_eq!(w.condition("bug", ConditionType::Synced), (ConditionStatus::False, Reason::InvalidSpec));
    assert!(w.server.received_requests().await.unwrap().is_empty());

    // nothing could have been created, so deletion releases without forge calls
    w.store.mark_deleted("bug");
    w.pass("bug").await.unwrap();
    assert!(w.store.get_now("bug").is_none());
    assert!(w.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn rate_limited_create_backs_off_with_retry_after_floor() {
    let w = world(LabelAdapter).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/repos/o/r/labels"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&w.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/repos/o/r/labels"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .mount(&w.server)
        .await;

    w.seed(label("o/r")).await;
    let err = w.pass("bug").await.unwrap_err();
    assert_eq!(err.reason(), Reason::RateLimited);
    assert_eq!(err.retry(), Retry::After(Duration::from_secs(30)));
    assert_eq!(w.binding.backoff.next_delay("bug", err.retry()), Some(Duration::from_secs(30)));
    assert_eq!(w.condition("bug", ConditionType::Synced), (ConditionStatus::False, Reason::RateLimited));
    assert_eq!(external_name(&w.get("bug")), None);
}

#[tokio::test]
async fn label_is_adopted_by_name_and_color_is_case_insensitive() {
    let w = world(LabelAdapter).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/repos/o/r/labels"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 5, "name": "enhancement", "color": "00ff00"},
            {"id": 9, "name": "bug", "color": "ff0000"}
        ])))
        .mount(&w.server)
        .await;

    w.seed(label("o/r")).await;
    w.pass("bug").await.unwrap();
    assert_eq!(external_name(&w.get("bug")), Some("9"));
    assert_eq!(w.condition("bug", ConditionType::Ready), (ConditionStatus::True, Reason::Available));
}

#[tokio::test]
async fn missing_label_is_reported_not_recreated() {
    let w = world(LabelAdapter).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/repos/o/r/labels/9"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&w.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/repos/o/r/labels"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 10, "name": "bug", "color": "ff0000"})))
        .expect(0)
        .mount(&w.server)
        .await;

    let mut l = label("o/r");
    set_external_name(&mut l, "9");
    w.seed(l).await;
    w.pass("bug").await.unwrap();
    assert_eq!(w.condition("bug", ConditionType::Synced), (ConditionStatus::False, Reason::Missing));
    assert_eq!(external_name(&w.get("bug")), Some("9"));
}

#[tokio::test]
async fn org_repository_uses_composite_key() {
    let w = world(RepositoryAdapter).await;
    let repo = json!({
        "id": 5, "name": "svc", "full_name": "acme/svc", "owner": {"login": "acme"},
        "description": "payments", "private": true, "empty": true
    });
    Mock::given(method("GET"))
        .and(path("/api/v1/repos/acme/svc"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&w.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/orgs/acme/repos"))
        .and(body_partial_json(json!({"name": "svc", "private": true, "auto_init": false})))
        .respond_with(ResponseTemplate::new(201).set_body_json(repo.clone()))
        .expect(1)
        .mount(&w.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/repos/acme/svc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(repo))
        .mount(&w.server)
        .await;

    let spec: RepositorySpec = serde_json::from_value(json!({
        "owner": "acme", "name": "svc", "description": "payments", "private": true, "autoInit": false
    }))
    .unwrap();
    w.seed(Repository::new("svc", spec)).await;
    w.pass("svc").await.unwrap();
    assert_eq!(external_name(&w.get("svc")), Some("acme/svc"));
    w.pass("svc").await.unwrap();
    assert_eq!(w.condition("svc", ConditionType::Ready), (ConditionStatus::True, Reason::Available));
}

#[tokio::test]
async fn webhook_adopted_by_url_then_events_drift_patched() {
    let w = world(WebhookAdapter).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/repos/o/r/hooks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": 3, "type": "gitea", "active": true, "events": ["push"],
            "config": {"url": "https://ci.example.com/hook", "content_type": "json"}
        }])))
        .mount(&w.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/repos/o/r/hooks/3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 3, "type": "gitea", "active": true, "events": ["push", "release"],
            "config": {"url": "https://ci.example.com/hook", "content_type": "json"}
        })))
        .mount(&w.server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/v1/repos/o/r/hooks/3"))
        .and(body_json(json!({"events": ["push", "release"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 3})))
        .expect(1)
        .mount(&w.server)
        .await;

    let spec: WebhookSpec = serde_json::from_value(json!({
        "repository": "o/r", "url": "https://ci.example.com/hook", "events": ["push", "release"], "secret": "x"
    }))
    .unwrap();
    w.seed(Webhook::new("ci", spec)).await;
    w.pass("ci").await.unwrap();
    assert_eq!(external_name(&w.get("ci")), Some("3"));
    assert!(w.store.notices().iter().any(|n| n.reason == "Updated"));
    let obj = w.get("ci");
    let seen = obj.managed_status().and_then(|s| s.at_provider.as_ref()).unwrap();
    assert_eq!(seen.events, vec!["push", "release"]);
    assert_eq!(w.condition("ci", ConditionType::Ready), (ConditionStatus::True, Reason::Available));
}

#[tokio::test]
async fn terminating_label_with_bad_color_is_still_deleted() {
    let w = world(LabelAdapter).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/repos/o/r/labels/9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 9, "name": "bug", "color": "ff0000"})))
        .mount(&w.server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/repos/o/r/labels/9"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&w.server)
        .await;

    let mut l = label("o/r");
    l.spec.color = "red".into();
    set_external_name(&mut l, "9");
    w.seed(l).await;
    w.store.mark_deleted("bug");
    assert_eq!(w.pass("bug").await.unwrap(), Requeue::Done);
    assert!(w.store.get_now("bug").is_none());
}

fn release_with_assets(assets: serde_json::Value) -> Release {
    let spec: ReleaseSpec = serde_json::from_value(json!({
        "owner": "o", "repository": "r", "tagName": "v1.0.0", "name": "R1", "body": "notes", "assets": assets
    }))
    .unwrap();
    let mut r = Release::new("r1", spec);
    set_external_name(&mut r, "42");
    r
}

fn release_with_asset_list(assets: serde_json::Value) -> serde_json::Value {
    let mut r = release_json(42, "notes");
    r["assets"] = assets;
    r
}

#[tokio::test]
async fn release_assets_converge_to_declared_set() {
    let w = world(ReleaseAdapter::default()).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/repos/o/r/releases/42"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(release_with_asset_list(json!([{"id": 7, "name": "stale.zip", "size": 3}]))),
        )
        .up_to_n_times(1)
        .mount(&w.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/repos/o/r/releases/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(release_with_asset_list(json!([
            {"id": 8, "name": "notes.txt", "size": 5},
            {"id": 9, "name": "bin.tar.gz", "size": 7}
        ]))))
        .mount(&w.server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/repos/o/r/releases/42/assets/7"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&w.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/downloads/bin.tar.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_string("tarball"))
        .expect(1)
        .mount(&w.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/repos/o/r/releases/42/assets"))
        .and(query_param("name", "notes.txt"))
        .and(body_string_contains("hello"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 8, "name": "notes.txt", "size": 5})))
        .expect(1)
        .mount(&w.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/repos/o/r/releases/42/assets"))
        .and(query_param("name", "bin.tar.gz"))
        .and(body_string_contains("tarball"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9, "name": "bin.tar.gz", "size": 7})))
        .expect(1)
        .mount(&w.server)
        .await;

    let remote = format!("{}/downloads/bin.tar.gz", w.server.uri());
    w.seed(release_with_assets(json!([
        {"name": "notes.txt", "contentType": "text/plain", "content": "aGVsbG8="},
        {"name": "bin.tar.gz", "url": remote}
    ])))
    .await;
    w.pass("r1").await.unwrap();
    assert_eq!(w.condition("r1", ConditionType::Synced), (ConditionStatus::True, Reason::ReconcileSuccess));
    let obj = w.get("r1");
    let seen = obj.managed_status().and_then(|s| s.at_provider.as_ref()).unwrap();
    let mut names: Vec<&str> = seen.assets.iter().map(|a| a.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["bin.tar.gz", "notes.txt"]);
}

#[tokio::test]
async fn remote_asset_over_fetch_limit_is_not_uploaded() {
    let limits = FetchLimits { max_bytes: 4, timeout: Duration::from_secs(5) };
    let w = world(ReleaseAdapter { fetch_limits: limits }).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/repos/o/r/releases/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(release_with_asset_list(json!([]))))
        .mount(&w.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/downloads/huge.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_string("far more than four bytes"))
        .mount(&w.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/repos/o/r/releases/42/assets"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1, "name": "huge.bin"})))
        .expect(0)
        .mount(&w.server)
        .await;

    let remote = format!("{}/downloads/huge.bin", w.server.uri());
    w.seed(release_with_assets(json!([{"name": "huge.bin", "url": remote}]))).await;
    let err = w.pass("r1").await.unwrap_err();
    assert_eq!(err.reason(), Reason::Protocol);
    assert_eq!(w.condition("r1", ConditionType::Synced), (ConditionStatus::False, Reason::Protocol));
}

fn user_repository() -> Repository {
    let spec: RepositorySpec = serde_json::from_value(json!({"name": "tools", "private": true})).unwrap();
    Repository::new("tools", spec)
}

fn user_repo_json() -> serde_json::Value {
    json!({"id": 11, "name": "tools", "full_name": "octo/tools", "owner": {"login": "octo"}, "private": true, "empty": true})
}

#[tokio::test]
async fn user_owned_repository_is_created_under_token_account() {
    let w = world(RepositoryAdapter).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1, "login": "octo"})))
        .expect(1)
        .mount(&w.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/repos/octo/tools"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&w.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/user/repos"))
        .and(body_partial_json(json!({"name": "tools", "private": true})))
        .respond_with(ResponseTemplate::new(201).set_body_json(user_repo_json()))
        .expect(1)
        .mount(&w.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/repos/octo/tools"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_repo_json()))
        .mount(&w.server)
        .await;

    w.seed(user_repository()).await;
    w.pass("tools").await.unwrap();
    assert_eq!(external_name(&w.get("tools")), Some("octo/tools"));
    w.pass("tools").await.unwrap();
    assert_eq!(w.condition("tools", ConditionType::Ready), (ConditionStatus::True, Reason::Available));
}

#[tokio::test]
async fn user_owned_repository_is_rediscovered_without_annotation() {
    let w = world(RepositoryAdapter).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1, "login": "octo"})))
        .mount(&w.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/repos/octo/tools"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_repo_json()))
        .mount(&w.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/user/repos"))
        .respond_with(ResponseTemplate::new(201).set_body_json(user_repo_json()))
        .expect(0)
        .mount(&w.server)
        .await;

    w.seed(user_repository()).await;
    w.pass("tools").await.unwrap();
    assert_eq!(external_name(&w.get("tools")), Some("octo/tools"));
    assert!(w.store.notices().iter().any(|n| n.reason == "Adopted"));
    assert_eq!(w.condition("tools", ConditionType::Ready), (ConditionStatus::True, Reason::Available));
}
