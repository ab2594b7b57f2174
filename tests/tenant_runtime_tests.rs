//! # Tenant Runtime Tests
//!
//! Controller lifetime inside one tenant pass.

mod common;

use async_trait::async_trait;
use common::{configmap_kind, object, scope, FakeClusterApi};
use fleet_controller::crd::ProviderType;
use fleet_controller::runtime::{
    Action, ChangeSource, Controller, EnqueueRequestForObject, ObjectKey, ReconcileError,
    Reconciler, RuntimeError, TenantConnection, TenantRuntime,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Counting(AtomicUsize);

#[async_trait]
impl Reconciler for Counting {
    async fn reconcile(&self, _key: &ObjectKey) -> Result<Action, ReconcileError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(Action::Success)
    }
}

fn runtime() -> (Arc<TenantRuntime>, Arc<FakeClusterApi>) {
    let api = Arc::new(FakeClusterApi::new());
    api.insert(object(&configmap_kind(), "default", "one"));
    api.insert(object(&configmap_kind(), "kube-system", "two"));
    let connection = Arc::new(TenantConnection::new(
        "tenant-rt",
        api.clone(),
        scope("tenant-rt", ProviderType::Openstack),
    ));
    (Arc::new(TenantRuntime::new(connection)), api)
}

fn controller(runtime: &TenantRuntime, reconciler: Arc<Counting>) -> Controller {
    let source = Arc::new(ChangeSource::new(
        configmap_kind(),
        runtime.api().clone(),
        runtime.cache().indexer_for(&configmap_kind()),
    ));
    Controller::new("configmaps", runtime.tenant(), reconciler).watch(
        source,
        Arc::new(EnqueueRequestForObject),
        vec![],
    )
}

#[tokio::test(start_paused = true)]
async fn test_start_runs_controllers_until_cancelled_then_joins() {
    let (runtime, _api) = runtime();
    let reconciler = Arc::new(Counting(AtomicUsize::new(0)));
    let added = runtime.add(controller(&runtime, reconciler.clone())).unwrap();

    let token = CancellationToken::new();
    let running = {
        let runtime = runtime.clone();
        let token = token.clone();
        tokio::spawn(async move { runtime.start(token).await })
    };

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(reconciler.0.load(Ordering::SeqCst), 2);
    assert!(runtime.cache().is_cached(&configmap_kind()));
    assert!(!running.is_finished());

    assert!(matches!(
        runtime.add(controller(&runtime, reconciler.clone())),
        Err(RuntimeError::AlreadyStarted)
    ));

    token.cancel();
    running.await.unwrap().unwrap();
    // Workers have observably stopped
    assert!(added.queue().is_shutdown());
    assert!(matches!(
        runtime.start(CancellationToken::new()).await,
        Err(RuntimeError::AlreadyStarted)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_failed_bulk_read_returns_before_any_worker_runs() {
    let (runtime, api) = runtime();
    api.fail_list(configmap_kind());
    let reconciler = Arc::new(Counting(AtomicUsize::new(0)));
    runtime.add(controller(&runtime, reconciler.clone())).unwrap();

    let err = runtime.start(CancellationToken::new()).await.unwrap_err();

    match err {
        RuntimeError::ControllerStart { controller, .. } => assert_eq!(controller, "configmaps"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(reconciler.0.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_hung_bulk_read_returns_promptly() {
    let (runtime, api) = runtime();
    api.hang_list(configmap_kind());
    let reconciler = Arc::new(Counting(AtomicUsize::new(0)));
    let added = runtime.add(controller(&runtime, reconciler.clone())).unwrap();

    let token = CancellationToken::new();
    let running = {
        let runtime = runtime.clone();
        let token = token.clone();
        tokio::spawn(async move { runtime.start(token).await })
    };

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!running.is_finished());
    token.cancel();

    tokio::time::timeout(Duration::from_secs(1), running)
        .await
        .expect("start did not return after cancellation")
        .unwrap()
        .unwrap();
    assert_eq!(reconciler.0.load(Ordering::SeqCst), 0);
    assert!(!runtime.cache().is_cached(&configmap_kind()));
    assert!(added.queue().is_empty());
}
