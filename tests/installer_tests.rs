//! # Installer Tests
//!
//! Idempotent application of per-provider manifests from a providers
//! directory.

mod common;

use common::FakeClusterApi;
use fleet_controller::crd::ProviderType;
use fleet_controller::looper::{Installer, InstallerError, StatusReporter};
use fleet_controller::queue::TenantLabels;
use fleet_controller::runtime::{ObjectKey, ResourceKindRef};
use std::path::Path;
use std::sync::atomic::Ordering;
use tempfile::TempDir;

const CRDS: &str = r#"
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: ipranges.cloud-resources.kyma-project.io
  annotations:
    fleet.cloud-control.io/version: "v2"
spec:
  group: cloud-resources.kyma-project.io
  names:
    kind: IpRange
    plural: ipranges
  scope: Namespaced
---
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: nfsvolumes.cloud-resources.kyma-project.io
  annotations:
    fleet.cloud-control.io/version: "v1"
    fleet.cloud-control.io/providers: aws
spec:
  group: cloud-resources.kyma-project.io
  names:
    kind: NfsVolume
    plural: nfsvolumes
  scope: Namespaced
"#;

const CONFIG: &str = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: cloud-resources
  namespace: kyma-system
  annotations:
    fleet.cloud-control.io/version: "1"
data:
  mode: managed
"#;

fn crd_kind() -> ResourceKindRef {
    ResourceKindRef::new("apiextensions.k8s.io", "v1", "CustomResourceDefinition")
}

fn providers_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    let gcp = dir.path().join("gcp");
    std::fs::create_dir(&gcp).unwrap();
    std::fs::write(gcp.join("10-crds.yaml"), CRDS).unwrap();
    std::fs::write(gcp.join("20-config.yml"), CONFIG).unwrap();
    std::fs::write(gcp.join("README.md"), "not a manifest").unwrap();
    dir
}

fn status() -> StatusReporter {
    StatusReporter::new(TenantLabels::new("tenant-install"), Some(ProviderType::Gcp))
}

fn outcomes(status: &StatusReporter) -> Vec<Vec<String>> {
    status
        .handles()
        .iter()
        .map(|h| h.outcomes().to_vec())
        .collect()
}

fn write(dir: &Path, provider: &str, file: &str, content: &str) {
    std::fs::write(dir.join(provider).join(file), content).unwrap();
}

#[tokio::test]
async fn test_fresh_cluster_gets_supported_objects_created() {
    let dir = providers_dir();
    let api = FakeClusterApi::new();
    let installer = Installer::new(dir.path());
    let mut status = status();

    let documents = installer
        .install(ProviderType::Gcp, &api, &mut status)
        .await
        .unwrap();

    assert_eq!(documents, 3);
    assert_eq!(
        outcomes(&status),
        vec![
            vec!["Creating".to_string()],
            vec!["NotSupportedByProvider".to_string()],
            vec!["Creating".to_string()],
        ]
    );
    assert!(status.handles().iter().all(|h| h.title() == "InstallerManifest"));
    assert_eq!(api.creates.load(Ordering::SeqCst), 2);
    assert!(api
        .stored(&crd_kind(), &ObjectKey::cluster("ipranges.cloud-resources.kyma-project.io"))
        .is_some());
    assert!(api
        .stored(&crd_kind(), &ObjectKey::cluster("nfsvolumes.cloud-resources.kyma-project.io"))
        .is_none());
}

#[tokio::test]
async fn test_second_install_is_a_no_op_for_same_versions() {
    let dir = providers_dir();
    let api = FakeClusterApi::new();
    let installer = Installer::new(dir.path());
    installer
        .install(ProviderType::Gcp, &api, &mut status())
        .await
        .unwrap();

    let mut again = status();
    installer
        .install(ProviderType::Gcp, &api, &mut again)
        .await
        .unwrap();

    assert_eq!(again.handles()[0].outcomes()[0], "AlreadyExistsWithSameVersion");
    assert_eq!(again.handles()[2].outcomes()[0], "AlreadyExistsWithSameVersion");
    assert_eq!(api.creates.load(Ordering::SeqCst), 2);
    assert_eq!(api.updates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_new_version_updates_the_existing_object() {
    let dir = providers_dir();
    let api = FakeClusterApi::new();
    let installer = Installer::new(dir.path());
    installer
        .install(ProviderType::Gcp, &api, &mut status())
        .await
        .unwrap();

    write(
        dir.path(),
        "gcp",
        "20-config.yml",
        &CONFIG
            .replace("version: \"1\"", "version: \"2\"")
            .replace("mode: managed", "mode: unmanaged"),
    );
    let mut again = status();
    installer
        .install(ProviderType::Gcp, &api, &mut again)
        .await
        .unwrap();

    assert_eq!(
        again.handles()[2].outcomes(),
        ["Updating", "ExistingVersion: 1", "DesiredVersion: 2"]
    );
    assert!(again.handles()[2].ok());
    let stored = api
        .stored(
            &ResourceKindRef::new("", "v1", "ConfigMap"),
            &ObjectKey::namespaced("kyma-system", "cloud-resources"),
        )
        .unwrap();
    assert_eq!(stored.data["data"]["mode"], "unmanaged");
    assert_eq!(api.updates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_crd_handles_carry_the_defined_kind() {
    let dir = providers_dir();
    let mut status = status();
    Installer::new(dir.path())
        .install(ProviderType::Gcp, &FakeClusterApi::new(), &mut status)
        .await
        .unwrap();

    let crd = &status.handles()[0];
    assert_eq!(crd.obj_kind_group(), "CustomResourceDefinition.apiextensions.k8s.io");
    assert_eq!(crd.crd_kind_group(), "iprange.cloud-resources.kyma-project.io");
    // Plain objects define no kind
    assert_eq!(status.handles()[2].crd_kind_group(), "");
}

#[tokio::test]
async fn test_missing_provider_directory_fails() {
    let dir = providers_dir();
    let err = Installer::new(dir.path())
        .install(ProviderType::Azure, &FakeClusterApi::new(), &mut status())
        .await
        .unwrap_err();
    assert!(matches!(err, InstallerError::Directory { .. }));
}

#[tokio::test]
async fn test_broken_manifest_fails_with_its_location() {
    let dir = providers_dir();
    write(dir.path(), "gcp", "30-broken.yaml", "apiVersion: v1\nkind: [unclosed\n");
    let err = Installer::new(dir.path())
        .install(ProviderType::Gcp, &FakeClusterApi::new(), &mut status())
        .await
        .unwrap_err();
    match err {
        InstallerError::Decode { path, doc, .. } => {
            assert!(path.ends_with("30-broken.yaml"));
            assert_eq!(doc, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}
