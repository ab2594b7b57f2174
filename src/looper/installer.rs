//! # Manifest Installer
//!
//! Applies the per-provider manifests every tenant needs before its
//! controllers start, typically the CRDs of the resources they reconcile.
//!
//! Manifests are read from `<providers_dir>/<provider>/*.yaml`, in file name
//! order, and may hold several YAML documents each. Every object gets one
//! `InstallerManifest` handle in the pass status:
//!
//! - provider excluded by the `fleet.cloud-control.io/providers` annotation:
//!   `NotSupportedByProvider`
//! - present with the same `fleet.cloud-control.io/version` annotation:
//!   `AlreadyExistsWithSameVersion`
//! - present with another version: `spec`, `data`, labels and annotations are
//!   copied onto it and it is updated (`Updating`)
//! - absent: `Creating`
//!
//! The first failed write stops the installer and fails the pass.

use super::status::StatusReporter;
use crate::constants::{ANNOTATION_PROVIDERS, ANNOTATION_VERSION};
use crate::crd::ProviderType;
use crate::runtime::{ApiError, ClusterApi, ObjectKey, ResourceKindRef};
use kube::core::DynamicObject;
use kube::ResourceExt;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, info};

static MANIFEST_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.+\.ya?ml$").expect("Failed to compile MANIFEST_FILE regex - this should never happen")
});

const CRD_KIND: &str = "CustomResourceDefinition";

#[derive(Debug, Error)]
pub enum InstallerError {
    #[error("installer directory {dir} is not readable: {source}")]
    Directory {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error reading manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error decoding document #{doc} in {path}: {source}")]
    Decode {
        path: PathBuf,
        doc: usize,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("document #{doc} in {path} has no apiVersion/kind")]
    MissingKind { path: PathBuf, doc: usize },

    #[error("error applying {kind} {name}: {source}")]
    Apply {
        kind: ResourceKindRef,
        name: String,
        #[source]
        source: ApiError,
    },
}

pub struct Installer {
    providers_dir: PathBuf,
}

impl Installer {
    pub fn new(providers_dir: impl Into<PathBuf>) -> Self {
        Self {
            providers_dir: providers_dir.into(),
        }
    }

    /// Apply every manifest of `provider`; returns the number of documents seen
    pub async fn install(
        &self,
        provider: ProviderType,
        api: &dyn ClusterApi,
        status: &mut StatusReporter,
    ) -> Result<usize, InstallerError> {
        let dir = self.providers_dir.join(provider.as_str());
        let files = manifest_files(&dir).await?;
        debug!(dir = %dir.display(), "Installing {} manifest files", files.len());

        let mut documents = 0;
        for file in files {
            documents += self.apply_file(&file, provider, api, status).await?;
        }
        if documents > 0 {
            info!(provider = %provider, "Installed {} manifest documents", documents);
        }
        Ok(documents)
    }

    async fn apply_file(
        &self,
        path: &Path,
        provider: ProviderType,
        api: &dyn ClusterApi,
        status: &mut StatusReporter,
    ) -> Result<usize, InstallerError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| InstallerError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let objects = decode_documents(path, &content)?;
        let count = objects.len();
        for (kind, desired) in objects {
            let handle = status.handle("InstallerManifest");
            handle
                .with_kind(&kind)
                .with_obj(&desired)
                .with_filename(filename.clone());
            if kind.kind == CRD_KIND {
                if let Some(crd) = crd_kind_group(&desired) {
                    handle.with_crd_kind(crd);
                }
            }

            if !supports_provider(&desired, provider) {
                handle.not_supported_by_provider();
                continue;
            }

            let key = ObjectKey::from_object(&desired);
            let existing = api
                .get(&kind, &key)
                .await
                .map_err(|source| InstallerError::Apply {
                    kind: kind.clone(),
                    name: key.to_string(),
                    source,
                })?;

            let result = match existing {
                Some(mut existing) => {
                    let desired_version = version_of(&desired);
                    let existing_version = version_of(&existing);
                    if desired_version == existing_version {
                        handle.already_exists_with_same_version(&desired_version);
                        continue;
                    }
                    copy_for_update(&desired, &mut existing);
                    handle.updating(&existing_version, &desired_version);
                    api.update(&kind, &existing).await
                }
                None => {
                    handle.creating();
                    api.create(&kind, &desired).await
                }
            };

            if let Err(source) = result {
                handle.error(&source);
                return Err(InstallerError::Apply {
                    kind,
                    name: key.to_string(),
                    source,
                });
            }
            handle.success();
        }
        Ok(count)
    }
}

async fn manifest_files(dir: &Path) -> Result<Vec<PathBuf>, InstallerError> {
    let dir_err = |source| InstallerError::Directory {
        dir: dir.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(dir_err)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(dir_err)? {
        let name = entry.file_name();
        if MANIFEST_FILE.is_match(&name.to_string_lossy()) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Split a multi-document manifest into objects, skipping empty documents
fn decode_documents(
    path: &Path,
    content: &str,
) -> Result<Vec<(ResourceKindRef, DynamicObject)>, InstallerError> {
    let mut objects = Vec::new();
    for (i, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let doc = i + 1;
        let decode_err = |source| InstallerError::Decode {
            path: path.to_path_buf(),
            doc,
            source,
        };
        let value = serde_yaml::Value::deserialize(document).map_err(decode_err)?;
        if value.is_null() {
            continue;
        }
        let obj: DynamicObject = serde_yaml::from_value(value).map_err(decode_err)?;
        let kind = ResourceKindRef::from_object(&obj).ok_or_else(|| InstallerError::MissingKind {
            path: path.to_path_buf(),
            doc,
        })?;
        objects.push((kind, obj));
    }
    Ok(objects)
}

fn supports_provider(obj: &DynamicObject, provider: ProviderType) -> bool {
    match obj.annotations().get(ANNOTATION_PROVIDERS) {
        None => true,
        Some(list) => list
            .split(',')
            .any(|p| p.trim().eq_ignore_ascii_case(provider.as_str())),
    }
}

fn version_of(obj: &DynamicObject) -> String {
    obj.annotations()
        .get(ANNOTATION_VERSION)
        .cloned()
        .unwrap_or_default()
}

/// `kind.group` of the resource a CRD defines, lowercase
fn crd_kind_group(crd: &DynamicObject) -> Option<String> {
    let kind = crd.data.pointer("/spec/names/kind")?.as_str()?;
    let group = crd.data.pointer("/spec/group")?.as_str()?;
    Some(format!("{}.{}", kind.to_lowercase(), group))
}

fn copy_for_update(from: &DynamicObject, to: &mut DynamicObject) {
    for field in ["spec", "data"] {
        if let Some(value) = from.data.get(field) {
            if let Some(target) = to.data.as_object_mut() {
                target.insert(field.to_string(), value.clone());
            }
        }
    }
    if from.metadata.labels.is_some() {
        to.metadata.labels = from.metadata.labels.clone();
    }
    if from.metadata.annotations.is_some() {
        to.metadata.annotations = from.metadata.annotations.clone();
    }
}
