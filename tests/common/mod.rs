//! Shared fixtures for integration tests
//!
//! A small component graph: `acme.org/app` in four versions, each with a
//! manifests archive (local blob) and an nginx image, referencing
//! `acme.org/backend`.

#![allow(dead_code, reason = "each test binary uses a subset of the fixtures")]

use ocm_controller::artifact::FileSet;
use ocm_controller::ocm::repository::InMemoryRepository;
use ocm_controller::ocm::ComponentDescriptor;

pub const COMPONENT: &str = "acme.org/app";
pub const MANIFESTS_BLOB: &str = "sha256:4d5f0c1b8a";

pub const VALUES: &str = "registry: placeholder\nimage:\n  tag: latest\n";

pub const DEPLOYMENT: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  replicas: 1
  template:
    spec:
      containers:
        - name: web
          image: placeholder
"#;

pub const SETTINGS: &str = r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: web-settings
data:
  greeting: "[[ .greeting ]]"
  braces: "{{ untouched }}"
"#;

pub fn app_descriptor(version: &str) -> ComponentDescriptor {
    let yaml = format!(
        r#"
meta:
  schemaVersion: v2
component:
  name: acme.org/app
  version: {version}
  provider: acme
  resources:
    - name: manifests
      version: {version}
      type: blob
      relation: local
      access:
        type: localBlob
        localReference: {MANIFESTS_BLOB}
        mediaType: application/x-tar+gzip
    - name: image
      version: 1.25.0
      type: ociImage
      relation: external
      access:
        type: ociArtifact
        imageReference: docker.io/library/nginx:1.25
  componentReferences:
    - name: backend
      componentName: acme.org/backend
      version: 2.0.0
"#
    );
    ComponentDescriptor::from_slice(yaml.as_bytes()).unwrap()
}

pub fn backend_descriptor() -> ComponentDescriptor {
    ComponentDescriptor::from_slice(
        br#"
meta:
  schemaVersion: v2
component:
  name: acme.org/backend
  version: 2.0.0
  provider: acme
  resources:
    - name: image
      version: 2.0.0
      type: ociImage
      relation: external
      access:
        type: ociArtifact
        imageReference: ghcr.io/acme/backend:2.0.0
"#,
    )
    .unwrap()
}

pub fn manifests_archive() -> Vec<u8> {
    FileSet::from_files([
        ("values.yaml", VALUES),
        ("deploy/deployment.yaml", DEPLOYMENT),
        ("deploy/settings.yaml", SETTINGS),
    ])
    .unwrap()
    .to_bytes()
    .unwrap()
}

/// Repository holding app 0.9.0, 1.0.0, 1.5.0 and 2.0.0 plus the backend
pub fn repository() -> InMemoryRepository {
    ["0.9.0", "1.0.0", "1.5.0", "2.0.0"]
        .iter()
        .fold(InMemoryRepository::new(), |repo, version| {
            repo.with_descriptor(app_descriptor(version))
        })
        .with_descriptor(backend_descriptor())
        .with_blob(MANIFESTS_BLOB, manifests_archive())
}
