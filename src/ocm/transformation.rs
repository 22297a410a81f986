//! # Transformations
//!
//! Pure functions extracting parts of an image reference of the form
//! `[registry/]repository[:tag][@digest]`.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("unknown transformation type {0:?}")]
    Unknown(String),
}

/// Named transformation over an access value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransformationType {
    #[default]
    Image,
    ImageNoTag,
    Registry,
    Repository,
    Tag,
}

impl FromStr for TransformationType {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "Image" => Ok(TransformationType::Image),
            "ImageNoTag" => Ok(TransformationType::ImageNoTag),
            "Registry" => Ok(TransformationType::Registry),
            "Repository" => Ok(TransformationType::Repository),
            "Tag" => Ok(TransformationType::Tag),
            other => Err(TransformError::Unknown(other.to_string())),
        }
    }
}

impl fmt::Display for TransformationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransformationType::Image => "Image",
            TransformationType::ImageNoTag => "ImageNoTag",
            TransformationType::Registry => "Registry",
            TransformationType::Repository => "Repository",
            TransformationType::Tag => "Tag",
        };
        f.write_str(name)
    }
}

/// Syntactic parts of an image reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageReference<'a> {
    /// Part before the first `/`, empty when there is none
    pub registry: &'a str,
    pub repository: &'a str,
    pub tag: &'a str,
    pub digest: &'a str,
}

impl<'a> ImageReference<'a> {
    pub fn parse(raw: &'a str) -> Self {
        let (name, digest) = raw.split_once('@').unwrap_or((raw, ""));
        // a `:` before the last `/` belongs to a registry port
        let last_slash = name.rfind('/');
        let (name, tag) = match name.rfind(':') {
            Some(colon) if last_slash.is_none_or(|slash| colon > slash) => {
                (&name[..colon], &name[colon + 1..])
            }
            _ => (name, ""),
        };
        let (registry, repository) = name.split_once('/').unwrap_or(("", name));
        Self {
            registry,
            repository,
            tag,
            digest,
        }
    }

    /// `registry/repository` without tag or digest
    pub fn name(&self) -> String {
        if self.registry.is_empty() {
            self.repository.to_string()
        } else {
            format!("{}/{}", self.registry, self.repository)
        }
    }
}

/// Apply `transformation` to an access value
pub fn apply(transformation: TransformationType, raw: &str) -> String {
    let reference = ImageReference::parse(raw);
    match transformation {
        TransformationType::Image => raw.to_string(),
        TransformationType::ImageNoTag => reference.name(),
        TransformationType::Registry => reference.registry.to_string(),
        TransformationType::Repository => reference.repository.to_string(),
        TransformationType::Tag => reference.tag.to_string(),
    }
}

/// Parse the transformation name and apply it
pub fn apply_named(name: &str, raw: &str) -> Result<String, TransformError> {
    Ok(apply(name.parse()?, raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NGINX: &str = "docker.io/library/nginx:1.25";

    #[test]
    fn test_transformations_on_full_reference() {
        assert_eq!(apply(TransformationType::Image, NGINX), NGINX);
        assert_eq!(
            apply(TransformationType::ImageNoTag, NGINX),
            "docker.io/library/nginx"
        );
        assert_eq!(apply(TransformationType::Registry, NGINX), "docker.io");
        assert_eq!(apply(TransformationType::Repository, NGINX), "library/nginx");
        assert_eq!(apply(TransformationType::Tag, NGINX), "1.25");
    }

    #[test]
    fn test_roundtrip_registry_repository_tag() {
        for image in [
            NGINX,
            "ghcr.io/acme/app:6.2.0",
            "localhost:5000/team/service/api:v1",
        ] {
            let rebuilt = format!(
                "{}/{}:{}",
                apply(TransformationType::Registry, image),
                apply(TransformationType::Repository, image),
                apply(TransformationType::Tag, image)
            );
            assert_eq!(rebuilt, image, "Round trip failed for {image}");
            assert_eq!(
                apply(TransformationType::ImageNoTag, image),
                format!(
                    "{}/{}",
                    apply(TransformationType::Registry, image),
                    apply(TransformationType::Repository, image)
                )
            );
        }
    }

    #[test]
    fn test_missing_parts_are_empty() {
        assert_eq!(apply(TransformationType::Registry, "nginx:1.25"), "");
        assert_eq!(apply(TransformationType::Repository, "nginx:1.25"), "nginx");
        assert_eq!(apply(TransformationType::Tag, "ghcr.io/acme/app"), "");
        assert_eq!(apply(TransformationType::Tag, "localhost:5000/app"), "");
        assert_eq!(
            apply(TransformationType::Repository, "localhost:5000/app"),
            "app"
        );
    }

    #[test]
    fn test_digest_is_not_part_of_tag() {
        let image = "ghcr.io/acme/app:1.0.0@sha256:abcdef";
        assert_eq!(apply(TransformationType::Tag, image), "1.0.0");
        assert_eq!(apply(TransformationType::ImageNoTag, image), "ghcr.io/acme/app");
        assert_eq!(ImageReference::parse(image).digest, "sha256:abcdef");
    }

    #[test]
    fn test_unknown_transformation() {
        assert_eq!(
            apply_named("Hostname", NGINX),
            Err(TransformError::Unknown("Hostname".to_string()))
        );
        assert_eq!(apply_named("", NGINX).unwrap(), NGINX);
    }
}
