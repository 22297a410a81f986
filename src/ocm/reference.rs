//! # Resource Reference Resolution
//!
//! Walks a reference path through nested component references and locates
//! the referenced resource.

use crate::crd::{Identity, ResourceReference};
use crate::ocm::descriptor::{
    ComponentDescriptor, DescriptorError, DescriptorResource, DescriptorSet,
};

/// Every attribute of `selector` must be present with the same value in `identity`
fn matches(selector: &Identity, identity: &Identity) -> bool {
    selector
        .iter()
        .all(|(key, value)| identity.get(key) == Some(value))
}

fn describe(selector: &Identity) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Resolve `reference` starting at the root component version.
///
/// Each hop must match exactly one component reference of the current
/// descriptor; the final resource must match exactly one resource.
pub fn resolve_resource<'a>(
    set: &'a DescriptorSet,
    root_component: &str,
    root_version: &str,
    reference: &ResourceReference,
) -> Result<(&'a DescriptorResource, &'a ComponentDescriptor), DescriptorError> {
    let mut current = set.lookup(root_component, root_version)?;

    for hop in &reference.reference_path {
        let candidates: Vec<_> = current
            .component
            .component_references
            .iter()
            .filter(|r| matches(hop, &r.identity()))
            .collect();
        let next = match candidates.as_slice() {
            [single] => *single,
            [] => {
                return Err(DescriptorError::ReferenceNotFound {
                    component: format!("{}:{}", current.name(), current.version()),
                    reference: describe(hop),
                })
            }
            _ => {
                return Err(DescriptorError::AmbiguousReference {
                    component: format!("{}:{}", current.name(), current.version()),
                    reference: describe(hop),
                })
            }
        };
        current = set.lookup(&next.component_name, &next.version)?;
    }

    let candidates: Vec<_> = current
        .component
        .resources
        .iter()
        .filter(|r| matches(&reference.resource, &r.identity()))
        .collect();
    match candidates.as_slice() {
        [single] => Ok((*single, current)),
        [] => Err(DescriptorError::ResourceNotFound {
            component: format!("{}:{}", current.name(), current.version()),
            resource: describe(&reference.resource),
        }),
        many => Err(DescriptorError::AmbiguousResource {
            component: format!("{}:{}", current.name(), current.version()),
            resource: describe(&reference.resource),
            count: many.len(),
        }),
    }
}
