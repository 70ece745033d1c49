//! Distribution operator CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the distribution controller.

pub mod conditions;
pub mod distribution;

pub use conditions::*;
pub use distribution::*;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, SelectableField,
};
use kube::CustomResourceExt;

/// Distribution CRD with the selectable fields the reference index queries.
///
/// Older API servers ignore `selectableFields`; the controller falls back to
/// a full scan when the field selector is rejected.
pub fn distribution_crd() -> CustomResourceDefinition {
    let mut crd = Distribution::crd();
    for version in &mut crd.spec.versions {
        version.selectable_fields = Some(vec![SelectableField {
            json_path: USER_CONFIG_NAME_FIELD.to_string(),
        }]);
    }
    crd
}
