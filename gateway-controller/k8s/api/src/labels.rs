use std::collections::BTreeMap;

pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "gateway-controller";

/// Labels stamped onto every object this controller creates.
pub fn managed() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string());
    labels
}

/// Returns true if the labels mark an object as created by this controller.
pub fn is_managed(labels: &BTreeMap<String, String>) -> bool {
    labels.get(MANAGED_BY).map(String::as_str) == Some(MANAGED_BY_VALUE)
}

/// Records the upstream namespace a downstream object was generated for.
pub const UPSTREAM_NAMESPACE: &str = "networking.datumapis.com/upstream-namespace";
