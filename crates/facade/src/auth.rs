//! Pluggable authentication boundary (§6): the engine itself does not
//! implement auth, but every resource handler consults a `TokenVerifier`
//! and an ACL tag evaluated against the request's path variables.

use async_trait::async_trait;

/// Consulted once per request with the bearer token (if any) and the
/// ACL tag the handler requires, e.g. `provd.dev_mgr.devices.{id}.update`
/// with `{id}` already substituted.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn authorize(&self, token: Option<&str>, acl_tag: &str) -> bool;
}

/// Accepts every request. Stands in for the real token verifier this
/// workspace does not implement (auth is out of scope for the core).
pub struct PermissiveVerifier;

#[async_trait]
impl TokenVerifier for PermissiveVerifier {
    async fn authorize(&self, _token: Option<&str>, _acl_tag: &str) -> bool {
        true
    }
}

/// Substitutes `{var}` placeholders in an ACL tag template with the
/// request's path variables, e.g. `acl_tag("provd.dev_mgr.devices.{id}.update", &[("id", "d1")])`
/// yields `"provd.dev_mgr.devices.d1.update"`.
pub fn acl_tag(template: &str, vars: &[(&str, &str)]) -> String {
    let mut tag = template.to_string();
    for (name, value) in vars {
        tag = tag.replace(&format!("{{{name}}}"), value);
    }
    tag
}
