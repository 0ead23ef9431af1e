//! Flattens a config's parent chain plus the process-wide base into one
//! resolved `raw_config` document (§3, §4.1).

use provd_domain::{Collection, Config, Document, EngineError, Result};
use std::collections::HashSet;

/// Walks `parent_ids` depth-first, shallowest-last, detecting cycles
/// before any merge happens (§9 "Cyclic config parents"). `seen` tracks
/// the whole ancestry path walked so far, threaded through every
/// recursive branch so a cycle reachable through a later parent (not
/// just the first) is still caught rather than recursing forever.
pub async fn walk_parent_chain(configs: &dyn Collection, id: &str) -> Result<Vec<String>> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    walk_parent_chain_inner(configs, id, &mut chain, &mut seen).await?;
    Ok(chain)
}

fn walk_parent_chain_inner<'f>(
    configs: &'f dyn Collection,
    id: &'f str,
    chain: &'f mut Vec<String>,
    seen: &'f mut HashSet<String>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + 'f>> {
    Box::pin(async move {
        if !seen.insert(id.to_string()) {
            return Err(EngineError::CyclicConfig(id.to_string()));
        }
        if !chain.contains(&id.to_string()) {
            chain.push(id.to_string());
        }
        let Some(doc) = configs.retrieve(id).await? else {
            seen.remove(id);
            return Ok(());
        };
        let parents = Config::new(doc).parent_ids();
        for parent in parents {
            walk_parent_chain_inner(configs, &parent, chain, seen).await?;
        }
        seen.remove(id);
        Ok(())
    })
}

/// Resolves `id`'s raw-config: merge the process-wide `base`, then every
/// ancestor from deepest to shallowest, then `id` itself last so its own
/// keys win (§3 merge rule: per-key override, nested mappings merge,
/// everything else replaces).
pub async fn resolve_raw_config(
    configs: &dyn Collection,
    id: &str,
    base: &Document,
) -> Result<Option<Document>> {
    if configs.retrieve(id).await?.is_none() {
        return Ok(None);
    }
    let chain = walk_parent_chain(configs, id).await?;
    let mut resolved = base.clone();
    // `chain` is ordered id-first, parents-after; apply parents first so
    // the requested config's own keys are layered on last.
    for node_id in chain.into_iter().rev() {
        if let Some(doc) = configs.retrieve(&node_id).await? {
            let node = Config::new(doc);
            resolved.merge_from(&node.raw_config());
        }
    }
    Ok(Some(resolved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::InMemoryCollection;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_map(value.as_object().unwrap().clone())
    }

    #[tokio::test]
    async fn resolution_layers_parent_then_child_keys() {
        let configs = InMemoryCollection::new();
        configs
            .seed(doc(json!({
                "id": "parent",
                "raw_config": {"ip": "1.1.1.1", "sip_proxy_ip": "1.2.3.4"}
            })))
            .await;
        configs
            .seed(doc(json!({
                "id": "child",
                "parent_ids": ["parent"],
                "raw_config": {"sip_proxy_ip": "2.2.2.2"}
            })))
            .await;

        let base = doc(json!({"http_port": 8667, "tftp_port": 69}));
        let resolved = resolve_raw_config(&configs, "child", &base).await.unwrap().unwrap();
        assert_eq!(resolved.get_str("sip_proxy_ip"), Some("2.2.2.2"));
        assert_eq!(resolved.get_str("ip"), Some("1.1.1.1"));
        assert_eq!(resolved.get("http_port"), Some(&json!(8667)));
    }

    #[tokio::test]
    async fn missing_config_resolves_to_none() {
        let configs = InMemoryCollection::new();
        let base = doc(json!({}));
        assert!(resolve_raw_config(&configs, "ghost", &base).await.unwrap().is_none());
    }
}
