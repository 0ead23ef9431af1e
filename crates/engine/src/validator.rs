//! Raw-config validation and defaulting (§4.2). Ported close to the
//! original engine's checks: the exact set of mandatory keys,
//! conditional requirements, and post-validation defaults.

use provd_domain::{Document, EngineError, Result};
use serde_json::{json, Value};

const MANDATORY: &[&str] = &["ip", "http_port", "tftp_port"];

/// Validates `raw_config` against §4.2 and returns it with defaults
/// applied. Never mutates the input; always returns a new document.
pub fn check_and_default(raw_config: &Document) -> Result<Document> {
    check_mandatory(raw_config)?;
    check_conditional(raw_config)?;
    check_sip_lines(raw_config)?;
    check_sccp_call_managers(raw_config)?;
    check_funckeys(raw_config)?;
    Ok(apply_defaults(raw_config))
}

fn check_mandatory(raw_config: &Document) -> Result<()> {
    for key in MANDATORY {
        if !raw_config.contains_key(key) {
            return Err(EngineError::RawConfigInvalid(format!("missing mandatory key {key}")));
        }
    }
    Ok(())
}

fn check_conditional(raw_config: &Document) -> Result<()> {
    let pairs = [
        ("ntp_enabled", "ntp_ip"),
        ("vlan_enabled", "vlan_id"),
        ("syslog_enabled", "syslog_ip"),
    ];
    for (flag, required) in pairs {
        if raw_config.get_bool(flag).unwrap_or(false) && !raw_config.contains_key(required) {
            return Err(EngineError::RawConfigInvalid(format!(
                "{flag} is set but {required} is missing"
            )));
        }
    }
    Ok(())
}

fn check_sip_lines(raw_config: &Document) -> Result<()> {
    let Some(lines) = raw_config.get("sip_lines").and_then(Value::as_array) else {
        return Ok(());
    };
    let has_site_proxy = raw_config.contains_key("sip_proxy_ip");
    for line in lines {
        let Some(line) = line.as_object() else {
            return Err(EngineError::RawConfigInvalid("sip_lines entry must be an object".into()));
        };
        if line.get("protocol").and_then(Value::as_str) == Some("SIP") {
            for field in ["username", "password", "display_name"] {
                if !line.contains_key(field) {
                    return Err(EngineError::RawConfigInvalid(format!(
                        "sip_lines entry missing {field}"
                    )));
                }
            }
            if !line.contains_key("proxy_ip") && !has_site_proxy {
                return Err(EngineError::RawConfigInvalid(
                    "sip_lines entry missing proxy_ip and no site-wide sip_proxy_ip".into(),
                ));
            }
        }
    }
    Ok(())
}

fn check_sccp_call_managers(raw_config: &Document) -> Result<()> {
    let Some(managers) = raw_config.get("sccp_call_managers").and_then(Value::as_array) else {
        return Ok(());
    };
    for manager in managers {
        let has_ip = manager.as_object().map(|m| m.contains_key("ip")).unwrap_or(false);
        if !has_ip {
            return Err(EngineError::RawConfigInvalid("sccp_call_managers entry missing ip".into()));
        }
    }
    Ok(())
}

fn check_funckeys(raw_config: &Document) -> Result<()> {
    let Some(funckeys) = raw_config.get("funckeys").and_then(Value::as_array) else {
        return Ok(());
    };
    for key in funckeys {
        let Some(key) = key.as_object() else {
            return Err(EngineError::RawConfigInvalid("funckeys entry must be an object".into()));
        };
        let kind = key.get("type").and_then(Value::as_str);
        match kind {
            None => return Err(EngineError::RawConfigInvalid("funckeys entry missing type".into())),
            Some("speeddial") | Some("blf") => {
                if !key.contains_key("value") {
                    return Err(EngineError::RawConfigInvalid(format!(
                        "funckeys entry of type {} missing value",
                        kind.unwrap()
                    )));
                }
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn apply_defaults(raw_config: &Document) -> Document {
    let mut out = raw_config.clone();

    if out.get_bool("syslog_enabled").unwrap_or(false) {
        if !out.contains_key("syslog_port") {
            out.set("syslog_port", json!(514));
        }
        if !out.contains_key("level") {
            out.set("level", json!("warning"));
        }
    }

    if let Some(site_proxy) = out.get("sip_proxy_ip").cloned() {
        if !out.contains_key("sip_registrar_ip") {
            out.set("sip_registrar_ip", site_proxy);
        }
    }

    if !out.contains_key("sip_srtp_mode") {
        out.set("sip_srtp_mode", json!("disabled"));
    }
    if !out.contains_key("sip_transport") {
        out.set("sip_transport", json!("udp"));
    }

    for field in ["sip_lines", "sccp_call_managers", "funckeys"] {
        if !out.contains_key(field) {
            out.set(field, json!([]));
        }
    }

    let site_proxy_ip = out.get("sip_proxy_ip").cloned();
    if let Some(lines) = out.get("sip_lines").and_then(Value::as_array).cloned() {
        let defaulted: Vec<Value> = lines
            .into_iter()
            .map(|line| {
                let mut line = line.as_object().cloned().unwrap_or_default();
                if !line.contains_key("proxy_ip") {
                    if let Some(site_proxy_ip) = site_proxy_ip.clone() {
                        line.insert("proxy_ip".to_string(), site_proxy_ip);
                    }
                }
                if let Some(proxy_ip) = line.get("proxy_ip").cloned() {
                    line.entry("registrar_ip").or_insert(proxy_ip);
                }
                if let Some(username) = line.get("username").cloned() {
                    line.entry("auth_username").or_insert(username);
                }
                Value::Object(line)
            })
            .collect();
        out.set("sip_lines", Value::Array(defaulted));
    }

    out
}
