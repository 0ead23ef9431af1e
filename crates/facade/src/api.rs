//! The resource tree of §6, mounted under `/0.2`.
//!
//! Every handler consults the pluggable [`TokenVerifier`] before
//! touching the engine, then acquires the app's single writer-preferring
//! lock for the duration of the engine call it drives. `EngineError`
//! variants map to the status codes this facade promises callers via
//! [`status_for`]; nothing here interprets device configuration content,
//! that stays the plugin's job.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine as _;
use provd_domain::{
    Collection, Device, Document, EngineError, FindOptions, IdentRequest, Selector, SortOrder,
    Transport,
};
use provd_engine::{
    AddDeviceRetriever, AddInfoUpdater, ConfigLifecycle, DeviceLifecycle, ExactFieldRetriever,
    ExtractorMergePolicy, FixedInfoExtractor, IdentificationPipeline, RemoveOutdatedIpUpdater,
    RetrieverChain,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;
use uuid::Uuid;

use crate::auth::acl_tag;
use crate::state::AppState;

const MEDIA_TYPE: &str = "application/vnd.proformatique.provd+json";

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/0.2/dev_mgr/devices", get(list_devices).post(create_device))
        .route(
            "/0.2/dev_mgr/devices/{id}",
            get(get_device).put(update_device).delete(delete_device),
        )
        .route("/0.2/dev_mgr/synchronize", post(synchronize_device))
        .route("/0.2/dev_mgr/reconfigure", post(reconfigure_device))
        .route("/0.2/dev_mgr/dhcpinfo", post(dhcp_info))
        .route("/0.2/cfg_mgr/configs", get(list_configs).post(create_config))
        .route(
            "/0.2/cfg_mgr/configs/{id}",
            get(get_config).put(update_config).delete(delete_config),
        )
        .route("/0.2/cfg_mgr/configs/{id}/raw", get(get_raw_config))
        .route("/0.2/cfg_mgr/autocreate", post(autocreate_config))
        .route("/0.2/pg_mgr/install", post(pg_install))
        .route("/0.2/pg_mgr/uninstall", post(pg_uninstall))
        .route("/0.2/pg_mgr/installed", get(pg_installed))
        .route("/0.2/pg_mgr/installable", get(pg_installable))
        .route("/0.2/pg_mgr/upgrade", post(pg_upgrade))
        .route("/0.2/pg_mgr/update", post(pg_update))
        .route("/0.2/pg_mgr/plugins/{pid}/info", get(pg_plugin_info))
        .route("/0.2/pg_mgr/plugins/{pid}/install", post(pg_plugin_install))
        .route("/0.2/pg_mgr/plugins/{pid}/configure", post(pg_plugin_configure))
        .route("/0.2/pg_mgr/reload", post(pg_reload))
        .route("/0.2/configure/{name}", get(get_param).put(set_param))
        .route("/0.2/status", get(status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn provd_json(status: StatusCode, body: Value) -> Response {
    let mut resp = (status, Json(body)).into_response();
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(MEDIA_TYPE));
    resp
}

fn bad_request(message: impl Into<String>) -> Response {
    provd_json(StatusCode::BAD_REQUEST, json!({"error": message.into()}))
}

fn not_found(message: impl Into<String>) -> Response {
    provd_json(StatusCode::NOT_FOUND, json!({"error": message.into()}))
}

fn location(id: &str, status: StatusCode, body: Value, path: &str) -> Response {
    let mut resp = provd_json(status, body);
    if let Ok(value) = HeaderValue::from_str(&format!("/0.2/{path}/{id}")) {
        resp.headers_mut().insert(header::LOCATION, value);
    }
    resp
}

/// Maps the engine's error taxonomy to the status codes this facade's
/// callers can rely on (§6, §7).
fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::InvalidId(_) => StatusCode::NOT_FOUND,
        EngineError::NonDeletable(_) => StatusCode::FORBIDDEN,
        EngineError::InvalidParameter { .. } => StatusCode::BAD_REQUEST,
        EngineError::RawConfigInvalid(_) => StatusCode::BAD_REQUEST,
        EngineError::PluginNotLoaded(_) => StatusCode::NOT_FOUND,
        EngineError::PluginAlreadyInstalled(_) => StatusCode::BAD_REQUEST,
        EngineError::PluginBusy(_) => StatusCode::BAD_REQUEST,
        EngineError::TenantInvalidForDevice { .. } => StatusCode::FORBIDDEN,
        EngineError::DeviceNotInProvdTenant(_) => StatusCode::FORBIDDEN,
        EngineError::Unauthorized => StatusCode::UNAUTHORIZED,
        EngineError::SyncUnsupported => StatusCode::BAD_REQUEST,
        EngineError::SyncFailed(_) => StatusCode::BAD_REQUEST,
        EngineError::UnknownKey(_) => StatusCode::BAD_REQUEST,
        EngineError::CyclicConfig(_) => StatusCode::BAD_REQUEST,
        EngineError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: EngineError) -> Response {
    let status = status_for(&err);
    warn!(error = %err, %status, "request failed");
    provd_json(status, json!({"error": err.to_string()}))
}

async fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    acl_template: &str,
    vars: &[(&str, &str)],
) -> Result<(), Response> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let tag = acl_tag(acl_template, vars);
    if state.verifier.authorize(token, &tag).await {
        Ok(())
    } else {
        Err(provd_json(StatusCode::UNAUTHORIZED, json!({"error": "unauthorized"})))
    }
}

// ---- query parsing (§6: q/q64/fields/skip/limit/sort/sort_ord) ----

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    q: Option<String>,
    q64: Option<String>,
    fields: Option<String>,
    skip: Option<usize>,
    limit: Option<usize>,
    sort: Option<String>,
    sort_ord: Option<String>,
}

fn parse_selector_object(obj: &serde_json::Map<String, Value>) -> Vec<Selector> {
    obj.iter()
        .map(|(field, value)| match value {
            Value::Object(m) if m.contains_key("$in") => {
                let values = m.get("$in").and_then(Value::as_array).cloned().unwrap_or_default();
                Selector::In(field.clone(), values)
            }
            Value::Object(m) if m.contains_key("$ne") => {
                Selector::Ne(field.clone(), m.get("$ne").cloned().unwrap_or(Value::Null))
            }
            _ => Selector::Eq(field.clone(), value.clone()),
        })
        .collect()
}

/// Parses `q`/`q64` plus the paging/projection/sort params into a
/// selector and `FindOptions`. When both `q` and `q64` are present,
/// `q64` wins and `q` is silently ignored — the precedence this facade
/// preserves rather than re-derives at each call site.
fn parse_list_query(q: &ListQuery) -> (Vec<Selector>, FindOptions) {
    let raw = q
        .q64
        .as_deref()
        .and_then(|encoded| base64::engine::general_purpose::STANDARD.decode(encoded).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .or_else(|| q.q.clone());

    let selectors = raw
        .and_then(|s| serde_json::from_str::<Value>(&s).ok())
        .and_then(|v| v.as_object().cloned())
        .map(|obj| parse_selector_object(&obj))
        .unwrap_or_default();

    let fields = q.fields.as_deref().map(|f| f.split(',').map(str::to_string).collect());
    let sort = q.sort.as_ref().map(|field| {
        let ord = match q.sort_ord.as_deref() {
            Some("DESC") => SortOrder::Desc,
            _ => SortOrder::Asc,
        };
        (field.clone(), ord)
    });

    (selectors, FindOptions { fields, skip: q.skip, limit: q.limit, sort })
}

// ---- dev_mgr ----

pub async fn list_devices(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<ListQuery>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.dev_mgr.devices.read", &[]).await {
        return resp;
    }
    let _guard = state.lock.read().await;
    let (selectors, options) = parse_list_query(&q);
    match state.devices().find(selectors, options).await {
        Ok(docs) => provd_json(StatusCode::OK, json!({ "devices": docs })),
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize)]
struct DeviceBody {
    device: Value,
}

pub async fn create_device(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<DeviceBody>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.dev_mgr.devices.create", &[]).await {
        return resp;
    }
    let Some(obj) = body.device.as_object().cloned() else {
        return bad_request("device must be a JSON object");
    };
    let device = Device::new(Document::from_map(obj));
    let _guard = state.lock.write().await;
    let lifecycle = device_lifecycle(&state);
    match lifecycle.insert(device, &state.current_tenant).await {
        Ok(id) => location(&id, StatusCode::CREATED, json!({ "id": id }), "dev_mgr/devices"),
        Err(err) => error_response(err),
    }
}

pub async fn get_device(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.dev_mgr.devices.{id}.read", &[("id", &id)]).await {
        return resp;
    }
    let _guard = state.lock.read().await;
    match state.devices().retrieve(&id).await {
        Ok(Some(doc)) => provd_json(StatusCode::OK, json!({ "device": doc })),
        Ok(None) => not_found(format!("no device with id {id}")),
        Err(err) => error_response(err),
    }
}

pub async fn update_device(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<DeviceBody>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.dev_mgr.devices.{id}.update", &[("id", &id)]).await {
        return resp;
    }
    let Some(mut obj) = body.device.as_object().cloned() else {
        return bad_request("device must be a JSON object");
    };
    obj.insert("id".to_string(), Value::String(id));
    let device = Device::new(Document::from_map(obj));
    let _guard = state.lock.write().await;
    let lifecycle = device_lifecycle(&state);
    match lifecycle.update(device, &state.current_tenant).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn delete_device(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.dev_mgr.devices.{id}.delete", &[("id", &id)]).await {
        return resp;
    }
    let _guard = state.lock.write().await;
    let lifecycle = device_lifecycle(&state);
    match lifecycle.delete(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize)]
struct IdBody {
    id: String,
}

pub async fn synchronize_device(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<IdBody>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.dev_mgr.synchronize", &[]).await {
        return resp;
    }
    let _guard = state.lock.write().await;
    let lifecycle = device_lifecycle(&state);
    let outcome = lifecycle.synchronize(&body.id).await;
    if let Err(EngineError::SyncUnsupported) = outcome {
        return error_response(EngineError::SyncUnsupported);
    }
    let key = format!("sync:{}", body.id);
    let oip = state.sync_oips.begin(&key).unwrap_or_else(|_| provd_domain::Oip::new());
    match outcome {
        Ok(()) => oip.mark_success(),
        Err(err) => {
            warn!(device = %body.id, error = %err, "synchronize failed");
            oip.mark_fail();
        }
    }
    location(&key, StatusCode::CREATED, json!({ "oip": key }), "dev_mgr/synchronize")
}

pub async fn reconfigure_device(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<IdBody>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.dev_mgr.reconfigure", &[]).await {
        return resp;
    }
    let _guard = state.lock.write().await;
    let lifecycle = device_lifecycle(&state);
    match lifecycle.reconfigure(&body.id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct DhcpInfo {
    op: String,
    ip: String,
    mac: Option<String>,
    options: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct DhcpInfoBody {
    dhcp_info: DhcpInfo,
}

/// Decodes one `NNN.XX.XX.…` option string into its code and byte
/// string (§6): the first dot-separated field is the decimal option
/// code, the rest are hex byte pairs.
fn decode_dhcp_option(raw: &str) -> Option<(u8, Vec<u8>)> {
    let mut parts = raw.split('.');
    let code: u8 = parts.next()?.parse().ok()?;
    let bytes = parts.map(|p| u8::from_str_radix(p, 16).ok()).collect::<Option<Vec<u8>>>()?;
    Some((code, bytes))
}

/// Observations arrive here already parsed by the (out-of-scope) DHCP
/// helper, so there is no per-plugin extractor to run — the vendor
/// class identifier (option 60) already tells us what we'd otherwise
/// extract. Only `op == "commit"` carries information worth folding
/// into the identification pipeline's retrieve/update steps (§4.7).
pub async fn dhcp_info(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<DhcpInfoBody>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.dev_mgr.dhcpinfo", &[]).await {
        return resp;
    }
    let info = body.dhcp_info;
    if info.op != "commit" {
        return StatusCode::NO_CONTENT.into_response();
    }

    let mut observed = Document::new();
    observed.set("ip", info.ip.clone());
    if let Some(mac) = &info.mac {
        observed.set("mac", mac.clone());
    }
    let mut first_option60 = None;
    if let Some(options) = &info.options {
        for raw in options {
            if let Some((60, bytes)) = decode_dhcp_option(raw) {
                if let Ok(vendor) = String::from_utf8(bytes) {
                    observed.set("vendor", vendor);
                }
                first_option60 = Some(raw.clone());
            }
        }
    }

    let request = IdentRequest { ip: info.ip.clone(), transport: Transport::Dhcp { option60: first_option60 } };

    let _guard = state.lock.write().await;
    let devices = state.devices();
    let extractor = FixedInfoExtractor(observed);
    let mac_retriever = ExactFieldRetriever::mac();
    let ip_retriever = ExactFieldRetriever::ip();
    let add_retriever = AddDeviceRetriever;
    let add_info = AddInfoUpdater;
    let remove_ip = RemoveOutdatedIpUpdater;

    let nat_enabled = state
        .configure_service
        .get("NAT")
        .await
        .ok()
        .flatten()
        .map(|v| v == "1")
        .unwrap_or(false);

    let pipeline = IdentificationPipeline {
        extractors: vec![&extractor],
        extractor_policy: ExtractorMergePolicy::LastSeen,
        retrievers: RetrieverChain { retrievers: vec![&mac_retriever, &ip_retriever, &add_retriever] },
        updaters: vec![&add_info, &remove_ip],
        devices,
    };

    let outcome = match pipeline.run(&request, nat_enabled).await {
        Ok(outcome) => outcome,
        Err(err) => return error_response(err),
    };

    // §4.7 step 4: a change on a reconfiguration-relevant field sends the
    // device back through the configure path.
    if outcome.needs_reconfigure {
        if let Some(device_id) = &outcome.device_id {
            let lifecycle = device_lifecycle(&state);
            if let Err(err) = lifecycle.reconfigure(device_id).await {
                return error_response(err);
            }
        }
    }
    StatusCode::NO_CONTENT.into_response()
}

fn device_lifecycle(state: &AppState) -> DeviceLifecycle<'_> {
    DeviceLifecycle {
        devices: state.devices(),
        configs: state.configs(),
        plugins: &state.plugins,
        base_raw_config: &state.base_raw_config,
    }
}

// ---- cfg_mgr ----

pub async fn list_configs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<ListQuery>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.cfg_mgr.configs.read", &[]).await {
        return resp;
    }
    let _guard = state.lock.read().await;
    let (selectors, options) = parse_list_query(&q);
    match state.configs().find(selectors, options).await {
        Ok(docs) => provd_json(StatusCode::OK, json!({ "configs": docs })),
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize)]
struct ConfigBody {
    config: Value,
}

pub async fn create_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ConfigBody>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.cfg_mgr.configs.create", &[]).await {
        return resp;
    }
    let Some(obj) = body.config.as_object().cloned() else {
        return bad_request("config must be a JSON object");
    };
    let _guard = state.lock.write().await;
    let device_lifecycle = device_lifecycle(&state);
    let lifecycle = ConfigLifecycle {
        devices: state.devices(),
        configs: state.configs(),
        device_lifecycle: &device_lifecycle,
        base_raw_config: &state.base_raw_config,
    };
    match lifecycle.insert(Document::from_map(obj)).await {
        Ok(id) => location(&id, StatusCode::CREATED, json!({ "id": id }), "cfg_mgr/configs"),
        Err(err) => error_response(err),
    }
}

pub async fn get_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.cfg_mgr.configs.{id}.read", &[("id", &id)]).await {
        return resp;
    }
    let _guard = state.lock.read().await;
    match state.configs().retrieve(&id).await {
        Ok(Some(doc)) => provd_json(StatusCode::OK, json!({ "config": doc })),
        Ok(None) => not_found(format!("no config with id {id}")),
        Err(err) => error_response(err),
    }
}

pub async fn update_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ConfigBody>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.cfg_mgr.configs.{id}.update", &[("id", &id)]).await {
        return resp;
    }
    let Some(mut obj) = body.config.as_object().cloned() else {
        return bad_request("config must be a JSON object");
    };
    obj.insert("id".to_string(), Value::String(id));
    let _guard = state.lock.write().await;
    let device_lifecycle = device_lifecycle(&state);
    let lifecycle = ConfigLifecycle {
        devices: state.devices(),
        configs: state.configs(),
        device_lifecycle: &device_lifecycle,
        base_raw_config: &state.base_raw_config,
    };
    match lifecycle.update(Document::from_map(obj)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn delete_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.cfg_mgr.configs.{id}.delete", &[("id", &id)]).await {
        return resp;
    }
    let _guard = state.lock.write().await;
    let device_lifecycle = device_lifecycle(&state);
    let lifecycle = ConfigLifecycle {
        devices: state.devices(),
        configs: state.configs(),
        device_lifecycle: &device_lifecycle,
        base_raw_config: &state.base_raw_config,
    };
    match lifecycle.delete(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn get_raw_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.cfg_mgr.configs.{id}.raw", &[("id", &id)]).await {
        return resp;
    }
    let _guard = state.lock.read().await;
    match state.configs().get_raw_config(&id, &state.base_raw_config).await {
        Ok(Some(raw)) => provd_json(StatusCode::OK, json!({ "raw_config": raw })),
        Ok(None) => not_found(format!("config {id} does not resolve")),
        Err(err) => error_response(err),
    }
}

pub async fn autocreate_config(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.cfg_mgr.autocreate", &[]).await {
        return resp;
    }
    let fresh_id = Uuid::new_v4().to_string();
    let _guard = state.lock.write().await;
    let device_lifecycle = device_lifecycle(&state);
    let lifecycle = ConfigLifecycle {
        devices: state.devices(),
        configs: state.configs(),
        device_lifecycle: &device_lifecycle,
        base_raw_config: &state.base_raw_config,
    };
    match lifecycle.create_new(&fresh_id).await {
        Ok(id) => location(&id, StatusCode::CREATED, json!({ "id": id }), "cfg_mgr/configs"),
        Err(err) => error_response(err),
    }
}

// ---- pg_mgr ----

pub async fn pg_install(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<IdBody>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.pg_mgr.install", &[]).await {
        return resp;
    }
    let _guard = state.lock.write().await;
    match state.plugins.install(&body.id).await {
        Ok(oip) => location(
            &body.id,
            StatusCode::CREATED,
            json!({ "state": format!("{:?}", oip.state()) }),
            "pg_mgr/install",
        ),
        Err(err) => error_response(err),
    }
}

pub async fn pg_uninstall(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<IdBody>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.pg_mgr.uninstall", &[]).await {
        return resp;
    }
    let _guard = state.lock.write().await;
    let lifecycle = device_lifecycle(&state);
    if let Err(err) = lifecycle.soft_deconfigure_owned_by(&body.id).await {
        return error_response(err);
    }
    match state.plugins.uninstall(&body.id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn pg_installed(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.pg_mgr.installed", &[]).await {
        return resp;
    }
    provd_json(StatusCode::OK, json!({ "plugins": state.plugins.list_installed() }))
}

pub async fn pg_installable(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.pg_mgr.installable", &[]).await {
        return resp;
    }
    provd_json(StatusCode::OK, json!({ "plugins": state.plugins.list_installable() }))
}

pub async fn pg_upgrade(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<IdBody>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.pg_mgr.upgrade", &[]).await {
        return resp;
    }
    let _guard = state.lock.write().await;
    match state.plugins.upgrade(&body.id).await {
        Ok(oip) => location(
            &body.id,
            StatusCode::CREATED,
            json!({ "state": format!("{:?}", oip.state()) }),
            "pg_mgr/upgrade",
        ),
        Err(err) => error_response(err),
    }
}

pub async fn pg_update(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.pg_mgr.update", &[]).await {
        return resp;
    }
    let _guard = state.lock.write().await;
    match state.plugins.update(&state.plugin_server_url).await {
        Ok(oip) => provd_json(StatusCode::CREATED, json!({ "state": format!("{:?}", oip.state()) })),
        Err(err) => error_response(err),
    }
}

pub async fn pg_plugin_info(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(pid): Path<String>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.pg_mgr.plugins.{pid}.info", &[("pid", &pid)]).await {
        return resp;
    }
    match state.plugins.list_installable().into_iter().find(|record| record.id == pid) {
        Some(record) => provd_json(StatusCode::OK, json!(record)),
        None => not_found(format!("no plugin record for {pid}")),
    }
}

pub async fn pg_plugin_install(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(pid): Path<String>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.pg_mgr.plugins.{pid}.install", &[("pid", &pid)]).await {
        return resp;
    }
    let _guard = state.lock.write().await;
    match state.plugins.install(&pid).await {
        Ok(oip) => provd_json(StatusCode::CREATED, json!({ "state": format!("{:?}", oip.state()) })),
        Err(err) => error_response(err),
    }
}

pub async fn pg_plugin_configure(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(pid): Path<String>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.pg_mgr.plugins.{pid}.configure", &[("pid", &pid)]).await {
        return resp;
    }
    let _guard = state.lock.write().await;
    match state.plugins.load(&pid, &state.base_raw_config).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn pg_reload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<IdBody>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.pg_mgr.reload", &[]).await {
        return resp;
    }
    let _guard = state.lock.write().await;
    match reload_plugin(&state, &body.id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

/// `reload(id)` (§4.3): soft-deconfigures every device the plugin owns,
/// unloads and reloads it, then reconfigures those devices if the
/// reload succeeded. If the reload itself fails the devices stay
/// `configured=false` and the error propagates to the caller.
async fn reload_plugin(state: &AppState, id: &str) -> provd_domain::Result<()> {
    let lifecycle = device_lifecycle(state);
    lifecycle.soft_deconfigure_owned_by(id).await?;
    state.plugins.unload(id);
    state.plugins.load(id, &state.base_raw_config).await?;

    let owned = state
        .devices()
        .find(vec![Selector::Eq("plugin".into(), id.into())], FindOptions::default())
        .await?;
    for doc in owned {
        if let Some(device_id) = doc.id() {
            lifecycle.reconfigure(device_id).await?;
        }
    }
    Ok(())
}

// ---- configure service ----

pub async fn get_param(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.configure.{name}.read", &[("name", &name)]).await {
        return resp;
    }
    match state.configure_service.get(&name).await {
        Ok(value) => provd_json(StatusCode::OK, json!({ "value": value })),
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize)]
struct ParamBody {
    value: String,
}

pub async fn set_param(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(body): Json<ParamBody>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, "provd.configure.{name}.update", &[("name", &name)]).await {
        return resp;
    }
    match state.configure_service.set(&name, &body.value).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn status() -> Response {
    provd_json(StatusCode::OK, json!({ "status": "ok" }))
}
