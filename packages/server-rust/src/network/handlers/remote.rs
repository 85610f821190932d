//! Remote endpoint: accepts wire messages from other bus instances and
//! dispatches them into the local service domain.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use esb_core::wire::RemoteMessage;
use esb_core::{Context, Credential, Exchange, ExchangeError, Message, QName};
use serde_json::json;
use tracing::{debug, warn};

use super::AppState;
use crate::bus::DispatchError;
use crate::handlers::transaction;
use crate::remote::{SERVICE_HEADER, WS_SECURITY_HEADER};

/// Rejected request: status plus a JSON `{"error": ...}` body.
#[derive(Debug)]
struct Rejection(StatusCode, String);

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> Rejection {
    Rejection(StatusCode::BAD_REQUEST, message.into())
}

/// Handles `POST {remote_path}`.
///
/// Answers 200 with the reply or fault wire message once the exchange has
/// been processed. Faults are application outcomes and still answer 200.
pub async fn remote_handler(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    match dispatch(&state, &headers, &body).await {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(rejection) => {
            debug!(status = %rejection.0, reason = %rejection.1, "remote request rejected");
            rejection.into_response()
        }
    }
}

async fn dispatch(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<RemoteMessage, Rejection> {
    let Some(_admitted) = state.lifecycle.admit() else {
        return Err(Rejection(StatusCode::SERVICE_UNAVAILABLE, "node is not accepting exchanges".into()));
    };

    let request: RemoteMessage =
        serde_json::from_slice(body).map_err(|e| bad_request(format!("malformed remote message: {e}")))?;
    let service = match headers.get(SERVICE_HEADER) {
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|s| s.parse::<QName>().ok())
            .ok_or_else(|| bad_request(format!("invalid {SERVICE_HEADER} header")))?,
        None => request.service.clone(),
    };

    let exchange = state
        .domain
        .create_exchange(&service, request.operation.as_deref())
        .map_err(|e| match e {
            ExchangeError::UnknownService(_) => Rejection(StatusCode::NOT_FOUND, e.to_string()),
            other => bad_request(other.to_string()),
        })?;
    let exchange = prepare(exchange, &request, headers)?;

    let processed = state.domain.send(exchange).await.map_err(|e| match e {
        DispatchError::Overloaded => Rejection(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
        DispatchError::Contract(err) => {
            warn!(%service, error = %err, "remote exchange violated the exchange contract");
            Rejection(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    })?;
    Ok(RemoteMessage::reply(&processed))
}

/// Copies wire content, properties, declared types and credentials onto a
/// freshly created exchange.
fn prepare(mut exchange: Exchange, request: &RemoteMessage, headers: &HeaderMap) -> Result<Exchange, Rejection> {
    let remote_contract = request.contract.as_ref();
    if let Some(reply_type) = remote_contract.and_then(|c| c.output_type.clone()) {
        let contract = exchange.contract().clone().with_reply_type(reply_type);
        exchange
            .set_contract(contract)
            .map_err(|e| bad_request(e.to_string()))?;
    }

    let mut message = Message::new();
    if let Some(content) = &request.content {
        message.set_content(content.clone());
    }
    let content_type = remote_contract
        .and_then(|c| c.input_type.clone())
        .or_else(|| exchange.contract().operation.input_type().cloned());
    message.set_content_type(content_type);
    request
        .apply_context(exchange.context_mut(), message.context_mut())
        .map_err(|e| bad_request(e.to_string()))?;
    strip_handler_state(exchange.context_mut());
    strip_handler_state(message.context_mut());

    for credential in credentials(headers)? {
        exchange.security_mut().add_credential(credential);
    }
    Ok(exchange.with_message(message))
}

/// Drops inbound properties in the transaction handler's state namespace.
fn strip_handler_state(ctx: &mut Context) {
    ctx.retain(|p| {
        let reserved = p.name().starts_with(transaction::STATE_PREFIX);
        if reserved {
            warn!(property = p.name(), "dropping reserved property from remote message");
        }
        !reserved
    });
}

/// Basic auth and security-token headers, base64-decoded.
fn credentials(headers: &HeaderMap) -> Result<Vec<Credential>, Rejection> {
    let decode = |name: &str, raw: &str| {
        STANDARD
            .decode(raw.trim())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| bad_request(format!("invalid {name} header")))
    };
    let mut credentials = Vec::new();

    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let raw = value.to_str().map_err(|_| bad_request("invalid authorization header"))?;
        if let Some(encoded) = raw.strip_prefix("Basic ") {
            let decoded = decode("authorization", encoded)?;
            let (username, password) = decoded.split_once(':').unwrap_or((decoded.as_str(), ""));
            credentials.push(Credential::UsernamePassword {
                username: username.to_string(),
                password: password.to_string(),
            });
        }
    }
    if let Some(value) = headers.get(WS_SECURITY_HEADER) {
        let raw = value
            .to_str()
            .map_err(|_| bad_request(format!("invalid {WS_SECURITY_HEADER} header")))?;
        credentials.push(Credential::Token(decode(WS_SECURITY_HEADER, raw)?));
    }
    Ok(credentials)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use esb_core::{
        Principal, ServiceInterface, ServiceOperation, ServiceSecurity, TransactionManager, TransactionPolicy,
    };
    use serde_json::Value;

    use super::*;
    use crate::bus::{BusConfig, RegisteredService, ServiceDomain};
    use crate::handlers::StaticAuthenticator;
    use crate::network::{NetworkConfig, NodeLifecycle};
    use crate::transaction::LocalTransactionManager;
    use crate::traits::{ServiceImplementation, ServiceRequest};

    #[derive(Debug, thiserror::Error)]
    #[error("unknown sku {0}")]
    struct UnknownSku(String);

    /// Prices a SKU and echoes the caller and the exchange-scoped trace.
    struct Pricing;

    #[async_trait]
    impl ServiceImplementation for Pricing {
        async fn invoke(&self, request: ServiceRequest) -> anyhow::Result<Message> {
            let sku = request
                .message
                .content()
                .and_then(|c| c.get("sku"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if sku == "missing" {
                return Err(UnknownSku(sku).into());
            }
            let mut reply = Message::new().with_content(json!({
                "sku": sku,
                "price": 42,
                "caller": request.principal.map(|p| p.id),
                "trace": request.context.property_value("trace"),
            }));
            reply.context_mut().set_property("currency", "EUR");
            Ok(reply)
        }
    }

    fn state() -> AppState {
        let domain = ServiceDomain::builder(BusConfig::default())
            .authenticator(Arc::new(
                StaticAuthenticator::new()
                    .with_user("alice", "wonderland", ["pricing"])
                    .with_token("t-1", Principal::new("batch", ["pricing"])),
            ))
            .build()
            .unwrap();
        domain
            .register(RegisteredService::new(
                QName::local("Pricing"),
                ServiceInterface::new([ServiceOperation::in_out("quote").with_fault::<UnknownSku>()]),
                Arc::new(Pricing),
            ))
            .unwrap();
        domain
            .register(
                RegisteredService::new(
                    QName::local("Discounts"),
                    ServiceInterface::new([ServiceOperation::in_out("grant")]),
                    Arc::new(Pricing),
                )
                .with_security(ServiceSecurity::with_roles(["pricing"])),
            )
            .unwrap();

        serving(domain)
    }

    fn serving(domain: ServiceDomain) -> AppState {
        let lifecycle = Arc::new(NodeLifecycle::new());
        lifecycle.set_ready();
        AppState {
            domain: Arc::new(domain),
            lifecycle,
            config: Arc::new(NetworkConfig::default()),
            start_time: Instant::now(),
        }
    }

    /// Domain with a local transaction manager: `Pricing` declares no
    /// policies, `Ledger` runs in its own local transaction.
    fn transactional_state() -> (AppState, Arc<LocalTransactionManager>) {
        let tm = Arc::new(LocalTransactionManager::new());
        let domain = ServiceDomain::builder(BusConfig::default())
            .transaction_manager(Arc::clone(&tm) as Arc<dyn TransactionManager>)
            .build()
            .unwrap();
        domain
            .register(RegisteredService::new(
                QName::local("Pricing"),
                ServiceInterface::new([ServiceOperation::in_out("quote")]),
                Arc::new(Pricing),
            ))
            .unwrap();
        domain
            .register(RegisteredService::new(
                QName::local("Ledger"),
                ServiceInterface::new([
                    ServiceOperation::in_out("post").requires(TransactionPolicy::ManagedTransactionLocal)
                ]),
                Arc::new(Pricing),
            ))
            .unwrap();
        (serving(domain), tm)
    }

    fn body_with(service: &str, content: Value, properties: &[(&str, Value)]) -> Bytes {
        let mut msg = RemoteMessage::new(QName::from(service));
        msg.content = Some(content);
        for (name, value) in properties {
            msg.context
                .push(esb_core::Property::new(*name, value.clone(), esb_core::Scope::Exchange));
        }
        Bytes::from(serde_json::to_vec(&msg).unwrap())
    }

    fn body(service: &str, content: Value) -> Bytes {
        let mut msg = RemoteMessage::new(QName::from(service));
        msg.content = Some(content);
        msg.context
            .push(esb_core::Property::new("trace", "t-77", esb_core::Scope::Exchange));
        Bytes::from(serde_json::to_vec(&msg).unwrap())
    }

    async fn call(state: &AppState, headers: HeaderMap, body: Bytes) -> (StatusCode, Value) {
        let response = remote_handler(State(state.clone()), headers, body).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn dispatches_and_returns_reply() {
        let state = state();
        let (status, reply) = call(&state, HeaderMap::new(), body("Pricing", json!({"sku": "a-1"}))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["fault"], json!(false));
        assert_eq!(reply["content"]["price"], json!(42));
        assert_eq!(reply["content"]["trace"], json!("t-77"));
        let currency = reply["context"]
            .as_array()
            .unwrap()
            .iter()
            .find(|p| p["name"] == "currency")
            .unwrap();
        assert_eq!(currency["scope"], json!("MESSAGE"));
        assert_eq!(state.lifecycle.in_flight(), 0);
    }

    #[tokio::test]
    async fn service_header_overrides_body() {
        let state = state();
        let mut headers = HeaderMap::new();
        headers.insert(SERVICE_HEADER, HeaderValue::from_static("Pricing"));
        let (status, _) = call(&state, headers, body("Elsewhere", json!({"sku": "a-1"}))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn fault_answers_200_with_fault_message() {
        let state = state();
        let (status, reply) = call(&state, HeaderMap::new(), body("Pricing", json!({"sku": "missing"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["fault"], json!(true));
        assert_eq!(reply["content"], json!("unknown sku missing"));
    }

    #[tokio::test]
    async fn unknown_service_is_404() {
        let (status, reply) = call(&state(), HeaderMap::new(), body("Nope", json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(reply["error"].as_str().unwrap().contains("Nope"));
    }

    #[tokio::test]
    async fn malformed_body_is_400() {
        let (status, _) = call(&state(), HeaderMap::new(), Bytes::from_static(b"{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn basic_auth_reaches_security_handler() {
        let state = state();
        let mut headers = HeaderMap::new();
        let encoded = format!("Basic {}", STANDARD.encode("alice:wonderland"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&encoded).unwrap());

        let (status, reply) = call(&state, headers, body("Discounts", json!({"sku": "a-1"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["content"]["caller"], json!("alice"));
    }

    #[tokio::test]
    async fn security_token_header_authenticates() {
        let state = state();
        let mut headers = HeaderMap::new();
        headers.insert(
            WS_SECURITY_HEADER,
            HeaderValue::from_str(&STANDARD.encode("t-1")).unwrap(),
        );
        let (_, reply) = call(&state, headers, body("Discounts", json!({"sku": "a-1"}))).await;
        assert_eq!(reply["content"]["caller"], json!("batch"));
    }

    #[tokio::test]
    async fn anonymous_call_to_secured_service_faults() {
        let (status, reply) = call(&state(), HeaderMap::new(), body("Discounts", json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["fault"], json!(true));
    }

    #[tokio::test]
    async fn undecodable_token_is_400() {
        let mut headers = HeaderMap::new();
        headers.insert(WS_SECURITY_HEADER, HeaderValue::from_static("%%%"));
        let (status, _) = call(&state(), headers, body("Pricing", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn draining_node_is_503() {
        let state = state();
        state.lifecycle.begin_drain();
        let (status, _) = call(&state, HeaderMap::new(), body("Pricing", json!({}))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn inbound_transaction_state_is_ignored() {
        let (state, tm) = transactional_state();
        let forged = [
            (transaction::INITIATED, json!("bogus")),
            (transaction::SUSPENDED, json!("bogus")),
        ];

        let (status, reply) = call(&state, HeaderMap::new(), body_with("Pricing", json!({"sku": "a-1"}), &forged)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["fault"], json!(false));
        assert_eq!(reply["content"]["price"], json!(42));
        assert_eq!(tm.live_count(), 0);
    }

    #[tokio::test]
    async fn forged_before_marker_does_not_skip_transaction() {
        let (state, tm) = transactional_state();
        let forged = [(transaction::BEFORE_INVOKED, json!(true))];

        let (status, reply) = call(&state, HeaderMap::new(), body_with("Ledger", json!({"sku": "a-1"}), &forged)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["fault"], json!(false));
        let names: Vec<&str> = reply["context"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|p| p["name"].as_str())
            .collect();
        assert!(names.iter().all(|n| !n.starts_with(transaction::STATE_PREFIX)));
        assert_eq!(tm.live_count(), 0);
    }
}
