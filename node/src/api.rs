//! # REST API
//!
//! Builds the axum router that exposes the node's HTTP interface. All
//! endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                              | Description                       |
//! |--------|-----------------------------------|-----------------------------------|
//! | GET    | `/health`                         | Liveness probe                    |
//! | GET    | `/status`                         | Node status and ledger counters   |
//! | POST   | `/merchants`                      | Attest (or re-attest) a merchant  |
//! | GET    | `/merchants`                      | List attested merchants           |
//! | GET    | `/merchants/:name`                | Merchant attestation record       |
//! | GET    | `/merchants/:name/analytics`      | Daily spending analytics          |
//! | PUT    | `/merchants/:name/limit`          | Update the daily limit            |
//! | PUT    | `/merchants/:name/approval`       | Flip platform/guardian approval   |
//! | POST   | `/allowances`                     | Create a guardian/teen relationship |
//! | GET    | `/allowances/:teen`               | Allowance status                  |
//! | POST   | `/allowances/:teen/issue`         | Issue the weekly allowance        |
//! | POST   | `/allowances/:teen/emergency`     | Issue an emergency allowance      |
//! | POST   | `/allowances/:teen/pause`         | Pause the allowance               |
//! | POST   | `/allowances/:teen/resume`        | Resume the allowance              |
//! | PUT    | `/allowances/:teen/weekly`        | Update the weekly amount          |
//! | POST   | `/allowances/:teen/savings/lock`  | Lock savings with a timelock      |
//! | POST   | `/allowances/:teen/savings/unlock`| Release an expired savings lock   |
//! | POST   | `/allowances/:teen/transfer`      | Transfer guardianship             |
//! | POST   | `/purchases/verify`               | Preview a purchase (read-only)    |
//! | POST   | `/purchases`                      | Execute an atomic purchase        |
//!
//! Purchases take the state write lock, so the evaluate-then-commit window
//! inside the coordinator can never interleave with another mutation.

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use lumen_protocol::guardian::{AllowanceService, AllowanceServiceError};
use lumen_protocol::oracle::{AttestationLedger, LedgerError};
use lumen_protocol::purchase::{PurchaseCoordinator, PurchaseError, PurchaseIntent};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// The service stack behind the API.
pub struct Services {
    pub ledger: AttestationLedger,
    pub allowances: AllowanceService,
    pub coordinator: PurchaseCoordinator,
}

/// Shared application state available to all request handlers.
///
/// Cheap to clone — everything behind `Arc`. The `RwLock` is what makes
/// purchases atomic with respect to concurrent guardian operations.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// The services, behind a lock that serializes mutations.
    pub services: Arc<RwLock<Services>>,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/merchants", post(attest_merchant_handler).get(list_merchants_handler))
        .route("/merchants/:name", get(get_merchant_handler))
        .route("/merchants/:name/analytics", get(merchant_analytics_handler))
        .route("/merchants/:name/limit", put(set_limit_handler))
        .route("/merchants/:name/approval", put(set_approval_handler))
        .route("/allowances", post(create_allowance_handler))
        .route("/allowances/:teen", get(allowance_status_handler))
        .route("/allowances/:teen/issue", post(issue_weekly_handler))
        .route("/allowances/:teen/emergency", post(issue_emergency_handler))
        .route("/allowances/:teen/pause", post(pause_handler))
        .route("/allowances/:teen/resume", post(resume_handler))
        .route("/allowances/:teen/weekly", put(set_weekly_handler))
        .route("/allowances/:teen/savings/lock", post(lock_savings_handler))
        .route("/allowances/:teen/savings/unlock", post(unlock_savings_handler))
        .route("/allowances/:teen/transfer", post(transfer_control_handler))
        .route("/purchases/verify", post(verify_purchase_handler))
        .route("/purchases", post(execute_purchase_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

fn default_daily_limit() -> u64 {
    lumen_protocol::config::DEFAULT_DAILY_LIMIT
}

fn default_weekly_allowance() -> u64 {
    lumen_protocol::config::DEFAULT_WEEKLY_ALLOWANCE
}

/// Request body for `POST /merchants`.
#[derive(Debug, Deserialize)]
pub struct AttestMerchantRequest {
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub platform_approved: bool,
    #[serde(default)]
    pub guardian_approved: bool,
    /// Defaults to the protocol's stock daily limit when omitted.
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u64,
    #[serde(default)]
    pub settlement_address: Option<String>,
}

/// Request body for `PUT /merchants/:name/limit`.
///
/// `platform_approved`, when present, is updated in the same write as the
/// limit.
#[derive(Debug, Deserialize)]
pub struct SetLimitRequest {
    pub daily_limit: u64,
    #[serde(default)]
    pub platform_approved: Option<bool>,
}

/// Request body for `PUT /merchants/:name/approval`.
///
/// `party` is either `"platform"` or `"guardian"`.
#[derive(Debug, Deserialize)]
pub struct SetApprovalRequest {
    pub party: String,
    pub approved: bool,
}

/// Request body for `POST /allowances`.
#[derive(Debug, Deserialize)]
pub struct CreateAllowanceRequest {
    pub parent: String,
    pub teen: String,
    /// Defaults to the protocol's stock weekly allowance when omitted.
    #[serde(default = "default_weekly_allowance")]
    pub weekly_amount: u64,
}

/// Body for operations that only need the caller identity.
#[derive(Debug, Deserialize)]
pub struct CallerRequest {
    pub caller: String,
}

/// Request body for `POST /allowances/:teen/emergency`.
#[derive(Debug, Deserialize)]
pub struct EmergencyRequest {
    pub caller: String,
    pub amount: u64,
}

/// Request body for `PUT /allowances/:teen/weekly`.
#[derive(Debug, Deserialize)]
pub struct WeeklyAmountRequest {
    pub caller: String,
    pub amount: u64,
}

/// Request body for `POST /allowances/:teen/savings/lock`.
#[derive(Debug, Deserialize)]
pub struct LockSavingsRequest {
    pub caller: String,
    pub amount: u64,
    pub unlock_time: u64,
}

/// Request body for `POST /allowances/:teen/transfer`.
#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub caller: String,
    pub new_parent: String,
}

/// Request body for the purchase endpoints.
#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub teen: String,
    pub merchant: String,
    pub amount: u64,
    /// Explicit authorization timestamp; omitted means "now".
    #[serde(default)]
    pub at: Option<u64>,
}

impl From<PurchaseRequest> for PurchaseIntent {
    fn from(req: PurchaseRequest) -> Self {
        PurchaseIntent {
            teen: req.teen,
            merchant: req.merchant,
            amount: req.amount,
            at: req.at,
        }
    }
}

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Node software version.
    pub version: String,
    /// Distinct merchants ever attested.
    pub total_merchants: u64,
    /// Verification checks performed over the ledger's lifetime.
    pub total_verifications: u64,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

/// Generic error body returned by REST endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Error Mapping
// ---------------------------------------------------------------------------

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn ledger_error(e: LedgerError) -> Response {
    let status = match &e {
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.to_string())
}

fn allowance_error(e: AllowanceServiceError) -> Response {
    let status = match &e {
        AllowanceServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        AllowanceServiceError::AlreadyExists(_) => StatusCode::CONFLICT,
        AllowanceServiceError::NotAuthorized { .. } => StatusCode::FORBIDDEN,
        AllowanceServiceError::EmergencyTooLarge { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        // State machine refusals: the request was well-formed but the
        // account's current state says no.
        AllowanceServiceError::Account(_) => StatusCode::CONFLICT,
        AllowanceServiceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.to_string())
}

fn purchase_error(e: PurchaseError) -> Response {
    match e {
        PurchaseError::Ledger(inner) => ledger_error(inner),
        PurchaseError::Allowance(inner) => allowance_error(inner),
        PurchaseError::Environment(inner) => {
            error_response(StatusCode::BAD_GATEWAY, inner.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers — node
// ---------------------------------------------------------------------------

/// `GET /health` — returns 200 if the node is alive.
///
/// This is the liveness probe for orchestrators. It intentionally does
/// not check internal subsystem health — that belongs in `/status`.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status` — node version plus the ledger's lifetime counters.
async fn status_handler(State(state): State<AppState>) -> Response {
    let services = state.services.read().await;
    match services.ledger.stats() {
        Ok(stats) => Json(StatusResponse {
            version: state.version.clone(),
            total_merchants: stats.total_merchants,
            total_verifications: stats.total_verifications,
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
        .into_response(),
        Err(e) => ledger_error(e),
    }
}

// ---------------------------------------------------------------------------
// Handlers — merchants
// ---------------------------------------------------------------------------

/// `POST /merchants` — attests (or re-attests) a merchant.
async fn attest_merchant_handler(
    State(state): State<AppState>,
    Json(req): Json<AttestMerchantRequest>,
) -> Response {
    let services = state.services.write().await;
    match services.ledger.attest_merchant(
        &req.name,
        &req.category,
        req.platform_approved,
        req.guardian_approved,
        req.daily_limit,
        req.settlement_address,
    ) {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) => ledger_error(e),
    }
}

/// `GET /merchants` — all attested merchants, name-ordered.
async fn list_merchants_handler(State(state): State<AppState>) -> Response {
    let services = state.services.read().await;
    match services.ledger.list_merchants() {
        Ok(records) => Json(records).into_response(),
        Err(e) => ledger_error(e),
    }
}

/// `GET /merchants/:name` — one merchant's attestation record.
async fn get_merchant_handler(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let services = state.services.read().await;
    match services.ledger.get_merchant(&name) {
        Ok(record) => Json(record).into_response(),
        Err(e) => ledger_error(e),
    }
}

/// `GET /merchants/:name/analytics` — rollover-aware spending analytics.
async fn merchant_analytics_handler(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let services = state.services.read().await;
    match services.ledger.merchant_analytics(&name) {
        Ok(analytics) => Json(analytics).into_response(),
        Err(e) => ledger_error(e),
    }
}

/// `PUT /merchants/:name/limit` — updates the daily limit, and the
/// platform approval flag when the body carries one.
async fn set_limit_handler(
    Path(name): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<SetLimitRequest>,
) -> Response {
    let services = state.services.write().await;
    let result = match req.platform_approved {
        Some(approved) => services.ledger.set_limits(&name, req.daily_limit, approved),
        None => services.ledger.set_daily_limit(&name, req.daily_limit),
    };
    match result {
        Ok(record) => Json(record).into_response(),
        Err(e) => ledger_error(e),
    }
}

/// `PUT /merchants/:name/approval` — flips one side's approval flag.
async fn set_approval_handler(
    Path(name): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<SetApprovalRequest>,
) -> Response {
    let services = state.services.write().await;
    let result = match req.party.as_str() {
        "platform" => services.ledger.set_platform_approval(&name, req.approved),
        "guardian" => services.ledger.set_guardian_approval(&name, req.approved),
        other => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("unknown approval party: {other} (expected \"platform\" or \"guardian\")"),
            )
        }
    };
    match result {
        Ok(record) => Json(record).into_response(),
        Err(e) => ledger_error(e),
    }
}

// ---------------------------------------------------------------------------
// Handlers — allowances
// ---------------------------------------------------------------------------

/// `POST /allowances` — sets up a guardian/teen relationship.
async fn create_allowance_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateAllowanceRequest>,
) -> Response {
    let services = state.services.write().await;
    match services
        .allowances
        .create_relationship(&req.parent, &req.teen, req.weekly_amount)
    {
        Ok(account) => (StatusCode::CREATED, Json(account)).into_response(),
        Err(e) => allowance_error(e),
    }
}

/// `GET /allowances/:teen` — the account plus its time-dependent probes.
async fn allowance_status_handler(
    Path(teen): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let services = state.services.read().await;
    match services.allowances.status(&teen) {
        Ok(status) => Json(status).into_response(),
        Err(e) => allowance_error(e),
    }
}

/// `POST /allowances/:teen/issue` — issues the weekly allowance.
async fn issue_weekly_handler(
    Path(teen): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<CallerRequest>,
) -> Response {
    let services = state.services.write().await;
    match services.allowances.issue_weekly(&req.caller, &teen) {
        Ok(issued) => Json(serde_json::json!({ "issued": issued })).into_response(),
        Err(e) => allowance_error(e),
    }
}

/// `POST /allowances/:teen/emergency` — issues an emergency allowance.
async fn issue_emergency_handler(
    Path(teen): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<EmergencyRequest>,
) -> Response {
    let services = state.services.write().await;
    match services
        .allowances
        .issue_emergency(&req.caller, &teen, req.amount)
    {
        Ok(issued) => Json(serde_json::json!({ "issued": issued })).into_response(),
        Err(e) => allowance_error(e),
    }
}

/// `POST /allowances/:teen/pause` — suspends issuance and purchases.
async fn pause_handler(
    Path(teen): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<CallerRequest>,
) -> Response {
    let services = state.services.write().await;
    match services.allowances.pause(&req.caller, &teen) {
        Ok(account) => Json(account).into_response(),
        Err(e) => allowance_error(e),
    }
}

/// `POST /allowances/:teen/resume` — lifts a pause.
async fn resume_handler(
    Path(teen): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<CallerRequest>,
) -> Response {
    let services = state.services.write().await;
    match services.allowances.resume(&req.caller, &teen) {
        Ok(account) => Json(account).into_response(),
        Err(e) => allowance_error(e),
    }
}

/// `PUT /allowances/:teen/weekly` — updates the weekly amount.
async fn set_weekly_handler(
    Path(teen): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<WeeklyAmountRequest>,
) -> Response {
    let services = state.services.write().await;
    match services
        .allowances
        .set_weekly_amount(&req.caller, &teen, req.amount)
    {
        Ok(account) => Json(account).into_response(),
        Err(e) => allowance_error(e),
    }
}

/// `POST /allowances/:teen/savings/lock` — locks savings with a timelock.
async fn lock_savings_handler(
    Path(teen): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<LockSavingsRequest>,
) -> Response {
    let services = state.services.write().await;
    match services
        .allowances
        .lock_savings(&req.caller, &teen, req.amount, req.unlock_time)
    {
        Ok(outcome) => Json(serde_json::json!({
            "accepted": outcome.is_accepted(),
            "outcome": outcome,
        }))
        .into_response(),
        Err(e) => allowance_error(e),
    }
}

/// `POST /allowances/:teen/savings/unlock` — releases an expired lock.
async fn unlock_savings_handler(
    Path(teen): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<CallerRequest>,
) -> Response {
    let services = state.services.write().await;
    match services.allowances.unlock_savings(&req.caller, &teen) {
        Ok(unlocked) => Json(serde_json::json!({ "unlocked": unlocked })).into_response(),
        Err(e) => allowance_error(e),
    }
}

/// `POST /allowances/:teen/transfer` — transfers guardianship.
async fn transfer_control_handler(
    Path(teen): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<TransferRequest>,
) -> Response {
    let services = state.services.write().await;
    match services
        .allowances
        .transfer_control(&req.caller, &teen, &req.new_parent)
    {
        Ok(account) => Json(account).into_response(),
        Err(e) => allowance_error(e),
    }
}

// ---------------------------------------------------------------------------
// Handlers — purchases
// ---------------------------------------------------------------------------

/// `POST /purchases/verify` — previews both check legs, committing nothing.
async fn verify_purchase_handler(
    State(state): State<AppState>,
    Json(req): Json<PurchaseRequest>,
) -> Response {
    let services = state.services.read().await;
    match services.coordinator.verify_purchase(&req.into()) {
        Ok(preview) => Json(preview).into_response(),
        Err(e) => purchase_error(e),
    }
}

/// `POST /purchases` — executes the atomic three-leg purchase.
///
/// Holds the write lock for the whole evaluate-submit-commit sequence.
async fn execute_purchase_handler(
    State(state): State<AppState>,
    Json(req): Json<PurchaseRequest>,
) -> Response {
    let services = state.services.write().await;
    match services.coordinator.execute_purchase(&req.into()) {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => purchase_error(e),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
