use std::future::Future;

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::NaiveDate;
use estate_core::{
    BankAccountId, BankTransactionId, BatchId, HouseId, IncomeTransactionId, InvoiceId, Money, PayinDraft, PayinId,
    PayinSource, UserId,
};
use estate_storage::{self as store, DbPool, ImportRequest, Policy, StoreResult};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;

type ApiResult<T> = Result<T, ApiError>;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub policy: Policy,
}

/// Acting user, taken from the `x-user-id` header set by the identity proxy.
pub struct Actor(pub Option<UserId>);

const ACTOR_HEADER: &str = "x-user-id";

impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(ACTOR_HEADER) else {
            return Ok(Actor(None));
        };
        let id = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .ok_or_else(|| ApiError::BadRequest(format!("{ACTOR_HEADER} must be a numeric user id")))?;
        Ok(Actor(Some(UserId(id))))
    }
}

/// Runs a write unit on its own task so a dropped connection cannot abandon
/// it between BEGIN and COMMIT.
async fn detached<T, F>(unit: F) -> ApiResult<T>
where
    F: Future<Output = StoreResult<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(unit)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

pub fn router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/accounts", post(create_account).get(list_accounts))
        .route("/accounts/{id}", get(get_account))
        .route("/accounts/{id}/active", put(set_account_active))
        .route("/accounts/{id}/imports/preview", post(preview_import))
        .route("/accounts/{id}/imports", post(confirm_import))
        .route("/accounts/{id}/batches", get(list_batches))
        .route("/batches/{id}", get(get_batch).delete(delete_batch))
        .route("/batches/{id}/transactions", get(batch_transactions))
        .route("/transactions/unmatched", get(unmatched_credits))
        .route("/transactions/{id}", get(get_transaction))
        .route("/transactions/{id}/candidates", get(transaction_candidates))
        .route("/transactions/{id}/match", post(match_transaction))
        .route("/transactions/{id}/unmatch", post(unmatch))
        .route("/transactions/{id}/post", post(confirm_and_post))
        .route("/transactions/{id}/reverse", post(reverse))
        .route("/houses", post(create_house).get(list_houses))
        .route("/houses/{id}", get(get_house))
        .route("/houses/{id}/invoices", get(house_invoices))
        .route("/houses/{id}/outstanding", get(house_outstanding))
        .route("/houses/{id}/payins", get(house_payins))
        .route("/houses/{id}/income", get(house_income))
        .route("/payins", post(create_payin))
        .route("/payins/review", get(review_queue))
        .route("/payins/{id}", get(get_payin).put(update_payin).delete(delete_payin))
        .route("/payins/{id}/submit", post(submit_payin))
        .route("/payins/{id}/reject", post(reject_payin))
        .route("/payins/{id}/accept", post(accept_payin))
        .route("/payins/{id}/candidates", get(payin_candidates))
        .route("/invoices", post(create_invoice))
        .route("/invoices/{id}", get(get_invoice))
        .route("/invoices/{id}/cancel", post(cancel_invoice))
        .route("/invoices/{id}/credits", post(apply_credit))
        .route("/invoices/{id}/payments", get(invoice_payments))
        .route("/income/{id}", get(get_income))
        .route("/income/{id}/allocations", get(income_allocations))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

// ── reference data ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct NewAccount {
    bank_code: String,
    account_number_masked: String,
    currency: Option<String>,
}

async fn create_account(State(s): State<AppState>, Json(body): Json<NewAccount>) -> ApiResult<impl IntoResponse> {
    let acct =
        store::create_bank_account(&s.pool, &body.bank_code, &body.account_number_masked, body.currency.as_deref())
            .await?;
    Ok((StatusCode::CREATED, Json(acct)))
}

async fn list_accounts(State(s): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(store::list_bank_accounts(&s.pool).await?))
}

async fn get_account(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(store::get_bank_account(&s.pool, BankAccountId(id)).await?))
}

#[derive(Deserialize)]
struct ActiveFlag {
    active: bool,
}

async fn set_account_active(
    State(s): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ActiveFlag>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(store::set_bank_account_active(&s.pool, BankAccountId(id), body.active).await?))
}

#[derive(Deserialize)]
struct NewHouse {
    house_number: String,
}

async fn create_house(State(s): State<AppState>, Json(body): Json<NewHouse>) -> ApiResult<impl IntoResponse> {
    let house = store::create_house(&s.pool, &body.house_number).await?;
    Ok((StatusCode::CREATED, Json(house)))
}

async fn list_houses(State(s): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(store::list_houses(&s.pool).await?))
}

async fn get_house(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(store::get_house(&s.pool, HouseId(id)).await?))
}

async fn house_invoices(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(store::list_house_invoices(&s.pool, HouseId(id)).await?))
}

async fn house_outstanding(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(store::outstanding_invoices(&s.pool, HouseId(id)).await?))
}

async fn house_payins(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(store::list_house_payins(&s.pool, HouseId(id)).await?))
}

async fn house_income(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(store::list_house_income(&s.pool, HouseId(id)).await?))
}

// ── statement import ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatementUpload {
    year: i32,
    month: u32,
    #[serde(default)]
    filename: Option<String>,
    content: String,
}

async fn preview_import(
    State(s): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<StatementUpload>,
) -> ApiResult<impl IntoResponse> {
    let preview = store::preview_import(&s.pool, BankAccountId(id), body.year, body.month, &body.content).await?;
    Ok(Json(preview))
}

async fn confirm_import(
    State(s): State<AppState>,
    Path(id): Path<i64>,
    Actor(actor): Actor,
    Json(body): Json<StatementUpload>,
) -> ApiResult<impl IntoResponse> {
    let request = ImportRequest {
        bank_account_id: BankAccountId(id),
        year: body.year,
        month: body.month,
        source_filename: body.filename.unwrap_or_else(|| "statement.csv".to_string()),
        uploaded_by: actor,
    };
    let summary = detached(async move { store::confirm_import(&s.pool, &request, &body.content).await }).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn list_batches(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(store::list_batches(&s.pool, BankAccountId(id)).await?))
}

async fn get_batch(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(store::get_batch(&s.pool, BatchId(id)).await?))
}

async fn batch_transactions(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(store::list_batch_transactions(&s.pool, BatchId(id)).await?))
}

#[derive(Serialize)]
struct Deleted {
    deleted_transactions: u64,
}

async fn delete_batch(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    let deleted = detached(async move { store::delete_batch(&s.pool, BatchId(id)).await }).await?;
    Ok(Json(Deleted {
        deleted_transactions: deleted,
    }))
}

// ── matching ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct BatchFilter {
    batch_id: Option<i64>,
}

async fn unmatched_credits(
    State(s): State<AppState>,
    Query(filter): Query<BatchFilter>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(store::list_unmatched_credits(&s.pool, filter.batch_id.map(BatchId)).await?))
}

async fn get_transaction(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(store::get_bank_transaction(&s.pool, BankTransactionId(id)).await?))
}

async fn transaction_candidates(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    let found = store::candidates_for_bank_transaction(&s.pool, &s.policy, BankTransactionId(id)).await?;
    Ok(Json(found))
}

#[derive(Deserialize)]
struct MatchBody {
    payin_id: i64,
}

async fn match_transaction(
    State(s): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<MatchBody>,
) -> ApiResult<impl IntoResponse> {
    let out = detached(async move {
        store::match_transaction(&s.pool, &s.policy, BankTransactionId(id), PayinId(body.payin_id)).await
    })
    .await?;
    Ok(Json(out))
}

async fn unmatch(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    let txn = detached(async move { store::unmatch(&s.pool, BankTransactionId(id)).await }).await?;
    Ok(Json(txn))
}

// ── posting ──────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct PostBody {
    invoice_id: Option<i64>,
}

async fn confirm_and_post(
    State(s): State<AppState>,
    Path(id): Path<i64>,
    Actor(actor): Actor,
    body: Option<Json<PostBody>>,
) -> ApiResult<impl IntoResponse> {
    let invoice_id = body.and_then(|Json(b)| b.invoice_id).map(InvoiceId);
    let out = detached(async move {
        store::confirm_and_post(&s.pool, &s.policy, BankTransactionId(id), invoice_id, actor).await
    })
    .await?;
    Ok(Json(out))
}

#[derive(Deserialize)]
struct ReasonBody {
    reason: String,
}

async fn reverse(
    State(s): State<AppState>,
    Path(id): Path<i64>,
    Actor(actor): Actor,
    Json(body): Json<ReasonBody>,
) -> ApiResult<impl IntoResponse> {
    let out =
        detached(async move { store::reverse(&s.pool, BankTransactionId(id), &body.reason, actor).await }).await?;
    Ok(Json(out))
}

// ── pay-ins ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct PayinBody {
    house_id: i64,
    amount: Money,
    transfer_date: NaiveDate,
    transfer_hour: u32,
    transfer_minute: u32,
    evidence_ref: Option<String>,
    source: Option<PayinSource>,
    #[serde(default)]
    submit: bool,
}

impl PayinBody {
    fn draft(&self) -> PayinDraft {
        PayinDraft {
            house_id: HouseId(self.house_id),
            amount: self.amount,
            transfer_date: self.transfer_date,
            transfer_hour: self.transfer_hour,
            transfer_minute: self.transfer_minute,
            evidence_ref: self.evidence_ref.clone(),
            source: self.source.unwrap_or(PayinSource::Resident),
        }
    }
}

async fn create_payin(
    State(s): State<AppState>,
    Actor(actor): Actor,
    Json(body): Json<PayinBody>,
) -> ApiResult<impl IntoResponse> {
    let payin = store::create_payin(&s.pool, &s.policy, &body.draft(), actor, body.submit).await?;
    Ok((StatusCode::CREATED, Json(payin)))
}

async fn update_payin(
    State(s): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<PayinBody>,
) -> ApiResult<impl IntoResponse> {
    let draft = body.draft();
    let payin = detached(async move { store::update_payin(&s.pool, &s.policy, PayinId(id), &draft).await }).await?;
    Ok(Json(payin))
}

async fn get_payin(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(store::get_payin(&s.pool, PayinId(id)).await?))
}

async fn delete_payin(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    detached(async move { store::delete_payin(&s.pool, PayinId(id)).await }).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn review_queue(State(s): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(store::list_review_queue(&s.pool).await?))
}

async fn submit_payin(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    let payin = detached(async move { store::submit_payin(&s.pool, PayinId(id)).await }).await?;
    Ok(Json(payin))
}

async fn reject_payin(
    State(s): State<AppState>,
    Path(id): Path<i64>,
    Actor(actor): Actor,
    Json(body): Json<ReasonBody>,
) -> ApiResult<impl IntoResponse> {
    let payin = detached(async move { store::reject_payin(&s.pool, PayinId(id), &body.reason, actor).await }).await?;
    Ok(Json(payin))
}

async fn accept_payin(
    State(s): State<AppState>,
    Path(id): Path<i64>,
    Actor(actor): Actor,
) -> ApiResult<impl IntoResponse> {
    let out = detached(async move { store::accept_payin(&s.pool, &s.policy, PayinId(id), actor).await }).await?;
    Ok(Json(out))
}

async fn payin_candidates(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(store::candidates_for_payin(&s.pool, &s.policy, PayinId(id)).await?))
}

// ── invoices ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct NewInvoice {
    house_id: i64,
    cycle: String,
    total: Money,
    due_date: NaiveDate,
}

async fn create_invoice(State(s): State<AppState>, Json(body): Json<NewInvoice>) -> ApiResult<impl IntoResponse> {
    let inv = store::create_invoice(&s.pool, HouseId(body.house_id), &body.cycle, body.total, body.due_date).await?;
    Ok((StatusCode::CREATED, Json(inv)))
}

async fn get_invoice(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(store::get_invoice(&s.pool, InvoiceId(id)).await?))
}

async fn cancel_invoice(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    let inv = detached(async move { store::cancel_invoice(&s.pool, InvoiceId(id)).await }).await?;
    Ok(Json(inv))
}

#[derive(Deserialize)]
struct CreditBody {
    amount: Money,
    note: Option<String>,
}

async fn apply_credit(
    State(s): State<AppState>,
    Path(id): Path<i64>,
    Actor(actor): Actor,
    Json(body): Json<CreditBody>,
) -> ApiResult<impl IntoResponse> {
    let inv = detached(async move {
        store::apply_credit(&s.pool, InvoiceId(id), body.amount, body.note.as_deref(), actor).await
    })
    .await?;
    Ok(Json(inv))
}

async fn invoice_payments(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(store::list_invoice_payments(&s.pool, InvoiceId(id)).await?))
}

async fn get_income(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(store::get_income_transaction(&s.pool, IncomeTransactionId(id)).await?))
}

async fn income_allocations(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(store::list_allocations(&s.pool, IncomeTransactionId(id)).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn app() -> Router {
        let pool = store::create_memory_db().await.unwrap();
        router(
            AppState {
                pool,
                policy: Policy::default(),
            },
            1024 * 1024,
        )
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(ACTOR_HEADER, "42");
        let request = match body {
            Some(v) => builder
                .header("content-type", "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(request).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    const STATEMENT: &str = "Date,Time,Description,Withdrawal,Deposit,Balance\n\
        15/01/2026,14:30,Transfer from SOMCHAI,,600.00,\"10,600.00\"\n\
        20/01/2026,08:00,Water bill,250.00,,\"10,350.00\"\n";

    async fn seeded(app: &Router) -> (i64, i64) {
        let (status, acct) = call(
            app,
            "POST",
            "/accounts",
            Some(json!({"bank_code": "KBANK", "account_number_masked": "xxx-x-x1234-x"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (_, house) = call(app, "POST", "/houses", Some(json!({"house_number": "12/1"}))).await;
        (acct["id"].as_i64().unwrap(), house["id"].as_i64().unwrap())
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = app().await;
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn import_match_post_and_reverse() {
        let app = app().await;
        let (acct, house) = seeded(&app).await;

        let (status, summary) = call(
            &app,
            "POST",
            &format!("/accounts/{acct}/imports"),
            Some(json!({"year": 2026, "month": 1, "filename": "jan.csv", "content": STATEMENT})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(summary["transaction_count"], 2);
        assert_eq!(summary["credit_count"], 1);

        let (_, unmatched) = call(&app, "GET", "/transactions/unmatched", None).await;
        let txn = unmatched[0]["id"].as_i64().unwrap();

        let (status, _) = call(
            &app,
            "POST",
            "/invoices",
            Some(json!({"house_id": house, "cycle": "2026-01", "total": "600.00", "due_date": "2026-01-05"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, payin) = call(
            &app,
            "POST",
            "/payins",
            Some(json!({
                "house_id": house, "amount": "600.00", "transfer_date": "2026-01-15",
                "transfer_hour": 14, "transfer_minute": 30, "submit": true
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(payin["status"], "SUBMITTED");
        let payin_id = payin["id"].as_i64().unwrap();

        let (_, candidates) = call(&app, "GET", &format!("/payins/{payin_id}/candidates"), None).await;
        assert_eq!(candidates[0]["id"], txn);

        let (status, matched) = call(
            &app,
            "POST",
            &format!("/transactions/{txn}/match"),
            Some(json!({"payin_id": payin_id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(matched["success"], true);

        let (status, posted) = call(&app, "POST", &format!("/transactions/{txn}/post"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(posted["status"], "posted");
        assert_eq!(posted["strategy"], "exact_match");
        assert_eq!(posted["payin_accepted"], true);

        let (_, again) = call(&app, "POST", &format!("/transactions/{txn}/post"), None).await;
        assert_eq!(again["status"], "already_posted");
        assert_eq!(again["income_transaction_id"], posted["income_transaction_id"]);

        let (status, body) = call(&app, "POST", &format!("/transactions/{txn}/unmatch"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "PAYIN_ACCEPTED");

        let (status, body) = call(
            &app,
            "POST",
            &format!("/transactions/{txn}/reverse"),
            Some(json!({"reason": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "MISSING_REASON");

        let (status, reversed) = call(
            &app,
            "POST",
            &format!("/transactions/{txn}/reverse"),
            Some(json!({"reason": "wrong house"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reversed["status"], "reversed");
        assert_eq!(reversed["payin_reverted"], true);

        let (_, payin) = call(&app, "GET", &format!("/payins/{payin_id}"), None).await;
        assert_eq!(payin["status"], "SUBMITTED");
    }

    #[tokio::test]
    async fn duplicate_import_is_unprocessable() {
        let app = app().await;
        let (acct, _) = seeded(&app).await;
        let upload = json!({"year": 2026, "month": 1, "content": STATEMENT});
        let uri = format!("/accounts/{acct}/imports");

        let (status, _) = call(&app, "POST", &uri, Some(upload.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) = call(&app, "POST", &uri, Some(upload)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "VALIDATION_FAILED");
        assert_eq!(body["details"]["errors"][0]["code"], "DUPLICATE_BATCH");
    }

    #[tokio::test]
    async fn garbage_statement_reports_diagnostics() {
        let app = app().await;
        let (acct, _) = seeded(&app).await;
        let (status, body) = call(
            &app,
            "POST",
            &format!("/accounts/{acct}/imports/preview"),
            Some(json!({"year": 2026, "month": 1, "content": "hello,world\nfoo,bar\n"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "PARSE_ERROR");
        assert!(body["details"]["expected_columns"].is_array());
    }

    #[tokio::test]
    async fn unmatched_post_is_ambiguous() {
        let app = app().await;
        let (acct, _) = seeded(&app).await;
        call(
            &app,
            "POST",
            &format!("/accounts/{acct}/imports"),
            Some(json!({"year": 2026, "month": 1, "content": STATEMENT})),
        )
        .await;
        let (_, unmatched) = call(&app, "GET", "/transactions/unmatched", None).await;
        let txn = unmatched[0]["id"].as_i64().unwrap();

        let (status, body) = call(&app, "POST", &format!("/transactions/{txn}/post"), Some(json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "AMBIGUOUS");
    }

    #[tokio::test]
    async fn missing_rows_are_404_and_bad_actor_is_400() {
        let app = app().await;
        let (status, body) = call(&app, "GET", "/invoices/99", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");

        let request = Request::builder()
            .method("POST")
            .uri("/transactions/1/post")
            .header(ACTOR_HEADER, "not-a-number")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(request).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
