//! Shared fixtures for the Amor Chai integration tests.
//!
//! - [`MemoryCartStore`] - an in-memory `user_cart` table
//! - [`FakeIdentity`] - an identity provider with one known account
//! - [`FakeStripe`] - a local server answering the Stripe endpoints we call
//! - [`spawn_storefront`] - the storefront API on a random local port
//!
//! Tests that need no network drive `routes::routes()` in process instead.

#![allow(clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use amor_chai_core::{Cart, CartItem, Product, ProductId, UserId};
use amor_chai_storefront::cart::format::{CartRow, cart_from_rows, rows_from_cart};
use amor_chai_storefront::cart::remote::RemoteCartStore;
use amor_chai_storefront::cart::storage::MemoryLocalStore;
use amor_chai_storefront::checkout::api::StorefrontApiClient;
use amor_chai_storefront::config::{DEFAULT_CONTACT_URL, StorefrontConfig, StripeConfig};
use amor_chai_storefront::context::{ClientContext, ClientParts};
use amor_chai_storefront::identity::{AuthUser, IdentityError, IdentityProvider, Session};
use amor_chai_storefront::routes;
use amor_chai_storefront::state::AppState;
use amor_chai_storefront::supabase::{MISSING_RELATION, SupabaseError};
use async_trait::async_trait;
use axum::extract::{Form, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{Value, json};
use sha2::Sha256;
use url::Url;

/// Webhook signing secret configured by [`test_config`].
pub const WEBHOOK_SECRET: &str = "whsec_integration_test";

/// A point inside the delivery radius (downtown Cape Girardeau).
pub const INSIDE_ZONE: (f64, f64) = (37.3098, -89.5176);

/// A point well outside the delivery radius (St. Louis).
pub const OUTSIDE_ZONE: (f64, f64) = (38.627, -90.1994);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A menu product priced in cents.
#[must_use]
pub fn product(id: &str, name: &str, cents: i64) -> Product {
    Product::new(id, name, Decimal::new(cents, 2), format!("/images/{id}.png"))
}

// =============================================================================
// Remote cart
// =============================================================================

/// In-memory stand-in for the Supabase `user_cart` table.
#[derive(Debug, Default)]
pub struct MemoryCartStore {
    rows: Mutex<Vec<CartRow>>,
    fail_reads: AtomicBool,
    missing_table: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryCartStore {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replace `user`'s rows, as another device would.
    pub fn seed(&self, user: UserId, items: &[CartItem]) {
        let cart: Cart = items.iter().cloned().collect();
        let mut rows = lock(&self.rows);
        rows.retain(|row| row.user_id != user);
        rows.extend(rows_from_cart(user, &cart));
    }

    #[must_use]
    pub fn rows_for(&self, user: UserId) -> Vec<CartRow> {
        lock(&self.rows)
            .iter()
            .filter(|row| row.user_id == user)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn cart_for(&self, user: UserId) -> Cart {
        cart_from_rows(self.rows_for(user))
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Answer every call as if the table was never created.
    pub fn drop_table(&self) {
        self.missing_table.store(true, Ordering::SeqCst);
    }

    /// Number of upserts and deletes that reached the table.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_table(&self) -> Result<(), SupabaseError> {
        if self.missing_table.load(Ordering::SeqCst) {
            return Err(SupabaseError::Api {
                status: 404,
                code: Some(MISSING_RELATION.to_string()),
                message: "relation \"public.user_cart\" does not exist".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteCartStore for MemoryCartStore {
    async fn fetch_cart(&self, user: UserId) -> Result<Vec<CartRow>, SupabaseError> {
        self.check_table()?;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SupabaseError::Api {
                status: 503,
                code: None,
                message: "upstream unavailable".to_string(),
            });
        }
        Ok(self.rows_for(user))
    }

    async fn upsert_rows(&self, rows: &[CartRow]) -> Result<(), SupabaseError> {
        self.check_table()?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        let mut table = lock(&self.rows);
        for row in rows {
            match table
                .iter_mut()
                .find(|r| r.user_id == row.user_id && r.product_id == row.product_id)
            {
                Some(existing) => *existing = row.clone(),
                None => table.push(row.clone()),
            }
        }
        Ok(())
    }

    async fn delete_except(&self, user: UserId, keep: &[ProductId]) -> Result<(), SupabaseError> {
        self.check_table()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        lock(&self.rows).retain(|row| row.user_id != user || keep.contains(&row.product_id));
        Ok(())
    }

    async fn delete_all(&self, user: UserId) -> Result<(), SupabaseError> {
        self.check_table()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        lock(&self.rows).retain(|row| row.user_id != user);
        Ok(())
    }
}

// =============================================================================
// Identity
// =============================================================================

/// Identity provider that knows a single email/password account.
#[derive(Debug)]
pub struct FakeIdentity {
    email: String,
    password: String,
    user: UserId,
    session: Mutex<Option<Session>>,
    fail_sign_out: AtomicBool,
    sign_out_calls: AtomicUsize,
}

impl FakeIdentity {
    /// Signed out, with one account.
    #[must_use]
    pub fn new(email: &str, password: &str) -> Arc<Self> {
        Arc::new(Self {
            email: email.to_string(),
            password: password.to_string(),
            user: UserId::random(),
            session: Mutex::new(None),
            fail_sign_out: AtomicBool::new(false),
            sign_out_calls: AtomicUsize::new(0),
        })
    }

    /// Already holding a session for the account, as after a restart.
    #[must_use]
    pub fn signed_in(email: &str, password: &str) -> Arc<Self> {
        let identity = Self::new(email, password);
        *lock(&identity.session) = Some(identity.session_for_account());
        identity
    }

    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user
    }

    /// Make the provider's sign-out call fail.
    pub fn fail_sign_out(&self) {
        self.fail_sign_out.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }

    fn session_for_account(&self) -> Session {
        Session {
            access_token: format!("access-{}", self.user),
            refresh_token: Some(format!("refresh-{}", self.user)),
            expires_at: None,
            user: AuthUser {
                id: self.user,
                email: Some(self.email.clone()),
            },
        }
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn get_session(&self) -> Result<Option<Session>, IdentityError> {
        Ok(lock(&self.session).clone())
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(IdentityError::Provider("connection reset".to_string()));
        }
        *lock(&self.session) = None;
        Ok(())
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, IdentityError> {
        if email != self.email || password != self.password {
            return Err(IdentityError::InvalidCredentials);
        }
        let session = self.session_for_account();
        *lock(&self.session) = Some(session.clone());
        Ok(session)
    }
}

// =============================================================================
// Stripe
// =============================================================================

#[derive(Debug, Default)]
struct StripeRecord {
    intent_amounts: Vec<i64>,
    statuses: HashMap<String, String>,
    checkout_forms: Vec<Vec<(String, String)>>,
}

/// Local server answering the payment intent and checkout session endpoints.
#[derive(Debug, Clone)]
pub struct FakeStripe {
    base_url: String,
    record: Arc<Mutex<StripeRecord>>,
}

impl FakeStripe {
    /// Start the server on a random port.
    pub async fn start() -> Self {
        let record = Arc::new(Mutex::new(StripeRecord::default()));
        let app = Router::new()
            .route("/v1/payment_intents", post(create_intent))
            .route("/v1/payment_intents/{id}", get(retrieve_intent))
            .route("/v1/checkout/sessions", post(create_session))
            .route("/v1/checkout/sessions/{id}", get(retrieve_session))
            .with_state(Arc::clone(&record));

        let addr = serve(app).await;
        Self {
            base_url: format!("http://{addr}"),
            record,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Amounts, in cents, of every payment intent created so far.
    #[must_use]
    pub fn intent_amounts(&self) -> Vec<i64> {
        lock(&self.record).intent_amounts.clone()
    }

    /// Form fields of every checkout session created so far.
    #[must_use]
    pub fn checkout_forms(&self) -> Vec<HashMap<String, String>> {
        lock(&self.record)
            .checkout_forms
            .iter()
            .map(|form| form.iter().cloned().collect())
            .collect()
    }

    /// Set the status reported for a payment intent.
    pub fn set_status(&self, intent_id: &str, status: &str) {
        lock(&self.record)
            .statuses
            .insert(intent_id.to_string(), status.to_string());
    }
}

type Record = Arc<Mutex<StripeRecord>>;

fn not_found(kind: &str, id: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": {
                "type": "invalid_request_error",
                "code": "resource_missing",
                "message": format!("No such {kind}: '{id}'"),
            }
        })),
    )
}

async fn create_intent(
    State(record): State<Record>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    let amount: i64 = form
        .get("amount")
        .and_then(|amount| amount.parse().ok())
        .unwrap_or_default();

    let mut record = lock(&record);
    record.intent_amounts.push(amount);
    let id = format!("pi_test_{}", record.intent_amounts.len());
    record
        .statuses
        .insert(id.clone(), "requires_payment_method".to_string());

    Json(json!({
        "id": id,
        "client_secret": format!("{id}_secret_fake"),
        "status": "requires_payment_method",
        "amount": amount,
        "currency": form.get("currency").cloned().unwrap_or_default(),
    }))
}

async fn retrieve_intent(
    State(record): State<Record>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let status = lock(&record).statuses.get(&id).cloned();
    match status {
        Some(status) => Ok(Json(json!({ "id": id, "status": status }))),
        None => Err(not_found("payment_intent", &id)),
    }
}

async fn create_session(
    State(record): State<Record>,
    Form(form): Form<Vec<(String, String)>>,
) -> Json<Value> {
    let mut record = lock(&record);
    record.checkout_forms.push(form);
    let id = format!("cs_test_{}", record.checkout_forms.len());
    Json(json!({
        "id": id,
        "url": format!("https://checkout.stripe.test/c/pay/{id}"),
        "status": "open",
    }))
}

async fn retrieve_session(Path(id): Path<String>) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if !id.starts_with("cs_test_") {
        return Err(not_found("checkout.session", &id));
    }
    Ok(Json(json!({
        "id": id,
        "status": "complete",
        "customer_details": { "email": "buyer@example.com" },
    })))
}

/// Serve `app` on a random local port and return its address.
async fn serve(app: Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Stripe-Signature header value for `payload`.
#[must_use]
pub fn sign_webhook(payload: &str, secret: &str, timestamp: i64) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

// =============================================================================
// Storefront
// =============================================================================

/// Server configuration, with Stripe pointed at `stripe` when given.
#[must_use]
pub fn test_config(stripe: Option<&FakeStripe>) -> StorefrontConfig {
    StorefrontConfig {
        host: std::net::Ipv4Addr::LOCALHOST.into(),
        port: 0,
        base_url: "https://shop.test".to_string(),
        stripe: stripe.map(|stripe| StripeConfig {
            secret_key: SecretString::from("sk_test_integration"),
            publishable_key: Some("pk_test_integration".to_string()),
            webhook_secret: Some(SecretString::from(WEBHOOK_SECRET)),
            api_base: stripe.base_url().to_string(),
        }),
        supabase: None,
        delivery_contact_url: DEFAULT_CONTACT_URL.to_string(),
        sentry_dsn: None,
        sentry_environment: None,
        sentry_sample_rate: 0.0,
        sentry_traces_sample_rate: 0.0,
    }
}

/// Application state for `config`.
#[must_use]
pub fn test_state(config: StorefrontConfig) -> AppState {
    AppState::new(config).expect("state builds from test config")
}

/// Serve the storefront API on a random port. Returns its base URL.
pub async fn spawn_storefront(state: AppState) -> Url {
    let addr = serve(routes::routes().with_state(state)).await;
    Url::parse(&format!("http://{addr}/")).expect("valid server url")
}

/// A base URL nothing is listening on.
pub async fn unreachable_url() -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind probe listener");
    let addr = listener.local_addr().expect("listener address");
    drop(listener);
    Url::parse(&format!("http://{addr}/")).expect("valid url")
}

/// Collaborators for a client session under test.
pub struct ClientHarness {
    pub store: Arc<MemoryLocalStore>,
    pub identity: Arc<FakeIdentity>,
    pub remote: Arc<MemoryCartStore>,
}

impl ClientHarness {
    #[must_use]
    pub fn new(identity: Arc<FakeIdentity>) -> Self {
        Self {
            store: Arc::new(MemoryLocalStore::new()),
            identity,
            remote: MemoryCartStore::new(),
        }
    }

    /// A context talking to the storefront at `api_url`. Contexts built
    /// from the same harness share local storage, identity, and the
    /// remote table, like two runs on the same device.
    #[must_use]
    pub fn context(&self, api_url: Url) -> ClientContext {
        let api = StorefrontApiClient::new(api_url).expect("API client builds");
        ClientContext::new(ClientParts {
            store: self.store.clone(),
            identity: self.identity.clone(),
            remote_cart: Some(self.remote.clone()),
            likes: None,
            api: Arc::new(api),
            contact_url: DEFAULT_CONTACT_URL.to_string(),
            checkout_timeout: Duration::from_secs(5),
            sign_out_timeout: Duration::from_secs(2),
        })
    }
}
