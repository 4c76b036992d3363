//! Checkout flow: payment initialization and the delivery-zone gate.
//!
//! The zone gate is a small state machine:
//!
//! ```text
//! Idle --submit--> Checking --allowed--> Allowed
//!                           \--denied/error--> Denied
//! Denied --address changed--> Idle
//! ```
//!
//! `Denied` ends the attempt; nothing retries on its own. A failed check is
//! a denial (fail closed) that points the customer at manual ordering.

pub mod api;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use amor_chai_core::delivery::{OUTSIDE_AREA_MESSAGE, ZONE_CHECK_UNAVAILABLE_MESSAGE};
use amor_chai_core::{DeliveryAddress, OrderTotals, ReturnOutcome};
use thiserror::Error;
use tracing::instrument;

use self::api::StorefrontApi;
use crate::cart::CartManager;
use crate::deadline::{Deadline, Deadlined};

/// Shown with every denial, next to the contact link.
pub const MANUAL_CONTACT_MESSAGE: &str = "Still want to feel the flavors loved by many? We might still be able to make it happen! Contact us on Instagram to arrange a special delivery.";

/// Why a delivery was refused, and where to ask for a manual order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneDenial {
    pub message: String,
    pub contact_url: String,
}

impl ZoneDenial {
    #[must_use]
    pub const fn contact_message(&self) -> &'static str {
        MANUAL_CONTACT_MESSAGE
    }
}

/// Delivery-zone gate state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ZoneGate {
    #[default]
    Idle,
    Checking,
    Allowed,
    Denied(ZoneDenial),
}

/// Why `submit` did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitRefused {
    #[error("a delivery-zone check is already running")]
    Checking,
    #[error("the address is outside the delivery zone")]
    Denied,
    #[error("a payment is already being processed")]
    Processing,
    #[error("the address changed during the delivery-zone check")]
    AddressChanged,
}

/// Result of a submission that ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Zone confirmed; hand off to the payment form. Call
    /// [`CheckoutFlow::finish_submission`] once payment confirmation returns.
    Proceed { client_secret: Option<String> },
    /// Zone refused.
    Denied(ZoneDenial),
}

/// Why payment could not be initialized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentInitError {
    #[error("Your cart is empty.")]
    EmptyCart,
    #[error("Connection timed out. Please refresh.")]
    TimedOut,
    #[error("Failed to load payment system.")]
    Failed,
}

/// What the payment form needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSetup {
    pub client_secret: String,
    pub totals: OrderTotals,
}

#[derive(Debug, Default)]
struct FlowState {
    gate: ZoneGate,
    address: Option<DeliveryAddress>,
    /// Bumped by every `set_address`; a verdict for an older one is dropped.
    address_generation: u64,
    client_secret: Option<String>,
}

/// One checkout attempt.
pub struct CheckoutFlow {
    api: Arc<dyn StorefrontApi>,
    cart: CartManager,
    contact_url: String,
    init_deadline: Deadline,
    state: Mutex<FlowState>,
    processing: AtomicBool,
}

impl std::fmt::Debug for CheckoutFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutFlow")
            .field("gate", &self.gate())
            .field("processing", &self.is_processing())
            .finish_non_exhaustive()
    }
}

impl CheckoutFlow {
    #[must_use]
    pub fn new(
        api: Arc<dyn StorefrontApi>,
        cart: CartManager,
        contact_url: impl Into<String>,
        init_timeout: Duration,
    ) -> Self {
        Self {
            api,
            cart,
            contact_url: contact_url.into(),
            init_deadline: Deadline::new("payment_init", init_timeout),
            state: Mutex::new(FlowState::default()),
            processing: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FlowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn gate(&self) -> ZoneGate {
        self.lock().gate.clone()
    }

    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn client_secret(&self) -> Option<String> {
        self.lock().client_secret.clone()
    }

    /// Refresh the cart from the remote store and create a payment intent.
    ///
    /// # Errors
    ///
    /// `EmptyCart` for an empty cart, `TimedOut` if the server does not
    /// answer within the deadline, `Failed` for any other failure. None of
    /// them is retried.
    #[instrument(skip(self))]
    pub async fn initialize_payment(&self) -> Result<PaymentSetup, PaymentInitError> {
        if self.cart.refresh_from_remote().await {
            tracing::info!("Cart updated from remote before checkout");
        }

        let cart = self.cart.cart();
        if cart.is_empty() {
            return Err(PaymentInitError::EmptyCart);
        }

        let totals = OrderTotals::for_cart(&cart).map_err(|e| {
            tracing::error!(error = %e, "Cart total cannot be charged");
            PaymentInitError::Failed
        })?;

        let location = self
            .lock()
            .address
            .as_ref()
            .and_then(DeliveryAddress::coordinate);

        let client_secret = match self
            .init_deadline
            .run(self.api.create_payment_intent(cart.items(), location))
            .await
        {
            Deadlined::Completed(Ok(secret)) => secret,
            Deadlined::Completed(Err(e)) => {
                tracing::error!(error = %e, "Failed to initialize payment");
                return Err(PaymentInitError::Failed);
            }
            Deadlined::TimedOut => return Err(PaymentInitError::TimedOut),
        };

        self.lock().client_secret = Some(client_secret.clone());
        Ok(PaymentSetup {
            client_secret,
            totals,
        })
    }

    /// Record a completed shipping address. Clears an earlier verdict.
    pub fn set_address(&self, address: DeliveryAddress) {
        let mut state = self.lock();
        state.address = Some(address);
        state.address_generation += 1;
        if matches!(state.gate, ZoneGate::Denied(_) | ZoneGate::Allowed) {
            state.gate = ZoneGate::Idle;
        }
    }

    /// Verify the delivery zone, then release the order to payment.
    ///
    /// # Errors
    ///
    /// Refused while a check is running, after a denial, or while a previous
    /// submission is still being processed. If the address changes while the
    /// check runs, its verdict is dropped and the gate returns to idle.
    #[instrument(skip(self))]
    pub async fn submit(&self) -> Result<SubmitOutcome, SubmitRefused> {
        let (address, generation) = {
            let mut state = self.lock();
            match state.gate {
                ZoneGate::Checking => return Err(SubmitRefused::Checking),
                ZoneGate::Denied(_) => return Err(SubmitRefused::Denied),
                ZoneGate::Idle | ZoneGate::Allowed => {}
            }
            if self
                .processing
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Err(SubmitRefused::Processing);
            }
            state.gate = ZoneGate::Checking;
            (
                state.address.clone().unwrap_or_default(),
                state.address_generation,
            )
        };

        let verdict = self.api.verify_zone(&address).await;

        let mut state = self.lock();
        if state.address_generation != generation {
            tracing::info!("Address changed during zone check, discarding verdict");
            state.gate = ZoneGate::Idle;
            self.processing.store(false, Ordering::SeqCst);
            return Err(SubmitRefused::AddressChanged);
        }
        match verdict {
            Ok(result) if result.allowed => {
                state.gate = ZoneGate::Allowed;
                Ok(SubmitOutcome::Proceed {
                    client_secret: state.client_secret.clone(),
                })
            }
            Ok(result) => {
                let denial = self.denial(
                    result
                        .message
                        .unwrap_or_else(|| OUTSIDE_AREA_MESSAGE.to_string()),
                );
                tracing::info!(reason = %denial.message, "Delivery zone denied");
                state.gate = ZoneGate::Denied(denial.clone());
                self.processing.store(false, Ordering::SeqCst);
                Ok(SubmitOutcome::Denied(denial))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Delivery zone check failed, denying");
                let denial = self.denial(ZONE_CHECK_UNAVAILABLE_MESSAGE.to_string());
                state.gate = ZoneGate::Denied(denial.clone());
                self.processing.store(false, Ordering::SeqCst);
                Ok(SubmitOutcome::Denied(denial))
            }
        }
    }

    /// Payment confirmation returned; allow another submission.
    pub fn finish_submission(&self) {
        self.processing.store(false, Ordering::SeqCst);
    }

    fn denial(&self, message: String) -> ZoneDenial {
        ZoneDenial {
            message,
            contact_url: self.contact_url.clone(),
        }
    }

    /// Outcome to show after the payment redirect. A failed lookup counts
    /// as a failed payment.
    pub async fn return_outcome(&self, client_secret: &str) -> ReturnOutcome {
        match self.api.payment_status(client_secret).await {
            Ok(status) => ReturnOutcome::from_lookup(Some(&status)),
            Err(e) => {
                tracing::warn!(error = %e, "Could not fetch payment status");
                ReturnOutcome::from_lookup(None)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cart::storage::MemoryLocalStore;
    use crate::checkout::api::ApiError;
    use crate::identity::SignOutFlag;
    use amor_chai_core::{
        CartItem, Coordinate, DeliveryZoneResult, PaymentStatus, PostalCodeAllowlist, Product,
    };
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeApi {
        fail_verify: AtomicBool,
        hold_verify: AtomicBool,
        release: Notify,
        intent_delay: Mutex<Option<Duration>>,
    }

    #[async_trait]
    impl StorefrontApi for FakeApi {
        async fn verify_zone(
            &self,
            address: &DeliveryAddress,
        ) -> Result<DeliveryZoneResult, ApiError> {
            if self.hold_verify.load(Ordering::SeqCst) {
                self.release.notified().await;
            }
            if self.fail_verify.load(Ordering::SeqCst) {
                return Err(ApiError::Status {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            Ok(PostalCodeAllowlist::default().check(address.postal_code.as_deref()))
        }

        async fn create_payment_intent(
            &self,
            _items: &[CartItem],
            _location: Option<Coordinate>,
        ) -> Result<String, ApiError> {
            let delay = *self.intent_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok("pi_1_secret_2".to_string())
        }

        async fn payment_status(&self, _client_secret: &str) -> Result<PaymentStatus, ApiError> {
            Ok(PaymentStatus::Processing)
        }
    }

    const CONTACT: &str = "https://www.instagram.com/drinkamorchai/";

    fn flow(api: Arc<FakeApi>, with_item: bool) -> CheckoutFlow {
        let cart = CartManager::new(Arc::new(MemoryLocalStore::new()), None, SignOutFlag::new());
        if with_item {
            cart.add_item(Product::new("a", "A", Decimal::new(10, 0), "/a.png"));
            cart.add_item(Product::new("a", "A", Decimal::new(10, 0), "/a.png"));
            cart.add_item(Product::new("b", "B", Decimal::new(5, 0), "/b.png"));
        }
        CheckoutFlow::new(api, cart, CONTACT, Duration::from_secs(15))
    }

    #[tokio::test]
    async fn test_initialize_payment_returns_totals() {
        let flow = flow(Arc::new(FakeApi::default()), true);
        let setup = flow.initialize_payment().await.unwrap();
        assert_eq!(setup.client_secret, "pi_1_secret_2");
        assert_eq!(setup.totals.amount_cents().unwrap(), 2700);
        assert_eq!(flow.client_secret().as_deref(), Some("pi_1_secret_2"));
    }

    #[tokio::test]
    async fn test_initialize_payment_refuses_empty_cart() {
        let flow = flow(Arc::new(FakeApi::default()), false);
        let err = flow.initialize_payment().await.unwrap_err();
        assert_eq!(err, PaymentInitError::EmptyCart);
        assert_eq!(err.to_string(), "Your cart is empty.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_payment_times_out() {
        let api = Arc::new(FakeApi::default());
        *api.intent_delay.lock().unwrap() = Some(Duration::from_secs(60));
        let flow = flow(api, true);

        let err = flow.initialize_payment().await.unwrap_err();
        assert_eq!(err, PaymentInitError::TimedOut);
        assert_eq!(err.to_string(), "Connection timed out. Please refresh.");
    }

    #[tokio::test]
    async fn test_allowed_postal_code_proceeds() {
        let flow = flow(Arc::new(FakeApi::default()), true);
        flow.initialize_payment().await.unwrap();
        flow.set_address(DeliveryAddress::with_postal_code(" 63701 "));

        let outcome = flow.submit().await.unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Proceed {
                client_secret: Some("pi_1_secret_2".to_string())
            }
        );
        assert_eq!(flow.gate(), ZoneGate::Allowed);
        assert_eq!(flow.submit().await, Err(SubmitRefused::Processing));

        flow.finish_submission();
        assert!(flow.submit().await.is_ok());
    }

    #[tokio::test]
    async fn test_denied_until_address_changes() {
        let flow = flow(Arc::new(FakeApi::default()), true);
        flow.set_address(DeliveryAddress::with_postal_code("90210"));

        let SubmitOutcome::Denied(denial) = flow.submit().await.unwrap() else {
            panic!("expected denial");
        };
        assert_eq!(denial.message, OUTSIDE_AREA_MESSAGE);
        assert_eq!(denial.contact_url, CONTACT);
        assert!(!flow.is_processing());

        assert_eq!(flow.submit().await, Err(SubmitRefused::Denied));

        flow.set_address(DeliveryAddress::with_postal_code("63703"));
        assert_eq!(flow.gate(), ZoneGate::Idle);
        assert!(matches!(
            flow.submit().await,
            Ok(SubmitOutcome::Proceed { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_address_is_denied() {
        let flow = flow(Arc::new(FakeApi::default()), true);
        let SubmitOutcome::Denied(denial) = flow.submit().await.unwrap() else {
            panic!("expected denial");
        };
        assert_eq!(denial.message, "Postal code is missing.");
    }

    #[tokio::test]
    async fn test_check_failure_fails_closed() {
        let api = Arc::new(FakeApi::default());
        api.fail_verify.store(true, Ordering::SeqCst);
        let flow = flow(api, true);
        flow.set_address(DeliveryAddress::with_postal_code("63701"));

        let SubmitOutcome::Denied(denial) = flow.submit().await.unwrap() else {
            panic!("expected denial");
        };
        assert_eq!(denial.message, ZONE_CHECK_UNAVAILABLE_MESSAGE);
        assert_eq!(denial.contact_message(), MANUAL_CONTACT_MESSAGE);
    }

    #[tokio::test]
    async fn test_verdict_for_replaced_address_is_dropped() {
        let api = Arc::new(FakeApi::default());
        api.hold_verify.store(true, Ordering::SeqCst);
        let flow = Arc::new(flow(Arc::clone(&api), true));
        flow.set_address(DeliveryAddress::with_postal_code("63701"));

        let first = tokio::spawn({
            let flow = Arc::clone(&flow);
            async move { flow.submit().await }
        });
        while flow.gate() != ZoneGate::Checking {
            tokio::task::yield_now().await;
        }

        flow.set_address(DeliveryAddress::with_postal_code("90210"));
        api.release.notify_one();

        assert_eq!(first.await.unwrap(), Err(SubmitRefused::AddressChanged));
        assert_eq!(flow.gate(), ZoneGate::Idle);
        assert!(!flow.is_processing());

        api.hold_verify.store(false, Ordering::SeqCst);
        assert!(matches!(
            flow.submit().await,
            Ok(SubmitOutcome::Denied(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_refused_while_checking() {
        let api = Arc::new(FakeApi::default());
        api.hold_verify.store(true, Ordering::SeqCst);
        let flow = Arc::new(flow(Arc::clone(&api), true));
        flow.set_address(DeliveryAddress::with_postal_code("63701"));

        let first = tokio::spawn({
            let flow = Arc::clone(&flow);
            async move { flow.submit().await }
        });
        while flow.gate() != ZoneGate::Checking {
            tokio::task::yield_now().await;
        }

        assert_eq!(flow.submit().await, Err(SubmitRefused::Checking));

        api.release.notify_one();
        assert!(matches!(
            first.await.unwrap(),
            Ok(SubmitOutcome::Proceed { .. })
        ));
    }

    #[tokio::test]
    async fn test_return_outcome() {
        let flow = flow(Arc::new(FakeApi::default()), true);
        assert_eq!(
            flow.return_outcome("pi_1_secret_2").await,
            ReturnOutcome::Processing
        );
    }
}
