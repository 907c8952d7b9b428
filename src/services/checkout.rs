//! Checkout initiation: turns the caller's cart into a hosted payment session.
//!
//! Nothing is persisted here. The order only comes into existence when the
//! provider confirms payment through the webhook.

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::aggregates::Cart;
use crate::domain::value_objects::MoneyError;
use crate::payments::{GatewayError, HostedSession, PaymentGateway, SessionLineItem, SessionMetadata, SessionRequest};
use crate::store::{CartStore, StoreError};

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("cart is empty")]
    EmptyCart,
    #[error("could not start checkout: {0}")]
    Initiation(#[from] GatewayError),
    #[error(transparent)]
    Pricing(#[from] MoneyError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedirectUrls {
    pub success: String,
    pub cancel: String,
}

impl RedirectUrls {
    pub fn for_frontend(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            success: format!("{base}/checkout/success?session_id={{CHECKOUT_SESSION_ID}}"),
            cancel: format!("{base}/cart"),
        }
    }
}

pub struct CheckoutService {
    carts: Arc<dyn CartStore>,
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
    urls: RedirectUrls,
}

impl CheckoutService {
    pub fn new(carts: Arc<dyn CartStore>, gateway: Arc<dyn PaymentGateway>, currency: impl Into<String>, urls: RedirectUrls) -> Self {
        Self { carts, gateway, currency: currency.into(), urls }
    }

    #[instrument(skip(self, customer_email))]
    pub async fn initiate(&self, user_id: Uuid, customer_email: Option<&str>) -> Result<HostedSession, CheckoutError> {
        let cart = match self.carts.cart_for_user(user_id).await? {
            Some(cart) if !cart.is_empty() => cart,
            _ => return Err(CheckoutError::EmptyCart),
        };
        let request = SessionRequest {
            currency: self.currency.clone(),
            line_items: session_line_items(&cart)?,
            success_url: self.urls.success.clone(),
            cancel_url: self.urls.cancel.clone(),
            customer_email: customer_email.map(str::to_string),
            metadata: SessionMetadata { user_id, cart_id: cart.id },
        };
        let session = self.gateway.create_session(&request).await?;
        info!(session_id = %session.session_id, cart_id = %cart.id, amount = request.amount_total(), "checkout session created");
        Ok(session)
    }
}

/// One provider line per cart line, priced in minor units from the current catalog price.
pub fn session_line_items(cart: &Cart) -> Result<Vec<SessionLineItem>, MoneyError> {
    cart.items()
        .iter()
        .map(|line| {
            Ok(SessionLineItem {
                name: line.product.name.en.clone(),
                image_url: line.product.image_urls.first().cloned(),
                unit_amount: line.product.price.to_minor_units()?,
                quantity: line.quantity.value(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::cart::tests::line;
    use crate::domain::aggregates::NewProduct;
    use crate::domain::value_objects::{LocalizedText, Money, Quantity, Slug};
    use crate::store::{CatalogStore, MemoryStore};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeGateway {
        requests: Mutex<Vec<SessionRequest>>,
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn create_session(&self, request: &SessionRequest) -> Result<HostedSession, GatewayError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(HostedSession { session_id: "cs_test_1".into(), url: "https://pay.test/cs_test_1".into() })
        }
    }

    fn service(store: Arc<MemoryStore>, gateway: Arc<FakeGateway>) -> CheckoutService {
        CheckoutService::new(store, gateway, "usd", RedirectUrls::for_frontend("http://shop.test/"))
    }

    #[test]
    fn test_line_items_in_minor_units() {
        let mut cart = Cart::empty_for(Uuid::now_v7());
        cart.items.push(line(dec!(89.99), 2));
        cart.items.push(line(dec!(0.5), 3));
        let items = session_line_items(&cart).unwrap();
        assert_eq!(items[0].unit_amount, 8999);
        assert_eq!(items[0].quantity, 2);
        assert_eq!(items[1].unit_amount, 50);
        let total: i64 = items.iter().map(|i| i.unit_amount * i64::from(i.quantity)).sum();
        assert_eq!(total, 18148);
    }

    #[tokio::test]
    async fn test_empty_cart_never_reaches_gateway() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let err = service(store, gateway.clone()).initiate(Uuid::now_v7(), None).await.unwrap_err();
        assert!(matches!(err, CheckoutError::EmptyCart));
        assert!(gateway.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_initiate_carries_cart_metadata() {
        let store = Arc::new(MemoryStore::new());
        let product = store
            .create_product(NewProduct {
                slug: Slug::new("trail-runner").unwrap(),
                name: LocalizedText::new("Trail Runner", None),
                description: LocalizedText::default(),
                price: Money::new(dec!(89.99)),
                compare_at_price: None,
                stock: 5,
                featured: false,
                category_id: None,
                image_urls: vec![],
            })
            .await
            .unwrap();
        let user_id = Uuid::now_v7();
        let cart = store.add_item(user_id, product.id, Quantity::new(2).unwrap()).await.unwrap();

        let gateway = Arc::new(FakeGateway::default());
        let session = service(store, gateway.clone()).initiate(user_id, Some("ana@shop.test")).await.unwrap();
        assert_eq!(session.session_id, "cs_test_1");

        let requests = gateway.requests.lock().unwrap();
        let sent = &requests[0];
        assert_eq!(sent.metadata, SessionMetadata { user_id, cart_id: cart.id });
        assert_eq!(sent.amount_total(), 17998);
        assert_eq!(sent.customer_email.as_deref(), Some("ana@shop.test"));
        assert_eq!(sent.success_url, "http://shop.test/checkout/success?session_id={CHECKOUT_SESSION_ID}");
        assert_eq!(sent.cancel_url, "http://shop.test/cart");
    }
}
