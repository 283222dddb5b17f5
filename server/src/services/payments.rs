//! Payment gateway adapter.
//!
//! Online payments follow the Razorpay order flow: the server creates an
//! order, the client completes checkout and posts back
//! `(order_id, payment_id, signature)`, and the server checks the signature
//! as `hex(HMAC-SHA256(key_secret, "{order_id}|{payment_id}"))`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const RAZORPAY_API_BASE: &str = "https://api.razorpay.com/v1";
pub const CURRENCY: &str = "INR";

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Failed to create payment order")]
    OrderCreation(String),

    #[error("Failed to process refund")]
    Refund(String),

    #[error("Payment order not found")]
    UnknownOrder(String),

    #[error("Invalid payment signature")]
    InvalidSignature,

    #[error("Payment amount must be positive")]
    InvalidAmount,

    #[error("payment gateway misconfigured: {0}")]
    Misconfigured(String),

    #[error("Simulated checkout is not available")]
    CheckoutUnsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOrder {
    pub order_id: String,
    pub amount: Decimal,
    /// Amount in paise, as the checkout widget expects it.
    pub amount_subunits: i64,
    pub currency: String,
    pub receipt: String,
    pub key_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    pub refund_id: String,
    pub payment_id: String,
    pub amount: Decimal,
}

/// What the checkout widget hands back once the customer has paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutResult {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create_order(&self, amount: Decimal, receipt: &str)
        -> Result<PaymentOrder, PaymentError>;

    async fn fetch_order(&self, order_id: &str) -> Result<PaymentOrder, PaymentError>;

    fn verify_payment_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool;

    fn verify_webhook_signature(&self, body: &[u8], signature: &str) -> bool;

    async fn refund(&self, payment_id: &str, amount: Decimal) -> Result<Refund, PaymentError>;

    /// Pays an order without a customer at a checkout page. Only the
    /// simulated gateway can do this.
    async fn simulate_checkout(&self, _order_id: &str) -> Result<CheckoutResult, PaymentError> {
        Err(PaymentError::CheckoutUnsupported)
    }
}

pub fn payment_signature_message(order_id: &str, payment_id: &str) -> String {
    format!("{order_id}|{payment_id}")
}

pub fn sign(secret: &str, message: &[u8]) -> String {
    // HMAC takes keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex HMAC-SHA256 signature.
pub fn verify(secret: &str, message: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(&expected).is_ok()
}

pub fn to_subunits(amount: Decimal) -> Result<i64, PaymentError> {
    if amount <= Decimal::ZERO {
        return Err(PaymentError::InvalidAmount);
    }
    (amount * dec!(100))
        .round()
        .to_i64()
        .ok_or(PaymentError::InvalidAmount)
}

fn from_subunits(subunits: i64) -> Decimal {
    Decimal::new(subunits, 2)
}

/// Simulated gateway for local runs and tests. Orders are never charged and
/// refunds always succeed; signatures are real HMACs over `secret`.
#[derive(Debug, Clone)]
pub struct MockGateway {
    secret: String,
    orders: Arc<Mutex<HashMap<String, PaymentOrder>>>,
    refunds: Arc<Mutex<Vec<Refund>>>,
}

impl MockGateway {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            orders: Arc::default(),
            refunds: Arc::default(),
        }
    }

    /// Refunds issued so far, oldest first.
    pub async fn refunds(&self) -> Vec<Refund> {
        self.refunds.lock().await.clone()
    }

    /// Signature a real checkout would hand back for this order/payment pair.
    pub fn sign_payment(&self, order_id: &str, payment_id: &str) -> String {
        sign(
            &self.secret,
            payment_signature_message(order_id, payment_id).as_bytes(),
        )
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create_order(
        &self,
        amount: Decimal,
        receipt: &str,
    ) -> Result<PaymentOrder, PaymentError> {
        let amount_subunits = to_subunits(amount)?;
        let order_id = format!("order_mock_{}", Uuid::new_v4().simple());
        tracing::debug!(order_id = %order_id, amount = %amount, "Created simulated payment order");

        let order = PaymentOrder {
            order_id: order_id.clone(),
            amount,
            amount_subunits,
            currency: CURRENCY.to_string(),
            receipt: receipt.to_string(),
            key_id: None,
        };
        self.orders.lock().await.insert(order_id, order.clone());
        Ok(order)
    }

    async fn fetch_order(&self, order_id: &str) -> Result<PaymentOrder, PaymentError> {
        self.orders
            .lock()
            .await
            .get(order_id)
            .cloned()
            .ok_or_else(|| PaymentError::UnknownOrder(order_id.to_string()))
    }

    fn verify_payment_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        verify(
            &self.secret,
            payment_signature_message(order_id, payment_id).as_bytes(),
            signature,
        )
    }

    fn verify_webhook_signature(&self, body: &[u8], signature: &str) -> bool {
        verify(&self.secret, body, signature)
    }

    async fn refund(&self, payment_id: &str, amount: Decimal) -> Result<Refund, PaymentError> {
        let refund = Refund {
            refund_id: format!("rfnd_mock_{}", Uuid::new_v4().simple()),
            payment_id: payment_id.to_string(),
            amount,
        };
        self.refunds.lock().await.push(refund.clone());
        Ok(refund)
    }

    async fn simulate_checkout(&self, order_id: &str) -> Result<CheckoutResult, PaymentError> {
        let order = self.fetch_order(order_id).await?;
        let payment_id = format!("pay_mock_{}", Uuid::new_v4().simple());
        tracing::debug!(order_id = %order.order_id, payment_id = %payment_id, "Simulated checkout");

        Ok(CheckoutResult {
            signature: self.sign_payment(&order.order_id, &payment_id),
            order_id: order.order_id,
            payment_id,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RazorpayGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
    webhook_secret: String,
}

#[derive(Serialize)]
struct CreateOrderBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
}

#[derive(Deserialize)]
struct OrderResponse {
    id: String,
    amount: i64,
    currency: String,
    receipt: Option<String>,
}

#[derive(Serialize)]
struct RefundBody {
    amount: i64,
}

#[derive(Deserialize)]
struct RefundResponse {
    id: String,
    payment_id: String,
    amount: i64,
}

impl RazorpayGateway {
    pub fn new(key_id: String, key_secret: String, webhook_secret: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: RAZORPAY_API_BASE.to_string(),
            key_id,
            key_secret,
            webhook_secret,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn name(&self) -> &'static str {
        "razorpay"
    }

    async fn create_order(
        &self,
        amount: Decimal,
        receipt: &str,
    ) -> Result<PaymentOrder, PaymentError> {
        let amount_subunits = to_subunits(amount)?;

        let response = self
            .client
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&CreateOrderBody {
                amount: amount_subunits,
                currency: CURRENCY,
                receipt,
            })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PaymentError::OrderCreation(e.to_string()))?;

        let order: OrderResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::OrderCreation(e.to_string()))?;

        tracing::info!(order_id = %order.id, amount_subunits = order.amount, "Created payment order");

        Ok(PaymentOrder {
            order_id: order.id,
            amount: from_subunits(order.amount),
            amount_subunits: order.amount,
            currency: order.currency,
            receipt: order.receipt.unwrap_or_else(|| receipt.to_string()),
            key_id: Some(self.key_id.clone()),
        })
    }

    async fn fetch_order(&self, order_id: &str) -> Result<PaymentOrder, PaymentError> {
        let response = self
            .client
            .get(format!("{}/orders/{}", self.base_url, order_id))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(|e| PaymentError::OrderCreation(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PaymentError::UnknownOrder(order_id.to_string()));
        }

        let order: OrderResponse = response
            .error_for_status()
            .map_err(|e| PaymentError::OrderCreation(e.to_string()))?
            .json()
            .await
            .map_err(|e| PaymentError::OrderCreation(e.to_string()))?;

        Ok(PaymentOrder {
            order_id: order.id,
            amount: from_subunits(order.amount),
            amount_subunits: order.amount,
            currency: order.currency,
            receipt: order.receipt.unwrap_or_default(),
            key_id: Some(self.key_id.clone()),
        })
    }

    fn verify_payment_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        verify(
            &self.key_secret,
            payment_signature_message(order_id, payment_id).as_bytes(),
            signature,
        )
    }

    fn verify_webhook_signature(&self, body: &[u8], signature: &str) -> bool {
        verify(&self.webhook_secret, body, signature)
    }

    async fn refund(&self, payment_id: &str, amount: Decimal) -> Result<Refund, PaymentError> {
        let amount_subunits = to_subunits(amount)?;

        let response = self
            .client
            .post(format!("{}/payments/{}/refund", self.base_url, payment_id))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&RefundBody {
                amount: amount_subunits,
            })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PaymentError::Refund(e.to_string()))?;

        let refund: RefundResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::Refund(e.to_string()))?;

        tracing::info!(refund_id = %refund.id, payment_id = %refund.payment_id, "Refund issued");

        Ok(Refund {
            refund_id: refund.id,
            payment_id: refund.payment_id,
            amount: from_subunits(refund.amount),
        })
    }
}
