use serde_json::Value;

use crate::config::StripeConfig;
use crate::error::{AppError, AppResult};

/// Lightweight Stripe client wrapping raw HTTP calls.
/// This avoids the compile-time weight of async-stripe while covering the
/// handful of operations the donation flow needs.
#[derive(Clone)]
pub struct StripeClient {
    secret_key: String,
    webhook_secret: String,
    client: reqwest::Client,
}

/// Everything needed to build a Checkout Session. `metadata` is the
/// contract the webhook reconciler parses back out of
/// `checkout.session.completed`.
pub struct CheckoutSessionParams {
    pub customer_id: Option<String>,
    pub currency: String,
    /// Minor units, already including any covered processing fee.
    pub unit_amount: i64,
    pub product_name: String,
    pub product_description: String,
    pub recurring_monthly: bool,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: Vec<(String, String)>,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Option<Self> {
        if config.secret_key.is_empty() {
            return None;
        }
        Some(Self {
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            client: reqwest::Client::new(),
        })
    }

    async fn post(&self, path: &str, params: &[(String, String)]) -> AppResult<Value> {
        let url = format!("https://api.stripe.com/v1{}", path);
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.secret_key, Option::<&str>::None)
            .form(params)
            .send()
            .await
            .map_err(|e| AppError::Stripe(format!("request failed: {}", e)))?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| AppError::Stripe(format!("response parse failed: {}", e)))?;

        if !status.is_success() {
            let msg = body["error"]["message"]
                .as_str()
                .unwrap_or("Unknown Stripe error");
            return Err(AppError::Stripe(msg.to_string()));
        }
        Ok(body)
    }

    async fn get(&self, path: &str) -> AppResult<Value> {
        let url = format!("https://api.stripe.com/v1{}", path);
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.secret_key, Option::<&str>::None)
            .send()
            .await
            .map_err(|e| AppError::Stripe(format!("request failed: {}", e)))?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| AppError::Stripe(format!("response parse failed: {}", e)))?;

        if !status.is_success() {
            let msg = body["error"]["message"]
                .as_str()
                .unwrap_or("Unknown Stripe error");
            return Err(AppError::Stripe(msg.to_string()));
        }
        Ok(body)
    }

    pub async fn create_customer(
        &self,
        email: &str,
        name: &str,
        user_id: &str,
    ) -> AppResult<Value> {
        self.post(
            "/customers",
            &[
                ("email".into(), email.into()),
                ("name".into(), name.into()),
                ("metadata[user_id]".into(), user_id.into()),
            ],
        )
        .await
    }

    pub async fn create_checkout_session(
        &self,
        p: &CheckoutSessionParams,
    ) -> AppResult<Value> {
        let mut params: Vec<(String, String)> = vec![
            (
                "mode".into(),
                if p.recurring_monthly {
                    "subscription".into()
                } else {
                    "payment".into()
                },
            ),
            ("success_url".into(), p.success_url.clone()),
            ("cancel_url".into(), p.cancel_url.clone()),
            ("line_items[0][quantity]".into(), "1".into()),
            (
                "line_items[0][price_data][currency]".into(),
                p.currency.clone(),
            ),
            (
                "line_items[0][price_data][unit_amount]".into(),
                p.unit_amount.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".into(),
                p.product_name.clone(),
            ),
            (
                "line_items[0][price_data][product_data][description]".into(),
                p.product_description.clone(),
            ),
        ];
        if p.recurring_monthly {
            params.push((
                "line_items[0][price_data][recurring][interval]".into(),
                "month".into(),
            ));
        }
        if let Some(customer) = &p.customer_id {
            params.push(("customer".into(), customer.clone()));
        }
        for (k, v) in &p.metadata {
            params.push((format!("metadata[{}]", k), v.clone()));
        }
        self.post("/checkout/sessions", &params).await
    }

    pub async fn get_checkout_session(&self, session_id: &str) -> AppResult<Value> {
        self.get(&format!("/checkout/sessions/{}", session_id)).await
    }

    pub async fn get_subscription(&self, subscription_id: &str) -> AppResult<Value> {
        self.get(&format!("/subscriptions/{}", subscription_id))
            .await
    }

    /// Verifies the `stripe-signature` header against the shared webhook
    /// secret and returns the parsed event. Rejects before any state change.
    pub fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> AppResult<Value> {
        let (timestamp, sig) = parse_signature_header(signature_header)
            .ok_or_else(|| AppError::BadRequest("Invalid Stripe signature".into()))?;

        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        type HmacSha256 = Hmac<Sha256>;

        let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal("HMAC key error".into()))?;
        mac.update(signed_payload.as_bytes());

        let expected = hex::encode(mac.finalize().into_bytes());
        if expected != sig {
            return Err(AppError::BadRequest(
                "Webhook signature verification failed".into(),
            ));
        }

        // Reject replays older than 5 minutes
        let ts: i64 = timestamp.parse().unwrap_or(0);
        let now = chrono::Utc::now().timestamp();
        if (now - ts).abs() > 300 {
            return Err(AppError::BadRequest("Webhook timestamp too old".into()));
        }

        serde_json::from_slice(payload)
            .map_err(|e| AppError::BadRequest(format!("Invalid webhook payload: {}", e)))
    }
}

/// Stripe signature header format: `t=<timestamp>,v1=<hex hmac>`.
fn parse_signature_header(header: &str) -> Option<(&str, &str)> {
    let mut timestamp = "";
    let mut sig = "";
    for part in header.split(',') {
        let mut kv = part.splitn(2, '=');
        match kv.next() {
            Some("t") => timestamp = kv.next().unwrap_or(""),
            Some("v1") => sig = kv.next().unwrap_or(""),
            _ => {}
        }
    }
    if timestamp.is_empty() || sig.is_empty() {
        return None;
    }
    Some((timestamp, sig))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    fn client_with_secret(secret: &str) -> StripeClient {
        StripeClient {
            secret_key: "sk_test_x".into(),
            webhook_secret: secret.into(),
            client: reqwest::Client::new(),
        }
    }

    fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
        let signed = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(signed.as_bytes());
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn parses_signature_header() {
        let parsed = parse_signature_header("t=1700000000,v1=abc123");
        assert_eq!(parsed, Some(("1700000000", "abc123")));
        assert_eq!(parse_signature_header("v1=abc123"), None);
        assert_eq!(parse_signature_header("garbage"), None);
    }

    #[test]
    fn accepts_valid_signature() {
        let secret = "whsec_test";
        let client = client_with_secret(secret);
        let payload = br#"{"id":"evt_1","type":"invoice.paid"}"#;
        let header = sign(secret, chrono::Utc::now().timestamp(), payload);

        let event = client.verify_webhook_signature(payload, &header).unwrap();
        assert_eq!(event["id"], "evt_1");
    }

    #[test]
    fn rejects_tampered_payload() {
        let secret = "whsec_test";
        let client = client_with_secret(secret);
        let header = sign(secret, chrono::Utc::now().timestamp(), b"{\"a\":1}");

        assert!(client
            .verify_webhook_signature(b"{\"a\":2}", &header)
            .is_err());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let secret = "whsec_test";
        let client = client_with_secret(secret);
        let payload = b"{}";
        let header = sign(secret, chrono::Utc::now().timestamp() - 3600, payload);

        assert!(client.verify_webhook_signature(payload, &header).is_err());
    }

    #[test]
    fn rejects_wrong_secret() {
        let client = client_with_secret("whsec_real");
        let payload = b"{}";
        let header = sign("whsec_other", chrono::Utc::now().timestamp(), payload);

        assert!(client.verify_webhook_signature(payload, &header).is_err());
    }
}
