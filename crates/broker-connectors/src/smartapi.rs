//! Angel One SmartAPI Connector
//!
//! Implements `BrokerConnector` for the SmartAPI REST interface:
//! - Auth: POST loginByPassword with client code, password and TOTP; returns a JWT
//! - Every secure call carries `Authorization: Bearer <jwt>` plus `X-PrivateKey`
//! - Responses share the envelope `{ "status", "message", "errorcode", "data" }`

use crate::credentials::BrokerCredentials;
use crate::{
    utils, AuthReply, BrokerConnector, BrokerError, BrokerResult, BrokerSession,
    Exchange, OrderParams, OrderRecord, RateLimiter,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, Method, RequestBuilder};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// SmartAPI production root
pub const SMARTAPI_ROOT: &str = "https://apiconnect.angelone.in";

/// SmartAPI REST routes
pub mod routes {
    pub const LOGIN: &str = "/rest/auth/angelbroking/user/v1/loginByPassword";
    pub const LOGOUT: &str = "/rest/secure/angelbroking/user/v1/logout";
    pub const PLACE_ORDER: &str = "/rest/secure/angelbroking/order/v1/placeOrder";
    pub const ORDER_BOOK: &str = "/rest/secure/angelbroking/order/v1/getOrderBook";
    pub const LTP: &str = "/rest/secure/angelbroking/order/v1/getLtpData";
}

/// Connection settings for the SmartAPI connector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartApiConfig {
    pub base_url: String,
    pub requests_per_second: u32,
    pub request_timeout_secs: u64,
    pub client_local_ip: String,
    pub client_public_ip: String,
    pub mac_address: String,
}

impl Default for SmartApiConfig {
    fn default() -> Self {
        Self {
            base_url: SMARTAPI_ROOT.to_string(),
            requests_per_second: 10,
            request_timeout_secs: 7,
            client_local_ip: "127.0.0.1".to_string(),
            client_public_ip: "127.0.0.1".to_string(),
            mac_address: "00:00:00:00:00:00".to_string(),
        }
    }
}

/// Shared HTTP client, rate limiter and settings for all SmartAPI sessions
pub struct SmartApiConnector {
    client: Client,
    config: Arc<SmartApiConfig>,
    rate_limiter: Arc<RateLimiter>,
}

impl SmartApiConnector {
    pub fn new(config: SmartApiConfig) -> BrokerResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| BrokerError::Configuration(format!("http client: {e}")))?;
        let rate_limiter = Arc::new(RateLimiter::new(config.requests_per_second));

        info!(base_url = %config.base_url, "SmartAPI connector ready");

        Ok(Self {
            client,
            config: Arc::new(config),
            rate_limiter,
        })
    }
}

impl BrokerConnector for SmartApiConnector {
    fn new_session(&self, credentials: &BrokerCredentials) -> Arc<dyn BrokerSession> {
        Arc::new(SmartApiSession {
            client: self.client.clone(),
            config: Arc::clone(&self.config),
            rate_limiter: Arc::clone(&self.rate_limiter),
            api_key: Secret::new(credentials.api_key().to_string()),
            jwt: RwLock::new(None),
        })
    }
}

struct SmartApiSession {
    client: Client,
    config: Arc<SmartApiConfig>,
    rate_limiter: Arc<RateLimiter>,
    api_key: Secret<String>,
    jwt: RwLock<Option<Secret<String>>>,
}

#[derive(Debug, Deserialize)]
struct OrderBookEntry {
    #[serde(default)]
    orderid: Value,
    #[serde(default)]
    uniqueorderid: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    orderstatus: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

impl SmartApiSession {
    fn request(&self, method: Method, route: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), route);
        let mut builder = self
            .client
            .request(method, url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("X-UserType", "USER")
            .header("X-SourceID", "WEB")
            .header("X-ClientLocalIP", &self.config.client_local_ip)
            .header("X-ClientPublicIP", &self.config.client_public_ip)
            .header("X-MACAddress", &self.config.mac_address)
            .header("X-PrivateKey", self.api_key.expose_secret());

        if let Some(jwt) = self.jwt.read().as_ref() {
            builder = builder.bearer_auth(jwt.expose_secret());
        }
        builder
    }

    fn require_token(&self) -> BrokerResult<()> {
        if self.jwt.read().is_none() {
            return Err(BrokerError::NotAuthenticated);
        }
        Ok(())
    }

    /// Send a request and parse the JSON body. An empty body yields `Value::Null`.
    async fn send(&self, builder: RequestBuilder) -> BrokerResult<Value> {
        self.rate_limiter.acquire().await?;

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                BrokerError::Timeout(e.to_string())
            } else {
                BrokerError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BrokerError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(BrokerError::Api {
                code: status.as_u16().to_string(),
                message: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text)
            .map_err(|e| BrokerError::MalformedResponse(format!("{e}: {text}")))
    }

    /// Unwrap the `data` member of a successful envelope
    fn envelope_data(body: Value) -> BrokerResult<Value> {
        let succeeded = body.get("status").and_then(Value::as_bool).unwrap_or(false);
        if !succeeded {
            return Err(BrokerError::Api {
                code: body
                    .get("errorcode")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                message: body
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("request failed")
                    .to_string(),
            });
        }
        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl BrokerSession for SmartApiSession {
    async fn authenticate(
        &self,
        client_code: &str,
        password: &str,
        one_time_code: &str,
    ) -> BrokerResult<AuthReply> {
        debug!(client_code, "logging in to SmartAPI");

        let body = self
            .send(self.request(Method::POST, routes::LOGIN).json(&json!({
                "clientcode": client_code,
                "password": password,
                "totp": one_time_code,
            })))
            .await?;

        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let error_code = body
            .get("errorcode")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        let succeeded = body.get("status").and_then(Value::as_bool).unwrap_or(false)
            && message.eq_ignore_ascii_case("SUCCESS");

        if !succeeded {
            return Ok(AuthReply::refused(message, error_code));
        }

        let token = body
            .pointer("/data/jwtToken")
            .and_then(Value::as_str)
            .map(|t| t.trim_start_matches("Bearer ").to_string())
            .filter(|t| !t.is_empty());

        match token {
            Some(token) => {
                *self.jwt.write() = Some(Secret::new(token));
                Ok(AuthReply::accepted())
            }
            None => Ok(AuthReply::refused("login response carried no jwtToken", None)),
        }
    }

    async fn place_order(&self, params: &OrderParams) -> BrokerResult<Value> {
        self.require_token()?;
        debug!(symbol = %params.symbol, side = %params.side, quantity = params.quantity, "placing SmartAPI order");
        self.send(self.request(Method::POST, routes::PLACE_ORDER).json(params))
            .await
    }

    async fn lookup_order(&self, order_id: &str) -> BrokerResult<Option<OrderRecord>> {
        self.require_token()?;
        let body = self
            .send(self.request(Method::GET, routes::ORDER_BOOK))
            .await?;
        let data = Self::envelope_data(body)?;

        let entries: Vec<OrderBookEntry> = match data {
            Value::Null => Vec::new(),
            other => serde_json::from_value(other)
                .map_err(|e| BrokerError::MalformedResponse(format!("order book: {e}")))?,
        };

        let record = entries
            .into_iter()
            .find(|entry| utils::id_from_json(&entry.orderid).as_deref() == Some(order_id))
            .map(|entry| OrderRecord {
                order_id: order_id.to_string(),
                unique_order_id: entry.uniqueorderid.filter(|u| !u.is_empty()),
                status: entry
                    .status
                    .or(entry.orderstatus)
                    .unwrap_or_else(|| "unknown".to_string()),
                text: entry.text,
            });

        if record.is_none() {
            warn!(order_id, "order not present in SmartAPI order book");
        }
        Ok(record)
    }

    async fn last_traded_price(
        &self,
        exchange: Exchange,
        symbol: &str,
        token: &str,
    ) -> BrokerResult<Decimal> {
        self.require_token()?;
        let body = self
            .send(self.request(Method::POST, routes::LTP).json(&json!({
                "exchange": exchange,
                "tradingsymbol": symbol,
                "symboltoken": token,
            })))
            .await?;
        let data = Self::envelope_data(body)?;

        data.get("ltp")
            .and_then(utils::decimal_from_json)
            .ok_or_else(|| BrokerError::MalformedResponse(format!("no ltp for {symbol}: {data}")))
    }

    async fn terminate(&self, client_code: &str) -> BrokerResult<()> {
        if self.jwt.read().is_none() {
            debug!(client_code, "no SmartAPI token issued, nothing to log out");
            return Ok(());
        }

        let body = self
            .send(self.request(Method::POST, routes::LOGOUT).json(&json!({
                "clientcode": client_code,
            })))
            .await;
        *self.jwt.write() = None;

        Self::envelope_data(body?)?;
        info!(client_code, "SmartAPI session terminated");
        Ok(())
    }
}
