//! Order-book REST adapter.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::eip712::{OrderUid, ReadyOrder};
use crate::error::{Result, WatchtowerError};
use crate::exchange::{OrderBook, OrderBookKind};

/// Base URL of the API; order routes are `{base}/orders` and `{base}/orders/{uid}`.
pub const DEFAULT_ORDER_BOOK_API: &str = "https://api.cow.fi/mainnet/api/v1";

const ORDERS_PATH: &str = "/orders";

#[derive(Clone)]
pub struct OrderBookClient {
    http: Client,
    base_url: String,
}

impl OrderBookClient {
    pub fn new(base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        let base_url = base_url
            .unwrap_or(DEFAULT_ORDER_BOOK_API)
            .trim_end_matches('/')
            .to_string();

        let http = Client::builder()
            .user_agent("watchtower/0.1")
            .timeout(timeout)
            .build()
            .map_err(|e| {
                WatchtowerError::Internal(format!("failed to build order book HTTP client: {}", e))
            })?;

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn order_path(uid: &OrderUid) -> String {
        format!("{}/{}", ORDERS_PATH, uid)
    }

    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<(StatusCode, String)> {
        let url = self.url(path);
        let mut req = self.http.request(method.clone(), &url);
        if let Some(body) = body {
            req = req.header(CONTENT_TYPE, "application/json").json(&body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        debug!(%method, path, status = status.as_u16(), "order book response");
        Ok((status, text))
    }

    /// The API answers with the UID as a JSON string; accept a bare one too.
    fn parse_uid(text: &str) -> String {
        serde_json::from_str::<String>(text)
            .unwrap_or_else(|_| text.trim().trim_matches('"').to_string())
    }
}

#[async_trait]
impl OrderBook for OrderBookClient {
    fn kind(&self) -> OrderBookKind {
        OrderBookKind::Http
    }

    async fn submit_order(&self, order: &ReadyOrder) -> Result<String> {
        let (status, text) = self
            .request(Method::POST, ORDERS_PATH, Some(order.api_body()))
            .await?;

        if !status.is_success() {
            return Err(WatchtowerError::OrderBook(format!(
                "POST {} failed: status={} body={}",
                ORDERS_PATH, status, text
            )));
        }
        Ok(Self::parse_uid(&text))
    }

    async fn order_exists(&self, uid: &str) -> Result<bool> {
        // Only well-formed UIDs go into the path
        let uid: OrderUid = uid.parse()?;
        let path = Self::order_path(&uid);
        let (status, text) = self.request(Method::GET, &path, None).await?;

        match status {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(WatchtowerError::OrderBook(format!(
                "GET {} failed: status={} body={}",
                path, status, text
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalised() {
        let client =
            OrderBookClient::new(Some("http://localhost:8080/"), Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");

        let client = OrderBookClient::new(None, Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), DEFAULT_ORDER_BOOK_API);
    }

    #[test]
    fn test_order_routes_hang_off_base_url() {
        let client =
            OrderBookClient::new(Some("https://api.cow.fi/mainnet/api/v1/"), Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.url(ORDERS_PATH), "https://api.cow.fi/mainnet/api/v1/orders");

        let uid: OrderUid = format!("0x{}", "ab".repeat(56)).parse().unwrap();
        assert_eq!(
            client.url(&OrderBookClient::order_path(&uid)),
            format!("https://api.cow.fi/mainnet/api/v1/orders/0x{}", "ab".repeat(56))
        );
    }

    #[test]
    fn test_parse_uid_accepts_json_and_bare_strings() {
        assert_eq!(OrderBookClient::parse_uid("\"0xabc\""), "0xabc");
        assert_eq!(OrderBookClient::parse_uid(" 0xabc\n"), "0xabc");
    }

    #[tokio::test]
    async fn test_order_exists_rejects_malformed_uid_before_any_request() {
        let client =
            OrderBookClient::new(Some("http://127.0.0.1:9"), Duration::from_millis(100)).unwrap();
        let err = client.order_exists("error").await.unwrap_err();
        assert!(matches!(err, WatchtowerError::Codec(_)));
    }
}
