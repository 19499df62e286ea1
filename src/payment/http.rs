use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{ChargeReceipt, ChargeRequest, PaymentError, PaymentGateway};

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    id: String,
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

/// Charges API client: form-encoded `POST {base}/v1/charges` with a bearer
/// secret key.
pub struct HttpGateway {
    client: Client,
    charges_url: String,
    api_key: String,
}

impl HttpGateway {
    pub fn new(api_base: &str, api_key: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            charges_url: format!("{}/v1/charges", api_base.trim_end_matches('/')),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, PaymentError> {
        let amount = request.amount.to_string();
        let form = [
            ("amount", amount.as_str()),
            ("currency", request.currency.as_str()),
            ("description", request.description.as_str()),
            ("source", request.source.as_str()),
        ];
        let response = self
            .client
            .post(&self.charges_url)
            .bearer_auth(&self.api_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| PaymentError::GatewayUnreachable(e.to_string()))?;

        let status = response.status();
        debug!("charge gateway answered {status}");
        if status.is_success() {
            let body: ChargeResponse = response
                .json()
                .await
                .map_err(|e| PaymentError::GatewayUnreachable(format!("bad response body: {e}")))?;
            return Ok(ChargeReceipt {
                charge_id: body.id,
                amount: body.amount,
                currency: body.currency,
            });
        }
        Err(classify_failure(
            status,
            &response.text().await.unwrap_or_default(),
        ))
    }
}

/// Only a refusal of the card itself is a decline: 402, or 400 carrying a
/// `card_error`. Auth, rate-limit and other request errors map to
/// `GatewayUnreachable`, which leaves the reservation held.
fn classify_failure(status: StatusCode, body: &str) -> PaymentError {
    let error = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error);
    let card_error = error
        .as_ref()
        .is_some_and(|e| e.kind.as_deref() == Some("card_error"));
    let declined = status == StatusCode::PAYMENT_REQUIRED
        || (status == StatusCode::BAD_REQUEST && card_error);
    let (message, code) = match error {
        Some(e) => (e.message.unwrap_or_else(|| status.to_string()), e.code),
        None => (status.to_string(), None),
    };
    if declined {
        PaymentError::Declined { message, code }
    } else {
        PaymentError::GatewayUnreachable(format!("gateway returned {status}: {message}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve one canned HTTP response and hand back the raw request.
    async fn canned_server(status_line: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if raw.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&raw).into_owned()
        });
        (base, handle)
    }

    fn request() -> ChargeRequest {
        ChargeRequest {
            amount: 56_000,
            currency: "usd".into(),
            description: "Reservation 1 for property 2".into(),
            source: "tok_visa".into(),
        }
    }

    #[tokio::test]
    async fn successful_charge() {
        let (base, server) = canned_server(
            "200 OK",
            r#"{"id":"ch_123","amount":56000,"currency":"usd","status":"succeeded"}"#,
        )
        .await;
        let gateway = HttpGateway::new(&base, "sk_test", Duration::from_secs(5)).unwrap();

        let receipt = gateway.charge(&request()).await.unwrap();
        assert_eq!(
            receipt,
            ChargeReceipt {
                charge_id: "ch_123".into(),
                amount: 56_000,
                currency: "usd".into(),
            }
        );

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /v1/charges "));
        assert!(raw.to_lowercase().contains("authorization: bearer sk_test"));
        assert!(raw.contains("amount=56000"));
        assert!(raw.contains("currency=usd"));
        assert!(raw.contains("source=tok_visa"));
    }

    #[tokio::test]
    async fn client_error_is_decline() {
        let (base, _server) = canned_server(
            "402 Payment Required",
            r#"{"error":{"message":"Your card was declined.","code":"card_declined","type":"card_error"}}"#,
        )
        .await;
        let gateway = HttpGateway::new(&base, "sk_test", Duration::from_secs(5)).unwrap();

        assert_eq!(
            gateway.charge(&request()).await,
            Err(PaymentError::Declined {
                message: "Your card was declined.".into(),
                code: Some("card_declined".into()),
            })
        );
    }

    #[tokio::test]
    async fn server_error_is_unreachable() {
        let (base, _server) = canned_server("503 Service Unavailable", "{}").await;
        let gateway = HttpGateway::new(&base, "sk_test", Duration::from_secs(5)).unwrap();

        assert!(matches!(
            gateway.charge(&request()).await,
            Err(PaymentError::GatewayUnreachable(_))
        ));
    }

    #[tokio::test]
    async fn connection_refused_is_unreachable() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let gateway = HttpGateway::new(&base, "sk_test", Duration::from_secs(5)).unwrap();

        assert!(matches!(
            gateway.charge(&request()).await,
            Err(PaymentError::GatewayUnreachable(_))
        ));
    }

    #[tokio::test]
    async fn card_error_on_bad_request_is_decline() {
        let (base, _server) = canned_server(
            "400 Bad Request",
            r#"{"error":{"message":"Your card has expired.","code":"expired_card","type":"card_error"}}"#,
        )
        .await;
        let gateway = HttpGateway::new(&base, "sk_test", Duration::from_secs(5)).unwrap();

        assert_eq!(
            gateway.charge(&request()).await,
            Err(PaymentError::Declined {
                message: "Your card has expired.".into(),
                code: Some("expired_card".into()),
            })
        );
    }

    #[tokio::test]
    async fn bad_api_key_is_unreachable() {
        let (base, _server) = canned_server(
            "401 Unauthorized",
            r#"{"error":{"message":"Invalid API Key provided","type":"invalid_request_error"}}"#,
        )
        .await;
        let gateway = HttpGateway::new(&base, "sk_wrong", Duration::from_secs(5)).unwrap();

        match gateway.charge(&request()).await {
            Err(PaymentError::GatewayUnreachable(message)) => {
                assert!(message.contains("401"), "{message}");
            }
            other => panic!("expected GatewayUnreachable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_limit_is_unreachable() {
        let (base, _server) = canned_server(
            "429 Too Many Requests",
            r#"{"error":{"message":"Too many requests","type":"rate_limit_error"}}"#,
        )
        .await;
        let gateway = HttpGateway::new(&base, "sk_test", Duration::from_secs(5)).unwrap();

        assert!(matches!(
            gateway.charge(&request()).await,
            Err(PaymentError::GatewayUnreachable(_))
        ));
    }

    #[test]
    fn failure_classification_without_json_body() {
        assert_eq!(
            classify_failure(StatusCode::PAYMENT_REQUIRED, "not json"),
            PaymentError::Declined {
                message: "402 Payment Required".into(),
                code: None,
            }
        );
        assert!(matches!(
            classify_failure(StatusCode::BAD_REQUEST, "not json"),
            PaymentError::GatewayUnreachable(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::FORBIDDEN, "{}"),
            PaymentError::GatewayUnreachable(_)
        ));
    }
}
