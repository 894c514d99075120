//! Google Cloud Pub/Sub REST client.
//!
//! Covers the four calls the relay needs (`topics.publish`,
//! `subscriptions.pull`, `subscriptions.acknowledge` and
//! `subscriptions.modifyAckDeadline`) and implements [`Transport`] on top of
//! them. Subscribing spawns a pull loop that feeds a bounded channel, so the
//! loop stops pulling while the consumer is busy.
//!
//! # Example
//!
//! ```rust,no_run
//! use pos_relay::client::PubSubClient;
//! use pos_relay::config::{Config, Environment};
//!
//! # async fn example() -> pos_relay::Result<()> {
//! let config = Config::new("my-project").with_environment(Environment::Emulator {
//!     host: "localhost:8085".into(),
//! });
//! let client = PubSubClient::new(&config)?;
//! let id = client.publish("TopicRegionUSA", br#"{"items":[]}"#).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use url::Url;

use crate::client::auth::{ServiceAccountKey, TokenProvider};
use crate::config::{Config, RetryConfig};
use crate::error::{ApiError, Error};
use crate::transport::{Acknowledger, Delivery, Subscription, Transport};
use crate::types::messages::{
    AcknowledgeRequest, GoogleErrorEnvelope, ModifyAckDeadlineRequest, PublishRequest,
    PublishResponse, PubsubMessage, PullRequest, PullResponse, ReceivedMessage,
};
use crate::Result;

/// Pause between pulls that returned nothing
const IDLE_PULL_DELAY: Duration = Duration::from_millis(250);

/// `{}` bodies sent to create calls and returned by acknowledge / modifyAckDeadline
#[derive(Debug, Serialize, Deserialize)]
struct Empty {}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionSpec<'a> {
    topic: &'a str,
    ack_deadline_seconds: u32,
}

#[derive(Debug)]
struct ClientInner {
    http: Client,
    base_url: Url,
    project_id: String,
    auth: Option<TokenProvider>,
    max_messages: u32,
    retry: RetryConfig,
}

/// HTTP client for the Pub/Sub REST API.
///
/// Cheap to clone; clones share the connection pool and token cache.
#[derive(Debug, Clone)]
pub struct PubSubClient {
    inner: Arc<ClientInner>,
}

impl PubSubClient {
    /// Create a client for the configured environment
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the credentials
    /// cannot be read or parsed, or the HTTP client cannot be initialized.
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;

        let http = Client::builder().timeout(config.timeout()).build()?;

        let auth = if config.environment().requires_auth() {
            let path = config
                .credentials_path()
                .ok_or_else(|| Error::Config("credentials path is required".into()))?;
            let key = ServiceAccountKey::from_file(path)?;
            Some(TokenProvider::new(http.clone(), key)?)
        } else {
            None
        };

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                base_url: config.environment().base_url()?,
                project_id: config.project_id().to_string(),
                auth,
                max_messages: config.max_messages(),
                retry: config.retry().clone(),
            }),
        })
    }

    /// Full resource name of a topic
    pub fn topic_path(&self, topic: &str) -> String {
        format!("projects/{}/topics/{}", self.inner.project_id, topic)
    }

    /// Full resource name of a subscription
    pub fn subscription_path(&self, subscription: &str) -> String {
        format!("projects/{}/subscriptions/{}", self.inner.project_id, subscription)
    }

    /// Base URL requests are resolved against
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    fn endpoint(&self, resource: &str, method: &str) -> Result<Url> {
        Ok(self.inner.base_url.join(&format!("{}:{}", resource, method))?)
    }

    async fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(auth) = &self.inner.auth {
            let token = auth.token().await?;
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| Error::Config(format!("invalid access token: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    async fn post<T, B>(&self, url: Url, body: &B) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        self.send(Method::POST, url, body).await
    }

    async fn send<T, B>(&self, method: Method, url: Url, body: &B) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        let headers = self.headers().await?;
        let response = self
            .inner
            .http
            .request(method, url)
            .headers(headers)
            .json(body)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some(auth) = &self.inner.auth {
                auth.invalidate().await;
            }
        }

        self.handle_response(response).await
    }

    async fn handle_response<T>(&self, response: reqwest::Response) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            // Retry-After is in seconds
            let retry_after_ms = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(|secs| secs.saturating_mul(1000));
            return Err(Error::RateLimited { retry_after_ms });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = match serde_json::from_str::<GoogleErrorEnvelope>(&body) {
                Ok(envelope) => match envelope.error.status {
                    Some(code) => ApiError::with_code(status.as_u16(), code, envelope.error.message),
                    None => ApiError::new(status.as_u16(), envelope.error.message),
                },
                Err(_) => ApiError::new(status.as_u16(), body),
            };
            return Err(Error::Api(error));
        }

        let body = response.text().await?;
        let body = if body.trim().is_empty() { "{}" } else { body.as_str() };
        serde_json::from_str(body).map_err(Error::from)
    }

    /// Create a topic; an existing topic is left as is
    pub async fn create_topic(&self, topic: &str) -> Result<()> {
        let url = self.inner.base_url.join(&self.topic_path(topic))?;
        let created: Result<serde_json::Value> = self.send(Method::PUT, url, &Empty {}).await;
        ignore_already_exists(created)
    }

    /// Create a subscription to `topic`; an existing subscription is left as is
    pub async fn create_subscription(
        &self,
        topic: &str,
        subscription: &str,
        ack_deadline_seconds: u32,
    ) -> Result<()> {
        let url = self.inner.base_url.join(&self.subscription_path(subscription))?;
        let topic_path = self.topic_path(topic);
        let spec = SubscriptionSpec {
            topic: &topic_path,
            ack_deadline_seconds,
        };
        let created: Result<serde_json::Value> = self.send(Method::PUT, url, &spec).await;
        ignore_already_exists(created)
    }

    /// Publish one message, returning its server-assigned id
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<String> {
        let url = self.endpoint(&self.topic_path(topic), "publish")?;
        let request = PublishRequest {
            messages: vec![PubsubMessage::from_payload(payload)],
        };
        let response: PublishResponse = self.post(url, &request).await?;
        response
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| Error::Transport("publish returned no message id".into()))
    }

    /// Pull up to `max_messages` messages
    pub async fn pull(&self, subscription: &str, max_messages: u32) -> Result<Vec<ReceivedMessage>> {
        let url = self.endpoint(&self.subscription_path(subscription), "pull")?;
        let response: PullResponse = self.post(url, &PullRequest { max_messages }).await?;
        Ok(response.received_messages)
    }

    /// Acknowledge messages
    pub async fn acknowledge(&self, subscription: &str, ack_ids: Vec<String>) -> Result<()> {
        let url = self.endpoint(&self.subscription_path(subscription), "acknowledge")?;
        let _: Empty = self.post(url, &AcknowledgeRequest { ack_ids }).await?;
        Ok(())
    }

    /// Change the ack deadline of messages; zero makes them redeliverable now
    pub async fn modify_ack_deadline(
        &self,
        subscription: &str,
        ack_ids: Vec<String>,
        ack_deadline_seconds: u32,
    ) -> Result<()> {
        let url = self.endpoint(&self.subscription_path(subscription), "modifyAckDeadline")?;
        let request = ModifyAckDeadlineRequest {
            ack_ids,
            ack_deadline_seconds,
        };
        let _: Empty = self.post(url, &request).await?;
        Ok(())
    }

    fn delivery_from(&self, subscription: &str, received: ReceivedMessage) -> Delivery {
        // Undecodable data is handed on as-is so the consumer rejects it
        let payload = received
            .message
            .payload()
            .unwrap_or_else(|_| received.message.data.clone().into_bytes());
        let id = received
            .message
            .message_id
            .clone()
            .unwrap_or_else(|| received.ack_id.clone());
        let acker = PubSubAcker {
            client: self.clone(),
            subscription: subscription.to_string(),
            ack_id: received.ack_id,
        };
        Delivery::new(id, payload, acker)
    }

    async fn pull_loop(self, subscription: String, tx: mpsc::Sender<Result<Delivery>>) {
        let retry = self.inner.retry.clone();
        let mut attempt = 0;

        loop {
            match self.pull(&subscription, self.inner.max_messages).await {
                Ok(messages) => {
                    attempt = 0;
                    if messages.is_empty() {
                        tokio::time::sleep(IDLE_PULL_DELAY).await;
                    }
                    for received in messages {
                        let delivery = self.delivery_from(&subscription, received);
                        if tx.send(Ok(delivery)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(Error::Http(e)) if e.is_timeout() => {
                    tracing::debug!(subscription = %subscription, "pull timed out, pulling again");
                }
                Err(e) => {
                    if !e.is_retryable() || !retry.allows(attempt) {
                        tracing::error!(subscription = %subscription, error = %e, attempt, "giving up pulling");
                        let _ = tx.send(Err(e.into_transport())).await;
                        return;
                    }
                    let delay = match &e {
                        Error::RateLimited {
                            retry_after_ms: Some(ms),
                        } => Duration::from_millis(*ms),
                        _ => retry.delay_for_attempt(attempt),
                    };
                    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    tracing::warn!(
                        subscription = %subscription,
                        error = %e,
                        attempt,
                        delay_ms,
                        "pull failed, backing off"
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
            }

            if tx.is_closed() {
                return;
            }
        }
    }
}

fn ignore_already_exists<T>(result: Result<T>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(Error::Api(e)) if e.status == 409 => Ok(()),
        Err(e) => Err(e),
    }
}

struct PubSubAcker {
    client: PubSubClient,
    subscription: String,
    ack_id: String,
}

#[async_trait]
impl Acknowledger for PubSubAcker {
    async fn ack(&self) -> Result<()> {
        self.client
            .acknowledge(&self.subscription, vec![self.ack_id.clone()])
            .await
            .map_err(Error::into_transport)
    }

    async fn nack(&self) -> Result<()> {
        self.client
            .modify_ack_deadline(&self.subscription, vec![self.ack_id.clone()], 0)
            .await
            .map_err(Error::into_transport)
    }
}

#[async_trait]
impl Transport for PubSubClient {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<String> {
        PubSubClient::publish(self, topic, &payload)
            .await
            .map_err(Error::into_transport)
    }

    async fn subscribe(&self, subscription: &str) -> Result<Subscription> {
        let capacity = self.inner.max_messages.max(1) as usize;
        let (tx, rx) = mpsc::channel(capacity);
        let task = tokio::spawn(self.clone().pull_loop(subscription.to_string(), tx));
        tracing::info!(subscription, "started pulling");
        Ok(Subscription::from_receiver(subscription, rx).with_task(task))
    }
}
