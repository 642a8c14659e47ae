use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use reqwest::{Client, Method};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    clients::circuit_breaker::CircuitBreaker,
    config::Config,
    error::ServiceError,
    models::{
        circuit_breaker::{CircuitBreakerConfig, CircuitSnapshot, CircuitState},
        retry::RetryConfig,
    },
    utils::{generate_request_id, retry_when},
};

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";
pub const SERVICE_NAME_HEADER: &str = "X-Service-Name";

#[derive(Debug, Clone)]
pub struct ServiceClientSettings {
    pub timeout: Duration,
    pub health_check_timeout: Duration,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ServiceClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5_000),
            health_check_timeout: Duration::from_millis(3_000),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ServiceClientSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.request_timeout(),
            health_check_timeout: config.health_check_timeout(),
            retry: config.retry_config(),
            circuit_breaker: config.circuit_breaker_config(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub request_id: Option<String>,
    pub timeout: Option<Duration>,
}

impl RequestConfig {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            body: None,
            query: Vec::new(),
            headers: Vec::new(),
            request_id: None,
            timeout: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_request_id(mut self, request_id: &str) -> Self {
        self.request_id = Some(request_id.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// An explicit `request_id` wins over an `X-Request-ID` entry in `headers`.
    fn caller_request_id(&self) -> Option<String> {
        self.request_id.clone().or_else(|| {
            self.headers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(REQUEST_ID_HEADER))
                .map(|(_, value)| value.clone())
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServiceResponse {
    pub status: u16,
    pub request_id: String,
    pub body: Value,
}

/// HTTP client for one peer service, guarded by its own circuit breaker.
///
/// Each logical call is retried with backoff on timeouts, transport errors and
/// 5xx responses. Every attempt passes through the breaker and carries the same
/// `X-Request-ID`.
pub struct ServiceClient {
    caller: String,
    service_name: String,
    base_url: String,
    http_client: Client,
    settings: ServiceClientSettings,
    circuit_breaker: CircuitBreaker,
}

impl ServiceClient {
    pub fn new(
        caller: &str,
        service_name: &str,
        base_url: &str,
        settings: ServiceClientSettings,
    ) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client for {}: {}", service_name, e))?;

        let circuit_breaker = CircuitBreaker::new(service_name, settings.circuit_breaker.clone());

        info!(service = %service_name, base_url = %base_url, "Service client initialized");

        Ok(Self {
            caller: caller.to_string(),
            service_name: service_name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            settings,
            circuit_breaker,
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    pub fn circuit_snapshot(&self) -> CircuitSnapshot {
        self.circuit_breaker.snapshot()
    }

    pub async fn request(&self, config: RequestConfig) -> Result<ServiceResponse, ServiceError> {
        let request_id = config.caller_request_id().unwrap_or_else(generate_request_id);
        let url = self.url(&config.path);

        debug!(
            service = %self.service_name,
            method = %config.method,
            url = %url,
            request_id = %request_id,
            "Sending service request"
        );

        let (url_ref, config_ref, request_id_ref) = (url.as_str(), &config, request_id.as_str());
        let breaker = &self.circuit_breaker;

        let result = retry_when(&self.settings.retry, ServiceError::is_retryable, move || {
            breaker.call(move || self.send_once(url_ref, config_ref, request_id_ref))
        })
        .await;

        if let Err(e) = &result {
            warn!(
                service = %self.service_name,
                request_id = %request_id,
                error = %e,
                "Service request failed"
            );
        }

        result
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ServiceError> {
        self.call_json(RequestConfig::new(Method::GET, path)).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ServiceError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let config = RequestConfig::new(Method::POST, path).with_body(self.encode(body)?);
        self.call_json(config).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, ServiceError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let config = RequestConfig::new(Method::PUT, path).with_body(self.encode(body)?);
        self.call_json(config).await
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T, ServiceError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let config = RequestConfig::new(Method::PATCH, path).with_body(self.encode(body)?);
        self.call_json(config).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ServiceError> {
        self.call_json(RequestConfig::new(Method::DELETE, path)).await
    }

    /// GET `/health` with its own short timeout. Bypasses the breaker.
    pub async fn health_check(&self) -> bool {
        let url = self.url("/health");

        let response = self
            .http_client
            .get(&url)
            .timeout(self.settings.health_check_timeout)
            .header(REQUEST_ID_HEADER, generate_request_id())
            .header(SERVICE_NAME_HEADER, &self.caller)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(service = %self.service_name, status = %response.status(), "Health check failed");
                false
            }
            Err(e) => {
                debug!(service = %self.service_name, error = %e, "Health check unreachable");
                false
            }
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, body: Value) -> Result<T, ServiceError> {
        crate::models::response::unwrap_envelope(body).map_err(|e| ServiceError::Decode {
            service: self.service_name.clone(),
            message: e.to_string(),
        })
    }

    pub fn encode<B: Serialize + ?Sized>(&self, body: &B) -> Result<Value, ServiceError> {
        serde_json::to_value(body).map_err(|e| ServiceError::Encode {
            service: self.service_name.clone(),
            message: e.to_string(),
        })
    }

    async fn call_json<T: DeserializeOwned>(&self, config: RequestConfig) -> Result<T, ServiceError> {
        let response = self.request(config).await?;
        self.decode(response.body)
    }

    async fn send_once(
        &self,
        url: &str,
        config: &RequestConfig,
        request_id: &str,
    ) -> Result<ServiceResponse, ServiceError> {
        let timeout = config.timeout.unwrap_or(self.settings.timeout);

        let mut builder = self
            .http_client
            .request(config.method.clone(), url)
            .timeout(timeout)
            .header(REQUEST_ID_HEADER, request_id)
            .header(SERVICE_NAME_HEADER, &self.caller);

        for (name, value) in &config.headers {
            if name.eq_ignore_ascii_case(REQUEST_ID_HEADER)
                || name.eq_ignore_ascii_case(SERVICE_NAME_HEADER)
            {
                continue;
            }
            builder = builder.header(name, value);
        }

        if !config.query.is_empty() {
            builder = builder.query(&config.query);
        }

        if let Some(body) = &config.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.transport_error(e, timeout))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e, timeout))?;

        if !status.is_success() {
            return Err(ServiceError::Downstream {
                service: self.service_name.clone(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(|e| ServiceError::Decode {
                service: self.service_name.clone(),
                message: e.to_string(),
            })?
        };

        Ok(ServiceResponse {
            status: status.as_u16(),
            request_id: request_id.to_string(),
            body,
        })
    }

    fn transport_error(&self, error: reqwest::Error, timeout: Duration) -> ServiceError {
        if error.is_timeout() {
            ServiceError::Timeout {
                service: self.service_name.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }
        } else {
            ServiceError::Transport {
                service: self.service_name.clone(),
                message: error.to_string(),
            }
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

/// One resilient client per peer, each with its own breaker.
#[derive(Clone)]
pub struct ServiceClients {
    pub user_service: Arc<ServiceClient>,
    pub template_service: Arc<ServiceClient>,
    pub email_delivery: Arc<ServiceClient>,
    pub push_delivery: Arc<ServiceClient>,
}

impl ServiceClients {
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let settings = ServiceClientSettings::from_config(config);
        let caller = config.service_name.as_str();

        let build = |name: &str, url: &str| -> Result<Arc<ServiceClient>, Error> {
            Ok(Arc::new(ServiceClient::new(caller, name, url, settings.clone())?))
        };

        Ok(Self {
            user_service: build("user_service", &config.user_service_url)?,
            template_service: build("template_service", &config.template_service_url)?,
            email_delivery: build("email_service", &config.email_delivery_url)?,
            push_delivery: build("push_service", &config.push_delivery_url)?,
        })
    }

    pub fn all(&self) -> Vec<Arc<ServiceClient>> {
        vec![
            Arc::clone(&self.user_service),
            Arc::clone(&self.template_service),
            Arc::clone(&self.email_delivery),
            Arc::clone(&self.push_delivery),
        ]
    }
}
