// crates/network/src/client.rs
//! Client facade wiring the pipeline, supervisor and downloads together

use crate::credentials::CredentialProvider;
use crate::error::{NetworkError, NetworkResult};
use crate::getter::{Getter, HttpGetter};
use crate::logging::LoggingInterceptor;
use crate::metrics::MetricsInterceptor;
use crate::pipeline::Pipeline;
use crate::rate_limit::RateLimitInterceptor;
use crate::request::{Request, Response};
use crate::resume::ResumableReader;
use crate::retry::{DefaultRetryInterceptor, RetryInterceptor};
use crate::supervisor::SupervisedSender;
use crate::throttle::{ThrottleFence, ThrottlingInterceptor};
use crate::transport::{ReqwestTransport, Transport};
use reqwest::Url;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use std::path::Path;
use steadyline_config::{Config, ConfigError, ConfigPersistence, RateLimitStrategy};
use steadyline_core::{ClassifiedError, CountBus};
use steadyline_resilience::{CancellationToken, RateBudget, RateLimiter, RetryPolicy};

/// Runtime client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Absolute timeout for API calls
    pub timeout: Duration,
    /// Absolute timeout for download connections
    pub download_timeout: Duration,
    /// User agent string
    pub user_agent: String,
    /// Retry bounds for every layer
    pub retry_policy: RetryPolicy,
    /// Admission budget
    pub rate_budget: RateBudget,
    /// Log successful bodies too
    pub log_bodies: bool,
    /// Longest body excerpt written to the log
    pub body_log_limit: usize,
    /// Whether 429s raise the shared fence
    pub throttle_enabled: bool,
    /// Fence duration when a 429 has no `Retry-After`
    pub default_fence: Duration,
    /// Longest fence a single 429 may raise
    pub max_fence: Duration,
    /// Counter key prefix
    pub metrics_prefix: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ClientConfig {
    fn from(config: &Config) -> Self {
        let retry_policy = RetryPolicy::new(config.retry.max_retries)
            .with_min_delay(Duration::from_millis(config.retry.min_delay_ms))
            .with_max_connection_retries(config.retry.max_connection_retries);

        let limits = &config.rate_limit;
        let rate_budget = match limits.strategy {
            RateLimitStrategy::TokenBucket => RateBudget::TokenBucket {
                rate_per_second: limits.rate_per_second,
                burst: limits.burst,
            },
            RateLimitStrategy::SlidingWindow => RateBudget::SlidingWindow {
                window: Duration::from_millis(limits.window_ms),
                sub_interval: Duration::from_millis(limits.sub_interval_ms),
                capacity: limits.capacity,
            },
        };

        Self {
            timeout: Duration::from_secs(config.http.timeout_secs),
            download_timeout: Duration::from_secs(config.http.no_timeout_secs),
            user_agent: config.http.user_agent.clone(),
            retry_policy,
            rate_budget,
            log_bodies: config.http.log_bodies,
            body_log_limit: config.http.body_log_limit,
            throttle_enabled: config.throttle.enabled,
            default_fence: Duration::from_millis(config.throttle.default_fence_ms),
            max_fence: Duration::from_millis(config.throttle.max_fence_ms),
            metrics_prefix: "steadyline".to_string(),
        }
    }
}

/// The standard interceptor order
///
/// retry, default retry, logging, throttle fence, rate limit, metrics. Retries
/// sit outermost so that every attempt is logged, fenced, admitted and
/// counted on its own.
pub fn standard_pipeline(
    transport: Arc<dyn Transport>,
    config: &ClientConfig,
    fence: Arc<ThrottleFence>,
    limiter: Arc<dyn RateLimiter>,
    counters: Arc<CountBus>,
) -> Pipeline {
    let mut pipeline = Pipeline::new(transport)
        .with(RetryInterceptor::new(config.retry_policy.clone()))
        .with(DefaultRetryInterceptor::new(&config.retry_policy))
        .with(LoggingInterceptor::new(config.log_bodies, config.body_log_limit));

    if config.throttle_enabled {
        pipeline = pipeline.with(ThrottlingInterceptor::new(
            fence,
            config.default_fence,
            config.max_fence,
        ));
    }

    pipeline
        .with(RateLimitInterceptor::new(limiter))
        .with(MetricsInterceptor::new(counters, config.metrics_prefix.clone()))
}

/// Builds a [`Client`], optionally sharing state with other clients
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    download_transport: Option<Arc<dyn Transport>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    fence: Option<Arc<ThrottleFence>>,
    limiter: Option<Arc<dyn RateLimiter>>,
    counters: Option<Arc<CountBus>>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            download_transport: None,
            credentials: None,
            fence: None,
            limiter: None,
            counters: None,
        }
    }

    /// Sends API calls through `transport` instead of a reqwest client
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Opens download connections through `transport`
    pub fn download_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.download_transport = Some(transport);
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Shares a throttle fence with other clients
    pub fn fence(mut self, fence: Arc<ThrottleFence>) -> Self {
        self.fence = Some(fence);
        self
    }

    /// Shares an admission budget with other clients
    pub fn limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn counters(mut self, counters: Arc<CountBus>) -> Self {
        self.counters = Some(counters);
        self
    }

    pub fn build(self) -> NetworkResult<Client> {
        let config = self.config;

        let limiter = match self.limiter {
            Some(limiter) => limiter,
            None => config.rate_budget.build()?,
        };
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(config.timeout, &config.user_agent)?),
        };
        let download_transport: Arc<dyn Transport> = match self.download_transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(
                config.download_timeout,
                &config.user_agent,
            )?),
        };
        let fence = self.fence.unwrap_or_else(ThrottleFence::shared);
        let counters = self.counters.unwrap_or_default();

        let pipeline = standard_pipeline(
            transport,
            &config,
            fence.clone(),
            limiter.clone(),
            counters.clone(),
        );
        let mut sender = SupervisedSender::new(Arc::new(pipeline), config.retry_policy.clone());
        if let Some(credentials) = self.credentials {
            sender = sender.with_credentials(credentials);
        }

        // The reader does its own reconnecting, so downloads skip the retry layers
        let mut downloads = Pipeline::new(download_transport)
            .with(LoggingInterceptor::new(false, config.body_log_limit));
        if config.throttle_enabled {
            downloads = downloads.with(ThrottlingInterceptor::new(
                fence.clone(),
                config.default_fence,
                config.max_fence,
            ));
        }
        let downloads = downloads
            .with(RateLimitInterceptor::new(limiter.clone()))
            .with(MetricsInterceptor::new(
                counters.clone(),
                format!("{}.download", config.metrics_prefix),
            ));

        log::debug!(
            timeout_secs = config.timeout.as_secs(),
            max_retries = config.retry_policy.max_retries(),
            throttle = config.throttle_enabled;
            "client ready"
        );

        Ok(Client {
            sender,
            downloads: Arc::new(downloads),
            limiter,
            fence,
            counters,
            config,
        })
    }
}

/// Resilient HTTP client
#[derive(Clone)]
pub struct Client {
    sender: SupervisedSender,
    downloads: Arc<dyn Transport>,
    limiter: Arc<dyn RateLimiter>,
    fence: Arc<ThrottleFence>,
    counters: Arc<CountBus>,
    config: ClientConfig,
}

impl Client {
    /// Creates a new client with default configuration
    pub fn new() -> NetworkResult<Self> {
        Self::with_config(ClientConfig::default())
    }

    /// Creates a new client with custom configuration
    pub fn with_config(config: ClientConfig) -> NetworkResult<Self> {
        ClientBuilder::new(config).build()
    }

    /// Validates a loaded configuration and builds a client from it
    pub fn from_config(config: &Config) -> NetworkResult<Self> {
        config.validate().map_err(ConfigError::Invalid)?;
        Self::with_config(ClientConfig::from(config))
    }

    /// Builds a client from a config file and the environment
    ///
    /// A missing file means defaults; environment overrides win over the file.
    pub fn from_path(path: impl AsRef<Path>) -> NetworkResult<Self> {
        let config = ConfigPersistence::new(path.as_ref()).load_effective()?;
        log::debug!(
            path = path.as_ref().display().to_string().as_str(),
            max_retries = config.retry.max_retries;
            "client configuration loaded"
        );
        Self::with_config(ClientConfig::from(&config))
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// Sends a request; statuses >= 400 are returned as errors
    pub async fn send(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response, ClassifiedError> {
        self.sender.send(request, cancel).await
    }

    /// Performs a GET request
    pub async fn get(
        &self,
        url: Url,
        cancel: &CancellationToken,
    ) -> Result<Response, ClassifiedError> {
        self.send(Request::get(url), cancel).await
    }

    /// Performs a GET request and decodes the JSON body
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        cancel: &CancellationToken,
    ) -> Result<T, ClassifiedError> {
        self.sender.send_json(Request::get(url), cancel).await
    }

    /// Starts a resumable download of `url`
    pub async fn download(
        &self,
        url: Url,
        cancel: CancellationToken,
    ) -> Result<ResumableReader, ClassifiedError> {
        let getter = HttpGetter::new(self.downloads.clone(), url);
        self.download_with(Arc::new(getter), cancel).await
    }

    /// Starts a resumable download from a caller-provided getter
    pub async fn download_with(
        &self,
        getter: Arc<dyn Getter>,
        cancel: CancellationToken,
    ) -> Result<ResumableReader, ClassifiedError> {
        ResumableReader::new(getter, self.config.retry_policy.clone(), cancel).await
    }

    pub fn sender(&self) -> &SupervisedSender {
        &self.sender
    }

    pub fn fence(&self) -> &Arc<ThrottleFence> {
        &self.fence
    }

    pub fn counters(&self) -> &Arc<CountBus> {
        &self.counters
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Releases the limiter; waiting and later calls fail
    pub fn shutdown(&self) {
        self.limiter.shutdown();
    }
}
