// crates/network/src/pipeline.rs
//! Interceptor chain wrapped around a transport
//!
//! Each [`Interceptor`] gets the request and a [`Next`] handle for the rest of
//! the chain. It may change the request, call `next.run` zero or more times,
//! and inspect or replace what comes back. The last link is the transport.

use crate::request::{Request, Response};
use crate::transport::Transport;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use steadyline_core::TransportError;
use steadyline_resilience::CancellationToken;

/// One link of the chain
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(&self, request: Request, next: Next<'_>)
        -> Result<Response, TransportError>;
}

/// The remainder of the chain below the current interceptor
#[derive(Clone, Copy)]
pub struct Next<'a> {
    transport: &'a dyn Transport,
    chain: &'a [Arc<dyn Interceptor>],
    cancel: &'a CancellationToken,
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        transport: &'a dyn Transport,
        chain: &'a [Arc<dyn Interceptor>],
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            transport,
            chain,
            cancel,
        }
    }

    /// Cancellation token of the call
    pub fn cancel(&self) -> &'a CancellationToken {
        self.cancel
    }

    /// Passes the request to the next link
    pub fn run(self, request: Request) -> BoxFuture<'a, Result<Response, TransportError>> {
        match self.chain.split_first() {
            Some((current, rest)) => {
                let next = Next {
                    chain: rest,
                    ..self
                };
                current.intercept(request, next)
            }
            None => self.transport.send(request, self.cancel),
        }
    }
}

/// A transport with interceptors in front of it
///
/// Interceptors run in insertion order on the way down; the first one added
/// is the outermost.
#[derive(Clone)]
pub struct Pipeline {
    transport: Arc<dyn Transport>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl Pipeline {
    /// A pipeline with no interceptors yet
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            interceptors: Vec::new(),
        }
    }

    /// Appends an interceptor below the ones already added
    pub fn with(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Appends a shared interceptor
    pub fn with_arc(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Number of interceptors
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Runs the request through every interceptor and the transport
    pub async fn send(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response, TransportError> {
        Next::new(self.transport.as_ref(), &self.interceptors, cancel)
            .run(request)
            .await
    }
}

#[async_trait]
impl Transport for Pipeline {
    async fn send(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response, TransportError> {
        Pipeline::send(self, request, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ok, ScriptedTransport};
    use reqwest::header::{HeaderName, HeaderValue};
    use std::sync::Mutex;

    struct Tag {
        name: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Interceptor for Tag {
        async fn intercept(
            &self,
            mut request: Request,
            next: Next<'_>,
        ) -> Result<Response, TransportError> {
            self.order.lock().unwrap().push(self.name);
            request
                .headers_mut()
                .insert(HeaderName::from_static(self.name), HeaderValue::from_static("1"));
            next.run(request).await
        }
    }

    #[tokio::test]
    async fn test_interceptors_run_in_order() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok()]));
        let order = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(transport.clone())
            .with(Tag {
                name: "x-outer",
                order: order.clone(),
            })
            .with(Tag {
                name: "x-inner",
                order: order.clone(),
            });

        let response = pipeline
            .send(crate::testing::get(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(*order.lock().unwrap(), vec!["x-outer", "x-inner"]);

        let seen = transport.requests();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains_key("x-outer"));
        assert!(seen[0].contains_key("x-inner"));
    }

    #[tokio::test]
    async fn test_empty_pipeline_is_the_transport() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok()]));
        let pipeline = Pipeline::new(transport.clone());
        assert!(pipeline.is_empty());

        pipeline
            .send(crate::testing::get(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(transport.sends(), 1);
    }
}
