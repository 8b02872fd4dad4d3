//! Request pipeline: encode, build, send with resilience, decode.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{Instrument, debug, info_span};

use crate::circuit_breaker::CircuitBreaker;
use crate::observe::{CallObserver, CallOutcome, CallRecord};
use crate::request::RequestFactory;
use crate::retry::{RetryContext, RetryStrategy};
use crate::transport::Transport;
use crate::{HttpRequest, Invocation, Response, RestClientError, Result};

/// One entry of the dispatch table.
#[derive(Debug)]
pub(crate) struct Route {
    pub(crate) factory: RequestFactory,
    pub(crate) breaker: Option<Arc<CircuitBreaker>>,
}

/// Shared execution machinery of a proxy.
pub(crate) struct Pipeline {
    pub(crate) service: Arc<str>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) retry: Option<Arc<dyn RetryStrategy>>,
    pub(crate) call_timeout: Option<Duration>,
    pub(crate) observers: Vec<Arc<dyn CallObserver>>,
}

impl Pipeline {
    /// Serialize the body and build the request without sending it.
    pub(crate) fn prepare(&self, route: &Route, invocation: &Invocation) -> Result<HttpRequest> {
        let body = route.factory.encode_body(invocation)?;
        route.factory.build(invocation, body)
    }

    /// Run a call and decode its response with `decode`.
    pub(crate) async fn execute<T, F>(
        &self,
        route: &Route,
        invocation: &Invocation,
        decode: F,
    ) -> Result<T>
    where
        F: FnOnce(Response) -> Result<T>,
    {
        let endpoint = route.factory.endpoint();
        let span = info_span!(
            "http.client.request",
            service = %self.service,
            endpoint = %endpoint.name(),
            method = %endpoint.method(),
            uri = %route.factory.template(),
        );

        let started = Instant::now();
        let mut context = RetryContext::new();
        let mut status = None;

        let result = async {
            let request = self.prepare(route, invocation)?;
            let response = self.send(route, request, invocation, &mut context).await?;
            status = Some(response.status().as_u16());
            decode(response)
        }
        .instrument(span)
        .await;

        let record = CallRecord {
            service: self.service.clone(),
            endpoint: endpoint.name().to_string(),
            method: endpoint.method().clone(),
            uri: route.factory.template().to_string(),
            outcome: CallOutcome::of(&result),
            status: status.or_else(|| result.as_ref().err().and_then(|e| e.status_code())),
            attempts: context.attempts(),
            latency: started.elapsed(),
        };
        for observer in &self.observers {
            observer.on_call_complete(&record);
        }

        result
    }

    /// Apply the call deadline around the resilience loop.
    async fn send(
        &self,
        route: &Route,
        request: HttpRequest,
        invocation: &Invocation,
        context: &mut RetryContext,
    ) -> Result<Response> {
        let deadline = invocation
            .call_timeout()
            .or_else(|| route.factory.endpoint().timeout())
            .or(self.call_timeout);

        match deadline {
            Some(deadline) => {
                tokio::time::timeout(deadline, self.send_with_resilience(route, &request, context))
                    .await
                    .unwrap_or_else(|_| {
                        debug!(?deadline, "Call deadline exceeded");
                        Err(RestClientError::CallTimeout(deadline))
                    })
            }
            None => self.send_with_resilience(route, &request, context).await,
        }
    }

    async fn send_with_resilience(
        &self,
        route: &Route,
        request: &HttpRequest,
        context: &mut RetryContext,
    ) -> Result<Response> {
        loop {
            let permit = route
                .breaker
                .as_deref()
                .map(CircuitBreaker::try_acquire)
                .transpose()?;
            let attempt = context.begin_attempt();

            let result = match self.transport.send(request.clone()).await {
                Ok(response) => response.error_for_status(),
                Err(e) => Err(e),
            };

            let error = match result {
                Ok(response) => {
                    if let Some(permit) = permit {
                        permit.on_success();
                    }
                    return Ok(response);
                }
                Err(error) => {
                    if let Some(permit) = permit {
                        permit.on_error(&error);
                    }
                    error
                }
            };

            let Some(strategy) = self
                .retry
                .as_ref()
                .filter(|strategy| error.is_retryable() && strategy.should_retry(context, &error))
            else {
                return Err(context.exhausted(error));
            };

            if let Some(breaker) = &route.breaker
                && !breaker.is_call_permitted()
            {
                debug!(breaker = %breaker.name(), attempt, "Circuit open, not retrying");
                return Err(RestClientError::CircuitOpen {
                    name: breaker.name().to_string(),
                });
            }

            let delay = strategy.retry_delay(attempt - 1);
            debug!(attempt, ?delay, error = %error, "Retrying request");
            context.schedule(error, delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("service", &self.service)
            .field("retry", &self.retry.is_some())
            .field("call_timeout", &self.call_timeout)
            .field("observers", &self.observers.len())
            .finish()
    }
}
