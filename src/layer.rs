//! Tower middleware that paces requests through a [`Governor`].
//!
//! Every request is weighed (one unit by default), admitted asynchronously in
//! FIFO order, and only then handed to the inner service. With a maximum wait
//! configured, requests that cannot be admitted in time fail with
//! [`GovernorError::WaitTimedOut`](crate::GovernorError::WaitTimedOut) instead
//! of queueing indefinitely.

use crate::error::ThrottleError;
use crate::Governor;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower_layer::Layer;
use tower_service::Service;

type Weigher<Req> = Arc<dyn Fn(&Req) -> u64 + Send + Sync>;

/// A layer that enforces a fixed throughput using a [`Governor`].
pub struct GovernorLayer<Req> {
    governor: Governor,
    weigh: Weigher<Req>,
    max_wait: Option<Duration>,
}

impl<Req> Clone for GovernorLayer<Req> {
    fn clone(&self) -> Self {
        Self { governor: self.governor.clone(), weigh: self.weigh.clone(), max_wait: self.max_wait }
    }
}

impl<Req> std::fmt::Debug for GovernorLayer<Req> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernorLayer")
            .field("governor", &self.governor)
            .field("weigh", &"<weigher>")
            .field("max_wait", &self.max_wait)
            .finish()
    }
}

fn unit_cost<Req>(_: &Req) -> u64 {
    1
}

impl<Req: 'static> GovernorLayer<Req> {
    /// Every request costs one unit.
    pub fn new(governor: Governor) -> Self {
        Self { governor, weigh: Arc::new(unit_cost::<Req>), max_wait: None }
    }

    /// Charge each request by `weigh` (e.g. its payload length).
    pub fn weigh_with<F>(mut self, weigh: F) -> Self
    where
        F: Fn(&Req) -> u64 + Send + Sync + 'static,
    {
        self.weigh = Arc::new(weigh);
        self
    }

    /// Fail requests that would queue longer than `max_wait`.
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }
}

impl<S, Req> Layer<S> for GovernorLayer<Req> {
    type Service = GovernorService<S, Req>;

    fn layer(&self, service: S) -> Self::Service {
        GovernorService {
            inner: service,
            governor: self.governor.clone(),
            weigh: self.weigh.clone(),
            max_wait: self.max_wait,
        }
    }
}

/// Middleware service that admits each request before calling the inner service.
pub struct GovernorService<S, Req> {
    inner: S,
    governor: Governor,
    weigh: Weigher<Req>,
    max_wait: Option<Duration>,
}

impl<S: Clone, Req> Clone for GovernorService<S, Req> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            governor: self.governor.clone(),
            weigh: self.weigh.clone(),
            max_wait: self.max_wait,
        }
    }
}

impl<S: std::fmt::Debug, Req> std::fmt::Debug for GovernorService<S, Req> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernorService")
            .field("inner", &self.inner)
            .field("governor", &self.governor)
            .field("max_wait", &self.max_wait)
            .finish()
    }
}

impl<S, Req> Service<Req> for GovernorService<S, Req>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = ThrottleError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(ThrottleError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let governor = self.governor.clone();
        let cost = (self.weigh)(&req);
        let max_wait = self.max_wait;
        // Take the service that was driven to readiness, leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        async move {
            match max_wait {
                Some(limit) => governor.admit_async_timeout(cost, limit).await?,
                None => governor.admit_async(cost).await?,
            };
            inner.call(req).await.map_err(ThrottleError::Inner)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GovernorConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::{service_fn, ServiceBuilder, ServiceExt};

    #[test]
    fn uncontended_call_resolves_without_yielding() {
        let governor = Governor::new(GovernorConfig::new(1e9, 16).unwrap());
        let mut svc = GovernorLayer::new(governor.clone())
            .layer(service_fn(|req: u32| async move { Ok::<_, std::io::Error>(req * 2) }));

        let fut: BoxFuture<'static, Result<u32, ThrottleError<std::io::Error>>> = svc.call(21);
        assert_eq!(fut.now_or_never().map(|res| res.unwrap()), Some(42));
        assert_eq!(governor.stats().admitted_requests, 1);
    }

    #[tokio::test]
    async fn weighs_requests_by_payload() {
        let governor = Governor::new(GovernorConfig::new(1e9, 1024).unwrap());
        let svc = ServiceBuilder::new()
            .layer(GovernorLayer::new(governor.clone()).weigh_with(|req: &Vec<u8>| req.len() as u64))
            .service(service_fn(|req: Vec<u8>| async move {
                Ok::<_, std::io::Error>(req.len())
            }));

        let len = svc.oneshot(vec![0u8; 100]).await.unwrap();
        assert_eq!(len, 100);
        assert_eq!(governor.stats().admitted_units, 100);
    }

    #[tokio::test]
    async fn oversized_request_never_reaches_inner() {
        let governor = Governor::new(GovernorConfig::new(10.0, 10).unwrap());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let svc = ServiceBuilder::new()
            .layer(GovernorLayer::new(governor).weigh_with(|req: &u64| *req))
            .service(service_fn(move |_req: u64| {
                seen.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<(), std::io::Error>(()) }
            }));

        let err = svc.oneshot(11).await.unwrap_err();
        assert!(err.as_governor().is_some_and(|e| e.is_exceeds_capacity()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn inner_errors_are_wrapped() {
        let governor = Governor::new(GovernorConfig::new(1e9, 10).unwrap());
        let svc = ServiceBuilder::new().layer(GovernorLayer::new(governor)).service(service_fn(
            |_req: ()| async move { Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "boom")) },
        ));

        let err = svc.oneshot(()).await.unwrap_err();
        assert_eq!(err.into_inner().map(|e| e.to_string()), Some("boom".to_string()));
    }
}
