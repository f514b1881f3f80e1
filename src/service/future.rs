//! # Service Futures
//!
//! Handle returned by every service operation. Operations on a service without a worker
//! run in the awaiting task when the future is polled. Operations marshalled to a worker are
//! queued as soon as the future is created and keep running even if it is dropped.

use crate::framework::Worker;
use crate::service::ServiceError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

type BoxedOp = Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send>>;

#[must_use = "operations on services without a worker only run when awaited"]
pub struct ServiceFuture {
    op: BoxedOp,
}

impl ServiceFuture {
    pub(crate) fn inline<F>(op: F) -> Self
    where
        F: Future<Output = Result<(), ServiceError>> + Send + 'static,
    {
        Self { op: Box::pin(op) }
    }

    pub(crate) fn posted<F>(worker: &Worker, op: F) -> Self
    where
        F: Future<Output = Result<(), ServiceError>> + Send + 'static,
    {
        match worker.post(op) {
            Ok(posted) => Self::inline(async move { posted.outcome().await? }),
            Err(err) => Self::ready(Err(err.into())),
        }
    }

    pub fn ready(result: Result<(), ServiceError>) -> Self {
        Self::inline(std::future::ready(result))
    }

    pub async fn wait(self) -> Result<(), ServiceError> {
        self.await
    }
}

impl Future for ServiceFuture {
    type Output = Result<(), ServiceError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.op.as_mut().poll(cx)
    }
}

/// Awaits every future in order and collects the results.
pub async fn wait_all(futures: Vec<ServiceFuture>) -> Vec<Result<(), ServiceError>> {
    let mut results = Vec::with_capacity(futures.len());
    for future in futures {
        results.push(future.await);
    }
    results
}

/// First error of a batch, once the whole batch has completed.
pub async fn wait_all_ok(futures: Vec<ServiceFuture>) -> Result<(), ServiceError> {
    wait_all(futures).await.into_iter().collect()
}
