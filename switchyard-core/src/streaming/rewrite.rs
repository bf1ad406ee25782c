//! Generic stateful stream rewriting

use crate::error::GatewayError;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

/// Stateful per-chunk transform driven by [`rewrite_stream`]
#[async_trait]
pub trait StreamRewriter: Send {
    type Input: Send;
    type Output: Send;

    /// Transform one chunk; `None` forwards nothing for it
    async fn rewrite(&mut self, chunk: Self::Input) -> Result<Option<Self::Output>, GatewayError>;

    /// Called once after the input ends cleanly
    async fn finish(&mut self) -> Result<Option<Self::Output>, GatewayError> {
        Ok(None)
    }
}

/// Apply `rewriter` to every chunk of `input`
///
/// Only `Some` results are forwarded. The output closes when the input ends,
/// after giving the rewriter a chance to flush. The first error from either
/// side is forwarded and ends the output. The input is dropped on every exit
/// path, including when the consumer drops the output early.
pub fn rewrite_stream<S, R>(
    input: S,
    mut rewriter: R,
) -> Pin<Box<dyn Stream<Item = Result<R::Output, GatewayError>> + Send>>
where
    S: Stream<Item = Result<R::Input, GatewayError>> + Send + 'static,
    R: StreamRewriter + 'static,
    R::Input: 'static,
    R::Output: 'static,
{
    Box::pin(async_stream::try_stream! {
        let mut input = Box::pin(input);
        while let Some(chunk) = input.next().await {
            let chunk = chunk?;
            if let Some(out) = rewriter.rewrite(chunk).await? {
                yield out;
            }
        }
        if let Some(out) = rewriter.finish().await? {
            yield out;
        }
    })
}

/// Closure-backed rewriter without end-of-stream output
pub struct FnRewriter<F, T, U> {
    f: F,
    _marker: PhantomData<fn(T) -> U>,
}

#[async_trait]
impl<F, Fut, T, U> StreamRewriter for FnRewriter<F, T, U>
where
    F: FnMut(T) -> Fut + Send,
    Fut: Future<Output = Result<Option<U>, GatewayError>> + Send,
    T: Send + 'static,
    U: Send + 'static,
{
    type Input = T;
    type Output = U;

    async fn rewrite(&mut self, chunk: T) -> Result<Option<U>, GatewayError> {
        (self.f)(chunk).await
    }
}

/// [`rewrite_stream`] with an async closure
pub fn rewrite_with<S, F, Fut, T, U>(
    input: S,
    f: F,
) -> Pin<Box<dyn Stream<Item = Result<U, GatewayError>> + Send>>
where
    S: Stream<Item = Result<T, GatewayError>> + Send + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<U>, GatewayError>> + Send,
    T: Send + 'static,
    U: Send + 'static,
{
    rewrite_stream(
        input,
        FnRewriter {
            f,
            _marker: PhantomData,
        },
    )
}
