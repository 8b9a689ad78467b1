//! GPU suspension points
//!
//! `submit` hands a finished command buffer to an `AsyncGpuSubmitter` and
//! resolves once its completion is signalled. `query` does the same and then
//! reads the result back. Both submit on first poll and resolve exactly once.

use super::{TaskError, TaskResult};
use crate::gpu::{AsyncGpuSubmitter, GpuResult};
use futures::channel::oneshot;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future of one GPU submission
pub struct GpuSubmission<'a, S: ?Sized, CB> {
    submitter: &'a S,
    buffer: Option<CB>,
    completion: Option<oneshot::Receiver<GpuResult<()>>>,
}

/// Submit `buffer` and wait for the GPU to finish it
pub fn submit<S, CB>(submitter: &S, buffer: CB) -> GpuSubmission<'_, S, CB>
where
    S: AsyncGpuSubmitter<CB> + ?Sized,
{
    GpuSubmission {
        submitter,
        buffer: Some(buffer),
        completion: None,
    }
}

// The buffer is moved out on first poll and never pinned
impl<'a, S: ?Sized, CB> Unpin for GpuSubmission<'a, S, CB> {}

impl<'a, S, CB> Future for GpuSubmission<'a, S, CB>
where
    S: AsyncGpuSubmitter<CB> + ?Sized,
{
    type Output = TaskResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<TaskResult<()>> {
        let this = &mut *self;
        if let Some(buffer) = this.buffer.take() {
            let (sender, receiver) = oneshot::channel();
            this.submitter.submit(
                buffer,
                Box::new(move |result| {
                    // The awaiting task may have been abandoned
                    let _ = sender.send(result);
                }),
            );
            this.completion = Some(receiver);
        }

        let Some(completion) = this.completion.as_mut() else {
            return Poll::Ready(Err(TaskError::ResultTaken));
        };
        let result = match Pin::new(completion).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(Ok(()))) => Ok(()),
            Poll::Ready(Ok(Err(error))) => {
                log::error!("[GpuSubmission] GPU reported failure: {}", error);
                Err(TaskError::Gpu(error))
            }
            Poll::Ready(Err(oneshot::Canceled)) => {
                log::error!("[GpuSubmission] Submitter dropped the completion callback");
                Err(TaskError::SubmitterDropped)
            }
        };
        this.completion = None;
        Poll::Ready(result)
    }
}

/// Future of a GPU round trip whose result is read back on completion
pub struct GpuQuery<'a, S: ?Sized, CB, F> {
    submission: GpuSubmission<'a, S, CB>,
    read_back: Option<F>,
}

/// Submit `buffer`, then run `read_back` once the GPU has finished it
pub fn query<S, CB, R, F>(submitter: &S, buffer: CB, read_back: F) -> GpuQuery<'_, S, CB, F>
where
    S: AsyncGpuSubmitter<CB> + ?Sized,
    F: FnOnce() -> R,
{
    GpuQuery {
        submission: submit(submitter, buffer),
        read_back: Some(read_back),
    }
}

impl<'a, S: ?Sized, CB, F> Unpin for GpuQuery<'a, S, CB, F> {}

impl<'a, S, CB, R, F> Future for GpuQuery<'a, S, CB, F>
where
    S: AsyncGpuSubmitter<CB> + ?Sized,
    F: FnOnce() -> R,
{
    type Output = TaskResult<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<TaskResult<R>> {
        let this = &mut *self;
        match Pin::new(&mut this.submission).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(error)) => Poll::Ready(Err(error)),
            Poll::Ready(Ok(())) => match this.read_back.take() {
                Some(read_back) => Poll::Ready(Ok(read_back())),
                None => Poll::Ready(Err(TaskError::ResultTaken)),
            },
        }
    }
}
