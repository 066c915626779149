use bytes::{Buf, Bytes};
use hyper::body::Body;
use pin_project_lite::pin_project;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

pin_project! {
    /// Collects every data frame of a body into one contiguous buffer,
    /// failing once more than `limit` bytes have arrived.
    pub struct DrainBodyFuture<B: Body> {
        #[pin]
        body: B,
        buf: Vec<u8>,
        limit: usize,
    }
}

impl<B> DrainBodyFuture<B>
where
    B: Body,
{
    #[inline]
    #[must_use]
    pub fn with_limit(body: B, size_hint: usize, limit: usize) -> Self {
        Self {
            body,
            buf: Vec::with_capacity(size_hint.min(limit)),
            limit,
        }
    }
}

impl<B> Future for DrainBodyFuture<B>
where
    B: Body,
    B::Error: Display,
{
    type Output = Result<Bytes, anyhow::Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slf = self.project();
        loop {
            let frame = match ready!(slf.body.as_mut().poll_frame(cx)) {
                None => return Poll::Ready(Ok(Bytes::from(std::mem::take(slf.buf)))),
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    return Poll::Ready(Err(anyhow::anyhow!("Failed to poll next frame: {e}")));
                }
            };
            // Trailers carry no payload.
            let Ok(mut data) = frame.into_data() else {
                continue;
            };
            if slf.buf.len().saturating_add(data.remaining()) > *slf.limit {
                return Poll::Ready(Err(anyhow::anyhow!(
                    "Body exceeds limit of {} bytes",
                    slf.limit
                )));
            }
            while data.has_remaining() {
                let chunk = data.chunk();
                let len = chunk.len();
                slf.buf.extend_from_slice(chunk);
                data.advance(len);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_body;

    #[tokio::test]
    async fn drains_full_body() {
        let body = byte_body(&b"hello world"[..]);
        let bytes = DrainBodyFuture::with_limit(body, 4, 1024).await.unwrap();
        assert_eq!(&bytes[..], b"hello world");
    }

    #[tokio::test]
    async fn rejects_body_over_limit() {
        let body = byte_body(vec![0u8; 64]);
        let err = DrainBodyFuture::with_limit(body, 64, 16).await.unwrap_err();
        assert!(err.to_string().contains("limit of 16 bytes"));
    }
}
