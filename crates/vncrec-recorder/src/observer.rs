// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Explicit transport interception
//
// The live client hands its transport to an `ObservedStream`, which forwards all I/O
// unchanged and reports each completed read and write to an observer.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::recorder::RecorderHandle;

/// Receives a copy of all traffic crossing a transport
pub trait TransportObserver: Send + Sync {
    /// Bytes sent by the client to the server
    fn on_send(&self, bytes: &[u8]);

    /// Bytes received by the client from the server
    fn on_receive(&self, bytes: &[u8]);
}

impl TransportObserver for RecorderHandle {
    fn on_send(&self, bytes: &[u8]) {
        self.append(true, bytes);
    }

    fn on_receive(&self, bytes: &[u8]) {
        self.append(false, bytes);
    }
}

/// Transport wrapper reporting traffic to an observer
pub struct ObservedStream<S> {
    inner: S,
    observer: Arc<dyn TransportObserver>,
}

impl<S> ObservedStream<S> {
    pub fn new(inner: S, observer: Arc<dyn TransportObserver>) -> Self {
        Self { inner, observer }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ObservedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            let received = &buf.filled()[before..];
            if !received.is_empty() {
                this.observer.on_receive(received);
            }
        }
        result
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ObservedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &result {
            if *n > 0 {
                this.observer.on_send(&buf[..*n]);
            }
        }
        result
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
