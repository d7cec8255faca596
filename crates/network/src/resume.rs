// crates/network/src/resume.rs
//! Downloads that survive severed connections
//!
//! A [`ResumableReader`] reads one logical resource through as many physical
//! connections as it takes. When a connection breaks with a transient error
//! it asks its [`Getter`] for a new one starting at the last byte handed to
//! the caller, either with a range request or by reading and discarding the
//! prefix when ranges are not available.

use crate::getter::Getter;
use crate::request::ByteStream;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, RANGE};
use std::io;
use std::sync::Arc;
use steadyline_core::{is_connection_transient, ClassifiedError, ErrorClassifier, ErrorKind};
use steadyline_resilience::{run_or_cancel, sleep_or_cancel, CancellationToken, RetryPolicy};
use tokio_util::io::StreamReader;

/// Progress of a download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadState {
    /// Bytes handed to the caller so far
    pub offset: u64,
    /// Whether reconnects ask for a byte range
    pub range_capable: bool,
}

enum ReaderState {
    Connected { body: ByteStream, pending: Bytes },
    Reconnecting,
    Finished,
    Closed,
}

/// Reader over a resource that reconnects on transient failures
///
/// Reads are strictly sequential and the offset only moves forward. A read
/// may open up to `max_retries` connections (at least one), sleeping
/// `attempt * min_delay` between them. Connections that break before
/// yielding a byte count against the same budget as failed connects. Only
/// connection-transient and throttled failures are worth a new connection;
/// anything else is returned as classified.
pub struct ResumableReader {
    getter: Arc<dyn Getter>,
    policy: RetryPolicy,
    cancel: CancellationToken,
    classifier: ErrorClassifier,
    download: DownloadState,
    state: ReaderState,
}

impl ResumableReader {
    /// Opens the first connection
    ///
    /// Fails if no connection could be made within the retry budget.
    pub async fn new(
        getter: Arc<dyn Getter>,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Result<Self, ClassifiedError> {
        let range_capable = getter.supports_range();
        let mut reader = Self {
            getter,
            policy,
            cancel,
            classifier: ErrorClassifier::new(),
            download: DownloadState {
                offset: 0,
                range_capable,
            },
            state: ReaderState::Reconnecting,
        };

        match reader.connect(&mut 0, None).await {
            Ok((body, pending)) => {
                reader.state = ReaderState::Connected { body, pending };
                Ok(reader)
            }
            Err(err) => {
                log::warn!(
                    kind = err.kind().as_str(),
                    error = err.to_string().as_str();
                    "download could not be started"
                );
                Err(err)
            }
        }
    }

    /// Current progress
    pub fn state(&self) -> DownloadState {
        self.download
    }

    /// Bytes handed to the caller so far
    pub fn offset(&self) -> u64 {
        self.download.offset
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, ReaderState::Closed)
    }

    /// Reads into `buf`; `Ok(0)` means the resource is complete
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.next_chunk(buf.len()).await? {
            Some(chunk) => {
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
            None => Ok(0),
        }
    }

    /// Reads everything that is left
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> io::Result<usize> {
        let start = out.len();
        while let Some(chunk) = self.next_chunk(usize::MAX).await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.len() - start)
    }

    /// Drops the current connection; later reads fail
    pub fn close(&mut self) {
        if !self.is_closed() {
            log::trace!(offset = self.download.offset; "closing download");
            self.state = ReaderState::Closed;
        }
    }

    /// The rest of the resource as a chunk stream
    pub fn into_stream(self) -> ByteStream {
        futures::stream::try_unfold(self, |mut reader| async move {
            let chunk = reader.next_chunk(usize::MAX).await?;
            Ok::<_, io::Error>(chunk.map(|chunk| (chunk, reader)))
        })
        .boxed()
    }

    /// The rest of the resource as a `tokio` reader
    pub fn into_async_read(self) -> StreamReader<ByteStream, Bytes> {
        StreamReader::new(self.into_stream())
    }

    /// Hands out up to `max` bytes, reconnecting as needed
    ///
    /// Every connection opened during one call counts against the same
    /// budget, so a resource whose connections keep breaking before the
    /// first byte ends in `NoProgress` instead of reconnecting forever.
    async fn next_chunk(&mut self, max: usize) -> io::Result<Option<Bytes>> {
        let mut empty_chunks: u32 = 0;
        let mut attempts: u32 = 0;
        let mut severed: Option<ClassifiedError> = None;

        loop {
            match &mut self.state {
                ReaderState::Closed => {
                    return Err(io::Error::new(
                        io::ErrorKind::NotConnected,
                        "download reader is closed",
                    ));
                }
                ReaderState::Finished => return Ok(None),
                ReaderState::Connected { body, pending } => {
                    if !pending.is_empty() {
                        let chunk = if pending.len() <= max {
                            std::mem::take(pending)
                        } else {
                            pending.split_to(max)
                        };
                        self.download.offset += chunk.len() as u64;
                        return Ok(Some(chunk));
                    }

                    let next = run_or_cancel(body.next(), &self.cancel)
                        .await
                        .map_err(|e| io::Error::other(ClassifiedError::new(e)))?;

                    match next {
                        Some(Ok(chunk)) if chunk.is_empty() => {
                            empty_chunks += 1;
                            if empty_chunks > self.policy.max_retries().max(1) {
                                let err = ClassifiedError::of_kind(
                                    ErrorKind::NoProgress,
                                    "connection keeps returning no data",
                                )
                                .with_context("offset", self.download.offset);
                                log::warn!(offset = self.download.offset; "download stalled");
                                return Err(io::Error::other(err));
                            }
                        }
                        Some(Ok(chunk)) => *pending = chunk,
                        Some(Err(err)) if is_connection_transient(&err) => {
                            log::debug!(
                                offset = self.download.offset,
                                error = err.to_string().as_str();
                                "download connection severed, reconnecting"
                            );
                            severed = Some(self.classifier.classify(err));
                            self.state = ReaderState::Reconnecting;
                        }
                        Some(Err(err)) => return Err(err),
                        None => {
                            self.state = ReaderState::Finished;
                            return Ok(None);
                        }
                    }
                }
                ReaderState::Reconnecting => match self.connect(&mut attempts, severed.take()).await {
                    Ok((body, pending)) => {
                        self.state = ReaderState::Connected { body, pending };
                    }
                    Err(err) => {
                        log::warn!(
                            offset = self.download.offset,
                            kind = err.kind().as_str(),
                            error = err.to_string().as_str();
                            "download failed"
                        );
                        return Err(io::Error::other(err));
                    }
                },
            }
        }
    }

    /// Opens a connection, drawing on the attempt budget of the current call
    ///
    /// `attempt` counts connections already made during the call; the budget is
    /// `max_retries` (at least one). `cause` is the failure that made a new
    /// connection necessary, reported if the budget runs out before any
    /// attempt fails on its own.
    async fn connect(
        &mut self,
        attempt: &mut u32,
        cause: Option<ClassifiedError>,
    ) -> Result<(ByteStream, Bytes), ClassifiedError> {
        let budget = self.policy.max_retries().max(1);
        let backoff = self.policy.linear_backoff();
        let mut last = cause;

        while *attempt < budget {
            *attempt += 1;
            if *attempt > 1 {
                sleep_or_cancel(backoff.delay(*attempt - 1), &self.cancel)
                    .await
                    .map_err(|e| self.classifier.classify(e))?;
            }
            if self.cancel.is_cancelled() {
                return Err(ClassifiedError::of_kind(
                    ErrorKind::Unclassified,
                    "download cancelled",
                ));
            }

            match self.open().await {
                Ok(connection) => return Ok(connection),
                Err(err) if !worth_reconnecting(&err) => return Err(err),
                Err(err) => {
                    log::debug!(
                        offset = self.download.offset,
                        attempt = *attempt,
                        error = err.to_string().as_str();
                        "download connection attempt failed"
                    );
                    last = Some(err);
                }
            }
        }

        let err = match last {
            Some(err) => err.with_label(ErrorKind::NoProgress),
            None => ClassifiedError::of_kind(ErrorKind::NoProgress, "no connection attempt made"),
        };
        Err(err
            .with_context("offset", self.download.offset)
            .with_context("attempts", budget))
    }

    /// Opens a connection positioned at the current offset
    async fn open(&mut self) -> Result<(ByteStream, Bytes), ClassifiedError> {
        let offset = self.download.offset;
        let ranged = offset > 0 && self.download.range_capable;

        let mut headers = HeaderMap::new();
        if ranged {
            let value = HeaderValue::from_str(&format!("bytes={}-", offset))
                .map_err(|e| self.classifier.classify(e))?;
            headers.insert(RANGE, value);
        }

        let connection = self
            .getter
            .get(headers, &self.cancel)
            .await
            .map_err(|e| self.classifier.classify(e))?;
        let partial = connection.is_partial();
        let mut body = connection.into_body();

        if offset == 0 || (ranged && partial) {
            return Ok((body, Bytes::new()));
        }

        if ranged {
            log::debug!(offset = offset; "range ignored by server, discarding prefix");
        }
        let pending = run_or_cancel(discard(&mut body, offset), &self.cancel)
            .await
            .map_err(|e| self.classifier.classify(e))?
            .map_err(|e| self.classifier.classify(e))?;

        Ok((body, pending))
    }
}

/// Reads and drops `count` bytes, returning whatever was read past them
async fn discard(body: &mut ByteStream, count: u64) -> io::Result<Bytes> {
    let mut remaining = count;
    while remaining > 0 {
        match body.next().await {
            Some(Ok(mut chunk)) => {
                let len = chunk.len() as u64;
                if len <= remaining {
                    remaining -= len;
                } else {
                    return Ok(chunk.split_off(remaining as usize));
                }
            }
            Some(Err(err)) => return Err(err),
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "resource ended before the resume offset",
                ))
            }
        }
    }
    Ok(Bytes::new())
}

fn worth_reconnecting(err: &ClassifiedError) -> bool {
    err.has_label(ErrorKind::ConnectionTransient) || err.has_label(ErrorKind::Throttled)
}
