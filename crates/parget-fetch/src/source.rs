use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::header::{self, HeaderMap};
use reqwest::{Method, StatusCode};

use crate::config::Configure;
use crate::error::{FetchError, Result};

/// A boxed stream type for response bodies.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// What a metadata probe learned about the remote resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub size:          u64,
    /// `Last-Modified` verbatim; empty when the server sent none.
    pub modified:      String,
    pub accept_ranges: bool,
}

/// Where ranges come from.
///
/// The producer calls [`probe`](Source::probe) once; workers call
/// [`fetch_range`](Source::fetch_range) once per range attempt.
pub trait Source: Send + Sync + 'static {
    fn probe(&self) -> impl Future<Output = Result<Probe>> + Send;

    /// Stream bytes `start..=end` of the resource.
    fn fetch_range(
        &self,
        start: u64,
        end: u64,
    ) -> impl Future<Output = Result<BoxStream<'static, Result<Bytes>>>> + Send;
}

/// [`Source`] over HTTP range requests.
#[derive(Debug, Clone)]
pub struct HttpSource {
    conf: Arc<Configure>,
}

impl HttpSource {
    pub fn new(conf: Arc<Configure>) -> Self { Self { conf } }
}

impl Source for HttpSource {
    async fn probe(&self) -> Result<Probe> {
        let method = if self.conf.head() { Method::HEAD } else { Method::GET };
        tracing::info!(%method, url = %self.conf.url(), "probing resource");

        // A GET probe is dropped before its body is read.
        let resp = self.conf.request(method, self.conf.url().clone()).send().await?;
        if !resp.status().is_success() {
            return Err(FetchError::ProbeStatus(resp.status().as_u16()));
        }
        let probe = parse_probe(resp.headers())?;
        tracing::debug!(size = probe.size, modified = %probe.modified, "probe succeeded");
        Ok(probe)
    }

    async fn fetch_range(&self, start: u64, end: u64) -> Result<BoxStream<'static, Result<Bytes>>> {
        let resp = self
            .conf
            .request(Method::GET, self.conf.url().clone())
            .header(header::RANGE, format!("bytes={start}-{end}"))
            .send()
            .await?;
        if resp.status() != StatusCode::PARTIAL_CONTENT {
            return Err(FetchError::NotPartial(resp.status().as_u16()));
        }
        Ok(Box::pin(resp.bytes_stream().map(|chunk| chunk.map_err(FetchError::from))))
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: header::HeaderName) -> &'h str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or_default()
}

fn parse_probe(headers: &HeaderMap) -> Result<Probe> {
    if header_str(headers, header::ACCEPT_RANGES) != "bytes" {
        return Err(FetchError::ServerUnsupported);
    }
    let length = header_str(headers, header::CONTENT_LENGTH);
    let size = length.parse().map_err(|_| FetchError::MalformedHeader {
        name:  "Content-Length",
        value: length.to_string(),
    })?;
    Ok(Probe {
        size,
        modified: header_str(headers, header::LAST_MODIFIED).to_string(),
        accept_ranges: true,
    })
}

#[cfg(test)]
pub(crate) mod memory {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::stream;
    use parking_lot::Mutex;
    use tokio::sync::Semaphore;

    use super::*;

    /// In-memory resource that counts ranged fetches.
    pub(crate) struct MemorySource {
        pub data:          Bytes,
        pub modified:      String,
        pub accept_ranges: bool,
        pub chunk:         usize,
        pub fetches:       AtomicUsize,
        starts:            Mutex<Vec<u64>>,
        truncate:          Option<(u64, usize)>,
        gate:              Option<Arc<Semaphore>>,
    }

    impl MemorySource {
        pub fn new(data: impl Into<Bytes>) -> Self {
            Self {
                data:          data.into(),
                modified:      "Mon, 01 Jan 2024 00:00:00 GMT".into(),
                accept_ranges: true,
                chunk:         64 * 1024,
                fetches:       AtomicUsize::new(0),
                starts:        Mutex::new(Vec::new()),
                truncate:      None,
                gate:          None,
            }
        }

        /// Hold every ranged fetch until a permit is added to [`gate`](Self::gate).
        pub fn gated(mut self) -> Self {
            self.gate = Some(Arc::new(Semaphore::new(0)));
            self
        }

        pub fn gate(&self) -> Arc<Semaphore> {
            Arc::clone(self.gate.as_ref().expect("source is gated"))
        }

        pub fn patterned(len: usize) -> Self {
            Self::new((0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>())
        }

        /// End the body after `keep` bytes for fetches starting at `start`.
        pub fn truncated(mut self, start: u64, keep: usize) -> Self {
            self.truncate = Some((start, keep));
            self
        }

        pub fn fetches(&self) -> usize { self.fetches.load(Ordering::SeqCst) }

        /// First byte of every ranged fetch, in call order.
        pub fn starts(&self) -> Vec<u64> { self.starts.lock().clone() }
    }

    impl Source for MemorySource {
        async fn probe(&self) -> Result<Probe> {
            Ok(Probe {
                size:          self.data.len() as u64,
                modified:      self.modified.clone(),
                accept_ranges: self.accept_ranges,
            })
        }

        async fn fetch_range(
            &self,
            start: u64,
            end: u64,
        ) -> Result<BoxStream<'static, Result<Bytes>>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.starts.lock().push(start);
            if let Some(gate) = &self.gate {
                gate.acquire()
                    .await
                    .map_err(|e| FetchError::Stream(e.to_string()))?
                    .forget();
            }
            let mut body = self.data.slice(start as usize..=end as usize);
            if let Some((at, keep)) = self.truncate {
                if at == start {
                    body.truncate(keep);
                }
            }
            let chunks: Vec<Result<Bytes>> = (0..body.len())
                .step_by(self.chunk)
                .map(|at| Ok(body.slice(at..(at + self.chunk).min(body.len()))))
                .collect();
            Ok(Box::pin(stream::iter(chunks)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        pairs
            .iter()
            .map(|(k, v)| (k.clone(), HeaderValue::from_str(v).unwrap()))
            .collect()
    }

    #[test]
    fn probe_requires_byte_ranges() {
        let h = headers(&[(header::CONTENT_LENGTH, "10")]);
        assert!(matches!(parse_probe(&h), Err(FetchError::ServerUnsupported)));

        let h = headers(&[(header::ACCEPT_RANGES, "none"), (header::CONTENT_LENGTH, "10")]);
        assert!(matches!(parse_probe(&h), Err(FetchError::ServerUnsupported)));
    }

    #[test]
    fn probe_reads_length_and_tag() {
        let h = headers(&[
            (header::ACCEPT_RANGES, "bytes"),
            (header::CONTENT_LENGTH, "15471938"),
            (header::LAST_MODIFIED, "Wed, 21 Oct 2015 07:28:00 GMT"),
        ]);
        let probe = parse_probe(&h).unwrap();
        assert_eq!(probe.size, 15_471_938);
        assert_eq!(probe.modified, "Wed, 21 Oct 2015 07:28:00 GMT");
    }

    #[test]
    fn probe_rejects_bad_length() {
        let h = headers(&[(header::ACCEPT_RANGES, "bytes"), (header::CONTENT_LENGTH, "ten")]);
        assert!(matches!(
            parse_probe(&h),
            Err(FetchError::MalformedHeader { name: "Content-Length", .. })
        ));
        let h = headers(&[(header::ACCEPT_RANGES, "bytes")]);
        assert!(parse_probe(&h).is_err());
    }
}
