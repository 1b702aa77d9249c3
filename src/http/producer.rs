//! Lazy response output.
//!
//! A response body is a chain of [`Producer`]s. Each call to `more()` yields
//! the next chunk until the producer reports exhaustion; consumption is
//! destructive. Decorators wrap an inner producer:
//!
//! ```text
//! GlobbingProducer            coalesce into large writes
//!   └─ HookedProducer         count bytes, report once exhausted
//!        └─ CompositeProducer [header, ChunkedProducer(body) | body]
//! ```

use std::collections::VecDeque;
use std::io::{self, Read};

use bytes::{BufMut, Bytes, BytesMut};

/// Default block size for file reads and coalescing.
pub const BLOCK_SIZE: usize = 1 << 16;

/// A one-shot source of output chunks.
pub trait Producer: Send {
    /// The next chunk, or `None` once exhausted.
    fn more(&mut self) -> io::Result<Option<Bytes>>;
}

pub type BoxProducer = Box<dyn Producer>;

/// Serves an in-memory buffer in bounded slices.
#[derive(Debug)]
pub struct SimpleProducer {
    data: Bytes,
    buffer_size: usize,
}

impl SimpleProducer {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into(), buffer_size: BLOCK_SIZE }
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }
}

impl Producer for SimpleProducer {
    fn more(&mut self) -> io::Result<Option<Bytes>> {
        if self.data.is_empty() {
            return Ok(None);
        }
        let take = self.data.len().min(self.buffer_size);
        Ok(Some(self.data.split_to(take)))
    }
}

/// Streams a reader in fixed-size blocks.
pub struct FileProducer {
    reader: Box<dyn Read + Send>,
    block_size: usize,
    done: bool,
}

impl FileProducer {
    pub fn new(reader: Box<dyn Read + Send>) -> Self {
        Self { reader, block_size: BLOCK_SIZE, done: false }
    }
}

impl Producer for FileProducer {
    fn more(&mut self) -> io::Result<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }
        let mut block = vec![0u8; self.block_size];
        let read = self.reader.read(&mut block)?;
        if read == 0 {
            self.done = true;
            return Ok(None);
        }
        block.truncate(read);
        Ok(Some(Bytes::from(block)))
    }
}

/// Concatenation of producers, drained front to back.
#[derive(Default)]
pub struct CompositeProducer {
    producers: VecDeque<BoxProducer>,
}

impl CompositeProducer {
    pub fn new(producers: impl IntoIterator<Item = BoxProducer>) -> Self {
        Self { producers: producers.into_iter().collect() }
    }

    pub fn push(&mut self, producer: BoxProducer) {
        self.producers.push_back(producer);
    }

    pub fn prepend(&mut self, producer: BoxProducer) {
        self.producers.push_front(producer);
    }
}

impl Producer for CompositeProducer {
    fn more(&mut self) -> io::Result<Option<Bytes>> {
        while let Some(front) = self.producers.front_mut() {
            match front.more()? {
                Some(chunk) if !chunk.is_empty() => return Ok(Some(chunk)),
                Some(_) => continue,
                None => {
                    self.producers.pop_front();
                }
            }
        }
        Ok(None)
    }
}

/// Transfer-Encoding: chunked framing around an inner producer.
pub struct ChunkedProducer {
    inner: BoxProducer,
    footers: Vec<String>,
    finished: bool,
}

impl ChunkedProducer {
    pub fn new(inner: BoxProducer) -> Self {
        Self { inner, footers: Vec::new(), finished: false }
    }

    /// Trailer lines emitted after the terminating zero-size chunk.
    pub fn with_footers(mut self, footers: Vec<String>) -> Self {
        self.footers = footers;
        self
    }
}

impl Producer for ChunkedProducer {
    fn more(&mut self) -> io::Result<Option<Bytes>> {
        if self.finished {
            return Ok(None);
        }
        loop {
            match self.inner.more()? {
                Some(data) if data.is_empty() => continue,
                Some(data) => {
                    let size = format!("{:x}\r\n", data.len());
                    let mut framed = BytesMut::with_capacity(size.len() + data.len() + 2);
                    framed.put_slice(size.as_bytes());
                    framed.put_slice(&data);
                    framed.put_slice(b"\r\n");
                    return Ok(Some(framed.freeze()));
                }
                None => {
                    self.finished = true;
                    let mut terminator = String::from("0\r\n");
                    for footer in &self.footers {
                        terminator.push_str(footer);
                        terminator.push_str("\r\n");
                    }
                    terminator.push_str("\r\n");
                    return Ok(Some(Bytes::from(terminator)));
                }
            }
        }
    }
}

/// Coalesces small chunks into writes of at least `buffer_size` bytes.
pub struct GlobbingProducer {
    inner: BoxProducer,
    buffer_size: usize,
    exhausted: bool,
}

impl GlobbingProducer {
    pub fn new(inner: BoxProducer) -> Self {
        Self { inner, buffer_size: BLOCK_SIZE, exhausted: false }
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }
}

impl Producer for GlobbingProducer {
    fn more(&mut self) -> io::Result<Option<Bytes>> {
        let mut buffer = BytesMut::new();
        while !self.exhausted && buffer.len() < self.buffer_size {
            match self.inner.more()? {
                Some(chunk) => buffer.put_slice(&chunk),
                None => self.exhausted = true,
            }
        }
        if buffer.is_empty() {
            Ok(None)
        } else {
            Ok(Some(buffer.freeze()))
        }
    }
}

/// Callback receiving the number of bytes a chain produced.
pub type SentHook = Box<dyn FnOnce(u64) + Send>;

/// Counts bytes and reports the total exactly once.
///
/// The hook fires on exhaustion, or on drop if the chain was abandoned.
pub struct HookedProducer {
    inner: BoxProducer,
    bytes: u64,
    hook: Option<SentHook>,
}

impl HookedProducer {
    pub fn new(inner: BoxProducer, hook: SentHook) -> Self {
        Self { inner, bytes: 0, hook: Some(hook) }
    }

    fn fire(&mut self) {
        if let Some(hook) = self.hook.take() {
            hook(self.bytes);
        }
    }
}

impl Producer for HookedProducer {
    fn more(&mut self) -> io::Result<Option<Bytes>> {
        match self.inner.more()? {
            Some(chunk) => {
                self.bytes += chunk.len() as u64;
                Ok(Some(chunk))
            }
            None => {
                self.fire();
                Ok(None)
            }
        }
    }
}

impl Drop for HookedProducer {
    fn drop(&mut self) {
        self.fire();
    }
}

/// Drain a producer into one buffer.
pub fn drain(producer: &mut dyn Producer) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    while let Some(chunk) = producer.more()? {
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn simple(data: &'static str) -> BoxProducer {
        Box::new(SimpleProducer::new(data))
    }

    #[test]
    fn simple_producer_slices() {
        let mut p = SimpleProducer::new("abcdef").with_buffer_size(4);
        assert_eq!(p.more().unwrap().unwrap(), "abcd");
        assert_eq!(p.more().unwrap().unwrap(), "ef");
        assert!(p.more().unwrap().is_none());
    }

    #[test]
    fn composite_skips_empty_members() {
        let mut p = CompositeProducer::new(vec![simple("a"), simple(""), simple("bc")]);
        assert_eq!(drain(&mut p).unwrap(), b"abc");
    }

    #[test]
    fn chunked_framing_and_footers() {
        let body = CompositeProducer::new(vec![simple("hello"), simple(" world!")]);
        let mut p = ChunkedProducer::new(Box::new(body));
        assert_eq!(
            drain(&mut p).unwrap(),
            b"5\r\nhello\r\n7\r\n world!\r\n0\r\n\r\n"
        );

        let mut p = ChunkedProducer::new(simple("x"))
            .with_footers(vec!["X-Checksum: 1".to_string()]);
        assert_eq!(drain(&mut p).unwrap(), b"1\r\nx\r\n0\r\nX-Checksum: 1\r\n\r\n");
    }

    #[test]
    fn globbing_coalesces() {
        let parts: Vec<BoxProducer> = (0..10).map(|_| simple("ab")).collect();
        let mut p = GlobbingProducer::new(Box::new(CompositeProducer::new(parts)))
            .with_buffer_size(8);
        assert_eq!(p.more().unwrap().unwrap(), "abababab");
        assert_eq!(p.more().unwrap().unwrap(), "abababab");
        assert_eq!(p.more().unwrap().unwrap(), "abab");
        assert!(p.more().unwrap().is_none());
    }

    #[test]
    fn file_producer_reads_everything() {
        let data = vec![7u8; BLOCK_SIZE + 10];
        let mut p = FileProducer::new(Box::new(Cursor::new(data.clone())));
        let first = p.more().unwrap().unwrap();
        assert_eq!(first.len(), BLOCK_SIZE);
        assert_eq!(p.more().unwrap().unwrap().len(), 10);
        assert!(p.more().unwrap().is_none());
    }

    #[test]
    fn hook_reports_once() {
        let seen = Arc::new(AtomicU64::new(0));
        let calls = Arc::new(AtomicU64::new(0));
        let (s, c) = (seen.clone(), calls.clone());
        let mut p = HookedProducer::new(
            simple("12345"),
            Box::new(move |n| {
                s.store(n, Ordering::SeqCst);
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        drain(&mut p).unwrap();
        drop(p);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn hook_fires_when_abandoned() {
        let seen = Arc::new(AtomicU64::new(u64::MAX));
        let s = seen.clone();
        let p = HookedProducer::new(simple("12345"), Box::new(move |n| s.store(n, Ordering::SeqCst)));
        drop(p);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}
