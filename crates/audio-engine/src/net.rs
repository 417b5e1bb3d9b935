//! Network source with a bounded read-ahead.
//!
//! A fetch thread streams the HTTP body into a byte buffer capped at the
//! configured read-ahead size. The decode stage reads from the buffer through
//! [`NetworkSource`]; whenever the buffer runs dry the reader waits for it to
//! refill and reports the fill level on the bus so the graph can be held.
//! Shoutcast/Icecast metadata is stripped from the byte stream and surfaced as
//! tag messages.

use std::collections::VecDeque;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use symphonia::core::io::MediaSource;

use crate::bus::{Bus, BusMessage, StreamFault};

const READ_CHUNK: usize = 16 * 1024;
const WAIT_STEP: Duration = Duration::from_millis(50);

/// Network fetch settings.
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    /// Read-ahead capacity in bytes.
    pub read_ahead_bytes: usize,
    /// Connect and response-header timeout for each request.
    pub timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            read_ahead_bytes: 128 * 1024,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Response facts learned from the first request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct StreamInfo {
    len: Option<u64>,
    ranges: bool,
    metaint: Option<usize>,
}

/// Where the fetch thread leaves the reason a stream ended badly.
pub type FaultSlot = Arc<Mutex<Option<StreamFault>>>;

struct ReadAhead {
    buf: VecDeque<u8>,
    finished: bool,
}

struct Shared {
    state: Mutex<ReadAhead>,
    cv: Condvar,
    capacity: usize,
}

impl Shared {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(ReadAhead {
                buf: VecDeque::new(),
                finished: false,
            }),
            cv: Condvar::new(),
            capacity: capacity.max(READ_CHUNK),
        }
    }

    /// Block until everything fits or `stop` is raised.
    fn push(&self, mut bytes: &[u8], stop: &AtomicBool) -> bool {
        while !bytes.is_empty() {
            let Ok(mut st) = self.state.lock() else {
                return false;
            };
            while st.buf.len() >= self.capacity {
                if stop.load(Ordering::Relaxed) {
                    return false;
                }
                st = match self.cv.wait_timeout(st, WAIT_STEP) {
                    Ok((g, _)) => g,
                    Err(_) => return false,
                };
            }
            let room = self.capacity - st.buf.len();
            let take = room.min(bytes.len());
            st.buf.extend(&bytes[..take]);
            bytes = &bytes[take..];
            drop(st);
            self.cv.notify_all();
        }
        !stop.load(Ordering::Relaxed)
    }

    fn finish(&self) {
        if let Ok(mut st) = self.state.lock() {
            st.finished = true;
        }
        self.cv.notify_all();
    }
}

struct Fetcher {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// A [`MediaSource`] over an HTTP stream.
pub struct NetworkSource {
    url: String,
    config: NetworkConfig,
    bus: Bus,
    cancel: Arc<AtomicBool>,
    shared: Arc<Shared>,
    fault: FaultSlot,
    fetcher: Option<Fetcher>,
    info: StreamInfo,
    pos: u64,
    buffering: bool,
    last_percent: Option<u8>,
}

impl NetworkSource {
    /// Connect and start the fetch thread.
    ///
    /// Connection failures are returned as stream faults so the caller can
    /// route them through recovery.
    pub fn open(
        url: &str,
        config: NetworkConfig,
        bus: Bus,
        cancel: Arc<AtomicBool>,
    ) -> Result<Self, StreamFault> {
        let shared = Arc::new(Shared::new(config.read_ahead_bytes));
        let mut source = Self {
            url: url.to_string(),
            config,
            bus,
            cancel,
            shared,
            fault: FaultSlot::default(),
            fetcher: None,
            info: StreamInfo::default(),
            pos: 0,
            buffering: true,
            last_percent: None,
        };
        source.info = source.start_fetch(0)?;
        tracing::info!(
            url = %source.url,
            len = ?source.info.len,
            seekable = source.is_seekable(),
            icy = source.info.metaint.is_some(),
            "network source connected"
        );
        Ok(source)
    }

    /// Handle to the failure recorded by the fetch thread, if the stream ends badly.
    pub fn fault_slot(&self) -> FaultSlot {
        self.fault.clone()
    }

    fn start_fetch(&mut self, offset: u64) -> Result<StreamInfo, StreamFault> {
        self.stop_fetch();
        // Each request gets its own buffer so a retiring fetch thread cannot leak into it.
        self.shared = Arc::new(Shared::new(self.config.read_ahead_bytes));
        let resp = request(&self.url, offset, self.config.timeout)?;
        let info = stream_info(&resp, offset);
        let stop = Arc::new(AtomicBool::new(false));
        let ctx = FetchContext {
            shared: self.shared.clone(),
            stop: stop.clone(),
            cancel: self.cancel.clone(),
            bus: self.bus.clone(),
            fault: self.fault.clone(),
            expected: info.len.map(|l| l.saturating_sub(offset)),
            metaint: info.metaint,
        };
        let (_, body) = resp.into_parts();
        let handle = std::thread::Builder::new()
            .name("net-fetch".to_string())
            .spawn(move || fetch_loop(body.into_reader(), ctx))
            .map_err(|e| StreamFault::Transient(format!("spawn fetch thread: {e}")))?;
        self.fetcher = Some(Fetcher { stop, handle });
        self.buffering = true;
        self.last_percent = None;
        Ok(info)
    }

    fn stop_fetch(&mut self) {
        if let Some(fetcher) = self.fetcher.take() {
            fetcher.stop.store(true, Ordering::Relaxed);
            self.shared.cv.notify_all();
            // The fetch thread may sit in a blocking socket read; let it finish on its own.
            drop(fetcher.handle);
        }
    }

    fn report_fill(&mut self, percent: u8) {
        let bucket = percent.min(100) / 10 * 10;
        let percent = if percent >= 100 { 100 } else { bucket };
        if self.last_percent != Some(percent) {
            self.last_percent = Some(percent);
            self.bus.buffering(percent);
        }
    }

    /// Wait until bytes are available, the stream ended, or playback was cancelled.
    fn fill(&mut self) -> io::Result<()> {
        let shared = self.shared.clone();
        let Ok(mut st) = shared.state.lock() else {
            return Err(io::Error::other("read-ahead lock poisoned"));
        };
        if !st.buf.is_empty() && !self.buffering {
            return Ok(());
        }
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return Ok(());
            }
            let full = st.buf.len() >= shared.capacity;
            if full || st.finished {
                if self.buffering {
                    self.buffering = false;
                    self.report_fill(100);
                }
                return Ok(());
            }
            if !self.buffering {
                self.buffering = true;
                self.last_percent = None;
            }
            let percent = (st.buf.len() * 100 / shared.capacity) as u8;
            self.report_fill(percent);
            st = match shared.cv.wait_timeout(st, WAIT_STEP) {
                Ok((g, _)) => g,
                Err(_) => return Err(io::Error::other("read-ahead lock poisoned")),
            };
        }
    }
}

impl Drop for NetworkSource {
    fn drop(&mut self) {
        self.stop_fetch();
    }
}

impl Read for NetworkSource {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() || self.cancel.load(Ordering::Relaxed) {
            return Ok(0);
        }
        self.fill()?;
        let Ok(mut st) = self.shared.state.lock() else {
            return Err(io::Error::other("read-ahead lock poisoned"));
        };
        let n = st.buf.len().min(out.len());
        for (dst, src) in out.iter_mut().zip(st.buf.drain(..n)) {
            *dst = src;
        }
        drop(st);
        self.shared.cv.notify_all();
        self.pos = self.pos.saturating_add(n as u64);
        Ok(n)
    }
}

impl Seek for NetworkSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(x) => x,
            SeekFrom::Current(d) => add_signed(self.pos, d),
            SeekFrom::End(d) => {
                let len = self
                    .info
                    .len
                    .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "unknown length"))?;
                add_signed(len, d)
            }
        };
        if target == self.pos {
            return Ok(self.pos);
        }
        if !self.is_seekable() {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stream is not seekable",
            ));
        }
        if let Some(len) = self.info.len {
            if target >= len {
                self.stop_fetch();
                self.shared = Arc::new(Shared::new(self.config.read_ahead_bytes));
                self.shared.finish();
                self.pos = len;
                return Ok(self.pos);
            }
        }
        tracing::debug!(url = %self.url, from = self.pos, to = target, "network seek");
        self.start_fetch(target)
            .map_err(|fault| io::Error::other(fault.message().to_string()))?;
        self.pos = target;
        Ok(self.pos)
    }
}

impl MediaSource for NetworkSource {
    fn is_seekable(&self) -> bool {
        self.info.len.is_some() && self.info.ranges && self.info.metaint.is_none()
    }

    fn byte_len(&self) -> Option<u64> {
        self.info.len
    }
}

struct FetchContext {
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    bus: Bus,
    fault: FaultSlot,
    /// Bytes this request should deliver, when the server said so.
    expected: Option<u64>,
    metaint: Option<usize>,
}

impl FetchContext {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed) || self.cancel.load(Ordering::Relaxed)
    }
}

fn fetch_loop(mut reader: impl Read, ctx: FetchContext) {
    let mut icy = ctx.metaint.map(IcyDemux::new);
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut audio = Vec::with_capacity(READ_CHUNK);
    let mut titles = Vec::new();
    let mut received = 0u64;
    let outcome = loop {
        if ctx.stopped() {
            return;
        }
        let n = match reader.read(&mut chunk) {
            Ok(0) => break end_fault(ctx.expected, received, "stream closed".to_string()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                break Some(read_fault(
                    ctx.expected.is_some(),
                    received > 0,
                    format!("http read failed: {e}"),
                ));
            }
        };
        let bytes = match icy.as_mut() {
            Some(demux) => {
                audio.clear();
                demux.feed(&chunk[..n], &mut audio, &mut titles);
                for title in titles.drain(..) {
                    ctx.bus.post(BusMessage::Tag { title });
                }
                &audio[..]
            }
            None => &chunk[..n],
        };
        if bytes.is_empty() {
            continue;
        }
        received += bytes.len() as u64;
        if !ctx.shared.push(bytes, &ctx.stop) {
            return;
        }
    };
    if ctx.stopped() {
        return;
    }
    if let Some(fault) = outcome {
        tracing::warn!(fault = ?fault, received, "network stream ended");
        if let Ok(mut slot) = ctx.fault.lock() {
            *slot = Some(fault);
        }
    }
    ctx.shared.finish();
}

/// Classify the end of a response body.
///
/// Only a sized stream that delivered everything ends cleanly. An unsized
/// stream that closes after audio flowed has gone idle.
fn end_fault(expected: Option<u64>, received: u64, message: String) -> Option<StreamFault> {
    match expected {
        Some(total) if received >= total => None,
        Some(total) => Some(StreamFault::Transient(format!(
            "{message} after {received} of {total} bytes"
        ))),
        None if received > 0 => Some(StreamFault::SourceIdle(message)),
        None => Some(StreamFault::Transient(message)),
    }
}

fn read_fault(known_len: bool, flowed: bool, message: String) -> StreamFault {
    if !known_len && flowed {
        StreamFault::SourceIdle(message)
    } else {
        StreamFault::Transient(message)
    }
}

fn request(
    url: &str,
    offset: u64,
    timeout: Duration,
) -> Result<ureq::http::Response<ureq::Body>, StreamFault> {
    let mut req = ureq::get(url)
        .config()
        .timeout_connect(Some(timeout))
        .timeout_recv_response(Some(timeout))
        .build()
        .header("Icy-MetaData", "1");
    if offset > 0 {
        req = req.header("Range", &format!("bytes={offset}-"));
    }
    req.call()
        .map_err(|e| StreamFault::Transient(format!("http request failed: {e}")))
}

fn stream_info(resp: &ureq::http::Response<ureq::Body>, offset: u64) -> StreamInfo {
    let header = |name: &str| {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
    };
    let content_length = header("Content-Length").and_then(|s| s.parse::<u64>().ok());
    let len = match resp.status() {
        ureq::http::StatusCode::PARTIAL_CONTENT => header("Content-Range")
            .as_deref()
            .and_then(parse_content_range_total)
            .or(content_length.map(|l| l + offset)),
        _ => content_length,
    };
    StreamInfo {
        len,
        ranges: header("Accept-Ranges").is_some_and(|v| v.eq_ignore_ascii_case("bytes"))
            || resp.status() == ureq::http::StatusCode::PARTIAL_CONTENT,
        metaint: header("icy-metaint")
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|m| *m > 0),
    }
}

enum IcyState {
    Audio(usize),
    Length,
    Meta(usize),
}

/// Splits an ICY byte stream into audio and metadata blocks.
struct IcyDemux {
    metaint: usize,
    state: IcyState,
    meta: Vec<u8>,
}

impl IcyDemux {
    fn new(metaint: usize) -> Self {
        Self {
            metaint,
            state: IcyState::Audio(metaint),
            meta: Vec::new(),
        }
    }

    fn feed(&mut self, mut input: &[u8], audio: &mut Vec<u8>, titles: &mut Vec<String>) {
        while !input.is_empty() {
            match self.state {
                IcyState::Audio(remaining) => {
                    let n = remaining.min(input.len());
                    audio.extend_from_slice(&input[..n]);
                    input = &input[n..];
                    self.state = if n == remaining {
                        IcyState::Length
                    } else {
                        IcyState::Audio(remaining - n)
                    };
                }
                IcyState::Length => {
                    let len = input[0] as usize * 16;
                    input = &input[1..];
                    self.meta.clear();
                    self.state = if len == 0 {
                        IcyState::Audio(self.metaint)
                    } else {
                        IcyState::Meta(len)
                    };
                }
                IcyState::Meta(remaining) => {
                    let n = remaining.min(input.len());
                    self.meta.extend_from_slice(&input[..n]);
                    input = &input[n..];
                    if n == remaining {
                        if let Some(title) = parse_stream_title(&self.meta) {
                            titles.push(title);
                        }
                        self.state = IcyState::Audio(self.metaint);
                    } else {
                        self.state = IcyState::Meta(remaining - n);
                    }
                }
            }
        }
    }
}

/// Extract `StreamTitle='...';` from an ICY metadata block.
fn parse_stream_title(meta: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(meta);
    let text = text.trim_end_matches('\0');
    let start = text.find("StreamTitle='")? + "StreamTitle='".len();
    let rest = &text[start..];
    let end = rest.find("';").unwrap_or(rest.len());
    let title = rest[..end].trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

/// Total length from a `Content-Range: bytes a-b/total` header.
fn parse_content_range_total(header: &str) -> Option<u64> {
    let (_, total) = header.split_once('/')?;
    total.trim().parse::<u64>().ok()
}

fn add_signed(base: u64, delta: i64) -> u64 {
    if delta >= 0 {
        base.saturating_add(delta as u64)
    } else {
        base.saturating_sub(delta.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::test_bus;
    use crate::engine::ControlMsg;

    fn icy_stream(metaint: usize, audio: &[&[u8]], titles: &[Option<&str>]) -> Vec<u8> {
        let mut out = Vec::new();
        for (block, title) in audio.iter().zip(titles) {
            assert_eq!(block.len(), metaint);
            out.extend_from_slice(block);
            match title {
                Some(t) => {
                    let mut meta = format!("StreamTitle='{t}';").into_bytes();
                    let padded = meta.len().div_ceil(16) * 16;
                    meta.resize(padded, 0);
                    out.push((padded / 16) as u8);
                    out.extend_from_slice(&meta);
                }
                None => out.push(0),
            }
        }
        out
    }

    #[test]
    fn icy_demux_strips_metadata_across_chunk_boundaries() {
        let stream = icy_stream(
            4,
            &[b"abcd", b"efgh", b"ijkl"],
            &[Some("Artist - Song"), None, Some("Next")],
        );
        let mut demux = IcyDemux::new(4);
        let mut audio = Vec::new();
        let mut titles = Vec::new();
        for chunk in stream.chunks(3) {
            demux.feed(chunk, &mut audio, &mut titles);
        }
        assert_eq!(audio, b"abcdefghijkl");
        assert_eq!(titles, vec!["Artist - Song".to_string(), "Next".to_string()]);
    }

    #[test]
    fn stream_title_parser_handles_padding_and_empty_titles() {
        assert_eq!(
            parse_stream_title(b"StreamTitle='Hello';StreamUrl='';\0\0\0"),
            Some("Hello".to_string())
        );
        assert_eq!(parse_stream_title(b"StreamTitle='';\0"), None);
        assert_eq!(parse_stream_title(b"StreamUrl='x';"), None);
    }

    #[test]
    fn content_range_total() {
        assert_eq!(parse_content_range_total("bytes 0-99/12345"), Some(12345));
        assert_eq!(parse_content_range_total("bytes 0-99/*"), None);
        assert_eq!(parse_content_range_total("bytes 0-99"), None);
    }

    #[test]
    fn add_signed_saturates() {
        assert_eq!(add_signed(10, 5), 15);
        assert_eq!(add_signed(10, -3), 7);
        assert_eq!(add_signed(5, -10), 0);
        assert_eq!(add_signed(u64::MAX, 1), u64::MAX);
        assert_eq!(add_signed(0, i64::MIN), 0);
    }

    #[test]
    fn unsized_stream_end_is_idle_only_after_audio() {
        assert_eq!(end_fault(Some(10), 10, "eof".into()), None);
        assert!(matches!(
            end_fault(Some(10), 4, "eof".into()),
            Some(StreamFault::Transient(_))
        ));
        assert_eq!(
            end_fault(None, 5, "eof".into()),
            Some(StreamFault::SourceIdle("eof".into()))
        );
        assert_eq!(
            end_fault(None, 0, "eof".into()),
            Some(StreamFault::Transient("eof".into()))
        );
        assert_eq!(
            read_fault(true, true, "reset".into()),
            StreamFault::Transient("reset".into())
        );
    }

    #[test]
    fn fetch_loop_fills_read_ahead_and_posts_titles() {
        let (bus, rx) = test_bus(3);
        let shared = Arc::new(Shared::new(READ_CHUNK));
        let body = icy_stream(4, &[b"abcd", b"efgh"], &[Some("Live"), None]);
        let fault = FaultSlot::default();
        let ctx = FetchContext {
            shared: shared.clone(),
            stop: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
            bus,
            fault: fault.clone(),
            expected: None,
            metaint: Some(4),
        };
        fetch_loop(io::Cursor::new(body), ctx);
        let st = shared.state.lock().unwrap();
        assert_eq!(st.buf.iter().copied().collect::<Vec<u8>>(), b"abcdefgh");
        assert!(st.finished);
        assert!(matches!(
            *fault.lock().unwrap(),
            Some(StreamFault::SourceIdle(_))
        ));
        match rx.try_recv().unwrap() {
            ControlMsg::Bus(ev) => assert_eq!(
                ev.message,
                BusMessage::Tag {
                    title: "Live".to_string()
                }
            ),
            _ => panic!("expected tag"),
        }
    }

    #[test]
    fn push_gives_up_when_stopped() {
        let shared = Shared::new(READ_CHUNK);
        let stop = AtomicBool::new(false);
        assert!(shared.push(&vec![0u8; READ_CHUNK], &stop));
        stop.store(true, Ordering::Relaxed);
        assert!(!shared.push(&[1, 2, 3], &stop));
    }
}
