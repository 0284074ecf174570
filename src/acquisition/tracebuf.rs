//! Tracebuf2 Wire Decoder
//!
//! Decodes fixed-size binary trace messages into typed sample runs.
//! Each message is `MAX_TRACEBUF_SIZE` bytes: a 64-byte header followed by
//! `nsamp` integer samples packed at the declared width.
//!
//! Header layout (byte offsets):
//! - 0..4    pinno     (i32)
//! - 4..8    nsamp     (i32)
//! - 8..16   starttime (f64, UTC epoch seconds)
//! - 16..24  endtime   (f64)
//! - 24..32  samprate  (f64, Hz)
//! - 32..39  station, 39..48 network, 48..52 channel, 52..55 location
//! - 55..57  version, 57..60 datatype, 60..62 quality, 62..64 pad
//!
//! The datatype is `i2`/`i4` (little-endian) or `s2`/`s4` (big-endian).
//! Writers do not always honour the declaration, so the byte order is
//! decided from the sample-count field itself: see [`detect_byte_order`].

use crate::types::SiteKey;
use thiserror::Error;

/// Fixed wire message size
pub const MAX_TRACEBUF_SIZE: usize = 4096;

/// Header size preceding the sample payload
pub const TRACE_HEADER_SIZE: usize = 64;

const NSAMP_OFFSET: usize = 4;
const STARTTIME_OFFSET: usize = 8;
const ENDTIME_OFFSET: usize = 16;
const SAMPRATE_OFFSET: usize = 24;
const STA: (usize, usize) = (32, 39);
const NET: (usize, usize) = (39, 48);
const CHAN: (usize, usize) = (48, 52);
const LOC: (usize, usize) = (52, 55);
const VERSION: (usize, usize) = (55, 57);
const DATATYPE: (usize, usize) = (57, 60);
const QUALITY: (usize, usize) = (60, 62);

/// Wire decoding errors
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("Malformed message: {reason}")]
    MalformedMessage { reason: String },

    #[error("Message truncated: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
}

impl DecodeError {
    fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage { reason: reason.into() }
    }
}

/// Byte order of a message's numeric fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub fn swapped(self) -> Self {
        match self {
            Self::Little => Self::Big,
            Self::Big => Self::Little,
        }
    }
}

/// Integer sample width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleWidth {
    Two,
    Four,
}

impl SampleWidth {
    pub fn bytes(self) -> usize {
        match self {
            Self::Two => 2,
            Self::Four => 4,
        }
    }

    /// Largest sample count that fits in one message at this width
    pub fn max_samples(self) -> usize {
        (MAX_TRACEBUF_SIZE - TRACE_HEADER_SIZE) / self.bytes()
    }
}

/// Parse the datatype tag into width and declared byte order.
pub fn parse_datatype(tag: &[u8]) -> Result<(SampleWidth, ByteOrder), DecodeError> {
    let text = fixed_str(tag);
    match text.as_str() {
        "i2" => Ok((SampleWidth::Two, ByteOrder::Little)),
        "i4" => Ok((SampleWidth::Four, ByteOrder::Little)),
        "s2" => Ok((SampleWidth::Two, ByteOrder::Big)),
        "s4" => Ok((SampleWidth::Four, ByteOrder::Big)),
        other => Err(DecodeError::malformed(format!("unsupported datatype '{}'", other))),
    }
}

/// Decide the byte order of a message from its header.
///
/// The sample-count field is read in both orders. A count is plausible when
/// it lies in `[0, max_samples]` for the declared width. When exactly one
/// reading is plausible it decides the order; when both are (e.g. zero or a
/// palindromic value) the declared order is kept; when neither is the
/// message is malformed.
pub fn detect_byte_order(header: &[u8]) -> Result<ByteOrder, DecodeError> {
    if header.len() < TRACE_HEADER_SIZE {
        return Err(DecodeError::Truncated { needed: TRACE_HEADER_SIZE, got: header.len() });
    }
    let (width, declared) = parse_datatype(&header[DATATYPE.0..DATATYPE.1])?;
    let raw = [
        header[NSAMP_OFFSET],
        header[NSAMP_OFFSET + 1],
        header[NSAMP_OFFSET + 2],
        header[NSAMP_OFFSET + 3],
    ];
    let max = width.max_samples() as i64;
    let plausible = |n: i32| (0..=max).contains(&(n as i64));

    let little = i32::from_le_bytes(raw);
    let big = i32::from_be_bytes(raw);
    match (plausible(little), plausible(big)) {
        (true, true) => Ok(declared),
        (true, false) => Ok(ByteOrder::Little),
        (false, true) => Ok(ByteOrder::Big),
        (false, false) => Err(DecodeError::malformed(format!(
            "sample count implausible in both byte orders (le={}, be={}, max={})",
            little, big, max
        ))),
    }
}

/// Decoded header fields
#[derive(Debug, Clone, PartialEq)]
pub struct TraceHeader {
    pub pinno: i32,
    pub nsamp: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub sample_rate: f64,
    pub station: String,
    pub network: String,
    pub channel: String,
    pub location: String,
    pub version: String,
    pub quality: [u8; 2],
    pub width: SampleWidth,
    pub byte_order: ByteOrder,
}

impl TraceHeader {
    /// Sampling period (s)
    pub fn dt(&self) -> f64 {
        1.0 / self.sample_rate
    }
}

/// A contiguous piece of a [`DecodedRun`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunChunk {
    /// Absolute time of the first sample in this chunk
    pub start_time: f64,
    /// Offset into the run's sample array
    pub offset: usize,
    pub len: usize,
}

/// One message's payload after decoding (or several reassembled messages).
///
/// Samples are raw instrument counts. Chunk boundaries mark time
/// discontinuities between reassembled messages.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRun {
    pub key: SiteKey,
    /// Full channel code, including the component character
    pub channel: String,
    pub dt: f64,
    pub samples: Vec<i32>,
    pub chunks: Vec<RunChunk>,
}

impl DecodedRun {
    pub fn start_time(&self) -> f64 {
        self.chunks.first().map(|c| c.start_time).unwrap_or(f64::NAN)
    }

    /// Iterate `(absolute time, count)` over every sample in every chunk.
    pub fn timed_samples(&self) -> impl Iterator<Item = (f64, i32)> + '_ {
        self.chunks.iter().flat_map(move |chunk| {
            self.samples[chunk.offset..chunk.offset + chunk.len]
                .iter()
                .enumerate()
                .map(move |(k, &count)| (chunk.start_time + k as f64 * self.dt, count))
        })
    }

    /// Append another run's chunks, preserving its chunk boundaries.
    pub fn append(&mut self, other: DecodedRun) {
        let base = self.samples.len();
        self.chunks.extend(other.chunks.into_iter().map(|c| RunChunk {
            offset: base + c.offset,
            ..c
        }));
        self.samples.extend(other.samples);
    }
}

/// Little field reader bound to one byte-order decision.
struct FieldReader<'a> {
    buf: &'a [u8],
    order: ByteOrder,
}

impl FieldReader<'_> {
    fn i32_at(&self, offset: usize) -> i32 {
        let raw = [self.buf[offset], self.buf[offset + 1], self.buf[offset + 2], self.buf[offset + 3]];
        match self.order {
            ByteOrder::Little => i32::from_le_bytes(raw),
            ByteOrder::Big => i32::from_be_bytes(raw),
        }
    }

    fn f64_at(&self, offset: usize) -> f64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.buf[offset..offset + 8]);
        match self.order {
            ByteOrder::Little => f64::from_le_bytes(raw),
            ByteOrder::Big => f64::from_be_bytes(raw),
        }
    }
}

/// NUL-padded ASCII field to a trimmed string.
fn fixed_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).trim().to_string()
}

/// NUL-padded header string that must be printable ASCII.
fn ascii_field(field: &[u8], name: &str) -> Result<String, DecodeError> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let raw = &field[..end];
    if !raw.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        return Err(DecodeError::malformed(format!("non-ASCII {} field", name)));
    }
    Ok(String::from_utf8_lossy(raw).trim().to_string())
}

/// Parse the header with a single byte-order decision.
pub fn parse_header(message: &[u8]) -> Result<TraceHeader, DecodeError> {
    let order = detect_byte_order(message)?;
    let (width, _declared) = parse_datatype(&message[DATATYPE.0..DATATYPE.1])?;
    let reader = FieldReader { buf: message, order };

    let nsamp = reader.i32_at(NSAMP_OFFSET);
    let sample_rate = reader.f64_at(SAMPRATE_OFFSET);
    if !sample_rate.is_finite() || sample_rate <= 0.0 {
        return Err(DecodeError::malformed(format!("invalid sample rate {}", sample_rate)));
    }
    let start_time = reader.f64_at(STARTTIME_OFFSET);
    if !start_time.is_finite() {
        return Err(DecodeError::malformed("non-finite start time"));
    }

    Ok(TraceHeader {
        pinno: reader.i32_at(0),
        nsamp: nsamp.max(0) as usize,
        start_time,
        end_time: reader.f64_at(ENDTIME_OFFSET),
        sample_rate,
        station: ascii_field(&message[STA.0..STA.1], "station")?,
        network: ascii_field(&message[NET.0..NET.1], "network")?,
        channel: ascii_field(&message[CHAN.0..CHAN.1], "channel")?,
        location: ascii_field(&message[LOC.0..LOC.1], "location")?,
        version: ascii_field(&message[VERSION.0..VERSION.1], "version")?,
        quality: [message[QUALITY.0], message[QUALITY.0 + 1]],
        width,
        byte_order: order,
    })
}

/// Unpack `n` samples. Each output depends only on its own input bytes.
fn unpack_samples(payload: &[u8], width: SampleWidth, order: ByteOrder, n: usize) -> Vec<i32> {
    let bytes = &payload[..n * width.bytes()];
    match (width, order) {
        (SampleWidth::Two, ByteOrder::Little) => bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as i32)
            .collect(),
        (SampleWidth::Two, ByteOrder::Big) => bytes
            .chunks_exact(2)
            .map(|c| i16::from_be_bytes([c[0], c[1]]) as i32)
            .collect(),
        (SampleWidth::Four, ByteOrder::Little) => bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        (SampleWidth::Four, ByteOrder::Big) => bytes
            .chunks_exact(4)
            .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    }
}

/// Decode one wire message into a single-chunk run.
pub fn decode_message(message: &[u8]) -> Result<DecodedRun, DecodeError> {
    let header = parse_header(message)?;
    let needed = TRACE_HEADER_SIZE + header.nsamp * header.width.bytes();
    if message.len() < needed {
        return Err(DecodeError::Truncated { needed, got: message.len() });
    }

    let samples = unpack_samples(
        &message[TRACE_HEADER_SIZE..],
        header.width,
        header.byte_order,
        header.nsamp,
    );
    let key = SiteKey::from_channel(&header.network, &header.station, &header.channel, &header.location);

    Ok(DecodedRun {
        key,
        channel: header.channel.clone(),
        dt: header.dt(),
        chunks: vec![RunChunk { start_time: header.start_time, offset: 0, len: samples.len() }],
        samples,
    })
}

/// Decoder statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DecoderStats {
    pub decoded: u64,
    pub malformed: u64,
    pub swapped: u64,
}

/// Batch decoder that drops and logs malformed messages.
#[derive(Debug, Default)]
pub struct WireDecoder {
    stats: DecoderStats,
}

impl WireDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a single message, counting the outcome.
    pub fn decode(&mut self, message: &[u8]) -> Result<DecodedRun, DecodeError> {
        match decode_message(message) {
            Ok(run) => {
                self.stats.decoded += 1;
                if message.len() >= TRACE_HEADER_SIZE && native_is_swapped(message) {
                    self.stats.swapped += 1;
                }
                Ok(run)
            }
            Err(e) => {
                self.stats.malformed += 1;
                Err(e)
            }
        }
    }

    /// Decode a batch; malformed messages are logged and dropped.
    pub fn decode_batch(&mut self, messages: &[Vec<u8>]) -> Vec<DecodedRun> {
        let mut runs = Vec::with_capacity(messages.len());
        for (i, message) in messages.iter().enumerate() {
            match self.decode(message) {
                Ok(run) => runs.push(run),
                Err(e) => tracing::error!(index = i, error = %e, "Dropping malformed trace message"),
            }
        }
        runs
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }
}

/// True when the detected order differs from the declared one.
fn native_is_swapped(message: &[u8]) -> bool {
    match (detect_byte_order(message), parse_datatype(&message[DATATYPE.0..DATATYPE.1])) {
        (Ok(order), Ok((_, declared))) => order != declared,
        _ => false,
    }
}

/// Tracebuf2 message builder (for testing/simulation)
#[derive(Debug, Clone)]
pub struct TraceBufBuilder {
    network: String,
    station: String,
    channel: String,
    location: String,
    start_time: f64,
    sample_rate: f64,
    samples: Vec<i32>,
    width: SampleWidth,
    byte_order: ByteOrder,
    declared_order: Option<ByteOrder>,
    pinno: i32,
}

impl TraceBufBuilder {
    pub fn new(network: &str, station: &str, channel: &str, location: &str) -> Self {
        Self {
            network: network.to_string(),
            station: station.to_string(),
            channel: channel.to_string(),
            location: location.to_string(),
            start_time: 0.0,
            sample_rate: 1.0,
            samples: Vec::new(),
            width: SampleWidth::Four,
            byte_order: ByteOrder::Little,
            declared_order: None,
            pinno: 0,
        }
    }

    pub fn start_time(mut self, t: f64) -> Self {
        self.start_time = t;
        self
    }

    pub fn sample_rate(mut self, hz: f64) -> Self {
        self.sample_rate = hz;
        self
    }

    pub fn samples(mut self, samples: &[i32]) -> Self {
        self.samples = samples.to_vec();
        self
    }

    pub fn width(mut self, width: SampleWidth) -> Self {
        self.width = width;
        self
    }

    /// Byte order the numeric fields are written in.
    pub fn byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    /// Override the order claimed by the datatype tag.
    pub fn declared_order(mut self, order: ByteOrder) -> Self {
        self.declared_order = Some(order);
        self
    }

    pub fn pinno(mut self, pinno: i32) -> Self {
        self.pinno = pinno;
        self
    }

    /// Build one `MAX_TRACEBUF_SIZE` message.
    pub fn build(&self) -> Result<Vec<u8>, DecodeError> {
        if self.samples.len() > self.width.max_samples() {
            return Err(DecodeError::malformed(format!(
                "{} samples exceed message capacity {}",
                self.samples.len(),
                self.width.max_samples()
            )));
        }
        if self.width == SampleWidth::Two
            && self.samples.iter().any(|&s| i16::try_from(s).is_err())
        {
            return Err(DecodeError::malformed("sample does not fit in 2 bytes"));
        }

        let mut buf = vec![0u8; MAX_TRACEBUF_SIZE];
        let order = self.byte_order;
        let put_i32 = |buf: &mut [u8], offset: usize, v: i32| {
            let bytes = match order {
                ByteOrder::Little => v.to_le_bytes(),
                ByteOrder::Big => v.to_be_bytes(),
            };
            buf[offset..offset + 4].copy_from_slice(&bytes);
        };
        let put_f64 = |buf: &mut [u8], offset: usize, v: f64| {
            let bytes = match order {
                ByteOrder::Little => v.to_le_bytes(),
                ByteOrder::Big => v.to_be_bytes(),
            };
            buf[offset..offset + 8].copy_from_slice(&bytes);
        };
        let put_str = |buf: &mut [u8], field: (usize, usize), s: &str| {
            let len = s.len().min(field.1 - field.0 - 1);
            buf[field.0..field.0 + len].copy_from_slice(&s.as_bytes()[..len]);
        };

        let nsamp = self.samples.len();
        let end_time = self.start_time + nsamp.saturating_sub(1) as f64 / self.sample_rate;
        put_i32(&mut buf, 0, self.pinno);
        put_i32(&mut buf, NSAMP_OFFSET, nsamp as i32);
        put_f64(&mut buf, STARTTIME_OFFSET, self.start_time);
        put_f64(&mut buf, ENDTIME_OFFSET, end_time);
        put_f64(&mut buf, SAMPRATE_OFFSET, self.sample_rate);
        put_str(&mut buf, STA, &self.station);
        put_str(&mut buf, NET, &self.network);
        put_str(&mut buf, CHAN, &self.channel);
        let loc = if self.location.is_empty() { "--" } else { &self.location };
        put_str(&mut buf, LOC, loc);
        put_str(&mut buf, VERSION, "20");

        let declared = self.declared_order.unwrap_or(order);
        let tag = match (self.width, declared) {
            (SampleWidth::Two, ByteOrder::Little) => "i2",
            (SampleWidth::Four, ByteOrder::Little) => "i4",
            (SampleWidth::Two, ByteOrder::Big) => "s2",
            (SampleWidth::Four, ByteOrder::Big) => "s4",
        };
        put_str(&mut buf, DATATYPE, tag);

        let mut offset = TRACE_HEADER_SIZE;
        for &s in &self.samples {
            match (self.width, order) {
                (SampleWidth::Two, ByteOrder::Little) => buf[offset..offset + 2].copy_from_slice(&(s as i16).to_le_bytes()),
                (SampleWidth::Two, ByteOrder::Big) => buf[offset..offset + 2].copy_from_slice(&(s as i16).to_be_bytes()),
                (SampleWidth::Four, ByteOrder::Little) => buf[offset..offset + 4].copy_from_slice(&s.to_le_bytes()),
                (SampleWidth::Four, ByteOrder::Big) => buf[offset..offset + 4].copy_from_slice(&s.to_be_bytes()),
            }
            offset += self.width.bytes();
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<i32> {
        vec![0, 1, -1, 1200, -32768, 32767, 42, 7]
    }

    #[test]
    fn test_decode_all_orders_and_widths() {
        for width in [SampleWidth::Two, SampleWidth::Four] {
            for order in [ByteOrder::Little, ByteOrder::Big] {
                let msg = TraceBufBuilder::new("CI", "P494", "LYE", "")
                    .start_time(1_700_000_000.5)
                    .sample_rate(1.0)
                    .samples(&samples())
                    .width(width)
                    .byte_order(order)
                    .build()
                    .unwrap();
                let run = decode_message(&msg).unwrap();
                assert_eq!(run.samples, samples(), "width={:?} order={:?}", width, order);
                assert_eq!(run.start_time(), 1_700_000_000.5);
                assert_eq!(run.dt, 1.0);
                assert_eq!(run.key, SiteKey::new("CI", "P494", "LY", ""));
                assert_eq!(run.channel, "LYE");
            }
        }
    }

    #[test]
    fn test_mislabelled_byte_order_is_corrected() {
        // Written big-endian but tagged little-endian
        let msg = TraceBufBuilder::new("UW", "SEAT", "LYN", "00")
            .samples(&samples())
            .byte_order(ByteOrder::Big)
            .declared_order(ByteOrder::Little)
            .start_time(100.0)
            .build()
            .unwrap();
        assert_eq!(detect_byte_order(&msg).unwrap(), ByteOrder::Big);
        let mut decoder = WireDecoder::new();
        let run = decoder.decode(&msg).unwrap();
        assert_eq!(run.samples, samples());
        assert_eq!(run.start_time(), 100.0);
        assert_eq!(decoder.stats().swapped, 1);
    }

    #[test]
    fn test_implausible_count_is_malformed() {
        let mut msg = TraceBufBuilder::new("CI", "P494", "LYZ", "")
            .samples(&[1, 2, 3])
            .build()
            .unwrap();
        // 0x7f7f7f7f is out of range in both orders
        msg[4..8].copy_from_slice(&[0x7f, 0x7f, 0x7f, 0x7f]);
        assert!(matches!(
            detect_byte_order(&msg),
            Err(DecodeError::MalformedMessage { .. })
        ));

        let mut decoder = WireDecoder::new();
        assert!(decoder.decode_batch(&[msg]).is_empty());
        assert_eq!(decoder.stats().malformed, 1);
    }

    #[test]
    fn test_truncated_and_bad_datatype() {
        assert!(matches!(decode_message(&[0u8; 10]), Err(DecodeError::Truncated { .. })));

        let mut msg = TraceBufBuilder::new("CI", "P494", "LYZ", "").samples(&[1]).build().unwrap();
        msg[57..60].copy_from_slice(b"f4\0");
        assert!(matches!(decode_message(&msg), Err(DecodeError::MalformedMessage { .. })));
    }

    #[test]
    fn test_zero_samples_keeps_declared_order() {
        let msg = TraceBufBuilder::new("CI", "P494", "LYZ", "")
            .byte_order(ByteOrder::Big)
            .sample_rate(5.0)
            .build()
            .unwrap();
        assert_eq!(detect_byte_order(&msg).unwrap(), ByteOrder::Big);
        let run = decode_message(&msg).unwrap();
        assert!(run.samples.is_empty());
        assert!((run.dt - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_builder_rejects_overflow() {
        let too_many = vec![0; SampleWidth::Four.max_samples() + 1];
        assert!(TraceBufBuilder::new("CI", "A", "LYZ", "").samples(&too_many).build().is_err());
        assert!(TraceBufBuilder::new("CI", "A", "LYZ", "")
            .width(SampleWidth::Two)
            .samples(&[40_000])
            .build()
            .is_err());
    }

    #[test]
    fn test_append_keeps_chunk_boundaries() {
        let a = decode_message(
            &TraceBufBuilder::new("CI", "A", "LYZ", "").start_time(0.0).samples(&[1, 2]).build().unwrap(),
        )
        .unwrap();
        let b = decode_message(
            &TraceBufBuilder::new("CI", "A", "LYZ", "").start_time(10.0).samples(&[3]).build().unwrap(),
        )
        .unwrap();
        let mut run = a;
        run.append(b);
        assert_eq!(run.chunks.len(), 2);
        let timed: Vec<_> = run.timed_samples().collect();
        assert_eq!(timed, vec![(0.0, 1), (1.0, 2), (10.0, 3)]);
    }

    #[test]
    fn test_non_ascii_channel_is_dropped_not_fatal() {
        let good = TraceBufBuilder::new("CI", "A", "LYZ", "").samples(&[1, 2]).build().unwrap();
        let mut bad = good.clone();
        bad[CHAN.0] = 0xFF;
        assert!(matches!(decode_message(&bad), Err(DecodeError::MalformedMessage { .. })));

        let mut decoder = WireDecoder::new();
        let runs = decoder.decode_batch(&[bad, good]);
        assert_eq!(runs.len(), 1);
        assert_eq!(decoder.stats().malformed, 1);
        assert_eq!(decoder.stats().decoded, 1);
    }
}
