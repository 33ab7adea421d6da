//! FST (Fast Signal Trace) waveform output.
//!
//! [`FstWriter`] lays a file out as:
//! - Header (type 0): 321-byte payload, rewritten in place on
//!   [`FstWriter::finish`] once the time range and block count are known
//! - Value Change Data (type 1): one block per [`DEFAULT_BLOCK_STEPS`] time
//!   steps, each with a frame of the values at its start
//! - Geometry (type 3): per-signal widths
//! - Hierarchy (type 4): gzip-compressed scope/signal tree
//!
//! [`FstTracer`] adapts the writer to the [`Tracer`] interface for any
//! [`Traced`] model, and [`FstSummary`] walks a finished file to check that
//! it was closed properly.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};

use crate::context::SimContext;
use crate::error::{Result, SimError};
use crate::trace::{ScopeEntry, TraceScope, Traced, Tracer};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum BlockType {
    Header = 0,
    VcData = 1,
    Geometry = 3,
    Hierarchy = 4,
}

/// Distinct time steps buffered before a value-change block is written.
pub const DEFAULT_BLOCK_STEPS: usize = 1024;

const HEADER_LEN: usize = 321;
const VERSION_OFFSET: usize = 65;
const TIMESCALE_NS: i8 = -9;
const WRITER_ID: &[u8] = b"simdriver";

const TAG_SCOPE: u8 = 254;
const TAG_UPSCOPE: u8 = 255;
const TAG_ATTR_BEGIN: u8 = 252;
const TAG_ATTR_END: u8 = 253;
const VAR_WIRE: u8 = 16;
const VAR_TYPE_MAX: u8 = 29;
const SCOPE_MODULE: u8 = 0;
const DIR_IMPLICIT: u8 = 0;
const PACK_ZLIB: u8 = b'Z';

#[derive(Clone, Copy, Debug)]
struct Change {
    time: u64,
    index: u32,
    value: u64,
}

/// Streaming FST writer for two-state signals up to 64 bits wide.
///
/// Signals are registered first; the header goes out with the first
/// value-change block. Times passed to [`FstWriter::record`] must not
/// decrease.
pub struct FstWriter<W: Write + Seek> {
    writer: W,
    header_pos: Option<u64>,
    hierarchy: Vec<ScopeEntry>,
    widths: Vec<u32>,
    /// Values at the start of the pending block.
    current: Vec<Option<u64>>,
    changes: Vec<Change>,
    steps: usize,
    block_steps: usize,
    start_time: Option<u64>,
    end_time: u64,
    vc_blocks: u64,
}

impl<W: Write + Seek> FstWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            header_pos: None,
            hierarchy: Vec::new(),
            widths: Vec::new(),
            current: Vec::new(),
            changes: Vec::new(),
            steps: 0,
            block_steps: DEFAULT_BLOCK_STEPS,
            start_time: None,
            end_time: 0,
            vc_blocks: 0,
        }
    }

    /// Write a value-change block every `steps` distinct times.
    pub fn with_block_steps(mut self, steps: usize) -> Self {
        self.block_steps = steps.max(1);
        self
    }

    pub fn begin_scope(&mut self, name: &str) {
        self.hierarchy.push(ScopeEntry::Scope(name.to_string()));
    }

    pub fn end_scope(&mut self) {
        self.hierarchy.push(ScopeEntry::Upscope);
    }

    /// Register a signal and return its index for [`FstWriter::record`].
    pub fn register(&mut self, name: &str, width: u32) -> Result<u32> {
        if width == 0 || width > 64 {
            return Err(SimError::InvalidSignal {
                name: name.to_string(),
                width,
            });
        }
        if self.header_pos.is_some() {
            return Err(format_error(format!(
                "signal `{name}` registered after value changes were written"
            )));
        }
        let index = self.widths.len() as u32;
        self.widths.push(width);
        self.current.push(None);
        self.hierarchy.push(ScopeEntry::Signal {
            name: name.to_string(),
            width,
        });
        Ok(index)
    }

    /// Copy the visible part of a bound [`TraceScope`] into the hierarchy.
    pub fn declare(&mut self, scope: &TraceScope) -> Result<()> {
        for entry in scope.entries() {
            match entry {
                ScopeEntry::Scope(name) => self.begin_scope(name),
                ScopeEntry::Upscope => self.end_scope(),
                ScopeEntry::Signal { name, width } => {
                    self.register(name, *width)?;
                }
            }
        }
        Ok(())
    }

    pub fn signal_count(&self) -> usize {
        self.widths.len()
    }

    /// Value-change blocks written so far.
    pub fn vc_blocks(&self) -> u64 {
        self.vc_blocks
    }

    pub fn record(&mut self, time: u64, index: u32, value: u64) -> Result<()> {
        let width = *self
            .widths
            .get(index as usize)
            .ok_or_else(|| format_error(format!("value change for unregistered signal {index}")))?;
        if self.start_time.is_some() && time < self.end_time {
            return Err(format_error(format!(
                "time went backwards from {} to {time}",
                self.end_time
            )));
        }

        let new_step = self.changes.last().map(|c| c.time) != Some(time);
        if new_step {
            if self.steps >= self.block_steps {
                self.flush_block()?;
            }
            self.steps += 1;
        }
        self.start_time.get_or_insert(time);
        self.end_time = time;
        self.changes.push(Change {
            time,
            index,
            value: value & mask(width),
        });
        Ok(())
    }

    /// Write the pending block and the trailing sections, patch the header
    /// and hand back the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.flush_block()?;
        let header_pos = self.ensure_header()?;
        self.write_geometry_block()?;
        self.write_hierarchy_block()?;

        let end = self.writer.stream_position()?;
        self.writer.seek(SeekFrom::Start(header_pos))?;
        let header = self.header_payload();
        write_block(&mut self.writer, BlockType::Header, &header)?;
        self.writer.seek(SeekFrom::Start(end))?;
        self.writer.flush()?;
        Ok(self.writer)
    }

    fn ensure_header(&mut self) -> Result<u64> {
        if let Some(pos) = self.header_pos {
            return Ok(pos);
        }
        let pos = self.writer.stream_position()?;
        let header = self.header_payload();
        write_block(&mut self.writer, BlockType::Header, &header)?;
        self.header_pos = Some(pos);
        Ok(pos)
    }

    fn header_payload(&self) -> Vec<u8> {
        let mut payload = vec![0u8; HEADER_LEN];
        let count = self.widths.len() as u64;
        let scopes = self
            .hierarchy
            .iter()
            .filter(|entry| matches!(entry, ScopeEntry::Scope(_)))
            .count() as u64;

        payload[0..8].copy_from_slice(&self.start_time.unwrap_or(0).to_be_bytes());
        payload[8..16].copy_from_slice(&self.end_time.to_be_bytes());
        // endianness check value, native byte order
        payload[16..24].copy_from_slice(&std::f64::consts::E.to_ne_bytes());
        payload[32..40].copy_from_slice(&scopes.to_be_bytes());
        payload[40..48].copy_from_slice(&count.to_be_bytes());
        payload[48..56].copy_from_slice(&count.to_be_bytes());
        payload[56..64].copy_from_slice(&self.vc_blocks.to_be_bytes());
        payload[64] = TIMESCALE_NS as u8;
        payload[VERSION_OFFSET..VERSION_OFFSET + WRITER_ID.len()].copy_from_slice(WRITER_ID);
        // date left empty, file type 0 (Verilog) at 312, time zero 0 at 313
        payload
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.changes.is_empty() {
            return Ok(());
        }
        self.ensure_header()?;
        let payload = self.vc_block_payload()?;
        write_block(&mut self.writer, BlockType::VcData, &payload)?;

        for change in self.changes.drain(..) {
            self.current[change.index as usize] = Some(change.value);
        }
        self.steps = 0;
        self.vc_blocks += 1;
        Ok(())
    }

    fn frame_bits(&self) -> Vec<u8> {
        let mut bits = Vec::new();
        for (value, &width) in self.current.iter().zip(&self.widths) {
            match value {
                Some(value) => push_ascii_bits(&mut bits, *value, width),
                None => bits.extend(std::iter::repeat_n(b'x', width as usize)),
            }
        }
        bits
    }

    /// Per-signal change lists, keyed by index into the returned time table.
    fn encode_changes(&self) -> (Vec<u64>, Vec<Vec<u8>>) {
        let mut times: Vec<u64> = Vec::with_capacity(self.steps);
        let mut per_signal = vec![Vec::new(); self.widths.len()];
        let mut last_slot = vec![0u64; self.widths.len()];
        for change in &self.changes {
            if times.last() != Some(&change.time) {
                times.push(change.time);
            }
            let slot = times.len() as u64 - 1;
            let index = change.index as usize;
            let delta = slot - last_slot[index];
            last_slot[index] = slot;

            let data = &mut per_signal[index];
            let width = self.widths[index];
            if width == 1 {
                write_varint(data, (delta << 2) | ((change.value & 1) << 1));
            } else {
                // low bit clear: value follows as packed binary
                write_varint(data, delta << 1);
                push_packed_bits(data, change.value, width);
            }
        }
        (times, per_signal)
    }

    fn vc_block_payload(&self) -> Result<Vec<u8>> {
        let (times, per_signal) = self.encode_changes();
        let count = self.widths.len() as u64;

        let mut waves = Vec::new();
        let mut chain = Vec::new();
        let mut prev_offset = 0u64;
        let mut idle = 0u64;
        let mut traversal = 0u64;
        for data in &per_signal {
            if data.is_empty() {
                idle += 1;
                continue;
            }
            if idle > 0 {
                write_varint(&mut chain, idle << 1);
                idle = 0;
            }
            // offsets count from the pack-type byte, so the first entry is at 1
            let offset = waves.len() as u64 + 1;
            write_varint(&mut chain, ((offset - prev_offset) << 1) | 1);
            prev_offset = offset;
            traversal += data.len() as u64;

            let packed = compress_zlib(data)?;
            if packed.len() < data.len() {
                write_varint(&mut waves, data.len() as u64);
                waves.extend_from_slice(&packed);
            } else {
                // length 0: stored uncompressed
                write_varint(&mut waves, 0);
                waves.extend_from_slice(data);
            }
        }
        if idle > 0 {
            write_varint(&mut chain, idle << 1);
        }

        let bits = self.frame_bits();
        let bits_packed = pack(&bits)?;

        let mut time_table = Vec::new();
        let mut prev = 0u64;
        for &t in &times {
            write_varint(&mut time_table, t - prev);
            prev = t;
        }
        let time_packed = pack(&time_table)?;

        let mut payload = Vec::new();
        payload.extend_from_slice(&times[0].to_be_bytes());
        payload.extend_from_slice(&times[times.len() - 1].to_be_bytes());
        payload.extend_from_slice(&traversal.to_be_bytes());

        write_varint(&mut payload, bits.len() as u64);
        write_varint(&mut payload, bits_packed.len() as u64);
        write_varint(&mut payload, count);
        payload.extend_from_slice(&bits_packed);

        write_varint(&mut payload, count);
        payload.push(PACK_ZLIB);
        payload.extend_from_slice(&waves);

        payload.extend_from_slice(&chain);
        payload.extend_from_slice(&(chain.len() as u64).to_be_bytes());

        payload.extend_from_slice(&time_packed);
        payload.extend_from_slice(&(time_table.len() as u64).to_be_bytes());
        payload.extend_from_slice(&(time_packed.len() as u64).to_be_bytes());
        payload.extend_from_slice(&(times.len() as u64).to_be_bytes());
        Ok(payload)
    }

    fn write_geometry_block(&mut self) -> Result<()> {
        let mut raw = Vec::new();
        for &width in &self.widths {
            write_varint(&mut raw, width as u64);
        }
        let packed = pack(&raw)?;

        let mut payload = Vec::new();
        payload.extend_from_slice(&(raw.len() as u64).to_be_bytes());
        payload.extend_from_slice(&(self.widths.len() as u64).to_be_bytes());
        payload.extend_from_slice(&packed);

        write_block(&mut self.writer, BlockType::Geometry, &payload)
    }

    fn write_hierarchy_block(&mut self) -> Result<()> {
        let mut raw = Vec::new();
        for entry in &self.hierarchy {
            match entry {
                ScopeEntry::Scope(name) => {
                    raw.push(TAG_SCOPE);
                    raw.push(SCOPE_MODULE);
                    raw.extend_from_slice(name.as_bytes());
                    raw.push(0);
                    // empty component name
                    raw.push(0);
                }
                ScopeEntry::Upscope => raw.push(TAG_UPSCOPE),
                ScopeEntry::Signal { name, width } => {
                    raw.push(VAR_WIRE);
                    raw.push(DIR_IMPLICIT);
                    raw.extend_from_slice(name.as_bytes());
                    raw.push(0);
                    write_varint(&mut raw, *width as u64);
                    // alias 0: new handle
                    write_varint(&mut raw, 0);
                }
            }
        }
        let packed = compress_gzip(&raw)?;

        let mut payload = Vec::new();
        payload.extend_from_slice(&(raw.len() as u64).to_be_bytes());
        payload.extend_from_slice(&packed);

        write_block(&mut self.writer, BlockType::Hierarchy, &payload)
    }
}

/// [`Tracer`] writing an FST file for any [`Traced`] model.
///
/// Only values that differ from the previous dump are recorded. Dropping an
/// open tracer finishes the file on a best-effort basis.
#[derive(Default)]
pub struct FstTracer {
    writer: Option<FstWriter<BufWriter<File>>>,
    path: Option<Utf8PathBuf>,
    kept: Vec<bool>,
    last: Vec<Option<u64>>,
    scratch: Vec<u64>,
}

impl FstTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    fn finish_writer(&mut self) -> Result<()> {
        let writer = self.writer.take().ok_or(SimError::TraceNotOpen)?;
        writer.finish()?;
        Ok(())
    }
}

impl<M: Traced + ?Sized> Tracer<M> for FstTracer {
    fn open(
        &mut self,
        model: &mut M,
        _ctx: &mut SimContext,
        path: &Utf8Path,
        depth: u32,
    ) -> Result<()> {
        if self.writer.is_some() {
            self.finish_writer()?;
        }

        let mut scope = TraceScope::new(depth);
        model.declare(&mut scope)?;

        let mut writer = FstWriter::new(BufWriter::new(File::create(path)?));
        writer.declare(&scope)?;
        log::debug!(
            "opened {path}: {} of {} signals at depth {depth}",
            writer.signal_count(),
            scope.kept().len()
        );

        self.kept = scope.kept().to_vec();
        self.last = vec![None; writer.signal_count()];
        self.writer = Some(writer);
        self.path = Some(path.to_owned());
        Ok(())
    }

    fn dump(&mut self, model: &M, time: u64) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(SimError::TraceNotOpen)?;

        self.scratch.clear();
        model.sample(&mut self.scratch);

        let traced = self
            .scratch
            .iter()
            .zip(&self.kept)
            .filter(|(_, keep)| **keep)
            .map(|(value, _)| *value);
        for (index, value) in traced.enumerate() {
            if self.last[index] != Some(value) {
                writer.record(time, index as u32, value)?;
                self.last[index] = Some(value);
            }
        }
        Ok(())
    }

    fn close(&mut self, _model: &mut M) -> Result<()> {
        self.finish_writer()?;
        if let Some(path) = &self.path {
            log::debug!("closed {path}");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.writer.is_some()
    }
}

impl Drop for FstTracer {
    fn drop(&mut self) {
        if self.writer.is_some() {
            if let Err(err) = self.finish_writer() {
                log::warn!("failed to finish waveform on drop: {err}");
            }
        }
    }
}

/// Block-level view of a finished FST file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstSummary {
    pub start_time: u64,
    pub end_time: u64,
    pub timescale: i8,
    /// Hierarchical signal names (`scope.sub.name`) and widths.
    pub signals: Vec<(String, u32)>,
    pub vc_blocks: usize,
}

impl FstSummary {
    pub fn read(path: impl AsRef<Utf8Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::parse(&bytes)
    }

    pub fn parse(mut data: &[u8]) -> Result<Self> {
        let mut header = None;
        let mut signals = None;
        let mut widths = None;
        let mut vc_blocks = 0;

        while !data.is_empty() {
            if data.len() < 9 {
                return Err(format_error("truncated block header"));
            }
            let ty = data[0];
            let section_len = read_u64_be(&data[1..9]);
            if section_len < 8 || (data.len() as u64 - 1) < section_len {
                return Err(format_error(format!(
                    "block of type {ty} claims {section_len} bytes, {} left",
                    data.len() - 1
                )));
            }
            let end = 1 + section_len as usize;
            let payload = &data[9..end];
            data = &data[end..];

            match ty {
                t if t == BlockType::Header as u8 => {
                    if payload.len() != HEADER_LEN {
                        return Err(format_error("header block has wrong size"));
                    }
                    header = Some((
                        read_u64_be(&payload[0..8]),
                        read_u64_be(&payload[8..16]),
                        payload[64] as i8,
                        read_u64_be(&payload[56..64]),
                    ));
                }
                t if t == BlockType::VcData as u8 => vc_blocks += 1,
                t if t == BlockType::Geometry as u8 => widths = Some(parse_geometry(payload)?),
                t if t == BlockType::Hierarchy as u8 => signals = Some(parse_hierarchy(payload)?),
                other => return Err(format_error(format!("unknown block type {other}"))),
            }
        }

        let (start_time, end_time, timescale, declared_blocks) =
            header.ok_or_else(|| format_error("missing header block"))?;
        let signals = signals.ok_or_else(|| format_error("missing hierarchy block"))?;
        let widths = widths.ok_or_else(|| format_error("missing geometry block"))?;
        if declared_blocks != vc_blocks as u64 {
            return Err(format_error(format!(
                "header lists {declared_blocks} value-change blocks, file has {vc_blocks}"
            )));
        }
        if widths.len() != signals.len()
            || signals.iter().zip(&widths).any(|((_, w), g)| w != g)
        {
            return Err(format_error("geometry does not match hierarchy"));
        }

        Ok(Self {
            start_time,
            end_time,
            timescale,
            signals,
            vc_blocks,
        })
    }
}

fn parse_geometry(payload: &[u8]) -> Result<Vec<u32>> {
    if payload.len() < 16 {
        return Err(format_error("geometry block too short"));
    }
    let raw_len = read_u64_be(&payload[0..8]);
    let count = read_u64_be(&payload[8..16]);
    let raw = unpack(&payload[16..], raw_len, "geometry")?;

    let mut cursor = raw.as_slice();
    // each width takes at least one byte
    let capacity = usize::try_from(count).unwrap_or(usize::MAX).min(raw.len());
    let mut widths = Vec::with_capacity(capacity);
    for _ in 0..count {
        widths.push(read_varint(&mut cursor)? as u32);
    }
    Ok(widths)
}

fn parse_hierarchy(payload: &[u8]) -> Result<Vec<(String, u32)>> {
    if payload.len() < 8 {
        return Err(format_error("hierarchy block too short"));
    }
    let raw_len = read_u64_be(&payload[0..8]);
    let raw = inflate(GzDecoder::new(&payload[8..]), raw_len, "hierarchy")?;

    let mut cursor = raw.as_slice();
    let mut path: Vec<String> = Vec::new();
    let mut signals = Vec::new();
    while let Some((&tag, rest)) = cursor.split_first() {
        cursor = rest;
        match tag {
            TAG_SCOPE => {
                skip_bytes(&mut cursor, 1, "scope entry")?;
                path.push(read_cstr(&mut cursor)?);
                read_cstr(&mut cursor)?;
            }
            TAG_UPSCOPE => {
                path.pop()
                    .ok_or_else(|| format_error("upscope without scope"))?;
            }
            TAG_ATTR_BEGIN => {
                skip_bytes(&mut cursor, 2, "attribute")?;
                read_cstr(&mut cursor)?;
                read_varint(&mut cursor)?;
            }
            TAG_ATTR_END => {}
            var_type if var_type <= VAR_TYPE_MAX => {
                skip_bytes(&mut cursor, 1, "variable entry")?;
                let name = read_cstr(&mut cursor)?;
                let width = read_varint(&mut cursor)? as u32;
                let alias = read_varint(&mut cursor)?;
                if alias != 0 {
                    // shares an earlier handle, no geometry entry of its own
                    continue;
                }
                let full = if path.is_empty() {
                    name
                } else {
                    format!("{}.{}", path.join("."), name)
                };
                signals.push((full, width));
            }
            other => return Err(format_error(format!("unknown hierarchy tag {other}"))),
        }
    }
    if !path.is_empty() {
        return Err(format_error("unterminated scope in hierarchy"));
    }
    Ok(signals)
}

/// Sections stored without compression have equal packed and raw lengths.
fn unpack(data: &[u8], raw_len: u64, what: &str) -> Result<Vec<u8>> {
    if data.len() as u64 == raw_len {
        Ok(data.to_vec())
    } else {
        inflate(ZlibDecoder::new(data), raw_len, what)
    }
}

fn inflate<R: Read>(decoder: R, expected: u64, what: &str) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    decoder
        .take(expected.saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|err| format_error(format!("{what} section does not decompress: {err}")))?;
    if out.len() as u64 != expected {
        return Err(format_error(format!(
            "{what} section is {} bytes, header says {expected}",
            out.len()
        )));
    }
    Ok(out)
}

fn skip_bytes(cursor: &mut &[u8], n: usize, what: &str) -> Result<()> {
    if cursor.len() < n {
        return Err(format_error(format!("{what} truncated")));
    }
    *cursor = &cursor[n..];
    Ok(())
}

fn format_error(reason: impl Into<String>) -> SimError {
    SimError::TraceFormat {
        reason: reason.into(),
    }
}

fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// ASCII bits, MSB first.
fn push_ascii_bits(buf: &mut Vec<u8>, value: u64, width: u32) {
    for bit in (0..width).rev() {
        buf.push(if (value >> bit) & 1 == 1 { b'1' } else { b'0' });
    }
}

/// Bits MSB first, eight to a byte, last byte padded with zeros.
fn push_packed_bits(buf: &mut Vec<u8>, value: u64, width: u32) {
    let start = buf.len();
    buf.resize(start + width.div_ceil(8) as usize, 0);
    for j in 0..width {
        if (value >> (width - 1 - j)) & 1 == 1 {
            buf[start + (j / 8) as usize] |= 0x80 >> (j % 8);
        }
    }
}

/// Unsigned LEB128.
fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn read_varint(cursor: &mut &[u8]) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0;
    loop {
        let (&byte, rest) = cursor
            .split_first()
            .ok_or_else(|| format_error("truncated varint"))?;
        *cursor = rest;
        if shift >= 64 {
            return Err(format_error("varint overflow"));
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

fn read_cstr(cursor: &mut &[u8]) -> Result<String> {
    let nul = cursor
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| format_error("unterminated name"))?;
    let name = String::from_utf8_lossy(&cursor[..nul]).into_owned();
    *cursor = &cursor[nul + 1..];
    Ok(name)
}

fn read_u64_be(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(buf)
}

fn compress_zlib(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// zlib unless that does not shrink the data, in which case it is kept raw.
fn pack(data: &[u8]) -> Result<Vec<u8>> {
    let packed = compress_zlib(data)?;
    Ok(if packed.len() < data.len() {
        packed
    } else {
        data.to_vec()
    })
}

fn compress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Type byte, then a big-endian section length that counts itself but not
/// the type byte.
fn write_block<W: Write>(writer: &mut W, ty: BlockType, payload: &[u8]) -> Result<()> {
    writer.write_all(&[ty as u8])?;
    writer.write_all(&(8u64 + payload.len() as u64).to_be_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io::Cursor;

    use super::*;

    fn two_signal_writer() -> FstWriter<Cursor<Vec<u8>>> {
        let mut writer = FstWriter::new(Cursor::new(Vec::new()));
        writer.begin_scope("top");
        writer.register("clk", 1).unwrap();
        writer.begin_scope("core");
        writer.register("pc", 32).unwrap();
        writer.end_scope();
        writer.end_scope();
        writer
    }

    /// clk toggles every step, pc moves on even steps.
    fn record_steps(writer: &mut FstWriter<Cursor<Vec<u8>>>, steps: u64) {
        for t in 0..steps {
            writer.record(t, 0, t % 2).unwrap();
            if t % 2 == 0 {
                writer.record(t, 1, 0x8000_0000 + 2 * t).unwrap();
            }
        }
    }

    fn block_offset(bytes: &[u8], ty: BlockType) -> usize {
        let mut pos = 0;
        loop {
            if bytes[pos] == ty as u8 {
                return pos;
            }
            pos += 1 + read_u64_be(&bytes[pos + 1..pos + 9]) as usize;
        }
    }

    #[test]
    fn varint_encoding() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 300);
        assert_eq!(buf, vec![0xAC, 0x02]);
        let mut cursor = buf.as_slice();
        assert_eq!(read_varint(&mut cursor).unwrap(), 300);
        assert!(cursor.is_empty());
    }

    #[test]
    fn ascii_bits_are_msb_first() {
        let mut buf = Vec::new();
        push_ascii_bits(&mut buf, 0b0110, 4);
        assert_eq!(buf, b"0110");
    }

    #[test]
    fn packed_bits_are_left_aligned() {
        let mut buf = Vec::new();
        push_packed_bits(&mut buf, 0b101, 3);
        assert_eq!(buf, [0b1010_0000]);

        buf.clear();
        push_packed_bits(&mut buf, 0xABC, 12);
        assert_eq!(buf, [0xAB, 0xC0]);
    }

    #[test]
    fn header_section_is_329_bytes() {
        let bytes = two_signal_writer().finish().unwrap().into_inner();
        assert_eq!(bytes[0], BlockType::Header as u8);
        assert_eq!(read_u64_be(&bytes[1..9]), 329);
    }

    #[test]
    fn hierarchy_uses_module_scopes_and_wires() {
        let bytes = two_signal_writer().finish().unwrap().into_inner();
        let at = block_offset(&bytes, BlockType::Hierarchy);
        let len = read_u64_be(&bytes[at + 1..at + 9]) as usize;
        let payload = &bytes[at + 9..at + 1 + len];
        let raw_len = read_u64_be(&payload[0..8]);
        let raw = inflate(GzDecoder::new(&payload[8..]), raw_len, "hierarchy").unwrap();

        assert_eq!(&raw[..6], &[TAG_SCOPE, SCOPE_MODULE, b't', b'o', b'p', 0]);
        // empty component name, then `clk`
        assert_eq!(&raw[7..9], &[VAR_WIRE, DIR_IMPLICIT]);
        assert_eq!(VAR_WIRE, 16);
        assert_eq!(SCOPE_MODULE, 0);
    }

    #[test]
    fn finished_file_reads_back() {
        let mut writer = two_signal_writer();
        writer.record(0, 0, 0).unwrap();
        writer.record(0, 1, 0x8000_0000).unwrap();
        writer.record(1, 0, 1).unwrap();
        writer.record(2, 0, 0).unwrap();
        writer.record(2, 1, 0x8000_0004).unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let summary = FstSummary::parse(&bytes).unwrap();
        assert_eq!(summary.start_time, 0);
        assert_eq!(summary.end_time, 2);
        assert_eq!(summary.timescale, TIMESCALE_NS);
        assert_eq!(summary.vc_blocks, 1);
        assert_eq!(
            summary.signals,
            vec![("top.clk".to_string(), 1), ("top.core.pc".to_string(), 32)]
        );
    }

    #[test]
    fn long_runs_split_into_blocks() {
        let mut writer = two_signal_writer().with_block_steps(2);
        record_steps(&mut writer, 5);
        // the first two blocks are already on the way out
        assert_eq!(writer.vc_blocks(), 2);
        assert!(writer.changes.len() <= 2);
        let bytes = writer.finish().unwrap().into_inner();

        let summary = FstSummary::parse(&bytes).unwrap();
        assert_eq!(summary.vc_blocks, 3);
        assert_eq!((summary.start_time, summary.end_time), (0, 4));
    }

    #[test]
    fn empty_recording_has_no_vc_block() {
        let bytes = two_signal_writer().finish().unwrap().into_inner();
        let summary = FstSummary::parse(&bytes).unwrap();
        assert_eq!(summary.vc_blocks, 0);
        assert_eq!(summary.signals.len(), 2);
    }

    #[test]
    fn truncated_file_is_rejected() {
        let mut writer = two_signal_writer();
        writer.record(5, 0, 1).unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let err = FstSummary::parse(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, SimError::TraceFormat { .. }));
        assert!(FstSummary::parse(&bytes[..4]).is_err());
    }

    #[test]
    fn huge_geometry_count_is_an_error() {
        let mut writer = two_signal_writer();
        record_steps(&mut writer, 2);
        let mut bytes = writer.finish().unwrap().into_inner();

        let geometry = block_offset(&bytes, BlockType::Geometry);
        bytes[geometry + 17..geometry + 25].copy_from_slice(&u64::MAX.to_be_bytes());
        let err = FstSummary::parse(&bytes).unwrap_err();
        assert!(matches!(err, SimError::TraceFormat { .. }));
    }

    #[test]
    fn huge_hierarchy_length_is_an_error() {
        let mut bytes = two_signal_writer().finish().unwrap().into_inner();

        let hierarchy = block_offset(&bytes, BlockType::Hierarchy);
        bytes[hierarchy + 9..hierarchy + 17].copy_from_slice(&u64::MAX.to_be_bytes());
        let err = FstSummary::parse(&bytes).unwrap_err();
        assert!(matches!(err, SimError::TraceFormat { .. }));
    }

    #[test]
    fn values_are_masked_to_width() {
        let mut writer = two_signal_writer();
        writer.record(0, 0, 0xFF).unwrap();
        assert_eq!(writer.changes[0].value, 1);
    }

    #[test]
    fn unregistered_index_is_an_error() {
        let mut writer = two_signal_writer();
        assert!(writer.record(0, 7, 1).is_err());
        assert!(writer.register("wide", 128).is_err());
    }

    #[test]
    fn time_must_not_go_backwards() {
        let mut writer = two_signal_writer();
        writer.record(3, 0, 1).unwrap();
        assert!(writer.record(2, 0, 0).is_err());
    }

    #[test]
    fn no_signals_after_first_block() {
        let mut writer = two_signal_writer().with_block_steps(1);
        record_steps(&mut writer, 2);
        assert!(writer.register("late", 1).is_err());
    }

    #[test]
    fn fst_reader_accepts_output() {
        use fst_reader::{FstFilter, FstHierarchyEntry, FstReader, FstSignalValue};

        let mut writer = two_signal_writer().with_block_steps(2);
        record_steps(&mut writer, 5);
        let bytes = writer.finish().unwrap().into_inner();

        let mut reader = FstReader::open(Cursor::new(bytes)).unwrap();
        let header = reader.get_header();
        assert_eq!((header.start_time, header.end_time), (0, 4));
        assert_eq!(header.var_count, 2);

        let mut hierarchy = Vec::new();
        reader
            .read_hierarchy(|entry| match entry {
                FstHierarchyEntry::Scope { tpe, name, .. } => {
                    hierarchy.push(format!("scope {name} {tpe:?}"))
                }
                FstHierarchyEntry::Var {
                    tpe, name, length, ..
                } => hierarchy.push(format!("var {name} {length} {tpe:?}")),
                FstHierarchyEntry::UpScope => hierarchy.push("upscope".to_string()),
                _ => {}
            })
            .unwrap();
        assert_eq!(
            hierarchy,
            [
                "scope top Module",
                "var clk 1 Wire",
                "scope core Module",
                "var pc 32 Wire",
                "upscope",
                "upscope",
            ]
        );

        // later entries for the same time win, so block frames fold in
        let mut values = BTreeMap::new();
        reader
            .read_signals(&FstFilter::all(), |time, handle, value| {
                if let FstSignalValue::String(bits) = value {
                    let bits = String::from_utf8_lossy(bits.as_ref()).into_owned();
                    values.insert((time, handle.get_index()), bits);
                }
            })
            .unwrap();

        let pc = |value: u64| format!("{value:032b}");
        for t in 0..5u64 {
            assert_eq!(values[&(t, 0)], (t % 2).to_string(), "clk at {t}");
        }
        assert_eq!(values[&(0, 1)], pc(0x8000_0000));
        assert_eq!(values[&(2, 1)], pc(0x8000_0004));
        assert_eq!(values[&(4, 1)], pc(0x8000_0008));
    }
}
