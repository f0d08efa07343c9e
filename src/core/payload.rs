// Index payload file layout: fixed header, append-only key/value records, mmap reads.
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use fs2::FileExt;
use libc::{EACCES, EPERM};
use memmap2::Mmap;

use crate::core::error::{Error, ErrorKind};
use crate::core::format::{
    PAYLOAD_FORMAT_VERSION, SUPPORTED_PAYLOAD_FORMAT_VERSIONS, payload_version_error,
};

const MAGIC: [u8; 4] = *b"SKIX";
const ENDIANNESS_LE: u8 = 1;
pub const HEADER_SIZE: usize = 64;
pub const RECORD_HEADER_LEN: usize = 16;
pub const MAX_VALUE_LEN: usize = 256 * 1024 * 1024;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValueKind {
    Bytes = 0,
    F32 = 1,
}

impl ValueKind {
    fn from_u8(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(ValueKind::Bytes),
            1 => Ok(ValueKind::F32),
            _ => Err(Error::new(ErrorKind::CorruptState).with_message("invalid payload value kind")),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PayloadHeader {
    pub value_kind: ValueKind,
    /// Values per entry for `F32` payloads; zero for byte payloads.
    pub dimension: u32,
}

impl PayloadHeader {
    pub fn bytes() -> Self {
        Self {
            value_kind: ValueKind::Bytes,
            dimension: 0,
        }
    }

    pub fn vectors(dimension: u32) -> Self {
        Self {
            value_kind: ValueKind::F32,
            dimension,
        }
    }

    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        write_u32(&mut buf, 4, PAYLOAD_FORMAT_VERSION);
        buf[8] = ENDIANNESS_LE;
        buf[9] = self.value_kind as u8;
        write_u32(&mut buf, 12, self.dimension);
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::new(ErrorKind::CorruptState).with_message("payload header too small"));
        }
        if buf[0..4] != MAGIC {
            return Err(Error::new(ErrorKind::CorruptState).with_message("bad payload magic"));
        }
        let version = read_u32(buf, 4);
        if !SUPPORTED_PAYLOAD_FORMAT_VERSIONS.contains(&version) {
            return Err(payload_version_error(version));
        }
        if buf[8] != ENDIANNESS_LE {
            return Err(Error::new(ErrorKind::CorruptState).with_message("unsupported endianness"));
        }
        let value_kind = ValueKind::from_u8(buf[9])?;
        let dimension = read_u32(buf, 12);
        if value_kind == ValueKind::F32 && dimension == 0 {
            return Err(Error::new(ErrorKind::CorruptState).with_message("vector dimension is zero"));
        }
        Ok(Self {
            value_kind,
            dimension,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct RecordHeader {
    key: u64,
    value_len: u32,
    value_len_xor: u32,
}

impl RecordHeader {
    fn new(key: u64, value_len: u32) -> Self {
        Self {
            key,
            value_len,
            value_len_xor: value_len ^ 0xFFFF_FFFF,
        }
    }

    fn encode(&self) -> [u8; RECORD_HEADER_LEN] {
        let mut buf = [0u8; RECORD_HEADER_LEN];
        write_u64(&mut buf, 0, self.key);
        write_u32(&mut buf, 8, self.value_len);
        write_u32(&mut buf, 12, self.value_len_xor);
        buf
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            key: read_u64(buf, 0),
            value_len: read_u32(buf, 8),
            value_len_xor: read_u32(buf, 12),
        }
    }

    fn validate(&self) -> Result<(), Error> {
        if self.value_len ^ self.value_len_xor != 0xFFFF_FFFF {
            return Err(Error::new(ErrorKind::CorruptState)
                .with_message("record length xor mismatch"));
        }
        if self.value_len as usize > MAX_VALUE_LEN {
            return Err(Error::new(ErrorKind::CorruptState)
                .with_message("record value length exceeds max"));
        }
        Ok(())
    }
}

pub fn align8(value: usize) -> usize {
    (value + 7) & !7
}

pub fn record_total_len(value_len: usize) -> usize {
    align8(RECORD_HEADER_LEN + value_len)
}

/// Appends one framed record to an in-memory buffer of pending records.
pub fn encode_record(buf: &mut Vec<u8>, key: u64, value: &[u8]) -> Result<(), Error> {
    if value.len() > MAX_VALUE_LEN {
        return Err(Error::new(ErrorKind::TypeMismatch)
            .with_message(format!("value of {} bytes exceeds max {MAX_VALUE_LEN}", value.len())));
    }
    let start = buf.len();
    buf.extend_from_slice(&RecordHeader::new(key, value.len() as u32).encode());
    buf.extend_from_slice(value);
    buf.resize(start + record_total_len(value.len()), 0);
    Ok(())
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Slot {
    key: u64,
    pending: bool,
    start: usize,
    len: usize,
}

fn scan_records(bytes: &[u8], base: usize, pending: bool, out: &mut Vec<Slot>) -> Result<(), Error> {
    let mut offset = base;
    while offset < bytes.len() {
        if bytes.len() - offset < RECORD_HEADER_LEN {
            return Err(Error::new(ErrorKind::CorruptState)
                .with_message("torn record header at payload tail")
                .with_hint("The payload was cut mid-write; restore it or rebuild the index."));
        }
        let header = RecordHeader::decode(&bytes[offset..offset + RECORD_HEADER_LEN]);
        header.validate()?;
        let value_len = header.value_len as usize;
        let total = record_total_len(value_len);
        if bytes.len() - offset < RECORD_HEADER_LEN + value_len {
            return Err(Error::new(ErrorKind::CorruptState)
                .with_message("torn record value at payload tail"));
        }
        out.push(Slot {
            key: header.key,
            pending,
            start: offset + RECORD_HEADER_LEN,
            len: value_len,
        });
        offset = (offset + total).min(bytes.len());
    }
    Ok(())
}

/// Writes a payload header if the file is new, then appends pre-encoded records.
///
/// The file is truncated back to its previous length if any write fails, so a retry
/// never duplicates records.
pub fn append_records(path: &Path, expected: PayloadHeader, records: &[u8]) -> Result<(), Error> {
    let io_error = |message: &str, err: io::Error| {
        Error::new(ErrorKind::Persistence)
            .with_message(message.to_string())
            .with_path(path)
            .with_source(err)
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| io_error("failed to create payload directory", err))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|err| io_error("failed to open payload", err))?;
    let _lock = AppendLock::acquire(&file, path)?;

    let start_len = file
        .metadata()
        .map(|meta| meta.len())
        .map_err(|err| io_error("failed to stat payload", err))?;
    if start_len > 0 {
        let found = read_header(&mut &file, path)?;
        if found != expected {
            return Err(Error::new(ErrorKind::Config)
                .with_message(format!(
                    "payload header {found:?} conflicts with configured {expected:?}"
                ))
                .with_path(path));
        }
    }

    let written = (|| -> io::Result<()> {
        let mut handle = &file;
        if start_len == 0 {
            handle.write_all(&expected.encode())?;
        }
        handle.seek(SeekFrom::End(0))?;
        handle.write_all(records)?;
        file.sync_data()
    })();
    if let Err(err) = written {
        let _ = file.set_len(start_len);
        return Err(io_error("failed to append payload records", err));
    }
    Ok(())
}

/// Flushed records of one payload file, mapped read-only.
pub struct PayloadFile {
    header: PayloadHeader,
    mmap: Mmap,
    slots: Vec<Slot>,
}

impl PayloadFile {
    /// Opens and validates a payload, returning `None` when it has not been created yet.
    pub fn open(path: &Path) -> Result<Option<Self>, Error> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(Error::new(ErrorKind::IndexUnavailable)
                    .with_message("failed to open payload")
                    .with_path(path)
                    .with_source(err));
            }
        };
        let len = file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|err| {
                Error::new(ErrorKind::IndexUnavailable)
                    .with_path(path)
                    .with_source(err)
            })?;
        if len == 0 {
            return Ok(None);
        }
        let header = read_header(&mut file, path)?;
        let mmap = unsafe {
            Mmap::map(&file).map_err(|err| {
                Error::new(ErrorKind::IndexUnavailable)
                    .with_message("failed to map payload")
                    .with_path(path)
                    .with_source(err)
            })?
        };
        let mut slots = Vec::new();
        scan_records(&mmap, HEADER_SIZE, false, &mut slots).map_err(|err| err.with_path(path))?;
        Ok(Some(Self {
            header,
            mmap,
            slots,
        }))
    }

    pub fn header(&self) -> PayloadHeader {
        self.header
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EntryRef<'a> {
    pub key: u64,
    pub value: &'a [u8],
}

impl EntryRef<'_> {
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.value
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }
}

/// Read handle over every flushed record followed by every pending record.
#[derive(Debug)]
pub struct IndexView {
    header: PayloadHeader,
    flushed: Option<Mmap>,
    pending: Vec<u8>,
    slots: Vec<Slot>,
}

impl IndexView {
    pub fn build(flushed: Option<PayloadFile>, header: PayloadHeader, pending: &[u8]) -> Result<Self, Error> {
        let (mmap, mut slots) = match flushed {
            Some(file) => (Some(file.mmap), file.slots),
            None => (None, Vec::new()),
        };
        scan_records(pending, 0, true, &mut slots)?;
        Ok(Self {
            header,
            flushed: mmap,
            pending: pending.to_vec(),
            slots,
        })
    }

    pub fn header(&self) -> PayloadHeader {
        self.header
    }

    pub fn dimension(&self) -> u32 {
        self.header.dimension
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<EntryRef<'_>> {
        self.slots.get(index).map(|slot| self.entry(slot))
    }

    pub fn iter(&self) -> impl Iterator<Item = EntryRef<'_>> + '_ {
        self.slots.iter().map(|slot| self.entry(slot))
    }

    pub fn keys(&self) -> Vec<u64> {
        self.slots.iter().map(|slot| slot.key).collect()
    }

    /// First entry appended under `key`.
    pub fn find(&self, key: u64) -> Option<EntryRef<'_>> {
        self.slots
            .iter()
            .find(|slot| slot.key == key)
            .map(|slot| self.entry(slot))
    }

    /// Vector rows in append order; empty for byte payloads.
    pub fn vectors(&self) -> Vec<Vec<f32>> {
        if self.header.value_kind != ValueKind::F32 {
            return Vec::new();
        }
        self.iter().map(|entry| entry.to_f32_vec()).collect()
    }

    fn entry(&self, slot: &Slot) -> EntryRef<'_> {
        let source: &[u8] = if slot.pending {
            &self.pending
        } else {
            self.flushed.as_deref().unwrap_or_default()
        };
        EntryRef {
            key: slot.key,
            value: &source[slot.start..slot.start + slot.len],
        }
    }
}

struct AppendLock<'a> {
    file: &'a File,
}

impl<'a> AppendLock<'a> {
    fn acquire(file: &'a File, path: &Path) -> Result<Self, Error> {
        file.try_lock_exclusive().map_err(|err| {
            Error::new(ErrorKind::Persistence)
                .with_message(lock_error_message(&err))
                .with_path(path)
                .with_hint("Another process is writing this payload; check shard ids and isolation.")
                .with_source(err)
        })?;
        Ok(Self { file })
    }
}

impl<'a> Drop for AppendLock<'a> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.file);
    }
}

fn lock_error_message(err: &io::Error) -> &'static str {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return "permission denied while locking payload";
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => "payload is locked by another writer",
        io::ErrorKind::PermissionDenied => "permission denied while locking payload",
        _ => "failed to lock payload",
    }
}

fn read_header<R: Read + Seek>(reader: &mut R, path: &Path) -> Result<PayloadHeader, Error> {
    let mut buf = [0u8; HEADER_SIZE];
    reader
        .seek(SeekFrom::Start(0))
        .and_then(|_| reader.read_exact(&mut buf))
        .map_err(|err| {
            Error::new(ErrorKind::CorruptState)
                .with_message("failed to read payload header")
                .with_path(path)
                .with_source(err)
        })?;
    PayloadHeader::decode(&buf).map_err(|err| err.with_path(path))
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(out)
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(out)
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
