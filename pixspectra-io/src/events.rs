//! Event record files.
//!
//! Little-endian binary layout:
//!
//! ```text
//! header:  b"PXEV" | u32 version | u16 source_len | source (UTF-8)
//! record:  u16 key_len | key (UTF-8) | u32 n_elements | element*
//! element: u32 quad | u32 roi_mask | u32 n_samples | i16 * n_samples
//! ```
//!
//! The reader memory-maps the file, discovers record boundaries once and
//! decodes records on demand.

use crate::{Error, Result};
use memmap2::Mmap;
use pixspectra_cspad::{DataV2, ElementV2, EventRecord};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// File magic.
pub const EVENT_FILE_MAGIC: [u8; 4] = *b"PXEV";

/// Current format version.
pub const EVENT_FILE_VERSION: u32 = 1;

/// Byte range of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSpan {
    /// Offset of the first byte of the record.
    pub start: usize,
    /// Offset one past the last byte of the record.
    pub end: usize,
}

/// One decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFrame {
    /// Event key the payload was stored under.
    pub key: String,
    /// Detector payload.
    pub data: DataV2,
}

impl EventFrame {
    /// Wraps the frame into a host event for `source`.
    #[must_use]
    pub fn into_event(self, source: &str) -> EventRecord {
        EventRecord::with_data(source, self.key, self.data)
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                Error::InvalidFormat(format!(
                    "truncated event file: need {len} bytes at offset {}",
                    self.pos
                ))
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::InvalidFormat(format!("invalid UTF-8 string: {e}")))
    }
}

fn parse_header(data: &[u8]) -> Result<(String, usize)> {
    let mut cursor = Cursor::new(data, 0);
    if cursor.take(4)? != EVENT_FILE_MAGIC {
        return Err(Error::InvalidFormat("missing PXEV magic".to_string()));
    }
    let version = cursor.u32()?;
    if version != EVENT_FILE_VERSION {
        return Err(Error::InvalidFormat(format!(
            "unsupported event file version {version}"
        )));
    }
    let source = cursor.string()?;
    Ok((source, cursor.pos))
}

fn skip_record(cursor: &mut Cursor<'_>) -> Result<()> {
    let key_len = cursor.u16()? as usize;
    cursor.take(key_len)?;
    let elements = cursor.u32()?;
    for _ in 0..elements {
        cursor.take(8)?;
        let samples = cursor.u32()? as usize;
        let bytes = samples
            .checked_mul(2)
            .ok_or_else(|| Error::InvalidFormat("sample count overflows".to_string()))?;
        cursor.take(bytes)?;
    }
    Ok(())
}

/// Discovers record boundaries after the header.
///
/// # Errors
/// Returns `InvalidFormat` if the header is invalid or a record is truncated.
pub fn discover_records(data: &[u8]) -> Result<Vec<RecordSpan>> {
    let (_, header_len) = parse_header(data)?;
    let mut cursor = Cursor::new(data, header_len);
    let mut spans = Vec::new();
    while cursor.pos < data.len() {
        let start = cursor.pos;
        skip_record(&mut cursor)?;
        spans.push(RecordSpan {
            start,
            end: cursor.pos,
        });
    }
    Ok(spans)
}

/// Decodes the record at `span`.
///
/// # Errors
/// Returns `InvalidFormat` if the record does not fit its span.
pub fn decode_record(data: &[u8], span: RecordSpan) -> Result<EventFrame> {
    let mut cursor = Cursor::new(&data[..span.end], span.start);
    let key = cursor.string()?;
    let count = cursor.u32()? as usize;
    let mut elements = Vec::with_capacity(count);
    for _ in 0..count {
        let quad = cursor.u32()?;
        let roi_mask = cursor.u32()?;
        let samples = cursor.u32()? as usize;
        let bytes = cursor.take(samples * 2)?;
        let data = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        elements.push(ElementV2::new(quad, roi_mask, data));
    }
    Ok(EventFrame {
        key,
        data: DataV2::new(elements),
    })
}

/// A memory-mapped event record file.
pub struct EventFileReader {
    mmap: Mmap,
    path: PathBuf,
    source: String,
    spans: Vec<RecordSpan>,
}

impl EventFileReader {
    /// Opens and indexes an event file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be mapped or its framing is invalid.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };

        let (source, _) = parse_header(&mmap)?;
        let spans = discover_records(&mmap).map_err(|e| {
            Error::InvalidFormat(format!("{} ({})", e, path.as_ref().display()))
        })?;

        Ok(Self {
            mmap,
            path: path.as_ref().to_path_buf(),
            source,
            spans,
        })
    }

    /// Detector source the events were recorded from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File size in bytes.
    #[must_use]
    pub fn file_size(&self) -> usize {
        self.mmap.len()
    }

    /// Number of events in the file.
    #[must_use]
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Returns true if the file holds no event.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Decodes event `index`.
    ///
    /// # Errors
    /// Returns `InvalidFormat` if `index` is out of range.
    pub fn event(&self, index: usize) -> Result<EventFrame> {
        let span = self.spans.get(index).copied().ok_or_else(|| {
            Error::InvalidFormat(format!("event {index} beyond {} events", self.len()))
        })?;
        decode_record(&self.mmap, span)
    }

    /// Iterates over all events in file order.
    pub fn events(&self) -> impl Iterator<Item = Result<EventFrame>> + '_ {
        self.spans
            .iter()
            .map(move |&span| decode_record(&self.mmap, span))
    }
}

/// Writer for event record files.
pub struct EventFileWriter {
    writer: BufWriter<File>,
    events: usize,
}

impl EventFileWriter {
    /// Creates an event file for `source` and writes its header.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or the source name is
    /// too long.
    pub fn create<P: AsRef<Path>>(path: P, source: &str) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&EVENT_FILE_MAGIC)?;
        writer.write_all(&EVENT_FILE_VERSION.to_le_bytes())?;
        write_string(&mut writer, source)?;
        Ok(Self { writer, events: 0 })
    }

    /// Appends one event.
    ///
    /// # Errors
    /// Returns an error on I/O failure or if a length does not fit its field.
    pub fn write_event(&mut self, key: &str, data: &DataV2) -> Result<()> {
        write_string(&mut self.writer, key)?;
        self.writer.write_all(&len_u32(data.elements.len())?.to_le_bytes())?;
        for element in &data.elements {
            self.writer.write_all(&element.quad.to_le_bytes())?;
            self.writer.write_all(&element.roi_mask.to_le_bytes())?;
            self.writer
                .write_all(&len_u32(element.data.len())?.to_le_bytes())?;
            for sample in &element.data {
                self.writer.write_all(&sample.to_le_bytes())?;
            }
        }
        self.events += 1;
        Ok(())
    }

    /// Number of events written so far.
    #[must_use]
    pub fn events_written(&self) -> usize {
        self.events
    }

    /// Flushes the writer.
    ///
    /// # Errors
    /// Returns an error if flushing fails.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

fn len_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::InvalidFormat(format!("length {len} exceeds u32")))
}

fn write_string<W: Write>(writer: &mut W, value: &str) -> Result<()> {
    let len = u16::try_from(value.len())
        .map_err(|_| Error::InvalidFormat(format!("string of {} bytes too long", value.len())))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn sample_data(offset: i16) -> DataV2 {
        DataV2::new(vec![
            ElementV2::new(0, 0b1, vec![offset, offset + 1, offset + 2]),
            ElementV2::new(2, 0, Vec::new()),
        ])
    }

    fn write_file(events: &[(&str, DataV2)]) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        let mut writer = EventFileWriter::create(file.path(), "CxiDs1.0:Cspad.0").unwrap();
        for (key, data) in events {
            writer.write_event(key, data).unwrap();
        }
        assert_eq!(writer.events_written(), events.len());
        writer.flush().unwrap();
        file
    }

    #[test]
    fn test_write_then_read_events() {
        let file = write_file(&[("", sample_data(10)), ("calibrated", sample_data(-5))]);

        let reader = EventFileReader::open(file.path()).unwrap();
        assert_eq!(reader.source(), "CxiDs1.0:Cspad.0");
        assert_eq!(reader.len(), 2);

        let frames: Vec<EventFrame> = reader.events().collect::<Result<_>>().unwrap();
        assert_eq!(frames[0].key, "");
        assert_eq!(frames[0].data, sample_data(10));
        assert_eq!(frames[1].key, "calibrated");
        assert_eq!(frames[1].data.elements[0].data, vec![-5, -4, -3]);
        assert!(reader.event(2).is_err());
    }

    #[test]
    fn test_empty_event_file() {
        let file = write_file(&[]);
        let reader = EventFileReader::open(file.path()).unwrap();
        assert!(reader.is_empty());
        assert_eq!(reader.events().count(), 0);
    }

    #[test]
    fn test_truncated_file_rejected() {
        let file = write_file(&[("", sample_data(1))]);
        let mut bytes = std::fs::read(file.path()).unwrap();
        bytes.truncate(bytes.len() - 1);
        assert!(discover_records(&bytes).is_err());

        let truncated = NamedTempFile::new().unwrap();
        std::fs::write(truncated.path(), &bytes).unwrap();
        assert!(EventFileReader::open(truncated.path()).is_err());
    }

    #[test]
    fn test_bad_magic_rejected() {
        assert!(discover_records(b"XXXX\x01\x00\x00\x00\x00\x00").is_err());
    }

    #[test]
    fn test_frame_into_event() {
        let frame = EventFrame {
            key: String::new(),
            data: sample_data(0),
        };
        let event = frame.into_event("src");
        assert_eq!(event.get("src", "").unwrap().sample_count(), 3);
    }
}
