/// Device-list scanning and the flat line buffers batches are built from.
///
/// A `LineBatch` stores its lines back to back in one byte vector plus an
/// offset table, so clearing it keeps both allocations for the next batch.
use std::io::{self, BufRead};

/// A fixed-capacity batch of device identifiers.
#[derive(Debug, Clone, Default)]
pub struct LineBatch {
    data: Vec<u8>,
    ends: Vec<usize>,
    capacity: usize,
}

impl LineBatch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity * 32),
            ends: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends one identifier. The caller checks [`LineBatch::is_full`].
    pub fn push(&mut self, line: &[u8]) {
        self.data.extend_from_slice(line);
        self.ends.push(self.data.len());
    }

    pub fn len(&self) -> usize {
        self.ends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ends.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ends.len() >= self.capacity
    }

    /// Maximum number of lines before the batch is full.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Empties the batch, keeping its allocations.
    pub fn clear(&mut self) {
        self.data.clear();
        self.ends.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let mut start = 0;
        self.ends.iter().map(move |&end| {
            let line = &self.data[start..end];
            start = end;
            line
        })
    }
}

/// Reads newline-delimited device identifiers, skipping empty lines.
///
/// Line endings (`\n` or `\r\n`) are stripped. Identifiers are treated as
/// opaque bytes and need not be UTF-8.
pub struct DeviceReader<R> {
    inner: R,
    line: Vec<u8>,
    line_no: u64,
    skipped_empty: u64,
}

impl<R: BufRead> DeviceReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: Vec::with_capacity(128),
            line_no: 0,
            skipped_empty: 0,
        }
    }

    /// Returns the next non-empty identifier, or `None` at end of input.
    ///
    /// Read errors carry the number of the line being read.
    pub fn next_device(&mut self) -> io::Result<Option<&[u8]>> {
        loop {
            self.line.clear();
            let read = self.inner.read_until(b'\n', &mut self.line).map_err(|e| {
                io::Error::new(e.kind(), format!("line {}: {e}", self.line_no + 1))
            })?;
            if read == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let mut end = self.line.len();
            if end > 0 && self.line[end - 1] == b'\n' {
                end -= 1;
            }
            if end > 0 && self.line[end - 1] == b'\r' {
                end -= 1;
            }
            if end == 0 {
                self.skipped_empty += 1;
                continue;
            }
            return Ok(Some(&self.line[..end]));
        }
    }

    /// Number of the line last returned (1-based).
    pub fn line_no(&self) -> u64 {
        self.line_no
    }

    /// Empty lines skipped so far.
    pub fn skipped_empty(&self) -> u64 {
        self.skipped_empty
    }
}
