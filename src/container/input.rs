use std::io::{self, Read};

use super::{ContainerError, WireError};
use crate::header::{SyncMarker, SYNC_SIZE};

/// Smallest read issued against the source.
const CHUNK_SIZE: usize = 64 * 1024;

/// Compacting read buffer that tracks absolute file offsets.
///
/// Nothing is ever sized from a length found in the data: the buffer only
/// grows by what the source actually delivers.
pub(super) struct InputBuffer<R> {
    source: R,
    buf:    Vec<u8>,
    /// Start of the unread bytes in `buf`.
    pos:    usize,
    /// File offset of `buf[0]`.
    base:   u64,
    eof:    bool,
}

impl<R: Read> InputBuffer<R> {
    pub(super) fn new(source: R) -> Self {
        Self { source, buf: Vec::new(), pos: 0, base: 0, eof: false }
    }

    /// Offset of the next unread byte.
    pub(super) fn offset(&self) -> u64 {
        self.base + self.pos as u64
    }

    pub(super) fn available(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    pub(super) fn consume(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.buf.len());
    }

    /// Pull more input.  Each call at least doubles what is buffered, so
    /// retrying a parse after every fill stays linear overall.  Returns
    /// `false` once the source is exhausted.
    pub(super) fn fill(&mut self) -> io::Result<bool> {
        if self.eof {
            return Ok(false);
        }
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.base += self.pos as u64;
            self.pos = 0;
        }
        let start = self.buf.len();
        let want = CHUNK_SIZE.max(start);
        self.buf.resize(start + want, 0);
        let mut filled = start;
        while filled < start + want {
            match self.source.read(&mut self.buf[filled..]) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buf.truncate(filled);
                    return Err(e);
                }
            }
        }
        self.buf.truncate(filled);
        Ok(filled > start)
    }

    /// `true` when every byte of the source has been consumed.
    pub(super) fn at_end(&mut self) -> io::Result<bool> {
        while self.available().is_empty() {
            if !self.fill()? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Run `parse` over the unread bytes, pulling more input while it
    /// reports truncation.  On success the parsed bytes are consumed; on
    /// failure nothing is.
    pub(super) fn parse<T, E, F>(&mut self, mut parse: F) -> Result<T, ContainerError>
    where
        E: WireError,
        F: FnMut(&[u8]) -> Result<(T, usize), E>,
    {
        loop {
            match parse(self.available()) {
                Ok((value, used)) => {
                    self.consume(used);
                    return Ok(value);
                }
                Err(e) if e.is_truncated() => {
                    if !self.fill()? {
                        let end = self.offset() + self.available().len() as u64;
                        return Err(e.at(end));
                    }
                }
                Err(e) => return Err(e.at(self.offset())),
            }
        }
    }

    /// Consume input up to and including the next occurrence of `marker`.
    /// Returns the number of bytes consumed, and whether the marker was
    /// found before the input ran out.
    pub(super) fn skip_past(&mut self, marker: &SyncMarker) -> io::Result<(u64, bool)> {
        let start = self.offset();
        loop {
            if let Some(i) = self.available().windows(SYNC_SIZE).position(|w| w == marker) {
                self.consume(i + SYNC_SIZE);
                return Ok((self.offset() - start, true));
            }
            // a marker may straddle the end of what is buffered
            let keep = SYNC_SIZE - 1;
            let len = self.available().len();
            if len > keep {
                self.consume(len - keep);
            }
            if !self.fill()? {
                let len = self.available().len();
                self.consume(len);
                return Ok((self.offset() - start, false));
            }
        }
    }

    pub(super) fn into_inner(self) -> R {
        self.source
    }
}
