use std::io::Read;
use std::sync::Arc;

use super::input::InputBuffer;
use super::{ContainerError, ReaderOptions, RecoveryStats, WireError};
use crate::binary::{self, DecodeError, MAX_ZERO_WIDTH_ITEMS};
use crate::block::{decode_payload, read_count, read_frame, read_sync};
use crate::codec::{get_codec, Codec};
use crate::header::{Header, VERSION_CODEC};
use crate::record::FinalizedRecord;
use crate::recovery::{BlockHealth, ScannedBlock};
use crate::schema::Schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Header parsed, nothing read yet.
    Opened,
    Reading,
    /// The terminal block was reached or reading stopped on an error.
    Exhausted,
}

enum Block {
    /// Between blocks.
    Boundary,
    /// Version 1 block; records are decoded straight from the input.
    Stream { start: u64, count: u64, remaining: u64 },
    /// Version 2 block, already read whole and decompressed.
    Payload { start: u64, length: u64, count: u64, remaining: u64, data: Vec<u8>, pos: usize },
}

enum Step {
    Open,
    FinishStream,
    FinishPayload,
}

/// Sequential container reader.
///
/// In normal mode the first error is returned and the reader is exhausted
/// from then on.  With [`ReaderOptions::recovery`] a damaged block is
/// skipped by scanning forward to the next sync marker, and a file that
/// ends early simply ends; what was skipped is tallied in
/// [`Reader::recovery_stats`].
pub struct Reader<R: Read> {
    input:      InputBuffer<R>,
    header:     Header,
    schema:     Arc<Schema>,
    codec:      Box<dyn Codec>,
    recovery:   bool,
    /// Fewest bytes one root record encodes to.
    min_record: usize,
    block:      Block,
    pending:    Option<FinalizedRecord>,
    state:      ReaderState,
    stats:      RecoveryStats,
    journal:    Option<Vec<ScannedBlock>>,
}

impl<R: Read> Reader<R> {
    pub fn open(source: R) -> Result<Self, ContainerError> {
        Self::with_options(source, ReaderOptions::default())
    }

    /// Parse and validate the header.
    pub fn with_options(source: R, opts: ReaderOptions) -> Result<Self, ContainerError> {
        let mut input = InputBuffer::new(source);
        let header = input.parse(Header::parse)?;
        let schema = match opts.expected_schema {
            Some(expected) if expected.is_same(&header.schema) => expected,
            Some(_) => return Err(ContainerError::SchemaMismatch),
            None    => Arc::clone(&header.schema),
        };
        Ok(Self {
            input,
            codec:      get_codec(header.codec),
            min_record: binary::min_record_size(&schema),
            header,
            schema,
            recovery:   opts.recovery,
            block:      Block::Boundary,
            pending:    None,
            state:      ReaderState::Opened,
            stats:      RecoveryStats::default(),
            journal:    None,
        })
    }

    /// Schema the records are bound to: the expected schema when one was
    /// given, the embedded one otherwise.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn recovery_stats(&self) -> RecoveryStats {
        self.stats
    }

    /// Offset of the next unread byte.
    pub fn offset(&self) -> u64 {
        self.input.offset()
    }

    pub fn into_inner(self) -> R {
        self.input.into_inner()
    }

    pub fn has_next(&mut self) -> Result<bool, ContainerError> {
        if self.pending.is_none() {
            self.pending = self.fetch()?;
        }
        Ok(self.pending.is_some())
    }

    /// The next record, or `None` after the terminal block.
    pub fn next_record(&mut self) -> Result<Option<FinalizedRecord>, ContainerError> {
        match self.pending.take() {
            Some(record) => Ok(Some(record)),
            None => self.fetch(),
        }
    }

    /// Log every block's outcome from now on.
    pub(crate) fn enable_journal(&mut self) {
        self.journal = Some(Vec::new());
    }

    pub(crate) fn journal_len(&self) -> usize {
        self.journal.as_ref().map_or(0, Vec::len)
    }

    pub(crate) fn take_journal(&mut self) -> Vec<ScannedBlock> {
        self.journal.take().unwrap_or_default()
    }

    fn fetch(&mut self) -> Result<Option<FinalizedRecord>, ContainerError> {
        loop {
            if self.state == ReaderState::Exhausted {
                return Ok(None);
            }
            self.state = ReaderState::Reading;
            match self.advance() {
                Ok(Some(record)) => return Ok(Some(record)),
                Ok(None) => self.state = ReaderState::Exhausted,
                Err(e) if self.recovery && e.is_data_integrity() => match self.recover(&e) {
                    Ok(true)  => {}
                    Ok(false) => self.state = ReaderState::Exhausted,
                    Err(io) => {
                        self.state = ReaderState::Exhausted;
                        return Err(io);
                    }
                },
                Err(e) => {
                    self.state = ReaderState::Exhausted;
                    return Err(e);
                }
            }
        }
    }

    /// Decode the next record, crossing block boundaries as needed.
    /// `None` once the terminal block has been read.
    fn advance(&mut self) -> Result<Option<FinalizedRecord>, ContainerError> {
        loop {
            let step = match &mut self.block {
                Block::Boundary => Step::Open,
                Block::Stream { remaining: 0, .. } => Step::FinishStream,
                Block::Stream { remaining, .. } => {
                    let schema = &self.schema;
                    let record = self.input.parse(|b| binary::decode(schema, b))?;
                    *remaining -= 1;
                    return Ok(Some(record));
                }
                Block::Payload { start, remaining, data, pos, .. } => {
                    if *remaining == 0 {
                        if *pos != data.len() {
                            return Err(ContainerError::InvalidEncoding {
                                offset: *start,
                                reason: format!("{} stray bytes after the last record", data.len() - *pos),
                            });
                        }
                        Step::FinishPayload
                    } else {
                        let (record, used) = binary::decode(&self.schema, &data[*pos..])
                            .map_err(|e| payload_error(e, *start))?;
                        *pos += used;
                        *remaining -= 1;
                        return Ok(Some(record));
                    }
                }
            };
            match step {
                Step::Open => {
                    if !self.open_block()? {
                        return Ok(None);
                    }
                }
                Step::FinishStream => {
                    let sync = self.header.sync;
                    self.input.parse(|b| read_sync(b, &sync).map(|n| ((), n)))?;
                    self.close_block(BlockHealth::Healthy);
                }
                Step::FinishPayload => self.close_block(BlockHealth::Healthy),
            }
        }
    }

    /// Read the next block's framing.  Returns `false` at the terminal
    /// block.
    fn open_block(&mut self) -> Result<bool, ContainerError> {
        let start = self.input.offset();
        if self.input.at_end()? {
            return Err(ContainerError::Truncated { offset: start });
        }

        if self.header.version == VERSION_CODEC {
            let sync = self.header.sync;
            let frame = self.input.parse(|b| read_frame(b, &sync))?;
            if frame.count == 0 {
                return Ok(false);
            }
            let length = self.input.offset() - start;
            // the frame is consumed either way; a failure below leaves the
            // block in place so recovery does not scan past the next one
            let decoded = self.check_count(frame.count, start)
                .and_then(|()| decode_payload(&frame, self.codec.as_ref()).map_err(|e| e.at(start)));
            let (data, failure) = match decoded {
                Ok(data) => (data, None),
                Err(e)   => (Vec::new(), Some(e)),
            };
            self.block = Block::Payload {
                start,
                length,
                count:     frame.count,
                remaining: frame.count,
                data,
                pos:       0,
            };
            if let Some(e) = failure {
                return Err(e);
            }
        } else {
            let count = self.input.parse(read_count)?;
            if count == 0 {
                let sync = self.header.sync;
                self.input.parse(|b| read_sync(b, &sync).map(|n| ((), n)))?;
                return Ok(false);
            }
            self.check_count(count, start)?;
            self.block = Block::Stream { start, count, remaining: count };
        }
        Ok(true)
    }

    /// Records that encode to nothing cannot be bounded by the input size.
    fn check_count(&self, count: u64, start: u64) -> Result<(), ContainerError> {
        if self.min_record == 0 && count > MAX_ZERO_WIDTH_ITEMS as u64 {
            return Err(ContainerError::InvalidEncoding {
                offset: start,
                reason: format!("{count} zero-width records in one block"),
            });
        }
        Ok(())
    }

    fn close_block(&mut self, health: BlockHealth) {
        let end = self.input.offset();
        let block = std::mem::replace(&mut self.block, Block::Boundary);
        let (start, length, records) = match block {
            Block::Boundary => return,
            Block::Stream { start, count, remaining } => (start, end - start, count - remaining),
            Block::Payload { start, length, count, remaining, .. } => (start, length, count - remaining),
        };
        if let Some(journal) = &mut self.journal {
            journal.push(ScannedBlock { offset: start, length, records, health });
        }
    }

    /// Skip the damaged block.  Returns `false` when the data ended
    /// before another sync marker was found.
    fn recover(&mut self, error: &ContainerError) -> Result<bool, ContainerError> {
        let found = match self.block {
            Block::Payload { length, .. } => {
                self.stats.bytes_skipped += length;
                true
            }
            Block::Stream { .. } => self.resync()?,
            Block::Boundary => {
                if self.input.at_end()? {
                    // clean end of data, only the terminal block is missing
                    self.stats.missing_terminal = true;
                    return Ok(false);
                }
                self.block = Block::Stream { start: self.input.offset(), count: 0, remaining: 0 };
                self.resync()?
            }
        };
        self.stats.blocks_skipped += 1;
        let health = if found {
            BlockHealth::Corrupt { reason: error.to_string() }
        } else {
            self.stats.missing_terminal = true;
            BlockHealth::Truncated
        };
        self.close_block(health);
        Ok(found)
    }

    fn resync(&mut self) -> Result<bool, ContainerError> {
        let (skipped, found) = self.input.skip_past(&self.header.sync)?;
        self.stats.bytes_skipped += skipped;
        Ok(found)
    }
}

/// A record cut short inside a complete payload is corruption, not a
/// short read.
fn payload_error(e: DecodeError, start: u64) -> ContainerError {
    match e {
        DecodeError::Truncated => ContainerError::InvalidEncoding {
            offset: start,
            reason: "block payload ends inside a record".into(),
        },
        other => other.at(start),
    }
}

impl<R: Read> Iterator for Reader<R> {
    type Item = Result<FinalizedRecord, ContainerError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
