use std::io::Write;
use std::sync::Arc;

use super::{ContainerError, WriteOptions};
use crate::binary;
use crate::block::{encode_block, encode_terminal};
use crate::codec::{get_codec, Codec};
use crate::header::Header;
use crate::record::FinalizedRecord;
use crate::schema::Schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Header written, no records yet.
    HeaderWritten,
    /// Records are buffered in the open block.
    BlockOpen,
    /// The last block was flushed and nothing is buffered.
    BlockFlushed,
    Closed,
}

/// Streaming container writer.
///
/// The header goes out when the writer is created.  Appended records are
/// encoded into an in-memory block that is framed and written once it
/// reaches [`WriteOptions::block_size`], on [`Writer::sync`], or on
/// [`Writer::close`].  A writer that is dropped without `close` leaves a
/// file with no terminal block, which readers report as truncated.
pub struct Writer<W: Write> {
    dest:          W,
    header:        Header,
    codec:         Box<dyn Codec>,
    level:         i32,
    block_size:    usize,
    buffer:        Vec<u8>,
    pending:       u64,
    bytes_written: u64,
    state:         WriterState,
}

impl<W: Write> Writer<W> {
    pub fn create(schema: Arc<Schema>, dest: W) -> Result<Self, ContainerError> {
        Self::with_options(schema, dest, WriteOptions::default())
    }

    pub fn with_options(schema: Arc<Schema>, mut dest: W, opts: WriteOptions) -> Result<Self, ContainerError> {
        let header = match opts.sync_marker {
            Some(sync) => Header::with_sync(schema, opts.codec, sync),
            None       => Header::new(schema, opts.codec),
        };
        let header_len = header.write(&mut dest)?;
        Ok(Self {
            dest,
            codec:         get_codec(header.codec),
            header,
            level:         opts.level,
            block_size:    opts.block_size,
            buffer:        Vec::new(),
            pending:       0,
            bytes_written: header_len as u64,
            state:         WriterState::HeaderWritten,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.header.schema
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Bytes handed to the destination so far, buffered records excluded.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Add a record of the root type.  A record built against a different
    /// schema is refused with `SchemaMismatch` and nothing is written.
    pub fn append(&mut self, record: &FinalizedRecord) -> Result<(), ContainerError> {
        if self.state == WriterState::Closed {
            return Err(ContainerError::Closed);
        }
        let schema = &self.header.schema;
        if record.type_name() != schema.name() || !record.schema().is_same(schema) {
            return Err(ContainerError::SchemaMismatch);
        }

        let mark = self.buffer.len();
        if let Err(e) = binary::encode_into(schema, record, &mut self.buffer) {
            self.buffer.truncate(mark);
            return Err(e.into());
        }
        self.pending += 1;
        self.state = WriterState::BlockOpen;

        if self.buffer.len() >= self.block_size {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Flush the open block and the destination.  Returns the offset at
    /// which the next block will start.
    pub fn sync(&mut self) -> Result<u64, ContainerError> {
        if self.state == WriterState::Closed {
            return Err(ContainerError::Closed);
        }
        self.flush_block()?;
        self.dest.flush()?;
        Ok(self.bytes_written)
    }

    /// Flush the open block, write the terminal block and flush the
    /// destination.  Closing again does nothing.
    pub fn close(&mut self) -> Result<(), ContainerError> {
        if self.state == WriterState::Closed {
            return Ok(());
        }
        self.flush_block()?;
        let terminal = encode_terminal(&self.header);
        self.dest.write_all(&terminal)?;
        self.bytes_written += terminal.len() as u64;
        self.dest.flush()?;
        self.state = WriterState::Closed;
        Ok(())
    }

    /// Close and hand back the destination.
    pub fn into_inner(mut self) -> Result<W, ContainerError> {
        self.close()?;
        Ok(self.dest)
    }

    fn flush_block(&mut self) -> Result<(), ContainerError> {
        if self.pending == 0 {
            return Ok(());
        }
        let block = encode_block(&self.header, self.codec.as_ref(), self.level, self.pending, &self.buffer)?;
        self.dest.write_all(&block)?;
        self.bytes_written += block.len() as u64;
        self.buffer.clear();
        self.pending = 0;
        self.state = WriterState::BlockFlushed;
        Ok(())
    }
}
