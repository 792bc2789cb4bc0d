//! Path-level helpers over [`Writer`] and [`Reader`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use recbox::container::WriteOptions;
//! use recbox::datafile;
//! use recbox::record::Record;
//! use recbox::schema::Schema;
//!
//! let schema = Arc::new(Schema::from_path("demos/user.avsc")?);
//! let mut user = Record::new(Arc::clone(&schema));
//! user.set("name", "South Africa")?;
//!
//! let mut w = datafile::create_file("users.rbx", schema, WriteOptions::default())?;
//! w.append(&user.finalize()?)?;
//! w.close()?;
//!
//! let (_, users) = datafile::read_all("users.rbx")?;
//! assert_eq!(users.len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;
use std::sync::Arc;

use crate::container::{ContainerError, Reader, ReaderOptions, WriteOptions, Writer};
use crate::record::FinalizedRecord;
use crate::schema::Schema;

pub(crate) fn create_buffered<P: AsRef<Path>>(path: P) -> io::Result<BufWriter<File>> {
    Ok(BufWriter::new(File::create(path)?))
}

/// Create (or truncate) `path` and write a container header to it.
pub fn create_file<P: AsRef<Path>>(
    path:   P,
    schema: Arc<Schema>,
    opts:   WriteOptions,
) -> Result<Writer<BufWriter<File>>, ContainerError> {
    Writer::with_options(schema, create_buffered(path)?, opts)
}

/// Open `path` and parse its header.
pub fn open_file<P: AsRef<Path>>(path: P, opts: ReaderOptions) -> Result<Reader<File>, ContainerError> {
    Reader::with_options(File::open(path)?, opts)
}

/// Read every record of the file at `path`.  Returns the embedded schema
/// alongside the records.
pub fn read_all<P: AsRef<Path>>(path: P) -> Result<(Arc<Schema>, Vec<FinalizedRecord>), ContainerError> {
    let reader = open_file(path, ReaderOptions::default())?;
    let schema = Arc::clone(reader.schema());
    let records = reader.collect::<Result<Vec<_>, _>>()?;
    Ok((schema, records))
}

/// Write `records` to a new file at `path`.  Returns the file size.
pub fn write_all<P, I>(
    path:    P,
    schema:  Arc<Schema>,
    records: I,
    opts:    WriteOptions,
) -> Result<u64, ContainerError>
where
    P: AsRef<Path>,
    I: IntoIterator,
    I::Item: std::borrow::Borrow<FinalizedRecord>,
{
    use std::borrow::Borrow;

    let mut writer = create_file(path, schema, opts)?;
    for record in records {
        writer.append(record.borrow())?;
    }
    writer.close()?;
    Ok(writer.bytes_written())
}
