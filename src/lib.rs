pub mod schema;
pub mod value;
pub mod record;
pub mod binary;
pub mod codec;
pub mod header;
pub mod block;
pub mod container;
pub mod recovery;
pub mod datafile;

pub use schema::{Schema, SchemaError, TypeSchema};
pub use value::Value;
pub use record::{FinalizedRecord, Record, RecordError};
pub use codec::{CodecId, get_codec};
pub use container::{ContainerError, Reader, ReaderOptions, WriteOptions, Writer};
pub use recovery::{RecoveryReport, scan, salvage};
