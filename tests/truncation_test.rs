use recbox::codec::CodecId;
use recbox::container::{ContainerError, Reader, ReaderOptions, WriteOptions, Writer};
use recbox::record::{FinalizedRecord, Record};
use recbox::schema::Schema;
use std::sync::Arc;

fn fixture(codec: CodecId) -> (Vec<FinalizedRecord>, Vec<u8>) {
    let schema = Arc::new(Schema::parse(r#"{
        "type": "record", "name": "Reading",
        "fields": [
            {"name": "station", "type": "string"},
            {"name": "value", "type": "double"},
            {"name": "tags", "type": {"type": "array", "items": "string"}},
            {"name": "note", "type": ["null", "string"], "default": null}
        ]
    }"#).unwrap());

    let records: Vec<_> = (0..40)
        .map(|i| {
            let mut r = Record::new(Arc::clone(&schema));
            r.set("station", format!("st-{}", i % 7)).unwrap();
            r.set("value", i as f64 * 0.25).unwrap();
            r.set("tags", recbox::Value::Array(vec!["a".into(), format!("t{i}").into()])).unwrap();
            r.set("note", if i % 2 == 0 { Some("even") } else { None }).unwrap();
            r.finalize().unwrap()
        })
        .collect();

    let opts = WriteOptions { codec, block_size: 200, ..WriteOptions::default() };
    let mut w = Writer::with_options(schema, Vec::new(), opts).unwrap();
    for r in &records {
        w.append(r).unwrap();
    }
    (records, w.into_inner().unwrap())
}

fn read_to_end(bytes: &[u8]) -> Result<usize, ContainerError> {
    let mut n = 0;
    for record in Reader::open(bytes)? {
        record?;
        n += 1;
    }
    Ok(n)
}

fn every_cut_is_truncation(codec: CodecId) {
    let (records, bytes) = fixture(codec);
    assert_eq!(read_to_end(&bytes).unwrap(), records.len());

    for cut in 0..bytes.len() {
        match read_to_end(&bytes[..cut]) {
            Err(ContainerError::Truncated { offset }) => {
                assert!(offset <= cut as u64, "cut {cut}: offset {offset} past the end");
            }
            other => panic!("cut {cut} of {}: expected truncation, got {other:?}", bytes.len()),
        }
    }
}

#[test]
fn test_every_cut_of_a_plain_file_is_truncation() {
    every_cut_is_truncation(CodecId::None);
}

#[test]
fn test_every_cut_of_a_compressed_file_is_truncation() {
    every_cut_is_truncation(CodecId::Zstd);
}

#[test]
fn test_recovery_returns_a_prefix_of_a_cut_file() {
    for codec in [CodecId::None, CodecId::Lz4] {
        let (records, bytes) = fixture(codec);
        let header_len = Reader::open(bytes.as_slice()).unwrap().offset() as usize;

        for cut in header_len..bytes.len() {
            let opts = ReaderOptions { recovery: true, ..ReaderOptions::default() };
            let mut reader = Reader::with_options(&bytes[..cut], opts).unwrap();
            let back: Vec<_> = reader.by_ref().collect::<Result<_, _>>()
                .unwrap_or_else(|e| panic!("cut {cut}: {e}"));
            assert_eq!(back[..], records[..back.len()], "cut {cut}");
            assert!(reader.recovery_stats().missing_terminal, "cut {cut}");
        }
    }
}
