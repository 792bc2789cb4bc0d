use recbox::binary::varint::write_long;
use recbox::codec::CodecId;
use recbox::container::{ContainerError, Reader, ReaderOptions, ReaderState, WriteOptions, Writer};
use recbox::datafile;
use recbox::header::{Header, SYNC_SIZE};
use recbox::record::{FinalizedRecord, Record};
use recbox::recovery::{self, BlockHealth, RecoveryQuality};
use recbox::schema::Schema;
use recbox::value::Value;
use std::sync::Arc;
use tempfile::NamedTempFile;

const USER_SCHEMA: &str = r#"{
    "namespace": "example.avro",
    "type": "record",
    "name": "User",
    "fields": [
        {"name": "name", "type": "string"},
        {"name": "favorite_number", "type": "int", "default": 0},
        {"name": "favorite_color", "type": ["null", "string"], "default": null}
    ]
}"#;

const SYNC: [u8; SYNC_SIZE] = [0xc3; SYNC_SIZE];

fn user_schema() -> Arc<Schema> {
    Arc::new(Schema::parse(USER_SCHEMA).unwrap())
}

fn user(schema: &Arc<Schema>, name: &str, number: i32, color: Option<&str>) -> FinalizedRecord {
    let mut r = Record::new(Arc::clone(schema));
    r.set("name", name).unwrap();
    r.set("favorite_number", number).unwrap();
    r.set("favorite_color", color).unwrap();
    r.finalize().unwrap()
}

fn users(schema: &Arc<Schema>, n: usize) -> Vec<FinalizedRecord> {
    (0..n)
        .map(|i| {
            let color = if i % 3 == 0 { None } else { Some("blue") };
            user(schema, &format!("user-{i}"), i as i32 * 7 - 50, color)
        })
        .collect()
}

fn write(schema: &Arc<Schema>, records: &[FinalizedRecord], opts: WriteOptions) -> Vec<u8> {
    let mut w = Writer::with_options(Arc::clone(schema), Vec::new(), opts).unwrap();
    for r in records {
        w.append(r).unwrap();
    }
    w.into_inner().unwrap()
}

/// Three blocks of ten records each, with a fixed sync marker.  Returns the
/// offsets at which the blocks end.
fn three_blocks(schema: &Arc<Schema>, records: &[FinalizedRecord], codec: CodecId) -> (Vec<u8>, Vec<u64>) {
    let opts = WriteOptions { codec, sync_marker: Some(SYNC), ..WriteOptions::default() };
    let mut w = Writer::with_options(Arc::clone(schema), Vec::new(), opts).unwrap();
    let mut block_ends = Vec::new();
    for chunk in records.chunks(10) {
        for r in chunk {
            w.append(r).unwrap();
        }
        block_ends.push(w.sync().unwrap());
    }
    (w.into_inner().unwrap(), block_ends)
}

fn read(bytes: &[u8]) -> Result<Vec<FinalizedRecord>, ContainerError> {
    Reader::open(bytes)?.collect()
}

#[test]
fn test_india_and_south_africa() {
    let schema = user_schema();
    let mut u1 = Record::new(Arc::clone(&schema));
    u1.set("name", "India").unwrap();
    u1.set("favorite_number", 1947).unwrap();
    let mut u2 = Record::new(Arc::clone(&schema));
    u2.set("name", "South Africa").unwrap();
    u2.set("favorite_number", 1992).unwrap();
    u2.set("favorite_color", "green").unwrap();

    let bytes = write(&schema, &[u1.finalize().unwrap(), u2.finalize().unwrap()], WriteOptions::default());

    let mut reader = Reader::open(bytes.as_slice()).unwrap();
    assert_eq!(reader.state(), ReaderState::Opened);
    assert!(reader.has_next().unwrap());
    // has_next does not consume
    assert!(reader.has_next().unwrap());
    let first = reader.next_record().unwrap().unwrap();
    let second = reader.next_record().unwrap().unwrap();
    assert!(!reader.has_next().unwrap());
    assert_eq!(reader.state(), ReaderState::Exhausted);

    assert_eq!(first.get("name").unwrap(), &Value::from("India"));
    assert_eq!(first.get("favorite_color").unwrap(), &Value::Null);
    assert_eq!(second.get("favorite_color").unwrap(), &Value::from("green"));
    assert_eq!(
        first.to_string(),
        r#"{"name":"India","favorite_number":1947,"favorite_color":null}"#
    );
}

#[test]
fn test_records_come_back_in_order_for_every_codec() {
    let schema = user_schema();
    let records = users(&schema, 500);
    for codec in CodecId::ALL {
        let opts = WriteOptions { codec, block_size: 512, ..WriteOptions::default() };
        let bytes = write(&schema, &records, opts);
        let back = read(&bytes).unwrap();
        assert_eq!(back, records, "codec {codec}");
    }
}

#[test]
fn test_empty_container_reads_as_empty() {
    let schema = user_schema();
    let bytes = write(&schema, &[], WriteOptions::default());
    let mut reader = Reader::open(bytes.as_slice()).unwrap();
    assert!(reader.schema().is_same(&schema));
    assert!(!reader.has_next().unwrap());
}

#[test]
fn test_close_is_idempotent() {
    let schema = user_schema();
    let opts = WriteOptions { sync_marker: Some(SYNC), ..WriteOptions::default() };
    let records = users(&schema, 3);

    let once = write(&schema, &records, opts.clone());

    let mut w = Writer::with_options(Arc::clone(&schema), Vec::new(), opts).unwrap();
    for r in &records {
        w.append(r).unwrap();
    }
    w.close().unwrap();
    w.close().unwrap();
    let twice = w.into_inner().unwrap();
    assert_eq!(once, twice);
}

#[test]
fn test_foreign_records_are_refused() {
    let schema = user_schema();
    let other = Arc::new(Schema::parse(
        r#"{"type":"record","name":"User","fields":[{"name":"name","type":"string"}]}"#,
    ).unwrap());
    let mut stranger = Record::new(Arc::clone(&other));
    stranger.set("name", "Chile").unwrap();
    let stranger = stranger.finalize().unwrap();

    let mut w = Writer::create(Arc::clone(&schema), Vec::new()).unwrap();
    w.append(&user(&schema, "India", 1947, None)).unwrap();
    let before = w.sync().unwrap();

    assert!(matches!(w.append(&stranger), Err(ContainerError::SchemaMismatch)));
    assert_eq!(w.sync().unwrap(), before);

    // the writer is still usable
    w.append(&user(&schema, "Peru", 1821, None)).unwrap();
    let bytes = w.into_inner().unwrap();
    assert_eq!(read(&bytes).unwrap().len(), 2);
}

#[test]
fn test_structurally_equal_schemas_are_accepted() {
    let schema = user_schema();
    let twin = user_schema();
    let mut w = Writer::create(Arc::clone(&schema), Vec::new()).unwrap();
    w.append(&user(&twin, "India", 1947, None)).unwrap();
    let bytes = w.into_inner().unwrap();
    assert_eq!(read(&bytes).unwrap().len(), 1);
}

#[test]
fn test_expected_schema_is_enforced() {
    let schema = user_schema();
    let bytes = write(&schema, &users(&schema, 2), WriteOptions::default());

    let twin = user_schema();
    let opts = ReaderOptions { expected_schema: Some(Arc::clone(&twin)), ..ReaderOptions::default() };
    let reader = Reader::with_options(bytes.as_slice(), opts).unwrap();
    // records are bound to the caller's schema
    assert!(Arc::ptr_eq(reader.schema(), &twin));

    let other = Arc::new(Schema::parse(r#"{"type":"record","name":"Other","fields":[]}"#).unwrap());
    let opts = ReaderOptions { expected_schema: Some(other), ..ReaderOptions::default() };
    assert!(matches!(
        Reader::with_options(bytes.as_slice(), opts),
        Err(ContainerError::SchemaMismatch)
    ));
}

#[test]
fn test_bad_headers_are_reported() {
    let schema = user_schema();
    let bytes = write(&schema, &users(&schema, 1), WriteOptions::default());

    let mut bad = bytes.clone();
    bad[0] = b'X';
    assert!(matches!(Reader::open(bad.as_slice()), Err(ContainerError::HeaderCorrupt(_))));

    let mut bad = bytes.clone();
    bad[4] = 7;
    assert!(matches!(Reader::open(bad.as_slice()), Err(ContainerError::HeaderCorrupt(_))));

    assert!(matches!(Reader::open(&[][..]), Err(ContainerError::Truncated { offset: 0 })));
}

/// A v1 header around an arbitrary schema blob, followed by the terminal block.
fn raw_container(schema_json: &str) -> Vec<u8> {
    let mut bytes = b"RBOX".to_vec();
    bytes.push(1);
    write_long(&mut bytes, schema_json.len() as i64);
    bytes.extend_from_slice(schema_json.as_bytes());
    bytes.extend_from_slice(&SYNC);
    bytes.push(0x00);
    bytes.extend_from_slice(&SYNC);
    bytes
}

#[test]
fn test_self_building_default_in_header_is_corrupt() {
    let bytes = raw_container(r#"{"type":"record","name":"A","fields":[{"name":"next","type":["A","null"],"default":{}}]}"#);
    assert!(matches!(Reader::open(bytes.as_slice()), Err(ContainerError::HeaderCorrupt(_))));
}

#[test]
fn test_deeply_shared_schema_opens_quickly() {
    // T9 holds ten T8 fields, each holding ten T7 fields, and so on
    let mut fields = vec![r#"{"name":"d0","type":{"type":"record","name":"T0","fields":[{"name":"v","type":"long"}]}}"#.to_owned()];
    for level in 1..10 {
        let inner: Vec<String> = (0..10)
            .map(|i| format!(r#"{{"name":"f{i}","type":"T{}"}}"#, level - 1))
            .collect();
        fields.push(format!(
            r#"{{"name":"d{level}","type":{{"type":"record","name":"T{level}","fields":[{}]}}}}"#,
            inner.join(","),
        ));
    }
    let source = format!(r#"{{"type":"record","name":"Root","fields":[{}]}}"#, fields.join(","));
    let schema = Arc::new(Schema::parse(&source).unwrap());

    let bytes = write(&schema, &[], WriteOptions::default());
    let mut reader = Reader::open(bytes.as_slice()).unwrap();
    assert!(reader.next().is_none());
    assert_eq!(recbox::binary::min_record_size(reader.schema()), 1_111_111_111);
}

#[test]
fn test_sync_marker_corruption_and_recovery() {
    let schema = user_schema();
    let records = users(&schema, 30);
    let (mut bytes, block_ends) = three_blocks(&schema, &records, CodecId::None);

    // damage the marker that closes the first block
    let marker_at = block_ends[0] as usize - SYNC_SIZE;
    bytes[marker_at] ^= 0xff;

    let mut reader = Reader::open(bytes.as_slice()).unwrap();
    for expected in &records[..10] {
        assert_eq!(&reader.next_record().unwrap().unwrap(), expected);
    }
    match reader.next_record() {
        Err(ContainerError::SyncMarkerMismatch { offset }) => assert_eq!(offset, marker_at as u64),
        other => panic!("expected a sync marker mismatch, got {other:?}"),
    }
    assert_eq!(reader.state(), ReaderState::Exhausted);
    assert!(reader.next_record().unwrap().is_none());

    // recovery resynchronises on the marker after the second block
    let opts = ReaderOptions { recovery: true, ..ReaderOptions::default() };
    let mut reader = Reader::with_options(bytes.as_slice(), opts).unwrap();
    let back: Vec<_> = reader.by_ref().collect::<Result<_, _>>().unwrap();
    let mut expected = records[..10].to_vec();
    expected.extend_from_slice(&records[20..]);
    assert_eq!(back, expected);
    let stats = reader.recovery_stats();
    assert_eq!(stats.blocks_skipped, 1);
    assert_eq!(stats.bytes_skipped, block_ends[1] - marker_at as u64);
    assert!(!stats.missing_terminal);
}

#[test]
fn test_checksum_damage_skips_one_compressed_block() {
    let schema = user_schema();
    let records = users(&schema, 30);
    let (mut bytes, block_ends) = three_blocks(&schema, &records, CodecId::Zstd);

    // flip a bit in the CRC of the middle block
    let crc_at = block_ends[1] as usize - SYNC_SIZE - 4;
    bytes[crc_at] ^= 0x01;

    match read(&bytes) {
        Err(ContainerError::InvalidEncoding { offset, .. }) => assert_eq!(offset, block_ends[0]),
        other => panic!("expected invalid encoding, got {other:?}"),
    }

    let opts = ReaderOptions { recovery: true, ..ReaderOptions::default() };
    let mut reader = Reader::with_options(bytes.as_slice(), opts).unwrap();
    let back: Vec<_> = reader.by_ref().collect::<Result<_, _>>().unwrap();
    let mut expected = records[..10].to_vec();
    expected.extend_from_slice(&records[20..]);
    assert_eq!(back, expected);
    assert_eq!(reader.recovery_stats().blocks_skipped, 1);
}

#[test]
fn test_missing_terminal_block() {
    let schema = user_schema();
    let records = users(&schema, 4);
    let bytes = write(&schema, &records, WriteOptions::default());
    let cut = &bytes[..bytes.len() - 1 - SYNC_SIZE];

    let mut reader = Reader::open(cut).unwrap();
    for _ in 0..4 {
        reader.next_record().unwrap().unwrap();
    }
    assert!(matches!(reader.next_record(), Err(ContainerError::Truncated { .. })));

    let opts = ReaderOptions { recovery: true, ..ReaderOptions::default() };
    let mut reader = Reader::with_options(cut, opts).unwrap();
    assert_eq!(reader.by_ref().count(), 4);
    let stats = reader.recovery_stats();
    assert!(stats.missing_terminal);
    assert_eq!(stats.blocks_skipped, 0);
}

#[test]
fn test_huge_string_length_is_truncation_not_allocation() {
    let schema = user_schema();
    let header = Header::with_sync(Arc::clone(&schema), CodecId::None, SYNC);
    let mut bytes = header.to_bytes();
    bytes.push(0x02); // one record
    bytes.extend_from_slice(&[0xfe, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]); // name length i64::MAX
    bytes.extend_from_slice(b"abc");
    assert!(matches!(read(&bytes), Err(ContainerError::Truncated { .. })));
}

#[test]
fn test_path_api_roundtrip() {
    let temp = NamedTempFile::new().unwrap();
    let schema = user_schema();
    let records = users(&schema, 25);

    let opts = WriteOptions { codec: CodecId::Lz4, block_size: 256, ..WriteOptions::default() };
    let size = datafile::write_all(temp.path(), Arc::clone(&schema), &records, opts).unwrap();
    assert_eq!(size, std::fs::metadata(temp.path()).unwrap().len());

    let (embedded, back) = datafile::read_all(temp.path()).unwrap();
    assert!(embedded.is_same(&schema));
    assert_eq!(back, records);

    let mut w = datafile::create_file(temp.path(), Arc::clone(&schema), WriteOptions::default()).unwrap();
    w.append(&records[0]).unwrap();
    w.close().unwrap();
    drop(w);
    let mut reader = datafile::open_file(temp.path(), ReaderOptions::default()).unwrap();
    assert_eq!(reader.next_record().unwrap().as_ref(), Some(&records[0]));
    assert!(reader.next_record().unwrap().is_none());
}

#[test]
fn test_scan_grades_a_clean_file_full() {
    let schema = user_schema();
    let records = users(&schema, 30);
    let (bytes, block_ends) = three_blocks(&schema, &records, CodecId::Brotli);

    let mut calls = Vec::new();
    let mut progress = |blocks: u64, offset: u64| calls.push((blocks, offset));
    let report = recovery::scan(bytes.as_slice(), Some(&mut progress)).unwrap();

    assert_eq!(report.quality, RecoveryQuality::Full);
    assert_eq!(report.codec, "brotli");
    assert_eq!(report.format_version, 2);
    assert_eq!(report.healthy_blocks, 3);
    assert_eq!(report.records_recovered, 30);
    assert_eq!(report.bytes_scanned, bytes.len() as u64);
    assert!(report.terminated);
    assert_eq!(
        report.block_log.iter().map(|b| b.offset + b.length).collect::<Vec<_>>(),
        block_ends
    );
    assert_eq!(calls.last().map(|c| c.0), Some(3));
}

#[test]
fn test_scan_and_salvage_a_damaged_file() {
    let schema = user_schema();
    let records = users(&schema, 30);
    let (mut bytes, block_ends) = three_blocks(&schema, &records, CodecId::None);
    let marker_at = block_ends[0] as usize - SYNC_SIZE;
    bytes[marker_at + 5] ^= 0x40;

    let report = recovery::scan_file(write_temp(&bytes).path()).unwrap();
    assert_eq!(report.quality, RecoveryQuality::Partial);
    assert_eq!(report.healthy_blocks, 1);
    assert_eq!(report.corrupt_blocks, 1);
    assert!(matches!(report.block_log[0].health, BlockHealth::Corrupt { .. }));
    // the first block's records were read before its marker failed
    assert_eq!(report.block_log[0].records, 10);
    assert_eq!(report.records_recovered, 20);
    assert!(report.terminated);

    let source = write_temp(&bytes);
    let dest = NamedTempFile::new().unwrap();
    let opts = WriteOptions { codec: CodecId::Zstd, ..WriteOptions::default() };
    let (copied, stats) = recovery::salvage_file(source.path(), dest.path(), opts).unwrap();
    assert_eq!(copied, 20);
    assert_eq!(stats.blocks_skipped, 1);

    let (_, back) = datafile::read_all(dest.path()).unwrap();
    assert_eq!(back[..10], records[..10]);
    assert_eq!(back[10..], records[20..]);
    assert_eq!(recovery::scan_file(dest.path()).unwrap().quality, RecoveryQuality::Full);
}

#[test]
fn test_scan_reports_a_missing_tail() {
    let schema = user_schema();
    let records = users(&schema, 30);
    let (bytes, block_ends) = three_blocks(&schema, &records, CodecId::None);
    let cut = &bytes[..block_ends[2] as usize - 3];

    let report = recovery::scan::<_, fn(u64, u64)>(cut, None).unwrap();
    assert!(!report.terminated);
    assert_eq!(report.healthy_blocks, 2);
    assert_eq!(report.truncated_blocks, 1);
    assert_eq!(report.records_recovered, 30);
    assert_eq!(report.quality, RecoveryQuality::Partial);
    assert!(report.summary().contains("terminal block missing"));
}

fn write_temp(bytes: &[u8]) -> NamedTempFile {
    let mut temp = NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut temp, bytes).unwrap();
    temp
}
