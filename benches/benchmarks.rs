//! Criterion benchmarks for the binlog decoder, the dump pipeline and the
//! ALTER TABLE copy.

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use std::io::{self, Cursor};
use std::sync::Arc;

use rpl::alter::{
    AlterRequest, AlterTable, BasicSession, ColumnDef, ColumnSpec, ColumnType, EngineRegistry,
    KeyDef, MemoryEngine, TableCache, TableDefinition, TableName, Value,
};
use rpl::binlog::codec::{decode, encode, DecodeContext};
use rpl::binlog::constants::BINLOG_MAGIC;
use rpl::binlog::dump::{DumpOptions, DumpSession};
use rpl::binlog::event_type::EventType;
use rpl::binlog::events::{EventBody, LogEvent, QueryEvent, XidEvent};
use rpl::binlog::format::FormatDescription;
use rpl::binlog::header::EventHeader;

fn event(type_code: EventType, body: EventBody) -> LogEvent {
    LogEvent {
        header: EventHeader {
            timestamp: 1_300_000_000,
            type_code: type_code.code(),
            server_id: 1,
            ..Default::default()
        },
        body,
    }
}

/// A v4 log of `transactions` INSERT + Xid pairs.
fn build_log(transactions: usize) -> Vec<u8> {
    let fd = FormatDescription::new(4).unwrap();
    let mut log = BINLOG_MAGIC.to_vec();
    let start = event(EventType::FormatDescription, EventBody::FormatDescription(fd.clone()));
    log.extend(encode(&start, &fd).unwrap());
    for i in 0..transactions {
        let sql = format!("INSERT INTO t VALUES ({}, 'row {}')", i, i);
        let q = event(EventType::Query, EventBody::Query(QueryEvent::new("test", sql.as_bytes())));
        log.extend(encode(&q, &fd).unwrap());
        let x = event(EventType::Xid, EventBody::Xid(XidEvent { xid: i as u64 }));
        log.extend(encode(&x, &fd).unwrap());
    }
    log
}

fn bench_decode(c: &mut Criterion) {
    let fd = FormatDescription::new(4).unwrap();
    let query = encode(
        &event(
            EventType::Query,
            EventBody::Query(QueryEvent::new("test", b"UPDATE t SET a = a + 1 WHERE id = 42")),
        ),
        &fd,
    )
    .unwrap();
    let xid = encode(&event(EventType::Xid, EventBody::Xid(XidEvent { xid: 7 })), &fd).unwrap();

    let mut group = c.benchmark_group("decode");
    group.bench_function("query", |b| {
        let mut ctx = DecodeContext::new(fd.clone());
        b.iter(|| black_box(decode(black_box(&query), &mut ctx).unwrap()));
    });
    group.bench_function("xid", |b| {
        let mut ctx = DecodeContext::new(fd.clone());
        b.iter(|| black_box(decode(black_box(&xid), &mut ctx).unwrap()));
    });
    group.finish();
}

fn bench_dump(c: &mut Criterion) {
    let mut group = c.benchmark_group("dump_stream");
    for transactions in [100usize, 1_000] {
        let log = build_log(transactions);
        group.throughput(Throughput::Bytes(log.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(transactions), &log, |b, log| {
            b.iter(|| {
                let mut session = DumpSession::new(DumpOptions::default());
                session
                    .dump_stream(Cursor::new(log.as_slice()), &mut io::sink())
                    .unwrap();
            });
        });
    }
    group.finish();
}

fn bench_alter_copy(c: &mut Criterion) {
    let table = TableName::new("test", "t");
    let request = AlterRequest {
        columns: vec![ColumnSpec::add(
            ColumnDef::new("score", ColumnType::Integer).with_default(Value::Int(0)),
        )],
        ..Default::default()
    };

    let mut group = c.benchmark_group("alter_copy");
    for rows in [1_000i64, 5_000] {
        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
            b.iter_batched(
                || {
                    let engine = Arc::new(MemoryEngine::new("MEMORY"));
                    let mut def = TableDefinition::new(table.clone(), "MEMORY");
                    def.columns = vec![
                        ColumnDef::new("id", ColumnType::Integer).not_null(),
                        ColumnDef::varchar("name", 32),
                    ];
                    def.keys = vec![KeyDef::primary(&["id"])];
                    engine.create(&def).unwrap();
                    for id in 0..rows {
                        engine
                            .insert(&table, vec![Value::Int(id), Value::Text(format!("n{}", id))])
                            .unwrap();
                    }
                    let mut engines = EngineRegistry::default();
                    engines.register(engine);
                    engines
                },
                |engines| {
                    let cache = TableCache::default();
                    let mut session = BasicSession::new(1);
                    AlterTable::new(&engines, &cache, &mut session)
                        .execute(&table, &request)
                        .unwrap();
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_decode, bench_dump, bench_alter_copy);
criterion_main!(benches);
