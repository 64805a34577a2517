//! Fan-out benchmarks for the relay hub.
//!
//! These benchmarks measure the cost of delivering one message to every
//! registered connection, without any transport involved.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use relay_protocol::WireMessage;
use std::sync::Arc;
use tenvis_relay_core::{
    hub, Connection, ConnectionId, ConnectionRegistry, Message, MessageKind, RelayStats,
};
use tokio::sync::mpsc;

type Queues = Vec<mpsc::Receiver<Arc<Message>>>;

fn populate(registry: &ConnectionRegistry, connections: usize, capacity: usize) -> Queues {
    (0..connections)
        .map(|_| {
            let (conn, rx) = Connection::new(capacity, None);
            registry.register(&conn).unwrap();
            rx
        })
        .collect()
}

fn drain(queues: &mut Queues) {
    for rx in queues {
        while rx.try_recv().is_ok() {}
    }
}

fn chat_message() -> Arc<Message> {
    let wire = WireMessage::new("chat", "x".repeat(64), "bench");
    Arc::new(Message::admit(wire, MessageKind::Data, ConnectionId::new(0, 0)))
}

/// Benchmark one fan-out pass over N connections.
fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    for connections in [1usize, 10, 100, 1000] {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut queues = populate(&registry, connections, 1024);
        let (_broadcaster, hub) =
            hub::channel(16, Arc::clone(&registry), Arc::new(RelayStats::default()), true);
        let message = chat_message();

        group.throughput(Throughput::Elements(connections as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(connections),
            &connections,
            |b, _| {
                b.iter(|| {
                    let result = hub.fan_out(black_box(&message));
                    drain(&mut queues);
                    result
                });
            },
        );
    }

    group.finish();
}

/// Benchmark registry churn: register then unregister one connection.
fn bench_registry_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    for occupied in [0usize, 1000] {
        let registry = ConnectionRegistry::new();
        let _queues = populate(&registry, occupied, 1);

        group.bench_with_input(
            BenchmarkId::new("register_unregister", occupied),
            &occupied,
            |b, _| {
                b.iter(|| {
                    let (conn, _rx) = Connection::new(1, None);
                    let id = registry.register(&conn).unwrap();
                    registry.unregister(black_box(id))
                });
            },
        );
    }

    group.finish();
}

/// Benchmark message admission, including timestamping.
fn bench_admit(c: &mut Criterion) {
    c.bench_function("admit", |b| {
        b.iter(|| {
            let wire = WireMessage::new("chat", "hello", "bench");
            Message::admit(black_box(wire), MessageKind::Data, ConnectionId::new(0, 0))
        });
    });
}

criterion_group!(benches, bench_fan_out, bench_registry_churn, bench_admit);
criterion_main!(benches);
