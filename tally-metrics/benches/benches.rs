use std::fmt;
use std::sync::Arc;
use std::thread;

use criterion::{BatchSize, BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use tally_metrics::{Aggregator, Metric};

/// Produces a datagram of `lines` records spread over `buckets` bucket names.
struct DatagramGenerator {
    lines: usize,
    buckets: usize,
}

impl DatagramGenerator {
    fn datagram(&self) -> Vec<u8> {
        let mut data = String::new();
        for i in 0..self.lines {
            let bucket = i % self.buckets;
            let line = match i % 4 {
                0 => format!("api.requests.{bucket}:1|c\n"),
                1 => format!("api.latency.{bucket}:{}|ms|@0.5\n", i % 500),
                2 => format!("api.queue.{bucket}:{}|g\n", i % 50),
                _ => format!("api.users.{bucket}:user-{}|s\n", i % 1000),
            };
            data.push_str(&line);
        }
        data.into_bytes()
    }
}

impl fmt::Display for DatagramGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} lines/{} buckets", self.lines, self.buckets)
    }
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");

    for lines in [1, 100, 10_000] {
        let data = DatagramGenerator { lines, buckets: 10 }.datagram();

        group.throughput(criterion::Throughput::Elements(lines as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &data, |b, data| {
            b.iter(|| Metric::parse_all(black_box(data)).filter(Result::is_ok).count())
        });
    }

    group.finish();
}

fn bench_insert_and_flush(c: &mut Criterion) {
    let inputs = [
        DatagramGenerator {
            lines: 10_000,
            buckets: 1,
        },
        DatagramGenerator {
            lines: 10_000,
            buckets: 1_000,
        },
        DatagramGenerator {
            lines: 100_000,
            buckets: 10_000,
        },
    ];

    for input in &inputs {
        let metrics: Vec<Metric> = Metric::parse_all(&input.datagram())
            .filter_map(Result::ok)
            .collect();

        {
            let mut group = c.benchmark_group("insert");
            group.throughput(criterion::Throughput::Elements(input.lines as u64));
            group.bench_with_input(
                BenchmarkId::new("bench_insert_metrics", input),
                &metrics,
                |b, metrics| {
                    b.iter_batched(
                        || (Aggregator::default(), metrics.clone()),
                        |(aggregator, metrics)| {
                            for metric in metrics {
                                black_box(aggregator.insert(black_box(metric)));
                            }
                        },
                        BatchSize::SmallInput,
                    )
                },
            );
        }

        {
            let mut group = c.benchmark_group("flush");
            group.bench_with_input(
                BenchmarkId::new("bench_flush_metrics", input),
                &metrics,
                |b, metrics| {
                    b.iter_batched(
                        || {
                            let aggregator = Aggregator::default();
                            for metric in metrics.iter().cloned() {
                                aggregator.insert(metric);
                            }
                            aggregator
                        },
                        |aggregator| black_box(aggregator.flush()),
                        BatchSize::SmallInput,
                    )
                },
            );
        }
    }
}

fn bench_contended_counters(c: &mut Criterion) {
    let metric = Metric::parse(b"hits:1|c").expect("valid metric");

    c.bench_function("contended_counters", |b| {
        b.iter_batched(
            || Arc::new(Aggregator::default()),
            |aggregator| {
                let handles: Vec<_> = (0..4)
                    .map(|_| {
                        let aggregator = Arc::clone(&aggregator);
                        let metric = metric.clone();
                        thread::spawn(move || {
                            for _ in 0..1000 {
                                let _ = aggregator.process_counter(metric.clone());
                            }
                        })
                    })
                    .collect();

                for handle in handles {
                    handle.join().expect("worker panicked");
                }
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_parse,
    bench_insert_and_flush,
    bench_contended_counters
);
criterion_main!(benches);
