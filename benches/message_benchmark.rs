use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use notify_mailer::message::{dot_stuff, parse_recipients};
use notify_mailer::{MailerConfig, OutgoingMessage};

criterion_group!(benches, compose_bench, dot_stuff_bench);
criterion_main!(benches);

fn config() -> MailerConfig {
    MailerConfig::builder()
        .host("smtp.example.com")
        .credentials("noreply@example.com", "token")
        .system_name("Status Page")
        .build()
        .unwrap()
}

fn compose_bench(c: &mut Criterion) {
    let config = config();
    let body = "<p>Service degraded</p>\n".repeat(200);
    let mut group = c.benchmark_group("compose");

    group.bench_function("single_recipient", |b| {
        b.iter(|| OutgoingMessage::compose(&config, black_box("Alert"), black_box("ops@example.com"), &body))
    });

    group.bench_function("ten_recipients", |b| {
        let receiver = (0..10).map(|i| format!("user{}@example.com", i)).collect::<Vec<_>>().join("; ");
        b.iter(|| OutgoingMessage::compose(&config, black_box("Alert"), black_box(&receiver), &body))
    });

    group.bench_function("parse_recipients", |b| {
        b.iter(|| parse_recipients(black_box(" a@x.com ; b@y.com;; c@z.com ")))
    });

    group.finish();
}

fn dot_stuff_bench(c: &mut Criterion) {
    let crlf = "line of text\r\n.leading dot\r\n".repeat(1000).into_bytes();
    let bare_lf = "line of text\n.leading dot\n".repeat(1000).into_bytes();
    let mut group = c.benchmark_group("dot_stuff");

    group.bench_function("crlf", |b| b.iter(|| dot_stuff(black_box(&crlf))));
    group.bench_function("bare_lf", |b| b.iter(|| dot_stuff(black_box(&bare_lf))));

    group.finish();
}
