use arenajs::Context;
use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn bench_expression(c: &mut Criterion) {
    let code = "1 + 2 * 3 - 4 / 5 + (6 % 7) * 8 ** 2 + (1 < 2 ? 10 : 20)";

    c.bench_function("expression eval", |b| {
        let mut ctx = Context::new(64 * 1024).unwrap();
        b.iter(|| black_box(ctx.eval(code)))
    });
}

fn bench_fib_recursive(c: &mut Criterion) {
    // Every call allocates its scope in the arena and nothing is reclaimed
    // until the statement finishes, so the depth stays modest.
    let code = r#"
        let fib = function(n) {
            return n < 2 ? n : fib(n - 1) + fib(n - 2);
        };
        fib(12)
    "#;

    c.bench_function("fib recursive 12", |b| {
        b.iter(|| {
            let mut ctx = Context::new(256 * 1024).unwrap();
            black_box(ctx.eval(code))
        })
    });
}

fn bench_property_churn(c: &mut Criterion) {
    // Every reassignment prepends a shadowing record; this exercises both
    // the write path and lookup past dead records.
    let code = r#"
        let o = {a: 0, b: 0};
        o.a = 1; o.b = o.a + 1;
        o.a = o.b * 2; o.b = o.a - 1;
        o.a = o.b * 2; o.b = o.a - 1;
        o.a + o.b
    "#;

    c.bench_function("property churn", |b| {
        b.iter(|| {
            let mut ctx = Context::new(64 * 1024).unwrap();
            black_box(ctx.eval(code))
        })
    });
}

fn bench_string_concat(c: &mut Criterion) {
    let code = r#"
        let s = 'start';
        s = s + '-a'; s = s + '-b'; s = s + '-c'; s = s + '-d';
        s = s + '-e'; s = s + '-f'; s = s + '-g'; s = s + '-h';
        s
    "#;

    c.bench_function("string concat", |b| {
        b.iter(|| {
            let mut ctx = Context::new(64 * 1024).unwrap();
            black_box(ctx.eval(code))
        })
    });
}

fn bench_reclamation(c: &mut Criterion) {
    c.bench_function("gc full arena", |b| {
        b.iter(|| {
            let mut ctx = Context::new(64 * 1024).unwrap();
            ctx.eval("let keep = {a: 1, b: 'two', c: function(x){ return x; }};");
            // Fill the arena with garbage, then collect.
            for _ in 0..200 {
                ctx.eval("'chunk-of-garbage' + '-and-some-more'");
            }
            black_box(ctx.gc())
        })
    });
}

criterion_group!(
    benches,
    bench_expression,
    bench_fib_recursive,
    bench_property_churn,
    bench_string_concat,
    bench_reclamation
);
criterion_main!(benches);
