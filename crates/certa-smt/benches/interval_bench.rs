use criterion::{black_box, criterion_group, criterion_main, Criterion};
use certa_smt::backends::interval_backend::IntervalSolver;
use certa_smt::solver::SmtSolver;
use certa_smt::sorts::SmtSort;
use certa_smt::terms::SmtTerm;

/// Positivity of a quadratic form off a small ball: the query shape
/// produced for Lyapunov candidates.
fn quadratic_positivity(dim: usize) -> (Vec<String>, SmtTerm) {
    let names: Vec<String> = (0..dim).map(|i| format!("x{i}")).collect();
    let vars: Vec<SmtTerm> = names.iter().map(SmtTerm::var).collect();
    let norm = SmtTerm::sum(vars.iter().map(|v| v.clone().powi(2)));
    let cross = SmtTerm::sum(vars.windows(2).map(|w| w[0].clone() * w[1].clone()));
    let v = norm.clone() + SmtTerm::num(0.5) * cross;
    let query = SmtTerm::and(vec![norm.gt(SmtTerm::num(1e-4)), v.le(SmtTerm::zero())]);
    (names, query)
}

fn run(names: &[String], query: &SmtTerm) {
    let mut solver = IntervalSolver::with_timeout_secs(60);
    for n in names {
        solver.declare_var(n, &SmtSort::Real).unwrap();
        solver.bound_var(n, -1.0, 1.0).unwrap();
    }
    solver.assert(query).unwrap();
    solver.check_sat().unwrap();
}

fn bench_interval_quadratic_2d(c: &mut Criterion) {
    let (names, query) = quadratic_positivity(2);
    c.bench_function("interval_quadratic_2d", |b| {
        b.iter(|| run(black_box(&names), black_box(&query)))
    });
}

fn bench_interval_quadratic_3d(c: &mut Criterion) {
    let (names, query) = quadratic_positivity(3);
    c.bench_function("interval_quadratic_3d", |b| {
        b.iter(|| run(black_box(&names), black_box(&query)))
    });
}

fn bench_gradient_6d(c: &mut Criterion) {
    let (names, query) = quadratic_positivity(6);
    let SmtTerm::And(parts) = query else {
        return;
    };
    let Some(SmtTerm::Le(v, _)) = parts.last() else {
        return;
    };
    c.bench_function("gradient_6d", |b| {
        b.iter(|| black_box(v.as_ref()).gradient(black_box(&names)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_interval_quadratic_2d,
    bench_interval_quadratic_3d,
    bench_gradient_6d
);
criterion_main!(benches);
