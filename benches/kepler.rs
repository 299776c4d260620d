use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use ndarray::{Array1, Array2};
use orbit_sampler::{ecc_anom, Likelihood, Mcmc, McmcSettings, Observation, System};
use rand::{Rng, SeedableRng};

fn anomalies(n: usize, max_ecc: f64) -> (Array1<f64>, Array1<f64>) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let manom = (0..n)
        .map(|_| rng.random_range(0.0..std::f64::consts::TAU))
        .collect();
    let ecc = (0..n).map(|_| rng.random_range(0.0..max_ecc)).collect();
    (manom, ecc)
}

fn system() -> System {
    let data = vec![
        Observation::radec(55_000.0, 0.31, 0.01, 0.42, 0.01),
        Observation::radec(55_300.0, 0.28, 0.01, 0.45, 0.01),
        Observation::seppa(55_700.0, 0.55, 0.01, 31.0, 1.0),
        Observation::seppa(56_100.0, 0.56, 0.01, 27.5, 1.0),
    ];
    System::with_default_priors(data, 55_000.0, 1.2, 45.0, 0.05, 0.2).unwrap()
}

fn params(n: usize) -> Array2<f64> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let mut params = Array2::zeros((8, n));
    for mut orbit in params.columns_mut() {
        orbit[0] = rng.random_range(1.0..50.0);
        orbit[1] = rng.random_range(0.0..0.99);
        orbit[2] = rng.random_range(0.0..std::f64::consts::PI);
        orbit[3] = rng.random_range(0.0..std::f64::consts::TAU);
        orbit[4] = rng.random_range(0.0..std::f64::consts::TAU);
        orbit[5] = rng.random();
        orbit[6] = 45.0;
        orbit[7] = 1.2;
    }
    params
}

fn criterion_benchmark(c: &mut Criterion) {
    let (manom, ecc) = anomalies(10_000, 0.9);
    c.bench_function("ecc_anom newton 10000", |b| {
        b.iter(|| ecc_anom(black_box(manom.view()), black_box(ecc.view())))
    });

    let (manom, ecc) = anomalies(10_000, 1.0);
    c.bench_function("ecc_anom mixed 10000", |b| {
        b.iter(|| ecc_anom(black_box(manom.view()), black_box(ecc.view())))
    });

    let likelihood = Likelihood::new(system());
    let batch = params(10_000);
    c.bench_function("log_likelihood 10000", |b| {
        b.iter(|| likelihood.log_likelihood(black_box(batch.view())))
    });

    for num_threads in [1, 4] {
        let settings = McmcSettings {
            num_temps: 4,
            num_walkers: 100,
            num_threads,
            ..Default::default()
        };
        c.bench_function(&format!("mcmc 4x100 walkers, {num_threads} threads"), |b| {
            b.iter_batched(
                || Mcmc::new(Likelihood::new(system()), settings.clone()).unwrap(),
                |mut mcmc| {
                    mcmc.run(black_box(1_000), 0, 1).unwrap();
                },
                BatchSize::SmallInput,
            )
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
