use criterion::{Criterion, black_box, criterion_group, criterion_main};

use nnkit::{
    Activation, Affine, Function, FunctionOptimizer, Init, Matrix, SeriesBuilder, Simplex,
    VectorFunction, loss,
};

fn batch(rows: usize, cols: usize) -> Matrix {
    let data = (0..rows * cols).map(|i| ((i % 17) as f64 - 8.0) * 0.05).collect();
    Matrix::from_flat(data, rows, cols).unwrap()
}

fn model() -> Function {
    SeriesBuilder::new(128)
        .unwrap()
        .add_dense(256, Activation::ReLU)
        .unwrap()
        .add_dense(256, Activation::Tanh)
        .unwrap()
        .add_dense(10, Activation::Identity)
        .unwrap()
        .build_with_seed(0)
        .unwrap()
        .into()
}

fn affine_update_bench(c: &mut Criterion) {
    let mut layer: Function = Affine::new_with_seed(128, 256, Init::He, 0).unwrap().into();
    let mut opt = FunctionOptimizer::create(&mut layer);
    opt.use_sgd();
    opt.set_learning_rate(1e-6).unwrap();
    let inputs = batch(64, 128);
    let d_out = batch(64, 256);

    c.bench_function("affine_update_64x128_256", |b| {
        b.iter(|| {
            let d_in = opt.update(black_box(&inputs), black_box(&d_out)).unwrap();
            black_box(d_in);
        })
    });
}

fn series_forward_bench(c: &mut Criterion) {
    let model = model();
    let inputs = batch(64, 128);

    c.bench_function("series_pass_all_64x128_256_256_10", |b| {
        b.iter(|| {
            let out = model.pass_all(black_box(&inputs)).unwrap();
            black_box(out);
        })
    });
}

fn series_update_bench(c: &mut Criterion) {
    let mut model = model();
    let mut opt = FunctionOptimizer::create(&mut model);
    opt.use_sgd();
    opt.set_learning_rate(1e-4).unwrap();
    let inputs = batch(64, 128);
    let target = batch(64, 10);

    c.bench_function("series_train_step_64x128_256_256_10", |b| {
        b.iter(|| {
            let pred = opt.pass_all(black_box(&inputs)).unwrap();
            let (_, d_out) = loss::mse_backward(&pred, &target).unwrap();
            let d_in = opt.update(&inputs, &d_out).unwrap();
            black_box(d_in);
        })
    });
}

fn simplex_bench(c: &mut Criterion) {
    // Dense random-looking program with a bounded, feasible region.
    let n = 40;
    let mut lp = Simplex::new(n).unwrap();
    for i in 0..n {
        let mut row: Vec<f64> = (0..n).map(|j| 1.0 + ((i * 7 + j * 3) % 11) as f64).collect();
        row.push(100.0 + i as f64);
        lp.subject_to(&row).unwrap();
    }
    let objective: Vec<f64> = (0..n).map(|j| 1.0 + (j % 5) as f64).collect();
    lp.maximize(&objective).unwrap();

    c.bench_function("simplex_40x40", |b| {
        b.iter(|| {
            let mut lp = lp.clone();
            black_box(lp.solve().unwrap());
        })
    });
}

criterion_group!(
    benches,
    affine_update_bench,
    series_forward_bench,
    series_update_bench,
    simplex_bench
);
criterion_main!(benches);
