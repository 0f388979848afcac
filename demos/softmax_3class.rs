use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use nnkit::{Activation, ClassifierOptimizer, Function, Matrix, SeriesBuilder, metrics};

fn main() -> nnkit::Result<()> {
    // Three noisy blobs in 2D, one per class.
    let mut rng = StdRng::seed_from_u64(0);
    let centers = [[-1.0, -1.0], [1.0, -1.0], [0.0, 1.0]];
    let n_per_class = 64;
    let mut xs = Vec::with_capacity(3 * n_per_class);
    let mut labels = Vec::with_capacity(3 * n_per_class);
    for (class, center) in centers.iter().enumerate() {
        for _ in 0..n_per_class {
            xs.push(vec![
                center[0] + rng.gen_range(-0.3..0.3),
                center[1] + rng.gen_range(-0.3..0.3),
            ]);
            labels.push(class);
        }
    }
    let x = Matrix::from_rows(&xs)?;

    // The classifier shim reads probabilities, so the series ends in a softmax.
    let mut model: Function = SeriesBuilder::new(2)?
        .add_dense(16, Activation::ReLU)?
        .add_batch_norm()?
        .add_dense(3, Activation::Identity)?
        .add_softmax()
        .build_with_seed(0)?
        .into();

    let mut opt = ClassifierOptimizer::create(&mut model);
    opt.optimizer_mut().set_learning_rate(0.05)?;
    for epoch in 0..200 {
        opt.update(&x, &labels)?;
        if epoch % 50 == 0 {
            println!("epoch={epoch} loss={}", opt.loss(&x, &labels)?);
        }
    }

    let accuracy = metrics::accuracy(&opt.predict(&x)?, &labels)?;
    println!("final loss={} accuracy={accuracy}", opt.loss(&x, &labels)?);
    Ok(())
}
