// train_synthetic.rs
// Trains a small network on generated 12x12 "bar" images (horizontal, vertical,
// diagonal) to exercise assembly, training, evaluation and checkpointing.
// Expected files:
//   ./config/training_params.json
//   ./config/layers_conv.json
//
// Usage:
//   train_synthetic [checkpoint.json]
//
// Set RUST_LOG=debug to see per-layer assembly and learning-rate updates.

use layernet::architecture::load_layer_specs;
use layernet::config::load_training_params;
use layernet::utils::SimpleRng;
use layernet::{Checkpoint, Dataset, Network, Result, Tensor};
use std::env;
use std::process;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const IMG_SZ: usize = 12;
const NUM_CLASSES: usize = 3;
const TRAIN_SAMPLES: usize = 600;
const TEST_SAMPLES: usize = 200;
const DEFAULT_EPOCHS: usize = 8;

/// One noisy image of class `label`: 0 horizontal bar, 1 vertical bar, 2 diagonal.
fn draw_sample(label: usize, rng: &mut SimpleRng, out: &mut [f32]) {
    for v in out.iter_mut() {
        *v = rng.gen_range_f32(0.0, 0.2);
    }
    let offset = 2 + rng.gen_usize(IMG_SZ - 4);
    for i in 0..IMG_SZ {
        let (y, x) = match label {
            0 => (offset, i),
            1 => (i, offset),
            _ => (i, (i + offset) % IMG_SZ),
        };
        out[y * IMG_SZ + x] = 1.0;
    }
}

fn make_dataset(n: usize, rng: &mut SimpleRng) -> Result<Dataset> {
    let width = IMG_SZ * IMG_SZ;
    let mut x = vec![0.0f32; n * width];
    let mut y = Vec::with_capacity(n);
    for (i, sample) in x.chunks_exact_mut(width).enumerate() {
        let label = i % NUM_CLASSES;
        draw_sample(label, rng, sample);
        y.push(label);
    }
    Dataset::new(Tensor::new(vec![n, width], x)?, y)
}

fn run() -> Result<()> {
    let params = load_training_params("config/training_params.json")?;
    let layers = load_layer_specs("config/layers_conv.json")?;
    let epochs = params
        .extra
        .get("NUM_EPOCHS")
        .and_then(|v| v.as_u64())
        .map_or(DEFAULT_EPOCHS, |v| v as usize);

    let mut data_rng = SimpleRng::new(params.seed.wrapping_add(1));
    let train_data = make_dataset(TRAIN_SAMPLES, &mut data_rng)?;
    let test_data = make_dataset(TEST_SAMPLES, &mut data_rng)?;

    let mut net = Network::new(layers, params, None)?;
    println!("{}", net.layers_info());
    println!("{}", net.weights_info(false));
    println!("{}", net.training_params_info());

    let train = net.compile_train(train_data)?;
    let test = net.compile_test(test_data, false)?;

    for epoch in 0..epochs {
        let mut cost = 0.0f32;
        for index in 0..train.num_batches() {
            cost += train.call(index)?.cost;
        }
        cost /= train.num_batches().max(1) as f32;

        let mut error = 0.0f32;
        for index in 0..test.num_batches() {
            error += test.call(index)?.errors.error_rate;
        }
        error /= test.num_batches().max(1) as f32;

        info!(
            epoch,
            cost,
            test_error = error,
            rate = net.learning_rate(),
            "Epoch finished"
        );
        net.advance_epoch();
    }

    println!("{}", net);
    println!("{}", net.weights_info(true));

    if let Some(path) = env::args().nth(1) {
        let checkpoint: Checkpoint = net.get_init_params();
        checkpoint.save(&path)?;

        let restored = Network::from_checkpoint(Checkpoint::load(&path)?)?;
        if restored.weights() != net.weights() {
            warn!(path = %path, "Restored weights differ from the trained network");
        }
    }

    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("layernet=info,train_synthetic=info")),
        )
        .init();

    if let Err(err) = run() {
        eprintln!("train_synthetic: {}", err);
        process::exit(1);
    }
}
