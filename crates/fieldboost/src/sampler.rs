//! Bootstrap train/holdout splits.
use log::debug;

use crate::engine::{DataEngine, DatasetId, SampleRequest};
use crate::error::Result;

/// In-bag rows train the trees, out-of-bag rows measure the improvement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapSplit {
    pub in_bag: DatasetId,
    pub out_of_bag: DatasetId,
}

/// Draw an in-bag sample and its out-of-bag complement.
///
/// Both requests use the same seed, so they partition the same draw; they are
/// issued concurrently and the call returns once both have finished. Equal
/// seeds always produce the same split.
pub fn bootstrap<E: DataEngine>(
    engine: &E,
    dataset: &DatasetId,
    rate: f64,
    seed: &str,
    name: &str,
) -> Result<BootstrapSplit> {
    let request = |out_of_bag: bool| SampleRequest {
        rate,
        replacement: true,
        out_of_bag,
        seed: seed.to_string(),
        name: format!("{} - {}", name, if out_of_bag { "out of bag" } else { "in bag" }),
    };
    let in_bag_request = request(false);
    let out_of_bag_request = request(true);

    let (in_bag, out_of_bag) = rayon::join(
        || engine.sample_dataset(dataset, &in_bag_request),
        || engine.sample_dataset(dataset, &out_of_bag_request),
    );
    let split = BootstrapSplit {
        in_bag: in_bag?,
        out_of_bag: out_of_bag?,
    };
    debug!(
        "Bootstrap of {} with seed {}: in bag {}, out of bag {}",
        dataset, seed, split.in_bag, split.out_of_bag
    );
    Ok(split)
}
