use std::f64::consts::PI;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use super::types::{BUCKET_COUNT, BucketConfig, BucketReturns};

pub fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    // gen_range yields [0, 1); flip it so ln() never sees zero.
    let u1: f64 = 1.0 - rng.gen_range(0.0..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

// Not clipped. Bucket values are floored at zero, returns are not.
pub fn sample_return<R: Rng>(rng: &mut R, expected_return: f64, volatility: f64) -> f64 {
    expected_return + volatility * standard_normal(rng)
}

pub fn sample_bucket_returns<R: Rng>(
    rng: &mut R,
    buckets: &[BucketConfig; BUCKET_COUNT],
) -> BucketReturns {
    BucketReturns {
        bucket1: sample_return(rng, buckets[0].expected_return, buckets[0].volatility),
        bucket2: sample_return(rng, buckets[1].expected_return, buckets[1].volatility),
        bucket3: sample_return(rng, buckets[2].expected_return, buckets[2].volatility),
    }
}

pub fn trial_rng(base_seed: u64, trial_id: u32) -> StdRng {
    StdRng::seed_from_u64(derive_seed(base_seed, trial_id))
}

pub fn derive_seed(base_seed: u64, trial_id: u32) -> u64 {
    splitmix64(base_seed ^ ((trial_id as u64) << 17) ^ trial_id as u64)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}
