use std::hash::BuildHasher as _;

use ahash::RandomState;

use super::FlushContext;
use crate::record::{FlushRecord, SeriesType};

// Fixed seeds, so that a given element always maps to the same bits regardless of which shard or process sees it.
const SEEDS_A: [u64; 4] = [0x243f_6a88_85a3_08d3, 0x1319_8a2e_0370_7344, 0xa409_3822_299f_31d0, 0x082e_fa98_ec4e_6c89];
const SEEDS_B: [u64; 4] = [0x4528_21e6_38d0_1377, 0xbe54_66cf_34e9_0c6c, 0xc0ac_29b7_c97c_50dd, 0x3f84_d5b5_b547_0917];

/// Approximate-cardinality Bloom filter.
///
/// Sized from an expected number of distinct elements and a target false-positive rate. Cardinality is estimated from
/// the number of bits set, and is accurate as long as the filter is not heavily saturated.
#[derive(Clone, Debug)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
    bits_set: u64,
    hasher_a: RandomState,
    hasher_b: RandomState,
}

impl BloomFilter {
    /// Creates a new `BloomFilter` sized for `expected_items` distinct elements at the given false-positive rate.
    ///
    /// `expected_items` is treated as at least one, and `false_positive_rate` is expected to be within (0, 1).
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;

        let num_bits = ((-n * false_positive_rate.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().max(1.0) as u32;
        let words = num_bits.div_ceil(64) as usize;

        Self {
            bits: vec![0; words],
            num_bits,
            num_hashes,
            bits_set: 0,
            hasher_a: RandomState::with_seeds(SEEDS_A[0], SEEDS_A[1], SEEDS_A[2], SEEDS_A[3]),
            hasher_b: RandomState::with_seeds(SEEDS_B[0], SEEDS_B[1], SEEDS_B[2], SEEDS_B[3]),
        }
    }

    /// Returns the number of bits in the filter.
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Returns the number of hash functions used per element.
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Inserts an element into the filter.
    pub fn insert(&mut self, element: &str) {
        let h1 = self.hasher_a.hash_one(element);
        let h2 = self.hasher_b.hash_one(element) | 1;

        for i in 0..u64::from(self.num_hashes) {
            let bit = h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits;
            #[allow(clippy::cast_possible_truncation)]
            let word = &mut self.bits[(bit / 64) as usize];
            let mask = 1u64 << (bit % 64);
            if *word & mask == 0 {
                *word |= mask;
                self.bits_set += 1;
            }
        }
    }

    /// Returns the estimated number of distinct elements inserted into the filter.
    ///
    /// A fully saturated filter reports the estimate for all but one bit set.
    #[allow(clippy::cast_precision_loss)]
    pub fn estimated_cardinality(&self) -> f64 {
        let m = self.num_bits as f64;
        let k = f64::from(self.num_hashes);
        let x = self.bits_set.min(self.num_bits - 1) as f64;

        -(m / k) * (1.0 - x / m).ln()
    }
}

/// Set of distinct elements, tracked approximately.
#[derive(Clone, Debug)]
pub struct Set {
    filter: BloomFilter,
}

impl Set {
    /// Creates an empty `Set`.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        Self {
            filter: BloomFilter::new(expected_items, false_positive_rate),
        }
    }

    /// Adds an element. Sample rate does not apply to sets.
    pub fn sample(&mut self, element: &str) {
        self.filter.insert(element);
    }

    /// Returns the estimated number of distinct elements.
    pub fn estimated_cardinality(&self) -> f64 {
        self.filter.estimated_cardinality()
    }

    pub(super) fn flush(self, name: &str, tags: &[String], ctx: &FlushContext<'_>) -> FlushRecord {
        FlushRecord::new(
            name.to_string(),
            tags.to_vec(),
            SeriesType::Gauge,
            ctx.timestamp,
            self.estimated_cardinality().round(),
            None,
        )
    }
}
