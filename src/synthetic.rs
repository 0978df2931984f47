//! Seeded generator of plausible used-car listings with log-scale prices

use crate::types::{FeatureVector, LabeledExample};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const FIRST_YEAR: i64 = 2005;
const LAST_YEAR: i64 = 2021;

// Codes in the standard label table
const GASOLINE: i64 = 5;
const FUEL_CODES: [i64; 8] = [GASOLINE, GASOLINE, GASOLINE, GASOLINE, 2, 3, 4, 6];
const PICKUP_TRUCK: i64 = 4;
const SUV_CROSSOVER: i64 = 5;
const SEATING: [i64; 7] = [2, 4, 5, 5, 5, 7, 8];

/// Generator for bootstrap datasets and tests.
pub struct CorpusGenerator {
    rng: StdRng,
}

impl CorpusGenerator {
    /// Deterministic generator for `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Noise-free log price for a vehicle.
    pub fn log_price(features: &FeatureVector) -> f64 {
        let utility = if matches!(features.body_type, PICKUP_TRUCK | SUV_CROSSOVER) {
            0.1
        } else {
            0.0
        };

        9.2 + 0.06 * (features.year - 2010) as f64 - 0.15 * features.mileage / 50_000.0
            + 0.0025 * (features.horsepower - 150.0)
            + 0.03 * features.major_options_count
            + utility
            - 0.2 * features.has_incidents as f64
    }

    pub fn features(&mut self) -> FeatureVector {
        let year = self.rng.gen_range(FIRST_YEAR..=LAST_YEAR);
        let age = (LAST_YEAR + 1 - year) as f64;
        let horsepower = self.rng.gen_range(100.0f64..400.0).round();

        FeatureVector {
            engine_type: self.rng.gen_range(0..24),
            fuel_type: *FUEL_CODES.choose(&mut self.rng).unwrap_or(&GASOLINE),
            transmission: self.rng.gen_range(0..4),
            body_type: self.rng.gen_range(0..9),
            has_incidents: i64::from(self.rng.gen_bool(0.15)),
            wheel_system: self.rng.gen_range(0..5),
            horsepower,
            maximum_seating: *SEATING.choose(&mut self.rng).unwrap_or(&5),
            mileage: (age * self.rng.gen_range(5_000.0..15_000.0)).round(),
            torque: (horsepower * self.rng.gen_range(0.85..1.25)).round(),
            year,
            combined_fuel_economy: self.rng.gen_range(15.0f64..45.0).round(),
            legroom: (self.rng.gen_range(70.0f64..80.0) * 10.0).round() / 10.0,
            major_options_count: self.rng.gen_range(0..=10) as f64,
            size_of_vehicle: (self.rng.gen_range(300.0f64..600.0) * 10.0).round() / 10.0,
        }
    }

    pub fn example(&mut self) -> LabeledExample {
        let features = self.features();
        let noise = self.rng.gen_range(-0.1..0.1);
        LabeledExample::new(features, Self::log_price(&features) + noise)
    }

    /// `n` labeled examples.
    pub fn examples(&mut self, n: usize) -> Vec<LabeledExample> {
        (0..n).map(|_| self.example()).collect()
    }
}
