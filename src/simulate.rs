//! Census-shaped synthetic records whose marital status follows a known
//! multinomial logit in age and sex. Other attributes carry no signal.

use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand::rngs::StdRng;

use crate::csv_reader::Record;

pub const WORKCLASS: &[(&str, f64)] = &[
    ("Federal-gov", 0.05),
    ("Local-gov", 0.08),
    ("Private", 0.70),
    ("Self-emp", 0.11),
    ("State-gov", 0.06),
];

pub const EDUCATION: &[(&str, f64)] = &[
    ("Bachelors", 0.20),
    ("Doctorate", 0.03),
    ("HS-grad", 0.38),
    ("Masters", 0.09),
    ("Some-college", 0.30),
];

pub const RACE: &[(&str, f64)] = &[
    ("Asian-Pac-Islander", 0.06),
    ("Black", 0.12),
    ("Other", 0.05),
    ("White", 0.77),
];

pub const SEX: &[(&str, f64)] = &[("Female", 0.48), ("Male", 0.52)];

pub const MARITAL_REFERENCE: &str = "Never-married";

/// Log-odds against `Never-married`: intercept, age slope, male shift.
pub const MARITAL_LOGITS: &[(&str, [f64; 3])] = &[
    ("Divorced", [-3.0, 0.04, 0.0]),
    ("Married", [-2.0, 0.05, 0.3]),
    ("Widowed", [-8.0, 0.10, -0.8]),
];

fn draw<'a, R: Rng>(rng: &mut R, table: &[(&'a str, f64)]) -> &'a str {
    // weights are compile-time constants, so the distribution is always valid
    match WeightedIndex::new(table.iter().map(|(_, w)| *w)) {
        Ok(dist) => table[dist.sample(rng)].0,
        Err(_) => table[0].0,
    }
}

fn marital_status<R: Rng>(rng: &mut R, age: f64, male: bool) -> &'static str {
    let sex = if male { 1.0 } else { 0.0 };
    let mut labels = vec![MARITAL_REFERENCE];
    let mut weights = vec![1.0];
    for (label, [b0, b_age, b_male]) in MARITAL_LOGITS {
        labels.push(*label);
        weights.push((b0 + b_age * age + b_male * sex).exp());
    }
    match WeightedIndex::new(&weights) {
        Ok(dist) => labels[dist.sample(rng)],
        Err(_) => MARITAL_REFERENCE,
    }
}

pub fn generate(n: usize, seed: u64) -> Vec<Record> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let age = rng.gen_range(18..=85) as f64;
            let sex = draw(&mut rng, SEX);
            let maritalstatus = marital_status(&mut rng, age, sex == "Male");
            Record {
                age,
                workclass: draw(&mut rng, WORKCLASS).to_string(),
                education: draw(&mut rng, EDUCATION).to_string(),
                race: draw(&mut rng, RACE).to_string(),
                sex: sex.to_string(),
                maritalstatus: maritalstatus.to_string(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn same_seed_same_records() {
        assert_eq!(generate(50, 3), generate(50, 3));
        assert_ne!(generate(50, 3), generate(50, 4));
    }

    #[test]
    fn every_level_appears_in_a_moderate_sample() {
        let records = generate(1500, 11);
        let statuses = records
            .iter()
            .map(|r| r.maritalstatus.as_str())
            .collect::<HashSet<_>>();
        assert_eq!(statuses.len(), 4);
        let races = records.iter().map(|r| r.race.as_str()).collect::<HashSet<_>>();
        assert_eq!(races.len(), RACE.len());
        assert!(records.iter().all(|r| (18.0..=85.0).contains(&r.age)));
    }
}
