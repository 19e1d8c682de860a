use log::warn;
use rand::Rng;

/// Total weight below which a weighted choice is treated as having no
/// signal at all.
pub const UNDERFLOW_EPS: f64 = 1e-256;

/// Picks an index with probability proportional to its weight. With no
/// usable mass, picks uniformly. Never returns a zero-weight index while
/// a positive one exists.
pub fn choose_index<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> usize {
    debug_assert!(!weights.is_empty());
    let total: f64 = weights.iter().sum();
    if !(total >= UNDERFLOW_EPS) {
        warn!(
            "no probability mass among {} candidates, choosing uniformly",
            weights.len()
        );
        return rng.gen_range(0..weights.len());
    }
    let rnd = rng.r#gen::<f64>() * total;
    let mut idx = weights.len() - 1;
    let mut acc = 0.0;
    for (i, w) in weights.iter().enumerate() {
        acc += w;
        if acc > rnd {
            idx = i;
            break;
        }
    }
    while idx > 0 && !(weights[idx] > 0.0) {
        idx -= 1;
    }
    if !(weights[idx] > 0.0) {
        idx = weights.iter().position(|w| *w > 0.0).unwrap_or(idx);
    }
    idx
}

/// Index of the first largest weight.
pub fn argmax(weights: &[f64]) -> usize {
    let mut best = 0;
    for (i, w) in weights.iter().enumerate() {
        if *w > weights[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn never_picks_zero_weight() {
        let mut rng = SmallRng::seed_from_u64(7);
        let weights = [0.0, 0.3, 0.0, 0.0, 0.7, 0.0];
        for _ in 0..2000 {
            let i = choose_index(&weights, &mut rng);
            assert!(i == 1 || i == 4, "picked {i}");
        }
    }

    #[test]
    fn underflow_falls_back_to_uniform() {
        let mut rng = SmallRng::seed_from_u64(11);
        let weights = [0.0; 4];
        let mut seen = [false; 4];
        for _ in 0..400 {
            seen[choose_index(&weights, &mut rng)] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn argmax_prefers_first_maximum() {
        assert_eq!(argmax(&[0.1, 0.5, 0.5, 0.2]), 1);
        assert_eq!(argmax(&[0.0, 0.0]), 0);
    }
}
