//! Selection weights and sampling for the episode engine.

/// Unnormalized softmin weights over edge costs.
///
/// `w_i = exp(-(q_i - q_min) / temperature)`. Shifting by the minimum keeps
/// the best edge at weight 1 so nothing underflows to an all-zero vector. A
/// non-positive temperature is greedy: the first minimal cost gets weight 1
/// and everything else 0.
pub fn cost_weights(costs: &[f64], temperature: f64) -> Vec<f64> {
    let Some(q_min) = costs.iter().copied().reduce(f64::min) else {
        return Vec::new();
    };

    if temperature <= 0.0 {
        let best = costs.iter().position(|&q| q == q_min).unwrap_or(0);
        return (0..costs.len()).map(|i| if i == best { 1.0 } else { 0.0 }).collect();
    }

    costs
        .iter()
        .map(|&q| (-(q - q_min) / temperature).exp())
        .collect()
}

/// `cost_weights` scaled to sum to 1.
pub fn selection_probabilities(costs: &[f64], temperature: f64) -> Vec<f64> {
    let mut weights = cost_weights(costs, temperature);
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        for w in weights.iter_mut() {
            *w /= total;
        }
    }
    weights
}

/// Sample an index proportionally to `weights`.
///
/// # Arguments
/// * `weights` - Non-negative, not necessarily normalized
/// * `rand_val` - Random value in [0, 1)
pub fn sample_weighted(weights: &[f64], rand_val: f64) -> usize {
    let total: f64 = weights.iter().sum();
    let target = rand_val * total;
    let mut cumsum = 0.0;
    for (i, &w) in weights.iter().enumerate() {
        cumsum += w;
        if target < cumsum {
            return i;
        }
    }
    // Rounding can leave `target` at the very top; take the last live weight.
    weights
        .iter()
        .rposition(|&w| w > 0.0)
        .unwrap_or_else(|| weights.len().saturating_sub(1))
}
