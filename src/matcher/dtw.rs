/// Dynamic time warping distance with Euclidean local cost, divided by the length of
/// the optimal warping path. Empty inputs have infinite distance.
pub fn dtw_distance(a: &[Vec<f32>], b: &[Vec<f32>]) -> f32 {
    if a.is_empty() || b.is_empty() {
        return f32::INFINITY;
    }
    // (accumulated cost, path length) for the previous and current rows.
    let mut prev: Vec<(f32, u32)> = vec![(f32::INFINITY, 0); b.len()];
    let mut curr: Vec<(f32, u32)> = vec![(f32::INFINITY, 0); b.len()];

    for (i, frame_a) in a.iter().enumerate() {
        for (j, frame_b) in b.iter().enumerate() {
            let cost = euclidean(frame_a, frame_b);
            let best = if i == 0 && j == 0 {
                (0.0, 0)
            } else {
                let mut candidates = [(f32::INFINITY, 0u32); 3];
                if i > 0 {
                    candidates[0] = prev[j];
                }
                if j > 0 {
                    candidates[1] = curr[j - 1];
                }
                if i > 0 && j > 0 {
                    candidates[2] = prev[j - 1];
                }
                candidates
                    .into_iter()
                    .min_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)))
                    .unwrap_or((f32::INFINITY, 0))
            };
            curr[j] = (best.0 + cost, best.1 + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    let (total, steps) = prev[b.len() - 1];
    total / steps.max(1) as f32
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(values: &[f32]) -> Vec<Vec<f32>> {
        values.iter().map(|v| vec![*v]).collect()
    }

    #[test]
    fn identical_sequences_have_zero_distance() {
        let a = seq(&[1.0, 2.0, 3.0, 2.0]);
        assert_eq!(dtw_distance(&a, &a), 0.0);
    }

    #[test]
    fn time_stretch_is_absorbed() {
        let a = seq(&[0.0, 1.0, 2.0, 3.0]);
        let b = seq(&[0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
        assert_eq!(dtw_distance(&a, &b), 0.0);
    }

    #[test]
    fn distance_is_normalized_by_path_length() {
        // Every pairing costs 1; the path runs the diagonal of 3 steps.
        let a = seq(&[0.0, 0.0, 0.0]);
        let b = seq(&[1.0, 1.0, 1.0]);
        assert!((dtw_distance(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn empty_input_is_infinite() {
        assert!(dtw_distance(&[], &seq(&[1.0])).is_infinite());
    }
}
