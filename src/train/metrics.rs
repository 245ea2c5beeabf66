//! Regression error metrics. All return `None` on empty or mismatched input.

pub fn mae(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    paired(actual, predicted).map(|pairs| {
        pairs.iter().map(|(a, p)| (a - p).abs()).sum::<f64>() / pairs.len() as f64
    })
}

pub fn rmse(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    paired(actual, predicted).map(|pairs| {
        (pairs.iter().map(|(a, p)| (a - p).powi(2)).sum::<f64>() / pairs.len() as f64).sqrt()
    })
}

/// Coefficient of determination. A constant target scores 1.0 when
/// predicted exactly and 0.0 otherwise.
pub fn r2(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    let pairs = paired(actual, predicted)?;
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_res: f64 = pairs.iter().map(|(a, p)| (a - p).powi(2)).sum();
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return Some(if ss_res == 0.0 { 1.0 } else { 0.0 });
    }
    Some(1.0 - ss_res / ss_tot)
}

fn paired(actual: &[f64], predicted: &[f64]) -> Option<Vec<(f64, f64)>> {
    if actual.is_empty() || actual.len() != predicted.len() {
        return None;
    }
    Some(actual.iter().copied().zip(predicted.iter().copied()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        let actual = [3.0, -0.5, 2.0, 7.0];
        let predicted = [2.5, 0.0, 2.0, 8.0];
        assert_eq!(mae(&actual, &predicted), Some(0.5));
        assert!((rmse(&actual, &predicted).unwrap() - 0.612372).abs() < 1e-5);
        assert!((r2(&actual, &predicted).unwrap() - 0.948608).abs() < 1e-5);
    }

    #[test]
    fn test_perfect_and_degenerate() {
        let y = [1.0, 2.0, 3.0];
        assert_eq!(mae(&y, &y), Some(0.0));
        assert_eq!(r2(&y, &y), Some(1.0));
        assert_eq!(r2(&[5.0, 5.0], &[5.0, 5.0]), Some(1.0));
        assert_eq!(r2(&[5.0, 5.0], &[4.0, 6.0]), Some(0.0));
        assert_eq!(mae(&[], &[]), None);
        assert_eq!(rmse(&[1.0], &[1.0, 2.0]), None);
    }
}
