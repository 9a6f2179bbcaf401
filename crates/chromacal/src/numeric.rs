//! Small numerical helpers shared across stages.

use ndarray::ArrayView2;

/// Golden-section search for the minimum of `f` on `[a, b]`.
///
/// Returns `(x_min, f_min)`.
pub(crate) fn golden_section_minimize(
    mut f: impl FnMut(f64) -> f64,
    mut a: f64,
    mut b: f64,
    max_evals: usize,
) -> (f64, f64) {
    const INV_PHI: f64 = 0.618_033_988_749_895;
    let mut x1 = b - INV_PHI * (b - a);
    let mut x2 = a + INV_PHI * (b - a);
    let mut f1 = f(x1);
    let mut f2 = f(x2);
    let mut evals = 2;
    while evals < max_evals && (b - a).abs() > 1e-12 * (1.0 + a.abs() + b.abs()) {
        if f1 < f2 {
            b = x2;
            x2 = x1;
            f2 = f1;
            x1 = b - INV_PHI * (b - a);
            f1 = f(x1);
        } else {
            a = x1;
            x1 = x2;
            f1 = f2;
            x2 = a + INV_PHI * (b - a);
            f2 = f(x2);
        }
        evals += 1;
    }
    if f1 < f2 {
        (x1, f1)
    } else {
        (x2, f2)
    }
}

/// Bilinear interpolation weights for sampling a `width x height` grid at
/// `(x, y)`.
///
/// Returns up to four `(flat_index, weight)` pairs with `flat_index = row *
/// width + col`. Taps that fall outside the grid are dropped, so the weights
/// of a sample near the border may sum to less than one. Samples more than
/// one pixel outside the grid yield no taps.
pub(crate) fn bilinear_taps(x: f64, y: f64, width: usize, height: usize) -> Vec<(usize, f64)> {
    let mut taps = Vec::with_capacity(4);
    if !x.is_finite() || !y.is_finite() {
        return taps;
    }
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let corners = [
        (x0, y0, (1.0 - fx) * (1.0 - fy)),
        (x0 + 1.0, y0, fx * (1.0 - fy)),
        (x0, y0 + 1.0, (1.0 - fx) * fy),
        (x0 + 1.0, y0 + 1.0, fx * fy),
    ];
    for (cx, cy, w) in corners {
        if w <= 0.0 || cx < 0.0 || cy < 0.0 {
            continue;
        }
        let (col, row) = (cx as usize, cy as usize);
        if col >= width || row >= height {
            continue;
        }
        taps.push((row * width + col, w));
    }
    taps
}

/// Bilinear sample of `plane` at `(x, y)` with border clamping.
pub(crate) fn bilinear_clamped(plane: &ArrayView2<f64>, x: f64, y: f64) -> f64 {
    let (height, width) = plane.dim();
    if width == 0 || height == 0 {
        return 0.0;
    }
    let x = x.clamp(0.0, (width - 1) as f64);
    let y = y.clamp(0.0, (height - 1) as f64);
    let c0 = x.floor() as usize;
    let r0 = y.floor() as usize;
    let c1 = (c0 + 1).min(width - 1);
    let r1 = (r0 + 1).min(height - 1);
    let fx = x - c0 as f64;
    let fy = y - r0 as f64;
    let top = plane[[r0, c0]] * (1.0 - fx) + plane[[r0, c1]] * fx;
    let bottom = plane[[r1, c0]] * (1.0 - fx) + plane[[r1, c1]] * fx;
    top * (1.0 - fy) + bottom * fy
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub(crate) fn norm2(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn golden_section_finds_parabola_minimum() {
        let (x, fx) = golden_section_minimize(|x| (x - 1.25).powi(2) + 3.0, -4.0, 6.0, 80);
        assert_relative_eq!(x, 1.25, epsilon = 1e-6);
        assert_relative_eq!(fx, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn bilinear_taps_interior_sum_to_one() {
        let taps = bilinear_taps(2.25, 1.5, 5, 4);
        assert_eq!(taps.len(), 4);
        let total: f64 = taps.iter().map(|t| t.1).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);
        assert!(taps.iter().any(|&(i, _)| i == 5 + 2));
    }

    #[test]
    fn bilinear_taps_integer_position_is_single_tap() {
        let taps = bilinear_taps(3.0, 2.0, 5, 4);
        assert_eq!(taps, vec![(2 * 5 + 3, 1.0)]);
    }

    #[test]
    fn bilinear_taps_outside_grid_are_dropped() {
        assert!(bilinear_taps(-1.5, 0.0, 5, 4).is_empty());
        let taps = bilinear_taps(4.5, 0.0, 5, 4);
        assert_eq!(taps.len(), 1);
        assert_relative_eq!(taps[0].1, 0.5);
    }

    #[test]
    fn bilinear_clamped_matches_linear_ramp() {
        let plane = array![[0.0, 1.0, 2.0], [10.0, 11.0, 12.0]];
        let v = bilinear_clamped(&plane.view(), 1.5, 0.5);
        assert_relative_eq!(v, 6.5, epsilon = 1e-12);
        let clamped = bilinear_clamped(&plane.view(), 10.0, -3.0);
        assert_relative_eq!(clamped, 2.0, epsilon = 1e-12);
    }
}
