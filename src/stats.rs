use core::f64::consts::PI;
use core::ops::Range;

use crate::dataset::Dataset;
use crate::dimension::DimensionError;
use crate::polar::x_y_to_zeta_eta;

/// Sum of the amplitudes times the cell volume `prod |increment|`.
pub fn integral(data: &Dataset) -> f64 {
    let volume: f64 = data.dimensions().iter().map(|d| d.increment.abs()).product();
    data.sum() * volume
}

/// Amplitude-weighted mean coordinate along every dimension.
///
/// NaN when the amplitudes sum to zero.
pub fn mean(data: &Dataset) -> Vec<f64> {
    let total = data.sum();
    let mut sums = vec![0.0; data.dimensions().len()];
    let mut index = vec![0; sums.len()];
    for (flat, &value) in data.values().iter().enumerate() {
        if value == 0.0 {
            continue;
        }
        data.unravel(flat, &mut index);
        for ((sum, dim), &i) in sums.iter_mut().zip(data.dimensions()).zip(&index) {
            *sum += value * dim.coordinate(i);
        }
    }
    sums.into_iter().map(|s| s / total).collect()
}

/// Amplitude-weighted standard deviation along every dimension.
pub fn std(data: &Dataset) -> Vec<f64> {
    let total = data.sum();
    let centre = mean(data);
    let mut sums = vec![0.0; centre.len()];
    let mut index = vec![0; centre.len()];
    for (flat, &value) in data.values().iter().enumerate() {
        if value == 0.0 {
            continue;
        }
        data.unravel(flat, &mut index);
        for (((sum, dim), &i), &mu) in sums.iter_mut().zip(data.dimensions()).zip(&index).zip(&centre) {
            *sum += value * (dim.coordinate(i) - mu).powi(2);
        }
    }
    sums.into_iter().map(|s| (s / total).sqrt()).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionStatistics {
    pub integral: f64,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

/// Integral, mean and standard deviation over half-open index ranges.
pub fn region_statistics(
    data: &Dataset,
    ranges: &[Range<usize>],
) -> Result<RegionStatistics, DimensionError> {
    let region = data.region(ranges)?;
    Ok(RegionStatistics {
        integral: integral(&region),
        mean: mean(&region),
        std: std(&region),
    })
}

/// `(zeta, eta)` mean and first-order standard deviation from `x`-`y` moments.
///
/// Returns `((zeta_mean, eta_mean), (zeta_std, eta_std))`.
pub fn zeta_eta_moments(mean_xy: (f64, f64), std_xy: (f64, f64)) -> ((f64, f64), (f64, f64)) {
    let (mx, my) = mean_xy;
    let (sx, sy) = std_xy;
    let r2 = mx * mx + my * my;
    let zeta_std = (((sx * mx).powi(2) + (sy * my).powi(2)) / r2).sqrt();
    let eta_std = 4.0 / PI * (((sy * mx).powi(2) + (sx * my).powi(2)) / (r2 * r2)).sqrt();
    (x_y_to_zeta_eta(mx, my), (zeta_std, eta_std))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::{Dimension, Unit};

    fn peak() -> Dataset {
        let x = Dimension::new(5, 2.0, Unit::Ppm).unwrap();
        let y = Dimension::new(3, 0.5, Unit::Ppm).unwrap().with_offset(1.0);
        let mut values = vec![0.0; 15];
        values[1 + 5] = 1.0; // x = 2, y = 1.5
        values[3 + 5] = 1.0; // x = 6, y = 1.5
        Dataset::new(vec![x, y], values).unwrap()
    }

    #[test]
    fn moments_of_two_points() {
        let data = peak();
        assert!((integral(&data) - 2.0).abs() < 1e-12);
        assert_eq!(mean(&data), vec![4.0, 1.5]);
        assert_eq!(std(&data), vec![2.0, 0.0]);
    }

    #[test]
    fn complementary_regions_add_up() {
        let data = peak();
        let left = region_statistics(&data, &[0..2, 0..3]).unwrap();
        let right = region_statistics(&data, &[2..5, 0..3]).unwrap();
        assert!((left.integral + right.integral - integral(&data)).abs() < 1e-12);
        assert_eq!(left.mean, vec![2.0, 1.5]);
        assert!(region_statistics(&data, &[0..6, 0..3]).is_err());
    }

    #[test]
    fn zero_amplitude_has_undefined_mean() {
        let x = Dimension::new(3, 1.0, Unit::Hertz).unwrap();
        let data = Dataset::new(vec![x], vec![0.0; 3]).unwrap();
        assert!(mean(&data)[0].is_nan());
    }

    #[test]
    fn zeta_eta_moments_on_axis() {
        let ((zeta, eta), (zeta_std, eta_std)) = zeta_eta_moments((0.0, 10.0), (1.0, 2.0));
        assert_eq!((zeta, eta), (10.0, 0.0));
        assert!((zeta_std - 2.0).abs() < 1e-12);
        assert!((eta_std - 4.0 / PI * 0.1).abs() < 1e-12);
    }
}
