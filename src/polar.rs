use core::f64::consts::PI;

use crate::dataset::Dataset;
use crate::dimension::{Dimension, DimensionError};

/// Haeberlen `(zeta, eta)` of a point on the `x`-`y` grid.
///
/// `zeta` is negative when `|x| > |y|`. Points with `|x| == |y|` (including
/// the origin) have `eta = 1`.
pub fn x_y_to_zeta_eta(x: f64, y: f64) -> (f64, f64) {
    let (x, y) = (x.abs(), y.abs());
    let radius = x.hypot(y);
    if x > y {
        (-radius, 4.0 / PI * (y / x).atan())
    } else if x < y {
        (radius, 4.0 / PI * (x / y).atan())
    } else {
        (radius, 1.0)
    }
}

/// Inverse of [`x_y_to_zeta_eta`] on the first quadrant.
pub fn zeta_eta_to_x_y(zeta: f64, eta: f64) -> (f64, f64) {
    let theta = PI * eta / 4.0;
    if zeta >= 0.0 {
        (zeta * theta.sin(), zeta * theta.cos())
    } else {
        (-zeta * theta.cos(), -zeta * theta.sin())
    }
}

/// A re-binned distribution and the amplitude that missed the target grid.
#[derive(Debug, Clone)]
pub struct Rebinned {
    pub data: Dataset,
    pub outside: f64,
}

/// Moves an `x`-`y` distribution onto a `zeta`-`eta` grid.
///
/// Dimensions after the first two are carried through unchanged.
pub fn rebin_to_zeta_eta(
    distribution: &Dataset,
    zeta: &Dimension,
    eta: &Dimension,
    supersampling: usize,
) -> Result<Rebinned, DimensionError> {
    rebin(distribution, zeta, eta, supersampling, x_y_to_zeta_eta)
}

/// Moves a `zeta`-`eta` distribution back onto an `x`-`y` grid.
pub fn rebin_to_x_y(
    distribution: &Dataset,
    x: &Dimension,
    y: &Dimension,
    supersampling: usize,
) -> Result<Rebinned, DimensionError> {
    rebin(distribution, x, y, supersampling, zeta_eta_to_x_y)
}

fn rebin(
    source: &Dataset,
    first: &Dimension,
    second: &Dimension,
    supersampling: usize,
    map: fn(f64, f64) -> (f64, f64),
) -> Result<Rebinned, DimensionError> {
    let dims = source.dimensions();
    if dims.len() < 2 {
        return Err(DimensionError::Rank {
            expected: 2,
            actual: dims.len(),
        });
    }
    first.validate()?;
    second.validate()?;
    if supersampling == 0 {
        return Err(DimensionError::ZeroSupersampling);
    }

    let factor = supersampling;
    let weight = 1.0 / (factor * factor) as f64;
    let (n0, n1) = (dims[0].count, dims[1].count);
    let source_plane = n0 * n1;
    let target_plane = first.count * second.count;
    let planes = source.len() / source_plane;
    let fine0 = dims[0].supersampled_coordinates(factor);
    let fine1 = dims[1].supersampled_coordinates(factor);

    let mut dimensions = vec![first.clone(), second.clone()];
    dimensions.extend_from_slice(&dims[2..]);
    let mut values = vec![0.0; target_plane * planes];
    let mut outside = 0.0;
    let mut targets: Vec<Option<usize>> = Vec::with_capacity(factor * factor);

    for j in 0..n1 {
        for i in 0..n0 {
            targets.clear();
            for b in 0..factor {
                for a in 0..factor {
                    let (u, v) = map(fine0[i * factor + a], fine1[j * factor + b]);
                    let cell = first
                        .nearest_index(u)
                        .zip(second.nearest_index(v))
                        .map(|(p, q)| p + first.count * q);
                    targets.push(cell);
                }
            }
            for plane in 0..planes {
                let value = source.values()[i + n0 * j + source_plane * plane];
                if value == 0.0 {
                    continue;
                }
                let share = value * weight;
                for target in &targets {
                    match target {
                        Some(cell) => values[cell + target_plane * plane] += share,
                        None => outside += share,
                    }
                }
            }
        }
    }

    let data = Dataset::new(dimensions, values)?.with_description(source.description.clone());
    Ok(Rebinned { data, outside })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::Unit;

    #[test]
    fn haeberlen_convention() {
        let (zeta, eta) = x_y_to_zeta_eta(4.0, 0.0);
        assert_eq!((zeta, eta), (-4.0, 0.0));
        let (zeta, eta) = x_y_to_zeta_eta(0.0, 3.0);
        assert_eq!((zeta, eta), (3.0, 0.0));
        let (zeta, eta) = x_y_to_zeta_eta(2.0, 2.0);
        assert!((zeta - 8f64.sqrt()).abs() < 1e-12);
        assert_eq!(eta, 1.0);
        assert_eq!(x_y_to_zeta_eta(0.0, 0.0), (0.0, 1.0));
        let (_, eta) = x_y_to_zeta_eta(-1.0, 3f64.sqrt());
        assert!((eta - 4.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn conversion_inverts_on_first_quadrant() {
        for &(x, y) in &[(1.0, 3.0), (5.0, 2.0), (0.5, 0.5), (0.0, 7.0)] {
            let (zeta, eta) = x_y_to_zeta_eta(x, y);
            let (bx, by) = zeta_eta_to_x_y(zeta, eta);
            assert!((bx - x).abs() < 1e-12 && (by - y).abs() < 1e-12, "{x},{y}");
        }
    }

    #[test]
    fn rebin_conserves_amplitude_per_plane() {
        let x = Dimension::new(6, 1.0, Unit::Ppm).unwrap();
        let y = Dimension::new(6, 1.0, Unit::Ppm).unwrap();
        let iso = Dimension::new(2, 1.0, Unit::Ppm).unwrap();
        let values: Vec<f64> = (0..72).map(|k| (k % 7) as f64).collect();
        let source = Dataset::new(vec![x, y, iso.clone()], values).unwrap();

        let zeta = Dimension::new(9, 1.0, Unit::Ppm).unwrap().with_offset(-4.0);
        let eta = Dimension::new(5, 0.25, Unit::Ppm).unwrap();
        let out = rebin_to_zeta_eta(&source, &zeta, &eta, 3).unwrap();
        assert_eq!(out.data.shape(), vec![9, 5, 2]);
        assert_eq!(out.data.dimensions()[2], iso);
        assert!(out.outside > 0.0);
        assert!((out.data.sum() + out.outside - source.sum()).abs() < 1e-9);
    }

    #[test]
    fn rejects_one_dimensional_source() {
        let t = Dimension::new(4, 1.0, Unit::Second).unwrap();
        let source = Dataset::new(vec![t.clone()], vec![1.0; 4]).unwrap();
        assert!(matches!(
            rebin_to_x_y(&source, &t, &t, 1),
            Err(DimensionError::Rank { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn rejects_zero_supersampling() {
        let x = Dimension::new(3, 1.0, Unit::Ppm).unwrap();
        let source = Dataset::new(vec![x.clone(), x.clone()], vec![1.0; 9]).unwrap();
        assert!(matches!(
            rebin_to_zeta_eta(&source, &x, &x, 0),
            Err(DimensionError::ZeroSupersampling)
        ));
        assert!(rebin_to_zeta_eta(&source, &x, &x, 1).is_ok());
    }
}
