use std::f64::consts::PI;
use std::sync::Arc;

use faer_core::Mat;
use rayon::prelude::*;
use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftPlanner};

use super::wigner::{big_d2, d2};
use super::{average_supersampled, AcquisitionParams, KernelError, MAGIC_ANGLE};
use crate::dataset::Dataset;
use crate::dimension::{Dimension, DimensionError, InverseGrid};
use crate::isotope::Isotope;
use crate::polar::x_y_to_zeta_eta;

/// Pure anisotropic nuclear shielding line-shape kernel over an `x`-`y` grid.
///
/// Each feature is a shielding tensor with anisotropy `zeta` and asymmetry `eta`
/// derived from its `(x, y)` coordinate. Its column is the powder-averaged
/// sideband pattern of that tensor spinning at `rotor_angle`, binned onto the
/// anisotropic dimension. The isotropic shift is zero.
#[derive(Debug, Clone)]
pub struct NuclearShieldingKernel {
    direct: Dimension,
    grid: Vec<Dimension>,
    params: AcquisitionParams,
}

impl NuclearShieldingKernel {
    /// Validates units and acquisition parameters. Frequencies in ppm are
    /// converted to hertz with the isotope's Larmor frequency.
    pub fn new(
        anisotropic_dimension: &Dimension,
        grid: &InverseGrid,
        params: AcquisitionParams,
    ) -> Result<Self, KernelError> {
        params.validate()?;
        anisotropic_dimension.validate()?;
        if !anisotropic_dimension.unit.is_frequency() {
            return Err(KernelError::DirectUnit {
                expected: "frequency",
                found: anisotropic_dimension.unit,
            });
        }
        let dims = grid.dimensions();
        if dims.len() != 2 {
            return Err(KernelError::InverseRank {
                expected: 2,
                actual: dims.len(),
            });
        }
        for (axis, dim) in dims.iter().enumerate() {
            if !dim.unit.is_frequency() {
                return Err(KernelError::InverseUnit {
                    axis,
                    expected: "frequency",
                    found: dim.unit,
                });
            }
        }

        let larmor = params.larmor_frequency();
        Ok(Self {
            direct: anisotropic_dimension.to_hertz(larmor),
            grid: dims.iter().map(|d| d.to_hertz(larmor)).collect(),
            params,
        })
    }

    /// Uses dimension 0 of `spectrum` as the anisotropic dimension.
    ///
    /// Axis order is judged by unit only: a time axis in front of a frequency
    /// axis is rejected with [`DimensionError::AxisOrder`]. When every axis is a
    /// frequency (for example a 2D isotropic-anisotropic spectrum stored
    /// transposed) the order cannot be told apart and dimension 0 is used as is.
    pub fn from_spectrum(
        spectrum: &Dataset,
        grid: &InverseGrid,
        params: AcquisitionParams,
    ) -> Result<Self, KernelError> {
        let dims = spectrum.dimensions();
        if !dims[0].unit.is_frequency() {
            if let Some(found) = dims.iter().position(|d| d.unit.is_frequency()) {
                return Err(KernelError::Dimension(DimensionError::AxisOrder { found }));
            }
        }
        Self::new(&dims[0], grid, params)
    }

    /// Magic-angle flipping: infinite-speed spectrum spinning at 90 degrees.
    pub fn maf(
        anisotropic_dimension: &Dimension,
        grid: &InverseGrid,
        isotope: &str,
        magnetic_flux_density: f64,
    ) -> Result<Self, KernelError> {
        let params = AcquisitionParams {
            isotope: isotope.parse::<Isotope>()?,
            magnetic_flux_density,
            rotor_angle: 0.5 * PI,
            rotor_frequency: 200e9,
            number_of_sidebands: 1,
            ..AcquisitionParams::default()
        };
        Self::new(anisotropic_dimension, grid, params)
    }

    /// Sideband separation at the magic angle. The spin rate is the increment
    /// of the anisotropic dimension and every point is a sideband order.
    pub fn spinning_sidebands(
        anisotropic_dimension: &Dimension,
        grid: &InverseGrid,
        isotope: &str,
        magnetic_flux_density: f64,
    ) -> Result<Self, KernelError> {
        let isotope = isotope.parse::<Isotope>()?;
        let larmor = isotope.larmor_frequency(magnetic_flux_density);
        let direct = anisotropic_dimension.to_hertz(larmor);
        let params = AcquisitionParams {
            isotope,
            magnetic_flux_density,
            rotor_angle: MAGIC_ANGLE,
            rotor_frequency: direct.increment.abs(),
            number_of_sidebands: anisotropic_dimension.count,
            ..AcquisitionParams::default()
        };
        Self::new(anisotropic_dimension, grid, params)
    }

    pub fn params(&self) -> &AcquisitionParams {
        &self.params
    }

    pub fn direct_dimension(&self) -> &Dimension {
        &self.direct
    }

    /// Evaluates the kernel, averaging `supersampling^2` sub-cells per feature.
    pub fn kernel(&self, supersampling: usize) -> Result<Mat<f64>, KernelError> {
        if supersampling == 0 {
            return Err(KernelError::ZeroSupersampling);
        }
        let xs = self.grid[0].supersampled_coordinates(supersampling);
        let ys = self.grid[1].supersampled_coordinates(supersampling);
        let rows = self.direct.count;
        let nx = xs.len();

        let simulator = SidebandSimulator::new(&self.params, &self.direct);
        let n = simulator.n_sidebands;
        let mut fine = vec![0.0; rows * nx * ys.len()];
        fine.par_chunks_mut(rows).enumerate().for_each_init(
            || vec![Complex64::new(0.0, 0.0); n],
            |buffer, (col, out)| {
                let (zeta, eta) = x_y_to_zeta_eta(xs[col % nx], ys[col / nx]);
                simulator.line_shape(zeta, eta, buffer, out);
            },
        );

        let shape = [self.grid[0].count, self.grid[1].count];
        let coarse = average_supersampled(&fine, rows, &shape, supersampling);
        let n_features = shape[0] * shape[1];
        log::debug!(
            "line-shape kernel: {rows}x{n_features} (supersampling {supersampling}, {} orientations, {n} sidebands)",
            simulator.orientations.len()
        );
        Ok(Mat::from_fn(rows, n_features, |i, j| coarse[j * rows + i]))
    }
}

/// Rotor-frame tensor components of one crystallite, per unit anisotropy.
struct Orientation {
    weight: f64,
    // R_{2,m} = zeta * (isotropic[m] + eta * asymmetric[m]), indexed by m + 2.
    isotropic: [Complex64; 5],
    asymmetric: [Complex64; 5],
}

const SIDEBAND_ORDERS: [i32; 4] = [-2, -1, 1, 2];

struct SidebandSimulator<'a> {
    orientations: Vec<Orientation>,
    // sqrt(2/3) d^2_{m,0}(rotor_angle), indexed by m + 2.
    lab: [f64; 5],
    // (1 - exp(-i m 2 pi p / n)) / (i m nu_r) per time point, per nonzero m.
    phase_factors: Vec<[Complex64; 4]>,
    rotor_frequency: f64,
    n_sidebands: usize,
    direct: &'a Dimension,
    fft: Arc<dyn Fft<f64>>,
}

impl<'a> SidebandSimulator<'a> {
    fn new(params: &AcquisitionParams, direct: &'a Dimension) -> Self {
        let density = params.integration_density;
        let mut orientations = Vec::with_capacity(density * density);
        let mut total = 0.0;
        for ib in 0..density {
            let beta = (ib as f64 + 0.5) * PI / density as f64;
            let weight = beta.sin();
            for ia in 0..density {
                let alpha = (ia as f64 + 0.5) * PI / density as f64;
                let mut isotropic = [Complex64::new(0.0, 0.0); 5];
                let mut asymmetric = [Complex64::new(0.0, 0.0); 5];
                for m in -2..=2 {
                    let slot = (m + 2) as usize;
                    isotropic[slot] = big_d2(0, m, alpha, beta) * (1.5f64).sqrt();
                    asymmetric[slot] = (big_d2(2, m, alpha, beta) + big_d2(-2, m, alpha, beta)) * -0.5;
                }
                orientations.push(Orientation {
                    weight,
                    isotropic,
                    asymmetric,
                });
                total += weight;
            }
        }
        for o in &mut orientations {
            o.weight /= total;
        }

        let mut lab = [0.0; 5];
        for m in -2..=2 {
            lab[(m + 2) as usize] = (2.0f64 / 3.0).sqrt() * d2(m, 0, params.rotor_angle);
        }

        let n = params.number_of_sidebands;
        let nu_r = params.rotor_frequency;
        let phase_factors = (0..n)
            .map(|p| {
                let mut row = [Complex64::new(0.0, 0.0); 4];
                for (slot, &m) in row.iter_mut().zip(&SIDEBAND_ORDERS) {
                    let angle = -(m as f64) * 2.0 * PI * p as f64 / n as f64;
                    let rotation = Complex64::from_polar(1.0, angle);
                    let denom = Complex64::new(0.0, m as f64 * nu_r);
                    *slot = (Complex64::new(1.0, 0.0) - rotation) / denom;
                }
                row
            })
            .collect();

        let fft = FftPlanner::<f64>::new().plan_fft_forward(n);
        Self {
            orientations,
            lab,
            phase_factors,
            rotor_frequency: nu_r,
            n_sidebands: n,
            direct,
            fft,
        }
    }

    fn line_shape(&self, zeta: f64, eta: f64, buffer: &mut [Complex64], out: &mut [f64]) {
        out.fill(0.0);
        let n = self.n_sidebands;
        let norm = 1.0 / (n * n) as f64;
        for o in &self.orientations {
            let mut c = [Complex64::new(0.0, 0.0); 5];
            for (slot, value) in c.iter_mut().enumerate() {
                *value = (o.isotropic[slot] + o.asymmetric[slot] * eta) * (zeta * self.lab[slot]);
            }
            let centre = c[2].re;

            for (p, value) in buffer.iter_mut().enumerate() {
                let factors = &self.phase_factors[p];
                let mut phase = 0.0;
                for (k, &m) in SIDEBAND_ORDERS.iter().enumerate() {
                    phase += (c[(m + 2) as usize] * factors[k]).re;
                }
                *value = Complex64::from_polar(1.0, phase);
            }
            self.fft.process(buffer);

            for (q, value) in buffer.iter().enumerate() {
                let order = if q < (n + 1) / 2 {
                    q as f64
                } else {
                    q as f64 - n as f64
                };
                let frequency = centre + order * self.rotor_frequency;
                deposit(out, self.direct, frequency, value.norm_sqr() * norm * o.weight);
            }
        }
    }
}

/// Adds `amount` at `frequency` by linear interpolation between the two nearest points.
fn deposit(out: &mut [f64], dim: &Dimension, frequency: f64, amount: f64) {
    let pos = (frequency - dim.coordinates_offset) / dim.increment;
    if !pos.is_finite() {
        return;
    }
    let lower = pos.floor();
    let frac = pos - lower;
    let lower = lower as i64;
    let count = out.len() as i64;
    if (0..count).contains(&lower) {
        out[lower as usize] += (1.0 - frac) * amount;
    }
    if (0..count).contains(&(lower + 1)) {
        out[(lower + 1) as usize] += frac * amount;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::Unit;

    fn grid(count: usize, increment: f64) -> InverseGrid {
        let x = Dimension::new(count, increment, Unit::Hertz).unwrap().with_label("x");
        let y = Dimension::new(count, increment, Unit::Hertz).unwrap().with_label("y");
        InverseGrid::xy(x, y).unwrap()
    }

    fn direct(count: usize, increment: f64) -> Dimension {
        Dimension::new(count, increment, Unit::Hertz)
            .unwrap()
            .with_offset(-(count as f64 / 2.0) * increment)
    }

    #[test]
    fn columns_sum_to_one_inside_window() {
        // Sidebands land on -8 kHz..6 kHz, well inside the +-16 kHz window.
        let params = AcquisitionParams {
            rotor_frequency: 2000.0,
            number_of_sidebands: 8,
            integration_density: 8,
            ..AcquisitionParams::default()
        };
        let builder =
            NuclearShieldingKernel::new(&direct(64, 500.0), &grid(4, 1000.0), params).unwrap();
        let k = builder.kernel(1).unwrap();
        assert_eq!((k.nrows(), k.ncols()), (64, 16));
        for j in 0..k.ncols() {
            let sum: f64 = (0..k.nrows()).map(|i| k.read(i, j)).sum();
            assert!((sum - 1.0).abs() < 1e-9, "column {j} sums to {sum}");
            assert!((0..k.nrows()).all(|i| k.read(i, j) >= 0.0));
        }
    }

    #[test]
    fn magic_angle_without_sidebands_collapses_to_centre() {
        let params = AcquisitionParams {
            integration_density: 6,
            number_of_sidebands: 1,
            ..AcquisitionParams::default()
        };
        let builder =
            NuclearShieldingKernel::new(&direct(16, 100.0), &grid(3, 2000.0), params).unwrap();
        let k = builder.kernel(1).unwrap();
        for j in 0..k.ncols() {
            assert!((k.read(8, j) - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn maf_static_pattern_spans_scaled_anisotropy() {
        // zeta = -4000 Hz (x > y), eta = 0: MAF scales the static pattern by -1/2,
        // so intensity lies within [-1000, 2000] Hz.
        let x = Dimension::new(1, 1.0, Unit::Hertz).unwrap().with_offset(4000.0);
        let y = Dimension::new(1, 1.0, Unit::Hertz).unwrap();
        let grid = InverseGrid::xy(x, y).unwrap();
        let direct = direct(64, 100.0);
        let mut builder = NuclearShieldingKernel::maf(&direct, &grid, "29Si", 9.4).unwrap();
        builder.params.integration_density = 16;
        let k = builder.kernel(1).unwrap();
        for i in 0..64 {
            let freq = direct.coordinate(i);
            if !(-1100.0..=2100.0).contains(&freq) {
                assert!(k.read(i, 0).abs() < 1e-12, "intensity at {freq} Hz");
            }
        }
    }

    #[test]
    fn rejects_time_direct_dimension() {
        let time = Dimension::new(8, 1e-3, Unit::Second).unwrap();
        let err =
            NuclearShieldingKernel::new(&time, &grid(2, 100.0), AcquisitionParams::default())
                .unwrap_err();
        assert!(matches!(err, KernelError::DirectUnit { .. }));
    }

    #[test]
    fn spectrum_with_time_axis_first_is_out_of_order() {
        let time = Dimension::new(4, 1e-3, Unit::Second).unwrap();
        let freq = Dimension::new(8, 100.0, Unit::Hertz).unwrap();
        let spectrum = Dataset::new(vec![time, freq], vec![0.0; 32]).unwrap();
        let err = NuclearShieldingKernel::from_spectrum(
            &spectrum,
            &grid(2, 100.0),
            AcquisitionParams::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            KernelError::Dimension(DimensionError::AxisOrder { found: 1 })
        );
    }

    #[test]
    fn all_frequency_spectrum_uses_first_axis() {
        let anisotropic = direct(8, 100.0);
        let isotropic = Dimension::new(4, 50.0, Unit::Hertz).unwrap();
        let spectrum = Dataset::new(vec![isotropic.clone(), anisotropic], vec![0.0; 32]).unwrap();
        let builder = NuclearShieldingKernel::from_spectrum(
            &spectrum,
            &grid(2, 100.0),
            AcquisitionParams::default(),
        )
        .unwrap();
        assert_eq!(builder.direct_dimension(), &isotropic);
    }

    #[test]
    fn sideband_kernel_follows_direct_sampling() {
        // Rotor frequency equals the 1 kHz increment, so every sideband order
        // lands on a direct-dimension point between -8 kHz and 7 kHz.
        let direct = direct(16, 1000.0);
        let mut builder =
            NuclearShieldingKernel::spinning_sidebands(&direct, &grid(3, 200.0), "29Si", 9.4)
                .unwrap();
        assert_eq!(builder.params().rotor_frequency, 1000.0);
        assert_eq!(builder.params().number_of_sidebands, 16);
        assert_eq!(builder.params().rotor_angle, MAGIC_ANGLE);

        builder.params.integration_density = 8;
        let k = builder.kernel(1).unwrap();
        assert_eq!((k.nrows(), k.ncols()), (16, 9));
        for j in 0..k.ncols() {
            let sum: f64 = (0..k.nrows()).map(|i| k.read(i, j)).sum();
            assert!((sum - 1.0).abs() < 1e-9, "column {j} sums to {sum}");
            // Anisotropy below the rotor frequency keeps the centreband dominant.
            let centre = k.read(8, j);
            assert!((0..k.nrows()).all(|i| k.read(i, j) <= centre + 1e-12));
        }
        assert!((k.read(8, 0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_supersampling_is_rejected() {
        let builder = NuclearShieldingKernel::new(
            &direct(8, 100.0),
            &grid(2, 100.0),
            AcquisitionParams::default(),
        )
        .unwrap();
        assert_eq!(builder.kernel(0).unwrap_err(), KernelError::ZeroSupersampling);
    }
}
