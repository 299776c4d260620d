//! Project Keplerian orbits onto the sky plane and the line of sight.
//!
//! A batch of `N` orbits is evaluated at `T` epochs at once. Every output is an
//! `(N, T)` array: RA and Dec offsets of the body relative to the primary in
//! arcseconds, and the radial velocity of the body in km/s.

use std::f64::consts::PI;

use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayView2, Axis, IxDyn};

use crate::kepler::KeplerSolver;

/// 2π
pub const DPI: f64 = 2.0 * PI;

/// Gaussian gravitational constant k, in AU^(3/2) day^-1 Msun^(-1/2).
pub const GAUSS_GRAV: f64 = 0.01720209895;

/// Astronomical unit in kilometers (IAU 2012)
pub const AU_KM: f64 = 149_597_870.7;

/// Number of seconds in a Julian day
pub const SECONDS_PER_DAY: f64 = 86_400.0;

const AU_PER_DAY_IN_KM_PER_S: f64 = AU_KM / SECONDS_PER_DAY;

/// Number of orbital elements per orbit.
pub const NUM_ELEMENTS: usize = 8;

/// Orbital period in days from Kepler's third law.
///
/// `sma` in AU and `mtot` in solar masses.
#[inline]
pub fn period_days(sma: f64, mtot: f64) -> f64 {
    DPI * (sma.powi(3) / mtot).sqrt() / GAUSS_GRAV
}

/// Separation and position angle (degrees east of north, in `[0, 360)`)
/// from RA/Dec offsets.
#[inline]
pub fn radec_to_seppa(ra: f64, dec: f64) -> (f64, f64) {
    let sep = ra.hypot(dec);
    let pa = ra.atan2(dec).to_degrees().rem_euclid(360.0);
    (sep, pa)
}

/// Orbital elements of a single orbit.
///
/// The field order is the order of the parameter axis everywhere in this
/// crate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitElements {
    /// Semi-major axis [AU]
    pub sma: f64,
    /// Eccentricity, in `[0, 1)`
    pub ecc: f64,
    /// Inclination [rad]
    pub inc: f64,
    /// Argument of periastron [rad]
    pub aop: f64,
    /// Longitude of the ascending node [rad]
    pub pan: f64,
    /// Epoch of periastron passage as a fraction of the period past the
    /// reference epoch, in `[0, 1)`
    pub tau: f64,
    /// Parallax [mas]
    pub plx: f64,
    /// Total system mass [Msun]
    pub mtot: f64,
}

impl OrbitElements {
    pub fn to_array(&self) -> [f64; NUM_ELEMENTS] {
        [
            self.sma, self.ecc, self.inc, self.aop, self.pan, self.tau, self.plx, self.mtot,
        ]
    }

    pub fn period(&self) -> f64 {
        period_days(self.sma, self.mtot)
    }

    /// `(NUM_ELEMENTS, 1)` parameter array for batch functions.
    pub fn to_params(&self) -> Array2<f64> {
        Array1::from_vec(self.to_array().to_vec()).insert_axis(Axis(1))
    }
}

impl From<[f64; NUM_ELEMENTS]> for OrbitElements {
    fn from(value: [f64; NUM_ELEMENTS]) -> Self {
        let [sma, ecc, inc, aop, pan, tau, plx, mtot] = value;
        OrbitElements {
            sma,
            ecc,
            inc,
            aop,
            pan,
            tau,
            plx,
            mtot,
        }
    }
}

/// Borrowed per-element rows of a `(NUM_ELEMENTS, N)` parameter array.
#[derive(Debug, Clone)]
pub struct OrbitBatch<'a> {
    pub sma: ArrayView1<'a, f64>,
    pub ecc: ArrayView1<'a, f64>,
    pub inc: ArrayView1<'a, f64>,
    pub aop: ArrayView1<'a, f64>,
    pub pan: ArrayView1<'a, f64>,
    pub tau: ArrayView1<'a, f64>,
    pub plx: ArrayView1<'a, f64>,
    pub mtot: ArrayView1<'a, f64>,
}

impl<'a> OrbitBatch<'a> {
    /// Split a parameter array with the parameter axis first.
    pub fn from_params(params: ArrayView2<'a, f64>) -> Self {
        assert_eq!(
            params.nrows(),
            NUM_ELEMENTS,
            "orbit parameter arrays must have the parameter axis first"
        );
        OrbitBatch {
            sma: params.index_axis_move(Axis(0), 0),
            ecc: params.index_axis_move(Axis(0), 1),
            inc: params.index_axis_move(Axis(0), 2),
            aop: params.index_axis_move(Axis(0), 3),
            pan: params.index_axis_move(Axis(0), 4),
            tau: params.index_axis_move(Axis(0), 5),
            plx: params.index_axis_move(Axis(0), 6),
            mtot: params.index_axis_move(Axis(0), 7),
        }
    }

    pub fn len(&self) -> usize {
        self.sma.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sma.is_empty()
    }
}

/// Sky-plane offsets and radial velocities, each of shape `(N, T)`.
#[derive(Debug, Clone)]
pub struct Projection {
    /// RA offsets [arcsec]
    pub raoff: Array2<f64>,
    /// Dec offsets [arcsec]
    pub deoff: Array2<f64>,
    /// Radial velocity [km/s]
    pub vz: Array2<f64>,
}

impl Projection {
    /// Drop singleton axes, so a single orbit yields 1-d arrays over epochs
    /// and a single orbit at a single epoch yields 0-d arrays.
    pub fn squeeze(self) -> (ArrayD<f64>, ArrayD<f64>, ArrayD<f64>) {
        (squeeze(self.raoff), squeeze(self.deoff), squeeze(self.vz))
    }
}

fn squeeze(values: Array2<f64>) -> ArrayD<f64> {
    let shape: Vec<usize> = values.shape().iter().copied().filter(|&d| d != 1).collect();
    let flat: Vec<f64> = values.iter().copied().collect();
    ArrayD::from_shape_vec(IxDyn(&shape), flat).expect("squeezing preserves the element count")
}

/// Project a batch of orbits at shared epochs.
///
/// `epochs` are MJD offsets from the reference epoch. `mass` is the mass of the
/// orbiting body in solar masses; zero treats it as a test particle.
pub fn calc_orbit(epochs: ArrayView1<f64>, orbits: &OrbitBatch, mass: f64) -> Projection {
    calc_orbit_grid(
        epochs.insert_axis(Axis(0)),
        orbits,
        mass,
        &KeplerSolver::default(),
    )
}

/// Project a batch of orbits at per-orbit epochs.
///
/// `epochs` has shape `(N, T)`, or `(1, T)` to share the epochs between all
/// orbits.
pub fn calc_orbit_grid(
    epochs: ArrayView2<f64>,
    orbits: &OrbitBatch,
    mass: f64,
    solver: &KeplerSolver,
) -> Projection {
    let n_orbs = orbits.len();
    let n_dates = epochs.ncols();
    assert!(
        epochs.nrows() == 1 || epochs.nrows() == n_orbs,
        "epochs have {} rows, expected 1 or {}",
        epochs.nrows(),
        n_orbs
    );

    let mut mean_motion = Vec::with_capacity(n_orbs);
    let mut manom = Vec::with_capacity(n_orbs * n_dates);
    let mut ecc = Vec::with_capacity(n_orbs * n_dates);

    for i in 0..n_orbs {
        let motion = DPI / period_days(orbits.sma[i], orbits.mtot[i]);
        mean_motion.push(motion);
        let row = if epochs.nrows() == 1 { 0 } else { i };
        for &epoch in epochs.row(row) {
            manom.push((motion * epoch - DPI * orbits.tau[i]).rem_euclid(DPI));
            ecc.push(orbits.ecc[i]);
        }
    }

    let eanom = solver.solve_slice(&manom, &ecc);

    let mut raoff = Array2::zeros((n_orbs, n_dates));
    let mut deoff = Array2::zeros((n_orbs, n_dates));
    let mut vz = Array2::zeros((n_orbs, n_dates));

    for i in 0..n_orbs {
        let sma = orbits.sma[i];
        let e = orbits.ecc[i];
        let inc = orbits.inc[i];
        let aop = orbits.aop[i];
        let pan = orbits.pan[i];
        let mtot = orbits.mtot[i];
        let plx_as = orbits.plx[i] * 1e-3;

        let c2i2 = (0.5 * inc).cos().powi(2);
        let s2i2 = (0.5 * inc).sin().powi(2);
        let tan_factor = ((1.0 + e) / (1.0 - e)).sqrt();

        // RV semi-amplitude, in AU/day before conversion
        let kv = if mass == 0.0 {
            mean_motion[i] * (sma * inc.sin()) / (1.0 - e * e).sqrt()
        } else {
            let m2 = mtot - mass;
            GAUSS_GRAV * m2 * inc.sin() / ((1.0 - e * e).sqrt() * mtot.sqrt() * sma.sqrt())
        };
        let kv = kv * AU_PER_DAY_IN_KM_PER_S;

        for j in 0..n_dates {
            let eanom = eanom[i * n_dates + j];
            let tanom = 2.0 * (tan_factor * (0.5 * eanom).tan()).atan();
            let radius = sma * (1.0 - e * eanom.cos());

            let arg1 = tanom + aop + pan;
            let arg2 = tanom + aop - pan;
            let (s1, c1) = arg1.sin_cos();
            let (s2, c2) = arg2.sin_cos();

            raoff[[i, j]] = radius * (c2i2 * s1 - s2i2 * s2) * plx_as;
            deoff[[i, j]] = radius * (c2i2 * c1 + s2i2 * c2) * plx_as;
            vz[[i, j]] = kv * (e * aop.cos() + (aop + tanom).cos());
        }
    }

    Projection { raoff, deoff, vz }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;
    use ndarray::{array, stack};
    use pretty_assertions::assert_eq;

    fn params(orbits: &[OrbitElements]) -> Array2<f64> {
        let columns: Vec<Array2<f64>> = orbits.iter().map(|o| o.to_params()).collect();
        let views: Vec<_> = columns.iter().map(|c| c.view()).collect();
        ndarray::concatenate(Axis(1), &views).unwrap()
    }

    fn elements(ecc: f64, inc: f64) -> OrbitElements {
        OrbitElements {
            sma: 10.0,
            ecc,
            inc,
            aop: 0.7,
            pan: 1.1,
            tau: 0.3,
            plx: 50.0,
            mtot: 1.5,
        }
    }

    #[test]
    fn one_au_around_one_sun_is_a_year() {
        assert_abs_diff_eq!(period_days(1.0, 1.0), 365.2568983, epsilon = 1e-4);
    }

    #[test]
    fn seppa_conversion() {
        let (sep, pa) = radec_to_seppa(1.0, 0.0);
        assert_abs_diff_eq!(sep, 1.0);
        assert_abs_diff_eq!(pa, 90.0);
        let (_, pa) = radec_to_seppa(-1.0, 0.0);
        assert_abs_diff_eq!(pa, 270.0);
    }

    #[test]
    fn face_on_orbit_matches_direct_seppa() {
        let orbit = elements(0.4, 0.0);
        let params = params(&[orbit]);
        let batch = OrbitBatch::from_params(params.view());
        let epochs = array![0.0, 1234.5, 5000.0];
        let proj = calc_orbit(epochs.view(), &batch, 0.0);

        let motion = DPI / orbit.period();
        for (j, &epoch) in epochs.iter().enumerate() {
            let manom = (motion * epoch - DPI * orbit.tau).rem_euclid(DPI);
            let eanom = KeplerSolver::default().solve_slice(&[manom], &[orbit.ecc])[0];
            let tanom =
                2.0 * (((1.0 + orbit.ecc) / (1.0 - orbit.ecc)).sqrt() * (0.5 * eanom).tan()).atan();
            let radius = orbit.sma * (1.0 - orbit.ecc * eanom.cos());

            let (sep, pa) = radec_to_seppa(proj.raoff[[0, j]], proj.deoff[[0, j]]);
            assert_abs_diff_eq!(sep, radius * orbit.plx * 1e-3, epsilon = 1e-12);
            let expected_pa = (tanom + orbit.aop + orbit.pan).to_degrees().rem_euclid(360.0);
            assert_abs_diff_eq!(pa, expected_pa, epsilon = 1e-9);
        }
    }

    #[test]
    fn periodic_in_time() {
        let orbit = elements(0.6, 1.0);
        let params = params(&[orbit]);
        let batch = OrbitBatch::from_params(params.view());
        let period = orbit.period();
        let proj = calc_orbit(array![100.0, 100.0 + period].view(), &batch, 0.0);
        assert_abs_diff_eq!(proj.raoff[[0, 0]], proj.raoff[[0, 1]], epsilon = 1e-9);
        assert_abs_diff_eq!(proj.deoff[[0, 0]], proj.deoff[[0, 1]], epsilon = 1e-9);
        assert_abs_diff_eq!(proj.vz[[0, 0]], proj.vz[[0, 1]], epsilon = 1e-9);
    }

    #[test]
    fn massive_body_scales_semi_amplitude() {
        let orbit = elements(0.2, 0.9);
        let params = params(&[orbit]);
        let batch = OrbitBatch::from_params(params.view());
        let epochs = array![10.0, 700.0];
        let test_particle = calc_orbit(epochs.view(), &batch, 0.0);
        let massive = calc_orbit(epochs.view(), &batch, 0.5);
        let ratio = (orbit.mtot - 0.5) / orbit.mtot;
        for j in 0..2 {
            assert_abs_diff_eq!(
                massive.vz[[0, j]],
                test_particle.vz[[0, j]] * ratio,
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn batch_matches_single_orbits() {
        let orbits = [elements(0.1, 0.3), elements(0.97, 2.0), elements(0.0, 1.2)];
        let all = params(&orbits);
        let epochs = array![-300.0, 0.0, 42.0, 9000.0];
        let batch = calc_orbit(epochs.view(), &OrbitBatch::from_params(all.view()), 0.0);
        assert_eq!(batch.raoff.dim(), (3, 4));

        for (i, orbit) in orbits.iter().enumerate() {
            let single = params(&[*orbit]);
            let proj = calc_orbit(epochs.view(), &OrbitBatch::from_params(single.view()), 0.0);
            for j in 0..4 {
                assert_abs_diff_eq!(batch.raoff[[i, j]], proj.raoff[[0, j]], epsilon = 1e-12);
                assert_abs_diff_eq!(batch.deoff[[i, j]], proj.deoff[[0, j]], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn per_orbit_epochs() {
        let orbits = [elements(0.1, 0.3), elements(0.5, 2.0)];
        let all = params(&orbits);
        let batch = OrbitBatch::from_params(all.view());
        let epochs = stack![Axis(0), array![0.0, 10.0], array![20.0, 30.0]];
        let grid = calc_orbit_grid(epochs.view(), &batch, 0.0, &KeplerSolver::default());
        let shared = calc_orbit(array![20.0, 30.0].view(), &batch, 0.0);
        assert_abs_diff_eq!(grid.raoff[[1, 0]], shared.raoff[[1, 0]], epsilon = 1e-12);
        assert_abs_diff_eq!(grid.deoff[[1, 1]], shared.deoff[[1, 1]], epsilon = 1e-12);
    }

    #[test]
    fn squeeze_single_orbit() {
        let params = params(&[elements(0.3, 0.5)]);
        let batch = OrbitBatch::from_params(params.view());
        let (ra, dec, vz) = calc_orbit(array![1.0, 2.0, 3.0].view(), &batch, 0.0).squeeze();
        assert_eq!(ra.shape(), &[3]);
        assert_eq!(dec.shape(), &[3]);
        assert_eq!(vz.shape(), &[3]);

        let (ra, _, _) = calc_orbit(array![1.0].view(), &batch, 0.0).squeeze();
        assert_eq!(ra.ndim(), 0);
    }
}
