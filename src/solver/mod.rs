//! Solver façade: wraps a black-box stiff IVP stepper behind the
//! operations spec.md §4.4 assumes are externally available (dense
//! Newton-BDF integration with forward sensitivities and root finding),
//! backed by GSL's `msbdf` stepper (`rgsl::ODEiv2StepType::msbdf`) which
//! is the nearest real-world equivalent of the assumed CVODES black box.
//!
//! GSL's `odeiv2` module has no notion of continuous/dense output, no
//! forward-sensitivity propagation, and no root finding; all three are
//! added here as a layer over the raw stepper rather than being native
//! to the backend. This mirrors spec.md §9's framing of these as
//! "engineering substitutions, not semantic departures."


use crate::error::{EngineError, EngineResult};
use crate::model::{Model, SensitivityIndependentKind};
use crate::pacing::PacingSystem;
use rgsl::{ODEiv2Driver, ODEiv2StepType, ODEiv2System};

/// Tolerances and step-size bounds for the underlying stepper.
#[derive(Debug, Clone, Copy)]
pub struct SolverConfig {
    pub abs_tol: f64,
    pub rel_tol: f64,
    pub initial_step: f64,
    pub min_step: f64,
    pub max_step: f64,
}

impl SolverConfig {
    /// spec.md §6 `set_tolerance`: stored until the next `init`.
    pub fn set_tolerance(&mut self, abs: f64, rel: f64) {
        self.abs_tol = abs;
        self.rel_tol = rel;
    }

    /// spec.md §6 `set_max_step_size`; `0` means unbounded.
    pub fn set_max_step_size(&mut self, dt: f64) {
        self.max_step = dt;
    }

    /// spec.md §6 `set_min_step_size`; `0` means unbounded.
    pub fn set_min_step_size(&mut self, dt: f64) {
        self.min_step = dt;
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            abs_tol: 1.0e-6,
            rel_tol: 1.0e-4,
            initial_step: 1.0e-3,
            min_step: 0.0,
            max_step: 0.0,
        }
    }
}

/// A single-variable root-finding target evaluated against dense output.
#[derive(Debug, Clone, Copy)]
pub struct RootConfig {
    pub state_index: usize,
    pub threshold: f64,
}

/// The accepted-step bracket retained for Hermite dense output and
/// root bisection (spec.md §4.4).
#[derive(Debug, Clone)]
struct Segment {
    t0: f64,
    y0: Vec<f64>,
    dydt0: Vec<f64>,
    t1: f64,
    y1: Vec<f64>,
    dydt1: Vec<f64>,
}

/// Cubic Hermite interpolation of `y[index]` at `t` within `[t0, t1]`,
/// using endpoint values and derivatives. GSL's `odeiv2` has no native
/// continuous output, so this is the façade's substitute.
pub(crate) fn hermite_interpolate(
    t0: f64,
    y0: f64,
    dydt0: f64,
    t1: f64,
    y1: f64,
    dydt1: f64,
    t: f64,
) -> f64 {
    let h = t1 - t0;
    if h == 0.0 {
        return y0;
    }
    let s = (t - t0) / h;
    let s2 = s * s;
    let s3 = s2 * s;
    let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
    let h10 = s3 - 2.0 * s2 + s;
    let h01 = -2.0 * s3 + 3.0 * s2;
    let h11 = s3 - s2;
    h00 * y0 + h10 * h * dydt0 + h01 * y1 + h11 * h * dydt1
}

/// Bisects `g` (assumed to change sign once across `[lo, hi]`) down to
/// `tol` in time, returning the crossing time.
pub(crate) fn bisect_root(mut lo: f64, mut hi: f64, tol: f64, mut g: impl FnMut(f64) -> f64) -> f64 {
    let mut g_lo = g(lo);
    for _ in 0..100 {
        if (hi - lo).abs() <= tol {
            break;
        }
        let mid = 0.5 * (lo + hi);
        let g_mid = g(mid);
        if g_mid == 0.0 {
            return mid;
        }
        if (g_mid > 0.0) == (g_lo > 0.0) {
            lo = mid;
            g_lo = g_mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Forward-sensitivity augmented-system stepper wrapping a GSL stiff
/// BDF/Newton integrator.
///
/// The augmented state vector is `[states..., s_1..., s_2..., ...]`
/// where `s_k` is the length-`n_states` sensitivity of the state vector
/// with respect to independent `k`. Propagating `s_k` alongside the
/// states is the "staggered-direct" substitution spec.md §9 documents
/// in place of CVODES's simultaneous corrector: the state Jacobian used
/// to advance `s_k` is the same finite-difference Jacobian
/// [`Model::state_jacobian`] computes for Newton iteration, evaluated at
/// the current point rather than solved implicitly alongside the states.
pub struct Solver {
    config: SolverConfig,
    n_states: usize,
    ns: usize,
    h: f64,
    t: f64,
    y: Vec<f64>,
    dydt: Vec<f64>,
    segment: Option<Segment>,
    root: Option<RootConfig>,
    evaluations: u64,
}

impl Solver {
    pub fn new(config: SolverConfig, n_states: usize) -> Self {
        Solver {
            config,
            n_states,
            ns: 0,
            h: config.initial_step,
            t: 0.0,
            y: vec![0.0; n_states],
            dydt: vec![0.0; n_states],
            segment: None,
            root: None,
            evaluations: 0,
        }
    }

    pub fn enable_sensitivities(&mut self, ns: usize) {
        self.ns = ns;
        self.y = vec![0.0; self.n_states * (1 + ns)];
        self.dydt = vec![0.0; self.n_states * (1 + ns)];
    }

    pub fn set_root(&mut self, root: RootConfig) {
        self.root = Some(root);
    }

    pub fn clear_root(&mut self) {
        self.root = None;
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    fn augmented_dim(&self) -> usize {
        self.n_states * (1 + self.ns)
    }

    /// Seeds the integrator at `(t0, states)`, with all sensitivity
    /// columns at their initial values (identity for state independents,
    /// zero for parameter independents — spec.md §8 scenario setup).
    pub fn seed(
        &mut self,
        t0: f64,
        states: &[f64],
        model: &mut Model,
        pacing: &[PacingSystem],
    ) -> EngineResult<()> {
        self.t = t0;
        self.y = vec![0.0; self.augmented_dim()];
        self.y[..self.n_states].copy_from_slice(states);
        for (k, s) in model.s_independents().to_vec().iter().enumerate() {
            if let SensitivityIndependentKind::State = s.kind {
                self.y[self.n_states * (1 + k) + s.slot] = 1.0;
            }
        }
        let mut dydt = vec![0.0; self.augmented_dim()];
        self.rhs(t0, &self.y.clone(), &mut dydt, model, pacing)?;
        self.dydt = dydt;
        self.segment = Some(Segment {
            t0,
            y0: self.y.clone(),
            dydt0: self.dydt.clone(),
            t1: t0,
            y1: self.y.clone(),
            dydt1: self.dydt.clone(),
        });
        Ok(())
    }

    fn rhs(
        &mut self,
        t: f64,
        y: &[f64],
        out: &mut [f64],
        model: &mut Model,
        pacing: &[PacingSystem],
    ) -> EngineResult<()> {
        let pace: Vec<f64> = pacing.iter().map(|p| p.level(t)).collect();
        model.set_bound(t, &pace, 0.0, model.bound().evaluations)?;
        model.set_states(&y[..self.n_states])?;
        model.evaluate_derivatives()?;
        out[..self.n_states].copy_from_slice(model.derivatives());

        if self.ns > 0 {
            let independents = model.s_independents().to_vec();
            let jac = model.state_jacobian();
            for (k, s) in independents.iter().enumerate() {
                let offset = self.n_states * (1 + k);
                let sk = &y[offset..offset + self.n_states];
                let mut dsk = vec![0.0; self.n_states];
                for i in 0..self.n_states {
                    let mut acc = 0.0;
                    for j in 0..self.n_states {
                        acc += jac[(i, j)] * sk[j];
                    }
                    dsk[i] = acc;
                }
                if let SensitivityIndependentKind::Parameter = s.kind {
                    let direct = model.parameter_partial_derivatives(s.slot);
                    for i in 0..self.n_states {
                        dsk[i] += direct[i];
                    }
                }
                out[offset..offset + self.n_states].copy_from_slice(&dsk);
            }
        }
        self.evaluations += 1;
        Ok(())
    }

    /// Advances the integrator one accepted internal step, never passing
    /// `horizon` (the driver's `gsl_odeiv2_driver_apply` clamps to its
    /// `t1` argument by construction, returning with `t == t1` exactly on
    /// the final step). Returns the time actually reached.
    ///
    /// A fresh `ODEiv2Driver` is allocated per call — the driver owns its
    /// evolve/control/step objects internally, and `rgsl`'s driver API
    /// exposes only `apply`, not the suggested next step size, so `self.h`
    /// is re-derived from the step actually taken rather than read back
    /// from the driver (a driver kept alive across calls would otherwise
    /// have to outlive the per-call `&mut Model`/pacing borrow captured by
    /// its RHS closure).
    pub fn advance_one_step(
        &mut self,
        horizon: f64,
        model: &mut Model,
        pacing: &[PacingSystem],
    ) -> EngineResult<f64> {
        let dim = self.augmented_dim();

        let solver_ptr: *mut Solver = self;
        let model_ptr: *mut Model = model;
        let pacing_ptr: *const [PacingSystem] = pacing;
        let mut closure = move |t: f64, y: &[f64], dydt: &mut [f64]| -> rgsl::Value {
            // Safety: the pointers above alias `self`, `model`, `pacing`
            // but are only ever dereferenced for the duration of this
            // call, which itself only runs for the duration of the
            // `driver.apply` call below, strictly nested inside it.
            let solver = unsafe { &mut *solver_ptr };
            let model = unsafe { &mut *model_ptr };
            let pacing = unsafe { &*pacing_ptr };
            match solver.rhs(t, y, dydt, model, pacing) {
                Ok(()) => rgsl::Value::Success,
                Err(_) => rgsl::Value::BadFunction,
            }
        };
        let mut system = ODEiv2System::new(dim, &mut closure);

        let step_type = ODEiv2StepType::msbdf();
        let mut driver = ODEiv2Driver::alloc_y_new(
            &mut system,
            &step_type,
            self.h.max(self.config.initial_step.abs().max(1.0e-9)),
            self.config.abs_tol,
            self.config.rel_tol,
        )
        .ok_or_else(|| EngineError::from_solver(-1, "failed to allocate GSL ODE driver"))?;
        if self.config.min_step > 0.0 {
            driver.set_hmin(self.config.min_step);
        }
        if self.config.max_step > 0.0 {
            driver.set_hmax(self.config.max_step);
        }

        let t_start = self.t;
        let mut t = self.t;
        let mut y = self.y.clone();
        let status = driver.apply(&mut t, horizon, &mut y);
        if status != rgsl::Value::Success {
            return Err(EngineError::from_solver(
                status as i32,
                "GSL driver rejected the requested step",
            ));
        }
        let h = (t - t_start).abs().max(1.0e-12);
        if self.config.min_step > 0.0 && h <= self.config.min_step {
            log::warn!("solver step size {h} clamped at the configured minimum {}", self.config.min_step);
        }

        let mut dydt = vec![0.0; dim];
        self.rhs(t, &y, &mut dydt, model, pacing)?;

        self.segment = Some(Segment {
            t0: self.t,
            y0: self.y.clone(),
            dydt0: self.dydt.clone(),
            t1: t,
            y1: y.clone(),
            dydt1: dydt.clone(),
        });
        self.t = t;
        self.h = h;
        self.y = y;
        self.dydt = dydt;
        Ok(self.t)
    }

    pub fn time(&self) -> f64 {
        self.t
    }

    pub fn states(&self) -> &[f64] {
        &self.y[..self.n_states]
    }

    pub fn s_states_row(&self, k: usize) -> &[f64] {
        let offset = self.n_states * (1 + k);
        &self.y[offset..offset + self.n_states]
    }

    pub fn write_sensitivities_into(&self, model: &mut Model) {
        for k in 0..self.ns {
            model.set_state_sensitivities(k, self.s_states_row(k));
        }
    }

    /// Dense-output value of `states[index]` at `t`, which must lie
    /// within the most recently accepted step's bracket.
    pub fn dense_state(&self, index: usize, t: f64) -> f64 {
        let seg = self
            .segment
            .as_ref()
            .expect("dense_state called before any accepted step");
        hermite_interpolate(
            seg.t0,
            seg.y0[index],
            seg.dydt0[index],
            seg.t1,
            seg.y1[index],
            seg.dydt1[index],
            t,
        )
    }

    /// Checks the configured root against the most recently accepted
    /// step's bracket, bisecting to `abs_tol` if the tracked state
    /// variable crosses `threshold` within it. Returns `(time,
    /// direction)` with `direction = +1` for a rising crossing and `-1`
    /// for a falling one (spec.md §6's root-finding record format).
    pub fn find_root_in_last_step(&self) -> Option<(f64, i8)> {
        let root = self.root?;
        let seg = self.segment.as_ref()?;
        let g = |t: f64| self.dense_state(root.state_index, t) - root.threshold;
        let g0 = seg.y0[root.state_index] - root.threshold;
        let g1 = seg.y1[root.state_index] - root.threshold;
        let direction: i8 = if g1 >= g0 { 1 } else { -1 };
        if g0 == 0.0 {
            return Some((seg.t0, direction));
        }
        if (g0 > 0.0) != (g1 > 0.0) {
            return Some((bisect_root(seg.t0, seg.t1, self.config.abs_tol, g), direction));
        }
        None
    }

    pub fn reset_step_size(&mut self) {
        self.h = self.config.initial_step;
    }
}
