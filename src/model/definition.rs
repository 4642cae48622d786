//! Compiled-in cell model: Beeler & Reuter (1977), the classic 8-state
//! cardiac ventricular action potential model. This plays the role that a
//! model-compiler's generated code plays in the source system (spec.md
//! §1 treats the compiler as an external, out-of-scope collaborator); here
//! the "compiled" output is simply this module.
//!
//! Variable naming follows the `"<component>.<name>"` convention from
//! spec.md §6. Every array below is indexed in declaration order and that
//! order is the engine's only notion of variable identity.

/// Number of ODE state variables.
pub const N_STATES: usize = 8;
/// Number of intermediary (derived, non-state) variables computed by a
/// single RHS evaluation.
pub const N_INTERMEDIARY: usize = 6;
/// Number of literal (fixed-before-simulation) constants.
pub const N_LITERALS: usize = 4;
/// Number of literal-derived constants (pure functions of literals).
pub const N_LITERAL_DERIVED: usize = 1;
/// Number of sensitivity-eligible parameters.
pub const N_PARAMETERS: usize = 2;
/// Number of parameter-derived constants (pure functions of parameters).
pub const N_PARAMETER_DERIVED: usize = 0;

pub const STATE_NAMES: [&str; N_STATES] = [
    "membrane.V",
    "ina.m",
    "ina.h",
    "ina.j",
    "isi.d",
    "isi.f",
    "ik1.x1",
    "isi.Cai",
];

pub const INTERMEDIARY_NAMES: [&str; N_INTERMEDIARY] = [
    "ina.INa",
    "isi.Es",
    "isi.Isi",
    "ik1.IK1",
    "ik1.Ix1",
    "membrane.i_stim",
];

pub const LITERAL_NAMES: [&str; N_LITERALS] =
    ["membrane.C", "ina.ENa", "ina.gNaC", "stim.amplitude"];
pub const LITERAL_DEFAULTS: [f64; N_LITERALS] = [1.0, 50.0, 0.003, -80.0];

pub const LITERAL_DERIVED_NAMES: [&str; N_LITERAL_DERIVED] = ["membrane.Cinv"];

pub const PARAMETER_NAMES: [&str; N_PARAMETERS] = ["ina.gNaBar", "isi.gsBar"];
pub const PARAMETER_DEFAULTS: [f64; N_PARAMETERS] = [4.0, 0.09];

/// Default initial state, matching the classic Beeler-Reuter resting
/// point except for `membrane.V`, which spec.md's unstimulated-cell
/// scenario pins to -84.5286 mV.
pub const STATE_DEFAULTS: [f64; N_STATES] = [
    -84.5286,  // membrane.V
    0.011,     // ina.m
    0.988,     // ina.h
    0.975,     // ina.j
    0.003,     // isi.d
    0.994,     // isi.f
    0.0001,    // ik1.x1
    2.0e-7,    // isi.Cai
];

/// Index of `membrane.V` within the state vector; used by scenarios that
/// log or root-find on voltage.
pub const INDEX_V: usize = 0;

fn safe_exp_ratio(numerator_coeff: f64, v: f64, k: f64, shift: f64) -> f64 {
    // Computes numerator_coeff * (v - shift) / (1 - exp(k * (v - shift)))
    // with the removable singularity at v == shift handled by its limit,
    // -1.0 / k.
    let x = v - shift;
    let denom = 1.0 - (k * x).exp();
    if denom.abs() < 1e-10 {
        numerator_coeff * (-1.0 / k)
    } else {
        numerator_coeff * x / denom
    }
}

/// Sodium activation gate rates.
fn alpha_m(v: f64) -> f64 {
    safe_exp_ratio(1.0, v, -0.1, -47.0)
}
fn beta_m(v: f64) -> f64 {
    40.0 * (-0.056 * (v + 72.0)).exp()
}

/// Sodium fast-inactivation gate rates.
fn alpha_h(v: f64) -> f64 {
    0.126 * (-0.25 * (v + 77.0)).exp()
}
fn beta_h(v: f64) -> f64 {
    1.7 / (1.0 + (-0.082 * (v + 22.5)).exp())
}

/// Sodium slow-inactivation gate rates.
fn alpha_j(v: f64) -> f64 {
    0.055 * (-0.25 * (v + 78.0)).exp() / (1.0 + (-0.2 * (v + 78.0)).exp())
}
fn beta_j(v: f64) -> f64 {
    0.3 / (1.0 + (-0.1 * (v + 32.0)).exp())
}

/// Slow inward current activation gate rates.
fn alpha_d(v: f64) -> f64 {
    0.095 * (-0.01 * (v - 5.0)).exp() / (1.0 + (-0.072 * (v - 5.0)).exp())
}
fn beta_d(v: f64) -> f64 {
    0.07 * (-0.017 * (v + 44.0)).exp() / (1.0 + (0.05 * (v + 44.0)).exp())
}

/// Slow inward current inactivation gate rates.
fn alpha_f(v: f64) -> f64 {
    0.012 * (-0.008 * (v + 28.0)).exp() / (1.0 + (0.15 * (v + 28.0)).exp())
}
fn beta_f(v: f64) -> f64 {
    0.0065 * (-0.02 * (v + 30.0)).exp() / (1.0 + (-0.2 * (v + 30.0)).exp())
}

/// Time-dependent outward current gate rates.
fn alpha_x1(v: f64) -> f64 {
    0.0005 * (0.083 * (v + 50.0)).exp() / (1.0 + (0.057 * (v + 50.0)).exp())
}
fn beta_x1(v: f64) -> f64 {
    0.0013 * (-0.06 * (v + 20.0)).exp() / (1.0 + (-0.04 * (v + 20.0)).exp())
}

/// Evaluates the literal-derived constants from `literals`. Pure function;
/// must be recomputed whenever `literals` changes (spec.md §4.1).
pub fn eval_literal_derived(literals: &[f64; N_LITERALS]) -> [f64; N_LITERAL_DERIVED] {
    let capacitance = literals[0];
    [1.0 / capacitance]
}

/// Evaluates the parameter-derived constants from `parameters`. The
/// Beeler-Reuter definition has none; kept as a function for symmetry with
/// `eval_literal_derived` and so the dataflow generalizes to richer models.
pub fn eval_parameter_derived(_parameters: &[f64; N_PARAMETERS]) -> [f64; N_PARAMETER_DERIVED] {
    []
}

/// Evaluates derivatives and intermediaries at the given point. This is
/// the sole place cardiac-model physics lives; everything above
/// [`crate::model::Model`] treats it as an opaque dataflow function.
pub fn eval_rhs(
    states: &[f64; N_STATES],
    pace: f64,
    literals: &[f64; N_LITERALS],
    literal_derived: &[f64; N_LITERAL_DERIVED],
    parameters: &[f64; N_PARAMETERS],
) -> ([f64; N_STATES], [f64; N_INTERMEDIARY]) {
    let v = states[0];
    let m = states[1];
    let h = states[2];
    let j = states[3];
    let d = states[4];
    let f = states[5];
    let x1 = states[6];
    let cai = states[7].max(1e-12);

    let e_na = literals[1];
    let g_na_background = literals[2];
    let stim_amplitude = literals[3];
    let c_inv = literal_derived[0];

    let g_na_bar = parameters[0];
    let g_s_bar = parameters[1];

    let i_na = (g_na_bar * m.powi(3) * h * j + g_na_background) * (v - e_na);

    let e_s = -82.3 - 13.0287 * cai.ln();
    let i_si = g_s_bar * d * f * (v - e_s);

    let i_k1 = 0.35
        * (4.0 * ((0.04 * (v + 85.0)).exp() - 1.0)
            / ((0.08 * (v + 53.0)).exp() + (0.04 * (v + 53.0)).exp())
            + 0.2 * (v + 23.0) / (1.0 - (-0.04 * (v + 23.0)).exp()));

    let i_x1 = x1 * 0.8 * ((0.04 * (v + 77.0)).exp() - 1.0) / (0.04 * (v + 35.0)).exp();

    let i_stim = pace * stim_amplitude;

    let d_v = -(i_na + i_si + i_k1 + i_x1 + i_stim) * c_inv;
    let d_m = alpha_m(v) * (1.0 - m) - beta_m(v) * m;
    let d_h = alpha_h(v) * (1.0 - h) - beta_h(v) * h;
    let d_j = alpha_j(v) * (1.0 - j) - beta_j(v) * j;
    let d_d = alpha_d(v) * (1.0 - d) - beta_d(v) * d;
    let d_f = alpha_f(v) * (1.0 - f) - beta_f(v) * f;
    let d_x1 = alpha_x1(v) * (1.0 - x1) - beta_x1(v) * x1;
    let d_cai = -1.0e-7 * i_si + 0.07 * (1.0e-7 - cai);

    (
        [d_v, d_m, d_h, d_j, d_d, d_f, d_x1, d_cai],
        [i_na, e_s, i_si, i_k1, i_x1, i_stim],
    )
}
