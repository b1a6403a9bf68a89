//! Solver configuration.
//!
//! `SolverConfig` collects every option of the solve pipeline. It can be
//! built in code, parsed from the compact solver codes used by batch drivers
//! (`"SPGMRES"`, `"BCGS"`, `"LU"`, ...), or read from the environment with
//! [`SolverConfig::from_env`].

use crate::error::KError;
use std::fmt;
use std::str::FromStr;

/// Top-level solution method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    /// Sparse LU; bypasses scaling and preconditioning.
    #[default]
    Direct,
    Gmres,
    BiCgStab,
    BiCgSafe,
}

/// The iterative subset of [`Method`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KrylovKind {
    Gmres,
    BiCgStab,
    BiCgSafe,
}

impl Method {
    pub fn krylov(self) -> Option<KrylovKind> {
        match self {
            Method::Direct => None,
            Method::Gmres => Some(KrylovKind::Gmres),
            Method::BiCgStab => Some(KrylovKind::BiCgStab),
            Method::BiCgSafe => Some(KrylovKind::BiCgSafe),
        }
    }
}

impl From<KrylovKind> for Method {
    fn from(kind: KrylovKind) -> Self {
        match kind {
            KrylovKind::Gmres => Method::Gmres,
            KrylovKind::BiCgStab => Method::BiCgStab,
            KrylovKind::BiCgSafe => Method::BiCgSafe,
        }
    }
}

impl FromStr for Method {
    type Err = KError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" | "lu" => Ok(Method::Direct),
            "gmres" => Ok(Method::Gmres),
            "bicgstab" | "bcgs" => Ok(Method::BiCgStab),
            "bicgsafe" | "bcgsa" => Ok(Method::BiCgSafe),
            other => Err(KError::Configuration(format!("unknown method `{other}`"))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Direct => "direct",
            Method::Gmres => "gmres",
            Method::BiCgStab => "bicgstab",
            Method::BiCgSafe => "bicgsafe",
        };
        f.write_str(name)
    }
}

impl fmt::Display for KrylovKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Method::from(*self).fmt(f)
    }
}

/// Tuning knobs of the sparse direct engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LuOptions {
    /// Largest accepted normwise backward error of a solve.
    pub pivot_quality: f64,
    /// Dynamic pivot threshold. Not used by the faer engine.
    pub pivot_dynamic: f64,
    /// Rows or columns whose largest entry is below this are structurally empty.
    pub pivot_static: f64,
    /// Extra workspace, in percent of the estimate. Not used by the faer engine.
    pub workspace_percent: u32,
    /// Rounds of iterative refinement after each solve.
    pub refinement_steps: usize,
    /// 0 = silent, 1 = summary, 2 = per-solve detail.
    pub verbosity: u8,
}

impl Default for LuOptions {
    fn default() -> Self {
        Self {
            pivot_quality: 1e-5,
            pivot_dynamic: 1e-17,
            pivot_static: 1e-20,
            workspace_percent: 30,
            refinement_steps: 2,
            verbosity: 1,
        }
    }
}

/// Options for one run of the solve pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    pub method: Method,
    /// Equilibrate A before solving.
    pub scaled: bool,
    /// Build an ILU preconditioner.
    pub preconditioned: bool,
    /// Relative residual ‖r‖/‖r₀‖ that counts as converged.
    pub convergence_threshold: f64,
    /// Maximum deviation of scaled row/column maxima from one.
    pub scaling_threshold: f64,
    /// ILU drop tolerance.
    pub fill_threshold: f64,
    /// ILU level of fill.
    pub fill_level: usize,
    /// Iteration cap; `None` derives it from the row count.
    pub max_iterations: Option<usize>,
    /// GMRES restart length.
    pub restart: usize,
    /// Bi-orthogonal breakdown threshold, applied as √|den| / ‖r₀‖.
    pub breakdown_threshold: f64,
    /// On a singular ILU pivot, retry without preconditioning.
    pub fallback_unpreconditioned: bool,
    /// On breakdown, continue from the current x with this method.
    pub breakdown_fallback: Option<KrylovKind>,
    pub lu: LuOptions,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            method: Method::Direct,
            scaled: false,
            preconditioned: false,
            convergence_threshold: 1e-8,
            scaling_threshold: 1e-5,
            fill_threshold: 1e-8,
            fill_level: 1,
            max_iterations: None,
            restart: 50,
            breakdown_threshold: 1e-16,
            fallback_unpreconditioned: false,
            breakdown_fallback: None,
            lu: LuOptions::default(),
        }
    }
}

impl SolverConfig {
    pub fn new(method: Method) -> Self {
        Self { method, ..Self::default() }
    }

    pub fn with_scaling(mut self, on: bool) -> Self {
        self.scaled = on;
        self
    }

    pub fn with_preconditioning(mut self, on: bool) -> Self {
        self.preconditioned = on;
        self
    }

    pub fn with_convergence_threshold(mut self, eps: f64) -> Self {
        self.convergence_threshold = eps;
        self
    }

    pub fn with_scaling_threshold(mut self, thres: f64) -> Self {
        self.scaling_threshold = thres;
        self
    }

    pub fn with_fill(mut self, level: usize, threshold: f64) -> Self {
        self.fill_level = level;
        self.fill_threshold = threshold;
        self
    }

    pub fn with_max_iterations(mut self, cap: usize) -> Self {
        self.max_iterations = Some(cap);
        self
    }

    pub fn with_restart(mut self, restart: usize) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_unpreconditioned_fallback(mut self, on: bool) -> Self {
        self.fallback_unpreconditioned = on;
        self
    }

    pub fn with_breakdown_fallback(mut self, kind: Option<KrylovKind>) -> Self {
        self.breakdown_fallback = kind;
        self
    }

    pub fn with_lu_options(mut self, lu: LuOptions) -> Self {
        self.lu = lu;
        self
    }

    /// Iteration cap for a problem with `rows` rows: the explicit cap, or
    /// one fifth of the row count (at least one).
    pub fn max_iterations(&self, rows: usize) -> usize {
        self.max_iterations.unwrap_or((rows / 5).max(1))
    }

    /// Parse a compact solver code.
    ///
    /// The base is `LU`, `GMRES`, `BCGS` or `BCGSA`; a prefix of `S` turns on
    /// scaling and `P` turns on preconditioning, in that order (`SPBCGS`).
    pub fn from_solver_code(code: &str) -> Result<Self, KError> {
        let upper = code.trim().to_ascii_uppercase();
        let mut rest = upper.as_str();
        let mut cfg = Self::default();
        if rest == "LU" {
            return Ok(cfg);
        }
        if let Some(stripped) = rest.strip_prefix('S') {
            cfg.scaled = true;
            rest = stripped;
        }
        if let Some(stripped) = rest.strip_prefix('P') {
            cfg.preconditioned = true;
            rest = stripped;
        }
        cfg.method = match rest {
            "GMRES" => Method::Gmres,
            "BCGS" => Method::BiCgStab,
            "BCGSA" => Method::BiCgSafe,
            _ => return Err(KError::Configuration(format!("unknown solver code `{code}`"))),
        };
        Ok(cfg)
    }

    /// Read `KSP`, `CTHRES`, `FTHRES`, `STHRES`, `FLEVEL` and `IMAX` from
    /// the environment. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, KError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SolverConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, KError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = match lookup("KSP") {
            Some(code) => Self::from_solver_code(&code)?,
            None => Self::default(),
        };
        if let Some(v) = parsed::<f64, _>(&lookup, "CTHRES")? {
            cfg.convergence_threshold = v;
        }
        if let Some(v) = parsed::<f64, _>(&lookup, "FTHRES")? {
            cfg.fill_threshold = v;
        }
        if let Some(v) = parsed::<f64, _>(&lookup, "STHRES")? {
            cfg.scaling_threshold = v;
        }
        if let Some(v) = parsed::<usize, _>(&lookup, "FLEVEL")? {
            cfg.fill_level = v;
        }
        if let Some(v) = parsed::<usize, _>(&lookup, "IMAX")? {
            cfg.max_iterations = Some(v);
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject option values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), KError> {
        let positive = [
            ("convergence_threshold", self.convergence_threshold),
            ("scaling_threshold", self.scaling_threshold),
            ("breakdown_threshold", self.breakdown_threshold),
        ];
        for (name, v) in positive {
            if !(v.is_finite() && v > 0.0) {
                return Err(KError::Configuration(format!("{name} must be positive, got {v}")));
            }
        }
        if !(self.fill_threshold.is_finite() && self.fill_threshold >= 0.0) {
            return Err(KError::Configuration(format!(
                "fill_threshold must be non-negative, got {}",
                self.fill_threshold
            )));
        }
        let lu = &self.lu;
        if !(lu.pivot_quality.is_finite() && lu.pivot_quality > 0.0) {
            return Err(KError::Configuration(format!(
                "lu.pivot_quality must be positive, got {}",
                lu.pivot_quality
            )));
        }
        let knobs = [("lu.pivot_dynamic", lu.pivot_dynamic), ("lu.pivot_static", lu.pivot_static)];
        for (name, v) in knobs {
            if !(v.is_finite() && v >= 0.0) {
                return Err(KError::Configuration(format!("{name} must be non-negative, got {v}")));
            }
        }
        if self.restart == 0 {
            return Err(KError::Configuration("restart must be at least 1".into()));
        }
        if self.max_iterations == Some(0) {
            return Err(KError::Configuration("max_iterations must be at least 1".into()));
        }
        if let Some(fallback) = self.breakdown_fallback {
            if Some(fallback) == self.method.krylov() {
                return Err(KError::Configuration(format!(
                    "breakdown fallback `{fallback}` is the configured method"
                )));
            }
        }
        Ok(())
    }
}

fn parsed<N, F>(lookup: &F, key: &str) -> Result<Option<N>, KError>
where
    N: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| KError::Configuration(format!("{key}={raw} is not a valid value"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = SolverConfig::default();
        assert_eq!(cfg.method, Method::Direct);
        assert!(!cfg.scaled && !cfg.preconditioned);
        assert_eq!(cfg.convergence_threshold, 1e-8);
        assert_eq!(cfg.scaling_threshold, 1e-5);
        assert_eq!(cfg.fill_threshold, 1e-8);
        assert_eq!(cfg.fill_level, 1);
        assert_eq!(cfg.max_iterations(100), 20);
        assert_eq!(cfg.max_iterations(3), 1);
    }

    #[test]
    fn parses_method_names() {
        assert_eq!("GMRES".parse::<Method>().unwrap(), Method::Gmres);
        assert_eq!("bcgs".parse::<Method>().unwrap(), Method::BiCgStab);
        assert_eq!("BiCGSafe".parse::<Method>().unwrap(), Method::BiCgSafe);
        assert_eq!("lu".parse::<Method>().unwrap(), Method::Direct);
        assert!(matches!("cholesky".parse::<Method>(), Err(KError::Configuration(_))));
    }

    #[test]
    fn parses_solver_codes() {
        let c = SolverConfig::from_solver_code("SPBCGS").unwrap();
        assert_eq!(c.method, Method::BiCgStab);
        assert!(c.scaled && c.preconditioned);
        let c = SolverConfig::from_solver_code("PGMRES").unwrap();
        assert_eq!(c.method, Method::Gmres);
        assert!(!c.scaled && c.preconditioned);
        let c = SolverConfig::from_solver_code("sbcgsa").unwrap();
        assert_eq!(c.method, Method::BiCgSafe);
        assert!(c.scaled && !c.preconditioned);
        assert_eq!(SolverConfig::from_solver_code("LU").unwrap().method, Method::Direct);
        assert!(SolverConfig::from_solver_code("PSGMRES").is_err());
    }

    #[test]
    fn reads_variables_from_lookup() {
        let vars: HashMap<&str, &str> =
            [("KSP", "SPGMRES"), ("CTHRES", "1e-10"), ("FLEVEL", "2"), ("IMAX", "40")]
                .into_iter()
                .collect();
        let cfg = SolverConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.method, Method::Gmres);
        assert_eq!(cfg.convergence_threshold, 1e-10);
        assert_eq!(cfg.fill_level, 2);
        assert_eq!(cfg.max_iterations(1000), 40);
        assert_eq!(cfg.scaling_threshold, 1e-5);
    }

    #[test]
    fn rejects_bad_values() {
        let bad = SolverConfig::from_lookup(|k| (k == "CTHRES").then(|| "fast".to_string()));
        assert!(matches!(bad, Err(KError::Configuration(_))));
        let neg = SolverConfig::default().with_convergence_threshold(-1.0);
        assert!(neg.validate().is_err());
        assert!(SolverConfig::default().with_restart(0).validate().is_err());
        let same =
            SolverConfig::new(Method::Gmres).with_breakdown_fallback(Some(KrylovKind::Gmres));
        assert!(same.validate().is_err());
        let lu = LuOptions { pivot_quality: 0.0, ..LuOptions::default() };
        assert!(SolverConfig::default().with_lu_options(lu).validate().is_err());
    }
}
