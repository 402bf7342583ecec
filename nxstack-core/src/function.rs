//! Fitted peak and background functions.

use crate::{Error, Result};

/// Function family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    Gaussian,
    Lorentzian,
    PseudoVoigt,
    StraightLine,
    Quadratic,
    Cubic,
    /// Polynomial of the given degree.
    Polynomial(usize),
    Offset,
    Step,
}

impl FunctionKind {
    /// Parameter names in evaluation order.
    #[must_use]
    pub fn parameter_names(self) -> Vec<String> {
        let fixed: &[&str] = match self {
            FunctionKind::Gaussian | FunctionKind::Lorentzian => &["posn", "fwhm", "area"],
            FunctionKind::PseudoVoigt => &["posn", "l_fwhm", "g_fwhm", "area", "mix"],
            FunctionKind::StraightLine => &["m", "c"],
            FunctionKind::Quadratic => &["a", "b", "c"],
            FunctionKind::Cubic => &["a", "b", "c", "d"],
            FunctionKind::Offset => &["c"],
            FunctionKind::Step => &["base", "start", "end", "level"],
            FunctionKind::Polynomial(degree) => {
                return (0..=degree).rev().map(|p| format!("p{p}")).collect();
            }
        };
        fixed.iter().map(|s| (*s).to_string()).collect()
    }

    #[must_use]
    pub fn parameter_count(self) -> usize {
        match self {
            FunctionKind::Polynomial(degree) => degree + 1,
            other => other.parameter_names().len(),
        }
    }
}

/// A fit parameter with bounds. Infinite bounds are allowed.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
    pub fixed: bool,
}

impl Parameter {
    /// Unbounded, free parameter.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            lower: -f64::MAX,
            upper: f64::MAX,
            fixed: false,
        }
    }

    #[must_use]
    pub fn with_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }

    #[must_use]
    pub fn with_fixed(mut self, fixed: bool) -> Self {
        self.fixed = fixed;
        self
    }
}

/// A named function instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    kind: FunctionKind,
    name: String,
    parameters: Vec<Parameter>,
}

impl Function {
    /// Function of `kind` with every parameter at zero.
    #[must_use]
    pub fn new(kind: FunctionKind) -> Self {
        let parameters = kind
            .parameter_names()
            .into_iter()
            .map(|n| Parameter::new(n, 0.0))
            .collect();
        Self {
            kind,
            name: default_name(kind),
            parameters,
        }
    }

    /// Function of `kind` with explicit parameters.
    ///
    /// # Errors
    /// Returns an error if the parameter count does not match the kind or a
    /// bound is inverted.
    pub fn with_parameters(kind: FunctionKind, parameters: Vec<Parameter>) -> Result<Self> {
        if parameters.len() != kind.parameter_count() {
            return Err(Error::InvalidParameters(format!(
                "{} takes {} parameters, got {}",
                default_name(kind),
                kind.parameter_count(),
                parameters.len()
            )));
        }
        if let Some(p) = parameters.iter().find(|p| p.lower > p.upper) {
            return Err(Error::InvalidParameters(format!(
                "parameter {} has lower bound {} above upper bound {}",
                p.name, p.lower, p.upper
            )));
        }
        Ok(Self {
            kind,
            name: default_name(kind),
            parameters,
        })
    }

    /// Function of `kind` with the given parameter values.
    ///
    /// # Errors
    /// Returns an error if the value count does not match the kind.
    pub fn with_values(kind: FunctionKind, values: &[f64]) -> Result<Self> {
        let parameters = kind
            .parameter_names()
            .into_iter()
            .zip(values)
            .map(|(n, &v)| Parameter::new(n, v))
            .collect::<Vec<_>>();
        if values.len() != parameters.len() {
            return Err(Error::InvalidParameters(format!(
                "{} takes {} parameters, got {}",
                default_name(kind),
                kind.parameter_count(),
                values.len()
            )));
        }
        Self::with_parameters(kind, parameters)
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Parameter values in evaluation order.
    #[must_use]
    pub fn values(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.value).collect()
    }

    /// Evaluates the function at `x`.
    #[must_use]
    pub fn value(&self, x: f64) -> f64 {
        let p = self.values();
        match self.kind {
            FunctionKind::Gaussian => gaussian(x, p[0], p[1], p[2]),
            FunctionKind::Lorentzian => lorentzian(x, p[0], p[1], p[2]),
            FunctionKind::PseudoVoigt => {
                let mix = p[4];
                mix * lorentzian(x, p[0], p[1], p[3]) + (1.0 - mix) * gaussian(x, p[0], p[2], p[3])
            }
            FunctionKind::StraightLine => p[0] * x + p[1],
            FunctionKind::Quadratic | FunctionKind::Cubic | FunctionKind::Polynomial(_) => {
                p.iter().fold(0.0, |acc, c| acc * x + c)
            }
            FunctionKind::Offset => p[0],
            FunctionKind::Step => {
                if x >= p[1] && x <= p[2] {
                    p[0] + p[3]
                } else {
                    p[0]
                }
            }
        }
    }
}

/// Display name of a kind, also used as the default instance name.
#[must_use]
pub fn default_name(kind: FunctionKind) -> String {
    match kind {
        FunctionKind::Gaussian => "Gaussian".to_string(),
        FunctionKind::Lorentzian => "Lorentzian".to_string(),
        FunctionKind::PseudoVoigt => "PseudoVoigt".to_string(),
        FunctionKind::StraightLine => "StraightLine".to_string(),
        FunctionKind::Quadratic => "Quadratic".to_string(),
        FunctionKind::Cubic => "Cubic".to_string(),
        FunctionKind::Polynomial(degree) => format!("Polynomial({degree})"),
        FunctionKind::Offset => "Offset".to_string(),
        FunctionKind::Step => "Step".to_string(),
    }
}

fn gaussian(x: f64, posn: f64, fwhm: f64, area: f64) -> f64 {
    let sigma = fwhm / (2.0 * (2.0 * std::f64::consts::LN_2).sqrt());
    let d = x - posn;
    area / (sigma * (2.0 * std::f64::consts::PI).sqrt()) * (-d * d / (2.0 * sigma * sigma)).exp()
}

fn lorentzian(x: f64, posn: f64, fwhm: f64, area: f64) -> f64 {
    let hw = fwhm / 2.0;
    let d = x - posn;
    area * hw / (std::f64::consts::PI * (d * d + hw * hw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parameter_counts() {
        assert_eq!(FunctionKind::Gaussian.parameter_count(), 3);
        assert_eq!(FunctionKind::PseudoVoigt.parameter_count(), 5);
        assert_eq!(FunctionKind::Polynomial(4).parameter_count(), 5);
        assert_eq!(
            FunctionKind::Polynomial(2).parameter_names(),
            vec!["p2", "p1", "p0"]
        );
    }

    #[test]
    fn test_gaussian_half_maximum() {
        let g = Function::with_values(FunctionKind::Gaussian, &[1.0, 2.0, 3.0]).unwrap();
        let peak = g.value(1.0);
        assert_relative_eq!(g.value(2.0), peak / 2.0, epsilon = 1e-12);
        assert_relative_eq!(g.value(0.0), peak / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_lorentzian_half_maximum() {
        let l = Function::with_values(FunctionKind::Lorentzian, &[0.0, 4.0, 1.0]).unwrap();
        assert_relative_eq!(l.value(2.0), l.value(0.0) / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_polynomial_and_step() {
        let q = Function::with_values(FunctionKind::Quadratic, &[1.0, -2.0, 3.0]).unwrap();
        assert_relative_eq!(q.value(2.0), 3.0);
        let p = Function::with_values(FunctionKind::Polynomial(3), &[1.0, 0.0, 0.0, 1.0]).unwrap();
        assert_relative_eq!(p.value(2.0), 9.0);

        let s = Function::with_values(FunctionKind::Step, &[1.0, 0.0, 1.0, 5.0]).unwrap();
        assert_relative_eq!(s.value(0.5), 6.0);
        assert_relative_eq!(s.value(2.0), 1.0);
    }

    #[test]
    fn test_rejects_wrong_count_and_inverted_bounds() {
        assert!(Function::with_values(FunctionKind::Offset, &[1.0, 2.0]).is_err());
        let bad = vec![Parameter::new("c", 0.0).with_bounds(1.0, -1.0)];
        assert!(Function::with_parameters(FunctionKind::Offset, bad).is_err());
    }

    #[test]
    fn test_default_function() {
        let f = Function::new(FunctionKind::Cubic).with_name("bg");
        assert_eq!(f.name(), "bg");
        assert_eq!(f.values(), vec![0.0; 4]);
        assert!(!f.parameters()[0].fixed);
    }
}
