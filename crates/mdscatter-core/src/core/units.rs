use phf::phf_map;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::fmt;
use std::ops::{Div, Mul};
use thiserror::Error;

const PLANCK: f64 = 6.626_070_15e-34;
const REDUCED_PLANCK: f64 = PLANCK / (2.0 * PI);
const SPEED_OF_LIGHT: f64 = 299_792_458.0;
const BOLTZMANN: f64 = 1.380_649e-23;
const AVOGADRO: f64 = 6.022_140_76e23;
const ATOMIC_MASS_UNIT: f64 = 1.660_539_066_60e-27;
const ELECTRON_VOLT: f64 = 1.602_176_634e-19;

/// Canonical units in which every quantity is stored and processed internally.
pub mod canonical {
    pub const LENGTH: &str = "nm";
    pub const TIME: &str = "ps";
    pub const ANGULAR_FREQUENCY: &str = "rad/ps";
    pub const ENERGY: &str = "meV";
    pub const MASS: &str = "amu";
    pub const VELOCITY: &str = "nm/ps";
    pub const FORCE: &str = "kJ/mol/nm";
    pub const INVERSE_LENGTH: &str = "1/nm";
}

#[derive(Debug, Error, PartialEq)]
pub enum UnitError {
    #[error("Unknown unit '{0}'")]
    UnknownUnit(String),

    #[error("Malformed unit expression '{expression}': {reason}")]
    Malformed { expression: String, reason: String },

    #[error("Cannot convert '{from}' to '{to}': incompatible dimensions")]
    Incompatible { from: String, to: String },
}

/// Exponents of the base dimensions: length, time, mass, temperature, amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dimension([i8; 5]);

impl Dimension {
    pub const DIMENSIONLESS: Dimension = Dimension([0, 0, 0, 0, 0]);
    pub const LENGTH: Dimension = Dimension([1, 0, 0, 0, 0]);
    pub const TIME: Dimension = Dimension([0, 1, 0, 0, 0]);
    pub const MASS: Dimension = Dimension([0, 0, 1, 0, 0]);
    pub const TEMPERATURE: Dimension = Dimension([0, 0, 0, 1, 0]);
    pub const AMOUNT: Dimension = Dimension([0, 0, 0, 0, 1]);
    pub const ENERGY: Dimension = Dimension([2, -2, 1, 0, 0]);
    pub const FREQUENCY: Dimension = Dimension([0, -1, 0, 0, 0]);
    pub const WAVENUMBER: Dimension = Dimension([-1, 0, 0, 0, 0]);
    pub const MOLAR_ENERGY: Dimension = Dimension([2, -2, 1, 0, -1]);

    fn combine(self, other: Self, sign: i8) -> Self {
        let mut exponents = self.0;
        for (e, o) in exponents.iter_mut().zip(other.0) {
            *e += sign * o;
        }
        Dimension(exponents)
    }

    fn scale(self, power: i8) -> Self {
        Dimension(self.0.map(|e| e * power))
    }
}

/// A parsed unit: a multiplicative factor relative to SI together with its dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Unit {
    pub factor: f64,
    pub dimension: Dimension,
}

impl Unit {
    pub const fn new(factor: f64, dimension: Dimension) -> Self {
        Self { factor, dimension }
    }

    pub fn powi(self, power: i8) -> Self {
        Self {
            factor: self.factor.powi(power as i32),
            dimension: self.dimension.scale(power),
        }
    }

    pub fn is_compatible(&self, other: &Unit) -> bool {
        self.dimension == other.dimension
    }
}

impl Mul for Unit {
    type Output = Unit;
    fn mul(self, rhs: Unit) -> Unit {
        Unit::new(self.factor * rhs.factor, self.dimension.combine(rhs.dimension, 1))
    }
}

impl Div for Unit {
    type Output = Unit;
    fn div(self, rhs: Unit) -> Unit {
        Unit::new(self.factor / rhs.factor, self.dimension.combine(rhs.dimension, -1))
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:e} SI {:?}", self.factor, self.dimension.0)
    }
}

const D0: Dimension = Dimension::DIMENSIONLESS;
const DL: Dimension = Dimension::LENGTH;
const DT: Dimension = Dimension::TIME;
const DM: Dimension = Dimension::MASS;
const DK: Dimension = Dimension::TEMPERATURE;
const DN: Dimension = Dimension::AMOUNT;
const DE: Dimension = Dimension::ENERGY;
const DF: Dimension = Dimension::FREQUENCY;
const DW: Dimension = Dimension::WAVENUMBER;

static BUILTIN_UNITS: phf::Map<&'static str, Unit> = phf_map! {
    "1" => Unit::new(1.0, D0),
    "rad" => Unit::new(1.0, D0),
    "au" => Unit::new(1.0, D0),
    "m" => Unit::new(1.0, DL),
    "cm" => Unit::new(1e-2, DL),
    "mm" => Unit::new(1e-3, DL),
    "um" => Unit::new(1e-6, DL),
    "nm" => Unit::new(1e-9, DL),
    "ang" => Unit::new(1e-10, DL),
    "angstrom" => Unit::new(1e-10, DL),
    "pm" => Unit::new(1e-12, DL),
    "fm" => Unit::new(1e-15, DL),
    "cm-1" => Unit::new(1e2, DW),
    "barn" => Unit::new(1e-28, Dimension([2, 0, 0, 0, 0])),
    "s" => Unit::new(1.0, DT),
    "ms" => Unit::new(1e-3, DT),
    "us" => Unit::new(1e-6, DT),
    "ns" => Unit::new(1e-9, DT),
    "ps" => Unit::new(1e-12, DT),
    "fs" => Unit::new(1e-15, DT),
    "hz" => Unit::new(2.0 * PI, DF),
    "khz" => Unit::new(2.0 * PI * 1e3, DF),
    "mhz" => Unit::new(2.0 * PI * 1e6, DF),
    "ghz" => Unit::new(2.0 * PI * 1e9, DF),
    "thz" => Unit::new(2.0 * PI * 1e12, DF),
    "kg" => Unit::new(1.0, DM),
    "g" => Unit::new(1e-3, DM),
    "amu" => Unit::new(ATOMIC_MASS_UNIT, DM),
    "uma" => Unit::new(ATOMIC_MASS_UNIT, DM),
    "da" => Unit::new(ATOMIC_MASS_UNIT, DM),
    "k" => Unit::new(1.0, DK),
    "mol" => Unit::new(1.0, DN),
    "j" => Unit::new(1.0, DE),
    "kj" => Unit::new(1e3, DE),
    "cal" => Unit::new(4.184, DE),
    "kcal" => Unit::new(4184.0, DE),
    "ev" => Unit::new(ELECTRON_VOLT, DE),
    "mev" => Unit::new(ELECTRON_VOLT * 1e-3, DE),
    "uev" => Unit::new(ELECTRON_VOLT * 1e-6, DE),
};

/// Parses and converts unit expressions such as `nm`, `kJ/mol/nm`, `nm^-1` or `1/ps`.
///
/// Unit names are case-insensitive except where case is significant in practice
/// (`meV` is milli-electronvolt, `MeV` mega-electronvolt). Custom units can be registered on
/// top of the built-in table.
#[derive(Debug, Clone, Default)]
pub struct UnitManager {
    custom: HashMap<String, Unit>,
}

impl UnitManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a custom unit under `name`, shadowing any built-in of the same name.
    pub fn add_custom_unit(&mut self, name: &str, unit: Unit) {
        self.custom.insert(name.to_lowercase(), unit);
    }

    fn lookup(&self, name: &str) -> Result<Unit, UnitError> {
        if name == "MeV" {
            return Ok(Unit::new(ELECTRON_VOLT * 1e6, DE));
        }
        let key = name.to_lowercase();
        if let Some(unit) = self.custom.get(&key) {
            return Ok(*unit);
        }
        BUILTIN_UNITS
            .get(key.as_str())
            .copied()
            .ok_or_else(|| UnitError::UnknownUnit(name.to_string()))
    }

    /// Parses a unit expression into a factor relative to SI and a dimension.
    pub fn parse(&self, expression: &str) -> Result<Unit, UnitError> {
        let malformed = |reason: &str| UnitError::Malformed {
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        let mut result = Unit::new(1.0, D0);
        let mut operator: Option<&str> = None;
        let mut factors = 0usize;
        for token in tokenize(expression) {
            match token {
                "*" | "/" => {
                    if factors == 0 || operator.is_some() {
                        return Err(malformed("operator without a left operand"));
                    }
                    operator = Some(token);
                }
                name => {
                    let factor = self.parse_factor(name, expression)?;
                    result = if operator == Some("/") {
                        result / factor
                    } else {
                        result * factor
                    };
                    operator = None;
                    factors += 1;
                }
            }
        }

        if factors == 0 {
            return Err(malformed("empty expression"));
        }
        if operator.is_some() {
            return Err(malformed("trailing operator"));
        }
        Ok(result)
    }

    fn parse_factor(&self, token: &str, expression: &str) -> Result<Unit, UnitError> {
        let (name, power) = match token.split_once('^') {
            Some((name, power)) => {
                let power: i8 = power.parse().map_err(|_| UnitError::Malformed {
                    expression: expression.to_string(),
                    reason: format!("invalid exponent '{}'", power),
                })?;
                (name, power)
            }
            None => (token, 1),
        };
        Ok(self.lookup(name)?.powi(power))
    }

    /// Returns the multiplicative factor converting values in `from` into `to`.
    pub fn conversion_factor(&self, from: &str, to: &str) -> Result<f64, UnitError> {
        let source = self.parse(from)?;
        let target = self.parse(to)?;
        if !source.is_compatible(&target) {
            return Err(UnitError::Incompatible {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(source.factor / target.factor)
    }

    pub fn convert(&self, value: f64, from: &str, to: &str) -> Result<f64, UnitError> {
        Ok(value * self.conversion_factor(from, to)?)
    }

    /// Converts between units that are related through an energy equivalence.
    ///
    /// Supported families: energy, angular frequency (E = ħω), wavenumber (E = hcν̃),
    /// temperature (E = k_B T), mass (E = mc²) and molar energy (E = x / N_A).
    /// Units of the same dimension are converted directly.
    pub fn convert_equivalent(&self, value: f64, from: &str, to: &str) -> Result<f64, UnitError> {
        let source = self.parse(from)?;
        let target = self.parse(to)?;
        if source.is_compatible(&target) {
            return Ok(value * source.factor / target.factor);
        }
        let incompatible = || UnitError::Incompatible {
            from: from.to_string(),
            to: to.to_string(),
        };
        let si = value * source.factor;
        let joules = to_joules(si, source.dimension).ok_or_else(incompatible)?;
        let target_si = from_joules(joules, target.dimension).ok_or_else(incompatible)?;
        Ok(target_si / target.factor)
    }
}

fn tokenize(expression: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in expression.char_indices() {
        if c.is_whitespace() || c == '*' || c == '/' {
            if let Some(s) = start.take() {
                tokens.push(&expression[s..i]);
            }
            if !c.is_whitespace() {
                tokens.push(&expression[i..i + 1]);
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        tokens.push(&expression[s..]);
    }
    tokens
}

fn to_joules(value: f64, dimension: Dimension) -> Option<f64> {
    match dimension {
        d if d == DE => Some(value),
        d if d == DF => Some(value * REDUCED_PLANCK),
        d if d == DW => Some(value * PLANCK * SPEED_OF_LIGHT),
        d if d == DK => Some(value * BOLTZMANN),
        d if d == DM => Some(value * SPEED_OF_LIGHT * SPEED_OF_LIGHT),
        d if d == Dimension::MOLAR_ENERGY => Some(value / AVOGADRO),
        _ => None,
    }
}

fn from_joules(joules: f64, dimension: Dimension) -> Option<f64> {
    match dimension {
        d if d == DE => Some(joules),
        d if d == DF => Some(joules / REDUCED_PLANCK),
        d if d == DW => Some(joules / (PLANCK * SPEED_OF_LIGHT)),
        d if d == DK => Some(joules / BOLTZMANN),
        d if d == DM => Some(joules / (SPEED_OF_LIGHT * SPEED_OF_LIGHT)),
        d if d == Dimension::MOLAR_ENERGY => Some(joules * AVOGADRO),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, rel: f64) -> bool {
        ((a - b) / b).abs() < rel
    }

    #[test]
    fn converts_between_lengths() {
        let units = UnitManager::new();
        assert!(close(units.convert(1.0, "nm", "ang").unwrap(), 10.0, 1e-12));
        assert!(close(units.convert(250.0, "pm", "nm").unwrap(), 0.25, 1e-12));
    }

    #[test]
    fn parses_compound_expressions() {
        let units = UnitManager::new();
        let velocity = units.parse("ang/fs").unwrap();
        assert_eq!(velocity.dimension, Dimension([1, -1, 0, 0, 0]));
        assert!(close(units.convert(1.0, "ang/fs", "nm/ps").unwrap(), 100.0, 1e-12));
        assert!(close(units.convert(1.0, "nm^-1", "ang^-1").unwrap(), 0.1, 1e-12));
        let force = units.parse("kJ/mol/nm").unwrap();
        assert_eq!(force.dimension, Dimension([1, -2, 1, 0, -1]));
    }

    #[test]
    fn hertz_is_two_pi_radians_per_second() {
        let units = UnitManager::new();
        let factor = units.conversion_factor("THz", "rad/ps").unwrap();
        assert!(close(factor, 2.0 * PI, 1e-12));
        assert!(close(units.convert(1.0, "1/ps", "rad/ps").unwrap(), 1.0, 1e-12));
    }

    #[test]
    fn rejects_incompatible_and_unknown_units() {
        let units = UnitManager::new();
        assert!(matches!(
            units.convert(1.0, "nm", "ps"),
            Err(UnitError::Incompatible { .. })
        ));
        assert!(matches!(
            units.parse("furlong"),
            Err(UnitError::UnknownUnit(_))
        ));
        assert!(matches!(
            units.parse("nm^x"),
            Err(UnitError::Malformed { .. })
        ));
        assert!(matches!(units.parse("/ps"), Err(UnitError::Malformed { .. })));
    }

    #[test]
    fn energy_equivalences_match_known_values() {
        let units = UnitManager::new();
        // 1 meV ~ 8.0655 cm-1 ~ 11.6045 K ~ 1.5193 rad/ps
        assert!(close(units.convert_equivalent(1.0, "meV", "cm-1").unwrap(), 8.065_544, 1e-5));
        assert!(close(units.convert_equivalent(1.0, "meV", "K").unwrap(), 11.604_518, 1e-5));
        assert!(close(units.convert_equivalent(1.0, "meV", "rad/ps").unwrap(), 1.519_267, 1e-5));
        assert!(close(units.convert_equivalent(1.0, "kJ/mol", "meV").unwrap(), 10.364_27, 1e-5));
        let back = units
            .convert_equivalent(units.convert_equivalent(3.0, "K", "THz").unwrap(), "THz", "K")
            .unwrap();
        assert!(close(back, 3.0, 1e-12));
    }

    #[test]
    fn custom_units_shadow_builtins() {
        let mut units = UnitManager::new();
        units.add_custom_unit("bohr", Unit::new(5.291_772_109e-11, Dimension::LENGTH));
        assert!(close(units.convert(1.0, "bohr", "ang").unwrap(), 0.529_177_2, 1e-6));
    }
}
