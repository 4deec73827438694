use core::fmt;
use core::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize};

/// Gyromagnetic ratios in MHz/T, keyed by isotope label.
const ISOTOPES: &[(&str, f64)] = &[
    ("1H", 42.577_478),
    ("2H", 6.536),
    ("7Li", 16.548),
    ("11B", 13.663),
    ("13C", 10.708_4),
    ("15N", -4.316),
    ("17O", -5.774),
    ("19F", 40.078),
    ("23Na", 11.262),
    ("27Al", 11.103),
    ("29Si", -8.465),
    ("31P", 17.235),
    ("87Rb", 13.984),
    ("119Sn", -15.966),
    ("207Pb", 9.034),
];

/// A nucleus known to the kernel builder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "String")]
pub struct Isotope {
    symbol: &'static str,
    gyromagnetic_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownIsotope(pub String);

impl fmt::Display for UnknownIsotope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown isotope '{}'", self.0)
    }
}

impl std::error::Error for UnknownIsotope {}

impl Isotope {
    pub fn symbol(&self) -> &'static str {
        self.symbol
    }

    /// Gyromagnetic ratio in MHz/T.
    pub fn gyromagnetic_ratio(&self) -> f64 {
        self.gyromagnetic_ratio
    }

    /// Larmor frequency in Hz at the given flux density (T). Signed.
    pub fn larmor_frequency(&self, magnetic_flux_density: f64) -> f64 {
        -self.gyromagnetic_ratio * 1e6 * magnetic_flux_density
    }
}

impl FromStr for Isotope {
    type Err = UnknownIsotope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        ISOTOPES
            .iter()
            .find(|(symbol, _)| symbol.eq_ignore_ascii_case(s))
            .map(|&(symbol, gyromagnetic_ratio)| Self {
                symbol,
                gyromagnetic_ratio,
            })
            .ok_or_else(|| UnknownIsotope(s.to_string()))
    }
}

impl<'de> Deserialize<'de> for Isotope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

impl From<Isotope> for String {
    fn from(value: Isotope) -> Self {
        value.symbol.to_string()
    }
}

impl fmt::Display for Isotope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_labels() {
        let si: Isotope = "29Si".parse().unwrap();
        assert_eq!(si.symbol(), "29Si");
        // 29Si at 9.4 T sits near 79.6 MHz.
        assert!((si.larmor_frequency(9.4).abs() - 79.571e6).abs() < 1e4);
        assert!("29si".parse::<Isotope>().is_ok());
        assert_eq!(
            "42Xx".parse::<Isotope>(),
            Err(UnknownIsotope("42Xx".to_string()))
        );
    }

    #[test]
    fn deserializes_from_label() {
        let c: Isotope = serde_json::from_str("\"13C\"").unwrap();
        assert_eq!(c.symbol(), "13C");
        assert_eq!(serde_json::to_string(&c).unwrap(), "\"13C\"");
        let err = serde_json::from_str::<Isotope>("\"42Xx\"").unwrap_err();
        assert!(err.to_string().contains("unknown isotope"));
    }
}
