//! Memory parsing utilities for scheduler output.

/// Binary size units used by Grid Engine memory values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RamUnit {
    K,
    M,
    G,
    T,
    P,
}

impl RamUnit {
    fn from_suffix(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'K' => Some(Self::K),
            'M' => Some(Self::M),
            'G' => Some(Self::G),
            'T' => Some(Self::T),
            'P' => Some(Self::P),
            _ => None,
        }
    }

    fn power(self) -> i32 {
        match self {
            Self::K => 1,
            Self::M => 2,
            Self::G => 3,
            Self::T => 4,
            Self::P => 5,
        }
    }
}

/// Convert a human readable memory string to a value in `output` units.
///
/// Accepts forms such as "100G", "4.45G", "16000M", "1.5TB" or a bare number,
/// which is taken to be in `assumed` units. Conversion uses 1024 factors.
/// Returns None for placeholders ("-", "INFINITY", "NONE") or garbage.
pub fn human_to_ram(s: &str, output: RamUnit, assumed: RamUnit) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || s == "-" || s == "INFINITY" || s == "NONE" {
        return None;
    }

    let s = s
        .strip_suffix('B')
        .or_else(|| s.strip_suffix('b'))
        .unwrap_or(s);
    let (number, unit) = match s.chars().last().and_then(RamUnit::from_suffix) {
        Some(unit) => (&s[..s.len() - 1], unit),
        None => (s, assumed),
    };

    let value: f64 = number.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(value * 1024f64.powi(unit.power() - output.power()))
}

/// Like [`human_to_ram`] but rounded to the nearest whole unit.
pub fn human_to_ram_int(s: &str, output: RamUnit) -> Option<u64> {
    human_to_ram(s, output, RamUnit::G).map(|v| v.round() as u64)
}

/// Per-slot share of a RAM request, rounded up.
pub fn split_ram_by_slots(jobram: u64, slots: u32) -> u64 {
    let slots = u64::from(slots.max(1));
    jobram.div_ceil(slots)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_to_ram() {
        assert_eq!(human_to_ram("100G", RamUnit::G, RamUnit::G), Some(100.0));
        assert_eq!(human_to_ram("2048M", RamUnit::G, RamUnit::G), Some(2.0));
        assert_eq!(human_to_ram("1T", RamUnit::G, RamUnit::G), Some(1024.0));
        assert_eq!(human_to_ram("1.5GB", RamUnit::M, RamUnit::G), Some(1536.0));
        assert_eq!(human_to_ram("8", RamUnit::G, RamUnit::G), Some(8.0));
        assert_eq!(human_to_ram("512", RamUnit::G, RamUnit::M), Some(0.5));
    }

    #[test]
    fn test_human_to_ram_placeholders() {
        assert_eq!(human_to_ram("-", RamUnit::G, RamUnit::G), None);
        assert_eq!(human_to_ram("INFINITY", RamUnit::G, RamUnit::G), None);
        assert_eq!(human_to_ram("lots", RamUnit::G, RamUnit::G), None);
        assert_eq!(human_to_ram("", RamUnit::G, RamUnit::G), None);
    }

    #[test]
    fn test_human_to_ram_int() {
        assert_eq!(human_to_ram_int("125.8G", RamUnit::G), Some(126));
        assert_eq!(human_to_ram_int("200G", RamUnit::G), Some(200));
    }

    #[test]
    fn test_split_ram_by_slots() {
        assert_eq!(split_ram_by_slots(10, 3), 4);
        assert_eq!(split_ram_by_slots(16, 4), 4);
        assert_eq!(split_ram_by_slots(16, 0), 16);
    }
}
