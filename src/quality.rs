use std::fmt;
use std::str::FromStr;

/// Discrete classification of the current connection speed.
///
/// Variants are ordered by bandwidth, so `Poor < Excellent` holds. `Unknown` sorts first and is
/// the state before enough samples have been observed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionQuality {
    /// Placeholder until enough samples are available.
    #[default]
    Unknown,
    /// Bandwidth below the poor boundary.
    Poor,
    /// Bandwidth between the poor and moderate boundaries.
    Moderate,
    /// Bandwidth between the moderate and good boundaries.
    Good,
    /// Bandwidth above the good boundary.
    Excellent,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid connection quality: {0}")]
pub struct ParseQualityError(String);

impl ConnectionQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionQuality::Unknown => "UNKNOWN",
            ConnectionQuality::Poor => "POOR",
            ConnectionQuality::Moderate => "MODERATE",
            ConnectionQuality::Good => "GOOD",
            ConnectionQuality::Excellent => "EXCELLENT",
        }
    }

    /// Returns the tier one step closer to `target`, or `self` if already there.
    ///
    /// Stepping out of (or into) `Unknown` is not a bandwidth move, so it jumps directly.
    pub fn step_toward(self, target: ConnectionQuality) -> ConnectionQuality {
        use ConnectionQuality::*;

        if self == Unknown || target == Unknown || self == target {
            return target;
        }
        match (self < target, self) {
            (true, Poor) => Moderate,
            (true, Moderate) => Good,
            (true, _) => Excellent,
            (false, Excellent) => Good,
            (false, Good) => Moderate,
            (false, _) => Poor,
        }
    }
}

impl fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionQuality {
    type Err = ParseQualityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UNKNOWN" => Ok(ConnectionQuality::Unknown),
            "POOR" => Ok(ConnectionQuality::Poor),
            "MODERATE" => Ok(ConnectionQuality::Moderate),
            "GOOD" => Ok(ConnectionQuality::Good),
            "EXCELLENT" => Ok(ConnectionQuality::Excellent),
            _ => Err(ParseQualityError(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionQuality::*;
    use super::*;

    #[test]
    fn test_ordering_follows_bandwidth() {
        assert!(Unknown < Poor);
        assert!(Poor < Moderate);
        assert!(Moderate < Good);
        assert!(Good < Excellent);
    }

    #[test]
    fn test_display_and_parse() {
        for q in [Unknown, Poor, Moderate, Good, Excellent] {
            assert_eq!(q.to_string().parse::<ConnectionQuality>().unwrap(), q);
        }
        assert_eq!("excellent".parse::<ConnectionQuality>().unwrap(), Excellent);
        assert!("fast".parse::<ConnectionQuality>().is_err());
    }

    #[test]
    fn test_serde_uses_display_names() {
        assert_eq!(serde_json::to_string(&Moderate).unwrap(), "\"MODERATE\"");
        let q: ConnectionQuality = serde_json::from_str("\"GOOD\"").unwrap();
        assert_eq!(q, Good);
    }

    #[test]
    fn test_step_toward_moves_one_tier() {
        assert_eq!(Poor.step_toward(Excellent), Moderate);
        assert_eq!(Moderate.step_toward(Excellent), Good);
        assert_eq!(Excellent.step_toward(Poor), Good);
        assert_eq!(Good.step_toward(Poor), Moderate);
        assert_eq!(Moderate.step_toward(Poor), Poor);
        assert_eq!(Good.step_toward(Good), Good);
    }

    #[test]
    fn test_step_toward_unknown_jumps() {
        assert_eq!(Unknown.step_toward(Excellent), Excellent);
        assert_eq!(Good.step_toward(Unknown), Unknown);
    }
}
