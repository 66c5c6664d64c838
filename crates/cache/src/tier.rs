use std::time::Duration;

/// Freshness tier of a cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Quick,
    Short,
    Medium,
    Long,
    Extended,
}

impl Tier {
    pub fn max_age(self) -> Duration {
        match self {
            Self::Quick => Duration::from_secs(10 * 60),
            Self::Short => Duration::from_secs(6 * 3600),
            Self::Medium => Duration::from_secs(24 * 3600),
            Self::Long => Duration::from_secs(7 * 24 * 3600),
            Self::Extended => Duration::from_secs(30 * 24 * 3600),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
            Self::Extended => "extended",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "quick" => Some(Self::Quick),
            "short" => Some(Self::Short),
            "medium" => Some(Self::Medium),
            "long" => Some(Self::Long),
            "extended" => Some(Self::Extended),
            _ => None,
        }
    }
}

/// How a read treats the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Serve the stored value while younger than the tier, otherwise compute.
    Cached(Tier),
    /// Always compute and overwrite.
    Refresh(Tier),
    /// Always miss, compute, and drop the stored value.
    Clear,
}

impl Policy {
    /// Maximum age at which a stored value may be served, if any.
    pub fn serve_age(self) -> Option<Duration> {
        match self {
            Self::Cached(t) => Some(t.max_age()),
            Self::Refresh(_) | Self::Clear => None,
        }
    }

    pub fn stores(self) -> bool {
        !matches!(self, Self::Clear)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_grow_monotonically() {
        let tiers = [Tier::Quick, Tier::Short, Tier::Medium, Tier::Long, Tier::Extended];
        for pair in tiers.windows(2) {
            assert!(pair[0].max_age() < pair[1].max_age());
        }
        assert_eq!(Tier::from_str("long"), Some(Tier::Long));
    }

    #[test]
    fn refresh_and_clear_never_serve() {
        assert!(Policy::Refresh(Tier::Short).serve_age().is_none());
        assert!(Policy::Clear.serve_age().is_none());
        assert!(!Policy::Clear.stores());
        assert_eq!(Policy::Cached(Tier::Quick).serve_age(), Some(Tier::Quick.max_age()));
    }
}
