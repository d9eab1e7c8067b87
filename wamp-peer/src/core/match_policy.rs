use std::fmt::Display;

/// How a subscription or registration URI should be matched by the router.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchPolicy {
    #[default]
    Exact,
    Prefix,
    Wildcard,
}

impl MatchPolicy {
    /// The value of the `match` option, if one should be sent.
    ///
    /// Exact matching is the router default and is never sent.
    pub fn option_value(&self) -> Option<&'static str> {
        match self {
            Self::Exact => None,
            other => Some((*other).into()),
        }
    }
}

impl TryFrom<&str> for MatchPolicy {
    type Error = anyhow::Error;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "exact" => Ok(Self::Exact),
            "prefix" => Ok(Self::Prefix),
            "wildcard" => Ok(Self::Wildcard),
            _ => Err(Self::Error::msg(format!("invalid match policy: {value}"))),
        }
    }
}

impl From<MatchPolicy> for &'static str {
    fn from(value: MatchPolicy) -> Self {
        match value {
            MatchPolicy::Exact => "exact",
            MatchPolicy::Prefix => "prefix",
            MatchPolicy::Wildcard => "wildcard",
        }
    }
}

impl Display for MatchPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Into::<&'static str>::into(*self))
    }
}
