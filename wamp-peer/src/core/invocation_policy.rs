use std::fmt::Display;

/// How the router should select a callee among several registrations of the same procedure.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocationPolicy {
    /// Only a single registration is allowed.
    #[default]
    Single,
    /// Callees are selected in order of registration.
    RoundRobin,
    /// A callee is selected at random.
    Random,
    /// The first registered callee is selected.
    First,
    /// The last registered callee is selected.
    Last,
}

impl InvocationPolicy {
    /// The value of the `invoke` option, if one should be sent.
    pub fn option_value(&self) -> Option<&'static str> {
        match self {
            Self::Single => None,
            other => Some((*other).into()),
        }
    }
}

impl TryFrom<&str> for InvocationPolicy {
    type Error = anyhow::Error;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "single" => Ok(Self::Single),
            "roundrobin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            _ => Err(Self::Error::msg(format!(
                "invalid invocation policy: {value}"
            ))),
        }
    }
}

impl From<InvocationPolicy> for &'static str {
    fn from(value: InvocationPolicy) -> Self {
        match value {
            InvocationPolicy::Single => "single",
            InvocationPolicy::RoundRobin => "roundrobin",
            InvocationPolicy::Random => "random",
            InvocationPolicy::First => "first",
            InvocationPolicy::Last => "last",
        }
    }
}

impl Display for InvocationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Into::<&'static str>::into(*self))
    }
}
