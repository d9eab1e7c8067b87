use std::fmt::Display;

/// How an outstanding call should be canceled.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallCancelMode {
    /// CANCEL is sent to the router, and the call stays pending until the router answers with an
    /// ERROR or RESULT.
    #[default]
    Kill,
    /// CANCEL is sent to the router, and the call completes locally right away.
    KillNoWait,
    /// No CANCEL is sent. The call completes locally right away, and any later reply is dropped.
    Skip,
}

impl CallCancelMode {
    /// Checks if canceling in this mode completes the call without waiting for the router.
    pub fn completes_locally(&self) -> bool {
        !matches!(self, Self::Kill)
    }

    /// Checks if canceling in this mode sends CANCEL to the router.
    pub fn sends_cancel(&self) -> bool {
        !matches!(self, Self::Skip)
    }
}

impl TryFrom<&str> for CallCancelMode {
    type Error = anyhow::Error;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "kill" => Ok(Self::Kill),
            "killnowait" => Ok(Self::KillNoWait),
            "skip" => Ok(Self::Skip),
            _ => Err(Self::Error::msg(format!(
                "invalid call cancel mode: {value}"
            ))),
        }
    }
}

impl From<CallCancelMode> for &'static str {
    fn from(value: CallCancelMode) -> Self {
        match value {
            CallCancelMode::Kill => "kill",
            CallCancelMode::KillNoWait => "killnowait",
            CallCancelMode::Skip => "skip",
        }
    }
}

impl Display for CallCancelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Into::<&'static str>::into(*self))
    }
}

#[cfg(test)]
mod cancel_test {
    use crate::core::cancel::CallCancelMode;

    #[test]
    fn parses_wire_names() {
        assert_matches::assert_matches!(CallCancelMode::try_from("kill"), Ok(CallCancelMode::Kill));
        assert_matches::assert_matches!(
            CallCancelMode::try_from("killnowait"),
            Ok(CallCancelMode::KillNoWait)
        );
        assert_matches::assert_matches!(CallCancelMode::try_from("skip"), Ok(CallCancelMode::Skip));
        assert_matches::assert_matches!(CallCancelMode::try_from("abort"), Err(_));
        assert_eq!(CallCancelMode::KillNoWait.to_string(), "killnowait");
    }
}
