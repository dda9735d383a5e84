//! Input collaborator: edge-triggered signals from the frontend.

use serde::{Deserialize, Serialize};

/// Edge-triggered playback input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSignal {
    /// Advance: stops skipping, releases an input wait or completes running
    /// animations, in that order of precedence.
    Continue,
    /// Skip while held.
    SkipHold { pressed: bool },
    ToggleSkip,
    ToggleAutoPlay,
    Stop,
}

impl std::str::FromStr for InputSignal {
    type Err = String;

    /// Console bindings: empty line continues, `s` toggles skip, `a`
    /// toggles auto-play, `q` stops.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "c" | "continue" => Ok(Self::Continue),
            "s" | "skip" => Ok(Self::ToggleSkip),
            "a" | "auto" => Ok(Self::ToggleAutoPlay),
            "q" | "quit" | "stop" => Ok(Self::Stop),
            other => Err(format!("unknown input: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_bindings() {
        assert_eq!("".parse::<InputSignal>().unwrap(), InputSignal::Continue);
        assert_eq!(" S \n".parse::<InputSignal>().unwrap(), InputSignal::ToggleSkip);
        assert_eq!("a".parse::<InputSignal>().unwrap(), InputSignal::ToggleAutoPlay);
        assert_eq!("quit".parse::<InputSignal>().unwrap(), InputSignal::Stop);
        assert!("x".parse::<InputSignal>().is_err());
    }

    #[test]
    fn serde_shape() {
        let json = serde_json::to_string(&InputSignal::SkipHold { pressed: true }).unwrap();
        assert_eq!(json, r#"{"skip_hold":{"pressed":true}}"#);
    }
}
