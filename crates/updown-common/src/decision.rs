//! Decision types exchanged between policies and the coordinator.
//!
//! External payloads (model output, UI) are normalized at the boundary:
//! unknown actions collapse to `Skip`, unknown confidences to `Low`, and
//! low confidence always forces a skip.

use serde::{Deserialize, Serialize};

/// What the policy wants the coordinator to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    BuyYes,
    BuyNo,
    Skip,
}

impl Action {
    /// Parses an action from an external payload; unknown values skip.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_uppercase().as_str() {
            "BUY_YES" | "BUY YES" | "YES" | "UP" => Action::BuyYes,
            "BUY_NO" | "BUY NO" | "NO" | "DOWN" => Action::BuyNo,
            _ => Action::Skip,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Action::Skip)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::BuyYes => write!(f, "BUY_YES"),
            Action::BuyNo => write!(f, "BUY_NO"),
            Action::Skip => write!(f, "SKIP"),
        }
    }
}

/// How confident the policy is. Drives sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Parses a confidence from an external payload; unknown values are low.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_uppercase().as_str() {
            "HIGH" => Confidence::High,
            "MEDIUM" | "MED" => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::Low => write!(f, "LOW"),
            Confidence::Medium => write!(f, "MEDIUM"),
            Confidence::High => write!(f, "HIGH"),
        }
    }
}

/// A policy's verdict for one market snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub confidence: Confidence,
    /// Short machine-friendly tag for what was seen ("spike_up", "reversal", ...).
    pub pattern: String,
    /// Free-form explanation for the activity log.
    pub reasoning: String,
}

impl Decision {
    /// A skip decision with a reason.
    pub fn skip(pattern: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            action: Action::Skip,
            confidence: Confidence::Low,
            pattern: pattern.into(),
            reasoning: reasoning.into(),
        }
    }

    /// Enforces the boundary constraint: low confidence always skips.
    pub fn normalized(mut self) -> Self {
        if self.confidence == Confidence::Low && !self.action.is_skip() {
            self.reasoning = format!("low confidence, skipping: {}", self.reasoning);
            self.action = Action::Skip;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_from_label() {
        assert_eq!(Action::from_label("BUY_YES"), Action::BuyYes);
        assert_eq!(Action::from_label("buy_no"), Action::BuyNo);
        assert_eq!(Action::from_label("HOLD"), Action::Skip);
        assert_eq!(Action::from_label(""), Action::Skip);
    }

    #[test]
    fn test_confidence_from_label() {
        assert_eq!(Confidence::from_label("HIGH"), Confidence::High);
        assert_eq!(Confidence::from_label("medium"), Confidence::Medium);
        assert_eq!(Confidence::from_label("garbage"), Confidence::Low);
    }

    #[test]
    fn test_confidence_ordering() {
        assert!(Confidence::High > Confidence::Medium);
        assert!(Confidence::Medium > Confidence::Low);
    }

    #[test]
    fn test_low_confidence_forces_skip() {
        let d = Decision {
            action: Action::BuyYes,
            confidence: Confidence::Low,
            pattern: "spike_up".to_string(),
            reasoning: "weak".to_string(),
        }
        .normalized();

        assert_eq!(d.action, Action::Skip);
        assert!(d.reasoning.contains("low confidence"));
    }

    #[test]
    fn test_normalized_keeps_confident_action() {
        let d = Decision {
            action: Action::BuyNo,
            confidence: Confidence::High,
            pattern: "spike_down".to_string(),
            reasoning: "fast drop".to_string(),
        }
        .normalized();

        assert_eq!(d.action, Action::BuyNo);
        assert_eq!(d.confidence, Confidence::High);
    }

    #[test]
    fn test_decision_serializes_screaming_case() {
        let d = Decision::skip("none", "no signal");
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("\"SKIP\""));
        assert!(json.contains("\"LOW\""));
    }
}
