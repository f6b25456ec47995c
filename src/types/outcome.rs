//! Resolved task outcomes.
//!
//! An [`Outcome`] is the immutable classification of one backend response:
//! a confident answer, a low-confidence answer, or an overbudget signal.

use std::fmt;

/// Numeric estimate produced by an estimate task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimateAnswer {
    /// Lower bound of the interval
    pub low: f64,
    /// Upper bound of the interval
    pub high: f64,
    /// Point estimate
    pub est: f64,
    /// Confidence the backend achieved
    pub confidence: f64,
    /// Amount spent on the task
    pub cost: f64,
}

impl fmt::Display for EstimateAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "low={:.6} high={:.6} est={:.6}",
            self.low, self.high, self.est
        )
    }
}

/// Choice produced by a radio task.
#[derive(Debug, Clone, PartialEq)]
pub struct RadioAnswer {
    /// Key of the chosen option
    pub chosen_option: String,
    /// Confidence the backend achieved
    pub confidence: f64,
    /// Amount spent on the task
    pub cost: f64,
}

impl fmt::Display for RadioAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "answer={}", self.chosen_option)
    }
}

/// Kind-specific answer payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    /// Answer to an estimate task
    Estimate(EstimateAnswer),
    /// Answer to a radio task
    Radio(RadioAnswer),
}

impl Answer {
    /// Confidence the backend achieved.
    pub fn confidence(&self) -> f64 {
        match self {
            Self::Estimate(a) => a.confidence,
            Self::Radio(a) => a.confidence,
        }
    }

    /// Amount spent on the task.
    pub fn cost(&self) -> f64 {
        match self {
            Self::Estimate(a) => a.cost,
            Self::Radio(a) => a.cost,
        }
    }

    /// The estimate, if this is an estimate answer.
    pub fn as_estimate(&self) -> Option<&EstimateAnswer> {
        match self {
            Self::Estimate(a) => Some(a),
            Self::Radio(_) => None,
        }
    }

    /// The chosen option, if this is a radio answer.
    pub fn as_radio(&self) -> Option<&RadioAnswer> {
        match self {
            Self::Radio(a) => Some(a),
            Self::Estimate(_) => None,
        }
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Estimate(a) => a.fmt(f),
            Self::Radio(a) => a.fmt(f),
        }
    }
}

/// Which of the three outcome shapes a response was classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeType {
    /// `CONFIDENT`
    Confident,
    /// `LOW_CONFIDENCE`
    LowConfidence,
    /// `OVERBUDGET`
    OverBudget,
}

impl fmt::Display for OutcomeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confident => write!(f, "CONFIDENT"),
            Self::LowConfidence => write!(f, "LOW_CONFIDENCE"),
            Self::OverBudget => write!(f, "OVERBUDGET"),
        }
    }
}

/// Classified result of one task.
///
/// Exactly one shape is populated. Numeric accessors that do not apply to
/// the populated shape return `NaN`.
///
/// # Examples
///
/// ```
/// use automan_client::types::{Answer, EstimateAnswer, Outcome};
///
/// let outcome = Outcome::Confident(Answer::Estimate(EstimateAnswer {
///     low: 10.0,
///     high: 14.0,
///     est: 12.0,
///     confidence: 0.92,
///     cost: 1.10,
/// }));
/// assert!(outcome.is_confident());
/// assert!(outcome.need().is_nan());
/// assert_eq!(outcome.to_string(), "low=10.000000 high=14.000000 est=12.000000");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The answer reached the requested confidence.
    Confident(Answer),
    /// The answer did not reach the requested confidence.
    LowConfidence(Answer),
    /// The budget ran out before the requested confidence was reached.
    OverBudget {
        /// Budget the backend needs to continue
        need: f64,
        /// Budget that was available
        have: f64,
    },
}

impl Outcome {
    /// The classification of this outcome.
    pub fn outcome_type(&self) -> OutcomeType {
        match self {
            Self::Confident(_) => OutcomeType::Confident,
            Self::LowConfidence(_) => OutcomeType::LowConfidence,
            Self::OverBudget { .. } => OutcomeType::OverBudget,
        }
    }

    /// Returns `true` for a confident answer.
    pub fn is_confident(&self) -> bool {
        matches!(self, Self::Confident(_))
    }

    /// Returns `true` for a low-confidence answer.
    pub fn is_low_confidence(&self) -> bool {
        matches!(self, Self::LowConfidence(_))
    }

    /// Returns `true` for an overbudget signal.
    pub fn is_over_budget(&self) -> bool {
        matches!(self, Self::OverBudget { .. })
    }

    /// The answer payload, absent for overbudget outcomes.
    pub fn answer(&self) -> Option<&Answer> {
        match self {
            Self::Confident(a) | Self::LowConfidence(a) => Some(a),
            Self::OverBudget { .. } => None,
        }
    }

    /// Amount spent, or `NaN` when overbudget.
    pub fn cost(&self) -> f64 {
        self.answer().map_or(f64::NAN, Answer::cost)
    }

    /// Achieved confidence, or `NaN` when overbudget.
    pub fn confidence(&self) -> f64 {
        self.answer().map_or(f64::NAN, Answer::confidence)
    }

    /// Budget needed, or `NaN` when an answer was produced.
    pub fn need(&self) -> f64 {
        match self {
            Self::OverBudget { need, .. } => *need,
            _ => f64::NAN,
        }
    }

    /// Budget available, or `NaN` when an answer was produced.
    pub fn have(&self) -> f64 {
        match self {
            Self::OverBudget { have, .. } => *have,
            _ => f64::NAN,
        }
    }

    /// Two-line human-readable report: a heading and the payload.
    pub fn report(&self) -> String {
        let heading = match self {
            Self::Confident(Answer::Estimate(_)) => "Outcome: Confident Estimate",
            Self::Confident(Answer::Radio(_)) => "Outcome: Confident Answer",
            Self::LowConfidence(Answer::Estimate(_)) => "Outcome: Low Confidence Estimate",
            Self::LowConfidence(Answer::Radio(_)) => "Outcome: Low Confidence Answer",
            Self::OverBudget { .. } => "Outcome: Over Budget",
        };
        format!("{heading}\n{self}")
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confident(a) | Self::LowConfidence(a) => a.fmt(f),
            Self::OverBudget { need, have } => write!(f, "need={:.6} have={:.6}", need, have),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_over_budget_accessors() {
        let outcome = Outcome::OverBudget {
            need: 2.0,
            have: 1.5,
        };
        assert!(outcome.is_over_budget());
        assert!(!outcome.is_confident());
        assert!(!outcome.is_low_confidence());
        assert_eq!(outcome.need(), 2.0);
        assert_eq!(outcome.have(), 1.5);
        assert!(outcome.cost().is_nan());
        assert!(outcome.answer().is_none());
        assert_eq!(outcome.to_string(), "need=2.000000 have=1.500000");
    }

    #[test]
    fn test_radio_report() {
        let outcome = Outcome::LowConfidence(Answer::Radio(RadioAnswer {
            chosen_option: "choice2".to_string(),
            confidence: 0.7,
            cost: 0.9,
        }));
        assert_eq!(outcome.outcome_type(), OutcomeType::LowConfidence);
        assert_eq!(
            outcome.report(),
            "Outcome: Low Confidence Answer\nanswer=choice2"
        );
        assert_eq!(outcome.cost(), 0.9);
    }
}
