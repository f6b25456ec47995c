//! Confidence-interval strategies.
//!
//! A strategy tells the backend how tightly an estimate's uncertainty must
//! be bounded before the answer counts as confident.

use serde::{Deserialize, Serialize};

/// How a task's answer tolerance is expressed.
///
/// Serializes as an internally tagged object:
///
/// ```
/// use automan_client::types::ConfidenceInterval;
///
/// let ci = ConfidenceInterval::Symmetric { error: 2.5 };
/// let json = serde_json::to_value(&ci).unwrap();
/// assert_eq!(json, serde_json::json!({"type": "symmetric", "error": 2.5}));
///
/// let json = serde_json::to_value(ConfidenceInterval::Unconstrained).unwrap();
/// assert_eq!(json, serde_json::json!({"type": "unconstrained"}));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConfidenceInterval {
    /// No bound on the interval width.
    #[default]
    Unconstrained,
    /// The same tolerance on both sides of the estimate.
    Symmetric {
        /// Allowed error on either side.
        error: f64,
    },
    /// Different tolerances below and above the estimate.
    ///
    /// Not reachable from the task builders yet.
    #[serde(rename_all = "camelCase")]
    Asymmetric {
        /// Allowed error below the estimate.
        low_error: f64,
        /// Allowed error above the estimate.
        high_error: f64,
    },
}

impl ConfidenceInterval {
    /// Select a strategy from an optional interval width.
    ///
    /// `None` means the caller left the interval unset and yields
    /// [`ConfidenceInterval::Unconstrained`]; a value yields a symmetric
    /// interval of that width.
    pub fn from_width(width: Option<f64>) -> Self {
        match width {
            None => Self::Unconstrained,
            Some(error) => Self::Symmetric { error },
        }
    }

    /// Returns `true` for [`ConfidenceInterval::Unconstrained`].
    pub fn is_unconstrained(&self) -> bool {
        matches!(self, Self::Unconstrained)
    }
}
