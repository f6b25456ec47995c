//! Backend wire types.
//!
//! This module contains the request and response payloads exchanged with
//! the AutoMan backend. Field names follow the backend's camelCase schema.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::types::confidence::ConfidenceInterval;

/// Method name for submitting a task.
pub const METHOD_SUBMIT_TASK: &str = "submitTask";
/// Method name for querying backend status.
pub const METHOD_SERVER_STATUS: &str = "serverStatus";
/// Method name for registering adapter credentials.
pub const METHOD_REGISTER_ADAPTER: &str = "registerAdapter";
/// Method name for asking the backend to exit.
pub const METHOD_KILL_SERVER: &str = "killServer";

/// Sample size sent when the caller leaves it unset.
pub const UNSET_SAMPLE_SIZE: i64 = -1;

/// A task submission: one kind-specific task plus its lifetime on the crowd platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomanTask {
    /// The kind-specific task
    pub task: TaskPayload,
    /// Question lifetime in seconds
    pub timeout: u64,
}

/// Kind-specific task payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskPayload {
    /// Numeric estimate
    Estimate(WireTask),
    /// Single choice among options
    Radio(WireTask),
}

/// Fields shared by every task kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTask {
    /// Question shown to workers
    pub text: String,
    /// Total budget in dollars
    pub budget: f64,
    /// Task title
    pub title: String,
    /// Image shown with the question
    pub image_url: String,
    /// Alternate text for the image
    pub img_alt_txt: String,
    /// Requested confidence level
    pub confidence: f64,
    /// Interval strategy
    pub confidence_interval: ConfidenceInterval,
    /// Requested sample size, `-1` when unset
    pub sample_size: i64,
    /// Accept every worker answer
    pub dont_reject: bool,
    /// Pay workers even if the task fails
    pub pay_all_on_failure: bool,
    /// Do not post to the crowd platform
    pub dry_run: bool,
    /// Minimum hourly wage
    pub wage: f64,
    /// Smallest expected answer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    /// Largest expected answer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    /// Question lifetime as a multiple of the worker timeout
    pub question_timeout_multiplier: u32,
    /// Seconds a worker has to answer once accepted
    #[serde(rename = "initialWorkerTimeoutInS")]
    pub initial_worker_timeout_in_s: u32,
    /// Answer choices (radio tasks only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<OptionsTuple>,
}

/// Which shape the radio options take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TupleType {
    /// Label only
    Single,
    /// Label plus image URL
    Double,
}

/// A labelled choice with an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedUrl {
    /// Choice label
    pub name: String,
    /// Image URL
    pub url: String,
}

/// Radio options on the wire. Exactly one of the maps is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsTuple {
    /// Shape of the populated map
    pub tuple_type: TupleType,
    /// Label-only choices
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub single: IndexMap<String, String>,
    /// Label-with-image choices
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub double: IndexMap<String, NamedUrl>,
}

/// Response-level status of a task submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnCode {
    /// The outcome field is populated
    Valid,
    /// The backend failed the task; see `errMsg`
    Error,
    /// The backend raised; see `excepMsg`
    Exception,
    /// Anything this client version does not recognize, or no code at all
    #[default]
    #[serde(other)]
    Undefined,
}

/// Response to [`METHOD_SUBMIT_TASK`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    /// Response status
    #[serde(default)]
    pub return_code: ReturnCode,
    /// Error text for `ERROR`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_msg: Option<String>,
    /// Exception text for `EXCEPTION`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excep_msg: Option<String>,
    /// Classified outcome for `VALID`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OutcomePayload>,
}

impl TaskResponse {
    /// A `VALID` response carrying `outcome`.
    pub fn valid(outcome: OutcomePayload) -> Self {
        Self {
            return_code: ReturnCode::Valid,
            err_msg: None,
            excep_msg: None,
            outcome: Some(outcome),
        }
    }

    /// An `ERROR` response with a message.
    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            return_code: ReturnCode::Error,
            err_msg: Some(msg.into()),
            excep_msg: None,
            outcome: None,
        }
    }

    /// An `EXCEPTION` response with a message.
    pub fn exception(msg: impl Into<String>) -> Self {
        Self {
            return_code: ReturnCode::Exception,
            err_msg: None,
            excep_msg: Some(msg.into()),
            outcome: None,
        }
    }
}

/// Kind-specific outcome payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutcomePayload {
    /// Outcome of an estimate task
    EstimateOutcome(WireOutcome<EstimateAnswerWire>),
    /// Outcome of a radio task
    RadioOutcome(WireOutcome<RadioAnswerWire>),
}

/// Classification tag carried inside an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeType {
    /// Answer reached the requested confidence
    Confident,
    /// Answer did not reach the requested confidence
    LowConfidence,
    /// Budget ran out before an answer was reached
    Overbudget,
    /// Unrecognized classification
    #[serde(other)]
    Unknown,
}

/// An outcome with a kind-specific answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOutcome<A> {
    /// Classification
    pub outcome_type: OutcomeType,
    /// Budget required (overbudget only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub need: Option<f64>,
    /// Budget available (overbudget only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub have: Option<f64>,
    /// Answer (confident and low-confidence only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<A>,
}

impl<A> WireOutcome<A> {
    /// A confident outcome.
    pub fn confident(answer: A) -> Self {
        Self {
            outcome_type: OutcomeType::Confident,
            need: None,
            have: None,
            answer: Some(answer),
        }
    }

    /// A low-confidence outcome.
    pub fn low_confidence(answer: A) -> Self {
        Self {
            outcome_type: OutcomeType::LowConfidence,
            need: None,
            have: None,
            answer: Some(answer),
        }
    }

    /// An overbudget outcome.
    pub fn over_budget(need: f64, have: f64) -> Self {
        Self {
            outcome_type: OutcomeType::Overbudget,
            need: Some(need),
            have: Some(have),
            answer: None,
        }
    }
}

/// Estimate answer on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimateAnswerWire {
    /// Lower bound
    pub low: f64,
    /// Upper bound
    pub high: f64,
    /// Point estimate
    pub est: f64,
    /// Achieved confidence
    pub conf: f64,
    /// Amount spent
    pub cost: f64,
}

/// Radio answer on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioAnswerWire {
    /// Key of the chosen option
    pub option: String,
    /// Achieved confidence
    pub conf: f64,
    /// Amount spent
    pub cost: f64,
}

/// Backend process status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerStatus {
    /// Accepting tasks
    Running,
    /// Shutting down or stopped
    Killed,
    /// Unrecognized status
    #[serde(other)]
    Undefined,
}

/// Response to [`METHOD_SERVER_STATUS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatusResponse {
    /// Reported status
    pub status: ServerStatus,
}

/// Outcome of adapter registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationStatus {
    /// Adapter accepted
    Okay,
    /// Adapter rejected
    Failed,
    /// Unrecognized status
    #[serde(other)]
    Undefined,
}

/// Response to [`METHOD_REGISTER_ADAPTER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    /// Registration result
    pub status: RegistrationStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_unknown_return_code_is_undefined() {
        let resp: TaskResponse =
            serde_json::from_value(json!({"returnCode": "SOMETHING_NEW"})).unwrap();
        assert_eq!(resp.return_code, ReturnCode::Undefined);
        assert!(resp.outcome.is_none());
    }

    #[test]
    fn test_missing_return_code_is_undefined() {
        let resp: TaskResponse = serde_json::from_value(json!({})).unwrap();
        assert_eq!(resp.return_code, ReturnCode::Undefined);
    }

    #[test]
    fn test_outcome_without_answer_decodes() {
        let resp: TaskResponse = serde_json::from_value(json!({
            "returnCode": "VALID",
            "outcome": {"estimateOutcome": {"outcomeType": "OVERBUDGET", "need": 2.0, "have": 1.5}}
        }))
        .unwrap();
        assert_eq!(
            resp,
            TaskResponse::valid(OutcomePayload::EstimateOutcome(WireOutcome::over_budget(2.0, 1.5)))
        );

        let resp: TaskResponse = serde_json::from_value(json!({
            "returnCode": "VALID",
            "outcome": {"radioOutcome": {"outcomeType": "CONFIDENT"}}
        }))
        .unwrap();
        let Some(OutcomePayload::RadioOutcome(outcome)) = resp.outcome else {
            panic!("expected a radio outcome");
        };
        assert!(outcome.answer.is_none());
    }

    #[test]
    fn test_estimate_outcome_decodes() {
        let resp: TaskResponse = serde_json::from_value(json!({
            "returnCode": "VALID",
            "outcome": {
                "estimateOutcome": {
                    "outcomeType": "CONFIDENT",
                    "answer": {"low": 10.0, "high": 14.0, "est": 12.0, "conf": 0.92, "cost": 1.1}
                }
            }
        }))
        .unwrap();

        let expected = TaskResponse::valid(OutcomePayload::EstimateOutcome(
            WireOutcome::confident(EstimateAnswerWire {
                low: 10.0,
                high: 14.0,
                est: 12.0,
                conf: 0.92,
                cost: 1.1,
            }),
        ));
        assert_eq!(resp, expected);
    }

    #[test]
    fn test_task_payload_is_externally_tagged() {
        let task = AutomanTask {
            task: TaskPayload::Radio(WireTask {
                text: "pick".to_string(),
                budget: 1.0,
                title: String::new(),
                image_url: String::new(),
                img_alt_txt: String::new(),
                confidence: 0.95,
                confidence_interval: ConfidenceInterval::Unconstrained,
                sample_size: UNSET_SAMPLE_SIZE,
                dont_reject: true,
                pay_all_on_failure: true,
                dry_run: false,
                wage: 11.0,
                min_value: None,
                max_value: None,
                question_timeout_multiplier: 5,
                initial_worker_timeout_in_s: 60,
                options: None,
            }),
            timeout: 300,
        };
        let value = serde_json::to_value(&task).unwrap();
        assert!(value["task"]["radio"].is_object());
        assert_eq!(value["task"]["radio"]["initialWorkerTimeoutInS"], json!(60));
        assert_eq!(value["timeout"], json!(300));
    }

    #[test]
    fn test_status_responses() {
        let s: ServerStatusResponse = serde_json::from_value(json!({"status": "RUNNING"})).unwrap();
        assert_eq!(s.status, ServerStatus::Running);
        let r: RegistrationResponse = serde_json::from_value(json!({"status": "FAILED"})).unwrap();
        assert_eq!(r.status, RegistrationStatus::Failed);
    }
}
