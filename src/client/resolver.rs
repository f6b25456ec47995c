//! Turning a raw task response into an [`Outcome`].
//!
//! The return code is checked first, then the kind-specific resolver
//! classifies the payload.

use serde_json::Value;
use tracing::debug;

use crate::error::{BackendErrorCode, Error, Result};
use crate::task::TaskKind;
use crate::types::outcome::{Answer, EstimateAnswer, Outcome, RadioAnswer};
use crate::types::protocol::{
    EstimateAnswerWire, OutcomePayload, OutcomeType, RadioAnswerWire, ReturnCode, TaskResponse,
    WireOutcome,
};

/// Classifies the outcome payload of one task kind.
pub trait ResolveOutcome: Send + Sync {
    /// The task kind this resolver handles.
    fn kind(&self) -> TaskKind;

    /// Classify a `VALID` response's payload.
    fn classify(&self, payload: OutcomePayload) -> Result<Outcome>;
}

/// Resolver for estimate tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimateResolver;

impl ResolveOutcome for EstimateResolver {
    fn kind(&self) -> TaskKind {
        TaskKind::Estimate
    }

    fn classify(&self, payload: OutcomePayload) -> Result<Outcome> {
        let OutcomePayload::EstimateOutcome(outcome) = payload else {
            return Err(Error::protocol("expected an estimate outcome, got a radio outcome"));
        };
        classify_with(outcome, |a: EstimateAnswerWire| {
            Answer::Estimate(EstimateAnswer {
                low: a.low,
                high: a.high,
                est: a.est,
                confidence: a.conf,
                cost: a.cost,
            })
        })
    }
}

/// Resolver for radio tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct RadioResolver;

impl ResolveOutcome for RadioResolver {
    fn kind(&self) -> TaskKind {
        TaskKind::Radio
    }

    fn classify(&self, payload: OutcomePayload) -> Result<Outcome> {
        let OutcomePayload::RadioOutcome(outcome) = payload else {
            return Err(Error::protocol("expected a radio outcome, got an estimate outcome"));
        };
        classify_with(outcome, |a: RadioAnswerWire| {
            Answer::Radio(RadioAnswer {
                chosen_option: a.option,
                confidence: a.conf,
                cost: a.cost,
            })
        })
    }
}

fn classify_with<A>(outcome: WireOutcome<A>, to_answer: impl FnOnce(A) -> Answer) -> Result<Outcome> {
    match outcome.outcome_type {
        OutcomeType::Overbudget => Ok(Outcome::OverBudget {
            need: outcome.need.unwrap_or(f64::NAN),
            have: outcome.have.unwrap_or(f64::NAN),
        }),
        OutcomeType::Confident | OutcomeType::LowConfidence => {
            let answer = outcome
                .answer
                .map(to_answer)
                .ok_or_else(|| Error::protocol("outcome is missing its answer"))?;
            if outcome.outcome_type == OutcomeType::Confident {
                Ok(Outcome::Confident(answer))
            } else {
                Ok(Outcome::LowConfidence(answer))
            }
        },
        OutcomeType::Unknown => Err(Error::protocol("unrecognized outcome type")),
    }
}

/// The resolver for `kind`.
pub fn resolver_for(kind: TaskKind) -> &'static dyn ResolveOutcome {
    match kind {
        TaskKind::Estimate => &EstimateResolver,
        TaskKind::Radio => &RadioResolver,
    }
}

/// Decode a raw `submitTask` reply and classify it.
///
/// # Errors
///
/// - [`Error::ProtocolVersion`] for an `UNDEFINED` return code
/// - [`Error::Backend`] for `ERROR` and `EXCEPTION`, carrying the backend's text
/// - [`Error::Protocol`] if the reply is malformed or of the wrong kind
pub fn resolve_response(kind: TaskKind, raw: Value) -> Result<Outcome> {
    let response: TaskResponse = serde_json::from_value(raw)
        .map_err(|e| Error::protocol(format!("malformed task response: {e}")))?;

    match response.return_code {
        ReturnCode::Valid => {
            let payload = response
                .outcome
                .ok_or_else(|| Error::protocol("VALID response without an outcome"))?;
            let resolver = resolver_for(kind);
            debug_assert_eq!(resolver.kind(), kind);
            let outcome = resolver.classify(payload)?;
            debug!(%kind, outcome = %outcome.outcome_type(), "task resolved");
            Ok(outcome)
        },
        ReturnCode::Error => Err(Error::Backend {
            code: BackendErrorCode::Error,
            message: response.err_msg.unwrap_or_default(),
        }),
        ReturnCode::Exception => Err(Error::Backend {
            code: BackendErrorCode::Exception,
            message: response.excep_msg.unwrap_or_default(),
        }),
        ReturnCode::Undefined => Err(Error::ProtocolVersion),
    }
}
