//! Task descriptors.
//!
//! A [`TaskDescriptor`] is an immutable, validated description of one task.
//! Descriptors are produced by the builders in [`builder`] and turned into
//! wire requests by the submitter; they hold no reference to any channel.

pub mod builder;

use indexmap::IndexMap;
use std::fmt;

use crate::types::confidence::ConfidenceInterval;
use crate::types::protocol::{
    AutomanTask, NamedUrl, OptionsTuple, TaskPayload, TupleType, WireTask, UNSET_SAMPLE_SIZE,
};

pub use builder::{EstimateBuilder, RadioBuilder, RadioOption};

/// The kind of task, used to pick the matching outcome resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Numeric estimate
    Estimate,
    /// Single choice among options
    Radio,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Estimate => write!(f, "estimate"),
            Self::Radio => write!(f, "radio"),
        }
    }
}

/// Parameters shared by every task kind.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskParams {
    pub(crate) text: String,
    pub(crate) budget: f64,
    pub(crate) title: String,
    pub(crate) image_url: String,
    pub(crate) img_alt_text: String,
    pub(crate) confidence: f64,
    pub(crate) wage: f64,
    pub(crate) question_timeout_multiplier: u32,
    pub(crate) initial_worker_timeout_secs: u32,
    pub(crate) dont_reject: bool,
    pub(crate) pay_all_on_failure: bool,
    pub(crate) dry_run: bool,
}

impl TaskParams {
    /// Question shown to workers.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Total budget.
    pub fn budget(&self) -> f64 {
        self.budget
    }

    /// Task title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Image URL shown with the question.
    pub fn image_url(&self) -> &str {
        &self.image_url
    }

    /// Requested confidence as a fraction in `(0.5, 1.0]`.
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Minimum hourly wage.
    pub fn wage(&self) -> f64 {
        self.wage
    }

    /// Question lifetime as a multiple of the worker timeout.
    pub fn question_timeout_multiplier(&self) -> u32 {
        self.question_timeout_multiplier
    }

    /// Seconds a worker has to answer once the task is accepted.
    pub fn initial_worker_timeout_secs(&self) -> u32 {
        self.initial_worker_timeout_secs
    }

    fn to_wire(&self) -> WireTask {
        WireTask {
            text: self.text.clone(),
            budget: self.budget,
            title: self.title.clone(),
            image_url: self.image_url.clone(),
            img_alt_txt: self.img_alt_text.clone(),
            confidence: self.confidence,
            confidence_interval: ConfidenceInterval::Unconstrained,
            sample_size: UNSET_SAMPLE_SIZE,
            dont_reject: self.dont_reject,
            pay_all_on_failure: self.pay_all_on_failure,
            dry_run: self.dry_run,
            wage: self.wage,
            min_value: None,
            max_value: None,
            question_timeout_multiplier: self.question_timeout_multiplier,
            initial_worker_timeout_in_s: self.initial_worker_timeout_secs,
            options: None,
        }
    }
}

/// A validated estimate task.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimateTask {
    pub(crate) params: TaskParams,
    pub(crate) confidence_interval: ConfidenceInterval,
    pub(crate) sample_size: Option<u32>,
    pub(crate) min_value: Option<f64>,
    pub(crate) max_value: Option<f64>,
}

impl EstimateTask {
    /// The interval strategy chosen for this task.
    pub fn confidence_interval(&self) -> ConfidenceInterval {
        self.confidence_interval
    }

    /// Requested sample size, if set.
    pub fn sample_size(&self) -> Option<u32> {
        self.sample_size
    }
}

/// Validated radio options. All entries share one shape.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioOptions {
    /// Choice key to label
    Labels(IndexMap<String, String>),
    /// Choice key to label and image URL
    LabelsWithImages(IndexMap<String, (String, String)>),
}

impl RadioOptions {
    /// Number of choices.
    pub fn len(&self) -> usize {
        match self {
            Self::Labels(m) => m.len(),
            Self::LabelsWithImages(m) => m.len(),
        }
    }

    /// Returns `true` if there are no choices.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Choice keys in insertion order.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Self::Labels(m) => m.keys().map(String::as_str).collect(),
            Self::LabelsWithImages(m) => m.keys().map(String::as_str).collect(),
        }
    }

    fn to_wire(&self) -> OptionsTuple {
        match self {
            Self::Labels(m) => OptionsTuple {
                tuple_type: TupleType::Single,
                single: m.clone(),
                double: IndexMap::new(),
            },
            Self::LabelsWithImages(m) => OptionsTuple {
                tuple_type: TupleType::Double,
                single: IndexMap::new(),
                double: m
                    .iter()
                    .map(|(key, (name, url))| {
                        (
                            key.clone(),
                            NamedUrl {
                                name: name.clone(),
                                url: url.clone(),
                            },
                        )
                    })
                    .collect(),
            },
        }
    }
}

/// A validated radio task.
#[derive(Debug, Clone, PartialEq)]
pub struct RadioTask {
    pub(crate) params: TaskParams,
    pub(crate) options: RadioOptions,
}

impl RadioTask {
    /// The answer choices.
    pub fn options(&self) -> &RadioOptions {
        &self.options
    }
}

/// An immutable description of one task to run.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskDescriptor {
    /// Numeric estimate
    Estimate(EstimateTask),
    /// Single choice among options
    Radio(RadioTask),
}

impl TaskDescriptor {
    /// The task kind.
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Estimate(_) => TaskKind::Estimate,
            Self::Radio(_) => TaskKind::Radio,
        }
    }

    /// Parameters shared by every kind.
    pub fn params(&self) -> &TaskParams {
        match self {
            Self::Estimate(t) => &t.params,
            Self::Radio(t) => &t.params,
        }
    }

    /// Request-level timeout in seconds:
    /// `question_timeout_multiplier × initial_worker_timeout_secs`.
    pub fn request_timeout_secs(&self) -> u64 {
        let params = self.params();
        u64::from(params.question_timeout_multiplier)
            * u64::from(params.initial_worker_timeout_secs)
    }

    /// Build the wire request for this descriptor.
    pub fn to_wire(&self) -> AutomanTask {
        let payload = match self {
            Self::Estimate(t) => {
                let mut wire = t.params.to_wire();
                wire.confidence_interval = t.confidence_interval;
                wire.sample_size = t.sample_size.map_or(UNSET_SAMPLE_SIZE, i64::from);
                wire.min_value = t.min_value;
                wire.max_value = t.max_value;
                TaskPayload::Estimate(wire)
            },
            Self::Radio(t) => {
                let mut wire = t.params.to_wire();
                wire.options = Some(t.options.to_wire());
                TaskPayload::Radio(wire)
            },
        };
        AutomanTask {
            task: payload,
            timeout: self.request_timeout_secs(),
        }
    }
}
