//! Task builders.
//!
//! Builders collect named parameters and validate them all at once in
//! `build()`. Validation failures are [`Error::Argument`] and no descriptor
//! is produced. Builders perform no I/O.

use indexmap::IndexMap;

use super::{EstimateTask, RadioOptions, RadioTask, TaskDescriptor, TaskParams};
use crate::error::{Error, Result};
use crate::types::confidence::ConfidenceInterval;

/// Default requested confidence.
pub const DEFAULT_CONFIDENCE: f64 = 0.95;
/// Default minimum hourly wage.
pub const DEFAULT_WAGE: f64 = 11.00;
/// Default question lifetime multiplier.
pub const DEFAULT_QUESTION_TIMEOUT_MULTIPLIER: u32 = 500;
/// Default seconds a worker has to answer.
pub const DEFAULT_INITIAL_WORKER_TIMEOUT_SECS: u32 = 30;

const MIN_CONFIDENCE_FRACTION: f64 = 0.5;
const MAX_CONFIDENCE_FRACTION: f64 = 1.0;
const MIN_CONFIDENCE_PERCENT: f64 = 50.0;
const MAX_CONFIDENCE_PERCENT: f64 = 100.0;

/// One radio choice: a plain label, or a label with an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioOption {
    /// Plain label
    Label(String),
    /// Label shown with an image
    LabelWithImage {
        /// Choice label
        label: String,
        /// Image URL
        url: String,
    },
}

impl RadioOption {
    /// A plain label.
    pub fn label(label: impl Into<String>) -> Self {
        Self::Label(label.into())
    }

    /// A label with an image.
    pub fn with_image(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self::LabelWithImage {
            label: label.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct CommonArgs {
    text: String,
    budget: f64,
    title: String,
    image_url: String,
    img_alt_text: String,
    confidence: f64,
    wage: f64,
    question_timeout_multiplier: u32,
    initial_worker_timeout_secs: u32,
    dont_reject: bool,
    pay_all_on_failure: bool,
    dry_run: bool,
}

impl CommonArgs {
    fn new(text: String, budget: f64) -> Self {
        Self {
            text,
            budget,
            title: String::new(),
            image_url: String::new(),
            img_alt_text: String::new(),
            confidence: DEFAULT_CONFIDENCE,
            wage: DEFAULT_WAGE,
            question_timeout_multiplier: DEFAULT_QUESTION_TIMEOUT_MULTIPLIER,
            initial_worker_timeout_secs: DEFAULT_INITIAL_WORKER_TIMEOUT_SECS,
            dont_reject: true,
            pay_all_on_failure: true,
            dry_run: false,
        }
    }

    fn validate(self) -> Result<TaskParams> {
        if !self.budget.is_finite() || self.budget <= 0.0 {
            return Err(Error::argument(
                "(required argument) budget must be strictly greater than 0",
            ));
        }
        if self.text.trim().is_empty() {
            return Err(Error::argument(
                "(required argument) text must be a non-empty string",
            ));
        }
        let confidence = normalize_confidence(self.confidence)?;
        if !self.wage.is_finite() || self.wage <= 0.0 {
            return Err(Error::argument("wage must be strictly greater than 0"));
        }
        if self.question_timeout_multiplier == 0 {
            return Err(Error::argument(
                "question_timeout_multiplier must be strictly greater than 0",
            ));
        }
        if self.initial_worker_timeout_secs == 0 {
            return Err(Error::argument(
                "initial_worker_timeout_secs must be strictly greater than 0",
            ));
        }

        Ok(TaskParams {
            text: self.text,
            budget: self.budget,
            title: self.title,
            image_url: self.image_url,
            img_alt_text: self.img_alt_text,
            confidence,
            wage: self.wage,
            question_timeout_multiplier: self.question_timeout_multiplier,
            initial_worker_timeout_secs: self.initial_worker_timeout_secs,
            dont_reject: self.dont_reject,
            pay_all_on_failure: self.pay_all_on_failure,
            dry_run: self.dry_run,
        })
    }
}

/// Accepts a fraction in `(0.5, 1.0]` or a legacy percentage in `[50, 100]`
/// and returns the fraction.
fn normalize_confidence(confidence: f64) -> Result<f64> {
    if confidence > MIN_CONFIDENCE_FRACTION && confidence <= MAX_CONFIDENCE_FRACTION {
        Ok(confidence)
    } else if (MIN_CONFIDENCE_PERCENT..=MAX_CONFIDENCE_PERCENT).contains(&confidence) {
        Ok(confidence / 100.0)
    } else {
        Err(Error::argument(format!(
            "confidence must be in (0.5, 1.0] or, as a percentage, in [50, 100] (got {confidence})"
        )))
    }
}

macro_rules! common_setters {
    () => {
        /// Task title shown to workers.
        pub fn title(mut self, title: impl Into<String>) -> Self {
            self.common.title = title.into();
            self
        }

        /// Image shown with the question.
        pub fn image_url(mut self, url: impl Into<String>) -> Self {
            self.common.image_url = url.into();
            self
        }

        /// Alternate text for the image.
        pub fn img_alt_text(mut self, text: impl Into<String>) -> Self {
            self.common.img_alt_text = text.into();
            self
        }

        /// Requested confidence, as a fraction or legacy percentage.
        pub fn confidence(mut self, confidence: f64) -> Self {
            self.common.confidence = confidence;
            self
        }

        /// Minimum hourly wage used to price each answer.
        pub fn wage(mut self, wage: f64) -> Self {
            self.common.wage = wage;
            self
        }

        /// Question lifetime as a multiple of the worker timeout.
        pub fn question_timeout_multiplier(mut self, multiplier: u32) -> Self {
            self.common.question_timeout_multiplier = multiplier;
            self
        }

        /// Seconds a worker has to answer once the task is accepted.
        pub fn initial_worker_timeout_secs(mut self, secs: u32) -> Self {
            self.common.initial_worker_timeout_secs = secs;
            self
        }

        /// Accept every worker answer.
        pub fn dont_reject(mut self, dont_reject: bool) -> Self {
            self.common.dont_reject = dont_reject;
            self
        }

        /// Pay workers even if the task fails.
        pub fn pay_all_on_failure(mut self, pay: bool) -> Self {
            self.common.pay_all_on_failure = pay;
            self
        }

        /// Run without posting to the crowd platform.
        pub fn dry_run(mut self, dry_run: bool) -> Self {
            self.common.dry_run = dry_run;
            self
        }
    };
}

/// Builder for estimate tasks.
///
/// # Examples
///
/// ```
/// use automan_client::task::{EstimateBuilder, TaskKind};
///
/// let task = EstimateBuilder::new("How many cars are in this parking lot?", 1.50)
///     .title("Car Counting")
///     .confidence(0.9)
///     .question_timeout_multiplier(5)
///     .initial_worker_timeout_secs(30)
///     .build()
///     .unwrap();
/// assert_eq!(task.kind(), TaskKind::Estimate);
/// assert_eq!(task.request_timeout_secs(), 150);
///
/// assert!(EstimateBuilder::new("", 1.0).build().is_err());
/// assert!(EstimateBuilder::new("text", 0.0).build().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct EstimateBuilder {
    common: CommonArgs,
    confidence_interval: Option<f64>,
    sample_size: Option<u32>,
    min_value: Option<f64>,
    max_value: Option<f64>,
}

impl EstimateBuilder {
    /// Start an estimate task with its two required parameters.
    pub fn new(text: impl Into<String>, budget: f64) -> Self {
        Self {
            common: CommonArgs::new(text.into(), budget),
            confidence_interval: None,
            sample_size: None,
            min_value: None,
            max_value: None,
        }
    }

    common_setters!();

    /// Symmetric interval width. Leaving it unset yields an unconstrained interval.
    pub fn confidence_interval(mut self, width: f64) -> Self {
        self.confidence_interval = Some(width);
        self
    }

    /// Requested number of worker answers.
    pub fn sample_size(mut self, size: u32) -> Self {
        self.sample_size = Some(size);
        self
    }

    /// Smallest expected answer.
    pub fn min_value(mut self, value: f64) -> Self {
        self.min_value = Some(value);
        self
    }

    /// Largest expected answer.
    pub fn max_value(mut self, value: f64) -> Self {
        self.max_value = Some(value);
        self
    }

    /// Same parameters with a different image, used for batch submission.
    pub(crate) fn with_image_url(&self, url: &str) -> Self {
        self.clone().image_url(url)
    }

    /// Validate and produce the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Argument`] if any parameter is out of range.
    pub fn build(self) -> Result<TaskDescriptor> {
        if let Some(width) = self.confidence_interval {
            if !width.is_finite() || width <= 0.0 {
                return Err(Error::argument(
                    "confidence_interval must be strictly greater than 0",
                ));
            }
        }
        if self.sample_size == Some(0) {
            return Err(Error::argument(
                "sample_size must be strictly greater than 0",
            ));
        }
        if let (Some(min), Some(max)) = (self.min_value, self.max_value) {
            if min > max {
                return Err(Error::argument(format!(
                    "min_value ({min}) must not exceed max_value ({max})"
                )));
            }
        }
        let params = self.common.validate()?;

        Ok(TaskDescriptor::Estimate(EstimateTask {
            params,
            confidence_interval: ConfidenceInterval::from_width(self.confidence_interval),
            sample_size: self.sample_size,
            min_value: self.min_value,
            max_value: self.max_value,
        }))
    }
}

/// Builder for radio (single-choice) tasks.
///
/// Every option must have the same shape: all plain labels, or all labels
/// with images.
///
/// # Examples
///
/// ```
/// use automan_client::task::{RadioBuilder, RadioOption};
///
/// let task = RadioBuilder::new("Choose the matching image", 1.50)
///     .option("choice1", RadioOption::with_image("a", "https://example.com/a.png"))
///     .option("choice2", RadioOption::with_image("b", "https://example.com/b.png"))
///     .build();
/// assert!(task.is_ok());
///
/// let mixed = RadioBuilder::new("Choose", 1.50)
///     .option("choice1", RadioOption::label("a"))
///     .option("choice2", RadioOption::with_image("b", "https://example.com/b.png"))
///     .build();
/// assert!(mixed.is_err());
/// ```
#[derive(Debug, Clone)]
pub struct RadioBuilder {
    common: CommonArgs,
    options: Vec<(String, RadioOption)>,
}

impl RadioBuilder {
    /// Start a radio task with its required text and budget.
    pub fn new(text: impl Into<String>, budget: f64) -> Self {
        Self {
            common: CommonArgs::new(text.into(), budget),
            options: Vec::new(),
        }
    }

    common_setters!();

    /// Add one answer choice under `key`.
    pub fn option(mut self, key: impl Into<String>, option: RadioOption) -> Self {
        self.options.push((key.into(), option));
        self
    }

    /// Add several answer choices.
    pub fn options<K, I>(mut self, options: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, RadioOption)>,
    {
        self.options
            .extend(options.into_iter().map(|(k, o)| (k.into(), o)));
        self
    }

    /// Validate and produce the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Argument`] if options are missing, mix shapes or
    /// repeat a key, or if any shared parameter is out of range.
    pub fn build(self) -> Result<TaskDescriptor> {
        let options = uniform_options(self.options)?;
        let params = self.common.validate()?;
        Ok(TaskDescriptor::Radio(RadioTask { params, options }))
    }
}

fn uniform_options(options: Vec<(String, RadioOption)>) -> Result<RadioOptions> {
    if options.is_empty() {
        return Err(Error::argument(
            "(required argument) options must contain at least one choice",
        ));
    }

    let mixed = Error::argument(
        "options must be all labels or all (label, url) pairs; the two formats cannot be mixed",
    );
    let duplicate = |key: &str| Error::argument(format!("duplicate option key '{key}'"));

    if matches!(options[0].1, RadioOption::Label(_)) {
        let mut labels = IndexMap::with_capacity(options.len());
        for (key, option) in options {
            let RadioOption::Label(label) = option else {
                return Err(mixed);
            };
            if labels.contains_key(&key) {
                return Err(duplicate(key.as_str()));
            }
            labels.insert(key, label);
        }
        Ok(RadioOptions::Labels(labels))
    } else {
        let mut pairs = IndexMap::with_capacity(options.len());
        for (key, option) in options {
            let RadioOption::LabelWithImage { label, url } = option else {
                return Err(mixed);
            };
            if pairs.contains_key(&key) {
                return Err(duplicate(key.as_str()));
            }
            pairs.insert(key, (label, url));
        }
        Ok(RadioOptions::LabelsWithImages(pairs))
    }
}
