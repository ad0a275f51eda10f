//! Evaluation of the client-side sampling decision.

use std::collections::BTreeMap;
use std::fmt;

use beacon_protocol::TransactionContext;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rate::{InvalidSampleRate, SampleRate};

/// Caller-supplied attributes passed verbatim to a [`TracesSampler`].
pub type CustomSamplingContext = BTreeMap<String, Value>;

/// Function computing the sample rate of a transaction dynamically.
///
/// The returned value is validated like a configured [`SampleRate`].
pub type TracesSampler = dyn Fn(&SamplingContext<'_>) -> SampleRate + Send + Sync;

/// The input to a [`TracesSampler`]: the transaction context merged with custom attributes.
#[derive(Clone, Copy, Debug)]
pub struct SamplingContext<'a> {
    transaction_context: &'a TransactionContext,
    custom: &'a CustomSamplingContext,
}

impl<'a> SamplingContext<'a> {
    /// Creates a sampling context.
    pub fn new(
        transaction_context: &'a TransactionContext,
        custom: &'a CustomSamplingContext,
    ) -> Self {
        Self {
            transaction_context,
            custom,
        }
    }

    /// Returns the context of the transaction being started.
    pub fn transaction_context(&self) -> &'a TransactionContext {
        self.transaction_context
    }

    /// Returns the name of the transaction being started.
    pub fn name(&self) -> &'a str {
        &self.transaction_context.name
    }

    /// Returns the operation of the transaction being started.
    pub fn op(&self) -> &'a str {
        &self.transaction_context.op
    }

    /// Returns the sampling decision of the parent span, if one was propagated.
    pub fn parent_sampled(&self) -> Option<bool> {
        self.transaction_context.parent_sampled
    }

    /// Returns a custom attribute supplied when starting the transaction.
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.custom.get(key)
    }
}

/// The source of a sampling decision.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub enum SamplingMethod {
    /// The transaction context carried an explicit decision.
    #[serde(rename = "explicitly_set")]
    Explicit,
    /// The configured traces sampler returned the rate.
    #[serde(rename = "client_sampler")]
    Sampler,
    /// The configured static sample rate was applied.
    #[serde(rename = "client_rate")]
    Rate,
    /// The decision was inherited from the parent span.
    #[serde(rename = "inheritance")]
    Inheritance,
}

impl SamplingMethod {
    /// Returns the string representation of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            SamplingMethod::Explicit => "explicitly_set",
            SamplingMethod::Sampler => "client_sampler",
            SamplingMethod::Rate => "client_rate",
            SamplingMethod::Inheritance => "inheritance",
        }
    }
}

impl fmt::Display for SamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records which rule produced a sampling decision.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct SamplingMetadata {
    /// The source of the decision.
    pub method: SamplingMethod,
    /// The validated rate that was applied, if the decision was rate based.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
}

impl SamplingMetadata {
    /// Creates metadata for the given method and rate.
    pub fn new(method: SamplingMethod, rate: Option<f64>) -> Self {
        Self { method, rate }
    }
}

/// The outcome of [`decide_sampling`].
#[derive(Clone, Debug, PartialEq)]
pub struct SamplingDecision {
    /// Whether the transaction is kept.
    pub sampled: bool,
    /// How the decision was made.
    ///
    /// This is `None` if tracing is disabled or the rate was invalid.
    pub metadata: Option<SamplingMetadata>,
    /// The validation error if the configured or returned rate was rejected.
    pub invalid: Option<InvalidSampleRate>,
}

impl SamplingDecision {
    fn new(sampled: bool, metadata: SamplingMetadata) -> Self {
        Self {
            sampled,
            metadata: Some(metadata),
            invalid: None,
        }
    }

    fn unsampled() -> Self {
        Self {
            sampled: false,
            metadata: None,
            invalid: None,
        }
    }

    fn invalid(error: InvalidSampleRate) -> Self {
        Self {
            sampled: false,
            metadata: None,
            invalid: Some(error),
        }
    }
}

/// The sampling configuration of a client.
#[derive(Clone, Copy, Default)]
pub struct SamplingConfig<'a> {
    /// The static rate applied to every transaction without a better source.
    pub sample_rate: Option<&'a SampleRate>,
    /// A function computing the rate per transaction.
    pub sampler: Option<&'a TracesSampler>,
}

impl SamplingConfig<'_> {
    /// Returns `true` if either a sample rate or a sampler is configured.
    pub fn has_tracing_enabled(&self) -> bool {
        self.sample_rate.is_some() || self.sampler.is_some()
    }
}

impl fmt::Debug for SamplingConfig<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SamplingConfig")
            .field("sample_rate", &self.sample_rate)
            .field("sampler", &self.sampler.map(|_| "TracesSampler { .. }"))
            .finish()
    }
}

/// Returns a uniformly distributed random number in `[0, 1)`.
pub fn random_value() -> f64 {
    rand::random::<f64>()
}

/// Decides whether a transaction is sampled.
///
/// `random` is called at most once, and only if the decision depends on a rate strictly between
/// `0` and `1`. The transaction is kept if the random value is less than the rate.
///
/// See the [crate documentation](crate) for the order in which sources are consulted.
pub fn decide_sampling<F>(
    context: &TransactionContext,
    config: &SamplingConfig<'_>,
    custom: &CustomSamplingContext,
    random: F,
) -> SamplingDecision
where
    F: FnOnce() -> f64,
{
    if let Some(sampled) = context.sampled {
        return SamplingDecision::new(
            sampled,
            SamplingMetadata::new(SamplingMethod::Explicit, None),
        );
    }

    if !config.has_tracing_enabled() {
        return SamplingDecision::unsampled();
    }

    let (method, sample_rate) = match (config.sampler, context.parent_sampled, config.sample_rate) {
        (Some(sampler), _, _) => {
            let sampling_context = SamplingContext::new(context, custom);
            (SamplingMethod::Sampler, sampler(&sampling_context))
        }
        (None, Some(parent_sampled), _) => {
            return SamplingDecision::new(
                parent_sampled,
                SamplingMetadata::new(SamplingMethod::Inheritance, None),
            );
        }
        (None, None, Some(sample_rate)) => (SamplingMethod::Rate, sample_rate.clone()),
        (None, None, None) => return SamplingDecision::unsampled(),
    };

    let rate = match sample_rate.validate() {
        Ok(rate) => rate,
        Err(error) => {
            beacon_log::warn!(
                error = &error as &dyn std::error::Error,
                transaction = %context.name,
                %method,
                "discarding transaction because of invalid sample rate"
            );
            return SamplingDecision::invalid(error);
        }
    };

    let metadata = SamplingMetadata::new(method, Some(rate));

    let sampled = if rate <= 0.0 {
        false
    } else if rate >= 1.0 {
        true
    } else {
        random() < rate
    };

    if !sampled {
        beacon_log::debug!(
            rate,
            %method,
            transaction = %context.name,
            "discarding transaction because it is not included in the random sample"
        );
    }

    SamplingDecision::new(sampled, metadata)
}
