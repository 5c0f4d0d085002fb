//! Step declaration: spec, builder, and the invocation surface.

use crate::{executor, quorum};
use futures::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sinew_contract::{ContractDescriptor, Shape};
use sinew_core::{Budget, Inputs, Probabilistic, SinewError, config};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Agreement threshold for test-mode stability sampling.
const STABILITY_THRESHOLD: f64 = 0.9;

/// Where a step's results may be memoized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Never cache.
    #[default]
    None,
    /// Cache within the ambient flow's session; invisible to other flows.
    Session,
    /// Cache process-wide, keyed by contract hash as well — a contract
    /// change invalidates the entry.
    Global,
}

pub(crate) struct Precondition {
    pub(crate) label: String,
    pub(crate) check: Box<dyn Fn(&Inputs) -> bool + Send + Sync>,
}

pub(crate) struct Postcondition<T> {
    pub(crate) label: String,
    pub(crate) check: Box<dyn Fn(&T) -> bool + Send + Sync>,
}

/// How the step's output shape reached the builder.
pub(crate) enum ReturnShape {
    Contract(Arc<ContractDescriptor>),
    Inline(Shape),
}

pub(crate) struct StepSpec<T> {
    pub(crate) name: String,
    pub(crate) intent: String,
    pub(crate) context: Vec<String>,
    pub(crate) require: Vec<Precondition>,
    pub(crate) ensure: Vec<Postcondition<T>>,
    pub(crate) model: Option<String>,
    pub(crate) temperature: Option<f64>,
    pub(crate) budget: Option<Budget>,
    pub(crate) retries: u32,
    pub(crate) cache: CachePolicy,
    pub(crate) stable: bool,
    pub(crate) quorum: Option<(usize, usize)>,
    pub(crate) agree_on: Option<String>,
    pub(crate) params: Vec<String>,
    pub(crate) opaque_params: BTreeSet<String>,
    /// Schema delivered through the structured-output channel; non-object
    /// shapes arrive wrapped as `{value: T}`.
    pub(crate) tool_schema: Value,
    pub(crate) contract_hash: String,
    pub(crate) wrap_primitive: bool,
}

/// An invocable LLM-backed step.
///
/// Built once with [`Step::builder`]; each [`Step::call`] runs the full
/// execution state machine against the configured provider.
///
/// ```no_run
/// use serde::{Deserialize, Serialize};
/// use sinew_contract::{FieldDef, Shape};
/// use sinew_core::Inputs;
/// use sinew_exec::Step;
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Sentiment {
///     label: String,
///     confidence: f64,
/// }
///
/// # async fn demo() -> Result<(), sinew_core::SinewError> {
/// let contract = sinew_contract::register(
///     "Sentiment",
///     Shape::object(vec![
///         FieldDef::new("label", Shape::Enum(vec!["positive".into(), "negative".into()])),
///         FieldDef::new("confidence", Shape::Number),
///     ]),
/// )?;
///
/// let classify = Step::<Sentiment>::builder("classify_sentiment")
///     .intent("Classify the sentiment of the text")
///     .contract(contract)
///     .ensure("confident", |s: &Sentiment| s.confidence > 0.5)
///     .retries(2)
///     .build()?;
///
/// let sentiment = classify
///     .call(Inputs::new().bind("text", "what a release"))
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct Step<T> {
    pub(crate) spec: StepSpec<T>,
}

impl<T> Step<T> {
    /// Start declaring a step with the given qualified name.
    pub fn builder(name: impl Into<String>) -> StepBuilder<T> {
        StepBuilder::new(name)
    }

    /// The step's qualified name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// The field this step's outputs agree on, for quorum and debate.
    pub fn agree_on(&self) -> Option<&str> {
        self.spec.agree_on.as_deref()
    }
}

impl<T: DeserializeOwned + Serialize> Step<T> {
    /// Execute the step with the given inputs.
    ///
    /// Quorum steps fire their N executions concurrently and return the
    /// agreed value. In test mode a stable step is sampled `sample_n` times
    /// and must reach 90% agreement; the modal value is returned.
    pub async fn call(&self, inputs: Inputs) -> Result<T, SinewError> {
        self.call_with_context(inputs, &[]).await
    }

    /// Execute with extra context lines appended after the declared
    /// context. This is the seam refinement loops use to inject feedback;
    /// the extra lines participate in prompt compilation exactly like
    /// declared context.
    pub async fn call_with_context(
        &self,
        inputs: Inputs,
        extra_context: &[String],
    ) -> Result<T, SinewError> {
        self.check_params(&inputs)?;

        if self.spec.quorum.is_some() {
            return quorum::execute_quorum(&self.spec, &inputs, extra_context).await;
        }

        let cfg = config::current();
        if cfg.test_mode && self.spec.stable {
            let samples = self.sample_n_times(cfg.sample_n, &inputs, extra_context).await?;
            let distribution = Probabilistic::new(samples);
            distribution.assert_stable(STABILITY_THRESHOLD)?;
            return Ok(distribution.into_most_likely());
        }

        executor::execute_once(&self.spec, &inputs, extra_context)
            .await
            .map(|outcome| outcome.value)
    }

    /// Execute the step as a distribution.
    ///
    /// The return shape for steps that opt out of stability: production
    /// wraps the single output in a singleton, test mode collects
    /// `sample_n` samples with no agreement assertion. `most_likely()`,
    /// `sample()`, and `assert_stable()` behave correctly either way.
    pub async fn distribution(&self, inputs: Inputs) -> Result<Probabilistic<T>, SinewError> {
        self.check_params(&inputs)?;

        let cfg = config::current();
        let samples = if cfg.test_mode {
            self.sample_n_times(cfg.sample_n, &inputs, &[]).await?
        } else {
            vec![
                executor::execute_once(&self.spec, &inputs, &[])
                    .await?
                    .value,
            ]
        };
        Ok(Probabilistic::new(samples))
    }

    async fn sample_n_times(
        &self,
        n: usize,
        inputs: &Inputs,
        extra_context: &[String],
    ) -> Result<Vec<T>, SinewError> {
        let runs = (0..n.max(1)).map(|_| executor::execute_once(&self.spec, inputs, extra_context));
        let mut samples = Vec::with_capacity(n);
        for outcome in join_all(runs).await {
            samples.push(outcome?.value);
        }
        Ok(samples)
    }

    /// Declared parameters must all be bound before execution starts.
    fn check_params(&self, inputs: &Inputs) -> Result<(), SinewError> {
        for param in &self.spec.params {
            if inputs.get(param).is_none() {
                return Err(SinewError::compile(
                    format!("step '{}'", self.spec.name),
                    format!("missing binding for declared parameter '{param}'"),
                ));
            }
        }
        Ok(())
    }
}

/// Declarative builder for [`Step`].
pub struct StepBuilder<T> {
    name: String,
    intent: String,
    context: Vec<String>,
    require: Vec<Precondition>,
    ensure: Vec<Postcondition<T>>,
    model: Option<String>,
    temperature: Option<f64>,
    budget: Option<Budget>,
    retries: u32,
    cache: CachePolicy,
    stable: bool,
    quorum: Option<(usize, usize)>,
    agree_on: Option<String>,
    params: Vec<String>,
    opaque_params: BTreeSet<String>,
    returns: Option<ReturnShape>,
}

impl<T> StepBuilder<T> {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            intent: String::new(),
            context: Vec::new(),
            require: Vec::new(),
            ensure: Vec::new(),
            model: None,
            temperature: None,
            budget: None,
            retries: 3,
            cache: CachePolicy::None,
            stable: true,
            quorum: None,
            agree_on: None,
            params: Vec::new(),
            opaque_params: BTreeSet::new(),
            returns: None,
        }
    }

    /// The natural-language intent of the step. Required.
    pub fn intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = intent.into();
        self
    }

    /// Append a context annotation. Annotations render in declaration
    /// order.
    pub fn context(mut self, line: impl Into<String>) -> Self {
        self.context.push(line.into());
        self
    }

    /// Add a labelled precondition over the input bindings.
    pub fn require(
        mut self,
        label: impl Into<String>,
        check: impl Fn(&Inputs) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.require.push(Precondition {
            label: label.into(),
            check: Box::new(check),
        });
        self
    }

    /// Add a labelled postcondition over the typed output.
    pub fn ensure(
        mut self,
        label: impl Into<String>,
        check: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.ensure.push(Postcondition {
            label: label.into(),
            check: Box::new(check),
        });
        self
    }

    /// Override the configured default model for this step.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sampling temperature for provider calls.
    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Declare a budget. Restarted per invocation: the clock starts when
    /// execution starts, not here.
    pub fn budget(mut self, budget: Budget) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Retry ceiling: the maximum number of *additional* attempts after
    /// the first. Defaults to 3.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Cache policy. Defaults to [`CachePolicy::None`].
    pub fn cache(mut self, cache: CachePolicy) -> Self {
        self.cache = cache;
        self
    }

    /// Declare a named parameter. Declared parameters must be bound at
    /// every call.
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(name.into());
        self
    }

    /// Declare an opaque parameter: its value travels as a structured
    /// attachment and never appears in prompt text.
    pub fn opaque(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.params.contains(&name) {
            self.params.push(name.clone());
        }
        self.opaque_params.insert(name);
        self
    }

    /// The field quorum partitions (and debate convergence compares) on.
    pub fn agree_on(mut self, field: impl Into<String>) -> Self {
        self.agree_on = Some(field.into());
        self
    }

    /// Run `n` concurrent executions and require `threshold` of them to
    /// agree on the [`agree_on`](Self::agree_on) field.
    pub fn quorum(mut self, n: usize, threshold: usize) -> Self {
        self.quorum = Some((n, threshold));
        self
    }

    /// Opt out of stability: callers should use [`Step::distribution`] and
    /// work with the sample set.
    pub fn unstable(mut self) -> Self {
        self.stable = false;
        self
    }

    /// Declare the output shape inline, without registering a contract.
    /// Inline shapes carry no contract hash.
    pub fn returns(mut self, shape: Shape) -> Self {
        self.returns = Some(ReturnShape::Inline(shape));
        self
    }

    /// Declare the output via a registered contract.
    pub fn contract(mut self, contract: Arc<ContractDescriptor>) -> Self {
        self.returns = Some(ReturnShape::Contract(contract));
        self
    }

    /// Validate the declaration and produce the invocable step.
    pub fn build(self) -> Result<Step<T>, SinewError> {
        let location = format!("step '{}'", self.name);

        if self.intent.is_empty() {
            return Err(SinewError::compile(location, "intent must not be empty"));
        }

        let returns = self.returns.ok_or_else(|| {
            SinewError::compile(location.as_str(), "output shape required: call returns() or contract()")
        })?;

        if let Some((n, threshold)) = self.quorum {
            if self.agree_on.is_none() {
                return Err(SinewError::compile(
                    location.as_str(),
                    "quorum requires agree_on to name the agreement field",
                ));
            }
            if n == 0 || threshold == 0 || threshold > n {
                return Err(SinewError::compile(
                    location.as_str(),
                    format!("quorum threshold must satisfy 1 <= {threshold} <= {n}"),
                ));
            }
        }

        // An opaque value interpolated into intent or context would leak
        // into the cached prompt prefix.
        sinew_prompt::check_opaque_references(
            location.as_str(),
            &self.intent,
            &self.context,
            &self.opaque_params,
        )?;

        let (shape_schema, contract_hash, is_object) = match &returns {
            ReturnShape::Contract(c) => (c.schema().clone(), c.hash().to_string(), c.shape().is_object()),
            ReturnShape::Inline(shape) => (shape.to_json_schema(), "none".to_string(), shape.is_object()),
        };

        // The structured-output channel takes an object schema; primitive
        // returns ride in a single `value` property and are unwrapped at
        // parse time.
        let (tool_schema, wrap_primitive) = if is_object {
            (shape_schema, false)
        } else {
            (
                serde_json::json!({
                    "type": "object",
                    "properties": {"value": shape_schema},
                    "required": ["value"],
                }),
                true,
            )
        };

        Ok(Step {
            spec: StepSpec {
                name: self.name,
                intent: self.intent,
                context: self.context,
                require: self.require,
                ensure: self.ensure,
                model: self.model,
                temperature: self.temperature,
                budget: self.budget,
                retries: self.retries,
                cache: self.cache,
                stable: self.stable,
                quorum: self.quorum,
                agree_on: self.agree_on,
                params: self.params,
                opaque_params: self.opaque_params,
                tool_schema,
                contract_hash,
                wrap_primitive,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_requires_intent_and_shape() {
        let err = Step::<String>::builder("s").returns(Shape::String).build();
        assert!(matches!(err, Err(SinewError::Compile { .. })));

        let err = Step::<String>::builder("s").intent("do a thing").build();
        assert!(matches!(err, Err(SinewError::Compile { .. })));
    }

    #[test]
    fn quorum_requires_agree_on_and_sane_threshold() {
        let err = Step::<String>::builder("s")
            .intent("i")
            .returns(Shape::String)
            .quorum(3, 2)
            .build();
        assert!(matches!(err, Err(SinewError::Compile { .. })));

        let err = Step::<String>::builder("s")
            .intent("i")
            .returns(Shape::String)
            .agree_on("label")
            .quorum(3, 4)
            .build();
        assert!(matches!(err, Err(SinewError::Compile { .. })));

        let ok = Step::<String>::builder("s")
            .intent("i")
            .returns(Shape::String)
            .agree_on("label")
            .quorum(3, 2)
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn opaque_reference_in_context_rejected_at_build() {
        let err = Step::<String>::builder("summarize")
            .intent("Summarize the document")
            .context("Focus on {document} structure")
            .opaque("document")
            .returns(Shape::String)
            .build();
        assert!(matches!(err, Err(SinewError::Compile { .. })));
    }

    #[test]
    fn primitive_returns_are_wrapped() {
        let step = Step::<String>::builder("name_only")
            .intent("Return a name")
            .returns(Shape::String)
            .build()
            .unwrap();
        assert!(step.spec.wrap_primitive);
        assert_eq!(step.spec.tool_schema["properties"]["value"]["type"], "string");
        assert_eq!(step.spec.contract_hash, "none");
    }

    #[test]
    fn opaque_implies_param() {
        let step = Step::<String>::builder("s")
            .intent("i")
            .opaque("doc")
            .returns(Shape::String)
            .build()
            .unwrap();
        assert_eq!(step.spec.params, vec!["doc".to_string()]);
        assert!(step.spec.opaque_params.contains("doc"));
    }
}
