//! Multi-round debate: concurrent agents, sequential rounds, one
//! synthesiser.

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sinew_core::{Inputs, SinewError};
use sinew_exec::Step;
use std::future::Future;
use std::sync::Arc;

/// What one agent sees in one round.
#[derive(Debug, Clone)]
pub struct DebateTurn {
    /// The debate topic, identical in every round.
    pub topic: Value,
    /// The *other* agents' previous-round outputs. Empty in round one.
    pub previous: Vec<Value>,
}

type DebaterFn = Box<dyn Fn(DebateTurn) -> BoxFuture<'static, Result<Value, SinewError>> + Send + Sync>;

/// A participant in a debate.
pub struct Debater {
    name: String,
    agree_on: Option<String>,
    run: DebaterFn,
}

impl Debater {
    /// A debater backed by an arbitrary async closure.
    pub fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(DebateTurn) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, SinewError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            agree_on: None,
            run: Box::new(move |turn| run(turn).boxed()),
        }
    }

    /// A debater backed by a step. The step receives `topic` and, from
    /// round two on, `previous_arguments` as input bindings; its agree-on
    /// declaration carries over to convergence.
    pub fn from_step<T>(step: Arc<Step<T>>) -> Self
    where
        T: DeserializeOwned + Serialize + Send + Sync + 'static,
    {
        let name = step.name().to_string();
        let agree_on = step.agree_on().map(str::to_string);
        let run: DebaterFn = Box::new(move |turn: DebateTurn| {
            let step = Arc::clone(&step);
            async move {
                let mut inputs = Inputs::new().bind("topic", turn.topic);
                if !turn.previous.is_empty() {
                    inputs = inputs.bind("previous_arguments", Value::Array(turn.previous));
                }
                let output = step.call(inputs).await?;
                Ok(serde_json::to_value(&output).unwrap_or(Value::Null))
            }
            .boxed()
        });
        Self {
            name,
            agree_on,
            run,
        }
    }

    /// Declare the field convergence compares on.
    pub fn with_agree_on(mut self, field: impl Into<String>) -> Self {
        self.agree_on = Some(field.into());
        self
    }

    /// The debater's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Everything the synthesiser receives.
#[derive(Debug, Clone)]
pub struct Synthesis {
    /// The debate topic.
    pub topic: Value,
    /// Every round's outputs, in agent order within each round.
    pub rounds: Vec<Vec<Value>>,
    /// Whether the final round agreed.
    pub converged: bool,
}

fn convergence_key(value: &Value, agree_on: Option<&str>) -> String {
    match agree_on.and_then(|field| value.get(field)) {
        Some(field_value) => field_value.to_string(),
        None => value.to_string(),
    }
}

/// Run a multi-round debate.
///
/// Round one gives every agent only the topic; rounds two through
/// `rounds` give each agent the other agents' previous-round outputs.
/// Agents within a round run concurrently; rounds are sequential. After
/// the final round, convergence is computed over the declared agree-on
/// field (whole-value rendering when no agent declares one) and the
/// synthesiser's result becomes the debate's result.
pub async fn debate<Fut, R>(
    agents: &[Debater],
    topic: Value,
    rounds: usize,
    synthesize: impl FnOnce(Synthesis) -> Fut,
) -> Result<R, SinewError>
where
    Fut: Future<Output = Result<R, SinewError>>,
{
    if agents.is_empty() {
        return Err(SinewError::compile(
            "debate",
            "agents list must not be empty",
        ));
    }
    let rounds = rounds.max(1);

    let mut history: Vec<Vec<Value>> = Vec::with_capacity(rounds);

    // Round one: topic only.
    let opening = agents.iter().map(|agent| {
        (agent.run)(DebateTurn {
            topic: topic.clone(),
            previous: Vec::new(),
        })
    });
    let mut current: Vec<Value> = join_all(opening)
        .await
        .into_iter()
        .collect::<Result<_, _>>()?;
    history.push(current.clone());

    // Rebuttal rounds: each agent sees the others' previous outputs.
    for round in 1..rounds {
        tracing::debug!(round = round + 1, "debate rebuttal round");
        let rebuttals = agents.iter().enumerate().map(|(i, agent)| {
            let previous = current
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, v)| v.clone())
                .collect();
            (agent.run)(DebateTurn {
                topic: topic.clone(),
                previous,
            })
        });
        current = join_all(rebuttals)
            .await
            .into_iter()
            .collect::<Result<_, _>>()?;
        history.push(current.clone());
    }

    let agree_on = agents.iter().find_map(|a| a.agree_on.as_deref());
    let mut keys = current.iter().map(|v| convergence_key(v, agree_on));
    let converged = match keys.next() {
        Some(first) => keys.all(|k| k == first),
        None => false,
    };

    synthesize(Synthesis {
        topic,
        rounds: history,
        converged,
    })
    .await
}
