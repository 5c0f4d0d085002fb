//! Gathering primitives: all, any, at-least-N, collect, race.

use futures::future::{join_all, select_all, try_join_all};
use futures::stream::{FuturesUnordered, StreamExt};
use sinew_core::SinewError;
use std::future::Future;

/// Per-branch result wrapper for [`collect`].
#[derive(Debug)]
pub enum Outcome<T> {
    /// The branch completed with a value.
    Success(T),
    /// The branch failed; the error is carried, not propagated.
    Failure(SinewError),
}

impl<T> Outcome<T> {
    /// Whether this branch succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The value, if the branch succeeded.
    pub fn success(&self) -> Option<&T> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure(_) => None,
        }
    }

    /// The error, if the branch failed.
    pub fn failure(&self) -> Option<&SinewError> {
        match self {
            Self::Failure(err) => Some(err),
            Self::Success(_) => None,
        }
    }
}

/// Run all branches; return their results in input order.
///
/// The first failure cancels the remaining branches (they are dropped) and
/// propagates.
pub async fn all<T, F>(branches: Vec<F>) -> Result<Vec<T>, SinewError>
where
    F: Future<Output = Result<T, SinewError>>,
{
    try_join_all(branches).await
}

/// [`all`], plus a validator over the complete result vector. A false
/// verdict fails with [`SinewError::ParallelValidation`].
pub async fn all_validated<T, F>(
    branches: Vec<F>,
    validate: impl FnOnce(&[T]) -> bool,
) -> Result<Vec<T>, SinewError>
where
    F: Future<Output = Result<T, SinewError>>,
{
    let results = try_join_all(branches).await?;
    if !validate(&results) {
        return Err(SinewError::ParallelValidation {
            message: "validator rejected the gathered results".into(),
        });
    }
    Ok(results)
}

/// First branch to succeed wins; the rest are cancelled by drop. When every
/// branch fails, the last failure (in completion order) propagates.
pub async fn any<T, F>(branches: Vec<F>) -> Result<T, SinewError>
where
    F: Future<Output = Result<T, SinewError>>,
{
    if branches.is_empty() {
        return Err(SinewError::ParallelValidation {
            message: "any() requires at least one branch".into(),
        });
    }

    // Pin-box each branch so select_all can poll them in place.
    let mut remaining: Vec<_> = branches.into_iter().map(Box::pin).collect();
    let mut last_err = None;
    while !remaining.is_empty() {
        let (result, _index, rest) = select_all(remaining).await;
        match result {
            Ok(value) => return Ok(value), // dropping `rest` cancels the losers
            Err(err) => last_err = Some(err),
        }
        remaining = rest;
    }
    Err(last_err.unwrap_or(SinewError::ParallelValidation {
        message: "any(): all branches failed".into(),
    }))
}

/// Alias of [`any`].
pub async fn race<T, F>(branches: Vec<F>) -> Result<T, SinewError>
where
    F: Future<Output = Result<T, SinewError>>,
{
    any(branches).await
}

/// Gather every branch; require at least `n` successes and return the
/// first `n` of them in completion order. With fewer, the first failure
/// (in input order) propagates.
pub async fn at_least<T, F>(n: usize, branches: Vec<F>) -> Result<Vec<T>, SinewError>
where
    F: Future<Output = Result<T, SinewError>>,
{
    let indexed = FuturesUnordered::from_iter(
        branches
            .into_iter()
            .enumerate()
            .map(|(i, branch)| async move { (i, branch.await) }),
    );
    let completed: Vec<(usize, Result<T, SinewError>)> = indexed.collect().await;

    let mut successes = Vec::new();
    let mut first_failure: Option<(usize, SinewError)> = None;
    for (index, result) in completed {
        match result {
            Ok(value) => successes.push(value),
            Err(err) => match &first_failure {
                Some((seen, _)) if *seen <= index => {}
                _ => first_failure = Some((index, err)),
            },
        }
    }

    if successes.len() < n {
        return Err(match first_failure {
            Some((_, err)) => err,
            None => SinewError::ParallelValidation {
                message: format!("at_least({n}): only {} branches supplied", successes.len()),
            },
        });
    }
    successes.truncate(n);
    Ok(successes)
}

/// Gather every branch into one [`Outcome`] per input, in input order.
/// Never propagates a failure.
pub async fn collect<T, F>(branches: Vec<F>) -> Vec<Outcome<T>>
where
    F: Future<Output = Result<T, SinewError>>,
{
    join_all(branches)
        .await
        .into_iter()
        .map(|result| match result {
            Ok(value) => Outcome::Success(value),
            Err(err) => Outcome::Failure(err),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn ok_after(ms: u64, value: i32) -> BoxFuture<'static, Result<i32, SinewError>> {
        async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(value)
        }
        .boxed()
    }

    fn err_after(ms: u64, step: &str) -> BoxFuture<'static, Result<i32, SinewError>> {
        let step = step.to_string();
        async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Err(SinewError::Precondition {
                step,
                condition: "test".into(),
            })
        }
        .boxed()
    }

    #[tokio::test]
    async fn all_preserves_input_order() {
        let results = all(vec![ok_after(30, 1), ok_after(5, 2), ok_after(15, 3)])
            .await
            .unwrap();
        assert_eq!(results, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn all_propagates_first_failure_and_cancels() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let slow = async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(1)
        }
        .boxed();

        let err = all(vec![slow, err_after(5, "fast_failure")])
            .await
            .unwrap_err();
        assert!(matches!(err, SinewError::Precondition { .. }));

        // The slow branch was dropped before completing.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn all_validated_rejects_bad_vectors() {
        let err = all_validated(vec![ok_after(1, 1), ok_after(1, 2)], |results| {
            results.iter().sum::<i32>() > 10
        })
        .await
        .unwrap_err();
        assert!(matches!(err, SinewError::ParallelValidation { .. }));
    }

    #[tokio::test]
    async fn any_returns_first_success_and_cancels_losers() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let loser = async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(99)
        }
        .boxed();

        let won = any(vec![loser, ok_after(5, 42)]).await.unwrap();
        assert_eq!(won, 42);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn any_with_all_failures_returns_last() {
        let err = any(vec![err_after(5, "first"), err_after(30, "second")])
            .await
            .unwrap_err();
        match err {
            SinewError::Precondition { step, .. } => assert_eq!(step, "second"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn any_skips_early_failures() {
        let won = any(vec![err_after(1, "early"), ok_after(30, 7)])
            .await
            .unwrap();
        assert_eq!(won, 7);
    }

    #[tokio::test]
    async fn at_least_returns_completion_order() {
        let results = at_least(2, vec![ok_after(50, 1), ok_after(5, 2), ok_after(15, 3)])
            .await
            .unwrap();
        assert_eq!(results, vec![2, 3]);
    }

    #[tokio::test]
    async fn at_least_short_raises_first_input_failure() {
        let err = at_least(
            3,
            vec![ok_after(5, 1), err_after(30, "input_one"), err_after(1, "input_two")],
        )
        .await
        .unwrap_err();
        // input_one fails later in time but earlier in input order.
        match err {
            SinewError::Precondition { step, .. } => assert_eq!(step, "input_one"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn collect_never_propagates() {
        let outcomes = collect(vec![ok_after(5, 1), err_after(1, "fails"), ok_after(1, 3)]).await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].success(), Some(&1));
        assert!(outcomes[1].failure().is_some());
        assert_eq!(outcomes[2].success(), Some(&3));
    }
}
