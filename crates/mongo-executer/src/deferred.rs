//! Lazy, composable computations
//!
//! A [`Deferred`] describes an asynchronous action that eventually yields either a
//! success value or a failure value. Building one, or composing it with
//! [`map`](Deferred::map), [`chain`](Deferred::chain) and friends, schedules nothing:
//! the action starts only when the deferred is [`run`](Deferred::run) (or awaited).
//! Each value runs at most once because running consumes it.
//!
//! Both calling conventions found in drivers can be adapted:
//! - async functions through [`Deferred::attempt`]
//! - completion callbacks through [`Deferred::node`]

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt};
use std::convert::Infallible;
use std::fmt;
use std::future::{Future, IntoFuture};

type Thunk<T, E> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, E>> + Send>;

/// A not-yet-started computation yielding `Ok(T)` or `Err(E)`.
#[must_use = "a deferred computation does nothing until it is run"]
pub struct Deferred<T, E> {
    thunk: Thunk<T, E>,
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").finish_non_exhaustive()
    }
}

impl<T, E> Deferred<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Wraps an async action. `f` is not called until the deferred runs.
    pub fn attempt<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            thunk: Box::new(move || f().boxed()),
        }
    }

    /// Wraps a callback-style action.
    ///
    /// `f` receives a [`Callback`] that must be completed once. A callback dropped
    /// without completion leaves the computation pending forever, the same as a hung
    /// driver call.
    pub fn node<F>(f: F) -> Self
    where
        F: FnOnce(Callback<T, E>) + Send + 'static,
    {
        Self::attempt(move || {
            let (tx, rx) = oneshot::channel();
            f(Callback { sender: tx });
            async move {
                match rx.await {
                    Ok(result) => result,
                    Err(_canceled) => futures::future::pending().await,
                }
            }
        })
    }

    /// A computation that succeeds with `value`.
    pub fn resolve(value: T) -> Self {
        Self::attempt(move || async move { Ok(value) })
    }

    /// A computation that fails with `error`.
    pub fn reject(error: E) -> Self {
        Self::attempt(move || async move { Err(error) })
    }

    /// Runs the computation.
    pub async fn run(self) -> Result<T, E> {
        (self.thunk)().await
    }

    /// Transforms the success value.
    pub fn map<U, F>(self, f: F) -> Deferred<U, E>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        Deferred::attempt(move || async move { self.run().await.map(f) })
    }

    /// Transforms the failure value.
    pub fn map_err<E2, F>(self, f: F) -> Deferred<T, E2>
    where
        E2: Send + 'static,
        F: FnOnce(E) -> E2 + Send + 'static,
    {
        Deferred::attempt(move || async move { self.run().await.map_err(f) })
    }

    /// Sequences another computation built from the success value.
    pub fn chain<U, F>(self, f: F) -> Deferred<U, E>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Deferred<U, E> + Send + 'static,
    {
        Deferred::attempt(move || async move {
            match self.run().await {
                Ok(value) => f(value).run().await,
                Err(error) => Err(error),
            }
        })
    }

    /// Replaces a failure with another computation built from it.
    pub fn chain_rej<E2, F>(self, f: F) -> Deferred<T, E2>
    where
        E2: Send + 'static,
        F: FnOnce(E) -> Deferred<T, E2> + Send + 'static,
    {
        Deferred::attempt(move || async move {
            match self.run().await {
                Ok(value) => Ok(value),
                Err(error) => f(error).run().await,
            }
        })
    }

    /// Collapses both branches into a computation that cannot fail.
    pub fn fold<U, L, R>(self, left: L, right: R) -> Deferred<U, Infallible>
    where
        U: Send + 'static,
        L: FnOnce(E) -> U + Send + 'static,
        R: FnOnce(T) -> U + Send + 'static,
    {
        Deferred::attempt(move || async move {
            Ok(match self.run().await {
                Ok(value) => right(value),
                Err(error) => left(error),
            })
        })
    }

    /// Runs `self`, then `next`, keeping the second result. A failure of `self`
    /// short-circuits.
    pub fn and<U>(self, next: Deferred<U, E>) -> Deferred<U, E>
    where
        U: Send + 'static,
    {
        self.chain(move |_| next)
    }
}

impl<T> Deferred<T, Infallible>
where
    T: Send + 'static,
{
    /// Runs a computation that cannot fail and returns its value.
    pub async fn value(self) -> T {
        match self.run().await {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }
}

impl<T, E> IntoFuture for Deferred<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    type Output = Result<T, E>;
    type IntoFuture = BoxFuture<'static, Result<T, E>>;

    fn into_future(self) -> Self::IntoFuture {
        (self.thunk)()
    }
}

/// Completion handle passed to callback-style actions.
pub struct Callback<T, E> {
    sender: oneshot::Sender<Result<T, E>>,
}

impl<T, E> Callback<T, E> {
    /// Completes the computation. Consumes the handle, so it can fire only once.
    pub fn complete(self, result: Result<T, E>) {
        // The receiver is gone only when the deferred itself was dropped mid-run.
        let _ = self.sender.send(result);
    }

    pub fn succeed(self, value: T) {
        self.complete(Ok(value));
    }

    pub fn fail(self, error: E) {
        self.complete(Err(error));
    }
}

impl<T, E> fmt::Debug for Callback<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counted(counter: Arc<AtomicUsize>) -> Deferred<usize, String> {
        Deferred::attempt(move || async move { Ok(counter.fetch_add(1, Ordering::SeqCst) + 1) })
    }

    #[test]
    fn test_construction_is_lazy() {
        let counter = Arc::new(AtomicUsize::new(0));
        let deferred = counted(counter.clone()).map(|n| n * 10);
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        let value = tokio_test::block_on(deferred.run());
        assert_eq!(value, Ok(10));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_map_and_chain() {
        let result = Deferred::<i32, String>::resolve(2)
            .map(|n| n + 1)
            .chain(|n| Deferred::resolve(n * 2))
            .await;
        assert_eq!(result, Ok(6));
    }

    #[tokio::test]
    async fn test_chain_skipped_on_failure() {
        let counter = Arc::new(AtomicUsize::new(0));
        let inner = counter.clone();
        let result = Deferred::<usize, String>::reject("boom".to_string())
            .chain(move |_| counted(inner))
            .await;
        assert_eq!(result, Err("boom".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chain_rej_recovers() {
        let result = Deferred::<i32, String>::reject("missing".to_string())
            .chain_rej(|e| Deferred::<i32, usize>::resolve(e.len() as i32))
            .await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_map_err() {
        let result = Deferred::<(), &str>::reject("bad").map_err(str::len).await;
        assert_eq!(result, Err(3));
    }

    #[tokio::test]
    async fn test_fold_never_fails() {
        let left = Deferred::<i32, String>::reject("no".to_string())
            .fold(|e| format!("left:{e}"), |v| format!("right:{v}"))
            .value()
            .await;
        let right = Deferred::<i32, String>::resolve(1)
            .fold(|e| format!("left:{e}"), |v| format!("right:{v}"))
            .value()
            .await;
        assert_eq!(left, "left:no");
        assert_eq!(right, "right:1");
    }

    #[tokio::test]
    async fn test_and_keeps_second_value() {
        let counter = Arc::new(AtomicUsize::new(0));
        let result = counted(counter.clone()).and(counted(counter.clone())).await;
        assert_eq!(result, Ok(2));

        let short = Deferred::<usize, String>::reject("first".to_string())
            .and(counted(counter.clone()))
            .await;
        assert_eq!(short, Err("first".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_node_adapts_callbacks() {
        let ok = Deferred::<&str, String>::node(|done| done.succeed("ready")).await;
        assert_eq!(ok, Ok("ready"));

        let err = Deferred::<(), String>::node(|done| {
            std::thread::spawn(move || done.fail("io".to_string()));
        })
        .await;
        assert_eq!(err, Err("io".to_string()));
    }

    #[tokio::test]
    async fn test_node_dropped_callback_stays_pending() {
        let deferred = Deferred::<(), String>::node(drop);
        let outcome =
            tokio::time::timeout(std::time::Duration::from_millis(20), deferred.run()).await;
        assert!(outcome.is_err());
    }
}
