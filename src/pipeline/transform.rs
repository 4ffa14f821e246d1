//! Stage functions and their composition.
//!
//! A stage turns one item into a [`Flow`]: either the transformed item, one
//! of the two control signals ([`Flow::Drop`], [`Flow::Quit`]) or a failure.
//! Stages compose with [`apply`] / [`TransformExt::then`]; a non-`Emit`
//! outcome short-circuits the rest of the composition.

use std::marker::PhantomData;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Outcome of running a stage on one item.
#[derive(Debug)]
pub enum Flow<T> {
    /// The transformed item, handed to the next stage.
    Emit(T),
    /// Discard this item and keep the stream going.
    Drop,
    /// Stop the whole pipeline cleanly.
    Quit,
    /// The stage failed. `item` is whatever the stage still had to offer
    /// (for example the message whose acknowledgement failed); compositions
    /// that cannot carry it across a type change set it to `None`.
    Fail { item: Option<T>, error: Error },
}

impl<T> Flow<T> {
    pub fn fail(error: Error) -> Self {
        Self::Fail { item: None, error }
    }

    pub fn is_emit(&self) -> bool {
        matches!(self, Self::Emit(_))
    }

    pub fn is_drop(&self) -> bool {
        matches!(self, Self::Drop)
    }

    pub fn is_quit(&self) -> bool {
        matches!(self, Self::Quit)
    }

    /// The emitted item, if any.
    pub fn emitted(self) -> Option<T> {
        match self {
            Self::Emit(v) => Some(v),
            _ => None,
        }
    }

    /// Re-type a non-emitting outcome. An emitted item or a carried failure
    /// item is discarded.
    pub(crate) fn forward<U>(self) -> Flow<U> {
        match self {
            Self::Emit(_) | Self::Drop => Flow::Drop,
            Self::Quit => Flow::Quit,
            Self::Fail { error, .. } => Flow::Fail { item: None, error },
        }
    }

    pub fn map<U, F>(self, f: F) -> Flow<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Self::Emit(v) => Flow::Emit(f(v)),
            Self::Drop => Flow::Drop,
            Self::Quit => Flow::Quit,
            Self::Fail { item, error } => Flow::Fail {
                item: item.map(f),
                error,
            },
        }
    }
}

impl<T> From<Result<T>> for Flow<T> {
    fn from(res: Result<T>) -> Self {
        match res {
            Ok(v) => Self::Emit(v),
            Err(error) => Self::fail(error),
        }
    }
}

/// A stage `S -> T`. A stage whose input and output types coincide is a
/// filter (see [`Filter`]).
#[async_trait]
pub trait Transform<S, T>: Send + Sync
where
    S: Send + 'static,
    T: Send + 'static,
{
    async fn transform(&self, input: S) -> Flow<T>;
}

#[async_trait]
impl<S, T, X> Transform<S, T> for Box<X>
where
    S: Send + 'static,
    T: Send + 'static,
    X: Transform<S, T> + ?Sized,
{
    async fn transform(&self, input: S) -> Flow<T> {
        (**self).transform(input).await
    }
}

/// A stage that keeps the item type.
pub trait Filter<T: Send + 'static>: Transform<T, T> {}

impl<T, X> Filter<T> for X
where
    T: Send + 'static,
    X: Transform<T, T> + ?Sized,
{
}

pub type BoxFilter<T> = Box<dyn Transform<T, T>>;

/// Stage built from a closure returning a [`Flow`].
pub struct FnStage<F>(pub F);

#[async_trait]
impl<S, T, F> Transform<S, T> for FnStage<F>
where
    S: Send + 'static,
    T: Send + 'static,
    F: Fn(S) -> Flow<T> + Send + Sync + 'static,
{
    async fn transform(&self, input: S) -> Flow<T> {
        (self.0)(input)
    }
}

/// Stage built from a fallible closure; `Err` becomes [`Flow::Fail`].
pub struct TryStage<F> {
    name: &'static str,
    f: F,
}

#[async_trait]
impl<S, T, F> Transform<S, T> for TryStage<F>
where
    S: Send + 'static,
    T: Send + 'static,
    F: Fn(S) -> Result<T> + Send + Sync + 'static,
{
    async fn transform(&self, input: S) -> Flow<T> {
        match (self.f)(input) {
            Ok(v) => Flow::Emit(v),
            Err(error) => {
                #[cfg(feature = "tracing")]
                tracing::event!(tracing::Level::DEBUG, event = "brokerpipe.stage.failed", stage = self.name, error = %error, "brokerpipe.stage.failed");
                Flow::fail(error)
            }
        }
    }
}

impl<F> TryStage<F> {
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// map: S -> T, never fails.
pub struct MapStage<F>(pub F);

#[async_trait]
impl<S, T, F> Transform<S, T> for MapStage<F>
where
    S: Send + 'static,
    T: Send + 'static,
    F: Fn(S) -> T + Send + Sync + 'static,
{
    async fn transform(&self, input: S) -> Flow<T> {
        Flow::Emit((self.0)(input))
    }
}

/// Emits items matching the predicate, drops the rest.
pub struct RetainStage<P>(pub P);

#[async_trait]
impl<T, P> Transform<T, T> for RetainStage<P>
where
    T: Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    async fn transform(&self, input: T) -> Flow<T> {
        if (self.0)(&input) {
            Flow::Emit(input)
        } else {
            Flow::Drop
        }
    }
}

pub struct InspectStage<F>(pub F);

#[async_trait]
impl<T, F> Transform<T, T> for InspectStage<F>
where
    T: Send + 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    async fn transform(&self, input: T) -> Flow<T> {
        (self.0)(&input);
        Flow::Emit(input)
    }
}

/// `first` followed by `second`.
pub struct Then<A, B, M> {
    first: A,
    second: B,
    _m: PhantomData<fn() -> M>,
}

impl<A, B, M> Then<A, B, M> {
    pub fn new(first: A, second: B) -> Self {
        Self {
            first,
            second,
            _m: PhantomData,
        }
    }
}

#[async_trait]
impl<S, M, T, A, B> Transform<S, T> for Then<A, B, M>
where
    S: Send + 'static,
    M: Send + 'static,
    T: Send + 'static,
    A: Transform<S, M>,
    B: Transform<M, T>,
{
    async fn transform(&self, input: S) -> Flow<T> {
        match self.first.transform(input).await {
            Flow::Emit(mid) => self.second.transform(mid).await,
            other => other.forward(),
        }
    }
}

/// Compose two stages. If `first` does not emit, `second` is never invoked
/// and the outcome is forwarded without an item.
pub fn apply<S, M, T, A, B>(first: A, second: B) -> Then<A, B, M>
where
    S: Send + 'static,
    M: Send + 'static,
    T: Send + 'static,
    A: Transform<S, M>,
    B: Transform<M, T>,
{
    Then::new(first, second)
}

pub fn stage<S, T, F>(f: F) -> FnStage<F>
where
    S: Send + 'static,
    T: Send + 'static,
    F: Fn(S) -> Flow<T> + Send + Sync + 'static,
{
    FnStage(f)
}

pub fn try_stage<S, T, F>(name: &'static str, f: F) -> TryStage<F>
where
    S: Send + 'static,
    T: Send + 'static,
    F: Fn(S) -> Result<T> + Send + Sync + 'static,
{
    TryStage { name, f }
}

pub fn map<S, T, F>(f: F) -> MapStage<F>
where
    S: Send + 'static,
    T: Send + 'static,
    F: Fn(S) -> T + Send + Sync + 'static,
{
    MapStage(f)
}

/// The identity filter.
pub fn identity<T: Send + 'static>() -> MapStage<fn(T) -> T> {
    MapStage(std::convert::identity as fn(T) -> T)
}

pub trait TransformExt<S, T>: Transform<S, T> + Sized
where
    S: Send + 'static,
    T: Send + 'static,
{
    fn then<U, B>(self, next: B) -> Then<Self, B, T>
    where
        U: Send + 'static,
        B: Transform<T, U>,
    {
        Then::new(self, next)
    }

    fn map<U, F>(self, f: F) -> Then<Self, MapStage<F>, T>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        Then::new(self, MapStage(f))
    }

    fn retain<P>(self, pred: P) -> Then<Self, RetainStage<P>, T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Then::new(self, RetainStage(pred))
    }

    fn inspect<F>(self, f: F) -> Then<Self, InspectStage<F>, T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Then::new(self, InspectStage(f))
    }

    fn boxed(self) -> Box<dyn Transform<S, T>>
    where
        Self: 'static,
    {
        Box::new(self)
    }
}

impl<S, T, X> TransformExt<S, T> for X
where
    S: Send + 'static,
    T: Send + 'static,
    X: Transform<S, T> + Sized,
{
}
