use async_trait::async_trait;

use crate::pipeline::transform::{BoxFilter, Flow, Transform};

/// Runs an ordered list of filters over one value.
///
/// Filters run left to right. The first outcome that is not
/// [`Flow::Emit`] is returned as-is, so a failing filter's partially
/// transformed item travels with its error. [`Flow::Drop`] and
/// [`Flow::Quit`] are surfaced the same way; recognising them is the job of
/// the loop driving the chain.
pub struct Chain<T> {
    filters: Vec<BoxFilter<T>>,
}

impl<T: Send + 'static> Chain<T> {
    pub fn new(filters: Vec<BoxFilter<T>>) -> Self {
        Self { filters }
    }

    pub fn with<F>(mut self, filter: F) -> Self
    where
        F: Transform<T, T> + 'static,
    {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl<T: Send + 'static> Default for Chain<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl<T> Transform<T, T> for Chain<T>
where
    T: Send + 'static,
{
    async fn transform(&self, input: T) -> Flow<T> {
        let mut value = input;
        for filter in &self.filters {
            match filter.transform(value).await {
                Flow::Emit(next) => value = next,
                other => return other,
            }
        }
        Flow::Emit(value)
    }
}
