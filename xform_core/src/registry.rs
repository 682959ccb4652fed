use tracing::{debug, trace};

use crate::error::{Result, TransformError};
use crate::metadata::Metadata;
use crate::transform::TransformFactory;

/// Priority-ordered set of transform factories.
///
/// Owned by whoever orchestrates transforms; there is no process-wide
/// registry. Factories are kept sorted by descending priority, ties in
/// registration order.
#[derive(Default)]
pub struct TransformRegistry {
    factories: Vec<Box<dyn TransformFactory>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a factory. Several factories may share a class; the one with
    /// the higher priority is consulted first.
    pub fn register(&mut self, factory: Box<dyn TransformFactory>) {
        debug!(
            class = factory.transform_class(),
            priority = factory.priority(),
            "registered transform factory"
        );
        self.factories.push(factory);
        self.sort();
    }

    /// Changes the priority of the highest-priority factory of `class`.
    pub fn set_priority(&mut self, class: &str, priority: i32) -> Result<()> {
        let pos = self
            .position(class)
            .ok_or_else(|| TransformError::NotFound(class.to_string()))?;
        // Re-registering moves the factory to the back of its new priority band.
        let mut factory = self.factories.remove(pos);
        factory.set_priority(priority);
        self.factories.push(factory);
        self.sort();
        debug!(%class, priority, "changed transform priority");
        Ok(())
    }

    /// Highest-priority factory of `class`.
    pub fn get(&self, class: &str) -> Option<&dyn TransformFactory> {
        self.position(class).map(|pos| self.factories[pos].as_ref())
    }

    /// Factories from highest to lowest priority.
    pub fn by_priority(&self) -> impl Iterator<Item = &dyn TransformFactory> {
        self.factories.iter().map(|f| f.as_ref())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Highest-priority factory that claims it can decode `class`/`config`.
    pub fn resolve(
        &self,
        class: &str,
        config: Option<&str>,
        metadata: &Metadata,
    ) -> Result<&dyn TransformFactory> {
        let found = self
            .by_priority()
            .find(|f| f.can_decode(class, config, metadata));
        match found {
            Some(factory) => {
                trace!(class, config, priority = factory.priority(), "resolved decoder");
                Ok(factory)
            }
            None => Err(TransformError::NoMatchingTransform {
                class: class.to_string(),
                config: config.unwrap_or_default().to_string(),
            }),
        }
    }

    fn position(&self, class: &str) -> Option<usize> {
        self.factories.iter().position(|f| f.transform_class() == class)
    }

    fn sort(&mut self) {
        // Stable: equal priorities keep registration order.
        self.factories.sort_by_key(|f| std::cmp::Reverse(f.priority()));
    }
}
