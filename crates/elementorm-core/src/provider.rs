//! Element data sources.
//!
//! The query engine never owns element storage. It pulls base collections
//! from an [`ElementProvider`], which may front an external engine, a file,
//! or the bundled [`InMemoryProvider`].

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use crate::model::{Element, ElementId};

/// Errors reported by an element provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The data source could not be reached.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The data source returned data that could not be interpreted.
    #[error("invalid provider data: {0}")]
    InvalidData(String),
}

/// Source of elements for query execution.
///
/// The async methods default to the synchronous ones; providers backed by
/// real I/O should override them.
#[async_trait]
pub trait ElementProvider: Send + Sync {
    /// Fetch every element.
    fn get_all_elements(&self) -> Result<Vec<Element>, ProviderError>;

    /// Fetch every element of one type.
    fn get_elements_of_type(&self, element_type: &str) -> Result<Vec<Element>, ProviderError>;

    /// Fetch a single element by id.
    fn get_element_by_id(&self, id: ElementId) -> Result<Option<Element>, ProviderError>;

    /// Async variant of [`ElementProvider::get_all_elements`].
    async fn get_all_elements_async(&self) -> Result<Vec<Element>, ProviderError> {
        self.get_all_elements()
    }

    /// Async variant of [`ElementProvider::get_elements_of_type`].
    async fn get_elements_of_type_async(
        &self,
        element_type: &str,
    ) -> Result<Vec<Element>, ProviderError> {
        self.get_elements_of_type(element_type)
    }

    /// Async variant of [`ElementProvider::get_element_by_id`].
    async fn get_element_by_id_async(
        &self,
        id: ElementId,
    ) -> Result<Option<Element>, ProviderError> {
        self.get_element_by_id(id)
    }
}

/// Provider over an in-memory element list.
///
/// Elements are returned in insertion order, which keeps query results
/// deterministic for tests and embedded use.
#[derive(Default)]
pub struct InMemoryProvider {
    elements: RwLock<Vec<Element>>,
}

impl InMemoryProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider holding the given elements.
    pub fn with_elements(elements: Vec<Element>) -> Self {
        Self {
            elements: RwLock::new(elements),
        }
    }

    /// Wrap this provider for sharing.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Insert or replace an element (matched by id).
    pub fn upsert(&self, element: Element) {
        let mut elements = self.elements.write();
        match elements.iter_mut().find(|e| e.id == element.id) {
            Some(existing) => *existing = element,
            None => elements.push(element),
        }
    }

    /// Remove an element by id, returning it if present.
    pub fn remove(&self, id: ElementId) -> Option<Element> {
        let mut elements = self.elements.write();
        let index = elements.iter().position(|e| e.id == id)?;
        Some(elements.remove(index))
    }

    /// Number of stored elements.
    pub fn len(&self) -> usize {
        self.elements.read().len()
    }

    /// Check if the provider is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ElementProvider for InMemoryProvider {
    fn get_all_elements(&self) -> Result<Vec<Element>, ProviderError> {
        Ok(self.elements.read().clone())
    }

    fn get_elements_of_type(&self, element_type: &str) -> Result<Vec<Element>, ProviderError> {
        Ok(self
            .elements
            .read()
            .iter()
            .filter(|e| e.is_type(element_type))
            .cloned()
            .collect())
    }

    fn get_element_by_id(&self, id: ElementId) -> Result<Option<Element>, ProviderError> {
        Ok(self.elements.read().iter().find(|e| e.id == id).cloned())
    }
}
