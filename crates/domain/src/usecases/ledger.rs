//! Author ledger - mistake counters, ban flag, extra-info slot

use std::sync::Arc;

use crate::model::Author;
use crate::ports::{AuthorStore, StoreError};

/// Thin mutation layer over [`AuthorStore`]. All operations are safe to
/// call repeatedly; `ban` is one-way and never cleared.
#[derive(Clone)]
pub struct AuthorLedger {
    authors: Arc<dyn AuthorStore>,
}

impl AuthorLedger {
    pub fn new(authors: Arc<dyn AuthorStore>) -> Self {
        Self { authors }
    }

    pub async fn add_input_mistake(&self, author: &mut Author) -> Result<(), StoreError> {
        author.input_mistakes += 1;
        self.authors.update_author(author).await
    }

    pub async fn add_request_mistake(&self, author: &mut Author) -> Result<(), StoreError> {
        author.request_mistakes += 1;
        self.authors.update_author(author).await
    }

    /// Reset both mistake counters to zero; called on every successful save
    pub async fn reset_mistake_flags(&self, author: &mut Author) -> Result<(), StoreError> {
        author.input_mistakes = 0;
        author.request_mistakes = 0;
        self.authors.update_author(author).await
    }

    pub async fn ban(&self, author: &mut Author) -> Result<(), StoreError> {
        author.banned = true;
        self.authors.update_author(author).await
    }

    pub async fn set_extra_info(
        &self,
        author: &mut Author,
        value: String,
    ) -> Result<(), StoreError> {
        author.extra_info = Some(value);
        self.authors.update_author(author).await
    }
}
