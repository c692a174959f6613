//! Backend capability trait

use async_trait::async_trait;

use crate::limits::UploadLimits;
use crate::types::{DeleteOutcome, Document, Scope, UploadResponse, User};
use crate::Result;

/// Trait for the document-facing half of the Querious backend
///
/// The batch uploader and CLI are written against this trait so they can be
/// exercised with an in-memory backend in tests.
#[async_trait]
pub trait QueriousApi: Send + Sync {
    /// The authenticated user, including plan and usage counters
    async fn current_user(&self) -> Result<User>;

    /// Limits and current usage for a chat or project
    async fn upload_limits(&self, scope: &Scope) -> Result<UploadLimits>;

    /// Upload one PDF into a scope
    async fn upload_document(
        &self,
        scope: &Scope,
        filename: &str,
        content: Vec<u8>,
    ) -> Result<UploadResponse>;

    /// Documents linked to a scope
    async fn list_documents(&self, scope: &Scope) -> Result<Vec<Document>>;

    /// Unlink a document from one scope, or from every scope when `scope` is `None`
    async fn delete_document(&self, document_id: &str, scope: Option<&Scope>)
    -> Result<DeleteOutcome>;
}
