//! Batch document upload
//!
//! Reads the files' sizes and leading bytes, validates them, asks the server for the scope's
//! limits and the user's global usage, runs the quota gate, then uploads the
//! admitted prefix concurrently. Every upload settles independently: one
//! failure neither cancels nor rolls back the others.

use std::path::{Path, PathBuf};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use querious_core::{
    Error, FileRejection, LimitReached, QueriousApi, QuotaGate, Result, Scope, UploadCandidate,
    UploadResponse, PDF_MAGIC,
};

/// A file whose upload was attempted and failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFailure {
    pub filename: String,
    pub error: String,
    /// Set when the server refused the file because of a plan limit
    #[serde(default)]
    pub limit_reached: Option<LimitReached>,
}

/// Outcome of one batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadReport {
    pub uploaded: Vec<UploadResponse>,
    pub failed: Vec<UploadFailure>,
    /// Valid files the quota gate did not admit
    pub blocked: Vec<String>,
    /// Files refused by client-side validation
    pub rejected: Vec<(String, FileRejection)>,
    pub limit_reached: bool,
}

impl UploadReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty() && self.rejected.is_empty()
    }
}

/// Upload files from disk into `scope`
pub async fn upload_paths<A>(api: &A, scope: &Scope, paths: &[PathBuf]) -> Result<UploadReport>
where
    A: QueriousApi + ?Sized,
{
    let mut candidates = Vec::with_capacity(paths.len());
    let mut unreadable = Vec::new();

    for path in paths {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => match read_head(path).await {
                Ok(head) => {
                    candidates.push(UploadCandidate::from_path(path, meta.len()).with_head(head))
                }
                Err(e) => unreadable.push(failure(path, &e.to_string())),
            },
            Ok(_) => unreadable.push(failure(path, "Not a regular file")),
            Err(e) => unreadable.push(failure(path, &e.to_string())),
        }
    }

    let mut report = upload_candidates(api, scope, candidates).await?;
    unreadable.append(&mut report.failed);
    report.failed = unreadable;
    Ok(report)
}

/// Upload already-sized candidates into `scope`
///
/// Candidates without a `path` cannot be read and are reported as failures
/// if admitted.
pub async fn upload_candidates<A>(
    api: &A,
    scope: &Scope,
    candidates: Vec<UploadCandidate>,
) -> Result<UploadReport>
where
    A: QueriousApi + ?Sized,
{
    let (limits, user) = tokio::join!(api.upload_limits(scope), api.current_user());
    let gate = QuotaGate::from_server(Some(&limits?), Some(&user?));

    let plan = gate.plan(candidates);
    debug!(
        %scope,
        admitted = plan.admitted.len(),
        blocked = plan.blocked.len(),
        rejected = plan.rejected.len(),
        "upload batch planned"
    );
    if plan.limit_reached {
        warn!(%scope, "document limit reached, nothing can be uploaded");
    }

    let uploads = plan
        .admitted
        .iter()
        .map(|candidate| upload_one(api, scope, candidate));
    let settled = join_all(uploads).await;

    let mut report = UploadReport {
        blocked: plan.blocked.into_iter().map(|c| c.filename).collect(),
        rejected: plan
            .rejected
            .into_iter()
            .map(|(c, reason)| (c.filename, reason))
            .collect(),
        limit_reached: plan.limit_reached,
        ..UploadReport::default()
    };

    for (candidate, outcome) in plan.admitted.iter().zip(settled) {
        match outcome {
            Ok(response) => report.uploaded.push(response),
            Err(e) => {
                warn!(filename = %candidate.filename, error = %e, "upload failed");
                report.failed.push(UploadFailure {
                    filename: candidate.filename.clone(),
                    error: e.to_string(),
                    limit_reached: e.limit_reached().cloned(),
                });
            }
        }
    }

    info!(
        %scope,
        uploaded = report.uploaded.len(),
        failed = report.failed.len(),
        "upload batch finished"
    );
    Ok(report)
}

async fn upload_one<A>(api: &A, scope: &Scope, candidate: &UploadCandidate) -> Result<UploadResponse>
where
    A: QueriousApi + ?Sized,
{
    let path = candidate.path.as_ref().ok_or_else(|| {
        Error::InvalidInput(format!("no content for {}", candidate.filename))
    })?;
    let content = tokio::fs::read(path).await?;

    if !content.starts_with(PDF_MAGIC) {
        return Err(Error::Validation(FileRejection::InvalidType.to_string()));
    }

    api.upload_document(scope, &candidate.filename, content).await
}

async fn read_head(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut head = Vec::with_capacity(PDF_MAGIC.len());
    file.take(PDF_MAGIC.len() as u64).read_to_end(&mut head).await?;
    Ok(head)
}

fn failure(path: &Path, error: &str) -> UploadFailure {
    UploadFailure {
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned()),
        error: error.to_string(),
        limit_reached: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use querious_core::{DeleteOutcome, Document, DocumentStatus, UploadLimits, User};
    use std::sync::Mutex;

    struct FakeApi {
        remaining_count: i64,
        user: User,
        refuse: Option<&'static str>,
        uploaded: Mutex<Vec<String>>,
    }

    impl FakeApi {
        fn new(remaining_count: i64, active_documents: u64) -> Self {
            let user: User = serde_json::from_value(serde_json::json!({
                "id": "user_1",
                "email": "a@b.io",
                "name": "A",
                "plan": "pro",
                "active_documents_count": active_documents,
            }))
            .unwrap();
            Self {
                remaining_count,
                user,
                refuse: None,
                uploaded: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl QueriousApi for FakeApi {
        async fn current_user(&self) -> Result<User> {
            Ok(self.user.clone())
        }

        async fn upload_limits(&self, _scope: &Scope) -> Result<UploadLimits> {
            Ok(UploadLimits {
                max_files: 5,
                max_file_size: 10 * 1024 * 1024,
                max_total_size: 50 * 1024 * 1024,
                current_count: 5 - self.remaining_count,
                current_size: 0,
                remaining_count: self.remaining_count,
                remaining_size: 50 * 1024 * 1024,
            })
        }

        async fn upload_document(
            &self,
            _scope: &Scope,
            filename: &str,
            content: Vec<u8>,
        ) -> Result<UploadResponse> {
            if self.refuse.is_some_and(|name| name == filename) {
                return Err(Error::QuotaExceeded(LimitReached {
                    resource: "documents".to_string(),
                    limit: Some(30),
                    used: Some(30),
                }));
            }
            self.uploaded.lock().unwrap().push(filename.to_string());
            Ok(UploadResponse {
                document: Document {
                    id: format!("doc_{}", filename),
                    filename: filename.to_string(),
                    s3_key: None,
                    checksum: None,
                    size_bytes: content.len() as u64,
                    status: DocumentStatus::Pending,
                    uploaded_at: None,
                },
                status: "uploaded".to_string(),
                message: None,
            })
        }

        async fn list_documents(&self, _scope: &Scope) -> Result<Vec<Document>> {
            Ok(Vec::new())
        }

        async fn delete_document(
            &self,
            _document_id: &str,
            _scope: Option<&Scope>,
        ) -> Result<DeleteOutcome> {
            unreachable!()
        }
    }

    fn write_pdfs(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                std::fs::write(&path, b"%PDF-1.7\n%fake\n").unwrap();
                path
            })
            .collect()
    }

    #[tokio::test]
    async fn test_admits_prefix_and_blocks_rest() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_pdfs(dir.path(), &["a.pdf", "b.pdf", "c.pdf"]);
        let api = FakeApi::new(2, 0);

        let report = upload_paths(&api, &Scope::chat("chat_1"), &paths).await.unwrap();

        assert_eq!(report.uploaded.len(), 2);
        assert_eq!(report.blocked, vec!["c.pdf"]);
        assert!(!report.limit_reached);
        let mut sent = api.uploaded.lock().unwrap().clone();
        sent.sort();
        assert_eq!(sent, vec!["a.pdf", "b.pdf"]);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_undo_others() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_pdfs(dir.path(), &["a.pdf", "b.pdf"]);
        let mut api = FakeApi::new(5, 0);
        api.refuse = Some("a.pdf");

        let report = upload_paths(&api, &Scope::project("proj_1"), &paths).await.unwrap();

        assert_eq!(report.uploaded.len(), 1);
        assert_eq!(report.uploaded[0].document.filename, "b.pdf");
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].filename, "a.pdf");
        assert_eq!(
            report.failed[0].limit_reached.as_ref().map(|l| l.resource.as_str()),
            Some("documents")
        );
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_rejected_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = write_pdfs(dir.path(), &["good.pdf"]);
        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, b"hello").unwrap();
        let fake_pdf = dir.path().join("fake.pdf");
        std::fs::write(&fake_pdf, b"not a pdf").unwrap();
        paths.push(notes);
        paths.push(fake_pdf);
        paths.push(dir.path().join("missing.pdf"));

        let api = FakeApi::new(5, 0);
        let report = upload_paths(&api, &Scope::chat("chat_1"), &paths).await.unwrap();

        assert_eq!(report.uploaded.len(), 1);
        assert_eq!(
            report.rejected,
            vec![
                ("notes.txt".to_string(), FileRejection::InvalidType),
                ("fake.pdf".to_string(), FileRejection::InvalidType),
            ]
        );
        let failed: Vec<&str> = report.failed.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(failed, vec!["missing.pdf"]);
    }

    #[tokio::test]
    async fn test_renamed_file_does_not_take_the_last_slot() {
        let dir = tempfile::tempdir().unwrap();
        let fake_pdf = dir.path().join("fake.pdf");
        std::fs::write(&fake_pdf, b"not a pdf at all").unwrap();
        let mut paths = vec![fake_pdf];
        paths.extend(write_pdfs(dir.path(), &["good.pdf"]));

        let api = FakeApi::new(1, 0);
        let report = upload_paths(&api, &Scope::chat("chat_1"), &paths).await.unwrap();

        assert!(report.blocked.is_empty());
        assert!(report.failed.is_empty());
        assert_eq!(report.rejected, vec![("fake.pdf".to_string(), FileRejection::InvalidType)]);
        assert_eq!(*api.uploaded.lock().unwrap(), vec!["good.pdf"]);
    }

    #[tokio::test]
    async fn test_global_limit_blocks_everything() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_pdfs(dir.path(), &["a.pdf"]);
        // Pro plan allows 30 documents in total
        let api = FakeApi::new(5, 30);

        let report = upload_paths(&api, &Scope::chat("chat_1"), &paths).await.unwrap();

        assert!(report.uploaded.is_empty());
        assert_eq!(report.blocked, vec!["a.pdf"]);
        assert!(report.limit_reached);
    }
}
