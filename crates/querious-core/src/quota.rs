//! Upload quota gate
//!
//! Admission control for a batch of candidate uploads, applied before any
//! network call. Two ceilings apply at once: the per-scope document count
//! reported by `/api/upload-limits` and the per-user global document count
//! derived from the subscription plan. Files failing validation are set aside
//! first and never count against either ceiling. The scope's remaining storage
//! then trims the admitted prefix.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::limits::{ALLOWED_EXTENSIONS, MAX_FILE_SIZE, PDF_MAGIC, Remaining, UploadLimits};
use crate::types::User;

/// A file the user wants to upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadCandidate {
    pub filename: String,
    pub size_bytes: u64,
    /// Where to read the content from when it is not held in memory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Leading bytes of the content, when they have been read
    #[serde(skip)]
    pub head: Option<Vec<u8>>,
}

impl UploadCandidate {
    pub fn new(filename: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            filename: filename.into(),
            size_bytes,
            path: None,
            head: None,
        }
    }

    pub fn from_path(path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            filename,
            size_bytes,
            path: Some(path),
            head: None,
        }
    }

    /// Attach the first bytes of the file so the content type can be checked
    pub fn with_head(mut self, head: impl Into<Vec<u8>>) -> Self {
        self.head = Some(head.into());
        self
    }

    fn extension(&self) -> Option<String> {
        Path::new(&self.filename)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
    }
}

/// Why a file was refused before quota accounting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FileRejection {
    InvalidType,
    TooLarge { size: u64, max: u64 },
    Empty,
}

impl std::fmt::Display for FileRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileRejection::InvalidType => write!(f, "Only PDF files are allowed"),
            FileRejection::TooLarge { max, .. } => {
                write!(f, "File too large. Maximum size is {}MB per file", max / (1024 * 1024))
            }
            FileRejection::Empty => write!(f, "File is empty"),
        }
    }
}

/// Check a candidate's type and size against the per-file ceiling
///
/// When the leading bytes are known they must carry the PDF signature, so a
/// renamed file is refused before it can take a quota slot.
pub fn validate_candidate(
    candidate: &UploadCandidate,
    max_file_size: u64,
) -> std::result::Result<(), FileRejection> {
    let allowed = candidate
        .extension()
        .is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()));
    if !allowed {
        return Err(FileRejection::InvalidType);
    }
    if candidate.size_bytes == 0 {
        return Err(FileRejection::Empty);
    }
    if candidate.size_bytes > max_file_size {
        return Err(FileRejection::TooLarge {
            size: candidate.size_bytes,
            max: max_file_size,
        });
    }
    if candidate.head.as_ref().is_some_and(|head| !head.starts_with(PDF_MAGIC)) {
        return Err(FileRejection::InvalidType);
    }
    Ok(())
}

/// Result of asking how many of `n` valid files may upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uploadability {
    pub allowed: usize,
    pub blocked: usize,
    pub limit_reached: bool,
}

/// A batch split into what may upload, what the quota blocks, and what failed validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPlan {
    pub admitted: Vec<UploadCandidate>,
    pub blocked: Vec<UploadCandidate>,
    pub rejected: Vec<(UploadCandidate, FileRejection)>,
    pub limit_reached: bool,
}

/// Admission control over the scope and global document ceilings
///
/// Either ceiling being `None` means the authoritative count has not arrived
/// yet; the gate then admits nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaGate {
    scope_remaining: Option<Remaining>,
    global_remaining: Option<Remaining>,
    max_file_size: u64,
    /// Storage left in the scope; `None` when unknown
    bytes_remaining: Option<u64>,
}

impl Default for QuotaGate {
    fn default() -> Self {
        Self::loading()
    }
}

impl QuotaGate {
    /// A gate whose limits are still being fetched
    pub fn loading() -> Self {
        Self {
            scope_remaining: None,
            global_remaining: None,
            max_file_size: MAX_FILE_SIZE,
            bytes_remaining: None,
        }
    }

    pub fn new(scope_remaining: Option<Remaining>, global_remaining: Option<Remaining>) -> Self {
        Self {
            scope_remaining,
            global_remaining,
            max_file_size: MAX_FILE_SIZE,
            bytes_remaining: None,
        }
    }

    /// Build from the server's scope limits and the current user
    pub fn from_server(limits: Option<&UploadLimits>, user: Option<&User>) -> Self {
        let mut gate = Self::new(
            limits.map(UploadLimits::scope_remaining),
            user.map(User::documents_remaining),
        );
        if let Some(limits) = limits {
            gate.max_file_size = limits.file_size_ceiling().min(MAX_FILE_SIZE);
            gate.bytes_remaining = Some(limits.bytes_remaining());
        }
        gate
    }

    pub fn is_loading(&self) -> bool {
        self.scope_remaining.is_none() || self.global_remaining.is_none()
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Combined allowance, `None` while loading
    pub fn remaining(&self) -> Option<Remaining> {
        Some(self.scope_remaining?.min(self.global_remaining?))
    }

    pub fn check_uploadability(&self, n: usize) -> Uploadability {
        let Some(remaining) = self.remaining() else {
            return Uploadability {
                allowed: 0,
                blocked: n,
                limit_reached: false,
            };
        };

        let allowed = remaining.admit(n);
        Uploadability {
            allowed,
            blocked: n - allowed,
            limit_reached: remaining.is_exhausted(),
        }
    }

    /// Validate then partition a batch, preserving the original order
    ///
    /// The count ceilings pick the admitted prefix. Within it, a file that
    /// would overflow the scope's remaining storage is blocked instead.
    pub fn plan(&self, candidates: Vec<UploadCandidate>) -> UploadPlan {
        let mut valid = Vec::with_capacity(candidates.len());
        let mut rejected = Vec::new();

        for candidate in candidates {
            match validate_candidate(&candidate, self.max_file_size) {
                Ok(()) => valid.push(candidate),
                Err(reason) => rejected.push((candidate, reason)),
            }
        }

        let verdict = self.check_uploadability(valid.len());
        let over_count = valid.split_off(verdict.allowed);

        let mut admitted = Vec::with_capacity(valid.len());
        let mut blocked = Vec::new();
        let mut budget = self.bytes_remaining;
        for candidate in valid {
            match budget {
                Some(left) if candidate.size_bytes > left => blocked.push(candidate),
                Some(left) => {
                    budget = Some(left - candidate.size_bytes);
                    admitted.push(candidate);
                }
                None => admitted.push(candidate),
            }
        }
        blocked.extend(over_count);

        UploadPlan {
            admitted,
            blocked,
            rejected,
            limit_reached: verdict.limit_reached,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdfs(n: usize) -> Vec<UploadCandidate> {
        (0..n)
            .map(|i| UploadCandidate::new(format!("doc{}.pdf", i), 1024))
            .collect()
    }

    fn gate(scope: u64, global: u64) -> QuotaGate {
        QuotaGate::new(Some(scope.into()), Some(global.into()))
    }

    #[test]
    fn test_partial_admission() {
        let verdict = gate(2, 5).check_uploadability(5);
        assert_eq!(verdict.allowed, 2);
        assert_eq!(verdict.blocked, 3);
        assert!(!verdict.limit_reached);
    }

    #[test]
    fn test_exhausted_ceiling_rejects_all() {
        for (scope, global) in [(0, 5), (5, 0), (0, 0)] {
            for n in 1..6 {
                let verdict = gate(scope, global).check_uploadability(n);
                assert_eq!(verdict.allowed, 0);
                assert_eq!(verdict.blocked, n);
                assert!(verdict.limit_reached);
            }
        }
    }

    #[test]
    fn test_uploadability_invariants() {
        for scope in 0..6u64 {
            for global in 0..6u64 {
                for n in 0..8usize {
                    let v = gate(scope, global).check_uploadability(n);
                    assert_eq!(v.allowed + v.blocked, n);
                    assert!(v.allowed <= n);
                    assert!(v.allowed as u64 <= scope.min(global));
                }
            }
        }
    }

    #[test]
    fn test_loading_gate_is_pessimistic() {
        let verdict = QuotaGate::loading().check_uploadability(3);
        assert_eq!(verdict, Uploadability { allowed: 0, blocked: 3, limit_reached: false });

        let half_loaded = QuotaGate::new(Some(Remaining::Limited(4)), None);
        assert!(half_loaded.is_loading());
        assert_eq!(half_loaded.check_uploadability(2).allowed, 0);
    }

    #[test]
    fn test_unlimited_global() {
        let gate = QuotaGate::new(Some(Remaining::Limited(3)), Some(Remaining::Unlimited));
        assert_eq!(gate.check_uploadability(5).allowed, 3);
    }

    #[test]
    fn test_validation() {
        assert_eq!(validate_candidate(&UploadCandidate::new("a.PDF", 10), MAX_FILE_SIZE), Ok(()));
        assert_eq!(
            validate_candidate(&UploadCandidate::new("notes.docx", 10), MAX_FILE_SIZE),
            Err(FileRejection::InvalidType)
        );
        assert_eq!(
            validate_candidate(&UploadCandidate::new("pdf", 10), MAX_FILE_SIZE),
            Err(FileRejection::InvalidType)
        );
        assert_eq!(
            validate_candidate(&UploadCandidate::new("big.pdf", MAX_FILE_SIZE + 1), MAX_FILE_SIZE),
            Err(FileRejection::TooLarge { size: MAX_FILE_SIZE + 1, max: MAX_FILE_SIZE })
        );
        assert_eq!(
            FileRejection::TooLarge { size: 0, max: MAX_FILE_SIZE }.to_string(),
            "File too large. Maximum size is 10MB per file"
        );
    }

    #[test]
    fn test_plan_rejected_files_do_not_consume_quota() {
        let mut batch = pdfs(3);
        batch.insert(1, UploadCandidate::new("slides.pptx", 10));
        batch.push(UploadCandidate::new("huge.pdf", MAX_FILE_SIZE * 2));

        let plan = gate(2, 10).plan(batch);
        let admitted: Vec<_> = plan.admitted.iter().map(|c| c.filename.as_str()).collect();
        assert_eq!(admitted, vec!["doc0.pdf", "doc1.pdf"]);
        assert_eq!(plan.blocked.len(), 1);
        assert_eq!(plan.blocked[0].filename, "doc2.pdf");
        assert_eq!(plan.rejected.len(), 2);
        assert!(!plan.limit_reached);
    }

    #[test]
    fn test_renamed_file_is_rejected_before_quota() {
        let batch = vec![
            UploadCandidate::new("fake.pdf", 16).with_head(b"not ".to_vec()),
            UploadCandidate::new("good.pdf", 16).with_head(b"%PDF".to_vec()),
        ];

        let plan = gate(1, 10).plan(batch);
        assert_eq!(plan.admitted.len(), 1);
        assert_eq!(plan.admitted[0].filename, "good.pdf");
        assert!(plan.blocked.is_empty());
        assert_eq!(plan.rejected.len(), 1);
        assert_eq!(plan.rejected[0].0.filename, "fake.pdf");
        assert_eq!(plan.rejected[0].1, FileRejection::InvalidType);
    }

    #[test]
    fn test_empty_file_is_empty_not_invalid() {
        let candidate = UploadCandidate::new("blank.pdf", 0).with_head(Vec::new());
        assert_eq!(validate_candidate(&candidate, MAX_FILE_SIZE), Err(FileRejection::Empty));
    }

    #[test]
    fn test_storage_budget_blocks_overflowing_files() {
        let mb: u64 = 1024 * 1024;
        let limits = UploadLimits {
            max_files: 5,
            max_file_size: MAX_FILE_SIZE as i64,
            max_total_size: 50 * mb as i64,
            current_count: 1,
            current_size: 44 * mb as i64,
            remaining_count: 4,
            remaining_size: 6 * mb as i64,
        };
        let batch = vec![
            UploadCandidate::new("a.pdf", 4 * mb),
            UploadCandidate::new("b.pdf", 3 * mb),
            UploadCandidate::new("c.pdf", 2 * mb),
        ];

        let gate = QuotaGate::from_server(Some(&limits), None);
        assert_eq!(gate.plan(batch.clone()).admitted.len(), 0);

        let gate = QuotaGate {
            global_remaining: Some(Remaining::Unlimited),
            ..gate
        };
        let plan = gate.plan(batch);
        let admitted: Vec<_> = plan.admitted.iter().map(|c| c.filename.as_str()).collect();
        let blocked: Vec<_> = plan.blocked.iter().map(|c| c.filename.as_str()).collect();
        assert_eq!(admitted, vec!["a.pdf", "c.pdf"]);
        assert_eq!(blocked, vec!["b.pdf"]);
        assert!(!plan.limit_reached);
    }

    #[test]
    fn test_from_path_uses_file_name() {
        let candidate = UploadCandidate::from_path("/tmp/papers/report.pdf", 42);
        assert_eq!(candidate.filename, "report.pdf");
        assert_eq!(candidate.path.as_deref(), Some(Path::new("/tmp/papers/report.pdf")));
    }
}
