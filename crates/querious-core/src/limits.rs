//! Plan limits and per-scope upload limits

use serde::{Deserialize, Serialize};

use crate::types::{SubscriptionPlan, User};

/// Maximum size of a single uploaded file (10 MB)
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum total size of all documents in one chat or project (50 MB)
pub const MAX_TOTAL_SIZE_PER_SCOPE: u64 = 50 * 1024 * 1024;

/// Document extensions accepted for upload, lowercase with the leading dot
pub const ALLOWED_EXTENSIONS: &[&str] = &[".pdf"];

/// Leading bytes of every PDF file
pub const PDF_MAGIC: &[u8] = b"%PDF";

/// Resource ceilings attached to a subscription plan. `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub projects: Option<u64>,
    pub chats: Option<u64>,
    pub documents: Option<u64>,
    pub docs_per_scope: u64,
    pub token_limit: u64,
}

impl PlanLimits {
    pub const FREE: PlanLimits = PlanLimits {
        projects: Some(1),
        chats: Some(3),
        documents: Some(3),
        docs_per_scope: 1,
        token_limit: 10_000,
    };

    pub const PRO: PlanLimits = PlanLimits {
        projects: Some(10),
        chats: None,
        documents: Some(30),
        docs_per_scope: 5,
        token_limit: 500_000,
    };

    pub const PREMIUM: PlanLimits = PlanLimits {
        projects: None,
        chats: None,
        documents: None,
        docs_per_scope: 10,
        token_limit: 2_000_000,
    };

    pub fn for_plan(plan: SubscriptionPlan) -> PlanLimits {
        match plan {
            SubscriptionPlan::Free => Self::FREE,
            SubscriptionPlan::Pro => Self::PRO,
            SubscriptionPlan::Premium => Self::PREMIUM,
        }
    }

    /// Documents the user may still own across all scopes
    pub fn global_remaining(&self, active_documents: u64) -> Remaining {
        match self.documents {
            Some(max) => Remaining::Limited(max.saturating_sub(active_documents)),
            None => Remaining::Unlimited,
        }
    }

    /// Tokens left before queries are refused
    pub fn tokens_remaining(&self, tokens_used: u64) -> u64 {
        self.token_limit.saturating_sub(tokens_used)
    }
}

impl User {
    pub fn plan_limits(&self) -> PlanLimits {
        PlanLimits::for_plan(self.plan)
    }

    /// Global document allowance derived from the plan and current usage
    pub fn documents_remaining(&self) -> Remaining {
        self.plan_limits().global_remaining(self.active_documents_count)
    }
}

/// A remaining allowance, possibly without a ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Remaining {
    Limited(u64),
    Unlimited,
}

impl Remaining {
    /// The tighter of two allowances
    pub fn min(self, other: Remaining) -> Remaining {
        match (self, other) {
            (Remaining::Limited(a), Remaining::Limited(b)) => Remaining::Limited(a.min(b)),
            (Remaining::Limited(a), Remaining::Unlimited)
            | (Remaining::Unlimited, Remaining::Limited(a)) => Remaining::Limited(a),
            (Remaining::Unlimited, Remaining::Unlimited) => Remaining::Unlimited,
        }
    }

    /// How many of `n` requested items fit
    pub fn admit(self, n: usize) -> usize {
        match self {
            Remaining::Limited(left) => usize::try_from(left).map_or(n, |left| left.min(n)),
            Remaining::Unlimited => n,
        }
    }

    pub fn is_exhausted(self) -> bool {
        self == Remaining::Limited(0)
    }
}

impl From<u64> for Remaining {
    fn from(value: u64) -> Self {
        Remaining::Limited(value)
    }
}

impl std::fmt::Display for Remaining {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Remaining::Limited(n) => write!(f, "{}", n),
            Remaining::Unlimited => write!(f, "unlimited"),
        }
    }
}

/// Upload limits and current usage for one scope, from `/api/upload-limits`
///
/// The server computes `remaining_*` as `max - current`, so they can be
/// negative after a plan downgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadLimits {
    pub max_files: i64,
    pub max_file_size: i64,
    pub max_total_size: i64,
    pub current_count: i64,
    pub current_size: i64,
    pub remaining_count: i64,
    pub remaining_size: i64,
}

impl UploadLimits {
    /// Documents the scope can still accept, floored at zero
    pub fn scope_remaining(&self) -> Remaining {
        Remaining::Limited(self.remaining_count.max(0) as u64)
    }

    /// Bytes the scope can still accept, floored at zero
    pub fn bytes_remaining(&self) -> u64 {
        self.remaining_size.max(0) as u64
    }

    /// Per-file ceiling, falling back to the built-in constant when the server sends nonsense
    pub fn file_size_ceiling(&self) -> u64 {
        if self.max_file_size > 0 {
            self.max_file_size as u64
        } else {
            MAX_FILE_SIZE
        }
    }
}
