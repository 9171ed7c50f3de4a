use serde::Deserialize;

/// Expense classification used by the retirement forecast downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpenseType {
    NotExpense = 0,
    OneTime = 1,
    Recurring = 2,
}

impl ExpenseType {
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(Self::NotExpense),
            1 => Some(Self::OneTime),
            2 => Some(Self::Recurring),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> i64 {
        *self as i64
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotExpense => "not-expense",
            Self::OneTime => "one-time",
            Self::Recurring => "recurring",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not-expense" | "none" => Some(Self::NotExpense),
            "one-time" | "onetime" => Some(Self::OneTime),
            "recurring" => Some(Self::Recurring),
            _ => None,
        }
    }
}

/// Which transaction field a rule pattern is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetField {
    Name,
    Memo,
}

impl TargetField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Memo => "memo",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "name" => Some(Self::Name),
            "memo" => Some(Self::Memo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Transaction {
    /// Content-derived identity, unique across the store.
    pub fitid: String,
    pub account: String,
    /// "checking" or "credit".
    pub kind: String,
    /// Canonical `%Y-%m-%d %H:%M:%S`.
    pub posted: String,
    /// Signed fixed-point cents.
    pub amount: i64,
    pub name: String,
    pub memo: Option<String>,
    pub checknum: Option<String>,
    pub category_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub expense_type: ExpenseType,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: i64,
    pub pattern: String,
    pub target_field: TargetField,
    pub category_id: i64,
    pub priority: i64,
}

/// One row as produced by the external OFX parser, before normalization.
/// Fields arrive as raw strings; validation happens at ingest time.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRecord {
    pub account: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub posted: String,
    pub amount: String,
    pub name: String,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub checknum: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RecordError {
    /// Zero-based position within the ingested batch.
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ImportSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub categorized: usize,
    pub errors: Vec<RecordError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Duplicate,
}

/// Category constraint for transaction queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategorySelector {
    Id(i64),
    Uncategorized,
}

/// Narrow query surface exposed to downstream consumers.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub account: Option<String>,
    /// Inclusive lower bound on `posted`, canonical format.
    pub from: Option<String>,
    /// Inclusive upper bound on `posted`, canonical format.
    pub to: Option<String>,
    pub category: Option<CategorySelector>,
}

#[derive(Debug, Clone)]
pub struct CategoryTotal {
    /// None means uncategorized.
    pub category: Option<String>,
    pub expense_type: Option<ExpenseType>,
    pub total: i64,
    pub count: i64,
}
