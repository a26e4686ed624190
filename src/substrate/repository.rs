// Soft-delete repository conventions shared across domains.
//
//! Generalizes the Design Notes' "soft delete via `deleted_at` column"
//! pattern into an explicit query option instead of an ORM hook: repository
//! `list`/`get` methods take a `DeletedPolicy` and filter `deleted_at IS
//! NULL` unless the caller explicitly asks for deleted rows (admin tooling).

/// Whether a repository query should include soft-deleted rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletedPolicy {
    #[default]
    ExcludeDeleted,
    IncludeDeleted,
}

impl DeletedPolicy {
    pub fn includes_deleted(self) -> bool {
        matches!(self, DeletedPolicy::IncludeDeleted)
    }
}
