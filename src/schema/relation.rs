use serde::{Deserialize, Serialize};

/// What happens to a `HasMany`/`BelongsToMany` child when the parent is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Cascade {
    #[default]
    None,
    /// Delete the child row outright.
    Remove,
    /// Delete the child and let its own cascade/relation changes propagate further.
    All,
}

/// Tagged-variant relation descriptor (spec §3). Key defaulting follows the spec's naming rules
/// exactly: `<property>_id` for `BelongsTo`, `<root_table>_id` for `HasOne`/`HasMany`, and
/// `<root_table>_id` / `<target_table>_id` for the two pivot sides of `BelongsToMany`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelationKind {
    BelongsTo {
        target: String,
        foreign_key: String,
        local_key: String,
    },
    HasOne {
        target: String,
        foreign_key: String,
        local_key: String,
    },
    HasMany {
        target: String,
        foreign_key: String,
        local_key: String,
        cascade: Cascade,
    },
    BelongsToMany {
        target: String,
        pivot_table: String,
        pivot_fk_root: String,
        pivot_fk_target: String,
        cascade: Cascade,
    },
}

impl RelationKind {
    pub fn target(&self) -> &str {
        match self {
            RelationKind::BelongsTo { target, .. }
            | RelationKind::HasOne { target, .. }
            | RelationKind::HasMany { target, .. }
            | RelationKind::BelongsToMany { target, .. } => target,
        }
    }

    /// Whether the foreign key lives on the target's table (`true`) or the root's (`false`).
    pub fn is_to_many(&self) -> bool {
        matches!(self, RelationKind::HasMany { .. } | RelationKind::BelongsToMany { .. })
    }

    pub fn cascade(&self) -> Cascade {
        match self {
            RelationKind::HasMany { cascade, .. } | RelationKind::BelongsToMany { cascade, .. } => *cascade,
            _ => Cascade::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    pub name: String,
    pub kind: RelationKind,
}

impl RelationDescriptor {
    pub fn belongs_to(
        name: impl Into<String>,
        target: impl Into<String>,
        property: &str,
        target_pk: impl Into<String>,
    ) -> Self {
        RelationDescriptor {
            name: name.into(),
            kind: RelationKind::BelongsTo {
                target: target.into(),
                foreign_key: format!("{property}_id"),
                local_key: target_pk.into(),
            },
        }
    }

    pub fn has_one(
        name: impl Into<String>,
        target: impl Into<String>,
        root_table: &str,
        root_pk: impl Into<String>,
    ) -> Self {
        RelationDescriptor {
            name: name.into(),
            kind: RelationKind::HasOne {
                target: target.into(),
                foreign_key: format!("{root_table}_id"),
                local_key: root_pk.into(),
            },
        }
    }

    pub fn has_many(
        name: impl Into<String>,
        target: impl Into<String>,
        root_table: &str,
        root_pk: impl Into<String>,
        cascade: Cascade,
    ) -> Self {
        RelationDescriptor {
            name: name.into(),
            kind: RelationKind::HasMany {
                target: target.into(),
                foreign_key: format!("{root_table}_id"),
                local_key: root_pk.into(),
                cascade,
            },
        }
    }

    pub fn belongs_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        pivot_table: impl Into<String>,
        root_table: &str,
        target_table: &str,
        cascade: Cascade,
    ) -> Self {
        RelationDescriptor {
            name: name.into(),
            kind: RelationKind::BelongsToMany {
                target: target.into(),
                pivot_table: pivot_table.into(),
                pivot_fk_root: format!("{root_table}_id"),
                pivot_fk_target: format!("{target_table}_id"),
                cascade,
            },
        }
    }

    /// Explicit-key constructors, for when the defaulting rule above doesn't apply.
    pub fn with_keys(name: impl Into<String>, kind: RelationKind) -> Self {
        RelationDescriptor { name: name.into(), kind }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn belongs_to_defaults_foreign_key_from_property() {
        let rel = RelationDescriptor::belongs_to("author", "users", "author", "id");
        assert_eq!(
            rel.kind,
            RelationKind::BelongsTo {
                target: "users".into(),
                foreign_key: "author_id".into(),
                local_key: "id".into(),
            }
        );
    }

    #[test]
    fn belongs_to_many_defaults_both_pivot_sides() {
        let rel = RelationDescriptor::belongs_to_many(
            "tags",
            "tags",
            "post_tags",
            "posts",
            "tags",
            Cascade::None,
        );
        assert_eq!(
            rel.kind,
            RelationKind::BelongsToMany {
                target: "tags".into(),
                pivot_table: "post_tags".into(),
                pivot_fk_root: "posts_id".into(),
                pivot_fk_target: "tags_id".into(),
                cascade: Cascade::None,
            }
        );
    }
}
