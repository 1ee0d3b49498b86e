use serde::{Deserialize, Serialize};

use crate::schema::RelationKind;

/// A nested include resolves to one of these at plan time; each node mirrors the shape of one
/// relation hop (spec §4.2 "Hydration plan").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationPlan {
    pub name: String,
    pub alias_prefix: String,
    pub kind: RelationKind,
    pub target_table: String,
    pub target_primary_key: String,
    pub foreign_key: String,
    pub local_key: String,
    pub columns: Vec<String>,
    pub nested: Option<Box<HydrationPlan>>,
}

/// Parallel to the query it was built alongside: every aliased column in the compiled SELECT
/// is either a root column or belongs to exactly one entry in `relations` via its
/// `<aliasPrefix>__<column>` alias (spec §4.2, §5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydrationPlan {
    pub root_table: String,
    pub root_primary_key: String,
    pub root_columns: Vec<String>,
    pub relations: Vec<RelationPlan>,
}

impl HydrationPlan {
    pub fn root(table: impl Into<String>, primary_key: impl Into<String>, columns: Vec<String>) -> Self {
        HydrationPlan {
            root_table: table.into(),
            root_primary_key: primary_key.into(),
            root_columns: columns,
            relations: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.relations.is_empty()
    }
}
