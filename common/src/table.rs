//! `Table<T>`, the cross-stage wire value described in spec §3/§9 "Column tables".
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::AppError;

/// An ordered collection of rows, serialized between stages as JSON-Lines
/// (one row per line) — see `SPEC_FULL.md` §3.1 for why JSON-Lines rather
/// than a binary columnar format.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Table<T> {
    rows: Vec<T>,
}

impl<T> Table<T> {
    pub fn new(rows: Vec<T>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[T] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<T> {
        self.rows
    }

    pub fn push(&mut self, row: T) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.rows.iter()
    }
}

impl<T> Table<T>
where
    T: HasId,
{
    pub fn find_by_id(&self, id: &str) -> Option<&T> {
        self.rows.iter().find(|row| row.id() == id)
    }

    /// Re-sort by id so on-disk tables are deterministic (spec §5 "Ordering guarantees").
    pub fn sort_by_id(&mut self) {
        self.rows.sort_by(|a, b| a.id().cmp(b.id()));
    }

    /// Union two tables by id, keeping the `self` row on conflict. Used by
    /// incremental merge (spec §4.12) to combine a prior snapshot with a delta.
    pub fn merge(mut self, other: Table<T>) -> Self
    where
        T: Clone,
    {
        let existing: std::collections::HashSet<String> =
            self.rows.iter().map(|r| r.id().to_string()).collect();
        for row in other.rows {
            if !existing.contains(row.id()) {
                self.rows.push(row);
            }
        }
        self.sort_by_id();
        self
    }
}

impl<T> Table<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn to_json_lines(&self) -> Result<String, AppError> {
        let mut out = String::new();
        for row in &self.rows {
            out.push_str(&serde_json::to_string(row)?);
            out.push('\n');
        }
        Ok(out)
    }

    pub fn from_json_lines(data: &str) -> Result<Self, AppError> {
        let rows = data
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<Vec<T>, _>>()?;
        Ok(Self { rows })
    }
}

impl<T> IntoIterator for Table<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<T> FromIterator<T> for Table<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

/// Implemented by every row type so `Table` can index/sort/merge generically.
pub trait HasId {
    fn id(&self) -> &str;
}

macro_rules! impl_has_id {
    ($($ty:ty),+ $(,)?) => {
        $(impl HasId for $ty {
            fn id(&self) -> &str {
                &self.id
            }
        })+
    };
}

impl_has_id!(
    crate::model::Document,
    crate::model::TextUnit,
    crate::model::Entity,
    crate::model::Relationship,
    crate::model::Community,
    crate::model::CommunityReport,
    crate::model::Covariate,
);
