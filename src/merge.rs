use crate::models::{EntityType, Record};
use csv::StringRecord;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;

/// Consolidated rows for one entity type, always headed by the fixed header.
#[derive(Debug)]
pub struct Table {
    entity: EntityType,
    header: StringRecord,
    rows: Vec<StringRecord>,
    keys: FxHashSet<String>,
}

impl Table {
    pub fn new(entity: EntityType) -> Self {
        Self {
            entity,
            header: entity.header_record(),
            rows: Vec::new(),
            keys: FxHashSet::default(),
        }
    }

    pub fn entity(&self) -> EntityType {
        self.entity
    }

    pub fn header(&self) -> &StringRecord {
        &self.header
    }

    /// Retained data rows, in arrival order.
    pub fn rows(&self) -> &[StringRecord] {
        &self.rows
    }

    /// Header followed by every retained row.
    pub fn iter_with_header(&self) -> impl Iterator<Item = &StringRecord> {
        std::iter::once(&self.header).chain(self.rows.iter())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Append `record` unless a row with the same key is already present.
    /// Returns whether it was kept.
    pub fn insert(&mut self, record: Record) -> bool {
        debug_assert_eq!(record.entity, self.entity);
        if !self.keys.insert(record.key()) {
            return false;
        }
        self.rows.push(record.fields);
        true
    }
}

/// Per-run merge state: one [`Table`] per entity type.
///
/// Owned by the single consumer while records arrive, then handed to the writer.
/// The first row seen for a key wins; later rows with the same key are dropped
/// whole, whichever file they came from.
#[derive(Debug)]
pub struct ConsolidatedTables {
    tables: BTreeMap<EntityType, Table>,
}

impl Default for ConsolidatedTables {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsolidatedTables {
    pub fn new() -> Self {
        let tables = EntityType::ALL
            .into_iter()
            .map(|entity| (entity, Table::new(entity)))
            .collect();
        Self { tables }
    }

    pub fn merge(&mut self, record: Record) -> bool {
        self.tables
            .entry(record.entity)
            .or_insert_with(|| Table::new(record.entity))
            .insert(record)
    }

    pub fn get(&self, entity: EntityType) -> Option<&Table> {
        self.tables.get(&entity)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn row_counts(&self) -> Vec<(EntityType, usize)> {
        self.tables.iter().map(|(e, t)| (*e, t.len())).collect()
    }

    pub fn total_rows(&self) -> usize {
        self.tables.values().map(Table::len).sum()
    }
}
