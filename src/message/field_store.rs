use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::field::Field;

/// Number of fields beyond which tree storage rolls over to hash storage
/// unless configured otherwise.
pub const DEFAULT_ROLLOVER_LIMIT: usize = 50;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreType {
    Tree,
    Hash,
}

#[derive(Clone, Debug)]
enum Backing {
    Tree(BTreeMap<String, Field>),
    Hash(FxHashMap<String, Field>),
}

/// Field container of a message. Starts out as an ordered tree map (readable,
/// deterministic serialization) and converts to a hash map once the rollover
/// limit is exceeded. The conversion is one-way for the life of the store.
#[derive(Clone, Debug)]
pub struct FieldStore {
    backing: Backing,
    rollover_limit: usize,
}

impl FieldStore {
    pub fn new(store_type: StoreType, rollover_limit: usize) -> FieldStore {
        let backing = match store_type {
            StoreType::Tree => Backing::Tree(BTreeMap::new()),
            StoreType::Hash => Backing::Hash(FxHashMap::default()),
        };
        FieldStore {
            backing,
            rollover_limit,
        }
    }

    /// Inserts a field, returning whether a field of the same name was
    /// replaced. A rollover limit of 0 disables the conversion.
    pub fn add(&mut self, field: Field) -> bool {
        if let Backing::Tree(tree) = &mut self.backing {
            if self.rollover_limit > 0 && tree.len() + 1 > self.rollover_limit {
                let mut hash = FxHashMap::default();
                hash.extend(std::mem::take(tree));
                self.backing = Backing::Hash(hash);
            }
        }
        match &mut self.backing {
            Backing::Tree(tree) => tree.insert(field.name().to_string(), field).is_some(),
            Backing::Hash(hash) => hash.insert(field.name().to_string(), field).is_some(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        match &self.backing {
            Backing::Tree(tree) => tree.get(name),
            Backing::Hash(hash) => hash.get(name),
        }
    }

    /// Removes the named field; false if it was not present.
    pub fn remove(&mut self, name: &str) -> bool {
        match &mut self.backing {
            Backing::Tree(tree) => tree.remove(name).is_some(),
            Backing::Hash(hash) => hash.remove(name).is_some(),
        }
    }

    pub fn clear(&mut self) {
        match &mut self.backing {
            Backing::Tree(tree) => tree.clear(),
            Backing::Hash(hash) => hash.clear(),
        }
    }

    pub fn len(&self) -> usize {
        match &self.backing {
            Backing::Tree(tree) => tree.len(),
            Backing::Hash(hash) => hash.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_tree(&self) -> bool {
        matches!(self.backing, Backing::Tree(_))
    }

    pub fn iter(&self) -> FieldIter<'_> {
        match &self.backing {
            Backing::Tree(tree) => FieldIter::Tree(tree.values()),
            Backing::Hash(hash) => FieldIter::Hash(hash.values()),
        }
    }

    /// Fields in serialization order: storage order for the tree backing,
    /// sorted by name when `sorted` is requested (or required, once hashed
    /// output would otherwise be nondeterministic).
    pub fn display_fields(&self, sorted: bool) -> Vec<&Field> {
        let mut fields: Vec<&Field> = self.iter().collect();
        if sorted && !self.is_tree() {
            fields.sort_by(|a, b| a.name().cmp(b.name()));
        }
        fields
    }
}

pub enum FieldIter<'a> {
    Tree(std::collections::btree_map::Values<'a, String, Field>),
    Hash(std::collections::hash_map::Values<'a, String, Field>),
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = &'a Field;

    fn next(&mut self) -> Option<&'a Field> {
        match self {
            FieldIter::Tree(values) => values.next(),
            FieldIter::Hash(values) => values.next(),
        }
    }
}
