//! Object categories and capability sets.
//!
//! Instead of a type hierarchy ("this factory can build X, Y and Z"), every resolver declares the
//! set of categories it can produce and dispatch checks membership.

use std::collections::BTreeSet;
use std::fmt;

/// A kind of catalogued object (e.g. "geographic-crs", "datum", "unit").
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Category(&'static str);

impl Category {
    /// Wildcard: matches every category.
    pub const ANY: Category = Category("*");

    /// Create a named category.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Category name.
    pub const fn name(&self) -> &'static str {
        self.0
    }

    /// Whether this is the wildcard category.
    pub fn is_any(&self) -> bool {
        *self == Self::ANY
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Set of categories a resolver claims it can produce.
///
/// A set containing [`Category::ANY`] claims everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CategorySet(BTreeSet<Category>);

impl CategorySet {
    /// Claims nothing.
    pub fn empty() -> Self {
        Self(BTreeSet::new())
    }

    /// Claims every category.
    pub fn any() -> Self {
        Self(BTreeSet::from([Category::ANY]))
    }

    /// Claims exactly the given categories.
    pub fn of(categories: impl IntoIterator<Item = Category>) -> Self {
        Self(categories.into_iter().collect())
    }

    /// Whether the set claims `category`.
    pub fn contains(&self, category: Category) -> bool {
        if category.is_any() {
            return !self.0.is_empty();
        }
        self.is_unrestricted() || self.0.contains(&category)
    }

    /// Whether the set claims every category.
    pub fn is_unrestricted(&self) -> bool {
        self.0.contains(&Category::ANY)
    }

    /// Whether the set claims nothing.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Categories in the set (the wildcard appears as [`Category::ANY`]).
    pub fn iter(&self) -> impl Iterator<Item = Category> + '_ {
        self.0.iter().copied()
    }

    /// Everything either set claims.
    pub fn union(&self, other: &CategorySet) -> CategorySet {
        if self.is_unrestricted() || other.is_unrestricted() {
            return CategorySet::any();
        }
        Self(self.0.union(&other.0).copied().collect())
    }

    /// Everything both sets claim.
    pub fn intersection(&self, other: &CategorySet) -> CategorySet {
        match (self.is_unrestricted(), other.is_unrestricted()) {
            (true, _) => other.clone(),
            (_, true) => self.clone(),
            _ => Self(self.0.intersection(&other.0).copied().collect()),
        }
    }
}

impl FromIterator<Category> for CategorySet {
    fn from_iter<I: IntoIterator<Item = Category>>(iter: I) -> Self {
        Self::of(iter)
    }
}

/// Contract for objects handed out by resolvers.
///
/// Objects are immutable once built and shared as `Arc<Self>`.
pub trait Catalogued: Send + Sync + fmt::Debug + 'static {
    /// The object's category.
    fn category(&self) -> Category;

    /// Whether the object can be handed out as `category`. Override to express narrowing
    /// relationships (a geographic CRS is also a CRS).
    fn is_a(&self, category: Category) -> bool {
        category.is_any() || self.category() == category
    }

    /// Catalog code carried by the object itself, if any (e.g. `"EPSG:4326"`).
    fn identifier(&self) -> Option<&str> {
        None
    }

    /// Structural equality ignoring metadata such as names and remarks.
    fn matches(&self, other: &Self) -> bool;

    /// Hash consistent with [`Catalogued::matches`].
    fn fingerprint(&self) -> u64;
}
