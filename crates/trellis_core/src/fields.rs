//! Declared-field ordering and initialization
//!
//! Every component type declares a set of named fields, each of which may
//! depend on other fields (`after`) and may be marked `atomic`. Before a
//! component instance can be constructed, its fields must be initialized in
//! an order that respects those declarations.
//!
//! Ordering is computed by weight assignment rather than an explicit
//! topological sort: a field's weight is always strictly greater than the
//! sum of its dependencies' weights, so dependency order falls out of a
//! plain stable sort on the weights. Non-atomic fields carry an additional
//! [`ATOMIC_TIER_WEIGHT`] penalty, which splits the schema into two coarse
//! tiers - atomic fields first - without any tier bookkeeping.
//!
//! ```ignore
//! use trellis_core::fields::{FieldDescriptor, FieldSchema, FieldSorter};
//!
//! let mut schema = FieldSchema::new();
//! schema.declare("theme", FieldDescriptor::new(0).atomic());
//! schema.declare("layout", FieldDescriptor::new(0).after(["theme"]));
//!
//! let mut sorter = FieldSorter::new();
//! let values = sorter.instantiate(&schema)?; // theme, then layout
//! ```
//!
//! Computed orders are memoized per schema instance, so all instances of one
//! component type share a single sort.

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Weight penalty applied to every non-atomic field.
///
/// Large enough that no realistic dependency chain among atomic fields can
/// reach it, which is what keeps the two tiers separate.
pub const ATOMIC_TIER_WEIGHT: u64 = 1000;

/// Errors surfaced while computing a schema's initialization order.
///
/// Both variants are structural: the schema itself is invalid, so sorting
/// fails before any field is initialized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    /// A field's `after` set references a name not declared in the schema.
    #[error("field `{field}` depends on undeclared field `{dependency}`")]
    MissingDependency { field: String, dependency: String },

    /// A field's `after` chain loops back onto itself.
    #[error("cyclic dependency through field `{field}`")]
    CyclicDependency { field: String },
}

/// Unique identity of a [`FieldSchema`] instance
///
/// Used as the memoization key for computed sort orders: two schemas with
/// identical contents are still distinct schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaId(u64);

static NEXT_SCHEMA_ID: AtomicU64 = AtomicU64::new(0);

impl SchemaId {
    fn next() -> Self {
        SchemaId(NEXT_SCHEMA_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Initializer callback computing a field's runtime value.
pub type FieldInit<V> = Arc<dyn Fn() -> V + Send + Sync>;

/// One declared field of a component type.
///
/// Immutable once declared on a schema; consumed per component instance to
/// compute an initial value.
#[derive(Clone)]
pub struct FieldDescriptor<V> {
    after: Vec<String>,
    atomic: bool,
    initializer: Option<FieldInit<V>>,
    default: V,
}

impl<V> FieldDescriptor<V> {
    /// Declare a non-atomic field with no dependencies.
    pub fn new(default: V) -> Self {
        Self {
            after: Vec::new(),
            atomic: false,
            initializer: None,
            default,
        }
    }

    /// Mark the field atomic: it initializes in the earliest tier regardless
    /// of how many other fields the schema declares.
    pub fn atomic(mut self) -> Self {
        self.atomic = true;
        self
    }

    /// Declare fields that must initialize before this one.
    pub fn after<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Supply an initializer; without one the default value is cloned.
    pub fn init<F>(mut self, f: F) -> Self
    where
        F: Fn() -> V + Send + Sync + 'static,
    {
        self.initializer = Some(Arc::new(f));
        self
    }

    /// Names this field depends on.
    pub fn dependencies(&self) -> &[String] {
        &self.after
    }

    /// Whether the field is in the atomic tier.
    pub fn is_atomic(&self) -> bool {
        self.atomic
    }
}

/// The full field declaration of one component type.
///
/// Declaration order is preserved and is the tie-breaker for fields with
/// equal weight.
pub struct FieldSchema<V> {
    id: SchemaId,
    fields: IndexMap<String, FieldDescriptor<V>>,
}

impl<V> FieldSchema<V> {
    pub fn new() -> Self {
        Self {
            id: SchemaId::next(),
            fields: IndexMap::new(),
        }
    }

    /// This schema's memoization identity.
    pub fn id(&self) -> SchemaId {
        self.id
    }

    /// Declare a field. Re-declaring a name replaces the previous descriptor
    /// but keeps its declaration position.
    pub fn declare(&mut self, name: impl Into<String>, field: FieldDescriptor<V>) -> &mut Self {
        self.fields.insert(name.into(), field);
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look up a descriptor by name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor<V>> {
        self.fields.get(name)
    }

    /// Name of the field at a declaration index.
    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.fields.get_index(index).map(|(name, _)| name.as_str())
    }
}

impl<V> Default for FieldSchema<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes and memoizes initialization orders for field schemas.
///
/// Orders are cached per [`SchemaId`], so the weight computation runs once
/// per component type no matter how many instances are constructed.
pub struct FieldSorter {
    cache: FxHashMap<SchemaId, Arc<[usize]>>,
}

impl FieldSorter {
    pub fn new() -> Self {
        Self {
            cache: FxHashMap::default(),
        }
    }

    /// Initialization order for a schema, as declaration indices.
    ///
    /// Stable: fields with equal weight keep declaration order. Fails fast on
    /// an undeclared or cyclic `after` reference; nothing is cached in that
    /// case.
    pub fn sort<V>(&mut self, schema: &FieldSchema<V>) -> Result<Arc<[usize]>, FieldError> {
        if let Some(order) = self.cache.get(&schema.id) {
            return Ok(Arc::clone(order));
        }

        let weights = compute_weights(schema)?;
        let mut order: Vec<usize> = (0..schema.fields.len()).collect();
        // sort_by_key is stable; ties keep declaration order
        order.sort_by_key(|&i| weights[i]);

        let order: Arc<[usize]> = order.into();
        self.cache.insert(schema.id, Arc::clone(&order));
        Ok(order)
    }

    /// Compute initial values for one component instance, in sorted order.
    ///
    /// Each field's initializer runs once; fields without one clone their
    /// default.
    pub fn instantiate<V: Clone>(
        &mut self,
        schema: &FieldSchema<V>,
    ) -> Result<Vec<(String, V)>, FieldError> {
        let order = self.sort(schema)?;
        let mut values = Vec::with_capacity(order.len());
        for &index in order.iter() {
            let (name, field) = schema
                .fields
                .get_index(index)
                .expect("cached order index out of range");
            let value = match &field.initializer {
                Some(init) => init(),
                None => field.default.clone(),
            };
            values.push((name.clone(), value));
        }
        Ok(values)
    }

    /// Drop the cached order for one schema.
    pub fn evict(&mut self, id: SchemaId) {
        self.cache.remove(&id);
    }

    /// Number of memoized schemas.
    pub fn cached_schemas(&self) -> usize {
        self.cache.len()
    }
}

impl Default for FieldSorter {
    fn default() -> Self {
        Self::new()
    }
}

/// Weight of every field in the schema, by declaration index.
///
/// weight(f) = |after| + sum(weight(dep) for dep in after)
///           + ATOMIC_TIER_WEIGHT if f is non-atomic
///
/// The recursion carries an explicit in-progress set; revisiting a field
/// already on the stack is a cycle, not unbounded recursion.
fn compute_weights<V>(schema: &FieldSchema<V>) -> Result<Vec<u64>, FieldError> {
    let mut memo: FxHashMap<usize, u64> = FxHashMap::default();
    let mut in_progress: FxHashSet<usize> = FxHashSet::default();

    for index in 0..schema.fields.len() {
        weight_of(schema, index, &mut memo, &mut in_progress)?;
    }

    Ok((0..schema.fields.len())
        .map(|i| memo[&i])
        .collect())
}

fn weight_of<V>(
    schema: &FieldSchema<V>,
    index: usize,
    memo: &mut FxHashMap<usize, u64>,
    in_progress: &mut FxHashSet<usize>,
) -> Result<u64, FieldError> {
    if let Some(&w) = memo.get(&index) {
        return Ok(w);
    }
    let (name, field) = schema
        .fields
        .get_index(index)
        .expect("field index out of range");

    if !in_progress.insert(index) {
        return Err(FieldError::CyclicDependency {
            field: name.clone(),
        });
    }

    let mut weight = 0u64;
    if !field.after.is_empty() {
        weight += field.after.len() as u64;
        for dep_name in &field.after {
            let dep_index = schema.fields.get_index_of(dep_name).ok_or_else(|| {
                FieldError::MissingDependency {
                    field: name.clone(),
                    dependency: dep_name.clone(),
                }
            })?;
            weight += weight_of(schema, dep_index, memo, in_progress)?;
        }
    }
    if !field.atomic {
        weight += ATOMIC_TIER_WEIGHT;
    }

    in_progress.remove(&index);
    memo.insert(index, weight);
    Ok(weight)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names<V>(schema: &FieldSchema<V>, order: &[usize]) -> Vec<String> {
        order
            .iter()
            .map(|&i| schema.name_at(i).unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_atomic_fields_precede_non_atomic() {
        let mut schema = FieldSchema::new();
        schema.declare("b", FieldDescriptor::new(0));
        schema.declare("a", FieldDescriptor::new(0).atomic());

        let mut sorter = FieldSorter::new();
        let order = sorter.sort(&schema).unwrap();
        assert_eq!(names(&schema, &order), vec!["a", "b"]);
    }

    #[test]
    fn test_weighted_order_example() {
        // weight(a)=0, weight(c)=1, weight(b)=1000 -> [a, c, b]
        let mut schema = FieldSchema::new();
        schema.declare("a", FieldDescriptor::new(0).atomic());
        schema.declare("b", FieldDescriptor::new(0));
        schema.declare("c", FieldDescriptor::new(0).atomic().after(["a"]));

        let mut sorter = FieldSorter::new();
        let order = sorter.sort(&schema).unwrap();
        assert_eq!(names(&schema, &order), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let mut schema = FieldSchema::new();
        schema.declare("x", FieldDescriptor::new(0));
        schema.declare("y", FieldDescriptor::new(0));
        schema.declare("z", FieldDescriptor::new(0));

        let mut sorter = FieldSorter::new();
        let order = sorter.sort(&schema).unwrap();
        assert_eq!(names(&schema, &order), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_dependency_chain_orders_before_dependent() {
        let mut schema = FieldSchema::new();
        schema.declare("list", FieldDescriptor::new(0).after(["source"]));
        schema.declare("source", FieldDescriptor::new(0));
        schema.declare("total", FieldDescriptor::new(0).after(["list"]));

        let mut sorter = FieldSorter::new();
        let order = sorter.sort(&schema).unwrap();
        let order = names(&schema, &order);

        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("source") < pos("list"));
        assert!(pos("list") < pos("total"));
    }

    #[test]
    fn test_missing_dependency_fails_fast() {
        let mut schema = FieldSchema::new();
        schema.declare("a", FieldDescriptor::new(0).after(["ghost"]));

        let mut sorter = FieldSorter::new();
        let err = sorter.sort(&schema).unwrap_err();
        assert_eq!(
            err,
            FieldError::MissingDependency {
                field: "a".into(),
                dependency: "ghost".into(),
            }
        );
    }

    #[test]
    fn test_cyclic_dependency_detected() {
        let mut schema = FieldSchema::new();
        schema.declare("a", FieldDescriptor::new(0).after(["b"]));
        schema.declare("b", FieldDescriptor::new(0).after(["a"]));

        let mut sorter = FieldSorter::new();
        let err = sorter.sort(&schema).unwrap_err();
        assert!(matches!(err, FieldError::CyclicDependency { .. }));
    }

    #[test]
    fn test_self_cycle_detected() {
        let mut schema = FieldSchema::new();
        schema.declare("a", FieldDescriptor::new(0).after(["a"]));

        let mut sorter = FieldSorter::new();
        let err = sorter.sort(&schema).unwrap_err();
        assert!(matches!(err, FieldError::CyclicDependency { .. }));
    }

    #[test]
    fn test_order_memoized_per_schema() {
        let mut schema = FieldSchema::new();
        schema.declare("a", FieldDescriptor::new(0));
        schema.declare("b", FieldDescriptor::new(0).atomic());

        let mut sorter = FieldSorter::new();
        let first = sorter.sort(&schema).unwrap();
        let second = sorter.sort(&schema).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(sorter.cached_schemas(), 1);

        // A distinct schema with identical contents gets its own entry
        let mut clone = FieldSchema::new();
        clone.declare("a", FieldDescriptor::new(0));
        clone.declare("b", FieldDescriptor::new(0).atomic());
        sorter.sort(&clone).unwrap();
        assert_eq!(sorter.cached_schemas(), 2);
    }

    #[test]
    fn test_instantiate_runs_initializers_in_order() {
        use std::sync::Mutex;

        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let mut schema = FieldSchema::new();

        let l = Arc::clone(&log);
        schema.declare(
            "derived",
            FieldDescriptor::new(0).after(["base"]).init(move || {
                l.lock().unwrap().push("derived");
                2
            }),
        );
        let l = Arc::clone(&log);
        schema.declare(
            "base",
            FieldDescriptor::new(0).atomic().init(move || {
                l.lock().unwrap().push("base");
                1
            }),
        );

        let mut sorter = FieldSorter::new();
        let values = sorter.instantiate(&schema).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["base", "derived"]);
        assert_eq!(values[0], ("base".to_string(), 1));
        assert_eq!(values[1], ("derived".to_string(), 2));
    }

    #[test]
    fn test_instantiate_clones_default_without_initializer() {
        let mut schema = FieldSchema::new();
        schema.declare("label", FieldDescriptor::new("hi".to_string()));

        let mut sorter = FieldSorter::new();
        let values = sorter.instantiate(&schema).unwrap();
        assert_eq!(values, vec![("label".to_string(), "hi".to_string())]);
    }
}
