//! Built-in hash table
//!
//! Separate chaining over a power-of-two bucket array. The table doubles
//! once it holds more than 3/4 entries per bucket. Every entry caches the
//! hash of its key, so growing never calls back into key hashing.
//!
//! Keys are compared with [`Context::equal`] and hashed with
//! [`Context::hash`], so any hashable value can be a key: numbers, booleans,
//! classes and objects whose class implements `hash`.

use std::mem::size_of;

use crate::context::Context;
use crate::error::Result;
use crate::gc::{ObjectRef, Tracer};
use crate::runtime::ClassMethods;
use crate::util::bucket_count_for;
use crate::variant::Variant;

const MIN_BUCKETS: usize = 8;

/// Bytes reserved per entry
const ENTRY_SIZE: usize = size_of::<Entry>();

/// Bytes reserved per bucket
const BUCKET_SIZE: usize = size_of::<Vec<Entry>>();

#[derive(Debug, Clone, Copy)]
struct Entry {
    hash: u32,
    key: Variant,
    value: Variant,
}

/// Table payload
#[derive(Debug)]
pub struct ElveaTable {
    buckets: Vec<Vec<Entry>>,
    len: usize,
}

impl ElveaTable {
    pub fn with_capacity(capacity: usize) -> Self {
        // Room for `capacity` entries without crossing the load factor
        let wanted = capacity + capacity / 3;
        let count = bucket_count_for(wanted, MIN_BUCKETS);
        ElveaTable {
            buckets: (0..count).map(|_| Vec::new()).collect(),
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// All `(key, value)` pairs, in bucket order
    pub fn iter(&self) -> impl Iterator<Item = (Variant, Variant)> + '_ {
        self.buckets
            .iter()
            .flatten()
            .map(|entry| (entry.key, entry.value))
    }

    #[inline]
    fn bucket_of(&self, hash: u32) -> usize {
        hash as usize & (self.buckets.len() - 1)
    }

    fn needs_growth(&self) -> bool {
        self.len * 4 > self.buckets.len() * 3
    }

    /// Double the bucket array, redistributing by cached hash
    fn grow(&mut self) {
        let count = self.buckets.len() * 2;
        let old = std::mem::replace(&mut self.buckets, (0..count).map(|_| Vec::new()).collect());
        for entry in old.into_iter().flatten() {
            let bucket = self.bucket_of(entry.hash);
            self.buckets[bucket].push(entry);
        }
    }

    fn drain(&mut self) -> impl Iterator<Item = Entry> + '_ {
        self.len = 0;
        self.buckets.iter_mut().flat_map(|bucket| bucket.drain(..))
    }
}

pub(crate) fn methods() -> ClassMethods {
    ClassMethods {
        finalize: Some(finalize),
        clone: Some(clone),
        traverse: Some(traverse),
        iterate: Some(iterate),
        ..ClassMethods::default()
    }
}

fn finalize(ctx: &mut Context, obj: ObjectRef) -> Result<()> {
    let entries: Vec<Entry> = ctx.data_mut::<ElveaTable>(obj)?.drain().collect();
    for entry in entries {
        ctx.release(entry.key)?;
        ctx.release(entry.value)?;
    }
    Ok(())
}

fn traverse(ctx: &Context, obj: ObjectRef, tracer: &mut Tracer) {
    if let Some(table) = ctx.heap.get(obj).and_then(|o| o.data::<ElveaTable>()) {
        for (key, value) in table.iter() {
            tracer.visit(key);
            tracer.visit(value);
        }
    }
}

/// Shallow copy: keys and values are shared
fn clone(ctx: &mut Context, obj: ObjectRef) -> Result<ObjectRef> {
    let source = ctx.data::<ElveaTable>(obj)?;
    let buckets = source.buckets.clone();
    let len = source.len;

    let copy = ctx.table_new(0)?;
    let old_buckets = ctx.data::<ElveaTable>(copy)?.bucket_count();
    let size = ctx.object(copy)?.size() + (buckets.len() - old_buckets) * BUCKET_SIZE
        + len * ENTRY_SIZE;
    ctx.resize_object(copy, size)?;

    for entry in buckets.iter().flatten() {
        ctx.retain(entry.key)?;
        ctx.retain(entry.value)?;
    }
    let table = ctx.data_mut::<ElveaTable>(copy)?;
    table.buckets = buckets;
    table.len = len;
    Ok(copy)
}

/// Yields the keys; the state packs bucket and position in the bucket
fn iterate(
    ctx: &mut Context,
    obj: ObjectRef,
    state: &mut Variant,
    result: &mut Variant,
) -> Result<bool> {
    const SHIFT: f64 = 4_294_967_296.0;

    let (mut bucket, mut slot) = match *state {
        Variant::Number(n) => ((n / SHIFT) as usize, (n % SHIFT) as usize),
        _ => (0, 0),
    };

    let table = ctx.data::<ElveaTable>(obj)?;
    let key = loop {
        let Some(entries) = table.buckets.get(bucket) else {
            return Ok(false);
        };
        match entries.get(slot) {
            Some(entry) => break entry.key,
            None => {
                bucket += 1;
                slot = 0;
            }
        }
    };

    ctx.copy(result, key)?;
    ctx.set_num(state, bucket as f64 * SHIFT + (slot + 1) as f64)?;
    Ok(true)
}

impl Context {
    /// Create an empty table with a reference count of 0
    pub fn table_new(&mut self, capacity: usize) -> Result<ObjectRef> {
        let class = self.builtins().table;
        let table = ElveaTable::with_capacity(capacity);
        let extra = table.bucket_count() * BUCKET_SIZE;
        self.new_object_with(class, true, extra, table)
    }

    pub fn table_len(&self, table: Variant) -> Result<usize> {
        let obj = self.get_table(table)?;
        Ok(self.data::<ElveaTable>(obj)?.len())
    }

    /// Value stored under `key`, borrowed from the table
    pub fn table_get(&self, table: Variant, key: Variant) -> Result<Option<Variant>> {
        let obj = self.get_table(table)?;
        let hash = self.hash(key)?;
        match self.find_entry(obj, hash, key)? {
            Some((bucket, slot)) => {
                Ok(Some(self.data::<ElveaTable>(obj)?.buckets[bucket][slot].value))
            }
            None => Ok(None),
        }
    }

    pub fn table_contains(&self, table: Variant, key: Variant) -> Result<bool> {
        let obj = self.get_table(table)?;
        let hash = self.hash(key)?;
        Ok(self.find_entry(obj, hash, key)?.is_some())
    }

    /// Store `value` under `key`, sharing both payloads
    pub fn table_set(&mut self, target: &mut Variant, key: Variant, value: Variant) -> Result<()> {
        let hash = self.hash(key)?;
        let class = self.builtins().table;
        let obj = self.unshare(target, class)?;

        if let Some((bucket, slot)) = self.find_entry(obj, hash, key)? {
            self.retain(value)?;
            let entry = &mut self.data_mut::<ElveaTable>(obj)?.buckets[bucket][slot];
            let old = std::mem::replace(&mut entry.value, value);
            return self.release(old);
        }

        self.resize_object(obj, self.object(obj)?.size() + ENTRY_SIZE)?;
        self.retain(key)?;
        self.retain(value)?;

        let table = self.data_mut::<ElveaTable>(obj)?;
        let bucket = table.bucket_of(hash);
        table.buckets[bucket].push(Entry { hash, key, value });
        table.len += 1;

        if table.needs_growth() {
            let added = table.bucket_count() * BUCKET_SIZE;
            self.resize_object(obj, self.object(obj)?.size() + added)?;
            self.data_mut::<ElveaTable>(obj)?.grow();
        }
        Ok(())
    }

    /// Remove `key`, handing its value's reference to the caller
    pub fn table_remove(&mut self, target: &mut Variant, key: Variant) -> Result<Option<Variant>> {
        if !self.table_contains(*target, key)? {
            return Ok(None);
        }

        let hash = self.hash(key)?;
        let class = self.builtins().table;
        let obj = self.unshare(target, class)?;
        let Some((bucket, slot)) = self.find_entry(obj, hash, key)? else {
            return Ok(None);
        };

        let table = self.data_mut::<ElveaTable>(obj)?;
        let entry = table.buckets[bucket].swap_remove(slot);
        table.len -= 1;

        self.resize_object(obj, self.object(obj)?.size().saturating_sub(ENTRY_SIZE))?;
        self.release(entry.key)?;
        Ok(Some(entry.value))
    }

    fn find_entry(&self, obj: ObjectRef, hash: u32, key: Variant) -> Result<Option<(usize, usize)>> {
        let table = self.data::<ElveaTable>(obj)?;
        let bucket = table.bucket_of(hash);
        for (slot, entry) in table.buckets[bucket].iter().enumerate() {
            if entry.hash == hash && self.equal(entry.key, key)? {
                return Ok(Some((bucket, slot)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::recording_context;

    fn new_table(ctx: &mut Context) -> Variant {
        let table = ctx.table_new(0).unwrap();
        ctx.init_object(table).unwrap()
    }

    #[test]
    fn test_set_get_remove() {
        let (mut ctx, _errors) = recording_context();
        let mut t = new_table(&mut ctx);

        ctx.table_set(&mut t, Variant::Number(1.0), Variant::True).unwrap();
        ctx.table_set(&mut t, Variant::True, Variant::Number(2.0)).unwrap();
        assert_eq!(ctx.table_len(t).unwrap(), 2);
        assert_eq!(
            ctx.table_get(t, Variant::Number(1.0)).unwrap(),
            Some(Variant::True)
        );
        assert!(ctx.table_contains(t, Variant::True).unwrap());
        assert_eq!(ctx.table_get(t, Variant::False).unwrap(), None);

        // Overwrite keeps the length
        ctx.table_set(&mut t, Variant::Number(1.0), Variant::False).unwrap();
        assert_eq!(ctx.table_len(t).unwrap(), 2);
        assert_eq!(
            ctx.table_get(t, Variant::Number(1.0)).unwrap(),
            Some(Variant::False)
        );

        assert_eq!(
            ctx.table_remove(&mut t, Variant::True).unwrap(),
            Some(Variant::Number(2.0))
        );
        assert_eq!(ctx.table_remove(&mut t, Variant::True).unwrap(), None);
        assert_eq!(ctx.table_len(t).unwrap(), 1);

        ctx.clear(&mut t).unwrap();
        assert_eq!(ctx.memory_stats().bytes_allocated, 0);
    }

    #[test]
    fn test_string_keys() {
        let (mut ctx, _errors) = recording_context();
        let mut t = new_table(&mut ctx);
        let k1 = ctx.string_new("name").unwrap();
        let key = ctx.init_object(k1).unwrap();
        ctx.table_set(&mut t, key, Variant::Number(7.0)).unwrap();
        ctx.release(key).unwrap();

        // A distinct but equal string finds the entry
        let k2 = ctx.string_new("name").unwrap();
        let probe = ctx.init_object(k2).unwrap();
        assert_eq!(
            ctx.table_get(t, probe).unwrap(),
            Some(Variant::Number(7.0))
        );
        assert_eq!(ctx.ref_count(k1).unwrap(), 1);
        ctx.release(probe).unwrap();
    }

    #[test]
    fn test_growth_keeps_entries() {
        let (mut ctx, _errors) = recording_context();
        let mut t = new_table(&mut ctx);
        for i in 0..100 {
            ctx.table_set(&mut t, Variant::from(i), Variant::from(i * 2))
                .unwrap();
        }
        let obj = t.as_object().unwrap();
        let table = ctx.data::<ElveaTable>(obj).unwrap();
        assert_eq!(table.len(), 100);
        assert!(table.bucket_count() >= 128);
        assert!(!table.needs_growth());

        for i in 0..100 {
            assert_eq!(
                ctx.table_get(t, Variant::from(i)).unwrap(),
                Some(Variant::from(i * 2))
            );
        }
        ctx.clear(&mut t).unwrap();
        assert_eq!(ctx.memory_stats().bytes_allocated, 0);
    }

    #[test]
    fn test_unhashable_key() {
        let (mut ctx, _errors) = recording_context();
        let mut t = new_table(&mut ctx);
        let err = ctx.table_set(&mut t, Variant::Null, Variant::True).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Runtime);

        let list = ctx.list_new(0).unwrap();
        let err = ctx
            .table_set(&mut t, Variant::Object(list), Variant::True)
            .unwrap_err();
        assert_eq!(err.message, "Type list is not hashable (implement hash)");
    }

    #[test]
    fn test_copy_on_write() {
        let (mut ctx, _errors) = recording_context();
        let mut a = new_table(&mut ctx);
        ctx.table_set(&mut a, Variant::Number(1.0), Variant::True).unwrap();
        let mut b = Variant::Null;
        ctx.copy(&mut b, a).unwrap();

        ctx.table_set(&mut b, Variant::Number(2.0), Variant::True).unwrap();
        assert_ne!(a, b);
        assert_eq!(ctx.table_len(a).unwrap(), 1);
        assert_eq!(ctx.table_len(b).unwrap(), 2);

        ctx.clear(&mut a).unwrap();
        ctx.clear(&mut b).unwrap();
        assert_eq!(ctx.memory_stats().objects, 0);
        assert_eq!(ctx.memory_stats().bytes_allocated, 0);
    }

    #[test]
    fn test_table_cycle_is_collected() {
        let (mut ctx, _errors) = recording_context();
        let mut t = new_table(&mut ctx);
        ctx.make_alias(&mut t).unwrap();
        let holder = t;
        ctx.table_set(&mut t, Variant::True, holder).unwrap();

        ctx.clear(&mut t).unwrap();
        assert_eq!(ctx.memory_stats().objects, 1);
        let stats = ctx.collect_cycles().unwrap();
        assert_eq!(stats.objects_freed, 1);
        assert_eq!(ctx.memory_stats().objects, 0);
    }
}
