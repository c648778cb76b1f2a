//! Thread context
//!
//! The Context is the main entry point of the runtime core. It owns every
//! object, alias cell and class of one thread, together with the allocator,
//! the error handler and the hash seed. All operations take it explicitly.

use crate::config::RuntimeConfig;
use crate::error::{Error, ErrorHandler, ErrorKind, Result, raise};
use crate::gc::{Allocator, Collector, ObjectHeap, SystemAllocator, Tracked};
use crate::runtime::{self, ClassRef, ClassTable};

/// Classes every context registers at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Builtins {
    pub bool_class: ClassRef,
    pub num: ClassRef,
    pub string: ClassRef,
    pub list: ClassRef,
    pub table: ClassRef,
    pub iterator: ClassRef,
}

/// Runtime context
///
/// A context is confined to the thread that created it.
pub struct Context {
    /// Objects, addressed by `ObjectRef`
    pub(crate) heap: ObjectHeap,

    /// Arena, collector chain and candidate buffer
    pub(crate) collector: Collector,

    pub(crate) classes: ClassTable,

    builtins: Builtins,

    /// Byte budget hook, wrapped to count what it granted
    pub(crate) allocator: Tracked,

    /// Receives every raised error; `None` means print and exit
    pub(crate) error_handler: Option<ErrorHandler>,

    seed: u32,

    pub(crate) config: RuntimeConfig,
}

impl Context {
    /// Create a context backed by the system allocator
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_allocator(config, Box::new(SystemAllocator::new()))
    }

    /// Create a context whose memory is governed by `allocator`
    pub fn with_allocator(config: RuntimeConfig, allocator: Box<dyn Allocator>) -> Self {
        let mut classes = ClassTable::new();
        let builtins = runtime::register_builtins(&mut classes);
        let seed = config.seed.unwrap_or_else(rand::random);

        log::debug!(
            "context created: page size {}, gc threshold {}, seed {:#010x}",
            config.page_size,
            config.gc_threshold,
            seed
        );

        Context {
            heap: ObjectHeap::new(),
            collector: Collector::new(config.page_size),
            classes,
            builtins,
            allocator: Tracked::new(allocator),
            error_handler: None,
            seed,
            config,
        }
    }

    /// Install the function that receives raised errors
    ///
    /// The operation that raised still returns `Err` once the handler returns.
    pub fn set_error_handler(&mut self, handler: impl Fn(ErrorKind, &str) + 'static) {
        self.error_handler = Some(Box::new(handler));
    }

    /// Go back to the default handler, which terminates the process
    pub fn clear_error_handler(&mut self) {
        self.error_handler = None;
    }

    /// Report an error and build the value to return
    pub fn throw(&self, kind: ErrorKind, message: impl Into<String>) -> Error {
        raise(self.error_handler.as_ref(), kind, message)
    }

    /// Seed for string hashing
    #[inline]
    pub fn seed(&self) -> u32 {
        self.seed
    }

    #[inline]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[inline]
    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    /// Get memory usage statistics
    pub fn memory_stats(&self) -> MemoryStats {
        let arena = self.collector.arena();
        MemoryStats {
            bytes_allocated: self.allocator.reserved(),
            objects: self.heap.len(),
            collectable_objects: self.collector.chain().len(),
            pages: arena.page_count(),
            live_cells: arena.live_count(),
            candidates: self.collector.candidates().len(),
        }
    }

    /// Move a reservation from `old_size` to `new_size` bytes
    pub(crate) fn reserve(&mut self, old_size: usize, new_size: usize) -> Result<()> {
        if self.allocator.realloc(old_size, new_size) {
            Ok(())
        } else {
            log::debug!("allocator refused {} -> {} bytes", old_size, new_size);
            Err(self.throw(ErrorKind::Memory, "memory allocation failed"))
        }
    }

    /// Log every object on the collector chain
    #[cfg(feature = "dump")]
    pub fn dump_chain(&self) {
        log::debug!("collector chain: {} object(s)", self.chain_len());
        for (obj, object) in self.chain() {
            let name = self
                .classes
                .get(object.class())
                .map_or("unknown", |class| class.name());
            log::debug!(
                "  #{} {} rc={} color={:?} buffered={}",
                obj.index(),
                name,
                object.ref_count(),
                object.meta().color(),
                object.meta().is_buffered()
            );
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if !self.heap.is_empty() {
            log::debug!(
                "context dropped with {} live object(s), {} live cell(s)",
                self.heap.len(),
                self.collector.arena().live_count()
            );
            for (obj, object) in self.heap.iter() {
                log::debug!(
                    "  leaked #{} class #{} rc={}",
                    obj.index(),
                    object.class().index(),
                    object.ref_count()
                );
            }
        } else {
            log::debug!("context dropped");
        }
    }
}

/// Memory usage statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    /// Bytes currently reserved through the allocator
    pub bytes_allocated: usize,
    /// Live objects
    pub objects: usize,
    /// Live objects on the collector chain
    pub collectable_objects: usize,
    /// Arena pages held
    pub pages: usize,
    /// Arena cells handed out
    pub live_cells: usize,
    /// Buffered cycle candidates
    pub candidates: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::LimitedAllocator;
    use crate::test_support::recording_context;
    use crate::variant::Variant;

    #[test]
    fn test_create_context() {
        let (ctx, _errors) = recording_context();
        let stats = ctx.memory_stats();
        assert_eq!(stats.objects, 0);
        assert_eq!(stats.pages, 0);
        assert_eq!(stats.bytes_allocated, 0);
        assert_eq!(ctx.seed(), 1234);
    }

    #[test]
    fn test_builtin_classes() {
        let (ctx, _errors) = recording_context();
        let builtins = *ctx.builtins();
        assert_eq!(ctx.class(builtins.bool_class).unwrap().name(), "bool");
        assert_eq!(ctx.class(builtins.num).unwrap().name(), "num");
        assert_eq!(ctx.class(builtins.string).unwrap().name(), "string");
        assert_eq!(ctx.class(builtins.list).unwrap().name(), "list");
        assert_eq!(ctx.class(builtins.table).unwrap().name(), "table");
        assert_eq!(ctx.class(builtins.iterator).unwrap().name(), "iterator");
    }

    #[test]
    fn test_fixed_seed() {
        let ctx = Context::new(RuntimeConfig::builder().seed(7).build());
        assert_eq!(ctx.seed(), 7);
    }

    #[test]
    fn test_throw_reaches_handler() {
        let (ctx, errors) = recording_context();
        let err = ctx.throw(ErrorKind::Math, "division by zero");
        assert_eq!(err.kind, ErrorKind::Math);
        assert_eq!(err.to_string(), "Math error: division by zero");
        assert_eq!(
            errors.borrow().as_slice(),
            &[(ErrorKind::Math, "division by zero".to_string())]
        );
    }

    #[test]
    fn test_memory_stats_track_allocations() {
        let (mut ctx, _errors) = recording_context();
        let list = ctx.list_new(0).unwrap();
        let mut v = ctx.init_object(list).unwrap();
        ctx.make_alias(&mut v).unwrap();

        let stats = ctx.memory_stats();
        assert_eq!(stats.objects, 1);
        assert_eq!(stats.collectable_objects, 1);
        assert_eq!(stats.pages, 1);
        assert_eq!(stats.live_cells, 1);
        assert!(stats.bytes_allocated > 0);

        ctx.clear(&mut v).unwrap();
        let stats = ctx.memory_stats();
        assert_eq!(stats.objects, 0);
        assert_eq!(stats.live_cells, 0);
        assert_eq!(stats.bytes_allocated, ctx.collector().arena().page_bytes());
    }

    #[test]
    fn test_allocator_refusal() {
        let mut ctx = Context::with_allocator(
            RuntimeConfig::builder().seed(1).build(),
            Box::new(LimitedAllocator::new(8)),
        );
        ctx.set_error_handler(|_, _| {});

        let err = ctx.list_new(0).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Memory);
        assert_eq!(err.message, "memory allocation failed");
        assert_eq!(ctx.memory_stats().objects, 0);
    }

    #[test]
    fn test_closure_allocator() {
        let mut ctx = Context::with_allocator(
            RuntimeConfig::builder().seed(1).build(),
            Box::new(|_old: usize, new: usize| new <= 4096),
        );
        ctx.set_error_handler(|_, _| {});
        let s = ctx.string_new("fits").unwrap();
        let v = ctx.init_object(s).unwrap();
        assert!(ctx.check_string(v));
        ctx.release(v).unwrap();
    }

    #[test]
    fn test_default_context_is_usable() {
        let mut ctx = Context::default();
        ctx.set_error_handler(|_, _| {});
        let mut v = Variant::Number(1.0);
        ctx.make_alias(&mut v).unwrap();
        ctx.clear(&mut v).unwrap();
        assert_eq!(ctx.memory_stats().live_cells, 0);
    }
}
