//! Runtime support
//!
//! This module contains the object model and the built-in classes:
//! - Class descriptors and method lookup
//! - Object lifecycle (creation, reference counting, deletion)
//! - Strings, lists and tables
//! - Iterators

pub mod class;
pub mod iterator;
pub mod list;
pub mod object;
pub mod string;
pub mod table;

pub use class::{
    Class, ClassMethods, ClassRef, ClassTable, CloneFn, CompareFn, EqualFn, FinalizeFn, HashFn,
    IterateFn, TraverseFn,
};
pub use iterator::IteratorData;
pub use list::ElveaList;
pub use string::ElveaString;
pub use table::ElveaTable;

use crate::context::Builtins;

/// Register the classes every context starts with
pub(crate) fn register_builtins(classes: &mut ClassTable) -> Builtins {
    let no_methods = ClassMethods::default();
    Builtins {
        bool_class: classes.push("bool", 0, &[], no_methods),
        num: classes.push("num", 0, &[], no_methods),
        string: classes.push(
            "string",
            std::mem::size_of::<ElveaString>(),
            &[],
            string::methods(),
        ),
        list: classes.push("list", std::mem::size_of::<ElveaList>(), &[], list::methods()),
        table: classes.push("table", std::mem::size_of::<ElveaTable>(), &[], table::methods()),
        iterator: classes.push(
            "iterator",
            std::mem::size_of::<IteratorData>(),
            &[],
            iterator::methods(),
        ),
    }
}
