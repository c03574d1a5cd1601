//! Registration plumbing for the standard library: each module (`basic`,
//! `table`, `coroutine`, ...) builds a [`LibraryModule`] describing its
//! functions, and a [`LibraryRegistry`] installs all of them into a fresh VM.

use crate::value::LuaValue;
use crate::vm::error::LuaResult;
use crate::vm::{CFunction, LuaVM};

/// A value computed once at load time rather than a plain constant (used for
/// things like `math.huge`, which needs an `f64` rather than a Lua literal).
pub type ValueInitializer = fn(&mut LuaVM) -> LuaValue;

pub enum LibraryEntry {
    Function(CFunction),
    Value(ValueInitializer),
}

/// A named table of functions/values installed as one global (`string`,
/// `table`, ...), or spliced directly into `_G` when `name == "_G"`.
pub struct LibraryModule {
    pub name: &'static str,
    pub entries: Vec<(&'static str, LibraryEntry)>,
}

impl LibraryModule {
    pub const fn new(name: &'static str) -> Self {
        LibraryModule { name, entries: Vec::new() }
    }

    pub fn with_function(mut self, name: &'static str, func: CFunction) -> Self {
        self.entries.push((name, LibraryEntry::Function(func)));
        self
    }

    pub fn with_value(mut self, name: &'static str, value_init: ValueInitializer) -> Self {
        self.entries.push((name, LibraryEntry::Value(value_init)));
        self
    }
}

/// Shorthand for building a [`LibraryModule`] of plain functions:
/// `lib_module!("table", { "insert" => table::insert, "remove" => table::remove })`.
#[macro_export]
macro_rules! lib_module {
    ($name:expr, { $($item_name:expr => $item:expr),* $(,)? }) => {{
        let mut module = $crate::lib_registry::LibraryModule::new($name);
        $(
            module.entries.push(($item_name, $crate::lib_registry::LibraryEntry::Function($item)));
        )*
        module
    }};
}

pub struct LibraryRegistry {
    modules: Vec<LibraryModule>,
}

impl Default for LibraryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LibraryRegistry {
    pub fn new() -> Self {
        LibraryRegistry { modules: Vec::new() }
    }

    pub fn register(&mut self, module: LibraryModule) {
        self.modules.push(module);
    }

    pub fn load_all(&self, vm: &mut LuaVM) -> LuaResult<()> {
        for module in &self.modules {
            self.load_module(vm, module)?;
        }
        Ok(())
    }

    fn load_module(&self, vm: &mut LuaVM, module: &LibraryModule) -> LuaResult<()> {
        if module.name == "_G" {
            for (name, entry) in &module.entries {
                let value = Self::resolve(vm, entry);
                vm.set_global(name, value);
            }
            return Ok(());
        }

        let table_id = vm.pool.alloc_table(crate::lua_value::LuaTable::with_capacity(0, module.entries.len()));
        for (name, entry) in &module.entries {
            let value = Self::resolve(vm, entry);
            let key = vm.pool.intern_string(name);
            vm.pool.get_table_mut(table_id).unwrap().set(LuaValue::string(key), value);
        }
        vm.set_global(module.name, LuaValue::table(table_id));
        Ok(())
    }

    fn resolve(vm: &mut LuaVM, entry: &LibraryEntry) -> LuaValue {
        match entry {
            LibraryEntry::Function(f) => LuaValue::native_function(*f),
            LibraryEntry::Value(init) => init(vm),
        }
    }

    pub fn get_module(&self, name: &str) -> Option<&LibraryModule> {
        self.modules.iter().find(|m| m.name == name)
    }
}

/// Every standard library this runtime ships, in the order real Lua loads
/// them (basic functions land straight in `_G`; everything else gets its own
/// table). `require`/`package.loaded` is out of scope — these globals are
/// simply present from the moment [`LuaVM::new`] returns.
pub fn create_standard_registry() -> LibraryRegistry {
    let mut registry = LibraryRegistry::new();
    registry.register(crate::stdlib::basic::module());
    registry.register(crate::stdlib::string::module());
    registry.register(crate::stdlib::table::module());
    registry.register(crate::stdlib::math::module());
    registry.register(crate::stdlib::os::module());
    registry.register(crate::stdlib::io::module());
    registry.register(crate::stdlib::coroutine::module());
    registry.register(crate::stdlib::debug::module());
    registry
}
