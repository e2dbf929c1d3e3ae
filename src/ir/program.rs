//! The whole program: functions, global data and external symbols.

use crate::{
    ir::{ExternId, FuncId, Function, GlobalId, Type},
    Error, Result,
};

/// Initial value of one global data field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InitValue {
    /// Integer of the given width
    Int {
        /// Value, interpreted at `ty`
        value: i64,
        /// Field type
        ty: Type,
    },
    /// 64-bit float
    Float(f64),
    /// Address of another global plus an offset
    Global {
        /// Referenced global
        global: GlobalId,
        /// Byte offset into it
        offset: i64,
    },
    /// Address of an external symbol plus an offset
    Extern {
        /// Referenced symbol
        symbol: ExternId,
        /// Byte offset into it
        offset: i64,
    },
    /// Address of a function
    Func(FuncId),
}

impl InitValue {
    /// Width in bytes of the initialized field.
    #[must_use]
    pub fn size(&self) -> u64 {
        match self {
            InitValue::Int { ty, .. } => ty.size(),
            InitValue::Float(_)
            | InitValue::Global { .. }
            | InitValue::Extern { .. }
            | InitValue::Func(_) => 8,
        }
    }
}

/// A global data object.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalData {
    /// Symbol name
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Alignment in bytes
    pub align: u32,
    /// Whether writes to the object are forbidden
    pub read_only: bool,
    /// Whether bytes not covered by `init` are zero; otherwise they are undefined
    pub zeroed: bool,
    /// Initialized fields as `(offset, value)`
    pub init: Vec<(u64, InitValue)>,
}

impl GlobalData {
    /// Creates a zero-initialized, writable global of `size` bytes aligned to 8.
    #[must_use]
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            align: 8,
            read_only: false,
            zeroed: true,
            init: Vec::new(),
        }
    }

    /// Marks the global as read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Marks uninitialized bytes as undefined instead of zero.
    #[must_use]
    pub fn uninitialized(mut self) -> Self {
        self.zeroed = false;
        self
    }

    /// Adds an initialized field.
    #[must_use]
    pub fn with_init(mut self, offset: u64, value: InitValue) -> Self {
        self.init.push((offset, value));
        self
    }
}

/// An external symbol: a function or datum defined outside the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternSymbol {
    /// Symbol name
    pub name: String,
}

/// A complete, verified program.
///
/// Built through [`crate::ir::ProgramBuilder`]; immutable afterwards and shared by reference
/// across every analysis thread.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub(crate) funcs: Vec<Function>,
    pub(crate) globals: Vec<GlobalData>,
    pub(crate) externs: Vec<ExternSymbol>,
}

impl Program {
    /// Returns a function by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownFunction`] if `id` is not a function of this program.
    pub fn func(&self, id: FuncId) -> Result<&Function> {
        self.funcs.get(id.index()).ok_or(Error::UnknownFunction(id))
    }

    /// Iterates over all functions.
    pub fn funcs(&self) -> impl Iterator<Item = &Function> + '_ {
        self.funcs.iter()
    }

    /// Number of functions.
    #[must_use]
    pub fn func_count(&self) -> usize {
        self.funcs.len()
    }

    /// Looks a function up by name.
    #[must_use]
    pub fn func_by_name(&self, name: &str) -> Option<FuncId> {
        self.funcs.iter().find(|f| f.name() == name).map(Function::id)
    }

    /// Returns a global by id.
    #[must_use]
    pub fn global(&self, id: GlobalId) -> Option<&GlobalData> {
        self.globals.get(id.index())
    }

    /// Number of globals.
    #[must_use]
    pub fn global_count(&self) -> usize {
        self.globals.len()
    }

    /// Returns an external symbol by id.
    #[must_use]
    pub fn extern_symbol(&self, id: ExternId) -> Option<&ExternSymbol> {
        self.externs.get(id.index())
    }

    /// Number of external symbols.
    #[must_use]
    pub fn extern_count(&self) -> usize {
        self.externs.len()
    }
}
