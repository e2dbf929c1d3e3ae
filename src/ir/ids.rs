//! Dense ids for program entities.

use std::fmt;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Creates an id from a raw index.
            #[must_use]
            pub const fn new(index: usize) -> Self {
                Self(index as u32)
            }

            /// Raw index into the owning table.
            #[must_use]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

entity_id!(
    /// A function of the program.
    FuncId,
    "fn"
);
entity_id!(
    /// A basic block within one function. Block 0 is the entry.
    BlockId,
    "bb"
);
entity_id!(
    /// An instruction within one function. Doubles as the SSA value it defines.
    InstId,
    "%"
);
entity_id!(
    /// A global data object of the program.
    GlobalId,
    "@g"
);
entity_id!(
    /// An external symbol declaration.
    ExternId,
    "@ext"
);
entity_id!(
    /// A stack slot of one function.
    SlotId,
    "slot"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_format_with_prefix() {
        assert_eq!(format!("{}", InstId::new(4)), "%4");
        assert_eq!(format!("{:?}", BlockId::new(0)), "bb0");
        assert_eq!(FuncId::new(9).index(), 9);
    }
}
