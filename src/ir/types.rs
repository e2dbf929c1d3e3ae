//! Value types of the IR.

use strum::Display;

/// The static type of an SSA value or memory access.
///
/// Pointers are 64 bits wide. Floating point values are IEEE754 doubles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Type {
    /// Boolean, produced by comparisons
    I1,
    /// 8-bit integer
    I8,
    /// 16-bit integer
    I16,
    /// 32-bit integer
    I32,
    /// 64-bit integer
    I64,
    /// 64-bit IEEE754 float
    F64,
    /// 64-bit pointer
    Ptr,
}

impl Type {
    /// Width of the type in bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Type::I1 => 1,
            Type::I8 => 8,
            Type::I16 => 16,
            Type::I32 => 32,
            Type::I64 | Type::F64 | Type::Ptr => 64,
        }
    }

    /// Size of the type in memory, in bytes. Booleans occupy one byte.
    #[must_use]
    pub const fn size(self) -> u64 {
        match self {
            Type::I1 | Type::I8 => 1,
            Type::I16 => 2,
            Type::I32 => 4,
            Type::I64 | Type::F64 | Type::Ptr => 8,
        }
    }

    /// Returns `true` for the integer types, including `I1`.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(self, Type::I1 | Type::I8 | Type::I16 | Type::I32 | Type::I64)
    }

    /// Returns `true` for [`Type::F64`].
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Type::F64)
    }

    /// Returns `true` for [`Type::Ptr`].
    #[must_use]
    pub const fn is_pointer(self) -> bool {
        matches!(self, Type::Ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_sizes() {
        assert_eq!(Type::I1.bits(), 1);
        assert_eq!(Type::I1.size(), 1);
        assert_eq!(Type::I32.size(), 4);
        assert_eq!(Type::Ptr.bits(), 64);
        assert!(Type::I16.is_integer());
        assert!(!Type::Ptr.is_integer());
        assert_eq!(Type::F64.to_string(), "f64");
    }
}
