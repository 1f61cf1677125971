//! IR value types.

use std::fmt;

/// Handle to a struct type registered in a [`crate::Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructId(pub(crate) u32);

impl StructId {
    /// Raw index into the context's struct table
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Type of an IR value or memory location.
///
/// Struct types are only used for sizing and address computation; values are
/// always scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    /// Boolean
    I1,
    /// 8-bit integer
    I8,
    /// 16-bit integer
    I16,
    /// 32-bit integer
    I32,
    /// 64-bit integer
    I64,
    /// Single precision float
    F32,
    /// Double precision float
    F64,
    /// Opaque pointer
    Ptr,
    /// Named aggregate from the context
    Struct(StructId),
}

impl Type {
    /// True for integer types, including `i1`
    pub fn is_int(self) -> bool {
        matches!(self, Type::I1 | Type::I8 | Type::I16 | Type::I32 | Type::I64)
    }

    /// True for floating point types
    pub fn is_float(self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    /// True for types that can be held in a register
    pub fn is_scalar(self) -> bool {
        !matches!(self, Type::Struct(_))
    }

    /// Bit width of an integer type
    pub fn int_bits(self) -> Option<u32> {
        match self {
            Type::I1 => Some(1),
            Type::I8 => Some(8),
            Type::I16 => Some(16),
            Type::I32 => Some(32),
            Type::I64 => Some(64),
            _ => None,
        }
    }

    /// Wrap a constant to this integer type's width, sign-extended to `i64`
    pub fn wrap_int(self, value: i64) -> i64 {
        match self {
            Type::I1 => value & 1,
            Type::I8 => value as i8 as i64,
            Type::I16 => value as i16 as i64,
            Type::I32 => value as i32 as i64,
            _ => value,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::I1 => write!(f, "i1"),
            Type::I8 => write!(f, "i8"),
            Type::I16 => write!(f, "i16"),
            Type::I32 => write!(f, "i32"),
            Type::I64 => write!(f, "i64"),
            Type::F32 => write!(f, "f32"),
            Type::F64 => write!(f, "f64"),
            Type::Ptr => write!(f, "ptr"),
            Type::Struct(id) => write!(f, "%struct.{}", id.0),
        }
    }
}

/// Function signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Signature {
    /// Parameter types
    pub params: Vec<Type>,
    /// Return type, `None` for void
    pub ret: Option<Type>,
}

impl Signature {
    /// Create a signature
    pub fn new(params: Vec<Type>, ret: Option<Type>) -> Self {
        Self { params, ret }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, ty) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", ty)?;
        }
        write!(f, ")")?;
        match self.ret {
            Some(ty) => write!(f, " -> {}", ty),
            None => write!(f, " -> void"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_int() {
        assert_eq!(Type::I8.wrap_int(200), -56);
        assert_eq!(Type::I32.wrap_int(1 << 32), 0);
        assert_eq!(Type::I1.wrap_int(3), 1);
        assert_eq!(Type::I64.wrap_int(-7), -7);
    }

    #[test]
    fn test_signature_display() {
        let sig = Signature::new(vec![Type::I32, Type::Ptr], Some(Type::I1));
        assert_eq!(sig.to_string(), "(i32, ptr) -> i1");
        assert_eq!(Signature::default().to_string(), "() -> void");
    }
}
