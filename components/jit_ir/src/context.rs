//! Shared type and metadata context.
//!
//! A [`Context`] is a cheap, reference-counted handle. Every compilation unit
//! submitted to one engine must be built against the same context instance;
//! identity is compared by pointer, not by content.

use std::collections::HashMap;
use std::sync::Arc;

use core_types::DataLayout;
use parking_lot::RwLock;

use crate::types::{StructId, Type};

/// An aggregate type definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructType {
    /// Type name
    pub name: String,
    /// Field types in declaration order
    pub fields: Vec<Type>,
    /// Packed structs have no padding between fields
    pub packed: bool,
}

#[derive(Debug, Default)]
struct ContextInner {
    structs: RwLock<Vec<StructType>>,
    metadata: RwLock<HashMap<String, String>>,
}

/// Shared type/metadata context.
///
/// # Examples
///
/// ```
/// use jit_ir::{Context, Type};
/// use core_types::DataLayout;
///
/// let ctx = Context::new();
/// let point = ctx.create_struct("point", vec![Type::I32, Type::I32], true);
/// let layout = DataLayout::default();
/// assert_eq!(ctx.size_of(Type::Struct(point), &layout), 8);
/// assert!(ctx.same_as(&ctx.clone()));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// True if both handles refer to the same context instance
    pub fn same_as(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register a struct type
    pub fn create_struct(&self, name: impl Into<String>, fields: Vec<Type>, packed: bool) -> StructId {
        let mut structs = self.inner.structs.write();
        let id = StructId(structs.len() as u32);
        structs.push(StructType {
            name: name.into(),
            fields,
            packed,
        });
        id
    }

    /// Look up a struct definition
    pub fn struct_type(&self, id: StructId) -> Option<StructType> {
        self.inner.structs.read().get(id.0 as usize).cloned()
    }

    /// Find a struct by name
    pub fn find_struct(&self, name: &str) -> Option<StructId> {
        self.inner
            .structs
            .read()
            .iter()
            .position(|s| s.name == name)
            .map(|i| StructId(i as u32))
    }

    /// Attach a named metadata string
    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.metadata.write().insert(key.into(), value.into());
    }

    /// Read a named metadata string
    pub fn metadata(&self, key: &str) -> Option<String> {
        self.inner.metadata.read().get(key).cloned()
    }

    /// Size of a type in bytes under `layout`
    pub fn size_of(&self, ty: Type, layout: &DataLayout) -> u64 {
        match ty {
            Type::I1 | Type::I8 => 1,
            Type::I16 => 2,
            Type::I32 | Type::F32 => 4,
            Type::I64 | Type::F64 => 8,
            Type::Ptr => layout.pointer_bytes() as u64,
            Type::Struct(id) => match self.struct_type(id) {
                Some(def) => {
                    let (_, end) = self.field_offsets(&def, layout);
                    align_to(end, self.struct_align(&def, layout))
                }
                None => 0,
            },
        }
    }

    /// ABI alignment of a type in bytes under `layout`
    pub fn align_of(&self, ty: Type, layout: &DataLayout) -> u64 {
        match ty {
            Type::I1 | Type::I8 => 1,
            Type::I16 => 2,
            Type::I32 | Type::F32 => 4,
            Type::I64 => layout.i64_align().max(1) as u64,
            Type::F64 => 8,
            Type::Ptr => layout.pointer_align().max(1) as u64,
            Type::Struct(id) => match self.struct_type(id) {
                Some(def) => self.struct_align(&def, layout),
                None => 1,
            },
        }
    }

    /// Byte offset of field `index` within struct `id`
    pub fn field_offset(&self, id: StructId, index: u32, layout: &DataLayout) -> Option<u64> {
        let def = self.struct_type(id)?;
        let (offsets, _) = self.field_offsets(&def, layout);
        offsets.get(index as usize).copied()
    }

    fn struct_align(&self, def: &StructType, layout: &DataLayout) -> u64 {
        if def.packed {
            return 1;
        }
        def.fields
            .iter()
            .map(|f| self.align_of(*f, layout))
            .max()
            .unwrap_or(1)
    }

    fn field_offsets(&self, def: &StructType, layout: &DataLayout) -> (Vec<u64>, u64) {
        let mut offsets = Vec::with_capacity(def.fields.len());
        let mut offset = 0u64;
        for field in &def.fields {
            if !def.packed {
                offset = align_to(offset, self.align_of(*field, layout));
            }
            offsets.push(offset);
            offset += self.size_of(*field, layout);
        }
        (offsets, offset)
    }
}

/// Round `value` up to a multiple of `align`
pub fn align_to(value: u64, align: u64) -> u64 {
    if align <= 1 {
        return value;
    }
    value.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_contexts() {
        let a = Context::new();
        let b = Context::new();
        assert!(!a.same_as(&b));
        assert!(a.same_as(&a.clone()));
    }

    #[test]
    fn test_unpacked_struct_padding() {
        let ctx = Context::new();
        let layout = DataLayout::default();
        let id = ctx.create_struct("s", vec![Type::I8, Type::I32, Type::I16], false);
        assert_eq!(ctx.field_offset(id, 1, &layout), Some(4));
        assert_eq!(ctx.field_offset(id, 2, &layout), Some(8));
        assert_eq!(ctx.size_of(Type::Struct(id), &layout), 12);
        assert_eq!(ctx.align_of(Type::Struct(id), &layout), 4);
    }

    #[test]
    fn test_packed_struct() {
        let ctx = Context::new();
        let layout = DataLayout::default();
        let id = ctx.create_struct("p", vec![Type::I8, Type::I32], true);
        assert_eq!(ctx.field_offset(id, 1, &layout), Some(1));
        assert_eq!(ctx.size_of(Type::Struct(id), &layout), 5);
    }

    #[test]
    fn test_metadata() {
        let ctx = Context::new();
        ctx.set_metadata("producer", "sample");
        assert_eq!(ctx.metadata("producer").as_deref(), Some("sample"));
        assert_eq!(ctx.metadata("missing"), None);
        assert_eq!(ctx.find_struct("nothing"), None);
    }
}
