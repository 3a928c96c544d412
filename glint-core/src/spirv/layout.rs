//! std140/std430 size and alignment math for buffer-backed blocks.
//!
//! Only types that can legally appear inside a uniform or storage block are
//! accepted; asking for the layout of an opaque or void type is a programmer
//! error.

use crate::ast::{BlockLayout, StructDef, Type};
use crate::diags::format_type;

fn round_up(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) / alignment * alignment
}

/// Base alignment of a type under the given layout.
pub fn align_of(ty: &Type, layout: BlockLayout) -> u32 {
    match ty {
        Type::Scalar(_) => 4,
        Type::Vector(_, 2) => 8,
        Type::Vector(_, _) => 16,
        Type::Matrix { rows, .. } => matrix_stride(*rows, layout),
        Type::Array(elem, _) | Type::RuntimeArray(elem) => {
            let elem_align = align_of(elem, layout);
            if layout == BlockLayout::Std140 {
                round_up(elem_align, 16)
            } else {
                elem_align
            }
        }
        Type::Struct(def) => {
            let member_align = def
                .fields
                .iter()
                .map(|f| align_of(&f.ty, layout))
                .max()
                .unwrap_or(4);
            if layout == BlockLayout::Std140 {
                round_up(member_align, 16)
            } else {
                member_align
            }
        }
        _ => panic!("BUG: {} has no buffer layout", format_type(ty)),
    }
}

/// Byte size of a type under the given layout. Runtime arrays have no size;
/// they may only appear as the last member of a block.
pub fn size_of(ty: &Type, layout: BlockLayout) -> u32 {
    match ty {
        Type::Scalar(_) => 4,
        Type::Vector(_, n) => 4 * *n as u32,
        Type::Matrix { cols, rows } => *cols as u32 * matrix_stride(*rows, layout),
        Type::Array(elem, len) => array_stride(elem, layout) * len,
        Type::Struct(def) => {
            let (_, size) = member_offsets(def, layout);
            size
        }
        _ => panic!("BUG: {} has no buffer size", format_type(ty)),
    }
}

/// Stride between consecutive elements of an array member.
pub fn array_stride(elem: &Type, layout: BlockLayout) -> u32 {
    let stride = round_up(size_of(elem, layout), align_of(elem, layout));
    if layout == BlockLayout::Std140 {
        round_up(stride, 16)
    } else {
        stride
    }
}

/// Stride between consecutive columns of a matrix member. std140 pads every
/// column to a vec4 slot.
pub fn matrix_stride(rows: u8, layout: BlockLayout) -> u32 {
    let column = if rows == 2 { 8 } else { 16 };
    if layout == BlockLayout::Std140 {
        round_up(column, 16)
    } else {
        column
    }
}

/// The matrix stride to decorate a struct member with, looking through
/// arrays: `mat4 m` and `mat4 ms[3]` both carry a MatrixStride decoration.
pub fn matrix_stride_within(ty: &Type, layout: BlockLayout) -> Option<u32> {
    match ty {
        Type::Matrix { rows, .. } => Some(matrix_stride(*rows, layout)),
        Type::Array(elem, _) | Type::RuntimeArray(elem) => matrix_stride_within(elem, layout),
        _ => None,
    }
}

/// Byte offsets of each member of a struct, plus the struct's padded size.
/// A runtime array may only be the final member.
pub fn member_offsets(def: &StructDef, layout: BlockLayout) -> (Vec<u32>, u32) {
    let mut offsets = Vec::with_capacity(def.fields.len());
    let mut cursor = 0u32;
    let mut struct_align = 4u32;
    for (index, field) in def.fields.iter().enumerate() {
        let align = align_of(&field.ty, layout);
        struct_align = struct_align.max(align);
        cursor = round_up(cursor, align);
        offsets.push(cursor);
        if let Type::RuntimeArray(_) = field.ty {
            assert!(
                index + 1 == def.fields.len(),
                "BUG: runtime array must be the last member of {}",
                def.name
            );
            return (offsets, cursor);
        }
        cursor += size_of(&field.ty, layout);
    }
    if layout == BlockLayout::Std140 {
        struct_align = round_up(struct_align, 16);
    }
    (offsets, round_up(cursor, struct_align))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ScalarKind, StructField};
    use std::rc::Rc;

    fn float() -> Type {
        Type::Scalar(ScalarKind::Float)
    }

    fn vec(n: u8) -> Type {
        Type::Vector(ScalarKind::Float, n)
    }

    #[test]
    fn vector_alignments() {
        assert_eq!(align_of(&vec(2), BlockLayout::Std430), 8);
        assert_eq!(align_of(&vec(3), BlockLayout::Std430), 16);
        assert_eq!(align_of(&vec(4), BlockLayout::Std140), 16);
    }

    #[test]
    fn std140_rounds_array_strides_to_vec4() {
        assert_eq!(array_stride(&float(), BlockLayout::Std140), 16);
        assert_eq!(array_stride(&float(), BlockLayout::Std430), 4);
        assert_eq!(array_stride(&vec(4), BlockLayout::Std140), 16);
    }

    #[test]
    fn matrix_strides() {
        assert_eq!(matrix_stride(2, BlockLayout::Std430), 8);
        assert_eq!(matrix_stride(2, BlockLayout::Std140), 16);
        assert_eq!(matrix_stride(4, BlockLayout::Std430), 16);
    }

    #[test]
    fn struct_member_offsets() {
        let def = Rc::new(StructDef {
            name: "Params".to_string(),
            fields: vec![
                StructField { name: "a".to_string(), ty: float() },
                StructField { name: "b".to_string(), ty: vec(3) },
                StructField { name: "c".to_string(), ty: float() },
            ],
        });
        let (offsets, _) = member_offsets(&def, BlockLayout::Std140);
        // float at 0, vec3 aligned to 16, trailing float packs after the vec3.
        assert_eq!(offsets, vec![0, 16, 28]);
    }

    #[test]
    fn mat4_size() {
        let m = Type::Matrix { cols: 4, rows: 4 };
        assert_eq!(size_of(&m, BlockLayout::Std140), 64);
        assert_eq!(matrix_stride_within(&m, BlockLayout::Std140), Some(16));
    }
}
