//! Compact formatting of semantic types for diagnostics.

use crate::ast::{ScalarKind, Type};

/// Pretty-print a type the way the source language spells it, e.g.
/// `vec3`, `mat3x4`, `float[8]`, `uvec2`.
pub fn format_type(ty: &Type) -> String {
    match ty {
        Type::Void => "void".to_string(),
        Type::Scalar(k) => scalar_name(*k).to_string(),
        Type::Vector(k, n) => format!("{}vec{}", vector_prefix(*k), n),
        Type::Matrix { cols, rows } => {
            if cols == rows {
                format!("mat{}", cols)
            } else {
                format!("mat{}x{}", cols, rows)
            }
        }
        Type::Array(elem, len) => format!("{}[{}]", format_type(elem), len),
        Type::RuntimeArray(elem) => format!("{}[]", format_type(elem)),
        Type::Struct(def) => def.name.clone(),
        Type::Sampler { dim, shadow } => {
            format!("sampler{:?}{}", dim, if *shadow { "Shadow" } else { "" })
        }
        Type::Image { dim, .. } => format!("image{:?}", dim),
    }
}

fn scalar_name(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Bool => "bool",
        ScalarKind::Int => "int",
        ScalarKind::UInt => "uint",
        ScalarKind::Float => "float",
    }
}

fn vector_prefix(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Bool => "b",
        ScalarKind::Int => "i",
        ScalarKind::UInt => "u",
        ScalarKind::Float => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_and_vector_names() {
        assert_eq!(format_type(&Type::Scalar(ScalarKind::Float)), "float");
        assert_eq!(format_type(&Type::Vector(ScalarKind::Float, 3)), "vec3");
        assert_eq!(format_type(&Type::Vector(ScalarKind::UInt, 2)), "uvec2");
    }

    #[test]
    fn matrix_and_array_names() {
        assert_eq!(format_type(&Type::Matrix { cols: 3, rows: 3 }), "mat3");
        assert_eq!(format_type(&Type::Matrix { cols: 2, rows: 4 }), "mat2x4");
        assert_eq!(
            format_type(&Type::Array(Box::new(Type::Scalar(ScalarKind::Int)), 8)),
            "int[8]"
        );
    }
}
