//! Constructor synthesis.
//!
//! The source language's polymorphic constructor syntax collapses to a small
//! set of SPIR-V shapes: scalar casts, composite construction from
//! per-component extraction, diagonal matrices, submatrix extraction with
//! row truncation, and identity overlay for growing matrices.

use rspirv::spirv::Word;

use crate::ast::{BlockLayout, ScalarKind, Type};
use crate::diags::format_type;
use crate::error::Result;
use crate::spirv::ModuleBuilder;

/// One already-loaded constructor argument.
pub(crate) struct ConstructorArg {
    pub ty: Type,
    pub id: Word,
}

/// Build a value of `target` out of `args`. Arguments are rvalue ids; the
/// result is a single id of the target type.
pub(crate) fn construct(
    mb: &mut ModuleBuilder,
    target: &Type,
    target_type_id: Word,
    args: &[ConstructorArg],
) -> Result<Word> {
    assert!(!args.is_empty(), "BUG: constructor with no arguments");

    match target {
        Type::Scalar(kind) => {
            let mut components = extract_components(mb, args, 1, *kind)?;
            Ok(components.remove(0))
        }
        Type::Array(..) | Type::Struct(..) => {
            // Element-per-parameter aggregate construction.
            let ids: Vec<Word> = args.iter().map(|a| a.id).collect();
            Ok(mb.builder.composite_construct(target_type_id, None, ids)?)
        }
        Type::Vector(kind, size) => {
            if args.len() == 1 && args[0].ty.is_scalar() {
                vector_from_scalar(mb, *kind, *size, target_type_id, &args[0])
            } else {
                let components = extract_components(mb, args, *size as usize, *kind)?;
                Ok(mb.builder.composite_construct(target_type_id, None, components)?)
            }
        }
        Type::Matrix { cols, rows } => {
            if args.len() == 1 {
                if args[0].ty.is_scalar() {
                    return matrix_from_scalar(mb, *cols, *rows, target_type_id, &args[0]);
                }
                if args[0].ty.is_matrix() {
                    return matrix_from_matrix(mb, *cols, *rows, target_type_id, &args[0]);
                }
            }
            matrix_from_components(mb, *cols, *rows, target_type_id, args)
        }
        _ => panic!("BUG: constructor for non-constructible type {}", format_type(target)),
    }
}

/// `vecN(f)` replicates the (cast) scalar N times.
fn vector_from_scalar(
    mb: &mut ModuleBuilder,
    kind: ScalarKind,
    size: u8,
    target_type_id: Word,
    arg: &ConstructorArg,
) -> Result<Word> {
    let source_kind = arg
        .ty
        .scalar_kind()
        .expect("BUG: non-scalar argument to scalar splat");
    let scalar = cast_scalar(mb, arg.id, source_kind, kind)?;
    let replicated = vec![scalar; size as usize];
    Ok(mb.builder.composite_construct(target_type_id, None, replicated)?)
}

/// Broadcast an already-typed scalar into a vector of `size` copies. Used by
/// the expression translator for scalar-vector elementwise operands.
pub(crate) fn splat(
    mb: &mut ModuleBuilder,
    vector_type_id: Word,
    scalar: Word,
    size: u8,
) -> Result<Word> {
    let replicated = vec![scalar; size as usize];
    Ok(mb.builder.composite_construct(vector_type_id, None, replicated)?)
}

/// `matNxM(f)` builds N columns with the scalar on the diagonal and zero
/// elsewhere.
fn matrix_from_scalar(
    mb: &mut ModuleBuilder,
    cols: u8,
    rows: u8,
    target_type_id: Word,
    arg: &ConstructorArg,
) -> Result<Word> {
    let source_kind = arg
        .ty
        .scalar_kind()
        .expect("BUG: non-scalar argument to diagonal matrix constructor");
    let scalar = cast_scalar(mb, arg.id, source_kind, ScalarKind::Float)?;
    let zero = mb.const_f32(0.0);

    let column_type =
        mb.type_id(&Type::Vector(ScalarKind::Float, rows), BlockLayout::Unspecified);

    let mut columns = Vec::with_capacity(cols as usize);
    for col in 0..cols {
        let components: Vec<Word> = (0..rows)
            .map(|row| if row == col { scalar } else { zero })
            .collect();
        columns.push(mb.builder.composite_construct(column_type, None, components)?);
    }
    Ok(mb.builder.composite_construct(target_type_id, None, columns)?)
}

/// `matNxM(a, b, ...)` from a flat list of scalars/vectors: extract N*M
/// components in column-major order, group them into columns, compose.
fn matrix_from_components(
    mb: &mut ModuleBuilder,
    cols: u8,
    rows: u8,
    target_type_id: Word,
    args: &[ConstructorArg],
) -> Result<Word> {
    let components =
        extract_components(mb, args, cols as usize * rows as usize, ScalarKind::Float)?;
    let column_type =
        mb.type_id(&Type::Vector(ScalarKind::Float, rows), BlockLayout::Unspecified);

    let mut columns = Vec::with_capacity(cols as usize);
    for col in 0..cols {
        let start = col as usize * rows as usize;
        let column = components[start..start + rows as usize].to_vec();
        columns.push(mb.builder.composite_construct(column_type, None, column)?);
    }
    Ok(mb.builder.composite_construct(target_type_id, None, columns)?)
}

/// `matNxM(m)`: take the top-left submatrix when the argument is at least as
/// large, otherwise superimpose the argument onto an identity matrix.
fn matrix_from_matrix(
    mb: &mut ModuleBuilder,
    cols: u8,
    rows: u8,
    target_type_id: Word,
    arg: &ConstructorArg,
) -> Result<Word> {
    let (src_cols, src_rows) = match arg.ty {
        Type::Matrix { cols, rows } => (cols, rows),
        _ => panic!("BUG: matrix constructor argument is {}", format_type(&arg.ty)),
    };

    let column_type =
        mb.type_id(&Type::Vector(ScalarKind::Float, rows), BlockLayout::Unspecified);
    let mut columns = Vec::with_capacity(cols as usize);

    if src_cols >= cols && src_rows >= rows {
        // Extract the first N columns, truncating rows with a shuffle when
        // the source columns are longer.
        let src_column_type =
            mb.type_id(&Type::Vector(ScalarKind::Float, src_rows), BlockLayout::Unspecified);
        let truncate: Vec<u32> = (0..rows as u32).collect();

        for col in 0..cols {
            let source_column = mb.builder.composite_extract(
                src_column_type,
                None,
                arg.id,
                [col as u32],
            )?;
            let column = if src_rows > rows {
                mb.builder.vector_shuffle(
                    column_type,
                    None,
                    source_column,
                    source_column,
                    truncate.clone(),
                )?
            } else {
                source_column
            };
            columns.push(column);
        }
    } else {
        // Identity overlaid with the components the argument provides.
        let zero = mb.const_f32(0.0);
        let one = mb.const_f32(1.0);
        let f32_type = mb.f32_type;

        for col in 0..cols {
            let mut components = Vec::with_capacity(rows as usize);
            for row in 0..rows {
                let component = if col < src_cols && row < src_rows {
                    mb.builder.composite_extract(
                        f32_type,
                        None,
                        arg.id,
                        [col as u32, row as u32],
                    )?
                } else if col == row {
                    one
                } else {
                    zero
                };
                components.push(component);
            }
            columns.push(mb.builder.composite_construct(column_type, None, components)?);
        }
    }

    Ok(mb.builder.composite_construct(target_type_id, None, columns)?)
}

/// Flatten the argument list into exactly `count` components of `target
/// kind`, in source order. Scalars pass through, vectors and matrices are
/// taken apart component by component (column-major for matrices); excess
/// components of the final argument are dropped.
fn extract_components(
    mb: &mut ModuleBuilder,
    args: &[ConstructorArg],
    count: usize,
    target_kind: ScalarKind,
) -> Result<Vec<Word>> {
    let mut components = Vec::with_capacity(count);

    for arg in args {
        if components.len() == count {
            break;
        }
        match &arg.ty {
            Type::Scalar(kind) => {
                components.push(cast_scalar(mb, arg.id, *kind, target_kind)?);
            }
            Type::Vector(kind, size) => {
                let component_type =
                    mb.type_id(&Type::Scalar(*kind), BlockLayout::Unspecified);
                for index in 0..*size {
                    if components.len() == count {
                        break;
                    }
                    let extracted = mb.builder.composite_extract(
                        component_type,
                        None,
                        arg.id,
                        [index as u32],
                    )?;
                    components.push(cast_scalar(mb, extracted, *kind, target_kind)?);
                }
            }
            Type::Matrix { cols, rows } => {
                let f32_type = mb.f32_type;
                'outer: for col in 0..*cols {
                    for row in 0..*rows {
                        if components.len() == count {
                            break 'outer;
                        }
                        let extracted = mb.builder.composite_extract(
                            f32_type,
                            None,
                            arg.id,
                            [col as u32, row as u32],
                        )?;
                        components.push(cast_scalar(mb, extracted, ScalarKind::Float, target_kind)?);
                    }
                }
            }
            other => panic!(
                "BUG: {} cannot supply constructor components",
                format_type(other)
            ),
        }
    }

    assert!(
        components.len() == count,
        "BUG: constructor arguments supply {} of {} components",
        components.len(),
        count
    );
    Ok(components)
}

/// Convert a scalar between basic types with the dedicated conversion
/// instruction. Same-width int<->uint reinterpretation has no conversion
/// opcode and is the sole `OpBitcast` use.
pub(crate) fn cast_scalar(
    mb: &mut ModuleBuilder,
    value: Word,
    from: ScalarKind,
    to: ScalarKind,
) -> Result<Word> {
    use ScalarKind::*;

    if from == to {
        return Ok(value);
    }

    let target_type = mb.type_id(&Type::Scalar(to), BlockLayout::Unspecified);
    let id = match (from, to) {
        (Float, Int) => mb.builder.convert_f_to_s(target_type, None, value)?,
        (Float, UInt) => mb.builder.convert_f_to_u(target_type, None, value)?,
        (Int, Float) => mb.builder.convert_s_to_f(target_type, None, value)?,
        (UInt, Float) => mb.builder.convert_u_to_f(target_type, None, value)?,
        (Int, UInt) | (UInt, Int) => mb.builder.bitcast(target_type, None, value)?,
        (Bool, Float) => {
            let one = mb.const_f32(1.0);
            let zero = mb.const_f32(0.0);
            mb.builder.select(target_type, None, value, one, zero)?
        }
        (Bool, Int) => {
            let one = mb.const_i32(1);
            let zero = mb.const_i32(0);
            mb.builder.select(target_type, None, value, one, zero)?
        }
        (Bool, UInt) => {
            let one = mb.const_u32(1);
            let zero = mb.const_u32(0);
            mb.builder.select(target_type, None, value, one, zero)?
        }
        (Float, Bool) => {
            let zero = mb.const_f32(0.0);
            mb.builder.f_unord_not_equal(target_type, None, value, zero)?
        }
        (Int, Bool) => {
            let zero = mb.const_i32(0);
            mb.builder.i_not_equal(target_type, None, value, zero)?
        }
        (UInt, Bool) => {
            let zero = mb.const_u32(0);
            mb.builder.i_not_equal(target_type, None, value, zero)?
        }
        _ => unreachable!(),
    };
    Ok(id)
}
