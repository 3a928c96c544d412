//! glint-core: SPIR-V code generation for a GLSL-family shading language.
//!
//! The crate consumes a validated, type-annotated AST ([`ast::Module`]) and
//! emits a SPIR-V binary module suitable for Vulkan consumption. Parsing and
//! semantic analysis are the producer's job; this crate owns the hard part
//! of translation: lazy access chains over memory objects and values,
//! constructor synthesis, operator selection by operand type, and
//! structured control flow with explicit merge blocks.
//!
//! ```no_run
//! use glint_core::{ast, emit, CompileOptions};
//!
//! fn compile(shader: &ast::Module) -> glint_core::Result<Vec<u32>> {
//!     let options = CompileOptions::new();
//!     emit(shader, &options)
//! }
//! ```

pub mod ast;
pub mod diags;
pub mod error;
pub mod options;
pub mod spirv;

pub use error::{CompilerError, Result};
pub use options::{CompileOptions, TargetEnv};
pub use spirv::lowering::emit;
