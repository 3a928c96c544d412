//! SPIR-V code generation backend.
//!
//! [`lowering`] walks the validated AST and drives the emission;
//! [`ModuleBuilder`] below wraps `rspirv::dr::Builder` with the policies the
//! walker relies on:
//!
//! - type and constant interning, keyed by `(semantic type, block layout)`
//!   so std140/std430-decorated aggregates never alias their undecorated
//!   shapes,
//! - hoisting of Function-class variables into a dedicated variables block
//!   at the top of each function,
//! - block begin/terminate discipline (inserting after a terminator is a
//!   programmer error),
//! - the structured-control-flow frame stack consulted by break/continue.

pub mod access_chain;
pub mod constructors;
pub mod layout;
pub mod lowering;


use std::collections::{HashMap, HashSet};

use rspirv::dr::{Builder, Operand};
use rspirv::spirv::{self, AddressingModel, Capability, MemoryModel, StorageClass, Word};

use crate::ast::{BlockLayout, ImageDim, ImageFormat, ScalarKind, Type};
use crate::error::Result;
use crate::options::CompileOptions;

/// An active structured construct. `continue_block` is set for loops only;
/// switches are break targets but not continue targets.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ControlFrame {
    pub merge_block: Word,
    pub continue_block: Option<Word>,
}

/// Wraps `rspirv::dr::Builder` with an ergonomic API that handles id and
/// type/constant caching, variable hoisting and block management.
pub(crate) struct ModuleBuilder {
    pub builder: Builder,

    version: (u8, u8),
    debug_info: bool,

    // Base type caching
    pub void_type: Word,
    pub bool_type: Word,
    pub i32_type: Word,
    pub u32_type: Word,
    pub f32_type: Word,

    // Type caches keyed by semantic shape
    type_cache: HashMap<(Type, BlockLayout), Word>,
    ptr_type_cache: HashMap<(StorageClass, Word), Word>,
    fn_type_cache: HashMap<(Word, Vec<Word>), Word>,
    block_decorated: HashSet<Word>,
    array_stride_emitted: HashMap<Word, u32>,

    // Constant caches
    int_const_cache: HashMap<i32, Word>,
    uint_const_cache: HashMap<u32, Word>,
    float_const_cache: HashMap<u32, Word>, // bits as u32
    bool_const_cache: HashMap<bool, Word>,
    composite_const_cache: HashMap<(Word, Vec<Word>), Word>,

    // Current function state
    current_block: Option<Word>,
    variables_block: Option<Word>,
    first_code_block: Option<Word>,

    // Structured control flow bookkeeping
    control_stack: Vec<ControlFrame>,

    // Shader interface accumulated as globals are declared
    interface: Vec<Word>,
}

impl ModuleBuilder {
    pub fn new(options: &CompileOptions) -> Self {
        let mut builder = Builder::new();
        let version = options.target_env.spirv_version();
        builder.set_version(version.0, version.1);
        builder.capability(Capability::Shader);
        builder.ext_inst_import("GLSL.std.450");
        builder.memory_model(AddressingModel::Logical, MemoryModel::GLSL450);

        let void_type = builder.type_void();
        let bool_type = builder.type_bool();
        let i32_type = builder.type_int(32, 1);
        let u32_type = builder.type_int(32, 0);
        let f32_type = builder.type_float(32);

        ModuleBuilder {
            builder,
            version,
            debug_info: options.debug_info,
            void_type,
            bool_type,
            i32_type,
            u32_type,
            f32_type,
            type_cache: HashMap::new(),
            ptr_type_cache: HashMap::new(),
            fn_type_cache: HashMap::new(),
            block_decorated: HashSet::new(),
            array_stride_emitted: HashMap::new(),
            int_const_cache: HashMap::new(),
            uint_const_cache: HashMap::new(),
            float_const_cache: HashMap::new(),
            bool_const_cache: HashMap::new(),
            composite_const_cache: HashMap::new(),
            current_block: None,
            variables_block: None,
            first_code_block: None,
            control_stack: Vec::new(),
            interface: Vec::new(),
        }
    }

    pub fn version_at_least(&self, major: u8, minor: u8) -> bool {
        self.version >= (major, minor)
    }

    pub fn fresh_id(&mut self) -> Word {
        self.builder.id()
    }

    // =========================================================================
    // Types
    // =========================================================================

    /// Intern the SPIR-V type for a semantic type. Identical `(shape,
    /// layout)` pairs return the same id. Structs requested with an explicit
    /// buffer layout are distinct types carrying Offset/MatrixStride member
    /// decorations; arrays carry an ArrayStride for their layout.
    pub fn type_id(&mut self, ty: &Type, layout: BlockLayout) -> Word {
        // Layout only affects aggregate shapes.
        let layout = match ty {
            Type::Array(..) | Type::RuntimeArray(..) | Type::Struct(..) => layout,
            _ => BlockLayout::Unspecified,
        };
        let key = (ty.clone(), layout);
        if let Some(&id) = self.type_cache.get(&key) {
            return id;
        }

        let id = match ty {
            Type::Void => self.void_type,
            Type::Scalar(kind) => self.scalar_type_id(*kind),
            Type::Vector(kind, n) => {
                let elem = self.scalar_type_id(*kind);
                self.builder.type_vector(elem, *n as u32)
            }
            Type::Matrix { cols, rows } => {
                let column = self.type_id(&Type::Vector(ScalarKind::Float, *rows), BlockLayout::Unspecified);
                self.builder.type_matrix(column, *cols as u32)
            }
            Type::Array(elem, len) => {
                let elem_id = self.type_id(elem, layout);
                let len_id = self.const_u32(*len);
                let array_id = self.builder.type_array(elem_id, len_id);
                if layout != BlockLayout::Unspecified {
                    let stride = layout::array_stride(elem, layout);
                    self.decorate_array_stride(array_id, stride);
                }
                array_id
            }
            Type::RuntimeArray(elem) => {
                let elem_id = self.type_id(elem, layout);
                let array_id = self.builder.type_runtime_array(elem_id);
                if layout != BlockLayout::Unspecified {
                    let stride = layout::array_stride(elem, layout);
                    self.decorate_array_stride(array_id, stride);
                }
                array_id
            }
            Type::Struct(def) => {
                let field_ids: Vec<Word> =
                    def.fields.iter().map(|f| self.type_id(&f.ty, layout)).collect();
                // OpTypeStruct is never deduplicated, so each (def, layout)
                // pair gets its own id and can carry its own decorations.
                let struct_id = self.builder.type_struct(field_ids);
                if layout != BlockLayout::Unspecified {
                    let (offsets, _) = layout::member_offsets(def, layout);
                    for (index, field) in def.fields.iter().enumerate() {
                        self.builder.member_decorate(
                            struct_id,
                            index as u32,
                            spirv::Decoration::Offset,
                            [Operand::LiteralBit32(offsets[index])],
                        );
                        if let Some(stride) = layout::matrix_stride_within(&field.ty, layout) {
                            self.builder.member_decorate(
                                struct_id,
                                index as u32,
                                spirv::Decoration::ColMajor,
                                [],
                            );
                            self.builder.member_decorate(
                                struct_id,
                                index as u32,
                                spirv::Decoration::MatrixStride,
                                [Operand::LiteralBit32(stride)],
                            );
                        }
                    }
                }
                if self.debug_info {
                    self.builder.name(struct_id, def.name.clone());
                    for (index, field) in def.fields.iter().enumerate() {
                        self.builder.member_name(struct_id, index as u32, field.name.clone());
                    }
                }
                struct_id
            }
            Type::Sampler { dim, shadow } => {
                let sampled = self.f32_type;
                let image = self.builder.type_image(
                    sampled,
                    image_dim(*dim),
                    if *shadow { 1 } else { 0 },
                    0,
                    0,
                    1,
                    spirv::ImageFormat::Unknown,
                    None,
                );
                self.builder.type_sampled_image(image)
            }
            Type::Image { dim, format } => {
                let sampled = match format {
                    ImageFormat::R32ui => self.u32_type,
                    ImageFormat::R32i => self.i32_type,
                    _ => self.f32_type,
                };
                self.builder.type_image(
                    sampled,
                    image_dim(*dim),
                    0,
                    0,
                    0,
                    2,
                    image_format(*format),
                    None,
                )
            }
        };

        self.type_cache.insert(key, id);
        id
    }

    fn scalar_type_id(&mut self, kind: ScalarKind) -> Word {
        match kind {
            ScalarKind::Bool => self.bool_type,
            ScalarKind::Int => self.i32_type,
            ScalarKind::UInt => self.u32_type,
            ScalarKind::Float => self.f32_type,
        }
    }

    /// Get or create a pointer type.
    pub fn pointer_type(&mut self, storage_class: StorageClass, pointee: Word) -> Word {
        let key = (storage_class, pointee);
        if let Some(&id) = self.ptr_type_cache.get(&key) {
            return id;
        }
        let id = self.builder.type_pointer(None, storage_class, pointee);
        self.ptr_type_cache.insert(key, id);
        id
    }

    pub fn function_type(&mut self, return_type: Word, param_types: Vec<Word>) -> Word {
        let key = (return_type, param_types.clone());
        if let Some(&id) = self.fn_type_cache.get(&key) {
            return id;
        }
        let id = self.builder.type_function(return_type, param_types);
        self.fn_type_cache.insert(key, id);
        id
    }

    // =========================================================================
    // Constants
    // =========================================================================

    pub fn const_i32(&mut self, value: i32) -> Word {
        if let Some(&id) = self.int_const_cache.get(&value) {
            return id;
        }
        let ty = self.i32_type;
        let id = self.builder.constant_bit32(ty, value as u32);
        self.int_const_cache.insert(value, id);
        id
    }

    pub fn const_u32(&mut self, value: u32) -> Word {
        if let Some(&id) = self.uint_const_cache.get(&value) {
            return id;
        }
        let ty = self.u32_type;
        let id = self.builder.constant_bit32(ty, value);
        self.uint_const_cache.insert(value, id);
        id
    }

    pub fn const_f32(&mut self, value: f32) -> Word {
        let bits = value.to_bits();
        if let Some(&id) = self.float_const_cache.get(&bits) {
            return id;
        }
        let ty = self.f32_type;
        let id = self.builder.constant_bit32(ty, bits);
        self.float_const_cache.insert(bits, id);
        id
    }

    pub fn const_bool(&mut self, value: bool) -> Word {
        if let Some(&id) = self.bool_const_cache.get(&value) {
            return id;
        }
        let ty = self.bool_type;
        let id = if value {
            self.builder.constant_true(ty)
        } else {
            self.builder.constant_false(ty)
        };
        self.bool_const_cache.insert(value, id);
        id
    }

    /// Structurally interned composite constant.
    pub fn const_composite(&mut self, type_id: Word, components: Vec<Word>) -> Word {
        let key = (type_id, components.clone());
        if let Some(&id) = self.composite_const_cache.get(&key) {
            return id;
        }
        let id = self.builder.constant_composite(type_id, components);
        self.composite_const_cache.insert(key, id);
        id
    }

    // =========================================================================
    // Variables
    // =========================================================================

    /// Declare a module-scope variable. Must not be called while a function
    /// is under construction.
    pub fn declare_global(
        &mut self,
        value_type: Word,
        storage_class: StorageClass,
        initializer: Option<Word>,
    ) -> Word {
        assert!(
            self.variables_block.is_none(),
            "BUG: module-scope variable declared inside a function"
        );
        let ptr_type = self.pointer_type(storage_class, value_type);
        self.builder.variable(ptr_type, None, storage_class, initializer)
    }

    /// Declare a Function-class variable, hoisted into the variables block
    /// at the top of the current function.
    pub fn declare_local(&mut self, value_type: Word, initializer: Option<Word>) -> Result<Word> {
        let ptr_type = self.pointer_type(StorageClass::Function, value_type);

        let current_idx = self.builder.selected_block();
        let vars_block = self
            .variables_block
            .expect("BUG: local variable declared outside a function");
        let vars_idx = self.block_index(vars_block);

        self.builder.select_block(Some(vars_idx))?;
        let var_id = self.builder.variable(ptr_type, None, StorageClass::Function, initializer);
        self.builder.select_block(current_idx)?;

        Ok(var_id)
    }

    fn block_index(&self, block_id: Word) -> usize {
        let func = self
            .builder
            .module_ref()
            .functions
            .last()
            .expect("BUG: no function under construction");
        func.blocks
            .iter()
            .position(|b| b.label.as_ref().map(|l| l.result_id) == Some(Some(block_id)))
            .expect("BUG: block not found in current function")
    }

    /// Record a global in the entry-point interface. Before SPIR-V 1.4 the
    /// interface names only Input/Output variables; from 1.4 on it names
    /// every referenced module-scope variable.
    pub fn add_interface_variable(&mut self, var_id: Word, storage_class: StorageClass) {
        let in_out = matches!(storage_class, StorageClass::Input | StorageClass::Output);
        if in_out || self.version_at_least(1, 4) {
            self.interface.push(var_id);
        }
    }

    pub fn interface(&self) -> &[Word] {
        &self.interface
    }

    // =========================================================================
    // Functions and blocks
    // =========================================================================

    /// Open a function with a pre-allocated id. Parameters must be added
    /// with `function_parameter` before `begin_function_body`.
    pub fn begin_function(
        &mut self,
        function_id: Word,
        return_type: Word,
        function_type: Word,
    ) -> Result<()> {
        self.builder.begin_function(
            return_type,
            Some(function_id),
            spirv::FunctionControl::NONE,
            function_type,
        )?;
        Ok(())
    }

    pub fn function_parameter(&mut self, param_type: Word) -> Result<Word> {
        Ok(self.builder.function_parameter(param_type)?)
    }

    /// Create the variables block and the first code block. The variables
    /// block is left open; `end_function` terminates it with a branch to the
    /// code block.
    pub fn begin_function_body(&mut self) -> Result<()> {
        let vars_block = self.builder.id();
        let code_block = self.builder.id();
        self.variables_block = Some(vars_block);
        self.first_code_block = Some(code_block);

        self.builder.begin_block(Some(vars_block))?;
        self.builder.select_block(None)?;
        self.builder.begin_block(Some(code_block))?;
        self.current_block = Some(code_block);
        Ok(())
    }

    pub fn end_function(&mut self) -> Result<()> {
        assert!(
            self.current_block.is_none(),
            "BUG: function ended with an unterminated block"
        );
        if let (Some(vars_block), Some(code_block)) = (self.variables_block, self.first_code_block)
        {
            let vars_idx = self.block_index(vars_block);
            self.builder.select_block(Some(vars_idx))?;
            self.builder.branch(code_block)?;
        }
        self.builder.end_function()?;

        self.current_block = None;
        self.variables_block = None;
        self.first_code_block = None;
        assert!(self.control_stack.is_empty(), "BUG: unbalanced control frames");
        Ok(())
    }

    pub fn begin_block(&mut self, block_id: Word) -> Result<()> {
        self.builder.begin_block(Some(block_id))?;
        self.current_block = Some(block_id);
        Ok(())
    }

    pub fn is_terminated(&self) -> bool {
        self.current_block.is_none()
    }

    fn expect_open_block(&self) {
        assert!(
            self.current_block.is_some(),
            "BUG: instruction emitted after the block was terminated"
        );
    }

    // =========================================================================
    // Terminators and structured control flow
    // =========================================================================

    pub fn branch(&mut self, target: Word) -> Result<()> {
        self.expect_open_block();
        self.builder.branch(target)?;
        self.current_block = None;
        Ok(())
    }

    /// `OpSelectionMerge` + `OpBranchConditional`; terminates the block.
    pub fn selection_branch(
        &mut self,
        cond: Word,
        true_block: Word,
        false_block: Word,
        merge_block: Word,
    ) -> Result<()> {
        self.expect_open_block();
        self.builder.selection_merge(merge_block, spirv::SelectionControl::NONE)?;
        self.builder.branch_conditional(cond, true_block, false_block, [])?;
        self.current_block = None;
        Ok(())
    }

    /// Plain conditional branch (used by loop condition and continue
    /// blocks, whose merge is declared on the loop header).
    pub fn branch_conditional(&mut self, cond: Word, true_block: Word, false_block: Word) -> Result<()> {
        self.expect_open_block();
        self.builder.branch_conditional(cond, true_block, false_block, [])?;
        self.current_block = None;
        Ok(())
    }

    /// `OpLoopMerge`; does not terminate the block, the following branch
    /// does.
    pub fn loop_merge(&mut self, merge_block: Word, continue_block: Word) -> Result<()> {
        self.expect_open_block();
        self.builder.loop_merge(merge_block, continue_block, spirv::LoopControl::NONE, [])?;
        Ok(())
    }

    /// `OpSelectionMerge` + `OpSwitch`; terminates the block.
    pub fn switch(
        &mut self,
        selector: Word,
        default_block: Word,
        targets: Vec<(i32, Word)>,
        merge_block: Word,
    ) -> Result<()> {
        self.expect_open_block();
        self.builder.selection_merge(merge_block, spirv::SelectionControl::NONE)?;
        let targets: Vec<(Operand, Word)> = targets
            .into_iter()
            .map(|(literal, block)| (Operand::LiteralBit32(literal as u32), block))
            .collect();
        self.builder.switch(selector, default_block, targets)?;
        self.current_block = None;
        Ok(())
    }

    pub fn ret(&mut self) -> Result<()> {
        self.expect_open_block();
        self.builder.ret()?;
        self.current_block = None;
        Ok(())
    }

    pub fn ret_value(&mut self, value: Word) -> Result<()> {
        self.expect_open_block();
        self.builder.ret_value(value)?;
        self.current_block = None;
        Ok(())
    }

    pub fn kill(&mut self) -> Result<()> {
        self.expect_open_block();
        self.builder.kill()?;
        self.current_block = None;
        Ok(())
    }

    pub fn push_control(&mut self, frame: ControlFrame) {
        self.control_stack.push(frame);
    }

    pub fn pop_control(&mut self) {
        self.control_stack.pop().expect("BUG: control frame stack underflow");
    }

    /// Merge block of the innermost breakable construct.
    pub fn break_target(&self) -> Option<Word> {
        self.control_stack.last().map(|f| f.merge_block)
    }

    /// Continue block of the innermost loop.
    pub fn continue_target(&self) -> Option<Word> {
        self.control_stack
            .iter()
            .rev()
            .find_map(|f| f.continue_block)
    }

    /// Decorate a type as a block exactly once, regardless of how many
    /// variables share it.
    pub fn decorate_block_type(&mut self, type_id: Word, decoration: spirv::Decoration) {
        if self.block_decorated.insert(type_id) {
            self.builder.decorate(type_id, decoration, []);
        }
    }

    /// Attach an ArrayStride once per array type id. The stride for a given
    /// element shape must agree across uses; the type cache keys on layout,
    /// so each (element, layout) pair is decorated on first intern only.
    fn decorate_array_stride(&mut self, array_id: Word, stride: u32) {
        if let Some(&existing) = self.array_stride_emitted.get(&array_id) {
            assert!(
                existing == stride,
                "BUG: array type reused with conflicting strides {} and {}",
                existing,
                stride
            );
            return;
        }
        self.array_stride_emitted.insert(array_id, stride);
        self.builder.decorate(
            array_id,
            spirv::Decoration::ArrayStride,
            [Operand::LiteralBit32(stride)],
        );
    }
}

fn image_dim(dim: ImageDim) -> spirv::Dim {
    match dim {
        ImageDim::Dim1D => spirv::Dim::Dim1D,
        ImageDim::Dim2D => spirv::Dim::Dim2D,
        ImageDim::Dim3D => spirv::Dim::Dim3D,
        ImageDim::Cube => spirv::Dim::DimCube,
    }
}

fn image_format(format: ImageFormat) -> spirv::ImageFormat {
    match format {
        ImageFormat::Rgba32f => spirv::ImageFormat::Rgba32f,
        ImageFormat::Rgba8 => spirv::ImageFormat::Rgba8,
        ImageFormat::R32f => spirv::ImageFormat::R32f,
        ImageFormat::R32ui => spirv::ImageFormat::R32ui,
        ImageFormat::R32i => spirv::ImageFormat::R32i,
        ImageFormat::Unknown => spirv::ImageFormat::Unknown,
    }
}
