//! AST to SPIR-V lowering.
//!
//! The pass runs in four phases over one [`ModuleBuilder`]:
//!
//! 1. declare module-scope variables (and the built-ins the tree references),
//! 2. forward-declare every function so call order never matters,
//! 3. lower each function body, expressions synthesizing one
//!    [`AccessChain`] per node,
//! 4. emit the entry point and execution modes, then assemble.
//!
//! The input is pre-validated; shape violations are bugs in the producer and
//! fail with a panic naming the offending node. Recoverable failures (not
//! yet implemented options) surface as errors.

use indexmap::IndexMap;
use log::debug;
use rspirv::binary::Assemble;
use rspirv::dr::Operand;
use rspirv::spirv::{self, StorageClass, Word};

use crate::ast::{
    AtomicOp, BinaryOp, BlockLayout, BuiltinVar, Expr, ExprKind, Function, GlobalQualifier,
    GlobalVar, LocalDecl, Module, Param, ParamQualifier, Precision, ScalarKind, Stage, Stmt,
    SwitchCase, SymbolId, Type, UnaryOp,
};
use crate::diags::format_type;
use crate::error::{CompilerError, Result};
use crate::err_spirv;
use crate::options::CompileOptions;
use crate::spirv::access_chain::AccessChain;
use crate::spirv::constructors::{self, ConstructorArg};
use crate::spirv::{ControlFrame, ModuleBuilder};

/// Generate a SPIR-V module for a validated shader.
pub fn emit(module: &Module, options: &CompileOptions) -> Result<Vec<u32>> {
    if options.select_view_in_vertex {
        return Err(CompilerError::NotImplemented(
            "select-view-in-vertex: multiview view-index selection".to_string(),
        ));
    }
    LowerCtx::new(module, options).run()
}

#[derive(Clone, Copy)]
enum SymbolBinding {
    /// A memory object.
    Variable {
        id: Word,
        type_id: Word,
        storage_class: StorageClass,
        layout: BlockLayout,
    },
    /// A pure value (const parameters, folded const locals).
    Value { id: Word, type_id: Word },
}

#[derive(Clone, Copy)]
struct BuiltinBinding {
    id: Word,
    type_id: Word,
    storage_class: StorageClass,
}

#[derive(Clone)]
struct ParamInfo {
    qualifier: ParamQualifier,
    ty: Type,
    value_type_id: Word,
    spirv_type_id: Word,
}

#[derive(Clone)]
struct FunctionInfo {
    id: Word,
    function_type_id: Word,
    return_type_id: Word,
    params: Vec<ParamInfo>,
}

struct LowerCtx<'a> {
    module: &'a Module,
    options: &'a CompileOptions,
    mb: ModuleBuilder,
    symbols: IndexMap<SymbolId, SymbolBinding>,
    functions: IndexMap<SymbolId, FunctionInfo>,
    builtin_vars: IndexMap<BuiltinVar, BuiltinBinding>,
    /// Module-scope initializers that were not constant expressions; stored
    /// as (variable id, index into module.globals) and executed at the head
    /// of `main`.
    deferred_inits: Vec<(Word, usize)>,
}

impl<'a> LowerCtx<'a> {
    fn new(module: &'a Module, options: &'a CompileOptions) -> Self {
        LowerCtx {
            module,
            options,
            mb: ModuleBuilder::new(options),
            symbols: IndexMap::new(),
            functions: IndexMap::new(),
            builtin_vars: IndexMap::new(),
            deferred_inits: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<u32>> {
        let module = self.module;
        debug!(
            "lowering shader: {} globals, {} functions",
            module.globals.len(),
            module.functions.len()
        );

        for (index, global) in module.globals.iter().enumerate() {
            self.declare_global(index, global)?;
        }
        self.declare_referenced_builtins();
        self.forward_declare_functions();

        for function in &module.functions {
            self.lower_function(function)?;
        }

        self.emit_entry_point()?;
        Ok(self.mb.builder.module().assemble())
    }

    // =========================================================================
    // Globals and built-ins
    // =========================================================================

    fn declare_global(&mut self, index: usize, global: &GlobalVar) -> Result<()> {
        let storage_class = self.storage_class_for(global);
        let layout = effective_layout(global);
        let type_id = self.mb.type_id(&global.ty, layout);

        // Interface blocks get their Block decoration on the struct type.
        if matches!(global.ty, Type::Struct(_)) {
            match global.qualifier {
                GlobalQualifier::Buffer if !self.mb.version_at_least(1, 3) => {
                    self.mb.decorate_block_type(type_id, spirv::Decoration::BufferBlock);
                }
                GlobalQualifier::Uniform
                | GlobalQualifier::Buffer
                | GlobalQualifier::PushConstant => {
                    self.mb.decorate_block_type(type_id, spirv::Decoration::Block);
                }
                // I/O blocks.
                GlobalQualifier::Input | GlobalQualifier::Output if global.unnamed_block => {
                    self.mb.decorate_block_type(type_id, spirv::Decoration::Block);
                }
                _ => {}
            }
        }

        let folded = match &global.init {
            Some(init) => self.try_fold_constant(init),
            None => None,
        };
        let var_id = self.mb.declare_global(type_id, storage_class, folded);
        if global.init.is_some() && folded.is_none() {
            // Not a constant expression; initialize at the head of main.
            self.deferred_inits.push((var_id, index));
        }

        if let Some(location) = global.location {
            self.mb.builder.decorate(
                var_id,
                spirv::Decoration::Location,
                [Operand::LiteralBit32(location)],
            );
        }
        if let Some(set) = global.set {
            self.mb.builder.decorate(
                var_id,
                spirv::Decoration::DescriptorSet,
                [Operand::LiteralBit32(set)],
            );
        }
        if let Some(binding) = global.binding {
            self.mb.builder.decorate(
                var_id,
                spirv::Decoration::Binding,
                [Operand::LiteralBit32(binding)],
            );
        }
        if global.invariant || (self.options.invariant_all && storage_class == StorageClass::Output)
        {
            self.mb.builder.decorate(var_id, spirv::Decoration::Invariant, []);
        }
        if self.options.relaxed_precision
            && matches!(global.precision, Precision::Medium | Precision::Low)
        {
            self.mb.builder.decorate(var_id, spirv::Decoration::RelaxedPrecision, []);
        }
        if self.options.debug_info {
            self.mb.builder.name(var_id, global.name.clone());
        }

        self.mb.add_interface_variable(var_id, storage_class);
        self.symbols.insert(
            global.symbol,
            SymbolBinding::Variable { id: var_id, type_id, storage_class, layout },
        );
        Ok(())
    }

    fn storage_class_for(&self, global: &GlobalVar) -> StorageClass {
        if global.ty.is_opaque() {
            return StorageClass::UniformConstant;
        }
        match global.qualifier {
            GlobalQualifier::Input => StorageClass::Input,
            GlobalQualifier::Output => StorageClass::Output,
            GlobalQualifier::Uniform => StorageClass::Uniform,
            GlobalQualifier::Buffer => {
                if self.mb.version_at_least(1, 3) {
                    StorageClass::StorageBuffer
                } else {
                    StorageClass::Uniform
                }
            }
            GlobalQualifier::PushConstant => StorageClass::PushConstant,
            GlobalQualifier::Shared => StorageClass::Workgroup,
            GlobalQualifier::Private => StorageClass::Private,
        }
    }

    /// Built-in variables are materialized only for the set the tree
    /// actually references, declared up front so module-scope variables
    /// never land inside a function body.
    fn declare_referenced_builtins(&mut self) {
        let module = self.module;
        let mut referenced = Vec::new();
        for global in &module.globals {
            if let Some(init) = &global.init {
                collect_builtins_in_expr(init, &mut referenced);
            }
        }
        for function in &module.functions {
            collect_builtins_in_stmts(&function.body, &mut referenced);
        }

        for builtin in referenced {
            let (name, decoration, ty, storage_class) = builtin_info(builtin);
            let type_id = self.mb.type_id(&ty, BlockLayout::Unspecified);
            let id = self.mb.declare_global(type_id, storage_class, None);
            self.mb.builder.decorate(
                id,
                spirv::Decoration::BuiltIn,
                [Operand::BuiltIn(decoration)],
            );
            if self.options.debug_info {
                self.mb.builder.name(id, name);
            }
            self.mb.add_interface_variable(id, storage_class);
            self.builtin_vars
                .insert(builtin, BuiltinBinding { id, type_id, storage_class });
        }
    }

    // =========================================================================
    // Functions
    // =========================================================================

    /// Reserve ids and types for every function before lowering any body, so
    /// calls may reference functions defined later.
    fn forward_declare_functions(&mut self) {
        let module = self.module;
        for function in &module.functions {
            let return_type_id = self.mb.type_id(&function.return_type, BlockLayout::Unspecified);

            let mut params = Vec::with_capacity(function.params.len());
            let mut param_type_ids = Vec::with_capacity(function.params.len());
            for param in &function.params {
                let value_type_id = self.mb.type_id(&param.ty, BlockLayout::Unspecified);
                let spirv_type_id = self.param_spirv_type(param, value_type_id);
                param_type_ids.push(spirv_type_id);
                params.push(ParamInfo {
                    qualifier: param.qualifier,
                    ty: param.ty.clone(),
                    value_type_id,
                    spirv_type_id,
                });
            }

            let function_type_id = self.mb.function_type(return_type_id, param_type_ids);
            let id = self.mb.fresh_id();
            self.functions.insert(
                function.symbol,
                FunctionInfo { id, function_type_id, return_type_id, params },
            );
        }
    }

    /// `in`/`const` parameters travel by value; `out`/`inout` as Function
    /// pointers; opaque parameters as UniformConstant pointers.
    fn param_spirv_type(&mut self, param: &Param, value_type_id: Word) -> Word {
        if param.ty.is_opaque() {
            return self.mb.pointer_type(StorageClass::UniformConstant, value_type_id);
        }
        match param.qualifier {
            ParamQualifier::In | ParamQualifier::Const => value_type_id,
            ParamQualifier::Out | ParamQualifier::InOut => {
                self.mb.pointer_type(StorageClass::Function, value_type_id)
            }
        }
    }

    fn lower_function(&mut self, function: &Function) -> Result<()> {
        debug!("lowering function {}", function.name);
        let info = self
            .functions
            .get(&function.symbol)
            .expect("BUG: function was not forward-declared")
            .clone();

        self.mb.begin_function(info.id, info.return_type_id, info.function_type_id)?;
        if self.options.debug_info {
            self.mb.builder.name(info.id, function.name.clone());
        }

        let mut param_ids = Vec::with_capacity(info.params.len());
        for param in &info.params {
            param_ids.push(self.mb.function_parameter(param.spirv_type_id)?);
        }
        self.mb.begin_function_body()?;

        for ((param, param_info), param_id) in
            function.params.iter().zip(&info.params).zip(param_ids)
        {
            if self.options.debug_info {
                self.mb.builder.name(param_id, param.name.clone());
            }
            let binding = if param.ty.is_opaque() {
                SymbolBinding::Variable {
                    id: param_id,
                    type_id: param_info.value_type_id,
                    storage_class: StorageClass::UniformConstant,
                    layout: BlockLayout::Unspecified,
                }
            } else {
                match param.qualifier {
                    ParamQualifier::Const => {
                        SymbolBinding::Value { id: param_id, type_id: param_info.value_type_id }
                    }
                    ParamQualifier::In => {
                        // The value arrives by copy; shadow it in a local so
                        // the body can treat the parameter as an lvalue.
                        let shadow = self.mb.declare_local(param_info.value_type_id, None)?;
                        self.mb.builder.store(shadow, param_id, None, [])?;
                        SymbolBinding::Variable {
                            id: shadow,
                            type_id: param_info.value_type_id,
                            storage_class: StorageClass::Function,
                            layout: BlockLayout::Unspecified,
                        }
                    }
                    ParamQualifier::Out | ParamQualifier::InOut => SymbolBinding::Variable {
                        id: param_id,
                        type_id: param_info.value_type_id,
                        storage_class: StorageClass::Function,
                        layout: BlockLayout::Unspecified,
                    },
                }
            };
            self.symbols.insert(param.symbol, binding);
        }

        if function.name == "main" {
            self.emit_deferred_global_inits()?;
        }

        self.lower_block(&function.body)?;

        if !self.mb.is_terminated() {
            // Falling off the end is only meaningful for void functions; a
            // non-void function must have returned on every path.
            assert!(
                function.return_type == Type::Void,
                "BUG: non-void function {} falls off the end",
                function.name
            );
            self.mb.ret()?;
        }
        self.mb.end_function()
    }

    fn emit_deferred_global_inits(&mut self) -> Result<()> {
        let module = self.module;
        let deferred = std::mem::take(&mut self.deferred_inits);
        for (var_id, index) in deferred {
            let global = &module.globals[index];
            let init = global.init.as_ref().expect("BUG: deferred init without initializer");
            let value = self.lower_expr_value(init)?;
            self.mb.builder.store(var_id, value, None, [])?;
        }
        Ok(())
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn lower_block(&mut self, stmts: &[Stmt]) -> Result<()> {
        for stmt in stmts {
            if self.mb.is_terminated() {
                // Statements after return/break/continue/discard are
                // unreachable; stop rather than open an orphan block.
                break;
            }
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Expr(expr) => {
                self.lower_expr(expr)?;
                Ok(())
            }
            Stmt::Decl(decl) => self.lower_local_decl(decl),
            Stmt::Block(stmts) => self.lower_block(stmts),
            Stmt::If { cond, then_branch, else_branch } => {
                self.lower_if(cond, then_branch, else_branch.as_deref())
            }
            Stmt::While { cond, body } => self.lower_while(cond, body),
            Stmt::DoWhile { body, cond } => self.lower_do_while(body, cond),
            Stmt::For { init, cond, update, body } => {
                self.lower_for(init.as_deref(), cond.as_ref(), update.as_ref(), body)
            }
            Stmt::Switch { selector, cases } => self.lower_switch(selector, cases),
            Stmt::Return(value) => match value {
                Some(expr) => {
                    let value = self.lower_expr_value(expr)?;
                    self.mb.ret_value(value)
                }
                None => self.mb.ret(),
            },
            Stmt::Break => {
                let target = self
                    .mb
                    .break_target()
                    .expect("BUG: break outside of a loop or switch");
                self.mb.branch(target)
            }
            Stmt::Continue => {
                let target = self.mb.continue_target().expect("BUG: continue outside of a loop");
                self.mb.branch(target)
            }
            Stmt::Discard => self.mb.kill(),
        }
    }

    fn lower_local_decl(&mut self, decl: &LocalDecl) -> Result<()> {
        let type_id = self.mb.type_id(&decl.ty, BlockLayout::Unspecified);
        let folded = decl.init.as_ref().and_then(|init| self.try_fold_constant(init));

        if decl.is_const {
            if let Some(const_id) = folded {
                self.symbols
                    .insert(decl.symbol, SymbolBinding::Value { id: const_id, type_id });
                return Ok(());
            }
        }

        // The OpVariable is hoisted to the entry block; the store stays at
        // the declaration point so re-entering the scope re-initializes.
        let var_id = self.mb.declare_local(type_id, None)?;
        if self.options.debug_info {
            self.mb.builder.name(var_id, decl.name.clone());
        }
        if self.options.relaxed_precision
            && matches!(decl.precision, Precision::Medium | Precision::Low)
        {
            self.mb.builder.decorate(var_id, spirv::Decoration::RelaxedPrecision, []);
        }

        if let Some(init) = &decl.init {
            let value = match folded {
                Some(id) => id,
                None => self.lower_expr_value(init)?,
            };
            self.mb.builder.store(var_id, value, None, [])?;
        }

        self.symbols.insert(
            decl.symbol,
            SymbolBinding::Variable {
                id: var_id,
                type_id,
                storage_class: StorageClass::Function,
                layout: BlockLayout::Unspecified,
            },
        );
        Ok(())
    }

    fn lower_if(
        &mut self,
        cond: &Expr,
        then_branch: &[Stmt],
        else_branch: Option<&[Stmt]>,
    ) -> Result<()> {
        let cond_value = self.lower_expr_value(cond)?;

        let true_block = self.mb.fresh_id();
        let merge_block = self.mb.fresh_id();
        let false_block = if else_branch.is_some() { self.mb.fresh_id() } else { merge_block };

        self.mb.selection_branch(cond_value, true_block, false_block, merge_block)?;

        self.mb.begin_block(true_block)?;
        self.lower_block(then_branch)?;
        if !self.mb.is_terminated() {
            self.mb.branch(merge_block)?;
        }

        if let Some(else_branch) = else_branch {
            self.mb.begin_block(false_block)?;
            self.lower_block(else_branch)?;
            if !self.mb.is_terminated() {
                self.mb.branch(merge_block)?;
            }
        }

        self.mb.begin_block(merge_block)
    }

    /// The canonical five-block loop:
    ///
    /// ```text
    /// header:    OpLoopMerge merge continue; OpBranch condition
    /// condition: <cond>; OpBranchConditional c, body, merge
    /// body:      <body>; OpBranch continue
    /// continue:  <update>; OpBranch header
    /// merge:
    /// ```
    fn lower_while(&mut self, cond: &Expr, body: &[Stmt]) -> Result<()> {
        self.lower_loop(None, Some(cond), None, body)
    }

    fn lower_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        update: Option<&Expr>,
        body: &[Stmt],
    ) -> Result<()> {
        self.lower_loop(init, cond, update, body)
    }

    fn lower_loop(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        update: Option<&Expr>,
        body: &[Stmt],
    ) -> Result<()> {
        if let Some(init) = init {
            self.lower_stmt(init)?;
        }

        let header_block = self.mb.fresh_id();
        let condition_block = self.mb.fresh_id();
        let body_block = self.mb.fresh_id();
        let continue_block = self.mb.fresh_id();
        let merge_block = self.mb.fresh_id();

        self.mb.branch(header_block)?;
        self.mb.begin_block(header_block)?;
        self.mb.loop_merge(merge_block, continue_block)?;
        self.mb.branch(condition_block)?;

        self.mb.begin_block(condition_block)?;
        match cond {
            Some(cond) => {
                let cond_value = self.lower_expr_value(cond)?;
                self.mb.branch_conditional(cond_value, body_block, merge_block)?;
            }
            None => self.mb.branch(body_block)?,
        }

        self.mb.begin_block(body_block)?;
        self.mb.push_control(ControlFrame {
            merge_block,
            continue_block: Some(continue_block),
        });
        self.lower_block(body)?;
        self.mb.pop_control();
        if !self.mb.is_terminated() {
            self.mb.branch(continue_block)?;
        }

        self.mb.begin_block(continue_block)?;
        if let Some(update) = update {
            self.lower_expr(update)?;
        }
        self.mb.branch(header_block)?;

        self.mb.begin_block(merge_block)
    }

    /// do-while runs the body first, so the condition lives in the continue
    /// block and conditionally branches back to the header.
    fn lower_do_while(&mut self, body: &[Stmt], cond: &Expr) -> Result<()> {
        let header_block = self.mb.fresh_id();
        let body_block = self.mb.fresh_id();
        let continue_block = self.mb.fresh_id();
        let merge_block = self.mb.fresh_id();

        self.mb.branch(header_block)?;
        self.mb.begin_block(header_block)?;
        self.mb.loop_merge(merge_block, continue_block)?;
        self.mb.branch(body_block)?;

        self.mb.begin_block(body_block)?;
        self.mb.push_control(ControlFrame {
            merge_block,
            continue_block: Some(continue_block),
        });
        self.lower_block(body)?;
        self.mb.pop_control();
        if !self.mb.is_terminated() {
            self.mb.branch(continue_block)?;
        }

        self.mb.begin_block(continue_block)?;
        let cond_value = self.lower_expr_value(cond)?;
        self.mb.branch_conditional(cond_value, header_block, merge_block)?;

        self.mb.begin_block(merge_block)
    }

    fn lower_switch(&mut self, selector: &Expr, cases: &[SwitchCase]) -> Result<()> {
        let selector_value = self.lower_expr_value(selector)?;
        let merge_block = self.mb.fresh_id();

        let case_blocks: Vec<Word> = cases.iter().map(|_| self.mb.fresh_id()).collect();
        let default_block = cases
            .iter()
            .position(|c| c.label.is_none())
            .map(|index| case_blocks[index])
            .unwrap_or(merge_block);
        let targets: Vec<(i32, Word)> = cases
            .iter()
            .zip(&case_blocks)
            .filter_map(|(case, &block)| case.label.map(|label| (label, block)))
            .collect();

        self.mb.switch(selector_value, default_block, targets, merge_block)?;

        self.mb.push_control(ControlFrame { merge_block, continue_block: None });
        for (index, case) in cases.iter().enumerate() {
            self.mb.begin_block(case_blocks[index])?;
            self.lower_block(&case.body)?;
            if !self.mb.is_terminated() {
                // Fall through into the next case, or out of the switch.
                let next = case_blocks.get(index + 1).copied().unwrap_or(merge_block);
                self.mb.branch(next)?;
            }
        }
        self.mb.pop_control();

        self.mb.begin_block(merge_block)
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn lower_expr_value(&mut self, expr: &Expr) -> Result<Word> {
        let mut chain = self.lower_expr(expr)?;
        chain.load(&mut self.mb)
    }

    fn lower_expr(&mut self, expr: &Expr) -> Result<AccessChain> {
        match &expr.kind {
            ExprKind::Symbol(symbol) => {
                let binding = *self
                    .symbols
                    .get(symbol)
                    .unwrap_or_else(|| panic!("BUG: unresolved symbol {:?}", symbol));
                Ok(match binding {
                    SymbolBinding::Value { id, type_id } => AccessChain::rvalue(id, type_id),
                    SymbolBinding::Variable { id, type_id, storage_class, layout } => {
                        AccessChain::lvalue(id, type_id, storage_class, layout)
                    }
                })
            }
            ExprKind::Builtin(builtin) => {
                let binding = *self
                    .builtin_vars
                    .get(builtin)
                    .unwrap_or_else(|| panic!("BUG: built-in {:?} was not declared", builtin));
                Ok(AccessChain::lvalue(
                    binding.id,
                    binding.type_id,
                    binding.storage_class,
                    BlockLayout::Unspecified,
                ))
            }
            ExprKind::BlockField { block, field } => {
                let binding = *self
                    .symbols
                    .get(block)
                    .unwrap_or_else(|| panic!("BUG: unresolved interface block {:?}", block));
                let SymbolBinding::Variable { id, type_id, storage_class, layout } = binding
                else {
                    panic!("BUG: interface block {:?} bound as a value", block);
                };
                let mut chain = AccessChain::lvalue(id, type_id, storage_class, layout);
                let field_type_id = self.mb.type_id(&expr.ty, layout);
                chain.push_literal(*field, field_type_id);
                Ok(chain)
            }
            ExprKind::BoolConst(value) => {
                let id = self.mb.const_bool(*value);
                let type_id = self.mb.bool_type;
                Ok(AccessChain::rvalue(id, type_id))
            }
            ExprKind::IntConst(value) => {
                let id = self.mb.const_i32(*value);
                let type_id = self.mb.i32_type;
                Ok(AccessChain::rvalue(id, type_id))
            }
            ExprKind::UIntConst(value) => {
                let id = self.mb.const_u32(*value);
                let type_id = self.mb.u32_type;
                Ok(AccessChain::rvalue(id, type_id))
            }
            ExprKind::FloatConst(value) => {
                let id = self.mb.const_f32(*value);
                let type_id = self.mb.f32_type;
                Ok(AccessChain::rvalue(id, type_id))
            }
            ExprKind::Unary { op, operand } => self.lower_unary(expr, *op, operand),
            ExprKind::Binary { op, lhs, rhs, precise } => {
                self.lower_binary(expr, *op, lhs, rhs, *precise)
            }
            ExprKind::Ternary { cond, then_expr, else_expr } => {
                self.lower_ternary(expr, cond, then_expr, else_expr)
            }
            ExprKind::Index { base, index } => {
                let mut chain = self.lower_expr(base)?;
                let element_type_id = self.mb.type_id(&expr.ty, chain.layout());
                if let Some(literal) = index.const_index() {
                    chain.push_literal(literal, element_type_id);
                } else {
                    let index_value = self.lower_expr_value(index)?;
                    if base.ty.is_vector() {
                        chain.push_dynamic_component(&mut self.mb, index_value, element_type_id)?;
                    } else {
                        chain.push_index(index_value, element_type_id);
                    }
                }
                Ok(chain)
            }
            ExprKind::Field { base, field } => {
                let mut chain = self.lower_expr(base)?;
                let field_type_id = self.mb.type_id(&expr.ty, chain.layout());
                chain.push_literal(*field, field_type_id);
                Ok(chain)
            }
            ExprKind::Swizzle { base, components } => {
                let mut chain = self.lower_expr(base)?;
                let size = base
                    .ty
                    .vector_size()
                    .unwrap_or_else(|| panic!("BUG: swizzle on {}", format_type(&base.ty)));

                // Selecting every component in order is a no-op.
                let identity = components.len() == size as usize
                    && components.iter().enumerate().all(|(i, &c)| c as usize == i);
                if !identity {
                    let components: Vec<u32> = components.iter().map(|&c| c as u32).collect();
                    let type_id = self.mb.type_id(&expr.ty, chain.layout());
                    chain.push_swizzle(&components, type_id, size as u32);
                }
                Ok(chain)
            }
            ExprKind::Construct { args } => {
                let mut loaded = Vec::with_capacity(args.len());
                for arg in args {
                    let id = self.lower_expr_value(arg)?;
                    loaded.push(ConstructorArg { ty: arg.ty.clone(), id });
                }
                let target_type_id = self.mb.type_id(&expr.ty, BlockLayout::Unspecified);
                let id = constructors::construct(&mut self.mb, &expr.ty, target_type_id, &loaded)?;
                Ok(AccessChain::rvalue(id, target_type_id))
            }
            ExprKind::Call { function, args } => self.lower_call(expr, *function, args),
            ExprKind::Atomic { op, args } => self.lower_atomic(expr, *op, args),
            ExprKind::Assign { target, value } => {
                let mut lhs = self.lower_expr(target)?;
                let rhs = self.lower_expr_value(value)?;
                lhs.store(&mut self.mb, rhs)?;
                // The value of an assignment is its right-hand side.
                let type_id = self.mb.type_id(&value.ty, BlockLayout::Unspecified);
                Ok(AccessChain::rvalue(rhs, type_id))
            }
        }
    }

    fn lower_unary(&mut self, expr: &Expr, op: UnaryOp, operand: &Expr) -> Result<AccessChain> {
        let operand_value = self.lower_expr_value(operand)?;
        let result_type_id = self.mb.type_id(&expr.ty, BlockLayout::Unspecified);
        let kind = operand
            .ty
            .scalar_kind()
            .unwrap_or_else(|| panic!("BUG: unary operand of type {}", format_type(&operand.ty)));

        let id = match (op, kind) {
            (UnaryOp::Negate, ScalarKind::Float) => {
                self.mb.builder.f_negate(result_type_id, None, operand_value)?
            }
            (UnaryOp::Negate, ScalarKind::Int | ScalarKind::UInt) => {
                self.mb.builder.s_negate(result_type_id, None, operand_value)?
            }
            (UnaryOp::LogicalNot, ScalarKind::Bool) => {
                self.mb.builder.logical_not(result_type_id, None, operand_value)?
            }
            (UnaryOp::BitNot, ScalarKind::Int | ScalarKind::UInt) => {
                self.mb.builder.not(result_type_id, None, operand_value)?
            }
            (op, kind) => panic!("BUG: unary {:?} applied to {:?} operand", op, kind),
        };
        Ok(AccessChain::rvalue(id, result_type_id))
    }

    fn lower_binary(
        &mut self,
        expr: &Expr,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        precise: bool,
    ) -> Result<AccessChain> {
        let mut lhs_value = self.lower_expr_value(lhs)?;
        let mut rhs_value = self.lower_expr_value(rhs)?;
        let result_type_id = self.mb.type_id(&expr.ty, BlockLayout::Unspecified);

        // Matrix and matrix/vector products have dedicated opcodes.
        if op == BinaryOp::Mul {
            if let Some(id) =
                self.lower_product(result_type_id, &lhs.ty, lhs_value, &rhs.ty, rhs_value)?
            {
                self.maybe_decorate_exact(id, op, &lhs.ty, precise);
                return Ok(AccessChain::rvalue(id, result_type_id));
            }
        }

        // Elementwise ops broadcast a scalar operand across the vector side.
        match (&lhs.ty, &rhs.ty) {
            (Type::Scalar(_), Type::Vector(_, size)) => {
                let vector_type_id = self.mb.type_id(&rhs.ty, BlockLayout::Unspecified);
                lhs_value = constructors::splat(&mut self.mb, vector_type_id, lhs_value, *size)?;
            }
            (Type::Vector(_, size), Type::Scalar(_)) => {
                let vector_type_id = self.mb.type_id(&lhs.ty, BlockLayout::Unspecified);
                rhs_value = constructors::splat(&mut self.mb, vector_type_id, rhs_value, *size)?;
            }
            _ => {}
        }

        let kind = lhs
            .ty
            .scalar_kind()
            .unwrap_or_else(|| panic!("BUG: binary operand of type {}", format_type(&lhs.ty)));

        use BinaryOp::*;
        use ScalarKind::*;
        let b = result_type_id;
        let id = match (op, kind) {
            (Add, Float) => self.mb.builder.f_add(b, None, lhs_value, rhs_value)?,
            (Add, Int | UInt) => self.mb.builder.i_add(b, None, lhs_value, rhs_value)?,
            (Sub, Float) => self.mb.builder.f_sub(b, None, lhs_value, rhs_value)?,
            (Sub, Int | UInt) => self.mb.builder.i_sub(b, None, lhs_value, rhs_value)?,
            (Mul, Float) => self.mb.builder.f_mul(b, None, lhs_value, rhs_value)?,
            (Mul, Int | UInt) => self.mb.builder.i_mul(b, None, lhs_value, rhs_value)?,
            (Div, Float) => self.mb.builder.f_div(b, None, lhs_value, rhs_value)?,
            (Div, Int) => self.mb.builder.s_div(b, None, lhs_value, rhs_value)?,
            (Div, UInt) => self.mb.builder.u_div(b, None, lhs_value, rhs_value)?,
            (Mod, Float) => self.mb.builder.f_mod(b, None, lhs_value, rhs_value)?,
            (Mod, Int) => self.mb.builder.s_mod(b, None, lhs_value, rhs_value)?,
            (Mod, UInt) => self.mb.builder.u_mod(b, None, lhs_value, rhs_value)?,

            (Equal | NotEqual, _) => {
                return self.lower_equality(expr, op, kind, &lhs.ty, lhs_value, rhs_value);
            }

            (LessThan, Float) => self.mb.builder.f_ord_less_than(b, None, lhs_value, rhs_value)?,
            (LessThan, Int) => self.mb.builder.s_less_than(b, None, lhs_value, rhs_value)?,
            (LessThan, UInt) => self.mb.builder.u_less_than(b, None, lhs_value, rhs_value)?,
            (GreaterThan, Float) => {
                self.mb.builder.f_ord_greater_than(b, None, lhs_value, rhs_value)?
            }
            (GreaterThan, Int) => self.mb.builder.s_greater_than(b, None, lhs_value, rhs_value)?,
            (GreaterThan, UInt) => self.mb.builder.u_greater_than(b, None, lhs_value, rhs_value)?,
            (LessThanEqual, Float) => {
                self.mb.builder.f_ord_less_than_equal(b, None, lhs_value, rhs_value)?
            }
            (LessThanEqual, Int) => {
                self.mb.builder.s_less_than_equal(b, None, lhs_value, rhs_value)?
            }
            (LessThanEqual, UInt) => {
                self.mb.builder.u_less_than_equal(b, None, lhs_value, rhs_value)?
            }
            (GreaterThanEqual, Float) => {
                self.mb.builder.f_ord_greater_than_equal(b, None, lhs_value, rhs_value)?
            }
            (GreaterThanEqual, Int) => {
                self.mb.builder.s_greater_than_equal(b, None, lhs_value, rhs_value)?
            }
            (GreaterThanEqual, UInt) => {
                self.mb.builder.u_greater_than_equal(b, None, lhs_value, rhs_value)?
            }

            (LogicalAnd, Bool) => self.mb.builder.logical_and(b, None, lhs_value, rhs_value)?,
            (LogicalOr, Bool) => self.mb.builder.logical_or(b, None, lhs_value, rhs_value)?,
            (LogicalXor, Bool) => {
                self.mb.builder.logical_not_equal(b, None, lhs_value, rhs_value)?
            }

            (BitAnd, Int | UInt) => self.mb.builder.bitwise_and(b, None, lhs_value, rhs_value)?,
            (BitOr, Int | UInt) => self.mb.builder.bitwise_or(b, None, lhs_value, rhs_value)?,
            (BitXor, Int | UInt) => self.mb.builder.bitwise_xor(b, None, lhs_value, rhs_value)?,
            (BitAnd, Bool) => self.mb.builder.logical_and(b, None, lhs_value, rhs_value)?,
            (BitOr, Bool) => self.mb.builder.logical_or(b, None, lhs_value, rhs_value)?,
            (BitXor, Bool) => self.mb.builder.logical_not_equal(b, None, lhs_value, rhs_value)?,

            (ShiftLeft, Int | UInt) => {
                self.mb.builder.shift_left_logical(b, None, lhs_value, rhs_value)?
            }
            (ShiftRight, Int) => {
                self.mb.builder.shift_right_arithmetic(b, None, lhs_value, rhs_value)?
            }
            (ShiftRight, UInt) => {
                self.mb.builder.shift_right_logical(b, None, lhs_value, rhs_value)?
            }

            (op, kind) => panic!("BUG: binary {:?} applied to {:?} operands", op, kind),
        };

        self.maybe_decorate_exact(id, op, &lhs.ty, precise);
        Ok(AccessChain::rvalue(id, result_type_id))
    }

    /// Aggregate equality: componentwise comparison folded with OpAll/OpAny.
    fn lower_equality(
        &mut self,
        expr: &Expr,
        op: BinaryOp,
        kind: ScalarKind,
        operand_ty: &Type,
        lhs_value: Word,
        rhs_value: Word,
    ) -> Result<AccessChain> {
        let result_type_id = self.mb.type_id(&expr.ty, BlockLayout::Unspecified);
        let vector_size = operand_ty.vector_size();
        let compare_type_id = match vector_size {
            Some(size) => {
                self.mb.type_id(&Type::Vector(ScalarKind::Bool, size), BlockLayout::Unspecified)
            }
            None => self.mb.bool_type,
        };

        let compared = match (op, kind) {
            (BinaryOp::Equal, ScalarKind::Float) => {
                self.mb.builder.f_ord_equal(compare_type_id, None, lhs_value, rhs_value)?
            }
            (BinaryOp::NotEqual, ScalarKind::Float) => {
                self.mb.builder.f_unord_not_equal(compare_type_id, None, lhs_value, rhs_value)?
            }
            (BinaryOp::Equal, ScalarKind::Bool) => {
                self.mb.builder.logical_equal(compare_type_id, None, lhs_value, rhs_value)?
            }
            (BinaryOp::NotEqual, ScalarKind::Bool) => {
                self.mb.builder.logical_not_equal(compare_type_id, None, lhs_value, rhs_value)?
            }
            (BinaryOp::Equal, _) => {
                self.mb.builder.i_equal(compare_type_id, None, lhs_value, rhs_value)?
            }
            (BinaryOp::NotEqual, _) => {
                self.mb.builder.i_not_equal(compare_type_id, None, lhs_value, rhs_value)?
            }
            _ => unreachable!(),
        };

        let id = if vector_size.is_some() {
            if op == BinaryOp::Equal {
                self.mb.builder.all(result_type_id, None, compared)?
            } else {
                self.mb.builder.any(result_type_id, None, compared)?
            }
        } else {
            compared
        };
        Ok(AccessChain::rvalue(id, result_type_id))
    }

    fn lower_product(
        &mut self,
        result_type_id: Word,
        lhs_ty: &Type,
        lhs_value: Word,
        rhs_ty: &Type,
        rhs_value: Word,
    ) -> Result<Option<Word>> {
        use ScalarKind::Float;
        let b = &mut self.mb.builder;
        let id = match (lhs_ty, rhs_ty) {
            (Type::Matrix { .. }, Type::Matrix { .. }) => {
                b.matrix_times_matrix(result_type_id, None, lhs_value, rhs_value)?
            }
            (Type::Matrix { .. }, Type::Vector(Float, _)) => {
                b.matrix_times_vector(result_type_id, None, lhs_value, rhs_value)?
            }
            (Type::Vector(Float, _), Type::Matrix { .. }) => {
                b.vector_times_matrix(result_type_id, None, lhs_value, rhs_value)?
            }
            (Type::Matrix { .. }, Type::Scalar(Float)) => {
                b.matrix_times_scalar(result_type_id, None, lhs_value, rhs_value)?
            }
            // The dedicated ops want the scalar on the right; swap.
            (Type::Scalar(Float), Type::Matrix { .. }) => {
                b.matrix_times_scalar(result_type_id, None, rhs_value, lhs_value)?
            }
            (Type::Vector(Float, _), Type::Scalar(Float)) => {
                b.vector_times_scalar(result_type_id, None, lhs_value, rhs_value)?
            }
            (Type::Scalar(Float), Type::Vector(Float, _)) => {
                b.vector_times_scalar(result_type_id, None, rhs_value, lhs_value)?
            }
            _ => return Ok(None),
        };
        Ok(Some(id))
    }

    fn maybe_decorate_exact(&mut self, id: Word, op: BinaryOp, operand_ty: &Type, precise: bool) {
        use BinaryOp::*;
        if precise
            && self.options.nocontraction_on_exact
            && operand_ty.scalar_kind() == Some(ScalarKind::Float)
            && matches!(op, Add | Sub | Mul | Div | Mod)
        {
            self.mb.builder.decorate(id, spirv::Decoration::NoContraction, []);
        }
    }

    /// Ternaries lower through a temporary and a structured conditional; the
    /// merge block loads the selected value.
    fn lower_ternary(
        &mut self,
        expr: &Expr,
        cond: &Expr,
        then_expr: &Expr,
        else_expr: &Expr,
    ) -> Result<AccessChain> {
        let result_type_id = self.mb.type_id(&expr.ty, BlockLayout::Unspecified);
        let temp = self.mb.declare_local(result_type_id, None)?;

        let cond_value = self.lower_expr_value(cond)?;
        let true_block = self.mb.fresh_id();
        let false_block = self.mb.fresh_id();
        let merge_block = self.mb.fresh_id();
        self.mb.selection_branch(cond_value, true_block, false_block, merge_block)?;

        self.mb.begin_block(true_block)?;
        let value = self.lower_expr_value(then_expr)?;
        self.mb.builder.store(temp, value, None, [])?;
        self.mb.branch(merge_block)?;

        self.mb.begin_block(false_block)?;
        let value = self.lower_expr_value(else_expr)?;
        self.mb.builder.store(temp, value, None, [])?;
        self.mb.branch(merge_block)?;

        self.mb.begin_block(merge_block)?;
        let result = self.mb.builder.load(result_type_id, None, temp, None, [])?;
        Ok(AccessChain::rvalue(result, result_type_id))
    }

    fn lower_call(
        &mut self,
        expr: &Expr,
        function: SymbolId,
        args: &[Expr],
    ) -> Result<AccessChain> {
        let info = self
            .functions
            .get(&function)
            .unwrap_or_else(|| panic!("BUG: call to undeclared function {:?}", function))
            .clone();
        assert!(
            info.params.len() == args.len(),
            "BUG: call passes {} arguments to a {}-parameter function",
            args.len(),
            info.params.len()
        );

        let mut chains: Vec<AccessChain> = Vec::with_capacity(args.len());
        for arg in args {
            chains.push(self.lower_expr(arg)?);
        }

        let mut call_args = Vec::with_capacity(args.len());
        // (argument index, temp variable, value type) of out/inout arguments
        // passed through a temporary; copied back after the call.
        let mut copy_backs: Vec<(usize, Word, Word)> = Vec::new();

        for (index, param) in info.params.iter().enumerate() {
            let chain = &mut chains[index];
            let value = if param.ty.is_opaque() {
                assert!(!chain.is_rvalue(), "BUG: opaque argument is not a memory object");
                chain.collapse(&mut self.mb)?
            } else {
                match param.qualifier {
                    ParamQualifier::In | ParamQualifier::Const => chain.load(&mut self.mb)?,
                    ParamQualifier::Out | ParamQualifier::InOut => {
                        if chain.is_unindexed_lvalue() {
                            chain.collapse(&mut self.mb)?
                        } else {
                            let temp = self.mb.declare_local(param.value_type_id, None)?;
                            if param.qualifier == ParamQualifier::InOut {
                                let current = chain.load(&mut self.mb)?;
                                self.mb.builder.store(temp, current, None, [])?;
                            }
                            copy_backs.push((index, temp, param.value_type_id));
                            temp
                        }
                    }
                }
            };
            call_args.push(value);
        }

        let result =
            self.mb.builder.function_call(info.return_type_id, None, info.id, call_args)?;

        for (index, temp, value_type_id) in copy_backs {
            let value = self.mb.builder.load(value_type_id, None, temp, None, [])?;
            chains[index].store(&mut self.mb, value)?;
        }

        let result_type_id = self.mb.type_id(&expr.ty, BlockLayout::Unspecified);
        Ok(AccessChain::rvalue(result, result_type_id))
    }

    fn lower_atomic(&mut self, expr: &Expr, op: AtomicOp, args: &[Expr]) -> Result<AccessChain> {
        assert!(args.len() >= 2, "BUG: atomic built-in with {} arguments", args.len());

        let mut pointer_chain = self.lower_expr(&args[0])?;
        assert!(!pointer_chain.is_rvalue(), "BUG: atomic operand is not a memory object");
        let pointer = pointer_chain.collapse(&mut self.mb)?;

        let mut values = Vec::with_capacity(args.len() - 1);
        for arg in &args[1..] {
            values.push(self.lower_expr_value(arg)?);
        }

        let result_type_id = self.mb.type_id(&expr.ty, BlockLayout::Unspecified);
        // Scope is Device and semantics Relaxed; the Vulkan memory model
        // extension is not enabled.
        let scope = self.mb.const_u32(spirv::Scope::Device as u32);
        let semantics = self.mb.const_u32(spirv::MemorySemantics::NONE.bits());
        let unsigned = args[0].ty.scalar_kind() == Some(ScalarKind::UInt);

        let b = &mut self.mb.builder;
        let id = match op {
            AtomicOp::Add => {
                b.atomic_i_add(result_type_id, None, pointer, scope, semantics, values[0])?
            }
            AtomicOp::Min => {
                if unsigned {
                    b.atomic_u_min(result_type_id, None, pointer, scope, semantics, values[0])?
                } else {
                    b.atomic_s_min(result_type_id, None, pointer, scope, semantics, values[0])?
                }
            }
            AtomicOp::Max => {
                if unsigned {
                    b.atomic_u_max(result_type_id, None, pointer, scope, semantics, values[0])?
                } else {
                    b.atomic_s_max(result_type_id, None, pointer, scope, semantics, values[0])?
                }
            }
            AtomicOp::And => {
                b.atomic_and(result_type_id, None, pointer, scope, semantics, values[0])?
            }
            AtomicOp::Or => {
                b.atomic_or(result_type_id, None, pointer, scope, semantics, values[0])?
            }
            AtomicOp::Xor => {
                b.atomic_xor(result_type_id, None, pointer, scope, semantics, values[0])?
            }
            AtomicOp::Exchange => {
                b.atomic_exchange(result_type_id, None, pointer, scope, semantics, values[0])?
            }
            AtomicOp::CompSwap => {
                assert!(values.len() == 2, "BUG: atomicCompSwap with {} value arguments", values.len());
                // The instruction takes (value, comparator); the source call
                // is (mem, compare, data), so the operands swap.
                b.atomic_compare_exchange(
                    result_type_id,
                    None,
                    pointer,
                    scope,
                    semantics,
                    semantics,
                    values[1],
                    values[0],
                )?
            }
        };
        Ok(AccessChain::rvalue(id, result_type_id))
    }

    /// Fold an expression into a constant id if it is one of the shapes the
    /// producer leaves constant: scalar literals and constructors applied to
    /// matching scalar literals.
    fn try_fold_constant(&mut self, expr: &Expr) -> Option<Word> {
        match &expr.kind {
            ExprKind::BoolConst(value) => Some(self.mb.const_bool(*value)),
            ExprKind::IntConst(value) => Some(self.mb.const_i32(*value)),
            ExprKind::UIntConst(value) => Some(self.mb.const_u32(*value)),
            ExprKind::FloatConst(value) => Some(self.mb.const_f32(*value)),
            ExprKind::Construct { args } => {
                let mut parts = Vec::with_capacity(args.len());
                for arg in args {
                    parts.push(self.try_fold_constant(arg)?);
                }
                match &expr.ty {
                    Type::Vector(kind, size) => {
                        if args.iter().any(|a| a.ty.scalar_kind() != Some(*kind) || !a.ty.is_scalar())
                        {
                            return None;
                        }
                        let type_id = self.mb.type_id(&expr.ty, BlockLayout::Unspecified);
                        if parts.len() == 1 {
                            let parts = vec![parts[0]; *size as usize];
                            Some(self.mb.const_composite(type_id, parts))
                        } else if parts.len() == *size as usize {
                            Some(self.mb.const_composite(type_id, parts))
                        } else {
                            None
                        }
                    }
                    Type::Array(_, len) if parts.len() == *len as usize => {
                        let type_id = self.mb.type_id(&expr.ty, BlockLayout::Unspecified);
                        Some(self.mb.const_composite(type_id, parts))
                    }
                    Type::Struct(def) if parts.len() == def.fields.len() => {
                        let type_id = self.mb.type_id(&expr.ty, BlockLayout::Unspecified);
                        Some(self.mb.const_composite(type_id, parts))
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    // =========================================================================
    // Entry point
    // =========================================================================

    fn emit_entry_point(&mut self) -> Result<()> {
        let module = self.module;
        let main = module
            .functions
            .iter()
            .find(|f| f.name == "main")
            .ok_or_else(|| err_spirv!("module has no main function"))?;
        assert!(
            main.params.is_empty() && main.return_type == Type::Void,
            "BUG: main must be void and take no parameters"
        );
        let main_id = self.functions.get(&main.symbol).expect("BUG: main not declared").id;

        let execution_model = match module.stage {
            Stage::Vertex => spirv::ExecutionModel::Vertex,
            Stage::Fragment => spirv::ExecutionModel::Fragment,
            Stage::Compute { .. } => spirv::ExecutionModel::GLCompute,
        };
        let interface: Vec<Word> = self.mb.interface().to_vec();
        self.mb.builder.entry_point(execution_model, main_id, "main", interface);

        match module.stage {
            Stage::Fragment => {
                self.mb
                    .builder
                    .execution_mode(main_id, spirv::ExecutionMode::OriginUpperLeft, []);
            }
            Stage::Compute { local_size: (x, y, z) } => {
                self.mb
                    .builder
                    .execution_mode(main_id, spirv::ExecutionMode::LocalSize, [x, y, z]);
            }
            Stage::Vertex => {}
        }
        Ok(())
    }
}

fn effective_layout(global: &GlobalVar) -> BlockLayout {
    if global.layout != BlockLayout::Unspecified {
        return global.layout;
    }
    match global.qualifier {
        GlobalQualifier::Uniform | GlobalQualifier::PushConstant => BlockLayout::Std140,
        GlobalQualifier::Buffer => BlockLayout::Std430,
        _ => BlockLayout::Unspecified,
    }
}

fn builtin_info(builtin: BuiltinVar) -> (&'static str, spirv::BuiltIn, Type, StorageClass) {
    use BuiltinVar::*;
    let float = Type::Scalar(ScalarKind::Float);
    let int = Type::Scalar(ScalarKind::Int);
    let uint = Type::Scalar(ScalarKind::UInt);
    let vec4 = Type::Vector(ScalarKind::Float, 4);
    let uvec3 = Type::Vector(ScalarKind::UInt, 3);
    match builtin {
        Position => ("gl_Position", spirv::BuiltIn::Position, vec4, StorageClass::Output),
        PointSize => ("gl_PointSize", spirv::BuiltIn::PointSize, float, StorageClass::Output),
        VertexIndex => ("gl_VertexIndex", spirv::BuiltIn::VertexIndex, int, StorageClass::Input),
        InstanceIndex => {
            ("gl_InstanceIndex", spirv::BuiltIn::InstanceIndex, int, StorageClass::Input)
        }
        FragCoord => ("gl_FragCoord", spirv::BuiltIn::FragCoord, vec4, StorageClass::Input),
        FrontFacing => (
            "gl_FrontFacing",
            spirv::BuiltIn::FrontFacing,
            Type::Scalar(ScalarKind::Bool),
            StorageClass::Input,
        ),
        FragDepth => ("gl_FragDepth", spirv::BuiltIn::FragDepth, float, StorageClass::Output),
        NumWorkgroups => {
            ("gl_NumWorkGroups", spirv::BuiltIn::NumWorkgroups, uvec3, StorageClass::Input)
        }
        WorkgroupId => ("gl_WorkGroupID", spirv::BuiltIn::WorkgroupId, uvec3, StorageClass::Input),
        LocalInvocationId => (
            "gl_LocalInvocationID",
            spirv::BuiltIn::LocalInvocationId,
            uvec3,
            StorageClass::Input,
        ),
        GlobalInvocationId => (
            "gl_GlobalInvocationID",
            spirv::BuiltIn::GlobalInvocationId,
            uvec3,
            StorageClass::Input,
        ),
        LocalInvocationIndex => (
            "gl_LocalInvocationIndex",
            spirv::BuiltIn::LocalInvocationIndex,
            uint,
            StorageClass::Input,
        ),
    }
}

fn collect_builtins_in_stmts(stmts: &[Stmt], out: &mut Vec<BuiltinVar>) {
    for stmt in stmts {
        match stmt {
            Stmt::Expr(expr) => collect_builtins_in_expr(expr, out),
            Stmt::Decl(decl) => {
                if let Some(init) = &decl.init {
                    collect_builtins_in_expr(init, out);
                }
            }
            Stmt::Block(inner) => collect_builtins_in_stmts(inner, out),
            Stmt::If { cond, then_branch, else_branch } => {
                collect_builtins_in_expr(cond, out);
                collect_builtins_in_stmts(then_branch, out);
                if let Some(else_branch) = else_branch {
                    collect_builtins_in_stmts(else_branch, out);
                }
            }
            Stmt::While { cond, body } | Stmt::DoWhile { body, cond } => {
                collect_builtins_in_expr(cond, out);
                collect_builtins_in_stmts(body, out);
            }
            Stmt::For { init, cond, update, body } => {
                if let Some(init) = init {
                    collect_builtins_in_stmts(std::slice::from_ref(init), out);
                }
                if let Some(cond) = cond {
                    collect_builtins_in_expr(cond, out);
                }
                if let Some(update) = update {
                    collect_builtins_in_expr(update, out);
                }
                collect_builtins_in_stmts(body, out);
            }
            Stmt::Switch { selector, cases } => {
                collect_builtins_in_expr(selector, out);
                for case in cases {
                    collect_builtins_in_stmts(&case.body, out);
                }
            }
            Stmt::Return(Some(expr)) => collect_builtins_in_expr(expr, out),
            Stmt::Return(None) | Stmt::Break | Stmt::Continue | Stmt::Discard => {}
        }
    }
}

fn collect_builtins_in_expr(expr: &Expr, out: &mut Vec<BuiltinVar>) {
    match &expr.kind {
        ExprKind::Builtin(builtin) => {
            if !out.contains(builtin) {
                out.push(*builtin);
            }
        }
        ExprKind::Unary { operand, .. } => collect_builtins_in_expr(operand, out),
        ExprKind::Binary { lhs, rhs, .. } => {
            collect_builtins_in_expr(lhs, out);
            collect_builtins_in_expr(rhs, out);
        }
        ExprKind::Ternary { cond, then_expr, else_expr } => {
            collect_builtins_in_expr(cond, out);
            collect_builtins_in_expr(then_expr, out);
            collect_builtins_in_expr(else_expr, out);
        }
        ExprKind::Index { base, index } => {
            collect_builtins_in_expr(base, out);
            collect_builtins_in_expr(index, out);
        }
        ExprKind::Field { base, .. } | ExprKind::Swizzle { base, .. } => {
            collect_builtins_in_expr(base, out);
        }
        ExprKind::Construct { args }
        | ExprKind::Call { args, .. }
        | ExprKind::Atomic { args, .. } => {
            for arg in args {
                collect_builtins_in_expr(arg, out);
            }
        }
        ExprKind::Assign { target, value } => {
            collect_builtins_in_expr(target, out);
            collect_builtins_in_expr(value, out);
        }
        ExprKind::Symbol(_)
        | ExprKind::BlockField { .. }
        | ExprKind::BoolConst(_)
        | ExprKind::IntConst(_)
        | ExprKind::UIntConst(_)
        | ExprKind::FloatConst(_) => {}
    }
}
