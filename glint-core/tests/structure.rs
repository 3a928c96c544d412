//! Structural properties that must hold for every emitted module: block
//! termination, id uniqueness and bounds, determinism, and header/entry
//! metadata.

use glint_core::ast::*;
use glint_core::{emit, CompileOptions, TargetEnv};
use rspirv::binary::parse_words;
use rspirv::dr::{self, Loader};
use rspirv::spirv::Op;

fn float() -> Type {
    Type::Scalar(ScalarKind::Float)
}

fn int() -> Type {
    Type::Scalar(ScalarKind::Int)
}

fn uint() -> Type {
    Type::Scalar(ScalarKind::UInt)
}

fn vec4() -> Type {
    Type::Vector(ScalarKind::Float, 4)
}

fn expr(ty: Type, kind: ExprKind) -> Expr {
    Expr { ty, kind }
}

fn sym(ty: Type, id: u32) -> Expr {
    expr(ty, ExprKind::Symbol(SymbolId(id)))
}

fn assign(target: Expr, value: Expr) -> Stmt {
    let ty = value.ty.clone();
    Stmt::Expr(expr(
        ty,
        ExprKind::Assign { target: Box::new(target), value: Box::new(value) },
    ))
}

fn local(id: u32, name: &str, ty: Type, init: Option<Expr>) -> Stmt {
    Stmt::Decl(LocalDecl {
        symbol: SymbolId(id),
        name: name.to_string(),
        ty,
        precision: Precision::Default,
        is_const: false,
        init,
    })
}

fn io_var(id: u32, name: &str, ty: Type, qualifier: GlobalQualifier, location: u32) -> GlobalVar {
    GlobalVar {
        symbol: SymbolId(id),
        name: name.to_string(),
        ty,
        qualifier,
        layout: BlockLayout::Unspecified,
        set: None,
        binding: None,
        location: Some(location),
        precision: Precision::Default,
        invariant: false,
        unnamed_block: false,
        init: None,
    }
}

fn main_fn(body: Vec<Stmt>) -> Function {
    Function {
        symbol: SymbolId(999),
        name: "main".to_string(),
        return_type: Type::Void,
        params: Vec::new(),
        body,
    }
}

/// A small corpus covering interface variables, control flow, calls with
/// out-parameters, atomics and built-ins.
fn corpus() -> Vec<(&'static str, Module)> {
    let passthrough = Module {
        stage: Stage::Vertex,
        globals: vec![
            io_var(1, "position", vec4(), GlobalQualifier::Input, 0),
            io_var(2, "color", vec4(), GlobalQualifier::Output, 0),
        ],
        functions: vec![main_fn(vec![assign(sym(vec4(), 2), sym(vec4(), 1))])],
    };

    let control_flow = {
        let less = expr(
            Type::Scalar(ScalarKind::Bool),
            ExprKind::Binary {
                op: BinaryOp::LessThan,
                lhs: Box::new(sym(int(), 1)),
                rhs: Box::new(expr(int(), ExprKind::IntConst(8))),
                precise: false,
            },
        );
        let add = expr(
            int(),
            ExprKind::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(sym(int(), 1)),
                rhs: Box::new(expr(int(), ExprKind::IntConst(1))),
                precise: false,
            },
        );
        let body = vec![
            Stmt::If {
                cond: expr(Type::Scalar(ScalarKind::Bool), ExprKind::BoolConst(true)),
                then_branch: vec![Stmt::Continue],
                else_branch: Some(vec![Stmt::Break]),
            },
            assign(sym(int(), 1), add),
        ];
        Module {
            stage: Stage::Fragment,
            globals: vec![],
            functions: vec![main_fn(vec![
                local(1, "i", int(), Some(expr(int(), ExprKind::IntConst(0)))),
                Stmt::While { cond: less, body },
                Stmt::Discard,
            ])],
        }
    };

    let out_call = {
        let callee = Function {
            symbol: SymbolId(100),
            name: "next".to_string(),
            return_type: Type::Void,
            params: vec![Param {
                symbol: SymbolId(101),
                name: "value".to_string(),
                ty: float(),
                qualifier: ParamQualifier::Out,
            }],
            body: vec![assign(sym(float(), 101), expr(float(), ExprKind::FloatConst(0.5)))],
        };
        let call = expr(
            Type::Void,
            ExprKind::Call { function: SymbolId(100), args: vec![sym(float(), 1)] },
        );
        Module {
            stage: Stage::Fragment,
            globals: vec![],
            functions: vec![
                callee,
                main_fn(vec![local(1, "x", float(), None), Stmt::Expr(call)]),
            ],
        }
    };

    let compute = {
        let counter = GlobalVar {
            symbol: SymbolId(1),
            name: "counter".to_string(),
            ty: uint(),
            qualifier: GlobalQualifier::Shared,
            layout: BlockLayout::Unspecified,
            set: None,
            binding: None,
            location: None,
            precision: Precision::Default,
            invariant: false,
            unnamed_block: false,
            init: None,
        };
        let invocation = expr(
            Type::Vector(ScalarKind::UInt, 3),
            ExprKind::Builtin(BuiltinVar::GlobalInvocationId),
        );
        let x = expr(
            uint(),
            ExprKind::Swizzle { base: Box::new(invocation), components: vec![0] },
        );
        let add = expr(
            uint(),
            ExprKind::Atomic { op: AtomicOp::Add, args: vec![sym(uint(), 1), x] },
        );
        Module {
            stage: Stage::Compute { local_size: (64, 1, 1) },
            globals: vec![counter],
            functions: vec![main_fn(vec![Stmt::Expr(add)])],
        }
    };

    vec![
        ("passthrough", passthrough),
        ("control_flow", control_flow),
        ("out_call", out_call),
        ("compute", compute),
    ]
}

fn parse(words: &[u32]) -> dr::Module {
    let mut loader = Loader::new();
    parse_words(words, &mut loader).expect("emitted SPIR-V failed to parse");
    loader.module()
}

fn is_terminator(op: Op) -> bool {
    matches!(
        op,
        Op::Branch
            | Op::BranchConditional
            | Op::Switch
            | Op::Return
            | Op::ReturnValue
            | Op::Kill
            | Op::Unreachable
    )
}

#[test]
fn every_block_ends_with_exactly_one_terminator() {
    for (name, module) in corpus() {
        let parsed = parse(&emit(&module, &CompileOptions::new()).unwrap());
        for function in &parsed.functions {
            assert!(!function.blocks.is_empty(), "{}: function without blocks", name);
            for block in &function.blocks {
                let last = block
                    .instructions
                    .last()
                    .unwrap_or_else(|| panic!("{}: empty block", name));
                assert!(
                    is_terminator(last.class.opcode),
                    "{}: block ends with {:?}",
                    name,
                    last.class.opcode
                );
                let interior_terminators = block.instructions[..block.instructions.len() - 1]
                    .iter()
                    .filter(|i| is_terminator(i.class.opcode))
                    .count();
                assert_eq!(interior_terminators, 0, "{}: terminator mid-block", name);
            }
        }
    }
}

#[test]
fn result_ids_are_unique_and_within_bound() {
    for (name, module) in corpus() {
        let words = emit(&module, &CompileOptions::new()).unwrap();
        let parsed = parse(&words);
        let bound = words[3];

        let mut seen = std::collections::HashSet::new();
        let mut check = |instruction: &dr::Instruction| {
            if let Some(id) = instruction.result_id {
                assert!(id < bound, "{}: id {} exceeds bound {}", name, id, bound);
                assert!(seen.insert(id), "{}: id {} defined twice", name, id);
            }
        };

        for instruction in &parsed.types_global_values {
            check(instruction);
        }
        for function in &parsed.functions {
            if let Some(def) = &function.def {
                check(def);
            }
            for parameter in &function.parameters {
                check(parameter);
            }
            for block in &function.blocks {
                if let Some(label) = &block.label {
                    check(label);
                }
                for instruction in &block.instructions {
                    check(instruction);
                }
            }
        }
    }
}

#[test]
fn emission_is_deterministic_across_the_corpus() {
    for (name, module) in corpus() {
        let options = CompileOptions::new();
        let first = emit(&module, &options).unwrap();
        let second = emit(&module, &options).unwrap();
        assert_eq!(first, second, "{}: non-deterministic output", name);
    }
}

#[test]
fn header_version_tracks_target_env() {
    let module = Module {
        stage: Stage::Fragment,
        globals: vec![],
        functions: vec![main_fn(vec![])],
    };
    for (env, word) in [
        (TargetEnv::Vulkan1_0, 0x0001_0000u32),
        (TargetEnv::Vulkan1_1, 0x0001_0300),
        (TargetEnv::Vulkan1_2, 0x0001_0500),
    ] {
        let mut options = CompileOptions::new();
        options.target_env = env;
        let words = emit(&module, &options).unwrap();
        assert_eq!(words[0], 0x0723_0203);
        assert_eq!(words[1], word);
    }
}

#[test]
fn entry_point_matches_stage() {
    use rspirv::dr::Operand;
    use rspirv::spirv::ExecutionModel;

    for (name, module) in corpus() {
        let parsed = parse(&emit(&module, &CompileOptions::new()).unwrap());
        assert_eq!(parsed.entry_points.len(), 1, "{}", name);
        let entry = &parsed.entry_points[0];
        let model = match &entry.operands[0] {
            Operand::ExecutionModel(model) => *model,
            other => panic!("{}: unexpected operand {:?}", name, other),
        };
        let expected = match module.stage {
            Stage::Vertex => ExecutionModel::Vertex,
            Stage::Fragment => ExecutionModel::Fragment,
            Stage::Compute { .. } => ExecutionModel::GLCompute,
        };
        assert_eq!(model, expected, "{}", name);

        if matches!(module.stage, Stage::Compute { .. }) {
            assert!(parsed
                .execution_modes
                .iter()
                .any(|i| i.class.opcode == Op::ExecutionMode));
        }
    }
}
