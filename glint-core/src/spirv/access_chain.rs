//! Deferred addressing over SPIR-V memory objects and values.
//!
//! Every expression synthesizes one [`AccessChain`]: a base id plus a list
//! of deferred indexing operations. Pointer construction is delayed until a
//! load, a store, or a pass-by-reference demands it. That keeps pure rvalue
//! subtrees on the cheap `OpCompositeExtract` path (no temporary, no
//! pointer) while preserving lvalue semantics everywhere else:
//!
//! - `rvalue[2].field[1]`        → one `OpCompositeExtract`
//! - `rvalue[i]`                 → spill to a Function temp, then
//!   `OpAccessChain` + `OpLoad`
//! - `rvalue.yx`                 → `OpVectorShuffle`
//! - `rvalue.xyz[i]`             → `OpVectorShuffle` + `OpVectorExtractDynamic`
//! - `lvalue[i].field.x`         → one `OpAccessChain`, then `OpLoad`/`OpStore`
//! - `lvalue.yx = v`             → load vector, overwrite-shuffle, store

use rspirv::spirv::{StorageClass, Word};

use crate::ast::{BlockLayout, ScalarKind, Type};
use crate::error::Result;
use crate::spirv::ModuleBuilder;

/// One deferred index: either a literal (composite-extract compatible) or a
/// dynamic id.
#[derive(Debug, Clone, Copy)]
enum ChainIndex {
    Literal(u32),
    Dynamic(Word),
}

/// The synthesis record of one expression during traversal.
#[derive(Debug, Clone)]
pub(crate) struct AccessChain {
    /// The id this chain indexes into: a pointer for lvalues, a value for
    /// rvalues.
    base_id: Word,
    /// Type of `base_id`'s pointee/value; needed to spill rvalues.
    base_type_id: Word,
    indices: Vec<ChainIndex>,
    /// `None` marks an rvalue.
    storage_class: Option<StorageClass>,
    /// Buffer layout of the root memory object; selects the decorated
    /// SPIR-V types of intermediate nodes.
    layout: BlockLayout,
    /// Pending multi-component swizzle. A single-component swizzle is folded
    /// into `indices` as a literal instead.
    swizzle: Vec<u32>,
    /// Pending dynamic selection of one vector component.
    dynamic_component: Option<Word>,
    pre_swizzle_type_id: Word,
    post_swizzle_type_id: Option<Word>,
    post_dynamic_type_id: Option<Word>,
    all_indices_literal: bool,
    swizzled_vector_size: u32,
    /// Memoized `OpAccessChain`, once materialized.
    collapsed_id: Option<Word>,
}

impl AccessChain {
    pub fn rvalue(base_id: Word, type_id: Word) -> Self {
        AccessChain {
            base_id,
            base_type_id: type_id,
            indices: Vec::new(),
            storage_class: None,
            layout: BlockLayout::Unspecified,
            swizzle: Vec::new(),
            dynamic_component: None,
            pre_swizzle_type_id: type_id,
            post_swizzle_type_id: None,
            post_dynamic_type_id: None,
            all_indices_literal: true,
            swizzled_vector_size: 0,
            collapsed_id: None,
        }
    }

    pub fn lvalue(
        base_id: Word,
        type_id: Word,
        storage_class: StorageClass,
        layout: BlockLayout,
    ) -> Self {
        AccessChain {
            storage_class: Some(storage_class),
            layout,
            ..AccessChain::rvalue(base_id, type_id)
        }
    }

    pub fn is_rvalue(&self) -> bool {
        self.storage_class.is_none()
    }

    /// An lvalue whose base id is already a usable pointer: no indices, no
    /// pending swizzle, no dynamic component. Such arguments are passed to
    /// `out`/`inout`/opaque parameters without a temporary.
    pub fn is_unindexed_lvalue(&self) -> bool {
        !self.is_rvalue()
            && self.indices.is_empty()
            && self.swizzle.is_empty()
            && self.dynamic_component.is_none()
    }

    pub fn layout(&self) -> BlockLayout {
        self.layout
    }

    /// The type of the full expression this chain denotes.
    pub fn type_id(&self) -> Word {
        self.post_dynamic_type_id
            .or(self.post_swizzle_type_id)
            .unwrap_or(self.pre_swizzle_type_id)
    }

    fn assert_open(&self) {
        assert!(self.collapsed_id.is_none(), "BUG: index pushed after access chain collapse");
    }

    /// Append a dynamic index.
    pub fn push_index(&mut self, index: Word, new_type_id: Word) {
        self.assert_open();
        self.indices.push(ChainIndex::Dynamic(index));
        self.all_indices_literal = false;
        self.pre_swizzle_type_id = new_type_id;
    }

    /// Append a literal index (array element, struct field ordinal, or a
    /// folded single-component swizzle).
    pub fn push_literal(&mut self, index: u32, new_type_id: Word) {
        self.assert_open();
        self.indices.push(ChainIndex::Literal(index));
        self.pre_swizzle_type_id = new_type_id;
    }

    /// Record a swizzle. Multi-component swizzles need special treatment on
    /// load (vector shuffle) and store (overwrite shuffle), so they are kept
    /// pending rather than folded into the index list.
    pub fn push_swizzle(&mut self, components: &[u32], new_type_id: Word, vector_size: u32) {
        assert!(self.swizzle.is_empty(), "BUG: swizzle pushed over a pending swizzle");
        if components.len() == 1 {
            self.push_literal(components[0], new_type_id);
        } else {
            self.swizzle.extend_from_slice(components);
            self.post_swizzle_type_id = Some(new_type_id);
            self.swizzled_vector_size = vector_size;
        }
    }

    /// Record a dynamic selection of one vector component.
    pub fn push_dynamic_component(
        &mut self,
        mb: &mut ModuleBuilder,
        index: Word,
        new_type_id: Word,
    ) -> Result<()> {
        assert!(self.dynamic_component.is_none(), "BUG: second dynamic component pushed");

        if self.is_rvalue() && self.all_indices_literal {
            // Keep the dynamic component separate so OpCompositeExtract can
            // still handle the literal prefix; the vector extract is emitted
            // on load, after any pending swizzle is shuffled in.
            self.dynamic_component = Some(index);
            self.post_dynamic_type_id = Some(new_type_id);
            return Ok(());
        }

        let index = if self.swizzle.len() > 1 {
            // Fuse the pending swizzle and the dynamic selection into one
            // dynamic index: vec.ywxz[i] becomes the constant {1, 3, 0, 2}
            // indexed with i, and that index used on vec.
            let component_ids: Vec<Word> =
                self.swizzle.iter().map(|&c| mb.const_u32(c)).collect();
            let uvec_type = mb.type_id(
                &Type::Vector(ScalarKind::UInt, component_ids.len() as u8),
                BlockLayout::Unspecified,
            );
            let swizzle_const = mb.const_composite(uvec_type, component_ids);
            let uint_type = mb.u32_type;
            let fused = mb
                .builder
                .vector_extract_dynamic(uint_type, None, swizzle_const, index)?;
            self.swizzle.clear();
            self.post_swizzle_type_id = None;
            fused
        } else {
            index
        };

        self.push_index(index, new_type_id);
        Ok(())
    }

    /// Materialize the `OpAccessChain` for an lvalue. With no indices the
    /// base id already is the pointer.
    pub fn collapse(&mut self, mb: &mut ModuleBuilder) -> Result<Word> {
        let storage_class = self
            .storage_class
            .expect("BUG: access chain collapse on an rvalue");

        if let Some(id) = self.collapsed_id {
            return Ok(id);
        }
        if self.indices.is_empty() {
            self.collapsed_id = Some(self.base_id);
            return Ok(self.base_id);
        }

        let index_ids: Vec<Word> = self
            .indices
            .iter()
            .map(|index| match index {
                ChainIndex::Literal(n) => mb.const_u32(*n),
                ChainIndex::Dynamic(id) => *id,
            })
            .collect();

        let pointer_type = mb.pointer_type(storage_class, self.pre_swizzle_type_id);
        let id = mb
            .builder
            .access_chain(pointer_type, None, self.base_id, index_ids)?;
        self.collapsed_id = Some(id);
        Ok(id)
    }

    /// Read the value this chain denotes.
    pub fn load(&mut self, mb: &mut ModuleBuilder) -> Result<Word> {
        let mut result = self.base_id;

        if self.is_rvalue() {
            if !self.indices.is_empty() {
                if self.all_indices_literal {
                    let literals: Vec<u32> = self
                        .indices
                        .iter()
                        .map(|index| match index {
                            ChainIndex::Literal(n) => *n,
                            ChainIndex::Dynamic(_) => unreachable!("BUG: dynamic index in literal chain"),
                        })
                        .collect();
                    result = mb.builder.composite_extract(
                        self.pre_swizzle_type_id,
                        None,
                        result,
                        literals,
                    )?;
                } else {
                    // An access chain needs a memory object; spill the rvalue
                    // into a fresh Function temporary and retype the chain.
                    let temp = mb.declare_local(self.base_type_id, None)?;
                    mb.builder.store(temp, result, None, [])?;
                    self.base_id = temp;
                    self.storage_class = Some(StorageClass::Function);
                    self.layout = BlockLayout::Unspecified;

                    let pointer = self.collapse(mb)?;
                    result = mb.builder.load(self.pre_swizzle_type_id, None, pointer, None, [])?;
                }
            }
        } else {
            let pointer = self.collapse(mb)?;
            result = mb.builder.load(self.pre_swizzle_type_id, None, pointer, None, [])?;
        }

        if !self.swizzle.is_empty() {
            // Single-component swizzles were folded into the index list.
            assert!(self.swizzle.len() > 1, "BUG: single-component swizzle left pending");
            let post_type = self.post_swizzle_type_id.expect("BUG: missing post-swizzle type");
            result = mb.builder.vector_shuffle(
                post_type,
                None,
                result,
                result,
                self.swizzle.iter().copied().collect::<Vec<u32>>(),
            )?;
        }

        if let Some(index) = self.dynamic_component {
            let post_type = self
                .post_dynamic_type_id
                .expect("BUG: missing post-dynamic-component type");
            result = mb.builder.vector_extract_dynamic(post_type, None, result, index)?;
        }

        Ok(result)
    }

    /// Write `value` through this chain. Stores are only permitted on
    /// lvalues; a dynamic component is always folded into the chain for
    /// lvalues, so none can be pending here.
    pub fn store(&mut self, mb: &mut ModuleBuilder, value: Word) -> Result<()> {
        assert!(!self.is_rvalue(), "BUG: store through an rvalue");
        assert!(
            self.dynamic_component.is_none(),
            "BUG: store with an unfolded dynamic component"
        );
        assert!(self.swizzle.len() != 1, "BUG: single-component swizzle left pending");

        let pointer = self.collapse(mb)?;

        let value = if self.swizzle.is_empty() {
            value
        } else {
            // Overwrite the swizzled components: load the current vector,
            // then shuffle it with the value. The mask starts as the
            // identity over the destination vector and each swizzled
            // destination lane is redirected to read from the source. For
            //
            //     vec4 v;  v.zx = u;
            //
            // the mask {0, 1, 2, 3} becomes {4+1, 1, 4+0, 3}.
            let current =
                mb.builder.load(self.pre_swizzle_type_id, None, pointer, None, [])?;

            let mut mask: Vec<u32> = (0..self.swizzled_vector_size).collect();
            for (source_lane, &dest_lane) in self.swizzle.iter().enumerate() {
                mask[dest_lane as usize] = self.swizzled_vector_size + source_lane as u32;
            }

            mb.builder.vector_shuffle(
                self.pre_swizzle_type_id,
                None,
                current,
                value,
                mask,
            )?
        };

        mb.builder.store(pointer, value, None, [])?;
        Ok(())
    }
}
