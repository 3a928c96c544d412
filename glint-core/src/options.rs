//! Compile options recognized by the code generator.

/// Target environment; decides the SPIR-V version word and which constructs
/// (storage-buffer storage class, full interface lists) are available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetEnv {
    Vulkan1_0,
    #[default]
    Vulkan1_1,
    Vulkan1_2,
}

impl TargetEnv {
    /// `(major, minor)` of the emitted SPIR-V version.
    pub fn spirv_version(self) -> (u8, u8) {
        match self {
            TargetEnv::Vulkan1_0 => (1, 0),
            TargetEnv::Vulkan1_1 => (1, 3),
            TargetEnv::Vulkan1_2 => (1, 5),
        }
    }
}

/// A flat set of compile options. Unknown option names are ignored, matching
/// the behavior callers expect when forwarding options wholesale.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub target_env: TargetEnv,
    /// Emit OpName/OpMemberName debug names.
    pub debug_info: bool,
    /// Decorate every shader output Invariant.
    pub invariant_all: bool,
    /// Decorate `precise`-marked arithmetic NoContraction.
    pub nocontraction_on_exact: bool,
    /// Decorate mediump/lowp declarations RelaxedPrecision.
    pub relaxed_precision: bool,
    /// Multiview view-index selection in the vertex stage. Recognized but
    /// not implemented for this AST contract.
    pub select_view_in_vertex: bool,
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a boolean option by name. Unknown names are ignored.
    pub fn set(&mut self, name: &str, enabled: bool) {
        match name {
            "debug-info" => self.debug_info = enabled,
            "invariant-all" => self.invariant_all = enabled,
            "nocontraction-on-exact" => self.nocontraction_on_exact = enabled,
            "relaxed-precision" => self.relaxed_precision = enabled,
            "select-view-in-vertex" => self.select_view_in_vertex = enabled,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_options_are_ignored() {
        let mut options = CompileOptions::new();
        options.set("no-such-option", true);
        options.set("debug-info", true);
        assert!(options.debug_info);
        assert!(!options.invariant_all);
    }

    #[test]
    fn target_versions() {
        assert_eq!(TargetEnv::Vulkan1_0.spirv_version(), (1, 0));
        assert_eq!(TargetEnv::Vulkan1_2.spirv_version(), (1, 5));
    }
}
