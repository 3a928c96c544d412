use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("SPIR-V generation error: {0}")]
    Spirv(String),

    #[error("not yet implemented: {0}")]
    NotImplemented(String),

    #[error("SPIR-V builder error: {0}")]
    SpirvBuilder(#[from] rspirv::dr::Error),
}

pub type Result<T> = std::result::Result<T, CompilerError>;

/// Build a `CompilerError::Spirv` from a format string.
#[macro_export]
macro_rules! err_spirv {
    ($($arg:tt)*) => {
        $crate::error::CompilerError::Spirv(format!($($arg)*))
    };
}

/// Return early with a `CompilerError::Spirv`.
#[macro_export]
macro_rules! bail_spirv {
    ($($arg:tt)*) => {
        return Err($crate::err_spirv!($($arg)*))
    };
}
