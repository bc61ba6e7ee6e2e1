//! Ошибки конвейера

use crate::matrix::Shape;
use crate::opencl::types::cl_int;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, ClError>;

/// Класс ошибки, не зависящий от деталей сообщения
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Discovery,
    Context,
    Compile,
    Allocation,
    Transfer,
    ArgumentBinding,
    Launch,
    Format,
    Io,
    UseAfterRelease,
    Load,
    KernelNotFound,
    ShapeMismatch,
    Config,
}

#[derive(Debug, thiserror::Error)]
pub enum ClError {
    #[error("{op} failed: {code}")]
    Discovery { op: &'static str, code: cl_int },

    #[error("OpenCL runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("{op} failed: {code}")]
    Context { op: &'static str, code: cl_int },

    /// Лог компилятора хранится без изменений
    #[error("{op} failed: {code}{}", build_log_section(.log))]
    Compile {
        op: &'static str,
        code: cl_int,
        log: Option<String>,
    },

    #[error("clCreateKernel failed: {code} (entry point `{name}`)")]
    KernelNotFound { name: String, code: cl_int },

    #[error("clCreateBuffer failed: {code} ({requested} bytes)")]
    Allocation { requested: usize, code: cl_int },

    #[error("{op} failed: {code}")]
    Transfer { op: &'static str, code: cl_int },

    #[error("{op} failed: host slice is {actual} bytes, buffer is {expected} bytes")]
    TransferSize {
        op: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{op} failed: a launched kernel has not retired")]
    Unretired { op: &'static str },

    #[error("clSetKernelArg {index} failed: {reason}")]
    ArgumentBinding { index: u32, reason: String },

    #[error("{op} failed: {code}")]
    Launch { op: &'static str, code: cl_int },

    #[error("{op} failed: buffer already released")]
    UseAfterRelease { op: &'static str },

    #[error("malformed matrix file {}: {reason}", path.display())]
    Format { path: PathBuf, reason: String },

    #[error("{what} shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch {
        what: String,
        expected: Shape,
        found: Shape,
    },

    #[error("I/O on {} failed: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("kernel source load failed: {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },
}

fn build_log_section(log: &Option<String>) -> String {
    match log {
        Some(log) => format!("\n--- build log ---\n{}", log),
        None => String::new(),
    }
}

impl ClError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClError::Discovery { .. } | ClError::RuntimeUnavailable(_) => ErrorKind::Discovery,
            ClError::Context { .. } => ErrorKind::Context,
            ClError::Compile { .. } => ErrorKind::Compile,
            ClError::KernelNotFound { .. } => ErrorKind::KernelNotFound,
            ClError::Allocation { .. } => ErrorKind::Allocation,
            ClError::Transfer { .. } | ClError::TransferSize { .. } | ClError::Unretired { .. } => {
                ErrorKind::Transfer
            }
            ClError::ArgumentBinding { .. } => ErrorKind::ArgumentBinding,
            ClError::Launch { .. } => ErrorKind::Launch,
            ClError::UseAfterRelease { .. } => ErrorKind::UseAfterRelease,
            ClError::Format { .. } => ErrorKind::Format,
            ClError::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
            ClError::Io { .. } => ErrorKind::Io,
            ClError::Load { .. } => ErrorKind::Load,
            ClError::Config { .. } => ErrorKind::Config,
        }
    }

    /// Код состояния OpenCL, если ошибка пришла из среды выполнения
    pub fn status_code(&self) -> Option<cl_int> {
        match self {
            ClError::Discovery { code, .. }
            | ClError::Context { code, .. }
            | ClError::Compile { code, .. }
            | ClError::KernelNotFound { code, .. }
            | ClError::Allocation { code, .. }
            | ClError::Transfer { code, .. }
            | ClError::Launch { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_errors_follow_operation_failed_format() {
        let err = ClError::Context {
            op: "clCreateContext",
            code: -33,
        };
        assert_eq!(err.to_string(), "clCreateContext failed: -33");
        assert_eq!(err.kind(), ErrorKind::Context);
        assert_eq!(err.status_code(), Some(-33));
    }

    #[test]
    fn compile_error_keeps_log_verbatim() {
        let log = "<source>:3:5: error: use of undeclared identifier 'x'\n    x = 1;\n    ^";
        let err = ClError::Compile {
            op: "clBuildProgram",
            code: -11,
            log: Some(log.to_string()),
        };
        assert!(err.to_string().starts_with("clBuildProgram failed: -11\n--- build log ---\n"));
        assert!(err.to_string().ends_with(log));
        assert_eq!(err.kind(), ErrorKind::Compile);
    }

    #[test]
    fn transfer_variants_share_kind() {
        let size = ClError::TransferSize {
            op: "clEnqueueWriteBuffer",
            expected: 16,
            actual: 12,
        };
        let pending = ClError::Unretired {
            op: "clEnqueueReadBuffer",
        };
        assert_eq!(size.kind(), ErrorKind::Transfer);
        assert_eq!(pending.kind(), ErrorKind::Transfer);
        assert_eq!(size.status_code(), None);
    }
}
