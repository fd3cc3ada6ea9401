//! 错误类型定义
//!
//! 提供 LFS 段管理操作的错误类型。
//!
//! 清理器协议中的 "暂未就绪" 结果（过期描述符、段忙、段已干净、等待超时）
//! 不属于错误，它们以普通返回值的形式出现，见 [`crate::cleaner`]。

use core::fmt;

/// LFS 操作错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// I/O 错误
    Io,
    /// 无效参数
    InvalidInput,
    /// 文件系统损坏
    Corrupted,
    /// 权限错误
    PermissionDenied,
    /// 文件不存在
    NotFound,
    /// 已存在
    AlreadyExists,
    /// 空间不足
    NoSpace,
    /// 不支持的操作
    Unsupported,
    /// 设备忙
    Busy,
    /// 无效状态
    InvalidState,
    /// 等待被信号打断
    Interrupted,
    /// 文件系统正在卸载
    Shutdown,
}

impl Error {
    /// 创建新错误
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    /// 获取错误类型
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取错误消息
    pub const fn message(&self) -> &'static str {
        self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result 类型别名
pub type Result<T> = core::result::Result<T, Error>;

/// 首个错误记录器
///
/// 截断和 markv 在遇到写错误时不能中途放弃：结构修改做了一半比报告一个错误更糟。
/// 它们把每一步的结果交给 `ErrorSlot`，继续处理剩余工作，最后返回遇到的第一个错误。
#[derive(Debug, Default)]
pub(crate) struct ErrorSlot {
    first: Option<Error>,
}

impl ErrorSlot {
    pub(crate) const fn new() -> Self {
        Self { first: None }
    }

    /// 记录一个结果，成功时取出值
    pub(crate) fn record<T>(&mut self, res: Result<T>) -> Option<T> {
        match res {
            Ok(v) => Some(v),
            Err(e) => {
                self.note(e);
                None
            }
        }
    }

    /// 记录一个错误（只保留第一个）
    pub(crate) fn note(&mut self, err: Error) {
        if self.first.is_none() {
            log::warn!("[ERR] first error recorded: {}", err);
            self.first = Some(err);
        }
    }

    pub(crate) fn is_err(&self) -> bool {
        self.first.is_some()
    }

    /// 合并另一个记录器
    pub(crate) fn absorb(&mut self, other: ErrorSlot) {
        if let Some(e) = other.first {
            self.note(e);
        }
    }

    /// 结束处理：有错误返回第一个错误，否则返回 `value`
    pub(crate) fn finish<T>(self, value: T) -> Result<T> {
        match self.first {
            Some(e) => Err(e),
            None => Ok(value),
        }
    }
}
