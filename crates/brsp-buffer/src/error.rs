//! リングバッファのエラー型

/// リングバッファ操作のエラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// 書き込みが空き容量を超えた
    ///
    /// `accepted` バイトは格納済み。残り `rejected` バイトは破棄された。
    Overflow { accepted: usize, rejected: usize },
    /// 全量書き込みに必要な空き容量がない（何も格納していない）
    InsufficientSpace { requested: usize, available: usize },
}

impl core::fmt::Display for BufferError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BufferError::Overflow { accepted, rejected } => write!(
                f,
                "Buffer overflow: accepted {} bytes, rejected {} bytes",
                accepted, rejected
            ),
            BufferError::InsufficientSpace { requested, available } => write!(
                f,
                "Insufficient buffer space: requested {} bytes, {} available",
                requested, available
            ),
        }
    }
}
