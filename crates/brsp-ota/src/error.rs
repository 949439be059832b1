//! OTA エラー型

/// OTA エラーの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaErrorKind {
    /// イメージ自体の問題（空・読み出し不能）
    Image,
    /// 呼び出し側または相手のハンドシェイク違反
    Protocol,
    /// CRC 不一致の再試行上限
    Integrity,
    /// リンク切断による中断
    Link,
}

/// OTA 更新のエラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaError {
    /// ファームウェアイメージが空
    EmptyImage,
    /// イメージを読み切れなかった（`offset` で読み出しが途切れた）
    Unreadable { offset: usize },
    /// 呼び出し順序の違反（同期バイト前の送信、CRC 確認前の apply など）
    ProtocolViolation(&'static str),
    /// CRC 結果待ちで想定外のバイトを受信した
    UnexpectedResponse(u8),
    /// CRC 不一致が続き、試行回数の上限に達した
    RetriesExhausted(u32),
    /// 更新途中で切断・close された
    Abandoned,
}

impl OtaError {
    pub fn kind(&self) -> OtaErrorKind {
        match self {
            OtaError::EmptyImage | OtaError::Unreadable { .. } => OtaErrorKind::Image,
            OtaError::ProtocolViolation(_) | OtaError::UnexpectedResponse(_) => {
                OtaErrorKind::Protocol
            }
            OtaError::RetriesExhausted(_) => OtaErrorKind::Integrity,
            OtaError::Abandoned => OtaErrorKind::Link,
        }
    }
}

impl core::fmt::Display for OtaError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            OtaError::EmptyImage => write!(f, "Firmware image is empty"),
            OtaError::Unreadable { offset } => {
                write!(f, "Firmware image unreadable at offset {}", offset)
            }
            OtaError::ProtocolViolation(what) => write!(f, "OTA protocol violation: {}", what),
            OtaError::UnexpectedResponse(b) => {
                write!(f, "Unexpected OTA response byte 0x{:02X}", b)
            }
            OtaError::RetriesExhausted(n) => {
                write!(f, "OTA CRC check failed {} times, giving up", n)
            }
            OtaError::Abandoned => write!(f, "OTA update abandoned: link closed before completion"),
        }
    }
}
