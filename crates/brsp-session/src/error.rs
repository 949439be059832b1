//! セッション層のエラー型

use alloc::string::String;

use crate::mode::BrspMode;

/// トランスポート（GATT 層）から上がってきたエラー
///
/// 中身は解釈せず、そのまま観測者に転送する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    /// ホスト側のエラーコード（不明なら 0）
    pub code: i32,
    /// ホスト側のエラーメッセージ
    pub message: String,
}

impl TransportError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        TransportError {
            code,
            message: message.into(),
        }
    }
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Transport error {}: {}", self.code, self.message)
    }
}

/// エラーの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 現在の状態では実行できない操作
    State,
    /// バッファ容量超過
    Capacity,
    /// トランスポート由来
    Transport,
    /// UTF-8 デコード失敗
    Decode,
    /// 設定値が不正
    Config,
}

/// セッション操作のエラー
///
/// すべて呼び出し元への同期的な拒否として返る。セッションを壊すことはない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// セッションが Open でない
    NotOpen,
    /// 送信中のためモード変更できない
    Sending,
    /// 別のモード変更が確認待ち
    ModeChangePending(BrspMode),
    /// 相手がそのモードをサポートしていない
    ModeNotSupported(BrspMode),
    /// 未定義のモード値
    InvalidMode(u8),
    /// 出力バッファの空き容量不足（何も書き込んでいない）
    OutputCapacity { requested: usize, available: usize },
    /// 入力バッファ溢れ（`accepted` バイトは格納済み、`dropped` バイトは破棄）
    InputOverflow { accepted: usize, dropped: usize },
    /// UTF-8 として不正なバイト列（何も消費していない）
    InvalidUtf8 { valid_up_to: usize },
    /// 設定値が不正
    InvalidConfig(&'static str),
    /// 同じ chunk の write が上限回数失敗した（出力バッファの `dropped` バイトを破棄）
    WriteAttemptsExhausted { attempts: u32, dropped: usize },
    /// トランスポートから転送されたエラー
    Transport(TransportError),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::NotOpen
            | SessionError::Sending
            | SessionError::ModeChangePending(_)
            | SessionError::ModeNotSupported(_)
            | SessionError::InvalidMode(_) => ErrorKind::State,
            SessionError::OutputCapacity { .. } | SessionError::InputOverflow { .. } => {
                ErrorKind::Capacity
            }
            SessionError::InvalidUtf8 { .. } => ErrorKind::Decode,
            SessionError::InvalidConfig(_) => ErrorKind::Config,
            SessionError::Transport(_) | SessionError::WriteAttemptsExhausted { .. } => {
                ErrorKind::Transport
            }
        }
    }
}

impl core::fmt::Display for SessionError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SessionError::NotOpen => write!(f, "BRSP session is not open"),
            SessionError::Sending => {
                write!(f, "Operation not allowed while output is still sending")
            }
            SessionError::ModeChangePending(m) => {
                write!(f, "Mode change to {:?} is awaiting confirmation", m)
            }
            SessionError::ModeNotSupported(m) => {
                write!(f, "Peer does not support mode {:?}", m)
            }
            SessionError::InvalidMode(v) => write!(f, "Invalid BRSP mode value: {}", v),
            SessionError::OutputCapacity { requested, available } => write!(
                f,
                "Output buffer full: requested {} bytes, {} available",
                requested, available
            ),
            SessionError::InputOverflow { accepted, dropped } => write!(
                f,
                "Input buffer overflow: stored {} bytes, dropped {} bytes",
                accepted, dropped
            ),
            SessionError::InvalidUtf8 { valid_up_to } => {
                write!(f, "Invalid UTF-8 after {} bytes", valid_up_to)
            }
            SessionError::InvalidConfig(what) => write!(f, "Invalid session config: {}", what),
            SessionError::WriteAttemptsExhausted { attempts, dropped } => write!(
                f,
                "Write failed {} times, dropped {} buffered bytes",
                attempts, dropped
            ),
            SessionError::Transport(e) => write!(f, "{}", e),
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        SessionError::Transport(e)
    }
}
