//! セッション設定

use serde::Deserialize;

use crate::error::SessionError;
use crate::{DEFAULT_BUFFER_SIZE, DEFAULT_MAX_WRITE_ATTEMPTS, DEFAULT_MAX_WRITE_LEN};

/// セッション構築時の設定
///
/// JSON で渡す場合、省略したフィールドはデフォルト値になる:
/// ```json
/// { "input_buffer_size": 4096, "output_buffer_size": 1024, "max_write_len": 20, "max_write_attempts": 3 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// 入力バッファ容量（バイト）
    pub input_buffer_size: usize,
    /// 出力バッファ容量（バイト）
    pub output_buffer_size: usize,
    /// 1 回の write で送る最大バイト数
    /// トランスポートが Open 時にヒントを返した場合はそちらを優先する
    pub max_write_len: usize,
    /// 同じ chunk の write を試す回数の上限（超えたら出力バッファを破棄）
    pub max_write_attempts: u32,
}

impl SessionConfig {
    pub fn with_buffer_sizes(input_buffer_size: usize, output_buffer_size: usize) -> Self {
        SessionConfig {
            input_buffer_size,
            output_buffer_size,
            ..Self::default()
        }
    }

    /// 設定値を検証する
    ///
    /// # エラー
    /// - いずれかのサイズが 0
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.input_buffer_size == 0 {
            return Err(SessionError::InvalidConfig("input_buffer_size must be > 0"));
        }
        if self.output_buffer_size == 0 {
            return Err(SessionError::InvalidConfig("output_buffer_size must be > 0"));
        }
        if self.max_write_len == 0 {
            return Err(SessionError::InvalidConfig("max_write_len must be > 0"));
        }
        if self.max_write_attempts == 0 {
            return Err(SessionError::InvalidConfig("max_write_attempts must be > 0"));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            input_buffer_size: DEFAULT_BUFFER_SIZE,
            output_buffer_size: DEFAULT_BUFFER_SIZE,
            max_write_len: DEFAULT_MAX_WRITE_LEN,
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
        }
    }
}
