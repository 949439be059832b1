//! ファームウェアイメージの読み出し元

use alloc::vec::Vec;

use crate::error::OtaError;

/// 長さが既知のバイト列の読み出し元
///
/// ファイルシステム等へのアクセスは呼び出し側が実装する。
pub trait FirmwareSource {
    /// イメージ全体のバイト数
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `offset` から `buf` に読み出し、読めたバイト数を返す
    ///
    /// 0 を返した場合はそれ以上読めないものとして扱う。
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, OtaError>;
}

impl FirmwareSource for [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, OtaError> {
        let Some(rest) = self.get(offset..) else {
            return Err(OtaError::Unreadable { offset });
        };
        let n = buf.len().min(rest.len());
        buf[..n].copy_from_slice(&rest[..n]);
        Ok(n)
    }
}

impl FirmwareSource for Vec<u8> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, OtaError> {
        self.as_slice().read_at(offset, buf)
    }
}
