//! OTA 命令列の組み立て
//!
//! ファームウェアイメージを 256 バイトのブロックに分割し、
//! 末尾に confirm（と必要なら apply）の制御命令を付ける。

use alloc::vec;
use alloc::vec::Vec;

use crate::error::OtaError;
use crate::source::FirmwareSource;
use crate::{OTA_BLOCK_SIZE, OTA_CMD_APPLY_UPDATE, OTA_CMD_CONFIRM_UPDATE};

/// 1 回の write で送る OTA 命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaInstruction {
    /// イメージの一部（最大 256 バイト）
    DataBlock {
        /// ブロック番号（0 始まり）
        index: usize,
        data: Vec<u8>,
    },
    /// CRC 確認要求（0x31）
    ConfirmUpdate,
    /// 更新の適用（0x30）
    ApplyUpdate,
}

impl OtaInstruction {
    /// write するバイト列
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            OtaInstruction::DataBlock { data, .. } => data,
            OtaInstruction::ConfirmUpdate => &[OTA_CMD_CONFIRM_UPDATE],
            OtaInstruction::ApplyUpdate => &[OTA_CMD_APPLY_UPDATE],
        }
    }

    pub fn is_data_block(&self) -> bool {
        matches!(self, OtaInstruction::DataBlock { .. })
    }
}

/// OTA 命令列
///
/// 構築時に一度だけ作られ、以後変更されない。CRC 失敗時は先頭から再利用する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaUpdatePlan {
    instructions: Vec<OtaInstruction>,
    image_len: usize,
    factory_reset: bool,
}

impl OtaUpdatePlan {
    /// メモリ上のイメージから命令列を作る
    ///
    /// # 引数
    /// - `image`: ファームウェアイメージ
    /// - `should_factory_reset`: true なら末尾に apply 命令を付ける
    ///
    /// # エラー
    /// - `OtaError::EmptyImage`: イメージが空
    pub fn new(image: &[u8], should_factory_reset: bool) -> Result<Self, OtaError> {
        Self::from_source(image, should_factory_reset)
    }

    /// 読み出し元から命令列を作る
    ///
    /// # エラー
    /// - `OtaError::EmptyImage`: 長さ 0
    /// - `OtaError::Unreadable`: 宣言された長さまで読めなかった
    pub fn from_source<S>(source: &S, should_factory_reset: bool) -> Result<Self, OtaError>
    where
        S: FirmwareSource + ?Sized,
    {
        let image_len = source.len();
        if image_len == 0 {
            return Err(OtaError::EmptyImage);
        }

        let block_count = image_len.div_ceil(OTA_BLOCK_SIZE);
        let extra = if should_factory_reset { 2 } else { 1 };
        let mut instructions = Vec::with_capacity(block_count + extra);

        for index in 0..block_count {
            let offset = index * OTA_BLOCK_SIZE;
            let block_len = OTA_BLOCK_SIZE.min(image_len - offset);
            let data = read_block(source, offset, block_len)?;
            instructions.push(OtaInstruction::DataBlock { index, data });
        }

        instructions.push(OtaInstruction::ConfirmUpdate);
        if should_factory_reset {
            instructions.push(OtaInstruction::ApplyUpdate);
        }

        log::debug!(
            "ota plan: {} bytes -> {} blocks, factory_reset={}",
            image_len,
            block_count,
            should_factory_reset
        );

        Ok(OtaUpdatePlan {
            instructions,
            image_len,
            factory_reset: should_factory_reset,
        })
    }

    pub fn instructions(&self) -> &[OtaInstruction] {
        &self.instructions
    }

    pub fn get(&self, index: usize) -> Option<&OtaInstruction> {
        self.instructions.get(index)
    }

    /// 命令の総数（データブロック + 制御命令）
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// データブロック数（= ceil(image_len / 256)）
    pub fn data_block_count(&self) -> usize {
        self.image_len.div_ceil(OTA_BLOCK_SIZE)
    }

    pub fn image_len(&self) -> usize {
        self.image_len
    }

    /// apply 命令を計画に含んでいるか
    pub fn should_factory_reset(&self) -> bool {
        self.factory_reset
    }

    pub fn iter(&self) -> core::slice::Iter<'_, OtaInstruction> {
        self.instructions.iter()
    }
}

impl<'a> IntoIterator for &'a OtaUpdatePlan {
    type Item = &'a OtaInstruction;
    type IntoIter = core::slice::Iter<'a, OtaInstruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.instructions.iter()
    }
}

/// `offset` から `len` バイトを読み切る
fn read_block<S>(source: &S, offset: usize, len: usize) -> Result<Vec<u8>, OtaError>
where
    S: FirmwareSource + ?Sized,
{
    let mut data = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = source.read_at(offset + filled, &mut data[filled..])?;
        if n == 0 {
            return Err(OtaError::Unreadable {
                offset: offset + filled,
            });
        }
        filled += n;
    }
    Ok(data)
}
