//! # brsp-ota
//!
//! BRSP の OTA ファームウェア更新。
//!
//! ## 更新手順
//!
//! ```text
//! 1. セッションを FirmwareUpdate モードに切り替える
//! 2. 入力/出力バッファを flush する
//! 3. OtaUpdatePlan::new(image, reset) で命令列を作る
//!      [block 0 (256B)][block 1]...[block N-1 (端数)][0x31 confirm]([0x30 apply])
//! 4. 命令を 1 つずつ write し、毎回相手の応答を待つ
//!      データブロック → 0x2A (OTA_SYNC_CHAR) を待つ
//!      0x31 confirm  → 0x31 (CRC OK) / 0x30 (CRC FAIL → block 0 からやり直し)
//!      0x30 apply    → 相手が切断して更新を適用する（正常終了）
//! ```
//!
//! `OtaUpdatePlan` は I/O を行わない不変の命令列。
//! ハンドシェイクの順序は `OtaDriver` が守らせる（使わずに自前で回してもよい）。

#![no_std]
extern crate alloc;

pub mod driver;
mod error;
pub mod plan;
mod source;

pub use driver::{OtaDriver, OtaDriverConfig, OtaProgress, OtaState};
pub use error::{OtaError, OtaErrorKind};
pub use plan::{OtaInstruction, OtaUpdatePlan};
pub use source::FirmwareSource;

/// 相手が次のブロックを受け取れる（'*'）
pub const OTA_SYNC_CHAR: u8 = 0x2A;

/// 検証済みの更新を適用する。相手は切断する（'0'）
pub const OTA_CMD_APPLY_UPDATE: u8 = 0x30;

/// CRC 確認を要求する（'1'）
pub const OTA_CMD_CONFIRM_UPDATE: u8 = 0x31;

/// CRC 不一致。最初から再送する（'0'）
pub const OTA_CRC_FAIL: u8 = 0x30;

/// CRC 一致（'1'）
pub const OTA_CRC_OK: u8 = 0x31;

/// OTA データブロックのサイズ（固定）
pub const OTA_BLOCK_SIZE: usize = 256;
