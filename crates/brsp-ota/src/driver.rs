//! OTA ハンドシェイク状態機械
//!
//! `OtaUpdatePlan` を 1 命令ずつ再生し、相手からの同期バイト・CRC 結果を消費する。
//! I/O は行わない。呼び出し側が `next_instruction` の戻り値を write し、
//! 受信したバイトを `on_bytes` に渡す。

use crate::error::OtaError;
use crate::plan::{OtaInstruction, OtaUpdatePlan};
use crate::{OTA_CMD_APPLY_UPDATE, OTA_CRC_FAIL, OTA_CRC_OK, OTA_SYNC_CHAR};

/// CRC 不一致時の試行回数上限（初回を含む）
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// `OtaDriver` の設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaDriverConfig {
    /// 全体送信の試行回数上限（1 以上に丸める）
    pub max_attempts: u32,
}

impl Default for OtaDriverConfig {
    fn default() -> Self {
        OtaDriverConfig {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// OTA ドライバの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaState {
    /// 次の命令を送ってよい
    ReadyToSend,
    /// データブロック送信済み、0x2A 待ち
    AwaitingSync,
    /// confirm 送信済み、CRC 結果待ち
    AwaitingCrcResult,
    /// CRC 一致。apply は未送信（計画に含まれていない）
    Verified,
    /// apply 送信済み、相手の切断待ち
    AwaitingDisconnect,
    /// apply 後に切断された（正常終了）
    Complete,
    /// 失敗・中断
    Failed,
}

/// 進捗
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaProgress {
    /// 現在の試行で送信したデータブロック数
    pub blocks_sent: usize,
    pub total_blocks: usize,
    /// 試行番号（1 始まり）
    pub attempt: u32,
}

/// OTA 更新ドライバ
///
/// 一度に 1 命令しか送らせない。データブロックの後は同期バイト、
/// confirm の後は CRC 結果を受け取るまで `next_instruction` はエラーを返す。
#[derive(Debug, Clone)]
pub struct OtaDriver {
    plan: OtaUpdatePlan,
    config: OtaDriverConfig,
    state: OtaState,
    /// 次に送る命令の位置
    cursor: usize,
    attempt: u32,
    blocks_sent: usize,
    last_error: Option<OtaError>,
}

impl OtaDriver {
    pub fn new(plan: OtaUpdatePlan) -> Self {
        Self::with_config(plan, OtaDriverConfig::default())
    }

    pub fn with_config(plan: OtaUpdatePlan, config: OtaDriverConfig) -> Self {
        OtaDriver {
            plan,
            config: OtaDriverConfig {
                max_attempts: config.max_attempts.max(1),
            },
            state: OtaState::ReadyToSend,
            cursor: 0,
            attempt: 1,
            blocks_sent: 0,
            last_error: None,
        }
    }

    pub fn plan(&self) -> &OtaUpdatePlan {
        &self.plan
    }

    pub fn config(&self) -> &OtaDriverConfig {
        &self.config
    }

    pub fn state(&self) -> OtaState {
        self.state
    }

    pub fn last_error(&self) -> Option<&OtaError> {
        self.last_error.as_ref()
    }

    pub fn progress(&self) -> OtaProgress {
        OtaProgress {
            blocks_sent: self.blocks_sent,
            total_blocks: self.plan.data_block_count(),
            attempt: self.attempt,
        }
    }

    /// これ以上進めることがないか（Verified / Complete / Failed）
    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            OtaState::Verified | OtaState::Complete | OtaState::Failed
        )
    }

    /// 次に write する命令のバイト列を取り出す
    ///
    /// # エラー
    /// - `OtaError::ProtocolViolation`: ReadyToSend 以外で呼ばれた（状態は変えない）
    pub fn next_instruction(&mut self) -> Result<&[u8], OtaError> {
        if self.state != OtaState::ReadyToSend {
            return Err(OtaError::ProtocolViolation(
                "instruction requested before the previous one was acknowledged",
            ));
        }
        let index = self.cursor;
        let next_state = match self.plan.get(index) {
            Some(OtaInstruction::DataBlock { .. }) => {
                self.blocks_sent += 1;
                OtaState::AwaitingSync
            }
            Some(OtaInstruction::ConfirmUpdate) => OtaState::AwaitingCrcResult,
            Some(OtaInstruction::ApplyUpdate) => OtaState::AwaitingDisconnect,
            None => return Err(OtaError::ProtocolViolation("plan already exhausted")),
        };
        self.cursor += 1;
        self.transition(next_state);

        log::trace!("ota instruction {}/{}", index + 1, self.plan.len());
        Ok(self.plan.instructions()[index].as_bytes())
    }

    /// `next_instruction` が返すはずのバイト列を、状態を変えずに返す
    ///
    /// ReadyToSend 以外では None。書き込み先の空き容量を先に確かめる用途。
    pub fn peek_instruction(&self) -> Option<&[u8]> {
        if self.state != OtaState::ReadyToSend {
            return None;
        }
        self.plan.get(self.cursor).map(OtaInstruction::as_bytes)
    }

    /// CRC 一致後、計画に含まれていない apply 命令を送る
    ///
    /// # エラー
    /// - `OtaError::ProtocolViolation`: Verified 以外で呼ばれた
    pub fn apply_update(&mut self) -> Result<&'static [u8], OtaError> {
        if self.state != OtaState::Verified {
            return Err(OtaError::ProtocolViolation(
                "apply requested before CRC confirmation",
            ));
        }
        self.transition(OtaState::AwaitingDisconnect);
        Ok(&[OTA_CMD_APPLY_UPDATE])
    }

    /// 1 バイトを処理する
    pub fn on_byte(&mut self, byte: u8) -> Result<(), OtaError> {
        self.on_bytes(&[byte]).map(|_| ())
    }

    /// 受信バイト列を処理し、消費したバイト数を返す
    ///
    /// 待っていた応答を受け取った時点で処理を止める。残りは次の命令の応答として
    /// 扱われるので、呼び出し側は消費分だけ入力バッファから捨てる。
    ///
    /// # エラー
    /// - `OtaError::UnexpectedResponse`: CRC 結果待ちで想定外のバイト
    /// - `OtaError::RetriesExhausted`: CRC 不一致が上限に達した
    /// - `OtaError::ProtocolViolation`: apply 後に CRC FAIL を受信した
    pub fn on_bytes(&mut self, bytes: &[u8]) -> Result<usize, OtaError> {
        let mut consumed = 0;
        for &byte in bytes {
            match self.state {
                OtaState::ReadyToSend => {
                    log::warn!("ota: ignoring stray byte 0x{:02X}", byte);
                }
                OtaState::AwaitingSync => {
                    if byte == OTA_SYNC_CHAR {
                        self.transition(OtaState::ReadyToSend);
                        return Ok(consumed + 1);
                    }
                    log::trace!("ota: skipping 0x{:02X} while awaiting sync", byte);
                }
                OtaState::AwaitingCrcResult => match byte {
                    OTA_CRC_OK => {
                        self.on_crc_ok();
                        return Ok(consumed + 1);
                    }
                    OTA_CRC_FAIL => {
                        self.on_crc_fail()?;
                        return Ok(consumed + 1);
                    }
                    OTA_SYNC_CHAR => {}
                    other => return Err(self.fail(OtaError::UnexpectedResponse(other))),
                },
                OtaState::AwaitingDisconnect => {
                    if byte == OTA_CRC_FAIL {
                        return Err(self.fail(OtaError::ProtocolViolation(
                            "CRC failure reported after apply",
                        )));
                    }
                }
                OtaState::Verified | OtaState::Complete | OtaState::Failed => {
                    return Ok(consumed);
                }
            }
            consumed += 1;
        }
        Ok(consumed)
    }

    /// リンク切断を通知する
    ///
    /// apply 後の切断は正常終了。Verified のままの切断は検証済みとして扱う。
    ///
    /// # エラー
    /// - `OtaError::Abandoned`: 更新途中で切断された
    pub fn on_disconnected(&mut self) -> Result<(), OtaError> {
        match self.state {
            OtaState::AwaitingDisconnect => {
                self.transition(OtaState::Complete);
                Ok(())
            }
            OtaState::Verified | OtaState::Complete => Ok(()),
            OtaState::Failed => Err(self.last_error.clone().unwrap_or(OtaError::Abandoned)),
            _ => Err(self.fail(OtaError::Abandoned)),
        }
    }

    /// 呼び出し側の都合で中断する（close 時など）
    pub fn abandon(&mut self) {
        if !self.is_finished() {
            self.fail(OtaError::Abandoned);
        }
    }

    // ===== Private メソッド =====

    fn on_crc_ok(&mut self) {
        match self.plan.get(self.cursor) {
            Some(OtaInstruction::ApplyUpdate) => self.transition(OtaState::ReadyToSend),
            _ => self.transition(OtaState::Verified),
        }
    }

    fn on_crc_fail(&mut self) -> Result<(), OtaError> {
        if self.attempt >= self.config.max_attempts {
            return Err(self.fail(OtaError::RetriesExhausted(self.attempt)));
        }
        log::warn!(
            "ota: CRC check failed on attempt {}, restarting from block 0",
            self.attempt
        );
        self.attempt += 1;
        self.cursor = 0;
        self.blocks_sent = 0;
        self.transition(OtaState::ReadyToSend);
        Ok(())
    }

    fn fail(&mut self, error: OtaError) -> OtaError {
        log::warn!("ota failed in {:?}: {}", self.state, error);
        self.state = OtaState::Failed;
        self.last_error = Some(error.clone());
        error
    }

    fn transition(&mut self, next: OtaState) {
        if self.state != next {
            log::debug!("ota state {:?} -> {:?}", self.state, next);
        }
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn driver(len: usize, reset: bool) -> OtaDriver {
        let image: Vec<u8> = (0..len).map(|i| i as u8).collect();
        OtaDriver::new(OtaUpdatePlan::new(&image, reset).unwrap())
    }

    /// データブロックをすべて送り、confirm を送った状態まで進める
    fn send_all_blocks(d: &mut OtaDriver) {
        for _ in 0..d.plan().data_block_count() {
            assert_eq!(d.state(), OtaState::ReadyToSend);
            d.next_instruction().unwrap();
            assert_eq!(d.on_bytes(&[OTA_SYNC_CHAR]), Ok(1));
        }
        assert_eq!(d.next_instruction().unwrap(), &[0x31]);
        assert_eq!(d.state(), OtaState::AwaitingCrcResult);
    }

    #[test]
    fn test_full_update_with_reset() {
        let mut d = driver(600, true);
        send_all_blocks(&mut d);

        d.on_byte(OTA_CRC_OK).unwrap();
        assert_eq!(d.state(), OtaState::ReadyToSend);
        assert_eq!(d.next_instruction().unwrap(), &[0x30]);
        assert_eq!(d.state(), OtaState::AwaitingDisconnect);

        assert!(d.on_disconnected().is_ok());
        assert_eq!(d.state(), OtaState::Complete);
        assert!(d.is_finished());
    }

    #[test]
    fn test_send_before_sync_is_violation() {
        let mut d = driver(600, false);
        d.next_instruction().unwrap();

        assert!(matches!(
            d.next_instruction(),
            Err(OtaError::ProtocolViolation(_))
        ));
        // 呼び出し側の誤りなので更新自体は続行できる
        assert_eq!(d.state(), OtaState::AwaitingSync);
        d.on_byte(OTA_SYNC_CHAR).unwrap();
        assert!(d.next_instruction().is_ok());
    }

    #[test]
    fn test_noise_before_sync_is_consumed() {
        let mut d = driver(300, false);
        d.next_instruction().unwrap();

        // 同期バイトまで消費し、その後ろは残す
        assert_eq!(d.on_bytes(&[0x00, 0x41, OTA_SYNC_CHAR, OTA_SYNC_CHAR]), Ok(3));
        assert_eq!(d.state(), OtaState::ReadyToSend);
        assert_eq!(d.progress().blocks_sent, 1);
    }

    #[test]
    fn test_crc_fail_restarts_from_block_zero() {
        let mut d = driver(600, true);
        send_all_blocks(&mut d);

        d.on_byte(OTA_CRC_FAIL).unwrap();
        assert_eq!(d.state(), OtaState::ReadyToSend);
        assert_eq!(
            d.progress(),
            OtaProgress { blocks_sent: 0, total_blocks: 3, attempt: 2 }
        );

        let first = d.next_instruction().unwrap().to_vec();
        assert_eq!(first.as_slice(), d.plan().get(0).unwrap().as_bytes());
    }

    #[test]
    fn test_retries_exhausted() {
        let mut d = OtaDriver::with_config(
            OtaUpdatePlan::new(&[1, 2, 3], false).unwrap(),
            OtaDriverConfig { max_attempts: 2 },
        );

        send_all_blocks(&mut d);
        d.on_byte(OTA_CRC_FAIL).unwrap();
        send_all_blocks(&mut d);
        assert_eq!(d.on_byte(OTA_CRC_FAIL), Err(OtaError::RetriesExhausted(2)));
        assert_eq!(d.state(), OtaState::Failed);
        assert_eq!(d.last_error(), Some(&OtaError::RetriesExhausted(2)));
    }

    #[test]
    fn test_unexpected_crc_response() {
        let mut d = driver(10, false);
        send_all_blocks(&mut d);

        // 同期バイトの取りこぼしは無視
        assert_eq!(d.on_bytes(&[OTA_SYNC_CHAR]), Ok(1));
        assert_eq!(d.on_byte(0x7F), Err(OtaError::UnexpectedResponse(0x7F)));
        assert_eq!(d.state(), OtaState::Failed);
        assert_eq!(d.last_error().map(OtaError::kind), Some(crate::OtaErrorKind::Protocol));
    }

    #[test]
    fn test_separate_apply_after_verify() {
        let mut d = driver(10, false);
        send_all_blocks(&mut d);

        assert!(matches!(d.apply_update(), Err(OtaError::ProtocolViolation(_))));
        assert_eq!(d.state(), OtaState::AwaitingCrcResult);
        d.on_byte(OTA_CRC_OK).unwrap();
        assert_eq!(d.state(), OtaState::Verified);
        assert!(d.is_finished());

        assert_eq!(d.apply_update().unwrap(), &[OTA_CMD_APPLY_UPDATE]);
        assert_eq!(d.state(), OtaState::AwaitingDisconnect);
        d.on_disconnected().unwrap();
        assert_eq!(d.state(), OtaState::Complete);
    }

    #[test]
    fn test_peek_instruction_does_not_advance() {
        let mut d = driver(300, false);
        let peeked = d.peek_instruction().unwrap().to_vec();
        assert_eq!(peeked.len(), 256);
        assert_eq!(d.state(), OtaState::ReadyToSend);

        assert_eq!(d.next_instruction().unwrap(), peeked.as_slice());
        assert!(d.peek_instruction().is_none(), "同期バイト待ちでは None");
    }

    #[test]
    fn test_apply_requires_verification() {
        let mut d = driver(10, false);
        assert!(matches!(d.apply_update(), Err(OtaError::ProtocolViolation(_))));
        assert_eq!(d.state(), OtaState::ReadyToSend);
    }

    #[test]
    fn test_crc_fail_after_apply_is_violation() {
        let mut d = driver(10, true);
        send_all_blocks(&mut d);
        d.on_byte(OTA_CRC_OK).unwrap();
        d.next_instruction().unwrap();

        assert!(matches!(
            d.on_byte(OTA_CRC_FAIL),
            Err(OtaError::ProtocolViolation(_))
        ));
        assert_eq!(d.state(), OtaState::Failed);
    }

    #[test]
    fn test_disconnect_mid_update_is_abandoned() {
        let mut d = driver(600, true);
        d.next_instruction().unwrap();

        assert_eq!(d.on_disconnected(), Err(OtaError::Abandoned));
        assert_eq!(d.state(), OtaState::Failed);
        assert_eq!(d.on_disconnected(), Err(OtaError::Abandoned));
    }

    #[test]
    fn test_abandon_is_noop_when_finished() {
        let mut d = driver(10, false);
        send_all_blocks(&mut d);
        d.on_byte(OTA_CRC_OK).unwrap();

        d.abandon();
        assert_eq!(d.state(), OtaState::Verified);
        assert!(d.last_error().is_none());
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        let plan = OtaUpdatePlan::new(&[0u8; 4], false).unwrap();
        let d = OtaDriver::with_config(plan, OtaDriverConfig { max_attempts: 0 });
        assert_eq!(d.config().max_attempts, 1);
    }
}
