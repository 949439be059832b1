//! BRSP モード・セキュリティレベル・モード交渉

use crate::error::SessionError;

/// BRSP の動作モード
///
/// 値はビットフィールド風の番号だが、同時に有効なのは 1 つだけ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum BrspMode {
    Idle = 0,
    /// デフォルト（トランスポート未接続時も Data）
    #[default]
    Data = 1,
    RemoteCommand = 2,
    FirmwareUpdate = 4,
}

impl BrspMode {
    /// 生の値からモードを判定する（0/1/2/4 以外は None）
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0 => Some(BrspMode::Idle),
            1 => Some(BrspMode::Data),
            2 => Some(BrspMode::RemoteCommand),
            4 => Some(BrspMode::FirmwareUpdate),
            _ => None,
        }
    }

    pub fn raw(self) -> u8 {
        self as u8
    }
}

/// BRSP サービスが強制するセキュリティレベル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityLevel {
    /// 0: なし
    None,
    /// 1: 認証なしペアリング + 暗号化
    UnauthenticatedEncrypted,
    /// 2: 認証付きペアリング + 暗号化
    AuthenticatedEncrypted,
    /// 99: 不明（0/1/2 以外の値もすべてここ）
    Unknown,
}

impl SecurityLevel {
    pub fn from_raw(value: u32) -> Self {
        match value {
            0 => SecurityLevel::None,
            1 => SecurityLevel::UnauthenticatedEncrypted,
            2 => SecurityLevel::AuthenticatedEncrypted,
            _ => SecurityLevel::Unknown,
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            SecurityLevel::None => 0,
            SecurityLevel::UnauthenticatedEncrypted => 1,
            SecurityLevel::AuthenticatedEncrypted => 2,
            SecurityLevel::Unknown => 99,
        }
    }
}

/// トランスポートが Open 時に報告する相手の能力
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub supports_data_mode: bool,
    pub supports_remote_command_mode: bool,
    pub supports_firmware_update_mode: bool,
    pub security_level: SecurityLevel,
    /// 1 回の write で送れる最大バイト数のヒント（None ならセッション設定値）
    pub max_write_len: Option<usize>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities {
            supports_data_mode: true,
            supports_remote_command_mode: false,
            supports_firmware_update_mode: false,
            security_level: SecurityLevel::Unknown,
            max_write_len: None,
        }
    }
}

/// 現在のモードと相手の能力を管理し、モード変更要求を検証する
///
/// モードは楽観的には更新しない。`request` で確認待ちにし、
/// 相手からの確認（`confirm`）で初めて切り替える。
#[derive(Debug, Clone)]
pub struct ModeNegotiator {
    /// 現在確定しているモード
    mode: BrspMode,
    /// 確認待ちのモード変更要求
    pending: Option<BrspMode>,
    /// 相手の能力
    capabilities: Capabilities,
}

impl ModeNegotiator {
    pub fn new() -> Self {
        ModeNegotiator {
            mode: BrspMode::Data,
            pending: None,
            capabilities: Capabilities::default(),
        }
    }

    pub fn mode(&self) -> BrspMode {
        self.mode
    }

    pub fn pending(&self) -> Option<BrspMode> {
        self.pending
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn set_capabilities(&mut self, capabilities: Capabilities) {
        self.capabilities = capabilities;
    }

    /// 相手がそのモードをサポートしているか
    pub fn supports(&self, mode: BrspMode) -> bool {
        match mode {
            BrspMode::Idle => true,
            BrspMode::Data => self.capabilities.supports_data_mode,
            BrspMode::RemoteCommand => self.capabilities.supports_remote_command_mode,
            BrspMode::FirmwareUpdate => self.capabilities.supports_firmware_update_mode,
        }
    }

    /// モード変更要求を検証し、確認待ちにする
    ///
    /// # エラー
    /// - `NotOpen`: セッションが Open でない
    /// - `Sending`: 送信中
    /// - `ModeChangePending`: 別の要求が確認待ち
    /// - `ModeNotSupported`: 相手が対象モードを広告していない
    pub fn request(
        &mut self,
        target: BrspMode,
        is_open: bool,
        is_sending: bool,
    ) -> Result<(), SessionError> {
        if !is_open {
            return Err(SessionError::NotOpen);
        }
        if is_sending {
            return Err(SessionError::Sending);
        }
        if let Some(pending) = self.pending {
            return Err(SessionError::ModeChangePending(pending));
        }
        if !self.supports(target) {
            return Err(SessionError::ModeNotSupported(target));
        }

        log::debug!("mode change requested: {:?} -> {:?}", self.mode, target);
        self.pending = Some(target);
        Ok(())
    }

    /// 相手からのモード通知を反映する
    ///
    /// 要求していないモード通知（相手側からの変更）も受け入れる。
    ///
    /// # 戻り値
    /// 観測者に通知すべきなら true（モードが変わった、または確認待ちが解決した）
    pub fn confirm(&mut self, mode: BrspMode) -> bool {
        let resolved = self.pending.take().is_some();
        let changed = self.mode != mode;
        self.mode = mode;
        if changed {
            log::debug!("mode changed to {:?}", mode);
        }
        changed || resolved
    }

    /// 確認待ちの要求を取り消す（close 時）
    pub fn cancel_pending(&mut self) {
        self.pending = None;
    }
}

impl Default for ModeNegotiator {
    fn default() -> Self {
        Self::new()
    }
}
