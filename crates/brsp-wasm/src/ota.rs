//! OtaUpdater wasm-bindgen エクスポート
//!
//! `OtaDriver` をセッションの入出力バッファにつなぐ。
//! JS 側は `dataReceived` / `sendingChanged` イベントのたびに `pump()` を呼ぶだけでよい。

use alloc::format;
use alloc::string::String;

use wasm_bindgen::prelude::*;

use brsp_ota::{OtaDriver, OtaDriverConfig, OtaError, OtaState, OtaUpdatePlan};
use brsp_session::{BrspSession, SessionError};

use crate::client::BrspClient;

/// `pump` のエラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpError {
    /// ハンドシェイク違反・CRC 再試行上限など
    Ota(OtaError),
    /// 命令をセッションに書き込めなかった
    Session(SessionError),
}

impl core::fmt::Display for PumpError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PumpError::Ota(e) => write!(f, "{}", e),
            PumpError::Session(e) => write!(f, "{}", e),
        }
    }
}

impl From<OtaError> for PumpError {
    fn from(e: OtaError) -> Self {
        PumpError::Ota(e)
    }
}

impl From<SessionError> for PumpError {
    fn from(e: SessionError) -> Self {
        PumpError::Session(e)
    }
}

/// OTA を 1 歩進める
///
/// 1. 入力バッファの応答バイトをドライバに渡し、消費した分だけ捨てる
/// 2. 次の命令を送ってよければ出力バッファに積む
///
/// 命令の書き込みに失敗した場合はドライバを進めないので、後で再度呼べばよい。
///
/// # エラー
/// - `PumpError::Ota`: ドライバが失敗状態になった（入力バッファは破棄する）
/// - `PumpError::Session`: セッションが閉じている・出力バッファの空き不足
pub fn pump(driver: &mut OtaDriver, session: &BrspSession) -> Result<(), PumpError> {
    let inbound = session.peek_all_bytes();
    if !inbound.is_empty() {
        match driver.on_bytes(&inbound) {
            Ok(consumed) => {
                session.flush_input_bytes(consumed);
            }
            Err(e) => {
                session.flush_input_buffer();
                return Err(e.into());
            }
        }
    }

    if let Some(instruction) = driver.peek_instruction() {
        session.write_bytes(instruction)?;
        driver.next_instruction()?;
    }
    Ok(())
}

/// OTA ファームウェア更新
///
/// ## 使用方法（TypeScript）
///
/// ```typescript
/// client.changeMode(4);                       // FirmwareUpdate、modeChanged を待つ
/// client.flushInputBuffer();
/// client.flushOutputBuffer();
///
/// const ota = new OtaUpdater(image, true);
/// ota.pump(client);                           // 最初のブロックを積む
/// // dataReceived のたびに
/// ota.pump(client);
/// console.log(`${ota.blocksSent}/${ota.totalBlocks} (attempt ${ota.attempt})`);
/// // 切断されたら
/// ota.onDisconnected();                       // apply 後なら正常終了
/// ```
#[wasm_bindgen]
pub struct OtaUpdater {
    driver: OtaDriver,
}

#[wasm_bindgen]
impl OtaUpdater {
    /// # 引数
    /// - `image`: ファームウェアイメージ
    /// - `should_factory_reset`: CRC 一致後に apply まで自動で送るか
    /// - `max_attempts`: CRC 不一致時の試行回数上限（省略時 3）
    ///
    /// # エラー
    /// - イメージが空
    #[wasm_bindgen(constructor)]
    pub fn new(
        image: &[u8],
        should_factory_reset: bool,
        max_attempts: Option<u32>,
    ) -> Result<OtaUpdater, JsError> {
        let plan = OtaUpdatePlan::new(image, should_factory_reset).map_err(to_js_error)?;
        let mut config = OtaDriverConfig::default();
        if let Some(n) = max_attempts {
            config.max_attempts = n;
        }
        Ok(OtaUpdater {
            driver: OtaDriver::with_config(plan, config),
        })
    }

    /// Base64 文字列のイメージから生成する
    #[wasm_bindgen(js_name = "fromBase64")]
    pub fn from_base64(
        image_b64: &str,
        should_factory_reset: bool,
        max_attempts: Option<u32>,
    ) -> Result<OtaUpdater, JsError> {
        let image = crate::decode_firmware_base64(image_b64).map_err(|e| JsError::new(&e))?;
        Self::new(&image, should_factory_reset, max_attempts)
    }

    /// 応答を処理し、次の命令を送ってよければ積む
    ///
    /// # 戻り値
    /// これ以上 pump する必要がなければ true（検証済み・完了・失敗）
    #[wasm_bindgen]
    pub fn pump(&mut self, client: &BrspClient) -> Result<bool, JsError> {
        pump(&mut self.driver, &client.session)
            .map_err(|e| JsError::new(&format!("OTA failed: {}", e)))?;
        Ok(self.driver.is_finished())
    }

    /// 計画に apply を含めなかった場合に、CRC 一致後に apply を送る
    #[wasm_bindgen(js_name = "applyUpdate")]
    pub fn apply_update(&mut self, client: &BrspClient) -> Result<(), JsError> {
        if self.driver.state() != OtaState::Verified {
            return Err(to_js_error(OtaError::ProtocolViolation(
                "apply requested before CRC confirmation",
            )));
        }
        client
            .session
            .write_bytes(&[brsp_ota::OTA_CMD_APPLY_UPDATE])
            .map_err(|e| JsError::new(&format!("{}", e)))?;
        self.driver.apply_update().map_err(to_js_error)?;
        Ok(())
    }

    /// リンクが切断された
    ///
    /// # エラー
    /// - apply 前の切断（更新は中断扱い）
    #[wasm_bindgen(js_name = "onDisconnected")]
    pub fn on_disconnected(&mut self) -> Result<(), JsError> {
        self.driver.on_disconnected().map_err(to_js_error)
    }

    /// 更新を中断する（close 前に呼ぶ）
    #[wasm_bindgen]
    pub fn abandon(&mut self) {
        self.driver.abandon();
    }

    /// `"readyToSend" | "awaitingSync" | "awaitingCrcResult" | "verified"
    ///  | "awaitingDisconnect" | "complete" | "failed"`
    #[wasm_bindgen(getter)]
    pub fn state(&self) -> String {
        state_name(self.driver.state()).into()
    }

    #[wasm_bindgen(getter, js_name = "blocksSent")]
    pub fn blocks_sent(&self) -> u32 {
        self.driver.progress().blocks_sent as u32
    }

    #[wasm_bindgen(getter, js_name = "totalBlocks")]
    pub fn total_blocks(&self) -> u32 {
        self.driver.progress().total_blocks as u32
    }

    #[wasm_bindgen(getter)]
    pub fn attempt(&self) -> u32 {
        self.driver.progress().attempt
    }

    #[wasm_bindgen(getter, js_name = "isFinished")]
    pub fn is_finished(&self) -> bool {
        self.driver.is_finished()
    }

    /// 失敗していればその理由
    #[wasm_bindgen(getter, js_name = "lastError")]
    pub fn last_error(&self) -> Option<String> {
        self.driver.last_error().map(|e| format!("{}", e))
    }
}

pub fn state_name(state: OtaState) -> &'static str {
    match state {
        OtaState::ReadyToSend => "readyToSend",
        OtaState::AwaitingSync => "awaitingSync",
        OtaState::AwaitingCrcResult => "awaitingCrcResult",
        OtaState::Verified => "verified",
        OtaState::AwaitingDisconnect => "awaitingDisconnect",
        OtaState::Complete => "complete",
        OtaState::Failed => "failed",
    }
}

fn to_js_error(err: OtaError) -> JsError {
    JsError::new(&format!("{}", err))
}
