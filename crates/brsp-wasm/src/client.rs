//! BrspClient wasm-bindgen エクスポート
//!
//! Web Bluetooth の JS グルーから呼び出す BRSP セッションの主エントリポイント。
//! トランスポートとのやり取りは `on*` 通知と `pollAction()` の要求で行う。

use alloc::format;
use alloc::string::String;

use js_sys::{Object, Reflect, Uint8Array};
use wasm_bindgen::prelude::*;

use brsp_session::{
    BrspSession, Capabilities, SecurityLevel, SessionConfig, SessionError, SessionEvent,
    TransportAction, TransportError,
};

/// BRSP クライアントセッション
///
/// ## 内部アーキテクチャ
///
/// ```text
/// BrspClient
///   └── BrspSession (brsp-session)
///         ├── ModeNegotiator  - モード・能力・セキュリティレベル
///         ├── RingBuffer (入力) (brsp-buffer)
///         └── RingBuffer (出力) (brsp-buffer)
/// ```
///
/// ## スレッド安全性
///
/// WASM はシングルスレッドなので、JS からは単一スレッドで呼び出される前提。
#[wasm_bindgen]
pub struct BrspClient {
    pub(crate) session: BrspSession,
}

#[wasm_bindgen]
impl BrspClient {
    /// クライアントを初期化する
    ///
    /// # 引数
    /// - `input_size`: 入力バッファ容量（省略時 1024）
    /// - `output_size`: 出力バッファ容量（省略時 1024）
    ///
    /// # エラー
    /// - サイズに 0 を指定した
    ///
    /// # 例（TypeScript）
    /// ```typescript
    /// const client = new BrspClient();
    /// const big = new BrspClient(8192, 2048);
    /// ```
    #[wasm_bindgen(constructor)]
    pub fn new(input_size: Option<u32>, output_size: Option<u32>) -> Result<BrspClient, JsError> {
        let defaults = SessionConfig::default();
        let config = SessionConfig {
            input_buffer_size: input_size.map_or(defaults.input_buffer_size, |n| n as usize),
            output_buffer_size: output_size.map_or(defaults.output_buffer_size, |n| n as usize),
            ..defaults
        };
        let session = BrspSession::with_config(config).map_err(to_js_error)?;
        Ok(BrspClient { session })
    }

    /// JSON の設定からクライアントを初期化する
    ///
    /// ```typescript
    /// const client = BrspClient.withConfig('{"input_buffer_size": 4096, "max_write_len": 182}');
    /// ```
    #[wasm_bindgen(js_name = "withConfig")]
    pub fn with_config(json: &str) -> Result<BrspClient, JsError> {
        let config: SessionConfig = serde_json::from_str(json)
            .map_err(|e| JsError::new(&format!("Invalid session config: {}", e)))?;
        let session = BrspSession::with_config(config).map_err(to_js_error)?;
        Ok(BrspClient { session })
    }

    // ===== ライフサイクル =====

    #[wasm_bindgen]
    pub fn open(&self) {
        self.session.open();
    }

    #[wasm_bindgen]
    pub fn close(&self) {
        self.session.close();
    }

    /// GATT の準備（サービス探索・notify 購読）が完了した
    ///
    /// # 引数
    /// - `security_level`: 0 / 1 / 2（それ以外は不明扱い）
    /// - `max_write_len`: 1 回の write の上限（ATT MTU - 3）。省略時は設定値
    #[wasm_bindgen(js_name = "onOpened")]
    pub fn on_opened(
        &self,
        supports_data_mode: bool,
        supports_remote_command_mode: bool,
        supports_firmware_update_mode: bool,
        security_level: u32,
        max_write_len: Option<u32>,
    ) {
        self.session.on_opened(Capabilities {
            supports_data_mode,
            supports_remote_command_mode,
            supports_firmware_update_mode,
            security_level: SecurityLevel::from_raw(security_level),
            max_write_len: max_write_len.map(|n| n as usize),
        });
    }

    #[wasm_bindgen(js_name = "onOpenFailed")]
    pub fn on_open_failed(&self, code: i32, message: &str) {
        self.session.on_open_failed(TransportError::new(code, message));
    }

    #[wasm_bindgen(js_name = "onDisconnected")]
    pub fn on_disconnected(&self) {
        self.session.on_disconnected();
    }

    #[wasm_bindgen(js_name = "onTransportError")]
    pub fn on_transport_error(&self, code: i32, message: &str) {
        self.session.on_transport_error(TransportError::new(code, message));
    }

    // ===== トランスポート =====

    /// notify で受信したバイト列を渡す
    ///
    /// # 戻り値
    /// 入力バッファに格納したバイト数。溢れた分は `error` イベントで通知される。
    /// Open でない場合は 0。
    #[wasm_bindgen(js_name = "onBytesReceived")]
    pub fn on_bytes_received(&self, data: &[u8]) -> u32 {
        match self.session.on_bytes_received(data) {
            Ok(n) => n as u32,
            Err(SessionError::InputOverflow { accepted, .. }) => accepted as u32,
            Err(_) => 0,
        }
    }

    /// 直前の `send` 要求の write が完了した
    #[wasm_bindgen(js_name = "onWriteComplete")]
    pub fn on_write_complete(&self) {
        self.session.on_write_complete();
    }

    /// 直前の `send` 要求の write が失敗した（同じデータが再度要求される）
    #[wasm_bindgen(js_name = "onWriteFailed")]
    pub fn on_write_failed(&self, code: i32, message: &str) {
        self.session.on_write_failed(TransportError::new(code, message));
    }

    /// 相手からモード通知が届いた
    ///
    /// # エラー
    /// - 0/1/2/4 以外の値
    #[wasm_bindgen(js_name = "onModeChanged")]
    pub fn on_mode_changed(&self, mode: u8) -> Result<(), JsError> {
        let mode = brsp_session::BrspMode::from_raw(mode)
            .ok_or_else(|| to_js_error(SessionError::InvalidMode(mode)))?;
        self.session.on_mode_changed(mode);
        Ok(())
    }

    /// ホストが実行すべき次の操作を返す
    ///
    /// # 戻り値
    /// - `{ type: "prepare" }`: GATT の準備を始め、終わったら `onOpened`
    /// - `{ type: "shutdown" }`: notify 購読を止める
    /// - `{ type: "writeMode", mode }`: mode characteristic に 1 バイト書く
    /// - `{ type: "send", data }`: rx characteristic に書き、終わったら `onWriteComplete`
    /// - `undefined`: 今やることはない
    #[wasm_bindgen(js_name = "pollAction")]
    pub fn poll_action(&self) -> Result<JsValue, JsError> {
        let Some(action) = self.session.poll_action() else {
            return Ok(JsValue::UNDEFINED);
        };
        let obj = Object::new();
        match action {
            TransportAction::Prepare => set(&obj, "type", &"prepare".into())?,
            TransportAction::Shutdown => set(&obj, "type", &"shutdown".into())?,
            TransportAction::WriteMode(mode) => {
                set(&obj, "type", &"writeMode".into())?;
                set(&obj, "mode", &mode.raw().into())?;
            }
            TransportAction::Send(data) => {
                set(&obj, "type", &"send".into())?;
                set(&obj, "data", &to_uint8_array(&data))?;
            }
        }
        Ok(obj.into())
    }

    /// 観測者向けイベントを 1 つ取り出す
    ///
    /// # 戻り値
    /// - `{ type: "openChanged", isOpen }`
    /// - `{ type: "sendingChanged", isSending }`
    /// - `{ type: "dataReceived" }`
    /// - `{ type: "error", kind, message }`（kind: `"state" | "capacity" | "transport" | "decode" | "config"`）
    /// - `{ type: "modeChanged", mode }`
    /// - `undefined`: イベントなし
    #[wasm_bindgen(js_name = "pollEvent")]
    pub fn poll_event(&self) -> Result<JsValue, JsError> {
        let Some(event) = self.session.poll_event() else {
            return Ok(JsValue::UNDEFINED);
        };
        let obj = Object::new();
        match event {
            SessionEvent::OpenChanged(is_open) => {
                set(&obj, "type", &"openChanged".into())?;
                set(&obj, "isOpen", &is_open.into())?;
            }
            SessionEvent::SendingChanged(is_sending) => {
                set(&obj, "type", &"sendingChanged".into())?;
                set(&obj, "isSending", &is_sending.into())?;
            }
            SessionEvent::DataReceived => set(&obj, "type", &"dataReceived".into())?,
            SessionEvent::Error(err) => {
                set(&obj, "type", &"error".into())?;
                set(&obj, "kind", &error_kind_name(&err).into())?;
                set(&obj, "message", &format!("{}", err).into())?;
            }
            SessionEvent::ModeChanged(mode) => {
                set(&obj, "type", &"modeChanged".into())?;
                set(&obj, "mode", &mode.raw().into())?;
            }
        }
        Ok(obj.into())
    }

    // ===== モード =====

    /// モード変更を要求する（0=Idle, 1=Data, 2=RemoteCommand, 4=FirmwareUpdate）
    ///
    /// # エラー
    /// - 未 Open・送信中・別の変更が確認待ち・相手が未サポート・不正な値
    #[wasm_bindgen(js_name = "changeMode")]
    pub fn change_mode(&self, mode: u8) -> Result<(), JsError> {
        self.session.change_mode_raw(mode).map_err(to_js_error)
    }

    // ===== 送信 =====

    #[wasm_bindgen(js_name = "writeBytes")]
    pub fn write_bytes(&self, data: &[u8]) -> Result<(), JsError> {
        self.session.write_bytes(data).map_err(to_js_error)
    }

    #[wasm_bindgen(js_name = "writeString")]
    pub fn write_string(&self, text: &str) -> Result<(), JsError> {
        self.session.write_string(text).map_err(to_js_error)
    }

    // ===== 読み出し =====

    #[wasm_bindgen(js_name = "peekBytes")]
    pub fn peek_bytes(&self, n: u32) -> Uint8Array {
        to_uint8_array(&self.session.peek_bytes(n as usize))
    }

    #[wasm_bindgen(js_name = "peekAllBytes")]
    pub fn peek_all_bytes(&self) -> Uint8Array {
        to_uint8_array(&self.session.peek_all_bytes())
    }

    #[wasm_bindgen(js_name = "readBytes")]
    pub fn read_bytes(&self, n: u32) -> Uint8Array {
        to_uint8_array(&self.session.read_bytes(n as usize))
    }

    #[wasm_bindgen(js_name = "readAllBytes")]
    pub fn read_all_bytes(&self) -> Uint8Array {
        to_uint8_array(&self.session.read_all_bytes())
    }

    #[wasm_bindgen(js_name = "peekString")]
    pub fn peek_string(&self, n: u32) -> Result<String, JsError> {
        self.session.peek_string(n as usize).map_err(to_js_error)
    }

    #[wasm_bindgen(js_name = "peekAllString")]
    pub fn peek_all_string(&self) -> Result<String, JsError> {
        self.session.peek_all_string().map_err(to_js_error)
    }

    /// UTF-8 として読み出す。デコードできなければ何も消費せずにエラー
    #[wasm_bindgen(js_name = "readString")]
    pub fn read_string(&self, n: u32) -> Result<String, JsError> {
        self.session.read_string(n as usize).map_err(to_js_error)
    }

    #[wasm_bindgen(js_name = "readAllString")]
    pub fn read_all_string(&self) -> Result<String, JsError> {
        self.session.read_all_string().map_err(to_js_error)
    }

    // ===== flush =====

    /// 入力バッファを破棄する。`n` を指定すると先頭 `n` バイトだけ破棄する
    ///
    /// # 戻り値
    /// 破棄したバイト数
    #[wasm_bindgen(js_name = "flushInputBuffer")]
    pub fn flush_input_buffer(&self, n: Option<u32>) -> u32 {
        match n {
            Some(n) => self.session.flush_input_bytes(n as usize) as u32,
            None => {
                let count = self.session.input_buffer_count() as u32;
                self.session.flush_input_buffer();
                count
            }
        }
    }

    #[wasm_bindgen(js_name = "flushOutputBuffer")]
    pub fn flush_output_buffer(&self) {
        self.session.flush_output_buffer();
    }

    // ===== プロパティ =====

    #[wasm_bindgen(getter)]
    pub fn mode(&self) -> u8 {
        self.session.mode().raw()
    }

    #[wasm_bindgen(getter, js_name = "isOpen")]
    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    #[wasm_bindgen(getter, js_name = "isSending")]
    pub fn is_sending(&self) -> bool {
        self.session.is_sending()
    }

    /// 0 / 1 / 2、不明なら 99
    #[wasm_bindgen(getter, js_name = "securityLevel")]
    pub fn security_level(&self) -> u32 {
        self.session.security_level().raw()
    }

    #[wasm_bindgen(getter, js_name = "isDataModeSupported")]
    pub fn is_data_mode_supported(&self) -> bool {
        self.session.is_data_mode_supported()
    }

    #[wasm_bindgen(getter, js_name = "isRemoteCommandModeSupported")]
    pub fn is_remote_command_mode_supported(&self) -> bool {
        self.session.is_remote_command_mode_supported()
    }

    #[wasm_bindgen(getter, js_name = "isFirmwareUpdateModeSupported")]
    pub fn is_firmware_update_mode_supported(&self) -> bool {
        self.session.is_firmware_update_mode_supported()
    }

    #[wasm_bindgen(getter, js_name = "inputBufferSize")]
    pub fn input_buffer_size(&self) -> u32 {
        self.session.input_buffer_size() as u32
    }

    #[wasm_bindgen(getter, js_name = "outputBufferSize")]
    pub fn output_buffer_size(&self) -> u32 {
        self.session.output_buffer_size() as u32
    }

    #[wasm_bindgen(getter, js_name = "inputBufferCount")]
    pub fn input_buffer_count(&self) -> u32 {
        self.session.input_buffer_count() as u32
    }

    #[wasm_bindgen(getter, js_name = "outputBufferCount")]
    pub fn output_buffer_count(&self) -> u32 {
        self.session.output_buffer_count() as u32
    }

    #[wasm_bindgen(getter, js_name = "outputBufferAvailableBytes")]
    pub fn output_buffer_available_bytes(&self) -> u32 {
        self.session.output_buffer_available_bytes() as u32
    }

    /// セッション統計を JSON 文字列で返す
    ///
    /// # 戻り値
    /// ```json
    /// {
    ///   "mode": 1,
    ///   "is_open": true,
    ///   "is_sending": false,
    ///   "security_level": 0,
    ///   "input_buffer_count": 12,
    ///   "output_buffer_count": 0,
    ///   "total_received_bytes": 4096,
    ///   "total_sent_bytes": 1024,
    ///   "total_dropped_bytes": 0
    /// }
    /// ```
    #[wasm_bindgen(js_name = "getStats")]
    pub fn get_stats(&self) -> Result<String, JsError> {
        serde_json::to_string(&self.session.stats())
            .map_err(|e| JsError::new(&format!("Stats serialization failed: {}", e)))
    }
}

/// SessionError の分類名（イベントの `kind`）
pub fn error_kind_name(err: &SessionError) -> &'static str {
    use brsp_session::ErrorKind;
    match err.kind() {
        ErrorKind::State => "state",
        ErrorKind::Capacity => "capacity",
        ErrorKind::Transport => "transport",
        ErrorKind::Decode => "decode",
        ErrorKind::Config => "config",
    }
}

fn to_js_error(err: SessionError) -> JsError {
    JsError::new(&format!("{}", err))
}

fn to_uint8_array(bytes: &[u8]) -> Uint8Array {
    let arr = Uint8Array::new_with_length(bytes.len() as u32);
    arr.copy_from(bytes);
    arr
}

fn set(obj: &Object, key: &str, value: &JsValue) -> Result<(), JsError> {
    Reflect::set(obj, &JsValue::from_str(key), value)
        .map(|_| ())
        .map_err(|_| JsError::new(&format!("Failed to set property {}", key)))
}
