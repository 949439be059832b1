//! BRSP セッション
//!
//! BRSP ポート 1 本分の状態。open/close ライフサイクル、
//! モード交渉、入力/出力リングバッファのフロー制御を担当する。
//!
//! ## 排他制御
//!
//! すべてのメソッドは `&self` を取る。トランスポートのコールバック文脈と
//! アプリの呼び出し文脈から同時に触られる前提で、状態ごとに Mutex を分けている。
//! ロック順は常に `link → input / output → actions / events`。

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;

use brsp_buffer::{BufferError, RingBuffer};
use serde::Serialize;
use spin::Mutex;

use crate::config::SessionConfig;
use crate::error::{SessionError, TransportError};
use crate::event::{SessionEvent, TransportAction};
use crate::mode::{BrspMode, Capabilities, ModeNegotiator, SecurityLevel};

/// open/close の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenState {
    Closed,
    /// `Prepare` を要求済み、トランスポートの準備完了待ち
    Opening,
    Open,
}

/// リンク全体の状態
struct LinkState {
    open: OpenState,
    negotiator: ModeNegotiator,
    /// 実効 write サイズ（設定値 or トランスポートのヒント）
    max_write_len: usize,
}

/// 入力方向の状態
struct InputState {
    buffer: RingBuffer,
    /// 格納した総バイト数（統計用）
    total_received: u64,
    /// 溢れて破棄した総バイト数（統計用）
    total_dropped: u64,
}

/// 出力方向の状態
struct OutputState {
    buffer: RingBuffer,
    /// トランスポートに渡して完了待ちの chunk 長
    /// chunk は peek で取り出しているので、完了まで出力バッファに残っている
    in_flight: Option<usize>,
    /// in_flight 中に flush された（完了時に消費しない）
    in_flight_flushed: bool,
    /// 先頭 chunk の連続 write 失敗回数
    failed_attempts: u32,
    /// 送信完了した総バイト数（統計用）
    total_sent: u64,
}

impl OutputState {
    /// 出力バッファが空でないか、送信中の chunk がある
    fn is_sending(&self) -> bool {
        !self.buffer.is_empty() || self.in_flight.is_some()
    }
}

/// BRSP セッション
///
/// トランスポートを直接持たない（sans-IO）。ホストは
/// - トランスポートからの通知を `on_*` メソッドで渡す
/// - `poll_action()` で要求された操作をトランスポートで実行する
/// - `poll_event()` で観測者向けイベントを取り出す
///
/// `Send + Sync` なので、std 環境では `Arc` で共有してよい。
pub struct BrspSession {
    config: SessionConfig,
    link: Mutex<LinkState>,
    input: Mutex<InputState>,
    output: Mutex<OutputState>,
    /// ホストへの要求キュー（制御系）
    actions: Mutex<VecDeque<TransportAction>>,
    /// 観測者へのイベントキュー（セッションごとに 1 本）
    events: Mutex<VecDeque<SessionEvent>>,
}

impl BrspSession {
    /// デフォルト設定（入出力 1024 バイト）でセッションを生成する
    pub fn new() -> Self {
        Self::build(SessionConfig::default())
    }

    /// 設定を指定してセッションを生成する
    ///
    /// # エラー
    /// - `SessionError::InvalidConfig`: サイズが 0
    pub fn with_config(config: SessionConfig) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// 入出力バッファサイズを指定してセッションを生成する
    pub fn with_buffer_sizes(input_size: usize, output_size: usize) -> Result<Self, SessionError> {
        Self::with_config(SessionConfig::with_buffer_sizes(input_size, output_size))
    }

    fn build(config: SessionConfig) -> Self {
        BrspSession {
            link: Mutex::new(LinkState {
                open: OpenState::Closed,
                negotiator: ModeNegotiator::new(),
                max_write_len: config.max_write_len,
            }),
            input: Mutex::new(InputState {
                buffer: RingBuffer::new(config.input_buffer_size),
                total_received: 0,
                total_dropped: 0,
            }),
            output: Mutex::new(OutputState {
                buffer: RingBuffer::new(config.output_buffer_size),
                in_flight: None,
                in_flight_flushed: false,
                failed_attempts: 0,
                total_sent: 0,
            }),
            actions: Mutex::new(VecDeque::new()),
            events: Mutex::new(VecDeque::new()),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ===== ライフサイクル =====

    /// BRSP ポートを開く
    ///
    /// トランスポートに `Prepare` を要求して戻る。準備が終わると
    /// `on_opened` で Open になり、`OpenChanged(true)` が通知される。
    /// 既に Open / Opening なら何もしない。
    pub fn open(&self) {
        let mut link = self.link.lock();
        if link.open != OpenState::Closed {
            return;
        }
        log::debug!("brsp open requested");
        link.open = OpenState::Opening;
        self.push_action(TransportAction::Prepare);
    }

    /// BRSP ポートを閉じる
    ///
    /// バッファはクリアしない（閉じる直前に届いた未読データは読める）。
    /// 以後トランスポートからの受信は Open になるまで無視する。
    /// 完了通知が届いていない送信中 chunk は未送信として扱う。
    pub fn close(&self) {
        let mut link = self.link.lock();
        if link.open == OpenState::Closed {
            return;
        }
        log::debug!("brsp close requested");
        self.enter_closed(&mut link);
        self.push_action(TransportAction::Shutdown);
    }

    /// トランスポートの準備完了（Open）
    pub fn on_opened(&self, capabilities: Capabilities) {
        let mut link = self.link.lock();
        if link.open != OpenState::Opening {
            log::debug!("ignoring late open completion");
            return;
        }

        link.max_write_len = match capabilities.max_write_len {
            Some(hint) if hint > 0 => hint,
            _ => self.config.max_write_len,
        };
        link.negotiator.set_capabilities(capabilities);
        link.open = OpenState::Open;
        log::debug!(
            "brsp opened: security={:?} max_write_len={}",
            capabilities.security_level,
            link.max_write_len
        );
        self.push_event(SessionEvent::OpenChanged(true));
    }

    /// トランスポートの準備失敗
    pub fn on_open_failed(&self, error: TransportError) {
        let mut link = self.link.lock();
        if link.open != OpenState::Opening {
            return;
        }
        log::warn!("brsp open failed: {}", error);
        link.open = OpenState::Closed;
        self.push_event(SessionEvent::Error(SessionError::Transport(error)));
        self.push_event(SessionEvent::OpenChanged(false));
    }

    /// トランスポートが切断された
    ///
    /// OTA の apply 後など、想定された切断もここに来る。エラーは通知しない。
    pub fn on_disconnected(&self) {
        let mut link = self.link.lock();
        if link.open == OpenState::Closed {
            return;
        }
        log::debug!("brsp transport disconnected");
        self.enter_closed(&mut link);
    }

    /// トランスポート由来のエラーを観測者に転送する（状態は変えない）
    pub fn on_transport_error(&self, error: TransportError) {
        log::warn!("{}", error);
        self.push_event(SessionEvent::Error(SessionError::Transport(error)));
    }

    // ===== モード =====

    /// モード変更を要求する
    ///
    /// 相手の確認（`on_mode_changed`）が届くまで `mode()` は変わらない。
    ///
    /// # エラー
    /// - `NotOpen` / `Sending` / `ModeChangePending` / `ModeNotSupported`
    pub fn change_mode(&self, target: BrspMode) -> Result<(), SessionError> {
        let mut link = self.link.lock();
        let is_open = link.open == OpenState::Open;
        let is_sending = self.output.lock().is_sending();

        link.negotiator.request(target, is_open, is_sending)?;
        self.push_action(TransportAction::WriteMode(target));
        Ok(())
    }

    /// 生の値（0/1/2/4）でモード変更を要求する
    pub fn change_mode_raw(&self, value: u8) -> Result<(), SessionError> {
        let target = BrspMode::from_raw(value).ok_or(SessionError::InvalidMode(value))?;
        self.change_mode(target)
    }

    /// 相手のモード通知
    pub fn on_mode_changed(&self, mode: BrspMode) {
        let mut link = self.link.lock();
        if link.open == OpenState::Closed {
            return;
        }
        if link.negotiator.confirm(mode) {
            self.push_event(SessionEvent::ModeChanged(mode));
        }
    }

    // ===== 受信 =====

    /// トランスポートから受信したバイト列を入力バッファに積む
    ///
    /// 容量が足りない場合も入るところまでは格納し、`InputOverflow` を
    /// イベントと戻り値の両方で報告する（新しい側を捨てる）。
    ///
    /// # 戻り値
    /// 格納したバイト数
    pub fn on_bytes_received(&self, data: &[u8]) -> Result<usize, SessionError> {
        let link = self.link.lock();
        if link.open != OpenState::Open {
            log::debug!("dropping {} bytes received while not open", data.len());
            return Err(SessionError::NotOpen);
        }

        let mut input = self.input.lock();
        match input.buffer.write(data) {
            Ok(n) => {
                input.total_received += n as u64;
                if n > 0 {
                    self.push_event(SessionEvent::DataReceived);
                }
                Ok(n)
            }
            Err(err) => {
                let (accepted, dropped) = match err {
                    BufferError::Overflow { accepted, rejected } => (accepted, rejected),
                    BufferError::InsufficientSpace { .. } => (0, data.len()),
                };
                input.total_received += accepted as u64;
                input.total_dropped += dropped as u64;
                if accepted > 0 {
                    self.push_event(SessionEvent::DataReceived);
                }

                let err = SessionError::InputOverflow { accepted, dropped };
                self.push_event(SessionEvent::Error(err.clone()));
                Err(err)
            }
        }
    }

    // ===== 送信 =====

    /// バイト列を出力バッファに積む
    ///
    /// 送信は `poll_action()` 経由で非同期・FIFO で行われる。
    /// モード変更の確認待ちの間は受け付けない（旧モードのまま相手に届くため）。
    ///
    /// # エラー
    /// - `NotOpen`: セッションが Open でない
    /// - `ModeChangePending`: モード変更の確認待ち
    /// - `OutputCapacity`: 出力バッファの空き容量不足（何も積まない）
    pub fn write_bytes(&self, data: &[u8]) -> Result<(), SessionError> {
        let link = self.link.lock();
        if link.open != OpenState::Open {
            return Err(SessionError::NotOpen);
        }
        if let Some(pending) = link.negotiator.pending() {
            return Err(SessionError::ModeChangePending(pending));
        }
        if data.is_empty() {
            return Ok(());
        }

        let mut output = self.output.lock();
        let was_sending = output.is_sending();
        output.buffer.write_all(data).map_err(|e| match e {
            BufferError::InsufficientSpace { requested, available } => {
                SessionError::OutputCapacity { requested, available }
            }
            BufferError::Overflow { accepted, rejected } => SessionError::OutputCapacity {
                requested: accepted + rejected,
                available: accepted,
            },
        })?;

        log::trace!("queued {} bytes for output", data.len());
        if !was_sending {
            self.push_event(SessionEvent::SendingChanged(true));
        }
        Ok(())
    }

    /// 文字列を UTF-8 で出力バッファに積む
    pub fn write_string(&self, text: &str) -> Result<(), SessionError> {
        self.write_bytes(text.as_bytes())
    }

    /// ホストが実行すべき次の操作を取り出す
    ///
    /// 制御系（Prepare / Shutdown / WriteMode）を先に返し、その後データを返す。
    /// データは同時に 1 chunk だけ送信中にする。
    /// モード変更の確認待ちの間はデータを出さない。
    pub fn poll_action(&self) -> Option<TransportAction> {
        if let Some(action) = self.actions.lock().pop_front() {
            return Some(action);
        }

        let link = self.link.lock();
        if link.open != OpenState::Open || link.negotiator.pending().is_some() {
            return None;
        }

        let mut output = self.output.lock();
        if output.in_flight.is_some() || output.buffer.is_empty() {
            return None;
        }

        let chunk = output.buffer.peek(link.max_write_len);
        output.in_flight = Some(chunk.len());
        output.in_flight_flushed = false;
        log::trace!("sending chunk of {} bytes", chunk.len());
        Some(TransportAction::Send(chunk))
    }

    /// 直前の `Send` が完了した
    pub fn on_write_complete(&self) {
        let mut output = self.output.lock();
        let Some(len) = output.in_flight.take() else {
            log::debug!("ignoring write completion with nothing in flight");
            return;
        };

        if !output.in_flight_flushed {
            output.buffer.discard(len);
        }
        output.in_flight_flushed = false;
        output.failed_attempts = 0;
        output.total_sent += len as u64;

        if !output.is_sending() {
            self.push_event(SessionEvent::SendingChanged(false));
        }
    }

    /// 直前の `Send` が失敗した
    ///
    /// chunk は出力バッファに残るので、次の `poll_action()` で再送される。
    /// 同じ chunk が `max_write_attempts` 回続けて失敗したら、出力バッファを
    /// 破棄して `WriteAttemptsExhausted` を通知する。
    pub fn on_write_failed(&self, error: TransportError) {
        let mut output = self.output.lock();
        if output.in_flight.take().is_none() {
            return;
        }
        log::warn!("write failed: {}", error);
        self.push_event(SessionEvent::Error(SessionError::Transport(error)));

        if output.in_flight_flushed {
            output.in_flight_flushed = false;
            output.failed_attempts = 0;
        } else {
            output.failed_attempts += 1;
            if output.failed_attempts >= self.config.max_write_attempts {
                let attempts = output.failed_attempts;
                let dropped = output.buffer.len();
                output.buffer.clear();
                output.failed_attempts = 0;
                log::warn!("giving up after {} write attempts, dropped {} bytes", attempts, dropped);
                self.push_event(SessionEvent::Error(SessionError::WriteAttemptsExhausted {
                    attempts,
                    dropped,
                }));
            }
        }

        if !output.is_sending() {
            self.push_event(SessionEvent::SendingChanged(false));
        }
    }

    // ===== 読み出し =====

    /// 先頭から最大 `n` バイトを消費せずに返す
    pub fn peek_bytes(&self, n: usize) -> Vec<u8> {
        self.input.lock().buffer.peek(n)
    }

    pub fn peek_all_bytes(&self) -> Vec<u8> {
        self.input.lock().buffer.peek_all()
    }

    /// 先頭から最大 `n` バイトを読み出して消費する
    pub fn read_bytes(&self, n: usize) -> Vec<u8> {
        self.input.lock().buffer.read(n)
    }

    pub fn read_all_bytes(&self) -> Vec<u8> {
        self.input.lock().buffer.read_all()
    }

    /// `peek_bytes` の UTF-8 版
    pub fn peek_string(&self, n: usize) -> Result<String, SessionError> {
        let bytes = self.peek_bytes(n);
        decode_utf8(&bytes)
    }

    pub fn peek_all_string(&self) -> Result<String, SessionError> {
        let bytes = self.peek_all_bytes();
        decode_utf8(&bytes)
    }

    /// `read_bytes` の UTF-8 版
    ///
    /// デコードに失敗した場合は何も消費しない。
    pub fn read_string(&self, n: usize) -> Result<String, SessionError> {
        let mut input = self.input.lock();
        let bytes = input.buffer.peek(n);
        let text = decode_utf8(&bytes)?;
        input.buffer.discard(bytes.len());
        Ok(text)
    }

    pub fn read_all_string(&self) -> Result<String, SessionError> {
        self.read_string(usize::MAX)
    }

    // ===== flush =====

    /// 入力バッファの未読データをすべて破棄する
    pub fn flush_input_buffer(&self) {
        self.input.lock().buffer.clear();
    }

    /// 入力バッファの先頭 `n` バイトを破棄する（peek 後の読み捨て用）
    ///
    /// # 戻り値
    /// 実際に破棄したバイト数
    pub fn flush_input_bytes(&self, n: usize) -> usize {
        self.input.lock().buffer.discard(n)
    }

    /// 出力バッファの未送信データをすべて破棄する
    ///
    /// トランスポートに渡し済みの chunk は取り消せないため、その完了までは
    /// isSending のまま。
    pub fn flush_output_buffer(&self) {
        let mut output = self.output.lock();
        let was_sending = output.is_sending();
        output.buffer.clear();
        output.failed_attempts = 0;
        if output.in_flight.is_some() {
            output.in_flight_flushed = true;
        }
        if was_sending && !output.is_sending() {
            self.push_event(SessionEvent::SendingChanged(false));
        }
    }

    // ===== イベント =====

    /// 観測者向けイベントを 1 つ取り出す
    pub fn poll_event(&self) -> Option<SessionEvent> {
        self.events.lock().pop_front()
    }

    /// 溜まっているイベントをすべて取り出す
    pub fn drain_events(&self) -> Vec<SessionEvent> {
        self.events.lock().drain(..).collect()
    }

    // ===== プロパティ =====

    pub fn mode(&self) -> BrspMode {
        self.link.lock().negotiator.mode()
    }

    /// 確認待ちのモード変更
    pub fn pending_mode(&self) -> Option<BrspMode> {
        self.link.lock().negotiator.pending()
    }

    pub fn is_open(&self) -> bool {
        self.link.lock().open == OpenState::Open
    }

    pub fn is_sending(&self) -> bool {
        self.output.lock().is_sending()
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.link.lock().negotiator.capabilities().security_level
    }

    pub fn capabilities(&self) -> Capabilities {
        *self.link.lock().negotiator.capabilities()
    }

    pub fn is_data_mode_supported(&self) -> bool {
        self.link.lock().negotiator.supports(BrspMode::Data)
    }

    pub fn is_remote_command_mode_supported(&self) -> bool {
        self.link.lock().negotiator.supports(BrspMode::RemoteCommand)
    }

    pub fn is_firmware_update_mode_supported(&self) -> bool {
        self.link.lock().negotiator.supports(BrspMode::FirmwareUpdate)
    }

    pub fn input_buffer_size(&self) -> usize {
        self.input.lock().buffer.capacity()
    }

    pub fn output_buffer_size(&self) -> usize {
        self.output.lock().buffer.capacity()
    }

    pub fn input_buffer_count(&self) -> usize {
        self.input.lock().buffer.len()
    }

    pub fn output_buffer_count(&self) -> usize {
        self.output.lock().buffer.len()
    }

    pub fn output_buffer_available_bytes(&self) -> usize {
        self.output.lock().buffer.available_space()
    }

    /// セッション統計を返す
    pub fn stats(&self) -> SessionStats {
        let link = self.link.lock();
        let input = self.input.lock();
        let output = self.output.lock();
        SessionStats {
            mode: link.negotiator.mode().raw(),
            is_open: link.open == OpenState::Open,
            is_sending: output.is_sending(),
            security_level: link.negotiator.capabilities().security_level.raw(),
            input_buffer_count: input.buffer.len(),
            output_buffer_count: output.buffer.len(),
            total_received_bytes: input.total_received,
            total_sent_bytes: output.total_sent,
            total_dropped_bytes: input.total_dropped,
        }
    }

    // ===== Private メソッド =====

    /// Closed へ遷移する（link ロック保持中に呼ぶ）
    fn enter_closed(&self, link: &mut LinkState) {
        let was_open = link.open == OpenState::Open;
        link.open = OpenState::Closed;
        link.negotiator.cancel_pending();

        let mut output = self.output.lock();
        output.failed_attempts = 0;
        if output.in_flight.take().is_some() {
            output.in_flight_flushed = false;
            if !output.is_sending() {
                self.push_event(SessionEvent::SendingChanged(false));
            }
        }
        drop(output);

        if was_open {
            self.push_event(SessionEvent::OpenChanged(false));
        }
    }

    fn push_action(&self, action: TransportAction) {
        self.actions.lock().push_back(action);
    }

    fn push_event(&self, event: SessionEvent) {
        self.events.lock().push_back(event);
    }
}

impl Default for BrspSession {
    fn default() -> Self {
        Self::new()
    }
}

/// UTF-8 デコード（不正なら置換せずエラー）
fn decode_utf8(bytes: &[u8]) -> Result<String, SessionError> {
    core::str::from_utf8(bytes)
        .map(String::from)
        .map_err(|e| SessionError::InvalidUtf8 {
            valid_up_to: e.valid_up_to(),
        })
}

/// セッション統計情報
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// 現在のモード（生の値）
    pub mode: u8,
    pub is_open: bool,
    pub is_sending: bool,
    /// セキュリティレベル（生の値、99 = 不明）
    pub security_level: u32,
    pub input_buffer_count: usize,
    pub output_buffer_count: usize,
    pub total_received_bytes: u64,
    pub total_sent_bytes: u64,
    /// 入力溢れで破棄した総バイト数
    pub total_dropped_bytes: u64,
}
