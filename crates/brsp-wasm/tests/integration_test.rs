//! brsp-wasm 統合テスト
//!
//! session + OTA の完全なパイプラインを、BRSP ペリフェラルを模したテストダブルで動かす。
//! wasm-bindgen の型は native では使えないので、内部クレートを直接使う。

use std::sync::Arc;
use std::thread;

use brsp_ota::{
    OtaDriver, OtaDriverConfig, OtaError, OtaState, OtaUpdatePlan, OTA_BLOCK_SIZE,
    OTA_CMD_APPLY_UPDATE, OTA_CMD_CONFIRM_UPDATE, OTA_CRC_FAIL, OTA_CRC_OK, OTA_SYNC_CHAR,
};
use brsp_session::{
    BrspMode, BrspSession, Capabilities, SecurityLevel, SessionConfig, SessionError,
    SessionEvent, TransportAction, TransportError,
};
use brsp_wasm::{pump, PumpError};

// ==============================================================
// ヘルパー: BRSP ペリフェラルのシミュレーション
// ==============================================================

/// 相手側デバイス
///
/// - Data モード: 受け取ったバイトをそのまま返す（ループバック）
/// - FirmwareUpdate モード: ブロックごとに 0x2A、confirm に CRC 結果、apply で切断
struct Peripheral {
    capabilities: Capabilities,
    mode: BrspMode,
    /// 受け取るはずのイメージ
    expected_image: Vec<u8>,
    /// 今回の試行で受け取ったイメージ
    received_image: Vec<u8>,
    /// わざと CRC FAIL を返す回数
    crc_failures_left: u32,
    /// わざと write を失敗させる回数
    write_failures_left: u32,
    /// CRC 一致を返した
    verified: bool,
    /// apply を受け取って切断した
    applied: bool,
    /// 受け取った write の chunk 長
    chunk_lens: Vec<usize>,
}

/// write を 1 回処理した結果
enum WriteOutcome {
    Ok(Vec<u8>),
    Failed,
    Disconnect,
}

impl Peripheral {
    fn new() -> Self {
        Peripheral {
            capabilities: Capabilities {
                supports_data_mode: true,
                supports_remote_command_mode: true,
                supports_firmware_update_mode: true,
                security_level: SecurityLevel::UnauthenticatedEncrypted,
                max_write_len: None,
            },
            mode: BrspMode::Data,
            expected_image: Vec::new(),
            received_image: Vec::new(),
            crc_failures_left: 0,
            write_failures_left: 0,
            verified: false,
            applied: false,
            chunk_lens: Vec::new(),
        }
    }

    fn expecting_image(mut self, image: &[u8]) -> Self {
        self.expected_image = image.to_vec();
        self
    }

    fn write(&mut self, chunk: &[u8]) -> WriteOutcome {
        if self.write_failures_left > 0 {
            self.write_failures_left -= 1;
            return WriteOutcome::Failed;
        }
        self.chunk_lens.push(chunk.len());

        match self.mode {
            BrspMode::FirmwareUpdate => self.write_firmware(chunk),
            BrspMode::Data => WriteOutcome::Ok(chunk.to_vec()),
            _ => WriteOutcome::Ok(Vec::new()),
        }
    }

    fn write_firmware(&mut self, chunk: &[u8]) -> WriteOutcome {
        let expected_len = self.expected_image.len();

        if self.received_image.len() < expected_len {
            self.received_image.extend_from_slice(chunk);
            let got = self.received_image.len();
            if got % OTA_BLOCK_SIZE == 0 || got == expected_len {
                return WriteOutcome::Ok(vec![OTA_SYNC_CHAR]);
            }
            return WriteOutcome::Ok(Vec::new());
        }

        match chunk {
            [OTA_CMD_CONFIRM_UPDATE] if !self.verified => {
                let crc_ok = self.crc_failures_left == 0 && self.received_image == self.expected_image;
                self.received_image.clear();
                if crc_ok {
                    self.verified = true;
                    WriteOutcome::Ok(vec![OTA_CRC_OK])
                } else {
                    self.crc_failures_left = self.crc_failures_left.saturating_sub(1);
                    WriteOutcome::Ok(vec![OTA_CRC_FAIL])
                }
            }
            [OTA_CMD_APPLY_UPDATE] if self.verified => {
                self.applied = true;
                WriteOutcome::Disconnect
            }
            _ => WriteOutcome::Ok(Vec::new()),
        }
    }
}

/// セッションが要求する操作をペリフェラルで実行する（要求がなくなるまで）
fn run_transport(session: &BrspSession, peripheral: &mut Peripheral) {
    for _ in 0..100_000 {
        let Some(action) = session.poll_action() else {
            return;
        };
        match action {
            TransportAction::Prepare => session.on_opened(peripheral.capabilities),
            TransportAction::Shutdown => {}
            TransportAction::WriteMode(mode) => {
                peripheral.mode = mode;
                session.on_mode_changed(mode);
            }
            TransportAction::Send(chunk) => match peripheral.write(&chunk) {
                WriteOutcome::Ok(response) => {
                    session.on_write_complete();
                    if !response.is_empty() {
                        session.on_bytes_received(&response).unwrap();
                    }
                }
                WriteOutcome::Failed => {
                    session.on_write_failed(TransportError::new(14, "GATT write failed"));
                }
                WriteOutcome::Disconnect => {
                    session.on_write_complete();
                    session.on_disconnected();
                }
            },
        }
    }
    panic!("transport loop did not settle");
}

fn open(session: &BrspSession, peripheral: &mut Peripheral) {
    session.open();
    run_transport(session, peripheral);
    assert!(session.is_open());
}

/// OTA を最後まで回す（切断 or 終了まで）
fn run_ota(
    session: &BrspSession,
    peripheral: &mut Peripheral,
    driver: &mut OtaDriver,
) -> Result<(), PumpError> {
    for _ in 0..10_000 {
        if driver.is_finished() || !session.is_open() {
            break;
        }
        pump(driver, session)?;
        run_transport(session, peripheral);
    }
    if !session.is_open() {
        driver.on_disconnected()?;
    }
    Ok(())
}

fn firmware(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

// ==============================================================
// ライフサイクル・データ
// ==============================================================

#[test]
fn test_open_write_and_loopback() {
    let session = BrspSession::new();
    let mut peripheral = Peripheral::new();
    open(&session, &mut peripheral);

    assert_eq!(session.security_level(), SecurityLevel::UnauthenticatedEncrypted);
    assert!(session.is_firmware_update_mode_supported());

    session.write_string("hello, brsp").unwrap();
    assert!(session.is_sending());
    run_transport(&session, &mut peripheral);

    assert!(!session.is_sending());
    assert_eq!(session.read_all_string().unwrap(), "hello, brsp");

    let events = session.drain_events();
    assert_eq!(events.first(), Some(&SessionEvent::OpenChanged(true)));
    assert!(events.contains(&SessionEvent::SendingChanged(true)));
    assert!(events.contains(&SessionEvent::SendingChanged(false)));
    assert!(events.contains(&SessionEvent::DataReceived));
}

#[test]
fn test_large_write_is_chunked_in_order() {
    let session = BrspSession::new();
    let mut peripheral = Peripheral::new();
    peripheral.capabilities.max_write_len = Some(8);
    open(&session, &mut peripheral);

    let payload: Vec<u8> = (0..100u8).collect();
    session.write_bytes(&payload).unwrap();
    run_transport(&session, &mut peripheral);

    assert!(peripheral.chunk_lens.iter().all(|&n| n <= 8));
    assert_eq!(peripheral.chunk_lens.iter().sum::<usize>(), 100);
    assert_eq!(session.read_all_bytes(), payload);
    assert_eq!(session.stats().total_sent_bytes, 100);
}

#[test]
fn test_failed_write_is_retried() {
    let session = BrspSession::new();
    let mut peripheral = Peripheral::new();
    open(&session, &mut peripheral);
    peripheral.write_failures_left = 2;

    session.write_bytes(b"retry me").unwrap();
    run_transport(&session, &mut peripheral);

    assert_eq!(session.read_all_bytes(), b"retry me");
    let errors = session
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::Error(SessionError::Transport(_))))
        .count();
    assert_eq!(errors, 2);
}

#[test]
fn test_mode_change_waits_for_output_drain() {
    let session = BrspSession::new();
    let mut peripheral = Peripheral::new();
    open(&session, &mut peripheral);

    session.write_bytes(b"pending").unwrap();
    assert_eq!(
        session.change_mode(BrspMode::RemoteCommand),
        Err(SessionError::Sending)
    );
    assert_eq!(session.mode(), BrspMode::Data);

    run_transport(&session, &mut peripheral);
    session.change_mode(BrspMode::RemoteCommand).unwrap();
    assert_eq!(session.mode(), BrspMode::Data, "確認前は切り替わらない");

    run_transport(&session, &mut peripheral);
    assert_eq!(session.mode(), BrspMode::RemoteCommand);
    assert!(session
        .drain_events()
        .contains(&SessionEvent::ModeChanged(BrspMode::RemoteCommand)));
}

#[test]
fn test_firmware_data_not_sent_before_mode_confirmed() {
    let session = BrspSession::new();
    let mut peripheral = Peripheral::new();
    open(&session, &mut peripheral);

    session.change_mode(BrspMode::FirmwareUpdate).unwrap();
    assert_eq!(
        session.write_bytes(&[0u8; 16]),
        Err(SessionError::ModeChangePending(BrspMode::FirmwareUpdate))
    );

    run_transport(&session, &mut peripheral);
    assert_eq!(session.mode(), BrspMode::FirmwareUpdate);
    assert!(peripheral.chunk_lens.is_empty(), "Data モードのうちに届いたデータはない");
}

#[test]
fn test_persistent_write_failure_gives_up() {
    let session = BrspSession::new();
    let mut peripheral = Peripheral::new();
    open(&session, &mut peripheral);
    peripheral.write_failures_left = u32::MAX;

    session.write_bytes(b"never delivered").unwrap();
    run_transport(&session, &mut peripheral);

    assert!(!session.is_sending());
    assert_eq!(session.output_buffer_count(), 0);
    assert!(session.drain_events().contains(&SessionEvent::Error(
        SessionError::WriteAttemptsExhausted {
            attempts: 3,
            dropped: 15,
        }
    )));
    assert!(session.change_mode(BrspMode::RemoteCommand).is_ok());
}

#[test]
fn test_close_keeps_unread_data_and_ignores_late_bytes() {
    let session = BrspSession::new();
    let mut peripheral = Peripheral::new();
    open(&session, &mut peripheral);

    session.write_bytes(b"abc").unwrap();
    run_transport(&session, &mut peripheral);

    session.close();
    assert_eq!(session.poll_action(), Some(TransportAction::Shutdown));
    assert!(!session.is_open());

    assert_eq!(session.on_bytes_received(b"late"), Err(SessionError::NotOpen));
    assert_eq!(session.read_all_bytes(), b"abc");
}

#[test]
fn test_open_failure_is_reported_as_event() {
    let session = BrspSession::new();
    session.open();
    assert_eq!(session.poll_action(), Some(TransportAction::Prepare));
    session.on_open_failed(TransportError::new(8, "service not found"));

    assert!(!session.is_open());
    let events = session.drain_events();
    assert!(matches!(
        events.as_slice(),
        [SessionEvent::Error(SessionError::Transport(_)), SessionEvent::OpenChanged(false)]
    ));
}

#[test]
fn test_session_from_json_config() {
    let config: SessionConfig =
        serde_json::from_str(r#"{"input_buffer_size": 32, "max_write_len": 4}"#).unwrap();
    let session = BrspSession::with_config(config).unwrap();
    assert_eq!(session.input_buffer_size(), 32);
    assert_eq!(session.output_buffer_size(), 1024);

    let json = serde_json::to_string(&session.stats()).unwrap();
    assert!(json.contains(r#""is_open":false"#));
    assert!(json.contains(r#""mode":1"#));
}

// ==============================================================
// OTA
// ==============================================================

/// FirmwareUpdate モードに切り替え、バッファを空にする
fn enter_firmware_mode(session: &BrspSession, peripheral: &mut Peripheral) {
    session.change_mode(BrspMode::FirmwareUpdate).unwrap();
    run_transport(session, peripheral);
    assert_eq!(session.mode(), BrspMode::FirmwareUpdate);
    session.flush_input_buffer();
    session.flush_output_buffer();
}

#[test]
fn test_full_ota_with_factory_reset() {
    let image = firmware(600);
    let session = BrspSession::new();
    let mut peripheral = Peripheral::new().expecting_image(&image);
    open(&session, &mut peripheral);
    enter_firmware_mode(&session, &mut peripheral);
    session.drain_events();

    let mut driver = OtaDriver::new(OtaUpdatePlan::new(&image, true).unwrap());
    run_ota(&session, &mut peripheral, &mut driver).unwrap();

    assert!(peripheral.applied);
    assert_eq!(driver.state(), OtaState::Complete);
    assert_eq!(driver.progress().blocks_sent, 3);
    assert!(!session.is_open());

    // 想定された切断なのでエラーイベントは出ない
    let events = session.drain_events();
    assert!(events.contains(&SessionEvent::OpenChanged(false)));
    assert!(!events.iter().any(|e| matches!(e, SessionEvent::Error(_))));
}

#[test]
fn test_ota_retries_after_crc_failure() {
    let image = firmware(1000);
    let session = BrspSession::new();
    let mut peripheral = Peripheral::new().expecting_image(&image);
    peripheral.crc_failures_left = 1;
    open(&session, &mut peripheral);
    enter_firmware_mode(&session, &mut peripheral);

    let mut driver = OtaDriver::new(OtaUpdatePlan::new(&image, true).unwrap());
    run_ota(&session, &mut peripheral, &mut driver).unwrap();

    assert_eq!(driver.state(), OtaState::Complete);
    assert_eq!(driver.progress().attempt, 2);
    assert!(peripheral.applied);
}

#[test]
fn test_ota_gives_up_after_retry_limit() {
    let image = firmware(300);
    let session = BrspSession::new();
    let mut peripheral = Peripheral::new().expecting_image(&image);
    peripheral.crc_failures_left = 10;
    open(&session, &mut peripheral);
    enter_firmware_mode(&session, &mut peripheral);

    let plan = OtaUpdatePlan::new(&image, true).unwrap();
    let mut driver = OtaDriver::with_config(plan, OtaDriverConfig { max_attempts: 2 });
    let result = run_ota(&session, &mut peripheral, &mut driver);

    assert_eq!(result, Err(PumpError::Ota(OtaError::RetriesExhausted(2))));
    assert_eq!(driver.state(), OtaState::Failed);
    assert!(!peripheral.applied);
    assert!(session.is_open(), "OTA の失敗でセッションは閉じない");
}

#[test]
fn test_ota_without_reset_applies_separately() {
    let image = firmware(256);
    let session = BrspSession::new();
    let mut peripheral = Peripheral::new().expecting_image(&image);
    open(&session, &mut peripheral);
    enter_firmware_mode(&session, &mut peripheral);

    let mut driver = OtaDriver::new(OtaUpdatePlan::new(&image, false).unwrap());
    run_ota(&session, &mut peripheral, &mut driver).unwrap();
    assert_eq!(driver.state(), OtaState::Verified);
    assert!(!peripheral.applied);

    let apply = driver.apply_update().unwrap();
    session.write_bytes(apply).unwrap();
    run_transport(&session, &mut peripheral);
    driver.on_disconnected().unwrap();

    assert!(peripheral.applied);
    assert_eq!(driver.state(), OtaState::Complete);
}

#[test]
fn test_close_during_ota_is_abandoned() {
    let image = firmware(2048);
    let session = BrspSession::new();
    let mut peripheral = Peripheral::new().expecting_image(&image);
    open(&session, &mut peripheral);
    enter_firmware_mode(&session, &mut peripheral);

    let mut driver = OtaDriver::new(OtaUpdatePlan::new(&image, true).unwrap());
    for _ in 0..3 {
        pump(&mut driver, &session).unwrap();
        run_transport(&session, &mut peripheral);
    }
    assert!(!driver.is_finished());

    session.close();
    assert_eq!(driver.on_disconnected(), Err(OtaError::Abandoned));
    assert_eq!(driver.state(), OtaState::Failed);
    assert!(!peripheral.applied);
}

// ==============================================================
// 並行アクセス
// ==============================================================

/// トランスポート文脈（producer）とアプリ文脈（consumer）から同時に触っても
/// 入力バイトが順序通り・欠落なしで読み出せることを確認
#[test]
fn test_concurrent_producer_consumer() {
    const TOTAL: usize = 20_000;

    let session = Arc::new(BrspSession::with_buffer_sizes(64, 64).unwrap());
    session.open();
    session.poll_action();
    session.on_opened(Capabilities::default());

    let data: Vec<u8> = (0..TOTAL).map(|i| (i % 251) as u8).collect();

    let producer = {
        let session = Arc::clone(&session);
        let data = data.clone();
        thread::spawn(move || {
            let mut sent = 0;
            while sent < data.len() {
                // 空きを超えない範囲で渡す（空きは consumer 側でしか増えない）
                let space = session.input_buffer_size() - session.input_buffer_count();
                if space == 0 {
                    thread::yield_now();
                    continue;
                }
                let end = (sent + space.min(17)).min(data.len());
                let n = session.on_bytes_received(&data[sent..end]).unwrap();
                sent += n;
            }
        })
    };

    let consumer = {
        let session = Arc::clone(&session);
        thread::spawn(move || {
            let mut received = Vec::with_capacity(TOTAL);
            while received.len() < TOTAL {
                let chunk = session.read_bytes(13);
                if chunk.is_empty() {
                    session.drain_events();
                    thread::yield_now();
                }
                received.extend_from_slice(&chunk);
            }
            received
        })
    };

    producer.join().unwrap();
    let received = consumer.join().unwrap();

    assert_eq!(received, data);
    assert_eq!(session.stats().total_dropped_bytes, 0);
    assert_eq!(session.stats().total_received_bytes, TOTAL as u64);
}
