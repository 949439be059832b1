//! # brsp-session
//!
//! BRSP (BlueRadios Serial Protocol) のセッションエンジン。
//!
//! 通知駆動の双方向バイトトランスポート（BLE GATT）の上に仮想シリアルポートを構築する。
//! このクレートは I/O を一切行わない。トランスポート役のホスト（Web Bluetooth の JS、
//! ネイティブ BLE スタック、テストダブル）が通知メソッドを呼び、
//! `poll_action()` で要求された書き込みを実行する。
//!
//! ## データの流れ
//!
//! ```text
//! 受信:
//!   GATT notify → session.on_bytes_received(bytes) → 入力 RingBuffer
//!                                                   → SessionEvent::DataReceived
//!   アプリ → session.read_bytes(n) / peek_bytes(n)
//!
//! 送信:
//!   アプリ → session.write_bytes(data) → 出力 RingBuffer (isSending = true)
//!   ホスト → session.poll_action() → TransportAction::Send(chunk) → GATT write
//!   ホスト → session.on_write_complete() → 出力 RingBuffer から chunk を消費
//! ```
//!
//! ## セッションの状態遷移
//!
//! ```text
//! Closed ──open()──→ Opening ──on_opened()──→ Open
//!    ↑                  │                       │
//!    └─on_open_failed()─┘                       │
//!    └──────────── close() / on_disconnected() ─┘
//! ```
//!
//! ## モード
//!
//! `Idle=0, Data=1, RemoteCommand=2, FirmwareUpdate=4`。
//! 送信中（isSending）はモード変更できない。モードは相手からの確認通知
//! （`on_mode_changed`）を受けて初めて切り替わる。

#![no_std]
extern crate alloc;

mod config;
mod error;
mod event;
pub mod mode;
pub mod session;

pub use config::SessionConfig;
pub use error::{ErrorKind, SessionError, TransportError};
pub use event::{SessionEvent, TransportAction};
pub use mode::{BrspMode, Capabilities, ModeNegotiator, SecurityLevel};
pub use session::{BrspSession, SessionStats};

pub use brsp_buffer::DEFAULT_BUFFER_SIZE;

/// BRSP サービス UUID（スキャン時のフィルタに使う）
pub const BRSP_SERVICE_UUID: &str = "DA2B84F1-6279-48DE-BDC0-AFBEA0226079";

/// 1 回の GATT write で送るデフォルト最大バイト数
/// ATT MTU 23 - ヘッダー 3 = 20 バイト（BLE 4.0 の最小保証値）
pub const DEFAULT_MAX_WRITE_LEN: usize = 20;

/// 同じ chunk の write を試すデフォルト回数
pub const DEFAULT_MAX_WRITE_ATTEMPTS: u32 = 3;
