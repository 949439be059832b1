//! セッションとホストの間でやり取りするイベント・アクション

use alloc::vec::Vec;

use crate::error::SessionError;
use crate::mode::BrspMode;

/// 観測者へ通知するイベント
///
/// セッションごとに 1 本の順序付きキューで配送される（`BrspSession::poll_event`）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// open/close の状態が変わった
    OpenChanged(bool),
    /// isSending が変わった
    SendingChanged(bool),
    /// 入力バッファにデータが書き込まれた
    DataReceived,
    /// エラー（入力溢れ・トランスポートエラー）
    Error(SessionError),
    /// 相手のモード変更が確定した
    ModeChanged(BrspMode),
}

/// ホスト（トランスポート）に実行してほしい操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportAction {
    /// サービス/キャラクタリスティック探索と通知購読を開始する
    /// 完了したら `on_opened` / `on_open_failed` を呼ぶこと
    Prepare,
    /// 通知を止めてトランスポート活動を終了する
    Shutdown,
    /// モード変更コマンドを書き込む
    /// 相手の確認通知が届いたら `on_mode_changed` を呼ぶこと
    WriteMode(BrspMode),
    /// データを 1 回の write で送信する
    /// 完了したら `on_write_complete` / `on_write_failed` を呼ぶこと
    Send(Vec<u8>),
}
