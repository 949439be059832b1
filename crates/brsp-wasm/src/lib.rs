//! # brsp-wasm
//!
//! wasm-bindgen エクスポート：Web Bluetooth を使うブラウザ側 JS から呼び出す公開 API。
//!
//! GATT の接続・characteristic の購読・write は JS 側が行う。
//! このクレートはその結果を `BrspClient` に通知し、`BrspClient` が要求する操作を返すだけ。
//!
//! ## 使用方法（TypeScript）
//!
//! ```typescript
//! import { BrspClient, OtaUpdater, initLogger, init_panic_hook } from './brsp-wasm-pkg/brsp_wasm';
//!
//! init_panic_hook();
//! initLogger("debug");
//!
//! const client = new BrspClient();          // 入出力 1024 バイト
//! client.open();
//!
//! // セッションが要求する操作を GATT で実行する
//! function drain() {
//!     for (let a = client.pollAction(); a !== undefined; a = client.pollAction()) {
//!         switch (a.type) {
//!             case "prepare":   subscribe().then(caps => client.onOpened(caps.data, caps.rc, caps.fw, caps.security));
//!                               break;
//!             case "writeMode": modeChar.writeValue(Uint8Array.of(a.mode)); break;
//!             case "send":      rxChar.writeValue(a.data).then(() => { client.onWriteComplete(); drain(); });
//!                               return;
//!             case "shutdown":  unsubscribe(); break;
//!         }
//!     }
//! }
//!
//! txChar.addEventListener("characteristicvaluechanged", e => {
//!     client.onBytesReceived(new Uint8Array(e.target.value.buffer));
//! });
//!
//! client.writeString("ATI\r");
//! drain();
//! ```

use wasm_bindgen::prelude::*;

extern crate alloc;

pub mod client;
pub mod logger;
pub mod ota;

pub use client::BrspClient;
pub use ota::{pump, OtaUpdater, PumpError};

/// パニック時にブラウザコンソールにスタックトレースを出力する
///
/// 開発時に必ず呼び出すこと。本番ビルドでは feature flag で無効化可能。
#[wasm_bindgen]
pub fn init_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// BRSP サービス UUID（`navigator.bluetooth.requestDevice` のフィルタ用）
#[wasm_bindgen(js_name = "brspServiceUuid")]
pub fn brsp_service_uuid() -> String {
    brsp_session::BRSP_SERVICE_UUID.to_lowercase()
}

/// Base64 のファームウェアイメージをバイト列に戻す
///
/// 標準アルファベット・パディングあり（RFC 4648）を受け付ける。
///
/// # エラー
/// - Base64 デコード失敗
/// - デコード結果が空
pub fn decode_firmware_base64(image_b64: &str) -> Result<Vec<u8>, String> {
    use base64::Engine as _;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(image_b64.trim())
        .map_err(|e| alloc::format!("Invalid base64 firmware image: {}", e))?;
    if bytes.is_empty() {
        return Err(alloc::format!("{}", brsp_ota::OtaError::EmptyImage));
    }
    Ok(bytes)
}

/// `decode_firmware_base64` の JS 版
#[wasm_bindgen(js_name = "decodeFirmwareBase64")]
pub fn decode_firmware_base64_js(image_b64: &str) -> Result<js_sys::Uint8Array, JsError> {
    let bytes = decode_firmware_base64(image_b64).map_err(|e| JsError::new(&e))?;
    let arr = js_sys::Uint8Array::new_with_length(bytes.len() as u32);
    arr.copy_from(&bytes);
    Ok(arr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_firmware_base64() {
        assert_eq!(decode_firmware_base64("AQID").unwrap(), vec![1, 2, 3]);
        assert_eq!(decode_firmware_base64(" AQID\n").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_decode_firmware_base64_rejects_garbage_and_empty() {
        assert!(decode_firmware_base64("!!!").is_err());
        assert!(decode_firmware_base64("").is_err());
    }

    #[test]
    fn test_service_uuid_is_lowercase() {
        let uuid = brsp_service_uuid();
        assert_eq!(uuid, "da2b84f1-6279-48de-bdc0-afbea0226079");
    }
}
