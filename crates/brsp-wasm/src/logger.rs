//! `log` ファサードをブラウザコンソールに流す Logger

use alloc::format;

use log::{Level, LevelFilter, Log, Metadata, Record};
use wasm_bindgen::prelude::*;

/// `console.error / warn / info / debug / log` に振り分ける Logger
struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = JsValue::from_str(&format!("[{}] {}", record.target(), record.args()));
        match record.level() {
            Level::Error => web_sys::console::error_1(&line),
            Level::Warn => web_sys::console::warn_1(&line),
            Level::Info => web_sys::console::info_1(&line),
            Level::Debug => web_sys::console::debug_1(&line),
            Level::Trace => web_sys::console::log_1(&line),
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

/// ログレベル文字列を解釈する（省略時は info）
pub fn parse_level(level: Option<&str>) -> Result<LevelFilter, String> {
    match level {
        None => Ok(LevelFilter::Info),
        Some(s) => s
            .trim()
            .parse::<LevelFilter>()
            .map_err(|_| format!("Unknown log level: {}", s)),
    }
}

/// コンソール Logger を登録する
///
/// 2 回目以降の呼び出しはレベルの変更だけ行う。
///
/// # 引数
/// - `level`: `"off" | "error" | "warn" | "info" | "debug" | "trace"`（省略時は `"info"`）
///
/// # 例（TypeScript）
/// ```typescript
/// initLogger("debug");
/// ```
#[wasm_bindgen(js_name = "initLogger")]
pub fn init_logger(level: Option<String>) -> Result<(), JsError> {
    let filter = parse_level(level.as_deref()).map_err(|e| JsError::new(&e))?;
    // 既に登録済みなら Err が返るが、レベル変更は有効
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(filter);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level(None), Ok(LevelFilter::Info));
        assert_eq!(parse_level(Some("debug")), Ok(LevelFilter::Debug));
        assert_eq!(parse_level(Some(" WARN ")), Ok(LevelFilter::Warn));
        assert_eq!(parse_level(Some("off")), Ok(LevelFilter::Off));
        assert!(parse_level(Some("verbose")).is_err());
    }
}
