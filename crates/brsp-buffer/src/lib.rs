//! # brsp-buffer
//!
//! BRSP の入力/出力ストリームで使う固定容量リングバッファ。
//!
//! ## 容量の扱い
//!
//! ```text
//! capacity = 8, len = 5
//!
//!   storage: [ d e . . . a b c ]
//!                    ^head = 5
//!   読み出し順: a b c d e
//! ```
//!
//! - `len` は常に `0..=capacity`
//! - 書き込みは空き容量を超えて受け付けない（超過分は拒否して報告する）
//! - 読み出し/peek は保持バイト数までクランプされる（エラーではない）
//!
//! バッファ自体は I/O も排他制御も行わない。セッション側
//! （`brsp-session`）が入力・出力それぞれを Mutex で保護する。

#![no_std]
extern crate alloc;

mod error;
pub mod ring;

pub use error::BufferError;
pub use ring::RingBuffer;

/// BRSP のデフォルトバッファ容量（入力・出力とも）
pub const DEFAULT_BUFFER_SIZE: usize = 1024;
