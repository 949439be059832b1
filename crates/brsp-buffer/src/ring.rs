//! 固定容量リングバッファ実装

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use crate::error::BufferError;

/// 固定容量の循環バイトバッファ
///
/// 読み出しカーソル（`head`）と保持バイト数（`len`）で状態を表す。
/// 書き込み位置は `(head + len) % capacity` で求まる。
///
/// ## 不変条件
/// - `len <= capacity`
/// - 読み出し系は `len` を超えて返さない
/// - 書き込み系は `capacity - len` を超えて受け付けない
pub struct RingBuffer {
    /// バイト格納領域（構築時に確保、以後サイズ不変）
    storage: Box<[u8]>,
    /// 次に読み出す位置
    head: usize,
    /// 現在保持しているバイト数
    len: usize,
}

impl RingBuffer {
    /// 指定容量のリングバッファを生成する
    ///
    /// 容量 0 も許容する（常に満杯として振る舞う）。
    pub fn new(capacity: usize) -> Self {
        RingBuffer {
            storage: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    /// バッファの総容量
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// 保持しているバイト数
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// 書き込み可能な残り容量（`capacity - len`）
    pub fn available_space(&self) -> usize {
        self.capacity() - self.len
    }

    /// 入るだけ書き込む
    ///
    /// # 戻り値
    /// - `Ok(n)`: 全 `n` バイトを格納した
    /// - `Err(BufferError::Overflow)`: 先頭 `accepted` バイトだけ格納し、残りは拒否した
    pub fn write(&mut self, data: &[u8]) -> Result<usize, BufferError> {
        let accepted = data.len().min(self.available_space());
        self.push_slice(&data[..accepted]);

        if accepted < data.len() {
            let rejected = data.len() - accepted;
            log::warn!("ring buffer overflow: accepted {}, rejected {}", accepted, rejected);
            return Err(BufferError::Overflow { accepted, rejected });
        }
        Ok(accepted)
    }

    /// 全量が入る場合のみ書き込む（入らなければ何も格納しない）
    pub fn write_all(&mut self, data: &[u8]) -> Result<(), BufferError> {
        let available = self.available_space();
        if data.len() > available {
            return Err(BufferError::InsufficientSpace {
                requested: data.len(),
                available,
            });
        }
        self.push_slice(data);
        Ok(())
    }

    /// 先頭から最大 `n` バイトを読み出しカーソルを動かさずに返す
    ///
    /// `n` が保持バイト数を超える場合は保持分すべてを返す。
    /// `n == 0` または空の場合は空の Vec を返す。
    pub fn peek(&self, n: usize) -> Vec<u8> {
        let take = n.min(self.len);
        let mut out = Vec::with_capacity(take);
        if take == 0 {
            return out;
        }

        let (first, second) = self.segments(take);
        out.extend_from_slice(first);
        out.extend_from_slice(second);
        out
    }

    /// 保持バイトをすべて peek する
    pub fn peek_all(&self) -> Vec<u8> {
        self.peek(self.len)
    }

    /// 先頭から最大 `n` バイトを読み出して消費する
    pub fn read(&mut self, n: usize) -> Vec<u8> {
        let out = self.peek(n);
        self.advance(out.len());
        out
    }

    /// 保持バイトをすべて読み出して消費する
    pub fn read_all(&mut self) -> Vec<u8> {
        self.read(self.len)
    }

    /// 先頭から `n` バイトを読み捨てる（保持バイト数でクランプ）
    ///
    /// # 戻り値
    /// 実際に破棄したバイト数
    pub fn discard(&mut self, n: usize) -> usize {
        let take = n.min(self.len);
        self.advance(take);
        take
    }

    /// 保持バイトをすべて破棄する
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// 読み出し順で最初に `byte` が現れる位置を返す
    pub fn position(&self, byte: u8) -> Option<usize> {
        let (first, second) = self.segments(self.len);
        first
            .iter()
            .chain(second.iter())
            .position(|&b| b == byte)
    }

    // ===== Private メソッド =====

    /// 先頭から `n` バイトを連続領域 2 つに分けて返す（折り返し対応）
    fn segments(&self, n: usize) -> (&[u8], &[u8]) {
        if n == 0 {
            return (&[], &[]);
        }
        let cap = self.capacity();
        let first_len = n.min(cap - self.head);
        let first = &self.storage[self.head..self.head + first_len];
        let second = &self.storage[..n - first_len];
        (first, second)
    }

    /// 空き容量に収まることが確認済みのスライスを末尾に追加する
    fn push_slice(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let cap = self.capacity();
        let tail = (self.head + self.len) % cap;
        let first_len = data.len().min(cap - tail);

        self.storage[tail..tail + first_len].copy_from_slice(&data[..first_len]);
        let rest = &data[first_len..];
        self.storage[..rest.len()].copy_from_slice(rest);

        self.len += data.len();
    }

    /// 読み出しカーソルを `n` バイト進める（`n <= len` は呼び出し側が保証）
    fn advance(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        self.head = (self.head + n) % self.capacity();
        self.len -= n;
        // 空になったらカーソルを先頭に戻し、次の書き込みを折り返さずに済ませる
        if self.len == 0 {
            self.head = 0;
        }
    }
}

impl core::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len)
            .field("head", &self.head)
            .finish()
    }
}
