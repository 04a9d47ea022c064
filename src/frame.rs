//! 帧重组
//!
//! 事件流按任意大小的字节块到达，这里把字节块拼接后按空行分隔符切成完整帧。
//! 支持 `\n\n` 与 `\r\n\r\n` 两种分隔符，分隔符本身跨块也能正确识别。

use std::borrow::Cow;

/// LF 风格的帧分隔符
pub const LF_SEPARATOR: &[u8] = b"\n\n";

/// CRLF 风格的帧分隔符
pub const CRLF_SEPARATOR: &[u8] = b"\r\n\r\n";

/// 最长分隔符的长度（续扫时回退的字节数依赖它）
const MAX_SEPARATOR_LEN: usize = 4;

/// 一个完整的服务端推送帧（不含分隔符）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame(Vec<u8>);

impl RawFrame {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 按 UTF-8 解码（非法字节替换为 U+FFFD）
    pub fn to_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

/// 帧重组器
///
/// 在整个事件流生命周期内持续存在；中途清空只能通过显式的 [`reset`](Self::reset)。
#[derive(Debug, Default)]
pub struct FrameReassembler {
    /// 尚未切出的字节
    buffer: Vec<u8>,
    /// buffer 中已确认不含完整分隔符的前缀长度
    scanned: usize,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加字节块，返回本次可切出的帧（惰性迭代）
    ///
    /// 未被迭代取走的帧仍留在缓冲区，下次调用时继续产出，不会丢失。
    pub fn feed(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(chunk);
        Frames { reassembler: self }
    }

    /// 缓冲区中等待分隔符的字节数
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// 丢弃缓冲区，返回被丢弃的字节数
    pub fn reset(&mut self) -> usize {
        let discarded = self.buffer.len();
        self.buffer.clear();
        self.scanned = 0;
        if discarded > 0 {
            tracing::debug!("🧹 FrameReassembler reset, discarded {} bytes", discarded);
        }
        discarded
    }

    fn next_frame(&mut self) -> Option<RawFrame> {
        // 分隔符可能横跨上次扫描的末尾，回退 MAX_SEPARATOR_LEN - 1 字节续扫
        let start = self.scanned.saturating_sub(MAX_SEPARATOR_LEN - 1);

        match find_separator(&self.buffer[start..]) {
            Some((offset, sep_len)) => {
                let end = start + offset;
                let frame = self.buffer[..end].to_vec();
                self.buffer.drain(..end + sep_len);
                self.scanned = 0;
                Some(RawFrame(frame))
            }
            None => {
                self.scanned = self.buffer.len();
                None
            }
        }
    }
}

/// 帧迭代器，见 [`FrameReassembler::feed`]
pub struct Frames<'a> {
    reassembler: &'a mut FrameReassembler,
}

impl Iterator for Frames<'_> {
    type Item = RawFrame;

    fn next(&mut self) -> Option<RawFrame> {
        self.reassembler.next_frame()
    }
}

/// 查找最早出现的分隔符，返回 (偏移, 分隔符长度)
fn find_separator(buf: &[u8]) -> Option<(usize, usize)> {
    (0..buf.len()).find_map(|i| {
        let rest = &buf[i..];
        if rest.starts_with(LF_SEPARATOR) {
            Some((i, LF_SEPARATOR.len()))
        } else if rest.starts_with(CRLF_SEPARATOR) {
            Some((i, CRLF_SEPARATOR.len()))
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = "event: partial_command\ndata: {\"command\":\"searching\"}\n\n\
                          event: command_result\ndata: {\"entity\":\"a.txt\",\"type\":\"File\"}\n\n\
                          event: finished_chat\ndata: {}\n\n";

    fn collect_all(chunks: &[&[u8]]) -> Vec<RawFrame> {
        let mut reassembler = FrameReassembler::new();
        let mut frames = Vec::new();
        for chunk in chunks {
            frames.extend(reassembler.feed(chunk));
        }
        frames
    }

    #[test]
    fn test_single_chunk() {
        let frames = collect_all(&[STREAM.as_bytes()]);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].to_text(), "event: finished_chat\ndata: {}");
    }

    #[test]
    fn test_every_two_way_split_is_identical() {
        let bytes = STREAM.as_bytes();
        let expected = collect_all(&[bytes]);

        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(collect_all(&[a, b]), expected, "split at {}", split);
        }
    }

    #[test]
    fn test_byte_by_byte() {
        let bytes = STREAM.as_bytes();
        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(collect_all(&chunks), collect_all(&[bytes]));
    }

    #[test]
    fn test_crlf_separator_split_inside() {
        let stream = b"event: finished_chat\r\ndata: {}\r\n\r\n";
        let expected = collect_all(&[stream]);
        assert_eq!(expected.len(), 1);

        // 切在 "\r\n\r\n" 的每一个位置
        let sep_start = stream.len() - 4;
        for split in sep_start..stream.len() {
            let (a, b) = stream.split_at(split);
            assert_eq!(collect_all(&[a, b]), expected, "split at {}", split);
        }
    }

    #[test]
    fn test_remainder_stays_buffered() {
        let mut reassembler = FrameReassembler::new();

        let frames: Vec<_> = reassembler.feed(b"data: {}\n\ndata: {\"par").collect();
        assert_eq!(frames, vec![RawFrame::new("data: {}")]);
        assert_eq!(reassembler.buffered_len(), "data: {\"par".len());

        let frames: Vec<_> = reassembler.feed(b"tial\":1}\n").collect();
        assert!(frames.is_empty());

        let frames: Vec<_> = reassembler.feed(b"\n").collect();
        assert_eq!(frames, vec![RawFrame::new("data: {\"partial\":1}")]);
        assert_eq!(reassembler.buffered_len(), 0);
    }

    #[test]
    fn test_unconsumed_frames_are_not_lost() {
        let mut reassembler = FrameReassembler::new();

        // 只取第一帧
        let first = reassembler.feed(b"a\n\nb\n\n").next();
        assert_eq!(first, Some(RawFrame::new("a")));

        let rest: Vec<_> = reassembler.feed(b"").collect();
        assert_eq!(rest, vec![RawFrame::new("b")]);
    }

    #[test]
    fn test_empty_frames_between_separators() {
        let frames = collect_all(&[b"a\n\n\n\nb\n\n"]);
        assert_eq!(
            frames,
            vec![RawFrame::new("a"), RawFrame::new(""), RawFrame::new("b")]
        );
    }

    #[test]
    fn test_reset() {
        let mut reassembler = FrameReassembler::new();
        assert_eq!(reassembler.feed(b"data: half").count(), 0);
        assert_eq!(reassembler.reset(), 10);
        assert_eq!(reassembler.buffered_len(), 0);

        // reset 之后的新数据独立成帧
        let frames: Vec<_> = reassembler.feed(b"data: {}\n\n").collect();
        assert_eq!(frames, vec![RawFrame::new("data: {}")]);
    }
}
