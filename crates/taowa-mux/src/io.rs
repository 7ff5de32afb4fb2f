//! I/O 抽象层.
//!
//! 为读取器和 Segment 组装器提供统一的数据读写接口, 支持文件与
//! 内存缓冲后端. 输出文件在 Segment 组装器的整个生命周期内由其
//! 独占; 回填 (SeekHead、Duration、Segment 大小) 通过
//! `overwrite_at` 原地写入.

use std::io::{self, Read, Seek, SeekFrom, Write};

use taowa_core::{MuxError, MuxResult};

/// I/O 后端 trait
pub trait IoBackend: Send {
    /// 读取数据到缓冲区
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// 全部写入
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    /// 定位
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;
    /// 当前位置
    fn position(&mut self) -> io::Result<u64>;
    /// 总大小 (如果可知)
    fn size(&self) -> Option<u64>;
    /// 是否支持 seek
    fn is_seekable(&self) -> bool;
    /// 截断到指定长度 (中止时丢弃残尾)
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

/// 默认读缓冲大小 (64 KB)
const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// I/O 上下文
pub struct IoContext {
    inner: Box<dyn IoBackend>,
    buffer: Vec<u8>,
    buf_len: usize,
    buf_pos: usize,
}

impl IoContext {
    /// 从 I/O 后端创建上下文
    pub fn new(backend: Box<dyn IoBackend>) -> Self {
        Self {
            inner: backend,
            buffer: vec![0u8; DEFAULT_BUFFER_SIZE],
            buf_len: 0,
            buf_pos: 0,
        }
    }

    /// 打开文件 (只读)
    pub fn open_read(path: &str) -> MuxResult<Self> {
        let file = std::fs::File::open(path)?;
        Ok(Self::new(Box::new(FileBackend::new(file))))
    }

    /// 创建文件 (写入, 截断)
    pub fn open_write(path: &str) -> MuxResult<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::new(Box::new(FileBackend::new(file))))
    }

    // ========================
    // 读取方法
    // ========================

    /// 读满缓冲区, 数据不足报 Eof
    pub fn read_exact(&mut self, buf: &mut [u8]) -> MuxResult<()> {
        let mut total = 0;
        while total < buf.len() {
            let buffered = self.buf_len - self.buf_pos;
            if buffered > 0 {
                let take = buffered.min(buf.len() - total);
                buf[total..total + take]
                    .copy_from_slice(&self.buffer[self.buf_pos..self.buf_pos + take]);
                self.buf_pos += take;
                total += take;
            } else {
                self.buf_pos = 0;
                self.buf_len = self.inner.read(&mut self.buffer)?;
                if self.buf_len == 0 {
                    return Err(MuxError::Eof);
                }
            }
        }
        Ok(())
    }

    /// 读取至多 `buf.len()` 字节, 返回实际读取量 (0 = EOF)
    pub fn read_some(&mut self, buf: &mut [u8]) -> MuxResult<usize> {
        let buffered = self.buf_len - self.buf_pos;
        if buffered > 0 {
            let take = buffered.min(buf.len());
            buf[..take].copy_from_slice(&self.buffer[self.buf_pos..self.buf_pos + take]);
            self.buf_pos += take;
            return Ok(take);
        }
        Ok(self.inner.read(buf)?)
    }

    /// 读取 1 个字节
    pub fn read_u8(&mut self) -> MuxResult<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// 读取指定数量的字节
    pub fn read_bytes(&mut self, count: usize) -> MuxResult<Vec<u8>> {
        let mut buf = vec![0u8; count];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// 读取剩余全部内容
    pub fn read_to_end(&mut self) -> MuxResult<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.buffer[self.buf_pos..self.buf_len]);
        self.buf_pos = self.buf_len;
        let mut chunk = [0u8; 16 * 1024];
        loop {
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        Ok(out)
    }

    /// 跳过指定字节数
    pub fn skip(&mut self, count: usize) -> MuxResult<()> {
        let buffered = self.buf_len - self.buf_pos;
        if count <= buffered {
            self.buf_pos += count;
            return Ok(());
        }
        let remaining = count - buffered;
        self.buf_pos = self.buf_len;
        if self.inner.is_seekable() {
            self.inner.seek(SeekFrom::Current(remaining as i64))?;
        } else {
            let mut left = remaining;
            let mut chunk = [0u8; 16 * 1024];
            while left > 0 {
                let n = self.inner.read(&mut chunk[..left.min(16 * 1024)])?;
                if n == 0 {
                    return Err(MuxError::Eof);
                }
                left -= n;
            }
        }
        Ok(())
    }

    // ========================
    // 写入方法
    // ========================

    /// 写入全部数据
    pub fn write_all(&mut self, buf: &[u8]) -> MuxResult<()> {
        self.inner.write_all(buf)?;
        Ok(())
    }

    /// 在指定位置原地写入, 完成后回到原位置
    ///
    /// Segment 大小、SeekHead 与 Duration 回填使用.
    pub fn overwrite_at(&mut self, position: u64, buf: &[u8]) -> MuxResult<()> {
        let current = self.position()?;
        self.seek(SeekFrom::Start(position))?;
        self.inner.write_all(buf)?;
        self.seek(SeekFrom::Start(current))?;
        Ok(())
    }

    // ========================
    // 定位方法
    // ========================

    /// 定位 (会清空读缓冲)
    pub fn seek(&mut self, pos: SeekFrom) -> MuxResult<u64> {
        self.buf_pos = 0;
        self.buf_len = 0;
        Ok(self.inner.seek(pos)?)
    }

    /// 当前位置 (计入读缓冲中尚未消耗的数据)
    pub fn position(&mut self) -> MuxResult<u64> {
        let raw = self.inner.position()?;
        Ok(raw - (self.buf_len - self.buf_pos) as u64)
    }

    /// 是否支持随机访问
    pub fn is_seekable(&self) -> bool {
        self.inner.is_seekable()
    }

    /// 总大小
    pub fn size(&self) -> Option<u64> {
        self.inner.size()
    }

    /// 截断到指定长度 (中止时在最后一个完整簇边界收尾)
    pub fn truncate(&mut self, len: u64) -> MuxResult<()> {
        self.buf_pos = 0;
        self.buf_len = 0;
        self.inner.truncate(len)?;
        Ok(())
    }
}

// ============================================================
// 文件后端
// ============================================================

/// 文件 I/O 后端
pub struct FileBackend {
    file: std::fs::File,
}

impl FileBackend {
    /// 包装一个已打开的文件
    pub fn new(file: std::fs::File) -> Self {
        Self { file }
    }
}

impl IoBackend for FileBackend {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.file.write_all(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }

    fn position(&mut self) -> io::Result<u64> {
        self.file.stream_position()
    }

    fn size(&self) -> Option<u64> {
        self.file.metadata().ok().map(|m| m.len())
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }
}

// ============================================================
// 内存后端 (测试)
// ============================================================

/// 内存缓冲后端
#[derive(Default)]
pub struct MemoryBackend {
    data: Vec<u8>,
    pos: usize,
}

impl MemoryBackend {
    /// 创建空缓冲
    pub fn new() -> Self {
        Self::default()
    }

    /// 从既有数据创建
    pub fn from_data(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    /// 取出全部内容
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// 查看内容
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl IoBackend for MemoryBackend {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.data.len().saturating_sub(self.pos);
        let take = available.min(buf.len());
        buf[..take].copy_from_slice(&self.data[self.pos..self.pos + take]);
        self.pos += take;
        Ok(take)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let end = self.pos + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(())
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(delta) => self.data.len() as i64 + delta,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
        };
        if new_pos < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "负偏移"));
        }
        self.pos = new_pos as usize;
        Ok(self.pos as u64)
    }

    fn position(&mut self) -> io::Result<u64> {
        Ok(self.pos as u64)
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.data.truncate(len as usize);
        self.pos = self.pos.min(self.data.len());
        Ok(())
    }
}
