//! 码流解析器产出的帧.

use bytes::Bytes;

/// 解析器切出的一帧
///
/// 时间戳与时长可能缺失 (由 Packetizer 按轨道参数推算).
#[derive(Debug, Clone)]
pub struct Frame {
    /// 帧数据
    pub data: Bytes,
    /// 绝对时间戳 (纳秒), 解析器可推算时填写
    pub timestamp_ns: Option<i64>,
    /// 时长 (纳秒)
    pub duration_ns: Option<i64>,
    /// 是否为关键帧
    pub key_frame: bool,
    /// 后向引用帧的绝对时间戳 (纳秒)
    pub bref_ns: Option<i64>,
    /// 自上一帧以来头部参数是否变化 (采样率、声道等)
    pub params_changed: bool,
}

impl Frame {
    /// 以数据构造帧, 其余字段取缺省
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            timestamp_ns: None,
            duration_ns: None,
            key_frame: true,
            bref_ns: None,
            params_changed: false,
        }
    }
}
