//! # taowa-codec
//!
//! 码流解析库. 每种编码格式一个解析器, 从字节流中切出帧边界并提取
//! 参数 (采样率、声道、尺寸、默认帧时长等).
//!
//! 解析器契约: 维护一个有界的滚动缓冲; `add_bytes` 推进状态机并
//! 返回切出的完整帧; `flush` 吐出尾帧. 数据结束以显式的
//! `NeedMoreData` 区别于真正的解析失败.

pub mod codec_id;
pub mod frame;
pub mod packet;
pub mod parsers;

pub use codec_id::CodecId;
pub use frame::Frame;
pub use packet::Packet;
