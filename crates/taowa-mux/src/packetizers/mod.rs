//! 各编码格式的 Packetizer 实现.

pub mod aac;
pub mod ac3;
pub mod dts;
pub mod flac;
pub mod hevc_es;
pub mod passthrough;
pub mod textsubs;
pub mod vc1;
pub mod vobbtn;
pub mod vorbis;

pub use aac::AacPacketizer;
pub use ac3::Ac3Packetizer;
pub use dts::DtsPacketizer;
pub use flac::FlacPacketizer;
pub use hevc_es::HevcEsPacketizer;
pub use passthrough::PassthroughPacketizer;
pub use textsubs::TextSubsPacketizer;
pub use vc1::Vc1Packetizer;
pub use vobbtn::VobBtnPacketizer;
pub use vorbis::VorbisPacketizer;
