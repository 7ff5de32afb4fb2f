//! HEVC SPS (Sequence Parameter Set) 解析.
//!
//! 从激活的 SPS 导出: 图像尺寸、色度格式、PAR (用于显示尺寸
//! 换算), 以及 VUI timing_info 存在时的默认帧时长.
//! profile/tier/level 的原始字段一并捕获, 供 hevcC 构造使用.

use taowa_core::timestamp::NS_PER_SECOND;
use taowa_core::{BitReader, MuxError, MuxResult, Rational};

use super::nal::remove_emulation_prevention;

/// 预定义 SAR 表 (ITU-T H.265 表 E.1)
const SAR_TABLE: [(u32, u32); 17] = [
    (0, 1),
    (1, 1),
    (12, 11),
    (10, 11),
    (16, 11),
    (40, 33),
    (24, 11),
    (20, 11),
    (32, 11),
    (80, 33),
    (18, 11),
    (15, 11),
    (64, 33),
    (160, 99),
    (4, 3),
    (3, 2),
    (2, 1),
];

/// profile_tier_level 的原始字段 (hevcC 需要)
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileTierLevel {
    pub profile_space: u8,
    pub tier_flag: bool,
    pub profile_idc: u8,
    pub compatibility_flags: u32,
    /// general_constraint_indicator_flags 的高 48 位
    pub constraint_flags: u64,
    pub level_idc: u8,
}

/// SPS 解析结果
#[derive(Debug, Clone)]
pub struct HevcSps {
    /// SPS 所引用的 VPS ID
    pub vps_id: u8,
    /// 最大子层数
    pub max_sub_layers: u8,
    /// 时序 ID 嵌套标志
    pub temporal_id_nesting: bool,
    /// profile/tier/level 原始字段
    pub ptl: ProfileTierLevel,
    /// SPS ID
    pub sps_id: u64,
    /// 色度格式 (0=单色, 1=4:2:0, 2=4:2:2, 3=4:4:4)
    pub chroma_format_idc: u64,
    /// 亮度位深
    pub bit_depth_luma: u64,
    /// 色度位深
    pub bit_depth_chroma: u64,
    /// 图像宽度 (已应用 conformance window 裁剪)
    pub width: u64,
    /// 图像高度 (已应用 conformance window 裁剪)
    pub height: u64,
    /// 像素宽高比
    pub par: Rational,
    /// VUI timing_info 导出的帧时长 (纳秒)
    pub frame_duration_ns: Option<i64>,
}

impl HevcSps {
    /// 按 PAR 换算的显示尺寸
    pub fn display_dimensions(&self) -> (u64, u64) {
        if self.par.is_valid() && self.par.num >= self.par.den {
            (self.par.scale(self.width), self.height)
        } else if self.par.is_valid() {
            (self.width, self.par.invert().scale(self.height))
        } else {
            (self.width, self.height)
        }
    }
}

fn parse_profile_tier_level(
    br: &mut BitReader,
    max_sub_layers: u8,
) -> MuxResult<ProfileTierLevel> {
    let profile_space = br.read_bits(2)? as u8;
    let tier_flag = br.read_bit()?;
    let profile_idc = br.read_bits(5)? as u8;
    let compatibility_flags = br.read_bits(32)? as u32;
    // progressive/interlaced/non-packed/frame-only + 44 位约束标志
    let constraint_flags = br.read_bits(48)?;
    let level_idc = br.read_bits(8)? as u8;

    if max_sub_layers > 1 {
        let mut profile_present = Vec::new();
        let mut level_present = Vec::new();
        for _ in 0..max_sub_layers - 1 {
            profile_present.push(br.read_bit()?);
            level_present.push(br.read_bit()?);
        }
        for _ in max_sub_layers - 1..8 {
            br.skip_bits(2)?; // reserved
        }
        for i in 0..(max_sub_layers - 1) as usize {
            if profile_present[i] {
                br.skip_bits(88)?;
            }
            if level_present[i] {
                br.skip_bits(8)?;
            }
        }
    }

    Ok(ProfileTierLevel {
        profile_space,
        tier_flag,
        profile_idc,
        compatibility_flags,
        constraint_flags,
        level_idc,
    })
}

fn skip_scaling_list_data(br: &mut BitReader) -> MuxResult<()> {
    for size_id in 0..4u32 {
        let matrices = if size_id == 3 { 2 } else { 6 };
        for _ in 0..matrices {
            if !br.read_bit()? {
                // pred_mode = 0: delta 引用
                br.read_ue()?;
            } else {
                let coef_num = 64u32.min(1 << (4 + (size_id << 1)));
                if size_id > 1 {
                    br.read_se()?; // dc 系数
                }
                for _ in 0..coef_num {
                    br.read_se()?;
                }
            }
        }
    }
    Ok(())
}

fn skip_short_term_rps(
    br: &mut BitReader,
    idx: u64,
    prev_num_delta_pocs: &mut u64,
) -> MuxResult<()> {
    let inter_rps_pred = if idx > 0 { br.read_bit()? } else { false };
    if inter_rps_pred {
        br.read_bit()?; // delta_rps_sign
        br.read_ue()?; // abs_delta_rps_minus1
        let mut kept = 0u64;
        for _ in 0..=*prev_num_delta_pocs {
            let used = br.read_bit()?;
            if used {
                kept += 1;
            } else if br.read_bit()? {
                kept += 1;
            }
        }
        *prev_num_delta_pocs = kept;
    } else {
        let num_negative = br.read_ue()?;
        let num_positive = br.read_ue()?;
        for _ in 0..num_negative + num_positive {
            br.read_ue()?; // delta_poc_minus1
            br.read_bit()?; // used_by_curr_pic
        }
        *prev_num_delta_pocs = num_negative + num_positive;
    }
    Ok(())
}

/// 解析 SPS NAL (输入含 2 字节 NAL 头的原始字节)
pub fn parse_sps(nal_data: &[u8]) -> MuxResult<HevcSps> {
    if nal_data.len() < 5 {
        return Err(MuxError::malformed_at_unknown("HEVC: SPS 太短"));
    }
    let clean = remove_emulation_prevention(&nal_data[2..]);
    let mut br = BitReader::new(&clean);

    let vps_id = br.read_bits(4)? as u8;
    let max_sub_layers = br.read_bits(3)? as u8 + 1;
    let temporal_id_nesting = br.read_bit()?;
    let ptl = parse_profile_tier_level(&mut br, max_sub_layers)?;

    let sps_id = br.read_ue()?;
    let chroma_format_idc = br.read_ue()?;
    if chroma_format_idc == 3 {
        br.skip_bits(1)?; // separate_colour_plane
    }

    let pic_width = br.read_ue()?;
    let pic_height = br.read_ue()?;

    let (mut left, mut right, mut top, mut bottom) = (0u64, 0u64, 0u64, 0u64);
    if br.read_bit()? {
        left = br.read_ue()?;
        right = br.read_ue()?;
        top = br.read_ue()?;
        bottom = br.read_ue()?;
    }

    let bit_depth_luma = br.read_ue()? + 8;
    let bit_depth_chroma = br.read_ue()? + 8;
    let log2_max_poc = br.read_ue()? + 4;

    let sub_layer_ordering = br.read_bit()?;
    let start = if sub_layer_ordering {
        0
    } else {
        u32::from(max_sub_layers) - 1
    };
    for _ in start..u32::from(max_sub_layers) {
        br.read_ue()?; // max_dec_pic_buffering
        br.read_ue()?; // max_num_reorder_pics
        br.read_ue()?; // max_latency_increase
    }

    br.read_ue()?; // log2_min_luma_coding_block_size
    br.read_ue()?; // log2_diff_max_min_luma_coding_block_size
    br.read_ue()?; // log2_min_transform_block_size
    br.read_ue()?; // log2_diff_max_min_transform_block_size
    br.read_ue()?; // max_transform_hierarchy_depth_inter
    br.read_ue()?; // max_transform_hierarchy_depth_intra

    if br.read_bit()? {
        // scaling_list_enabled
        if br.read_bit()? {
            skip_scaling_list_data(&mut br)?;
        }
    }

    br.skip_bits(2)?; // amp_enabled, sao_enabled

    if br.read_bit()? {
        // pcm_enabled
        br.skip_bits(8)?; // 位深
        br.read_ue()?; // log2_min_pcm_luma
        br.read_ue()?; // log2_diff_max_min_pcm_luma
        br.skip_bits(1)?; // pcm_loop_filter_disabled
    }

    let num_short_term_rps = br.read_ue()?;
    let mut prev_delta_pocs = 0u64;
    for i in 0..num_short_term_rps {
        skip_short_term_rps(&mut br, i, &mut prev_delta_pocs)?;
    }

    if br.read_bit()? {
        // long_term_ref_pics_present
        let num = br.read_ue()?;
        for _ in 0..num {
            br.skip_bits(log2_max_poc as u32)?;
            br.skip_bits(1)?;
        }
    }

    br.skip_bits(2)?; // temporal_mvp, strong_intra_smoothing

    let mut par = Rational::UNDEFINED;
    let mut frame_duration_ns = None;
    if br.read_bit()? {
        // vui_parameters_present
        if br.read_bit()? {
            // aspect_ratio_info_present
            let idc = br.read_bits(8)? as usize;
            if idc == 255 {
                let w = br.read_bits(16)? as u32;
                let h = br.read_bits(16)? as u32;
                par = Rational::new(w, h);
            } else if idc < SAR_TABLE.len() {
                let (w, h) = SAR_TABLE[idc];
                par = Rational::new(w, h);
            }
        }
        if br.read_bit()? {
            br.skip_bits(1)?; // overscan_appropriate
        }
        if br.read_bit()? {
            // video_signal_type
            br.skip_bits(4)?;
            if br.read_bit()? {
                br.skip_bits(24)?; // colour description
            }
        }
        if br.read_bit()? {
            // chroma_loc_info
            br.read_ue()?;
            br.read_ue()?;
        }
        br.skip_bits(3)?; // neutral_chroma, field_seq, frame_field_info
        if br.read_bit()? {
            // default_display_window
            br.read_ue()?;
            br.read_ue()?;
            br.read_ue()?;
            br.read_ue()?;
        }
        if br.read_bit()? {
            // timing_info_present
            let num_units_in_tick = br.read_bits(32)?;
            let time_scale = br.read_bits(32)?;
            if num_units_in_tick > 0 && time_scale > 0 {
                frame_duration_ns =
                    Some((num_units_in_tick as i64 * NS_PER_SECOND) / time_scale as i64);
            }
        }
    }

    // conformance window 以色度单位计
    let sub_width_c: u64 = if chroma_format_idc == 1 || chroma_format_idc == 2 { 2 } else { 1 };
    let sub_height_c: u64 = if chroma_format_idc == 1 { 2 } else { 1 };

    Ok(HevcSps {
        vps_id,
        max_sub_layers,
        temporal_id_nesting,
        ptl,
        sps_id,
        chroma_format_idc,
        bit_depth_luma,
        bit_depth_chroma,
        width: pic_width - sub_width_c * (left + right),
        height: pic_height - sub_height_c * (top + bottom),
        par,
        frame_duration_ns,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 按位构造一个最小 SPS (4:2:0, 64x64, 25fps timing)
    pub(crate) fn make_sps_rbsp() -> Vec<u8> {
        let mut bits: Vec<bool> = Vec::new();
        let push_bits = |value: u64, width: u32, bits: &mut Vec<bool>| {
            for i in (0..width).rev() {
                bits.push((value >> i) & 1 != 0);
            }
        };
        let push_ue = |value: u64, bits: &mut Vec<bool>| {
            let v = value + 1;
            let len = 64 - v.leading_zeros();
            for _ in 0..len - 1 {
                bits.push(false);
            }
            for i in (0..len).rev() {
                bits.push((v >> i) & 1 != 0);
            }
        };

        push_bits(0, 4, &mut bits); // vps_id
        push_bits(0, 3, &mut bits); // max_sub_layers_minus1
        push_bits(1, 1, &mut bits); // temporal_id_nesting
        // profile_tier_level
        push_bits(0, 2, &mut bits); // profile_space
        push_bits(0, 1, &mut bits); // tier
        push_bits(1, 5, &mut bits); // profile_idc = Main
        push_bits(0x6000_0000, 32, &mut bits); // compatibility
        push_bits(0x9000_0000_0000 >> 4, 48, &mut bits); // constraints
        push_bits(93, 8, &mut bits); // level 3.1
        push_ue(0, &mut bits); // sps_id
        push_ue(1, &mut bits); // chroma_format_idc 4:2:0
        push_ue(64, &mut bits); // pic_width
        push_ue(64, &mut bits); // pic_height
        push_bits(0, 1, &mut bits); // conformance_window
        push_ue(0, &mut bits); // bit_depth_luma_minus8
        push_ue(0, &mut bits); // bit_depth_chroma_minus8
        push_ue(4, &mut bits); // log2_max_poc_minus4
        push_bits(1, 1, &mut bits); // sub_layer_ordering_present
        push_ue(4, &mut bits); // max_dec_pic_buffering
        push_ue(0, &mut bits); // max_num_reorder
        push_ue(0, &mut bits); // max_latency
        push_ue(0, &mut bits); // log2_min_cb
        push_ue(3, &mut bits); // log2_diff_max_min_cb
        push_ue(0, &mut bits); // log2_min_tb
        push_ue(3, &mut bits); // log2_diff_max_min_tb
        push_ue(0, &mut bits); // depth inter
        push_ue(0, &mut bits); // depth intra
        push_bits(0, 1, &mut bits); // scaling_list_enabled
        push_bits(0, 2, &mut bits); // amp, sao
        push_bits(0, 1, &mut bits); // pcm_enabled
        push_ue(0, &mut bits); // num_short_term_rps
        push_bits(0, 1, &mut bits); // long_term_ref_pics
        push_bits(0, 2, &mut bits); // temporal_mvp, strong_intra
        // VUI
        push_bits(1, 1, &mut bits); // vui_present
        push_bits(1, 1, &mut bits); // aspect_ratio_info
        push_bits(1, 8, &mut bits); // idc 1 → 1:1
        push_bits(0, 1, &mut bits); // overscan
        push_bits(0, 1, &mut bits); // video_signal_type
        push_bits(0, 1, &mut bits); // chroma_loc
        push_bits(0, 3, &mut bits); // neutral/field/frame_field
        push_bits(0, 1, &mut bits); // default_display_window
        push_bits(1, 1, &mut bits); // timing_info
        push_bits(1, 32, &mut bits); // num_units_in_tick
        push_bits(25, 32, &mut bits); // time_scale
        push_bits(1, 1, &mut bits); // rbsp_stop_one_bit

        // 打包为字节 (2 字节 NAL 头在前)
        let mut out = vec![0x42, 0x01];
        let mut acc = 0u8;
        let mut n = 0;
        for b in bits {
            acc = (acc << 1) | u8::from(b);
            n += 1;
            if n == 8 {
                out.push(acc);
                acc = 0;
                n = 0;
            }
        }
        if n > 0 {
            out.push(acc << (8 - n));
        }
        out
    }

    #[test]
    fn test_sps_解析() {
        let sps = parse_sps(&make_sps_rbsp()).unwrap();
        assert_eq!(sps.width, 64);
        assert_eq!(sps.height, 64);
        assert_eq!(sps.chroma_format_idc, 1);
        assert_eq!(sps.bit_depth_luma, 8);
        assert_eq!(sps.ptl.profile_idc, 1);
        assert_eq!(sps.ptl.level_idc, 93);
        assert_eq!(sps.par, Rational::new(1, 1));
        // 25fps → 40ms
        assert_eq!(sps.frame_duration_ns, Some(40_000_000));
    }

    #[test]
    fn test_显示尺寸换算() {
        let mut sps = parse_sps(&make_sps_rbsp()).unwrap();
        sps.width = 720;
        sps.height = 576;
        sps.par = Rational::new(16, 11);
        assert_eq!(sps.display_dimensions(), (1047, 576));
        sps.par = Rational::new(1, 2);
        assert_eq!(sps.display_dimensions(), (720, 1152));
    }

    #[test]
    fn test_太短报错() {
        assert!(parse_sps(&[0x42, 0x01]).is_err());
    }
}
