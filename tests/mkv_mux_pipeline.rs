//! 端到端封装管线测试: AC-3 基本流 + SRT 字幕 → Matroska 文件.

use std::io::Write;

use taowa::ebml::{ids, parse_all};
use taowa::mux::cluster::{ClusterScheduler, SchedulerConfig};
use taowa::mux::packetizer::TrackOptions;
use taowa::mux::readers::{self, ReadStatus};
use taowa::mux::segment::{SegmentOptions, SegmentWriter};
use taowa::mux::{CueStrategy, IoContext};

/// 48kHz 立体声 192kbps 的合法 AC-3 帧
fn make_ac3_frame() -> Vec<u8> {
    let mut frame = vec![0u8; 768];
    frame[0] = 0x0B;
    frame[1] = 0x77;
    frame[4] = 20;
    frame[5] = 8 << 3;
    frame[6] = 0b0100_0000;
    frame
}

fn write_ac3_file(dir: &std::path::Path, frames: usize) -> String {
    let path = dir.join("audio.ac3");
    let mut f = std::fs::File::create(&path).unwrap();
    for _ in 0..frames {
        f.write_all(&make_ac3_frame()).unwrap();
    }
    path.to_str().unwrap().to_owned()
}

fn write_srt_file(dir: &std::path::Path) -> String {
    let path = dir.join("subs.srt");
    std::fs::write(
        &path,
        "1\n00:00:00,500 --> 00:00:02,000\n你好\n\n2\n00:00:02,500 --> 00:00:03,000\nBye\n",
    )
    .unwrap();
    path.to_str().unwrap().to_owned()
}

#[test]
fn ac3_与_srt_封装为_mkv() {
    let dir = tempfile::tempdir().unwrap();
    let ac3_path = write_ac3_file(dir.path(), 100);
    let srt_path = write_srt_file(dir.path());
    let out_path = dir.path().join("out.mkv");

    // 打开输入
    let mut readers: Vec<Box<dyn readers::Reader>> = vec![
        readers::open_input(&ac3_path, 1, TrackOptions::default()).unwrap(),
        readers::open_input(&srt_path, 2, TrackOptions::default()).unwrap(),
    ];

    // 轨道头
    let mut entries = Vec::new();
    for reader in &mut readers {
        entries.push(reader.packetizer_mut().set_headers().unwrap());
    }

    let mut sched = ClusterScheduler::new(SchedulerConfig::default());
    sched.set_cue_strategy(1, CueStrategy::IFrames);
    sched.set_cue_strategy(2, CueStrategy::None);

    let io = IoContext::open_write(out_path.to_str().unwrap()).unwrap();
    let mut writer = SegmentWriter::new(io, SegmentOptions::default());
    writer.write_prologue(entries, None, None, None).unwrap();

    // 主循环
    let mut active = vec![true, true];
    while active.iter().any(|&a| a) {
        for (i, reader) in readers.iter_mut().enumerate() {
            if !active[i] {
                continue;
            }
            if reader.read(&mut sched).unwrap() == ReadStatus::Done {
                active[i] = false;
            }
        }
        for rendered in sched.take_rendered() {
            writer.write_cluster(rendered).unwrap();
        }
    }
    for reader in &mut readers {
        reader.packetizer_mut().flush(&mut sched).unwrap();
    }
    sched.flush().unwrap();
    for rendered in sched.take_rendered() {
        writer.write_cluster(rendered).unwrap();
    }
    writer.finalize().unwrap();

    // 校验输出
    let data = std::fs::read(&out_path).unwrap();
    assert_eq!(&data[..4], &[0x1A, 0x45, 0xDF, 0xA3], "EBML 头 ID");

    let elements = parse_all(&data).unwrap();
    let segment = &elements[1];

    // 轨道
    let tracks = segment.find_child(ids::TRACKS).unwrap();
    assert_eq!(tracks.children().len(), 2);
    let audio = &tracks.children()[0];
    assert_eq!(
        audio.find_child(ids::CODEC_ID).unwrap().as_str().unwrap(),
        "A_AC3"
    );
    let audio_params = audio.find_child(ids::AUDIO).unwrap();
    assert_eq!(
        audio_params
            .find_child(ids::SAMPLING_FREQUENCY)
            .unwrap()
            .as_float()
            .unwrap(),
        48_000.0
    );
    assert_eq!(
        audio_params.find_child(ids::CHANNELS).unwrap().as_uint().unwrap(),
        2
    );
    let subs = &tracks.children()[1];
    assert_eq!(
        subs.find_child(ids::CODEC_ID).unwrap().as_str().unwrap(),
        "S_TEXT/UTF8"
    );

    // 100 帧 * 32ms = 3.2s → 单簇
    let clusters: Vec<_> = segment
        .children()
        .iter()
        .filter(|c| c.id() == ids::CLUSTER)
        .collect();
    assert_eq!(clusters.len(), 1);
    assert_eq!(
        clusters[0]
            .find_child(ids::CLUSTER_TIMECODE)
            .unwrap()
            .as_uint()
            .unwrap(),
        0
    );

    // 簇内: 100 个音频 SimpleBlock + 2 个字幕 BlockGroup
    let simple_blocks = clusters[0]
        .children()
        .iter()
        .filter(|c| c.id() == ids::SIMPLE_BLOCK)
        .count();
    let groups = clusters[0]
        .children()
        .iter()
        .filter(|c| c.id() == ids::BLOCK_GROUP)
        .count();
    assert_eq!(simple_blocks, 100);
    assert_eq!(groups, 2);

    // 字幕块带显式时长 (1.5s = 1500)
    let first_group = clusters[0]
        .children()
        .iter()
        .find(|c| c.id() == ids::BLOCK_GROUP)
        .unwrap();
    assert_eq!(
        first_group
            .find_child(ids::BLOCK_DURATION)
            .unwrap()
            .as_uint()
            .unwrap(),
        1500
    );

    // Cues 仅索引音频轨道
    let cues = segment.find_child(ids::CUES).unwrap();
    assert_eq!(cues.children().len(), 100);
    for point in cues.children() {
        let track = point
            .find_child(ids::CUE_TRACK_POSITIONS)
            .unwrap()
            .find_child(ids::CUE_TRACK)
            .unwrap()
            .as_uint()
            .unwrap();
        assert_eq!(track, 1);
    }

    // Duration 回填: 3.2s = 3200ms
    let duration = segment
        .find_child(ids::INFO)
        .unwrap()
        .find_child(ids::DURATION)
        .unwrap()
        .as_float()
        .unwrap();
    assert!((duration - 3200.0).abs() < 0.5, "时长 {duration}");
}

#[test]
fn 按大小分割产出多个分段() {
    let dir = tempfile::tempdir().unwrap();
    let ac3_path = write_ac3_file(dir.path(), 200);

    let mut reader = readers::open_input(&ac3_path, 1, TrackOptions::default()).unwrap();
    let entries = vec![reader.packetizer_mut().set_headers().unwrap()];

    // 逼小的簇与分割门限
    let mut config = SchedulerConfig::default();
    config.max_size = 16 * 1024;
    let mut sched = ClusterScheduler::new(config);

    let out1 = dir.path().join("part-001.mkv");
    let out2 = dir.path().join("part-002.mkv");

    let io = IoContext::open_write(out1.to_str().unwrap()).unwrap();
    let mut writer = Some(SegmentWriter::new(io, SegmentOptions::default()));
    writer
        .as_mut()
        .unwrap()
        .write_prologue(entries.clone(), None, None, None)
        .unwrap();

    let split_limit = 40 * 1024u64;
    let mut written = 0u64;
    let mut split_done = false;

    loop {
        let status = reader.read(&mut sched).unwrap();
        if status == ReadStatus::Done {
            break;
        }
        for rendered in sched.take_rendered() {
            if !split_done && written >= split_limit {
                let old = writer.take().unwrap();
                old.finalize().unwrap();
                let io = IoContext::open_write(out2.to_str().unwrap()).unwrap();
                let mut next = SegmentWriter::new(io, SegmentOptions::default());
                next.write_prologue(entries.clone(), None, None, None).unwrap();
                writer = Some(next);
                split_done = true;
            }
            written += rendered.bytes.len() as u64;
            writer.as_mut().unwrap().write_cluster(rendered).unwrap();
        }
    }
    sched.flush().unwrap();
    for rendered in sched.take_rendered() {
        writer.as_mut().unwrap().write_cluster(rendered).unwrap();
    }
    writer.take().unwrap().finalize().unwrap();

    assert!(split_done, "应触发分割");
    for path in [&out1, &out2] {
        let data = std::fs::read(path).unwrap();
        let elements = parse_all(&data).unwrap();
        assert_eq!(elements[0].id(), ids::EBML);
        assert!(elements[1].find_child(ids::CLUSTER).is_some());
    }
}
