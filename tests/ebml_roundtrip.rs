//! EBML 往返与章节 XML 管线测试.

use taowa::ebml::{Element, XmlFlavor, ids, parse_all, parse_xml, registry, write_xml};
use taowa::mux::cluster::{ClusterScheduler, SchedulerConfig};
use taowa::codec::Packet;

#[test]
fn 元素树渲染解析往返() {
    let mut segment = Element::new(ids::SEGMENT).unwrap();

    let info = segment.get_child(ids::INFO);
    info.get_child(ids::TIMECODE_SCALE).set_uint(1_000_000).unwrap();
    info.get_child(ids::MUXING_APP).set_str("taowa").unwrap();
    info.get_child(ids::WRITING_APP).set_str("taowa 0.1.0").unwrap();
    info.get_child(ids::DURATION).set_float(98765.0).unwrap();
    info.get_child(ids::DATE_UTC).set_date(790_000_000_000_000_000).unwrap();

    let tracks = segment.get_child(ids::TRACKS);
    let entry = tracks.push(Element::new(ids::TRACK_ENTRY).unwrap());
    entry.get_child(ids::TRACK_NUMBER).set_uint(1).unwrap();
    entry.get_child(ids::TRACK_UID).set_uint(0xDEADBEEF).unwrap();
    entry.get_child(ids::TRACK_TYPE).set_uint(2).unwrap();
    entry.get_child(ids::CODEC_ID).set_str("A_AC3").unwrap();
    entry
        .get_child(ids::CODEC_PRIVATE)
        .set_binary(vec![1u8, 2, 3, 4, 5])
        .unwrap();

    let bytes = segment.render_complete(true).unwrap();
    let stack = vec![&registry::ROOT];
    let (parsed, consumed) = taowa::ebml::parse_element(&bytes, &stack).unwrap();
    assert_eq!(consumed, bytes.len());
    assert_eq!(parsed, segment, "parse(render(E)) == E");
}

#[test]
fn 章节_xml_往返_定值() {
    // 时间码 00:01:30.500000000 → 90500000000 ns
    let xml = "<Chapters><EditionEntry><ChapterAtom>\
<ChapterTimeStart>00:01:30.500000000</ChapterTimeStart>\
<ChapterDisplay><ChapterString>Intro</ChapterString>\
<ChapterLanguage>eng</ChapterLanguage></ChapterDisplay>\
</ChapterAtom></EditionEntry></Chapters>";

    let chapters = parse_xml(XmlFlavor::Chapters, xml, None).unwrap();
    let atom = chapters
        .find_child(ids::EDITION_ENTRY)
        .unwrap()
        .find_child(ids::CHAPTER_ATOM)
        .unwrap();

    assert_eq!(
        atom.find_child(ids::CHAPTER_TIME_START).unwrap().as_uint().unwrap(),
        90_500_000_000
    );
    assert!(atom.find_child(ids::CHAPTER_UID).unwrap().as_uint().unwrap() > 0);
    assert_eq!(
        atom.find_child(ids::CHAPTER_FLAG_HIDDEN).unwrap().as_uint().unwrap(),
        0
    );
    assert_eq!(
        atom.find_child(ids::CHAPTER_FLAG_ENABLED).unwrap().as_uint().unwrap(),
        1
    );
    let display = atom.find_child(ids::CHAPTER_DISPLAY).unwrap();
    assert_eq!(
        display.find_child(ids::CHAPTER_STRING).unwrap().as_str().unwrap(),
        "Intro"
    );
    assert_eq!(
        display.find_child(ids::CHAPTER_LANGUAGE).unwrap().as_str().unwrap(),
        "eng"
    );

    // xml → ebml → xml → ebml 保持文档 (模 空白与默认值注入)
    let written = write_xml(XmlFlavor::Chapters, &chapters);
    let reparsed = parse_xml(XmlFlavor::Chapters, &written, None).unwrap();
    assert_eq!(chapters, reparsed);

    // ebml 渲染 → 解析也往返
    let mut chapters_mut = chapters.clone();
    let bytes = chapters_mut.render_complete(true).unwrap();
    let segment_desc = registry::by_id(ids::SEGMENT).unwrap();
    let (parsed, _) = taowa::ebml::parse_element(&bytes, &vec![segment_desc]).unwrap();
    assert_eq!(parsed, chapters);
}

#[test]
fn 未知大小的簇枚举到下一个簇为止() {
    // 手工拼接: Cluster(未知大小){Timecode, SimpleBlock} Cluster(已知){...}
    let mut data = Vec::new();
    data.extend_from_slice(&[0x1F, 0x43, 0xB6, 0x75, 0xFF]); // Cluster, 未知大小
    data.extend_from_slice(&[0xE7, 0x81, 0x00]); // Timecode = 0
    // SimpleBlock: 轨道 1, 增量 0, 关键帧, 负载 2 字节
    data.extend_from_slice(&[0xA3, 0x86, 0x81, 0x00, 0x00, 0x80, 0xAA, 0xBB]);

    let mut second = Element::new(ids::CLUSTER).unwrap();
    second.get_child(ids::CLUSTER_TIMECODE).set_uint(5000).unwrap();
    data.extend_from_slice(&second.render_complete(true).unwrap());

    let segment_desc = registry::by_id(ids::SEGMENT).unwrap();
    let stack = vec![segment_desc];
    let (first, consumed) = taowa::ebml::parse_element(&data, &stack).unwrap();
    // 子元素枚举止于下一个 Cluster ID, 而非字节计数
    assert_eq!(first.children().len(), 2);
    assert_eq!(
        first.find_child(ids::CLUSTER_TIMECODE).unwrap().as_uint().unwrap(),
        0
    );
    assert!(first.find_child(ids::SIMPLE_BLOCK).is_some());

    let (next, _) = taowa::ebml::parse_element(&data[consumed..], &stack).unwrap();
    assert_eq!(
        next.find_child(ids::CLUSTER_TIMECODE).unwrap().as_uint().unwrap(),
        5000
    );
}

#[test]
fn b_帧引用解析() {
    // I(0ms) P(80ms, bref=0) B(40ms, bref=0, fref=80), 同簇
    let mut sched = ClusterScheduler::new(SchedulerConfig::default());
    sched.add_packet(Packet::key_frame(1, 0, vec![0u8; 4])).unwrap();
    sched
        .add_packet(Packet::with_bref(1, 80_000_000, 0, vec![1u8; 4]))
        .unwrap();
    let mut b = Packet::with_bref(1, 40_000_000, 0, vec![2u8; 4]);
    b.fref_ns = 80_000_000;
    sched.add_packet(b).unwrap();
    sched.flush().unwrap();

    let rendered = sched.take_rendered();
    assert_eq!(rendered.len(), 1);

    let segment_desc = registry::by_id(ids::SEGMENT).unwrap();
    let (cluster, _) =
        taowa::ebml::parse_element(&rendered[0].bytes, &vec![segment_desc]).unwrap();

    // 所有引用目标都在 [簇时间戳 - 32768, 簇时间戳 + 32767] 窗口内
    let cluster_ts = cluster
        .find_child(ids::CLUSTER_TIMECODE)
        .unwrap()
        .as_uint()
        .unwrap() as i64;
    for group in cluster.children().iter().filter(|c| c.id() == ids::BLOCK_GROUP) {
        for reference in group.children().iter().filter(|c| c.id() == ids::REFERENCE_BLOCK) {
            let delta = reference.as_sint().unwrap();
            assert!((-32768..=32767).contains(&delta));
            let _ = cluster_ts;
        }
    }
}

#[test]
fn 标签_xml_往返() {
    let xml = "<Tags><Tag><Targets><TargetTypeValue>50</TargetTypeValue></Targets>\
<Simple><Name>ARTIST</Name><String>Кино</String></Simple></Tag></Tags>";
    let tags = parse_xml(XmlFlavor::Tags, xml, None).unwrap();
    let written = write_xml(XmlFlavor::Tags, &tags);
    let reparsed = parse_xml(XmlFlavor::Tags, &written, None).unwrap();
    assert_eq!(tags, reparsed);

    // 渲染出的字节可由通用解析器读回
    let mut tags_mut = tags.clone();
    let bytes = tags_mut.render_complete(true).unwrap();
    let segment_desc = registry::by_id(ids::SEGMENT).unwrap();
    let (parsed, _) = taowa::ebml::parse_element(&bytes, &vec![segment_desc]).unwrap();
    assert_eq!(parsed, tags);
}

#[test]
fn 整文件解析() {
    // 渲染一个最小 EBML 头 + 空 Segment, parse_all 读回
    let mut ebml = Element::new(ids::EBML).unwrap();
    ebml.fix_mandatory();
    let mut data = ebml.render_complete(true).unwrap();
    let mut segment = Element::new(ids::SEGMENT).unwrap();
    segment.get_child(ids::INFO).get_child(ids::MUXING_APP).set_str("t").unwrap();
    data.extend_from_slice(&segment.render_complete(true).unwrap());

    let elements = parse_all(&data).unwrap();
    assert_eq!(elements.len(), 2);
    assert_eq!(
        elements[0].find_child(ids::DOC_TYPE).unwrap().as_str().unwrap(),
        "matroska"
    );
}
