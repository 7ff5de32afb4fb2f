//! taowa-probe - EBML 元素树诊断工具
//!
//! 逐元素打印偏移、ID、名称、大小与叶子值, 便于核对输出文件的
//! 结构. 未注册的元素按 dummy 打印并整体跳过.

use clap::Parser;
use std::process;

use taowa_core::MuxError;
use taowa_ebml::registry::{self, Descriptor};
use taowa_ebml::{ElementKind, LeafValue, leaf, vint};

#[derive(Parser, Debug)]
#[command(name = "taowa-probe", version, about = "EBML 元素树诊断工具")]
struct Cli {
    /// 要检查的 Matroska/EBML 文件
    input: String,

    /// 打印的最大层级深度 (0 = 不限)
    #[arg(short, long, default_value_t = 0)]
    depth: usize,

    /// 不打印 Cluster 的内部结构
    #[arg(long)]
    skip_clusters: bool,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("错误: {e}");
        process::exit(2);
    }
}

fn run(cli: &Cli) -> Result<(), MuxError> {
    let data = std::fs::read(&cli.input)?;
    println!("# {} ({} 字节)", cli.input, data.len());

    let stack: Vec<&'static Descriptor> = vec![&registry::ROOT];
    let mut pos = 0usize;
    while pos < data.len() {
        pos += dump_element(&data[pos..], pos, &stack, 0, cli)?;
    }
    Ok(())
}

/// 打印一个元素并返回消耗的字节数
fn dump_element(
    buf: &[u8],
    absolute: usize,
    stack: &[&'static Descriptor],
    level: usize,
    cli: &Cli,
) -> Result<usize, MuxError> {
    let (id, id_len) = vint::read_id(buf)?;
    let (size, size_len) = vint::read_size(&buf[id_len..])?;
    let head_len = id_len + size_len;

    let desc = registry::lookup(stack, id).map(|(d, _)| d);
    let name = desc.map_or("(unknown)", |d| d.name);
    let indent = "  ".repeat(level);
    let size_text = match size {
        vint::VintValue::Known(n) => n.to_string(),
        vint::VintValue::Unknown => "未知".to_owned(),
    };

    match desc.map(|d| d.kind) {
        Some(ElementKind::Master) => {
            println!("{indent}+ {name} [{id:X}] @{absolute} 大小 {size_text}");
            let desc = desc.expect("master 必有描述符");
            let mut child_stack = stack.to_vec();
            child_stack.push(desc);

            let hide = cli.skip_clusters && id == taowa_ebml::ids::CLUSTER;
            let too_deep = cli.depth > 0 && level + 1 >= cli.depth;

            let mut pos = head_len;
            match size {
                vint::VintValue::Known(data_len) => {
                    let end = head_len + data_len as usize;
                    if buf.len() < end {
                        return Err(MuxError::UnexpectedEof);
                    }
                    if hide || too_deep {
                        return Ok(end);
                    }
                    while pos < end {
                        pos += dump_element(
                            &buf[pos..end],
                            absolute + pos,
                            &child_stack,
                            level + 1,
                            cli,
                        )?;
                    }
                }
                vint::VintValue::Unknown => {
                    while pos < buf.len() {
                        let Ok((next_id, _)) = vint::read_id(&buf[pos..]) else {
                            break;
                        };
                        match registry::lookup(&child_stack, next_id) {
                            Some((_, 0)) => {}
                            _ => break,
                        }
                        pos += dump_element(
                            &buf[pos..],
                            absolute + pos,
                            &child_stack,
                            level + 1,
                            cli,
                        )?;
                    }
                }
            }
            Ok(pos)
        }
        kind => {
            let data_len = size.known().ok_or_else(|| {
                MuxError::malformed_at_unknown(format!("叶子元素 {name} 声明未知大小"))
            })? as usize;
            if buf.len() < head_len + data_len {
                return Err(MuxError::UnexpectedEof);
            }
            let payload = &buf[head_len..head_len + data_len];
            let value_text = kind
                .map(|k| format_leaf(k, payload))
                .unwrap_or_else(|| "…".to_owned());
            println!("{indent}- {name} [{id:X}] @{absolute} 大小 {data_len}: {value_text}");
            Ok(head_len + data_len)
        }
    }
}

fn format_leaf(kind: ElementKind, payload: &[u8]) -> String {
    match leaf::LeafValue::parse(kind, payload) {
        Ok(LeafValue::UInt(v)) => v.to_string(),
        Ok(LeafValue::SInt(v)) => v.to_string(),
        Ok(LeafValue::Float(v)) => format!("{v}"),
        Ok(LeafValue::String(s)) | Ok(LeafValue::Utf8(s)) => format!("\"{s}\""),
        Ok(LeafValue::Date(v)) => format!("纪元纳秒 {v}"),
        Ok(LeafValue::Binary(b)) => {
            let preview: String = b
                .iter()
                .take(12)
                .map(|byte| format!("{byte:02X} "))
                .collect();
            if b.len() > 12 {
                format!("{preview}… ({} 字节)", b.len())
            } else {
                format!("{preview}({} 字节)", b.len())
            }
        }
        Err(_) => "(无法解析)".to_owned(),
    }
}
