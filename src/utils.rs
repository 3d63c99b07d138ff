use indicatif::ProgressStyle;
use regex::Regex;

/// 默认扫描的图片后缀
pub const DEFAULT_SUFFIX: &str = "jpg,jpeg,png,webp,bmp,tif,tiff,heic,heif,nef,cr2,arw,raf";

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
        .expect("invalid progress bar template")
        .progress_chars("##-")
}

/// 将逗号分隔的后缀列表编译为大小写不敏感的正则表达式
pub fn suffix_regex(suffix: &str) -> Result<Regex, regex::Error> {
    let alternatives = suffix
        .split(',')
        .map(|s| regex::escape(s.trim().trim_start_matches('.')))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i)^({})$", alternatives))
}

/// 截取最后 `n` 行
pub fn tail_lines(text: &str, n: usize) -> Vec<String> {
    let lines = text.lines().map(|l| l.trim().to_owned()).collect::<Vec<_>>();
    let skip = lines.len().saturating_sub(n);
    lines.into_iter().skip(skip).collect()
}
