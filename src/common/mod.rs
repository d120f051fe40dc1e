//! 公共工具模块

/// 安全地截断 UTF-8 字符串，确保不会在多字节字符中间截断
///
/// 返回不超过 `max_bytes` 字节的最长有效 UTF-8 子串
pub fn truncate_str_safe(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }

    // 从 max_bytes 位置向前查找有效的字符边界
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }

    &s[..end]
}

/// 安全地截断字符串并添加省略号后缀
pub fn truncate_with_ellipsis(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }

    // 为省略号预留空间
    let truncate_at = if max_bytes > 3 { max_bytes - 3 } else { max_bytes };
    let truncated = truncate_str_safe(s, truncate_at);
    format!("{}...", truncated)
}

/// 把多行文本压成单行预览
pub fn single_line_preview(s: &str, max_bytes: usize) -> String {
    let flat = s.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_with_ellipsis(&flat, max_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundary() {
        // "你" 占 3 字节
        assert_eq!(truncate_str_safe("你好", 4), "你");
        assert_eq!(truncate_str_safe("abc", 10), "abc");
        assert_eq!(truncate_str_safe("你好", 2), "");
    }

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("hello", 5), "hello");
        assert_eq!(truncate_with_ellipsis("hello world", 8), "hello...");
    }

    #[test]
    fn test_single_line_preview() {
        assert_eq!(single_line_preview("Once\nupon  a\ttime", 80), "Once upon a time");
        assert_eq!(single_line_preview("Once\nupon a time", 10), "Once up...");
    }
}
