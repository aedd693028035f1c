//! 生成代码中的顶层导入语句识别

use super::TargetLanguage;

/// 单行顶层导入语句（多行形式不识别，留在原位）
pub fn is_top_level_import(line: &str, language: &TargetLanguage) -> bool {
    if line.starts_with(char::is_whitespace) {
        return false;
    }
    let line = line.trim_end();
    match language.as_str() {
        "python" => {
            let single_line = !line.ends_with('(') && !line.ends_with('\\') && !line.contains(';');
            let is_import = line.starts_with("import ")
                || (line.starts_with("from ") && line.contains(" import "));
            is_import && single_line
        }
        "javascript" | "typescript" => {
            if !line.starts_with("import ") && !line.starts_with("import{") {
                return false;
            }
            let braces_closed = !line.contains('{') || line.contains('}');
            let terminated = line.ends_with(';') || line.ends_with('\'') || line.ends_with('"');
            braces_closed && terminated
        }
        _ => false,
    }
}

/// 必须排在最前面的导入
pub fn is_leading_import(line: &str, language: &TargetLanguage) -> bool {
    language.as_str() == "python" && line.starts_with("from __future__ ")
}
