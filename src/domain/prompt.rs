//! 提示词构建与代码提取
//!
//! 本地与远程后端共用同一种提示词格式。

use crate::domain::translation::{Chunk, TargetLanguage};

/// 构建单个分块的提示词
pub fn build_prompt(chunk: &Chunk, language: &TargetLanguage) -> String {
    let name = language.display_name();
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "# Task: Convert the following instruction to {} code\n",
        name
    ));
    if let Some(context) = chunk.leading_context.as_deref() {
        prompt.push_str("# Context (already translated, do not repeat):\n");
        for line in context.lines() {
            prompt.push_str(&format!("#   {}\n", line));
        }
    }
    if chunk.nesting_depth > 0 {
        prompt.push_str(&format!(
            "# Note: this fragment starts {} block level(s) deep\n",
            chunk.nesting_depth
        ));
    }
    if chunk.continues {
        prompt.push_str("# Note: the last block continues in the next fragment, leave it open\n");
    }
    prompt.push_str("# Instruction:\n");
    prompt.push_str(&chunk.source_text);
    if !chunk.source_text.ends_with('\n') {
        prompt.push('\n');
    }
    prompt.push_str(&format!("# {} Code:\n", name));
    prompt
}

/// 从模型输出中提取代码
///
/// 优先取第一个 Markdown 代码块；没有代码块时去掉提示词回显后原样返回。
pub fn extract_code(response: &str) -> String {
    if let Some(code) = fenced_block(response) {
        return code;
    }
    let mut lines: Vec<&str> = response.lines().collect();
    while let Some(first) = lines.first() {
        let trimmed = first.trim_start();
        if trimmed.starts_with("# Task:") || (trimmed.starts_with('#') && trimmed.ends_with(" Code:")) {
            lines.remove(0);
        } else {
            break;
        }
    }
    let mut code = lines.join("\n");
    if response.ends_with('\n') && !code.is_empty() {
        code.push('\n');
    }
    code
}

fn fenced_block(response: &str) -> Option<String> {
    let start = response.find("```")?;
    let after_fence = &response[start + 3..];
    // 跳过语言标记
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    let code = &body[..end];
    Some(code.to_string())
}
