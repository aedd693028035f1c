//! 生成代码校验
//!
//! 只做结构层面的检查，结果作为警告返回，不阻断翻译。

use super::blocks::leading_word;
use super::lexer::{CommentStyle, Lexer};
use super::SyntaxIssue;
use crate::domain::translation::TargetLanguage;

/// 残留的伪代码关键字（翻译后不应出现在行首）
const PSEUDO_MARKERS: &[&str] = &[
    "ENDIF", "ENDWHILE", "ENDFOR", "ENDFUNCTION", "ENDPROCEDURE", "PROCEDURE", "ALGORITHM",
    "REPEAT", "UNTIL", "DISPLAY", "OUTPUT", "FOREACH",
];

/// 校验生成代码
pub fn validate(code: &str, language: &TargetLanguage) -> Vec<SyntaxIssue> {
    let mut issues = Vec::new();
    if code.trim().is_empty() {
        issues.push(SyntaxIssue::new(1, 1, "generated code is empty"));
        return issues;
    }

    let style = CommentStyle::for_comment_prefix(language.comment_prefix());
    let mut lexer = Lexer::new(style);
    let indentation_based = language.is_indentation_based();

    let mut brace_stack: Vec<(usize, usize)> = Vec::new();
    // (行号, 缩进)：等待缩进体的冒号头部
    let mut pending_header: Option<(usize, usize)> = None;

    for raw in code.lines() {
        let scan = lexer.scan_line(raw);
        if scan.starts_in_literal || scan.is_blank() {
            continue;
        }

        if scan.mixed_indent {
            issues.push(SyntaxIssue::new(scan.line, 1, "indentation mixes tabs and spaces"));
        }

        if indentation_based {
            if let Some((header_line, header_indent)) = pending_header.take() {
                if scan.indent <= header_indent {
                    issues.push(SyntaxIssue::new(
                        header_line,
                        header_indent + 1,
                        format!("expected an indented block after line {}", header_line),
                    ));
                }
            }
            if scan.masked.trim_end().ends_with(':') {
                pending_header = Some((scan.line, scan.indent));
            }
        } else {
            for (col, ch) in scan.masked.chars().enumerate() {
                match ch {
                    '{' => brace_stack.push((scan.line, col + 1)),
                    '}' => {
                        if brace_stack.pop().is_none() {
                            issues.push(SyntaxIssue::new(scan.line, col + 1, "unmatched '}'"));
                        }
                    }
                    _ => {}
                }
            }
        }

        // 只认大写关键字，避免误伤名为 output 的变量
        let word = leading_word(&scan.masked);
        let trimmed = scan.masked.trim();
        let leftover_then = word == "IF" && trimmed.ends_with(" THEN");
        if PSEUDO_MARKERS.contains(&word) || leftover_then || is_upper_end(trimmed) {
            issues.push(SyntaxIssue::new(
                scan.line,
                scan.indent + 1,
                format!("line looks like untranslated pseudocode: {}", trimmed),
            ));
        }
    }

    if let Some((header_line, header_indent)) = pending_header {
        issues.push(SyntaxIssue::new(
            header_line,
            header_indent + 1,
            format!("expected an indented block after line {}", header_line),
        ));
    }
    for (line, column) in brace_stack {
        issues.push(SyntaxIssue::new(line, column, "unclosed '{'"));
    }

    issues.extend(lexer.finish());
    issues.sort_by_key(|i| (i.line, i.column));
    issues
}

/// 行首大写 `END`（Lua、Ruby 的小写 `end` 不算）
fn is_upper_end(trimmed: &str) -> bool {
    let word = leading_word(trimmed);
    word == "END" || word.starts_with("END_")
}
