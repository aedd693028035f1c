//! 结构块识别
//!
//! 支持三种块风格并可混用：
//! - 关键字块：`FUNCTION f(x)` … `END FUNCTION`，`IF c THEN` … `END IF`
//! - 花括号块：行尾 `{` … 行首 `}`
//! - 缩进块：行尾 `:`，由回退缩进关闭
//!
//! 关闭符遵循栈规则，总是先关闭最内层的块。

use serde::{Deserialize, Serialize};

use super::lexer::LineScan;
use super::SyntaxIssue;

/// 块类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Function,
    Class,
    Loop,
    Conditional,
    Generic,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Function => "function",
            BlockKind::Class => "class",
            BlockKind::Loop => "loop",
            BlockKind::Conditional => "conditional",
            BlockKind::Generic => "generic",
        }
    }
}

/// 块风格
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStyle {
    Keyword,
    Brace,
    Indent,
}

/// 解析出的结构块
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub kind: BlockKind,
    pub style: BlockStyle,
    pub header: String,
    pub start_line: usize,
    pub end_line: usize,
    /// 是否由显式关闭符或回退缩进正常关闭
    pub closed: bool,
    pub children: Vec<Block>,
}

/// 行的结构角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineShape {
    Plain,
    Open { kind: BlockKind, style: BlockStyle },
    /// `kind` 为 None 表示通用关闭符（`END`、`}`）
    Close { kind: Option<BlockKind>, style: BlockStyle },
    /// `ELSE`、`ELIF`、`} else {` 等
    Continue { style: BlockStyle },
}

const FUNCTION_WORDS: &[&str] = &[
    "FUNCTION", "FUNC", "PROCEDURE", "ALGORITHM", "DEF", "METHOD", "FN", "SUBROUTINE",
];
const CLASS_WORDS: &[&str] = &["CLASS", "STRUCT", "INTERFACE", "RECORD"];
const LOOP_WORDS: &[&str] = &["FOR", "FOREACH", "WHILE", "REPEAT", "LOOP", "DO"];
const CONDITIONAL_WORDS: &[&str] = &["IF", "SWITCH", "MATCH"];
const GENERIC_WORDS: &[&str] = &["BEGIN", "TRY", "WITH"];
const CONTINUE_WORDS: &[&str] = &[
    "ELSE", "ELSEIF", "ELIF", "CATCH", "EXCEPT", "FINALLY", "OTHERWISE",
];

/// 关键字对应的块类型
pub fn keyword_kind(word: &str) -> Option<BlockKind> {
    let upper = word.to_ascii_uppercase();
    let upper = upper.as_str();
    if FUNCTION_WORDS.contains(&upper) {
        Some(BlockKind::Function)
    } else if CLASS_WORDS.contains(&upper) {
        Some(BlockKind::Class)
    } else if LOOP_WORDS.contains(&upper) {
        Some(BlockKind::Loop)
    } else if CONDITIONAL_WORDS.contains(&upper) {
        Some(BlockKind::Conditional)
    } else if GENERIC_WORDS.contains(&upper) {
        Some(BlockKind::Generic)
    } else {
        None
    }
}

const MODIFIERS: &[&str] = &["async ", "export ", "pub ", "public ", "private ", "static "];

/// 去掉行首的修饰符（不区分大小写）
pub fn skip_modifiers(text: &str) -> &str {
    let mut rest = text.trim_start();
    for modifier in MODIFIERS {
        let matched = rest
            .get(..modifier.len())
            .map_or(false, |prefix| prefix.eq_ignore_ascii_case(modifier));
        if matched {
            rest = rest[modifier.len()..].trim_start();
        }
    }
    rest
}

/// 行首单词（去掉常见修饰符）
pub fn leading_word(text: &str) -> &str {
    let rest = skip_modifiers(text);
    let end = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    &rest[..end]
}

/// 判断一行的结构角色（输入为屏蔽后的代码）
pub fn classify(masked: &str) -> LineShape {
    let trimmed = masked.trim();
    if trimmed.is_empty() {
        return LineShape::Plain;
    }

    // 花括号：`}`、`} else {`、`};`
    if let Some(after) = trimmed.strip_prefix('}') {
        let after = after.trim();
        if after.ends_with('{') {
            return LineShape::Continue {
                style: BlockStyle::Brace,
            };
        }
        return LineShape::Close {
            kind: None,
            style: BlockStyle::Brace,
        };
    }

    let word = leading_word(trimmed);
    let upper = word.to_ascii_uppercase();

    if let Some(shape) = classify_closer(&upper, trimmed) {
        return shape;
    }

    let ends_with_brace = trimmed.ends_with('{');
    let ends_with_colon = trimmed.ends_with(':');

    if CONTINUE_WORDS.contains(&upper.as_str()) {
        let style = if ends_with_brace {
            BlockStyle::Brace
        } else if ends_with_colon {
            BlockStyle::Indent
        } else {
            BlockStyle::Keyword
        };
        return LineShape::Continue { style };
    }

    let kind = keyword_kind(word);

    if ends_with_brace {
        return LineShape::Open {
            kind: kind.unwrap_or(BlockKind::Generic),
            style: BlockStyle::Brace,
        };
    }
    if ends_with_colon {
        return LineShape::Open {
            kind: kind.unwrap_or(BlockKind::Generic),
            style: BlockStyle::Indent,
        };
    }

    let Some(kind) = kind else {
        return LineShape::Plain;
    };
    if trimmed.ends_with(';') {
        return LineShape::Plain;
    }
    // `IF c THEN stmt` 这类单行条件不开块；`DO` 只在行首独立出现时才是块
    if upper == "IF" || upper == "ELSEIF" {
        let upper_line = trimmed.to_ascii_uppercase();
        if let Some(pos) = upper_line.rfind(" THEN") {
            let tail = upper_line[pos + 5..].trim();
            if !tail.is_empty() {
                return LineShape::Plain;
            }
        }
    }
    if upper == "DO" && trimmed.get(2..).map_or(false, |t| !t.trim().is_empty()) {
        return LineShape::Plain;
    }
    if upper == "WITH" {
        return LineShape::Plain;
    }
    LineShape::Open {
        kind,
        style: BlockStyle::Keyword,
    }
}

fn classify_closer(upper_word: &str, trimmed: &str) -> Option<LineShape> {
    let keyword = |kind: Option<BlockKind>| {
        Some(LineShape::Close {
            kind,
            style: BlockStyle::Keyword,
        })
    };
    match upper_word {
        "END" => {
            let rest = trimmed.get(3..).unwrap_or_default().trim_start();
            let next = leading_word(rest);
            keyword(keyword_kind(next))
        }
        "UNTIL" | "NEXT" | "LOOP_END" => keyword(Some(BlockKind::Loop)),
        _ => {
            let stripped = upper_word
                .strip_prefix("END_")
                .or_else(|| upper_word.strip_prefix("END"))?;
            if stripped.is_empty() {
                return None;
            }
            let kind = keyword_kind(stripped)?;
            keyword(Some(kind))
        }
    }
}

#[derive(Debug)]
struct OpenBlock {
    kind: BlockKind,
    style: BlockStyle,
    header: String,
    start_line: usize,
    indent: usize,
    children: Vec<Block>,
}

impl OpenBlock {
    fn close(self, end_line: usize, closed: bool) -> Block {
        Block {
            kind: self.kind,
            style: self.style,
            header: self.header,
            start_line: self.start_line,
            end_line: end_line.max(self.start_line),
            closed,
            children: self.children,
        }
    }
}

/// 块构建器
pub struct BlockBuilder {
    stack: Vec<OpenBlock>,
    top_level: Vec<Block>,
    issues: Vec<SyntaxIssue>,
    last_nonblank: usize,
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            top_level: Vec::new(),
            issues: Vec::new(),
            last_nonblank: 0,
        }
    }

    pub fn feed(&mut self, scan: &LineScan, raw_line: &str) {
        if scan.starts_in_literal {
            self.last_nonblank = scan.line;
            return;
        }
        if scan.is_blank() {
            return;
        }

        let shape = classify(&scan.masked);
        let continues_same_indent = matches!(shape, LineShape::Continue { .. });

        // 回退缩进关闭缩进块
        while let Some(top) = self.stack.last() {
            if top.style != BlockStyle::Indent {
                break;
            }
            // `else:` 与其头部同级时延续该块
            let keep = if continues_same_indent {
                scan.indent >= top.indent
            } else {
                scan.indent > top.indent
            };
            if keep {
                break;
            }
            if self.last_nonblank == top.start_line {
                self.issues.push(SyntaxIssue::new(
                    top.start_line,
                    top.indent + 1,
                    format!("expected an indented block after line {}", top.start_line),
                ));
            }
            let end = self.last_nonblank;
            self.pop_and_attach(end, true);
        }

        match shape {
            LineShape::Plain | LineShape::Continue { .. } => {}
            LineShape::Open { kind, style } => {
                self.stack.push(OpenBlock {
                    kind,
                    style,
                    header: header_of(raw_line),
                    start_line: scan.line,
                    indent: scan.indent,
                    children: Vec::new(),
                });
            }
            LineShape::Close { kind, style } => self.close(scan.line, kind, style),
        }

        self.last_nonblank = scan.line;
    }

    fn close(&mut self, line: usize, kind: Option<BlockKind>, style: BlockStyle) {
        // 目标：同风格（花括号/关键字）的最内层块；指明类型时要求类型匹配
        let target = self.stack.iter().rposition(|b| {
            let style_ok = match style {
                BlockStyle::Brace => b.style == BlockStyle::Brace,
                _ => b.style == BlockStyle::Keyword,
            };
            style_ok && kind.map_or(true, |k| k == b.kind)
        });

        let Some(target) = target else {
            self.issues.push(SyntaxIssue::new(
                line,
                1,
                match kind {
                    Some(k) => format!("closer for {} block has no matching opener", k.as_str()),
                    None => "closer has no matching opener".to_string(),
                },
            ));
            return;
        };

        // 先关闭目标之上的内层块
        while self.stack.len() > target + 1 {
            let inner_end = self.last_nonblank;
            if let Some(inner) = self.stack.last() {
                if inner.style != BlockStyle::Indent {
                    self.issues.push(SyntaxIssue::new(
                        inner.start_line,
                        inner.indent + 1,
                        format!(
                            "{} block opened at line {} was not closed before line {}",
                            inner.kind.as_str(),
                            inner.start_line,
                            line
                        ),
                    ));
                }
            }
            let closed = self.stack.last().map_or(false, |b| b.style == BlockStyle::Indent);
            self.pop_and_attach(inner_end, closed);
        }
        self.pop_and_attach(line, true);
    }

    fn pop_and_attach(&mut self, end_line: usize, closed: bool) {
        if let Some(open) = self.stack.pop() {
            let block = open.close(end_line, closed);
            match self.stack.last_mut() {
                Some(parent) => parent.children.push(block),
                None => self.top_level.push(block),
            }
        }
    }

    /// 结束构建，未闭合的块延伸到最后一个非空行
    pub fn finish(mut self) -> (Vec<Block>, Vec<SyntaxIssue>) {
        while let Some(top) = self.stack.last() {
            let closed = top.style == BlockStyle::Indent;
            if !closed {
                self.issues.push(SyntaxIssue::new(
                    top.start_line,
                    top.indent + 1,
                    format!(
                        "{} block opened at line {} is never closed",
                        top.kind.as_str(),
                        top.start_line
                    ),
                ));
            } else if self.last_nonblank == top.start_line {
                self.issues.push(SyntaxIssue::new(
                    top.start_line,
                    top.indent + 1,
                    format!("expected an indented block after line {}", top.start_line),
                ));
            }
            let end = self.last_nonblank;
            self.pop_and_attach(end, closed);
        }
        (self.top_level, self.issues)
    }
}

impl Default for BlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn header_of(raw_line: &str) -> String {
    let trimmed = raw_line.trim();
    if trimmed.chars().count() > 80 {
        let cut: String = trimmed.chars().take(77).collect();
        format!("{}...", cut)
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_ascii_lines_are_plain() {
        assert_eq!(classify("中文字 = 1"), LineShape::Plain);
        assert_eq!(classify("函数定义开始"), LineShape::Plain);
        assert_eq!(leading_word("函数定义开始"), "函数定义开始");
        assert_eq!(skip_modifiers("pub 函数"), "函数");
        assert_eq!(skip_modifiers("静态 函数"), "静态 函数");
        assert_eq!(leading_word("ASYNC function f() {"), "function");
    }

    #[test]
    fn test_classify_keyword_blocks() {
        assert_eq!(
            classify("FUNCTION add(a, b)"),
            LineShape::Open {
                kind: BlockKind::Function,
                style: BlockStyle::Keyword
            }
        );
        assert_eq!(
            classify("IF x > 1 THEN"),
            LineShape::Open {
                kind: BlockKind::Conditional,
                style: BlockStyle::Keyword
            }
        );
        assert_eq!(classify("IF x > 1 THEN RETURN x"), LineShape::Plain);
        assert_eq!(
            classify("END IF"),
            LineShape::Close {
                kind: Some(BlockKind::Conditional),
                style: BlockStyle::Keyword
            }
        );
        assert_eq!(
            classify("ENDWHILE"),
            LineShape::Close {
                kind: Some(BlockKind::Loop),
                style: BlockStyle::Keyword
            }
        );
        assert_eq!(
            classify("END"),
            LineShape::Close {
                kind: None,
                style: BlockStyle::Keyword
            }
        );
        assert_eq!(
            classify("ELSE"),
            LineShape::Continue {
                style: BlockStyle::Keyword
            }
        );
    }

    #[test]
    fn test_classify_brace_and_indent() {
        assert_eq!(
            classify("function f(x) {"),
            LineShape::Open {
                kind: BlockKind::Function,
                style: BlockStyle::Brace
            }
        );
        assert_eq!(
            classify("} else {"),
            LineShape::Continue {
                style: BlockStyle::Brace
            }
        );
        assert_eq!(
            classify("};"),
            LineShape::Close {
                kind: None,
                style: BlockStyle::Brace
            }
        );
        assert_eq!(
            classify("def f(x):"),
            LineShape::Open {
                kind: BlockKind::Function,
                style: BlockStyle::Indent
            }
        );
        assert_eq!(
            classify("elif y:"),
            LineShape::Continue {
                style: BlockStyle::Indent
            }
        );
        assert_eq!(classify("x = 1"), LineShape::Plain);
        assert_eq!(classify("for (i = 0; i < n; i++) total += i;"), LineShape::Plain);
    }

    #[test]
    fn test_leading_word_skips_modifiers() {
        assert_eq!(leading_word("  async function go() {"), "function");
        assert_eq!(leading_word("pub fn main() {"), "fn");
        assert_eq!(leading_word("x=1"), "x");
    }
}
