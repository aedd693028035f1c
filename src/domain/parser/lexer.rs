//! 行级词法扫描
//!
//! 逐行跟踪字符串字面量、注释与括号深度。输出每一行屏蔽掉字符串内容和
//! 注释后的代码文本，供块识别使用；同时给出"本行之后能否安全切分"。

use super::SyntaxIssue;

/// 注释风格
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommentStyle {
    /// `# ...`
    pub hash: bool,
    /// `// ...` 与 `/* ... */`
    pub slash: bool,
    /// `-- ...`
    pub dash: bool,
}

impl CommentStyle {
    /// 伪代码里三种注释都可能出现
    pub fn pseudocode() -> Self {
        Self {
            hash: true,
            slash: true,
            dash: true,
        }
    }

    pub fn for_comment_prefix(prefix: &str) -> Self {
        match prefix {
            "#" => Self {
                hash: true,
                slash: false,
                dash: false,
            },
            "--" => Self {
                hash: false,
                slash: false,
                dash: true,
            },
            _ => Self {
                hash: false,
                slash: true,
                dash: false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    Double,
    Single,
    TripleDouble,
    TripleSingle,
    Backtick,
}

impl Quote {
    fn spans_lines(&self) -> bool {
        matches!(self, Quote::TripleDouble | Quote::TripleSingle | Quote::Backtick)
    }

    fn closing(&self) -> &'static str {
        match self {
            Quote::Double => "\"",
            Quote::Single => "'",
            Quote::TripleDouble => "\"\"\"",
            Quote::TripleSingle => "'''",
            Quote::Backtick => "`",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Code,
    Literal { quote: Quote, line: usize, column: usize },
    BlockComment { line: usize, column: usize },
}

/// 单行扫描结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineScan {
    /// 行号（从 1 开始）
    pub line: usize,
    /// 屏蔽后的代码：字符串内容替换为 `_`，注释删除
    pub masked: String,
    /// 行首缩进宽度（tab 计为 4）
    pub indent: usize,
    /// 行首是否处于跨行字面量或块注释中
    pub starts_in_literal: bool,
    /// 行尾是否仍处于跨行字面量或块注释中
    pub ends_in_literal: bool,
    /// 行尾未闭合的 `(` 与 `[` 数量
    pub open_brackets: usize,
    /// 缩进是否混用 tab 与空格
    pub mixed_indent: bool,
}

impl LineScan {
    /// 屏蔽后是否没有任何代码
    pub fn is_blank(&self) -> bool {
        !self.starts_in_literal && self.masked.trim().is_empty()
    }

    /// 本行之后是否可以安全切分
    pub fn safe_split_after(&self) -> bool {
        !self.ends_in_literal && self.open_brackets == 0
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenBracket {
    ch: char,
    line: usize,
    column: usize,
}

/// 跨行词法状态
#[derive(Debug)]
pub struct Lexer {
    style: CommentStyle,
    mode: Mode,
    brackets: Vec<OpenBracket>,
    line: usize,
    issues: Vec<SyntaxIssue>,
}

impl Lexer {
    pub fn new(style: CommentStyle) -> Self {
        Self {
            style,
            mode: Mode::Code,
            brackets: Vec::new(),
            line: 0,
            issues: Vec::new(),
        }
    }

    /// 扫描下一行（不含换行符）
    pub fn scan_line(&mut self, raw: &str) -> LineScan {
        self.line += 1;
        let line_no = self.line;
        let chars: Vec<char> = raw.trim_end_matches(['\n', '\r']).chars().collect();
        let starts_in_literal = self.mode != Mode::Code;

        let (indent, mixed_indent) = measure_indent(&chars);
        let mut masked = String::with_capacity(chars.len());
        let mut i = 0;

        while i < chars.len() {
            match self.mode {
                Mode::Literal { quote, .. } => {
                    if chars[i] == '\\' && !quote.spans_lines() {
                        masked.push_str("__");
                        i += 2;
                        continue;
                    }
                    let closing = quote.closing();
                    if starts_with(&chars, i, closing) {
                        masked.push_str(closing);
                        i += closing.len();
                        self.mode = Mode::Code;
                    } else {
                        masked.push('_');
                        i += 1;
                    }
                }
                Mode::BlockComment { .. } => {
                    if starts_with(&chars, i, "*/") {
                        i += 2;
                        self.mode = Mode::Code;
                    } else {
                        i += 1;
                    }
                }
                Mode::Code => {
                    let c = chars[i];
                    if self.is_line_comment(&chars, i) {
                        break;
                    }
                    if self.style.slash && starts_with(&chars, i, "/*") {
                        self.mode = Mode::BlockComment {
                            line: line_no,
                            column: i + 1,
                        };
                        i += 2;
                        continue;
                    }
                    if let Some(quote) = quote_at(&chars, i) {
                        let opening = quote.closing();
                        masked.push_str(opening);
                        self.mode = Mode::Literal {
                            quote,
                            line: line_no,
                            column: i + 1,
                        };
                        i += opening.len();
                        continue;
                    }
                    match c {
                        '(' | '[' => self.brackets.push(OpenBracket {
                            ch: c,
                            line: line_no,
                            column: i + 1,
                        }),
                        ')' | ']' => {
                            let expected = if c == ')' { '(' } else { '[' };
                            match self.brackets.last() {
                                Some(open) if open.ch == expected => {
                                    self.brackets.pop();
                                }
                                Some(open) => {
                                    let open = *open;
                                    self.issues.push(SyntaxIssue::new(
                                        line_no,
                                        i + 1,
                                        format!(
                                            "mismatched '{}', expected closer for '{}' opened at {}:{}",
                                            c, open.ch, open.line, open.column
                                        ),
                                    ));
                                    self.brackets.pop();
                                }
                                None => self.issues.push(SyntaxIssue::new(
                                    line_no,
                                    i + 1,
                                    format!("unmatched '{}'", c),
                                )),
                            }
                        }
                        _ => {}
                    }
                    masked.push(c);
                    i += 1;
                }
            }
        }

        // 单行字符串不允许跨行，出错后恢复到代码状态
        if let Mode::Literal { quote, line, column } = self.mode {
            if !quote.spans_lines() {
                self.issues.push(SyntaxIssue::new(
                    line,
                    column,
                    "unterminated string literal",
                ));
                self.mode = Mode::Code;
            }
        }

        LineScan {
            line: line_no,
            masked,
            indent,
            starts_in_literal,
            ends_in_literal: self.mode != Mode::Code,
            open_brackets: self.brackets.len(),
            mixed_indent,
        }
    }

    fn is_line_comment(&self, chars: &[char], i: usize) -> bool {
        if self.style.hash && chars[i] == '#' {
            return true;
        }
        if self.style.slash && starts_with(chars, i, "//") {
            return true;
        }
        if self.style.dash && starts_with(chars, i, "--") {
            let before_ok = i == 0 || chars[i - 1].is_whitespace();
            let after_ok = chars.get(i + 2).map_or(true, |c| c.is_whitespace());
            return before_ok && after_ok;
        }
        false
    }

    /// 结束扫描，报告仍未闭合的字面量与括号
    pub fn finish(mut self) -> Vec<SyntaxIssue> {
        match self.mode {
            Mode::Literal { line, column, .. } => self.issues.push(SyntaxIssue::new(
                line,
                column,
                "unterminated multi-line string literal",
            )),
            Mode::BlockComment { line, column } => self.issues.push(SyntaxIssue::new(
                line,
                column,
                "unterminated block comment",
            )),
            Mode::Code => {}
        }
        for open in std::mem::take(&mut self.brackets) {
            self.issues.push(SyntaxIssue::new(
                open.line,
                open.column,
                format!("unclosed '{}'", open.ch),
            ));
        }
        self.issues
    }
}

/// 扫描整段文本
pub fn scan(text: &str, style: CommentStyle) -> (Vec<LineScan>, Vec<SyntaxIssue>) {
    let mut lexer = Lexer::new(style);
    let scans: Vec<LineScan> = text.lines().map(|line| lexer.scan_line(line)).collect();
    (scans, lexer.finish())
}

fn starts_with(chars: &[char], i: usize, pattern: &str) -> bool {
    let mut idx = i;
    for p in pattern.chars() {
        match chars.get(idx) {
            Some(c) if *c == p => idx += 1,
            _ => return false,
        }
    }
    true
}

fn quote_at(chars: &[char], i: usize) -> Option<Quote> {
    if starts_with(chars, i, "\"\"\"") {
        return Some(Quote::TripleDouble);
    }
    if starts_with(chars, i, "'''") {
        return Some(Quote::TripleSingle);
    }
    match chars[i] {
        '"' => Some(Quote::Double),
        '`' => Some(Quote::Backtick),
        // 撇号夹在单词中间（don't）不算字符串
        '\'' => {
            let prev_alnum = i > 0 && chars[i - 1].is_alphanumeric();
            let next_alnum = chars.get(i + 1).map_or(false, |c| c.is_alphanumeric());
            if prev_alnum && next_alnum {
                None
            } else {
                Some(Quote::Single)
            }
        }
        _ => None,
    }
}

fn measure_indent(chars: &[char]) -> (usize, bool) {
    let mut width = 0;
    let mut saw_tab = false;
    let mut saw_space = false;
    for c in chars {
        match c {
            ' ' => {
                width += 1;
                saw_space = true;
            }
            '\t' => {
                width += 4;
                saw_tab = true;
            }
            _ => break,
        }
    }
    (width, saw_tab && saw_space)
}
