//! 规则生成引擎
//!
//! 本地模型包的推理核心：逐行把结构化伪代码改写为 Python 或 JavaScript。
//! 块结构复用解析器的行分类，跨分块时依靠分块携带的嵌套深度续接缩进。

use std::collections::HashSet;

use crate::domain::parser::{
    classify, skip_modifiers, BlockKind, BlockStyle, CommentStyle, Lexer, LineShape,
};

/// 引擎支持的目标语言
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleLanguage {
    Python,
    JavaScript,
}

impl RuleLanguage {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "python" => Some(RuleLanguage::Python),
            "javascript" => Some(RuleLanguage::JavaScript),
            _ => None,
        }
    }

    fn comment(&self) -> &'static str {
        match self {
            RuleLanguage::Python => "#",
            RuleLanguage::JavaScript => "//",
        }
    }
}

/// 生成结果
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub code: String,
    /// 被规则识别的非空行数
    pub recognized: usize,
    /// 非空行总数
    pub total: usize,
    /// 未识别的源行号（相对分块，从 1 开始）
    pub unrecognized_lines: Vec<usize>,
}

impl Generation {
    pub fn coverage(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.recognized as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Block(BlockKind),
    /// REPEAT … UNTIL
    Repeat,
    /// 前一个分块中打开的块
    Inherited,
    /// 不产生代码的分组（BEGIN 或无法识别的块头）
    Group,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    style: BlockStyle,
    indent: usize,
    body: usize,
}

/// 规则引擎
pub struct RuleEngine {
    language: RuleLanguage,
    indent_width: usize,
}

struct Emitter<'a> {
    engine: &'a RuleEngine,
    stack: Vec<Frame>,
    declared: HashSet<String>,
    out: Vec<String>,
}

impl RuleEngine {
    pub fn new(language: RuleLanguage, indent_width: usize) -> Self {
        Self {
            language,
            indent_width: indent_width.max(1),
        }
    }

    /// 翻译一段伪代码
    ///
    /// - `context`：前一分块末尾的源文本，只用于恢复已声明的变量
    /// - `base_depth`：起始时已打开的块数
    /// - `leave_open`：末尾未关闭的块留给下一个分块
    pub fn generate(
        &self,
        source: &str,
        context: Option<&str>,
        base_depth: usize,
        leave_open: bool,
    ) -> Generation {
        let mut emitter = Emitter {
            engine: self,
            stack: (0..base_depth)
                .map(|_| Frame {
                    kind: FrameKind::Inherited,
                    style: BlockStyle::Keyword,
                    indent: 0,
                    body: 1,
                })
                .collect(),
            declared: HashSet::new(),
            out: Vec::new(),
        };

        if let Some(context) = context {
            for line in context.lines() {
                if let Some(name) = declared_name(line.trim()) {
                    emitter.declared.insert(name);
                }
            }
        }

        let mut lexer = Lexer::new(CommentStyle::pseudocode());
        let mut recognized = 0;
        let mut total = 0;
        let mut unrecognized_lines = Vec::new();

        for (i, raw) in source.lines().enumerate() {
            let scan = lexer.scan_line(raw);
            if scan.starts_in_literal {
                // 跨行字面量原样保留
                emitter.out.push(raw.trim_end().to_string());
                total += 1;
                recognized += 1;
                continue;
            }
            if raw.trim().is_empty() {
                emitter.out.push(String::new());
                continue;
            }
            total += 1;
            if emitter.line(raw, &scan.masked, scan.indent) {
                recognized += 1;
            } else {
                unrecognized_lines.push(i + 1);
            }
        }

        if !leave_open {
            while !emitter.stack.is_empty() {
                emitter.close_top();
            }
        }

        let mut code = emitter.out.join("\n");
        while code.ends_with("\n\n") {
            code.pop();
        }
        if !code.is_empty() && !code.ends_with('\n') {
            code.push('\n');
        }

        Generation {
            code,
            recognized,
            total,
            unrecognized_lines,
        }
    }
}

impl<'a> Emitter<'a> {
    fn lang(&self) -> RuleLanguage {
        self.engine.language
    }

    fn py(&self) -> bool {
        self.lang() == RuleLanguage::Python
    }

    /// 输出缩进层级，分组不计入
    fn depth(&self) -> usize {
        self.stack
            .iter()
            .filter(|f| f.kind != FrameKind::Group)
            .count()
    }

    fn emit_at(&mut self, depth: usize, text: String) {
        let pad = " ".repeat(depth * self.engine.indent_width);
        self.out.push(format!("{}{}", pad, text));
    }

    /// 在当前深度输出一条语句
    fn statement(&mut self, text: String) {
        let depth = self.depth();
        if let Some(top) = self
            .stack
            .iter_mut()
            .rev()
            .find(|f| f.kind != FrameKind::Group)
        {
            top.body += 1;
        }
        self.emit_at(depth, text);
    }

    fn open(&mut self, kind: FrameKind, style: BlockStyle, indent: usize, header: String) {
        self.statement(header);
        self.stack.push(Frame {
            kind,
            style,
            indent,
            body: 0,
        });
    }

    /// 无法识别的块头：输出为注释，块内语句保持原层级
    fn unknown_block(&mut self, header: &str, style: BlockStyle, indent: usize) {
        let line = format!("{} {}", self.lang().comment(), header);
        self.statement(line);
        self.stack.push(Frame {
            kind: FrameKind::Group,
            style,
            indent,
            body: 0,
        });
    }

    fn close_top(&mut self) {
        let Some(frame) = self.stack.pop() else {
            return;
        };
        if frame.kind == FrameKind::Group {
            return;
        }
        let depth = self.depth();
        if self.py() {
            if frame.body == 0 {
                self.emit_at(depth + 1, "pass".to_string());
            }
        } else if frame.kind == FrameKind::Repeat {
            self.emit_at(depth, "} while (true);".to_string());
        } else {
            self.emit_at(depth, "}".to_string());
        }
    }

    /// 按回退缩进关闭缩进块
    fn dedent(&mut self, indent: usize, continuation: bool) {
        while let Some(top) = self.stack.last() {
            if top.style != BlockStyle::Indent {
                break;
            }
            let keep = if continuation {
                indent >= top.indent
            } else {
                indent > top.indent
            };
            if keep {
                break;
            }
            self.close_top();
        }
    }

    /// 处理一行，返回是否被规则识别
    fn line(&mut self, raw: &str, masked: &str, indent: usize) -> bool {
        let trimmed = raw.trim();
        let shape = classify(masked);
        self.dedent(indent, matches!(shape, LineShape::Continue { .. }));

        // 整行注释
        let masked_trim = masked.trim();
        if masked_trim.is_empty() {
            let text = strip_comment_marker(trimmed);
            let line = format!("{} {}", self.lang().comment(), text)
                .trim_end()
                .to_string();
            self.statement(line);
            return true;
        }

        // 去掉行尾注释，保留字符串
        let code = &trimmed[..code_len(trimmed, masked_trim)];

        match shape {
            LineShape::Close { kind, .. } => {
                self.close(kind, code);
                true
            }
            LineShape::Continue { .. } => self.continuation(code),
            LineShape::Open { kind, style } => self.opener(code, kind, style, indent),
            LineShape::Plain => self.simple(code),
        }
    }

    fn close(&mut self, kind: Option<BlockKind>, code: &str) {
        // UNTIL 关闭 REPEAT
        let until = code
            .get(..5)
            .filter(|word| word.eq_ignore_ascii_case("UNTIL"))
            .and_then(|_| code.get(5..));
        if let Some(cond) = until {
            let target = self.stack.iter().rposition(|f| f.kind == FrameKind::Repeat);
            if let Some(target) = target {
                let cond = translate_condition(cond.trim(), self.lang());
                while self.stack.len() > target + 1 {
                    self.close_top();
                }
                if self.py() {
                    let depth = self.depth();
                    self.emit_at(depth, format!("if {}:", cond));
                    self.emit_at(depth + 1, "break".to_string());
                    self.stack.pop();
                } else {
                    self.stack.pop();
                    let depth = self.depth();
                    self.emit_at(depth, format!("}} while (!({}));", cond));
                }
                return;
            }
        }

        let target = self.stack.iter().rposition(|f| {
            if f.style == BlockStyle::Indent {
                return false;
            }
            match (kind, f.kind) {
                (_, FrameKind::Inherited) | (None, _) => true,
                (Some(k), FrameKind::Block(fk)) => k == fk,
                (Some(BlockKind::Loop), FrameKind::Repeat) => true,
                (Some(k), FrameKind::Group) => k == BlockKind::Generic,
                (Some(_), FrameKind::Repeat) => false,
            }
        });
        if let Some(target) = target {
            while self.stack.len() > target {
                self.close_top();
            }
        }
    }

    fn continuation(&mut self, code: &str) -> bool {
        let text = code.trim_start_matches('}').trim();
        let text = text.trim_end_matches(['{', ':']).trim();
        let (word, rest) = split_first_word(text);
        let word_upper = word.to_ascii_uppercase();
        let py = self.py();

        let is_else_if = word_upper == "ELIF"
            || word_upper == "ELSEIF"
            || (word_upper == "ELSE" && strip_word(rest, "IF").is_some());

        let line = if is_else_if {
            let cond_src = if word_upper == "ELSE" {
                strip_word(rest, "IF").unwrap_or(rest)
            } else {
                rest
            };
            let cond = translate_condition(strip_then(cond_src), self.lang());
            if py {
                format!("elif {}:", cond)
            } else {
                format!("}} else if ({}) {{", cond)
            }
        } else if word_upper == "ELSE" || word_upper == "OTHERWISE" {
            if py { "else:" } else { "} else {" }.to_string()
        } else if word_upper == "CATCH" || word_upper == "EXCEPT" {
            let name = rest.trim().trim_matches(['(', ')']).trim();
            match (py, name.is_empty()) {
                (true, true) => "except Exception:".to_string(),
                (true, false) => format!("except Exception as {}:", name),
                (false, true) => "} catch (e) {".to_string(),
                (false, false) => format!("}} catch ({}) {{", name),
            }
        } else if word_upper == "FINALLY" {
            if py { "finally:" } else { "} finally {" }.to_string()
        } else {
            return false;
        };

        let Some(top_body) = self.stack.last().map(|f| f.body) else {
            return false;
        };
        let depth = self.depth().saturating_sub(1);
        if py && top_body == 0 {
            self.emit_at(depth + 1, "pass".to_string());
        }
        self.emit_at(depth, line);
        if let Some(top) = self.stack.last_mut() {
            top.body = 0;
        }
        true
    }

    fn opener(&mut self, code: &str, kind: BlockKind, style: BlockStyle, indent: usize) -> bool {
        let header = code.trim_end_matches(['{', ':']).trim();
        let (word, rest) = split_first_word(skip_modifiers(header));
        let word_upper = word.to_ascii_uppercase();
        let py = self.py();
        let lang = self.lang();

        let (frame_kind, line) = match kind {
            BlockKind::Function => {
                let (name, params) = split_signature(rest);
                self.declared.extend(params.iter().cloned());
                let params = params.join(", ");
                let line = if py {
                    format!("def {}({}):", name, params)
                } else {
                    format!("function {}({}) {{", name, params)
                };
                (FrameKind::Block(kind), line)
            }
            BlockKind::Class => {
                let (name, base) = split_class(rest);
                let line = match (py, base) {
                    (true, Some(base)) => format!("class {}({}):", name, base),
                    (true, None) => format!("class {}:", name),
                    (false, Some(base)) => format!("class {} extends {} {{", name, base),
                    (false, None) => format!("class {} {{", name),
                };
                (FrameKind::Block(kind), line)
            }
            BlockKind::Conditional if word_upper == "IF" => {
                let cond = translate_condition(strip_then(rest), lang);
                let line = if py {
                    format!("if {}:", cond)
                } else {
                    format!("if ({}) {{", cond)
                };
                (FrameKind::Block(kind), line)
            }
            BlockKind::Loop if word_upper == "WHILE" => {
                let cond = translate_condition(strip_suffix_word(rest, "DO"), lang);
                let line = if py {
                    format!("while {}:", cond)
                } else {
                    format!("while ({}) {{", cond)
                };
                (FrameKind::Block(kind), line)
            }
            BlockKind::Loop if word_upper == "REPEAT" || word_upper == "DO" => {
                let line = if py { "while True:" } else { "do {" };
                (FrameKind::Repeat, line.to_string())
            }
            BlockKind::Loop if word_upper == "LOOP" => {
                let line = if py { "while True:" } else { "while (true) {" };
                (FrameKind::Block(kind), line.to_string())
            }
            BlockKind::Loop if word_upper == "FOR" || word_upper == "FOREACH" => {
                match self.for_header(word_upper == "FOREACH", rest) {
                    Some(line) => (FrameKind::Block(kind), line),
                    None => {
                        self.unknown_block(header, style, indent);
                        return false;
                    }
                }
            }
            BlockKind::Generic if word_upper == "TRY" => {
                let line = if py { "try:" } else { "try {" };
                (FrameKind::Block(kind), line.to_string())
            }
            BlockKind::Generic if word_upper == "BEGIN" => {
                self.stack.push(Frame {
                    kind: FrameKind::Group,
                    style,
                    indent,
                    body: 0,
                });
                return true;
            }
            _ => {
                self.unknown_block(header, style, indent);
                return false;
            }
        };

        self.open(frame_kind, style, indent, line);
        true
    }

    fn for_header(&mut self, foreach: bool, rest: &str) -> Option<String> {
        let rest = rest.trim();
        if foreach {
            return self.for_each(rest);
        }
        if let Some(after_each) = strip_word(rest, "EACH") {
            return self.for_each(after_each);
        }

        // FOR i FROM a TO b [STEP s] / FOR i = a TO b / FOR i <- a TO b / FOR x IN xs
        let (var, after_var) = split_first_word(rest);
        if var.is_empty() {
            return None;
        }
        let after_var = after_var.trim();
        if strip_word(after_var, "IN").is_some() || strip_word(after_var, "OF").is_some() {
            return self.for_each(rest);
        }
        let start_expr = strip_word(after_var, "FROM")
            .or_else(|| after_var.strip_prefix("<-"))
            .or_else(|| after_var.strip_prefix('←'))
            .or_else(|| after_var.strip_prefix('='))?;

        let (start, tail) = split_on_word(start_expr, "TO")?;
        let (end, step) = match split_on_word(tail, "STEP") {
            Some((end, step)) => (end, Some(step)),
            None => (tail, None),
        };
        let lang = self.lang();
        let start = translate_expr(start.trim(), lang, false);
        let end = translate_expr(end.trim(), lang, false);
        let step = step.map(|s| translate_expr(s.trim(), lang, false));
        self.declared.insert(var.to_string());

        Some(match (self.py(), step) {
            (true, None) => format!("for {} in range({}, {} + 1):", var, start, end),
            (true, Some(step)) => {
                format!("for {} in range({}, {} + 1, {}):", var, start, end, step)
            }
            (false, None) => format!(
                "for (let {v} = {}; {v} <= {}; {v}++) {{",
                start,
                end,
                v = var
            ),
            (false, Some(step)) => format!(
                "for (let {v} = {}; {v} <= {}; {v} += {}) {{",
                start,
                end,
                step,
                v = var
            ),
        })
    }

    fn for_each(&mut self, rest: &str) -> Option<String> {
        let (var, after) = split_first_word(rest.trim());
        if var.is_empty() {
            return None;
        }
        let after = after.trim();
        let iter = strip_word(after, "IN").or_else(|| strip_word(after, "OF"))?;
        let iter = translate_expr(iter, self.lang(), false);
        self.declared.insert(var.to_string());
        Some(if self.py() {
            format!("for {} in {}:", var, iter)
        } else {
            format!("for (const {} of {}) {{", var, iter)
        })
    }

    fn simple(&mut self, code: &str) -> bool {
        let lang = self.lang();
        let py = self.py();
        let semi = if py { "" } else { ";" };
        let code = code.trim_end_matches(';').trim();
        let (word, rest) = split_first_word(code);
        let word_upper = word.to_ascii_uppercase();

        let line = match word_upper.as_str() {
            "RETURN" => {
                if rest.trim().is_empty() {
                    format!("return{}", semi)
                } else {
                    format!("return {}{}", translate_expr(rest.trim(), lang, false), semi)
                }
            }
            "PRINT" | "OUTPUT" | "DISPLAY" | "WRITE" | "PRINTLN" => {
                let args = rest.trim();
                let args = if args.starts_with('(') && args.ends_with(')') && balanced_outer(args) {
                    &args[1..args.len() - 1]
                } else {
                    args
                };
                let args = translate_expr(args, lang, false);
                if py {
                    format!("print({})", args)
                } else {
                    format!("console.log({});", args)
                }
            }
            "SET" | "LET" | "ASSIGN" => match split_assignment(rest) {
                Some((target, value)) => self.assignment(target, value),
                None => return self.unrecognized(code),
            },
            "INCREMENT" | "DECREMENT" => {
                let op = if word_upper == "INCREMENT" { "+=" } else { "-=" };
                let (target, by) = match split_on_word(rest, "BY") {
                    Some((t, by)) => (t.trim(), translate_expr(by.trim(), lang, false)),
                    None => (rest.trim(), "1".to_string()),
                };
                format!("{} {} {}{}", target, op, by, semi)
            }
            "CALL" => format!("{}{}", translate_expr(rest.trim(), lang, false), semi),
            "INPUT" | "READ" => {
                let target = rest.trim();
                if py {
                    format!("{} = input()", target)
                } else if self.declared.insert(target.to_string()) {
                    format!("let {} = prompt();", target)
                } else {
                    format!("{} = prompt();", target)
                }
            }
            "BREAK" => format!("break{}", semi),
            "CONTINUE" => format!("continue{}", semi),
            "PASS" if py => "pass".to_string(),
            "PASS" => return true,
            "THROW" | "RAISE" => {
                let value = translate_expr(rest.trim(), lang, false);
                if py {
                    format!("raise Exception({})", value)
                } else {
                    format!("throw new Error({});", value)
                }
            }
            _ => {
                if let Some((target, value)) = split_assignment(code) {
                    self.assignment(target, value)
                } else if looks_like_call(code) {
                    format!("{}{}", translate_expr(code, lang, false), semi)
                } else {
                    return self.unrecognized(code);
                }
            }
        };
        self.statement(line);
        true
    }

    fn unrecognized(&mut self, code: &str) -> bool {
        let line = format!("{} {}", self.lang().comment(), code);
        self.statement(line);
        false
    }

    /// 赋值；目标以运算符结尾时为复合赋值（`x + = 1` 形式已由调用方拆出）
    fn assignment(&mut self, target: &str, value: &str) -> String {
        let value = translate_expr(value.trim(), self.lang(), false);
        let semi = if self.py() { "" } else { ";" };
        let target = target.trim();
        let base = target.trim_end_matches(['+', '-', '*', '/']).trim_end();
        if base.len() != target.len() {
            let op = &target[base.len()..].trim();
            return format!("{} {}= {}{}", base, op, value, semi);
        }
        if !self.py() && is_identifier(base) && self.declared.insert(base.to_string()) {
            return format!("let {} = {};", base, value);
        }
        format!("{} = {}{}", base, value, semi)
    }
}

/// 从原文中截出与屏蔽文本等长的代码部分（去掉行尾注释）
fn code_len(trimmed: &str, masked_trim: &str) -> usize {
    let chars = masked_trim.chars().count();
    trimmed
        .char_indices()
        .nth(chars)
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len())
}

fn strip_comment_marker(text: &str) -> &str {
    for marker in ["//", "#", "--", "/*"] {
        if let Some(rest) = text.strip_prefix(marker) {
            return rest.trim_end_matches("*/").trim();
        }
    }
    text
}

fn split_first_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    let end = text
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(text.len());
    (&text[..end], &text[end..])
}

/// 以整词方式去掉开头的关键字
fn strip_word<'t>(text: &'t str, word: &str) -> Option<&'t str> {
    let (first, rest) = split_first_word(text);
    if first.eq_ignore_ascii_case(word) {
        Some(rest.trim_start())
    } else {
        None
    }
}

/// 以整词方式从末尾去掉关键字
fn strip_suffix_word<'t>(text: &'t str, word: &str) -> &'t str {
    let trimmed = text.trim_end();
    if trimmed.len() > word.len() {
        let split = trimmed.len() - word.len();
        if trimmed.is_char_boundary(split) {
            let (head, tail) = trimmed.split_at(split);
            if tail.eq_ignore_ascii_case(word) && head.ends_with(char::is_whitespace) {
                return head.trim_end();
            }
        }
    }
    trimmed
}

fn strip_then(text: &str) -> &str {
    strip_suffix_word(text, "THEN")
}

/// 在第一个独立出现的关键字处切开（跳过字符串）
fn split_on_word<'t>(text: &'t str, word: &str) -> Option<(&'t str, &'t str)> {
    let bytes = text.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'"' || b == b'\'' {
                    quote = Some(b);
                } else if i + word.len() <= bytes.len()
                    && text.is_char_boundary(i)
                    && text.is_char_boundary(i + word.len())
                    && text[i..i + word.len()].eq_ignore_ascii_case(word)
                {
                    let before_ok = i == 0 || !is_word_byte(bytes[i - 1]);
                    let after_ok = i + word.len() == bytes.len() || !is_word_byte(bytes[i + word.len()]);
                    if before_ok && after_ok {
                        return Some((&text[..i], &text[i + word.len()..]));
                    }
                }
            }
        }
        i += 1;
    }
    None
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => chars.all(|c| c.is_alphanumeric() || c == '_'),
        _ => false,
    }
}

fn looks_like_call(code: &str) -> bool {
    let Some(open) = code.find('(') else {
        return false;
    };
    let callee = code[..open].trim();
    !callee.is_empty()
        && callee
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
        && code.trim_end().ends_with(')')
}

/// 解析函数签名，返回函数名与参数名
fn split_signature(rest: &str) -> (String, Vec<String>) {
    let rest = rest.trim();
    let rest = match split_on_word(rest, "RETURNS") {
        Some((head, _)) => head.trim(),
        None => rest,
    };
    let rest = rest.split("->").next().unwrap_or(rest).trim();
    let (name, params) = match rest.find('(') {
        Some(open) => {
            let close = rest.rfind(')').unwrap_or(rest.len());
            let inner = if close > open { &rest[open + 1..close] } else { "" };
            (rest[..open].trim(), inner)
        }
        None => {
            let (name, tail) = split_first_word(rest);
            let tail = strip_word(tail.trim(), "WITH").unwrap_or(tail);
            (name, tail)
        }
    };
    let params = params
        .split(',')
        .filter_map(|p| {
            let p = p.trim();
            let (ident, _) = split_first_word(p);
            (!ident.is_empty()).then(|| ident.to_string())
        })
        .collect();
    let name = if name.is_empty() { "anonymous" } else { name };
    (name.to_string(), params)
}

fn split_class(rest: &str) -> (String, Option<String>) {
    let rest = rest.trim();
    if let Some(open) = rest.find('(') {
        let name = rest[..open].trim().to_string();
        let base = rest[open + 1..].trim_end_matches(')').trim();
        return (name, (!base.is_empty()).then(|| base.to_string()));
    }
    let (name, tail) = split_first_word(rest);
    let base = strip_word(tail, "EXTENDS")
        .or_else(|| strip_word(tail, "INHERITS"))
        .map(|b| strip_word(b, "FROM").unwrap_or(b).trim().to_string())
        .filter(|b| !b.is_empty());
    (name.to_string(), base)
}

/// 解析赋值：`x TO y`、`x = y`、`x <- y`
fn split_assignment(text: &str) -> Option<(&str, &str)> {
    let text = text.trim();
    if let Some((target, value)) = split_on_word(text, "TO") {
        if is_assign_target(target.trim()) {
            return Some((target.trim(), value.trim()));
        }
    }
    for op in ["<-", "←", ":="] {
        if let Some(pos) = text.find(op) {
            let target = text[..pos].trim();
            if is_assign_target(target) {
                return Some((target, text[pos + op.len()..].trim()));
            }
        }
    }
    let bytes = text.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b != b'=' {
            continue;
        }
        let prev = if i > 0 { bytes[i - 1] } else { b' ' };
        let next = bytes.get(i + 1).copied().unwrap_or(b' ');
        if matches!(prev, b'=' | b'!' | b'<' | b'>') || next == b'=' {
            continue;
        }
        let target = text[..i].trim();
        if is_assign_target(target) {
            return Some((target, text[i + 1..].trim()));
        }
        return None;
    }
    None
}

fn is_assign_target(target: &str) -> bool {
    let base = target.trim_end_matches(['+', '-', '*', '/']).trim();
    !base.is_empty()
        && base
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '[' | ']' | '"' | '\''))
        && base.chars().next().map_or(false, |c| c.is_alphabetic() || c == '_')
}

/// 声明过的变量名（用于从上下文恢复 JS 的 let 声明）
fn declared_name(line: &str) -> Option<String> {
    let (word, rest) = split_first_word(line);
    let upper = word.to_ascii_uppercase();
    let candidate = match upper.as_str() {
        "SET" | "LET" | "ASSIGN" => split_assignment(rest).map(|(t, _)| t),
        "FOR" | "FOREACH" => {
            let rest = strip_word(rest, "EACH").unwrap_or(rest);
            Some(split_first_word(rest).0)
        }
        _ => split_assignment(line).map(|(t, _)| t),
    }?;
    let candidate = candidate.trim_end_matches(['+', '-', '*', '/']).trim();
    is_identifier(candidate).then(|| candidate.to_string())
}

/// 条件表达式：单个 `=` 视为比较
fn translate_condition(expr: &str, lang: RuleLanguage) -> String {
    let expr = expr.trim();
    let expr = if expr.starts_with('(') && expr.ends_with(')') && balanced_outer(expr) {
        &expr[1..expr.len() - 1]
    } else {
        expr
    };
    translate_expr(expr, lang, true)
}

fn balanced_outer(expr: &str) -> bool {
    let mut depth = 0i32;
    for (i, c) in expr.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 && i != expr.len() - 1 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// 表达式改写：逻辑运算符、布尔字面量、比较符号
fn translate_expr(expr: &str, lang: RuleLanguage, condition: bool) -> String {
    let py = lang == RuleLanguage::Python;
    let chars: Vec<char> = expr.chars().collect();
    let mut out = String::with_capacity(expr.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '"' || c == '\'' {
            let quote = c;
            out.push(c);
            i += 1;
            while i < chars.len() {
                out.push(chars[i]);
                if chars[i] == '\\' && i + 1 < chars.len() {
                    out.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                if chars[i] == quote {
                    i += 1;
                    break;
                }
                i += 1;
            }
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            out.push_str(&translate_word(&word, py));
            continue;
        }
        let next = chars.get(i + 1).copied();
        let prev = if i > 0 { Some(chars[i - 1]) } else { None };
        match (c, next) {
            ('<', Some('>')) => {
                out.push_str(if py { "!=" } else { "!==" });
                i += 2;
            }
            ('≠', _) => {
                out.push_str(if py { "!=" } else { "!==" });
                i += 1;
            }
            ('≤', _) => {
                out.push_str("<=");
                i += 1;
            }
            ('≥', _) => {
                out.push_str(">=");
                i += 1;
            }
            ('=', Some('=')) => {
                out.push_str(if py { "==" } else { "===" });
                i += 2;
            }
            ('!', Some('=')) => {
                out.push_str(if py { "!=" } else { "!==" });
                i += 2;
            }
            ('=', _) if condition && !matches!(prev, Some('<') | Some('>') | Some('!') | Some('=')) => {
                out.push_str(if py { "==" } else { "===" });
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

fn translate_word(word: &str, py: bool) -> String {
    let upper = word.to_ascii_uppercase();
    let mapped = match (upper.as_str(), py) {
        ("AND", true) => "and",
        ("AND", false) => "&&",
        ("OR", true) => "or",
        ("OR", false) => "||",
        ("NOT", true) => "not",
        ("NOT", false) => "!",
        ("TRUE", true) => "True",
        ("TRUE", false) => "true",
        ("FALSE", true) => "False",
        ("FALSE", false) => "false",
        ("NULL" | "NIL" | "NONE", true) => "None",
        ("NULL" | "NIL" | "NONE", false) => "null",
        ("MOD", _) => "%",
        ("DIV", true) => "//",
        _ => return word.to_string(),
    };
    mapped.to_string()
}
