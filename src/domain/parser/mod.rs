//! Structural Parser / Validator
//!
//! 识别伪代码与生成代码的结构块边界，并报告结构问题。
//! 解析永远是尽力而为的：即使有问题也会返回尽可能完整的块树。

mod blocks;
mod lexer;
mod validator;

use serde::{Deserialize, Serialize};

pub use blocks::{
    classify, keyword_kind, leading_word, skip_modifiers, Block, BlockKind, BlockStyle, LineShape,
};
pub use lexer::{scan, CommentStyle, Lexer, LineScan};
pub use validator::validate;

use blocks::BlockBuilder;

/// 结构问题，行列号从 1 开始
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxIssue {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl SyntaxIssue {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

/// 顶层块的行区间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundarySpan {
    pub kind: BlockKind,
    pub start_line: usize,
    pub end_line: usize,
}

/// 解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTree {
    pub blocks: Vec<Block>,
    pub line_count: usize,
    safe_split_after: Vec<bool>,
    depth: Vec<usize>,
}

impl ParseTree {
    /// 第 `line` 行之后能否切分（行号从 1 开始，越界视为可切分）
    pub fn is_safe_split_after(&self, line: usize) -> bool {
        line == 0 || self.safe_split_after.get(line - 1).copied().unwrap_or(true)
    }

    /// 第 `line` 行所处的嵌套深度（不含以该行为头部的块）
    pub fn depth_at(&self, line: usize) -> usize {
        line.checked_sub(1)
            .and_then(|i| self.depth.get(i))
            .copied()
            .unwrap_or(0)
    }

    /// 顶层块区间
    pub fn top_level_spans(&self) -> Vec<BoundarySpan> {
        self.blocks
            .iter()
            .map(|b| BoundarySpan {
                kind: b.kind,
                start_line: b.start_line,
                end_line: b.end_line,
            })
            .collect()
    }

    /// 完全包含在区间内、且为区间内最外层的块的结束行
    ///
    /// 用于在超长块内部优先选择子块边界作为切分点。
    pub fn inner_block_ends(&self, start_line: usize, end_line: usize) -> Vec<usize> {
        fn walk(blocks: &[Block], start: usize, end: usize, out: &mut Vec<usize>) {
            for block in blocks {
                if block.end_line < start || block.start_line > end {
                    continue;
                }
                if block.start_line > start && block.end_line < end {
                    out.push(block.end_line);
                } else {
                    walk(&block.children, start, end, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.blocks, start_line, end_line, &mut out);
        out.sort_unstable();
        out.dedup();
        out
    }
}

/// 解析伪代码
///
/// 空白输入返回 `None`。
pub fn parse(text: &str) -> (Option<ParseTree>, Vec<SyntaxIssue>) {
    if text.trim().is_empty() {
        return (None, Vec::new());
    }

    let mut lexer = Lexer::new(CommentStyle::pseudocode());
    let mut builder = BlockBuilder::new();
    let mut safe_split_after = Vec::new();
    let mut line_count = 0;

    for raw in text.lines() {
        let scan = lexer.scan_line(raw);
        builder.feed(&scan, raw);
        safe_split_after.push(scan.safe_split_after());
        line_count += 1;
    }

    let mut issues = lexer.finish();
    let (blocks, block_issues) = builder.finish();
    issues.extend(block_issues);
    issues.sort_by_key(|i| (i.line, i.column));

    let mut depth = vec![0usize; line_count];
    fn mark(blocks: &[Block], depth: &mut [usize]) {
        for block in blocks {
            for line in (block.start_line + 1)..=block.end_line {
                if let Some(d) = depth.get_mut(line - 1) {
                    *d += 1;
                }
            }
            mark(&block.children, depth);
        }
    }
    mark(&blocks, &mut depth);

    (
        Some(ParseTree {
            blocks,
            line_count,
            safe_split_after,
            depth,
        }),
        issues,
    )
}

/// 顶层结构块边界
pub fn find_block_boundaries(text: &str) -> Vec<BoundarySpan> {
    match parse(text) {
        (Some(tree), _) => tree.top_level_spans(),
        (None, _) => Vec::new(),
    }
}
