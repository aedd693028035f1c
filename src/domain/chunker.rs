//! Streaming Chunker
//!
//! 按结构块边界把伪代码切成有序分块：
//! 1. 顶层块与块之间的松散语句各自构成一个单元
//! 2. 贪心打包单元，直到再加一个就会超过 `max_chunk_size`
//! 3. 单个单元超长时在安全行边界处拆开，后续片段携带前一片段的末尾几行作为上下文
//! 4. 找不到任何结构块时退化为按行切分
//!
//! 所有分块的 `source_text` 按序拼接后与输入逐字节相同。

use crate::domain::parser::{parse, ParseTree, SyntaxIssue};
use crate::domain::translation::{BoundaryKind, Chunk};

/// 分块配置
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// 单块最大字符数（不含前导上下文）
    pub max_chunk_size: usize,
    /// 拆分时携带的上下文行数
    pub overlap_lines: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 2000,
            overlap_lines: 3,
        }
    }
}

/// 分块结果
#[derive(Debug, Clone, Default)]
pub struct ChunkPlan {
    pub chunks: Vec<Chunk>,
    /// 超长行、被迫在非安全位置切分等情况
    pub warnings: Vec<String>,
    /// 源文本的结构问题
    pub issues: Vec<SyntaxIssue>,
}

/// 按配置切分，空输入返回零个分块
pub fn chunk_source(source_text: &str, max_chunk_size: usize, overlap_lines: usize) -> Vec<Chunk> {
    plan_chunks(
        source_text,
        &ChunkConfig {
            max_chunk_size,
            overlap_lines,
        },
    )
    .chunks
}

#[derive(Debug, Clone, Copy)]
struct Unit {
    start: usize,
    end: usize,
    is_block: bool,
}

/// 切分并返回警告与结构问题
pub fn plan_chunks(source_text: &str, config: &ChunkConfig) -> ChunkPlan {
    if source_text.is_empty() {
        return ChunkPlan::default();
    }

    let lines: Vec<&str> = source_text.split_inclusive('\n').collect();
    let (tree, issues) = parse(source_text);
    let mut builder = PlanBuilder {
        lines: &lines,
        tree: tree.as_ref(),
        max: config.max_chunk_size.max(1),
        overlap: config.overlap_lines,
        chunks: Vec::new(),
        warnings: Vec::new(),
    };

    let spans = tree
        .as_ref()
        .map(|t| t.top_level_spans())
        .unwrap_or_default();

    if spans.is_empty() {
        builder.split_unit(1, lines.len(), BoundaryKind::LeftoverFragment, &[]);
    } else {
        let units = units_from_spans(&spans, lines.len());
        builder.pack(&units);
    }

    ChunkPlan {
        chunks: builder.chunks,
        warnings: builder.warnings,
        issues,
    }
}

fn units_from_spans(spans: &[crate::domain::parser::BoundarySpan], line_count: usize) -> Vec<Unit> {
    let mut units = Vec::new();
    let mut next = 1;
    for span in spans {
        if span.start_line > next {
            units.push(Unit {
                start: next,
                end: span.start_line - 1,
                is_block: false,
            });
        }
        units.push(Unit {
            start: span.start_line,
            end: span.end_line,
            is_block: true,
        });
        next = span.end_line + 1;
    }
    if next <= line_count {
        units.push(Unit {
            start: next,
            end: line_count,
            is_block: false,
        });
    }
    units
}

struct PlanBuilder<'a> {
    lines: &'a [&'a str],
    tree: Option<&'a ParseTree>,
    max: usize,
    overlap: usize,
    chunks: Vec<Chunk>,
    warnings: Vec<String>,
}

impl<'a> PlanBuilder<'a> {
    fn line_len(&self, line: usize) -> usize {
        self.lines[line - 1].chars().count()
    }

    fn range_len(&self, start: usize, end: usize) -> usize {
        (start..=end).map(|l| self.line_len(l)).sum()
    }

    fn text(&self, start: usize, end: usize) -> String {
        self.lines[start - 1..end].concat()
    }

    fn is_safe_after(&self, line: usize) -> bool {
        self.tree.map_or(true, |t| t.is_safe_split_after(line))
    }

    fn depth_at(&self, line: usize) -> usize {
        self.tree.map_or(0, |t| t.depth_at(line))
    }

    /// 贪心打包完整单元
    fn pack(&mut self, units: &[Unit]) {
        let mut current: Option<(usize, usize, usize)> = None;

        for unit in units {
            let size = self.range_len(unit.start, unit.end);

            if let Some((start, end, acc)) = current {
                if acc + size <= self.max {
                    current = Some((start, unit.end, acc + size));
                    continue;
                }
                self.push_chunk(start, end, BoundaryKind::WholeBlock, None, false);
                current = None;
            }

            if size <= self.max {
                current = Some((unit.start, unit.end, size));
                continue;
            }

            if unit.is_block {
                let preferred = self
                    .tree
                    .map(|t| t.inner_block_ends(unit.start, unit.end))
                    .unwrap_or_default();
                self.split_unit(unit.start, unit.end, BoundaryKind::PartialBlock, &preferred);
            } else {
                self.split_unit(unit.start, unit.end, BoundaryKind::LeftoverFragment, &[]);
            }
        }

        if let Some((start, end, _)) = current {
            self.push_chunk(start, end, BoundaryKind::WholeBlock, None, false);
        }
    }

    /// 在安全行边界处拆分一个单元
    fn split_unit(&mut self, start: usize, end: usize, kind: BoundaryKind, preferred: &[usize]) {
        let mut pieces = Vec::new();
        let mut piece_start = start;

        while piece_start <= end {
            let mut size = 0;
            let mut best_cut: Option<(usize, usize)> = None;
            let mut any_cut: Option<usize> = None;
            let mut line = piece_start;
            let piece_end;

            loop {
                let len = self.line_len(line);
                if size + len > self.max && line > piece_start {
                    piece_end = match (best_cut, any_cut) {
                        (Some((cut, cut_size)), _) if cut_size * 2 >= self.max => cut,
                        (_, Some(cut)) => cut,
                        (Some((cut, _)), None) => cut,
                        (None, None) => {
                            // 宁可超长也不在字面量或括号中间切开
                            let mut cut = line;
                            while cut < end && !self.is_safe_after(cut) {
                                cut += 1;
                            }
                            self.warnings.push(format!(
                                "lines {}-{} exceed max_chunk_size: no safe split point inside",
                                piece_start, cut
                            ));
                            cut
                        }
                    };
                    break;
                }
                size += len;
                if line == end {
                    piece_end = end;
                    break;
                }
                if self.is_safe_after(line) {
                    any_cut = Some(line);
                    if preferred.contains(&line) {
                        best_cut = Some((line, size));
                    }
                }
                line += 1;
            }

            if piece_start == piece_end && self.line_len(piece_start) > self.max {
                self.warnings.push(format!(
                    "line {} is longer than max_chunk_size ({} > {}) and forms its own chunk",
                    piece_start,
                    self.line_len(piece_start),
                    self.max
                ));
            }
            pieces.push((piece_start, piece_end));
            piece_start = piece_end + 1;
        }

        let total = pieces.len();
        let mut previous: Option<(usize, usize)> = None;
        for (i, (piece_start, piece_end)) in pieces.into_iter().enumerate() {
            let context = previous.and_then(|(prev_start, prev_end)| self.context_of(prev_start, prev_end));
            let continues = kind == BoundaryKind::PartialBlock && i + 1 < total;
            self.push_chunk(piece_start, piece_end, kind, context, continues);
            previous = Some((piece_start, piece_end));
        }
    }

    /// 前一片段末尾 `overlap` 行
    fn context_of(&self, prev_start: usize, prev_end: usize) -> Option<String> {
        if self.overlap == 0 {
            return None;
        }
        let from = prev_end.saturating_sub(self.overlap - 1).max(prev_start);
        let context = self.text(from, prev_end);
        if context.trim().is_empty() {
            None
        } else {
            Some(context)
        }
    }

    fn push_chunk(
        &mut self,
        start: usize,
        end: usize,
        kind: BoundaryKind,
        leading_context: Option<String>,
        continues: bool,
    ) {
        let index = self.chunks.len();
        self.chunks.push(Chunk {
            index,
            source_text: self.text(start, end),
            kind,
            start_line: start,
            end_line: end,
            leading_context,
            nesting_depth: self.depth_at(start),
            continues,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(chunks: &[Chunk]) -> String {
        chunks.iter().map(|c| c.source_text.as_str()).collect()
    }

    fn assert_tiles(source: &str, chunks: &[Chunk]) {
        assert_eq!(reassemble(chunks), source);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
            assert!(c.start_line <= c.end_line);
        }
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end_line + 1, pair[1].start_line);
        }
    }

    fn function(name: &str, body_lines: usize) -> String {
        let mut s = format!("FUNCTION {}(x)\n", name);
        for i in 0..body_lines {
            s.push_str(&format!("    SET v{} TO x + {}\n", i, i));
        }
        s.push_str("    RETURN x\nEND FUNCTION\n");
        s
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(chunk_source("", 100, 2).is_empty());
    }

    #[test]
    fn test_small_blocks_are_packed_whole() {
        let source = format!("{}\n{}", function("a", 1), function("b", 1));
        let chunks = chunk_source(&source, 10_000, 2);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, BoundaryKind::WholeBlock);
        assert!(chunks[0].leading_context.is_none());
        assert_tiles(&source, &chunks);
    }

    #[test]
    fn test_blocks_split_on_boundaries_when_budget_is_tight() {
        let a = function("a", 2);
        let b = function("b", 2);
        let source = format!("{}{}", a, b);
        let max = a.chars().count().max(b.chars().count());
        let chunks = chunk_source(&source, max, 2);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].source_text, a);
        assert_eq!(chunks[1].source_text, b);
        assert!(chunks.iter().all(|c| c.kind == BoundaryKind::WholeBlock));
        assert_tiles(&source, &chunks);
    }

    #[test]
    fn test_function_twice_max_size_splits_in_two() {
        // 每行 13 个字符，8 行正好是 2 * 52
        let mut source = String::from("FUNCTION f()\n");
        for _ in 0..5 {
            source.push_str("    y = 1000\n");
        }
        source.push_str("    RETURN y\nEND FUNCTION\n");
        assert!(source.lines().all(|l| l.chars().count() == 12));
        let max = source.chars().count() / 2;
        assert_eq!(max, 52);

        let chunks = chunk_source(&source, max, 2);
        assert_eq!(chunks.len(), 2);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 4));
        assert_eq!((chunks[1].start_line, chunks[1].end_line), (5, 8));
        assert!(chunks[0].leading_context.is_none());

        let context = chunks[1].leading_context.as_deref().unwrap();
        assert_eq!(context, "    y = 1000\n    y = 1000\n");
        assert_eq!(context.lines().count(), 2);
        assert!(chunks[0].source_text.ends_with(context));
        assert_tiles(&source, &chunks);
    }

    #[test]
    fn test_non_ascii_pseudocode_is_chunked() {
        let source = "函数定义开始\n    返回 1\n结束\n";
        let chunks = chunk_source(source, 100, 1);
        assert_eq!(chunks.len(), 1);
        assert_tiles(source, &chunks);

        let plan = plan_chunks(
            "FUNCTION 名字()\n    中文字 = 1\nEND FUNCTION\n",
            &ChunkConfig::default(),
        );
        assert_eq!(plan.chunks.len(), 1);
        assert!(plan.issues.is_empty());
    }

    #[test]
    fn test_oversized_block_becomes_partial_pieces_with_context() {
        let source = function("big", 30);
        let chunks = chunk_source(&source, 200, 2);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.kind == BoundaryKind::PartialBlock));
        assert!(chunks[0].leading_context.is_none());
        assert!(chunks[0].continues);
        assert!(!chunks.last().unwrap().continues);
        for pair in chunks.windows(2) {
            let context = pair[1].leading_context.as_deref().unwrap();
            assert_eq!(context.lines().count(), 2);
            assert!(pair[0].source_text.ends_with(context));
            assert_eq!(pair[1].nesting_depth, 1);
        }
        for c in &chunks {
            assert!(c.char_len() <= 200);
        }
        assert_tiles(&source, &chunks);
    }

    #[test]
    fn test_never_splits_inside_multiline_string() {
        let mut source = String::from("FUNCTION doc()\n    text = \"\"\"\n");
        for i in 0..20 {
            source.push_str(&format!("    line {} of a long literal\n", i));
        }
        source.push_str("    \"\"\"\n    RETURN text\nEND FUNCTION\n");
        let plan = plan_chunks(
            &source,
            &ChunkConfig {
                max_chunk_size: 120,
                overlap_lines: 1,
            },
        );
        assert_tiles(&source, &plan.chunks);
        // 字面量从第 2 行开始，到第 23 行结束；切分点只能在它之前或之后
        for c in &plan.chunks[..plan.chunks.len() - 1] {
            assert!(c.end_line < 2 || c.end_line >= 23, "split after line {}", c.end_line);
        }
        assert!(!plan.warnings.is_empty() || plan.chunks.iter().any(|c| c.char_len() > 120));
    }

    #[test]
    fn test_fallback_to_line_fragments() {
        let source: String = (0..40).map(|i| format!("x{} = {}\n", i, i)).collect();
        let chunks = chunk_source(&source, 60, 3);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.kind == BoundaryKind::LeftoverFragment));
        assert!(chunks[1].leading_context.as_deref().unwrap().lines().count() == 3);
        assert_tiles(&source, &chunks);
    }

    #[test]
    fn test_oversized_single_line_gets_own_chunk() {
        let long = "y".repeat(50);
        let source = format!("a = 1\n{}\nb = 2\n", long);
        let plan = plan_chunks(
            &source,
            &ChunkConfig {
                max_chunk_size: 20,
                overlap_lines: 0,
            },
        );
        assert_tiles(&source, &plan.chunks);
        assert!(plan.chunks.iter().any(|c| c.source_text.trim() == long));
        assert!(plan.warnings.iter().any(|w| w.contains("longer than max_chunk_size")));
        assert!(plan.chunks.iter().all(|c| c.leading_context.is_none()));
    }

    #[test]
    fn test_loose_statements_between_blocks_are_kept() {
        let source = format!("x = 1\n\n{}PRINT x\n", function("f", 1));
        let chunks = chunk_source(&source, 10_000, 1);
        assert_eq!(chunks.len(), 1);
        assert_tiles(&source, &chunks);
    }

    #[test]
    fn test_text_without_trailing_newline() {
        let source = "FUNCTION f()\n    RETURN 1\nEND FUNCTION\nPRINT f()";
        let chunks = chunk_source(source, 30, 1);
        assert_tiles(source, &chunks);
    }

    #[test]
    fn test_whitespace_only_input_is_one_blank_chunk() {
        let chunks = chunk_source("\n\n  \n", 100, 1);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_blank());
    }
}
