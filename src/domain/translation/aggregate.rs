//! Translation Context - Aggregate
//!
//! 按分块序号重组结果。失败或未完成的分块以原始源文本占位，
//! 保证输出中每个分块都恰好出现一次。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::imports::{is_leading_import, is_top_level_import};
use super::{Chunk, RequestId, TargetLanguage, TranslationResult};

/// 带分块序号的诊断信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDiagnostic {
    pub chunk_index: usize,
    pub message: String,
}

impl ChunkDiagnostic {
    pub fn new(chunk_index: usize, message: impl Into<String>) -> Self {
        Self {
            chunk_index,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ChunkDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[chunk {}] {}", self.chunk_index, self.message)
    }
}

/// 分块最终状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Succeeded,
    Abandoned,
    Cancelled,
}

/// 编排器交给聚合的单个分块终态
#[derive(Debug, Clone)]
pub enum ChunkFinal {
    Translated {
        result: TranslationResult,
        attempts: u32,
    },
    Abandoned {
        last_error: String,
        attempts: u32,
    },
    Cancelled {
        attempts: u32,
    },
}

/// 分块报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkReport {
    pub chunk_index: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub status: ChunkStatus,
    pub attempts: u32,
    pub confidence: f64,
    /// 在输出代码中的行区间（从 1 开始，闭区间；空输出为 None）
    pub output_lines: Option<(usize, usize)>,
}

/// 聚合翻译结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedTranslation {
    pub request_id: RequestId,
    pub code: String,
    pub success: bool,
    pub cancelled: bool,
    pub confidence: f64,
    pub warnings: Vec<ChunkDiagnostic>,
    pub errors: Vec<ChunkDiagnostic>,
    pub chunks: Vec<ChunkReport>,
}

impl AggregatedTranslation {
    /// 空输入的结果：没有分块，成功，置信度 1.0
    pub fn empty(request_id: RequestId) -> Self {
        Self {
            request_id,
            code: String::new(),
            success: true,
            cancelled: false,
            confidence: 1.0,
            warnings: Vec::new(),
            errors: Vec::new(),
            chunks: Vec::new(),
        }
    }

    /// 按序号重组
    ///
    /// `finals` 中缺失的分块按取消处理。
    pub fn assemble(
        request_id: RequestId,
        chunks: &[Chunk],
        mut finals: BTreeMap<usize, ChunkFinal>,
        cancelled: bool,
    ) -> Self {
        if chunks.is_empty() {
            let mut empty = Self::empty(request_id);
            empty.cancelled = cancelled;
            empty.success = !cancelled;
            return empty;
        }

        let mut code = String::new();
        let mut warnings = Vec::new();
        let mut errors = Vec::new();
        let mut reports = Vec::with_capacity(chunks.len());
        let mut confidence: f64 = 1.0;
        let mut all_translated = true;

        for (position, chunk) in chunks.iter().enumerate() {
            let is_last = position + 1 == chunks.len();
            let final_state = finals
                .remove(&chunk.index)
                .unwrap_or(ChunkFinal::Cancelled { attempts: 0 });

            let (piece, status, attempts, chunk_confidence) = match final_state {
                ChunkFinal::Translated { result, attempts } => {
                    warnings.extend(
                        result
                            .warnings()
                            .iter()
                            .map(|w| ChunkDiagnostic::new(chunk.index, w.clone())),
                    );
                    let piece = result.code().unwrap_or_default().to_string();
                    (piece, ChunkStatus::Succeeded, attempts, result.confidence())
                }
                ChunkFinal::Abandoned {
                    last_error,
                    attempts,
                } => {
                    all_translated = false;
                    errors.push(ChunkDiagnostic::new(
                        chunk.index,
                        format!(
                            "abandoned after {} attempt(s), source kept verbatim: {}",
                            attempts, last_error
                        ),
                    ));
                    (chunk.source_text.clone(), ChunkStatus::Abandoned, attempts, 0.0)
                }
                ChunkFinal::Cancelled { attempts } => {
                    all_translated = false;
                    errors.push(ChunkDiagnostic::new(
                        chunk.index,
                        "cancelled before completion, source kept verbatim",
                    ));
                    (chunk.source_text.clone(), ChunkStatus::Cancelled, attempts, 0.0)
                }
            };

            confidence = confidence.min(chunk_confidence);

            let start = count_lines(&code) + 1;
            code.push_str(&piece);
            if !is_last && !code.is_empty() && !code.ends_with('\n') {
                code.push('\n');
            }
            let end = count_lines(&code);
            let output_lines = if piece.trim().is_empty() || end < start {
                None
            } else {
                Some((start, end))
            };

            reports.push(ChunkReport {
                chunk_index: chunk.index,
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                status,
                attempts,
                confidence: chunk_confidence,
                output_lines,
            });
        }

        Self {
            request_id,
            code,
            success: all_translated && !cancelled,
            cancelled,
            confidence,
            warnings,
            errors,
            chunks: reports,
        }
    }

    /// 把成功分块中的顶层导入移到输出开头并去重
    ///
    /// 各分块的输出行区间随之更新，导入行本身不再归属任何分块。
    /// 返回被移动的导入行数。
    pub fn hoist_imports(&mut self, language: &TargetLanguage) -> usize {
        let lines: Vec<&str> = self.code.split_inclusive('\n').collect();
        let owner = |line: usize| {
            self.chunks.iter().find(|r| {
                matches!(r.output_lines, Some((start, end)) if start <= line && line <= end)
            })
        };

        let mut hoisted: Vec<String> = Vec::new();
        let mut removed = vec![false; lines.len()];
        for (i, line) in lines.iter().enumerate() {
            let translated = owner(i + 1).map_or(false, |r| r.status == ChunkStatus::Succeeded);
            if translated && is_top_level_import(line, language) {
                removed[i] = true;
                let statement = line.trim_end().to_string();
                if !hoisted.contains(&statement) {
                    hoisted.push(statement);
                }
            }
        }
        if hoisted.is_empty() {
            return 0;
        }
        let moved = removed.iter().filter(|r| **r).count();

        // 去掉导入后正文开头的空行
        for (i, line) in lines.iter().enumerate() {
            if removed[i] {
                continue;
            }
            if !line.trim().is_empty() {
                break;
            }
            removed[i] = true;
        }

        let (leading, rest): (Vec<String>, Vec<String>) = hoisted
            .into_iter()
            .partition(|statement| is_leading_import(statement, language));
        let mut header: Vec<String> = leading;
        header.extend(rest);

        let body: String = lines
            .iter()
            .zip(&removed)
            .filter(|(_, removed)| !**removed)
            .map(|(line, _)| *line)
            .collect();

        let mut code = header.join("\n");
        code.push('\n');
        if !body.trim().is_empty() {
            code.push('\n');
        }
        let offset = count_lines(&code);
        code.push_str(&body);

        // 旧行号 -> 新行号
        let mut mapping = Vec::with_capacity(lines.len());
        let mut next = offset;
        for is_removed in &removed {
            if *is_removed {
                mapping.push(None);
            } else {
                next += 1;
                mapping.push(Some(next));
            }
        }
        for report in &mut self.chunks {
            report.output_lines = report.output_lines.and_then(|(start, end)| {
                let kept: Vec<usize> = (start..=end)
                    .filter_map(|line| mapping.get(line - 1).copied().flatten())
                    .collect();
                Some((*kept.first()?, *kept.last()?))
            });
        }

        self.code = code;
        moved
    }

    /// 找出输出中某一行来自哪个分块
    pub fn chunk_for_output_line(&self, line: usize) -> Option<usize> {
        self.chunks.iter().find_map(|report| match report.output_lines {
            Some((start, end)) if start <= line && line <= end => Some(report.chunk_index),
            _ => None,
        })
    }

    pub fn chunk_report(&self, chunk_index: usize) -> Option<&ChunkReport> {
        self.chunks.iter().find(|r| r.chunk_index == chunk_index)
    }

    pub fn add_warning(&mut self, chunk_index: usize, message: impl Into<String>) {
        self.warnings.push(ChunkDiagnostic::new(chunk_index, message));
    }

    pub fn errors_for(&self, chunk_index: usize) -> impl Iterator<Item = &ChunkDiagnostic> {
        self.errors.iter().filter(move |d| d.chunk_index == chunk_index)
    }
}

/// 已完成的行数（末尾不带换行的半行也算一行）
fn count_lines(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let newlines = text.matches('\n').count();
    if text.ends_with('\n') {
        newlines
    } else {
        newlines + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::translation::{BoundaryKind, ModelBackendKind, ResultMetadata};

    fn chunk(index: usize, text: &str, start_line: usize) -> Chunk {
        let lines = text.lines().count().max(1);
        Chunk {
            index,
            source_text: text.to_string(),
            kind: BoundaryKind::WholeBlock,
            start_line,
            end_line: start_line + lines - 1,
            leading_context: None,
            nesting_depth: 0,
            continues: false,
        }
    }

    fn ok(code: &str, confidence: f64) -> ChunkFinal {
        ChunkFinal::Translated {
            result: TranslationResult::success(
                code,
                confidence,
                ResultMetadata::new("m", "r", ModelBackendKind::Local),
            ),
            attempts: 1,
        }
    }

    #[test]
    fn test_empty_aggregate() {
        let agg = AggregatedTranslation::assemble(RequestId::new(), &[], BTreeMap::new(), false);
        assert!(agg.success);
        assert_eq!(agg.confidence, 1.0);
        assert!(agg.code.is_empty());
    }

    #[test]
    fn test_assembles_in_index_order_regardless_of_insertion() {
        let chunks = vec![chunk(0, "a\n", 1), chunk(1, "b\n", 2), chunk(2, "c\n", 3)];
        let mut finals = BTreeMap::new();
        finals.insert(2, ok("C\n", 0.9));
        finals.insert(0, ok("A\n", 0.8));
        finals.insert(1, ok("B", 1.0));

        let agg = AggregatedTranslation::assemble(RequestId::new(), &chunks, finals, false);
        assert!(agg.success);
        assert_eq!(agg.code, "A\nB\nC\n");
        assert_eq!(agg.confidence, 0.8);
        assert_eq!(agg.chunk_for_output_line(2), Some(1));
        assert_eq!(agg.chunk_for_output_line(3), Some(2));
    }

    #[test]
    fn test_imports_are_hoisted_and_deduplicated() {
        let chunks = vec![chunk(0, "a\n", 1), chunk(1, "b\n", 2), chunk(2, "import x\n", 3)];
        let mut finals = BTreeMap::new();
        finals.insert(0, ok("import os\n\ndef a():\n    return os.sep\n", 1.0));
        finals.insert(1, ok("import os\nimport sys\ndef b():\n    return sys.argv\n", 1.0));
        finals.insert(
            2,
            ChunkFinal::Abandoned {
                last_error: "boom".to_string(),
                attempts: 1,
            },
        );

        let mut agg = AggregatedTranslation::assemble(RequestId::new(), &chunks, finals, false);
        assert_eq!(agg.hoist_imports(&TargetLanguage::python()), 3);
        assert_eq!(
            agg.code,
            "import os\nimport sys\n\ndef a():\n    return os.sep\ndef b():\n    return sys.argv\nimport x\n"
        );
        assert_eq!(agg.chunk_report(0).unwrap().output_lines, Some((4, 5)));
        assert_eq!(agg.chunk_report(1).unwrap().output_lines, Some((6, 7)));
        // 失败分块的原文不参与移动
        assert_eq!(agg.chunk_report(2).unwrap().output_lines, Some((8, 8)));
        assert_eq!(agg.chunk_for_output_line(1), None);
    }

    #[test]
    fn test_future_imports_stay_first() {
        let chunks = vec![chunk(0, "a\n", 1), chunk(1, "b\n", 2)];
        let mut finals = BTreeMap::new();
        finals.insert(0, ok("import os\n", 1.0));
        finals.insert(1, ok("from __future__ import annotations\nx = 1\n", 1.0));

        let mut agg = AggregatedTranslation::assemble(RequestId::new(), &chunks, finals, false);
        agg.hoist_imports(&TargetLanguage::python());
        assert_eq!(agg.code, "from __future__ import annotations\nimport os\n\nx = 1\n");
        assert_eq!(agg.chunk_report(0).unwrap().output_lines, None);
        assert_eq!(agg.chunk_report(1).unwrap().output_lines, Some((4, 4)));

        let before = agg.code.clone();
        assert_eq!(agg.hoist_imports(&TargetLanguage::new("ruby").unwrap()), 0);
        assert_eq!(agg.code, before);
    }

    #[test]
    fn test_failed_chunk_keeps_source_and_tags_one_error() {
        let chunks = vec![chunk(0, "a\n", 1), chunk(1, "b\n", 2), chunk(2, "c\n", 3)];
        let mut finals = BTreeMap::new();
        finals.insert(0, ok("A\n", 1.0));
        finals.insert(
            1,
            ChunkFinal::Abandoned {
                last_error: "boom".to_string(),
                attempts: 3,
            },
        );
        finals.insert(2, ok("C\n", 1.0));

        let agg = AggregatedTranslation::assemble(RequestId::new(), &chunks, finals, false);
        assert!(!agg.success);
        assert_eq!(agg.code, "A\nb\nC\n");
        assert_eq!(agg.errors.len(), 1);
        assert_eq!(agg.errors[0].chunk_index, 1);
        assert!(agg.errors[0].message.contains("boom"));
        assert_eq!(agg.confidence, 0.0);
        assert_eq!(agg.chunk_report(1).map(|r| r.attempts), Some(3));
    }

    #[test]
    fn test_missing_final_counts_as_cancelled() {
        let chunks = vec![chunk(0, "a\n", 1), chunk(1, "b\n", 2)];
        let mut finals = BTreeMap::new();
        finals.insert(0, ok("A\n", 1.0));

        let agg = AggregatedTranslation::assemble(RequestId::new(), &chunks, finals, true);
        assert!(agg.cancelled);
        assert!(!agg.success);
        assert_eq!(agg.code, "A\nb\n");
        assert_eq!(agg.errors_for(1).count(), 1);
        assert_eq!(agg.chunk_report(1).map(|r| r.status), Some(ChunkStatus::Cancelled));
    }

    #[test]
    fn test_result_warnings_are_tagged() {
        let chunks = vec![chunk(0, "a\n", 1)];
        let mut finals = BTreeMap::new();
        finals.insert(
            0,
            ChunkFinal::Translated {
                result: TranslationResult::success(
                    "A\n",
                    0.5,
                    ResultMetadata::new("m", "r", ModelBackendKind::Local),
                )
                .with_warning("truncated"),
                attempts: 2,
            },
        );
        let agg = AggregatedTranslation::assemble(RequestId::new(), &chunks, finals, false);
        assert_eq!(agg.warnings, vec![ChunkDiagnostic::new(0, "truncated")]);
        assert_eq!(agg.warnings[0].to_string(), "[chunk 0] truncated");
    }

    #[test]
    fn test_count_lines() {
        assert_eq!(count_lines(""), 0);
        assert_eq!(count_lines("a"), 1);
        assert_eq!(count_lines("a\n"), 1);
        assert_eq!(count_lines("a\nb"), 2);
    }
}
