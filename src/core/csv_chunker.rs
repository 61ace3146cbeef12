use crate::domain::posting::{PostingRow, POSTING_HEADERS};
use crate::utils::error::{PostingError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub index: usize,
    pub rows: Vec<PostingRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CsvPart {
    pub file_name: String,
    pub row_count: usize,
    pub data: Vec<u8>,
}

/// 連續且屬於同一條 lane 的資料列
fn lane_groups(rows: Vec<PostingRow>) -> Vec<Vec<PostingRow>> {
    let mut groups: Vec<Vec<PostingRow>> = Vec::new();
    for row in rows {
        match groups.last_mut() {
            Some(group) if group[0].lane_id == row.lane_id => group.push(row),
            _ => groups.push(vec![row]),
        }
    }
    groups
}

/// 依上限切分，保持原始順序；`keep_lanes_together` 時盡量不把一條 lane 拆到兩個檔案
pub fn chunk_rows(rows: Vec<PostingRow>, max_rows: usize, keep_lanes_together: bool) -> Vec<Chunk> {
    let max_rows = max_rows.max(1);
    let mut chunks: Vec<Vec<PostingRow>> = Vec::new();
    let mut current: Vec<PostingRow> = Vec::new();

    for group in lane_groups(rows) {
        if keep_lanes_together
            && !current.is_empty()
            && current.len() + group.len() > max_rows
        {
            chunks.push(std::mem::take(&mut current));
        }
        for row in group {
            if current.len() == max_rows {
                chunks.push(std::mem::take(&mut current));
            }
            current.push(row);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
        .into_iter()
        .enumerate()
        .map(|(index, rows)| Chunk { index, rows })
        .collect()
}

/// 每個檔案都重複固定表頭
pub fn render_chunk(chunk: &Chunk) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(POSTING_HEADERS)?;
    for row in &chunk.rows {
        writer.write_record(&row.fields)?;
    }
    writer.into_inner().map_err(|e| PostingError::ProcessingError {
        message: format!("failed to flush CSV part {}: {}", chunk.index + 1, e),
    })
}

pub fn part_file_name(prefix: &str, index: usize) -> String {
    format!("{}_part_{:03}.csv", prefix, index + 1)
}

pub fn render_parts(chunks: &[Chunk], prefix: &str) -> Result<Vec<CsvPart>> {
    chunks
        .iter()
        .map(|chunk| {
            Ok(CsvPart {
                file_name: part_file_name(prefix, chunk.index),
                row_count: chunk.rows.len(),
                data: render_chunk(chunk)?,
            })
        })
        .collect()
}
