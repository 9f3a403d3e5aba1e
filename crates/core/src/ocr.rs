//! Wire types of the layout OCR result and the conversion into a typed layout.
//!
//! Reference tokens such as `/paragraphs/12` are resolved here, once, into
//! [`ParagraphRef`] values. Nothing past this module sees the string form.

use serde::Deserialize;
use serde_with::{serde_as, DefaultOnNull};
use tracing::warn;

use crate::error::IngestError;

/// Upper bound on the declared `rowCount * columnCount` of one table.
pub const MAX_TABLE_CELLS: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParagraphRole {
    Title,
    SectionHeading,
    PageHeader,
    PageFooter,
    PageNumber,
    Footnote,
    FormulaBlock,
    #[serde(other)]
    Other,
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResult {
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub paragraphs: Vec<RawParagraph>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub tables: Vec<RawTable>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub figures: Vec<RawFigure>,
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingRegion {
    pub page_number: u32,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub polygon: Vec<f64>,
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawParagraph {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub role: Option<ParagraphRole>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub bounding_regions: Vec<BoundingRegion>,
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCaption {
    #[serde(default)]
    pub content: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub elements: Vec<String>,
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCell {
    pub row_index: usize,
    pub column_index: usize,
    #[serde(default)]
    pub content: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub elements: Vec<String>,
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTable {
    pub row_count: usize,
    pub column_count: usize,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub cells: Vec<RawCell>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub bounding_regions: Vec<BoundingRegion>,
    #[serde(default)]
    pub caption: Option<RawCaption>,
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFigure {
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub bounding_regions: Vec<BoundingRegion>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub elements: Vec<String>,
    #[serde(default)]
    pub caption: Option<RawCaption>,
}

/// Position of a paragraph in the layout's paragraph list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParagraphRef(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutParagraph {
    pub content: String,
    pub role: Option<ParagraphRole>,
    pub page: u32,
    pub polygon: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutCaption {
    pub content: String,
    pub refs: Vec<ParagraphRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutCell {
    pub row: usize,
    pub column: usize,
    pub content: String,
    pub refs: Vec<ParagraphRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutTable {
    pub page: u32,
    pub rows: usize,
    pub columns: usize,
    pub cells: Vec<LayoutCell>,
    pub caption: Option<LayoutCaption>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutFigure {
    pub page: u32,
    pub refs: Vec<ParagraphRef>,
    pub caption: Option<LayoutCaption>,
}

/// OCR output with every cross reference checked against the paragraph list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Layout {
    pub paragraphs: Vec<LayoutParagraph>,
    pub tables: Vec<LayoutTable>,
    pub figures: Vec<LayoutFigure>,
}

impl AnalyzeResult {
    /// Fails with [`IngestError::InvalidDocument`] when a table declares a
    /// grid larger than [`MAX_TABLE_CELLS`].
    pub fn into_layout(self) -> Result<Layout, IngestError> {
        let paragraph_count = self.paragraphs.len();

        let paragraphs = self
            .paragraphs
            .into_iter()
            .map(|paragraph| {
                let (page, polygon) = first_region(paragraph.bounding_regions);
                LayoutParagraph {
                    content: paragraph.content,
                    role: paragraph.role,
                    page,
                    polygon,
                }
            })
            .collect();

        let tables = self
            .tables
            .into_iter()
            .map(|table| {
                checked_grid(table.row_count, table.column_count)?;
                Ok(LayoutTable {
                    page: first_region(table.bounding_regions).0,
                    rows: table.row_count,
                    columns: table.column_count,
                    cells: table
                        .cells
                        .into_iter()
                        .map(|cell| LayoutCell {
                            row: cell.row_index,
                            column: cell.column_index,
                            content: cell.content,
                            refs: resolve_references(&cell.elements, paragraph_count),
                        })
                        .collect(),
                    caption: table
                        .caption
                        .map(|caption| convert_caption(caption, paragraph_count)),
                })
            })
            .collect::<Result<Vec<_>, IngestError>>()?;

        let figures = self
            .figures
            .into_iter()
            .map(|figure| LayoutFigure {
                page: first_region(figure.bounding_regions).0,
                refs: resolve_references(&figure.elements, paragraph_count),
                caption: figure
                    .caption
                    .map(|caption| convert_caption(caption, paragraph_count)),
            })
            .collect();

        Ok(Layout {
            paragraphs,
            tables,
            figures,
        })
    }
}

fn checked_grid(rows: usize, columns: usize) -> Result<usize, IngestError> {
    rows.checked_mul(columns)
        .filter(|cells| *cells <= MAX_TABLE_CELLS)
        .ok_or_else(|| {
            IngestError::InvalidDocument(format!(
                "table declares a {rows} x {columns} grid, limit is {MAX_TABLE_CELLS} cells"
            ))
        })
}

fn first_region(regions: Vec<BoundingRegion>) -> (u32, Vec<f64>) {
    regions
        .into_iter()
        .next()
        .map(|region| (region.page_number, region.polygon))
        .unwrap_or((1, Vec::new()))
}

fn convert_caption(caption: RawCaption, paragraph_count: usize) -> LayoutCaption {
    LayoutCaption {
        refs: resolve_references(&caption.elements, paragraph_count),
        content: caption.content,
    }
}

fn resolve_references(tokens: &[String], paragraph_count: usize) -> Vec<ParagraphRef> {
    tokens
        .iter()
        .filter_map(|token| {
            let resolved = parse_reference(token).filter(|index| index.0 < paragraph_count);
            if resolved.is_none() {
                warn!(token = %token, paragraph_count, "skipping unresolvable reference token");
            }
            resolved
        })
        .collect()
}

/// Parses the trailing numeric segment of a path-like token, e.g. `/paragraphs/7`.
pub fn parse_reference(token: &str) -> Option<ParagraphRef> {
    let tail = token.rsplit('/').next()?;
    if tail.is_empty() || !tail.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    tail.parse().ok().map(ParagraphRef)
}
