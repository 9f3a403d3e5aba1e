//! Reading-order reconstruction of OCR layout output.
//!
//! Paragraphs are kept in an arena indexed by their OCR position. Tables and
//! figures claim the paragraphs they reference; claimed slots are cleared in a
//! single pass and each rendered block is spliced in at its first reference.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::error::IngestError;
use crate::models::{DocumentSource, PageText, PipelineOptions};
use crate::ocr::{Layout, LayoutCaption, LayoutFigure, LayoutParagraph, LayoutTable, ParagraphRef, ParagraphRole};
use crate::traits::LayoutSource;

const CHECKBOX_GLYPHS: [(&str, &str); 2] = [(":selected:", "☑"), (":unselected:", "☐")];

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzedParagraph {
    pub content: String,
    pub page: u32,
    pub polygon: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzedTable {
    pub content: String,
    pub page: u32,
    /// Referenced paragraphs in encounter order; the first one is the splice point.
    pub refs: Vec<ParagraphRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzedFigure {
    pub content: String,
    pub page: u32,
    pub refs: Vec<ParagraphRef>,
}

fn role_markup(role: ParagraphRole) -> (&'static str, &'static str) {
    match role {
        ParagraphRole::Title => ("## ", "\n"),
        ParagraphRole::SectionHeading => ("### ", "\n"),
        ParagraphRole::PageHeader | ParagraphRole::PageFooter => ("> ", "\n"),
        ParagraphRole::PageNumber => ("*Page ", "*\n"),
        ParagraphRole::Footnote => ("<footnote> ", "</footnote>\n"),
        ParagraphRole::FormulaBlock => ("<formula_block>", "</formula_block>\n"),
        ParagraphRole::Other => ("", ""),
    }
}

fn replace_glyphs(content: &str) -> String {
    CHECKBOX_GLYPHS
        .iter()
        .fold(content.to_string(), |text, (from, to)| text.replace(from, to))
}

pub fn analyze_paragraphs(paragraphs: &[LayoutParagraph]) -> Vec<AnalyzedParagraph> {
    paragraphs
        .iter()
        .map(|paragraph| {
            let body = replace_glyphs(&paragraph.content);
            let content = match paragraph.role {
                Some(role) => {
                    let (prefix, suffix) = role_markup(role);
                    format!("{prefix}{body}{suffix}")
                }
                None => body,
            };

            AnalyzedParagraph {
                content,
                page: paragraph.page,
                polygon: paragraph.polygon.clone(),
            }
        })
        .collect()
}

pub fn analyze_tables(
    tables: &[LayoutTable],
    paragraphs: &[AnalyzedParagraph],
) -> Vec<AnalyzedTable> {
    tables
        .iter()
        .map(|table| {
            let mut grid = vec![vec![String::new(); table.columns]; table.rows];
            let mut refs = Vec::new();

            for cell in &table.cells {
                let text = cell
                    .refs
                    .first()
                    .and_then(|first| paragraphs.get(first.0))
                    .map(|paragraph| paragraph.content.as_str())
                    .unwrap_or(cell.content.as_str());

                match grid.get_mut(cell.row).and_then(|row| row.get_mut(cell.column)) {
                    Some(slot) => *slot = table_cell_text(text),
                    None => debug!(
                        row = cell.row,
                        column = cell.column,
                        "table cell outside declared grid"
                    ),
                }
                refs.extend(cell.refs.iter().copied());
            }

            let mut content = String::new();
            for (row_index, row) in grid.iter().enumerate() {
                content.push_str(&format!("| {} |\n", row.join(" | ")));
                if row_index == 0 {
                    content.push_str(&format!("| {} |\n", vec!["---"; row.len()].join(" | ")));
                }
            }

            if let Some(caption) = &table.caption {
                content.push_str(&format!("*{}*\n", caption.content));
                refs.extend(caption.refs.iter().copied());
            }

            AnalyzedTable {
                content,
                page: table.page,
                refs,
            }
        })
        .collect()
}

fn table_cell_text(text: &str) -> String {
    text.trim().replace('\n', " ").replace('|', "\\|")
}

pub fn analyze_figures(
    figures: &[LayoutFigure],
    paragraphs: &[AnalyzedParagraph],
    width: usize,
    height: usize,
) -> Vec<AnalyzedFigure> {
    figures
        .iter()
        .map(|figure| {
            let elements = figure
                .refs
                .iter()
                .filter_map(|reference| paragraphs.get(reference.0))
                .collect::<Vec<_>>();

            let mut refs = figure.refs.clone();
            let caption = figure.caption.as_ref().map(|caption: &LayoutCaption| {
                refs.extend(caption.refs.iter().copied());
                caption.content.as_str()
            });

            AnalyzedFigure {
                content: render_canvas(&elements, width, height, caption),
                page: figure.page,
                refs,
            }
        })
        .collect()
}

/// Places each element's text at its normalized polygon centroid on a
/// `width` x `height` character grid.
pub fn render_canvas(
    elements: &[&AnalyzedParagraph],
    width: usize,
    height: usize,
    caption: Option<&str>,
) -> String {
    let placed = elements
        .iter()
        .filter_map(|element| centroid(&element.polygon).map(|point| (point, element)))
        .collect::<Vec<_>>();

    let mut rendered = String::new();

    if !placed.is_empty() && width > 0 && height > 0 {
        let xs = placed.iter().flat_map(|(_, element)| element.polygon.iter().step_by(2));
        let ys = placed.iter().flat_map(|(_, element)| element.polygon.iter().skip(1).step_by(2));
        let (min_x, max_x) = bounds(xs);
        let (min_y, max_y) = bounds(ys);

        let mut canvas = vec![vec![' '; width]; height];
        for ((x, y), element) in &placed {
            let column = scale(*x, min_x, max_x, width);
            let row = scale(*y, min_y, max_y, height);
            for (offset, character) in element.content.chars().enumerate() {
                if character == '\n' {
                    break;
                }
                if let Some(cell) = canvas[row].get_mut(column + offset) {
                    *cell = character;
                }
            }
        }

        rendered = canvas
            .into_iter()
            .map(|line| line.into_iter().collect::<String>().trim_end().to_string())
            .collect::<Vec<_>>()
            .join("\n");
    }

    if let Some(caption) = caption.filter(|caption| !caption.is_empty()) {
        if !rendered.is_empty() {
            rendered.push_str("\n\n");
        }
        rendered.push_str(&format!("*{caption}*"));
    }

    rendered
}

fn centroid(polygon: &[f64]) -> Option<(f64, f64)> {
    let points = polygon.len() / 2;
    if points == 0 {
        return None;
    }
    let (sum_x, sum_y) = polygon
        .chunks_exact(2)
        .fold((0.0, 0.0), |(x, y), pair| (x + pair[0], y + pair[1]));
    Some((sum_x / points as f64, sum_y / points as f64))
}

fn bounds<'a>(values: impl Iterator<Item = &'a f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(low, high), value| {
        (low.min(*value), high.max(*value))
    })
}

fn scale(value: f64, min: f64, max: f64, cells: usize) -> usize {
    let span = max - min;
    if !(span > 0.0) {
        return 0;
    }
    let position = ((value - min) / span * (cells - 1) as f64) as usize;
    position.min(cells - 1)
}

/// Removes every paragraph claimed by a table or figure and splices the
/// rendered block in at the position of its first reference.
pub fn merge(
    paragraphs: Vec<AnalyzedParagraph>,
    tables: Vec<AnalyzedTable>,
    figures: Vec<AnalyzedFigure>,
) -> Vec<AnalyzedParagraph> {
    let removal: BTreeSet<usize> = tables
        .iter()
        .flat_map(|table| table.refs.iter())
        .chain(figures.iter().flat_map(|figure| figure.refs.iter()))
        .map(|reference| reference.0)
        .collect();

    let mut slots: Vec<Option<AnalyzedParagraph>> = paragraphs.into_iter().map(Some).collect();
    for index in removal.iter().rev() {
        if let Some(slot) = slots.get_mut(*index) {
            *slot = None;
        }
    }

    let blocks = tables
        .into_iter()
        .map(|table| (table.refs.first().copied(), table.content, table.page))
        .chain(
            figures
                .into_iter()
                .map(|figure| (figure.refs.first().copied(), figure.content, figure.page)),
        );

    let mut spliced: BTreeMap<usize, Vec<AnalyzedParagraph>> = BTreeMap::new();
    for (first, content, page) in blocks {
        if let Some(first) = first {
            spliced.entry(first.0).or_default().push(AnalyzedParagraph {
                content,
                page,
                polygon: Vec::new(),
            });
        }
    }

    let mut ordered = Vec::with_capacity(slots.len());
    for (index, slot) in slots.into_iter().enumerate() {
        if let Some(blocks) = spliced.remove(&index) {
            ordered.extend(blocks);
        }
        if let Some(paragraph) = slot {
            ordered.push(paragraph);
        }
    }

    ordered
}

pub fn group_by_page(sequence: &[AnalyzedParagraph]) -> Vec<PageText> {
    let mut pages: BTreeMap<u32, String> = BTreeMap::new();
    for paragraph in sequence {
        let text = pages.entry(paragraph.page).or_default();
        text.push_str(&paragraph.content);
        text.push_str("\n\n");
    }

    pages
        .into_iter()
        .map(|(number, text)| PageText { number, text })
        .collect()
}

pub fn reconstruct(layout: &Layout, options: &PipelineOptions) -> Vec<PageText> {
    let paragraphs = analyze_paragraphs(&layout.paragraphs);
    let tables = analyze_tables(&layout.tables, &paragraphs);
    let figures = analyze_figures(
        &layout.figures,
        &paragraphs,
        options.figure_canvas_width,
        options.figure_canvas_height,
    );

    group_by_page(&merge(paragraphs, tables, figures))
}

pub struct LayoutReconstructor<S> {
    source: S,
    options: PipelineOptions,
}

impl<S> LayoutReconstructor<S>
where
    S: LayoutSource + Send + Sync,
{
    pub fn new(source: S, options: PipelineOptions) -> Self {
        Self { source, options }
    }

    /// Fetches the OCR layout for `source` and returns one text blob per page.
    pub async fn pages(&self, source: &DocumentSource) -> Result<Vec<PageText>, IngestError> {
        let raw = self.source.analyze(source).await?;
        let layout = raw.into_layout()?;
        info!(
            source = %source.location(),
            paragraphs = layout.paragraphs.len(),
            tables = layout.tables.len(),
            figures = layout.figures.len(),
            "layout fetched"
        );
        Ok(reconstruct(&layout, &self.options))
    }
}
