use crate::models::PipelineOptions;

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub header_markers: Vec<String>,
    pub keep_first_header: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::from(&PipelineOptions::default())
    }
}

impl From<&PipelineOptions> for ChunkingConfig {
    fn from(value: &PipelineOptions) -> Self {
        Self {
            header_markers: value.header_markers.clone(),
            keep_first_header: value.keep_first_header,
        }
    }
}

/// Splits page text into chunks that each start at a header line.
///
/// With `keep_first_header` the first header stays in the leading chunk
/// together with any text above it. Chunks are trimmed and empty ones dropped.
pub fn split_by_headers(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut seen_header = false;

    for line in text.lines() {
        let is_header = config
            .header_markers
            .iter()
            .any(|marker| !marker.is_empty() && line.starts_with(marker.as_str()));

        if is_header {
            let first = !seen_header;
            seen_header = true;
            if !(first && config.keep_first_header) {
                chunks.push(std::mem::take(&mut current));
            }
        }

        current.push_str(line);
        current.push('\n');
    }
    chunks.push(current);

    chunks
        .into_iter()
        .map(|chunk| chunk.trim().to_string())
        .filter(|chunk| !chunk.is_empty())
        .collect()
}
