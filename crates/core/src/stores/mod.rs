pub mod elasticsearch;
#[cfg(test)]
pub(crate) mod memory;

pub use elasticsearch::ElasticsearchIndex;
