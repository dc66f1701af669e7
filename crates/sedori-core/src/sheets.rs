use async_trait::async_trait;
use sedori_types::{ProductListing, ProfitAnalysis, SedoriResult};

/// Destination for accepted listings. The production implementation appends a
/// row to a cloud spreadsheet and lives outside this crate; the pipeline only
/// depends on this interface and tests use a recording stub.
#[async_trait]
pub trait SpreadsheetSink: Send + Sync {
    /// Append one row for an accepted listing. The row shape is
    /// `build_row(listing, profit)`.
    async fn append(&self, listing: &ProductListing, profit: &ProfitAnalysis) -> SedoriResult<()>;
}

/// Column layout shared by every sink implementation.
pub fn build_row(listing: &ProductListing, profit: &ProfitAnalysis) -> Vec<String> {
    vec![
        listing.asin.clone(),
        listing.title.clone(),
        listing.price.to_string(),
        listing.currency.clone(),
        listing.description.clone(),
        listing.image_urls.join(", "),
        profit.profit.to_string(),
        profit.roi.to_string(),
        profit.margin.to_string(),
    ]
}
