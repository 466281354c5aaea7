//! Read year headers and value cells from a rendered CAGR view and map them
//! back onto `{year -> value}` for one statistic row.
//!
//! The page renders two tables (Revenue CAGR first) with identical class
//! names, so neither cell list says which table a cell belongs to. Year
//! headers of both tables arrive as one sequence; the first repeated year
//! marks where the second table starts. Value cells arrive flattened,
//! row-major per table: all Low values, then Avg, then High.
//!
//! [`Extractor::extract`] is the one-shot entry point and never fails. It is
//! exactly [`Extractor::read_cells`], then [`map_cells`], then [`finish`].
//! Callers that retry page reads themselves use those three directly:
//! `read_cells` is the only part that touches the page and may be retried,
//! while `map_cells` is pure and its errors are final for the ticker.

use crate::config::SiteConfig;
use crate::domain::{ExtractionResult, MetricRow, TickerSymbol, YearLabel, YearValues, NOT_AVAILABLE};
use crate::error::ScrapeError;
use crate::renderer::RenderContext;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Trimmed texts read from the page, in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageCells {
    pub year_headers: Vec<String>,
    pub values: Vec<String>,
}

/// Turns the CAGR view of an already-positioned page into an [`ExtractionResult`].
#[derive(Debug, Clone)]
pub struct Extractor {
    year_header_selector: String,
    value_cell_selector: String,
}

impl Extractor {
    pub fn new(site: &SiteConfig) -> Self {
        Self {
            year_header_selector: site.year_header_selector.clone(),
            value_cell_selector: site.value_cell_selector.clone(),
        }
    }

    /// Extract one row for `ticker`. Never returns an error: any failure from
    /// the page becomes an unsuccessful result.
    ///
    /// The CAGR view must already be active on `context`.
    pub async fn extract(
        &self,
        context: &mut dyn RenderContext,
        ticker: &TickerSymbol,
        row: MetricRow,
    ) -> ExtractionResult {
        let started = Instant::now();
        let outcome = match self.read_cells(context).await {
            Ok(cells) => map_cells(&cells, row),
            Err(e) => Err(e),
        };
        finish(ticker, outcome, started)
    }

    /// Read the year-header and value-cell texts. Fails only on page errors;
    /// empty lists are returned as-is.
    pub async fn read_cells(
        &self,
        context: &mut dyn RenderContext,
    ) -> Result<PageCells, ScrapeError> {
        let year_headers = read_texts(context, &self.year_header_selector).await?;
        let values = read_texts(context, &self.value_cell_selector).await?;
        debug!(
            years = year_headers.len(),
            values = values.len(),
            "read CAGR cells"
        );
        Ok(PageCells {
            year_headers,
            values,
        })
    }
}

async fn read_texts(
    context: &mut dyn RenderContext,
    selector: &str,
) -> Result<Vec<String>, ScrapeError> {
    let elements = context.find_all(selector).await?;
    let mut texts = Vec::with_capacity(elements.len());
    for element in elements {
        texts.push(context.read_text(element).await?.trim().to_string());
    }
    Ok(texts)
}

/// Wrap a mapping outcome into a result, logging either way.
pub fn finish(
    ticker: &TickerSymbol,
    outcome: Result<YearValues, ScrapeError>,
    started: Instant,
) -> ExtractionResult {
    let elapsed = started.elapsed();
    match outcome {
        Ok(values) => {
            info!(
                %ticker,
                years = values.len(),
                "extracted CAGR in {:.2}s",
                elapsed.as_secs_f64()
            );
            ExtractionResult::success(ticker.clone(), values, elapsed)
        }
        Err(e) => {
            warn!(%ticker, "extraction failed: {e}");
            ExtractionResult::failure(ticker.clone(), elapsed, &e)
        }
    }
}

/// Pure mapping from page cells to the selected row's values.
pub fn map_cells(cells: &PageCells, row: MetricRow) -> Result<YearValues, ScrapeError> {
    let years: Vec<YearLabel> = cells
        .year_headers
        .iter()
        .filter_map(|text| YearLabel::parse(text))
        .collect();
    if years.is_empty() {
        return Err(ScrapeError::EmptyExtraction("year headers"));
    }

    let first_table = first_table_years(&years);
    debug!(?first_table, "first table years");

    if cells.values.is_empty() {
        return Err(ScrapeError::EmptyExtraction("value cells"));
    }
    Ok(map_row(first_table, &cells.values, row))
}

/// Years belonging to the first table: everything before the first year that
/// already occurred earlier. Without a repeat, the whole sequence is one table.
pub fn first_table_years(years: &[YearLabel]) -> &[YearLabel] {
    let mut seen = HashSet::with_capacity(years.len());
    for (i, year) in years.iter().enumerate() {
        if !seen.insert(year) {
            return &years[..i];
        }
    }
    years
}

/// Pick the `row` run out of the flattened value cells. Missing positions map
/// to [`NOT_AVAILABLE`]; exactly one entry per year.
pub fn map_row(years: &[YearLabel], values: &[String], row: MetricRow) -> YearValues {
    let start = row.index() * years.len();
    years
        .iter()
        .enumerate()
        .map(|(i, year)| {
            let value = values
                .get(start + i)
                .cloned()
                .unwrap_or_else(|| NOT_AVAILABLE.to_string());
            (year.clone(), value)
        })
        .collect()
}
