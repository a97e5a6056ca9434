//! Fixed-width text tables for chat replies.

use tabled::settings::{Alignment, Style};
use tabled::{Table, Tabled};

use common::SignalState;

/// One line of an "all symbols" alert.
#[derive(Debug, Clone, PartialEq, Eq, Tabled)]
pub struct AlertRow {
    #[tabled(rename = "Symbol")]
    pub symbol: String,
    #[tabled(rename = "Buy", display_with = "yes_no_cell")]
    pub buy: bool,
    #[tabled(rename = "Sell", display_with = "yes_no_cell")]
    pub sell: bool,
}

#[derive(Tabled)]
struct SymbolRow<'a> {
    #[tabled(rename = "Symbol")]
    symbol: &'a str,
}

#[derive(Tabled)]
struct TickerRow<'a> {
    #[tabled(rename = "Symbol")]
    symbol: &'a str,
    #[tabled(rename = "Buy", display_with = "yes_no_cell")]
    buy: bool,
    #[tabled(rename = "Sell", display_with = "yes_no_cell")]
    sell: bool,
    #[tabled(rename = "Fast", display_with = "four_places")]
    fast: f64,
    #[tabled(rename = "Signal", display_with = "four_places")]
    signal: f64,
}

pub fn yes_no(value: bool) -> &'static str {
    if value {
        "Y"
    } else {
        "N"
    }
}

fn yes_no_cell(value: &bool) -> String {
    yes_no(*value).to_string()
}

fn four_places(value: &f64) -> String {
    format!("{value:.4}")
}

pub fn symbols_table(symbols: &[String]) -> String {
    render(symbols.iter().map(|s| SymbolRow { symbol: s.as_str() }))
}

pub fn alerts_table(rows: &[AlertRow]) -> String {
    render(rows)
}

pub fn ticker_table(rows: &[(String, SignalState)]) -> String {
    render(rows.iter().map(|(symbol, s)| TickerRow {
        symbol: symbol.as_str(),
        buy: s.buy,
        sell: s.sell,
        fast: s.fast,
        signal: s.signal,
    }))
}

/// Split `items` into pages of at most `max_rows` and render each page.
/// An empty input renders nothing.
pub fn paginate<T>(items: &[T], max_rows: usize, render: impl Fn(&[T]) -> String) -> Vec<String> {
    items.chunks(max_rows.max(1)).map(render).collect()
}

/// Left-aligned ASCII table:
///
/// ```text
/// +---------+-----+
/// | Symbol  | Buy |
/// +---------+-----+
/// | BTCUSDT | Y   |
/// +---------+-----+
/// ```
fn render<I>(rows: I) -> String
where
    I: IntoIterator,
    I::Item: Tabled,
{
    Table::new(rows)
        .with(Style::ascii())
        .with(Alignment::left())
        .to_string()
}
