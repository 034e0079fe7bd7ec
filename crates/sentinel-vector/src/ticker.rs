//! Ticker resolution from filenames and document text.

use std::sync::LazyLock;

use regex::Regex;

/// Company names mapped to their trading symbols.
pub const COMPANY_TICKERS: &[(&str, &str)] = &[
    ("NVIDIA", "NVDA"),
    ("TESLA", "TSLA"),
    ("APPLE", "AAPL"),
    ("GOOGLE", "GOOGL"),
    ("ALPHABET", "GOOGL"),
    ("MICROSOFT", "MSFT"),
    ("META", "META"),
    ("FACEBOOK", "META"),
    ("AMAZON", "AMZN"),
    ("AMD", "AMD"),
    ("INTEL", "INTC"),
];

static PAREN_SYMBOL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([A-Z]{1,5})\)").unwrap());

/// Parenthesised abbreviations that filings define for agencies, officers,
/// and accounting terms. None of them name the issuer.
const NON_TICKER_ACRONYMS: &[&str] = &[
    "SEC", "DOJ", "FDA", "FTC", "EPA", "IRS", "FBI", "CFTC", "FINRA", "NHTSA", "OSHA", "FCC",
    "EU", "EC", "UK", "US", "USA", "CEO", "CFO", "COO", "CTO", "GAAP", "IFRS", "EPS", "AI",
    "FSD", "IPO", "ESG", "LLC", "INC", "LP",
];

fn known_tickers() -> impl Iterator<Item = &'static str> {
    let mut seen: Vec<&'static str> = Vec::new();
    COMPANY_TICKERS.iter().filter_map(move |(_, t)| {
        if seen.contains(t) {
            None
        } else {
            seen.push(t);
            Some(*t)
        }
    })
}

/// Resolve a ticker: explicit hint, then filename, then text.
pub fn resolve(hint: Option<&str>, filename: &str, text: &str) -> Option<String> {
    if let Some(h) = hint.map(str::trim).filter(|h| !h.is_empty()) {
        return Some(h.to_uppercase());
    }
    from_filename(filename).or_else(|| from_text(text))
}

/// A known ticker that prefixes the filename or follows an underscore.
pub fn from_filename(filename: &str) -> Option<String> {
    let upper = filename.to_uppercase();
    known_tickers()
        .find(|ticker| {
            let prefixed = upper
                .strip_prefix(ticker)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(['_', '-', '.']));
            prefixed || upper.contains(&format!("_{}", ticker))
        })
        .map(String::from)
}

/// A known symbol, then a known company name, then any other "(SYM)" that is
/// not a defined abbreviation such as "(SEC)".
pub fn from_text(text: &str) -> Option<String> {
    let upper = text.to_uppercase();

    for ticker in known_tickers() {
        let paren = format!("({})", ticker);
        let spaced = format!(" {} ", ticker);
        if upper.contains(&paren) || upper.contains(&spaced) {
            return Some(ticker.to_string());
        }
    }

    if let Some((_, ticker)) = COMPANY_TICKERS.iter().find(|(company, _)| upper.contains(company)) {
        return Some(ticker.to_string());
    }

    // Matched against the original casing so "(a)" list markers never qualify.
    PAREN_SYMBOL_RE
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .find(|sym| !NON_TICKER_ACRONYMS.contains(&sym.as_str()))
}
