//! Mock filings bundled into the binary for simulation and demo runs.

use serde::Serialize;

/// A bundled filing and its catalogue metadata.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DemoFiling {
    pub filename: &'static str,
    pub ticker: &'static str,
    /// Form type (`8-K`, `10-Q`, `NEWS`).
    pub form: &'static str,
    pub headline: &'static str,
    #[serde(skip)]
    pub content: &'static str,
}

pub const FILINGS: &[DemoFiling] = &[
    DemoFiling {
        filename: "nvda_8k_lawsuit.txt",
        ticker: "NVDA",
        form: "8-K",
        headline: "Class action lawsuit over AI chip patents",
        content: include_str!("../demos/nvda_8k_lawsuit.txt"),
    },
    DemoFiling {
        filename: "tsla_8k_recall.txt",
        ticker: "TSLA",
        form: "8-K",
        headline: "Safety recall of FSD Beta vehicles",
        content: include_str!("../demos/tsla_8k_recall.txt"),
    },
    DemoFiling {
        filename: "aapl_10q_earnings.txt",
        ticker: "AAPL",
        form: "10-Q",
        headline: "Quarterly earnings miss and lowered guidance",
        content: include_str!("../demos/aapl_10q_earnings.txt"),
    },
    DemoFiling {
        filename: "nvda_partnership_news.txt",
        ticker: "NVDA",
        form: "NEWS",
        headline: "Hyperscaler supply agreement",
        content: include_str!("../demos/nvda_partnership_news.txt"),
    },
    DemoFiling {
        filename: "tsla_8k_sec_investigation.txt",
        ticker: "TSLA",
        form: "8-K",
        headline: "SEC investigation into executive stock sales",
        content: include_str!("../demos/tsla_8k_sec_investigation.txt"),
    },
];

/// Look up a filing by filename, with or without the `.txt` extension.
pub fn find(name: &str) -> Option<&'static DemoFiling> {
    let name = name.trim();
    let stem = name.strip_suffix(".txt").unwrap_or(name);
    FILINGS.iter().find(|f| {
        f.filename.eq_ignore_ascii_case(name)
            || f.filename
                .strip_suffix(".txt")
                .is_some_and(|s| s.eq_ignore_ascii_case(stem))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_filing_has_content() {
        assert_eq!(FILINGS.len(), 5);
        for filing in FILINGS {
            assert!(!filing.content.trim().is_empty(), "{} is empty", filing.filename);
            assert!(filing.content.contains(filing.ticker));
        }
    }

    #[test]
    fn test_find_by_stem_or_filename() {
        assert_eq!(find("tsla_8k_recall").map(|f| f.ticker), Some("TSLA"));
        assert_eq!(find("AAPL_10Q_EARNINGS.txt").map(|f| f.ticker), Some("AAPL"));
        assert!(find("msft_10k.txt").is_none());
    }

    #[test]
    fn test_catalogue_omits_content() {
        let json = serde_json::to_value(FILINGS[0]).unwrap();
        assert_eq!(json["ticker"], "NVDA");
        assert!(json.get("content").is_none());
    }
}
