use std::collections::BTreeSet;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{ArticleSource, StructuredAnswer};

static ANNOTATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(?:(\d+)|(BULLISH|BEARISH))\]").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentiment {
    Bullish,
    Bearish,
}

impl Sentiment {
    pub fn marker(self) -> &'static str {
        match self {
            Self::Bullish => "[BULLISH]",
            Self::Bearish => "[BEARISH]",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bullish => write!(f, "bullish"),
            Self::Bearish => write!(f, "bearish"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Citation(u32),
    Sentiment(Sentiment),
}

/// Splits `text` into literal spans and annotation tokens, left to right.
///
/// Concatenating the literal spans with the original spelling of each token
/// reproduces `text` exactly. A bracketed number too large for `u32` stays
/// literal.
pub fn tokenize(text: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut cursor = 0usize;

    for captures in ANNOTATION_RE.captures_iter(text) {
        let Some(whole) = captures.get(0) else {
            continue;
        };

        let token = if let Some(number) = captures.get(1) {
            number.as_str().parse::<u32>().ok().map(Segment::Citation)
        } else {
            match captures.get(2).map(|m| m.as_str()) {
                Some("BULLISH") => Some(Segment::Sentiment(Sentiment::Bullish)),
                Some("BEARISH") => Some(Segment::Sentiment(Sentiment::Bearish)),
                _ => None,
            }
        };
        let Some(token) = token else {
            continue;
        };

        if whole.start() > cursor {
            segments.push(Segment::Text(&text[cursor..whole.start()]));
        }
        segments.push(token);
        cursor = whole.end();
    }

    if cursor < text.len() {
        segments.push(Segment::Text(&text[cursor..]));
    }

    segments
}

/// Distinct citation numbers referenced anywhere in `texts`, ascending.
pub fn cited_numbers<'a, I>(texts: I) -> BTreeSet<u32>
where
    I: IntoIterator<Item = &'a str>,
{
    texts
        .into_iter()
        .flat_map(tokenize)
        .filter_map(|segment| match segment {
            Segment::Citation(number) => Some(number),
            _ => None,
        })
        .collect()
}

/// Sources cited in the answer's tldr or details, by ascending number.
pub fn cited_sources(answer: &StructuredAnswer) -> Vec<&ArticleSource> {
    let cited = cited_numbers([answer.tldr.as_str(), answer.details.content.as_str()]);
    select_sources(&answer.sources, &cited)
}

pub fn select_sources<'a>(
    sources: &'a [ArticleSource],
    numbers: &BTreeSet<u32>,
) -> Vec<&'a ArticleSource> {
    numbers
        .iter()
        .filter_map(|number| sources.iter().find(|source| source.number == *number))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use crate::citation::{Segment, Sentiment, cited_numbers, cited_sources, tokenize};
    use crate::model::{AnswerDetails, ArticleSource, StructuredAnswer};

    fn source(number: u32) -> ArticleSource {
        ArticleSource {
            number,
            title: format!("article {number}"),
            source: "wire".to_string(),
            url: format!("https://news.example/{number}"),
            published_at: None,
            relevance: 50,
        }
    }

    #[test]
    fn tokenize_preserves_literal_text() {
        let segments = tokenize("BTC rallied [1] while ETH fell [2] [1]");
        assert_eq!(
            segments,
            vec![
                Segment::Text("BTC rallied "),
                Segment::Citation(1),
                Segment::Text(" while ETH fell "),
                Segment::Citation(2),
                Segment::Text(" "),
                Segment::Citation(1),
            ]
        );
    }

    #[test]
    fn tokenize_recognizes_sentiment_markers() {
        let segments = tokenize("[BULLISH] momentum, [BEARISH] macro[3]");
        assert_eq!(
            segments,
            vec![
                Segment::Sentiment(Sentiment::Bullish),
                Segment::Text(" momentum, "),
                Segment::Sentiment(Sentiment::Bearish),
                Segment::Text(" macro"),
                Segment::Citation(3),
            ]
        );
    }

    #[test]
    fn tokenize_leaves_unrecognized_brackets_alone() {
        let text = "[a] [bullish] [] [99999999999]";
        assert_eq!(tokenize(text), vec![Segment::Text(text)]);
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn cited_numbers_are_distinct_and_ordered() {
        let cited = cited_numbers(["BTC rallied [1] while ETH fell [2] [1]"]);
        assert_eq!(cited, BTreeSet::from([1, 2]));
    }

    #[test]
    fn cited_sources_filters_and_orders_by_number() {
        let answer = StructuredAnswer {
            tldr: "ETH fell [2]".to_string(),
            details: AnswerDetails {
                content: "BTC rallied [1] while ETH fell [2] [1]".to_string(),
                citations: BTreeSet::new(),
            },
            confidence: 80,
            sources: vec![source(3), source(2), source(1)],
            metadata: None,
        };

        let numbers = cited_sources(&answer)
            .into_iter()
            .map(|source| source.number)
            .collect::<Vec<_>>();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[test]
    fn cited_sources_skips_numbers_without_source() {
        let answer = StructuredAnswer {
            tldr: "see [7]".to_string(),
            sources: vec![source(1)],
            ..StructuredAnswer::default()
        };
        assert!(cited_sources(&answer).is_empty());
    }
}
