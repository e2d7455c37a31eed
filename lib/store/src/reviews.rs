//! Aggregates over the reviews index

use ahash::{AHashMap, AHashSet};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use storefront_core::model::round_cents;
use storefront_core::{ProductId, ReviewDocument, VectorIndex};

use crate::analytics::Granularity;
use crate::store::SchemaStore;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "this", "that", "was", "are", "but", "not", "have", "has",
    "had", "its", "it's", "you", "your", "they", "them", "were", "very", "just", "too", "than",
    "then", "from", "would", "could", "will", "all", "any", "out", "one", "also", "after",
    "before", "into", "only", "what", "when", "which", "there", "their", "been", "being",
    "some", "more", "most", "much", "can", "did", "does", "our", "get", "got",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewSummary {
    pub product_id: ProductId,
    pub review_count: usize,
    pub average_rating: Option<f64>,
    /// Review counts for 1 to 5 stars.
    pub star_counts: [usize; 5],
    pub verified_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopRatedProduct {
    pub product_id: ProductId,
    pub name: String,
    pub category: String,
    pub average_rating: f64,
    pub review_count: usize,
}

/// A review returned by semantic search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewMatch {
    #[serde(flatten)]
    pub review: ReviewDocument,
    pub distance: f32,
    pub similarity: f32,
}

/// Sentiment class of a star rating: 4 or 5 stars positive, 1 or 2
/// negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn from_rating(rating: u8) -> Self {
        match rating {
            4..=5 => Sentiment::Positive,
            3 => Sentiment::Neutral,
            _ => Sentiment::Negative,
        }
    }

    /// Overall label for an average rating.
    pub fn from_average(average: f64) -> Self {
        if average >= 4.0 {
            Sentiment::Positive
        } else if average >= 3.0 {
            Sentiment::Neutral
        } else {
            Sentiment::Negative
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SentimentPeriod {
    pub period_start: NaiveDate,
    pub review_count: usize,
    pub average_rating: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SentimentTrend {
    pub product_id: ProductId,
    pub review_count: usize,
    pub average_rating: Option<f64>,
    pub positive: usize,
    pub neutral: usize,
    pub negative: usize,
    pub positive_pct: f64,
    pub neutral_pct: f64,
    pub negative_pct: f64,
    /// `None` when the product has no reviews.
    pub overall: Option<Sentiment>,
    /// Oldest period first.
    pub periods: Vec<SentimentPeriod>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SentimentComparison {
    pub first: ReviewSummary,
    pub second: ReviewSummary,
    /// Product with the higher average rating; `None` on a tie or when
    /// either product has no reviews.
    pub better_rated: Option<ProductId>,
    pub rating_gap: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThemeTerm {
    pub term: String,
    /// Number of reviews mentioning the term.
    pub reviews: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewThemes {
    pub product_id: ProductId,
    pub positive_reviews: usize,
    pub negative_reviews: usize,
    pub positive_terms: Vec<ThemeTerm>,
    pub negative_terms: Vec<ThemeTerm>,
}

/// Every review stored in the index, decoded from document metadata.
pub fn all_reviews(index: &VectorIndex) -> Vec<ReviewDocument> {
    index
        .documents()
        .iter()
        .filter_map(|doc| doc.metadata.as_ref().and_then(ReviewDocument::from_metadata))
        .collect()
}

pub fn reviews_for(index: &VectorIndex, product: ProductId) -> Vec<ReviewDocument> {
    let mut reviews: Vec<ReviewDocument> = all_reviews(index)
        .into_iter()
        .filter(|r| r.product_id == product)
        .collect();
    reviews.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.review_id.cmp(&b.review_id))
    });
    reviews
}

pub fn review_summary(index: &VectorIndex, product: ProductId) -> ReviewSummary {
    let reviews = reviews_for(index, product);
    let mut star_counts = [0usize; 5];
    let mut verified_count = 0;
    let mut total = 0u64;
    for review in &reviews {
        if let Some(slot) = star_counts.get_mut(usize::from(review.rating.saturating_sub(1))) {
            *slot += 1;
        }
        if review.verified_purchase {
            verified_count += 1;
        }
        total += u64::from(review.rating);
    }

    ReviewSummary {
        product_id: product,
        review_count: reviews.len(),
        average_rating: (!reviews.is_empty())
            .then(|| round_cents(total as f64 / reviews.len() as f64)),
        star_counts,
        verified_count,
    }
}

/// Products with at least `min_reviews` reviews, best average rating first,
/// then most reviewed.
pub fn top_rated_products(
    index: &VectorIndex,
    store: &SchemaStore,
    category: Option<&str>,
    min_reviews: usize,
    limit: usize,
) -> Vec<TopRatedProduct> {
    let mut ratings: AHashMap<ProductId, (u64, usize)> = AHashMap::new();
    for review in all_reviews(index) {
        let entry = ratings.entry(review.product_id).or_insert((0, 0));
        entry.0 += u64::from(review.rating);
        entry.1 += 1;
    }

    let ids: Vec<ProductId> = ratings.keys().copied().collect();
    let mut top: Vec<TopRatedProduct> = store
        .get_products(&ids)
        .into_iter()
        .filter(|p| category.map(|c| p.category.eq_ignore_ascii_case(c)).unwrap_or(true))
        .filter_map(|p| {
            let (sum, count) = ratings.get(&p.id).copied()?;
            (count >= min_reviews.max(1)).then(|| TopRatedProduct {
                product_id: p.id,
                name: p.name,
                category: p.category,
                average_rating: round_cents(sum as f64 / count as f64),
                review_count: count,
            })
        })
        .collect();

    top.sort_by(|a, b| {
        b.average_rating
            .total_cmp(&a.average_rating)
            .then_with(|| b.review_count.cmp(&a.review_count))
            .then_with(|| a.product_id.cmp(&b.product_id))
    });
    top.truncate(limit);
    top
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        round_cents(part as f64 * 100.0 / total as f64)
    }
}

/// Rating mix of a product's reviews and its average rating per period.
pub fn sentiment_trend(index: &VectorIndex, product: ProductId, granularity: Granularity) -> SentimentTrend {
    let reviews = reviews_for(index, product);
    let (mut positive, mut neutral, mut negative) = (0, 0, 0);
    let mut total = 0u64;
    let mut buckets: BTreeMap<NaiveDate, (usize, u64)> = BTreeMap::new();
    for review in &reviews {
        match Sentiment::from_rating(review.rating) {
            Sentiment::Positive => positive += 1,
            Sentiment::Neutral => neutral += 1,
            Sentiment::Negative => negative += 1,
        }
        total += u64::from(review.rating);
        let bucket = buckets
            .entry(granularity.period_start(review.created_at.date_naive()))
            .or_default();
        bucket.0 += 1;
        bucket.1 += u64::from(review.rating);
    }

    let count = reviews.len();
    let average_rating = (count > 0).then(|| round_cents(total as f64 / count as f64));
    SentimentTrend {
        product_id: product,
        review_count: count,
        average_rating,
        positive,
        neutral,
        negative,
        positive_pct: percentage(positive, count),
        neutral_pct: percentage(neutral, count),
        negative_pct: percentage(negative, count),
        overall: average_rating.map(Sentiment::from_average),
        periods: buckets
            .into_iter()
            .map(|(period_start, (count, sum))| SentimentPeriod {
                period_start,
                review_count: count,
                average_rating: round_cents(sum as f64 / count as f64),
            })
            .collect(),
    }
}

pub fn compare_sentiment(index: &VectorIndex, first: ProductId, second: ProductId) -> SentimentComparison {
    let first = review_summary(index, first);
    let second = review_summary(index, second);
    let (better_rated, rating_gap) = match (first.average_rating, second.average_rating) {
        (Some(a), Some(b)) => {
            let better = match a.total_cmp(&b) {
                std::cmp::Ordering::Greater => Some(first.product_id),
                std::cmp::Ordering::Less => Some(second.product_id),
                std::cmp::Ordering::Equal => None,
            };
            (better, Some(round_cents((a - b).abs())))
        }
        _ => (None, None),
    };
    SentimentComparison {
        first,
        second,
        better_rated,
        rating_gap,
    }
}

/// Distinct lowercase words of a review worth counting as themes.
fn theme_words(review: &ReviewDocument) -> AHashSet<String> {
    format!("{} {}", review.title, review.text)
        .to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\''))
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

fn top_terms(counts: AHashMap<String, usize>, limit: usize) -> Vec<ThemeTerm> {
    let mut terms: Vec<ThemeTerm> = counts
        .into_iter()
        .map(|(term, reviews)| ThemeTerm { term, reviews })
        .collect();
    terms.sort_by(|a, b| b.reviews.cmp(&a.reviews).then_with(|| a.term.cmp(&b.term)));
    terms.truncate(limit);
    terms
}

/// Most mentioned words in a product's positive and negative reviews.
/// Neutral reviews are not counted.
pub fn common_themes(index: &VectorIndex, product: ProductId, limit: usize) -> ReviewThemes {
    let mut positive: AHashMap<String, usize> = AHashMap::new();
    let mut negative: AHashMap<String, usize> = AHashMap::new();
    let (mut positive_reviews, mut negative_reviews) = (0, 0);
    for review in reviews_for(index, product) {
        let counts = match Sentiment::from_rating(review.rating) {
            Sentiment::Positive => {
                positive_reviews += 1;
                &mut positive
            }
            Sentiment::Negative => {
                negative_reviews += 1;
                &mut negative
            }
            Sentiment::Neutral => continue,
        };
        for word in theme_words(&review) {
            *counts.entry(word).or_insert(0) += 1;
        }
    }

    ReviewThemes {
        product_id: product,
        positive_reviews,
        negative_reviews,
        positive_terms: top_terms(positive, limit),
        negative_terms: top_terms(negative, limit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use storefront_core::{Distance, Document, IndexConfig, Vector};

    fn add(index: &VectorIndex, product: u64, rating: u8, text: &str, month: u32) {
        let review = ReviewDocument {
            review_id: format!("r-{}", index.count() + 1),
            product_id: ProductId(product),
            customer_id: None,
            rating,
            title: String::new(),
            text: text.to_string(),
            verified_purchase: false,
            created_at: Utc.with_ymd_and_hms(2024, month, 5, 0, 0, 0).unwrap(),
        };
        index
            .insert_new(Document::new(
                review.review_id.as_str(),
                Vector::new(vec![1.0, 0.0]),
                Some(review.metadata()),
            ))
            .unwrap();
    }

    fn index() -> VectorIndex {
        VectorIndex::new(IndexConfig::new("reviews", 2, Distance::Cosine))
    }

    #[test]
    fn test_sentiment_trend_counts_and_periods() {
        let index = index();
        add(&index, 1, 5, "great", 1);
        add(&index, 1, 4, "good", 1);
        add(&index, 1, 3, "fine", 2);
        add(&index, 1, 1, "broke", 2);
        add(&index, 2, 1, "other product", 2);

        let trend = sentiment_trend(&index, ProductId(1), Granularity::Month);
        assert_eq!(trend.review_count, 4);
        assert_eq!((trend.positive, trend.neutral, trend.negative), (2, 1, 1));
        assert_eq!(trend.positive_pct, 50.0);
        assert_eq!(trend.negative_pct, 25.0);
        assert_eq!(trend.average_rating, Some(3.25));
        assert_eq!(trend.overall, Some(Sentiment::Neutral));
        assert_eq!(trend.periods.len(), 2);
        assert_eq!(trend.periods[0].average_rating, 4.5);
        assert_eq!(trend.periods[1].average_rating, 2.0);

        let empty = sentiment_trend(&index, ProductId(3), Granularity::Day);
        assert_eq!(empty.review_count, 0);
        assert_eq!(empty.overall, None);
        assert_eq!(empty.positive_pct, 0.0);
        assert!(empty.periods.is_empty());
    }

    #[test]
    fn test_compare_sentiment() {
        let index = index();
        add(&index, 1, 5, "great", 1);
        add(&index, 2, 3, "fine", 1);
        add(&index, 2, 4, "good", 1);

        let comparison = compare_sentiment(&index, ProductId(1), ProductId(2));
        assert_eq!(comparison.better_rated, Some(ProductId(1)));
        assert_eq!(comparison.rating_gap, Some(1.5));

        add(&index, 3, 5, "great", 1);
        assert_eq!(compare_sentiment(&index, ProductId(1), ProductId(3)).better_rated, None);
        let missing = compare_sentiment(&index, ProductId(1), ProductId(4));
        assert_eq!(missing.better_rated, None);
        assert_eq!(missing.rating_gap, None);
    }

    #[test]
    fn test_common_themes_split_by_sentiment() {
        let index = index();
        add(&index, 1, 5, "Battery life is great, great sound", 1);
        add(&index, 1, 4, "Sound is clear and the battery lasts", 1);
        add(&index, 1, 3, "Battery is okay", 1);
        add(&index, 1, 1, "Strap broke after a week", 1);
        add(&index, 1, 2, "The strap feels cheap", 1);

        let themes = common_themes(&index, ProductId(1), 3);
        assert_eq!(themes.positive_reviews, 2);
        assert_eq!(themes.negative_reviews, 2);
        // Each review counts a word once.
        assert_eq!(
            themes.positive_terms,
            vec![
                ThemeTerm { term: "battery".to_string(), reviews: 2 },
                ThemeTerm { term: "sound".to_string(), reviews: 2 },
                ThemeTerm { term: "clear".to_string(), reviews: 1 },
            ]
        );
        assert_eq!(themes.negative_terms[0], ThemeTerm { term: "strap".to_string(), reviews: 2 });
        assert!(themes.negative_terms.iter().all(|t| t.term != "the"));
    }
}
