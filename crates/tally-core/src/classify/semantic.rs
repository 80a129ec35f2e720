//! Semantic text matching
//!
//! Pure string similarity used for book and category scoring. No model,
//! no I/O: lowercase tokens, a stop-word list that also drops banking
//! junk, a static semantic-group table whose members include common
//! merchant names, and a harmonic-mean aggregation over coverage of both
//! token sets.

/// English function words plus transaction-text junk.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "at", "by", "for", "from", "in", "of", "on", "or", "the", "to", "with",
    "payment", "transaction", "via", "using", "paid", "ref", "txn", "purchase", "debit",
    "credit", "info", "pvt", "ltd", "llc", "inc",
];

/// Static semantic groups. Members include the merchant names that show
/// up verbatim in bank descriptions.
const SEMANTIC_GROUPS: &[(&str, &[&str])] = &[
    (
        "food",
        &[
            "food", "restaurant", "cafe", "coffee", "pizza", "burger", "dining", "dinner",
            "lunch", "breakfast", "snack", "snacks", "swiggy", "zomato", "mcdonalds", "dominos",
            "kfc", "starbucks", "subway", "bakery", "eat", "meal", "meals", "ice", "cream",
            "icecream", "juice", "tea",
        ],
    ),
    (
        "grocery",
        &[
            "grocery", "groceries", "supermarket", "mart", "bazaar", "bigbasket", "blinkit",
            "zepto", "walmart", "costco", "vegetables", "fruits", "provision", "kirana",
        ],
    ),
    (
        "transport",
        &[
            "transport", "travel", "uber", "ola", "lyft", "grab", "taxi", "cab", "auto",
            "metro", "bus", "train", "flight", "fuel", "petrol", "diesel", "gas", "parking",
            "toll", "rapido",
        ],
    ),
    (
        "entertainment",
        &[
            "entertainment", "movie", "movies", "cinema", "netflix", "spotify", "hulu", "prime",
            "hotstar", "disney", "game", "games", "gaming", "concert", "show", "subscription",
        ],
    ),
    (
        "shopping",
        &[
            "shopping", "shop", "amazon", "flipkart", "myntra", "ajio", "mall", "store",
            "clothes", "clothing", "shoes", "apparel", "electronics", "gadget",
        ],
    ),
    (
        "health",
        &[
            "health", "medical", "pharmacy", "chemist", "doctor", "hospital", "clinic",
            "medicine", "medicines", "apollo", "gym", "fitness", "yoga", "dental",
        ],
    ),
    (
        "utilities",
        &[
            "utilities", "utility", "electricity", "water", "internet", "wifi", "broadband",
            "recharge", "bill", "bills", "mobile", "phone", "airtel", "jio", "vodafone",
            "postpaid", "prepaid", "dth",
        ],
    ),
    (
        "education",
        &[
            "education", "school", "college", "university", "tuition", "course", "courses",
            "class", "classes", "books", "udemy", "coursera", "exam", "fees",
        ],
    ),
];

/// Lowercase, strip punctuation, split, drop stop words and numeric-only
/// tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .filter(|token| !is_stop_word(token))
        .map(|token| token.to_string())
        .collect()
}

fn is_stop_word(token: &str) -> bool {
    if token.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    STOP_WORDS.contains(&token)
}

fn group_of(token: &str) -> Option<&'static str> {
    SEMANTIC_GROUPS
        .iter()
        .find(|(_, members)| members.contains(&token))
        .map(|(name, _)| *name)
}

/// Score one token pair: exact 1.0, substring 0.7, same semantic group
/// 0.8, otherwise 0.
pub fn pair_score(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if let (Some(ga), Some(gb)) = (group_of(a), group_of(b)) {
        if ga == gb {
            return 0.8;
        }
    }
    if a.contains(b) || b.contains(a) {
        return 0.7;
    }
    0.0
}

/// Similarity of a transaction text against a target text, in [0, 1].
///
/// Harmonic mean of the two coverage ratios (so a one-word target cannot
/// dominate a long description, and vice versa) plus a 5%-per-pair boost
/// capped at 15%.
pub fn similarity(transaction_text: &str, target_text: &str) -> f64 {
    let tx_tokens = tokenize(transaction_text);
    let target_tokens = tokenize(target_text);
    if tx_tokens.is_empty() || target_tokens.is_empty() {
        return 0.0;
    }

    let mut matched_pairs = 0usize;
    let mut tx_best = vec![0.0f64; tx_tokens.len()];
    let mut target_best = vec![0.0f64; target_tokens.len()];

    for (i, tx_token) in tx_tokens.iter().enumerate() {
        for (j, target_token) in target_tokens.iter().enumerate() {
            let score = pair_score(tx_token, target_token);
            if score > 0.0 {
                matched_pairs += 1;
                if score > tx_best[i] {
                    tx_best[i] = score;
                }
                if score > target_best[j] {
                    target_best[j] = score;
                }
            }
        }
    }

    let tx_coverage: f64 = tx_best.iter().sum::<f64>() / tx_tokens.len() as f64;
    let target_coverage: f64 = target_best.iter().sum::<f64>() / target_tokens.len() as f64;
    if tx_coverage == 0.0 || target_coverage == 0.0 {
        return 0.0;
    }

    let harmonic = 2.0 * tx_coverage * target_coverage / (tx_coverage + target_coverage);
    let boost = (0.05 * matched_pairs as f64).min(0.15);
    (harmonic + boost).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_strips_junk() {
        let tokens = tokenize("Paid Rs.199 to NETFLIX.COM via UPI ref 8839021");
        assert_eq!(tokens, vec!["rs", "netflix", "com", "upi"]);
    }

    #[test]
    fn numeric_tokens_are_dropped() {
        assert!(tokenize("1234 5678").is_empty());
    }

    #[test]
    fn pair_scores() {
        assert_eq!(pair_score("coffee", "coffee"), 1.0);
        assert_eq!(pair_score("star", "starbucks"), 0.7);
        // Same semantic group beats substring.
        assert_eq!(pair_score("swiggy", "restaurant"), 0.8);
        assert_eq!(pair_score("uber", "taxi"), 0.8);
        assert_eq!(pair_score("netflix", "grocery"), 0.0);
    }

    #[test]
    fn identical_texts_score_high() {
        let s = similarity("coffee shop", "coffee shop");
        assert!(s > 0.9, "got {}", s);
    }

    #[test]
    fn unrelated_texts_score_zero() {
        assert_eq!(similarity("netflix monthly", "plumbing supplies"), 0.0);
    }

    #[test]
    fn group_members_match_without_shared_words() {
        // "Ice cream" should land near a food description.
        let s = similarity("Ice cream at Udders", "Meals, snacks and dining out");
        assert!(s > 0.3, "got {}", s);
    }

    #[test]
    fn empty_inputs_score_zero() {
        assert_eq!(similarity("", "food"), 0.0);
        assert_eq!(similarity("food", ""), 0.0);
        // Stop-word-only text tokenizes to nothing.
        assert_eq!(similarity("paid via ref", "food"), 0.0);
    }

    #[test]
    fn similarity_is_clipped() {
        let s = similarity(
            "food restaurant cafe coffee",
            "food restaurant cafe coffee",
        );
        assert!(s <= 1.0);
        assert!(s >= 0.99);
    }

    #[test]
    fn partial_overlap_lands_in_the_middle() {
        let s = similarity("Starbucks latte", "coffee and snacks");
        assert!(s > 0.2 && s < 0.95, "got {}", s);
    }
}
