//! Transaction ingest & classification pipeline (C6)
//!
//! Maps a parsed transaction to a book, category, and payment mode using
//! semantic matching, learned merchant mappings, approval history, and an
//! optional LLM step that degrades silently to the local scorer. The
//! classifier consumes entities, never produces them: every id in a
//! prediction references an entity that exists in the local replica at
//! prediction time.
//!
//! Priority: LLM (when configured, enabled, and confident) -> local
//! weighted scoring -> the default "Others" category as the floor.

pub mod learning;
pub mod llm;
pub mod pending;
pub mod semantic;

use std::sync::Arc;

use tokio::time::timeout;
use tracing::debug;

use crate::config::{ClassifierWeights, CoreConfig, LlmConfig};
use crate::error::{Error, Result};
use crate::models::{
    Book, Category, Entry, ParsedTransaction, PaymentMode, Prediction,
};
use crate::store::LedgerStore;

use learning::{normalize_merchant, LearningStore, MerchantMapping};
use llm::LlmProvider;

/// Book / category / payment-mode classifier.
pub struct Classifier {
    store: Arc<LedgerStore>,
    learning: Arc<LearningStore>,
    llm: Option<Arc<dyn LlmProvider>>,
    weights: ClassifierWeights,
    llm_config: LlmConfig,
}

impl Classifier {
    pub fn new(store: Arc<LedgerStore>, learning: Arc<LearningStore>, config: &CoreConfig) -> Self {
        Self {
            store,
            learning,
            llm: None,
            weights: config.classifier.clone(),
            llm_config: config.llm.clone(),
        }
    }

    /// Attach an LLM provider. It only runs when the user preference also
    /// enables it.
    pub fn with_llm(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(provider);
        self
    }

    /// Classify a parsed transaction against the local replica.
    pub async fn classify(&self, tx: &ParsedTransaction) -> Result<Prediction> {
        let books = self.store.classifier_candidate_books();
        let categories = self.candidate_categories();
        if books.is_empty() || categories.is_empty() {
            return Err(Error::EmptyCandidates);
        }

        if let Some(provider) = self.llm.clone() {
            if self.store.preferences().llm_enabled {
                match self.try_llm(provider.as_ref(), tx, &books, &categories).await {
                    Ok(prediction) => return Ok(prediction),
                    // Silent degradation: the user never sees LLM failures.
                    Err(e) => debug!(error = %e, "LLM step failed; using local classifier"),
                }
            }
        }

        Ok(self.local_classify(tx, &books, &categories))
    }

    /// Categories the classifier may propose: the user's own plus the
    /// default "Others", none deleted.
    fn candidate_categories(&self) -> Vec<Category> {
        let user = self.store.user().clone();
        self.store
            .live_categories()
            .into_iter()
            .filter(|c| c.meta.user_id == user || c.is_default_others())
            .collect()
    }

    async fn try_llm(
        &self,
        provider: &dyn LlmProvider,
        tx: &ParsedTransaction,
        books: &[Book],
        categories: &[Category],
    ) -> Result<Prediction> {
        let recent = self.store.recent_entries(self.llm_config.few_shot_entries);
        let prompt = llm::build_prompt(tx, books, categories, &recent);

        let answer = timeout(self.llm_config.timeout(), provider.classify(&prompt))
            .await
            .map_err(|_| Error::LlmUnavailable("classification timed out".into()))??;

        // Referential safety: ids must exist locally. An unknown id is a
        // protocol violation, not a new entity.
        let book = books
            .iter()
            .find(|b| b.id.as_str() == answer.book_id)
            .ok_or_else(|| {
                Error::LlmProtocol(format!("unknown book id {:?}", answer.book_id))
            })?;
        let category = categories
            .iter()
            .find(|c| c.id.as_str() == answer.category_id)
            .ok_or_else(|| {
                Error::LlmProtocol(format!("unknown category id {:?}", answer.category_id))
            })?;
        if answer.confidence < self.llm_config.min_confidence {
            return Err(Error::LlmUnavailable(format!(
                "confidence {} below threshold {}",
                answer.confidence, self.llm_config.min_confidence
            )));
        }

        let mut signals = vec![format!("llm:{}", provider.model())];
        if let Some(reasoning) = &answer.reasoning {
            signals.push(format!("llm-reasoning:{}", reasoning));
        }
        Ok(Prediction {
            book_id: book.id.clone(),
            category_id: category.id.clone(),
            payment_mode: answer
                .payment_mode
                .unwrap_or_else(|| self.payment_mode_for(tx)),
            confidence: answer.confidence,
            signals,
        })
    }

    fn local_classify(
        &self,
        tx: &ParsedTransaction,
        books: &[Book],
        categories: &[Category],
    ) -> Prediction {
        let mapping = self.learning.lookup(&tx.description);
        let recent = self.store.recent_entries(50);

        let mut best_book = (&books[0], f64::MIN, Vec::new());
        for book in books {
            let (score, signals) = self.score_book(tx, book, mapping.as_ref());
            if score > best_book.1 {
                best_book = (book, score, signals);
            }
        }

        let mut best_category = (&categories[0], f64::MIN, Vec::new());
        for category in categories {
            let (score, signals) = self.score_category(tx, category, mapping.as_ref(), &recent);
            if score > best_category.1 {
                best_category = (category, score, signals);
            }
        }
        // Nothing matched: the default "Others" is the floor, not whatever
        // candidate happened to iterate first.
        if best_category.1 <= 0.0 {
            if let Some(others) = categories.iter().find(|c| c.is_default_others()) {
                best_category = (others, 0.0, vec!["category-fallback".to_string()]);
            }
        }

        let (book, book_score, mut signals) = best_book;
        let (category, category_score, category_signals) = best_category;
        signals.extend(category_signals);

        let confidence = ((book_score + category_score) / 200.0).clamp(0.0, 1.0);
        Prediction {
            book_id: book.id.clone(),
            category_id: category.id.clone(),
            payment_mode: self.payment_mode_for(tx),
            confidence,
            signals,
        }
    }

    /// Score a candidate book 0..100 along the weighted axes.
    fn score_book(
        &self,
        tx: &ParsedTransaction,
        book: &Book,
        mapping: Option<&MerchantMapping>,
    ) -> (f64, Vec<String>) {
        let w = &self.weights;
        let mut score = 0.0;
        let mut signals = Vec::new();

        let text = format!("{} {}", book.name, book.description);
        let semantic = semantic::similarity(&tx.description, &text);
        if semantic > 0.0 {
            score += w.book_semantic_weight * semantic;
            signals.push(format!("book-semantic:{:.2}", semantic));
        }

        if mapping.is_some_and(|m| m.book_id == book.id) {
            score += w.book_merchant_weight;
            signals.push("book-merchant-mapping".to_string());
        }

        let history = self.store.entries_for_book(&book.id);
        let amount_fit = amount_range_fit(tx.amount, &history);
        if amount_fit > 0.0 {
            score += w.book_amount_weight * amount_fit;
            signals.push(format!("book-amount:{:.2}", amount_fit));
        }

        let recency = recency_score(tx, &history);
        if recency > 0.0 {
            score += w.book_recency_weight * recency;
            signals.push(format!("book-recency:{:.2}", recency));
        }

        if let Some(currency) = &tx.currency {
            if currency.eq_ignore_ascii_case(&book.currency) {
                score += w.book_currency_weight;
                signals.push("book-currency".to_string());
            }
        }

        (score, signals)
    }

    /// Score a candidate category 0..100, with the strong overrides for
    /// merchant mappings and learned approval patterns.
    fn score_category(
        &self,
        tx: &ParsedTransaction,
        category: &Category,
        mapping: Option<&MerchantMapping>,
        recent: &[Entry],
    ) -> (f64, Vec<String>) {
        let w = &self.weights;
        let mut signals = Vec::new();

        let semantic = semantic::similarity(&tx.description, &category.description);
        let name = semantic::similarity(&tx.description, &category.name);
        let mut score = w.category_semantic_weight * semantic + w.category_name_weight * name;
        if semantic > 0.0 {
            signals.push(format!("category-semantic:{:.2}", semantic));
        }
        if name > 0.0 {
            signals.push(format!("category-name:{:.2}", name));
        }

        if mapping.is_some_and(|m| m.category_id == category.id) {
            score = score.max(w.merchant_override_score);
            signals.push("category-merchant-mapping".to_string());
        } else if approval_pattern_fires(tx, category, recent) {
            score = score.max(w.learning_override_score);
            signals.push("category-learned-pattern".to_string());
        }

        (score, signals)
    }

    /// Keyword lookup over the description, with a currency hint; falls
    /// back to the user's preferred mode.
    fn payment_mode_for(&self, tx: &ParsedTransaction) -> PaymentMode {
        const UPI: &[&str] = &["upi", "gpay", "google pay", "phonepe", "bhim"];
        const CARD: &[&str] = &["card", "visa", "mastercard", "amex", "pos", "swipe"];
        const CASH: &[&str] = &["cash", "atm"];
        const BANK: &[&str] = &["neft", "imps", "rtgs", "transfer", "cheque", "bank"];
        const WALLET: &[&str] = &["wallet", "paytm"];

        let text = tx.description.to_lowercase();
        let hit = |keywords: &[&str]| keywords.iter().any(|k| text.contains(k));

        if hit(UPI) {
            return PaymentMode::Upi;
        }
        if hit(WALLET) {
            return PaymentMode::Wallet;
        }
        if hit(CARD) {
            return PaymentMode::Card;
        }
        if hit(BANK) {
            return PaymentMode::BankTransfer;
        }
        if hit(CASH) {
            return PaymentMode::Cash;
        }

        let prefs = self.store.preferences();
        // Foreign-currency spends are almost always card-present.
        if let Some(currency) = &tx.currency {
            if !currency.eq_ignore_ascii_case(&prefs.default_currency) {
                return PaymentMode::Card;
            }
        }
        prefs.default_payment_mode
    }
}

/// 1.0 inside the book's historical |amount| range, 0.5 inside twice the
/// range, 0 with no usable history.
fn amount_range_fit(amount: f64, history: &[Entry]) -> f64 {
    let amounts: Vec<f64> = history.iter().map(|e| e.amount.abs()).collect();
    if amounts.is_empty() {
        return 0.0;
    }
    let min = amounts.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = amounts.iter().cloned().fold(0.0, f64::max);
    let value = amount.abs();
    if value >= min && value <= max {
        1.0
    } else if value >= min / 2.0 && value <= max * 2.0 {
        0.5
    } else {
        0.0
    }
}

/// Activity recency relative to the transaction date.
fn recency_score(tx: &ParsedTransaction, history: &[Entry]) -> f64 {
    let latest = history.iter().map(|e| e.date).max();
    let Some(latest) = latest else {
        return 0.0;
    };
    let days = (tx.date - latest).num_days();
    if days < 0 {
        // Entries from the future of this transaction still prove the
        // book is active.
        return 1.0;
    }
    match days {
        0..=7 => 1.0,
        8..=30 => 0.6,
        31..=90 => 0.3,
        _ => 0.0,
    }
}

/// Whether approved history maps this merchant to this category.
fn approval_pattern_fires(tx: &ParsedTransaction, category: &Category, recent: &[Entry]) -> bool {
    let merchant = normalize_merchant(&tx.description);
    if merchant.is_empty() {
        return false;
    }
    recent
        .iter()
        .any(|e| e.category == category.id && normalize_merchant(&e.party) == merchant)
}
