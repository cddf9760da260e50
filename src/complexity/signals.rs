//! Local complexity signals.
//!
//! Each signal maps the raw task text to a score in [0,1] using nothing
//! but lexical structure, so the battery is cheap, deterministic, and
//! available even when every LLM call fails. The linguistic measures
//! are heuristic stand-ins for full parses: clause markers approximate
//! dependency depth, verb/noun adjacency approximates predicate
//! structure.

/// Stopwords excluded from content-word counts.
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "of", "to", "in", "on", "for", "with", "at", "by",
    "from", "is", "are", "was", "were", "be", "been", "it", "its", "this", "that", "these",
    "those", "as", "into", "about", "than", "so", "such", "not", "no", "do", "does", "did",
    "will", "would", "should", "could", "can", "may", "might", "have", "has", "had", "i", "you",
    "we", "they", "he", "she", "them", "their", "our", "your", "my",
];

/// Common task verbs, used where a real POS tagger would mark predicates.
const TASK_VERBS: &[&str] = &[
    "add", "analyze", "apply", "assess", "build", "calculate", "check", "choose", "collect",
    "compare", "compile", "compute", "configure", "connect", "convert", "create", "debug",
    "decide", "define", "deploy", "derive", "describe", "design", "determine", "develop",
    "document", "draft", "estimate", "evaluate", "explain", "explore", "extract", "find", "fix",
    "format", "gather", "generate", "identify", "implement", "improve", "install", "integrate",
    "investigate", "justify", "list", "load", "make", "measure", "merge", "migrate", "optimize",
    "organize", "outline", "parse", "plan", "prepare", "produce", "prove", "read", "refactor",
    "release", "remove", "rename", "research", "resolve", "review", "rewrite", "run", "schedule",
    "select", "set", "solve", "sort", "split", "summarize", "synthesize", "test", "train",
    "transform", "translate", "update", "validate", "verify", "write",
];

/// Markers that open a subordinate clause.
const CLAUSE_MARKERS: &[&str] = &[
    "because", "although", "while", "if", "which", "that", "when", "since", "unless", "whereas",
    "where", "after", "before", "until", "once",
];

const TEMPORAL_KEYWORDS: &[&str] = &[
    "before", "after", "simultaneously", "then", "first", "next", "finally", "subsequently",
];

const COGNITIVE_KEYWORDS: &[&str] = &[
    "analyze", "evaluate", "synthesize", "design", "optimize", "compare", "prove", "derive",
    "integrate", "justify", "reconcile", "generalize", "abstract", "decompose", "formalize",
];

const MATH_KEYWORDS: &[&str] = &[
    "prove", "theorem", "lemma", "corollary", "equation", "integral", "derivative", "matrix",
    "polynomial", "converge", "axiom", "inequality", "induction", "bound",
];

const POSITIVE_WORDS: &[&str] = &[
    "good", "great", "easy", "simple", "clear", "nice", "helpful", "fast", "clean", "correct",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bad", "hard", "difficult", "broken", "slow", "confusing", "wrong", "messy", "painful",
    "impossible",
];

/// Lowercase alphanumeric word tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Sentence split on terminal punctuation; the whole text counts as one
/// sentence when none is present.
pub fn sentences(text: &str) -> Vec<&str> {
    let parts: Vec<&str> = text
        .split(['.', '!', '?', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() && !text.trim().is_empty() {
        vec![text.trim()]
    } else {
        parts
    }
}

fn is_verb(word: &str) -> bool {
    TASK_VERBS.contains(&word)
        || word.ends_with("ize")
        || word.ends_with("ify")
        || (word.len() > 4 && word.ends_with("ing") && TASK_VERBS.contains(&&word[..word.len() - 3]))
}

fn is_content_word(word: &str) -> bool {
    !STOPWORDS.contains(&word) && word.len() > 1
}

/// Crude syllable count: vowel groups, minimum one per word.
pub fn syllables(word: &str) -> usize {
    let mut count = 0;
    let mut prev_vowel = false;
    for c in word.chars() {
        let vowel = matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
        if vowel && !prev_vowel {
            count += 1;
        }
        prev_vowel = vowel;
    }
    if word.ends_with('e') && !ends_in_consonant_le(word) && count > 1 {
        count -= 1;
    }
    count.max(1)
}

/// "table", "little": the trailing e is voiced, not silent.
fn ends_in_consonant_le(word: &str) -> bool {
    let chars: Vec<char> = word.chars().collect();
    let n = chars.len();
    n >= 3
        && chars[n - 2].to_ascii_lowercase() == 'l'
        && chars[n - 1].to_ascii_lowercase() == 'e'
        && !matches!(
            chars[n - 3].to_ascii_lowercase(),
            'a' | 'e' | 'i' | 'o' | 'u' | 'y'
        )
}

/// Logistic squash centered at `threshold`.
fn sigmoid_centered(x: f64, threshold: f64) -> f64 {
    1.0 / (1.0 + (-(x - threshold)).exp())
}

/// `1 / (1 + exp(-steepness * x / threshold))`, the normalization used
/// by the plan-analysis score components.
pub fn sigmoid_ratio(x: f64, steepness: f64, threshold: f64) -> f64 {
    if threshold == 0.0 {
        return 0.0;
    }
    1.0 / (1.0 + (-steepness * x / threshold).exp())
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Clause-nesting depth of one sentence.
fn clause_depth(sentence: &str) -> usize {
    let words = tokenize(sentence);
    let markers = words
        .iter()
        .filter(|w| CLAUSE_MARKERS.contains(&w.as_str()))
        .count();
    1 + markers
}

/// Dependency-structure proxy: verbs and clause depth, squashed.
pub fn dependency_depth(text: &str) -> f64 {
    let words = tokenize(text);
    if words.is_empty() {
        return 0.0;
    }
    let verbs = words.iter().filter(|w| is_verb(w)).count();
    let depth = sentences(text)
        .iter()
        .map(|s| clause_depth(s))
        .max()
        .unwrap_or(1);
    sigmoid_centered(verbs as f64, 3.0) * sigmoid_centered(depth as f64, 2.0)
}

/// Predicate/argument density: verbs with the content words around them.
pub fn predicate_argument_density(text: &str) -> f64 {
    let words = tokenize(text);
    if words.is_empty() {
        return 0.0;
    }
    let mut predicates = 0usize;
    let mut arguments = 0usize;
    for (i, word) in words.iter().enumerate() {
        if is_verb(word) {
            predicates += 1;
            arguments += words
                .iter()
                .skip(i + 1)
                .take(3)
                .filter(|w| is_content_word(w) && !is_verb(w))
                .count();
        }
    }
    clamp01(0.2 * predicates as f64 + 0.05 * arguments as f64)
}

/// Task-graph proxy: each verb opens a chain through the content words
/// that follow it; the longest chain approximates the longest path in
/// an action-object graph.
pub fn task_graph_depth(text: &str) -> f64 {
    let mut longest = 0usize;
    for sentence in sentences(text) {
        let words = tokenize(sentence);
        let mut chain = 0usize;
        let mut current = 0usize;
        for word in &words {
            if is_verb(word) {
                current += 1;
                chain = chain.max(current);
            } else if !is_content_word(word) {
                current = 0;
            }
        }
        // Verbs plus the objects between them form the path.
        let objects = words
            .iter()
            .filter(|w| is_content_word(w) && !is_verb(w))
            .count()
            .min(chain);
        longest = longest.max(chain + objects);
    }
    clamp01(longest as f64 / 5.0)
}

/// Syntax-shape proxy: distinct content tokens and clause depth.
pub fn syntax_shape(text: &str) -> f64 {
    let words = tokenize(text);
    if words.is_empty() {
        return 0.0;
    }
    let mut distinct: Vec<&String> = words.iter().filter(|w| is_content_word(w)).collect();
    distinct.sort();
    distinct.dedup();
    let nodes = distinct.len();
    let depth = sentences(text)
        .iter()
        .map(|s| clause_depth(s))
        .max()
        .unwrap_or(1);
    0.5 * clamp01(nodes as f64 / 8.0) + 0.5 * clamp01(depth as f64 / 2.0)
}

/// Shannon entropy of the token distribution, normalized at 5 bits.
pub fn token_entropy(text: &str) -> f64 {
    let words = tokenize(text);
    if words.is_empty() {
        return 0.0;
    }
    let mut counts = std::collections::HashMap::new();
    for word in &words {
        *counts.entry(word.as_str()).or_insert(0usize) += 1;
    }
    let total = words.len() as f64;
    let entropy: f64 = counts
        .values()
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum();
    clamp01(entropy / 5.0)
}

fn keyword_score(text: &str, keywords: &[&str], threshold: f64) -> f64 {
    let words = tokenize(text);
    let hits = words
        .iter()
        .filter(|w| keywords.contains(&w.as_str()))
        .count();
    clamp01(hits as f64 / threshold)
}

/// Temporal-ordering keyword pressure (threshold 3 occurrences).
pub fn temporal_ordering(text: &str) -> f64 {
    keyword_score(text, TEMPORAL_KEYWORDS, 3.0)
}

/// Cognitive-load keyword pressure.
pub fn cognitive_load(text: &str) -> f64 {
    keyword_score(text, COGNITIVE_KEYWORDS, 3.0)
}

/// Formal/mathematical content estimate.
pub fn theorem_steps(text: &str) -> f64 {
    keyword_score(text, MATH_KEYWORDS, 2.0)
}

/// Flesch-Kincaid grade level.
pub fn flesch_kincaid_grade(text: &str) -> f64 {
    let words = tokenize(text);
    if words.is_empty() {
        return 0.0;
    }
    let sentence_count = sentences(text).len().max(1) as f64;
    let word_count = words.len() as f64;
    let syllable_count: usize = words.iter().map(|w| syllables(w)).sum();
    0.39 * (word_count / sentence_count) + 11.8 * (syllable_count as f64 / word_count) - 15.59
}

/// Flesch reading ease (higher is easier).
pub fn flesch_reading_ease(text: &str) -> f64 {
    let words = tokenize(text);
    if words.is_empty() {
        return 0.0;
    }
    let sentence_count = sentences(text).len().max(1) as f64;
    let word_count = words.len() as f64;
    let syllable_count: usize = words.iter().map(|w| syllables(w)).sum();
    206.835 - 1.015 * (word_count / sentence_count) - 84.6 * (syllable_count as f64 / word_count)
}

/// Grade level as a [0,1] score (16 ~ postgraduate prose).
pub fn readability_grade(text: &str) -> f64 {
    clamp01(flesch_kincaid_grade(text) / 16.0)
}

/// Neutral long prose reads as harder than short emphatic text.
pub fn sentiment_neutrality(text: &str) -> f64 {
    let words = tokenize(text);
    if words.is_empty() {
        return 0.0;
    }
    let pos = words
        .iter()
        .filter(|w| POSITIVE_WORDS.contains(&w.as_str()))
        .count() as f64;
    let neg = words
        .iter()
        .filter(|w| NEGATIVE_WORDS.contains(&w.as_str()))
        .count() as f64;
    let polarity = if pos + neg > 0.0 {
        (pos - neg) / (pos + neg)
    } else {
        0.0
    };
    (1.0 - polarity.abs()) * clamp01(words.len() as f64 / 20.0)
}

/// Long/rare word ratio as a concept-depth stand-in.
pub fn concept_depth(text: &str) -> f64 {
    let words = tokenize(text);
    if words.is_empty() {
        return 0.0;
    }
    let long = words.iter().filter(|w| w.len() >= 8).count() as f64;
    clamp01((long / words.len() as f64) / 0.3)
}

/// How many clauses the text splits into when recursively cut at
/// connectors and punctuation.
pub fn recursive_decomposition(text: &str) -> f64 {
    let clauses = text
        .split([',', ';', ':'])
        .flat_map(|part| {
            part.split(" and ")
                .flat_map(|p| p.split(" then "))
                .collect::<Vec<_>>()
        })
        .filter(|c| tokenize(c).len() >= 2)
        .count();
    clamp01(clauses as f64 / 4.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = "What is the capital of France?";
    const COMPLEX: &str = "First analyze the existing schema, then design a migration plan \
        that preserves ordering guarantees, and finally implement, test, and document the \
        rollout procedure before the release window closes.";

    #[test]
    fn tokenize_lowercases_and_splits() {
        assert_eq!(tokenize("Build, then TEST!"), vec!["build", "then", "test"]);
    }

    #[test]
    fn sentence_split_falls_back_to_whole_text() {
        assert_eq!(sentences("no terminal punctuation here").len(), 1);
        assert_eq!(sentences("One. Two. Three.").len(), 3);
    }

    #[test]
    fn syllable_estimates() {
        assert_eq!(syllables("cat"), 1);
        assert_eq!(syllables("table"), 2);
        assert_eq!(syllables("little"), 2);
        // A vowel before the "le" keeps the e silent.
        assert_eq!(syllables("tale"), 1);
        assert!(syllables("infrastructure") >= 4);
    }

    #[test]
    fn complex_text_scores_higher_across_signals() {
        assert!(dependency_depth(COMPLEX) > dependency_depth(SIMPLE));
        assert!(predicate_argument_density(COMPLEX) > predicate_argument_density(SIMPLE));
        assert!(temporal_ordering(COMPLEX) > temporal_ordering(SIMPLE));
        assert!(token_entropy(COMPLEX) > token_entropy(SIMPLE));
        assert!(recursive_decomposition(COMPLEX) > recursive_decomposition(SIMPLE));
    }

    #[test]
    fn signals_stay_in_unit_interval() {
        for text in [SIMPLE, COMPLEX, "", "word"] {
            for score in [
                dependency_depth(text),
                predicate_argument_density(text),
                task_graph_depth(text),
                syntax_shape(text),
                token_entropy(text),
                temporal_ordering(text),
                cognitive_load(text),
                theorem_steps(text),
                readability_grade(text),
                sentiment_neutrality(text),
                concept_depth(text),
                recursive_decomposition(text),
            ] {
                assert!((0.0..=1.0).contains(&score), "out of range for {text:?}");
            }
        }
    }

    #[test]
    fn empty_text_scores_zero() {
        assert_eq!(token_entropy(""), 0.0);
        assert_eq!(dependency_depth(""), 0.0);
        assert_eq!(readability_grade(""), 0.0);
    }

    #[test]
    fn sigmoid_ratio_matches_definition() {
        let v = sigmoid_ratio(4.0, 1.0, 4.0);
        assert!((v - 1.0 / (1.0 + (-1.0f64).exp())).abs() < 1e-12);
        assert_eq!(sigmoid_ratio(1.0, 1.0, 0.0), 0.0);
    }
}
