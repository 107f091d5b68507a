//! Entity extraction
//!
//! Turns free text, host search terms and file paths into the normalized
//! token sets used for storage and matching. Output is a `BTreeSet`, so the
//! same input always yields the same ordered set.

use std::collections::{BTreeSet, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::event::{EventId, WriteRequest};

/// Extensions recognised as file references inside free text
const FILE_EXTENSIONS: &[&str] = &[
    "rs", "py", "ts", "tsx", "js", "jsx", "mjs", "go", "java", "kt", "rb", "php", "c", "h", "cc",
    "cpp", "hpp", "cs", "swift", "scala", "sh", "sql", "toml", "yaml", "yml", "json", "md", "html",
    "css", "scss", "vue", "lock", "cfg", "ini", "xml", "proto", "gradle", "tf",
];

/// Default concept vocabulary: tools, error names, techniques
const DEFAULT_KEYWORDS: &[&str] = &[
    // tools
    "cargo", "clippy", "rustfmt", "npm", "yarn", "pnpm", "pip", "poetry", "pytest", "jest",
    "vitest", "webpack", "vite", "docker", "kubernetes", "helm", "terraform", "git", "make",
    "cmake", "gradle", "maven", "postgres", "mysql", "sqlite", "redis", "kafka", "nginx", "tokio",
    "serde", "react", "django", "flask", "fastapi", "graphql", "grpc", "ssh", "curl",
    // error names
    "panic", "segfault", "deadlock", "timeout", "overflow", "oom", "nullpointer", "race",
    "leak", "flaky", "regression", "traceback", "exception", "error", "warning", "conflict",
    "corruption", "cors", "404", "500",
    // techniques and areas
    "auth", "login", "oauth", "jwt", "session", "cookie", "cache", "retry", "backoff",
    "migration", "schema", "index", "transaction", "lock", "mutex", "async", "thread",
    "pagination", "serialization", "encoding", "utf8", "unicode", "timezone", "logging",
    "config", "env", "permission", "ci", "build", "test", "mock", "fixture", "benchmark",
    "profiling", "refactor", "api", "endpoint", "websocket", "queue", "batch", "stream",
];

/// Extractor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Concept keywords pulled out of free text
    pub keywords: Vec<String>,
    /// Extra keywords appended to the list above
    pub extra_keywords: Vec<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            keywords: DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            extra_keywords: vec![],
        }
    }
}

/// How a context token participates in matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityRole {
    /// File name with extension, e.g. `login.py`
    Basename,
    /// File name without extension, e.g. `login`
    Stem,
    /// Immediate parent directory name
    Directory,
    /// Keyword or host-supplied concept
    Concept,
}

/// A typed token from the current context
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextEntity {
    pub role: EntityRole,
    pub token: String,
}

/// Typed entity set describing the current context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextEntities {
    entries: BTreeSet<ContextEntity>,
}

impl ContextEntities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify bare tokens by shape: paths expand into file roles, tokens
    /// with a file extension are basenames, everything else is a concept
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ctx = Self::new();
        for token in tokens {
            let token = token.as_ref().trim();
            if token.contains('/') || token.contains('\\') {
                ctx.add_path(token);
            } else if has_extension(token) {
                ctx.push(EntityRole::Basename, token.to_lowercase());
            } else if let Some(concept) = normalize_concept(token) {
                ctx.push(EntityRole::Concept, concept);
            }
        }
        ctx
    }

    /// Expand a file path into basename, stem and directory entries
    pub fn add_path(&mut self, path: &str) {
        let parts = FileParts::of(path);
        if let Some(basename) = parts.basename {
            self.push(EntityRole::Basename, basename);
        }
        if let Some(stem) = parts.stem {
            self.push(EntityRole::Stem, stem);
        }
        if let Some(dir) = parts.directory {
            self.push(EntityRole::Directory, dir);
        }
    }

    pub fn add_concept(&mut self, concept: &str) {
        if let Some(concept) = normalize_concept(concept) {
            self.push(EntityRole::Concept, concept);
        }
    }

    fn push(&mut self, role: EntityRole, token: String) {
        if !token.is_empty() {
            self.entries.insert(ContextEntity { role, token });
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContextEntity> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Context snapshot handed over by the host on a read trigger
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ContextSnapshot {
    /// Files touched in the current session
    #[serde(default)]
    pub files: Vec<String>,
    /// Concept keywords in play
    #[serde(default)]
    pub concepts: Vec<String>,
    /// Optional free text (prompt, tool input) to mine for more entities
    #[serde(default)]
    pub text: Option<String>,
}

/// Derives normalized entity tokens from records and context
#[derive(Debug, Clone)]
pub struct Extractor {
    keywords: HashSet<String>,
}

impl Extractor {
    pub fn new(config: &ExtractorConfig) -> Self {
        let keywords = config
            .keywords
            .iter()
            .chain(config.extra_keywords.iter())
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    /// Extract concept and file tokens from text plus explicit file paths
    pub fn extract(&self, text: &str, file_paths: &[String]) -> BTreeSet<String> {
        let mut entities = BTreeSet::new();

        for chunk in text.split_whitespace() {
            let chunk = trim_punctuation(chunk);
            if chunk.is_empty() {
                continue;
            }
            if looks_like_path(chunk) {
                entities.extend(FileParts::of(chunk).into_tokens());
                continue;
            }
            for word in chunk
                .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
                .filter(|w| !w.is_empty())
            {
                if let Some(keyword) = self.match_keyword(word) {
                    entities.insert(keyword);
                }
            }
        }

        for path in file_paths {
            entities.extend(FileParts::of(path).into_tokens());
        }

        entities
    }

    /// Full entity set for a write request
    ///
    /// Host search terms are kept verbatim (normalized) so that the host's
    /// own vocabulary is always matchable, even outside the keyword list.
    pub fn entities_for(&self, request: &WriteRequest) -> BTreeSet<String> {
        let mut entities = self.extract(&request.content, &request.file_paths);

        for term in &request.search_terms {
            let term = term.trim();
            if term.contains('/') || term.contains('\\') || has_extension(term) {
                entities.extend(FileParts::of(term).into_tokens());
            } else if let Some(concept) = normalize_concept(term) {
                if let Some(keyword) = self.match_keyword(&concept) {
                    entities.insert(keyword);
                }
                entities.insert(concept);
            }
        }

        if let Some(problem_type) = request.problem_type {
            entities.insert(problem_type.as_str().to_string());
        }

        entities
    }

    /// Typed context entities for a read trigger
    pub fn context(&self, snapshot: &ContextSnapshot) -> ContextEntities {
        let mut ctx = ContextEntities::new();
        for path in &snapshot.files {
            ctx.add_path(path);
        }
        for concept in &snapshot.concepts {
            ctx.add_concept(concept);
        }
        if let Some(text) = snapshot.text.as_deref() {
            for chunk in text.split_whitespace().map(trim_punctuation) {
                if looks_like_path(chunk) {
                    ctx.add_path(chunk);
                } else {
                    for word in chunk
                        .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
                        .filter(|w| !w.is_empty())
                    {
                        if let Some(keyword) = self.match_keyword(word) {
                            ctx.push(EntityRole::Concept, keyword);
                        }
                    }
                }
            }
        }
        ctx
    }

    /// Lower-case and, where trivial, de-pluralize a word, keeping it only
    /// if it is a known keyword
    fn match_keyword(&self, word: &str) -> Option<String> {
        let lower = word.to_lowercase();
        if self.keywords.contains(&lower) {
            return Some(lower);
        }
        let singular = singularize(&lower)?;
        self.keywords.contains(&singular).then_some(singular)
    }
}

/// Event ids embedded anywhere in `text`
pub fn referenced_ids(text: &str) -> BTreeSet<EventId> {
    static ID_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = ID_PATTERN.get_or_init(|| Regex::new(r"\b\d{8}T\d{9}Z-[0-9a-f]{8}\b").ok());

    let Some(pattern) = pattern else {
        return BTreeSet::new();
    };
    pattern
        .find_iter(text)
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}

/// Basename, stem and parent directory of a path, lower-cased
#[derive(Debug, Default, PartialEq, Eq)]
struct FileParts {
    basename: Option<String>,
    stem: Option<String>,
    directory: Option<String>,
}

impl FileParts {
    fn of(path: &str) -> Self {
        let normalized = path.trim().replace('\\', "/").to_lowercase();
        let mut components = normalized
            .split('/')
            .filter(|c| !c.is_empty() && *c != "." && *c != "..")
            .rev();

        let Some(basename) = components.next() else {
            return Self::default();
        };
        let stem = match basename.rfind('.') {
            Some(idx) if idx > 0 => Some(basename[..idx].to_string()),
            _ => None,
        };
        let directory = components.next().map(String::from);

        Self {
            basename: Some(basename.to_string()),
            stem,
            directory,
        }
    }

    fn into_tokens(self) -> impl Iterator<Item = String> {
        [self.basename, self.stem, self.directory]
            .into_iter()
            .flatten()
    }
}

/// Strip the part of a file token after its last dot
pub fn stem_of(token: &str) -> &str {
    match token.rfind('.') {
        Some(idx) if idx > 0 => &token[..idx],
        _ => token,
    }
}

fn has_extension(token: &str) -> bool {
    match token.rfind('.') {
        Some(idx) if idx > 0 => {
            let ext = token[idx + 1..].to_lowercase();
            FILE_EXTENSIONS.contains(&ext.as_str())
        }
        _ => false,
    }
}

fn looks_like_path(chunk: &str) -> bool {
    if has_extension(chunk) {
        return true;
    }
    // `src/auth/` style references; ignore URLs and ratios like 1/2
    chunk.contains('/')
        && !chunk.contains("://")
        && chunk.split('/').any(|part| part.chars().any(char::is_alphabetic))
}

fn trim_punctuation(chunk: &str) -> &str {
    let is_wrapper = |c: char| {
        matches!(
            c,
            '"' | '\'' | '`' | '(' | ')' | '[' | ']' | '{' | '}' | '<' | '>' | ',' | ';' | ':' | '!' | '?'
        )
    };
    chunk
        .trim_start_matches(is_wrapper)
        .trim_end_matches(|c: char| is_wrapper(c) || c == '.')
}

fn normalize_concept(term: &str) -> Option<String> {
    let concept = term
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase();
    (!concept.is_empty()).then_some(concept)
}

fn singularize(word: &str) -> Option<String> {
    if word.len() <= 3 {
        return None;
    }
    if let Some(base) = word.strip_suffix("ies") {
        return Some(format!("{base}y"));
    }
    if word.ends_with("ss") || word.ends_with("us") || word.ends_with("is") {
        return None;
    }
    word.strip_suffix('s').map(String::from)
}
