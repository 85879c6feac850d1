//! Categorized include/exclude/rewrite rules over names.
//!
//! A [`PatternRuleSet`] is an ordered list of [`PatternRule`]s, each keyed by
//! a category (`project`, `revision`, `tags`, `file`, ...) and an optional
//! name key. Rules are built from text entries:
//!
//! ```text
//! revision:!release/.*              exclude release branches everywhere
//! revision:kernel/.*@~^v~~          strip a `v` prefix, only for projects matching kernel/.*
//! tags-rp:^(.*)$~mirror/\1          rewrite collection: unmarked tokens are rewrites
//! ```
//!
//! # Evaluation
//!
//! - Rule selection: a rule whose name key (a regex, searched) matches the
//!   queried name wins; otherwise the nameless rule of the category, unless
//!   the query is strict. First match in insertion order.
//! - Matching: empty include list means "everything included"; any matching
//!   exclude rejects the value. No selected rule at all means the value
//!   passes, so an empty rule set is permissive.
//! - A category queried as `!category` inverts the final answer.
//! - Rewrites run in order; a matching step that does not continue ends the
//!   chain.

use std::fmt;

use regex::Regex;

use crate::error::PatternError;
use crate::token::{self, Token};

/// Category selecting whole projects.
pub const PROJECT: &str = "project";
/// Category selecting and renaming branch heads.
pub const REVISION: &str = "revision";
/// Category selecting and renaming tags.
pub const TAGS: &str = "tags";
/// Category filtering file names during tree sync.
pub const FILE: &str = "file";
/// Category filtering directory names during tree sync.
pub const DIR: &str = "dir";
/// Category filtering full relative paths during tree sync.
pub const PATH: &str = "path";

// ---------------------------------------------------------------------------
// RewriteStep
// ---------------------------------------------------------------------------

/// One `pattern -> replacement` step of a rewrite chain.
#[derive(Debug, Clone)]
pub struct RewriteStep {
    pattern: Regex,
    replacement: String,
    template: String,
    continues: bool,
}

impl RewriteStep {
    /// Compile a step. `replacement` refers to groups as `\1` or
    /// `\g<name>`; any `$` in it is literal text.
    pub fn new(pattern: &str, replacement: &str, continues: bool) -> Result<Self, PatternError> {
        Ok(Self {
            pattern: compile(pattern)?,
            replacement: replacement.to_string(),
            template: to_template(replacement),
            continues,
        })
    }

    /// Whether a successful rewrite lets the chain go on.
    pub fn continues(&self) -> bool {
        self.continues
    }

    /// The source pattern text.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// The replacement text as written in the rule.
    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    /// Rewrite `value`, or `None` if the pattern does not match it.
    pub fn apply(&self, value: &str) -> Option<String> {
        if !self.pattern.is_match(value) {
            return None;
        }
        Some(
            self.pattern
                .replace_all(value, self.template.as_str())
                .into_owned(),
        )
    }

    fn same_as(&self, other: &RewriteStep) -> bool {
        self.pattern.as_str() == other.pattern.as_str()
            && self.replacement == other.replacement
            && self.continues == other.continues
    }
}

// ---------------------------------------------------------------------------
// PatternRule
// ---------------------------------------------------------------------------

/// All tokens collected for one `(category, name)` pair.
#[derive(Debug, Clone)]
pub struct PatternRule {
    category: String,
    name: Option<String>,
    name_matcher: Option<Regex>,
    includes: Vec<Regex>,
    excludes: Vec<Regex>,
    rewrites: Vec<RewriteStep>,
}

impl PatternRule {
    fn new(category: String, name: Option<&str>) -> Self {
        // Name keys that are not valid regexes are matched literally.
        let name_matcher = name.and_then(|key| {
            Regex::new(key)
                .or_else(|_| Regex::new(&regex::escape(key)))
                .ok()
        });
        Self {
            category,
            name: name.map(str::to_string),
            name_matcher,
            includes: Vec::new(),
            excludes: Vec::new(),
            rewrites: Vec::new(),
        }
    }

    /// The normalized category key.
    pub fn category(&self) -> &str {
        &self.category
    }

    /// The name key, if this rule is scoped to matching names.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The rewrite chain in evaluation order.
    pub fn rewrites(&self) -> &[RewriteStep] {
        &self.rewrites
    }

    /// Include/exclude evaluation for a single value.
    pub fn is_match(&self, value: &str) -> bool {
        self.is_included(value) && !self.is_excluded(value)
    }

    /// Whether the include list admits `value`; an empty list admits all.
    pub fn is_included(&self, value: &str) -> bool {
        self.includes.is_empty() || self.includes.iter().any(|re| re.is_match(value))
    }

    pub fn is_excluded(&self, value: &str) -> bool {
        self.excludes.iter().any(|re| re.is_match(value))
    }

    pub fn has_includes(&self) -> bool {
        !self.includes.is_empty()
    }

    /// Run the rewrite chain over `value`.
    pub fn rewrite(&self, value: &str) -> String {
        let mut current = value.to_string();
        for step in &self.rewrites {
            if let Some(rewritten) = step.apply(&current) {
                current = rewritten;
                if !step.continues {
                    break;
                }
            }
        }
        current
    }

    fn applies_to(&self, name: &str) -> bool {
        self.name_matcher
            .as_ref()
            .is_some_and(|matcher| matcher.is_match(name))
    }

    fn push_token(&mut self, token: Token) -> Result<(), PatternError> {
        match token {
            Token::Include(pattern) => {
                let re = compile(&pattern)?;
                if !contains_regex(&self.includes, &re) {
                    self.includes.push(re);
                }
            }
            Token::Exclude(pattern) => {
                let re = compile(&pattern)?;
                if !contains_regex(&self.excludes, &re) {
                    self.excludes.push(re);
                }
            }
            Token::Rewrite {
                pattern,
                replacement,
                continues,
            } => {
                let step = RewriteStep::new(&pattern, &replacement, continues)?;
                if !self.rewrites.iter().any(|s| s.same_as(&step)) {
                    self.rewrites.push(step);
                }
            }
        }
        Ok(())
    }

    fn absorb(&mut self, other: &PatternRule) {
        for re in &other.includes {
            if !contains_regex(&self.includes, re) {
                self.includes.push(re.clone());
            }
        }
        for re in &other.excludes {
            if !contains_regex(&self.excludes, re) {
                self.excludes.push(re.clone());
            }
        }
        for step in &other.rewrites {
            if !self.rewrites.iter().any(|s| s.same_as(step)) {
                self.rewrites.push(step.clone());
            }
        }
    }

    fn same_key(&self, category: &str, name: Option<&str>) -> bool {
        self.category == category && self.name.as_deref() == name
    }
}

impl fmt::Display for PatternRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.category)?;
        if let Some(name) = &self.name {
            write!(f, "{name}@")?;
        }
        let mut tokens: Vec<String> = Vec::new();
        tokens.extend(self.includes.iter().map(|re| re.as_str().replace(',', "\\,")));
        tokens.extend(
            self.excludes
                .iter()
                .map(|re| format!("!{}", re.as_str().replace(',', "\\,"))),
        );
        for step in &self.rewrites {
            let delim = if step.continues { '=' } else { '~' };
            let escape = |s: &str| s.replace(delim, &format!("\\{delim}"));
            tokens.push(format!(
                "{delim}{}{delim}{}{delim}",
                escape(step.pattern()),
                escape(step.replacement())
            ));
        }
        f.write_str(&tokens.join(","))
    }
}

// ---------------------------------------------------------------------------
// PatternRuleSet
// ---------------------------------------------------------------------------

/// Ordered collection of [`PatternRule`]s.
#[derive(Debug, Clone, Default)]
pub struct PatternRuleSet {
    rules: Vec<PatternRule>,
}

impl PatternRuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from rule texts; malformed entries are logged and skipped.
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for text in texts {
            set.add(text.as_ref());
        }
        set
    }

    /// Parse `text` and append it to the matching `(category, name)` rule.
    ///
    /// A malformed entry is logged at `warn` and ignored; one bad rule must
    /// not take a whole batch down. Returns whether the entry was accepted.
    pub fn add(&mut self, text: &str) -> bool {
        match self.try_add(text) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(rule = %text, error = %err, "ignoring malformed pattern rule");
                false
            }
        }
    }

    /// Like [`add`](Self::add) but reports the parse error.
    ///
    /// The set is left untouched when any token of `text` fails to parse.
    pub fn try_add(&mut self, text: &str) -> Result<(), PatternError> {
        let parts = token::split_rule(text)?;
        let tokens = token::tokenize(parts.body, parts.replacement, text)?;
        if tokens.is_empty() {
            return Err(PatternError::EmptyRule {
                text: text.to_string(),
            });
        }

        let mut staged = match self.position(&parts.category, parts.name) {
            Some(idx) => self.rules[idx].clone(),
            None => PatternRule::new(parts.category.clone(), parts.name),
        };
        for token in tokens {
            staged.push_token(token)?;
        }

        match self.position(&parts.category, parts.name) {
            Some(idx) => self.rules[idx] = staged,
            None => self.rules.push(staged),
        }
        Ok(())
    }

    /// Union `other` into `self`, keeping `self`'s rules first.
    ///
    /// Rules sharing a `(category, name)` key are combined; duplicate
    /// patterns are dropped.
    pub fn merge(&mut self, other: &PatternRuleSet) {
        for rule in &other.rules {
            match self.position(&rule.category, rule.name.as_deref()) {
                Some(idx) => self.rules[idx].absorb(rule),
                None => self.rules.push(rule.clone()),
            }
        }
    }

    /// Whether any rule exists for `category`.
    pub fn has_category(&self, category: &str) -> bool {
        let (category, _) = token::normalize_category(category.trim_start_matches('!'));
        self.rules.iter().any(|r| r.category == category)
    }

    /// Select the rule that governs `category` for `name`.
    ///
    /// A rule keyed on a name that matches wins over the nameless default,
    /// whatever their insertion order. `strict` disables the fallback to the
    /// default when a name is given.
    pub fn select(&self, category: &str, name: Option<&str>, strict: bool) -> Option<&PatternRule> {
        let (category, _) = token::normalize_category(category.trim_start_matches('!'));
        if let Some(name) = name {
            let named = self
                .rules
                .iter()
                .find(|r| r.category == category && r.applies_to(name));
            if named.is_some() || strict {
                return named;
            }
        }
        self.rules
            .iter()
            .find(|r| r.category == category && r.name.is_none())
    }

    /// `is_match_with(category, value, None, false)`.
    pub fn is_match(&self, category: &str, value: &str) -> bool {
        self.is_match_with(category, value, None, false)
    }

    /// Evaluate `value` against the rule selected for `category`/`name`.
    ///
    /// Prefix `category` with `!` to invert the answer.
    pub fn is_match_with(
        &self,
        category: &str,
        value: &str,
        name: Option<&str>,
        strict: bool,
    ) -> bool {
        let opposite = category.starts_with('!');
        let matched = self
            .select(category, name, strict)
            .map_or(true, |rule| rule.is_match(value));
        matched != opposite
    }

    /// Run the rewrite chain selected for `category`/`name` over `value`.
    ///
    /// Returns `value` unchanged when no rule or no step applies.
    pub fn replace(&self, category: &str, value: &str, name: Option<&str>) -> String {
        match self.select(category, name, false) {
            Some(rule) => rule.rewrite(value),
            None => value.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PatternRule> {
        self.rules.iter()
    }

    fn position(&self, category: &str, name: Option<&str>) -> Option<usize> {
        self.rules.iter().position(|r| r.same_key(category, name))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn compile(pattern: &str) -> Result<Regex, PatternError> {
    Regex::new(pattern).map_err(|source| PatternError::InvalidRegex {
        pattern: pattern.to_string(),
        source,
    })
}

fn contains_regex(list: &[Regex], re: &Regex) -> bool {
    list.iter().any(|existing| existing.as_str() == re.as_str())
}

/// Translate `\N` and `\g<name>` group references into `${N}` / `${name}`;
/// a literal `$` stays literal.
fn to_template(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' {
            out.push_str("$$");
            continue;
        }
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some(d) if d.is_ascii_digit() => {
                let mut group = String::new();
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    group.push(d);
                    chars.next();
                }
                out.push_str(&format!("${{{group}}}"));
            }
            Some('g') => {
                chars.next();
                if chars.peek() == Some(&'<') {
                    chars.next();
                    let group: String = chars.by_ref().take_while(|&c| c != '>').collect();
                    out.push_str(&format!("${{{group}}}"));
                } else {
                    out.push_str("\\g");
                }
            }
            Some('\\') => {
                chars.next();
                out.push('\\');
            }
            _ => out.push('\\'),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
